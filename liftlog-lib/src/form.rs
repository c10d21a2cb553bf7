//src/form.rs
//! Entry form controller: which inputs are shown, how sets accumulate, and
//! how a submit branches between logging against an existing exercise and
//! defining a new one first. Pure state; persistence lives in `AppService`.
use crate::model::{Category, ExerciseDefinition, ExerciseShape, LogEntry, SetField, SetRecord};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormError {
    #[error("An entry is being edited. Finish or cancel the edit first.")]
    EditInProgress,
    #[error("No entry is being edited.")]
    NotEditing,
    #[error("'{0}' is not an input of the current exercise.")]
    FieldNotInShape(SetField),
    /// Holds the 0-based index; the message numbers sets from 1.
    #[error("Set {} does not exist.", .0 + 1)]
    NoSuchSet(usize),
    #[error("Adding sets is not available for this exercise.")]
    AddSetUnavailable,
    #[error("No exercise selected.")]
    NoExercise,
    #[error("Only a new exercise takes a name, muscle group or field set.")]
    NotDefiningNew,
    #[error("Entry is for '{entry}' but exercise '{given}' was supplied.")]
    ExerciseMismatch { entry: String, given: String },
}

/// Why a draft could not become a set. Never shown to the user by the form itself.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DraftError {
    #[error("'{value}' is not a valid {field}")]
    NotANumber { field: SetField, value: String },
    #[error("{0} cannot be negative")]
    Negative(SetField),
    #[error("incomplete {0} set")]
    Incomplete(ExerciseShape),
}

fn parse_optional_int(field: SetField, input: &str) -> Result<Option<u32>, DraftError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.starts_with('-') {
        return Err(DraftError::Negative(field));
    }
    u32::from_str(trimmed)
        .map(Some)
        .map_err(|_| DraftError::NotANumber {
            field,
            value: trimmed.to_string(),
        })
}

fn parse_optional_float(field: SetField, input: &str) -> Result<Option<f64>, DraftError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value = f64::from_str(trimmed).map_err(|_| DraftError::NotANumber {
        field,
        value: trimmed.to_string(),
    })?;
    if !value.is_finite() {
        return Err(DraftError::NotANumber {
            field,
            value: trimmed.to_string(),
        });
    }
    if value < 0.0 {
        return Err(DraftError::Negative(field));
    }
    Ok(Some(value))
}

/// Raw text inputs for one set, one slot per field of its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDraft {
    shape: ExerciseShape,
    inputs: BTreeMap<SetField, String>,
}

impl SetDraft {
    pub fn empty(shape: ExerciseShape) -> Self {
        Self {
            shape,
            inputs: shape
                .fields()
                .iter()
                .map(|f| (*f, String::new()))
                .collect(),
        }
    }

    /// Seeds the inputs from a stored set. Keys foreign to `shape` are dropped.
    pub fn from_record(shape: ExerciseShape, record: &SetRecord) -> Self {
        let mut draft = Self::empty(shape);
        for (field, slot) in &mut draft.inputs {
            *slot = match field {
                SetField::Weight => record.weight.map(|v| v.to_string()),
                SetField::Reps => record.reps.map(|v| v.to_string()),
                SetField::Distance => record.distance.map(|v| v.to_string()),
                SetField::Duration => record.duration_secs.map(|v| v.to_string()),
            }
            .unwrap_or_default();
        }
        draft
    }

    pub const fn shape(&self) -> ExerciseShape {
        self.shape
    }

    pub fn input(&self, field: SetField) -> Option<&str> {
        self.inputs.get(&field).map(String::as_str)
    }

    pub fn set_input(&mut self, field: SetField, value: &str) -> Result<(), FormError> {
        let slot = self
            .inputs
            .get_mut(&field)
            .ok_or(FormError::FieldNotInShape(field))?;
        *slot = value.to_string();
        Ok(())
    }

    fn raw(&self, field: SetField) -> &str {
        self.input(field).unwrap_or_default()
    }

    /// Parses the inputs and applies the completeness rule of the shape.
    pub fn to_record(&self) -> Result<SetRecord, DraftError> {
        let record = match self.shape {
            ExerciseShape::WeightReps => SetRecord {
                weight: parse_optional_float(SetField::Weight, self.raw(SetField::Weight))?,
                reps: parse_optional_int(SetField::Reps, self.raw(SetField::Reps))?,
                ..Default::default()
            },
            ExerciseShape::DistanceDuration => SetRecord::distance_duration(
                parse_optional_float(SetField::Distance, self.raw(SetField::Distance))?,
                parse_optional_int(SetField::Duration, self.raw(SetField::Duration))?,
            ),
            ExerciseShape::DurationOnly => SetRecord {
                duration_secs: parse_optional_int(
                    SetField::Duration,
                    self.raw(SetField::Duration),
                )?,
                ..Default::default()
            },
        };
        if record.is_complete_for(self.shape) {
            Ok(record)
        } else {
            Err(DraftError::Incomplete(self.shape))
        }
    }
}

/// Inputs collected while defining an exercise inline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NewExerciseDraft {
    pub name: String,
    pub muscle_group: String,
    pub shape: Option<ExerciseShape>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormMode {
    /// Nothing selected yet.
    Idle,
    LoggingExisting { exercise: ExerciseDefinition },
    DefiningNew(NewExerciseDraft),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditTarget {
    pub entry_id: i64,
    pub original_timestamp: DateTime<Utc>,
}

/// What a valid form turns into on submit.
#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    Create {
        exercise: ExerciseDefinition,
        sets: Vec<SetRecord>,
    },
    DefineAndCreate {
        definition: ExerciseDefinition,
        sets: Vec<SetRecord>,
    },
    Edit {
        target: EditTarget,
        exercise: ExerciseDefinition,
        sets: Vec<SetRecord>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryForm {
    mode: FormMode,
    selected_category: Category,
    default_category: Category,
    pending_sets: Vec<SetDraft>,
    editing: Option<EditTarget>,
}

impl Default for EntryForm {
    fn default() -> Self {
        Self::new(Category::default())
    }
}

impl EntryForm {
    pub fn new(default_category: Category) -> Self {
        Self {
            mode: FormMode::Idle,
            selected_category: default_category,
            default_category,
            pending_sets: Vec::new(),
            editing: None,
        }
    }

    pub const fn mode(&self) -> &FormMode {
        &self.mode
    }

    pub const fn selected_category(&self) -> Category {
        self.selected_category
    }

    pub fn selected_exercise(&self) -> Option<&ExerciseDefinition> {
        match &self.mode {
            FormMode::LoggingExisting { exercise } => Some(exercise),
            _ => None,
        }
    }

    pub fn new_exercise(&self) -> Option<&NewExerciseDraft> {
        match &self.mode {
            FormMode::DefiningNew(draft) => Some(draft),
            _ => None,
        }
    }

    pub fn pending_sets(&self) -> &[SetDraft] {
        &self.pending_sets
    }

    pub fn editing_entry_id(&self) -> Option<i64> {
        self.editing.as_ref().map(|t| t.entry_id)
    }

    pub const fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    /// Shape the drafts follow: the selected exercise's, or the one chosen for a new exercise.
    pub fn current_shape(&self) -> Option<ExerciseShape> {
        match &self.mode {
            FormMode::Idle => None,
            FormMode::LoggingExisting { exercise } => Some(exercise.shape),
            FormMode::DefiningNew(draft) => draft.shape,
        }
    }

    pub fn visible_fields(&self) -> &'static [SetField] {
        match self.current_shape() {
            Some(shape) => shape.fields(),
            None => &[],
        }
    }

    pub fn can_add_set(&self) -> bool {
        self.current_shape()
            .is_some_and(ExerciseShape::allows_multiple_sets)
    }

    fn ensure_not_editing(&self) -> Result<(), FormError> {
        if self.is_editing() {
            Err(FormError::EditInProgress)
        } else {
            Ok(())
        }
    }

    /// Switches the catalog filter. A selected exercise from another category is dropped.
    pub fn select_category(&mut self, category: Category) -> Result<(), FormError> {
        self.ensure_not_editing()?;
        self.selected_category = category;
        if let FormMode::LoggingExisting { exercise } = &self.mode {
            if exercise.category != category {
                self.mode = FormMode::Idle;
                self.pending_sets.clear();
            }
        }
        Ok(())
    }

    /// Catalog tile selection.
    pub fn select_exercise(&mut self, exercise: ExerciseDefinition) -> Result<(), FormError> {
        self.ensure_not_editing()?;
        self.selected_category = exercise.category;
        self.pending_sets = vec![SetDraft::empty(exercise.shape)];
        self.mode = FormMode::LoggingExisting { exercise };
        Ok(())
    }

    pub fn define_new_exercise(&mut self) -> Result<(), FormError> {
        self.ensure_not_editing()?;
        self.mode = FormMode::DefiningNew(NewExerciseDraft::default());
        self.pending_sets.clear();
        Ok(())
    }

    fn new_exercise_mut(&mut self) -> Result<&mut NewExerciseDraft, FormError> {
        match &mut self.mode {
            FormMode::DefiningNew(draft) => Ok(draft),
            _ => Err(FormError::NotDefiningNew),
        }
    }

    pub fn set_new_exercise_name(&mut self, name: &str) -> Result<(), FormError> {
        self.new_exercise_mut()?.name = name.to_string();
        Ok(())
    }

    pub fn set_new_muscle_group(&mut self, muscle_group: &str) -> Result<(), FormError> {
        self.new_exercise_mut()?.muscle_group = muscle_group.to_string();
        Ok(())
    }

    /// Choosing the field set of a new exercise starts over with one empty draft.
    pub fn set_new_shape(&mut self, shape: ExerciseShape) -> Result<(), FormError> {
        self.new_exercise_mut()?.shape = Some(shape);
        self.pending_sets = vec![SetDraft::empty(shape)];
        Ok(())
    }

    /// Loads an existing entry for editing. Every stored set becomes a draft.
    pub fn begin_edit(
        &mut self,
        entry: &LogEntry,
        exercise: ExerciseDefinition,
    ) -> Result<(), FormError> {
        if !entry.exercise_name.eq_ignore_ascii_case(&exercise.name) {
            return Err(FormError::ExerciseMismatch {
                entry: entry.exercise_name.clone(),
                given: exercise.name,
            });
        }
        self.selected_category = exercise.category;
        self.pending_sets = entry
            .sets
            .iter()
            .map(|set| SetDraft::from_record(exercise.shape, set))
            .collect();
        if self.pending_sets.is_empty() {
            self.pending_sets.push(SetDraft::empty(exercise.shape));
        }
        self.mode = FormMode::LoggingExisting { exercise };
        self.editing = Some(EditTarget {
            entry_id: entry.id,
            original_timestamp: entry.timestamp,
        });
        Ok(())
    }

    pub fn cancel_edit(&mut self) -> Result<(), FormError> {
        if self.editing.is_none() {
            return Err(FormError::NotEditing);
        }
        self.reset_to_idle();
        Ok(())
    }

    pub fn add_set(&mut self) -> Result<usize, FormError> {
        let shape = self.current_shape().ok_or(FormError::NoExercise)?;
        if !shape.allows_multiple_sets() {
            return Err(FormError::AddSetUnavailable);
        }
        self.pending_sets.push(SetDraft::empty(shape));
        Ok(self.pending_sets.len() - 1)
    }

    pub fn remove_set(&mut self, index: usize) -> Result<(), FormError> {
        if index >= self.pending_sets.len() {
            return Err(FormError::NoSuchSet(index));
        }
        self.pending_sets.remove(index);
        Ok(())
    }

    pub fn set_field(
        &mut self,
        index: usize,
        field: SetField,
        value: &str,
    ) -> Result<(), FormError> {
        let shape = self.current_shape().ok_or(FormError::NoExercise)?;
        if !shape.accepts(field) {
            return Err(FormError::FieldNotInShape(field));
        }
        self.pending_sets
            .get_mut(index)
            .ok_or(FormError::NoSuchSet(index))?
            .set_input(field, value)
    }

    fn collect_sets(&self) -> Option<Vec<SetRecord>> {
        if self.pending_sets.is_empty() {
            debug!("submission rejected: no sets");
            return None;
        }
        let mut sets = Vec::with_capacity(self.pending_sets.len());
        for (index, draft) in self.pending_sets.iter().enumerate() {
            match draft.to_record() {
                Ok(set) => sets.push(set),
                Err(e) => {
                    debug!(set = index + 1, reason = %e, "submission rejected");
                    return None;
                }
            }
        }
        Some(sets)
    }

    /// Builds the submission, or `None` when the form is not ready. Never mutates the form.
    pub fn prepare_submission(&self) -> Option<Submission> {
        match (&self.mode, &self.editing) {
            (FormMode::Idle, _) | (FormMode::DefiningNew(_), Some(_)) => None,
            (FormMode::DefiningNew(draft), None) => {
                let name = draft.name.trim();
                let muscle_group = draft.muscle_group.trim();
                if name.is_empty() || muscle_group.is_empty() {
                    debug!("submission rejected: new exercise needs a name and muscle group");
                    return None;
                }
                let shape = draft.shape?;
                let sets = self.collect_sets()?;
                Some(Submission::DefineAndCreate {
                    definition: ExerciseDefinition::new(
                        name,
                        self.selected_category,
                        shape,
                        muscle_group,
                    ),
                    sets,
                })
            }
            (FormMode::LoggingExisting { exercise }, None) => Some(Submission::Create {
                exercise: exercise.clone(),
                sets: self.collect_sets()?,
            }),
            (FormMode::LoggingExisting { exercise }, Some(target)) => Some(Submission::Edit {
                target: target.clone(),
                exercise: exercise.clone(),
                sets: self.collect_sets()?,
            }),
        }
    }

    /// State after a submission was persisted.
    pub fn reset_after_submit(&mut self, submission: &Submission) {
        match submission {
            Submission::Create { exercise, .. } => {
                self.pending_sets = vec![SetDraft::empty(exercise.shape)];
            }
            Submission::DefineAndCreate { .. } | Submission::Edit { .. } => self.reset_to_idle(),
        }
    }

    fn reset_to_idle(&mut self) {
        self.mode = FormMode::Idle;
        self.selected_category = self.default_category;
        self.pending_sets.clear();
        self.editing = None;
    }
}
