//src/model.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("Unsupported field combination: [{0}]. Use weight+reps, distance/duration or duration.")]
    UnsupportedFields(String),
    #[error("Unknown set field: {0}")]
    UnknownField(String),
    #[error("Unknown category: {0}")]
    UnknownCategory(String),
    #[error("Set {index} is not valid for a {shape} exercise: {reason}")]
    InvalidSet {
        index: usize,
        shape: ExerciseShape,
        reason: String,
    },
    #[error("A log entry needs at least one set.")]
    NoSets,
    #[error("Exercise name cannot be empty.")]
    EmptyName,
    #[error("Major muscle group cannot be empty.")]
    EmptyMuscleGroup,
}

/// The six fixed muscle-group buckets used for recency tracking.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(ascii_case_insensitive)]
pub enum Category {
    #[default]
    #[strum(serialize = "Upper Body Push")]
    #[serde(rename = "Upper Body Push")]
    UpperBodyPush,
    #[strum(serialize = "Upper Body Pull")]
    #[serde(rename = "Upper Body Pull")]
    UpperBodyPull,
    #[strum(serialize = "Lower Body")]
    #[serde(rename = "Lower Body")]
    LowerBody,
    Core,
    Cardio,
    #[strum(serialize = "Full Body")]
    #[serde(rename = "Full Body")]
    FullBody,
}

impl Category {
    /// Parses a display name, ignoring case and surrounding whitespace.
    pub fn from_name(value: &str) -> Result<Self, ModelError> {
        value
            .trim()
            .parse()
            .map_err(|_| ModelError::UnknownCategory(value.to_string()))
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum SetField {
    Weight,
    Reps,
    Distance,
    Duration,
}

impl SetField {
    /// Reps and duration (seconds) are whole numbers; weight and distance are not.
    pub const fn is_integer(self) -> bool {
        matches!(self, Self::Reps | Self::Duration)
    }

    pub fn from_name(value: &str) -> Result<Self, ModelError> {
        value
            .trim()
            .parse()
            .map_err(|_| ModelError::UnknownField(value.to_string()))
    }
}

/// Which inputs an exercise takes. Stored as the list of its fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize, Deserialize)]
#[serde(into = "Vec<SetField>", try_from = "Vec<SetField>")]
pub enum ExerciseShape {
    #[strum(serialize = "weight/reps")]
    WeightReps,
    #[strum(serialize = "distance/duration")]
    DistanceDuration,
    #[strum(serialize = "duration")]
    DurationOnly,
}

impl ExerciseShape {
    pub const fn fields(self) -> &'static [SetField] {
        match self {
            Self::WeightReps => &[SetField::Weight, SetField::Reps],
            Self::DistanceDuration => &[SetField::Distance, SetField::Duration],
            Self::DurationOnly => &[SetField::Duration],
        }
    }

    /// Recovers the shape from a declared field list (order-insensitive, duplicates ignored).
    pub fn from_fields(fields: &[SetField]) -> Result<Self, ModelError> {
        let has = |f: SetField| fields.contains(&f);
        match (
            has(SetField::Weight),
            has(SetField::Reps),
            has(SetField::Distance),
            has(SetField::Duration),
        ) {
            (true, true, false, false) => Ok(Self::WeightReps),
            (false, false, true, _) => Ok(Self::DistanceDuration),
            (false, false, false, true) => Ok(Self::DurationOnly),
            _ => Err(ModelError::UnsupportedFields(
                fields
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            )),
        }
    }

    /// Distance/duration exercises are logged as one combined row.
    pub const fn allows_multiple_sets(self) -> bool {
        !matches!(self, Self::DistanceDuration)
    }

    pub fn accepts(self, field: SetField) -> bool {
        self.fields().contains(&field)
    }
}

impl From<ExerciseShape> for Vec<SetField> {
    fn from(shape: ExerciseShape) -> Self {
        shape.fields().to_vec()
    }
}

impl TryFrom<Vec<SetField>> for ExerciseShape {
    type Error = ModelError;

    fn try_from(fields: Vec<SetField>) -> Result<Self, Self::Error> {
        Self::from_fields(&fields)
    }
}

/// One performed unit. Only the keys relevant to the exercise are present.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SetRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reps: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    /// Seconds.
    #[serde(rename = "duration", default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
}

impl SetRecord {
    pub const fn weight_reps(weight: f64, reps: u32) -> Self {
        Self {
            weight: Some(weight),
            reps: Some(reps),
            distance: None,
            duration_secs: None,
        }
    }

    pub const fn distance_duration(distance: Option<f64>, duration_secs: Option<u32>) -> Self {
        Self {
            weight: None,
            reps: None,
            distance,
            duration_secs,
        }
    }

    pub const fn duration(duration_secs: u32) -> Self {
        Self {
            weight: None,
            reps: None,
            distance: None,
            duration_secs: Some(duration_secs),
        }
    }

    /// Numeric view of one key, integers widened to f64.
    pub fn value(&self, field: SetField) -> Option<f64> {
        match field {
            SetField::Weight => self.weight,
            SetField::Reps => self.reps.map(f64::from),
            SetField::Distance => self.distance,
            SetField::Duration => self.duration_secs.map(f64::from),
        }
    }

    pub fn present_fields(&self) -> Vec<SetField> {
        [
            SetField::Weight,
            SetField::Reps,
            SetField::Distance,
            SetField::Duration,
        ]
        .into_iter()
        .filter(|f| self.value(*f).is_some())
        .collect()
    }

    /// Every present key must belong to `shape`; float values must be finite and non-negative.
    pub fn validate_for(&self, shape: ExerciseShape) -> Result<(), String> {
        for field in self.present_fields() {
            if !shape.accepts(field) {
                return Err(format!("'{field}' is not an input of this exercise"));
            }
        }
        for (field, value) in [
            (SetField::Weight, self.weight),
            (SetField::Distance, self.distance),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(format!("'{field}' must be a non-negative number, got {v}"));
                }
            }
        }
        Ok(())
    }

    /// Field-completeness rule applied before a set may be logged.
    pub fn is_complete_for(&self, shape: ExerciseShape) -> bool {
        match shape {
            ExerciseShape::WeightReps => self.weight.is_some() && self.reps.is_some(),
            ExerciseShape::DistanceDuration => {
                self.distance.is_some() || self.duration_secs.is_some()
            }
            ExerciseShape::DurationOnly => self.duration_secs.is_some_and(|d| d > 0),
        }
    }
}

/// Checks the invariants a stored entry must satisfy: non-empty, every set valid for the shape.
pub fn validate_sets(shape: ExerciseShape, sets: &[SetRecord]) -> Result<(), ModelError> {
    if sets.is_empty() {
        return Err(ModelError::NoSets);
    }
    for (index, set) in sets.iter().enumerate() {
        set.validate_for(shape)
            .map_err(|reason| ModelError::InvalidSet {
                index: index + 1,
                shape,
                reason,
            })?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExerciseDefinition {
    pub name: String,
    pub category: Category,
    pub shape: ExerciseShape,
    pub primary_muscles: Vec<String>,
    pub secondary_muscles: Vec<String>,
    pub major_muscle_group: String,
    pub icon_url: Option<String>,
}

impl ExerciseDefinition {
    pub fn new(
        name: impl Into<String>,
        category: Category,
        shape: ExerciseShape,
        major_muscle_group: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            shape,
            primary_muscles: Vec::new(),
            secondary_muscles: Vec::new(),
            major_muscle_group: major_muscle_group.into(),
            icon_url: None,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::EmptyName);
        }
        if self.major_muscle_group.trim().is_empty() {
            return Err(ModelError::EmptyMuscleGroup);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub id: i64,
    /// `None` for anonymous logging; such entries never feed aggregates.
    pub user_id: Option<String>,
    pub exercise_name: String,
    pub sets: Vec<SetRecord>,
    pub timestamp: DateTime<Utc>,
}

/// Borrowed view of an entry that has not been assigned an id yet.
#[derive(Debug, Clone, Copy)]
pub struct NewLogEntry<'a> {
    pub user_id: Option<&'a str>,
    pub exercise_name: &'a str,
    pub sets: &'a [SetRecord],
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OneRepMax {
    pub estimated_max: f64,
    pub reps_at_max: u32,
    pub achieved_on: DateTime<Utc>,
}

/// Per-user derived statistics. Maps are keyed by category name or exercise name.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserAggregates {
    pub last_worked_by_category: BTreeMap<String, DateTime<Utc>>,
    pub last_worked_by_exercise: BTreeMap<String, DateTime<Utc>>,
    pub one_rep_max_by_exercise: BTreeMap<String, OneRepMax>,
}

impl UserAggregates {
    pub fn category_last_worked(&self, category: Category) -> Option<DateTime<Utc>> {
        self.last_worked_by_category
            .get(&category.to_string())
            .copied()
    }

    pub fn exercise_last_worked(&self, exercise_name: &str) -> Option<DateTime<Utc>> {
        self.last_worked_by_exercise.get(exercise_name).copied()
    }

    pub fn one_rep_max(&self, exercise_name: &str) -> Option<&OneRepMax> {
        self.one_rep_max_by_exercise.get(exercise_name)
    }
}
