// src/lib.rs
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// --- Declare modules ---
mod config;
pub mod db;
pub mod form;
pub mod model;
pub mod stats;

// --- Expose public types ---
pub use config::{
    get_config_path as get_config_path_util, load as load_config_util, parse_color,
    save as save_config_util, Config, EditTimestampPolicy, Error as ConfigError, StandardColor,
    Theme, Units,
};
pub use db::{get_db_path as get_db_path_util, Error as DbError};
pub use form::{
    DraftError, EditTarget, EntryForm, FormError, FormMode, NewExerciseDraft, SetDraft, Submission,
};
pub use model::{
    validate_sets, Category, ExerciseDefinition, ExerciseShape, LogEntry, ModelError, NewLogEntry,
    OneRepMax, SetField, SetRecord, UserAggregates,
};
pub use stats::{
    apply_entry, apply_entry_with_policy, best_set_estimate, estimate_one_rep_max, RecencyPolicy,
    SetEstimate,
};

/// Timestamp handling for an edited entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditTimestamp {
    Keep,
    Replace(DateTime<Utc>),
}

/// Result of pushing the entry form through the store.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The form was not ready. Nothing was written and the form is unchanged.
    Rejected,
    Logged {
        entry: LogEntry,
        aggregates: Option<UserAggregates>,
        /// Set when the submission defined the exercise first.
        created_exercise: Option<ExerciseDefinition>,
    },
    Edited {
        entry: LogEntry,
        aggregates: Option<UserAggregates>,
    },
}

/// What the form shows next to the current selection.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionSummary {
    pub category: Category,
    pub category_last_worked: Option<DateTime<Utc>>,
    pub exercise: Option<String>,
    pub exercise_last_worked: Option<DateTime<Utc>>,
    pub one_rep_max: Option<OneRepMax>,
}

pub struct AppService {
    pub config: Config,
    pub conn: Connection,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
}

impl AppService {
    /// Loads the config and opens (creating if needed) the database.
    /// # Errors
    /// - Config or database path cannot be resolved, read or initialized.
    pub fn initialize() -> Result<Self> {
        let config_path =
            config::get_config_path().context("Failed to determine configuration file path")?;
        let config = config::load(&config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"))?;

        let db_path = db::get_db_path().context("Failed to determine database path")?;
        let conn = db::open_db(&db_path)
            .with_context(|| format!("Failed to open database at {db_path:?}"))?;

        db::init_db(&conn).context("Failed to initialize database schema")?;

        Ok(Self {
            config,
            conn,
            db_path,
            config_path,
        })
    }

    pub fn get_config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    /// # Errors
    /// - `ConfigError` if the file cannot be written.
    pub fn save_config(&self) -> Result<(), ConfigError> {
        config::save(&self.config_path, &self.config)
    }

    /// Signs a user in (`Some`) or out (`None`). Later entries are attributed accordingly.
    /// # Errors
    /// - `ConfigError::EmptyUserId` for a blank id, or a save failure.
    pub fn set_user(&mut self, user_id: Option<String>) -> Result<(), ConfigError> {
        let user_id = match user_id {
            Some(id) if id.trim().is_empty() => return Err(ConfigError::EmptyUserId),
            Some(id) => Some(id.trim().to_string()),
            None => None,
        };
        self.config.user_id = user_id;
        self.save_config()
    }

    /// # Errors
    /// - `ConfigError` if the file cannot be written.
    pub fn set_recency_policy(&mut self, policy: RecencyPolicy) -> Result<(), ConfigError> {
        self.config.recency_policy = policy;
        self.save_config()
    }

    /// # Errors
    /// - `ConfigError` if the file cannot be written.
    pub fn set_units(&mut self, units: Units) -> Result<(), ConfigError> {
        self.config.units = units;
        self.save_config()
    }

    /// # Errors
    /// - `DbError` on write failure.
    pub fn set_display_name(&self, user_id: &str, name: Option<&str>) -> Result<()> {
        db::set_display_name(&self.conn, user_id, name)
            .with_context(|| format!("Failed to set display name for '{user_id}'"))
    }

    /// # Errors
    /// - `DbError` on read failure.
    pub fn display_name(&self, user_id: &str) -> Result<Option<String>> {
        db::get_display_name(&self.conn, user_id)
            .with_context(|| format!("Failed to read profile of '{user_id}'"))
    }

    // ---- Exercise Catalog ----

    /// Catalog sorted by name, optionally restricted to one category.
    /// # Errors
    /// - `DbError` on read failure.
    pub fn list_exercises(&self, category: Option<Category>) -> Result<Vec<ExerciseDefinition>> {
        let mut exercises = db::list_exercises(&self.conn).context("Failed to list exercises")?;
        if let Some(category) = category {
            exercises.retain(|def| def.category == category);
        }
        exercises.sort_by_key(|def| def.name.to_lowercase());
        Ok(exercises)
    }

    /// # Errors
    /// - `DbError` on read failure.
    pub fn get_exercise(&self, name: &str) -> Result<Option<ExerciseDefinition>> {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            bail!(ModelError::EmptyName);
        }
        db::get_exercise_by_name(&self.conn, trimmed)
            .with_context(|| format!("Failed to look up exercise '{trimmed}'"))
    }

    /// Adds a definition to the catalog. Names are unique ignoring case.
    /// # Errors
    /// - `ModelError` for an empty name or muscle group.
    /// - `DbError::ExerciseNameNotUnique` if the name is taken.
    pub fn create_exercise(&self, def: &ExerciseDefinition) -> Result<i64> {
        let def = normalize_definition(def)?;
        let id = db::create_exercise(&self.conn, &def)?;
        // Newly named groups join the selector list.
        db::add_muscle_group(&self.conn, &def.major_muscle_group)
            .context("Failed to record muscle group")?;
        Ok(id)
    }

    /// # Errors
    /// - `DbError` on read failure.
    pub fn list_muscle_groups(&self) -> Result<Vec<String>> {
        db::list_muscle_groups(&self.conn).context("Failed to list muscle groups")
    }

    // ---- Log Store ----

    /// Entries newest first, truncated to `limit` when given.
    /// # Errors
    /// - `DbError` on read failure.
    pub fn list_log_entries(&self, limit: Option<usize>) -> Result<Vec<LogEntry>> {
        let mut entries = db::list_log_entries(&self.conn).context("Failed to list log entries")?;
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    /// # Errors
    /// - `DbError` on read failure.
    pub fn get_log_entry(&self, id: i64) -> Result<Option<LogEntry>> {
        db::get_log_entry(&self.conn, id)
            .with_context(|| format!("Failed to read log entry {id}"))
    }

    fn require_exercise(&self, name: &str) -> Result<ExerciseDefinition> {
        match self.get_exercise(name)? {
            Some(def) => Ok(def),
            None => bail!(DbError::ExerciseNotFound(name.trim().to_string())),
        }
    }

    /// Logs sets against an existing exercise, then updates the user's
    /// aggregates when `user_id` is present.
    /// # Errors
    /// - `DbError::ExerciseNotFound` for an unknown exercise.
    /// - `ModelError` when the sets do not fit the exercise.
    /// - `DbError` if the entry cannot be written. A failed aggregate write is not an error.
    pub fn log_entry(
        &mut self,
        user_id: Option<&str>,
        exercise_name: &str,
        sets: &[SetRecord],
        timestamp: DateTime<Utc>,
    ) -> Result<(LogEntry, Option<UserAggregates>)> {
        let exercise = self.require_exercise(exercise_name)?;
        self.record_entry(user_id, &exercise, sets, timestamp)
    }

    fn record_entry(
        &mut self,
        user_id: Option<&str>,
        exercise: &ExerciseDefinition,
        sets: &[SetRecord],
        timestamp: DateTime<Utc>,
    ) -> Result<(LogEntry, Option<UserAggregates>)> {
        validate_sets(exercise.shape, sets)?;
        let entry = insert_entry(&self.conn, user_id, exercise, sets, timestamp)?;
        let aggregates = self.refresh_aggregates(&entry, exercise);
        Ok((entry, aggregates))
    }

    /// Folds a committed entry into its owner's aggregates. Anonymous entries are skipped.
    /// Failures leave the aggregates stale and are only logged.
    fn refresh_aggregates(
        &mut self,
        entry: &LogEntry,
        exercise: &ExerciseDefinition,
    ) -> Option<UserAggregates> {
        let user_id = entry.user_id.as_deref()?;
        let policy = self.config.recency_policy;
        match db::update_user_aggregates(&mut self.conn, user_id, |prev| {
            apply_entry_with_policy(prev, entry, exercise, policy)
        }) {
            Ok(aggregates) => Some(aggregates),
            Err(e) => {
                warn!(user_id, entry_id = entry.id, error = %e, "aggregate update failed");
                None
            }
        }
    }

    /// Replaces the sets of an entry in place. Owner and exercise do not change.
    /// # Errors
    /// - `DbError::LogEntryNotFound` / `ExerciseNotFound`.
    /// - `ModelError` when the sets do not fit the exercise.
    pub fn edit_log_entry(
        &mut self,
        id: i64,
        sets: &[SetRecord],
        timestamp: EditTimestamp,
    ) -> Result<(LogEntry, Option<UserAggregates>)> {
        let Some(existing) = self.get_log_entry(id)? else {
            bail!(DbError::LogEntryNotFound(id));
        };
        let exercise = self.require_exercise(&existing.exercise_name)?;
        let timestamp = match timestamp {
            EditTimestamp::Keep => existing.timestamp,
            EditTimestamp::Replace(ts) => ts,
        };
        self.replace_entry(existing, &exercise, sets, timestamp)
    }

    fn replace_entry(
        &mut self,
        existing: LogEntry,
        exercise: &ExerciseDefinition,
        sets: &[SetRecord],
        timestamp: DateTime<Utc>,
    ) -> Result<(LogEntry, Option<UserAggregates>)> {
        validate_sets(exercise.shape, sets)?;
        db::replace_log_entry(&self.conn, existing.id, sets, timestamp)
            .with_context(|| format!("Failed to update log entry {}", existing.id))?;
        let entry = LogEntry {
            sets: sets.to_vec(),
            timestamp,
            ..existing
        };
        let aggregates = self.refresh_aggregates(&entry, exercise);
        Ok((entry, aggregates))
    }

    /// Persists whatever the form is ready to submit and resets it.
    ///
    /// An unready form yields `Rejected` with no writes. Selections are
    /// resolved against the catalog, so entries always carry the catalog
    /// spelling. A new definition and its first entry commit together; on a
    /// store error nothing is kept and the form is left as it was so the
    /// submit can be retried.
    /// # Errors
    /// - `DbError` from any write, including a name collision for a new exercise.
    pub fn submit_form(
        &mut self,
        form: &mut EntryForm,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome> {
        let Some(submission) = form.prepare_submission() else {
            return Ok(SubmitOutcome::Rejected);
        };

        let outcome = match &submission {
            Submission::Create { exercise, sets } => {
                let exercise = self.require_exercise(&exercise.name)?;
                let (entry, aggregates) = self.record_entry(user_id, &exercise, sets, now)?;
                SubmitOutcome::Logged {
                    entry,
                    aggregates,
                    created_exercise: None,
                }
            }
            Submission::DefineAndCreate { definition, sets } => {
                // Both checked before anything is written.
                let definition = normalize_definition(definition)?;
                validate_sets(definition.shape, sets)?;

                let tx = self.conn.transaction().context("Failed to start transaction")?;
                db::create_exercise(&tx, &definition)?;
                db::add_muscle_group(&tx, &definition.major_muscle_group)
                    .context("Failed to record muscle group")?;
                let entry = insert_entry(&tx, user_id, &definition, sets, now)?;
                tx.commit()
                    .with_context(|| format!("Failed to save new exercise '{}'", definition.name))?;
                debug!(name = %definition.name, entry_id = entry.id, "exercise defined from form");

                let aggregates = self.refresh_aggregates(&entry, &definition);
                SubmitOutcome::Logged {
                    entry,
                    aggregates,
                    created_exercise: Some(definition),
                }
            }
            Submission::Edit { target, sets, .. } => {
                let Some(existing) = self.get_log_entry(target.entry_id)? else {
                    bail!(DbError::LogEntryNotFound(target.entry_id));
                };
                let exercise = self.require_exercise(&existing.exercise_name)?;
                let timestamp = match self.config.edit_timestamp {
                    EditTimestampPolicy::Keep => target.original_timestamp,
                    EditTimestampPolicy::Update => now,
                };
                let (entry, aggregates) = self.replace_entry(existing, &exercise, sets, timestamp)?;
                SubmitOutcome::Edited { entry, aggregates }
            }
        };

        form.reset_after_submit(&submission);
        Ok(outcome)
    }

    // ---- Aggregate Store ----

    /// # Errors
    /// - `DbError` on read failure or a malformed stored document.
    pub fn user_aggregates(&self, user_id: &str) -> Result<Option<UserAggregates>> {
        db::get_user_aggregates(&self.conn, user_id)
            .with_context(|| format!("Failed to read aggregates for '{user_id}'"))
    }

    /// Last-worked and 1RM figures for whatever the form currently has selected.
    /// # Errors
    /// - `DbError` on read failure.
    pub fn selection_summary(&self, user_id: &str, form: &EntryForm) -> Result<SelectionSummary> {
        let aggregates = self.user_aggregates(user_id)?.unwrap_or_default();
        let category = form.selected_category();
        let exercise = form.selected_exercise().map(|def| def.name.clone());
        Ok(SelectionSummary {
            category,
            category_last_worked: aggregates.category_last_worked(category),
            exercise_last_worked: exercise
                .as_deref()
                .and_then(|name| aggregates.exercise_last_worked(name)),
            one_rep_max: exercise
                .as_deref()
                .and_then(|name| aggregates.one_rep_max(name))
                .copied(),
            exercise,
        })
    }

    /// Recomputes a user's aggregates from their full log and replaces the stored ones.
    /// # Errors
    /// - `DbError` on read or write failure.
    pub fn rebuild_user_aggregates(&mut self, user_id: &str) -> Result<UserAggregates> {
        let entries: Vec<LogEntry> = self
            .list_log_entries(None)?
            .into_iter()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .collect();
        let catalog = self.list_exercises(None)?;
        let rebuilt = stats::rebuild(&entries, &catalog, self.config.recency_policy);
        debug!(user_id, entries = entries.len(), "aggregates rebuilt");
        db::update_user_aggregates(&mut self.conn, user_id, |_| rebuilt)
            .with_context(|| format!("Failed to store rebuilt aggregates for '{user_id}'"))
    }
}

/// Trimmed copy of a definition, checked before it reaches the catalog.
fn normalize_definition(def: &ExerciseDefinition) -> Result<ExerciseDefinition, ModelError> {
    let mut def = def.clone();
    def.name = def.name.trim().to_string();
    def.major_muscle_group = def.major_muscle_group.trim().to_string();
    def.validate()?;
    Ok(def)
}

/// Writes an already validated entry through `conn`, which may be an open transaction.
fn insert_entry(
    conn: &Connection,
    user_id: Option<&str>,
    exercise: &ExerciseDefinition,
    sets: &[SetRecord],
    timestamp: DateTime<Utc>,
) -> Result<LogEntry> {
    let new_entry = NewLogEntry {
        user_id,
        exercise_name: &exercise.name,
        sets,
        timestamp,
    };
    let id = db::add_log_entry(conn, &new_entry)
        .with_context(|| format!("Failed to log entry for '{}'", exercise.name))?;
    Ok(LogEntry {
        id,
        user_id: user_id.map(str::to_string),
        exercise_name: exercise.name.clone(),
        sets: sets.to_vec(),
        timestamp,
    })
}
