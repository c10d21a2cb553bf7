//src/db.rs
use crate::config::APP_DIR;
use crate::model::{
    Category, ExerciseDefinition, ExerciseShape, LogEntry, NewLogEntry, SetRecord, UserAggregates,
};
use chrono::{DateTime, Utc};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database connection failed")]
    Connection(#[from] rusqlite::Error),
    #[error("Failed to get application data directory")]
    DataDir,
    #[error("I/O error accessing database file")]
    Io(#[from] std::io::Error),
    #[error("Exercise not found: {0}")]
    ExerciseNotFound(String),
    #[error("Log entry not found: ID {0}")]
    LogEntryNotFound(i64),
    #[error("Database query failed: {0}")]
    QueryFailed(rusqlite::Error),
    #[error("Database update failed: {0}")]
    UpdateFailed(rusqlite::Error),
    #[error("Database insert failed: {0}")]
    InsertFailed(rusqlite::Error),
    #[error("Exercise name must be unique (case-insensitive): '{0}' already exists.")]
    ExerciseNameNotUnique(String),
    #[error("Stored document is malformed: {0}")]
    InvalidDocument(String),
}

const DB_FILE_NAME: &str = "liftlog.sqlite";

const DEFAULT_MUSCLE_GROUPS: &[&str] = &[
    "Chest",
    "Back",
    "Shoulders",
    "Biceps",
    "Triceps",
    "Forearms",
    "Core",
    "Glutes",
    "Legs",
    "Calves",
    "Full Body",
];

/// Path to the SQLite file inside the app's data directory.
pub fn get_db_path() -> Result<PathBuf, Error> {
    let data_dir = dirs::data_dir().ok_or(Error::DataDir)?;
    let app_dir = data_dir.join(APP_DIR);
    if !app_dir.exists() {
        std::fs::create_dir_all(&app_dir)?;
    }
    Ok(app_dir.join(DB_FILE_NAME))
}

pub fn open_db<P: AsRef<Path>>(path: P) -> Result<Connection, Error> {
    Connection::open(path).map_err(Error::Connection)
}

/// Creates the four collections if missing and seeds the muscle-group list.
pub fn init_db(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS workout_library (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE COLLATE NOCASE, -- natural key
            category TEXT NOT NULL,
            fields TEXT NOT NULL,            -- JSON array of field names
            primary_muscles TEXT NOT NULL,   -- JSON array
            secondary_muscles TEXT NOT NULL, -- JSON array
            major_muscle_group TEXT NOT NULL,
            icon_url TEXT
        );
        CREATE TABLE IF NOT EXISTS workout_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id TEXT,                    -- NULL for anonymous entries
            exercise_name TEXT NOT NULL COLLATE NOCASE,
            sets TEXT NOT NULL,              -- JSON array of sparse set objects
            timestamp TEXT NOT NULL          -- RFC3339
        );
        CREATE TABLE IF NOT EXISTS muscle_groups (
            name TEXT PRIMARY KEY NOT NULL COLLATE NOCASE
        );
        CREATE TABLE IF NOT EXISTS user_profiles (
            user_id TEXT PRIMARY KEY NOT NULL,
            display_name TEXT,
            last_worked_by_category TEXT NOT NULL DEFAULT '{}',
            last_worked_by_exercise TEXT NOT NULL DEFAULT '{}',
            one_rep_max_by_exercise TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_workout_logs_user ON workout_logs(user_id);",
    )
    .map_err(Error::Connection)?;

    for name in DEFAULT_MUSCLE_GROUPS {
        add_muscle_group(conn, name)?;
    }
    Ok(())
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, Error> {
    serde_json::to_string(value).map_err(|e| Error::InvalidDocument(e.to_string()))
}

fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T, Error> {
    serde_json::from_str(raw).map_err(|e| Error::InvalidDocument(e.to_string()))
}

fn conversion_error(
    column: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
}

fn parse_timestamp(column: usize, raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

// ---- Exercise Catalog ----

/// Inserts a definition. A name collision (case-insensitive) is `ExerciseNameNotUnique`.
pub fn create_exercise(conn: &Connection, def: &ExerciseDefinition) -> Result<i64, Error> {
    let result = conn.execute(
        "INSERT INTO workout_library
            (name, category, fields, primary_muscles, secondary_muscles, major_muscle_group, icon_url)
         VALUES (:name, :category, :fields, :primary, :secondary, :major, :icon)",
        named_params! {
            ":name": def.name,
            ":category": def.category.to_string(),
            ":fields": to_json(&def.shape)?,
            ":primary": to_json(&def.primary_muscles)?,
            ":secondary": to_json(&def.secondary_muscles)?,
            ":major": def.major_muscle_group,
            ":icon": def.icon_url,
        },
    );
    match result {
        Ok(_) => {
            debug!(name = %def.name, "exercise created");
            Ok(conn.last_insert_rowid())
        }
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(Error::ExerciseNameNotUnique(def.name.clone()))
        }
        Err(e) => Err(Error::InsertFailed(e)),
    }
}

fn map_row_to_exercise_definition(row: &Row) -> Result<ExerciseDefinition, rusqlite::Error> {
    let name: String = row.get(0)?;
    let category_str: String = row.get(1)?;
    let fields_json: String = row.get(2)?;
    let primary_json: String = row.get(3)?;
    let secondary_json: String = row.get(4)?;
    let major_muscle_group: String = row.get(5)?;
    let icon_url: Option<String> = row.get(6)?;

    let category = Category::from_name(&category_str).map_err(|e| conversion_error(1, e))?;
    let shape: ExerciseShape =
        serde_json::from_str(&fields_json).map_err(|e| conversion_error(2, e))?;
    let primary_muscles = serde_json::from_str(&primary_json).map_err(|e| conversion_error(3, e))?;
    let secondary_muscles =
        serde_json::from_str(&secondary_json).map_err(|e| conversion_error(4, e))?;

    Ok(ExerciseDefinition {
        name,
        category,
        shape,
        primary_muscles,
        secondary_muscles,
        major_muscle_group,
        icon_url,
    })
}

const EXERCISE_COLUMNS: &str =
    "name, category, fields, primary_muscles, secondary_muscles, major_muscle_group, icon_url";

/// Case-insensitive lookup by the natural key.
pub fn get_exercise_by_name(
    conn: &Connection,
    name: &str,
) -> Result<Option<ExerciseDefinition>, Error> {
    let sql =
        format!("SELECT {EXERCISE_COLUMNS} FROM workout_library WHERE name = ?1 COLLATE NOCASE");
    let mut stmt = conn.prepare(&sql).map_err(Error::QueryFailed)?;
    stmt.query_row(params![name], map_row_to_exercise_definition)
        .optional()
        .map_err(Error::QueryFailed)
}

/// All definitions in storage order. Callers sort.
pub fn list_exercises(conn: &Connection) -> Result<Vec<ExerciseDefinition>, Error> {
    let sql = format!("SELECT {EXERCISE_COLUMNS} FROM workout_library");
    let mut stmt = conn.prepare(&sql).map_err(Error::QueryFailed)?;
    let iter = stmt
        .query_map([], map_row_to_exercise_definition)
        .map_err(Error::QueryFailed)?;
    iter.collect::<Result<Vec<_>, _>>()
        .map_err(Error::QueryFailed)
}

// ---- Muscle groups ----

pub fn add_muscle_group(conn: &Connection, name: &str) -> Result<(), Error> {
    conn.execute(
        "INSERT OR IGNORE INTO muscle_groups (name) VALUES (?1)",
        params![name],
    )
    .map_err(Error::InsertFailed)?;
    Ok(())
}

pub fn list_muscle_groups(conn: &Connection) -> Result<Vec<String>, Error> {
    let mut stmt = conn
        .prepare("SELECT name FROM muscle_groups ORDER BY name ASC")
        .map_err(Error::QueryFailed)?;
    let iter = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(Error::QueryFailed)?;
    iter.collect::<Result<Vec<_>, _>>()
        .map_err(Error::QueryFailed)
}

// ---- Log Store ----

pub fn add_log_entry(conn: &Connection, entry: &NewLogEntry) -> Result<i64, Error> {
    conn.execute(
        "INSERT INTO workout_logs (user_id, exercise_name, sets, timestamp)
         VALUES (:user_id, :ex_name, :sets, :ts)",
        named_params! {
            ":user_id": entry.user_id,
            ":ex_name": entry.exercise_name,
            ":sets": to_json(entry.sets)?,
            ":ts": entry.timestamp.to_rfc3339(),
        },
    )
    .map_err(Error::InsertFailed)?;
    let id = conn.last_insert_rowid();
    debug!(id, exercise = entry.exercise_name, "log entry added");
    Ok(id)
}

/// Replaces the sets and timestamp of an entry in place. Owner and exercise are kept.
pub fn replace_log_entry(
    conn: &Connection,
    id: i64,
    sets: &[SetRecord],
    timestamp: DateTime<Utc>,
) -> Result<(), Error> {
    let rows = conn
        .execute(
            "UPDATE workout_logs SET sets = :sets, timestamp = :ts WHERE id = :id",
            named_params! {
                ":sets": to_json(sets)?,
                ":ts": timestamp.to_rfc3339(),
                ":id": id,
            },
        )
        .map_err(Error::UpdateFailed)?;
    if rows == 0 {
        return Err(Error::LogEntryNotFound(id));
    }
    debug!(id, "log entry replaced");
    Ok(())
}

fn map_row_to_log_entry(row: &Row) -> Result<LogEntry, rusqlite::Error> {
    let id: i64 = row.get(0)?;
    let user_id: Option<String> = row.get(1)?;
    let exercise_name: String = row.get(2)?;
    let sets_json: String = row.get(3)?;
    let timestamp_str: String = row.get(4)?;

    let sets: Vec<SetRecord> =
        serde_json::from_str(&sets_json).map_err(|e| conversion_error(3, e))?;
    let timestamp = parse_timestamp(4, &timestamp_str)?;

    Ok(LogEntry {
        id,
        user_id,
        exercise_name,
        sets,
        timestamp,
    })
}

pub fn get_log_entry(conn: &Connection, id: i64) -> Result<Option<LogEntry>, Error> {
    let mut stmt = conn
        .prepare("SELECT id, user_id, exercise_name, sets, timestamp FROM workout_logs WHERE id = ?1")
        .map_err(Error::QueryFailed)?;
    stmt.query_row(params![id], map_row_to_log_entry)
        .optional()
        .map_err(Error::QueryFailed)
}

/// Every entry, newest first. The query is unordered; sorting happens here.
pub fn list_log_entries(conn: &Connection) -> Result<Vec<LogEntry>, Error> {
    let mut stmt = conn
        .prepare("SELECT id, user_id, exercise_name, sets, timestamp FROM workout_logs")
        .map_err(Error::QueryFailed)?;
    let iter = stmt
        .query_map([], map_row_to_log_entry)
        .map_err(Error::QueryFailed)?;
    let mut entries = iter
        .collect::<Result<Vec<_>, _>>()
        .map_err(Error::QueryFailed)?;
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.id.cmp(&a.id)));
    Ok(entries)
}

// ---- Aggregate Store ----

pub fn get_user_aggregates(
    conn: &Connection,
    user_id: &str,
) -> Result<Option<UserAggregates>, Error> {
    let raw: Option<(String, String, String)> = conn
        .query_row(
            "SELECT last_worked_by_category, last_worked_by_exercise, one_rep_max_by_exercise
             FROM user_profiles WHERE user_id = ?1",
            params![user_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()
        .map_err(Error::QueryFailed)?;

    raw.map(|(by_category, by_exercise, one_rep_max)| -> Result<UserAggregates, Error> {
        Ok(UserAggregates {
            last_worked_by_category: from_json(&by_category)?,
            last_worked_by_exercise: from_json(&by_exercise)?,
            one_rep_max_by_exercise: from_json(&one_rep_max)?,
        })
    })
    .transpose()
}

/// Upserts the three aggregate maps. Other profile columns are left as they are.
pub fn merge_user_aggregates(
    conn: &Connection,
    user_id: &str,
    aggregates: &UserAggregates,
) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO user_profiles
            (user_id, last_worked_by_category, last_worked_by_exercise, one_rep_max_by_exercise)
         VALUES (:uid, :by_category, :by_exercise, :orm)
         ON CONFLICT(user_id) DO UPDATE SET
            last_worked_by_category = excluded.last_worked_by_category,
            last_worked_by_exercise = excluded.last_worked_by_exercise,
            one_rep_max_by_exercise = excluded.one_rep_max_by_exercise",
        named_params! {
            ":uid": user_id,
            ":by_category": to_json(&aggregates.last_worked_by_category)?,
            ":by_exercise": to_json(&aggregates.last_worked_by_exercise)?,
            ":orm": to_json(&aggregates.one_rep_max_by_exercise)?,
        },
    )
    .map_err(Error::UpdateFailed)?;
    Ok(())
}

/// Read-modify-write of a user's aggregates inside one write transaction,
/// so concurrent writers cannot interleave between the read and the write.
pub fn update_user_aggregates<F>(
    conn: &mut Connection,
    user_id: &str,
    apply: F,
) -> Result<UserAggregates, Error>
where
    F: FnOnce(Option<&UserAggregates>) -> UserAggregates,
{
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(Error::Connection)?;
    let current = get_user_aggregates(&tx, user_id)?;
    let next = apply(current.as_ref());
    merge_user_aggregates(&tx, user_id, &next)?;
    tx.commit().map_err(Error::Connection)?;
    debug!(user_id, "aggregates updated");
    Ok(next)
}

pub fn set_display_name(conn: &Connection, user_id: &str, name: Option<&str>) -> Result<(), Error> {
    conn.execute(
        "INSERT INTO user_profiles (user_id, display_name) VALUES (?1, ?2)
         ON CONFLICT(user_id) DO UPDATE SET display_name = excluded.display_name",
        params![user_id, name],
    )
    .map_err(Error::UpdateFailed)?;
    Ok(())
}

pub fn get_display_name(conn: &Connection, user_id: &str) -> Result<Option<String>, Error> {
    conn.query_row(
        "SELECT display_name FROM user_profiles WHERE user_id = ?1",
        params![user_id],
        |row| row.get::<_, Option<String>>(0),
    )
    .optional()
    .map_err(Error::QueryFailed)
    .map(Option::flatten)
}
