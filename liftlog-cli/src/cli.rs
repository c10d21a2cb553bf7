// src/cli.rs
use chrono::{Duration, NaiveDate, Utc};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use liftlog_lib::SetField;

#[derive(Parser, Debug)]
#[command(author, version, about = "Log sets, track last-worked dates and estimated 1RMs", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// Print tables as CSV instead
    #[arg(long, global = true)]
    pub export_csv: bool,
    /// Debug logging on stderr (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CategoryCli {
    UpperBodyPush,
    UpperBodyPull,
    LowerBody,
    Core,
    Cardio,
    FullBody,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitsCli {
    Metric,
    Imperial,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecencyCli {
    /// Always take the newest entry's timestamp
    Overwrite,
    /// Keep the later of stored and new timestamp
    Latest,
}

/// Raw `field=value` pairs for one set, e.g. `weight=100,reps=5`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetInput(pub Vec<(SetField, String)>);

pub fn parse_set_input(s: &str) -> Result<SetInput, String> {
    let mut pairs = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = part
            .split_once('=')
            .ok_or_else(|| format!("Expected field=value, got '{part}'"))?;
        let field = SetField::from_name(key).map_err(|e| e.to_string())?;
        pairs.push((field, value.trim().to_string()));
    }
    if pairs.is_empty() {
        return Err("A set needs at least one field=value pair.".to_string());
    }
    Ok(SetInput(pairs))
}

/// Declared inputs of a new exercise, e.g. `distance,duration`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldList(pub Vec<SetField>);

pub fn parse_field_list(s: &str) -> Result<FieldList, String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| SetField::from_name(p).map_err(|e| e.to_string()))
        .collect::<Result<Vec<_>, _>>()
        .map(FieldList)
}

pub fn parse_date_shorthand(s: &str) -> Result<NaiveDate, String> {
    match s.to_lowercase().as_str() {
        "today" => Ok(Utc::now().date_naive()),
        "yesterday" => Ok((Utc::now() - Duration::days(1)).date_naive()),
        _ => {
            if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                Ok(date)
            } else if let Ok(date) = NaiveDate::parse_from_str(s, "%d.%m.%Y") {
                Ok(date)
            } else if let Ok(date) = NaiveDate::parse_from_str(s, "%Y/%m/%d") {
                Ok(date)
            } else {
                Err(format!(
                    "Invalid date format: '{s}'. Use 'today', 'yesterday', YYYY-MM-DD, DD.MM.YYYY, or YYYY/MM/DD."
                ))
            }
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the exercise catalog
    Exercises {
        #[arg(short, long, value_enum)]
        category: Option<CategoryCli>,
    },
    /// Add an exercise to the catalog
    DefineExercise {
        /// Must be unique (case-insensitive)
        #[arg(short, long)]
        name: String,
        #[arg(short, long, value_enum)]
        category: CategoryCli,
        /// Comma-separated inputs: "weight,reps", "distance,duration" or "duration"
        #[arg(short, long, value_parser = parse_field_list)]
        fields: FieldList,
        /// Major muscle group (see `muscle-groups`)
        #[arg(short, long)]
        muscle_group: String,
        /// Comma-separated primary muscles
        #[arg(long)]
        primary: Option<String>,
        /// Comma-separated secondary muscles
        #[arg(long)]
        secondary: Option<String>,
        #[arg(long)]
        icon_url: Option<String>,
    },
    /// Log sets against an existing exercise
    Log {
        #[arg(short, long)]
        exercise: String,
        /// One set as field=value pairs; repeat for more sets
        #[arg(short, long = "set", value_parser = parse_set_input, required = true)]
        sets: Vec<SetInput>,
        #[arg(long, value_parser = parse_date_shorthand, default_value = "today")]
        date: NaiveDate,
    },
    /// Define a new exercise and log its first entry in one go
    LogNew {
        #[arg(short, long)]
        name: String,
        #[arg(short, long, value_enum)]
        category: CategoryCli,
        #[arg(short, long, value_parser = parse_field_list)]
        fields: FieldList,
        #[arg(short, long)]
        muscle_group: String,
        #[arg(short, long = "set", value_parser = parse_set_input, required = true)]
        sets: Vec<SetInput>,
        #[arg(long, value_parser = parse_date_shorthand, default_value = "today")]
        date: NaiveDate,
    },
    /// Change the sets of a logged entry
    Edit {
        id: i64,
        /// Set N overrides the given fields of stored set N.
        /// Stored sets past the last --set are dropped.
        #[arg(short, long = "set", value_parser = parse_set_input, required = true)]
        sets: Vec<SetInput>,
        /// Keep the original timestamp (overrides config)
        #[arg(long, conflicts_with = "touch")]
        keep_date: bool,
        /// Move the timestamp to now (overrides config)
        #[arg(long)]
        touch: bool,
    },
    /// List logged entries, newest first
    List {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
    /// Last-worked dates and estimated 1RMs of the signed-in user
    Stats {
        #[arg(short, long)]
        exercise: Option<String>,
        #[arg(short, long, value_enum)]
        category: Option<CategoryCli>,
    },
    /// Recompute the signed-in user's stats from their log
    RebuildStats,
    /// List known muscle groups
    MuscleGroups,
    /// Sign in as USER_ID
    SetUser {
        user_id: String,
        /// Display name stored on the profile
        #[arg(long)]
        name: Option<String>,
    },
    /// Sign out; later entries are anonymous
    SignOut,
    SetUnits {
        #[arg(value_enum)]
        units: UnitsCli,
    },
    /// How backfilled entries affect last-worked dates
    SetRecency {
        #[arg(value_enum)]
        policy: RecencyCli,
    },
    /// Show the path to the database file
    DbPath,
    /// Show the path to the config file
    ConfigPath,
    /// Print a shell completion script to stdout
    GenerateCompletion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

pub fn build_cli_command() -> clap::Command {
    Cli::command()
}
