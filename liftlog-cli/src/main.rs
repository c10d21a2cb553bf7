//src/main.rs
mod cli;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use std::io::{self, stdout};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use liftlog_lib::{
    AppService, Category, EditTimestampPolicy, EntryForm, ExerciseDefinition, ExerciseShape,
    LogEntry, OneRepMax, RecencyPolicy, SetField, SetRecord, SubmitOutcome, Units,
    UserAggregates,
};

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli_args = cli::parse_args();
    let export_csv = cli_args.export_csv;
    init_tracing(cli_args.verbose);

    if let cli::Commands::GenerateCompletion { shell } = cli_args.command {
        let mut cmd = cli::build_cli_command();
        let bin_name = cmd.get_name().to_string();
        eprintln!("Generating completion script for {shell}...");
        clap_complete::generate(shell, &mut cmd, bin_name, &mut stdout());
        return Ok(());
    }

    let mut service =
        AppService::initialize().context("Failed to initialize application service")?;
    let header_color: Color = liftlog_lib::parse_color(&service.config.theme.header_color)
        .map(Color::from)
        .unwrap_or(Color::Green);

    match cli_args.command {
        cli::Commands::GenerateCompletion { .. } => {
            unreachable!("Completion generation should have exited already");
        }

        // --- Catalog ---
        cli::Commands::Exercises { category } => {
            let exercises = service.list_exercises(category.map(cli_category_to_category))?;
            if exercises.is_empty() {
                println!("No exercises defined yet.");
            } else if export_csv {
                print_exercise_csv(&exercises)?;
            } else {
                print_exercise_table(&exercises, header_color);
            }
        }
        cli::Commands::DefineExercise {
            name,
            category,
            fields,
            muscle_group,
            primary,
            secondary,
            icon_url,
        } => {
            let shape = ExerciseShape::from_fields(&fields.0)?;
            let mut def = ExerciseDefinition::new(
                name,
                cli_category_to_category(category),
                shape,
                muscle_group,
            );
            def.primary_muscles = split_list(primary.as_deref());
            def.secondary_muscles = split_list(secondary.as_deref());
            def.icon_url = icon_url;
            match service.create_exercise(&def) {
                Ok(id) => println!(
                    "Defined exercise '{}' ({}, {}) ID: {id}",
                    def.name.trim(),
                    def.category,
                    def.shape
                ),
                Err(e) => bail!("Error creating exercise: {e}"),
            }
        }
        cli::Commands::MuscleGroups => {
            for group in service.list_muscle_groups()? {
                println!("{group}");
            }
        }

        // --- Logging through the entry form ---
        cli::Commands::Log {
            exercise,
            sets,
            date,
        } => {
            let Some(def) = service.get_exercise(&exercise)? else {
                bail!("Exercise '{}' not found. Use `log-new` to define it.", exercise.trim());
            };
            let mut form = EntryForm::new(service.config.default_category);
            form.select_exercise(def)?;
            fill_form_sets(&mut form, &sets)?;
            submit(&mut service, &mut form, timestamp_for(date))?;
        }
        cli::Commands::LogNew {
            name,
            category,
            fields,
            muscle_group,
            sets,
            date,
        } => {
            let shape = ExerciseShape::from_fields(&fields.0)?;
            let mut form = EntryForm::new(service.config.default_category);
            form.define_new_exercise()?;
            form.select_category(cli_category_to_category(category))?;
            form.set_new_exercise_name(&name)?;
            form.set_new_muscle_group(&muscle_group)?;
            form.set_new_shape(shape)?;
            fill_form_sets(&mut form, &sets)?;
            submit(&mut service, &mut form, timestamp_for(date))?;
        }
        cli::Commands::Edit {
            id,
            sets,
            keep_date,
            touch,
        } => {
            let Some(entry) = service.get_log_entry(id)? else {
                bail!("Log entry {id} not found.");
            };
            let Some(def) = service.get_exercise(&entry.exercise_name)? else {
                bail!(
                    "Exercise '{}' of entry {id} is no longer in the catalog.",
                    entry.exercise_name
                );
            };
            if keep_date {
                service.config.edit_timestamp = EditTimestampPolicy::Keep;
            } else if touch {
                service.config.edit_timestamp = EditTimestampPolicy::Update;
            }
            let mut form = EntryForm::new(service.config.default_category);
            form.begin_edit(&entry, def)?;
            // Loaded sets beyond those given are dropped; unspecified fields keep their values
            while form.pending_sets().len() > sets.len() {
                form.remove_set(form.pending_sets().len() - 1)?;
            }
            fill_form_sets(&mut form, &sets)?;
            submit(&mut service, &mut form, Utc::now())?;
        }
        cli::Commands::List { limit } => {
            let entries = service.list_log_entries(Some(limit))?;
            if entries.is_empty() {
                println!("No entries logged yet.");
            } else if export_csv {
                print_entry_csv(&entries)?;
            } else {
                print_entry_table(&entries, header_color, service.config.units);
            }
        }

        // --- Stats ---
        cli::Commands::Stats { exercise, category } => {
            let Some(user_id) = service.config.user_id.clone() else {
                bail!("Not signed in. Use `set-user` first; anonymous entries have no stats.");
            };
            let aggregates = service.user_aggregates(&user_id)?.unwrap_or_default();
            if let Some(name) = exercise {
                let Some(def) = service.get_exercise(&name)? else {
                    bail!("Exercise '{}' not found.", name.trim());
                };
                let mut form = EntryForm::new(service.config.default_category);
                form.select_exercise(def)?;
                let summary = service.selection_summary(&user_id, &form)?;
                println!(
                    "{} last worked: {}",
                    summary.category,
                    format_when(summary.category_last_worked)
                );
                if let Some(name) = summary.exercise {
                    println!("{name} last worked: {}", format_when(summary.exercise_last_worked));
                    match summary.one_rep_max {
                        Some(orm) => println!(
                            "Estimated 1RM: {:.1} {} (from {} reps on {})",
                            orm.estimated_max,
                            service.config.units.weight_label(),
                            orm.reps_at_max,
                            format_when(Some(orm.achieved_on))
                        ),
                        None => println!("Estimated 1RM: -"),
                    }
                }
            } else if export_csv {
                print_stats_csv(&aggregates, category.map(cli_category_to_category))?;
            } else {
                print_stats_tables(
                    &aggregates,
                    category.map(cli_category_to_category),
                    header_color,
                    service.config.units,
                );
            }
        }
        cli::Commands::RebuildStats => {
            let Some(user_id) = service.config.user_id.clone() else {
                bail!("Not signed in. Use `set-user` first.");
            };
            let rebuilt = service.rebuild_user_aggregates(&user_id)?;
            println!(
                "Rebuilt stats for '{user_id}': {} exercises, {} with an estimated 1RM.",
                rebuilt.last_worked_by_exercise.len(),
                rebuilt.one_rep_max_by_exercise.len()
            );
        }

        // --- Session and settings ---
        cli::Commands::SetUser { user_id, name } => {
            service.set_user(Some(user_id.clone()))?;
            if let Some(name) = name.as_deref() {
                service.set_display_name(user_id.trim(), Some(name))?;
            }
            let shown = service.display_name(user_id.trim())?;
            println!(
                "Signed in as '{}'{}",
                user_id.trim(),
                shown.map(|n| format!(" ({n})")).unwrap_or_default()
            );
        }
        cli::Commands::SignOut => {
            service.set_user(None)?;
            println!("Signed out. New entries will be anonymous.");
        }
        cli::Commands::SetUnits { units } => {
            let units = match units {
                cli::UnitsCli::Metric => Units::Metric,
                cli::UnitsCli::Imperial => Units::Imperial,
            };
            service.set_units(units)?;
            println!("Units set to {units}.");
        }
        cli::Commands::SetRecency { policy } => {
            let policy = match policy {
                cli::RecencyCli::Overwrite => RecencyPolicy::Overwrite,
                cli::RecencyCli::Latest => RecencyPolicy::Latest,
            };
            service.set_recency_policy(policy)?;
            println!("Recency policy set to {policy}. Run `rebuild-stats` to apply it to past entries.");
        }
        cli::Commands::DbPath => {
            println!("Database file is located at: {:?}", service.get_db_path());
        }
        cli::Commands::ConfigPath => {
            println!("Config file is located at: {:?}", service.get_config_path());
        }
    }

    Ok(())
}

fn submit(service: &mut AppService, form: &mut EntryForm, now: DateTime<Utc>) -> Result<()> {
    let user_id = service.config.user_id.clone();
    let outcome = service.submit_form(form, user_id.as_deref(), now)?;
    match outcome {
        SubmitOutcome::Rejected => {
            println!("Nothing logged: every set needs all the inputs its exercise requires.");
        }
        SubmitOutcome::Logged {
            entry,
            aggregates,
            created_exercise,
        } => {
            if let Some(def) = created_exercise {
                println!("Defined exercise '{}' ({}, {}).", def.name, def.category, def.shape);
            }
            println!(
                "Logged {} set(s) of '{}' (ID: {}).",
                entry.sets.len(),
                entry.exercise_name,
                entry.id
            );
            print_new_max(&entry, aggregates.as_ref(), service.config.units);
        }
        SubmitOutcome::Edited { entry, aggregates } => {
            println!(
                "Updated entry {} of '{}' ({} set(s)).",
                entry.id,
                entry.exercise_name,
                entry.sets.len()
            );
            print_new_max(&entry, aggregates.as_ref(), service.config.units);
        }
    }
    Ok(())
}

/// Announces a 1RM that this entry just set.
fn print_new_max(entry: &LogEntry, aggregates: Option<&UserAggregates>, units: Units) {
    let Some(orm) = aggregates.and_then(|a| a.one_rep_max(&entry.exercise_name)) else {
        return;
    };
    if orm.achieved_on == entry.timestamp {
        println!(
            "*** New estimated 1RM for {}: {:.1} {} ***",
            entry.exercise_name,
            orm.estimated_max,
            units.weight_label()
        );
    }
}

/// Feeds `--set` values into the form's drafts, adding rows as needed.
fn fill_form_sets(form: &mut EntryForm, sets: &[cli::SetInput]) -> Result<()> {
    if sets.len() > 1 && !form.can_add_set() {
        bail!("This exercise is logged as a single combined row; pass one --set.");
    }
    for (index, input) in sets.iter().enumerate() {
        if index >= form.pending_sets().len() {
            form.add_set()?;
        }
        for (field, value) in &input.0 {
            form.set_field(index, *field, value)
                .with_context(|| format!("Set {}", index + 1))?;
        }
    }
    debug!(sets = sets.len(), "form filled");
    Ok(())
}

/// Today means now; any other day is logged at noon UTC.
fn timestamp_for(date: NaiveDate) -> DateTime<Utc> {
    if date == Utc::now().date_naive() {
        return Utc::now();
    }
    date.and_hms_opt(12, 0, 0)
        .map_or_else(Utc::now, |naive| naive.and_utc())
}

const fn cli_category_to_category(cli_category: cli::CategoryCli) -> Category {
    match cli_category {
        cli::CategoryCli::UpperBodyPush => Category::UpperBodyPush,
        cli::CategoryCli::UpperBodyPull => Category::UpperBodyPull,
        cli::CategoryCli::LowerBody => Category::LowerBody,
        cli::CategoryCli::Core => Category::Core,
        cli::CategoryCli::Cardio => Category::Cardio,
        cli::CategoryCli::FullBody => Category::FullBody,
    }
}

fn split_list(raw: Option<&str>) -> Vec<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn format_when(when: Option<DateTime<Utc>>) -> String {
    when.map_or("-".to_string(), |ts| {
        ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
    })
}

fn format_value(set: &SetRecord, field: SetField) -> String {
    match field {
        SetField::Weight => set.weight.map(|v| format!("{v}")),
        SetField::Reps => set.reps.map(|v| v.to_string()),
        SetField::Distance => set.distance.map(|v| format!("{v}")),
        SetField::Duration => set.duration_secs.map(|v| format!("{v}s")),
    }
    .unwrap_or_default()
}

/// `100x5, 105x3` style summary of an entry's sets.
fn format_sets(sets: &[SetRecord]) -> String {
    sets.iter()
        .map(|set| {
            let parts: Vec<String> = set
                .present_fields()
                .into_iter()
                .map(|f| format_value(set, f))
                .collect();
            match (set.weight, set.reps) {
                (Some(_), Some(_)) => parts.join("x"),
                _ => parts.join(" / "),
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_exercise_table(exercises: &[ExerciseDefinition], header_color: Color) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(header_color),
            Cell::new("Category").fg(header_color),
            Cell::new("Inputs").fg(header_color),
            Cell::new("Muscle Group").fg(header_color),
            Cell::new("Primary").fg(header_color),
            Cell::new("Secondary").fg(header_color),
        ]);

    for def in exercises {
        table.add_row(vec![
            Cell::new(&def.name),
            Cell::new(def.category.to_string()),
            Cell::new(def.shape.to_string()),
            Cell::new(&def.major_muscle_group),
            Cell::new(or_dash(&def.primary_muscles.join(", "))),
            Cell::new(or_dash(&def.secondary_muscles.join(", "))),
        ]);
    }
    println!("{table}");
}

fn print_exercise_csv(exercises: &[ExerciseDefinition]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    writer.write_record([
        "Name",
        "Category",
        "Fields",
        "Muscle_Group",
        "Primary",
        "Secondary",
        "Icon_Url",
    ])?;
    for def in exercises {
        let fields: Vec<String> = def.shape.fields().iter().map(ToString::to_string).collect();
        writer.write_record([
            def.name.clone(),
            def.category.to_string(),
            fields.join(","),
            def.major_muscle_group.clone(),
            def.primary_muscles.join(","),
            def.secondary_muscles.join(","),
            def.icon_url.clone().unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn print_entry_table(entries: &[LogEntry], header_color: Color, units: Units) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").fg(header_color),
            Cell::new("Timestamp (Local)").fg(header_color),
            Cell::new("User").fg(header_color),
            Cell::new("Exercise").fg(header_color),
            Cell::new(format!(
                "Sets ({} / {})",
                units.weight_label(),
                units.distance_label()
            ))
            .fg(header_color),
        ]);

    for entry in entries {
        table.add_row(vec![
            Cell::new(entry.id.to_string()),
            Cell::new(format_when(Some(entry.timestamp))),
            Cell::new(entry.user_id.as_deref().unwrap_or("-")),
            Cell::new(&entry.exercise_name),
            Cell::new(format_sets(&entry.sets)),
        ]);
    }
    println!("{table}");
}

/// One CSV row per set so spreadsheet tools can aggregate.
fn print_entry_csv(entries: &[LogEntry]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    writer.write_record([
        "ID",
        "Timestamp",
        "User",
        "Exercise",
        "Set",
        "Weight",
        "Reps",
        "Distance",
        "Duration_s",
    ])?;
    for entry in entries {
        for (index, set) in entry.sets.iter().enumerate() {
            writer.write_record([
                entry.id.to_string(),
                entry.timestamp.to_rfc3339(),
                entry.user_id.clone().unwrap_or_default(),
                entry.exercise_name.clone(),
                (index + 1).to_string(),
                set.weight.map(|v| v.to_string()).unwrap_or_default(),
                set.reps.map(|v| v.to_string()).unwrap_or_default(),
                set.distance.map(|v| v.to_string()).unwrap_or_default(),
                set.duration_secs.map(|v| v.to_string()).unwrap_or_default(),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn categories_in_scope(filter: Option<Category>) -> Vec<Category> {
    use strum::IntoEnumIterator;
    Category::iter()
        .filter(|c| filter.map_or(true, |f| f == *c))
        .collect()
}

fn print_stats_tables(
    aggregates: &UserAggregates,
    category: Option<Category>,
    header_color: Color,
    units: Units,
) {
    let mut recency = Table::new();
    recency
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Category").fg(header_color),
            Cell::new("Last Worked").fg(header_color),
        ]);
    for c in categories_in_scope(category) {
        recency.add_row(vec![
            Cell::new(c.to_string()),
            Cell::new(format_when(aggregates.category_last_worked(c))),
        ]);
    }
    println!("{recency}");

    let mut exercises = Table::new();
    exercises
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Exercise").fg(header_color),
            Cell::new("Last Worked").fg(header_color),
            Cell::new(format!("Est. 1RM ({})", units.weight_label())).fg(header_color),
            Cell::new("Reps").fg(header_color),
            Cell::new("Achieved").fg(header_color),
        ]);
    for (name, last) in &aggregates.last_worked_by_exercise {
        let orm: Option<&OneRepMax> = aggregates.one_rep_max(name);
        exercises.add_row(vec![
            Cell::new(name),
            Cell::new(format_when(Some(*last))),
            Cell::new(orm.map_or("-".to_string(), |o| format!("{:.1}", o.estimated_max))),
            Cell::new(orm.map_or("-".to_string(), |o| o.reps_at_max.to_string())),
            Cell::new(format_when(orm.map(|o| o.achieved_on))),
        ]);
    }
    println!("{exercises}");
}

fn print_stats_csv(aggregates: &UserAggregates, category: Option<Category>) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    writer.write_record(["Kind", "Key", "Last_Worked", "Est_1RM", "Reps_At_Max", "Achieved_On"])?;
    for c in categories_in_scope(category) {
        writer.write_record([
            "category".to_string(),
            c.to_string(),
            aggregates
                .category_last_worked(c)
                .map(|ts| ts.to_rfc3339())
                .unwrap_or_default(),
            String::new(),
            String::new(),
            String::new(),
        ])?;
    }
    for (name, last) in &aggregates.last_worked_by_exercise {
        let orm = aggregates.one_rep_max(name);
        writer.write_record([
            "exercise".to_string(),
            name.clone(),
            last.to_rfc3339(),
            orm.map(|o| format!("{:.2}", o.estimated_max)).unwrap_or_default(),
            orm.map(|o| o.reps_at_max.to_string()).unwrap_or_default(),
            orm.map(|o| o.achieved_on.to_rfc3339()).unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn or_dash(s: &str) -> &str {
    if s.is_empty() {
        "-"
    } else {
        s
    }
}
