use anyhow::Result;
use chrono::{DateTime, Duration, TimeZone, Utc};
use liftlog_lib::{
    apply_entry, db, AppService, Category, Config, DbError, EditTimestamp, EditTimestampPolicy,
    EntryForm, ExerciseDefinition, ExerciseShape, FormMode, LogEntry, RecencyPolicy, SetField,
    SetRecord, SubmitOutcome,
};
use rusqlite::{ErrorCode, TransactionBehavior};

const EPSILON: f64 = 1e-9;

// Helper function to create a test service with in-memory database
fn create_test_service() -> Result<AppService> {
    let conn = rusqlite::Connection::open_in_memory()?;
    liftlog_lib::db::init_db(&conn)?;

    Ok(AppService {
        config: Config::default(),
        conn,
        db_path: ":memory:".into(),
        config_path: "test_config.toml".into(),
    })
}

fn bench_press() -> ExerciseDefinition {
    let mut def = ExerciseDefinition::new(
        "Bench Press",
        Category::UpperBodyPush,
        ExerciseShape::WeightReps,
        "Chest",
    );
    def.primary_muscles = vec!["Pectorals".into()];
    def.secondary_muscles = vec!["Triceps".into(), "Front Delts".into()];
    def
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 6, 17, 30, 0).unwrap()
}

fn assert_close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < EPSILON,
        "expected {expected}, got {actual}"
    );
}

fn table_count(service: &AppService, table: &str) -> Result<i64> {
    Ok(service
        .conn
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
}

fn fill_weight_reps(form: &mut EntryForm, index: usize, weight: &str, reps: &str) -> Result<()> {
    form.set_field(index, SetField::Weight, weight)?;
    form.set_field(index, SetField::Reps, reps)?;
    Ok(())
}

#[test]
fn test_create_exercise_unique_name() -> Result<()> {
    let service = create_test_service()?;
    service.create_exercise(&bench_press())?;

    let mut clash = bench_press();
    clash.name = "bench press".into();
    clash.category = Category::Cardio;
    let err = service.create_exercise(&clash).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DbError>(),
        Some(DbError::ExerciseNameNotUnique(_))
    ));

    assert_eq!(service.list_exercises(None)?.len(), 1);
    Ok(())
}

#[test]
fn test_exercise_round_trips_through_catalog() -> Result<()> {
    let service = create_test_service()?;
    let mut def = bench_press();
    def.icon_url = Some("https://example.com/bench.png".into());
    service.create_exercise(&def)?;

    let stored = service.get_exercise("BENCH PRESS")?.expect("exercise exists");
    assert_eq!(stored, def);
    assert!(service.get_exercise("Squat")?.is_none());
    Ok(())
}

#[test]
fn test_list_exercises_sorted_and_filtered() -> Result<()> {
    let service = create_test_service()?;
    service.create_exercise(&ExerciseDefinition::new(
        "Squat",
        Category::LowerBody,
        ExerciseShape::WeightReps,
        "Legs",
    ))?;
    service.create_exercise(&bench_press())?;
    service.create_exercise(&ExerciseDefinition::new(
        "Deadlift",
        Category::LowerBody,
        ExerciseShape::WeightReps,
        "Back",
    ))?;

    let names: Vec<String> = service
        .list_exercises(None)?
        .into_iter()
        .map(|d| d.name)
        .collect();
    assert_eq!(names, ["Bench Press", "Deadlift", "Squat"]);

    let lower = service.list_exercises(Some(Category::LowerBody))?;
    assert_eq!(lower.len(), 2);
    assert!(lower.iter().all(|d| d.category == Category::LowerBody));
    Ok(())
}

#[test]
fn test_create_exercise_rejects_blank_fields() -> Result<()> {
    let service = create_test_service()?;
    let blank_name =
        ExerciseDefinition::new("  ", Category::Core, ExerciseShape::DurationOnly, "Core");
    assert!(service.create_exercise(&blank_name).is_err());
    let blank_group =
        ExerciseDefinition::new("Plank", Category::Core, ExerciseShape::DurationOnly, "");
    assert!(service.create_exercise(&blank_group).is_err());
    assert!(service.list_exercises(None)?.is_empty());
    Ok(())
}

#[test]
fn test_muscle_groups_seeded_and_extended() -> Result<()> {
    let service = create_test_service()?;
    let groups = service.list_muscle_groups()?;
    assert!(groups.iter().any(|g| g == "Legs"));
    assert!(groups.iter().any(|g| g == "Chest"));

    service.create_exercise(&ExerciseDefinition::new(
        "Neck Curl",
        Category::Core,
        ExerciseShape::WeightReps,
        "Neck",
    ))?;
    let groups = service.list_muscle_groups()?;
    assert!(groups.iter().any(|g| g == "Neck"));

    // Seeding twice does not duplicate
    liftlog_lib::db::init_db(&service.conn)?;
    assert_eq!(service.list_muscle_groups()?.len(), groups.len());
    Ok(())
}

#[test]
fn test_first_entry_sets_one_rep_max_and_recency() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;

    let (entry, aggregates) = service.log_entry(
        Some("user-1"),
        "Bench Press",
        &[SetRecord::weight_reps(135.0, 5)],
        t0(),
    )?;
    assert_eq!(entry.exercise_name, "Bench Press");
    let aggregates = aggregates.expect("aggregates written");

    let orm = aggregates.one_rep_max("Bench Press").expect("1RM present");
    assert_close(orm.estimated_max, 157.5);
    assert_eq!(orm.reps_at_max, 5);
    assert_eq!(orm.achieved_on, t0());
    assert_eq!(aggregates.category_last_worked(Category::UpperBodyPush), Some(t0()));
    assert_eq!(aggregates.exercise_last_worked("Bench Press"), Some(t0()));

    let stored = service.user_aggregates("user-1")?.expect("stored");
    assert_eq!(stored, aggregates);
    Ok(())
}

#[test]
fn test_weaker_entry_keeps_max_and_moves_timestamps() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;
    service.log_entry(Some("user-1"), "Bench Press", &[SetRecord::weight_reps(135.0, 5)], t0())?;

    let later = t0() + Duration::days(3);
    service.log_entry(Some("user-1"), "Bench Press", &[SetRecord::weight_reps(115.0, 8)], later)?;

    let stored = service.user_aggregates("user-1")?.expect("stored");
    let orm = stored.one_rep_max("Bench Press").expect("1RM present");
    assert_close(orm.estimated_max, 157.5);
    assert_eq!(orm.reps_at_max, 5);
    assert_eq!(orm.achieved_on, t0());
    assert_eq!(stored.category_last_worked(Category::UpperBodyPush), Some(later));
    assert_eq!(stored.exercise_last_worked("Bench Press"), Some(later));
    Ok(())
}

#[test]
fn test_define_new_exercise_through_form() -> Result<()> {
    let mut service = create_test_service()?;
    let mut form = EntryForm::default();

    form.define_new_exercise()?;
    form.select_category(Category::LowerBody)?;
    form.set_new_exercise_name("Sled Push")?;
    form.set_new_muscle_group("Legs")?;
    form.set_new_shape(ExerciseShape::DistanceDuration)?;
    form.set_field(0, SetField::Distance, "50")?;
    form.set_field(0, SetField::Duration, "30")?;

    let SubmitOutcome::Logged {
        entry,
        aggregates,
        created_exercise,
    } = service.submit_form(&mut form, Some("user-1"), t0())?
    else {
        panic!("expected a logged outcome");
    };

    let created = created_exercise.expect("definition created");
    assert_eq!(created.name, "Sled Push");
    assert_eq!(created.shape, ExerciseShape::DistanceDuration);
    assert_eq!(created.major_muscle_group, "Legs");
    assert_eq!(table_count(&service, "workout_library")?, 1);
    assert_eq!(table_count(&service, "workout_logs")?, 1);

    assert_eq!(entry.exercise_name, "Sled Push");
    assert_eq!(entry.sets, vec![SetRecord::distance_duration(Some(50.0), Some(30))]);

    let aggregates = aggregates.expect("aggregates written");
    assert!(aggregates.one_rep_max("Sled Push").is_none());
    assert_eq!(aggregates.category_last_worked(Category::LowerBody), Some(t0()));

    // Back to an idle form on the default category
    assert_eq!(form.mode(), &FormMode::Idle);
    assert_eq!(form.selected_category(), Category::UpperBodyPush);
    Ok(())
}

#[test]
fn test_incomplete_form_writes_nothing() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;
    let def = service.get_exercise("Bench Press")?.expect("exists");

    let mut form = EntryForm::default();
    form.select_exercise(def)?;
    form.set_field(0, SetField::Reps, "5")?;
    let before = form.clone();

    let outcome = service.submit_form(&mut form, Some("user-1"), t0())?;
    assert_eq!(outcome, SubmitOutcome::Rejected);
    assert_eq!(form, before);
    assert_eq!(table_count(&service, "workout_logs")?, 0);
    assert_eq!(table_count(&service, "workout_library")?, 1);
    assert!(service.user_aggregates("user-1")?.is_none());
    Ok(())
}

#[test]
fn test_rejected_definition_creates_no_exercise() -> Result<()> {
    let mut service = create_test_service()?;
    let mut form = EntryForm::default();
    form.define_new_exercise()?;
    form.set_new_exercise_name("Farmer Carry")?;
    form.set_new_shape(ExerciseShape::DistanceDuration)?;
    form.set_field(0, SetField::Distance, "40")?;

    // Muscle group missing
    assert_eq!(
        service.submit_form(&mut form, Some("user-1"), t0())?,
        SubmitOutcome::Rejected
    );
    assert_eq!(table_count(&service, "workout_library")?, 0);
    Ok(())
}

#[test]
fn test_duplicate_definition_leaves_form_intact() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;

    let mut form = EntryForm::default();
    form.define_new_exercise()?;
    form.set_new_exercise_name("BENCH PRESS")?;
    form.set_new_muscle_group("Chest")?;
    form.set_new_shape(ExerciseShape::WeightReps)?;
    fill_weight_reps(&mut form, 0, "100", "5")?;
    let before = form.clone();

    let err = service
        .submit_form(&mut form, Some("user-1"), t0())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DbError>(),
        Some(DbError::ExerciseNameNotUnique(_))
    ));
    assert_eq!(form, before);
    assert_eq!(table_count(&service, "workout_logs")?, 0);
    Ok(())
}

#[test]
fn test_multi_set_submit_keeps_selection() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;
    let def = service.get_exercise("Bench Press")?.expect("exists");

    let mut form = EntryForm::default();
    form.select_exercise(def.clone())?;
    fill_weight_reps(&mut form, 0, "100", "10")?;
    let second = form.add_set()?;
    fill_weight_reps(&mut form, second, "120", "3")?;

    let SubmitOutcome::Logged {
        entry, aggregates, ..
    } = service.submit_form(&mut form, Some("user-1"), t0())?
    else {
        panic!("expected a logged outcome");
    };
    assert_eq!(entry.sets.len(), 2);

    // 100 x 10 -> 133.33, 120 x 3 -> 132
    let orm = *aggregates
        .expect("aggregates")
        .one_rep_max("Bench Press")
        .expect("1RM");
    assert_close(orm.estimated_max, 100.0 * (1.0 + 10.0 / 30.0));
    assert_eq!(orm.reps_at_max, 10);

    assert_eq!(form.selected_exercise(), Some(&def));
    assert_eq!(form.pending_sets().len(), 1);
    Ok(())
}

#[test]
fn test_anonymous_entry_produces_no_aggregates() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;

    let (entry, aggregates) =
        service.log_entry(None, "Bench Press", &[SetRecord::weight_reps(200.0, 1)], t0())?;
    assert!(entry.user_id.is_none());
    assert!(aggregates.is_none());
    assert_eq!(table_count(&service, "user_profiles")?, 0);
    assert_eq!(service.list_log_entries(None)?.len(), 1);
    Ok(())
}

#[test]
fn test_log_entry_validates_sets() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;

    assert!(service.log_entry(Some("u"), "Bench Press", &[], t0()).is_err());
    assert!(service
        .log_entry(Some("u"), "Bench Press", &[SetRecord::duration(60)], t0())
        .is_err());
    assert!(service
        .log_entry(Some("u"), "Bench Press", &[SetRecord::weight_reps(-5.0, 5)], t0())
        .is_err());

    let err = service
        .log_entry(Some("u"), "Overhead Press", &[SetRecord::weight_reps(50.0, 5)], t0())
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DbError>(),
        Some(DbError::ExerciseNotFound(_))
    ));
    assert_eq!(table_count(&service, "workout_logs")?, 0);
    Ok(())
}

#[test]
fn test_log_entry_uses_catalog_spelling() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;
    let (entry, aggregates) =
        service.log_entry(Some("u"), "bench press", &[SetRecord::weight_reps(60.0, 5)], t0())?;
    assert_eq!(entry.exercise_name, "Bench Press");
    assert!(aggregates.expect("written").one_rep_max("Bench Press").is_some());
    Ok(())
}

#[test]
fn test_failed_aggregate_write_keeps_entry() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;
    service.conn.execute("DROP TABLE user_profiles", [])?;

    let (entry, aggregates) =
        service.log_entry(Some("u"), "Bench Press", &[SetRecord::weight_reps(60.0, 5)], t0())?;
    assert!(aggregates.is_none());
    assert_eq!(service.get_log_entry(entry.id)?, Some(entry));
    Ok(())
}

#[test]
fn test_aggregate_write_preserves_display_name() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;
    service.set_display_name("user-1", Some("Sam"))?;

    service.log_entry(Some("user-1"), "Bench Press", &[SetRecord::weight_reps(100.0, 5)], t0())?;
    assert_eq!(service.display_name("user-1")?.as_deref(), Some("Sam"));
    assert!(service.user_aggregates("user-1")?.is_some());

    // And the other way round
    service.set_display_name("user-1", Some("Samira"))?;
    let orm = service
        .user_aggregates("user-1")?
        .and_then(|a| a.one_rep_max("Bench Press").copied())
        .expect("1RM survives profile update");
    assert_close(orm.estimated_max, 100.0 * (1.0 + 5.0 / 30.0));
    Ok(())
}

#[test]
fn test_aggregates_are_per_user() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;
    service.log_entry(Some("alice"), "Bench Press", &[SetRecord::weight_reps(100.0, 5)], t0())?;
    service.log_entry(Some("bob"), "Bench Press", &[SetRecord::weight_reps(50.0, 5)], t0())?;

    let alice = service.user_aggregates("alice")?.expect("alice");
    let bob = service.user_aggregates("bob")?.expect("bob");
    assert!(alice.one_rep_max("Bench Press").expect("a").estimated_max
        > bob.one_rep_max("Bench Press").expect("b").estimated_max);
    Ok(())
}

#[test]
fn test_list_log_entries_newest_first() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;
    // Inserted out of chronological order
    for offset in [2, 0, 5, 1] {
        service.log_entry(
            Some("u"),
            "Bench Press",
            &[SetRecord::weight_reps(100.0, 5)],
            t0() + Duration::days(offset),
        )?;
    }

    let entries = service.list_log_entries(None)?;
    let days: Vec<i64> = entries
        .iter()
        .map(|e| (e.timestamp - t0()).num_days())
        .collect();
    assert_eq!(days, [5, 2, 1, 0]);

    assert_eq!(service.list_log_entries(Some(2))?.len(), 2);
    Ok(())
}

#[test]
fn test_edit_log_entry_keeps_or_replaces_timestamp() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;
    let (entry, _) =
        service.log_entry(Some("u"), "Bench Press", &[SetRecord::weight_reps(100.0, 5)], t0())?;

    let new_sets = [SetRecord::weight_reps(150.0, 5), SetRecord::weight_reps(140.0, 6)];
    let (edited, aggregates) = service.edit_log_entry(entry.id, &new_sets, EditTimestamp::Keep)?;
    assert_eq!(edited.id, entry.id);
    assert_eq!(edited.timestamp, t0());
    assert_eq!(edited.sets, new_sets);
    assert_eq!(edited.user_id.as_deref(), Some("u"));
    assert_close(
        aggregates
            .expect("aggregates")
            .one_rep_max("Bench Press")
            .expect("1RM")
            .estimated_max,
        175.0,
    );

    let moved = t0() + Duration::hours(6);
    let (edited, _) = service.edit_log_entry(entry.id, &new_sets, EditTimestamp::Replace(moved))?;
    assert_eq!(edited.timestamp, moved);
    assert_eq!(service.get_log_entry(entry.id)?, Some(edited));
    assert_eq!(service.list_log_entries(None)?.len(), 1);

    assert!(service
        .edit_log_entry(999, &new_sets, EditTimestamp::Keep)
        .is_err());
    Ok(())
}

#[test]
fn test_edit_through_form_loads_all_sets() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;
    let (entry, _) = service.log_entry(
        Some("u"),
        "Bench Press",
        &[SetRecord::weight_reps(100.0, 5), SetRecord::weight_reps(90.0, 8)],
        t0(),
    )?;
    let def = service.get_exercise(&entry.exercise_name)?.expect("exists");

    let mut form = EntryForm::default();
    form.begin_edit(&entry, def)?;
    assert_eq!(form.pending_sets().len(), 2);
    form.set_field(1, SetField::Weight, "95")?;

    let now = t0() + Duration::days(1);
    let SubmitOutcome::Edited { entry: edited, .. } =
        service.submit_form(&mut form, Some("u"), now)?
    else {
        panic!("expected an edited outcome");
    };
    assert_eq!(edited.id, entry.id);
    assert_eq!(edited.timestamp, t0());
    assert_eq!(
        edited.sets,
        vec![SetRecord::weight_reps(100.0, 5), SetRecord::weight_reps(95.0, 8)]
    );
    assert!(!form.is_editing());
    assert_eq!(table_count(&service, "workout_logs")?, 1);
    Ok(())
}

#[test]
fn test_edit_through_form_can_touch_timestamp() -> Result<()> {
    let mut service = create_test_service()?;
    service.config.edit_timestamp = EditTimestampPolicy::Update;
    service.create_exercise(&bench_press())?;
    let (entry, _) =
        service.log_entry(Some("u"), "Bench Press", &[SetRecord::weight_reps(100.0, 5)], t0())?;
    let def = service.get_exercise("Bench Press")?.expect("exists");

    let mut form = EntryForm::default();
    form.begin_edit(&entry, def)?;
    let now = t0() + Duration::days(2);
    let SubmitOutcome::Edited { entry: edited, aggregates } =
        service.submit_form(&mut form, Some("u"), now)?
    else {
        panic!("expected an edited outcome");
    };
    assert_eq!(edited.timestamp, now);
    assert_eq!(
        aggregates.expect("aggregates").exercise_last_worked("Bench Press"),
        Some(now)
    );
    Ok(())
}

#[test]
fn test_backfill_respects_recency_policy() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;
    let older = t0() - Duration::days(7);

    service.log_entry(Some("over"), "Bench Press", &[SetRecord::weight_reps(100.0, 5)], t0())?;
    service.log_entry(Some("over"), "Bench Press", &[SetRecord::weight_reps(100.0, 5)], older)?;
    let stored = service.user_aggregates("over")?.expect("stored");
    assert_eq!(stored.exercise_last_worked("Bench Press"), Some(older));

    service.config.recency_policy = RecencyPolicy::Latest;
    service.log_entry(Some("latest"), "Bench Press", &[SetRecord::weight_reps(100.0, 5)], t0())?;
    service.log_entry(Some("latest"), "Bench Press", &[SetRecord::weight_reps(100.0, 5)], older)?;
    let stored = service.user_aggregates("latest")?.expect("stored");
    assert_eq!(stored.exercise_last_worked("Bench Press"), Some(t0()));
    assert_eq!(stored.category_last_worked(Category::UpperBodyPush), Some(t0()));
    Ok(())
}

#[test]
fn test_rebuild_matches_incremental_updates() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;
    service.create_exercise(&ExerciseDefinition::new(
        "Plank",
        Category::Core,
        ExerciseShape::DurationOnly,
        "Core",
    ))?;

    service.log_entry(Some("u"), "Bench Press", &[SetRecord::weight_reps(100.0, 8)], t0())?;
    service.log_entry(Some("u"), "Plank", &[SetRecord::duration(90)], t0() + Duration::hours(1))?;
    service.log_entry(
        Some("u"),
        "Bench Press",
        &[SetRecord::weight_reps(120.0, 2)],
        t0() + Duration::days(1),
    )?;
    service.log_entry(Some("other"), "Bench Press", &[SetRecord::weight_reps(300.0, 1)], t0())?;
    let incremental = service.user_aggregates("u")?.expect("stored");

    // Wipe the stored document, then rebuild from the log
    service.conn.execute("DELETE FROM user_profiles WHERE user_id = 'u'", [])?;
    let rebuilt = service.rebuild_user_aggregates("u")?;
    assert_eq!(rebuilt, incremental);
    assert_eq!(service.user_aggregates("u")?, Some(rebuilt));
    Ok(())
}

#[test]
fn test_selection_summary_follows_form() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;
    service.log_entry(Some("u"), "Bench Press", &[SetRecord::weight_reps(135.0, 5)], t0())?;

    let mut form = EntryForm::new(Category::Cardio);
    let summary = service.selection_summary("u", &form)?;
    assert_eq!(summary.category, Category::Cardio);
    assert!(summary.category_last_worked.is_none());
    assert!(summary.exercise.is_none());

    form.select_exercise(service.get_exercise("Bench Press")?.expect("exists"))?;
    let summary = service.selection_summary("u", &form)?;
    assert_eq!(summary.category, Category::UpperBodyPush);
    assert_eq!(summary.category_last_worked, Some(t0()));
    assert_eq!(summary.exercise.as_deref(), Some("Bench Press"));
    assert_eq!(summary.exercise_last_worked, Some(t0()));
    assert_close(summary.one_rep_max.expect("1RM").estimated_max, 157.5);

    // Unknown user reads as empty aggregates
    let summary = service.selection_summary("nobody", &form)?;
    assert!(summary.one_rep_max.is_none());
    Ok(())
}

#[test]
fn test_stored_sets_are_sparse_json() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&ExerciseDefinition::new(
        "Rowing",
        Category::Cardio,
        ExerciseShape::DistanceDuration,
        "Back",
    ))?;
    let (entry, _) = service.log_entry(
        None,
        "Rowing",
        &[SetRecord::distance_duration(Some(2.5), None)],
        t0(),
    )?;
    let raw: String = service.conn.query_row(
        "SELECT sets FROM workout_logs WHERE id = ?1",
        [entry.id],
        |row| row.get(0),
    )?;
    assert_eq!(raw, r#"[{"distance":2.5}]"#);

    let fields: String = service.conn.query_row(
        "SELECT fields FROM workout_library WHERE name = 'Rowing'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(fields, r#"["distance","duration"]"#);
    Ok(())
}

#[test]
fn test_form_selection_resolves_against_catalog() -> Result<()> {
    let mut service = create_test_service()?;
    service.create_exercise(&bench_press())?;

    let mut lowercase = bench_press();
    lowercase.name = "bench press".into();
    let mut form = EntryForm::default();
    form.select_exercise(lowercase)?;
    fill_weight_reps(&mut form, 0, "100", "5")?;

    let SubmitOutcome::Logged { entry, .. } =
        service.submit_form(&mut form, Some("u"), t0())?
    else {
        panic!("expected a logged outcome");
    };
    assert_eq!(entry.exercise_name, "Bench Press");

    service.log_entry(
        Some("u"),
        "Bench Press",
        &[SetRecord::weight_reps(60.0, 5)],
        t0() + Duration::days(1),
    )?;
    let aggregates = service.user_aggregates("u")?.expect("written");
    assert_eq!(aggregates.one_rep_max_by_exercise.len(), 1);
    assert_eq!(aggregates.last_worked_by_exercise.len(), 1);
    assert!(aggregates.one_rep_max("Bench Press").is_some());
    Ok(())
}

#[test]
fn test_form_cannot_log_uncatalogued_exercise() -> Result<()> {
    let mut service = create_test_service()?;
    let ghost =
        ExerciseDefinition::new("Ghost", Category::Core, ExerciseShape::DurationOnly, "Core");
    let mut form = EntryForm::default();
    form.select_exercise(ghost)?;
    form.set_field(0, SetField::Duration, "60")?;
    let before = form.clone();

    let err = service.submit_form(&mut form, Some("u"), t0()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DbError>(),
        Some(DbError::ExerciseNotFound(_))
    ));
    assert_eq!(form, before);
    assert_eq!(table_count(&service, "workout_logs")?, 0);
    assert!(service.user_aggregates("u")?.is_none());
    Ok(())
}

#[test]
fn test_failed_first_entry_rolls_back_definition() -> Result<()> {
    let mut service = create_test_service()?;
    service.conn.execute("DROP TABLE workout_logs", [])?;

    let mut form = EntryForm::default();
    form.define_new_exercise()?;
    form.select_category(Category::LowerBody)?;
    form.set_new_exercise_name("Sled Push")?;
    form.set_new_muscle_group("Sled Muscles")?;
    form.set_new_shape(ExerciseShape::DistanceDuration)?;
    form.set_field(0, SetField::Distance, "50")?;
    let before = form.clone();

    assert!(service.submit_form(&mut form, Some("user-1"), t0()).is_err());
    assert_eq!(form, before);
    assert!(service.get_exercise("Sled Push")?.is_none());
    assert!(!service.list_muscle_groups()?.contains(&"Sled Muscles".to_string()));

    // Retrying once the store is back succeeds instead of hitting the name check
    db::init_db(&service.conn)?;
    let outcome = service.submit_form(&mut form, Some("user-1"), t0())?;
    assert!(matches!(
        outcome,
        SubmitOutcome::Logged {
            created_exercise: Some(_),
            ..
        }
    ));
    assert_eq!(table_count(&service, "workout_library")?, 1);
    assert_eq!(table_count(&service, "workout_logs")?, 1);
    Ok(())
}

fn entry_for(id: i64, def: &ExerciseDefinition, set: SetRecord) -> LogEntry {
    LogEntry {
        id,
        user_id: Some("u".into()),
        exercise_name: def.name.clone(),
        sets: vec![set],
        timestamp: t0(),
    }
}

#[test]
fn test_aggregate_update_refuses_to_interleave_with_other_writer() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("shared.sqlite");
    let mut first = db::open_db(&path)?;
    db::init_db(&first)?;
    let mut second = db::open_db(&path)?;
    second.busy_timeout(std::time::Duration::ZERO)?;

    let bench = bench_press();
    let squat =
        ExerciseDefinition::new("Squat", Category::LowerBody, ExerciseShape::WeightReps, "Legs");
    let bench_entry = entry_for(1, &bench, SetRecord::weight_reps(100.0, 5));
    let squat_entry = entry_for(2, &squat, SetRecord::weight_reps(140.0, 3));

    {
        let held = first.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut applied = false;
        let result = db::update_user_aggregates(&mut second, "u", |prev| {
            applied = true;
            apply_entry(prev, &squat_entry, &squat)
        });
        match result {
            Err(DbError::Connection(rusqlite::Error::SqliteFailure(e, _))) => {
                assert_eq!(e.code, ErrorCode::DatabaseBusy);
            }
            other => panic!("expected SQLITE_BUSY, got {other:?}"),
        }
        assert!(!applied, "no read may happen while another writer holds the lock");
        held.commit()?;
    }

    // One after the other, each update sees the previous one
    db::update_user_aggregates(&mut first, "u", |prev| apply_entry(prev, &bench_entry, &bench))?;
    db::update_user_aggregates(&mut second, "u", |prev| apply_entry(prev, &squat_entry, &squat))?;

    let stored = db::get_user_aggregates(&first, "u")?.expect("written");
    assert!(stored.one_rep_max("Bench Press").is_some());
    assert!(stored.one_rep_max("Squat").is_some());
    assert_eq!(stored.category_last_worked(Category::UpperBodyPush), Some(t0()));
    assert_eq!(stored.category_last_worked(Category::LowerBody), Some(t0()));
    Ok(())
}
