//src/stats.rs
use crate::model::{ExerciseDefinition, LogEntry, OneRepMax, SetRecord, UserAggregates};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use strum_macros::{Display, EnumString};
use tracing::warn;

/// How a last-worked timestamp reacts to an entry older than the stored one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum RecencyPolicy {
    /// Always take the entry's timestamp, even when backfilling an older workout.
    #[default]
    Overwrite,
    /// Keep whichever of the stored and new timestamps is later.
    Latest,
}

/// The set of an entry that produced its best estimate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetEstimate {
    pub estimate: f64,
    pub weight: f64,
    pub reps: u32,
    /// Zero-based position within the entry's sets.
    pub set_index: usize,
}

/// Epley estimate. Only defined for a positive weight and a positive rep count.
pub fn estimate_one_rep_max(weight: f64, reps: u32) -> Option<f64> {
    if reps > 0 && weight > 0.0 {
        Some(weight * (1.0 + f64::from(reps) / 30.0))
    } else {
        None
    }
}

/// Highest estimate among sets carrying both weight and reps. Ties keep the earliest set.
pub fn best_set_estimate(sets: &[SetRecord]) -> Option<SetEstimate> {
    let mut best: Option<SetEstimate> = None;
    for (set_index, set) in sets.iter().enumerate() {
        let (Some(weight), Some(reps)) = (set.weight, set.reps) else {
            continue;
        };
        let Some(estimate) = estimate_one_rep_max(weight, reps) else {
            continue;
        };
        if best.map_or(true, |b| estimate > b.estimate) {
            best = Some(SetEstimate {
                estimate,
                weight,
                reps,
                set_index,
            });
        }
    }
    best
}

/// Derives the next aggregates from the previous ones plus one committed entry.
///
/// Last-worked timestamps are overwritten unconditionally; the one-rep max only
/// moves when the entry's best estimate is strictly greater than the stored one.
pub fn apply_entry(
    prev: Option<&UserAggregates>,
    entry: &LogEntry,
    exercise: &ExerciseDefinition,
) -> UserAggregates {
    apply_entry_with_policy(prev, entry, exercise, RecencyPolicy::Overwrite)
}

pub fn apply_entry_with_policy(
    prev: Option<&UserAggregates>,
    entry: &LogEntry,
    exercise: &ExerciseDefinition,
    policy: RecencyPolicy,
) -> UserAggregates {
    let mut next = prev.cloned().unwrap_or_default();

    stamp(
        &mut next.last_worked_by_category,
        exercise.category.to_string(),
        entry.timestamp,
        policy,
    );
    stamp(
        &mut next.last_worked_by_exercise,
        entry.exercise_name.clone(),
        entry.timestamp,
        policy,
    );

    if let Some(best) = best_set_estimate(&entry.sets) {
        let improves = next
            .one_rep_max_by_exercise
            .get(&entry.exercise_name)
            .map_or(true, |stored| best.estimate > stored.estimated_max);
        if improves {
            next.one_rep_max_by_exercise.insert(
                entry.exercise_name.clone(),
                OneRepMax {
                    estimated_max: best.estimate,
                    reps_at_max: best.reps,
                    achieved_on: entry.timestamp,
                },
            );
        }
    }

    next
}

fn stamp(
    map: &mut BTreeMap<String, DateTime<Utc>>,
    key: String,
    timestamp: DateTime<Utc>,
    policy: RecencyPolicy,
) {
    match policy {
        RecencyPolicy::Overwrite => {
            map.insert(key, timestamp);
        }
        RecencyPolicy::Latest => {
            let slot = map.entry(key).or_insert(timestamp);
            if timestamp > *slot {
                *slot = timestamp;
            }
        }
    }
}

/// Replays entries oldest-first to rebuild a user's aggregates from scratch.
/// Entries whose exercise is missing from `catalog` are skipped.
pub fn rebuild(
    entries: &[LogEntry],
    catalog: &[ExerciseDefinition],
    policy: RecencyPolicy,
) -> UserAggregates {
    let mut ordered: Vec<&LogEntry> = entries.iter().collect();
    ordered.sort_by_key(|e| e.timestamp);

    let mut aggregates = UserAggregates::default();
    for entry in ordered {
        let Some(exercise) = catalog
            .iter()
            .find(|def| def.name.eq_ignore_ascii_case(&entry.exercise_name))
        else {
            warn!(
                entry_id = entry.id,
                exercise = %entry.exercise_name,
                "skipping entry for unknown exercise during rebuild"
            );
            continue;
        };
        aggregates = apply_entry_with_policy(Some(&aggregates), entry, exercise, policy);
    }
    aggregates
}
