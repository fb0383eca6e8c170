//! Grouping parsed rows into selectable workout plans.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackerError};
use crate::tabular::Row;

/// Columns probed, in order, for the value that names a row's plan.
pub const GROUP_COLUMNS: [&str; 6] = ["Workout", "Day", "Exercise", "workout", "day", "exercise"];

/// Columns probed, in order, for an exercise's display name.
pub const NAME_COLUMNS: [&str; 4] = ["Exercise", "exercise", "Name", "name"];

/// Columns that describe an exercise rather than something to fill in.
const DESCRIPTIVE_COLUMNS: [&str; 8] = [
    "Exercise", "exercise", "Name", "name", "Workout", "workout", "Day", "day",
];

/// Plan name used when a row has no grouping column at all.
pub const DEFAULT_PLAN_NAME: &str = "Workout";

pub fn group_key(row: &Row) -> &str {
    row.first_non_empty(&GROUP_COLUMNS)
        .unwrap_or(DEFAULT_PLAN_NAME)
}

/// A row of a plan together with its position in that plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseEntry {
    pub id: usize,
    pub row: Row,
}

impl ExerciseEntry {
    /// The exercise name from the row, if one of the name columns is filled.
    pub fn name(&self) -> Option<&str> {
        self.row.first_non_empty(&NAME_COLUMNS)
    }

    /// Name shown to the user; unnamed rows are labelled by position.
    pub fn display_name(&self) -> String {
        match self.name() {
            Some(name) => name.to_string(),
            None => format!("Exercise {}", self.id + 1),
        }
    }

    /// Columns the user fills in during a session, in row order.
    pub fn input_fields(&self) -> impl Iterator<Item = &str> {
        self.row
            .keys()
            .filter(|k| !DESCRIPTIVE_COLUMNS.contains(k))
    }

    /// The value the plan prescribes for `field`, shown as a placeholder.
    pub fn planned(&self, field: &str) -> &str {
        self.row.get(field).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutPlan {
    pub name: String,
    pub entries: Vec<ExerciseEntry>,
}

/// Distinct plan names in first-seen order. Blank names are not offered.
pub fn plan_names(rows: &[Row]) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for row in rows {
        let key = group_key(row);
        if !key.trim().is_empty() && !names.iter().any(|n| n == key) {
            names.push(key.to_string());
        }
    }
    names
}

/// Split `rows` into one plan per distinct grouping value.
pub fn group_into_plans(rows: &[Row]) -> Result<Vec<WorkoutPlan>> {
    if rows.is_empty() {
        return Err(TrackerError::EmptyData);
    }
    let plans = plan_names(rows)
        .into_iter()
        .map(|name| {
            let entries = select_plan(rows, &name);
            WorkoutPlan { name, entries }
        })
        .collect::<Vec<_>>();
    log::debug!("Grouped {} rows into {} plans", rows.len(), plans.len());
    Ok(plans)
}

/// Entries of the plan called `plan_name`. When no row belongs to it every
/// row is used, so a selection never produces an empty workout.
pub fn select_plan(rows: &[Row], plan_name: &str) -> Vec<ExerciseEntry> {
    let matching: Vec<&Row> = rows.iter().filter(|r| group_key(r) == plan_name).collect();
    let selected = if matching.is_empty() {
        log::warn!("No rows match plan {plan_name:?}; using all {} rows", rows.len());
        rows.iter().collect()
    } else {
        matching
    };
    selected
        .into_iter()
        .enumerate()
        .map(|(id, row)| ExerciseEntry {
            id,
            row: row.clone(),
        })
        .collect()
}
