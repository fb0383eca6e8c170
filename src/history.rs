//! Log of finished workouts and its CSV export.

use chrono::NaiveDate;

use crate::error::{Result, TrackerError};
use crate::session::CompletedWorkout;
use crate::storage::{HISTORY_KEY, KeyValueStore};
use crate::tabular::Row;

/// One line of the history list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkoutSummary {
    pub date: String,
    pub name: String,
    pub recorded: usize,
    pub total: usize,
    pub minutes: i64,
}

/// Completed workouts, newest first. Entries are only ever added at the
/// front or removed all at once.
#[derive(Debug, Default, Clone)]
pub struct HistoryStore {
    workouts: Vec<CompletedWorkout>,
}

impl HistoryStore {
    pub fn load(store: &dyn KeyValueStore) -> Result<Self> {
        let workouts = match store.get(HISTORY_KEY)? {
            Some(json) => serde_json::from_str(&json)?,
            None => Vec::new(),
        };
        Ok(Self { workouts })
    }

    pub fn workouts(&self) -> &[CompletedWorkout] {
        &self.workouts
    }

    pub fn len(&self) -> usize {
        self.workouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workouts.is_empty()
    }

    /// Put `completed` at the front of the log and write the whole log out.
    /// The in-memory log keeps the workout even if the write fails.
    pub fn append(
        &mut self,
        completed: CompletedWorkout,
        store: &mut dyn KeyValueStore,
    ) -> Result<()> {
        self.workouts.insert(0, completed);
        let json = serde_json::to_string(&self.workouts)?;
        store.set(HISTORY_KEY, &json)
    }

    /// Irreversibly forget every workout.
    pub fn clear_all(&mut self, store: &mut dyn KeyValueStore) -> Result<()> {
        log::info!("Clearing {} workouts from history", self.workouts.len());
        self.workouts.clear();
        store.remove(HISTORY_KEY)
    }

    pub fn summaries(&self) -> Vec<WorkoutSummary> {
        self.workouts
            .iter()
            .map(|w| {
                let ms = (w.end_time - w.start_time).num_milliseconds();
                WorkoutSummary {
                    date: w.date.clone(),
                    name: w.name.clone(),
                    recorded: w.completed.len(),
                    total: w.exercises.len(),
                    minutes: (ms as f64 / 60_000.0).round() as i64,
                }
            })
            .collect()
    }

    fn export_rows(&self) -> Vec<Row> {
        let mut rows = Vec::new();
        for workout in &self.workouts {
            for exercise in &workout.exercises {
                let mut row = Row::new();
                row.insert("Date", workout.date.as_str());
                row.insert("Workout", workout.name.as_str());
                row.insert("Exercise", exercise.name().unwrap_or("Unknown"));
                if let Some(values) = workout.completed.get(&exercise.id) {
                    for (field, value) in values.iter() {
                        row.insert(field, value);
                    }
                }
                rows.push(row);
            }
        }
        rows
    }

    /// Render every recorded exercise as CSV: `Date,Workout,Exercise` and the
    /// recorded fields. Columns come from the first exported row only, so
    /// fields that first appear in older workouts are left out.
    pub fn export_as_delimited_text(&self) -> Result<String> {
        let rows = self.export_rows();
        let Some(first) = rows.first() else {
            return Err(TrackerError::EmptyHistory);
        };
        let headers: Vec<&str> = first.keys().collect();

        let mut out = Vec::new();
        {
            let mut wtr = csv::WriterBuilder::new()
                .terminator(csv::Terminator::Any(b'\n'))
                .from_writer(&mut out);
            wtr.write_record(&headers)?;
            wtr.flush()?;
        }
        {
            let mut wtr = csv::WriterBuilder::new()
                .quote_style(csv::QuoteStyle::Always)
                .terminator(csv::Terminator::Any(b'\n'))
                .from_writer(&mut out);
            for row in &rows {
                wtr.write_record(headers.iter().map(|h| row.get(h).unwrap_or("")))?;
            }
            wtr.flush()?;
        }

        let mut text = String::from_utf8(out).map_err(|e| TrackerError::Format(e.to_string()))?;
        if text.ends_with('\n') {
            text.pop();
        }
        log::info!("Exported {} rows from {} workouts", rows.len(), self.workouts.len());
        Ok(text)
    }
}

/// `workout-data-YYYY-MM-DD.csv`
pub fn export_file_name(date: NaiveDate) -> String {
    format!("workout-data-{}.csv", date.format("%Y-%m-%d"))
}
