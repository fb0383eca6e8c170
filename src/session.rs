//! The single in-progress workout and its lifecycle.
//!
//! A [`SessionMachine`] moves between three states:
//!
//! * `NoSession` - nothing in progress,
//! * `Active` - a session is collecting values and is autosaved,
//! * `Completed` - the last session was finished and handed to history.
//!
//! A new session can be started from `NoSession` or `Completed`; a finished
//! session is never resumed.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::error::{Result, TrackerError};
use crate::history::HistoryStore;
use crate::plan::ExerciseEntry;
use crate::storage::{KeyValueStore, SESSION_KEY};
use crate::tabular::Row;

/// Workout being recorded. `exercises` is a private copy of the plan's
/// entries taken at start, so reloading a file never changes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    pub exercises: Vec<ExerciseEntry>,
    pub start_time: DateTime<Utc>,
    /// Values entered so far, keyed by entry id then field name.
    #[serde(default)]
    pub completed: BTreeMap<usize, Row>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(name: &str, entries: &[ExerciseEntry], start_time: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            exercises: entries.to_vec(),
            start_time,
            completed: BTreeMap::new(),
            end_time: None,
        }
    }

    pub fn entry(&self, id: usize) -> Option<&ExerciseEntry> {
        self.exercises.iter().find(|e| e.id == id)
    }

    pub fn value(&self, entry_id: usize, field: &str) -> Option<&str> {
        self.completed.get(&entry_id).and_then(|r| r.get(field))
    }

    /// Give every input field of every exercise a value, `""` where the
    /// user typed nothing, so saved workouts share one set of columns.
    fn capture_inputs(&mut self) {
        for entry in &self.exercises {
            let values = self.completed.entry(entry.id).or_default();
            for field in entry.input_fields() {
                if values.get(field).is_none() {
                    values.insert(field, "");
                }
            }
        }
    }

    fn complete(self, end_time: DateTime<Utc>) -> CompletedWorkout {
        CompletedWorkout {
            name: self.name,
            exercises: self.exercises,
            start_time: self.start_time,
            completed: self.completed,
            end_time,
            date: display_date(end_time),
        }
    }
}

/// Local calendar date a workout is listed under.
pub fn display_date(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

/// A finished session as kept in history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedWorkout {
    pub name: String,
    pub exercises: Vec<ExerciseEntry>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub completed: BTreeMap<usize, Row>,
    pub end_time: DateTime<Utc>,
    pub date: String,
}

/// Single-slot deferred task. Scheduling again replaces the pending
/// deadline, so a burst of calls fires once, `delay` after the last one.
#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    pub fn schedule(&mut self, now: Instant) {
        self.deadline = Some(now + self.delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Clears and reports the pending task once its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(at) if now >= at => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    NoSession,
    Active(Session),
    Completed(CompletedWorkout),
}

#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    autosave: Debouncer,
}

impl SessionMachine {
    pub fn new(autosave_delay: Duration) -> Self {
        Self {
            state: SessionState::NoSession,
            autosave: Debouncer::new(autosave_delay),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn session(&self) -> Option<&Session> {
        match &self.state {
            SessionState::Active(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, SessionState::Active(_))
    }

    /// When the pending autosave is due, if one is scheduled.
    pub fn autosave_deadline(&self) -> Option<Instant> {
        self.autosave.deadline()
    }

    fn active_mut(&mut self, action: &str) -> Result<&mut Session> {
        match &mut self.state {
            SessionState::Active(s) => Ok(s),
            _ => Err(TrackerError::invalid_state(format!(
                "cannot {action}: no workout in progress"
            ))),
        }
    }

    pub fn start(
        &mut self,
        plan_name: &str,
        entries: &[ExerciseEntry],
        now: DateTime<Utc>,
    ) -> Result<&Session> {
        if self.is_active() {
            return Err(TrackerError::invalid_state(
                "a workout is already in progress; finish it first",
            ));
        }
        log::info!("Starting workout {plan_name:?} with {} exercises", entries.len());
        self.autosave.cancel();
        self.state = SessionState::Active(Session::new(plan_name, entries, now));
        self.session()
            .ok_or_else(|| TrackerError::invalid_state("workout failed to start"))
    }

    /// Store a value typed by the user and schedule an autosave. Returns
    /// whether the stored value changed; repeating a call changes nothing.
    pub fn record_field(
        &mut self,
        entry_id: usize,
        field: &str,
        value: &str,
        now: Instant,
    ) -> Result<bool> {
        let session = self.active_mut("record a value")?;
        if session.entry(entry_id).is_none() {
            return Err(TrackerError::UnknownEntry(entry_id));
        }
        let values = session.completed.entry(entry_id).or_default();
        let changed = values.get(field) != Some(value);
        if changed {
            values.insert(field, value);
        }
        self.autosave.schedule(now);
        Ok(changed)
    }

    /// Write the active session to `store` and drop any pending autosave.
    /// Untouched input fields are captured as `""`.
    pub fn persist_snapshot(&mut self, store: &mut dyn KeyValueStore) -> Result<()> {
        let session = self.active_mut("save")?;
        session.capture_inputs();
        let json = serde_json::to_string(&*session)?;
        store.set(SESSION_KEY, &json)?;
        self.autosave.cancel();
        log::debug!("Saved session snapshot ({} bytes)", json.len());
        Ok(())
    }

    /// Run the autosave if it is due. Returns whether a snapshot was written.
    pub fn tick(&mut self, now: Instant, store: &mut dyn KeyValueStore) -> Result<bool> {
        if !self.is_active() {
            self.autosave.cancel();
            return Ok(false);
        }
        if !self.autosave.take_due(now) {
            return Ok(false);
        }
        self.persist_snapshot(store)?;
        Ok(true)
    }

    /// Close the active session and append it to `history`.
    ///
    /// The snapshot is saved and then removed from `store`; if either step
    /// fails the session stays active and history is untouched. A failure to
    /// persist history is reported after the transition, since the workout
    /// is already in the in-memory log by then.
    pub fn finish(
        &mut self,
        store: &mut dyn KeyValueStore,
        history: &mut HistoryStore,
        now: DateTime<Utc>,
    ) -> Result<CompletedWorkout> {
        self.persist_snapshot(store)?;
        store.remove(SESSION_KEY)?;
        let SessionState::Active(session) =
            std::mem::replace(&mut self.state, SessionState::NoSession)
        else {
            return Err(TrackerError::invalid_state(
                "cannot finish: no workout in progress",
            ));
        };
        let completed = session.complete(now);
        log::info!(
            "Finished workout {:?}: {}/{} exercises recorded",
            completed.name,
            completed.completed.len(),
            completed.exercises.len()
        );

        let appended = history.append(completed.clone(), store);
        self.state = SessionState::Completed(completed.clone());
        appended?;
        Ok(completed)
    }

    /// Resume a session left in `store` by an earlier run. Returns whether
    /// one was found. The entries are taken as saved, without comparing them
    /// to the currently loaded plans.
    pub fn restore(&mut self, store: &dyn KeyValueStore) -> Result<bool> {
        let Some(json) = store.get(SESSION_KEY)? else {
            return Ok(false);
        };
        let session: Session = serde_json::from_str(&json)?;
        log::info!("Restored workout {:?} in progress", session.name);
        self.autosave.cancel();
        self.state = SessionState::Active(session);
        Ok(true)
    }

    /// Drop whatever session exists, including its saved snapshot.
    pub fn reset(&mut self, store: &mut dyn KeyValueStore) -> Result<()> {
        self.autosave.cancel();
        self.state = SessionState::NoSession;
        store.remove(SESSION_KEY)
    }
}
