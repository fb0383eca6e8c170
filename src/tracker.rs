//! Application state shared by every screen of the tracker.
//!
//! [`Tracker`] owns the loaded plan rows, the session machine, the history
//! log and the store they are saved to. The UI calls its methods in
//! response to user actions and timer ticks, then drains [`TrackerEvent`]s
//! to decide what to redraw.

use chrono::{DateTime, NaiveDate, Utc};
use std::time::{Duration, Instant};

use crate::error::{Result, TrackerError};
use crate::history::{HistoryStore, export_file_name};
use crate::plan::{WorkoutPlan, group_into_plans, select_plan};
use crate::session::{CompletedWorkout, Session, SessionMachine, SessionState};
use crate::storage::{KeyValueStore, PLAN_ROWS_KEY};
use crate::tabular::{self, FileFormat, Row};

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    PlanSetLoaded { plans: Vec<String> },
    PlanSelected { name: String, can_start: bool },
    SessionStarted { plan: String },
    FieldChanged { entry_id: usize, field: String, value: String },
    SessionSaved,
    SessionFinished { completed: CompletedWorkout },
    HistoryChanged { len: usize },
    FileCleared,
}

pub struct Tracker<S: KeyValueStore> {
    store: S,
    rows: Vec<Row>,
    plans: Vec<WorkoutPlan>,
    selected_plan: Option<String>,
    session: SessionMachine,
    history: HistoryStore,
    events: Vec<TrackerEvent>,
}

impl<S: KeyValueStore> Tracker<S> {
    /// Bring back everything a previous run left in `store`. Unreadable data
    /// is logged and treated as missing so the app always starts.
    pub fn open(store: S, autosave_delay: Duration) -> Self {
        let mut tracker = Self {
            store,
            rows: Vec::new(),
            plans: Vec::new(),
            selected_plan: None,
            session: SessionMachine::new(autosave_delay),
            history: HistoryStore::default(),
            events: Vec::new(),
        };

        match load_rows(&tracker.store) {
            Ok(rows) if !rows.is_empty() => match group_into_plans(&rows) {
                Ok(plans) => {
                    log::info!("Loaded {} saved plan rows", rows.len());
                    tracker.rows = rows;
                    tracker.plans = plans;
                    tracker.emit_plans_loaded();
                }
                Err(e) => log::warn!("Ignoring saved plan rows: {e}"),
            },
            Ok(_) => {}
            Err(e) => log::warn!("Ignoring unreadable plan rows: {e}"),
        }

        match HistoryStore::load(&tracker.store) {
            Ok(history) => tracker.history = history,
            Err(e) => log::warn!("Ignoring unreadable history: {e}"),
        }
        tracker.events.push(TrackerEvent::HistoryChanged {
            len: tracker.history.len(),
        });

        match tracker.session.restore(&tracker.store) {
            Ok(true) => {
                if let Some(s) = tracker.session.session() {
                    tracker.events.push(TrackerEvent::SessionStarted {
                        plan: s.name.clone(),
                    });
                }
            }
            Ok(false) => {}
            Err(e) => log::warn!("Ignoring unreadable saved session: {e}"),
        }
        tracker
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn plans(&self) -> &[WorkoutPlan] {
        &self.plans
    }

    pub fn selected_plan(&self) -> Option<&str> {
        self.selected_plan.as_deref()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.session()
    }

    pub fn session_state(&self) -> &SessionState {
        self.session.state()
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn autosave_deadline(&self) -> Option<Instant> {
        self.session.autosave_deadline()
    }

    pub fn drain_events(&mut self) -> Vec<TrackerEvent> {
        std::mem::take(&mut self.events)
    }

    fn emit_plans_loaded(&mut self) {
        let plans = self.plans.iter().map(|p| p.name.clone()).collect();
        self.events.push(TrackerEvent::PlanSetLoaded { plans });
    }

    /// Replace the plan set with the contents of an uploaded file. The
    /// current plans are kept when the file cannot be used.
    pub fn load_file(
        &mut self,
        file_name: &str,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<usize> {
        let format = FileFormat::detect(file_name, content_type)?;
        let rows = tabular::parse(bytes, format)?;
        let plans = group_into_plans(&rows)?;
        log::info!(
            "Loaded {} rows in {} plans from {file_name}",
            rows.len(),
            plans.len()
        );

        let json = serde_json::to_string(&rows)?;
        self.rows = rows;
        self.plans = plans;
        self.selected_plan = None;
        self.emit_plans_loaded();
        self.store.set(PLAN_ROWS_KEY, &json)?;
        Ok(self.plans.len())
    }

    pub fn select_plan(&mut self, name: &str) {
        let can_start = !name.is_empty();
        self.selected_plan = can_start.then(|| name.to_string());
        self.events.push(TrackerEvent::PlanSelected {
            name: name.to_string(),
            can_start,
        });
    }

    /// Begin the selected plan. The new session is saved right away so a
    /// crash before the first edit still leaves it recoverable.
    pub fn start_workout(&mut self, now: DateTime<Utc>) -> Result<()> {
        let Some(name) = self.selected_plan.clone() else {
            return Err(TrackerError::invalid_state("choose a workout first"));
        };
        if self.rows.is_empty() {
            return Err(TrackerError::EmptyData);
        }
        let entries = select_plan(&self.rows, &name);
        self.session.start(&name, &entries, now)?;
        self.events.push(TrackerEvent::SessionStarted { plan: name });
        self.session.persist_snapshot(&mut self.store)
    }

    pub fn record_field(
        &mut self,
        entry_id: usize,
        field: &str,
        value: &str,
        now: Instant,
    ) -> Result<()> {
        if self.session.record_field(entry_id, field, value, now)? {
            self.events.push(TrackerEvent::FieldChanged {
                entry_id,
                field: field.to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    pub fn save_session(&mut self) -> Result<()> {
        self.session.persist_snapshot(&mut self.store)?;
        self.events.push(TrackerEvent::SessionSaved);
        Ok(())
    }

    /// Cooperative timer tick; runs the autosave once it is due.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        if self.session.tick(now, &mut self.store)? {
            self.events.push(TrackerEvent::SessionSaved);
        }
        Ok(())
    }

    pub fn finish_workout(&mut self, now: DateTime<Utc>) -> Result<CompletedWorkout> {
        let was_active = self.session.is_active();
        let result = self
            .session
            .finish(&mut self.store, &mut self.history, now);
        if was_active {
            if let SessionState::Completed(completed) = self.session.state() {
                self.events.push(TrackerEvent::SessionFinished {
                    completed: completed.clone(),
                });
                self.events.push(TrackerEvent::HistoryChanged {
                    len: self.history.len(),
                });
            }
        }
        result
    }

    /// File name and CSV text for downloading the history.
    pub fn export_history(&self, today: NaiveDate) -> Result<(String, String)> {
        let text = self.history.export_as_delimited_text()?;
        Ok((export_file_name(today), text))
    }

    /// Erase all history, but only once the user has confirmed. Returns
    /// whether anything was cleared.
    pub fn clear_history(&mut self, confirmed: bool) -> Result<bool> {
        if !confirmed {
            return Ok(false);
        }
        let cleared = self.history.clear_all(&mut self.store);
        self.events.push(TrackerEvent::HistoryChanged { len: 0 });
        cleared.map(|_| true)
    }

    /// Forget the loaded file and any session in progress.
    pub fn clear_file(&mut self) -> Result<()> {
        self.rows.clear();
        self.plans.clear();
        self.selected_plan = None;
        let reset = self.session.reset(&mut self.store);
        let removed = self.store.remove(PLAN_ROWS_KEY);
        self.events.push(TrackerEvent::FileCleared);
        log::info!("Cleared plan file and session");
        reset.and(removed)
    }
}

fn load_rows(store: &dyn KeyValueStore) -> Result<Vec<Row>> {
    match store.get(PLAN_ROWS_KEY)? {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, HISTORY_KEY, MemoryStore, SESSION_KEY};
    use crate::tabular::parse_delimited;

    const PLAN: &[u8] = b"Day,Exercise,Sets\nA,Squat,3\nA,Bench,3\nB,Deadlift,1";

    fn tracker() -> Tracker<MemoryStore> {
        Tracker::open(MemoryStore::new(), Duration::from_secs(1))
    }

    #[test]
    fn upload_select_start_record_finish() {
        let mut t = tracker();
        t.drain_events();
        assert_eq!(t.load_file("plan.csv", None, PLAN).unwrap(), 2);
        t.select_plan("A");
        t.start_workout(Utc::now()).unwrap();
        t.record_field(0, "Sets", "5", Instant::now()).unwrap();
        let done = t.finish_workout(Utc::now()).unwrap();

        assert_eq!(done.completed[&0].get("Sets"), Some("5"));
        assert_eq!(t.history().len(), 1);
        assert_eq!(t.history().workouts()[0].exercises.len(), 2);
        assert!(t.session().is_none());

        let events = t.drain_events();
        assert_eq!(
            events[0],
            TrackerEvent::PlanSetLoaded {
                plans: vec!["A".into(), "B".into()]
            }
        );
        assert_eq!(
            events[1],
            TrackerEvent::PlanSelected {
                name: "A".into(),
                can_start: true
            }
        );
        assert!(events.contains(&TrackerEvent::SessionStarted { plan: "A".into() }));
        assert!(events.contains(&TrackerEvent::FieldChanged {
            entry_id: 0,
            field: "Sets".into(),
            value: "5".into()
        }));
        assert!(events.contains(&TrackerEvent::HistoryChanged { len: 1 }));
    }

    #[test]
    fn start_requires_a_selected_plan() {
        let mut t = tracker();
        t.load_file("plan.csv", None, PLAN).unwrap();
        t.select_plan("");
        let err = t.start_workout(Utc::now()).unwrap_err();
        assert!(matches!(err, TrackerError::InvalidState(_)));
        assert!(t.drain_events().contains(&TrackerEvent::PlanSelected {
            name: String::new(),
            can_start: false
        }));
    }

    #[test]
    fn bad_upload_keeps_previous_plans() {
        let mut t = tracker();
        t.load_file("plan.csv", None, PLAN).unwrap();
        let err = t.load_file("notes.txt", None, b"hello").unwrap_err();
        assert!(matches!(err, TrackerError::Format(_)));
        let err = t.load_file("empty.csv", None, b"Day,Exercise\n").unwrap_err();
        assert!(matches!(err, TrackerError::EmptyData));
        assert_eq!(t.plans().len(), 2);
    }

    #[test]
    fn reopen_restores_plans_session_and_history() {
        let mut t = tracker();
        t.load_file("plan.csv", None, PLAN).unwrap();
        t.select_plan("B");
        t.start_workout(Utc::now()).unwrap();
        t.finish_workout(Utc::now()).unwrap();
        t.select_plan("A");
        t.start_workout(Utc::now()).unwrap();
        t.record_field(1, "Sets", "2", Instant::now()).unwrap();
        t.save_session().unwrap();

        let store = t.store().clone();
        let mut reopened = Tracker::open(store, Duration::from_secs(1));
        assert_eq!(reopened.plans().len(), 2);
        assert_eq!(reopened.history().len(), 1);
        let session = reopened.session().unwrap();
        assert_eq!(session.name, "A");
        assert_eq!(session.value(1, "Sets"), Some("2"));
        assert!(
            reopened
                .drain_events()
                .contains(&TrackerEvent::SessionStarted { plan: "A".into() })
        );
    }

    #[test]
    fn autosave_fires_on_tick() {
        let mut t = tracker();
        t.load_file("plan.csv", None, PLAN).unwrap();
        t.select_plan("A");
        t.start_workout(Utc::now()).unwrap();
        let t0 = Instant::now();
        t.record_field(0, "Sets", "9", t0).unwrap();
        t.drain_events();

        t.tick(t0 + Duration::from_millis(500)).unwrap();
        assert!(t.drain_events().is_empty());
        t.tick(t0 + Duration::from_millis(1000)).unwrap();
        assert_eq!(t.drain_events(), vec![TrackerEvent::SessionSaved]);

        let saved = t.store().get(SESSION_KEY).unwrap().unwrap();
        let session: Session = serde_json::from_str(&saved).unwrap();
        assert_eq!(session.value(0, "Sets"), Some("9"));
    }

    #[test]
    fn clearing_history_needs_confirmation() {
        let mut t = tracker();
        t.load_file("plan.csv", None, PLAN).unwrap();
        t.select_plan("A");
        t.start_workout(Utc::now()).unwrap();
        t.finish_workout(Utc::now()).unwrap();

        assert!(!t.clear_history(false).unwrap());
        assert_eq!(t.history().len(), 1);
        assert!(t.clear_history(true).unwrap());
        assert!(t.history().is_empty());
        assert_eq!(t.store().get(HISTORY_KEY).unwrap(), None);
        let err = t.export_history(NaiveDate::from_ymd_opt(2025, 1, 2).unwrap());
        assert!(matches!(err, Err(TrackerError::EmptyHistory)));
    }

    #[test]
    fn clear_file_drops_plans_and_session() {
        let mut t = tracker();
        t.load_file("plan.csv", None, PLAN).unwrap();
        t.select_plan("A");
        t.start_workout(Utc::now()).unwrap();
        t.clear_file().unwrap();

        assert!(t.plans().is_empty());
        assert!(t.session().is_none());
        assert_eq!(t.selected_plan(), None);
        assert_eq!(t.store().get(SESSION_KEY).unwrap(), None);
        assert_eq!(t.store().get(PLAN_ROWS_KEY).unwrap(), None);
        assert_eq!(t.drain_events().last(), Some(&TrackerEvent::FileCleared));
    }

    #[test]
    fn export_names_file_by_date_and_reparses() {
        let mut t = tracker();
        t.load_file("plan.csv", None, PLAN).unwrap();
        t.select_plan("A");
        t.start_workout(Utc::now()).unwrap();
        t.record_field(1, "Sets", "4", Instant::now()).unwrap();
        t.finish_workout(Utc::now()).unwrap();

        let (name, text) = t
            .export_history(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap())
            .unwrap();
        assert_eq!(name, "workout-data-2025-06-30.csv");
        let exercises: Vec<String> = parse_delimited(&text)
            .unwrap()
            .iter()
            .filter_map(|r| r.get("Exercise").map(str::to_string))
            .collect();
        assert_eq!(exercises, vec!["Squat", "Bench"]);
    }

    #[test]
    fn untouched_exercises_keep_their_export_columns() {
        let mut t = tracker();
        t.load_file("plan.csv", None, b"Day,Exercise,Sets\nA,Squat,3\nA,Bench,3").unwrap();
        t.select_plan("A");
        t.start_workout(Utc::now()).unwrap();
        t.record_field(1, "Sets", "4", Instant::now()).unwrap();
        let done = t.finish_workout(Utc::now()).unwrap();
        assert_eq!(done.completed[&0].get("Sets"), Some(""));

        let (_, text) = t
            .export_history(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap())
            .unwrap();
        assert_eq!(text.lines().next(), Some("Date,Workout,Exercise,Sets"));
        let rows = parse_delimited(&text).unwrap();
        assert_eq!(rows[0].get("Sets"), Some(""));
        assert_eq!(rows[1].get("Sets"), Some("4"));

        let summary = &t.history().summaries()[0];
        assert_eq!((summary.recorded, summary.total), (2, 2));
    }

    #[test]
    fn file_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut t = Tracker::open(FileStore::new(dir.path()), Duration::from_secs(1));
            t.load_file("plan.csv", Some("text/csv"), PLAN).unwrap();
            t.select_plan("A");
            t.start_workout(Utc::now()).unwrap();
            t.record_field(0, "Sets", "6", Instant::now()).unwrap();
            t.save_session().unwrap();
        }
        let t = Tracker::open(FileStore::new(dir.path()), Duration::from_secs(1));
        assert_eq!(t.plans()[0].name, "A");
        assert_eq!(t.session().unwrap().value(0, "Sets"), Some("6"));
    }

    #[test]
    fn corrupt_saved_data_is_ignored_on_open() {
        let mut store = MemoryStore::new();
        store.set(PLAN_ROWS_KEY, "[oops").unwrap();
        store.set(HISTORY_KEY, "{}").unwrap();
        store.set(SESSION_KEY, "null").unwrap();
        let t = Tracker::open(store, Duration::from_secs(1));
        assert!(t.plans().is_empty());
        assert!(t.history().is_empty());
        assert_eq!(t.session_state(), &SessionState::NoSession);
    }
}
