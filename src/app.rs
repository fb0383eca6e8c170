//! Desktop front end. Everything here is presentation; state changes go
//! through [`Tracker`].

use chrono::{Local, Utc};
use eframe::{App, Frame, egui};
use rfd::FileDialog;
use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::Settings;
use crate::error::{Result, TrackerError};
use crate::storage::FileStore;
use crate::tracker::{Tracker, TrackerEvent};

const TOAST_DURATION: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToastKind {
    Success,
    Warning,
    Error,
}

impl ToastKind {
    fn color(self) -> egui::Color32 {
        match self {
            ToastKind::Success => egui::Color32::from_rgb(40, 167, 69),
            ToastKind::Warning => egui::Color32::from_rgb(255, 170, 0),
            ToastKind::Error => egui::Color32::from_rgb(220, 53, 69),
        }
    }
}

struct Toast {
    message: String,
    kind: ToastKind,
    start: Instant,
}

pub struct TrackerApp {
    tracker: Tracker<FileStore>,
    settings: Settings,
    settings_dirty: bool,
    file_name: Option<String>,
    plan_choice: String,
    can_start: bool,
    confirm_clear: bool,
    toast: Option<Toast>,
}

impl TrackerApp {
    pub fn new(settings: Settings) -> Self {
        let tracker = Tracker::open(
            FileStore::new(settings.resolve_data_dir()),
            settings.autosave_delay(),
        );
        log::info!("Using data directory {}", tracker.store().dir().display());
        let file_name = if tracker.plans().is_empty() {
            None
        } else {
            settings
                .last_file
                .as_deref()
                .and_then(|p| Path::new(p).file_name())
                .map(|f| f.to_string_lossy().to_string())
                .or_else(|| Some("saved plan".to_string()))
        };
        let mut app = Self {
            tracker,
            settings,
            settings_dirty: false,
            file_name,
            plan_choice: String::new(),
            can_start: false,
            confirm_clear: false,
            toast: None,
        };
        app.apply_events();
        app
    }

    fn notify(&mut self, kind: ToastKind, message: impl Into<String>) {
        self.toast = Some(Toast {
            message: message.into(),
            kind,
            start: Instant::now(),
        });
    }

    /// Show a failed action to the user. Nothing the tracker reports is fatal.
    fn report<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                log::error!("{e}");
                let kind = match e {
                    TrackerError::EmptyHistory => ToastKind::Warning,
                    _ => ToastKind::Error,
                };
                self.notify(kind, e.to_string());
                None
            }
        }
    }

    fn load_bytes(&mut self, name: &str, mime: Option<&str>, bytes: &[u8]) -> bool {
        let loaded = self.tracker.load_file(name, mime, bytes);
        if self.report(loaded).is_some() {
            self.file_name = Some(name.to_string());
            self.notify(ToastKind::Success, "Workout plan loaded successfully!");
            true
        } else {
            false
        }
    }

    fn load_path(&mut self, path: &Path) {
        let name = path
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        match std::fs::read(path) {
            Ok(bytes) => {
                if self.load_bytes(&name, None, &bytes) {
                    self.settings.last_file = Some(path.display().to_string());
                    self.settings_dirty = true;
                }
            }
            Err(e) => {
                log::error!("Failed to read {}: {e}", path.display());
                self.notify(ToastKind::Error, format!("Could not read {name}: {e}"));
            }
        }
    }

    fn handle_dropped_files(&mut self, ctx: &egui::Context) {
        let Some(file) = ctx.input(|i| i.raw.dropped_files.first().cloned()) else {
            return;
        };
        if let Some(path) = file.path.as_deref() {
            self.load_path(path);
        } else if let Some(bytes) = file.bytes {
            let mime = Some(file.mime.as_str()).filter(|m| !m.is_empty());
            self.load_bytes(&file.name, mime, &bytes);
        }
    }

    fn apply_events(&mut self) {
        for event in self.tracker.drain_events() {
            match event {
                TrackerEvent::PlanSetLoaded { plans } => {
                    log::info!("{} workouts available", plans.len());
                    self.plan_choice.clear();
                    self.can_start = false;
                }
                TrackerEvent::PlanSelected { name, can_start } => {
                    self.plan_choice = name;
                    self.can_start = can_start;
                }
                TrackerEvent::SessionStarted { plan } => log::info!("Workout {plan:?} in progress"),
                TrackerEvent::FieldChanged {
                    entry_id,
                    field,
                    value,
                } => log::debug!("Exercise {entry_id}: {field} = {value:?}"),
                TrackerEvent::SessionSaved => log::debug!("Workout progress saved"),
                TrackerEvent::SessionFinished { completed } => {
                    log::info!("Workout {:?} added to history", completed.name);
                    self.notify(ToastKind::Success, "Workout completed! 🎉");
                }
                TrackerEvent::HistoryChanged { len } => log::debug!("{len} workouts in history"),
                TrackerEvent::FileCleared => {
                    self.file_name = None;
                    self.plan_choice.clear();
                    self.can_start = false;
                }
            }
        }
    }

    fn upload_section(&mut self, ui: &mut egui::Ui) {
        ui.heading("Workout Plan");
        if let Some(name) = self.file_name.clone() {
            ui.horizontal(|ui| {
                ui.label(format!("📄 {name}"));
                if ui.button("Clear").clicked() {
                    let cleared = self.tracker.clear_file();
                    if self.report(cleared).is_some() {
                        self.notify(ToastKind::Success, "File cleared");
                    }
                }
            });
        } else {
            ui.horizontal(|ui| {
                ui.label("Drop a CSV or Excel file here, or");
                if ui.button("Choose file…").clicked() {
                    if let Some(path) = FileDialog::new()
                        .add_filter("Workout plan", &["csv", "xlsx", "xls"])
                        .pick_file()
                    {
                        self.load_path(&path);
                    }
                }
            });
        }
    }

    fn plan_section(&mut self, ui: &mut egui::Ui) {
        let mut choice = self.plan_choice.clone();
        let selected = if choice.is_empty() {
            "Choose a workout...".to_string()
        } else {
            choice.clone()
        };
        ui.horizontal(|ui| {
            egui::ComboBox::from_label("Workout")
                .selected_text(selected)
                .show_ui(ui, |ui| {
                    for plan in self.tracker.plans() {
                        ui.selectable_value(&mut choice, plan.name.clone(), plan.name.as_str());
                    }
                });
            if choice != self.plan_choice {
                self.tracker.select_plan(&choice);
            }
            if ui
                .add_enabled(self.can_start, egui::Button::new("Start Workout"))
                .clicked()
            {
                let started = self.tracker.start_workout(Utc::now());
                self.report(started);
            }
        });
    }

    fn session_section(&mut self, ui: &mut egui::Ui) {
        let Some(session) = self.tracker.session() else {
            return;
        };
        ui.heading(format!("Current Workout: {}", session.name));

        let mut edits: Vec<(usize, String, String)> = Vec::new();
        for entry in &session.exercises {
            ui.group(|ui| {
                ui.strong(format!("🏋 {}", entry.display_name()));
                egui::Grid::new(("fields", entry.id))
                    .num_columns(2)
                    .show(ui, |ui| {
                        for field in entry.input_fields() {
                            ui.label(field);
                            let mut value = session.value(entry.id, field).unwrap_or("").to_string();
                            let response = ui.add(
                                egui::TextEdit::singleline(&mut value).hint_text(entry.planned(field)),
                            );
                            if response.changed() {
                                edits.push((entry.id, field.to_string(), value));
                            }
                            ui.end_row();
                        }
                    });
            });
        }

        let mut save = false;
        let mut finish = false;
        ui.horizontal(|ui| {
            save = ui.button("Save Progress").clicked();
            finish = ui.button("Finish Workout").clicked();
        });

        let now = Instant::now();
        for (id, field, value) in edits {
            let recorded = self.tracker.record_field(id, &field, &value, now);
            self.report(recorded);
        }
        if save {
            let saved = self.tracker.save_session();
            if self.report(saved).is_some() {
                self.notify(ToastKind::Success, "Workout progress saved!");
            }
        }
        if finish {
            let finished = self.tracker.finish_workout(Utc::now());
            self.report(finished);
        }
    }

    fn history_section(&mut self, ui: &mut egui::Ui) {
        ui.heading("History");
        let mut export = false;
        let mut clear = false;
        ui.horizontal(|ui| {
            export = ui.button("Export CSV").clicked();
            clear = ui.button("Clear History").clicked();
        });

        let summaries = self.tracker.history().summaries();
        if summaries.is_empty() {
            ui.label("No workouts completed yet");
        } else {
            let row_height = ui.text_style_height(&egui::TextStyle::Body);
            egui_extras::TableBuilder::new(ui)
                .striped(true)
                .vscroll(false)
                .column(egui_extras::Column::auto())
                .column(egui_extras::Column::auto())
                .column(egui_extras::Column::remainder())
                .header(row_height, |mut header| {
                    header.col(|ui| {
                        ui.strong("Date");
                    });
                    header.col(|ui| {
                        ui.strong("Workout");
                    });
                    header.col(|ui| {
                        ui.strong("Progress");
                    });
                })
                .body(|mut body| {
                    for s in &summaries {
                        body.row(row_height, |mut row| {
                            row.col(|ui| {
                                ui.label(s.date.as_str());
                            });
                            row.col(|ui| {
                                ui.label(s.name.as_str());
                            });
                            row.col(|ui| {
                                ui.label(format!(
                                    "{}/{} exercises completed • {} minutes",
                                    s.recorded, s.total, s.minutes
                                ));
                            });
                        });
                    }
                });
        }

        if export {
            self.export_history();
        }
        if clear {
            self.confirm_clear = true;
        }
    }

    fn export_history(&mut self) {
        let exported = self.tracker.export_history(Local::now().date_naive());
        let Some((name, text)) = self.report(exported) else {
            return;
        };
        if let Some(path) = FileDialog::new()
            .set_file_name(name.as_str())
            .add_filter("CSV", &["csv"])
            .save_file()
        {
            match std::fs::write(&path, text) {
                Ok(()) => self.notify(ToastKind::Success, "Workout data exported!"),
                Err(e) => {
                    log::error!("Failed to export history: {e}");
                    self.notify(ToastKind::Error, format!("Export failed: {e}"));
                }
            }
        }
    }

    fn confirm_clear_window(&mut self, ctx: &egui::Context) {
        if !self.confirm_clear {
            return;
        }
        let mut open = true;
        let mut decision: Option<bool> = None;
        egui::Window::new("Clear history")
            .collapsible(false)
            .resizable(false)
            .open(&mut open)
            .show(ctx, |ui| {
                ui.label(
                    "Are you sure you want to clear all workout history? This cannot be undone.",
                );
                ui.horizontal(|ui| {
                    if ui.button("Clear").clicked() {
                        decision = Some(true);
                    }
                    if ui.button("Cancel").clicked() {
                        decision = Some(false);
                    }
                });
            });
        if !open {
            decision = Some(false);
        }
        if let Some(confirmed) = decision {
            self.confirm_clear = false;
            let cleared = self.tracker.clear_history(confirmed);
            if self.report(cleared) == Some(true) {
                self.notify(ToastKind::Success, "Workout history cleared");
            }
        }
    }

    fn show_toast(&mut self, ctx: &egui::Context) {
        let Some(toast) = &self.toast else {
            return;
        };
        let elapsed = toast.start.elapsed();
        if elapsed >= TOAST_DURATION {
            self.toast = None;
            return;
        }
        egui::Area::new(egui::Id::new("toast"))
            .anchor(egui::Align2::RIGHT_TOP, [-10.0, 10.0])
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.colored_label(toast.kind.color(), toast.message.as_str());
                });
            });
        ctx.request_repaint_after(TOAST_DURATION - elapsed);
    }
}

impl App for TrackerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut Frame) {
        self.handle_dropped_files(ctx);

        let now = Instant::now();
        let ticked = self.tracker.tick(now);
        self.report(ticked);
        if let Some(deadline) = self.tracker.autosave_deadline() {
            ctx.request_repaint_after(deadline.saturating_duration_since(now));
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                self.upload_section(ui);
                if !self.tracker.plans().is_empty() {
                    ui.separator();
                    self.plan_section(ui);
                }
                if self.tracker.session().is_some() {
                    ui.separator();
                    self.session_section(ui);
                }
                ui.separator();
                self.history_section(ui);
            });
        });

        self.confirm_clear_window(ctx);
        self.apply_events();
        self.show_toast(ctx);

        if self.settings_dirty {
            self.settings.save();
            self.settings_dirty = false;
        }
    }

    fn on_exit(&mut self, _gl: Option<&eframe::glow::Context>) {
        if self.tracker.session().is_some() {
            if let Err(e) = self.tracker.save_session() {
                log::error!("Failed to save workout on exit: {e}");
            }
        }
        self.settings.save();
    }
}
