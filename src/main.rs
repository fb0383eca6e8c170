//! Workout tracker: load a plan spreadsheet, record a session, keep history.

use eframe::NativeOptions;

mod app;
use app::TrackerApp;
mod config;
use config::Settings;
mod error;
mod history;
mod plan;
mod session;
mod storage;
mod tabular;
mod tracker;

fn main() -> eframe::Result<()> {
    env_logger::init();
    let settings = Settings::load();
    let options = NativeOptions::default();
    eframe::run_native(
        "Workout Tracker",
        options,
        Box::new(move |_cc| Box::new(TrackerApp::new(settings))),
    )
}
