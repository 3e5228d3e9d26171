//! Telemetry application: periodic emitters toggle their outputs and report
//! every toggle through the event queue to the console sink, while the
//! display collaborator owns the main context.

use anyhow::{Context, Result};
use log::warn;

use lbskit::adapters::display::ConsoleDisplay;
use lbskit::adapters::settings::SettingsAdapter;
use lbskit::app::events::AppKind;
use lbskit::app::ports::DisplayPort;
use lbskit::app::telemetry;
use lbskit::config::SystemConfig;
use lbskit::error::Error;
use lbskit::runtime;

fn main() -> Result<()> {
    runtime::init_logging()?;
    runtime::banner(AppKind::Telemetry);

    let config = match SettingsAdapter::new() {
        Ok(settings) => runtime::load_config(&settings),
        Err(e) => {
            warn!("settings unavailable ({}), using defaults", e);
            SystemConfig::default()
        }
    };

    // Contexts run for the life of the process; the handles are never joined.
    let _contexts = telemetry::start(&config)
        .map_err(Error::from)
        .context("starting telemetry pipeline")?;

    let mut display = ConsoleDisplay::new();
    display.init().context("display init")?;
    display.play()
}
