//! Process bootstrap shared by both applications: logger backend and
//! configuration.

use log::{info, warn};

use crate::app::events::AppKind;
use crate::app::ports::{SettingsError, SettingsPort};
use crate::config::SystemConfig;

/// Host only: path of a JSON configuration overriding the stored one.
pub const CONFIG_ENV: &str = "LBSKIT_CONFIG";

/// Install the log backend. Call once, first thing in `main`.
#[cfg(target_os = "espidf")]
pub fn init_logging() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;
    Ok(())
}

/// Install the log backend. `RUST_LOG` overrides the default `info` filter.
#[cfg(not(target_os = "espidf"))]
pub fn init_logging() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .try_init()?;
    Ok(())
}

pub fn banner(kind: AppKind) {
    info!("LBSKit {} v{}", match kind {
        AppKind::Telemetry => "telemetry",
        AppKind::Peripheral => "peripheral",
    }, env!("CARGO_PKG_VERSION"));
}

/// Read and validate a JSON configuration file.
pub fn config_from_file(path: &str) -> Result<SystemConfig, SettingsError> {
    let raw = std::fs::read(path).map_err(|_| SettingsError::NotFound)?;
    let config = SystemConfig::from_json(&raw)?;
    config.validate()?;
    Ok(config)
}

/// Effective configuration: the `LBSKIT_CONFIG` file on host if set, else
/// the settings store, else defaults. Never fails; every fallback is logged.
pub fn load_config<S: SettingsPort>(settings: &S) -> SystemConfig {
    #[cfg(not(target_os = "espidf"))]
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        match config_from_file(&path) {
            Ok(config) => {
                info!("config: loaded from {}", path);
                return config;
            }
            Err(e) => warn!("config: {} unusable ({}), trying settings store", path, e),
        }
    }

    match settings.load_config() {
        Ok(config) => config,
        Err(e) => {
            warn!("config: settings load failed ({}), using defaults", e);
            SystemConfig::default()
        }
    }
}
