//! System configuration parameters
//!
//! All tunable parameters for both applications. Defaults reproduce the
//! reference board behaviour; values can be overridden from the settings
//! store (postcard blob) or, on host builds, from a JSON file.

use serde::{Deserialize, Serialize};

use crate::app::ports::SettingsError;
use crate::events::OverflowPolicy;

/// Maximum number of periodic emitters a configuration can describe.
pub const MAX_EMITTERS: usize = 4;

/// One periodic emitter: which source id it reports and how often it ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitterConfig {
    pub source_id: u8,
    pub period_ms: u32,
}

/// Core system configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    // --- Radio ---
    /// Advertised complete local name
    pub device_name: heapless::String<24>,
    /// Register authorization callbacks and run the pairing sub-machine
    pub security_enabled: bool,

    // --- Telemetry ---
    /// Periodic emitters, one execution context each
    pub emitters: heapless::Vec<EmitterConfig, MAX_EMITTERS>,
    /// What an emitter does when the telemetry queue is full
    pub queue_policy: OverflowPolicy,

    // --- Timing ---
    /// Idle loop toggle interval for the run-status LED and test pin (ms)
    pub idle_blink_ms: u32,
    /// Button scan interval in the dispatcher context (ms)
    pub button_scan_ms: u32,
    /// A raw button level must be stable this long before it is reported (ms)
    pub button_debounce_ms: u32,

    // --- Execution contexts ---
    /// Priority of emitter and sink contexts
    pub context_priority: u8,
    /// Stack size of spawned contexts (KiB)
    pub context_stack_kb: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        let mut device_name = heapless::String::new();
        let _ = device_name.push_str("lbskit");

        let mut emitters = heapless::Vec::new();
        let _ = emitters.push(EmitterConfig {
            source_id: 0,
            period_ms: 100,
        });
        let _ = emitters.push(EmitterConfig {
            source_id: 1,
            period_ms: 1000,
        });

        Self {
            device_name,
            security_enabled: true,

            emitters,
            queue_policy: OverflowPolicy::RejectAndCount,

            idle_blink_ms: 1000,
            button_scan_ms: 10,
            button_debounce_ms: 20,

            context_priority: 7,
            context_stack_kb: 8,
        }
    }
}

impl SystemConfig {
    /// Parse a JSON document; missing fields are an error, not defaulted.
    pub fn from_json(raw: &[u8]) -> Result<Self, SettingsError> {
        serde_json::from_slice(raw).map_err(|_| SettingsError::Serialization)
    }

    /// Reject values that would leave a context spinning or misattribute
    /// telemetry. Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.device_name.is_empty() {
            return Err(SettingsError::ValidationFailed("device_name must not be empty"));
        }
        if self.emitters.iter().any(|e| e.period_ms == 0) {
            return Err(SettingsError::ValidationFailed("emitter period_ms must be > 0"));
        }
        // Source ids index the emitter pin and context name tables.
        if self
            .emitters
            .iter()
            .any(|e| usize::from(e.source_id) >= MAX_EMITTERS)
        {
            return Err(SettingsError::ValidationFailed("emitter source_id must be < 4"));
        }
        for (i, a) in self.emitters.iter().enumerate() {
            if self.emitters[i + 1..]
                .iter()
                .any(|b| b.source_id == a.source_id)
            {
                return Err(SettingsError::ValidationFailed("emitter source_id must be unique"));
            }
        }
        if self.idle_blink_ms == 0 {
            return Err(SettingsError::ValidationFailed("idle_blink_ms must be > 0"));
        }
        if self.button_scan_ms == 0 {
            return Err(SettingsError::ValidationFailed("button_scan_ms must be > 0"));
        }
        if !(2..=64).contains(&self.context_stack_kb) {
            return Err(SettingsError::ValidationFailed("context_stack_kb must be 2-64"));
        }
        Ok(())
    }
}
