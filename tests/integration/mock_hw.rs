//! Recording adapters for integration tests.
//!
//! Every adapter here keeps its record behind an `Arc` so the test can hold
//! one handle while the application owns another.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lbskit::app::events::AppEvent;
use lbskit::app::ports::{BondRecord, BondTable, EventSink, SettingsError, SettingsPort};
use lbskit::config::SystemConfig;
use lbskit::drivers::gpio::SimOutputPin;
use lbskit::pins;

// ── Event sink ────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct RecordingSink {
    events: Arc<Mutex<Vec<AppEvent>>>,
}

#[allow(dead_code)]
impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AppEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Poll until `pred` holds for the recorded events or `timeout` passes.
    pub fn wait_for(&self, timeout: Duration, pred: impl Fn(&[AppEvent]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if pred(&self.events.lock().unwrap()) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        pred(&self.events.lock().unwrap())
    }
}

impl EventSink for RecordingSink {
    fn emit(&mut self, event: &AppEvent) {
        self.events.lock().unwrap().push(*event);
    }
}

// ── Settings ──────────────────────────────────────────────────

#[derive(Default)]
struct SettingsState {
    config: Option<SystemConfig>,
    bonds: BondTable,
    fail_loads: bool,
}

/// In-memory settings with an injectable load failure.
#[derive(Clone, Default)]
pub struct MockSettings {
    state: Arc<Mutex<SettingsState>>,
}

#[allow(dead_code)]
impl MockSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_loads() -> Self {
        let s = Self::default();
        s.state.lock().unwrap().fail_loads = true;
        s
    }

    pub fn with_bonds(bonds: &[BondRecord]) -> Self {
        let s = Self::default();
        s.state.lock().unwrap().bonds = BondTable::from_slice(bonds).unwrap();
        s
    }

    pub fn bonds(&self) -> BondTable {
        self.state.lock().unwrap().bonds.clone()
    }
}

impl SettingsPort for MockSettings {
    fn load_config(&self) -> Result<SystemConfig, SettingsError> {
        let state = self.state.lock().unwrap();
        if state.fail_loads {
            return Err(SettingsError::Backend(-1));
        }
        Ok(state.config.clone().unwrap_or_default())
    }

    fn save_config(&mut self, config: &SystemConfig) -> Result<(), SettingsError> {
        config.validate()?;
        self.state.lock().unwrap().config = Some(config.clone());
        Ok(())
    }

    fn load_bonds(&self) -> Result<BondTable, SettingsError> {
        let state = self.state.lock().unwrap();
        if state.fail_loads {
            return Err(SettingsError::Backend(-1));
        }
        Ok(state.bonds.clone())
    }

    fn store_bond(&mut self, bond: &BondRecord) -> Result<(), SettingsError> {
        let mut state = self.state.lock().unwrap();
        state.bonds.retain(|b| b.peer != bond.peer);
        if state.bonds.is_full() {
            state.bonds.remove(0);
        }
        let _ = state.bonds.push(*bond);
        Ok(())
    }

    fn clear_bonds(&mut self) -> Result<(), SettingsError> {
        self.state.lock().unwrap().bonds.clear();
        Ok(())
    }
}

// ── Board outputs ─────────────────────────────────────────────

/// Handles onto the five peripheral outputs. Clones share pin state.
#[derive(Clone)]
pub struct BoardPins {
    pub test_io: SimOutputPin,
    pub run_status: SimOutputPin,
    pub con_status: SimOutputPin,
    pub user_led_0: SimOutputPin,
    pub user_led_1: SimOutputPin,
}

#[allow(dead_code)]
impl BoardPins {
    pub fn new() -> Self {
        Self {
            test_io: SimOutputPin::new(pins::GPIO_PORT, pins::TEST_IO_GPIO),
            run_status: SimOutputPin::new(pins::GPIO_PORT, pins::RUN_STATUS_LED_GPIO),
            con_status: SimOutputPin::new(pins::GPIO_PORT, pins::CON_STATUS_LED_GPIO),
            user_led_0: SimOutputPin::new(pins::GPIO_PORT, pins::USER_LED_0_GPIO),
            user_led_1: SimOutputPin::new(pins::GPIO_PORT, pins::USER_LED_1_GPIO),
        }
    }

    pub fn outputs(&self) -> lbskit::app::peripheral::PeripheralOutputs<SimOutputPin> {
        lbskit::app::peripheral::PeripheralOutputs {
            test_io: self.test_io.clone(),
            run_status: self.run_status.clone(),
            con_status: self.con_status.clone(),
            user_led_0: self.user_led_0.clone(),
            user_led_1: self.user_led_1.clone(),
        }
    }

    pub fn all(&self) -> [&SimOutputPin; 5] {
        [
            &self.test_io,
            &self.run_status,
            &self.con_status,
            &self.user_led_0,
            &self.user_led_1,
        ]
    }
}
