//! Port traits: the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Radio callbacks ──▶ capability traits ──▶ ConnectionManager / AttributeBridge
//!   Domain          ──▶ driven ports      ──▶ GPIO, radio, settings, log
//! ```
//!
//! Two kinds of traits live here:
//!
//! - **Capabilities** (`ConnectionCallbacks`, `PairingCallbacks`,
//!   `AttributeCallbacks`, `ButtonInput`) are what the radio stack and the
//!   input interrupt call into. They take `&self` because the caller's
//!   execution context is not ours; implementations synchronise internally.
//!   Each application injects one concrete implementation per role.
//! - **Driven ports** (`OutputLine`, `RadioStack`, `Notifier`, `LinkPorts`,
//!   `SettingsPort`, `DisplayPort`, `EventSink`) are what the domain calls out
//!   through.
//!
//! Everything is dispatched statically through generics.

use core::fmt;

use embedded_hal::digital::{OutputPin, PinState};
use log::warn;

use crate::config::SystemConfig;
use crate::error::BleError;
use crate::gatt::LbsAttribute;
use crate::link::{DisconnectReason, PeerAddr, SecurityLevel};

// ───────────────────────────────────────────────────────────────
// Digital outputs
// ───────────────────────────────────────────────────────────────

/// A status LED or test pin: an embedded-hal output plus the readiness and
/// configuration steps a devicetree-style GPIO spec carries.
pub trait OutputLine: OutputPin + Send {
    /// Name of the GPIO controller, for diagnostics.
    fn port_name(&self) -> &'static str;

    /// Pin number on that controller.
    fn pin(&self) -> u32;

    /// Whether the controller driver finished initialising.
    fn is_ready(&self) -> bool;

    /// Configure the pin as an output, initially inactive.
    /// Returns the driver's error code on rejection.
    fn configure_output(&mut self) -> Result<(), i32>;

    /// Drive the line, logging (not propagating) a driver failure.
    fn drive(&mut self, high: bool) {
        if let Err(e) = self.set_state(PinState::from(high)) {
            warn!("{} pin {}: write failed ({:?})", self.port_name(), self.pin(), e);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The domain emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port. Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Capabilities (radio stack → domain)
// ───────────────────────────────────────────────────────────────

/// Connection lifecycle callbacks.
pub trait ConnectionCallbacks: Send + Sync {
    /// The stack finished a connection attempt. `err` is the HCI status of a
    /// failed attempt.
    fn connected(&self, handle: u16, peer: PeerAddr, err: Option<u8>);

    fn disconnected(&self, handle: u16, reason: DisconnectReason);

    /// Link encryption changed. `err` carries the security error code when
    /// the change failed.
    fn security_changed(&self, level: SecurityLevel, err: Option<u8>);
}

/// Pairing callbacks. Only registered when security is enabled.
pub trait PairingCallbacks: Send + Sync {
    /// The peer asked to raise link security.
    fn security_request(&self);

    /// Show `passkey` to the operator.
    fn passkey_display(&self, passkey: u32);

    /// The operator accepted the displayed passkey.
    fn passkey_confirm(&self);

    /// Pairing was cancelled by the operator or the peer.
    fn cancel(&self);

    fn pairing_complete(&self, bonded: bool);

    fn pairing_failed(&self, reason: u8);
}

/// Attribute access callbacks of the LED-Button service.
pub trait AttributeCallbacks: Send + Sync {
    /// The peer wrote the LED attribute. The output must reflect `on`
    /// before this returns.
    fn led_written(&self, on: bool);

    /// Current value of the button attribute.
    fn read_button(&self) -> bool;

    /// Current value of the LED attribute.
    fn read_led(&self) -> bool;
}

/// Input-change callback of the button driver.
pub trait ButtonInput: Send + Sync {
    /// `button_state` holds the pressed mask, `has_changed` the bits that
    /// changed since the previous call.
    fn button_changed(&self, button_state: u32, has_changed: u32);
}

// ───────────────────────────────────────────────────────────────
// Radio (driven adapter: domain → BLE stack)
// ───────────────────────────────────────────────────────────────

/// The wireless peripheral role. Cheap to clone; clones share the stack.
pub trait RadioStack: Clone + Send + Sync + 'static {
    fn register_auth_callbacks(&self) -> Result<(), BleError>;

    fn register_auth_info_callbacks(&self) -> Result<(), BleError>;

    /// Bring up controller and host.
    fn enable(&self) -> Result<(), BleError>;

    /// Register the LED-Button service.
    fn init_service(&self) -> Result<(), BleError>;

    /// Start connectable advertising.
    fn start_advertising(&self) -> Result<(), BleError>;

    /// Update an attribute's stored value (what a later read returns).
    fn set_value(&self, attr: LbsAttribute, value: &[u8]);

    /// Push `value` to the peer on `conn_handle`.
    fn notify(&self, conn_handle: u16, attr: LbsAttribute, value: &[u8]) -> Result<(), BleError>;

    /// Answer the pending numeric-comparison request. No-op when nothing
    /// is pending (the peer already gave up, or the passkey was display-only).
    fn pairing_reply(&self, accept: bool) -> Result<(), BleError>;

    /// Hand bonds from the settings store to the stack. Returns how many the
    /// stack holds keys for; the rest must pair again.
    fn restore_bonds(&self, bonds: &[BondRecord]) -> usize;
}

/// Outbound button notifications.
pub trait Notifier: Send + Sync {
    fn notify_button(&self, pressed: bool) -> Result<(), BleError>;
}

/// Everything the connection state machine drives as a side effect.
pub trait LinkPorts: Send {
    fn set_link_indicator(&mut self, on: bool);

    fn start_advertising(&mut self) -> Result<(), BleError>;

    /// Forward the operator's confirm (`true`) or cancel to the stack.
    fn answer_pairing(&mut self, accept: bool);

    fn persist_bond(&mut self, bond: &BondRecord);

    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Settings port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Maximum number of bonded peers kept in the settings store.
pub const MAX_BONDS: usize = 4;

/// A persisted pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BondRecord {
    pub peer: PeerAddr,
    pub level: SecurityLevel,
}

pub type BondTable = heapless::Vec<BondRecord, MAX_BONDS>;

/// Persisted configuration and bonds.
///
/// Loading is "load or no-op": a missing entry is not an error for the
/// caller to escalate, it means defaults.
pub trait SettingsPort: Send {
    /// Stored configuration, or defaults if none is stored.
    fn load_config(&self) -> Result<SystemConfig, SettingsError>;

    /// Validate and persist configuration.
    fn save_config(&mut self, config: &SystemConfig) -> Result<(), SettingsError>;

    /// All stored bonds, oldest first.
    fn load_bonds(&self) -> Result<BondTable, SettingsError>;

    /// Insert or replace the bond for `bond.peer`. A full table evicts the
    /// oldest entry.
    fn store_bond(&mut self, bond: &BondRecord) -> Result<(), SettingsError>;

    fn clear_bonds(&mut self) -> Result<(), SettingsError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsError {
    NotFound,
    /// Backend error code (NVS `esp_err_t` on device).
    Backend(i32),
    Serialization,
    ValidationFailed(&'static str),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Backend(rc) => write!(f, "storage backend error {rc}"),
            Self::Serialization => write!(f, "serialization failed"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Display collaborator
// ───────────────────────────────────────────────────────────────

/// Opaque display subsystem: set up once, then run forever.
pub trait DisplayPort {
    /// Idempotent setup.
    fn init(&mut self) -> crate::error::Result<()>;

    /// Blocking entry point; becomes the caller's main loop.
    fn play(&mut self) -> !;
}
