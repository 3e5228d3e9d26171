//! Unified error types for the LBSKit firmware.
//!
//! A single `Error` enum that every subsystem converts into, so the two
//! application entry points handle startup failures uniformly. All variants
//! are `Copy` so they pass through callback contexts without allocation.
//!
//! Settings failures live next to their port ([`SettingsError`]) and
//! rejected link events next to the state machine
//! ([`LinkError`](crate::link::LinkError)); both convert into `Error`.

use core::fmt;

use crate::app::ports::SettingsError;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible startup operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A device, pin, or execution context could not be brought up.
    Init(InitError),
    /// The radio stack or the LED-Button service failed.
    Ble(BleError),
    /// Persisted settings could not be read, written, or validated.
    Settings(SettingsError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init(e) => write!(f, "init: {e}"),
            Self::Ble(e) => write!(f, "ble: {e}"),
            Self::Settings(e) => write!(f, "settings: {e}"),
        }
    }
}

impl core::error::Error for Error {}

// ---------------------------------------------------------------------------
// Initialisation faults
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitError {
    /// The GPIO controller behind an output is not ready.
    DeviceNotReady { port: &'static str },
    /// The pin rejected its output configuration.
    PinConfigure { pin: u32, id: u8, rc: i32 },
    /// Button input or its interrupt could not be set up.
    Button(i32),
    /// An execution context could not be spawned.
    Thread(&'static str),
    /// The display collaborator refused to initialise.
    Display(&'static str),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeviceNotReady { port } => write!(f, "{port} device is not ready"),
            Self::PinConfigure { pin, id, rc } => {
                write!(f, "error {rc}: failed to configure pin {pin} (LED '{id}')")
            }
            Self::Button(rc) => write!(f, "cannot init buttons (err: {rc})"),
            Self::Thread(name) => write!(f, "cannot spawn context '{name}'"),
            Self::Display(msg) => write!(f, "display: {msg}"),
        }
    }
}

impl From<InitError> for Error {
    fn from(e: InitError) -> Self {
        Self::Init(e)
    }
}

// ---------------------------------------------------------------------------
// Radio stack errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleError {
    /// Authorization (passkey/cancel) callbacks rejected.
    AuthRegister(i32),
    /// Authorization-info (pairing outcome) callbacks rejected.
    AuthInfoRegister(i32),
    /// Controller or host stack failed to enable.
    StackEnable(i32),
    /// The LED-Button service could not be registered.
    ServiceInit(i32),
    /// Advertising could not be started.
    AdvertisingStart(i32),
    /// The stack refused a notification.
    Notify(i32),
    /// The stack refused the answer to a numeric comparison.
    PairingReply(i32),
    /// No peer is connected.
    NotConnected,
    /// The peer has not enabled notifications on the button attribute.
    NotSubscribed,
}

impl fmt::Display for BleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AuthRegister(rc) => {
                write!(f, "failed to register authorization callbacks (err {rc})")
            }
            Self::AuthInfoRegister(rc) => {
                write!(f, "failed to register authorization info callbacks (err {rc})")
            }
            Self::StackEnable(rc) => write!(f, "Bluetooth init failed (err {rc})"),
            Self::ServiceInit(rc) => write!(f, "failed to init LBS (err:{rc})"),
            Self::AdvertisingStart(rc) => write!(f, "advertising failed to start (err {rc})"),
            Self::Notify(rc) => write!(f, "notification failed (err {rc})"),
            Self::PairingReply(rc) => write!(f, "pairing reply failed (err {rc})"),
            Self::NotConnected => write!(f, "no connected peer"),
            Self::NotSubscribed => write!(f, "peer not subscribed"),
        }
    }
}

impl From<BleError> for Error {
    fn from(e: BleError) -> Self {
        Self::Ble(e)
    }
}

impl From<SettingsError> for Error {
    fn from(e: SettingsError) -> Self {
        Self::Settings(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
