//! Connection state machine for the single-peer peripheral role.
//!
//! ```text
//!                 connect_accepted
//!   ┌─────────────┐ ──────────────▶ ┌───────────────────────────────────┐
//!   │ Advertising │                 │ Connected                         │
//!   │  (initial)  │ ◀────────────── │  Unauthenticated ─▶ Pairing ─▶ Paired
//!   └─────────────┘  disconnect     │        ▲               │          │
//!                                   │        └─── cancel ────┘          │
//!                                   └───────────────────────────────────┘
//! ```
//!
//! - [`fsm`]: the table engine.
//! - [`states`]: per-state handlers and the table.
//! - [`manager`]: the owning context, capability trait impls, and the
//!   published [`LinkStatus`] snapshot.
//!
//! The security sub-state lives inside [`Connection`], so it only exists
//! while connected and is discarded with the connection record.

pub mod fsm;
pub mod manager;
pub mod states;

use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

pub use manager::ConnectionManager;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Top-level link state. Must stay in sync with [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LinkState {
    Advertising = 0,
    Connected = 1,
}

impl LinkState {
    /// Total number of states, used to size the table array.
    pub const COUNT: usize = 2;

    /// Convert an index back to `LinkState`. Out-of-range indices fall back
    /// to `Advertising` (release) after a debug assertion.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::Advertising,
            1 => Self::Connected,
            _ => {
                debug_assert!(false, "invalid link state index: {idx}");
                Self::Advertising
            }
        }
    }
}

/// Security sub-state of a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SecurityState {
    #[default]
    Unauthenticated,
    Pairing,
    Paired,
}

/// Link security level, ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum SecurityLevel {
    /// No encryption.
    #[default]
    L1 = 1,
    /// Encryption, unauthenticated pairing.
    L2 = 2,
    /// Encryption, authenticated (passkey) pairing.
    L3 = 3,
    /// Authenticated LE Secure Connections.
    L4 = 4,
}

impl SecurityLevel {
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 | 1 => Self::L1,
            2 => Self::L2,
            3 => Self::L3,
            _ => Self::L4,
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// Bluetooth device address of the peer, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct PeerAddr(pub [u8; 6]);

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )
    }
}

/// HCI disconnect reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DisconnectReason(pub u8);

impl DisconnectReason {
    pub const CONNECTION_TIMEOUT: Self = Self(0x08);
    pub const REMOTE_USER_TERMINATED: Self = Self(0x13);
    pub const REMOTE_LOW_RESOURCES: Self = Self(0x14);
    pub const REMOTE_POWER_OFF: Self = Self(0x15);
    pub const LOCAL_HOST_TERMINATED: Self = Self(0x16);
    pub const AUTH_FAILURE: Self = Self(0x05);

    /// Whether the peer ended the link.
    pub fn is_peer_initiated(self) -> bool {
        matches!(self.0, 0x13..=0x15)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Connection record
// ---------------------------------------------------------------------------

/// The zero-or-one active link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub handle: u16,
    pub peer: PeerAddr,
    pub security: SecurityState,
    pub security_level: SecurityLevel,
    pub bonded: bool,
    /// Passkey shown for the pairing in progress.
    pub passkey: Option<u32>,
}

impl Connection {
    pub fn new(handle: u16, peer: PeerAddr) -> Self {
        Self {
            handle,
            peer,
            security: SecurityState::Unauthenticated,
            security_level: SecurityLevel::L1,
            bonded: false,
            passkey: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Events and rejections
// ---------------------------------------------------------------------------

/// Input alphabet of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    ConnectAccepted { handle: u16, peer: PeerAddr },
    Disconnected { reason: DisconnectReason },
    SecurityRequest,
    PasskeyDisplay(u32),
    PasskeyConfirm,
    PairingCancel,
    SecurityChanged { level: SecurityLevel, err: Option<u8> },
    PairingComplete { bonded: bool },
    PairingFailed { reason: u8 },
}

impl LinkEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectAccepted { .. } => "connect_accepted",
            Self::Disconnected { .. } => "disconnect",
            Self::SecurityRequest => "security_request",
            Self::PasskeyDisplay(_) => "passkey_display",
            Self::PasskeyConfirm => "passkey_confirm",
            Self::PairingCancel => "cancel",
            Self::SecurityChanged { .. } => "security_changed",
            Self::PairingComplete { .. } => "pairing_complete",
            Self::PairingFailed { .. } => "pairing_failed",
        }
    }

    /// Events that only exist when authorization callbacks are registered.
    pub fn requires_security(&self) -> bool {
        matches!(
            self,
            Self::SecurityRequest
                | Self::PasskeyDisplay(_)
                | Self::PasskeyConfirm
                | Self::PairingCancel
                | Self::PairingComplete { .. }
                | Self::PairingFailed { .. }
        )
    }
}

/// Why an event was not applied. These are transient protocol conditions:
/// logged and dropped, never escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// A second peer tried to connect.
    AlreadyConnected,
    /// The event needs a live connection.
    NotConnected,
    /// Security is disabled by configuration.
    SecurityDisabled,
    /// Confirm/cancel outside an active pairing.
    NotPairing,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyConnected => write!(f, "a peer is already connected"),
            Self::NotConnected => write!(f, "no peer connected"),
            Self::SecurityDisabled => write!(f, "security is disabled"),
            Self::NotPairing => write!(f, "no pairing in progress"),
        }
    }
}

// ---------------------------------------------------------------------------
// Published status
// ---------------------------------------------------------------------------

/// Lock-free view of the link for contexts that must not take the
/// manager's lock (notify path, attribute callbacks).
///
/// Single writer per field: the [`ConnectionManager`] writes `connected`,
/// `conn_handle` and `epoch`; the GATT layer writes `subscribed_epoch` on CCC
/// writes. A subscription is only honoured for the epoch it was made in, so
/// it lapses when the connection does.
#[derive(Debug, Default)]
pub struct LinkStatus {
    connected: AtomicBool,
    conn_handle: AtomicU16,
    epoch: AtomicU32,
    subscribed_epoch: AtomicU32,
}

impl LinkStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Handle of the live connection.
    pub fn conn_handle(&self) -> Option<u16> {
        if self.is_connected() {
            Some(self.conn_handle.load(Ordering::Acquire))
        } else {
            None
        }
    }

    /// Whether the current peer enabled button notifications.
    pub fn is_subscribed(&self) -> bool {
        self.is_connected()
            && self.subscribed_epoch.load(Ordering::Acquire) == self.epoch.load(Ordering::Acquire)
    }

    /// Record a CCC write from the current peer.
    pub fn set_subscribed(&self, enabled: bool) {
        let value = if enabled {
            self.epoch.load(Ordering::Acquire)
        } else {
            0
        };
        self.subscribed_epoch.store(value, Ordering::Release);
    }

    pub(crate) fn publish_connected(&self, handle: u16) {
        // Epoch 0 is reserved for "never subscribed".
        let next = self.epoch.load(Ordering::Relaxed).wrapping_add(1).max(1);
        self.epoch.store(next, Ordering::Release);
        self.conn_handle.store(handle, Ordering::Release);
        self.connected.store(true, Ordering::Release);
    }

    pub(crate) fn publish_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_addr_formats_as_colon_hex() {
        let addr = PeerAddr([0xC0, 0xFF, 0xEE, 0x00, 0x0A, 0x01]);
        assert_eq!(addr.to_string(), "C0:FF:EE:00:0A:01");
    }

    #[test]
    fn link_state_from_index_roundtrip() {
        for i in 0..LinkState::COUNT {
            assert_eq!(LinkState::from_index(i) as usize, i);
        }
    }

    #[test]
    fn security_levels_are_ordered() {
        assert!(SecurityLevel::L1 < SecurityLevel::L2);
        assert!(SecurityLevel::L3 < SecurityLevel::L4);
        assert_eq!(SecurityLevel::from_u8(3), SecurityLevel::L3);
        assert_eq!(SecurityLevel::from_u8(0), SecurityLevel::L1);
    }

    #[test]
    fn peer_initiated_reasons() {
        assert!(DisconnectReason::REMOTE_USER_TERMINATED.is_peer_initiated());
        assert!(!DisconnectReason::LOCAL_HOST_TERMINATED.is_peer_initiated());
        assert!(!DisconnectReason::CONNECTION_TIMEOUT.is_peer_initiated());
    }

    #[test]
    fn subscription_lapses_with_connection() {
        let status = LinkStatus::new();
        assert!(!status.is_subscribed());

        status.publish_connected(1);
        status.set_subscribed(true);
        assert!(status.is_subscribed());
        assert_eq!(status.conn_handle(), Some(1));

        status.publish_disconnected();
        assert!(!status.is_subscribed());
        assert_eq!(status.conn_handle(), None);

        status.publish_connected(1);
        assert!(!status.is_subscribed(), "old CCC must not carry over");
    }
}
