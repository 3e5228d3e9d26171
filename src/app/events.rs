//! Observable application events.
//!
//! The domain emits these through [`EventSink`](super::ports::EventSink);
//! nothing in the domain depends on how they are rendered.

use crate::events::Event;
use crate::link::{DisconnectReason, LinkState, PeerAddr, SecurityLevel};

/// Which of the two applications is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppKind {
    Telemetry,
    Peripheral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEvent {
    Started(AppKind),

    // ── Telemetry ──
    /// The sink consumed one event.
    Toggled(Event),
    /// A source's sequence skipped; `missed` events never reached the sink.
    EventsLost { source_id: u8, missed: u32 },

    // ── Connection ──
    LinkStateChanged { from: LinkState, to: LinkState },
    ConnectionFailed { err: u8 },
    Connected { peer: PeerAddr },
    Disconnected { peer: PeerAddr, reason: DisconnectReason },
    SecurityChanged { peer: PeerAddr, level: SecurityLevel, err: Option<u8> },

    // ── Pairing ──
    PasskeyDisplay { peer: PeerAddr, passkey: u32 },
    PairingCancelled { peer: PeerAddr },
    PairingComplete { peer: PeerAddr, bonded: bool },
    PairingFailed { peer: PeerAddr, reason: u8 },
}
