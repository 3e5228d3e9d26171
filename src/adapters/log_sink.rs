//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing application events to the console
//! logger (UART / USB-CDC on device, stderr on host). Telemetry lines are
//! the observable output of the telemetry application; link events are
//! already announced by the state machine, so they are logged here at
//! debug level only.

use core::fmt::Write;

use log::{Level, log};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;

/// Longest rendered line.
const LINE_CAP: usize = 96;

/// Adapter that logs every [`AppEvent`] to the serial console.
#[derive(Debug, Default)]
pub struct LogEventSink {
    emitted: u64,
}

impl LogEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events written so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }
}

/// Console text and level for one event.
pub fn render(event: &AppEvent) -> (Level, heapless::String<LINE_CAP>) {
    let mut line = heapless::String::new();
    // Truncation on overflow is acceptable for console output.
    let level = match event {
        AppEvent::Started(kind) => {
            let _ = write!(line, "START | {:?}", kind);
            Level::Info
        }
        AppEvent::Toggled(ev) => {
            let _ = write!(line, "Toggled led{}; counter={}", ev.source_id, ev.sequence);
            Level::Info
        }
        AppEvent::EventsLost { source_id, missed } => {
            let _ = write!(line, "led{}: {} events lost", source_id, missed);
            Level::Warn
        }
        AppEvent::LinkStateChanged { from, to } => {
            let _ = write!(line, "LINK | {:?} -> {:?}", from, to);
            Level::Debug
        }
        AppEvent::ConnectionFailed { err } => {
            let _ = write!(line, "LINK | connection failed (err {})", err);
            Level::Debug
        }
        AppEvent::Connected { peer } => {
            let _ = write!(line, "LINK | connected {}", peer);
            Level::Debug
        }
        AppEvent::Disconnected { peer, reason } => {
            let _ = write!(line, "LINK | disconnected {} (reason {})", peer, reason);
            Level::Debug
        }
        AppEvent::SecurityChanged { peer, level, err } => {
            let _ = match err {
                None => write!(line, "SEC | {} level {}", peer, level),
                Some(e) => write!(line, "SEC | {} level {} err {}", peer, level, e),
            };
            Level::Debug
        }
        AppEvent::PasskeyDisplay { peer, .. } => {
            let _ = write!(line, "SEC | {} passkey shown", peer);
            Level::Debug
        }
        AppEvent::PairingCancelled { peer } => {
            let _ = write!(line, "SEC | {} pairing cancelled", peer);
            Level::Debug
        }
        AppEvent::PairingComplete { peer, bonded } => {
            let _ = write!(line, "SEC | {} paired, bonded={}", peer, bonded);
            Level::Debug
        }
        AppEvent::PairingFailed { peer, reason } => {
            let _ = write!(line, "SEC | {} pairing failed, reason {}", peer, reason);
            Level::Debug
        }
    };
    (level, line)
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        let (level, line) = render(event);
        log!(level, "{}", line);
        self.emitted += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::link::{DisconnectReason, PeerAddr};

    #[test]
    fn toggle_line_matches_console_format() {
        let (level, line) = render(&AppEvent::Toggled(Event {
            source_id: 1,
            sequence: 42,
        }));
        assert_eq!(level, Level::Info);
        assert_eq!(line.as_str(), "Toggled led1; counter=42");
    }

    #[test]
    fn losses_are_warnings() {
        let (level, line) = render(&AppEvent::EventsLost {
            source_id: 0,
            missed: 3,
        });
        assert_eq!(level, Level::Warn);
        assert_eq!(line.as_str(), "led0: 3 events lost");
    }

    #[test]
    fn link_events_stay_at_debug() {
        let (level, line) = render(&AppEvent::Disconnected {
            peer: PeerAddr([1, 2, 3, 4, 5, 6]),
            reason: DisconnectReason::REMOTE_USER_TERMINATED,
        });
        assert_eq!(level, Level::Debug);
        assert!(line.contains("01:02:03:04:05:06"));
    }

    #[test]
    fn counts_emitted_events() {
        let mut sink = LogEventSink::new();
        sink.emit(&AppEvent::Started(crate::app::events::AppKind::Telemetry));
        sink.emit(&AppEvent::ConnectionFailed { err: 2 });
        assert_eq!(sink.emitted(), 2);
    }
}
