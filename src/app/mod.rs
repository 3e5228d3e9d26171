//! Application core.
//!
//! Port traits and observable events shared by both applications, plus the
//! composition roots that wire domain modules to adapters:
//! [`telemetry`] (emitters → queue → sink, then the display loop) and
//! [`peripheral`] (connection state machine, attribute bridge, idle loop).

pub mod events;
pub mod peripheral;
pub mod ports;
pub mod telemetry;
