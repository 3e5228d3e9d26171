//! Telemetry pipeline: periodic emitters feeding one sink through the
//! event queue.

pub mod emitter;
pub mod sink;

pub use emitter::{Emitter, EmitterSpec, spawn_emitter};
pub use sink::{TelemetrySink, spawn_sink};
