//! LBSKit firmware library.
//!
//! Two applications share this crate: a multi-context telemetry pipeline
//! (`bin/telemetry`) and an LED-Button Service peripheral
//! (`bin/peripheral`). All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each adapter, so the whole crate
//! builds and tests on a workstation.

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod bridge;
pub mod config;
pub mod drivers;
pub mod error;
pub mod events;
pub mod gatt;
pub mod link;
pub mod pins;
pub mod runtime;
pub mod telemetry;
