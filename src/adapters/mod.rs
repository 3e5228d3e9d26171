//! Adapters — concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements            | Connects to                  |
//! |----------------|-----------------------|------------------------------|
//! | `ble`          | RadioStack            | Bluedroid GAP/GATTS          |
//! | `display`      | DisplayPort           | Console heartbeat            |
//! | `log_sink`     | EventSink             | Serial log output            |
//! | `settings`     | SettingsPort          | NVS / in-memory store        |
//! | `stack_events` | (dispatch)            | Radio callbacks → domain     |
//! | `sim_central`  | (host only)           | Scripted remote peer         |

pub mod ble;
pub mod display;
pub mod log_sink;
pub mod settings;
#[cfg(not(target_os = "espidf"))]
pub mod sim_central;
pub mod stack_events;
