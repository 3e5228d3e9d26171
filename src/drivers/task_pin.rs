//! Core-pinned execution contexts.
//!
//! Wraps `esp_pthread_set_cfg()` so that `std::thread::Builder::spawn`
//! creates a FreeRTOS task pinned to a specific CPU core with explicit
//! priority and stack size. On host, falls back to a plain named thread.
//!
//! `esp_pthread_set_cfg()` sets thread-local configuration that applies to
//! the *next* `pthread_create()` from the calling thread, so the
//! config→spawn pair must not interleave with other thread creation on the
//! same thread.

use std::thread::JoinHandle;

use crate::error::InitError;

/// CPU core identifiers for dual-core ESP32 parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// Core 0 (PRO_CPU): radio stack and its callback dispatcher.
    Pro = 0,
    /// Core 1 (APP_CPU): emitters, sink, idle loop.
    App = 1,
}

/// Spawn an execution context pinned to `core`.
///
/// `name` must be NUL-terminated (e.g. `"emitter0\0"`).
#[cfg(target_os = "espidf")]
pub fn spawn_context(
    core: Core,
    priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, InitError> {
    let display_name = name.trim_end_matches('\0');
    // SAFETY: the config struct outlives the call; `name` is 'static and
    // NUL-terminated.
    unsafe {
        let mut cfg = esp_idf_svc::sys::esp_pthread_get_default_config();
        cfg.pin_to_core = core as i32;
        cfg.prio = i32::from(priority);
        cfg.stack_size = stack_kb * 1024;
        cfg.thread_name = name.as_ptr().cast();
        let ret = esp_idf_svc::sys::esp_pthread_set_cfg(&cfg);
        if ret != esp_idf_svc::sys::ESP_OK as i32 {
            log::error!("esp_pthread_set_cfg failed for '{}': {}", display_name, ret);
            return Err(InitError::Thread(display_name));
        }
    }

    log::info!(
        "Spawning '{}' on {:?} (pri={}, stack={}KB)",
        display_name,
        core,
        priority,
        stack_kb
    );

    std::thread::Builder::new()
        .name(display_name.into())
        .spawn(f)
        .map_err(|_| InitError::Thread(display_name))
}

/// Host fallback: ignores core affinity and priority.
#[cfg(not(target_os = "espidf"))]
pub fn spawn_context(
    _core: Core,
    _priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> Result<JoinHandle<()>, InitError> {
    let display_name = name.trim_end_matches('\0');
    log::info!(
        "Spawning '{}' (sim, no core pinning, stack={}KB)",
        display_name,
        stack_kb
    );

    std::thread::Builder::new()
        .name(display_name.into())
        // Host frames are larger than on the device; never go below 64 KiB.
        .stack_size((stack_kb * 1024).max(64 * 1024))
        .spawn(f)
        .map_err(|_| InitError::Thread(display_name))
}
