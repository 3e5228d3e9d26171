//! ISR-fed, debounced button input.
//!
//! ## Hardware
//!
//! Active-low momentary switch with external pull-up. The GPIO fires on any
//! edge; the ISR samples the level and stores the pressed mask into an
//! atomic. [`ButtonMonitor::poll`], called from the dispatcher's scan loop,
//! debounces that mask and reports `(state, has_changed)` pairs in the shape
//! [`ButtonInput::button_changed`](crate::app::ports::ButtonInput) expects.
//!
//! Bit 0 of the mask is [`BUTTON_GPIO`](crate::pins::BUTTON_GPIO).

use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::InitError;

/// Raw pressed mask. Written by the ISR (or the host simulation), read by
/// the scan loop.
static BUTTON_RAW_STATE: AtomicU32 = AtomicU32::new(0);

/// ISR handler: record the current pressed mask.
/// Safe to call from interrupt context (lock-free atomic store).
pub fn button_isr_handler(pressed_mask: u32) {
    BUTTON_RAW_STATE.store(pressed_mask, Ordering::Release);
}

/// Latest raw mask recorded by [`button_isr_handler`].
pub fn read_isr_state() -> u32 {
    BUTTON_RAW_STATE.load(Ordering::Acquire)
}

/// Debounces a raw mask into stable change reports.
#[derive(Debug, Clone)]
pub struct ButtonMonitor {
    debounce_ms: u32,
    stable: u32,
    candidate: u32,
    candidate_since_ms: u32,
}

impl ButtonMonitor {
    pub fn new(debounce_ms: u32) -> Self {
        Self {
            debounce_ms,
            stable: 0,
            candidate: 0,
            candidate_since_ms: 0,
        }
    }

    /// Feed one sample. Returns `(state, has_changed)` once `raw` has held
    /// for the debounce window and differs from the last reported state.
    pub fn poll(&mut self, raw: u32, now_ms: u32) -> Option<(u32, u32)> {
        if raw != self.candidate {
            self.candidate = raw;
            self.candidate_since_ms = now_ms;
        }
        if self.candidate == self.stable
            || now_ms.wrapping_sub(self.candidate_since_ms) < self.debounce_ms
        {
            return None;
        }
        let changed = self.candidate ^ self.stable;
        self.stable = self.candidate;
        Some((self.stable, changed))
    }

    /// [`poll`](Self::poll) with the mask recorded by the ISR.
    pub fn sample(&mut self, now_ms: u32) -> Option<(u32, u32)> {
        self.poll(read_isr_state(), now_ms)
    }

    /// Last debounced state.
    pub fn state(&self) -> u32 {
        self.stable
    }
}

// ── Interrupt wiring ──────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe extern "C" fn button_gpio_isr(_arg: *mut core::ffi::c_void) {
    // SAFETY: gpio_get_level is a register read; safe in ISR context.
    let level = unsafe { esp_idf_svc::sys::gpio_get_level(crate::pins::BUTTON_GPIO as i32) };
    button_isr_handler(u32::from(level == 0));
}

/// Configure the button GPIO and register its interrupt.
#[cfg(target_os = "espidf")]
pub fn init_buttons() -> Result<(), InitError> {
    use esp_idf_svc::sys::*;

    let pin = crate::pins::BUTTON_GPIO as i32;
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pin,
        mode: gpio_mode_t_GPIO_MODE_INPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_ENABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_ANYEDGE,
        ..Default::default()
    };
    // SAFETY: one-shot init before the scan loop starts. The ISR only
    // touches an atomic. ESP_ERR_INVALID_STATE means the ISR service is
    // already installed.
    unsafe {
        let ret = gpio_config(&cfg);
        if ret != ESP_OK as i32 {
            return Err(InitError::Button(ret));
        }
        let ret = gpio_install_isr_service(0);
        if ret != ESP_OK as i32 && ret != ESP_ERR_INVALID_STATE as i32 {
            return Err(InitError::Button(ret));
        }
        let ret = gpio_isr_handler_add(pin, Some(button_gpio_isr), core::ptr::null_mut());
        if ret != ESP_OK as i32 {
            return Err(InitError::Button(ret));
        }
        // Seed with the current level so a button held at boot is seen.
        button_isr_handler(u32::from(gpio_get_level(pin) == 0));
    }
    log::info!("button: GPIO {} armed (any edge)", pin);
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_buttons() -> Result<(), InitError> {
    log::info!("button(sim): input driven by button_isr_handler");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_report_without_change() {
        let mut m = ButtonMonitor::new(20);
        assert_eq!(m.poll(0, 0), None);
        assert_eq!(m.poll(0, 100), None);
    }

    #[test]
    fn press_reported_after_debounce() {
        let mut m = ButtonMonitor::new(20);
        assert_eq!(m.poll(1, 100), None);
        assert_eq!(m.poll(1, 110), None);
        assert_eq!(m.poll(1, 120), Some((1, 1)));
        assert_eq!(m.poll(1, 130), None);
        assert_eq!(m.state(), 1);
    }

    #[test]
    fn bounce_restarts_window() {
        let mut m = ButtonMonitor::new(20);
        m.poll(1, 0);
        m.poll(0, 10);
        m.poll(1, 15);
        assert_eq!(m.poll(1, 30), None);
        assert_eq!(m.poll(1, 35), Some((1, 1)));
    }

    #[test]
    fn glitch_shorter_than_window_is_ignored() {
        let mut m = ButtonMonitor::new(20);
        m.poll(1, 0);
        assert_eq!(m.poll(0, 5), None);
        assert_eq!(m.poll(0, 50), None);
        assert_eq!(m.state(), 0);
    }

    #[test]
    fn release_reports_changed_bit() {
        let mut m = ButtonMonitor::new(0);
        assert_eq!(m.poll(0b11, 0), Some((0b11, 0b11)));
        assert_eq!(m.poll(0b10, 1), Some((0b10, 0b01)));
    }

    #[test]
    fn isr_state_feeds_sample() {
        let mut m = ButtonMonitor::new(0);
        button_isr_handler(1);
        assert_eq!(m.sample(0), Some((1, 1)));
        button_isr_handler(0);
        assert_eq!(m.sample(1), Some((0, 1)));
    }
}
