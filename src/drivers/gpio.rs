//! Digital output lines.
//!
//! On the device each line is a raw ESP-IDF GPIO configured with
//! `gpio_config`. On host, [`SimOutputPin`] records its level and toggle
//! count so tests and the simulated board can observe it; clones share the
//! same probe.

use core::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use embedded_hal::digital::{ErrorType, OutputPin};

use crate::app::ports::OutputLine;

// ── ESP-IDF ───────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub use esp::{EspGpioError, EspOutputPin};

#[cfg(target_os = "espidf")]
mod esp {
    use embedded_hal::digital::{Error, ErrorKind, ErrorType, OutputPin};
    use esp_idf_svc::sys::*;

    use crate::app::ports::OutputLine;

    /// `esp_err_t` returned by the GPIO driver.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EspGpioError(pub i32);

    impl Error for EspGpioError {
        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    pub struct EspOutputPin {
        port: &'static str,
        pin: u32,
    }

    impl EspOutputPin {
        pub fn new(port: &'static str, pin: u32) -> Self {
            Self { port, pin }
        }

        fn set_level(&mut self, high: bool) -> Result<(), EspGpioError> {
            // SAFETY: register write on a pin this handle owns.
            let ret = unsafe { gpio_set_level(self.pin as i32, u32::from(high)) };
            if ret == ESP_OK as i32 {
                Ok(())
            } else {
                Err(EspGpioError(ret))
            }
        }
    }

    impl ErrorType for EspOutputPin {
        type Error = EspGpioError;
    }

    impl OutputPin for EspOutputPin {
        fn set_low(&mut self) -> Result<(), Self::Error> {
            self.set_level(false)
        }

        fn set_high(&mut self) -> Result<(), Self::Error> {
            self.set_level(true)
        }
    }

    impl OutputLine for EspOutputPin {
        fn port_name(&self) -> &'static str {
            self.port
        }

        fn pin(&self) -> u32 {
            self.pin
        }

        fn is_ready(&self) -> bool {
            // The GPIO matrix has no driver to wait for; an out-of-range pin
            // is the only way to be "not ready".
            (self.pin as i32) < gpio_num_t_GPIO_NUM_MAX
        }

        fn configure_output(&mut self) -> Result<(), i32> {
            let cfg = gpio_config_t {
                pin_bit_mask: 1u64 << self.pin,
                mode: gpio_mode_t_GPIO_MODE_OUTPUT,
                pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
                pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
                intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
                ..Default::default()
            };
            // SAFETY: one-shot configuration of a pin this handle owns.
            let ret = unsafe { gpio_config(&cfg) };
            if ret != ESP_OK as i32 {
                return Err(ret);
            }
            self.set_level(false).map_err(|e| e.0)
        }
    }
}

// ── Simulation ────────────────────────────────────────────────

#[derive(Debug, Default)]
struct PinProbe {
    level: AtomicBool,
    toggles: AtomicU32,
    configured: AtomicBool,
    not_ready: AtomicBool,
    configure_rc: AtomicI32,
}

/// Host output line with an observable level.
#[derive(Debug, Clone)]
pub struct SimOutputPin {
    port: &'static str,
    pin: u32,
    probe: Arc<PinProbe>,
}

impl SimOutputPin {
    pub fn new(port: &'static str, pin: u32) -> Self {
        Self {
            port,
            pin,
            probe: Arc::new(PinProbe::default()),
        }
    }

    /// A line whose controller never becomes ready.
    #[must_use]
    pub fn not_ready(self) -> Self {
        self.probe.not_ready.store(true, Ordering::SeqCst);
        self
    }

    /// A line whose output configuration fails with `rc`.
    #[must_use]
    pub fn failing_configure(self, rc: i32) -> Self {
        self.probe.configure_rc.store(rc, Ordering::SeqCst);
        self
    }

    pub fn level(&self) -> bool {
        self.probe.level.load(Ordering::SeqCst)
    }

    /// Number of level changes since creation.
    pub fn toggles(&self) -> u32 {
        self.probe.toggles.load(Ordering::SeqCst)
    }

    pub fn is_configured(&self) -> bool {
        self.probe.configured.load(Ordering::SeqCst)
    }

    fn set(&self, high: bool) {
        if self.probe.level.swap(high, Ordering::SeqCst) != high {
            self.probe.toggles.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl ErrorType for SimOutputPin {
    type Error = Infallible;
}

impl OutputPin for SimOutputPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true);
        Ok(())
    }
}

impl OutputLine for SimOutputPin {
    fn port_name(&self) -> &'static str {
        self.port
    }

    fn pin(&self) -> u32 {
        self.pin
    }

    fn is_ready(&self) -> bool {
        !self.probe.not_ready.load(Ordering::SeqCst)
    }

    fn configure_output(&mut self) -> Result<(), i32> {
        match self.probe.configure_rc.load(Ordering::SeqCst) {
            0 => {
                self.set(false);
                self.probe.configured.store(true, Ordering::SeqCst);
                Ok(())
            }
            rc => Err(rc),
        }
    }
}

// ── Platform selection ────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub type PlatformOutput = EspOutputPin;

#[cfg(not(target_os = "espidf"))]
pub type PlatformOutput = SimOutputPin;

/// Output line for `pin` on the board's GPIO controller.
pub fn output_line(pin: u32) -> PlatformOutput {
    PlatformOutput::new(crate::pins::GPIO_PORT, pin)
}
