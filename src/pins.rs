//! GPIO pin assignments for the LBSKit board.
//!
//! Single source of truth: every driver references this module rather than
//! hard-coding pin numbers.

/// Name of the GPIO controller all lines below belong to.
pub const GPIO_PORT: &str = "gpio0";

// ---------------------------------------------------------------------------
// Telemetry application
// ---------------------------------------------------------------------------

/// Output toggled by emitter 0 (fast blink).
pub const LED0_GPIO: u32 = 11;
/// Output toggled by emitter 1 (slow blink).
pub const LED1_GPIO: u32 = 12;

/// Output for each emitter source id.
pub const EMITTER_GPIOS: [u32; 4] = [LED0_GPIO, LED1_GPIO, 13, 21];

// ---------------------------------------------------------------------------
// Peripheral application
// ---------------------------------------------------------------------------

/// Blinks while the idle loop runs.
pub const RUN_STATUS_LED_GPIO: u32 = 11;
/// On while a central is connected.
pub const CON_STATUS_LED_GPIO: u32 = 12;
/// Mirrors the LED characteristic.
pub const USER_LED_0_GPIO: u32 = 13;
/// Blinks with the run-status LED.
pub const USER_LED_1_GPIO: u32 = 21;
/// Scope-probe test output, toggled in lockstep with the idle blink.
pub const TEST_IO_GPIO: u32 = 2;

/// User button (active-low with external pull-up).
pub const BUTTON_GPIO: u32 = 16;

// ---------------------------------------------------------------------------
// I²C bus
// ---------------------------------------------------------------------------

pub const I2C_SDA_GPIO: u32 = 14;
pub const I2C_SCL_GPIO: u32 = 15;
/// Target of the register transfer probe.
pub const I2C_PROBE_ADDR: u8 = 0x12;
