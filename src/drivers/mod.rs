//! Physical I/O and execution contexts.

pub mod button;
pub mod gpio;
pub mod i2c_probe;
pub mod task_pin;
