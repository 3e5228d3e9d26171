//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises one application against
//! simulated outputs, the simulated radio and recording adapters. All tests
//! run on the host with no real hardware required.

#![cfg(not(target_os = "espidf"))]

mod mock_hw;
mod peripheral_flow_tests;
mod telemetry_flow_tests;
