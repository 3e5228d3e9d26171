//! LED-Button peripheral: advertises, accepts one central, mirrors the
//! button into notifications and LED writes onto the user LED.
//!
//! A startup failure is logged and ends `main` without an error status,
//! leaving the board idle.

use anyhow::{Context, Result};
use log::error;

use lbskit::adapters::ble::BleStack;
use lbskit::adapters::log_sink::LogEventSink;
use lbskit::adapters::settings::SettingsAdapter;
use lbskit::adapters::stack_events::spawn_dispatcher;
use lbskit::app::events::AppKind;
use lbskit::app::peripheral::{Peripheral, PeripheralOutputs};
use lbskit::drivers::button::init_buttons;
use lbskit::drivers::gpio::output_line;
use lbskit::drivers::i2c_probe::probe_board_bus;
use lbskit::error::Error;
use lbskit::pins;
use lbskit::runtime;

/// Pause between scripted central steps on host.
#[cfg(not(target_os = "espidf"))]
const SIM_STEP: std::time::Duration = std::time::Duration::from_millis(500);

fn main() -> Result<()> {
    runtime::init_logging()?;
    runtime::banner(AppKind::Peripheral);

    let settings = SettingsAdapter::new()
        .map_err(Error::from)
        .context("opening settings store")?;
    let config = runtime::load_config(&settings);

    let outputs = PeripheralOutputs {
        test_io: output_line(pins::TEST_IO_GPIO),
        run_status: output_line(pins::RUN_STATUS_LED_GPIO),
        con_status: output_line(pins::CON_STATUS_LED_GPIO),
        user_led_0: output_line(pins::USER_LED_0_GPIO),
        user_led_1: output_line(pins::USER_LED_1_GPIO),
    };
    let radio = BleStack::new(&config.device_name);

    let peripheral = match Peripheral::start(
        &config,
        outputs,
        radio,
        settings,
        LogEventSink::new(),
        init_buttons,
    ) {
        Ok(p) => p,
        Err(e) => {
            error!("startup aborted: {}", e);
            return Ok(());
        }
    };

    probe_board_bus();

    spawn_dispatcher(
        peripheral.dispatcher(),
        peripheral.button_scan(),
        config.context_priority,
        config.context_stack_kb,
    )
    .map_err(Error::from)
    .context("spawning stack dispatcher")?;

    #[cfg(not(target_os = "espidf"))]
    lbskit::adapters::sim_central::spawn_sim_central(
        config.security_enabled,
        SIM_STEP,
        config.context_stack_kb,
    )
    .map_err(Error::from)
    .context("spawning simulated central")?;

    peripheral.idle.run()
}
