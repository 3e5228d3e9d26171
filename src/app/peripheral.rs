//! LED-Button peripheral composition.
//!
//! Brings the board up in a fixed order, every step fatal on failure:
//!
//! 1. test pin (not ready ends startup), then the four LEDs
//! 2. button input
//! 3. pairing callbacks, if security is enabled
//! 4. radio stack
//! 5. stored bonds (load-or-no-op)
//! 6. LED-Button service
//! 7. connection manager, which starts advertising
//!
//! After that the caller spawns the stack dispatcher and hands its own
//! context to [`IdleBlinker::run`].

use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::adapters::stack_events::{ButtonScan, StackDispatcher};
use crate::app::events::{AppEvent, AppKind};
use crate::app::ports::{BondRecord, EventSink, LinkPorts, OutputLine, RadioStack, SettingsPort};
use crate::bridge::AttributeBridge;
use crate::config::SystemConfig;
use crate::error::{BleError, Error, InitError};
use crate::gatt::{ButtonNotifier, LbsAttribute, LbsService};
use crate::link::{ConnectionManager, LinkStatus};

/// Ids reported in pin configuration failures.
const RUN_STATUS_ID: u8 = 0;
const CON_STATUS_ID: u8 = 1;
const USER_LED_0_ID: u8 = 2;
const USER_LED_1_ID: u8 = 3;
const TEST_IO_ID: u8 = 4;

// ───────────────────────────────────────────────────────────────
// Link side effects
// ───────────────────────────────────────────────────────────────

/// What the connection state machine drives: the connection-status LED,
/// advertising, bond persistence and the event sink.
pub struct PeripheralPorts<O, R, S, E>
where
    O: OutputLine,
    R: RadioStack,
    S: SettingsPort,
    E: EventSink + Send,
{
    con_led: O,
    radio: R,
    settings: S,
    sink: E,
}

impl<O, R, S, E> PeripheralPorts<O, R, S, E>
where
    O: OutputLine,
    R: RadioStack,
    S: SettingsPort,
    E: EventSink + Send,
{
    pub fn new(con_led: O, radio: R, settings: S, sink: E) -> Self {
        Self {
            con_led,
            radio,
            settings,
            sink,
        }
    }

    pub fn con_led(&self) -> &O {
        &self.con_led
    }

    pub fn settings(&self) -> &S {
        &self.settings
    }

    pub fn sink(&self) -> &E {
        &self.sink
    }
}

impl<O, R, S, E> LinkPorts for PeripheralPorts<O, R, S, E>
where
    O: OutputLine,
    R: RadioStack,
    S: SettingsPort,
    E: EventSink + Send,
{
    fn set_link_indicator(&mut self, on: bool) {
        self.con_led.drive(on);
    }

    fn start_advertising(&mut self) -> Result<(), BleError> {
        self.radio.start_advertising()
    }

    fn answer_pairing(&mut self, accept: bool) {
        if let Err(e) = self.radio.pairing_reply(accept) {
            warn!("pairing reply not delivered ({})", e);
        }
    }

    fn persist_bond(&mut self, bond: &BondRecord) {
        if let Err(e) = self.settings.store_bond(bond) {
            warn!("settings: bond for {} not stored ({})", bond.peer, e);
        }
    }

    fn emit(&mut self, event: &AppEvent) {
        self.sink.emit(event);
    }
}

// ───────────────────────────────────────────────────────────────
// Board outputs
// ───────────────────────────────────────────────────────────────

/// The five digital outputs of the peripheral board.
pub struct PeripheralOutputs<O: OutputLine> {
    pub test_io: O,
    pub run_status: O,
    pub con_status: O,
    pub user_led_0: O,
    pub user_led_1: O,
}

fn prepare<O: OutputLine>(line: &mut O, id: u8) -> Result<(), InitError> {
    if !line.is_ready() {
        return Err(InitError::DeviceNotReady {
            port: line.port_name(),
        });
    }
    line.configure_output().map_err(|rc| InitError::PinConfigure {
        pin: line.pin(),
        id,
        rc,
    })
}

/// Blinks the run-status LED, user LED 1 and the test pin from the
/// otherwise idle main context.
pub struct IdleBlinker<O: OutputLine> {
    run_status: O,
    user_led_1: O,
    test_io: O,
    blink_status: u32,
    period: Duration,
}

impl<O: OutputLine> IdleBlinker<O> {
    pub fn new(run_status: O, user_led_1: O, test_io: O, period: Duration) -> Self {
        Self {
            run_status,
            user_led_1,
            test_io,
            blink_status: 0,
            period,
        }
    }

    /// Advance once and drive all three lines to `blink_status % 2`.
    pub fn step(&mut self) -> bool {
        self.blink_status = self.blink_status.wrapping_add(1);
        let on = self.blink_status % 2 == 1;
        self.run_status.drive(on);
        self.user_led_1.drive(on);
        self.test_io.drive(on);
        on
    }

    pub fn blink_status(&self) -> u32 {
        self.blink_status
    }

    pub fn run(mut self) -> ! {
        loop {
            self.step();
            std::thread::sleep(self.period);
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Application
// ───────────────────────────────────────────────────────────────

pub type PeripheralLink<O, R, S, E> = ConnectionManager<PeripheralPorts<O, R, S, E>>;
pub type PeripheralBridge<O, R> = AttributeBridge<O, ButtonNotifier<R>>;

/// A started peripheral.
pub struct Peripheral<O, R, S, E>
where
    O: OutputLine + 'static,
    R: RadioStack,
    S: SettingsPort + 'static,
    E: EventSink + Send + 'static,
{
    pub link: Arc<PeripheralLink<O, R, S, E>>,
    pub bridge: Arc<PeripheralBridge<O, R>>,
    pub status: Arc<LinkStatus>,
    pub idle: IdleBlinker<O>,
    radio: R,
    scan: ButtonScan,
}

impl<O, R, S, E> Peripheral<O, R, S, E>
where
    O: OutputLine + 'static,
    R: RadioStack,
    S: SettingsPort + 'static,
    E: EventSink + Send + 'static,
{
    /// Run the startup sequence. `init_buttons` brings up the button input.
    pub fn start(
        config: &SystemConfig,
        outputs: PeripheralOutputs<O>,
        radio: R,
        settings: S,
        mut sink: E,
        init_buttons: impl FnOnce() -> Result<(), InitError>,
    ) -> Result<Self, Error> {
        let PeripheralOutputs {
            mut test_io,
            mut run_status,
            mut con_status,
            mut user_led_0,
            mut user_led_1,
        } = outputs;

        sink.emit(&AppEvent::Started(AppKind::Peripheral));

        prepare(&mut test_io, TEST_IO_ID).inspect_err(|e| error!("test pin: {}", e))?;
        for (line, id) in [
            (&mut run_status, RUN_STATUS_ID),
            (&mut con_status, CON_STATUS_ID),
            (&mut user_led_0, USER_LED_0_ID),
            (&mut user_led_1, USER_LED_1_ID),
        ] {
            prepare(line, id).inspect_err(|e| error!("LEDs init failed ({})", e))?;
        }

        init_buttons().inspect_err(|e| error!("Failed to initialize buttons ({})", e))?;

        if config.security_enabled {
            radio
                .register_auth_callbacks()
                .inspect_err(|e| error!("{}", e))?;
            radio
                .register_auth_info_callbacks()
                .inspect_err(|e| error!("{}", e))?;
        }

        radio.enable().inspect_err(|e| error!("{}", e))?;
        info!("Bluetooth initialized");

        match settings.load_bonds() {
            Ok(bonds) => {
                let restored = radio.restore_bonds(&bonds);
                if restored < bonds.len() {
                    warn!(
                        "settings: {} of {} bond(s) unknown to the stack, peers must pair again",
                        bonds.len() - restored,
                        bonds.len()
                    );
                }
                info!("settings: {} bond(s) restored", restored);
            }
            Err(e) => warn!("settings: bonds not loaded ({})", e),
        }

        radio.init_service().inspect_err(|e| error!("{}", e))?;
        radio.set_value(LbsAttribute::Button, &[0]);
        radio.set_value(LbsAttribute::Led, &[0]);

        let status = Arc::new(LinkStatus::new());
        let notifier = ButtonNotifier::new(radio.clone(), Arc::clone(&status));
        let bridge = Arc::new(AttributeBridge::new(user_led_0, notifier));
        let ports = PeripheralPorts::new(con_status, radio.clone(), settings, sink);
        let link = Arc::new(ConnectionManager::new(
            ports,
            config.security_enabled,
            Arc::clone(&status),
        ));
        link.start().inspect_err(|e| error!("{}", e))?;

        Ok(Self {
            link,
            bridge,
            status,
            idle: IdleBlinker::new(
                run_status,
                user_led_1,
                test_io,
                Duration::from_millis(u64::from(config.idle_blink_ms)),
            ),
            radio,
            scan: ButtonScan {
                period: Duration::from_millis(u64::from(config.button_scan_ms)),
                debounce_ms: config.button_debounce_ms,
            },
        })
    }

    /// Dispatcher routing stack callbacks into this peripheral.
    pub fn dispatcher(&self) -> StackDispatcher<PeripheralLink<O, R, S, E>, PeripheralBridge<O, R>, R> {
        StackDispatcher::new(
            Arc::clone(&self.link),
            LbsService::new(Arc::clone(&self.bridge), Arc::clone(&self.status)),
            self.radio.clone(),
        )
    }

    pub fn button_scan(&self) -> ButtonScan {
        self.scan
    }
}
