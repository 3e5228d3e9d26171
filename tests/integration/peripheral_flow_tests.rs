//! Peripheral end to end: startup order, then stack events fed through the
//! dispatcher exactly as the radio callback layer would post them.

use lbskit::adapters::ble::{BleStack, RadioStep};
use lbskit::adapters::stack_events::{StackDispatcher, StackEvent};
use lbskit::app::events::{AppEvent, AppKind};
use lbskit::app::peripheral::{Peripheral, PeripheralBridge, PeripheralLink};
use lbskit::app::ports::{BondRecord, SettingsPort};
use lbskit::config::SystemConfig;
use lbskit::drivers::gpio::SimOutputPin;
use lbskit::error::{BleError, Error, InitError};
use lbskit::gatt::LbsAttribute;
use lbskit::link::{DisconnectReason, LinkState, PeerAddr, SecurityLevel, SecurityState};

use crate::mock_hw::{BoardPins, MockSettings, RecordingSink};

const PEER: PeerAddr = PeerAddr([0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x01]);
const HANDLE: u16 = 7;

type SimPeripheral = Peripheral<SimOutputPin, BleStack, MockSettings, RecordingSink>;
type SimDispatcher = StackDispatcher<
    PeripheralLink<SimOutputPin, BleStack, MockSettings, RecordingSink>,
    PeripheralBridge<SimOutputPin, BleStack>,
    BleStack,
>;

struct Rig {
    app: SimPeripheral,
    dispatch: SimDispatcher,
    pins: BoardPins,
    radio: BleStack,
    settings: MockSettings,
    sink: RecordingSink,
}

fn config(security: bool) -> SystemConfig {
    let mut config = SystemConfig::default();
    config.security_enabled = security;
    config
}

fn boot(security: bool) -> Rig {
    let pins = BoardPins::new();
    let radio = BleStack::new("lbs-test");
    let settings = MockSettings::new();
    let sink = RecordingSink::new();
    let app = Peripheral::start(
        &config(security),
        pins.outputs(),
        radio.clone(),
        settings.clone(),
        sink.clone(),
        || Ok(()),
    )
    .expect("startup");
    Rig {
        dispatch: app.dispatcher(),
        app,
        pins,
        radio,
        settings,
        sink,
    }
}

impl Rig {
    fn post(&self, ev: StackEvent) {
        self.dispatch.handle(ev);
    }

    fn connect(&self) {
        self.post(StackEvent::Connected {
            handle: HANDLE,
            peer: PEER,
            err: None,
        });
    }

    fn disconnect(&self) {
        self.post(StackEvent::Disconnected {
            handle: HANDLE,
            reason: DisconnectReason::REMOTE_USER_TERMINATED,
        });
    }

    fn write(&self, attr: LbsAttribute, data: &[u8]) {
        self.post(StackEvent::AttrWrite {
            attr,
            offset: 0,
            data: heapless::Vec::from_slice(data).unwrap(),
        });
    }

    fn press(&self, pressed: bool) {
        self.dispatch.button(u32::from(pressed), 1);
    }
}

// ── Startup ───────────────────────────────────────────────────

#[test]
fn startup_runs_in_order_with_security() {
    let rig = boot(true);
    assert_eq!(
        rig.radio.sim().steps(),
        vec![
            RadioStep::AuthRegister,
            RadioStep::AuthInfoRegister,
            RadioStep::Enable,
            RadioStep::ServiceInit,
            RadioStep::Advertising,
        ]
    );
    assert!(rig.pins.all().iter().all(|p| p.is_configured()));
    assert!(!rig.pins.con_status.level());
    assert_eq!(rig.app.link.state(), LinkState::Advertising);
    assert_eq!(rig.sink.events()[0], AppEvent::Started(AppKind::Peripheral));
}

#[test]
fn startup_without_security_skips_pairing_registration() {
    let rig = boot(false);
    assert_eq!(
        rig.radio.sim().steps(),
        vec![RadioStep::Enable, RadioStep::ServiceInit, RadioStep::Advertising]
    );
}

#[test]
fn unready_test_pin_aborts_before_the_radio() {
    let pins = BoardPins::new();
    let mut outputs = pins.outputs();
    outputs.test_io = outputs.test_io.not_ready();
    let radio = BleStack::new("lbs-test");
    let result = Peripheral::start(
        &config(true),
        outputs,
        radio.clone(),
        MockSettings::new(),
        RecordingSink::new(),
        || Ok(()),
    );
    assert!(matches!(
        result.err(),
        Some(Error::Init(InitError::DeviceNotReady { .. }))
    ));
    assert!(radio.sim().steps().is_empty());
}

#[test]
fn button_init_failure_aborts_before_registration() {
    let radio = BleStack::new("lbs-test");
    let result = Peripheral::start(
        &config(true),
        BoardPins::new().outputs(),
        radio.clone(),
        MockSettings::new(),
        RecordingSink::new(),
        || Err(InitError::Button(-5)),
    );
    assert_eq!(result.err(), Some(Error::Init(InitError::Button(-5))));
    assert!(radio.sim().steps().is_empty());
}

#[test]
fn stack_enable_failure_is_fatal() {
    let radio = BleStack::new("lbs-test").with_failure(RadioStep::Enable, -12);
    let result = Peripheral::start(
        &config(false),
        BoardPins::new().outputs(),
        radio.clone(),
        MockSettings::new(),
        RecordingSink::new(),
        || Ok(()),
    );
    assert_eq!(result.err(), Some(Error::Ble(BleError::StackEnable(-12))));
    assert_eq!(radio.sim().steps(), vec![RadioStep::Enable]);
}

#[test]
fn stored_bonds_are_handed_to_the_stack() {
    let bond = BondRecord {
        peer: PEER,
        level: SecurityLevel::L4,
    };
    let radio = BleStack::new("lbs-test");
    Peripheral::start(
        &config(true),
        BoardPins::new().outputs(),
        radio.clone(),
        MockSettings::with_bonds(&[bond]),
        RecordingSink::new(),
        || Ok(()),
    )
    .expect("startup");
    assert_eq!(radio.sim().bonds(), vec![bond]);
}

#[test]
fn bond_load_failure_is_not_fatal() {
    let result = Peripheral::start(
        &config(true),
        BoardPins::new().outputs(),
        BleStack::new("lbs-test"),
        MockSettings::failing_loads(),
        RecordingSink::new(),
        || Ok(()),
    );
    assert!(result.is_ok());
}

// ── Connection session ────────────────────────────────────────

#[test]
fn connected_session_syncs_button_and_led() {
    let rig = boot(false);

    rig.connect();
    assert!(rig.pins.con_status.level());
    assert!(rig.sink.events().contains(&AppEvent::Connected { peer: PEER }));

    rig.write(LbsAttribute::ButtonCcc, &[0x01, 0x00]);
    rig.press(true);
    rig.press(false);
    assert_eq!(
        rig.radio.sim().notifications(),
        vec![(HANDLE, vec![1]), (HANDLE, vec![0])]
    );

    rig.write(LbsAttribute::Led, &[1]);
    assert!(rig.pins.user_led_0.level());
    assert_eq!(rig.radio.sim().value(LbsAttribute::Led), Some(vec![1]));

    rig.write(LbsAttribute::Led, &[2]);
    assert!(rig.pins.user_led_0.level(), "invalid write must not change the LED");

    rig.disconnect();
    assert!(!rig.pins.con_status.level());
    assert_eq!(rig.app.link.state(), LinkState::Advertising);
    assert_eq!(rig.radio.sim().advertising_starts(), 2);
}

#[test]
fn subscription_does_not_survive_reconnect() {
    let rig = boot(false);
    rig.connect();
    rig.write(LbsAttribute::ButtonCcc, &[0x01, 0x00]);
    rig.disconnect();
    rig.connect();

    rig.press(true);
    assert!(rig.radio.sim().notifications().is_empty());
    assert_eq!(rig.app.bridge.stats().unsubscribed, 1);
    assert_eq!(rig.radio.sim().value(LbsAttribute::Button), Some(vec![1]));
}

#[test]
fn second_connection_is_rejected() {
    let rig = boot(false);
    rig.connect();
    rig.post(StackEvent::Connected {
        handle: HANDLE + 1,
        peer: PeerAddr([1; 6]),
        err: None,
    });
    assert_eq!(rig.app.link.connection().map(|c| c.handle), Some(HANDLE));
    assert_eq!(rig.app.link.rejected_events(), 1);
}

// ── Pairing ───────────────────────────────────────────────────

#[test]
fn bonded_pairing_is_persisted() {
    let rig = boot(true);
    rig.connect();
    rig.post(StackEvent::SecurityRequest);
    rig.post(StackEvent::PasskeyDisplay(123_456));
    rig.post(StackEvent::PasskeyConfirm);
    rig.post(StackEvent::PairingComplete { bonded: true });

    let bonds = rig.settings.bonds();
    assert_eq!(bonds.len(), 1);
    assert_eq!(bonds[0].peer, PEER);
    assert!(rig.app.link.connection().is_some_and(|c| c.bonded));
    assert!(rig.sink.events().contains(&AppEvent::PasskeyDisplay {
        peer: PEER,
        passkey: 123_456
    }));
}

#[test]
fn numeric_comparison_waits_for_the_button() {
    let rig = boot(true);
    rig.connect();
    rig.write(LbsAttribute::ButtonCcc, &[0x01, 0x00]);
    rig.post(StackEvent::SecurityRequest);
    rig.post(StackEvent::PasskeyConfirmRequest(654_321));
    assert!(rig.radio.sim().replies().is_empty());

    rig.press(true);
    rig.press(false);
    assert_eq!(rig.radio.sim().replies(), vec![true]);
    assert!(rig.radio.sim().notifications().is_empty());
    assert_eq!(
        rig.app.link.connection().map(|c| c.security),
        Some(SecurityState::Paired)
    );

    // Prompt answered: the button is the LED-Button service's again.
    rig.press(true);
    assert_eq!(rig.radio.sim().notifications(), vec![(HANDLE, vec![1])]);
}

#[test]
fn peer_abort_cancels_the_pending_comparison() {
    let rig = boot(true);
    rig.connect();
    rig.post(StackEvent::PasskeyConfirmRequest(111_111));
    rig.post(StackEvent::PairingCancel);
    rig.post(StackEvent::PairingFailed { reason: 8 });
    assert_eq!(rig.radio.sim().replies(), vec![false]);
    assert!(rig.sink.events().contains(&AppEvent::PairingCancelled { peer: PEER }));
    assert!(!rig.dispatch.pairing_prompt_open());
}

#[test]
fn stale_disconnect_keeps_the_live_link() {
    let rig = boot(false);
    rig.connect();
    rig.post(StackEvent::Disconnected {
        handle: HANDLE + 1,
        reason: DisconnectReason::REMOTE_USER_TERMINATED,
    });
    assert_eq!(rig.app.link.state(), LinkState::Connected);
    assert!(rig.pins.con_status.level());
    assert_eq!(rig.radio.sim().advertising_starts(), 1);
}

#[test]
fn pairing_events_are_rejected_without_security() {
    let rig = boot(false);
    rig.connect();
    rig.post(StackEvent::SecurityRequest);
    rig.post(StackEvent::PairingComplete { bonded: true });
    assert_eq!(rig.app.link.rejected_events(), 2);
    assert!(rig.settings.load_bonds().unwrap().is_empty());
}

#[test]
fn idle_loop_drives_its_three_lines() {
    let mut rig = boot(false);
    rig.app.idle.step();
    assert!(rig.pins.run_status.level());
    assert!(rig.pins.user_led_1.level());
    assert!(rig.pins.test_io.level());
    assert!(!rig.pins.user_led_0.level());
}
