//! Scripted remote central for host runs.
//!
//! Plays one peer session against the peripheral in a loop, through the same
//! paths the Bluedroid callbacks use: stack events go into
//! [`STACK_EVENTS`](super::stack_events::STACK_EVENTS) and button presses go
//! through the button ISR state.

use std::thread::JoinHandle;
use std::time::Duration;

use log::info;

use super::stack_events::{StackEvent, post};
use crate::drivers::button::button_isr_handler;
use crate::drivers::task_pin::{Core, spawn_context};
use crate::error::InitError;
use crate::gatt::LbsAttribute;
use crate::link::{DisconnectReason, PeerAddr, SecurityLevel};

const SIM_PEER: PeerAddr = PeerAddr([0xC0, 0xFF, 0xEE, 0x00, 0x00, 0x01]);
const SIM_CONN_HANDLE: u16 = 1;
const SIM_PASSKEY: u32 = 123_456;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CentralStep {
    Post(StackEvent),
    /// Drive the button ISR state: pressed or released.
    Button(bool),
    /// Let the peripheral catch up.
    Wait,
}

fn write(attr: LbsAttribute, data: &[u8]) -> CentralStep {
    let mut payload = heapless::Vec::new();
    // Script payloads are at most two bytes.
    let _ = payload.extend_from_slice(data);
    CentralStep::Post(StackEvent::AttrWrite {
        attr,
        offset: 0,
        data: payload,
    })
}

/// One peer session: connect, pairing confirmed with a button press (if
/// enabled), subscribe, button press, LED on/off, disconnect.
pub fn session(security_enabled: bool) -> Vec<CentralStep> {
    use CentralStep::{Button, Post, Wait};

    let mut steps = vec![
        Post(StackEvent::Connected {
            handle: SIM_CONN_HANDLE,
            peer: SIM_PEER,
            err: None,
        }),
        Wait,
    ];
    if security_enabled {
        steps.extend([
            Post(StackEvent::SecurityRequest),
            Post(StackEvent::PasskeyConfirmRequest(SIM_PASSKEY)),
            Wait,
            Button(true),
            Wait,
            Button(false),
            Wait,
            Post(StackEvent::SecurityChanged {
                level: SecurityLevel::L4,
                err: None,
            }),
            Post(StackEvent::PairingComplete { bonded: true }),
            Wait,
        ]);
    }
    steps.extend([
        write(LbsAttribute::ButtonCcc, &[0x01, 0x00]),
        Wait,
        Button(true),
        Wait,
        Button(false),
        Wait,
        write(LbsAttribute::Led, &[1]),
        Wait,
        write(LbsAttribute::Led, &[0]),
        Wait,
        Post(StackEvent::Disconnected {
            handle: SIM_CONN_HANDLE,
            reason: DisconnectReason::REMOTE_USER_TERMINATED,
        }),
        Wait,
    ]);
    steps
}

/// Replay [`session`] forever, sleeping `pause` at each `Wait`.
pub fn run(security_enabled: bool, pause: Duration) -> ! {
    let script = session(security_enabled);
    let mut round: u32 = 0;
    loop {
        round = round.wrapping_add(1);
        info!("sim central: session {} with {}", round, SIM_PEER);
        for step in &script {
            match step {
                CentralStep::Post(ev) => post(ev.clone()),
                CentralStep::Button(pressed) => button_isr_handler(u32::from(*pressed)),
                CentralStep::Wait => std::thread::sleep(pause),
            }
        }
    }
}

pub fn spawn_sim_central(
    security_enabled: bool,
    pause: Duration,
    stack_kb: usize,
) -> Result<JoinHandle<()>, InitError> {
    spawn_context(Core::Pro, 1, stack_kb, "sim_central\0", move || {
        run(security_enabled, pause)
    })
}
