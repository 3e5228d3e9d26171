//! Radio stack callback channel and dispatcher context.
//!
//! Platform callbacks (Bluedroid's C handlers on the device, the scripted
//! central on host) must not block and must not call into the domain
//! directly. They post a [`StackEvent`] with `try_send`; the dispatcher
//! context receives it and calls the matching capability.
//!
//! ```text
//!  ┌──────────────────┐  StackEvent  ┌──────────────────────────────────┐
//!  │ radio callbacks  │─────────────▶│  dispatcher thread               │
//!  │ (BT task / sim)  │  try_send    │  edge_executor::LocalExecutor    │
//!  └──────────────────┘              │  ┌──────────────┐ ┌────────────┐ │
//!                                    │  │ event_loop   │ │ button scan│ │
//!  button ISR ── atomic mask ───────▶│  │ wake-on-recv │ │ timer tick │ │
//!                                    │  └──────────────┘ └────────────┘ │
//!                                    └──────────────────────────────────┘
//! ```
//!
//! A numeric-comparison request opens a pairing prompt. While it is open the
//! next button press confirms instead of reaching the LED-Button service, and
//! the prompt cancels the pairing once its timeout runs out.

use core::cell::Cell;
use core::time::Duration;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{debug, info, warn};

use crate::app::ports::{
    AttributeCallbacks, ButtonInput, ConnectionCallbacks, PairingCallbacks, RadioStack,
};
use crate::bridge::USER_BUTTON;
use crate::drivers::button::ButtonMonitor;
use crate::drivers::task_pin::{Core, spawn_context};
use crate::error::InitError;
use crate::gatt::{LbsAttribute, LbsService};
use crate::link::{DisconnectReason, PeerAddr, SecurityLevel};

/// Largest attribute payload the service accepts.
pub const MAX_ATTR_WRITE: usize = 4;

/// Channel depth for stack events.
const STACK_EVENT_DEPTH: usize = 16;

/// Time the operator has to confirm a numeric comparison.
pub const PAIRING_TIMEOUT_MS: u32 = 30_000;

/// One callback from the radio stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEvent {
    Connected {
        handle: u16,
        peer: PeerAddr,
        err: Option<u8>,
    },
    Disconnected {
        handle: u16,
        reason: DisconnectReason,
    },
    SecurityChanged {
        level: SecurityLevel,
        err: Option<u8>,
    },
    SecurityRequest,
    /// Passkey the peer types in; nothing to answer locally.
    PasskeyDisplay(u32),
    /// Numeric comparison: the stack holds the request until the operator
    /// confirms or cancels.
    PasskeyConfirmRequest(u32),
    PasskeyConfirm,
    PairingCancel,
    PairingComplete {
        bonded: bool,
    },
    PairingFailed {
        reason: u8,
    },
    /// A peer write, already acknowledged by the platform layer.
    AttrWrite {
        attr: LbsAttribute,
        offset: u16,
        data: heapless::Vec<u8, MAX_ATTR_WRITE>,
    },
}

/// Stack callbacks → dispatcher.
pub static STACK_EVENTS: Channel<CriticalSectionRawMutex, StackEvent, STACK_EVENT_DEPTH> =
    Channel::new();

/// Post from a callback context. Never blocks; a full channel drops the
/// event with a warning.
pub fn post(event: StackEvent) {
    if let Err(embassy_sync::channel::TrySendError::Full(ev)) = STACK_EVENTS.try_send(event) {
        warn!("stack events: channel full, dropping {:?}", ev);
    }
}

/// Open numeric-comparison request, as seen from the operator's button.
#[derive(Debug)]
struct PairingPrompt {
    opened_ms: Cell<Option<u32>>,
    /// The release that ends a confirming press.
    swallow_release: Cell<bool>,
    timeout_ms: u32,
}

impl PairingPrompt {
    fn new(timeout_ms: u32) -> Self {
        Self {
            opened_ms: Cell::new(None),
            swallow_release: Cell::new(false),
            timeout_ms,
        }
    }

    fn open(&self, now_ms: u32) {
        self.opened_ms.set(Some(now_ms));
    }

    /// Returns whether a prompt was open.
    fn close(&self) -> bool {
        self.opened_ms.take().is_some()
    }

    fn expired(&self, now_ms: u32) -> bool {
        matches!(self.opened_ms.get(), Some(t) if now_ms.wrapping_sub(t) >= self.timeout_ms)
    }
}

/// Routes stack events to the capabilities injected at startup.
pub struct StackDispatcher<C, H, R>
where
    C: ConnectionCallbacks + PairingCallbacks,
    H: AttributeCallbacks,
    R: RadioStack,
{
    link: Arc<C>,
    service: LbsService<H>,
    radio: R,
    prompt: PairingPrompt,
    epoch: Instant,
}

impl<C, H, R> StackDispatcher<C, H, R>
where
    C: ConnectionCallbacks + PairingCallbacks,
    H: AttributeCallbacks,
    R: RadioStack,
{
    pub fn new(link: Arc<C>, service: LbsService<H>, radio: R) -> Self {
        Self {
            link,
            service,
            radio,
            prompt: PairingPrompt::new(PAIRING_TIMEOUT_MS),
            epoch: Instant::now(),
        }
    }

    pub fn with_pairing_timeout(mut self, timeout_ms: u32) -> Self {
        self.prompt = PairingPrompt::new(timeout_ms);
        self
    }

    /// Milliseconds since the dispatcher was built.
    pub fn now_ms(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    pub fn handle(&self, event: StackEvent) {
        self.handle_at(event, self.now_ms());
    }

    /// [`handle`](Self::handle) with an explicit clock.
    pub fn handle_at(&self, event: StackEvent, now_ms: u32) {
        debug!("stack event: {:?}", event);
        match event {
            StackEvent::Connected { handle, peer, err } => self.link.connected(handle, peer, err),
            StackEvent::Disconnected { handle, reason } => {
                self.prompt.close();
                self.link.disconnected(handle, reason)
            }
            StackEvent::SecurityChanged { level, err } => self.link.security_changed(level, err),
            StackEvent::SecurityRequest => self.link.security_request(),
            StackEvent::PasskeyDisplay(passkey) => self.link.passkey_display(passkey),
            StackEvent::PasskeyConfirmRequest(passkey) => {
                self.link.passkey_display(passkey);
                self.prompt.open(now_ms);
                info!("pairing: press the button to confirm {:06}", passkey);
            }
            StackEvent::PasskeyConfirm => {
                self.prompt.close();
                self.link.passkey_confirm()
            }
            StackEvent::PairingCancel => {
                self.prompt.close();
                self.link.cancel()
            }
            StackEvent::PairingComplete { bonded } => {
                self.prompt.close();
                self.link.pairing_complete(bonded)
            }
            StackEvent::PairingFailed { reason } => {
                self.prompt.close();
                self.link.pairing_failed(reason)
            }
            StackEvent::AttrWrite { attr, offset, data } => {
                match self.service.write(attr, offset, &data) {
                    Ok(_) if attr == LbsAttribute::Led => self.radio.set_value(attr, &data),
                    Ok(_) => {}
                    Err(e) => warn!("LBS: write to {:?} rejected: {}", attr, e),
                }
            }
        }
    }

    pub fn service(&self) -> &LbsService<H> {
        &self.service
    }

    pub fn pairing_prompt_open(&self) -> bool {
        self.prompt.opened_ms.get().is_some()
    }

    /// Cancel an unanswered prompt once its timeout has run out.
    pub fn prompt_tick(&self, now_ms: u32) {
        if self.prompt.expired(now_ms) {
            self.prompt.close();
            warn!(
                "pairing: not confirmed within {} ms, cancelling",
                self.prompt.timeout_ms
            );
            self.link.cancel();
        }
    }
}

impl<C, H, R> StackDispatcher<C, H, R>
where
    C: ConnectionCallbacks + PairingCallbacks,
    H: AttributeCallbacks + ButtonInput,
    R: RadioStack,
{
    /// Debounced button change. A press while the pairing prompt is open
    /// confirms it; that press and its release never reach the service.
    pub fn button(&self, state: u32, changed: u32) {
        if changed & USER_BUTTON != 0 {
            let pressed = state & USER_BUTTON != 0;
            if !pressed && self.prompt.swallow_release.take() {
                return;
            }
            if pressed && self.prompt.close() {
                self.prompt.swallow_release.set(true);
                info!("pairing: confirmed by button");
                self.link.passkey_confirm();
                return;
            }
        }
        self.service.handler().button_changed(state, changed);
    }
}

/// Button scan parameters.
#[derive(Debug, Clone, Copy)]
pub struct ButtonScan {
    pub period: Duration,
    pub debounce_ms: u32,
}

async fn event_loop<C, H, R>(dispatcher: &StackDispatcher<C, H, R>)
where
    C: ConnectionCallbacks + PairingCallbacks,
    H: AttributeCallbacks,
    R: RadioStack,
{
    loop {
        let event = STACK_EVENTS.receive().await;
        dispatcher.handle(event);
    }
}

async fn button_loop<C, H, R>(dispatcher: &StackDispatcher<C, H, R>, scan: ButtonScan)
where
    C: ConnectionCallbacks + PairingCallbacks,
    H: AttributeCallbacks + ButtonInput,
    R: RadioStack,
{
    let mut monitor = ButtonMonitor::new(scan.debounce_ms);
    loop {
        let now_ms = dispatcher.now_ms();
        if let Some((state, changed)) = monitor.sample(now_ms) {
            dispatcher.button(state, changed);
        }
        dispatcher.prompt_tick(now_ms);
        async_io_mini::Timer::after(scan.period).await;
    }
}

/// Body of the dispatcher context: stack events and the button scan on
/// one executor. Does not return while the loops run.
pub fn run_dispatcher<C, H, R>(dispatcher: StackDispatcher<C, H, R>, scan: ButtonScan)
where
    C: ConnectionCallbacks + PairingCallbacks,
    H: AttributeCallbacks + ButtonInput,
    R: RadioStack,
{
    let executor: edge_executor::LocalExecutor<'_, 4> = edge_executor::LocalExecutor::new();

    executor.spawn(event_loop(&dispatcher)).detach();
    executor.spawn(button_loop(&dispatcher, scan)).detach();

    info!(
        "stack dispatcher started (button scan every {} ms)",
        scan.period.as_millis()
    );
    futures_lite::future::block_on(executor.run(core::future::pending::<()>()));
}

/// Start the dispatcher context on the radio core.
pub fn spawn_dispatcher<C, H, R>(
    dispatcher: StackDispatcher<C, H, R>,
    scan: ButtonScan,
    priority: u8,
    stack_kb: usize,
) -> Result<JoinHandle<()>, InitError>
where
    C: ConnectionCallbacks + PairingCallbacks + 'static,
    H: AttributeCallbacks + ButtonInput + 'static,
    R: RadioStack,
{
    spawn_context(Core::Pro, priority, stack_kb, "stack_dispatch\0", move || {
        run_dispatcher(dispatcher, scan)
    })
}
