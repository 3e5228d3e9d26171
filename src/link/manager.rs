//! Owning context of the connection state machine.
//!
//! Radio callbacks arrive from contexts we do not control, possibly
//! concurrently. Every callback funnels into [`ConnectionManager::dispatch`],
//! which takes one lock around the machine, applies the resulting commands
//! through [`LinkPorts`], and republishes [`LinkStatus`] for lock-free
//! readers.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};

use super::fsm::{LinkContext, LinkFsm, Transition};
use super::states::build_state_table;
use super::{Connection, DisconnectReason, LinkError, LinkEvent, LinkState, LinkStatus, PeerAddr, SecurityLevel};
use crate::app::events::AppEvent;
use crate::app::ports::{ConnectionCallbacks, LinkPorts, PairingCallbacks};
use crate::error::BleError;

struct Inner<P> {
    fsm: LinkFsm,
    ctx: LinkContext,
    ports: P,
    indicator: bool,
    rejected: u32,
}

pub struct ConnectionManager<P: LinkPorts> {
    inner: Mutex<Inner<P>>,
    status: Arc<LinkStatus>,
}

impl<P: LinkPorts> ConnectionManager<P> {
    pub fn new(ports: P, security_enabled: bool, status: Arc<LinkStatus>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                fsm: LinkFsm::new(build_state_table(), LinkState::Advertising),
                ctx: LinkContext::new(security_enabled),
                ports,
                indicator: false,
                rejected: 0,
            }),
            status,
        }
    }

    /// Enter the initial state, which starts advertising. A failure here is
    /// a startup fault and is returned to the caller.
    pub fn start(&self) -> Result<(), BleError> {
        let mut inner = self.lock();
        let Inner {
            fsm, ctx, ports, ..
        } = &mut *inner;
        fsm.start(ctx);
        ctx.commands.link_indicator = false;
        ports.set_link_indicator(false);
        if ctx.commands.start_advertising {
            ctx.commands.start_advertising = false;
            ports.start_advertising()?;
            info!("Advertising successfully started");
        }
        Ok(())
    }

    /// Apply one event. Rejections are transient protocol conditions: they
    /// are logged, counted, and returned for callers that care.
    pub fn dispatch(&self, event: LinkEvent) -> Result<Option<Transition>, LinkError> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let result = inner.fsm.dispatch(&event, &mut inner.ctx);

        match result {
            Ok(Some(t)) => {
                match t.to {
                    LinkState::Connected => {
                        let handle = inner.ctx.connection.map_or(0, |c| c.handle);
                        self.status.publish_connected(handle);
                    }
                    LinkState::Advertising => self.status.publish_disconnected(),
                }
                inner.ports.emit(&AppEvent::LinkStateChanged {
                    from: t.from,
                    to: t.to,
                });
            }
            Ok(None) => {}
            Err(e) => {
                inner.rejected = inner.rejected.wrapping_add(1);
                warn!("link: {} ignored: {}", event.name(), e);
            }
        }

        Self::apply(inner);
        result
    }

    pub fn state(&self) -> LinkState {
        self.lock().fsm.current_state()
    }

    /// Snapshot of the live connection record.
    pub fn connection(&self) -> Option<Connection> {
        self.lock().ctx.connection
    }

    /// Number of events rejected since start.
    pub fn rejected_events(&self) -> u32 {
        self.lock().rejected
    }

    pub fn status(&self) -> &Arc<LinkStatus> {
        &self.status
    }

    /// Run `f` against the ports, for inspection in tests and diagnostics.
    pub fn with_ports<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        f(&self.lock().ports)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Inner<P>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply(inner: &mut Inner<P>) {
        let Inner {
            ctx,
            ports,
            indicator,
            ..
        } = inner;

        if ctx.commands.link_indicator != *indicator {
            *indicator = ctx.commands.link_indicator;
            ports.set_link_indicator(*indicator);
        }

        if ctx.commands.start_advertising {
            ctx.commands.start_advertising = false;
            match ports.start_advertising() {
                Ok(()) => debug!("link: advertising restarted"),
                // Still Advertising as far as the machine is concerned; the
                // next disconnect or a reset is the only recovery.
                Err(e) => warn!("link: {}", e),
            }
        }

        if let Some(accept) = ctx.commands.pairing_reply.take() {
            ports.answer_pairing(accept);
        }

        if let Some(bond) = ctx.commands.persist_bond.take() {
            ports.persist_bond(&bond);
        }

        for notice in &ctx.notices {
            ports.emit(notice);
        }
        ctx.notices.clear();
    }
}

// ───────────────────────────────────────────────────────────────
// Capability implementations
// ───────────────────────────────────────────────────────────────

impl<P: LinkPorts> ConnectionCallbacks for ConnectionManager<P> {
    fn connected(&self, handle: u16, peer: PeerAddr, err: Option<u8>) {
        if let Some(err) = err {
            warn!("Connection failed (err {})", err);
            self.lock().ports.emit(&AppEvent::ConnectionFailed { err });
            return;
        }
        let _ = self.dispatch(LinkEvent::ConnectAccepted { handle, peer });
    }

    fn disconnected(&self, handle: u16, reason: DisconnectReason) {
        // A late disconnect for an earlier or rejected link must not tear
        // down the live one.
        if let Some(live) = self.status.conn_handle() {
            if live != handle {
                warn!(
                    "link: disconnect for handle {} ignored (live {}, reason {})",
                    handle, live, reason
                );
                return;
            }
        }
        let _ = self.dispatch(LinkEvent::Disconnected { reason });
    }

    fn security_changed(&self, level: SecurityLevel, err: Option<u8>) {
        let _ = self.dispatch(LinkEvent::SecurityChanged { level, err });
    }
}

impl<P: LinkPorts> PairingCallbacks for ConnectionManager<P> {
    fn security_request(&self) {
        let _ = self.dispatch(LinkEvent::SecurityRequest);
    }

    fn passkey_display(&self, passkey: u32) {
        let _ = self.dispatch(LinkEvent::PasskeyDisplay(passkey));
    }

    fn passkey_confirm(&self) {
        let _ = self.dispatch(LinkEvent::PasskeyConfirm);
    }

    fn cancel(&self) {
        let _ = self.dispatch(LinkEvent::PairingCancel);
    }

    fn pairing_complete(&self, bonded: bool) {
        let _ = self.dispatch(LinkEvent::PairingComplete { bonded });
    }

    fn pairing_failed(&self, reason: u8) {
        let _ = self.dispatch(LinkEvent::PairingFailed { reason });
    }
}
