//! Link state handlers and the state table.
//!
//! Each state has optional enter/exit actions and one event handler. All of
//! them only read and write the [`LinkContext`] blackboard.

use log::{info, warn};

use super::fsm::{LinkContext, StateDescriptor};
use super::{Connection, LinkError, LinkEvent, LinkState, SecurityState};
use crate::app::events::AppEvent;
use crate::app::ports::BondRecord;

/// Build the state table. Order must match `LinkState as usize`.
pub fn build_state_table() -> [StateDescriptor; LinkState::COUNT] {
    [
        StateDescriptor {
            id: LinkState::Advertising,
            name: "Advertising",
            on_enter: Some(advertising_enter),
            on_exit: None,
            on_event: advertising_event,
        },
        StateDescriptor {
            id: LinkState::Connected,
            name: "Connected",
            on_enter: Some(connected_enter),
            on_exit: Some(connected_exit),
            on_event: connected_event,
        },
    ]
}

// ── Advertising ───────────────────────────────────────────────

fn advertising_enter(ctx: &mut LinkContext) {
    ctx.connection = None;
    ctx.commands.link_indicator = false;
    // Restart explicitly on every entry rather than relying on the stack.
    ctx.commands.start_advertising = true;
}

fn advertising_event(
    ctx: &mut LinkContext,
    event: &LinkEvent,
) -> Result<Option<LinkState>, LinkError> {
    match *event {
        LinkEvent::ConnectAccepted { handle, peer } => {
            ctx.connection = Some(Connection::new(handle, peer));
            Ok(Some(LinkState::Connected))
        }
        _ if event.requires_security() && !ctx.security_enabled => {
            Err(LinkError::SecurityDisabled)
        }
        _ => Err(LinkError::NotConnected),
    }
}

// ── Connected ─────────────────────────────────────────────────

fn connected_enter(ctx: &mut LinkContext) {
    ctx.commands.link_indicator = true;
    ctx.commands.start_advertising = false;
    if let Some(conn) = ctx.connection {
        info!("Connected");
        ctx.notify(AppEvent::Connected { peer: conn.peer });
    }
}

fn connected_exit(ctx: &mut LinkContext) {
    ctx.commands.link_indicator = false;
    // Dropping the record resets the security sub-state.
    ctx.connection = None;
}

fn connected_event(
    ctx: &mut LinkContext,
    event: &LinkEvent,
) -> Result<Option<LinkState>, LinkError> {
    if event.requires_security() && !ctx.security_enabled {
        return Err(LinkError::SecurityDisabled);
    }
    let Some(mut conn) = ctx.connection else {
        // Connected without a record cannot happen through the table;
        // recover by falling back to Advertising.
        warn!("link: Connected without a connection record");
        return Ok(Some(LinkState::Advertising));
    };

    let next = match *event {
        LinkEvent::ConnectAccepted { .. } => return Err(LinkError::AlreadyConnected),

        LinkEvent::Disconnected { reason } => {
            info!("Disconnected (reason {})", reason);
            ctx.notify(AppEvent::Disconnected {
                peer: conn.peer,
                reason,
            });
            return Ok(Some(LinkState::Advertising));
        }

        LinkEvent::SecurityRequest => {
            if conn.security != SecurityState::Pairing {
                conn.security = SecurityState::Pairing;
                conn.passkey = None;
            }
            None
        }

        LinkEvent::PasskeyDisplay(passkey) => {
            // The stack only shows a passkey once pairing has started.
            conn.security = SecurityState::Pairing;
            conn.passkey = Some(passkey);
            info!("Passkey for {}: {:06}", conn.peer, passkey);
            ctx.notify(AppEvent::PasskeyDisplay {
                peer: conn.peer,
                passkey,
            });
            None
        }

        LinkEvent::PasskeyConfirm => {
            if conn.security != SecurityState::Pairing {
                return Err(LinkError::NotPairing);
            }
            conn.security = SecurityState::Paired;
            conn.passkey = None;
            ctx.commands.pairing_reply = Some(true);
            None
        }

        LinkEvent::PairingCancel => {
            if conn.security != SecurityState::Pairing {
                return Err(LinkError::NotPairing);
            }
            conn.security = SecurityState::Unauthenticated;
            conn.passkey = None;
            ctx.commands.pairing_reply = Some(false);
            info!("Pairing cancelled: {}", conn.peer);
            ctx.notify(AppEvent::PairingCancelled { peer: conn.peer });
            None
        }

        LinkEvent::SecurityChanged { level, err } => {
            match err {
                None => {
                    conn.security_level = level;
                    info!("Security changed: {} level {}", conn.peer, level);
                }
                Some(e) => warn!("Security failed: {} level {} err {}", conn.peer, level, e),
            }
            ctx.notify(AppEvent::SecurityChanged {
                peer: conn.peer,
                level,
                err,
            });
            None
        }

        LinkEvent::PairingComplete { bonded } => {
            conn.bonded = bonded;
            info!("Pairing completed: {}, bonded: {}", conn.peer, u8::from(bonded));
            if bonded {
                ctx.commands.persist_bond = Some(BondRecord {
                    peer: conn.peer,
                    level: conn.security_level,
                });
            }
            ctx.notify(AppEvent::PairingComplete {
                peer: conn.peer,
                bonded,
            });
            None
        }

        LinkEvent::PairingFailed { reason } => {
            warn!("Pairing failed conn: {}, reason {}", conn.peer, reason);
            ctx.notify(AppEvent::PairingFailed {
                peer: conn.peer,
                reason,
            });
            None
        }
    };

    ctx.connection = Some(conn);
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::super::fsm::LinkFsm;
    use super::super::{DisconnectReason, PeerAddr, SecurityLevel};
    use super::*;

    const PEER: PeerAddr = PeerAddr([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);

    fn connected(security: bool) -> (LinkFsm, LinkContext) {
        let mut fsm = LinkFsm::new(build_state_table(), LinkState::Advertising);
        let mut ctx = LinkContext::new(security);
        fsm.start(&mut ctx);
        fsm.dispatch(
            &LinkEvent::ConnectAccepted {
                handle: 1,
                peer: PEER,
            },
            &mut ctx,
        )
        .unwrap();
        ctx.notices.clear();
        (fsm, ctx)
    }

    fn security(ctx: &LinkContext) -> Option<SecurityState> {
        ctx.connection.map(|c| c.security)
    }

    #[test]
    fn table_order_matches_ids() {
        for (i, row) in build_state_table().iter().enumerate() {
            assert_eq!(row.id as usize, i);
        }
    }

    #[test]
    fn request_then_confirm_pairs() {
        let (mut fsm, mut ctx) = connected(true);
        fsm.dispatch(&LinkEvent::SecurityRequest, &mut ctx).unwrap();
        fsm.dispatch(&LinkEvent::PasskeyDisplay(123_456), &mut ctx).unwrap();
        assert_eq!(ctx.connection.and_then(|c| c.passkey), Some(123_456));
        fsm.dispatch(&LinkEvent::PasskeyConfirm, &mut ctx).unwrap();
        assert_eq!(security(&ctx), Some(SecurityState::Paired));
        assert_eq!(ctx.connection.and_then(|c| c.passkey), None);
        assert_eq!(ctx.commands.pairing_reply, Some(true));
        assert_eq!(fsm.current_state(), LinkState::Connected);
    }

    #[test]
    fn cancel_returns_to_unauthenticated() {
        let (mut fsm, mut ctx) = connected(true);
        fsm.dispatch(&LinkEvent::SecurityRequest, &mut ctx).unwrap();
        fsm.dispatch(&LinkEvent::PairingCancel, &mut ctx).unwrap();
        assert_eq!(security(&ctx), Some(SecurityState::Unauthenticated));
        assert_eq!(ctx.commands.pairing_reply, Some(false));
        assert_eq!(
            ctx.notices.last(),
            Some(&AppEvent::PairingCancelled { peer: PEER })
        );
    }

    #[test]
    fn passkey_display_starts_pairing_implicitly() {
        let (mut fsm, mut ctx) = connected(true);
        fsm.dispatch(&LinkEvent::PasskeyDisplay(42), &mut ctx).unwrap();
        assert_eq!(security(&ctx), Some(SecurityState::Pairing));
    }

    #[test]
    fn confirm_without_pairing_is_rejected() {
        let (mut fsm, mut ctx) = connected(true);
        assert_eq!(
            fsm.dispatch(&LinkEvent::PasskeyConfirm, &mut ctx),
            Err(LinkError::NotPairing)
        );
        assert_eq!(
            fsm.dispatch(&LinkEvent::PairingCancel, &mut ctx),
            Err(LinkError::NotPairing)
        );
        assert_eq!(security(&ctx), Some(SecurityState::Unauthenticated));
        assert_eq!(ctx.commands.pairing_reply, None);
    }

    #[test]
    fn security_events_rejected_when_disabled() {
        let (mut fsm, mut ctx) = connected(false);
        assert_eq!(
            fsm.dispatch(&LinkEvent::SecurityRequest, &mut ctx),
            Err(LinkError::SecurityDisabled)
        );
        assert_eq!(
            fsm.dispatch(&LinkEvent::PairingComplete { bonded: true }, &mut ctx),
            Err(LinkError::SecurityDisabled)
        );
        assert_eq!(security(&ctx), Some(SecurityState::Unauthenticated));
    }

    #[test]
    fn security_changed_is_recorded_even_when_disabled() {
        let (mut fsm, mut ctx) = connected(false);
        fsm.dispatch(
            &LinkEvent::SecurityChanged {
                level: SecurityLevel::L2,
                err: None,
            },
            &mut ctx,
        )
        .unwrap();
        assert_eq!(
            ctx.connection.map(|c| c.security_level),
            Some(SecurityLevel::L2)
        );
    }

    #[test]
    fn failed_security_change_keeps_level() {
        let (mut fsm, mut ctx) = connected(true);
        fsm.dispatch(
            &LinkEvent::SecurityChanged {
                level: SecurityLevel::L4,
                err: Some(9),
            },
            &mut ctx,
        )
        .unwrap();
        assert_eq!(
            ctx.connection.map(|c| c.security_level),
            Some(SecurityLevel::L1)
        );
    }

    #[test]
    fn pairing_outcomes_do_not_change_link_state() {
        let (mut fsm, mut ctx) = connected(true);
        fsm.dispatch(&LinkEvent::PairingFailed { reason: 4 }, &mut ctx).unwrap();
        assert_eq!(fsm.current_state(), LinkState::Connected);
        fsm.dispatch(&LinkEvent::PairingComplete { bonded: false }, &mut ctx).unwrap();
        assert_eq!(fsm.current_state(), LinkState::Connected);
        assert!(ctx.commands.persist_bond.is_none());
    }

    #[test]
    fn bonded_pairing_requests_persistence() {
        let (mut fsm, mut ctx) = connected(true);
        fsm.dispatch(
            &LinkEvent::SecurityChanged {
                level: SecurityLevel::L3,
                err: None,
            },
            &mut ctx,
        )
        .unwrap();
        fsm.dispatch(&LinkEvent::PairingComplete { bonded: true }, &mut ctx).unwrap();
        assert_eq!(
            ctx.commands.persist_bond,
            Some(BondRecord {
                peer: PEER,
                level: SecurityLevel::L3
            })
        );
        assert_eq!(ctx.connection.map(|c| c.bonded), Some(true));
    }

    #[test]
    fn disconnect_from_any_security_state() {
        for setup in [
            &[][..],
            &[LinkEvent::SecurityRequest][..],
            &[LinkEvent::SecurityRequest, LinkEvent::PasskeyConfirm][..],
        ] {
            let (mut fsm, mut ctx) = connected(true);
            for ev in setup {
                fsm.dispatch(ev, &mut ctx).unwrap();
            }
            fsm.dispatch(
                &LinkEvent::Disconnected {
                    reason: DisconnectReason::REMOTE_USER_TERMINATED,
                },
                &mut ctx,
            )
            .unwrap();
            assert_eq!(fsm.current_state(), LinkState::Advertising);
            assert!(ctx.connection.is_none());
        }
    }
}
