//! Function-pointer state machine engine for the link.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  StateTable                                                 │
//! │  ┌─────────────┬──────────┬──────────┬────────────────────┐ │
//! │  │ LinkState   │ on_enter │ on_exit  │ on_event           │ │
//! │  ├─────────────┼──────────┼──────────┼────────────────────┤ │
//! │  │ Advertising │ fn(ctx)  │ -        │ fn(ctx, ev)->Result│ │
//! │  │ Connected   │ fn(ctx)  │ fn(ctx)  │ fn(ctx, ev)->Result│ │
//! │  └─────────────┴──────────┴──────────┴────────────────────┘ │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `dispatch` hands an event to the current state's `on_event`. `Ok(Some(next))`
//! runs `on_exit` for the current state and `on_enter` for the next. Handlers
//! never touch hardware: they write commands into [`LinkContext`] and the
//! owner applies them after the dispatch returns.

use log::info;

use super::{Connection, LinkError, LinkEvent, LinkState};
use crate::app::events::AppEvent;
use crate::app::ports::BondRecord;

// ---------------------------------------------------------------------------
// Blackboard
// ---------------------------------------------------------------------------

/// Side effects requested by handlers, applied by the owner.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkCommands {
    /// Desired level of the link indicator output.
    pub link_indicator: bool,
    /// Start advertising once the dispatch completes.
    pub start_advertising: bool,
    /// Bond to hand to the settings store.
    pub persist_bond: Option<BondRecord>,
    /// Answer for the stack's pending confirmation request.
    pub pairing_reply: Option<bool>,
}

/// Shared state threaded through every handler.
pub struct LinkContext {
    /// Present exactly while `Connected`.
    pub connection: Option<Connection>,
    /// Whether the pairing sub-machine runs at all.
    pub security_enabled: bool,
    pub commands: LinkCommands,
    /// Observability events queued by handlers, drained by the owner.
    pub notices: heapless::Vec<AppEvent, 8>,
}

impl LinkContext {
    pub fn new(security_enabled: bool) -> Self {
        Self {
            connection: None,
            security_enabled,
            commands: LinkCommands::default(),
            notices: heapless::Vec::new(),
        }
    }

    /// Queue an observability event; overflow drops the newest notice.
    pub fn notify(&mut self, event: AppEvent) {
        if self.notices.push(event).is_err() {
            log::warn!("link: notice buffer full, dropping {:?}", event);
        }
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// Signature for `on_enter` and `on_exit` actions.
pub type StateActionFn = fn(&mut LinkContext);

/// Signature for the event handler. `Ok(Some(next))` transitions,
/// `Ok(None)` stays, `Err` rejects the event without side effects on state.
pub type StateEventFn = fn(&mut LinkContext, &LinkEvent) -> Result<Option<LinkState>, LinkError>;

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

pub struct StateDescriptor {
    pub id: LinkState,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_event: StateEventFn,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A completed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LinkState,
    pub to: LinkState,
}

pub struct LinkFsm {
    /// Fixed-size table indexed by `LinkState as usize`.
    table: [StateDescriptor; LinkState::COUNT],
    current: usize,
    transitions: u64,
}

impl LinkFsm {
    pub fn new(table: [StateDescriptor; LinkState::COUNT], initial: LinkState) -> Self {
        Self {
            table,
            current: initial as usize,
            transitions: 0,
        }
    }

    /// Run the initial `on_enter`. Call once after construction.
    pub fn start(&mut self, ctx: &mut LinkContext) {
        info!("link FSM starting in state: {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    /// Feed one event to the current state.
    pub fn dispatch(
        &mut self,
        event: &LinkEvent,
        ctx: &mut LinkContext,
    ) -> Result<Option<Transition>, LinkError> {
        let next = (self.table[self.current].on_event)(ctx, event)?;
        Ok(next.map(|to| {
            let from = self.current_state();
            self.transition(to, ctx);
            Transition { from, to }
        }))
    }

    pub fn current_state(&self) -> LinkState {
        LinkState::from_index(self.current)
    }

    /// Number of transitions taken since construction.
    pub fn transition_count(&self) -> u64 {
        self.transitions
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn transition(&mut self, next_id: LinkState, ctx: &mut LinkContext) {
        let next_idx = next_id as usize;

        info!(
            "link FSM transition: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;
        self.transitions += 1;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}
