//! AV session core
//!
//! The entity tables and state machines behind the session manager:
//!
//! * [`tables`]: Link, Stream and Remote-Control Sessions and the
//!   stream-to-RC relation table
//! * [`state`]: the top-level machine (INIT / OPEN), driven by AVRCP
//!   open/close and the RC-related API requests
//! * [`stream`]: the per-stream sub-state-machine
//! * [`connection`]: signaling connect/disconnect, collision and role switch
//!   handling, and execution of stream actions
//! * [`rc`]: remote-control session allocation, binding and re-homing
//!
//! Every state machine here is a pure function from `(state, event)` to a
//! [`Transition`]; the session manager executes the returned actions.

pub mod connection;
pub mod rc;
pub mod state;
pub mod stream;
pub mod tables;

pub use state::*;
pub use stream::*;
pub use tables::*;

use crate::constants::MAX_ACTIONS;
use heapless::Vec;

/// Next state and the actions to run, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<S, A> {
    /// State after the event
    pub next: S,
    /// Actions to execute
    pub actions: Vec<A, MAX_ACTIONS>,
}

impl<S, A> Transition<S, A> {
    /// Move to `next` without doing anything
    #[must_use]
    pub fn to(next: S) -> Self {
        Self {
            next,
            actions: Vec::new(),
        }
    }

    /// Move to `next` and run `actions`
    ///
    /// Actions past `MAX_ACTIONS` are dropped; transition tables never
    /// produce that many.
    #[must_use]
    pub fn with(next: S, actions: impl IntoIterator<Item = A>) -> Self {
        let mut list = Vec::new();
        for action in actions {
            if list.push(action).is_err() {
                error!("[AV] transition action list overflow");
                break;
            }
        }
        Self {
            next,
            actions: list,
        }
    }
}
