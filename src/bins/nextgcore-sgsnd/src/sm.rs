//! SGSN State Machine Framework
//!
//! Common trait for the per-subscriber state machines (GMM, MM state for Gb
//! and Iu, attach request). Machines only track state; side effects on the
//! context graph are carried out by the caller according to the result.

use std::fmt;

/// Outcome of dispatching an event to a state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsmResult<S> {
    /// The machine moved to a new state
    Transition(S),
    /// The event was handled without a state change
    Handled,
    /// The event is not valid in the current state
    Ignored,
}

impl<S> FsmResult<S> {
    /// New state if this result is a transition
    pub fn new_state(&self) -> Option<&S> {
        match self {
            FsmResult::Transition(s) => Some(s),
            _ => None,
        }
    }
}

/// FSM trait for the per-subscriber state machines
pub trait Fsm {
    type State: Copy + PartialEq + fmt::Display;
    type Event: fmt::Debug;

    /// Current state
    fn state(&self) -> Self::State;

    /// Dispatch an event
    fn dispatch(&mut self, event: &Self::Event) -> FsmResult<Self::State>;

    /// Check if in specific state
    fn check_state(&self, state: Self::State) -> bool {
        self.state() == state
    }
}
