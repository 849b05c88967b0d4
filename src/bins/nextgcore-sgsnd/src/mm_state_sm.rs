//! MM State Machines
//!
//! Radio connection state of an MM context (3GPP TS 23.060 Section 6.1):
//! - Gb (GERAN): IDLE / READY / STANDBY
//! - Iu (UTRAN): PMM-DETACHED / PMM-CONNECTED / PMM-IDLE
//!
//! Side effects tied to a state entry (READY timer, GTP-U re-anchoring on
//! PMM-IDLE) are run by the context layer when it sees the transition.

use crate::sm::{Fsm, FsmResult};
use std::fmt;

// ============================================================================
// Gb MM State
// ============================================================================

/// Gb MM states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GbMmState {
    Idle,
    Ready,
    Standby,
}

impl GbMmState {
    pub const ALL: [GbMmState; 3] = [GbMmState::Idle, GbMmState::Ready, GbMmState::Standby];
}

impl fmt::Display for GbMmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GbMmState::Idle => write!(f, "Idle"),
            GbMmState::Ready => write!(f, "Ready"),
            GbMmState::Standby => write!(f, "Standby"),
        }
    }
}

/// Gb MM events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GbMmEvent {
    GprsAttach,
    PduReception,
    ImplicitDetach,
    ReadyTimerExpiry,
}

impl GbMmEvent {
    pub const ALL: [GbMmEvent; 4] = [
        GbMmEvent::GprsAttach,
        GbMmEvent::PduReception,
        GbMmEvent::ImplicitDetach,
        GbMmEvent::ReadyTimerExpiry,
    ];
}

/// Gb MM state machine, keyed by TLLI
#[derive(Debug, Clone)]
pub struct GbMmStateFsm {
    state: GbMmState,
    tlli: u32,
}

impl GbMmStateFsm {
    /// Create a new Gb MM state FSM in Idle
    pub fn new(tlli: u32) -> Self {
        Self {
            state: GbMmState::Idle,
            tlli,
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: GbMmState) {
        log::debug!(
            "MM_STATE_Gb FSM [{:08x}]: {} -> {}",
            self.tlli,
            self.state,
            new_state
        );
        self.state = new_state;
    }

    fn change(&mut self, new_state: GbMmState) -> FsmResult<GbMmState> {
        self.transition(new_state);
        FsmResult::Transition(new_state)
    }
}

impl Fsm for GbMmStateFsm {
    type State = GbMmState;
    type Event = GbMmEvent;

    fn state(&self) -> GbMmState {
        self.state
    }

    fn dispatch(&mut self, event: &GbMmEvent) -> FsmResult<GbMmState> {
        match (self.state, event) {
            (GbMmState::Idle, GbMmEvent::GprsAttach) => self.change(GbMmState::Ready),
            // PDU in READY restarts T3314, no state change
            (GbMmState::Ready, GbMmEvent::PduReception) => FsmResult::Handled,
            (GbMmState::Ready, GbMmEvent::ReadyTimerExpiry) => self.change(GbMmState::Standby),
            (GbMmState::Ready, GbMmEvent::ImplicitDetach) => self.change(GbMmState::Idle),
            (GbMmState::Standby, GbMmEvent::PduReception) => self.change(GbMmState::Ready),
            (GbMmState::Standby, GbMmEvent::ImplicitDetach) => self.change(GbMmState::Idle),
            (GbMmState::Idle, GbMmEvent::ImplicitDetach) => FsmResult::Handled,
            (state, event) => {
                log::debug!(
                    "MM_STATE_Gb FSM [{:08x}]: event {:?} ignored in state {}",
                    self.tlli,
                    event,
                    state
                );
                FsmResult::Ignored
            }
        }
    }
}

// ============================================================================
// Iu PMM State
// ============================================================================

/// Iu PMM states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IuMmState {
    Detached,
    Connected,
    Idle,
}

impl IuMmState {
    pub const ALL: [IuMmState; 3] = [IuMmState::Detached, IuMmState::Connected, IuMmState::Idle];
}

impl fmt::Display for IuMmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IuMmState::Detached => write!(f, "Detached"),
            IuMmState::Connected => write!(f, "Connected"),
            IuMmState::Idle => write!(f, "Idle"),
        }
    }
}

/// Iu PMM events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IuMmEvent {
    PsAttach,
    PsConnRelease,
    PsConnEstablish,
    ImplicitDetach,
    RaUpdate,
}

impl IuMmEvent {
    pub const ALL: [IuMmEvent; 5] = [
        IuMmEvent::PsAttach,
        IuMmEvent::PsConnRelease,
        IuMmEvent::PsConnEstablish,
        IuMmEvent::ImplicitDetach,
        IuMmEvent::RaUpdate,
    ];
}

/// Iu PMM state machine, keyed by the Iu connection id
#[derive(Debug, Clone)]
pub struct IuMmStateFsm {
    state: IuMmState,
    conn_id: u32,
}

impl IuMmStateFsm {
    /// Create a new PMM FSM in Detached
    pub fn new(conn_id: u32) -> Self {
        Self {
            state: IuMmState::Detached,
            conn_id,
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: IuMmState) {
        log::debug!(
            "MM_STATE_Iu FSM [{}]: {} -> {}",
            self.conn_id,
            self.state,
            new_state
        );
        self.state = new_state;
    }

    fn change(&mut self, new_state: IuMmState) -> FsmResult<IuMmState> {
        self.transition(new_state);
        FsmResult::Transition(new_state)
    }
}

impl Fsm for IuMmStateFsm {
    type State = IuMmState;
    type Event = IuMmEvent;

    fn state(&self) -> IuMmState {
        self.state
    }

    fn dispatch(&mut self, event: &IuMmEvent) -> FsmResult<IuMmState> {
        match (self.state, event) {
            (IuMmState::Detached, IuMmEvent::PsAttach) => self.change(IuMmState::Connected),
            (IuMmState::Detached, IuMmEvent::ImplicitDetach) => FsmResult::Handled,
            (IuMmState::Connected, IuMmEvent::PsConnRelease) => self.change(IuMmState::Idle),
            (IuMmState::Connected, IuMmEvent::ImplicitDetach) => self.change(IuMmState::Detached),
            (IuMmState::Connected, IuMmEvent::RaUpdate) => FsmResult::Handled,
            (IuMmState::Idle, IuMmEvent::PsConnEstablish) => self.change(IuMmState::Connected),
            (IuMmState::Idle, IuMmEvent::ImplicitDetach) => self.change(IuMmState::Detached),
            (state, event) => {
                log::debug!(
                    "MM_STATE_Iu FSM [{}]: event {:?} ignored in state {}",
                    self.conn_id,
                    event,
                    state
                );
                FsmResult::Ignored
            }
        }
    }
}
