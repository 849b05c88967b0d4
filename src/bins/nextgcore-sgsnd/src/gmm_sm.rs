//! GMM State Machine
//!
//! GPRS Mobility Management state of one MM context
//! (3GPP TS 24.008 Section 4.1.3.3).

use crate::context::RanType;
use crate::sm::{Fsm, FsmResult};
use std::fmt;

// ============================================================================
// States and Events
// ============================================================================

/// GMM states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GmmState {
    /// GMM-DEREGISTERED
    Deregistered,
    /// GMM-COMMON-PROCEDURE-INITIATED
    CommonProcInit,
    /// GMM-REGISTERED.NORMAL-SERVICE
    RegisteredNormal,
    /// GMM-REGISTERED.SUSPENDED
    RegisteredSuspended,
    /// GMM-DEREGISTERED-INITIATED
    DeregisteredInit,
}

impl GmmState {
    pub const ALL: [GmmState; 5] = [
        GmmState::Deregistered,
        GmmState::CommonProcInit,
        GmmState::RegisteredNormal,
        GmmState::RegisteredSuspended,
        GmmState::DeregisteredInit,
    ];
}

impl fmt::Display for GmmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GmmState::Deregistered => write!(f, "Deregistered"),
            GmmState::CommonProcInit => write!(f, "CommonProcedureInitiated"),
            GmmState::RegisteredNormal => write!(f, "Registered.NORMAL"),
            GmmState::RegisteredSuspended => write!(f, "Registered.SUSPENDED"),
            GmmState::DeregisteredInit => write!(f, "DeregisteredInitiated"),
        }
    }
}

/// Payload of an access type change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RatChangeData {
    /// Access type the MS moved to
    pub new_ran_type: RanType,
    /// LLME of the new Gb association, if any
    pub llme: Option<u64>,
}

/// GMM events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GmmEvent {
    CommonProcInitReq,
    CommonProcSuccess,
    AttachSuccess,
    Suspend,
    Resume,
    /// Any-state: radio access type changed
    RatChange(RatChangeData),
    /// Any-state: force back to Deregistered
    Cleanup,
}

impl fmt::Display for GmmEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GmmEvent::CommonProcInitReq => write!(f, "COMMON_PROC_INIT_REQ"),
            GmmEvent::CommonProcSuccess => write!(f, "COMMON_PROC_SUCCESS"),
            GmmEvent::AttachSuccess => write!(f, "ATTACH_SUCCESS"),
            GmmEvent::Suspend => write!(f, "SUSPEND"),
            GmmEvent::Resume => write!(f, "RESUME"),
            GmmEvent::RatChange(_) => write!(f, "RAT_CHANGE"),
            GmmEvent::Cleanup => write!(f, "CLEANUP"),
        }
    }
}

// ============================================================================
// GMM State Machine
// ============================================================================

/// GMM State Machine
#[derive(Debug, Clone)]
pub struct GmmFsm {
    /// Current state
    state: GmmState,
    /// MM context pool id
    mm_id: u64,
}

impl GmmFsm {
    /// Create a new GMM FSM in Deregistered
    pub fn new(mm_id: u64) -> Self {
        Self {
            state: GmmState::Deregistered,
            mm_id,
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: GmmState) {
        log::debug!("GMM FSM [{}]: {} -> {}", self.mm_id, self.state, new_state);
        self.state = new_state;
    }

    fn change(&mut self, new_state: GmmState) -> FsmResult<GmmState> {
        self.transition(new_state);
        FsmResult::Transition(new_state)
    }

    /// Events valid in every state. Returns None for per-state events.
    fn allstate_action(&mut self, event: &GmmEvent) -> Option<FsmResult<GmmState>> {
        match event {
            GmmEvent::RatChange(data) => {
                log::debug!(
                    "GMM FSM [{}]: access type change to {}",
                    self.mm_id,
                    data.new_ran_type
                );
                if self.state == GmmState::CommonProcInit {
                    Some(self.change(GmmState::Deregistered))
                } else {
                    Some(FsmResult::Handled)
                }
            }
            GmmEvent::Cleanup => {
                if self.state != GmmState::Deregistered {
                    Some(self.change(GmmState::Deregistered))
                } else {
                    Some(FsmResult::Handled)
                }
            }
            _ => None,
        }
    }

    fn state_deregistered(&mut self, event: &GmmEvent) -> FsmResult<GmmState> {
        match event {
            GmmEvent::CommonProcInitReq => self.change(GmmState::CommonProcInit),
            GmmEvent::AttachSuccess => self.change(GmmState::RegisteredNormal),
            _ => FsmResult::Ignored,
        }
    }

    fn state_common_proc_init(&mut self, event: &GmmEvent) -> FsmResult<GmmState> {
        match event {
            GmmEvent::CommonProcSuccess | GmmEvent::AttachSuccess => {
                self.change(GmmState::RegisteredNormal)
            }
            _ => FsmResult::Ignored,
        }
    }

    fn state_registered_normal(&mut self, event: &GmmEvent) -> FsmResult<GmmState> {
        match event {
            GmmEvent::CommonProcInitReq => self.change(GmmState::CommonProcInit),
            GmmEvent::Suspend => self.change(GmmState::RegisteredSuspended),
            _ => FsmResult::Ignored,
        }
    }

    fn state_registered_suspended(&mut self, event: &GmmEvent) -> FsmResult<GmmState> {
        match event {
            GmmEvent::Resume => self.change(GmmState::RegisteredNormal),
            _ => FsmResult::Ignored,
        }
    }
}

impl Fsm for GmmFsm {
    type State = GmmState;
    type Event = GmmEvent;

    fn state(&self) -> GmmState {
        self.state
    }

    fn dispatch(&mut self, event: &GmmEvent) -> FsmResult<GmmState> {
        if let Some(result) = self.allstate_action(event) {
            return result;
        }

        let result = match self.state {
            GmmState::Deregistered => self.state_deregistered(event),
            GmmState::CommonProcInit => self.state_common_proc_init(event),
            GmmState::RegisteredNormal => self.state_registered_normal(event),
            GmmState::RegisteredSuspended => self.state_registered_suspended(event),
            // Reserved for network initiated detach
            GmmState::DeregisteredInit => FsmResult::Ignored,
        };

        if result == FsmResult::Ignored {
            log::debug!(
                "GMM FSM [{}]: event {} ignored in state {}",
                self.mm_id,
                event,
                self.state
            );
        }
        result
    }
}
