//! GMM Attach Request State Machine
//!
//! Tracks the progress of one GPRS attach procedure. It is created together
//! with the MM context and stays in Init until an Attach Request arrives.

use crate::sm::{Fsm, FsmResult};
use std::fmt;

/// Attach request states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachReqState {
    Init,
    Identify,
    Authenticate,
    Accept,
    Reject,
}

impl fmt::Display for AttachReqState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttachReqState::Init => write!(f, "Init"),
            AttachReqState::Identify => write!(f, "Identify"),
            AttachReqState::Authenticate => write!(f, "Authenticate"),
            AttachReqState::Accept => write!(f, "Accept"),
            AttachReqState::Reject => write!(f, "Reject"),
        }
    }
}

/// Attach request events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachReqEvent {
    /// Attach Request received; `imsi_known` tells whether identification can be skipped
    AttachReqRecv { imsi_known: bool },
    IdenRespRecv,
    AuthRespSuccess,
    AttachCompleteRecv,
    Reject,
}

/// Attach request state machine
#[derive(Debug, Clone)]
pub struct AttachReqFsm {
    state: AttachReqState,
    mm_id: u64,
}

impl AttachReqFsm {
    pub fn new(mm_id: u64) -> Self {
        Self {
            state: AttachReqState::Init,
            mm_id,
        }
    }

    fn change(&mut self, new_state: AttachReqState) -> FsmResult<AttachReqState> {
        log::debug!(
            "GMM_ATTACH_REQ FSM [{}]: {} -> {}",
            self.mm_id,
            self.state,
            new_state
        );
        self.state = new_state;
        FsmResult::Transition(new_state)
    }

    /// An attach is in progress
    pub fn is_active(&self) -> bool {
        !matches!(self.state, AttachReqState::Init | AttachReqState::Reject)
    }
}

impl Fsm for AttachReqFsm {
    type State = AttachReqState;
    type Event = AttachReqEvent;

    fn state(&self) -> AttachReqState {
        self.state
    }

    fn dispatch(&mut self, event: &AttachReqEvent) -> FsmResult<AttachReqState> {
        use AttachReqEvent as E;
        use AttachReqState as S;

        match (self.state, event) {
            (_, E::Reject) => self.change(S::Reject),
            (S::Init, E::AttachReqRecv { imsi_known: false }) => self.change(S::Identify),
            (S::Init, E::AttachReqRecv { imsi_known: true }) => self.change(S::Authenticate),
            (S::Identify, E::IdenRespRecv) => self.change(S::Authenticate),
            (S::Authenticate, E::AuthRespSuccess) => self.change(S::Accept),
            (S::Accept, E::AttachCompleteRecv) => self.change(S::Init),
            (state, event) => {
                log::debug!(
                    "GMM_ATTACH_REQ FSM [{}]: event {:?} ignored in state {}",
                    self.mm_id,
                    event,
                    state
                );
                FsmResult::Ignored
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attach_with_identification() {
        let mut fsm = AttachReqFsm::new(1);
        assert!(!fsm.is_active());
        fsm.dispatch(&AttachReqEvent::AttachReqRecv { imsi_known: false });
        assert_eq!(fsm.state(), AttachReqState::Identify);
        assert!(fsm.is_active());
        fsm.dispatch(&AttachReqEvent::IdenRespRecv);
        fsm.dispatch(&AttachReqEvent::AuthRespSuccess);
        assert_eq!(fsm.state(), AttachReqState::Accept);
        fsm.dispatch(&AttachReqEvent::AttachCompleteRecv);
        assert_eq!(fsm.state(), AttachReqState::Init);
    }

    #[test]
    fn test_attach_known_imsi() {
        let mut fsm = AttachReqFsm::new(1);
        fsm.dispatch(&AttachReqEvent::AttachReqRecv { imsi_known: true });
        assert_eq!(fsm.state(), AttachReqState::Authenticate);
        assert_eq!(fsm.dispatch(&AttachReqEvent::IdenRespRecv), FsmResult::Ignored);
    }

    #[test]
    fn test_attach_reject_any_state() {
        let mut fsm = AttachReqFsm::new(1);
        fsm.dispatch(&AttachReqEvent::AttachReqRecv { imsi_known: true });
        fsm.dispatch(&AttachReqEvent::Reject);
        assert_eq!(fsm.state(), AttachReqState::Reject);
        assert!(!fsm.is_active());
    }
}
