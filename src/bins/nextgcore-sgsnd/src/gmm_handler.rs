//! SGSN GMM Handler
//!
//! Drives the per-MM state machines from inbound mobility events and applies
//! their side effects on the registries.

use crate::config::AuthPolicy;
use crate::context::{AuthState, Rai, RanType, SgsnContext};
use crate::error::{GmmCause, SgsnError, SgsnResult};
use crate::gmm_sm::{GmmEvent, GmmState, RatChangeData};
use crate::metrics::{MmCtxCounter, SgsnCounter};
use crate::mm_state_sm::{GbMmEvent, GbMmState, GbMmStateFsm, IuMmEvent, IuMmState, IuMmStateFsm};
use crate::attach_req_sm::AttachReqEvent;
use crate::ptmsi::{tmsi_to_tlli, TlliType, GSM_RESERVED_TMSI};
use crate::sm::{Fsm, FsmResult};
use crate::timer::SgsnTimerId;

/// Inbound mobility events of one MS
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MmEvent {
    AttachRequest,
    IdentityResponse { imsi: String },
    AuthenticationSuccess,
    AttachComplete,
    AttachReject,
    Detach,
    Suspend,
    Resume,
    RoutingAreaUpdate { rai: Rai },
    AccessTypeChange(RatChangeData),
    PsConnEstablish,
    PsConnRelease,
    PduReceived { len: usize },
    ReadyTimerExpiry,
}

impl SgsnContext {
    /// Handle an inbound event for `mm_id`
    pub fn handle_mm_event(&mut self, mm_id: u64, event: MmEvent) -> SgsnResult<()> {
        let mm = self.mm_ctx(mm_id).ok_or(SgsnError::UnknownMmCtx(mm_id))?;
        let ctrg = mm.ctrg;
        log::debug!("[{}] MM event {:?}", mm.log_id(), event);

        if !matches!(event, MmEvent::PduReceived { .. } | MmEvent::ReadyTimerExpiry) {
            self.counters.mm_inc(ctrg, MmCtxCounter::SignPacketsIn);
        }

        match event {
            MmEvent::AttachRequest => {
                self.counters.inc(SgsnCounter::GprsAttachRequested);
                let imsi_known = self.mm_ctx(mm_id).is_some_and(|mm| !mm.imsi.is_empty());
                self.attach_req_dispatch(mm_id, &AttachReqEvent::AttachReqRecv { imsi_known });
                self.gmm_fsm_dispatch(mm_id, &GmmEvent::CommonProcInitReq)?;
                if imsi_known {
                    self.mm_authorize(mm_id)?;
                }
            }
            MmEvent::IdentityResponse { imsi } => {
                let imsi_unset = self.mm_ctx(mm_id).is_some_and(|mm| mm.imsi.is_empty());
                if imsi_unset {
                    if let Some(old) = self.mm_ctx_by_imsi(&imsi).filter(|old| *old != mm_id) {
                        log::info!("[{mm_id}] IMSI[{imsi}] already held by MM context {old}, releasing it");
                        self.mm_ctx_cleanup_free(old);
                    }
                }
                if let Some(mm) = self.mm_ctx_mut(mm_id) {
                    mm.imsi = imsi;
                }
                self.attach_req_dispatch(mm_id, &AttachReqEvent::IdenRespRecv);
                self.mm_authorize(mm_id)?;
            }
            MmEvent::AuthenticationSuccess => {
                if let Some(mm) = self.mm_ctx_mut(mm_id) {
                    mm.auth_state = AuthState::Authenticated;
                }
                self.mm_attach_accept(mm_id)?;
            }
            MmEvent::AttachComplete => {
                self.attach_req_dispatch(mm_id, &AttachReqEvent::AttachCompleteRecv);
                self.gmm_fsm_dispatch(mm_id, &GmmEvent::AttachSuccess)?;
                if let Some(mm) = self.mm_ctx_mut(mm_id) {
                    // The MS confirmed the new P-TMSI
                    mm.p_tmsi_old = 0;
                    if mm.gb.tlli_new != 0 {
                        mm.gb.tlli = mm.gb.tlli_new;
                    }
                }
                match self.mm_ctx(mm_id).map(|mm| mm.ran_type) {
                    Some(RanType::GeranGb) => {
                        self.gb_mm_dispatch(mm_id, GbMmEvent::GprsAttach)?;
                    }
                    Some(RanType::UtranIu) => {
                        self.iu_mm_dispatch(mm_id, IuMmEvent::PsAttach)?;
                    }
                    None => {}
                }
                self.counters.inc(SgsnCounter::GprsAttachAccepted);
            }
            MmEvent::AttachReject => {
                self.attach_req_dispatch(mm_id, &AttachReqEvent::Reject);
                self.access_denied(mm_id);
            }
            MmEvent::Detach => {
                self.counters.inc(SgsnCounter::GprsDetachRequested);
                self.mm_ctx_implicit_detach(mm_id);
            }
            MmEvent::Suspend => {
                if self.gmm_fsm_dispatch(mm_id, &GmmEvent::Suspend)?.new_state().is_some() {
                    self.counters.mm_inc(ctrg, MmCtxCounter::Suspend);
                }
            }
            MmEvent::Resume => {
                self.gmm_fsm_dispatch(mm_id, &GmmEvent::Resume)?;
            }
            MmEvent::RoutingAreaUpdate { rai } => {
                self.counters.inc(SgsnCounter::GprsRoutingAreaRequested);
                self.counters.mm_inc(ctrg, MmCtxCounter::RaUpdate);
                let ran_type = match self.mm_ctx_mut(mm_id) {
                    Some(mm) => {
                        mm.ra = rai;
                        mm.ran_type
                    }
                    None => return Ok(()),
                };
                if ran_type == RanType::UtranIu {
                    self.iu_mm_dispatch(mm_id, IuMmEvent::RaUpdate)?;
                }
            }
            MmEvent::AccessTypeChange(data) => {
                self.gmm_fsm_dispatch(mm_id, &GmmEvent::RatChange(data))?;
            }
            MmEvent::PsConnEstablish => {
                self.iu_mm_dispatch(mm_id, IuMmEvent::PsConnEstablish)?;
            }
            MmEvent::PsConnRelease => {
                self.iu_mm_dispatch(mm_id, IuMmEvent::PsConnRelease)?;
            }
            MmEvent::PduReceived { len } => {
                self.counters.mm_inc(ctrg, MmCtxCounter::UdataPacketsIn);
                self.counters.mm_add(ctrg, MmCtxCounter::UdataBytesIn, len as u64);
                self.gb_mm_dispatch(mm_id, GbMmEvent::PduReception)?;
            }
            MmEvent::ReadyTimerExpiry => {
                self.gb_mm_dispatch(mm_id, GbMmEvent::ReadyTimerExpiry)?;
            }
        }
        Ok(())
    }

    /// Decide on access for the MS according to the authorization policy
    fn mm_authorize(&mut self, mm_id: u64) -> SgsnResult<()> {
        self.mm_update_subscriber_data(mm_id)?;

        let policy = self.config.auth_policy;
        let require_auth = self.config.require_authentication;
        let Some(mm) = self.mm_ctx_mut(mm_id) else {
            return Err(SgsnError::UnknownMmCtx(mm_id));
        };
        let known = mm.subscr.is_some();

        mm.auth_state = match policy {
            AuthPolicy::AcceptAll => AuthState::Authenticated,
            AuthPolicy::Closed | AuthPolicy::AclOnly if known => AuthState::Authenticated,
            AuthPolicy::Remote if known && require_auth => AuthState::Unauthenticated,
            AuthPolicy::Remote if known => AuthState::Authenticated,
            _ => AuthState::Rejected,
        };
        let auth_state = mm.auth_state;
        log::info!("[{}] Authorization: {:?} ({:?})", mm.log_id(), auth_state, policy);

        match auth_state {
            AuthState::Authenticated => self.mm_attach_accept(mm_id),
            AuthState::Rejected => {
                self.attach_req_dispatch(mm_id, &AttachReqEvent::Reject);
                self.access_denied(mm_id);
                Ok(())
            }
            // Waiting for the authentication procedure
            _ => Ok(()),
        }
    }

    /// Assign a new P-TMSI and move the attach to Accept
    fn mm_attach_accept(&mut self, mm_id: u64) -> SgsnResult<()> {
        let p_tmsi = self.ptmsi_alloc();
        if p_tmsi == GSM_RESERVED_TMSI {
            self.attach_req_dispatch(mm_id, &AttachReqEvent::Reject);
            self.access_denied(mm_id);
            return Err(SgsnError::ResourceExhausted("P-TMSI"));
        }

        let mm = self
            .mm_ctx_mut(mm_id)
            .ok_or(SgsnError::UnknownMmCtx(mm_id))?;
        mm.p_tmsi_old = mm.p_tmsi;
        mm.p_tmsi = p_tmsi;
        if mm.ran_type == RanType::GeranGb {
            mm.gb.tlli_new = tmsi_to_tlli(p_tmsi, TlliType::Local);
        }
        let ctrg = mm.ctrg;
        log::info!("[{}] Allocated P-TMSI 0x{:08x}", mm.log_id(), p_tmsi);

        self.attach_req_dispatch(mm_id, &AttachReqEvent::AuthRespSuccess);
        // Attach Accept
        self.counters.mm_inc(ctrg, MmCtxCounter::SignPacketsOut);
        Ok(())
    }

    fn attach_req_dispatch(&mut self, mm_id: u64, event: &AttachReqEvent) {
        if let Some(fsm) = self
            .mm_ctx_mut(mm_id)
            .and_then(|mm| mm.attach_req_fsm.as_mut())
        {
            fsm.dispatch(event);
        }
    }

    // ========================================================================
    // State machine dispatch
    // ========================================================================

    /// Dispatch a GMM event and apply its side effects
    pub fn gmm_fsm_dispatch(&mut self, mm_id: u64, event: &GmmEvent) -> SgsnResult<FsmResult<GmmState>> {
        let mm = self
            .mm_ctx_mut(mm_id)
            .ok_or(SgsnError::UnknownMmCtx(mm_id))?;
        let fsm = mm
            .gmm_fsm
            .as_mut()
            .ok_or_else(|| SgsnError::InvariantViolation(format!("MM context {mm_id} has no GMM FSM")))?;
        let result = fsm.dispatch(event);

        if let GmmEvent::RatChange(data) = event {
            self.gmm_rat_change(mm_id, data)?;
        }

        if let FsmResult::Transition(new_state) = result {
            let timer = SgsnTimerId::GmmState(mm_id);
            self.timers.stop(timer);
            if let Some(timeout) = self.config.timers.gmm_state.for_state(new_state) {
                self.timers.start(timer, timeout);
            }
        }
        Ok(result)
    }

    fn gmm_rat_change(&mut self, mm_id: u64, data: &RatChangeData) -> SgsnResult<()> {
        let old_ran = self
            .mm_ctx(mm_id)
            .map(|mm| mm.ran_type)
            .ok_or(SgsnError::UnknownMmCtx(mm_id))?;

        match old_ran {
            RanType::GeranGb => {
                self.gb_mm_dispatch(mm_id, GbMmEvent::ImplicitDetach)?;
            }
            RanType::UtranIu => {
                self.iu_mm_dispatch(mm_id, IuMmEvent::ImplicitDetach)?;
            }
        }

        let Some(mm) = self.mm_ctx_mut(mm_id) else {
            return Err(SgsnError::UnknownMmCtx(mm_id));
        };
        mm.gb.llme = match data.new_ran_type {
            RanType::GeranGb => data.llme,
            RanType::UtranIu => None,
        };
        match data.new_ran_type {
            RanType::GeranGb if mm.gb.mm_state_fsm.is_none() => {
                mm.gb.mm_state_fsm = Some(GbMmStateFsm::new(mm.gb.tlli));
            }
            RanType::UtranIu if mm.iu.mm_state_fsm.is_none() => {
                let conn_id = mm.iu.ue_ctx.map_or(0, |ue| ue.conn_id);
                mm.iu.mm_state_fsm = Some(IuMmStateFsm::new(conn_id));
            }
            _ => {}
        }
        mm.ran_type = data.new_ran_type;
        log::info!("[{}] Access type changed {} -> {}", mm.log_id(), old_ran, data.new_ran_type);
        Ok(())
    }

    /// Dispatch a Gb MM-state event; keeps the READY timer in step
    pub fn gb_mm_dispatch(&mut self, mm_id: u64, event: GbMmEvent) -> SgsnResult<FsmResult<GbMmState>> {
        let ready_timer = self.config.ready_timer();
        let mm = self
            .mm_ctx_mut(mm_id)
            .ok_or(SgsnError::UnknownMmCtx(mm_id))?;
        let Some(fsm) = mm.gb.mm_state_fsm.as_mut() else {
            log::debug!("[{}] No Gb MM state machine, {:?} dropped", mm.log_id(), event);
            return Ok(FsmResult::Ignored);
        };

        let old_state = fsm.state();
        let result = fsm.dispatch(&event);
        let new_state = fsm.state();

        let timer = SgsnTimerId::MmReady(mm_id);
        if new_state == GbMmState::Ready && result != FsmResult::Ignored {
            self.timers.start(timer, ready_timer);
        } else if old_state == GbMmState::Ready && new_state != GbMmState::Ready {
            self.timers.stop(timer);
        }
        Ok(result)
    }

    /// Dispatch an Iu MM-state event
    pub fn iu_mm_dispatch(&mut self, mm_id: u64, event: IuMmEvent) -> SgsnResult<FsmResult<IuMmState>> {
        let mm = self
            .mm_ctx_mut(mm_id)
            .ok_or(SgsnError::UnknownMmCtx(mm_id))?;
        let Some(fsm) = mm.iu.mm_state_fsm.as_mut() else {
            log::debug!("[{}] No Iu MM state machine, {:?} dropped", mm.log_id(), event);
            return Ok(FsmResult::Ignored);
        };

        let result = fsm.dispatch(&event);
        if result == FsmResult::Transition(IuMmState::Idle) {
            self.mm_ctx_change_gtpu_endpoints_to_sgsn(mm_id);
        }
        Ok(result)
    }

    /// Anchor the user plane of every PDP context at the SGSN.
    /// Returns the number of contexts rebound.
    pub fn mm_ctx_change_gtpu_endpoints_to_sgsn(&mut self, mm_id: u64) -> usize {
        let addr = self.config.gtp.listen_addr;
        let pdps = self
            .mm_ctx(mm_id)
            .map(|mm| mm.pdp_list.clone())
            .unwrap_or_default();

        let mut rebound = 0;
        for pdp_id in pdps {
            match self.pdp_update_gtpu(pdp_id, addr) {
                Ok(()) => rebound += 1,
                Err(e) => log::warn!("[{mm_id}] GTP-U rebind of PDP context [{pdp_id}] failed: {e}"),
            }
        }
        rebound
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Implicit detach: radio state, GMM and finally the context itself
    pub fn mm_ctx_implicit_detach(&mut self, mm_id: u64) {
        let Some(ran_type) = self.mm_ctx(mm_id).map(|mm| mm.ran_type) else {
            return;
        };
        let detached = match ran_type {
            RanType::GeranGb => self.gb_mm_dispatch(mm_id, GbMmEvent::ImplicitDetach).map(|_| ()),
            RanType::UtranIu => self.iu_mm_dispatch(mm_id, IuMmEvent::ImplicitDetach).map(|_| ()),
        };
        if let Err(e) = detached.and_then(|_| self.gmm_fsm_dispatch(mm_id, &GmmEvent::Cleanup).map(|_| ())) {
            log::warn!("[{mm_id}] Implicit detach: {e}");
        }
        self.mm_ctx_cleanup_free(mm_id);
    }

    /// The MS lost access, optionally telling it why
    pub fn access_cancelled(&mut self, mm_id: u64, cause: Option<GmmCause>) {
        let Some(mm) = self.mm_ctx(mm_id) else {
            return;
        };
        let ctrg = mm.ctrg;
        log::info!("[{}] Cancelled (cause {:?})", mm.log_id(), cause);

        if let Some(cause) = cause {
            self.paths.nas.tx_detach_req(mm_id, cause);
            self.counters.mm_inc(ctrg, MmCtxCounter::SignPacketsOut);
        }
        self.mm_ctx_implicit_detach(mm_id);
    }

    /// Access was refused to the MS
    pub fn access_denied(&mut self, mm_id: u64) {
        if let Some(mm) = self.mm_ctx(mm_id) {
            log::info!("[{}] Access denied", mm.log_id());
        }
        self.counters.inc(SgsnCounter::GprsAttachRejected);
        self.mm_ctx_implicit_detach(mm_id);
    }

    // ========================================================================
    // Timers
    // ========================================================================

    pub(crate) fn gmm_state_timer_cb(&mut self, mm_id: u64) {
        let Some(state) = self.gmm_state(mm_id) else {
            return;
        };
        log::info!("[{mm_id}] GMM state {state} timed out");
        if let Err(e) = self.gmm_fsm_dispatch(mm_id, &GmmEvent::Cleanup) {
            log::error!("[{mm_id}] GMM state timeout: {e}");
        }
    }

    pub(crate) fn mm_ready_timer_cb(&mut self, mm_id: u64) {
        if let Err(e) = self.gb_mm_dispatch(mm_id, GbMmEvent::ReadyTimerExpiry) {
            log::debug!("READY timer: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SgsnConfig;
    use crate::context::IuUeCtx;
    use crate::subscriber::SubscriberProfile;
    use crate::test_support::{add_profile, test_context, test_context_failing_rebind, PathCall};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const IMSI: &str = "001010000000001";

    fn rai() -> Rai {
        Rai::new(1, 1, 1, 1)
    }

    fn accept_all() -> SgsnConfig {
        SgsnConfig {
            auth_policy: AuthPolicy::AcceptAll,
            ..Default::default()
        }
    }

    fn gb_state(ctx: &SgsnContext, mm_id: u64) -> GbMmState {
        ctx.mm_ctx(mm_id)
            .and_then(|mm| mm.gb.mm_state_fsm.as_ref())
            .map(|fsm| fsm.state())
            .unwrap()
    }

    fn iu_state(ctx: &SgsnContext, mm_id: u64) -> IuMmState {
        ctx.mm_ctx(mm_id)
            .and_then(|mm| mm.iu.mm_state_fsm.as_ref())
            .map(|fsm| fsm.state())
            .unwrap()
    }

    fn attach_gb(ctx: &mut SgsnContext) -> u64 {
        let mm = ctx.mm_ctx_alloc_gb(0x7800_0001, &rai()).unwrap();
        ctx.handle_mm_event(mm, MmEvent::AttachRequest).unwrap();
        ctx.handle_mm_event(mm, MmEvent::IdentityResponse { imsi: IMSI.into() })
            .unwrap();
        ctx.handle_mm_event(mm, MmEvent::AttachComplete).unwrap();
        mm
    }

    #[test]
    fn test_gb_attach_accept_all() {
        let (mut ctx, _calls) = test_context(accept_all());
        let mm = attach_gb(&mut ctx);

        let m = ctx.mm_ctx(mm).unwrap();
        assert_eq!(m.gmm_state(), Some(GmmState::RegisteredNormal));
        assert_eq!(m.auth_state, AuthState::Authenticated);
        assert_eq!(m.p_tmsi & 0xC000_0000, 0xC000_0000);
        assert_eq!(m.p_tmsi_old, 0);
        assert_eq!(m.gb.tlli, tmsi_to_tlli(m.p_tmsi, TlliType::Local));
        assert_eq!(ctx.mm_ctx_by_ptmsi(m.p_tmsi), Some(mm));
        assert_eq!(gb_state(&ctx, mm), GbMmState::Ready);
        assert!(ctx.timers.is_pending(SgsnTimerId::MmReady(mm)));
        assert_eq!(ctx.counters.get(SgsnCounter::GprsAttachRequested), 1);
        assert_eq!(ctx.counters.get(SgsnCounter::GprsAttachAccepted), 1);
    }

    #[test]
    fn test_attach_closed_policy_rejects_unknown() {
        let (mut ctx, _calls) = test_context(SgsnConfig::default());
        let mm = ctx.mm_ctx_alloc_gb(0x7800_0001, &rai()).unwrap();
        ctx.handle_mm_event(mm, MmEvent::AttachRequest).unwrap();
        ctx.handle_mm_event(mm, MmEvent::IdentityResponse { imsi: IMSI.into() })
            .unwrap();

        assert!(ctx.mm_ctx(mm).is_none());
        assert_eq!(ctx.counters.get(SgsnCounter::GprsAttachRejected), 1);
    }

    #[test]
    fn test_attach_closed_policy_accepts_known() {
        let (mut ctx, _calls) = test_context(SgsnConfig::default());
        add_profile(&mut ctx, SubscriberProfile::new(IMSI));
        let mm = attach_gb(&mut ctx);
        assert_eq!(ctx.gmm_state(mm), Some(GmmState::RegisteredNormal));
        assert!(ctx.mm_ctx(mm).unwrap().subscr.is_some());
    }

    #[test]
    fn test_attach_remote_policy_waits_for_authentication() {
        let config = SgsnConfig {
            auth_policy: AuthPolicy::Remote,
            ..Default::default()
        };
        let (mut ctx, _calls) = test_context(config);
        add_profile(&mut ctx, SubscriberProfile::new(IMSI));
        let mm = ctx.mm_ctx_alloc_gb(0x7800_0001, &rai()).unwrap();
        ctx.mm_ctx_mut(mm).unwrap().imsi = IMSI.into();

        ctx.handle_mm_event(mm, MmEvent::AttachRequest).unwrap();
        let m = ctx.mm_ctx(mm).unwrap();
        assert_eq!(m.auth_state, AuthState::Unauthenticated);
        assert_eq!(m.p_tmsi, 0);
        assert_eq!(m.gmm_state(), Some(GmmState::CommonProcInit));

        ctx.handle_mm_event(mm, MmEvent::AuthenticationSuccess).unwrap();
        assert_ne!(ctx.mm_ctx(mm).unwrap().p_tmsi, 0);
        ctx.handle_mm_event(mm, MmEvent::AttachComplete).unwrap();
        assert_eq!(ctx.gmm_state(mm), Some(GmmState::RegisteredNormal));
    }

    #[test]
    fn test_attach_reject_frees_context() {
        let (mut ctx, _calls) = test_context(accept_all());
        let mm = ctx.mm_ctx_alloc_gb(0x7800_0001, &rai()).unwrap();
        ctx.handle_mm_event(mm, MmEvent::AttachRequest).unwrap();
        ctx.handle_mm_event(mm, MmEvent::AttachReject).unwrap();
        assert!(ctx.mm_ctx(mm).is_none());
        assert_eq!(
            ctx.handle_mm_event(mm, MmEvent::Detach),
            Err(SgsnError::UnknownMmCtx(mm))
        );
    }

    #[test]
    fn test_suspend_resume() {
        let (mut ctx, _calls) = test_context(accept_all());
        let mm = attach_gb(&mut ctx);
        ctx.handle_mm_event(mm, MmEvent::Suspend).unwrap();
        assert_eq!(ctx.gmm_state(mm), Some(GmmState::RegisteredSuspended));
        ctx.handle_mm_event(mm, MmEvent::Suspend).unwrap();
        let ctrg = ctx.mm_ctx(mm).unwrap().ctrg;
        assert_eq!(ctx.counters.mm_get(ctrg, MmCtxCounter::Suspend), 1);
        ctx.handle_mm_event(mm, MmEvent::Resume).unwrap();
        assert_eq!(ctx.gmm_state(mm), Some(GmmState::RegisteredNormal));
    }

    #[test]
    fn test_ready_timer() {
        let (mut ctx, _calls) = test_context(accept_all());
        let mm = attach_gb(&mut ctx);
        let timer = SgsnTimerId::MmReady(mm);

        ctx.timer_expired(timer, 0);
        assert_eq!(gb_state(&ctx, mm), GbMmState::Standby);
        assert!(!ctx.timers.is_pending(timer));

        ctx.handle_mm_event(mm, MmEvent::PduReceived { len: 100 }).unwrap();
        assert_eq!(gb_state(&ctx, mm), GbMmState::Ready);
        assert!(ctx.timers.is_pending(timer));
        ctx.handle_mm_event(mm, MmEvent::PduReceived { len: 20 }).unwrap();
        let ctrg = ctx.mm_ctx(mm).unwrap().ctrg;
        assert_eq!(ctx.counters.mm_get(ctrg, MmCtxCounter::UdataBytesIn), 120);
        assert_eq!(
            ctx.timers.remaining(timer).map(|d| d <= ctx.config.ready_timer()),
            Some(true)
        );
    }

    #[test]
    fn test_detach_cleans_up() {
        let (mut ctx, _calls) = test_context(accept_all());
        let ggsn = ctx.ggsn_ctx_alloc(0);
        let mm = attach_gb(&mut ctx);
        let pdp = ctx.pdp_ctx_alloc(mm, ggsn, 5).unwrap();

        ctx.handle_mm_event(mm, MmEvent::Detach).unwrap();
        assert!(ctx.mm_ctx(mm).is_none());
        assert!(ctx.pdp_ctx(pdp).is_none());
        assert!(!ctx.timers.is_pending(SgsnTimerId::MmReady(mm)));
        assert_eq!(ctx.counters.get(SgsnCounter::GprsDetachRequested), 1);
    }

    #[test]
    fn test_access_cancelled_sends_detach() {
        let (mut ctx, calls) = test_context(accept_all());
        let mm = attach_gb(&mut ctx);
        ctx.access_cancelled(mm, Some(GmmCause::ImplDetached));
        assert!(ctx.mm_ctx(mm).is_none());
        assert!(calls
            .borrow()
            .contains(&PathCall::DetachReq(mm, GmmCause::ImplDetached)));
    }

    #[test]
    fn test_iu_idle_rebinds_gtpu() {
        let (mut ctx, calls, failing) = test_context_failing_rebind(accept_all());
        let ggsn = ctx.ggsn_ctx_alloc(0);
        let mm = ctx.mm_ctx_alloc_iu(IuUeCtx::new(9, rai())).unwrap();
        ctx.handle_mm_event(mm, MmEvent::AttachRequest).unwrap();
        ctx.handle_mm_event(mm, MmEvent::IdentityResponse { imsi: IMSI.into() })
            .unwrap();
        ctx.handle_mm_event(mm, MmEvent::AttachComplete).unwrap();
        assert_eq!(iu_state(&ctx, mm), IuMmState::Connected);

        let rnc = Ipv4Addr::new(10, 1, 1, 1);
        let a = ctx.pdp_ctx_alloc(mm, ggsn, 5).unwrap();
        let b = ctx.pdp_ctx_alloc(mm, ggsn, 6).unwrap();
        let c = ctx.pdp_ctx_alloc(mm, ggsn, 7).unwrap();
        let ha = ctx.pdp_bind_gtp(a, rnc).unwrap();
        let hb = ctx.pdp_bind_gtp(b, rnc).unwrap();
        failing.borrow_mut().insert(ha);

        ctx.handle_mm_event(mm, MmEvent::PsConnRelease).unwrap();
        assert_eq!(iu_state(&ctx, mm), IuMmState::Idle);

        // One failure and one unbound context do not stop the others
        let sgsn = ctx.config.gtp.listen_addr;
        assert_eq!(ctx.pdp_ctx(a).unwrap().gtpu_addr, Some(rnc));
        assert_eq!(ctx.pdp_ctx(b).unwrap().gtpu_addr, Some(sgsn));
        assert_eq!(ctx.pdp_ctx(c).unwrap().gtpu_addr, None);
        assert!(calls.borrow().contains(&PathCall::Rebind(hb, sgsn)));

        ctx.handle_mm_event(mm, MmEvent::PsConnEstablish).unwrap();
        assert_eq!(iu_state(&ctx, mm), IuMmState::Connected);
    }

    #[test]
    fn test_iu_downlink_while_idle_pages() {
        let (mut ctx, _calls) = test_context(accept_all());
        let ggsn = ctx.ggsn_ctx_alloc(0);
        let mm = ctx.mm_ctx_alloc_iu(IuUeCtx::new(9, rai())).unwrap();
        ctx.iu_mm_dispatch(mm, IuMmEvent::PsAttach).unwrap();
        let pdp = ctx.pdp_ctx_alloc(mm, ggsn, 5).unwrap();
        let handle = ctx.pdp_bind_gtp(pdp, Ipv4Addr::new(10, 1, 1, 1)).unwrap();
        ctx.iu_mm_dispatch(mm, IuMmEvent::PsConnRelease).unwrap();

        assert!(ctx.gtp_data_ind(handle, 64));
        let ctrg = ctx.mm_ctx(mm).unwrap().ctrg;
        assert_eq!(ctx.counters.mm_get(ctrg, MmCtxCounter::PagingPs), 1);
    }

    #[test]
    fn test_rat_change_gb_to_iu() {
        let (mut ctx, _calls) = test_context(accept_all());
        let mm = attach_gb(&mut ctx);
        let llme = ctx.llme_alloc(0xc000_0001);
        ctx.mm_ctx_mut(mm).unwrap().gb.llme = Some(llme);

        let data = RatChangeData {
            new_ran_type: RanType::UtranIu,
            llme: None,
        };
        ctx.handle_mm_event(mm, MmEvent::AccessTypeChange(data)).unwrap();

        let m = ctx.mm_ctx(mm).unwrap();
        assert_eq!(m.ran_type, RanType::UtranIu);
        assert_eq!(m.gb.llme, None);
        assert_eq!(m.gmm_state(), Some(GmmState::RegisteredNormal));
        assert_eq!(gb_state(&ctx, mm), GbMmState::Idle);
        assert_eq!(iu_state(&ctx, mm), IuMmState::Detached);
        assert!(!ctx.timers.is_pending(SgsnTimerId::MmReady(mm)));
    }

    #[test]
    fn test_rat_change_during_common_procedure() {
        let (mut ctx, _calls) = test_context(accept_all());
        let mm = ctx.mm_ctx_alloc_iu(IuUeCtx::new(3, rai())).unwrap();
        ctx.gmm_fsm_dispatch(mm, &GmmEvent::CommonProcInitReq).unwrap();
        ctx.iu_mm_dispatch(mm, IuMmEvent::PsAttach).unwrap();

        let data = RatChangeData {
            new_ran_type: RanType::GeranGb,
            llme: Some(77),
        };
        let result = ctx.gmm_fsm_dispatch(mm, &GmmEvent::RatChange(data)).unwrap();
        assert_eq!(result, FsmResult::Transition(GmmState::Deregistered));
        let m = ctx.mm_ctx(mm).unwrap();
        assert_eq!(m.ran_type, RanType::GeranGb);
        assert_eq!(m.gb.llme, Some(77));
        assert_eq!(iu_state(&ctx, mm), IuMmState::Detached);
        assert_eq!(gb_state(&ctx, mm), GbMmState::Idle);
    }

    #[test]
    fn test_gmm_state_timeout() {
        let mut config = accept_all();
        config.timers.gmm_state.common_proc_init = Some(15);
        let (mut ctx, _calls) = test_context(config);
        let mm = ctx.mm_ctx_alloc_gb(0x7800_0001, &rai()).unwrap();

        ctx.gmm_fsm_dispatch(mm, &GmmEvent::CommonProcInitReq).unwrap();
        let timer = SgsnTimerId::GmmState(mm);
        assert_eq!(ctx.timers.remaining(timer).map(|d| d <= Duration::from_secs(15)), Some(true));

        ctx.timer_expired(timer, 0);
        assert_eq!(ctx.gmm_state(mm), Some(GmmState::Deregistered));
        assert!(!ctx.timers.is_pending(timer));
    }

    #[test]
    fn test_identity_response_replaces_stale_context() {
        let (mut ctx, _calls) = test_context(accept_all());
        let first = ctx.mm_ctx_alloc_gb(0x7800_0001, &rai()).unwrap();
        ctx.handle_mm_event(first, MmEvent::AttachRequest).unwrap();
        ctx.handle_mm_event(first, MmEvent::IdentityResponse { imsi: IMSI.into() })
            .unwrap();

        let second = ctx.mm_ctx_alloc_gb(0x7800_0002, &rai()).unwrap();
        ctx.handle_mm_event(second, MmEvent::AttachRequest).unwrap();
        ctx.handle_mm_event(second, MmEvent::IdentityResponse { imsi: IMSI.into() })
            .unwrap();

        let holders = ctx.mm_ctxs().filter(|mm| mm.imsi == IMSI).count();
        assert_eq!(holders, 1);
        assert!(ctx.mm_ctx(first).is_none());
        assert_eq!(ctx.mm_ctx_by_imsi(IMSI), Some(second));
        assert_eq!(ctx.mm_ctx_count(), 1);
    }

    #[test]
    fn test_routing_area_update() {
        let (mut ctx, _calls) = test_context(accept_all());
        let mm = attach_gb(&mut ctx);
        let new_rai = Rai::new(1, 1, 2, 2);
        ctx.handle_mm_event(mm, MmEvent::RoutingAreaUpdate { rai: new_rai })
            .unwrap();
        assert_eq!(ctx.mm_ctx(mm).unwrap().ra, new_rai);
        let ctrg = ctx.mm_ctx(mm).unwrap().ctrg;
        assert_eq!(ctx.counters.mm_get(ctrg, MmCtxCounter::RaUpdate), 1);
        assert_eq!(ctx.counters.get(SgsnCounter::GprsRoutingAreaRequested), 1);
    }
}
