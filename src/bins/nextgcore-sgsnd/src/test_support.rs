//! Test helpers: recording paths and a ready-made context

use crate::config::SgsnConfig;
use crate::context::{SgsnContext, SgsnPaths};
use crate::error::{GmmCause, SgsnError, SgsnResult};
use crate::gtp_path::{GtpHandle, GtpPath};
use crate::llc_path::LlcPath;
use crate::nas_path::{DeactPdpReq, NasPath};
use crate::signal::SgsnSignal;
use crate::subscriber::{LocalSubscriberStore, SubscriberProfile, SubscriberStore};
use std::cell::RefCell;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::sync::Arc;

/// Outbound operation seen by one of the recording paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathCall {
    Bind(GtpHandle, Ipv4Addr),
    Rebind(GtpHandle, Ipv4Addr),
    DeleteContextReq(GtpHandle),
    Release(GtpHandle),
    Echo(Ipv4Addr),
    SndcpDeactivate { tlli: u32, sapi: u8, nsapi: u8 },
    LlmeUnassign(u32),
    DeactPdpReq(DeactPdpReq),
    DetachReq(u64, GmmCause),
    ProfileRelease(String),
}

pub type CallLog = Rc<RefCell<Vec<PathCall>>>;

struct RecordingGtp {
    calls: CallLog,
    failing: Rc<RefCell<HashSet<GtpHandle>>>,
}

impl GtpPath for RecordingGtp {
    fn bind_endpoint(&mut self, handle: GtpHandle, addr: Ipv4Addr) -> SgsnResult<()> {
        self.calls.borrow_mut().push(PathCall::Bind(handle, addr));
        Ok(())
    }

    fn rebind_endpoint(&mut self, handle: GtpHandle, addr: Ipv4Addr) -> SgsnResult<()> {
        if self.failing.borrow().contains(&handle) {
            return Err(SgsnError::Transport(format!("rebind of {handle} refused")));
        }
        self.calls.borrow_mut().push(PathCall::Rebind(handle, addr));
        Ok(())
    }

    fn delete_context_req(&mut self, handle: GtpHandle) {
        self.calls.borrow_mut().push(PathCall::DeleteContextReq(handle));
    }

    fn release_handle(&mut self, handle: GtpHandle) {
        self.calls.borrow_mut().push(PathCall::Release(handle));
    }

    fn echo_req(&mut self, ggsn_addr: Ipv4Addr) {
        self.calls.borrow_mut().push(PathCall::Echo(ggsn_addr));
    }
}

struct RecordingLlc(CallLog);

impl LlcPath for RecordingLlc {
    fn sndcp_deactivate_ind(&mut self, tlli: u32, sapi: u8, nsapi: u8) {
        self.0
            .borrow_mut()
            .push(PathCall::SndcpDeactivate { tlli, sapi, nsapi });
    }

    fn llme_unassign(&mut self, tlli: u32) -> SgsnResult<()> {
        self.0.borrow_mut().push(PathCall::LlmeUnassign(tlli));
        Ok(())
    }
}

struct RecordingNas(CallLog);

impl NasPath for RecordingNas {
    fn tx_deact_pdp_req(&mut self, req: &DeactPdpReq) {
        self.0.borrow_mut().push(PathCall::DeactPdpReq(*req));
    }

    fn tx_detach_req(&mut self, mm_id: u64, cause: GmmCause) {
        self.0.borrow_mut().push(PathCall::DetachReq(mm_id, cause));
    }
}

struct RecordingStore {
    inner: LocalSubscriberStore,
    calls: CallLog,
}

impl SubscriberStore for RecordingStore {
    fn get_profile(&mut self, imsi: &str) -> Option<Arc<SubscriberProfile>> {
        self.inner.get_profile(imsi)
    }

    fn release_profile(&mut self, profile: Arc<SubscriberProfile>) {
        self.calls
            .borrow_mut()
            .push(PathCall::ProfileRelease(profile.imsi.clone()));
        self.inner.release_profile(profile);
    }

    fn update_profile(&mut self, profile: SubscriberProfile) {
        self.inner.update_profile(profile);
    }
}

/// Context whose GTP path refuses rebinds of the handles in the returned set
pub fn test_context_failing_rebind(
    config: SgsnConfig,
) -> (SgsnContext, CallLog, Rc<RefCell<HashSet<GtpHandle>>>) {
    let calls: CallLog = Rc::default();
    let failing: Rc<RefCell<HashSet<GtpHandle>>> = Rc::default();
    let paths = SgsnPaths {
        gtp: Box::new(RecordingGtp {
            calls: calls.clone(),
            failing: failing.clone(),
        }),
        llc: Box::new(RecordingLlc(calls.clone())),
        nas: Box::new(RecordingNas(calls.clone())),
        subscribers: Box::new(RecordingStore {
            inner: LocalSubscriberStore::new(),
            calls: calls.clone(),
        }),
    };
    (SgsnContext::new(config, paths), calls, failing)
}

/// Context with recording paths
pub fn test_context(config: SgsnConfig) -> (SgsnContext, CallLog) {
    let (ctx, calls, _) = test_context_failing_rebind(config);
    (ctx, calls)
}

/// Record every signal the context emits from now on
pub fn collect_signals(ctx: &mut SgsnContext) -> Rc<RefCell<Vec<SgsnSignal>>> {
    let seen: Rc<RefCell<Vec<SgsnSignal>>> = Rc::default();
    let sink = seen.clone();
    ctx.signals
        .subscribe(move |signal| sink.borrow_mut().push(signal.clone()));
    seen
}

/// Provision a subscriber profile
pub fn add_profile(ctx: &mut SgsnContext, profile: SubscriberProfile) {
    ctx.paths.subscribers.update_profile(profile);
}
