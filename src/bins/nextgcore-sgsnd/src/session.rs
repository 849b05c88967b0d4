//! SGSN PDP and GGSN Context Management
//!
//! A PDP context is linked into its MM context, its GGSN context and the
//! global PDP list. Every unlink below keeps those three memberships in step.

use crate::context::{GgsnCtx, GgsnLookup, PdpCtx, RanType, SgsnContext};
use crate::error::{GsmCause, SgsnError, SgsnResult};
use crate::gmm_sm::GmmState;
use crate::gtp_path::GtpHandle;
use crate::metrics::{CounterGroupClass, MmCtxCounter, PdpCtxCounter, SgsnCounter};
use crate::mm_state_sm::IuMmState;
use crate::nas_path::DeactPdpReq;
use crate::signal::SgsnSignal;
use crate::sm::Fsm;
use crate::timer::SgsnTimerId;
use std::net::Ipv4Addr;
use std::time::Duration;

/// Default LLC SAPI for user data
pub const DEFAULT_SAPI: u8 = 3;

/// GGSN id given to gateways discovered at runtime
pub const DYNAMIC_GGSN_ID: u32 = u32::MAX;

// ============================================================================
// PDP Context
// ============================================================================

impl SgsnContext {
    /// Allocate a PDP context for `nsapi`. Fails if the NSAPI is taken.
    pub fn pdp_ctx_alloc(&mut self, mm_id: u64, ggsn_id: u64, nsapi: u8) -> Option<u64> {
        if !self.mm_pool.contains_key(&mm_id) {
            log::error!("PDP context for unknown MM context [{mm_id}]");
            return None;
        }
        if !self.ggsn_pool.contains_key(&ggsn_id) {
            log::error!("PDP context for unknown GGSN context [{ggsn_id}]");
            return None;
        }
        if self.pdp_by_nsapi(mm_id, nsapi).is_some() {
            log::info!("[{mm_id}] NSAPI {nsapi} already in use");
            return None;
        }

        let Some(ctrg) = self.counters.alloc(CounterGroupClass::PdpCtx, nsapi as u32) else {
            log::error!("[{mm_id}] Error allocating counter group for NSAPI {nsapi}");
            return None;
        };

        let id = self.next_pool_id();
        let pdp = PdpCtx {
            id,
            nsapi,
            sapi: DEFAULT_SAPI,
            ti: 0,
            mm_id: Some(mm_id),
            ggsn_id: Some(ggsn_id),
            lib: None,
            gtpu_addr: None,
            ctrg,
            destroy_ggsn: false,
            apn: String::new(),
            qos_subscribed: Vec::new(),
            pdp_charg: None,
        };
        self.pdp_pool.insert(id, pdp);
        self.pdp_list.push(id);
        if let Some(mm) = self.mm_pool.get_mut(&mm_id) {
            mm.pdp_list.push(id);
            self.counters.mm_inc(mm.ctrg, MmCtxCounter::PdpCtxAct);
        }
        self.ggsn_ctx_add_pdp(ggsn_id, id);

        log::info!("[Added] PDP context NSAPI[{nsapi}] (id={id}, mm={mm_id}, ggsn={ggsn_id})");
        Some(id)
    }

    /// Get a PDP context
    pub fn pdp_ctx(&self, id: u64) -> Option<&PdpCtx> {
        self.pdp_pool.get(&id)
    }

    /// Get a PDP context for update
    pub fn pdp_ctx_mut(&mut self, id: u64) -> Option<&mut PdpCtx> {
        self.pdp_pool.get_mut(&id)
    }

    /// Number of live PDP contexts
    pub fn pdp_ctx_count(&self) -> usize {
        self.pdp_list.len()
    }

    /// Look up a PDP context by MM context and NSAPI
    pub fn pdp_by_nsapi(&self, mm_id: u64, nsapi: u8) -> Option<u64> {
        let mm = self.mm_pool.get(&mm_id)?;
        mm.pdp_list
            .iter()
            .copied()
            .find(|id| self.pdp_pool.get(id).is_some_and(|pdp| pdp.nsapi == nsapi))
    }

    /// Look up a PDP context by MM context and transaction id
    pub fn pdp_by_tid(&self, mm_id: u64, ti: u8) -> Option<u64> {
        let mm = self.mm_pool.get(&mm_id)?;
        mm.pdp_list
            .iter()
            .copied()
            .find(|id| self.pdp_pool.get(id).is_some_and(|pdp| pdp.ti == ti))
    }

    /// Unlink a PDP context from its MM context
    pub fn pdp_ctx_detach_mm(&mut self, pdp_id: u64) {
        let Some(pdp) = self.pdp_pool.get_mut(&pdp_id) else {
            return;
        };
        if let Some(mm_id) = pdp.mm_id.take() {
            if let Some(mm) = self.mm_pool.get_mut(&mm_id) {
                mm.pdp_list.retain(|id| *id != pdp_id);
            }
        }
    }

    /// Graceful release of a PDP context, used when the MS is gone
    pub fn pdp_ctx_terminate(&mut self, pdp_id: u64) {
        let Some(pdp) = self.pdp_pool.get(&pdp_id) else {
            log::error!("Terminate of unknown PDP context [{pdp_id}]");
            return;
        };
        let (nsapi, sapi, lib, ggsn_id) = (pdp.nsapi, pdp.sapi, pdp.lib, pdp.ggsn_id);

        let Some(mm_id) = pdp.mm_id else {
            log::error!("PDP context [{pdp_id}] terminated without MM context");
            debug_assert!(false, "PDP context {pdp_id} has no MM context");
            self.pdp_ctx_free(pdp_id);
            return;
        };

        log::info!("[{mm_id}] Forcing release of PDP context NSAPI[{nsapi}]");

        // Force the deactivation of the SNDCP layer
        let tlli = self
            .mm_pool
            .get(&mm_id)
            .filter(|mm| mm.ran_type == RanType::GeranGb)
            .and_then(|mm| mm.gb.llme)
            .and_then(|llme| self.llme_pool.get(&llme))
            .map(|llme| llme.tlli);
        if let Some(tlli) = tlli {
            self.paths.llc.sndcp_deactivate_ind(tlli, sapi, nsapi);
        }

        self.signals.dispatch(SgsnSignal::PdpTerminate {
            pdp_id,
            mm_id: Some(mm_id),
            nsapi,
        });

        self.pdp_ctx_detach_mm(pdp_id);

        if ggsn_id.is_some() {
            if let Some(handle) = lib {
                self.paths.gtp.delete_context_req(handle);
            }
        }
        self.pdp_ctx_free(pdp_id);
    }

    /// Hard free of a PDP context
    pub fn pdp_ctx_free(&mut self, pdp_id: u64) {
        let Some(pdp) = self.pdp_pool.get(&pdp_id) else {
            log::error!("Free of unknown PDP context [{pdp_id}]");
            debug_assert!(false, "double free of PDP context {pdp_id}");
            return;
        };
        let (mm_id, ggsn_id, nsapi, ctrg) = (pdp.mm_id, pdp.ggsn_id, pdp.nsapi, pdp.ctrg);

        self.signals.dispatch(SgsnSignal::PdpFree {
            pdp_id,
            mm_id,
            nsapi,
        });

        self.counters.free(ctrg);
        if let Some(mm) = mm_id.and_then(|id| self.mm_pool.get_mut(&id)) {
            mm.pdp_list.retain(|id| *id != pdp_id);
        }
        if let Some(ggsn_id) = ggsn_id {
            self.ggsn_ctx_remove_pdp(ggsn_id, pdp_id);
        }
        self.pdp_list.retain(|id| *id != pdp_id);

        if let Some(pdp) = self.pdp_pool.remove(&pdp_id) {
            // Late GTP callbacks must not find this context any more
            if let Some(handle) = pdp.lib {
                log::warn!(
                    "Freeing PDP context NSAPI[{nsapi}] that still has GTP handle {handle} attached"
                );
                self.gtp_handles.remove(&handle);
            }
        }
        log::info!("[Removed] PDP context NSAPI[{nsapi}] (id={pdp_id})");
    }

    /// Create the GTP tunnel state of a PDP context
    pub fn pdp_bind_gtp(&mut self, pdp_id: u64, gsnlu: Ipv4Addr) -> SgsnResult<GtpHandle> {
        let pdp = self
            .pdp_pool
            .get(&pdp_id)
            .ok_or(SgsnError::UnknownPdpCtx(pdp_id))?;
        if let Some(handle) = pdp.lib {
            return Err(SgsnError::InvariantViolation(format!(
                "PDP context {pdp_id} already bound to {handle}"
            )));
        }

        let handle = self.next_gtp_handle();
        self.paths.gtp.bind_endpoint(handle, gsnlu)?;
        self.gtp_handles.insert(handle, pdp_id);
        if let Some(pdp) = self.pdp_pool.get_mut(&pdp_id) {
            pdp.lib = Some(handle);
            pdp.gtpu_addr = Some(gsnlu);
        }
        Ok(handle)
    }

    /// Resolve a GTP handle to its PDP context
    pub fn pdp_by_gtp_handle(&self, handle: GtpHandle) -> Option<u64> {
        self.gtp_handles.get(&handle).copied()
    }

    /// Point the GTP-U tunnel of a PDP context at `addr`
    pub fn pdp_update_gtpu(&mut self, pdp_id: u64, addr: Ipv4Addr) -> SgsnResult<()> {
        let pdp = self
            .pdp_pool
            .get(&pdp_id)
            .ok_or(SgsnError::UnknownPdpCtx(pdp_id))?;
        let handle = pdp
            .lib
            .ok_or_else(|| SgsnError::Transport(format!("PDP context {pdp_id} has no GTP handle")))?;

        self.paths.gtp.rebind_endpoint(handle, addr)?;
        if let Some(pdp) = self.pdp_pool.get_mut(&pdp_id) {
            pdp.gtpu_addr = Some(addr);
        }
        Ok(())
    }

    /// Downlink user data from the GGSN. Returns false for stale handles.
    pub fn gtp_data_ind(&mut self, handle: GtpHandle, len: usize) -> bool {
        let Some(pdp_id) = self.pdp_by_gtp_handle(handle) else {
            log::debug!("GTP DATA IND for unknown handle {handle}, discarding");
            return false;
        };
        let Some(pdp) = self.pdp_pool.get(&pdp_id) else {
            return false;
        };
        let (pdp_ctrg, mm_id) = (pdp.ctrg, pdp.mm_id);

        self.counters.pdp_add(pdp_ctrg, PdpCtxCounter::UdataPacketsOut, 1);
        self.counters.pdp_add(pdp_ctrg, PdpCtxCounter::UdataBytesOut, len as u64);

        let Some(mm) = mm_id.and_then(|id| self.mm_pool.get(&id)) else {
            log::debug!("GTP DATA IND for PDP context [{pdp_id}] without MM context");
            return true;
        };
        let mm_ctrg = mm.ctrg;
        let idle = mm
            .iu
            .mm_state_fsm
            .as_ref()
            .is_some_and(|fsm| fsm.state() == IuMmState::Idle);
        let log_id = mm.log_id();

        self.counters.mm_inc(mm_ctrg, MmCtxCounter::UdataPacketsOut);
        self.counters.mm_add(mm_ctrg, MmCtxCounter::UdataBytesOut, len as u64);
        if idle {
            log::info!("[{log_id}] Downlink data while PMM-IDLE, paging");
            self.counters.mm_inc(mm_ctrg, MmCtxCounter::PagingPs);
        }
        true
    }
}

// ============================================================================
// GGSN Context
// ============================================================================

impl SgsnContext {
    /// Allocate a GGSN context
    pub fn ggsn_ctx_alloc(&mut self, ggsn_id: u32) -> u64 {
        let id = self.next_pool_id();
        let ggsn = GgsnCtx {
            id,
            ggsn_id,
            remote_addr: Ipv4Addr::UNSPECIFIED,
            gtp_version: 1,
            remote_restart_ctr: -1,
            echo_interval: Duration::ZERO,
            pdp_list: Vec::new(),
        };
        self.ggsn_pool.insert(id, ggsn);
        self.ggsn_list.push(id);
        log::info!("[Added] GGSN context {ggsn_id} (id={id})");
        id
    }

    /// Get a GGSN context
    pub fn ggsn_ctx(&self, id: u64) -> Option<&GgsnCtx> {
        self.ggsn_pool.get(&id)
    }

    /// Get a GGSN context for update
    pub fn ggsn_ctx_mut(&mut self, id: u64) -> Option<&mut GgsnCtx> {
        self.ggsn_pool.get_mut(&id)
    }

    /// Find by configured GGSN id
    pub fn ggsn_by_id(&self, ggsn_id: u32) -> Option<u64> {
        self.ggsn_list
            .iter()
            .copied()
            .find(|id| self.ggsn_pool.get(id).is_some_and(|g| g.ggsn_id == ggsn_id))
    }

    /// Find by remote address
    pub fn ggsn_by_addr(&self, addr: Ipv4Addr) -> Option<u64> {
        self.ggsn_list
            .iter()
            .copied()
            .find(|id| self.ggsn_pool.get(id).is_some_and(|g| g.remote_addr == addr))
    }

    /// Find by configured GGSN id, allocating if absent
    pub fn ggsn_find_alloc(&mut self, ggsn_id: u32) -> u64 {
        match self.ggsn_by_id(ggsn_id) {
            Some(id) => id,
            None => self.ggsn_ctx_alloc(ggsn_id),
        }
    }

    /// Free a GGSN context. Refused while PDP contexts are bound.
    pub fn ggsn_ctx_free(&mut self, id: u64) -> bool {
        let Some(ggsn) = self.ggsn_pool.get(&id) else {
            return false;
        };
        if !ggsn.pdp_list.is_empty() {
            log::error!(
                "GGSN context {} still has {} PDP contexts, not freeing",
                ggsn.ggsn_id,
                ggsn.pdp_list.len()
            );
            debug_assert!(false, "free of GGSN context {id} with bound PDP contexts");
            return false;
        }

        self.timers.stop(SgsnTimerId::GgsnEcho(id));
        self.ggsn_list.retain(|g| *g != id);
        if let Some(ggsn) = self.ggsn_pool.remove(&id) {
            log::info!("[Removed] GGSN context {} (id={})", ggsn.ggsn_id, id);
        }
        true
    }

    fn ggsn_ctx_add_pdp(&mut self, ggsn_id: u64, pdp_id: u64) {
        if let Some(ggsn) = self.ggsn_pool.get_mut(&ggsn_id) {
            ggsn.pdp_list.push(pdp_id);
        }
        self.ggsn_check_echo_timer(ggsn_id);
    }

    /// Unbind a PDP context from its GGSN
    pub fn ggsn_ctx_remove_pdp(&mut self, ggsn_id: u64, pdp_id: u64) {
        let remaining = match self.ggsn_pool.get_mut(&ggsn_id) {
            Some(ggsn) => {
                ggsn.pdp_list.retain(|id| *id != pdp_id);
                ggsn.pdp_list.first().copied()
            }
            None => None,
        };
        self.ggsn_check_echo_timer(ggsn_id);

        let Some(pdp) = self.pdp_pool.get_mut(&pdp_id) else {
            return;
        };
        let destroy = std::mem::take(&mut pdp.destroy_ggsn);
        pdp.ggsn_id = None;
        let lib = pdp.lib.take();

        if destroy {
            match remaining {
                // Another PDP context still uses the GGSN; it inherits the flag
                Some(next) => {
                    if let Some(next) = self.pdp_pool.get_mut(&next) {
                        next.destroy_ggsn = true;
                    }
                }
                None => {
                    self.ggsn_ctx_free(ggsn_id);
                }
            }
        }

        if let Some(handle) = lib {
            self.gtp_handles.remove(&handle);
            self.paths.gtp.release_handle(handle);
        }
    }

    /// Arm or disarm the echo timer according to bound PDP contexts
    pub fn ggsn_check_echo_timer(&mut self, ggsn_id: u64) {
        let Some(ggsn) = self.ggsn_pool.get(&ggsn_id) else {
            return;
        };
        let timer = SgsnTimerId::GgsnEcho(ggsn_id);
        let interval = ggsn.echo_interval;

        if !ggsn.pdp_list.is_empty() && !interval.is_zero() {
            if !self.timers.is_pending(timer) {
                self.timers.start(timer, interval);
            }
        } else {
            self.timers.stop(timer);
        }
    }

    pub(crate) fn ggsn_echo_timer_cb(&mut self, ggsn_id: u64) {
        let Some(ggsn) = self.ggsn_pool.get(&ggsn_id) else {
            return;
        };
        let addr = ggsn.remote_addr;
        self.paths.gtp.echo_req(addr);
        self.ggsn_check_echo_timer(ggsn_id);
    }

    /// GTP Echo Response (or any message carrying Recovery) from a GGSN.
    /// Returns the number of PDP contexts dropped because of a restart.
    pub fn gtp_echo_conf(&mut self, ggsn_id: u64, recovery: u8) -> usize {
        let Some(ggsn) = self.ggsn_pool.get_mut(&ggsn_id) else {
            log::debug!("Echo response for unknown GGSN [{ggsn_id}]");
            return 0;
        };
        let old = ggsn.remote_restart_ctr;
        ggsn.remote_restart_ctr = recovery as i32;

        if old >= 0 && old != recovery as i32 {
            log::info!(
                "GGSN {} restarted (recovery {} -> {}), dropping PDP contexts",
                ggsn.ggsn_id,
                old,
                recovery
            );
            return self.ggsn_ctx_drop_all_pdp_except(ggsn_id, None);
        }
        0
    }

    /// Drop one PDP context after its GGSN went away
    pub fn ggsn_ctx_drop_pdp(&mut self, pdp_id: u64) {
        let Some(pdp) = self.pdp_pool.get(&pdp_id) else {
            return;
        };
        let (mm_id, ggsn_id, nsapi, ti) = (pdp.mm_id, pdp.ggsn_id, pdp.nsapi, pdp.ti);

        let registered_mm = mm_id.filter(|id| self.gmm_state(*id) == Some(GmmState::RegisteredNormal));
        match registered_mm {
            Some(mm_id) => {
                self.paths.nas.tx_deact_pdp_req(&DeactPdpReq {
                    mm_id,
                    nsapi,
                    ti,
                    cause: GsmCause::NetFail,
                    teardown: true,
                });
                self.counters.inc(SgsnCounter::PdpDlDeactivateRequested);
                if let Some(ggsn_id) = ggsn_id {
                    self.ggsn_ctx_remove_pdp(ggsn_id, pdp_id);
                }
            }
            None => {
                // The MS is not in a state to receive a deactivation
                log::info!("Dropping PDP context NSAPI[{nsapi}] without registered MM context");
                self.pdp_ctx_free(pdp_id);
            }
        }
    }

    /// Drop every PDP context of a GGSN except `except`
    pub fn ggsn_ctx_drop_all_pdp_except(&mut self, ggsn_id: u64, except: Option<u64>) -> usize {
        let Some(ggsn) = self.ggsn_pool.get(&ggsn_id) else {
            return 0;
        };

        let mut num = 0;
        for pdp_id in ggsn.pdp_list.clone() {
            if Some(pdp_id) == except || !self.pdp_pool.contains_key(&pdp_id) {
                continue;
            }
            self.ggsn_ctx_drop_pdp(pdp_id);
            num += 1;
        }
        num
    }
}

// ============================================================================
// GGSN Lookup
// ============================================================================

impl SgsnContext {
    /// Register a pending dynamic GGSN lookup for an MM context
    pub fn ggsn_lookup_start(
        &mut self,
        mm_id: u64,
        apn_str: &str,
        nsapi: u8,
        sapi: u8,
        ti: u8,
    ) -> Option<u64> {
        let mm = self.mm_pool.get(&mm_id)?;
        if mm.ggsn_lookup.is_some() {
            log::info!("[{}] GGSN lookup already pending", mm.log_id());
            return None;
        }

        let id = self.next_pool_id();
        self.lookups.insert(
            id,
            GgsnLookup {
                id,
                mm_id: Some(mm_id),
                apn_str: apn_str.to_string(),
                nsapi,
                sapi,
                ti,
            },
        );
        if let Some(mm) = self.mm_pool.get_mut(&mm_id) {
            mm.ggsn_lookup = Some(id);
        }
        log::debug!("[{mm_id}] GGSN lookup for APN '{apn_str}' started (id={id})");
        Some(id)
    }

    /// Get a pending lookup
    pub fn ggsn_lookup(&self, id: u64) -> Option<&GgsnLookup> {
        self.lookups.get(&id)
    }

    /// Complete a lookup with the resolved GGSN address.
    /// Returns the PDP context created for the requester.
    pub fn ggsn_lookup_complete(&mut self, id: u64, addr: Option<Ipv4Addr>) -> Option<u64> {
        let Some(lookup) = self.lookups.remove(&id) else {
            log::debug!("Completion of unknown GGSN lookup [{id}]");
            return None;
        };
        let Some(mm_id) = lookup.mm_id else {
            log::debug!("GGSN lookup [{id}] finished after its MM context was freed");
            return None;
        };
        match self.mm_pool.get_mut(&mm_id) {
            Some(mm) => mm.ggsn_lookup = None,
            None => return None,
        }

        let Some(addr) = addr else {
            log::info!("[{mm_id}] No GGSN found for APN '{}'", lookup.apn_str);
            self.counters.inc(SgsnCounter::PdpActivateRejected);
            return None;
        };

        let (ggsn_id, created) = match self.ggsn_by_addr(addr) {
            Some(ggsn_id) => (ggsn_id, false),
            None => {
                let ggsn_id = self.ggsn_ctx_alloc(DYNAMIC_GGSN_ID);
                if let Some(ggsn) = self.ggsn_pool.get_mut(&ggsn_id) {
                    ggsn.remote_addr = addr;
                }
                (ggsn_id, true)
            }
        };

        let Some(pdp_id) = self.pdp_ctx_alloc(mm_id, ggsn_id, lookup.nsapi) else {
            if created {
                self.ggsn_ctx_free(ggsn_id);
            }
            return None;
        };
        if let Some(pdp) = self.pdp_pool.get_mut(&pdp_id) {
            pdp.sapi = lookup.sapi;
            pdp.ti = lookup.ti;
            pdp.apn = lookup.apn_str;
            pdp.destroy_ggsn = created;
        }
        Some(pdp_id)
    }
}
