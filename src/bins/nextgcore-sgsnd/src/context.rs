//! SGSN Context Management
//!
//! The `SgsnContext` aggregate owns every registry of the node: MM contexts,
//! PDP contexts, GGSN contexts, APN rules, LLMEs and pending GGSN lookups.
//! All cross-references between objects are pool ids, so a freed object
//! simply fails its lookup. Mutation goes through `&mut SgsnContext`, which
//! makes every operation below atomic with respect to the whole graph.

use crate::attach_req_sm::AttachReqFsm;
use crate::config::{GprsCipher, RabAddrEnc, SgsnConfig};
use crate::error::{SgsnError, SgsnResult};
use crate::gmm_sm::{GmmFsm, GmmState};
use crate::gtp_path::{GtpHandle, GtpPath, LoggingGtpPath};
use crate::llc_path::{LlcPath, LoggingLlcPath};
use crate::metrics::{CounterGroupClass, CounterRegistry};
use crate::mm_state_sm::{GbMmStateFsm, IuMmStateFsm};
use crate::nas_path::{LoggingNasPath, NasPath};
use crate::ptmsi::{tlli_type, tmsi_to_tlli, TlliType};
use crate::signal::{SgsnSignal, SignalBus};
use crate::sm::Fsm;
use crate::subscriber::{LocalSubscriberStore, SubscriberProfile, SubscriberStore};
use crate::timer::{SgsnTimerId, TimerManager};
use std::collections::HashMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

/// Key sequence number meaning "no key available"
pub const GSM_KEY_SEQ_INVAL: u8 = 7;

// ============================================================================
// Basic Types
// ============================================================================

/// Radio access type of an MM context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RanType {
    /// GERAN via Gb (connection-less, LLC based)
    GeranGb,
    /// UTRAN via Iu (connection oriented, RANAP based)
    UtranIu,
}

impl fmt::Display for RanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RanType::GeranGb => write!(f, "GERAN_Gb"),
            RanType::UtranIu => write!(f, "UTRAN_Iu"),
        }
    }
}

/// Routing Area Identification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rai {
    pub mcc: u16,
    pub mnc: u16,
    pub mnc_3_digits: bool,
    pub lac: u16,
    pub rac: u8,
}

impl Rai {
    pub fn new(mcc: u16, mnc: u16, lac: u16, rac: u8) -> Self {
        Self {
            mcc,
            mnc,
            mnc_3_digits: false,
            lac,
            rac,
        }
    }
}

impl fmt::Display for Rai {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mnc_3_digits {
            write!(f, "{:03}-{:03}-{}-{}", self.mcc, self.mnc, self.lac, self.rac)
        } else {
            write!(f, "{:03}-{:02}-{}-{}", self.mcc, self.mnc, self.lac, self.rac)
        }
    }
}

/// Authorization state of an MM context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unknown,
    Authenticated,
    Rejected,
    Unauthenticated,
}

/// RANAP UE connection handle as seen by the SGSN
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IuUeCtx {
    pub conn_id: u32,
    pub ra_id: Rai,
    pub rab_assign_addr_enc: RabAddrEnc,
}

impl IuUeCtx {
    pub fn new(conn_id: u32, ra_id: Rai) -> Self {
        Self {
            conn_id,
            ra_id,
            rab_assign_addr_enc: RabAddrEnc::default(),
        }
    }
}

// ============================================================================
// MM Context
// ============================================================================

/// Gb specific part of an MM context
#[derive(Debug, Clone, Default)]
pub struct MmCtxGb {
    pub tlli: u32,
    /// TLLI derived from a newly assigned P-TMSI, valid until confirmed
    pub tlli_new: u32,
    /// LLME pool id
    pub llme: Option<u64>,
    pub mm_state_fsm: Option<GbMmStateFsm>,
}

/// Iu specific part of an MM context
#[derive(Debug, Clone, Default)]
pub struct MmCtxIu {
    pub ue_ctx: Option<IuUeCtx>,
    /// A new security context must be established before use
    pub new_key: bool,
    pub mm_state_fsm: Option<IuMmStateFsm>,
}

/// SGSN MM context, one per attached MS
#[derive(Debug, Clone)]
pub struct MmCtx {
    /// Pool ID
    pub id: u64,
    pub imsi: String,
    pub imei: String,
    pub msisdn: String,
    pub p_tmsi: u32,
    pub p_tmsi_old: u32,
    pub ra: Rai,
    pub ran_type: RanType,
    pub ciph_algo: GprsCipher,
    pub auth_state: AuthState,
    pub key_seq: u8,
    /// Counter group id
    pub ctrg: u64,
    pub gmm_fsm: Option<GmmFsm>,
    pub attach_req_fsm: Option<AttachReqFsm>,
    pub gb: MmCtxGb,
    pub iu: MmCtxIu,
    /// PDP context pool ids owned by this MM context
    pub pdp_list: Vec<u64>,
    /// Outstanding GGSN lookup
    pub ggsn_lookup: Option<u64>,
    pub subscr: Option<Arc<SubscriberProfile>>,
    /// T number of the running MM timer
    pub timer_t: Option<u32>,
}

impl MmCtx {
    fn new(id: u64, ctrg: u64) -> Self {
        Self {
            id,
            imsi: String::new(),
            imei: String::new(),
            msisdn: String::new(),
            p_tmsi: 0,
            p_tmsi_old: 0,
            ra: Rai::default(),
            ran_type: RanType::GeranGb,
            ciph_algo: GprsCipher::Gea0,
            auth_state: AuthState::Unknown,
            key_seq: GSM_KEY_SEQ_INVAL,
            ctrg,
            gmm_fsm: Some(GmmFsm::new(id)),
            attach_req_fsm: Some(AttachReqFsm::new(id)),
            gb: MmCtxGb::default(),
            iu: MmCtxIu::default(),
            pdp_list: Vec::new(),
            ggsn_lookup: None,
            subscr: None,
            timer_t: None,
        }
    }

    /// Current GMM state
    pub fn gmm_state(&self) -> Option<GmmState> {
        self.gmm_fsm.as_ref().map(|fsm| fsm.state())
    }

    /// Short identification for log lines
    pub fn log_id(&self) -> String {
        if !self.imsi.is_empty() {
            format!("IMSI[{}]", self.imsi)
        } else if self.ran_type == RanType::UtranIu {
            format!("Iu[{}]", self.iu.ue_ctx.map_or(0, |ue| ue.conn_id))
        } else {
            format!("TLLI[{:08x}]", self.gb.tlli)
        }
    }
}

// ============================================================================
// PDP, GGSN, APN, LLME and Lookup Contexts
// ============================================================================

/// SGSN PDP context
#[derive(Debug, Clone)]
pub struct PdpCtx {
    /// Pool ID
    pub id: u64,
    pub nsapi: u8,
    /// LLC SAPI
    pub sapi: u8,
    /// Transaction identifier
    pub ti: u8,
    /// Owning MM context
    pub mm_id: Option<u64>,
    /// Serving GGSN context
    pub ggsn_id: Option<u64>,
    /// GTP library handle
    pub lib: Option<GtpHandle>,
    /// GSN user plane address currently given to the GGSN
    pub gtpu_addr: Option<Ipv4Addr>,
    /// Counter group id
    pub ctrg: u64,
    /// Free the GGSN context together with this PDP context
    pub destroy_ggsn: bool,
    pub apn: String,
    pub qos_subscribed: Vec<u8>,
    pub pdp_charg: Option<[u8; 2]>,
}

/// SGSN GGSN context
#[derive(Debug, Clone)]
pub struct GgsnCtx {
    /// Pool ID
    pub id: u64,
    /// Configured GGSN id
    pub ggsn_id: u32,
    pub remote_addr: Ipv4Addr,
    pub gtp_version: u8,
    /// Last recovery counter seen, -1 if unknown
    pub remote_restart_ctr: i32,
    /// Zero disables echo
    pub echo_interval: Duration,
    /// PDP context pool ids bound to this GGSN
    pub pdp_list: Vec<u64>,
}

/// APN routing rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnCtx {
    /// Pool ID
    pub id: u64,
    /// Exact name or `*` prefixed suffix
    pub name: String,
    pub imsi_prefix: String,
    pub ggsn_id: Option<u64>,
    pub description: String,
}

/// Reset value of `Llme::age_timestamp`
pub const GPRS_LLME_RESET_AGE: i64 = 0;

/// LLC management entity of one TLLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Llme {
    /// Pool ID
    pub id: u64,
    pub tlli: u32,
    /// Monotonic seconds of last activity, `GPRS_LLME_RESET_AGE` if untouched
    pub age_timestamp: i64,
}

/// Pending dynamic GGSN resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GgsnLookup {
    /// Pool ID
    pub id: u64,
    /// Requesting MM context, cleared if it goes away first
    pub mm_id: Option<u64>,
    pub apn_str: String,
    pub nsapi: u8,
    pub sapi: u8,
    pub ti: u8,
}

// ============================================================================
// External Paths
// ============================================================================

/// Collaborators the core talks to
pub struct SgsnPaths {
    pub gtp: Box<dyn GtpPath>,
    pub llc: Box<dyn LlcPath>,
    pub nas: Box<dyn NasPath>,
    pub subscribers: Box<dyn SubscriberStore>,
}

impl Default for SgsnPaths {
    fn default() -> Self {
        Self {
            gtp: Box::new(LoggingGtpPath),
            llc: Box::new(LoggingLlcPath),
            nas: Box::new(LoggingNasPath),
            subscribers: Box::new(LocalSubscriberStore::new()),
        }
    }
}

// ============================================================================
// SGSN Context
// ============================================================================

/// SGSN core aggregate
pub struct SgsnContext {
    pub config: SgsnConfig,
    next_id: u64,

    pub(crate) mm_pool: HashMap<u64, MmCtx>,
    pub(crate) mm_list: Vec<u64>,
    pub(crate) pdp_pool: HashMap<u64, PdpCtx>,
    pub(crate) pdp_list: Vec<u64>,
    pub(crate) ggsn_pool: HashMap<u64, GgsnCtx>,
    pub(crate) ggsn_list: Vec<u64>,
    pub(crate) apn_list: Vec<ApnCtx>,
    pub(crate) llme_pool: HashMap<u64, Llme>,
    pub(crate) llme_list: Vec<u64>,
    pub(crate) lookups: HashMap<u64, GgsnLookup>,
    /// GTP library handle -> PDP context pool id
    pub(crate) gtp_handles: HashMap<GtpHandle, u64>,
    next_gtp_handle: u64,

    pub counters: CounterRegistry,
    pub timers: TimerManager,
    pub signals: SignalBus,
    pub(crate) paths: SgsnPaths,
}

impl SgsnContext {
    /// Create the SGSN context and apply the static configuration
    pub fn new(config: SgsnConfig, paths: SgsnPaths) -> Self {
        let counters = CounterRegistry::new(config.max_counter_groups);
        let mut ctx = Self {
            config,
            next_id: 1,
            mm_pool: HashMap::new(),
            mm_list: Vec::new(),
            pdp_pool: HashMap::new(),
            pdp_list: Vec::new(),
            ggsn_pool: HashMap::new(),
            ggsn_list: Vec::new(),
            apn_list: Vec::new(),
            llme_pool: HashMap::new(),
            llme_list: Vec::new(),
            lookups: HashMap::new(),
            gtp_handles: HashMap::new(),
            next_gtp_handle: 1,
            counters,
            timers: TimerManager::new(),
            signals: SignalBus::new(),
            paths,
        };
        ctx.apply_config();
        ctx
    }

    fn apply_config(&mut self) {
        let ggsns = self.config.ggsn.clone();
        for conf in &ggsns {
            let id = self.ggsn_ctx_alloc(conf.id);
            if let Some(ggsn) = self.ggsn_pool.get_mut(&id) {
                ggsn.remote_addr = conf.remote_addr;
                ggsn.gtp_version = conf.gtp_version;
                ggsn.echo_interval = Duration::from_secs(conf.echo_interval);
            }
        }

        let apns = self.config.apn.clone();
        for conf in &apns {
            let ggsn = self.ggsn_by_id(conf.ggsn);
            let id = self.apn_find_alloc(&conf.name, &conf.imsi_prefix);
            if let Some(apn) = self.apn_list.iter_mut().find(|a| a.id == id) {
                apn.ggsn_id = ggsn;
                apn.description = conf.description.clone();
            }
        }

        log::info!(
            "SGSN context initialized ({} GGSN, {} APN)",
            self.ggsn_list.len(),
            self.apn_list.len()
        );
    }

    /// Start periodic activity
    pub fn start(&mut self) {
        self.timers
            .start(SgsnTimerId::LlmeCheck, self.config.llme_check_tick());
    }

    /// Tear down every object of the node
    pub fn fini(&mut self) {
        for mm_id in self.mm_list.clone() {
            self.mm_ctx_cleanup_free(mm_id);
        }
        for pdp_id in self.pdp_list.clone() {
            self.pdp_ctx_free(pdp_id);
        }
        for llme_id in self.llme_list.clone() {
            if let Err(e) = self.llme_unassign(llme_id) {
                log::error!("LLME unassign at shutdown failed: {e}");
            }
        }
        for ggsn_id in self.ggsn_list.clone() {
            self.ggsn_ctx_free(ggsn_id);
        }
        for apn_id in self.apn_list.iter().map(|a| a.id).collect::<Vec<_>>() {
            self.apn_free(apn_id);
        }
        self.lookups.clear();
        self.timers.stop(SgsnTimerId::LlmeCheck);
        log::info!("SGSN context finalized");
    }

    /// Get next pool ID
    pub fn next_pool_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub(crate) fn next_gtp_handle(&mut self) -> GtpHandle {
        let handle = GtpHandle(self.next_gtp_handle);
        self.next_gtp_handle += 1;
        handle
    }

    /// Dispatch an expired timer
    pub fn timer_expired(&mut self, timer_id: SgsnTimerId, now_secs: i64) {
        match timer_id {
            SgsnTimerId::GgsnEcho(ggsn_id) => self.ggsn_echo_timer_cb(ggsn_id),
            SgsnTimerId::MmTimer(mm_id) => self.mm_timer_cb(mm_id),
            SgsnTimerId::GmmState(mm_id) => self.gmm_state_timer_cb(mm_id),
            SgsnTimerId::MmReady(mm_id) => self.mm_ready_timer_cb(mm_id),
            SgsnTimerId::LlmeCheck => self.llme_check(now_secs),
        }
    }
}

// ============================================================================
// MM Context Registry
// ============================================================================

impl SgsnContext {
    /// Allocate a new MM context, generic part
    pub fn mm_ctx_alloc(&mut self, rate_ctr_id: u32) -> Option<u64> {
        if self.config.max_num_of_ue > 0 && self.mm_list.len() >= self.config.max_num_of_ue {
            log::error!("Maximum number of MM contexts [{}] reached", self.config.max_num_of_ue);
            return None;
        }

        let Some(ctrg) = self.counters.alloc(CounterGroupClass::MmCtx, rate_ctr_id) else {
            log::error!("Cannot allocate counter group for MM context [{rate_ctr_id}]");
            return None;
        };

        let id = self.next_pool_id();
        self.mm_pool.insert(id, MmCtx::new(id, ctrg));
        self.mm_list.push(id);

        log::info!("[Added] MM context (id={id}, ctr={rate_ctr_id})");
        Some(id)
    }

    /// Allocate a new MM context for GERAN Gb
    pub fn mm_ctx_alloc_gb(&mut self, tlli: u32, raid: &Rai) -> Option<u64> {
        if let Some(existing) = self.mm_ctx_by_tlli(tlli, raid) {
            log::error!("TLLI[{tlli:08x}] already in use by MM context {existing}");
            return None;
        }
        let id = self.mm_ctx_alloc(tlli)?;
        let cipher = self.config.cipher;
        let mm = self.mm_pool.get_mut(&id)?;
        mm.ra = *raid;
        mm.ran_type = RanType::GeranGb;
        mm.gb.tlli = tlli;
        mm.ciph_algo = cipher;
        mm.gb.mm_state_fsm = Some(GbMmStateFsm::new(tlli));

        log::debug!("[{}] Allocated with {:?} cipher", mm.log_id(), cipher);
        Some(id)
    }

    /// Allocate a new MM context for UTRAN Iu
    pub fn mm_ctx_alloc_iu(&mut self, mut ue_ctx: IuUeCtx) -> Option<u64> {
        let id = self.mm_ctx_alloc(ue_ctx.conn_id)?;
        ue_ctx.rab_assign_addr_enc = self.config.iu.rab_assign_addr_enc;
        let mm = self.mm_pool.get_mut(&id)?;
        mm.ra = ue_ctx.ra_id;
        mm.ran_type = RanType::UtranIu;
        mm.iu.ue_ctx = Some(ue_ctx);
        mm.iu.new_key = true;
        mm.iu.mm_state_fsm = Some(IuMmStateFsm::new(ue_ctx.conn_id));
        Some(id)
    }

    /// Get an MM context
    pub fn mm_ctx(&self, id: u64) -> Option<&MmCtx> {
        self.mm_pool.get(&id)
    }

    /// Get an MM context for update
    pub fn mm_ctx_mut(&mut self, id: u64) -> Option<&mut MmCtx> {
        self.mm_pool.get_mut(&id)
    }

    /// MM contexts in allocation order
    pub fn mm_ctxs(&self) -> impl Iterator<Item = &MmCtx> {
        self.mm_list.iter().filter_map(|id| self.mm_pool.get(id))
    }

    /// Number of live MM contexts
    pub fn mm_ctx_count(&self) -> usize {
        self.mm_list.len()
    }

    /// Find by current or new TLLI within a routing area
    pub fn mm_ctx_by_tlli(&self, tlli: u32, raid: &Rai) -> Option<u64> {
        self.mm_ctxs()
            .find(|mm| (tlli == mm.gb.tlli || tlli == mm.gb.tlli_new) && mm.ra == *raid)
            .map(|mm| mm.id)
    }

    /// Find by TLLI derived from the current or previous P-TMSI
    pub fn mm_ctx_by_tlli_and_ptmsi(&self, tlli: u32, raid: &Rai) -> Option<u64> {
        let kind = tlli_type(tlli);
        if kind != TlliType::Local && kind != TlliType::Foreign {
            return None;
        }
        self.mm_ctxs()
            .find(|mm| {
                (tmsi_to_tlli(mm.p_tmsi, kind) == tlli || tmsi_to_tlli(mm.p_tmsi_old, kind) == tlli)
                    && mm.ra == *raid
            })
            .map(|mm| mm.id)
    }

    /// Find by current, or non-zero previous, P-TMSI
    pub fn mm_ctx_by_ptmsi(&self, p_tmsi: u32) -> Option<u64> {
        self.mm_ctxs()
            .find(|mm| mm.p_tmsi == p_tmsi || (mm.p_tmsi_old != 0 && mm.p_tmsi_old == p_tmsi))
            .map(|mm| mm.id)
    }

    /// Find by IMSI
    pub fn mm_ctx_by_imsi(&self, imsi: &str) -> Option<u64> {
        self.mm_ctxs().find(|mm| mm.imsi == imsi).map(|mm| mm.id)
    }

    /// Find by Iu connection id
    pub fn mm_ctx_by_ue_ctx(&self, conn_id: u32) -> Option<u64> {
        self.mm_ctxs()
            .find(|mm| mm.iu.ue_ctx.is_some_and(|ue| ue.conn_id == conn_id))
            .map(|mm| mm.id)
    }

    /// GMM state of an MM context
    pub fn gmm_state(&self, mm_id: u64) -> Option<GmmState> {
        self.mm_pool.get(&mm_id).and_then(|mm| mm.gmm_state())
    }

    /// Fetch the subscriber profile of an MM context from the store
    pub fn mm_update_subscriber_data(&mut self, mm_id: u64) -> SgsnResult<bool> {
        let imsi = self
            .mm_pool
            .get(&mm_id)
            .map(|mm| mm.imsi.clone())
            .ok_or(SgsnError::UnknownMmCtx(mm_id))?;
        if imsi.is_empty() {
            return Ok(false);
        }

        let profile = self.paths.subscribers.get_profile(&imsi);
        let Some(mm) = self.mm_pool.get_mut(&mm_id) else {
            return Err(SgsnError::UnknownMmCtx(mm_id));
        };
        let old = std::mem::replace(&mut mm.subscr, profile);
        let found = mm.subscr.is_some();
        if let Some(profile) = mm.subscr.as_ref() {
            mm.msisdn = profile.msisdn.clone();
        }
        if let Some(old) = old {
            self.paths.subscribers.release_profile(old);
        }
        log::debug!("[{mm_id}] Subscriber data updated (profile: {found})");
        Ok(found)
    }

    /// Start the per-MM protocol timer T`t`
    pub fn mm_timer_start(&mut self, mm_id: u64, t: u32, duration: Duration) -> SgsnResult<()> {
        let mm = self
            .mm_pool
            .get_mut(&mm_id)
            .ok_or(SgsnError::UnknownMmCtx(mm_id))?;
        mm.timer_t = Some(t);
        self.timers.start(SgsnTimerId::MmTimer(mm_id), duration);
        Ok(())
    }

    /// Stop the per-MM protocol timer
    pub fn mm_timer_stop(&mut self, mm_id: u64) {
        if let Some(mm) = self.mm_pool.get_mut(&mm_id) {
            mm.timer_t = None;
        }
        self.timers.stop(SgsnTimerId::MmTimer(mm_id));
    }

    fn mm_timer_cb(&mut self, mm_id: u64) {
        let Some(mm) = self.mm_pool.get_mut(&mm_id) else {
            log::debug!("MM timer fired for freed context [{mm_id}]");
            return;
        };
        let t = mm.timer_t.take();
        log::info!("[{}] MM timer T{} expired", mm.log_id(), t.unwrap_or(0));
    }

    /// Hard free of an MM context; does not clean up PDP contexts at the GGSN
    fn mm_ctx_free(&mut self, mm_id: u64) {
        self.mm_list.retain(|id| *id != mm_id);

        let pdps = self
            .mm_pool
            .get(&mm_id)
            .map(|mm| mm.pdp_list.clone())
            .unwrap_or_default();
        for pdp_id in pdps {
            self.pdp_ctx_free(pdp_id);
        }

        if let Some(mm) = self.mm_pool.remove(&mm_id) {
            self.counters.free(mm.ctrg);
            log::info!("[Removed] MM context {} (id={})", mm.log_id(), mm_id);
        }
    }

    /// Release an MM context and everything hanging off it
    pub fn mm_ctx_cleanup_free(&mut self, mm_id: u64) {
        let Some(mm) = self.mm_pool.get_mut(&mm_id) else {
            log::error!("Cleanup of unknown MM context [{mm_id}]");
            debug_assert!(false, "double free of MM context {mm_id}");
            return;
        };
        let log_id = mm.log_id();

        let llme = if mm.ran_type == RanType::GeranGb {
            mm.gb.llme
        } else {
            if mm.gb.llme.is_some() {
                log::error!("[{log_id}] Iu context still references an LLME");
                debug_assert!(false, "Iu MM context with LLME");
            }
            None
        };

        // Forget about ongoing look-ups
        if let Some(lookup_id) = mm.ggsn_lookup.take() {
            log::info!("[{log_id}] Cleaning MM context with on-going GGSN query");
            if let Some(lookup) = self.lookups.get_mut(&lookup_id) {
                lookup.mm_id = None;
            }
        }

        let pdps = self
            .mm_pool
            .get(&mm_id)
            .map(|mm| mm.pdp_list.clone())
            .unwrap_or_default();
        for pdp_id in pdps {
            if let Some(pdp) = self.pdp_pool.get(&pdp_id) {
                log::info!("[{log_id}] Dropping PDP context for NSAPI={}", pdp.nsapi);
            }
            self.pdp_ctx_terminate(pdp_id);
        }

        if self.timers.stop(SgsnTimerId::MmTimer(mm_id)) {
            log::info!("[{log_id}] Cancelling MM timer");
        }
        self.timers.stop(SgsnTimerId::GmmState(mm_id));
        self.timers.stop(SgsnTimerId::MmReady(mm_id));

        let Some(mm) = self.mm_pool.get_mut(&mm_id) else {
            return;
        };
        let signal = SgsnSignal::MmFree {
            mm_id,
            imsi: mm.imsi.clone(),
            p_tmsi: mm.p_tmsi,
        };
        let subscr = mm.subscr.take();
        self.signals.dispatch(signal);

        // Detach from subscriber which is possibly freed then
        if let Some(subscr) = subscr {
            self.paths.subscribers.release_profile(subscr);
        }

        if let Some(mm) = self.mm_pool.get_mut(&mm_id) {
            mm.attach_req_fsm = None;
            mm.gb.mm_state_fsm = None;
            mm.iu.mm_state_fsm = None;
            mm.gmm_fsm = None;
        }

        self.mm_ctx_free(mm_id);

        // TLLI unassignment must come after the MM context is gone
        if let Some(llme_id) = llme {
            if let Err(e) = self.llme_unassign(llme_id) {
                log::error!("[{log_id}] LLME unassign failed, llme not freed: {e}");
            }
        }
    }
}
