//! APN Handling
//!
//! APN routing rules, the APN name codec (3GPP TS 23.003 Section 9.1) and
//! the selection of the GGSN serving a PDP context activation.

use crate::context::{ApnCtx, SgsnContext};
use crate::error::GsmCause;
use crate::metrics::SgsnCounter;
use crate::subscriber::{SubscriberPdpData, SubscriberProfile};

/// Size of an APN buffer, including the terminator
pub const GSM_APN_LENGTH: usize = 102;

/// Maximum length of a single APN label
const APN_LABEL_MAX: usize = 63;

// ============================================================================
// APN Codec
// ============================================================================

/// Decode length prefixed APN labels into dotted form
pub fn apn_to_str(encoded: &[u8]) -> Option<String> {
    let mut labels = Vec::new();
    let mut rest = encoded;

    while let Some((&len, tail)) = rest.split_first() {
        let len = len as usize;
        if len == 0 || len > tail.len() {
            return None;
        }
        let label = std::str::from_utf8(&tail[..len]).ok()?;
        labels.push(label);
        rest = &tail[len..];
    }
    Some(labels.join("."))
}

/// Encode a dotted APN into length prefixed labels
pub fn apn_from_str(apn: &str) -> Option<Vec<u8>> {
    if apn.is_empty() {
        return Some(Vec::new());
    }

    let mut out = Vec::with_capacity(apn.len() + 1);
    for label in apn.split('.') {
        if label.is_empty() || label.len() > APN_LABEL_MAX {
            return None;
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    if out.len() >= GSM_APN_LENGTH {
        return None;
    }
    Some(out)
}

// ============================================================================
// APN Rules
// ============================================================================

impl SgsnContext {
    /// Find a rule by exact name and IMSI prefix (case-insensitive)
    pub fn apn_by_name(&self, name: &str, imsi_prefix: &str) -> Option<&ApnCtx> {
        self.apn_list.iter().find(|apn| {
            apn.name.eq_ignore_ascii_case(name) && apn.imsi_prefix.eq_ignore_ascii_case(imsi_prefix)
        })
    }

    /// Find a rule, appending a new one if absent
    pub fn apn_find_alloc(&mut self, name: &str, imsi_prefix: &str) -> u64 {
        if let Some(apn) = self.apn_by_name(name, imsi_prefix) {
            return apn.id;
        }

        let id = self.next_pool_id();
        self.apn_list.push(ApnCtx {
            id,
            name: name.to_string(),
            imsi_prefix: imsi_prefix.to_string(),
            ggsn_id: None,
            description: String::new(),
        });
        log::info!("[Added] APN '{name}' (imsi-prefix '{imsi_prefix}')");
        id
    }

    /// Remove a rule
    pub fn apn_free(&mut self, id: u64) -> bool {
        let Some(pos) = self.apn_list.iter().position(|apn| apn.id == id) else {
            return false;
        };
        let apn = self.apn_list.remove(pos);
        log::info!("[Removed] APN '{}' (imsi-prefix '{}')", apn.name, apn.imsi_prefix);
        true
    }

    /// Best rule for `name` and `imsi`.
    ///
    /// A longer IMSI prefix beats a shorter one; on equal prefixes a longer
    /// name match wins, and on a full tie the later rule wins.
    pub fn apn_match(&self, name: &str, imsi: &str) -> Option<&ApnCtx> {
        let mut found = None;
        let mut imsi_prio = 0;
        let mut name_prio = 0;

        for apn in &self.apn_list {
            let imsi_ref_len = apn.imsi_prefix.len();
            if !imsi.starts_with(apn.imsi_prefix.as_str()) || imsi_ref_len < imsi_prio {
                continue;
            }

            let name_ref = match apn.name.strip_prefix('*') {
                Some(suffix) => {
                    if suffix.len() > name.len() {
                        continue;
                    }
                    suffix
                }
                None => {
                    if apn.name.len() != name.len() {
                        continue;
                    }
                    apn.name.as_str()
                }
            };

            let Some(tail) = name.get(name.len() - name_ref.len()..) else {
                continue;
            };
            if !tail.eq_ignore_ascii_case(name_ref) {
                continue;
            }

            if imsi_ref_len == imsi_prio && name_ref.len() < name_prio {
                continue;
            }

            imsi_prio = imsi_ref_len;
            name_prio = name_ref.len();
            found = Some(apn);
        }
        found
    }
}

// ============================================================================
// GGSN Selection
// ============================================================================

/// PDP activation parameters relevant to GGSN selection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    /// Encoded APN IE, if the MS sent one
    pub apn: Option<Vec<u8>>,
    pub qos: Vec<u8>,
    pub pdp_charg: Option<[u8; 2]>,
}

impl SessionRequest {
    /// Request for a dotted APN, `None` for no APN IE
    pub fn with_apn(apn: Option<&str>) -> Self {
        Self {
            apn: apn.and_then(apn_from_str),
            ..Default::default()
        }
    }
}

/// Outcome of GGSN selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApnSelection {
    /// GGSN context pool id
    pub ggsn_id: u64,
    /// Selected APN, empty when any APN was allowed and none was given
    pub apn: String,
    pub qos_subscribed: Vec<u8>,
    pub pdp_charg: Option<[u8; 2]>,
}

/// Copy QoS and charging characteristics of a subscribed PDP entry.
/// The entry's charging characteristics win over the subscriber wide ones.
fn insert_extra(
    subscr: &SubscriberProfile,
    pdp: &SubscriberPdpData,
    qos: &mut Vec<u8>,
    pdp_charg: &mut Option<[u8; 2]>,
) {
    qos.clone_from(&pdp.qos_subscribed);
    if let Some(charg) = pdp.pdp_charg.or(subscr.pdp_charg) {
        *pdp_charg = Some(charg);
    }
}

impl SgsnContext {
    /// Select the GGSN for a PDP context activation of `mm_id`
    pub fn find_ggsn_ctx(&self, mm_id: u64, req: &SessionRequest) -> Result<ApnSelection, GsmCause> {
        let Some(mm) = self.mm_ctx(mm_id) else {
            log::error!("GGSN selection for unknown MM context [{mm_id}]");
            return Err(GsmCause::NetFail);
        };
        let log_id = mm.log_id();

        let mut qos = req.qos.clone();
        let mut pdp_charg = req.pdp_charg;

        let req_apn = match &req.apn {
            Some(encoded) => {
                if encoded.len() >= GSM_APN_LENGTH - 1 {
                    log::info!("[{log_id}] APN IE too long");
                    return Err(GsmCause::InvMandInfo);
                }
                let Some(apn) = apn_to_str(encoded) else {
                    log::info!("[{log_id}] Malformed APN IE");
                    return Err(GsmCause::InvMandInfo);
                };
                if apn == "*" {
                    String::new()
                } else {
                    apn
                }
            }
            None => String::new(),
        };

        let mut allow_any_apn = mm.subscr.is_none();
        let mut selected: Option<String> = None;
        let mut apn_ctx: Option<&ApnCtx> = None;

        match &mm.subscr {
            Some(subscr) if req_apn.is_empty() => {
                // No specific APN requested, look for one both granted and configured
                for pdp in &subscr.pdp_list {
                    if pdp.apn_str == "*" {
                        allow_any_apn = true;
                        selected = Some(String::new());
                        insert_extra(subscr, pdp, &mut qos, &mut pdp_charg);
                        continue;
                    }
                    if !self.apn_list.is_empty() {
                        apn_ctx = self.apn_match(&req_apn, &mm.imsi);
                        if apn_ctx.is_none() {
                            continue;
                        }
                    }
                    insert_extra(subscr, pdp, &mut qos, &mut pdp_charg);
                    selected = Some(pdp.apn_str.clone());
                    break;
                }
            }
            Some(subscr) => {
                // Check whether the given APN is granted
                for pdp in &subscr.pdp_list {
                    if pdp.apn_str == "*" {
                        insert_extra(subscr, pdp, &mut qos, &mut pdp_charg);
                        selected = Some(req_apn.clone());
                        allow_any_apn = true;
                        continue;
                    }
                    if pdp.apn_str.eq_ignore_ascii_case(&req_apn) {
                        insert_extra(subscr, pdp, &mut qos, &mut pdp_charg);
                        selected = Some(req_apn.clone());
                        break;
                    }
                }
            }
            None => {
                // Any APN is allowed; an empty one prefers the wildcard GGSN
                selected = Some(req_apn.clone());
            }
        }

        if !allow_any_apn && selected.is_none() {
            log::info!("[{log_id}] The requested APN '{req_apn}' is not allowed");
            return Err(GsmCause::ReqServOptNotSub);
        }

        if apn_ctx.is_none() {
            if let Some(name) = &selected {
                apn_ctx = self.apn_match(name, &mm.imsi);
            }
        }

        let selected_name = selected.clone().unwrap_or_default();
        let ggsn_id = if let Some(apn) = apn_ctx {
            apn.ggsn_id
        } else if self.apn_list.is_empty() || (allow_any_apn && selected_name.is_empty()) {
            // No usable configuration, use GGSN 0
            self.ggsn_by_id(0)
        } else {
            log::info!("[{log_id}] The selected APN '{selected_name}' has not been configured");
            return Err(GsmCause::MissingApn);
        };

        let Some(ggsn_id) = ggsn_id.filter(|id| self.ggsn_ctx(*id).is_some()) else {
            log::info!("[{log_id}] No static GGSN configured. Selected APN '{selected_name}'");
            return Err(GsmCause::MissingApn);
        };

        log::info!(
            "[{log_id}] Found GGSN {} for APN '{}' (requested '{req_apn}')",
            self.ggsn_ctx(ggsn_id).map_or(0, |g| g.ggsn_id),
            selected.as_deref().unwrap_or("---"),
        );
        Ok(ApnSelection {
            ggsn_id,
            apn: selected_name,
            qos_subscribed: qos,
            pdp_charg,
        })
    }

    /// Activate PDP Context: select the GGSN and create the PDP context
    pub fn activate_pdp_ctx(
        &mut self,
        mm_id: u64,
        nsapi: u8,
        sapi: u8,
        ti: u8,
        req: &SessionRequest,
    ) -> Result<u64, GsmCause> {
        self.counters.inc(SgsnCounter::PdpActivateRequested);

        let selection = match self.find_ggsn_ctx(mm_id, req) {
            Ok(selection) => selection,
            Err(cause) => {
                self.counters.inc(SgsnCounter::PdpActivateRejected);
                return Err(cause);
            }
        };

        let Some(pdp_id) = self.pdp_ctx_alloc(mm_id, selection.ggsn_id, nsapi) else {
            self.counters.inc(SgsnCounter::PdpActivateRejected);
            return Err(GsmCause::InsufResources);
        };
        if let Some(pdp) = self.pdp_ctx_mut(pdp_id) {
            pdp.sapi = sapi;
            pdp.ti = ti;
            pdp.apn = selection.apn;
            pdp.qos_subscribed = selection.qos_subscribed;
            pdp.pdp_charg = selection.pdp_charg;
        }
        self.counters.inc(SgsnCounter::PdpActivateAccepted);
        Ok(pdp_id)
    }
}
