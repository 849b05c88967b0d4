//! P-TMSI and TLLI handling
//!
//! 3GPP TS 23.003 Section 2.6 (TLLI structure) and the SGSN side P-TMSI
//! allocation.

use crate::context::SgsnContext;
use crate::error::{SgsnError, SgsnResult};
use rand::rngs::OsRng;
use rand::TryRngCore;

/// Top two bits set on every P-TMSI issued by this SGSN
pub const TMSI_SGSN_MASK: u32 = 0xC000_0000;
/// Reserved value, never a valid P-TMSI; also the allocation failure marker
pub const GSM_RESERVED_TMSI: u32 = 0xFFFF_FFFF;
/// Bound on allocation attempts
pub const PTMSI_ALLOC_MAX_RETRIES: u32 = 100;

// ============================================================================
// TLLI
// ============================================================================

/// TLLI types (3GPP TS 23.003 Table 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlliType {
    Local,
    Foreign,
    Random,
    Auxiliary,
    Reserved,
}

/// Classify a TLLI by its high bits
pub fn tlli_type(tlli: u32) -> TlliType {
    if tlli & 0xC000_0000 == 0xC000_0000 {
        TlliType::Local
    } else if tlli & 0xC000_0000 == 0x8000_0000 {
        TlliType::Foreign
    } else if tlli & 0xF800_0000 == 0x7800_0000 {
        TlliType::Random
    } else if tlli & 0xF800_0000 == 0x7000_0000 {
        TlliType::Auxiliary
    } else {
        TlliType::Reserved
    }
}

/// Derive a local or foreign TLLI from a P-TMSI
pub fn tmsi_to_tlli(p_tmsi: u32, kind: TlliType) -> u32 {
    match kind {
        TlliType::Local => p_tmsi | 0xC000_0000,
        TlliType::Foreign => (p_tmsi & 0x3FFF_FFFF) | 0x8000_0000,
        _ => p_tmsi,
    }
}

// ============================================================================
// P-TMSI Allocation
// ============================================================================

/// Draw a random value from the OS entropy source
pub fn random_u32() -> SgsnResult<u32> {
    OsRng
        .try_next_u32()
        .map_err(|e| SgsnError::RandomSource(e.to_string()))
}

/// Allocate a P-TMSI from `rand`, rejecting values for which `in_use` holds.
///
/// Returns `GSM_RESERVED_TMSI` once `PTMSI_ALLOC_MAX_RETRIES` draws failed.
pub fn ptmsi_alloc_with<R, C>(mut rand: R, in_use: C) -> u32
where
    R: FnMut() -> SgsnResult<u32>,
    C: Fn(u32) -> bool,
{
    for _ in 0..PTMSI_ALLOC_MAX_RETRIES {
        let ptmsi = match rand() {
            Ok(v) => v,
            Err(e) => {
                log::debug!("P-TMSI allocation: {e}");
                continue;
            }
        };

        // Values already in the SGSN range would collapse onto fewer
        // identities once the mask is applied
        if ptmsi >= TMSI_SGSN_MASK {
            continue;
        }
        let ptmsi = ptmsi | TMSI_SGSN_MASK;

        if ptmsi == GSM_RESERVED_TMSI || in_use(ptmsi) {
            continue;
        }
        return ptmsi;
    }

    log::error!("Failed to allocate a P-TMSI: {PTMSI_ALLOC_MAX_RETRIES} unsuccessful attempts");
    GSM_RESERVED_TMSI
}

impl SgsnContext {
    /// Is `p_tmsi` the current or previous P-TMSI of a live MM context
    pub fn ptmsi_in_use(&self, p_tmsi: u32) -> bool {
        self.mm_ctxs()
            .any(|mm| mm.p_tmsi == p_tmsi || mm.p_tmsi_old == p_tmsi)
    }

    /// Allocate a fresh P-TMSI, `GSM_RESERVED_TMSI` on failure
    pub fn ptmsi_alloc(&self) -> u32 {
        ptmsi_alloc_with(random_u32, |p| self.ptmsi_in_use(p))
    }
}
