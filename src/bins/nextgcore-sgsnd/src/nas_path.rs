//! SGSN NAS Path
//!
//! Outbound GMM/SM messages towards the MS. Encoding is done by the
//! implementor; the core only decides what to send.

use crate::error::{GmmCause, GsmCause};

/// Network initiated Deactivate PDP Context Request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeactPdpReq {
    pub mm_id: u64,
    pub nsapi: u8,
    pub ti: u8,
    pub cause: GsmCause,
    /// Tear down every PDP context sharing the PDP address
    pub teardown: bool,
}

/// NAS transmit operations used by the core
pub trait NasPath {
    fn tx_deact_pdp_req(&mut self, req: &DeactPdpReq);

    /// Network initiated Detach Request
    fn tx_detach_req(&mut self, mm_id: u64, cause: GmmCause);
}

/// NAS path that only logs
#[derive(Debug, Default)]
pub struct LoggingNasPath;

impl NasPath for LoggingNasPath {
    fn tx_deact_pdp_req(&mut self, req: &DeactPdpReq) {
        log::debug!(
            "[{}] Deactivate PDP Context Request NSAPI[{}] cause {}",
            req.mm_id,
            req.nsapi,
            req.cause
        );
    }

    fn tx_detach_req(&mut self, mm_id: u64, cause: GmmCause) {
        log::debug!("[{mm_id}] Detach Request cause {cause}");
    }
}
