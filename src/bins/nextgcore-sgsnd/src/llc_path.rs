//! SGSN LLC Path
//!
//! Interface towards the LLC/SNDCP layer of the Gb interface.

use crate::error::SgsnResult;

/// LLC/SNDCP operations used by the core
pub trait LlcPath {
    /// SNDCP: tear down the SNDCP entity of `nsapi` on `sapi`
    fn sndcp_deactivate_ind(&mut self, tlli: u32, sapi: u8, nsapi: u8);

    /// LLGMM: unassign the LLME of `tlli`
    fn llme_unassign(&mut self, tlli: u32) -> SgsnResult<()>;
}

/// LLC path that only logs
#[derive(Debug, Default)]
pub struct LoggingLlcPath;

impl LlcPath for LoggingLlcPath {
    fn sndcp_deactivate_ind(&mut self, tlli: u32, sapi: u8, nsapi: u8) {
        log::debug!("SNDCP deactivate TLLI[{tlli:08x}] SAPI[{sapi}] NSAPI[{nsapi}]");
    }

    fn llme_unassign(&mut self, tlli: u32) -> SgsnResult<()> {
        log::debug!("LLGMM unassign TLLI[{tlli:08x}]");
        Ok(())
    }
}
