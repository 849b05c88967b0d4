//! SGSN GTP Path
//!
//! Interface towards the GTP transport library (Gn/Gp). The library never
//! holds a reference to a PDP context: it only knows opaque `GtpHandle`s,
//! which the context layer maps back to PDP contexts through its handle
//! table. Removing the table entry is what invalidates a handle.

use crate::error::SgsnResult;
use std::fmt;
use std::net::Ipv4Addr;

/// Opaque per-PDP-context handle of the GTP library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GtpHandle(pub u64);

impl fmt::Display for GtpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gtp#{}", self.0)
    }
}

/// GTP transport operations used by the core
pub trait GtpPath {
    /// Create the tunnel state for `handle` with the given GSN user plane address
    fn bind_endpoint(&mut self, handle: GtpHandle, addr: Ipv4Addr) -> SgsnResult<()>;

    /// Move the GSN user plane address of an existing tunnel (Update PDP Context)
    fn rebind_endpoint(&mut self, handle: GtpHandle, addr: Ipv4Addr) -> SgsnResult<()>;

    /// Ask the GGSN to delete the PDP context behind `handle`
    fn delete_context_req(&mut self, handle: GtpHandle);

    /// Drop the library state for `handle`
    fn release_handle(&mut self, handle: GtpHandle);

    /// Send a GTP Echo Request to a GGSN
    fn echo_req(&mut self, ggsn_addr: Ipv4Addr);
}

/// GTP path that only logs. Used until a real transport is attached.
#[derive(Debug, Default)]
pub struct LoggingGtpPath;

impl GtpPath for LoggingGtpPath {
    fn bind_endpoint(&mut self, handle: GtpHandle, addr: Ipv4Addr) -> SgsnResult<()> {
        log::debug!("GTP bind {handle} -> {addr}");
        Ok(())
    }

    fn rebind_endpoint(&mut self, handle: GtpHandle, addr: Ipv4Addr) -> SgsnResult<()> {
        log::debug!("GTP update {handle} -> {addr}");
        Ok(())
    }

    fn delete_context_req(&mut self, handle: GtpHandle) {
        log::debug!("GTP Delete PDP Context Request {handle}");
    }

    fn release_handle(&mut self, handle: GtpHandle) {
        log::debug!("GTP release {handle}");
    }

    fn echo_req(&mut self, ggsn_addr: Ipv4Addr) {
        log::debug!("GTP Echo Request -> {ggsn_addr}");
    }
}
