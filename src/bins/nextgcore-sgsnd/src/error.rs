//! SGSN Error types

use std::fmt;
use thiserror::Error;

/// SGSN core error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SgsnError {
    /// Counter group or context pool exhausted
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(&'static str),

    /// No MM context with this pool id
    #[error("Unknown MM context (id={0})")]
    UnknownMmCtx(u64),

    /// No PDP context with this pool id
    #[error("Unknown PDP context (id={0})")]
    UnknownPdpCtx(u64),

    /// No LLME with this pool id
    #[error("Unknown LLME (id={0})")]
    UnknownLlme(u64),

    /// GTP transport layer refused the request
    #[error("GTP transport error: {0}")]
    Transport(String),

    /// Random source could not deliver bytes
    #[error("Random source failure: {0}")]
    RandomSource(String),

    /// Operation would break a context graph invariant
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

/// Result type for SGSN core operations
pub type SgsnResult<T> = Result<T, SgsnError>;

// ============================================================================
// Session Management Cause (3GPP TS 24.008 Section 10.5.6.6)
// ============================================================================

/// SM cause values returned to the caller for translation into a reject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GsmCause {
    /// Insufficient resources
    InsufResources = 26,
    /// Missing or unknown APN
    MissingApn = 27,
    /// Requested service option not subscribed
    ReqServOptNotSub = 33,
    /// Network failure
    NetFail = 38,
    /// Invalid mandatory information
    InvMandInfo = 96,
}

impl GsmCause {
    /// Numeric cause value as carried on the wire
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for GsmCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GsmCause::InsufResources => write!(f, "INSUF_RESOURCES"),
            GsmCause::MissingApn => write!(f, "MISSING_APN"),
            GsmCause::ReqServOptNotSub => write!(f, "REQ_SERV_OPT_NOTSUB"),
            GsmCause::NetFail => write!(f, "NET_FAIL"),
            GsmCause::InvMandInfo => write!(f, "INV_MAND_INFO"),
        }
    }
}

// ============================================================================
// GPRS Mobility Management Cause (3GPP TS 24.008 Section 10.5.5.14)
// ============================================================================

/// GMM cause values carried by network initiated detach and rejects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GmmCause {
    /// IMSI unknown in HLR
    ImsiUnknown = 2,
    /// GPRS services not allowed
    GprsNotAllowed = 7,
    /// Implicitly detached
    ImplDetached = 10,
    /// Network failure
    NetFail = 17,
}

impl GmmCause {
    /// Numeric cause value as carried on the wire
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for GmmCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GmmCause::ImsiUnknown => write!(f, "IMSI_UNKNOWN"),
            GmmCause::GprsNotAllowed => write!(f, "GPRS_NOTALLOWED"),
            GmmCause::ImplDetached => write!(f, "IMPL_DETACHED"),
            GmmCause::NetFail => write!(f, "NET_FAIL"),
        }
    }
}
