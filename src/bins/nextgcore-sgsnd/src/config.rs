//! SGSN Configuration
//!
//! YAML configuration for the SGSN. Every field has a default so that an
//! empty `sgsn:` section yields a working node with no GGSN and no APN rules.

use crate::gmm_sm::GmmState;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Configuration validation error: {0}")]
    Invalid(String),
}

// ============================================================================
// Enumerations
// ============================================================================

/// GPRS ciphering algorithm (GEA)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GprsCipher {
    /// No ciphering
    #[default]
    Gea0,
    Gea1,
    Gea2,
    Gea3,
    Gea4,
}

/// Subscriber authorization policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthPolicy {
    /// Accept every subscriber
    AcceptAll,
    /// Accept only subscribers known to the local subscriber store
    #[default]
    Closed,
    /// Accept only subscribers on the access list
    AclOnly,
    /// Ask the remote HLR
    Remote,
}

/// Transport layer address encoding used in Iu RAB assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RabAddrEnc {
    /// Raw 4-byte IPv4 address
    V4raw,
    /// X.213 NSAP encoding
    #[default]
    X213,
}

// ============================================================================
// Sections
// ============================================================================

/// GTP section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GtpConf {
    /// Local GTP address; also the anchor for user plane while Iu is idle
    pub listen_addr: Ipv4Addr,
}

impl Default for GtpConf {
    fn default() -> Self {
        Self {
            listen_addr: Ipv4Addr::LOCALHOST,
        }
    }
}

/// Per-GMM-state timeouts in seconds. Absent means the state never times out.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GmmStateTimeouts {
    pub deregistered: Option<u64>,
    pub common_proc_init: Option<u64>,
    pub registered_normal: Option<u64>,
    pub registered_suspended: Option<u64>,
    pub deregistered_init: Option<u64>,
}

impl GmmStateTimeouts {
    /// Timeout configured for `state`
    pub fn for_state(&self, state: GmmState) -> Option<Duration> {
        let secs = match state {
            GmmState::Deregistered => self.deregistered,
            GmmState::CommonProcInit => self.common_proc_init,
            GmmState::RegisteredNormal => self.registered_normal,
            GmmState::RegisteredSuspended => self.registered_suspended,
            GmmState::DeregisteredInit => self.deregistered_init,
        };
        secs.map(Duration::from_secs)
    }
}

/// Timer section (seconds)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConf {
    /// T3312 periodic RA update timer
    pub t3312: u64,
    /// T3314 READY timer
    pub t3314: u64,
    /// Period of the LLME inactivity sweep
    pub llme_check_tick: u64,
    pub gmm_state: GmmStateTimeouts,
}

impl Default for TimerConf {
    fn default() -> Self {
        Self {
            t3312: 600,
            t3314: 44,
            llme_check_tick: 30,
            gmm_state: GmmStateTimeouts::default(),
        }
    }
}

/// Statically configured GGSN
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GgsnConf {
    pub id: u32,
    pub remote_addr: Ipv4Addr,
    #[serde(default = "default_gtp_version")]
    pub gtp_version: u8,
    /// Echo interval in seconds, 0 disables echo
    #[serde(default)]
    pub echo_interval: u64,
}

fn default_gtp_version() -> u8 {
    1
}

/// APN routing rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApnConf {
    /// Exact name, or `*` prefixed suffix pattern
    pub name: String,
    #[serde(default)]
    pub imsi_prefix: String,
    /// GGSN id this rule routes to
    pub ggsn: u32,
    #[serde(default)]
    pub description: String,
}

/// Iu section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IuConf {
    pub rab_assign_addr_enc: RabAddrEnc,
}

// ============================================================================
// SGSN Configuration
// ============================================================================

/// SGSN configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SgsnConfig {
    pub gtp: GtpConf,
    pub cipher: GprsCipher,
    pub auth_policy: AuthPolicy,
    pub require_authentication: bool,
    pub timers: TimerConf,
    pub ggsn: Vec<GgsnConf>,
    pub apn: Vec<ApnConf>,
    pub iu: IuConf,
    /// Upper bound on live counter groups
    pub max_counter_groups: usize,
    /// Upper bound on MM contexts, 0 for unlimited
    pub max_num_of_ue: usize,
}

impl Default for SgsnConfig {
    fn default() -> Self {
        Self {
            gtp: GtpConf::default(),
            cipher: GprsCipher::default(),
            auth_policy: AuthPolicy::default(),
            require_authentication: true,
            timers: TimerConf::default(),
            ggsn: Vec::new(),
            apn: Vec::new(),
            iu: IuConf::default(),
            max_counter_groups: 65536,
            max_num_of_ue: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    sgsn: SgsnConfig,
}

impl SgsnConfig {
    /// Parse configuration from YAML text
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(text)?;
        file.sgsn.validate()?;
        Ok(file.sgsn)
    }

    /// Load configuration from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Check cross references between sections
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, ggsn) in self.ggsn.iter().enumerate() {
            if self.ggsn[..i].iter().any(|g| g.id == ggsn.id) {
                return Err(ConfigError::Invalid(format!("duplicate ggsn id {}", ggsn.id)));
            }
        }
        for apn in &self.apn {
            if apn.name.is_empty() {
                return Err(ConfigError::Invalid("apn with empty name".into()));
            }
            if !self.ggsn.iter().any(|g| g.id == apn.ggsn) {
                return Err(ConfigError::Invalid(format!(
                    "apn '{}' refers to unknown ggsn {}",
                    apn.name, apn.ggsn
                )));
            }
        }
        if self.timers.llme_check_tick == 0 {
            return Err(ConfigError::Invalid("llme_check_tick must be non-zero".into()));
        }
        Ok(())
    }

    /// Maximum time an LLME may stay idle before it is considered stale
    ///
    /// The MS is expected to perform a periodic RA update within T3312 once
    /// its READY timer has run out; four extra minutes cover the mobile
    /// reachable timer.
    pub fn max_time_to_idle(&self) -> i64 {
        (self.timers.t3314 + self.timers.t3312 + 4 * 60) as i64
    }

    /// Period of the LLME sweep
    pub fn llme_check_tick(&self) -> Duration {
        Duration::from_secs(self.timers.llme_check_tick)
    }

    /// READY timer duration
    pub fn ready_timer(&self) -> Duration {
        Duration::from_secs(self.timers.t3314)
    }
}
