//! SGSN Timer Management
//!
//! All SGSN timers are single-shot. A handler that needs periodic behaviour
//! re-arms its timer from the expiry path.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

// ============================================================================
// Timer IDs
// ============================================================================

/// SGSN timer identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SgsnTimerId {
    /// GTP echo towards a GGSN (pool id)
    GgsnEcho(u64),
    /// Per-MM-context protocol timer (pool id)
    MmTimer(u64),
    /// GMM state timeout (pool id)
    GmmState(u64),
    /// READY timer T3314 of a Gb MM context (pool id)
    MmReady(u64),
    /// Periodic LLME inactivity sweep
    LlmeCheck,
}

impl SgsnTimerId {
    /// Get timer name
    pub fn name(&self) -> &'static str {
        match self {
            Self::GgsnEcho(_) => "SGSN_TIMER_GGSN_ECHO",
            Self::MmTimer(_) => "SGSN_TIMER_MM",
            Self::GmmState(_) => "SGSN_TIMER_GMM_STATE",
            Self::MmReady(_) => "SGSN_TIMER_T3314",
            Self::LlmeCheck => "SGSN_TIMER_LLME_CHECK",
        }
    }
}

impl fmt::Display for SgsnTimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GgsnEcho(id) | Self::MmTimer(id) | Self::GmmState(id) | Self::MmReady(id) => {
                write!(f, "{}[{}]", self.name(), id)
            }
            Self::LlmeCheck => write!(f, "{}", self.name()),
        }
    }
}

// ============================================================================
// Timer Manager
// ============================================================================

/// Timer manager for SGSN
#[derive(Debug, Default)]
pub struct TimerManager {
    /// Timer expiration times (timer_id -> expiration instant)
    expiration_times: HashMap<SgsnTimerId, Instant>,
}

impl TimerManager {
    /// Create a new timer manager
    pub fn new() -> Self {
        Self {
            expiration_times: HashMap::new(),
        }
    }

    /// Start (or restart) a timer with a specific duration
    pub fn start(&mut self, timer_id: SgsnTimerId, duration: Duration) {
        let expiration = Instant::now() + duration;
        self.expiration_times.insert(timer_id, expiration);
        log::trace!("Started timer {timer_id} with duration {duration:?}");
    }

    /// Stop a timer. Returns true if it was pending.
    pub fn stop(&mut self, timer_id: SgsnTimerId) -> bool {
        let pending = self.expiration_times.remove(&timer_id).is_some();
        if pending {
            log::trace!("Stopped timer {timer_id}");
        }
        pending
    }

    /// Is the timer armed
    pub fn is_pending(&self, timer_id: SgsnTimerId) -> bool {
        self.expiration_times.contains_key(&timer_id)
    }

    /// Time left before the timer fires
    pub fn remaining(&self, timer_id: SgsnTimerId) -> Option<Duration> {
        self.expiration_times
            .get(&timer_id)
            .map(|exp| exp.saturating_duration_since(Instant::now()))
    }

    /// Check for expired timers and return their IDs
    pub fn check_expired(&mut self) -> Vec<SgsnTimerId> {
        self.check_expired_at(Instant::now())
    }

    /// Check for timers expired at `now`, earliest first
    pub fn check_expired_at(&mut self, now: Instant) -> Vec<SgsnTimerId> {
        let mut expired = Vec::new();

        self.expiration_times.retain(|timer_id, expiration| {
            if now >= *expiration {
                expired.push((*expiration, *timer_id));
                false
            } else {
                true
            }
        });

        expired.sort_by_key(|(at, _)| *at);
        expired.into_iter().map(|(_, id)| id).collect()
    }

    /// Number of armed timers
    pub fn active_timer_count(&self) -> usize {
        self.expiration_times.len()
    }
}
