//! LLME Table
//!
//! LLC management entities known to the SGSN and the periodic sweep that
//! releases the ones that stayed inactive for too long.

use crate::context::{Llme, SgsnContext, GPRS_LLME_RESET_AGE};
use crate::error::{SgsnError, SgsnResult};
use crate::metrics::SgsnCounter;
use crate::timer::SgsnTimerId;

impl SgsnContext {
    /// Track a new LLME for `tlli`
    pub fn llme_alloc(&mut self, tlli: u32) -> u64 {
        let id = self.next_pool_id();
        self.llme_pool.insert(
            id,
            Llme {
                id,
                tlli,
                age_timestamp: GPRS_LLME_RESET_AGE,
            },
        );
        self.llme_list.push(id);
        log::debug!("[Added] LLME TLLI[{tlli:08x}] (id={id})");
        id
    }

    pub fn llme(&self, id: u64) -> Option<&Llme> {
        self.llme_pool.get(&id)
    }

    pub fn llme_by_tlli(&self, tlli: u32) -> Option<u64> {
        self.llme_list
            .iter()
            .copied()
            .find(|id| self.llme_pool.get(id).is_some_and(|llme| llme.tlli == tlli))
    }

    pub fn llme_count(&self) -> usize {
        self.llme_list.len()
    }

    /// Record activity on an LLME at monotonic time `now`
    pub fn llme_touch(&mut self, id: u64, now: i64) {
        if let Some(llme) = self.llme_pool.get_mut(&id) {
            llme.age_timestamp = now;
        }
    }

    /// Unassign an LLME at the LLC layer and forget it.
    ///
    /// Refused while a live MM context still references the entity.
    pub fn llme_unassign(&mut self, id: u64) -> SgsnResult<()> {
        let llme = self.llme_pool.get(&id).ok_or(SgsnError::UnknownLlme(id))?;
        let tlli = llme.tlli;

        if let Some(mm) = self.mm_ctxs().find(|mm| mm.gb.llme == Some(id)) {
            log::error!(
                "LLME TLLI[{tlli:08x}] still referenced by {}, not unassigning",
                mm.log_id()
            );
            return Err(SgsnError::InvariantViolation(format!(
                "LLME {id} referenced by MM context {}",
                mm.id
            )));
        }

        self.paths.llc.llme_unassign(tlli)?;
        self.llme_list.retain(|l| *l != id);
        self.llme_pool.remove(&id);
        log::debug!("[Removed] LLME TLLI[{tlli:08x}] (id={id})");
        Ok(())
    }

    fn llme_cleanup_free(&mut self, id: u64) {
        let owner = self
            .mm_ctxs()
            .find(|mm| mm.gb.llme == Some(id))
            .map(|mm| mm.id);
        if let Some(mm_id) = owner {
            self.access_cancelled(mm_id, None);
            return;
        }

        if let Some(llme) = self.llme_pool.get(&id) {
            log::info!("Deleting orphaned LLME, TLLI[{:08x}]", llme.tlli);
        }
        if let Err(e) = self.llme_unassign(id) {
            log::error!("Orphaned LLME [{id}] unassign failed: {e}");
        }
    }

    /// Periodic inactivity sweep at monotonic time `now`
    pub(crate) fn llme_check(&mut self, now: i64) {
        let max_age = self.config.max_time_to_idle();
        log::debug!("Checking for inactive LLMEs, time = {now}");

        for id in self.llme_list.clone() {
            let Some(llme) = self.llme_pool.get_mut(&id) else {
                continue;
            };
            if llme.age_timestamp == GPRS_LLME_RESET_AGE {
                llme.age_timestamp = now;
            }

            let age = now - llme.age_timestamp;
            if age > max_age || age < 0 {
                log::info!("Inactivity timeout for TLLI[{:08x}], age {age}", llme.tlli);
                self.counters.inc(SgsnCounter::LlmeExpired);
                self.llme_cleanup_free(id);
            }
        }

        self.timers
            .start(SgsnTimerId::LlmeCheck, self.config.llme_check_tick());
    }
}
