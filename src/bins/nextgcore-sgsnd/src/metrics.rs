//! SGSN Metrics
//!
//! Named counter groups for MM and PDP contexts plus the node-wide SGSN
//! counters. Groups are read-only to monitoring; only the core bumps them.

use std::collections::HashMap;

// ============================================================================
// MM Context Counters
// ============================================================================

/// Per-MM-context counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MmCtxCounter {
    SignPacketsIn,
    SignPacketsOut,
    UdataPacketsIn,
    UdataPacketsOut,
    UdataBytesIn,
    UdataBytesOut,
    PdpCtxAct,
    Suspend,
    PagingPs,
    PagingCs,
    RaUpdate,
}

impl MmCtxCounter {
    pub const ALL: [MmCtxCounter; 11] = [
        Self::SignPacketsIn,
        Self::SignPacketsOut,
        Self::UdataPacketsIn,
        Self::UdataPacketsOut,
        Self::UdataBytesIn,
        Self::UdataBytesOut,
        Self::PdpCtxAct,
        Self::Suspend,
        Self::PagingPs,
        Self::PagingCs,
        Self::RaUpdate,
    ];

    /// Get counter name
    pub fn name(&self) -> &'static str {
        match self {
            Self::SignPacketsIn => "sign:packets:in",
            Self::SignPacketsOut => "sign:packets:out",
            Self::UdataPacketsIn => "udata:packets:in",
            Self::UdataPacketsOut => "udata:packets:out",
            Self::UdataBytesIn => "udata:bytes:in",
            Self::UdataBytesOut => "udata:bytes:out",
            Self::PdpCtxAct => "pdp_ctx_act",
            Self::Suspend => "suspend",
            Self::PagingPs => "paging:ps",
            Self::PagingCs => "paging:cs",
            Self::RaUpdate => "ra_update",
        }
    }

    /// Get counter description
    pub fn description(&self) -> &'static str {
        match self {
            Self::SignPacketsIn => "Signalling Messages ( In)",
            Self::SignPacketsOut => "Signalling Messages (Out)",
            Self::UdataPacketsIn => "User Data  Messages ( In)",
            Self::UdataPacketsOut => "User Data  Messages (Out)",
            Self::UdataBytesIn => "User Data  Bytes    ( In)",
            Self::UdataBytesOut => "User Data  Bytes    (Out)",
            Self::PdpCtxAct => "PDP Context Activation",
            Self::Suspend => "SUSPEND Count",
            Self::PagingPs => "Paging Packet Switched",
            Self::PagingCs => "Paging Circuit Switched",
            Self::RaUpdate => "Routing Area Update",
        }
    }
}

// ============================================================================
// PDP Context Counters
// ============================================================================

/// Per-PDP-context counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PdpCtxCounter {
    UdataPacketsIn,
    UdataPacketsOut,
    UdataBytesIn,
    UdataBytesOut,
}

impl PdpCtxCounter {
    pub const ALL: [PdpCtxCounter; 4] = [
        Self::UdataPacketsIn,
        Self::UdataPacketsOut,
        Self::UdataBytesIn,
        Self::UdataBytesOut,
    ];

    /// Get counter name
    pub fn name(&self) -> &'static str {
        match self {
            Self::UdataPacketsIn => "udata:packets:in",
            Self::UdataPacketsOut => "udata:packets:out",
            Self::UdataBytesIn => "udata:bytes:in",
            Self::UdataBytesOut => "udata:bytes:out",
        }
    }

    /// Get counter description
    pub fn description(&self) -> &'static str {
        match self {
            Self::UdataPacketsIn => "User Data  Messages ( In)",
            Self::UdataPacketsOut => "User Data  Messages (Out)",
            Self::UdataBytesIn => "User Data  Bytes    ( In)",
            Self::UdataBytesOut => "User Data  Bytes    (Out)",
        }
    }
}

// ============================================================================
// Global SGSN Counters
// ============================================================================

/// Node-wide SGSN counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SgsnCounter {
    GprsAttachRequested,
    GprsAttachAccepted,
    GprsAttachRejected,
    GprsDetachRequested,
    GprsRoutingAreaRequested,
    PdpActivateRequested,
    PdpActivateRejected,
    PdpActivateAccepted,
    PdpDlDeactivateRequested,
    LlmeExpired,
}

impl SgsnCounter {
    /// Get counter name
    pub fn name(&self) -> &'static str {
        match self {
            Self::GprsAttachRequested => "gprs:attach_requested",
            Self::GprsAttachAccepted => "gprs:attach_accepted",
            Self::GprsAttachRejected => "gprs:attach_rejected",
            Self::GprsDetachRequested => "gprs:detach_requested",
            Self::GprsRoutingAreaRequested => "gprs:routing_area_requested",
            Self::PdpActivateRequested => "pdp:activate_requested",
            Self::PdpActivateRejected => "pdp:activate_rejected",
            Self::PdpActivateAccepted => "pdp:activate_accepted",
            Self::PdpDlDeactivateRequested => "pdp:dl_deactivate_requested",
            Self::LlmeExpired => "llc:llme_expired",
        }
    }

    /// Get counter description
    pub fn description(&self) -> &'static str {
        match self {
            Self::GprsAttachRequested => "Received attach requests",
            Self::GprsAttachAccepted => "Sent attach accepts",
            Self::GprsAttachRejected => "Sent attach rejects",
            Self::GprsDetachRequested => "Received detach requests",
            Self::GprsRoutingAreaRequested => "Received routing area requests",
            Self::PdpActivateRequested => "Received activate requests",
            Self::PdpActivateRejected => "Sent activate rejects",
            Self::PdpActivateAccepted => "Sent activate accepts",
            Self::PdpDlDeactivateRequested => "Sent deactivate requests",
            Self::LlmeExpired => "LLMEs expired by the inactivity sweep",
        }
    }
}

// ============================================================================
// Counter Groups
// ============================================================================

/// Class of a counter group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterGroupClass {
    MmCtx,
    PdpCtx,
}

impl CounterGroupClass {
    /// Group name prefix as exported to monitoring
    pub fn name(&self) -> &'static str {
        match self {
            Self::MmCtx => "sgsn:mmctx",
            Self::PdpCtx => "sgsn:pdpctx",
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::MmCtx => MmCtxCounter::ALL.len(),
            Self::PdpCtx => PdpCtxCounter::ALL.len(),
        }
    }
}

/// One instance of a counter group
#[derive(Debug, Clone)]
pub struct CounterGroup {
    pub class: CounterGroupClass,
    /// Caller-chosen index (TLLI, connection id or NSAPI)
    pub index: u32,
    values: Vec<u64>,
}

impl CounterGroup {
    fn new(class: CounterGroupClass, index: u32) -> Self {
        Self {
            class,
            index,
            values: vec![0; class.size()],
        }
    }

    /// Read a counter by position
    pub fn value(&self, pos: usize) -> u64 {
        self.values.get(pos).copied().unwrap_or(0)
    }
}

/// Registry of counter groups and node-wide counters
#[derive(Debug)]
pub struct CounterRegistry {
    groups: HashMap<u64, CounterGroup>,
    next_id: u64,
    max_groups: usize,
    global: HashMap<SgsnCounter, u64>,
}

impl CounterRegistry {
    /// Create a registry able to hold `max_groups` live groups
    pub fn new(max_groups: usize) -> Self {
        Self {
            groups: HashMap::new(),
            next_id: 1,
            max_groups,
            global: HashMap::new(),
        }
    }

    /// Allocate a counter group. Returns None once the registry is full.
    pub fn alloc(&mut self, class: CounterGroupClass, index: u32) -> Option<u64> {
        if self.groups.len() >= self.max_groups {
            log::error!(
                "Cannot allocate counter group {}:{} ({} groups live)",
                class.name(),
                index,
                self.groups.len()
            );
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.groups.insert(id, CounterGroup::new(class, index));
        Some(id)
    }

    /// Release a counter group
    pub fn free(&mut self, id: u64) -> bool {
        self.groups.remove(&id).is_some()
    }

    /// Look up a group
    pub fn group(&self, id: u64) -> Option<&CounterGroup> {
        self.groups.get(&id)
    }

    /// Number of live groups
    pub fn live_groups(&self) -> usize {
        self.groups.len()
    }

    fn add(&mut self, id: u64, class: CounterGroupClass, pos: usize, n: u64) {
        match self.groups.get_mut(&id) {
            Some(group) if group.class == class => group.values[pos] += n,
            _ => log::debug!("Counter group {id} gone, dropping update"),
        }
    }

    /// Add to an MM context counter
    pub fn mm_add(&mut self, id: u64, counter: MmCtxCounter, n: u64) {
        self.add(id, CounterGroupClass::MmCtx, counter as usize, n);
    }

    /// Increment an MM context counter
    pub fn mm_inc(&mut self, id: u64, counter: MmCtxCounter) {
        self.mm_add(id, counter, 1);
    }

    /// Read an MM context counter
    pub fn mm_get(&self, id: u64, counter: MmCtxCounter) -> u64 {
        self.group(id).map_or(0, |g| g.value(counter as usize))
    }

    /// Add to a PDP context counter
    pub fn pdp_add(&mut self, id: u64, counter: PdpCtxCounter, n: u64) {
        self.add(id, CounterGroupClass::PdpCtx, counter as usize, n);
    }

    /// Read a PDP context counter
    pub fn pdp_get(&self, id: u64, counter: PdpCtxCounter) -> u64 {
        self.group(id).map_or(0, |g| g.value(counter as usize))
    }

    /// Increment a node-wide counter
    pub fn inc(&mut self, counter: SgsnCounter) {
        *self.global.entry(counter).or_insert(0) += 1;
    }

    /// Read a node-wide counter
    pub fn get(&self, counter: SgsnCounter) -> u64 {
        self.global.get(&counter).copied().unwrap_or(0)
    }
}
