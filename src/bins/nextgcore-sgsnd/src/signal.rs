//! SGSN Signals
//!
//! Fire-and-forget notifications about the context graph. Observers receive
//! a copy of the relevant data and have no access to the registries, so a
//! notification can never re-enter the registry that is being mutated.

/// Notifications emitted by the core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SgsnSignal {
    /// An MM context is being freed
    MmFree { mm_id: u64, imsi: String, p_tmsi: u32 },
    /// A PDP context is being gracefully terminated
    PdpTerminate { pdp_id: u64, mm_id: Option<u64>, nsapi: u8 },
    /// A PDP context is being freed
    PdpFree { pdp_id: u64, mm_id: Option<u64>, nsapi: u8 },
}

impl SgsnSignal {
    pub fn name(&self) -> &'static str {
        match self {
            SgsnSignal::MmFree { .. } => "S_SGSN_MM_FREE",
            SgsnSignal::PdpTerminate { .. } => "S_SGSN_PDP_TERMINATE",
            SgsnSignal::PdpFree { .. } => "S_SGSN_PDP_FREE",
        }
    }
}

type Observer = Box<dyn FnMut(&SgsnSignal)>;

/// Synchronous signal dispatcher
#[derive(Default)]
pub struct SignalBus {
    observers: Vec<Observer>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer
    pub fn subscribe(&mut self, observer: impl FnMut(&SgsnSignal) + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Deliver `signal` to every observer, in registration order
    pub fn dispatch(&mut self, signal: SgsnSignal) {
        log::trace!("Signal {}", signal.name());
        for observer in self.observers.iter_mut() {
            observer(&signal);
        }
    }
}

impl std::fmt::Debug for SignalBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalBus")
            .field("observers", &self.observers.len())
            .finish()
    }
}
