use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cooperative stop request shared by the signal handler, the controller and
/// the stats reporter.
#[derive(Debug, Clone, Default)]
pub struct Stop(Arc<AtomicBool>);

impl Stop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop_soon(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn stop_req(&self) {
        self.0.store(true, Ordering::Relaxed)
    }
}
