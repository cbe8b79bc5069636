use super::hop::Hop;

/// Receives hops and progress messages as a trace runs
pub trait TraceObserver: Send + Sync {
    fn on_hop(&self, _hop: &Hop) {}

    fn on_status(&self, _msg: &str) {}
}

/// Observer that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl TraceObserver for NoopObserver {}
