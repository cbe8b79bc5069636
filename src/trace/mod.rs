pub mod engine;
pub mod hop;
pub mod observer;
pub mod route;

pub use engine::{Tracer, order_regions};
pub use hop::{Hop, HopKind, TraceResult};
pub use observer::{NoopObserver, TraceObserver};
pub use route::select_route;
