pub mod discovery;
pub mod markers;
pub mod model;

pub use discovery::{TOPOLOGY_NAMESPACE, TopologyDiscovery};
pub use markers::{ChangeMarkers, StaleCheck, StalenessChecker};
pub use model::{AddressIndex, InterfaceRecord, NetworkTopology, Route, RouteState, RouteTable};
