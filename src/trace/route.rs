//! Longest-prefix route selection.

use ipnetwork::IpNetwork;
use std::net::IpAddr;

use crate::topology::model::{Route, RouteState};

/// Most specific active route covering `dst`
///
/// Blackhole routes and routes without a parseable destination are skipped.
/// On equal prefix length the first route in table order wins.
pub fn select_route(routes: &[Route], dst: IpAddr) -> Option<&Route> {
    let mut best: Option<(&Route, u8)> = None;

    for route in routes {
        if route.state == RouteState::Blackhole || route.destination.is_empty() {
            continue;
        }
        let Ok(network) = route.destination.parse::<IpNetwork>() else {
            continue;
        };
        if !network.contains(dst) {
            continue;
        }
        let prefix = network.prefix();
        if best.is_none_or(|(_, len)| prefix > len) {
            best = Some((route, prefix));
        }
    }

    best.map(|(route, _)| route)
}
