use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// What a hop on the path represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HopKind {
    Interface,
    RouteTable,
    BackboneSegment,
    InspectionGroup,
    Firewall,
    TransitRouter,
    Destination,
}

impl HopKind {
    pub fn label(&self) -> &'static str {
        match self {
            HopKind::Interface => "interface",
            HopKind::RouteTable => "route-table",
            HopKind::BackboneSegment => "backbone-segment",
            HopKind::InspectionGroup => "inspection-group",
            HopKind::Firewall => "firewall",
            HopKind::TransitRouter => "transit-router",
            HopKind::Destination => "destination",
        }
    }
}

impl fmt::Display for HopKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

/// One step on a traced path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hop {
    /// Position on the path, starting at 1
    pub seq: u32,
    pub kind: HopKind,
    pub id: String,
    pub name: String,
    pub region: String,
    /// Kind-specific attributes
    #[serde(default)]
    pub detail: BTreeMap<String, String>,
}

impl fmt::Display for Hop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}. [{}] {} ({}) @ {}",
            self.seq, self.kind, self.id, self.name, self.region
        )
    }
}

/// Outcome of one trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceResult {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub reachable: bool,
    pub hops: Vec<Hop>,
    /// Hop where the path stopped, if blocked after the first hop
    pub blocked_at: Option<Hop>,
    pub blocked_reason: String,
}

impl TraceResult {
    pub fn new(src_ip: IpAddr, dst_ip: IpAddr) -> Self {
        Self {
            src_ip,
            dst_ip,
            reachable: false,
            hops: Vec::new(),
            blocked_at: None,
            blocked_reason: String::new(),
        }
    }

    /// Plain text listing: one line per hop, then the verdict
    pub fn summary(&self) -> String {
        let mut out = format!("Trace {} -> {}\n", self.src_ip, self.dst_ip);
        for hop in &self.hops {
            out.push_str(&format!("  {}\n", hop));
        }
        if self.reachable {
            out.push_str("Result: reachable\n");
        } else {
            out.push_str(&format!("Result: blocked: {}\n", self.blocked_reason));
            if let Some(hop) = &self.blocked_at {
                out.push_str(&format!("Blocked at: {}\n", hop));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(seq: u32, kind: HopKind) -> Hop {
        Hop {
            seq,
            kind,
            id: "rtb-1".to_string(),
            name: "private".to_string(),
            region: "eu-west-1".to_string(),
            detail: BTreeMap::new(),
        }
    }

    #[test]
    fn test_hop_display() {
        assert_eq!(
            hop(2, HopKind::RouteTable).to_string(),
            "2. [route-table] rtb-1 (private) @ eu-west-1"
        );
    }

    #[test]
    fn test_kind_serializes_kebab_case() {
        let json = serde_json::to_string(&HopKind::BackboneSegment).unwrap();
        assert_eq!(json, "\"backbone-segment\"");
        for kind in [HopKind::InspectionGroup, HopKind::TransitRouter, HopKind::Firewall] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json.trim_matches('"'), kind.label());
        }
    }

    #[test]
    fn test_summary_blocked() {
        let mut result = TraceResult::new("10.0.1.5".parse().unwrap(), "10.9.0.1".parse().unwrap());
        result.hops.push(hop(1, HopKind::Interface));
        result.hops.push(hop(2, HopKind::RouteTable));
        result.blocked_at = Some(hop(2, HopKind::RouteTable));
        result.blocked_reason = "No route to 10.9.0.1 in route table rtb-1".to_string();

        let summary = result.summary();
        assert!(summary.starts_with("Trace 10.0.1.5 -> 10.9.0.1\n"));
        assert!(summary.contains("Result: blocked: No route to 10.9.0.1"));
        assert!(summary.contains("Blocked at: 2. [route-table]"));
    }

    #[test]
    fn test_summary_reachable() {
        let mut result = TraceResult::new("10.0.1.5".parse().unwrap(), "10.0.1.9".parse().unwrap());
        result.reachable = true;
        result.hops.push(hop(1, HopKind::Interface));
        assert!(result.summary().ends_with("Result: reachable\n"));
    }
}
