use clap::Parser;
use std::net::IpAddr;
use std::path::PathBuf;

use crate::config::{CacheMode, parse_ttl};

/// Deterministic traceroute across cloud virtual networks, computed from the
/// control plane without sending packets
#[derive(Parser, Debug, Clone)]
#[command(name = "vpctrace")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Source IP address
    #[arg(required_unless_present_any = ["clear_cache", "cache_info", "set_ttl"])]
    pub src: Option<IpAddr>,

    /// Destination IP address
    #[arg(required_unless_present_any = ["clear_cache", "cache_info", "set_ttl"])]
    pub dst: Option<IpAddr>,

    /// Account inventory JSON to trace against
    #[arg(long = "inventory")]
    pub inventory: Option<PathBuf>,

    /// Regions to discover, comma separated (default: all)
    #[arg(long = "regions", value_delimiter = ',')]
    pub regions: Vec<String>,

    /// Don't read the cached topology
    #[arg(long = "no-cache")]
    pub no_cache: bool,

    /// Use the cached topology without checking for changes (fastest)
    #[arg(long = "skip-stale-check")]
    pub skip_stale_check: bool,

    /// Force a refresh of the cached topology
    #[arg(long = "refresh-cache")]
    pub refresh_cache: bool,

    /// Discovery worker pool size
    #[arg(long = "workers")]
    pub workers: Option<usize>,

    /// Max regions searched for an address missing from the topology
    #[arg(long = "fallback-regions")]
    pub fallback_regions: Option<usize>,

    /// Topology cache TTL (e.g. 15m, 1h, 2d)
    #[arg(long = "cache-ttl")]
    pub cache_ttl: Option<String>,

    /// Cache directory
    #[arg(long = "cache-dir")]
    pub cache_dir: Option<PathBuf>,

    /// Clear the topology cache and exit
    #[arg(long = "clear-cache")]
    pub clear_cache: bool,

    /// Show topology cache status and exit
    #[arg(long = "cache-info")]
    pub cache_info: bool,

    /// Save the default cache TTL and exit
    #[arg(long = "set-ttl")]
    pub set_ttl: Option<String>,

    /// Log filter (e.g. warn, debug, vpctrace=trace)
    #[arg(long = "log-level", default_value = "warn")]
    pub log_level: String,
}

impl Args {
    /// Cache handling selected by the flags
    pub fn cache_mode(&self) -> CacheMode {
        if self.refresh_cache {
            CacheMode::Refresh
        } else if self.no_cache {
            CacheMode::Bypass
        } else if self.skip_stale_check {
            CacheMode::Trust
        } else {
            CacheMode::Validate
        }
    }

    /// Check if this invocation only manages the cache or preferences
    pub fn is_maintenance(&self) -> bool {
        self.clear_cache || self.cache_info || self.set_ttl.is_some()
    }

    /// Validate arguments
    pub fn validate(&self) -> Result<(), String> {
        if !self.is_maintenance() && self.inventory.is_none() {
            return Err("--inventory is required to trace".into());
        }

        if let (Some(src), Some(dst)) = (self.src, self.dst)
            && src.is_ipv4() != dst.is_ipv4()
        {
            return Err("Source and destination must be the same address family".into());
        }

        if let Some(workers) = self.workers {
            if workers == 0 {
                return Err("Workers must be at least 1".into());
            }
            const MAX_WORKERS: usize = 64;
            if workers > MAX_WORKERS {
                return Err(format!("Workers cannot exceed {}", MAX_WORKERS));
            }
        }

        if self.fallback_regions == Some(0) {
            return Err("Fallback regions must be at least 1".into());
        }

        for ttl in [&self.cache_ttl, &self.set_ttl].into_iter().flatten() {
            parse_ttl(ttl).map_err(|e| e.to_string())?;
        }

        if self.regions.iter().any(|r| r.trim().is_empty()) {
            return Err("Region names cannot be empty".into());
        }

        Ok(())
    }
}
