use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::cache::{Cache, DEFAULT_TTL};
use crate::cli::Args;
use crate::prefs::Prefs;
use crate::topology::markers::DEFAULT_MARKER_REGION_LIMIT;

/// Default size of the discovery worker pool
pub const DEFAULT_WORKERS: usize = 20;

/// Regions searched first when an address is missing from the snapshot
pub const DEFAULT_PREFERRED_REGIONS: [&str; 4] =
    ["eu-west-1", "eu-west-2", "us-east-1", "us-west-2"];

/// How the tracer treats a cached topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Use the cache after a staleness check
    #[default]
    Validate,
    /// Use the cache without a staleness check
    Trust,
    /// Clear the cache and rediscover
    Refresh,
    /// Ignore the cache for reading; discovery still writes it
    Bypass,
}

/// Runtime configuration derived from CLI args and saved preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Discovery worker pool size
    pub workers: usize,
    /// Lifetime of a cached topology
    #[serde(with = "duration_serde")]
    pub cache_ttl: Duration,
    /// Cache directory override
    pub cache_dir: Option<PathBuf>,
    pub cache_mode: CacheMode,
    /// Regions to discover (None = all enabled regions)
    pub regions: Option<Vec<String>>,
    /// Regions sampled for staleness markers
    pub marker_region_limit: usize,
    /// Search order for addresses missing from the snapshot
    pub preferred_regions: Vec<String>,
    /// Max regions searched per missing address (None = all)
    pub fallback_region_limit: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            cache_ttl: DEFAULT_TTL,
            cache_dir: None,
            cache_mode: CacheMode::Validate,
            regions: None,
            marker_region_limit: DEFAULT_MARKER_REGION_LIMIT,
            preferred_regions: DEFAULT_PREFERRED_REGIONS
                .iter()
                .map(|r| r.to_string())
                .collect(),
            fallback_region_limit: None,
        }
    }
}

impl Config {
    /// Build from CLI args; args win over saved preferences
    pub fn from_args(args: &Args, prefs: &Prefs) -> Self {
        let defaults = Self::default();

        let cache_ttl = args
            .cache_ttl
            .as_deref()
            .or(prefs.cache_ttl.as_deref())
            .and_then(|s| match parse_ttl(s) {
                Ok(ttl) => Some(ttl),
                Err(e) => {
                    warn!(ttl = s, error = %e, "ignoring invalid cache TTL");
                    None
                }
            })
            .unwrap_or(defaults.cache_ttl);

        Self {
            workers: args.workers.or(prefs.workers).unwrap_or(defaults.workers),
            cache_ttl,
            cache_dir: args.cache_dir.clone(),
            cache_mode: args.cache_mode(),
            regions: (!args.regions.is_empty()).then(|| args.regions.clone()),
            marker_region_limit: defaults.marker_region_limit,
            preferred_regions: prefs
                .preferred_regions
                .clone()
                .unwrap_or(defaults.preferred_regions),
            fallback_region_limit: args.fallback_regions,
        }
    }

    /// Effective cache directory
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(Cache::default_dir)
    }
}

/// Parse a TTL like `15m`, `1h`, `2d`; a bare number is minutes
pub fn parse_ttl(value: &str) -> Result<Duration> {
    let value = value.trim().to_lowercase();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (num, unit) = value.split_at(split);

    let Ok(num) = num.parse::<u64>() else {
        bail!("Invalid TTL format: {}. Use number with optional m/h/d suffix", value);
    };
    let multiplier = match unit {
        "" | "m" => 60,
        "h" => 60 * 60,
        "d" => 24 * 60 * 60,
        _ => bail!("Invalid TTL format: {}. Use number with optional m/h/d suffix", value),
    };
    Ok(Duration::from_secs(num.saturating_mul(multiplier)))
}

/// Serde helper for Duration
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
