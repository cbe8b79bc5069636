//! Namespaced on-disk cache with TTL and account scoping.
//!
//! Each namespace is one JSON file under the cache directory holding a single
//! record: `{data, cached_at, ttl_seconds, account_id}`. A record written for
//! one account is never served to another.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Default lifetime of a cached record (15 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);

/// Serialized record format
#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord<T> {
    data: T,
    cached_at: DateTime<Utc>,
    ttl_seconds: u64,
    #[serde(default)]
    account_id: Option<String>,
}

/// Record metadata without the payload
#[derive(Debug, Deserialize)]
struct CacheHeader {
    cached_at: DateTime<Utc>,
    ttl_seconds: u64,
    #[serde(default)]
    account_id: Option<String>,
}

/// Metadata about a cached record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheInfo {
    pub cached_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub age_seconds: i64,
    pub expired: bool,
    pub account_id: Option<String>,
}

fn is_expired(cached_at: DateTime<Utc>, ttl_seconds: u64, now: DateTime<Utc>) -> bool {
    let age_ms = now.signed_duration_since(cached_at).num_milliseconds();
    age_ms > 0 && age_ms as u64 > ttl_seconds.saturating_mul(1000)
}

/// Single-record cache for one namespace
#[derive(Debug, Clone)]
pub struct Cache {
    namespace: String,
    path: PathBuf,
}

impl Cache {
    /// Cache for `namespace` stored under `dir`
    pub fn new(dir: &Path, namespace: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            path: dir.join(format!("{}.json", namespace)),
        }
    }

    /// Standard cache directory: ~/.cache/vpctrace
    pub fn default_dir() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vpctrace")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the record if present, unexpired, and owned by `current_account`
    ///
    /// A record belonging to a different account is purged.
    pub fn get<T: DeserializeOwned>(&self, current_account: Option<&str>) -> Option<T> {
        self.read(false, current_account)
    }

    /// Read the record regardless of its age
    pub fn get_ignoring_expiry<T: DeserializeOwned>(&self) -> Option<T> {
        self.read(true, None)
    }

    fn read<T: DeserializeOwned>(
        &self,
        ignore_expiry: bool,
        current_account: Option<&str>,
    ) -> Option<T> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let record: CacheRecord<T> = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(e) => {
                debug!(namespace = %self.namespace, error = %e, "unreadable cache record");
                return None;
            }
        };

        if let (Some(current), Some(cached)) = (current_account, record.account_id.as_deref())
            && current != cached
        {
            debug!(
                namespace = %self.namespace,
                cached,
                current,
                "cache belongs to another account"
            );
            if let Err(e) = self.clear() {
                warn!(namespace = %self.namespace, error = %e, "failed to purge cache");
            }
            return None;
        }

        if !ignore_expiry && is_expired(record.cached_at, record.ttl_seconds, Utc::now()) {
            debug!(namespace = %self.namespace, "cache expired");
            return None;
        }

        Some(record.data)
    }

    /// Replace the record
    pub fn set<T: Serialize>(
        &self,
        data: &T,
        ttl: Duration,
        account_id: Option<&str>,
    ) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let record = CacheRecord {
            data,
            cached_at: Utc::now(),
            ttl_seconds: ttl.as_secs(),
            account_id: account_id.map(str::to_string),
        };
        fs::write(&self.path, serde_json::to_string(&record)?)?;
        Ok(())
    }

    /// Remove the record; succeeds if there is none
    pub fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Metadata of the current record, if readable
    pub fn info(&self) -> Option<CacheInfo> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let header: CacheHeader = serde_json::from_str(&raw).ok()?;
        let now = Utc::now();
        Some(CacheInfo {
            cached_at: header.cached_at,
            ttl_seconds: header.ttl_seconds,
            age_seconds: now.signed_duration_since(header.cached_at).num_seconds(),
            expired: is_expired(header.cached_at, header.ttl_seconds, now),
            account_id: header.account_id,
        })
    }
}
