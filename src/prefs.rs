//! User preferences persistence.
//!
//! Saves user preferences (like the default cache TTL) to
//! ~/.config/vpctrace/config.toml

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// User preferences
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prefs {
    /// Default topology cache TTL (`15m`, `1h`, `2d`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<String>,
    /// Discovery worker pool size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,
    /// Regions searched first for addresses missing from the snapshot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_regions: Option<Vec<String>>,
}

impl Prefs {
    /// Get config file path: ~/.config/vpctrace/config.toml
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("vpctrace").join("config.toml"))
    }

    /// Load preferences from disk (returns default if missing/invalid)
    pub fn load() -> Self {
        Self::path().map(|p| Self::load_from(&p)).unwrap_or_default()
    }

    pub fn load_from(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or_default()
    }

    /// Save preferences to disk
    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(path) = Self::path() {
            self.save_to(&path)?;
        }
        Ok(())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefs_default() {
        let prefs = Prefs::default();
        assert!(prefs.cache_ttl.is_none());
        assert!(prefs.workers.is_none());
        assert!(prefs.preferred_regions.is_none());
    }

    #[test]
    fn test_prefs_serialization() {
        let prefs = Prefs {
            cache_ttl: Some("1h".to_string()),
            workers: Some(8),
            preferred_regions: Some(vec!["us-east-1".to_string(), "eu-west-1".to_string()]),
        };
        let toml_str = toml::to_string_pretty(&prefs).unwrap();
        assert!(toml_str.contains("cache_ttl = \"1h\""));
        assert!(toml_str.contains("workers = 8"));

        let loaded: Prefs = toml::from_str(&toml_str).unwrap();
        assert_eq!(loaded, prefs);
    }

    #[test]
    fn test_prefs_unset_fields_omitted() {
        let prefs = Prefs {
            cache_ttl: Some("30m".to_string()),
            ..Default::default()
        };
        let toml_str = toml::to_string_pretty(&prefs).unwrap();
        assert!(!toml_str.contains("workers"));
        assert!(!toml_str.contains("preferred_regions"));
    }

    #[test]
    fn test_prefs_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let prefs = Prefs {
            workers: Some(4),
            ..Default::default()
        };
        prefs.save_to(&path).unwrap();
        assert_eq!(Prefs::load_from(&path), prefs);
    }

    #[test]
    fn test_prefs_invalid_file_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "workers = \"many\"").unwrap();
        assert_eq!(Prefs::load_from(&path), Prefs::default());
        assert_eq!(Prefs::load_from(&dir.path().join("missing.toml")), Prefs::default());
    }
}
