//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root directory holding record collections and rendered artifacts.
    pub storage_root: PathBuf,

    /// Edit log settings.
    #[serde(default)]
    pub edit_log: EditLogConfig,

    /// Render queue and transcoder settings.
    #[serde(default)]
    pub render: RenderConfig,

    /// Export retention policy applied after each export.
    #[serde(default)]
    pub retention: RetentionPolicy,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Edit log tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EditLogConfig {
    /// How many times an append retries after losing a version race.
    pub max_append_retries: u32,
}

/// Render pool and transcoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Concurrent proxy renders.
    pub proxy_workers: usize,

    /// Concurrent export renders.
    pub export_workers: usize,

    /// External transcoding program.
    pub transcoder_program: PathBuf,

    /// Quality profile for low-resolution previews.
    pub proxy_profile: QualityProfile,

    /// Quality profile for full-resolution exports.
    pub export_profile: QualityProfile,

    /// Seconds a claim on a job or render target survives without renewal
    /// before another process may take it over.
    pub claim_lease_secs: u64,
}

/// Output quality passed through to the transcoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityProfile {
    /// Profile name (e.g., "proxy", "export").
    pub name: String,

    /// Output width in pixels (0 = source width).
    pub width: u32,

    /// Output height in pixels (0 = source height).
    pub height: u32,
}

/// Retention policy for rendered exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Exports older than this become GC candidates.
    pub ttl_days: u32,

    /// Newest exports per project that are always kept.
    pub keep_latest_n: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "cutlog=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            edit_log: EditLogConfig::default(),
            render: RenderConfig::default(),
            retention: RetentionPolicy::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EditLogConfig {
    fn default() -> Self {
        Self {
            max_append_retries: 5,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            proxy_workers: 2,
            export_workers: 1,
            transcoder_program: PathBuf::from("cutlog-transcode"),
            proxy_profile: QualityProfile::proxy(),
            export_profile: QualityProfile::export(),
            claim_lease_secs: 30,
        }
    }
}

impl QualityProfile {
    /// Low-resolution preview profile.
    pub fn proxy() -> Self {
        Self {
            name: "proxy".to_string(),
            width: 640,
            height: 360,
        }
    }

    /// Full-resolution profile; dimensions follow the source.
    pub fn export() -> Self {
        Self {
            name: "export".to_string(),
            width: 0,
            height: 0,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            ttl_days: 30,
            keep_latest_n: 3,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self, crate::CutlogError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the render pool cannot run with.
    pub fn validate(&self) -> Result<(), crate::CutlogError> {
        if self.render.proxy_workers == 0 || self.render.export_workers == 0 {
            return Err(crate::CutlogError::config(
                "render.proxy_workers and render.export_workers must be at least 1",
            ));
        }
        if self.render.claim_lease_secs == 0 {
            return Err(crate::CutlogError::config(
                "render.claim_lease_secs must be at least 1",
            ));
        }
        if self.edit_log.max_append_retries == 0 {
            return Err(crate::CutlogError::config(
                "edit_log.max_append_retries must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("cutlog").join("config.json")
}

/// Default storage root.
fn default_storage_root() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("cutlog")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.render.proxy_workers, 2);
        assert_eq!(config.retention.ttl_days, 30);
        assert_eq!(config.edit_log.max_append_retries, 5);
    }

    #[test]
    fn test_partial_config_fills_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"storage_root": "/srv/cutlog", "retention": {"ttl_days": 7}}"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.storage_root, PathBuf::from("/srv/cutlog"));
        assert_eq!(config.retention.ttl_days, 7);
        assert_eq!(config.retention.keep_latest_n, 3);
        assert_eq!(config.render.proxy_profile, QualityProfile::proxy());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = AppConfig::default();
        config.render.export_workers = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.render.claim_lease_secs = 0;
        assert!(config.validate().is_err());
    }
}
