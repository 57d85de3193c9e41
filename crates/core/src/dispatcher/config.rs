//! Dispatcher configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::locator::{default_media_extensions, LocatorPolicy};

/// How working directories are laid out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceMode {
    /// Each request gets `request-<id>` under the work root.
    #[default]
    PerRequest,
    /// Every request uses the work root itself. Requires a ceiling of 1.
    Shared,
}

impl WorkspaceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceMode::PerRequest => "per_request",
            WorkspaceMode::Shared => "shared",
        }
    }
}

/// Configuration for the request dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Maximum number of pipelines running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    #[serde(default)]
    pub workspace_mode: WorkspaceMode,

    /// Root under which fetches write.
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    /// How the artifact folder is picked after a fetch.
    #[serde(default)]
    pub locator: LocatorPolicy,

    /// File extensions the flat locator treats as media.
    #[serde(default = "default_media_extensions")]
    pub media_extensions: Vec<String>,

    /// Fail requests left in `processing` by a previous run on start.
    #[serde(default = "default_true")]
    pub recover_on_start: bool,

    /// Capacity of the wake-up channel. Extra signals are coalesced.
    #[serde(default = "default_signal_buffer")]
    pub signal_buffer: usize,

    /// Seconds between scheduling passes when nothing wakes the dispatcher.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_max_concurrent() -> usize {
    3
}

fn default_work_root() -> PathBuf {
    std::env::temp_dir().join("cadenza-work")
}

fn default_true() -> bool {
    true
}

fn default_signal_buffer() -> usize {
    64
}

fn default_poll_interval() -> u64 {
    30
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            workspace_mode: WorkspaceMode::default(),
            work_root: default_work_root(),
            locator: LocatorPolicy::default(),
            media_extensions: default_media_extensions(),
            recover_on_start: true,
            signal_buffer: default_signal_buffer(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl DispatcherConfig {
    /// Check the settings that make the dispatcher unsafe to run.
    pub fn check(&self) -> Result<(), String> {
        if self.max_concurrent == 0 {
            return Err("max_concurrent must be at least 1".to_string());
        }
        if self.workspace_mode == WorkspaceMode::Shared && self.max_concurrent > 1 {
            return Err(format!(
                "shared workspace mode requires max_concurrent = 1 (got {})",
                self.max_concurrent
            ));
        }
        if self.workspace_mode == WorkspaceMode::Shared && self.locator != LocatorPolicy::Flat {
            return Err(format!(
                "shared workspace mode requires locator = \"flat\" (got \"{}\")",
                self.locator.as_str()
            ));
        }
        if self.signal_buffer == 0 {
            return Err("signal_buffer must be at least 1".to_string());
        }
        if self.poll_interval_secs == 0 {
            return Err("poll_interval_secs must be at least 1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DispatcherConfig::default();
        assert_eq!(config.max_concurrent, 3);
        assert_eq!(config.workspace_mode, WorkspaceMode::PerRequest);
        assert_eq!(config.locator, LocatorPolicy::Flat);
        assert!(config.recover_on_start);
        assert!(config.media_extensions.contains(&"m4a".to_string()));
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_deserialize_full() {
        let toml = r#"
            max_concurrent = 1
            workspace_mode = "per_request"
            work_root = "/var/lib/cadenza/work"
            locator = "freshness"
            recover_on_start = false
        "#;
        let config: DispatcherConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.workspace_mode, WorkspaceMode::PerRequest);
        assert_eq!(config.work_root, PathBuf::from("/var/lib/cadenza/work"));
        assert_eq!(config.locator, LocatorPolicy::Freshness);
        assert!(!config.recover_on_start);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_shared_mode_needs_single_slot() {
        let config = DispatcherConfig {
            workspace_mode: WorkspaceMode::Shared,
            max_concurrent: 2,
            ..Default::default()
        };
        assert!(config.check().unwrap_err().contains("shared"));
    }

    #[test]
    fn test_shared_mode_needs_flat_locator() {
        let config = DispatcherConfig {
            workspace_mode: WorkspaceMode::Shared,
            max_concurrent: 1,
            locator: LocatorPolicy::Freshness,
            ..Default::default()
        };
        let err = config.check().unwrap_err();
        assert!(err.contains("flat"), "{}", err);
        assert!(err.contains("freshness"), "{}", err);

        let flat = DispatcherConfig {
            locator: LocatorPolicy::Flat,
            ..config
        };
        assert!(flat.check().is_ok());
    }

    #[test]
    fn test_zero_ceiling_rejected() {
        let config = DispatcherConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert!(config.check().is_err());
    }
}
