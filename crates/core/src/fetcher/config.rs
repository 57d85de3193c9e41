//! Configuration for the subprocess fetcher.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How to launch the external fetch tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Program to execute.
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the mode flag and URL.
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Flag switching the tool into selected-items mode.
    #[serde(default = "default_select_flag")]
    pub select_flag: String,

    /// Flag making the tool print the track listing and exit.
    #[serde(default = "default_info_flag")]
    pub info_flag: String,

    /// Working directory of the tool itself (where its sources live).
    #[serde(default)]
    pub tool_dir: Option<PathBuf>,

    /// Environment variable carrying the output directory.
    #[serde(default = "default_workdir_env")]
    pub workdir_env: String,

    /// Upper bound on captured stderr, in bytes.
    #[serde(default = "default_max_stderr_bytes")]
    pub max_stderr_bytes: usize,

    /// Kill the tool after this many seconds. Unset means no limit.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_program() -> String {
    "go".to_string()
}

fn default_args() -> Vec<String> {
    vec!["run".to_string(), "main.go".to_string()]
}

fn default_select_flag() -> String {
    "--select".to_string()
}

fn default_info_flag() -> String {
    "--info".to_string()
}

fn default_workdir_env() -> String {
    "AM_DL_DIR".to_string()
}

fn default_max_stderr_bytes() -> usize {
    4096
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            select_flag: default_select_flag(),
            info_flag: default_info_flag(),
            tool_dir: None,
            workdir_env: default_workdir_env(),
            max_stderr_bytes: default_max_stderr_bytes(),
            timeout_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FetcherConfig::default();
        assert_eq!(config.program, "go");
        assert_eq!(config.args, vec!["run", "main.go"]);
        assert_eq!(config.workdir_env, "AM_DL_DIR");
        assert_eq!(config.max_stderr_bytes, 4096);
        assert!(config.timeout_secs.is_none());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: FetcherConfig = toml::from_str(
            r#"
            program = "/usr/local/bin/amdl"
            args = []
            tool_dir = "/opt/amdl"
            timeout_secs = 1800
            "#,
        )
        .unwrap();
        assert_eq!(config.program, "/usr/local/bin/amdl");
        assert!(config.args.is_empty());
        assert_eq!(config.tool_dir, Some(PathBuf::from("/opt/amdl")));
        assert_eq!(config.timeout_secs, Some(1800));
        assert_eq!(config.select_flag, "--select");
    }
}
