use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::dispatcher::DispatcherConfig;
use crate::fetcher::FetcherConfig;
use crate::packager::PackagerConfig;
use crate::publisher::PublisherConfig;
use crate::submission::SubmissionConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub packager: PackagerConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub submission: SubmissionConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Seconds between sweeps of expired track selections.
    #[serde(default = "default_purge_interval")]
    pub selection_purge_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            selection_purge_interval_secs: default_purge_interval(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

fn default_purge_interval() -> u64 {
    10
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("cadenza.db")
}

/// Sanitized config for API responses (tool arguments hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
    pub fetcher: SanitizedToolConfig,
    pub packager: PackagerConfig,
    pub publisher: SanitizedToolConfig,
    pub submission: SubmissionConfig,
}

/// External tool settings without its arguments, which may carry tokens.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedToolConfig {
    pub program: String,
    pub args_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            dispatcher: config.dispatcher.clone(),
            fetcher: SanitizedToolConfig {
                program: config.fetcher.program.clone(),
                args_count: config.fetcher.args.len(),
                timeout_secs: config.fetcher.timeout_secs,
            },
            packager: config.packager.clone(),
            publisher: SanitizedToolConfig {
                program: config.publisher.program.clone(),
                args_count: config.publisher.args.len(),
                timeout_secs: config.publisher.timeout_secs,
            },
            submission: config.submission.clone(),
        }
    }
}
