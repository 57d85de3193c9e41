use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Environment prefix for overrides. Nested keys are separated by `__`,
/// e.g. `CADENZA_DISPATCHER__MAX_CONCURRENT=1`.
pub const ENV_PREFIX: &str = "CADENZA_";

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::WorkspaceMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[server]
port = 9000

[dispatcher]
max_concurrent = 1
workspace_mode = "shared"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.dispatcher.max_concurrent, 1);
        assert_eq!(config.dispatcher.workspace_mode, WorkspaceMode::Shared);
    }

    #[test]
    fn test_load_config_from_str_empty_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.dispatcher.max_concurrent, 3);
        assert_eq!(config.submission.selection_timeout_secs, 30);
        assert_eq!(config.fetcher.program, "go");
    }

    #[test]
    fn test_load_config_from_str_bad_type() {
        let toml = r#"
[dispatcher]
max_concurrent = "many"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[server]
host = "127.0.0.1"
port = 3000

[fetcher]
program = "/opt/am/downloader"
args = []
timeout_secs = 3600

[publisher]
program = "gofilepy"
args = ["--token", "secret"]
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(config.fetcher.program, "/opt/am/downloader");
        assert!(config.fetcher.args.is_empty());
        assert_eq!(config.fetcher.timeout_secs, Some(3600));
        assert_eq!(config.publisher.args.len(), 2);
    }
}
