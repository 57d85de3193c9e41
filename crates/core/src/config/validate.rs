use regex_lite::Regex;

use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Dispatcher settings are runnable (ceiling, shared workspace and locator)
/// - Fetch and publish programs are set
/// - Stderr bound is non-zero
/// - The publish link pattern compiles and has a capture group
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }
    if config.server.selection_purge_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "server.selection_purge_interval_secs cannot be 0".to_string(),
        ));
    }

    // Dispatcher validation
    config
        .dispatcher
        .check()
        .map_err(|e| ConfigError::ValidationError(format!("dispatcher: {}", e)))?;

    // External tools
    if config.fetcher.program.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "fetcher.program cannot be empty".to_string(),
        ));
    }
    if config.fetcher.max_stderr_bytes == 0 {
        return Err(ConfigError::ValidationError(
            "fetcher.max_stderr_bytes cannot be 0".to_string(),
        ));
    }
    if config.publisher.program.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "publisher.program cannot be empty".to_string(),
        ));
    }
    let pattern = Regex::new(&config.publisher.link_pattern).map_err(|e| {
        ConfigError::ValidationError(format!("publisher.link_pattern is invalid: {}", e))
    })?;
    if pattern.captures_len() < 2 {
        return Err(ConfigError::ValidationError(
            "publisher.link_pattern needs a capture group for the link".to_string(),
        ));
    }

    // Submission
    if config.submission.url_prefix.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "submission.url_prefix cannot be empty".to_string(),
        ));
    }
    if config.submission.selection_timeout_secs == 0 {
        return Err(ConfigError::ValidationError(
            "submission.selection_timeout_secs cannot be 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::WorkspaceMode;
    use crate::locator::LocatorPolicy;

    fn assert_invalid(config: &Config, needle: &str) {
        match validate_config(config) {
            Err(ConfigError::ValidationError(msg)) => {
                assert!(msg.contains(needle), "{} does not mention {}", msg, needle)
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let mut config = Config::default();
        config.server.port = 0;
        assert_invalid(&config, "server.port");
    }

    #[test]
    fn test_validate_zero_ceiling_fails() {
        let mut config = Config::default();
        config.dispatcher.max_concurrent = 0;
        assert_invalid(&config, "max_concurrent");
    }

    #[test]
    fn test_validate_shared_workspace_needs_ceiling_one() {
        let mut config = Config::default();
        config.dispatcher.workspace_mode = WorkspaceMode::Shared;
        assert_invalid(&config, "shared");

        config.dispatcher.max_concurrent = 1;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_shared_workspace_rejects_freshness_locator() {
        let mut config = Config::default();
        config.dispatcher.workspace_mode = WorkspaceMode::Shared;
        config.dispatcher.max_concurrent = 1;
        config.dispatcher.locator = LocatorPolicy::Freshness;
        assert_invalid(&config, "locator");
    }

    #[test]
    fn test_validate_empty_programs_fail() {
        let mut config = Config::default();
        config.fetcher.program = " ".to_string();
        assert_invalid(&config, "fetcher.program");

        let mut config = Config::default();
        config.publisher.program = String::new();
        assert_invalid(&config, "publisher.program");
    }

    #[test]
    fn test_validate_stderr_bound() {
        let mut config = Config::default();
        config.fetcher.max_stderr_bytes = 0;
        assert_invalid(&config, "max_stderr_bytes");
    }

    #[test]
    fn test_validate_link_pattern() {
        let mut config = Config::default();
        config.publisher.link_pattern = "(unclosed".to_string();
        assert_invalid(&config, "link_pattern");

        config.publisher.link_pattern = r"https://\S+".to_string();
        assert_invalid(&config, "capture group");
    }
}
