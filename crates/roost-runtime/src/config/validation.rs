//! Configuration validation.

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    BotConfig, LogOutput, LoggingConfig, RoostConfig, StorageBackend, StorageConfig,
    TimeoutConfig,
};

/// Validates the entire configuration.
pub fn validate_config(config: &RoostConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;
    validate_bot(&config.bot)?;
    validate_timeouts(&config.timeouts)?;
    validate_storage(&config.storage)?;
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    for target in logging.filters.keys() {
        if target.is_empty() || target.contains(char::is_whitespace) {
            return Err(ConfigError::validation(format!(
                "Invalid log filter target: '{target}'"
            )));
        }
    }
    Ok(())
}

fn validate_bot(bot: &BotConfig) -> ConfigResult<()> {
    if bot.command_prefix.is_empty() {
        return Err(ConfigError::validation("Command prefix cannot be empty"));
    }
    if bot.command_prefix.contains(char::is_whitespace) {
        return Err(ConfigError::validation(
            "Command prefix cannot contain whitespace",
        ));
    }
    if let Some(admin) = bot.admins.iter().find(|a| a.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid admin user id: '{admin}'"
        )));
    }
    Ok(())
}

fn validate_timeouts(timeouts: &TimeoutConfig) -> ConfigResult<()> {
    let budgets = [
        ("timeouts.event_secs", timeouts.event_secs),
        ("timeouts.broadcast_secs", timeouts.broadcast_secs),
        ("timeouts.leave_secs", timeouts.leave_secs),
        ("timeouts.task_join_secs", timeouts.task_join_secs),
        ("timeouts.room_visible_secs", timeouts.room_visible_secs),
        ("timeouts.setup_secs", timeouts.setup_secs),
    ];
    for (name, secs) in budgets {
        if secs == 0 {
            return Err(ConfigError::validation(format!(
                "{name} must be greater than 0"
            )));
        }
    }
    Ok(())
}

fn validate_storage(storage: &StorageConfig) -> ConfigResult<()> {
    match storage.backend {
        StorageBackend::Memory => Ok(()),
        StorageBackend::Sqlite => match storage.path.as_deref() {
            Some(path) if !path.is_empty() => Ok(()),
            _ => Err(ConfigError::missing_field("storage.path")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        assert!(validate_config(&RoostConfig::default()).is_ok());
    }

    #[test]
    fn test_validate_empty_prefix() {
        let mut config = RoostConfig::default();
        config.bot.command_prefix = String::new();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_zero_timeout() {
        let mut config = RoostConfig::default();
        config.timeouts.leave_secs = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("timeouts.leave_secs"));
    }

    #[test]
    fn test_validate_sqlite_needs_path() {
        let mut config = RoostConfig::default();
        config.storage.backend = StorageBackend::Sqlite;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.storage.path = Some("roost.db".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = RoostConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());
    }
}
