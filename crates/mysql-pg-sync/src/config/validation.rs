//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};
use crate::store::SslMode;

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.r#type != "mysql" {
        return Err(MigrateError::Config(format!(
            "source.type must be 'mysql', got '{}'",
            config.source.r#type
        )));
    }
    if config.source.url.is_none() {
        require("source.host", &config.source.host)?;
        require("source.database", &config.source.database)?;
        require("source.user", &config.source.user)?;
    }
    SslMode::parse(&config.source.ssl_mode)?;

    // Target validation
    if config.target.r#type != "postgres" {
        return Err(MigrateError::Config(format!(
            "target.type must be 'postgres', got '{}'",
            config.target.r#type
        )));
    }
    if config.target.url.is_none() {
        require("target.host", &config.target.host)?;
        require("target.database", &config.target.database)?;
        require("target.user", &config.target.user)?;
    }
    require("target.schema", &config.target.schema)?;
    SslMode::parse(&config.target.ssl_mode)?;

    // Cannot migrate to the same database
    let same_url = matches!(
        (&config.source.url, &config.target.url),
        (Some(s), Some(t)) if s == t
    );
    let same_host = config.source.url.is_none()
        && config.target.url.is_none()
        && config.source.host == config.target.host
        && config.source.port == config.target.port
        && config.source.database == config.target.database;
    if same_url || same_host {
        return Err(MigrateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    // Migration config validation - only check if explicitly set
    if let Some(0) = config.migration.chunk_size {
        return Err(MigrateError::Config(
            "migration.chunk_size must be at least 1".into(),
        ));
    }
    if let Some(0) = config.migration.max_concurrent_chunks {
        return Err(MigrateError::Config(
            "migration.max_concurrent_chunks must be at least 1".into(),
        ));
    }
    if let Some(0) = config.migration.max_target_connections {
        return Err(MigrateError::Config(
            "migration.max_target_connections must be at least 1".into(),
        ));
    }

    // Registry invariants and filter names
    config.registry()?;

    Ok(())
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(MigrateError::Config(format!("{} is required", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MigrationConfig, SourceConfig, TargetConfig};
    use crate::registry::TableDescriptor;

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                host: "localhost".to_string(),
                database: "app".to_string(),
                user: "root".to_string(),
                password: "password".to_string(),
                ..Default::default()
            },
            target: TargetConfig {
                host: "localhost".to_string(),
                database: "app".to_string(),
                user: "postgres".to_string(),
                password: "password".to_string(),
                ..Default::default()
            },
            migration: MigrationConfig::default(),
            tables: None,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_source_host() {
        let mut config = valid_config();
        config.source.host = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_url_replaces_fields() {
        let mut config = valid_config();
        config.source.host = "".to_string();
        config.source.url = Some("mysql://root@localhost/app".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_wrong_types() {
        let mut config = valid_config();
        config.source.r#type = "mssql".to_string();
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.target.r#type = "mysql".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_same_database_rejected() {
        let mut config = valid_config();
        config.target.port = 3306;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let mut config = valid_config();
        config.migration.chunk_size = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_invalid_ssl_mode_rejected() {
        let mut config = valid_config();
        config.target.ssl_mode = "sometimes".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_include_table_rejected() {
        let mut config = valid_config();
        config.migration.include_tables = vec!["Nope".to_string()];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_registry_rejected() {
        let mut config = valid_config();
        config.tables = Some(vec![
            TableDescriptor::simple("User", 0).with_references(["Company"]),
        ]);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_source_config_debug_redacts_password() {
        let mut config = valid_config();
        config.source.password = "super_secret_password_123".to_string();
        config.source.url = Some("mysql://root:super_secret_password_123@h/app".to_string());
        let debug_output = format!("{:?}", config.source);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_123"));
    }

    #[test]
    fn test_target_config_debug_redacts_password() {
        let mut config = valid_config();
        config.target.password = "super_secret_password_456".to_string();
        let debug_output = format!("{:?}", config.target);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_password_456"));
    }
}
