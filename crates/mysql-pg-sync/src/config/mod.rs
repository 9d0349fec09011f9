//! Configuration loading and validation.
//!
//! A configuration comes from a YAML file ([`Config::load`]) or from the
//! environment alone ([`Config::from_env`]). File configs can still take
//! their connection URLs from the environment via
//! [`Config::with_env_overrides`].

mod types;
mod validation;

pub use types::*;

use std::path::Path;

use crate::error::{MigrateError, Result};
use crate::registry::TableRegistry;

/// Environment variable holding the MySQL source URL.
pub const SOURCE_URL_ENV: &str = "MYSQL_DATABASE_URL";
/// Environment variable holding the PostgreSQL target URL.
pub const TARGET_URL_ENV: &str = "POSTGRES_DATABASE_URL";

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from `MYSQL_DATABASE_URL` and
    /// `POSTGRES_DATABASE_URL`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from URLs returned by `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source_url = lookup(SOURCE_URL_ENV).filter(|v| !v.is_empty()).ok_or_else(|| {
            MigrateError::Config(format!("{} is not set and no --config was given", SOURCE_URL_ENV))
        })?;
        let target_url = lookup(TARGET_URL_ENV).filter(|v| !v.is_empty()).ok_or_else(|| {
            MigrateError::Config(format!("{} is not set and no --config was given", TARGET_URL_ENV))
        })?;

        let config = Config {
            source: SourceConfig {
                url: Some(source_url),
                ..Default::default()
            },
            target: TargetConfig {
                url: Some(target_url),
                ..Default::default()
            },
            migration: MigrationConfig::default(),
            tables: None,
        };
        config.validate()?;
        Ok(config)
    }

    /// Replace connection URLs with the environment's, when set.
    pub fn with_env_overrides(self) -> Self {
        self.with_lookup_overrides(|name| std::env::var(name).ok())
    }

    /// Replace connection URLs with values returned by `lookup`.
    pub fn with_lookup_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(SOURCE_URL_ENV).filter(|v| !v.is_empty()) {
            self.source.url = Some(url);
        }
        if let Some(url) = lookup(TARGET_URL_ENV).filter(|v| !v.is_empty()) {
            self.target.url = Some(url);
        }
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// The table registry this configuration migrates: the configured
    /// `tables` (or the built-in registry) narrowed by the include and
    /// exclude lists.
    pub fn registry(&self) -> Result<TableRegistry> {
        let base = match &self.tables {
            Some(tables) => TableRegistry::new(tables.clone())?,
            None => TableRegistry::builtin(),
        };
        base.filter(&self.migration.include_tables, &self.migration.exclude_tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const YAML: &str = r#"
source:
  host: mysql.internal
  database: app
  user: reader
  password: secret
target:
  host: pg.internal
  database: app
  user: writer
  password: secret
migration:
  chunk_size: 50
  include_tables: [Company, User]
"#;

    #[test]
    fn test_from_yaml_with_defaults() {
        let config = Config::from_yaml(YAML).unwrap();
        assert_eq!(config.source.port, 3306);
        assert_eq!(config.source.ssl_mode, "preferred");
        assert_eq!(config.target.port, 5432);
        assert_eq!(config.target.schema, "public");
        assert_eq!(config.migration.get_chunk_size(), 50);
        assert!(config.migration.sync_sequences);

        let registry = config.registry().unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_custom_registry() {
        let yaml = format!(
            "{}tables:\n  - name: Company\n    dependency_rank: 0\n  - name: User\n    dependency_rank: 1\n    references: [Company]\n",
            YAML
        );
        let config = Config::from_yaml(&yaml).unwrap();
        let names: Vec<String> = config
            .registry()
            .unwrap()
            .tables()
            .iter()
            .map(|t| t.name.clone())
            .collect();
        assert_eq!(names, vec!["Company", "User"]);
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            (SOURCE_URL_ENV, "mysql://root:pw@localhost:3306/app"),
            (TARGET_URL_ENV, "postgres://postgres:pw@localhost:5432/app"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(
            config.source.url.as_deref(),
            Some("mysql://root:pw@localhost:3306/app")
        );
        assert!(config.tables.is_none());
    }

    #[test]
    fn test_from_lookup_missing_is_config_error() {
        let err = Config::from_lookup(|_| None).unwrap_err();
        assert!(matches!(err, MigrateError::Config(ref m) if m.contains(SOURCE_URL_ENV)));
    }

    #[test]
    fn test_lookup_overrides_replace_urls() {
        let config = Config::from_yaml(YAML)
            .unwrap()
            .with_lookup_overrides(|k| (k == TARGET_URL_ENV).then(|| "postgres://x@y/z".to_string()));
        assert_eq!(config.target.url.as_deref(), Some("postgres://x@y/z"));
        assert!(config.source.url.is_none());
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.source.host, "mysql.internal");
        assert_eq!(config.migration.include_tables, vec!["Company", "User"]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Config::load("/nonexistent/config.yaml").unwrap_err();
        assert!(matches!(err, MigrateError::Io(_)));
    }
}
