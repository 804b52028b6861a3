//! Daemon configuration.
//!
//! A TOML file overridden by a few CLI flags. The master URL is the
//! only required setting; everything else has a workable default.

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use serde::Deserialize;

use hermit_driver::Credentials;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatabaseDriver {
    EmbeddedFile,
    CoordinationTree,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub max_queue_size: usize,
    pub master_url: String,
    /// Set to resume an earlier registration after failover.
    pub framework_id: Option<String>,
    pub credentials_file: Option<PathBuf>,
    pub name: String,
    pub user: String,
    pub checkpoint: bool,
    /// Seconds the master keeps the framework registered across
    /// disconnects.
    pub failover_timeout: f64,
    pub database_driver: DatabaseDriver,
    pub database_path: String,
    pub loglevel: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_queue_size: 100,
            master_url: String::new(),
            framework_id: None,
            credentials_file: None,
            name: "Hermit".to_string(),
            user: "root".to_string(),
            checkpoint: true,
            failover_timeout: 2_592_000.0,
            database_driver: DatabaseDriver::EmbeddedFile,
            database_path: "db/hermit.db".to_string(),
            loglevel: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from a TOML file, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
        match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                toml::from_str(&content)
                    .with_context(|| format!("parsing config file {}", path.display()))
            }
            None => Ok(Config::default()),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.master_url.is_empty() {
            bail!("master_url must be configured");
        }
        if self.max_queue_size == 0 {
            bail!("max_queue_size must be at least 1");
        }
        Ok(())
    }

    /// Load and parse the credentials file, if one is configured.
    pub fn credentials(&self) -> anyhow::Result<Option<Credentials>> {
        let Some(path) = &self.credentials_file else {
            return Ok(None);
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading credentials file {}", path.display()))?;
        let mut fields = content.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(principal), Some(secret)) => Ok(Some(Credentials {
                principal: principal.to_string(),
                secret: secret.to_string(),
            })),
            _ => bail!(
                "credentials file {} must hold two whitespace-separated fields: principal secret",
                path.display()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_usable_except_master_url() {
        let config = Config::default();
        assert_eq!(config.max_queue_size, 100);
        assert_eq!(config.database_driver, DatabaseDriver::EmbeddedFile);
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_a_full_config_file() {
        let toml = r#"
            max_queue_size = 50
            master_url = "http://master:5050"
            framework_id = "fw-prev"
            name = "hermit-prod"
            user = "batch"
            checkpoint = false
            failover_timeout = 3600.0
            database_driver = "coordination-tree"
            database_path = "zk://zk1:2181/hermit"
            loglevel = "debug"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.max_queue_size, 50);
        assert_eq!(config.framework_id.as_deref(), Some("fw-prev"));
        assert_eq!(config.database_driver, DatabaseDriver::CoordinationTree);
        assert!(!config.checkpoint);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("no_such_option = 1").is_err());
    }

    #[test]
    fn credentials_parsed_from_two_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "principal-a  s3cret").unwrap();

        let config = Config {
            credentials_file: Some(path),
            ..Config::default()
        };
        let creds = config.credentials().unwrap().unwrap();
        assert_eq!(creds.principal, "principal-a");
        assert_eq!(creds.secret, "s3cret");
    }

    #[test]
    fn malformed_credentials_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials");
        std::fs::write(&path, "only-principal\n").unwrap();

        let config = Config {
            credentials_file: Some(path),
            ..Config::default()
        };
        assert!(config.credentials().is_err());
    }

    #[test]
    fn missing_credentials_file_is_none() {
        assert!(Config::default().credentials().unwrap().is_none());
    }
}
