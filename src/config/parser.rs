//! Document parser for loading desired-state files.
//!
//! This module handles loading documents from YAML (or JSON) files and
//! environment variables, with proper precedence and error handling.

use crate::error::{CairnError, ConfigError, Result};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use super::spec::{DeploymentConfig, StackDocument};

/// Environment variable overriding `deployment.account_id`.
pub const ENV_ACCOUNT_ID: &str = "CAIRN_ACCOUNT_ID";
/// Environment variable overriding `deployment.region`.
pub const ENV_REGION: &str = "CAIRN_REGION";
/// Environment variable overriding `deployment.max_workers`.
pub const ENV_MAX_WORKERS: &str = "CAIRN_MAX_WORKERS";
/// Environment variable overriding `deployment.max_attempts`.
pub const ENV_MAX_ATTEMPTS: &str = "CAIRN_MAX_ATTEMPTS";

/// Parser for desired-state documents.
#[derive(Debug, Default)]
pub struct DocumentParser {
    /// Base path for resolving the `.env` file.
    base_path: Option<PathBuf>,
}

impl DocumentParser {
    /// Creates a new document parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path used to find the `.env` file.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a document from a file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackDocument> {
        let path = path.as_ref();
        info!("Loading desired state from: {}", path.display());

        if !path.exists() {
            return Err(CairnError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            CairnError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a document from a YAML string. JSON is accepted as well.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StackDocument> {
        debug!("Parsing desired-state document");

        let document: StackDocument = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            CairnError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed stack '{}' with {} resource(s)",
            document.stack,
            document.resources.len()
        );
        Ok(document)
    }

    /// Loads a document and applies environment variable overrides.
    ///
    /// Recognised variables are `CAIRN_ACCOUNT_ID`, `CAIRN_REGION`,
    /// `CAIRN_MAX_WORKERS` and `CAIRN_MAX_ATTEMPTS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or an override is malformed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StackDocument> {
        let mut document = self.load_file(path)?;
        Self::apply_env_overrides(&mut document.deployment, |name| std::env::var(name).ok())?;
        Ok(document)
    }

    /// Applies overrides looked up through `lookup` to the deployment settings.
    fn apply_env_overrides(
        config: &mut DeploymentConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(account) = lookup(ENV_ACCOUNT_ID) {
            debug!("Overriding deployment.account_id from environment");
            config.account_id = Some(account);
        }

        if let Some(region) = lookup(ENV_REGION) {
            debug!("Overriding deployment.region from environment");
            config.region = Some(region);
        }

        if let Some(raw) = lookup(ENV_MAX_WORKERS) {
            debug!("Overriding deployment.max_workers from environment");
            config.max_workers = parse_override(ENV_MAX_WORKERS, &raw)?;
        }

        if let Some(raw) = lookup(ENV_MAX_ATTEMPTS) {
            debug!("Overriding deployment.max_attempts from environment");
            config.max_attempts = parse_override(ENV_MAX_ATTEMPTS, &raw)?;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                CairnError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }
}

fn parse_override<T: FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        CairnError::Config(ConfigError::InvalidOverride {
            name: name.to_string(),
            value: raw.to_string(),
        })
    })
}
