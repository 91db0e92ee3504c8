//! Manifest parser.
//!
//! This module handles loading the manifest from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, MetaKubeError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::Manifest;

/// Environment variable holding the API bearer token.
pub const ENV_API_TOKEN: &str = "METAKUBE_API_TOKEN";
/// Environment variable overriding `api.url`.
pub const ENV_API_URL: &str = "METAKUBE_API_URL";
/// Environment variable overriding `cluster.provider.username`.
pub const ENV_PROVIDER_USERNAME: &str = "METAKUBE_PROVIDER_USERNAME";
/// Environment variable overriding `cluster.provider.password`.
pub const ENV_PROVIDER_PASSWORD: &str = "METAKUBE_PROVIDER_PASSWORD";

/// Parser for loading the cluster manifest.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new manifest parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path used to find `.env`.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads the manifest from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let path = path.as_ref();
        info!("Loading manifest from: {}", path.display());

        if !path.exists() {
            return Err(MetaKubeError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            MetaKubeError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses the manifest from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Manifest> {
        debug!("Parsing YAML manifest");

        let manifest: Manifest = serde_yaml::from_str(content).map_err(|e| {
            MetaKubeError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })?;

        debug!("Parsed manifest for cluster: {}", manifest.cluster.name);
        Ok(manifest)
    }

    /// Loads the manifest and applies environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<Manifest> {
        let mut manifest = self.load_file(path)?;
        apply_env_overrides(&mut manifest, |name| std::env::var(name).ok());
        Ok(manifest)
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
                MetaKubeError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the API bearer token from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set or empty.
    pub fn api_token() -> Result<String> {
        std::env::var(ENV_API_TOKEN)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| {
                MetaKubeError::Config(ConfigError::MissingEnvVar {
                    name: String::from(ENV_API_TOKEN),
                })
            })
    }
}

/// Applies environment overrides using `lookup` to read variables.
pub fn apply_env_overrides(manifest: &mut Manifest, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(url) = lookup(ENV_API_URL) {
        debug!("Overriding api.url from environment");
        manifest.api.url = url;
    }

    if let Some(username) = lookup(ENV_PROVIDER_USERNAME) {
        debug!("Overriding cluster.provider.username from environment");
        manifest.cluster.provider.username = username;
    }

    if let Some(password) = lookup(ENV_PROVIDER_PASSWORD) {
        debug!("Overriding cluster.provider.password from environment");
        manifest.cluster.provider.password = password;
    }
}

/// Default manifest file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &[
    "metakube.cluster.yaml",
    "metakube.cluster.yml",
    "cluster.yaml",
    "cluster.yml",
];

/// Finds the manifest in the given directory or any parent directory.
///
/// # Errors
///
/// Returns an error if no manifest is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found manifest: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(MetaKubeError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}
