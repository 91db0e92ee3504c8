//! Manifest handling for the provisioner.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `metakube.cluster.yaml`
//! - Environment overrides and `.env` loading
//! - Static validation of the desired cluster

mod parser;
mod spec;
mod validator;

pub use parser::{
    apply_env_overrides, find_config_file, ConfigParser, DEFAULT_CONFIG_FILES, ENV_API_TOKEN,
    ENV_API_URL, ENV_PROVIDER_PASSWORD, ENV_PROVIDER_USERNAME,
};
pub use spec::{
    ApiConfig, AutoscaleConfig, ClusterConfig, Manifest, NodePoolConfig, ProviderConfig,
    StateConfig, WaitConfig,
};
pub use validator::{validate_autoscale, ConfigValidator, ValidationError, ValidationResult};
