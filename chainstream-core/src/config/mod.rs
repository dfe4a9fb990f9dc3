//! Engine configuration
//!
//! Configuration is read once from YAML or JSON, with `${VAR}` references
//! interpolated from the environment before parsing, then validated.
//! Provider credentials are resolved at call time through a
//! [`SettingsResolver`].

mod env;
mod error;
mod schema;
mod secrets;
mod settings;
mod validator;

pub use env::{interpolate_env_vars, interpolate_with};
pub use error::{ConfigError, ConfigResult, ValidationError, ValidationErrorKind};
pub use schema::{
    CircuitBreakerSettings, ConnectionConfig, EngineConfig, JobSettings, ProviderConfig,
    SettingsCacheConfig, StoreFailurePolicy, TimeoutSettings, SCHEMA_VERSION,
};
pub use secrets::{SafeLogging, SecretString};
pub use settings::{
    api_key_vars, env_settings, CachedSettingsResolver, EnvLookup, ProviderSettings,
    SettingsBackend, SettingsResolver, StaticSettings,
};
pub use validator::ConfigValidator;

use std::fs;
use std::path::Path;

/// Load a configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> ConfigResult<EngineConfig> {
    let path = path.as_ref();
    let content = read(path)?;
    parse_yaml(&content, &path.to_string_lossy())
}

/// Load a configuration from a JSON file
pub fn load_from_json<P: AsRef<Path>>(path: P) -> ConfigResult<EngineConfig> {
    let path = path.as_ref();
    let content = read(path)?;
    parse_json(&content, &path.to_string_lossy())
}

/// Parse and validate YAML configuration text
pub fn parse_yaml(content: &str, origin: &str) -> ConfigResult<EngineConfig> {
    let interpolated = env::interpolate_env_vars(content)?;

    let config: EngineConfig =
        serde_yaml::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            origin: origin.to_string(),
            at: e.location().map(|l| (l.line(), l.column())),
            message: e.to_string(),
        })?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

/// Parse and validate JSON configuration text
pub fn parse_json(content: &str, origin: &str) -> ConfigResult<EngineConfig> {
    let interpolated = env::interpolate_env_vars(content)?;

    let config: EngineConfig =
        serde_json::from_str(&interpolated).map_err(|e| ConfigError::Parse {
            origin: origin.to_string(),
            at: Some((e.line(), e.column())),
            message: e.to_string(),
        })?;

    ConfigValidator::new().validate(&config)?;
    Ok(config)
}

fn read(path: &Path) -> ConfigResult<String> {
    fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_string_lossy().to_string(),
        source: e,
    })
}
