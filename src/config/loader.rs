//! Configuration Loader
//!
//! Environment-aware layered loading on top of the `config` crate. Handles
//! YAML discovery, environment detection, variable overrides and validation.

use super::error::{ConfigResult, ConfigurationError};
use super::OrchestratorConfig;
use config::{Config, Environment, File, FileFormat};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE: &str = "orchestrator.yaml";
const ENV_PREFIX: &str = "FSM";
const ENV_SEPARATOR: &str = "__";

/// Validated configuration plus the environment it was loaded for
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: OrchestratorConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_overrides(config_dir, environment, None)
    }

    /// Load configuration with an explicit variable map standing in for the
    /// process environment. `None` reads the real environment.
    pub fn load_with_overrides(
        config_dir: Option<PathBuf>,
        environment: &str,
        env_vars: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let explicit_dir = config_dir.is_some();
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        if explicit_dir && !config_directory.is_dir() {
            return Err(ConfigurationError::directory_not_found(config_directory));
        }

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_layers(&config_directory, environment, env_vars)?;
        config.validate()?;

        let manager = ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        };

        debug!(
            "Configuration loaded: {}",
            serde_json::to_string(&manager.debug_config())
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %manager.environment,
            batch_size = manager.config.orchestration.batch_size,
            worker_pool_size = manager.config.orchestration.worker_pool_size,
            max_attempts = manager.config.orchestration.max_attempts,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(manager))
    }

    /// Wrap an already-built configuration, validating it first
    pub fn from_config(
        config: OrchestratorConfig,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    fn load_layers(
        config_directory: &Path,
        environment: &str,
        env_vars: Option<HashMap<String, String>>,
    ) -> ConfigResult<OrchestratorConfig> {
        let base_path = config_directory.join(BASE_FILE);
        let env_path = config_directory.join(format!("orchestrator.{environment}.yaml"));

        let database_url = match &env_vars {
            Some(vars) => vars.get("DATABASE_URL").cloned(),
            None => env::var("DATABASE_URL").ok(),
        };

        let variables = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(env_vars.map(|vars| vars.into_iter().collect()));

        let mut builder = Config::builder()
            .add_source(Config::try_from(&OrchestratorConfig::default())?)
            .add_source(File::from(base_path).format(FileFormat::Yaml).required(false))
            .add_source(File::from(env_path).format(FileFormat::Yaml).required(false))
            .add_source(variables);

        if let Some(url) = database_url.filter(|url| !url.trim().is_empty()) {
            builder = builder.set_override("database.url", url)?;
        }

        builder
            .build()?
            .try_deserialize::<OrchestratorConfig>()
            .map_err(|e| ConfigurationError::environment_config_error(environment, e))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Configuration as JSON with credentials masked, safe to log
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        if let Some(url) = value.pointer_mut("/database/url") {
            if let Some(raw) = url.as_str() {
                *url = serde_json::Value::String(mask_database_url(raw));
            }
        }
        value
    }

    /// Detect current environment: FSM_ENV || APP_ENV || 'development'
    pub fn detect_environment() -> String {
        env::var("FSM_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        if let Ok(dir) = env::var("FSM_CONFIG_DIR") {
            return PathBuf::from(dir);
        }

        if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
            let candidate = PathBuf::from(manifest_dir).join("config");
            if candidate.is_dir() {
                return candidate;
            }
        }

        PathBuf::from("config")
    }
}

/// Replace the password component of a connection URL with `***`.
pub fn mask_database_url(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let authority_start = scheme_end + 3;
    let Some(at) = url[authority_start..].find('@') else {
        return url.to_string();
    };
    let credentials = &url[authority_start..authority_start + at];
    match credentials.find(':') {
        Some(colon) => format!(
            "{}{}:***{}",
            &url[..authority_start],
            &credentials[..colon],
            &url[authority_start + at..]
        ),
        None => url.to_string(),
    }
}
