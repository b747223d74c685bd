use std::path::Path;

use crate::config::schema::FleetConfig;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<FleetConfig, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<FleetConfig, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: FleetConfig = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express.
pub fn validate_config(config: &FleetConfig) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let timeouts = &config.timeouts;
    for (name, secs) in [
        ("timeouts.healthSecs", timeouts.health_secs),
        ("timeouts.proxySecs", timeouts.proxy_secs),
        ("timeouts.syncPushSecs", timeouts.sync_push_secs),
        ("timeouts.gitSecs", timeouts.git_secs),
        ("timeouts.deploySecs", timeouts.deploy_secs),
    ] {
        if secs == 0 {
            return Err(ConfigError::Validation {
                message: format!("{} must be greater than 0", name),
            });
        }
    }

    if config.gitops.max_concurrent_syncs == 0 {
        return Err(ConfigError::Validation {
            message: "gitops.maxConcurrentSyncs must be at least 1".to_string(),
        });
    }

    if config.gitops.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation {
            message: "gitops.sweepIntervalSecs must be greater than 0".to_string(),
        });
    }

    if config.background.queue_capacity == 0 {
        return Err(ConfigError::Validation {
            message: "background.queueCapacity must be at least 1".to_string(),
        });
    }

    if tracing_subscriber::EnvFilter::try_new(&config.logging.level).is_err() {
        return Err(ConfigError::Validation {
            message: format!("Invalid logging.level '{}'", config.logging.level),
        });
    }

    Ok(())
}
