//! Configuration loading and validation for the failover controller

use crate::classify::{ErrorKind, KindSet, OutageClassification};
use crate::monitor::{DEFAULT_OUTAGE_LOGGING_INTERVAL, Monitor};
use crate::registry::{MonitoredService, Registry};
use crate::service::Service;
use crate::types::{MAX_INTERVAL, ServiceSettings};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),

    #[error("Invalid outage classification: {0}")]
    Classification(String),

    #[error("Invalid monitor settings: {0}")]
    Monitor(String),
}

impl From<ConfigError> for common::Error {
    fn from(err: ConfigError) -> Self {
        common::Error::config(err)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FailoverConfig {
    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub classification: ClassificationSettings,

    /// Settings for services without an entry in `services`
    #[serde(default)]
    pub defaults: ServiceSettings,

    /// Per-service settings keyed by service name
    #[serde(default)]
    pub services: BTreeMap<String, ServiceSettings>,
}

impl Validate for FailoverConfig {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.monitor.validate()?;
        self.defaults.validate()?;
        for settings in self.services.values() {
            settings.validate()?;
        }
        Ok(())
    }
}

/// Monitor-level settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MonitorSettings {
    /// Cadence of the background scheduler
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_tick_interval")]
    pub tick_interval: Duration,

    /// Minimum spacing between repeated outage events
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_logging_interval")]
    pub outage_logging_interval: Duration,
}

/// Error kinds that indicate a service outage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationSettings {
    pub kinds: Vec<ErrorKind>,

    /// Declared supertypes: kind -> parent
    pub parents: BTreeMap<ErrorKind, ErrorKind>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            outage_logging_interval: DEFAULT_OUTAGE_LOGGING_INTERVAL,
        }
    }
}

// Custom validators

fn validate_tick_interval(interval: &Duration) -> Result<(), ValidationError> {
    let millis = interval.as_millis();
    if !(10..=3_600_000).contains(&millis) {
        return Err(ValidationError::new("tick_interval_out_of_range"));
    }
    Ok(())
}

fn validate_logging_interval(interval: &Duration) -> Result<(), ValidationError> {
    if *interval > MAX_INTERVAL {
        return Err(ValidationError::new("outage_logging_interval_out_of_range"));
    }
    Ok(())
}

// Configuration loading implementation

impl FailoverConfig {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: FailoverConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        config.kind_set()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/failover/failover.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./failover.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    fn home_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("failover").join("failover.yaml"))
    }

    /// Settings for the named service, falling back to the defaults
    pub fn service_settings(&self, name: &str) -> ServiceSettings {
        self.services
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Build the outage classification set
    pub fn kind_set(&self) -> Result<KindSet, ConfigError> {
        let mut set = KindSet::new();
        for kind in &self.classification.kinds {
            set.insert(kind.clone());
        }
        for (kind, parent) in &self.classification.parents {
            set.declare_parent(kind.clone(), parent.clone())
                .map_err(|e| ConfigError::Classification(e.to_string()))?;
        }
        Ok(set)
    }

    /// Publish this configuration's classification into a live one
    pub fn apply_classification(
        &self,
        classification: &OutageClassification,
    ) -> Result<(), ConfigError> {
        classification.replace(self.kind_set()?);
        Ok(())
    }

    /// Build a monitor for `registry` with this configuration's
    /// classification and logging interval
    pub fn build_monitor(&self, registry: Arc<Registry>) -> Result<Monitor, ConfigError> {
        let classification = Arc::new(OutageClassification::new(self.kind_set()?));
        Monitor::new(registry)
            .with_classification(classification)
            .with_outage_logging_interval(self.monitor.outage_logging_interval)
            .map_err(|e| ConfigError::Monitor(e.to_string()))
    }

    /// Register `service` with the settings configured for its name
    pub fn register(
        &self,
        registry: &Registry,
        service: Arc<dyn Service>,
    ) -> common::Result<Arc<MonitoredService>> {
        let settings = self.service_settings(service.name());
        registry.register(service, settings)
    }
}
