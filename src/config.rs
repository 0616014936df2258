use crate::coordinator::DependencyType;
use crate::error::{Result, ServiceError};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LifecycleConfig {
    pub bus: BusConfig,
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub services: Vec<ServiceDefinition>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct BusConfig {
    /// Messages buffered per subscriber before it starts lagging
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,

    /// Log every published status change at debug level
    #[serde(default)]
    pub debug_logging: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Number of transitions kept by the service monitor
    #[serde(default = "default_monitor_history")]
    pub history: usize,
}

/// A service the `svcctl` binary builds from configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServiceDefinition {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Make the start hook fail, to exercise failure handling
    #[serde(default)]
    pub fail_on_start: bool,

    #[serde(default)]
    pub fail_on_stop: bool,

    #[serde(default)]
    pub fail_on_reset: bool,

    #[serde(default)]
    pub depends_on: Vec<DependencyDefinition>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DependencyDefinition {
    pub name: String,

    #[serde(default = "default_dependency_type")]
    pub kind: DependencyType,
}

impl LifecycleConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self> {
        Self::load_from_file("svcctl.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_env_prefix(path, ENV_PREFIX)
    }

    fn load_with_env_prefix<P: AsRef<Path>>(path: P, env_prefix: &str) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("bus.capacity", default_bus_capacity() as i64)?
            .set_default("bus.debug_logging", false)?
            .set_default("monitor.history", default_monitor_history() as i64)?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Environment variables such as SVCCTL__BUS__CAPACITY
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: LifecycleConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.bus.capacity == 0 {
            return Err(ServiceError::configuration("Bus capacity must be greater than 0"));
        }

        if self.monitor.history == 0 {
            return Err(ServiceError::configuration("Monitor history must be greater than 0"));
        }

        let mut names = HashSet::new();
        for service in &self.services {
            if service.name.trim().is_empty() {
                return Err(ServiceError::configuration("Service name must not be empty"));
            }
            if !names.insert(service.name.as_str()) {
                return Err(ServiceError::configuration(format!(
                    "Service '{}' is defined more than once",
                    service.name
                )));
            }
        }

        for service in &self.services {
            for dependency in &service.depends_on {
                if dependency.name == service.name {
                    return Err(ServiceError::configuration(format!(
                        "Service '{}' cannot depend on itself",
                        service.name
                    )));
                }
                if !names.contains(dependency.name.as_str()) {
                    return Err(ServiceError::configuration(format!(
                        "Service '{}' depends on undefined service '{}'",
                        service.name, dependency.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDefinition> {
        self.services.iter().find(|s| s.name == name)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig {
                capacity: default_bus_capacity(),
                debug_logging: false,
            },
            monitor: MonitorConfig {
                history: default_monitor_history(),
            },
            services: Vec::new(),
        }
    }
}

const ENV_PREFIX: &str = "SVCCTL";

// Default value functions
fn default_bus_capacity() -> usize {
    256
}
fn default_monitor_history() -> usize {
    100
}
fn default_dependency_type() -> DependencyType {
    DependencyType::AlwaysRequired
}
