use crate::config::{LifecycleConfig, ServiceDefinition};
use crate::error::{Result, ServiceError};
use crate::events::ServiceBus;
use crate::registry::ServiceRegistry;
use crate::service::{Service, ServiceLogic};
use crate::status::ServiceKey;
use crate::translate::MapTranslate;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Service whose hooks only log, failing where its definition says so
pub struct ConfiguredService {
    name: String,
    fail_on_start: bool,
    fail_on_stop: bool,
    fail_on_reset: bool,
    runs: AtomicU32,
}

impl ConfiguredService {
    pub fn new(definition: &ServiceDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            fail_on_start: definition.fail_on_start,
            fail_on_stop: definition.fail_on_stop,
            fail_on_reset: definition.fail_on_reset,
            runs: AtomicU32::new(0),
        }
    }
}

impl ServiceLogic for ConfiguredService {
    fn do_start(&self) -> anyhow::Result<()> {
        if self.fail_on_start {
            anyhow::bail!("{} is configured to fail on start", self.name);
        }
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        info!("{} started (run {})", self.name, run);
        Ok(())
    }

    fn do_stop(&self) -> anyhow::Result<()> {
        if self.fail_on_stop {
            anyhow::bail!("{} is configured to fail on stop", self.name);
        }
        info!("{} stopped", self.name);
        Ok(())
    }

    fn do_reset(&self) -> anyhow::Result<()> {
        if self.fail_on_reset {
            anyhow::bail!("{} is configured to fail on reset", self.name);
        }
        debug!("{} reset", self.name);
        Ok(())
    }
}

/// Registry holding every service of a configuration, with dependencies
/// declared as configured
pub struct ServiceSet {
    registry: Arc<ServiceRegistry>,
    services: Vec<Arc<Service>>,
}

impl ServiceSet {
    pub fn from_config(config: &LifecycleConfig) -> Result<Self> {
        config.validate()?;

        let bus = if config.bus.debug_logging {
            ServiceBus::with_debug_logging(config.bus.capacity)
        } else {
            ServiceBus::new(config.bus.capacity)
        };

        let mut translate = MapTranslate::new();
        for definition in &config.services {
            if let Some(description) = &definition.description {
                translate.insert(description_key(&definition.name), description.clone());
            }
        }
        let registry = Arc::new(ServiceRegistry::with_translate(bus, Arc::new(translate)));

        let mut services = Vec::with_capacity(config.services.len());
        for definition in &config.services {
            let mut builder = Service::builder(definition.name.clone()).registry(&registry);
            if definition.description.is_some() {
                builder = builder.description(description_key(&definition.name));
            }
            services.push(builder.build(ConfiguredService::new(definition))?);
        }

        for definition in &config.services {
            let dependant = ServiceKey::new(definition.name.clone());
            for dependency in &definition.depends_on {
                registry.add_dependency(
                    &dependant,
                    &ServiceKey::new(dependency.name.clone()),
                    dependency.kind,
                )?;
            }
        }

        info!("Built {} services from configuration", services.len());
        Ok(Self { registry, services })
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn get(&self, name: &str) -> Result<&Arc<Service>> {
        self.services
            .iter()
            .find(|s| s.key().name_key == name)
            .ok_or_else(|| ServiceError::UnknownService(ServiceKey::new(name)))
    }
}

fn description_key(name: &str) -> String {
    format!("{}.description", name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DependencyDefinition;
    use crate::coordinator::DependencyType;
    use crate::status::{Cause, State};

    fn definition(name: &str, depends_on: &[(&str, DependencyType)]) -> ServiceDefinition {
        ServiceDefinition {
            name: name.to_string(),
            description: None,
            fail_on_start: false,
            fail_on_stop: false,
            fail_on_reset: false,
            depends_on: depends_on
                .iter()
                .map(|(name, kind)| DependencyDefinition {
                    name: name.to_string(),
                    kind: *kind,
                })
                .collect(),
        }
    }

    #[test]
    fn test_build_and_start_from_config() {
        let mut config = LifecycleConfig::default();
        let mut db = definition("db", &[]);
        db.description = Some("Primary database".to_string());
        config.services = vec![
            db,
            definition("web", &[("db", DependencyType::AlwaysRequired)]),
        ];

        let set = ServiceSet::from_config(&config).unwrap();
        assert_eq!(set.services().len(), 2);
        assert_eq!(set.get("db").unwrap().description(), "Primary database");
        assert_eq!(set.get("web").unwrap().description(), "");

        let status = set.get("web").unwrap().start().unwrap();
        assert_eq!(status.state, State::Running);
        assert!(set.get("db").unwrap().is_started());

        set.get("db").unwrap().stop().unwrap();
        assert_eq!(set.get("web").unwrap().cause(), Some(Cause::DependencyStopped));
    }

    #[test]
    fn test_configured_failures() {
        let mut config = LifecycleConfig::default();
        let mut db = definition("db", &[]);
        db.fail_on_start = true;
        config.services = vec![
            db,
            definition("web", &[("db", DependencyType::RequiredOnlyAtStart)]),
        ];

        let set = ServiceSet::from_config(&config).unwrap();
        let status = set.get("web").unwrap().start().unwrap();
        assert_eq!(status.state, State::Initial);
        assert_eq!(status.cause, Some(Cause::DependencyFailed));
        assert_eq!(set.get("db").unwrap().cause(), Some(Cause::FailedToStart));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = LifecycleConfig::default();
        config.services = vec![definition("web", &[("db", DependencyType::Optional)])];
        assert!(matches!(
            ServiceSet::from_config(&config),
            Err(ServiceError::Configuration { .. })
        ));
        assert!(matches!(
            ServiceSet::from_config(&LifecycleConfig::default())
                .unwrap()
                .get("missing"),
            Err(ServiceError::UnknownService(_))
        ));
    }

    #[test]
    fn test_dependency_cycle_in_config_is_rejected() {
        let mut config = LifecycleConfig::default();
        config.services = vec![
            definition("a", &[("b", DependencyType::AlwaysRequired)]),
            definition("b", &[("a", DependencyType::AlwaysRequired)]),
        ];
        assert!(matches!(
            ServiceSet::from_config(&config),
            Err(ServiceError::DependencyCycle { .. })
        ));
    }
}
