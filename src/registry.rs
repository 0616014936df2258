use crate::coordinator::{Action, DependencyCoordinator, DependencyType};
use crate::error::{Result, ServiceError};
use crate::events::ServiceBus;
use crate::service::Service;
use crate::status::{Cause, ServiceKey, ServiceStatus, State};
use crate::translate::{KeyTranslate, Translate};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// One edge of the dependency table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub service: ServiceKey,
    pub kind: DependencyType,
}

/// Registry of live services sharing one service bus.
///
/// Services register when built and again when revived. The registry only
/// holds weak references, so dropping the last handle to a service takes it
/// out of every propagation.
///
/// It is also the dependency coordinator of the services it builds:
/// starting a service starts its dependencies, stopping or failing it stops
/// or fails the dependants that always require it.
///
/// Each service holds its own lock while propagating, so the two directions
/// take locks in opposite order. Do not run a dependant's `start()` on one
/// thread while its dependency's `stop()` (or `fail()`) runs on another:
/// both calls can block forever. Drive related services from one thread, or
/// let one call return before issuing the other.
pub struct ServiceRegistry {
    bus: ServiceBus,
    translate: Arc<dyn Translate>,
    services: RwLock<HashMap<ServiceKey, Weak<Service>>>,
    /// dependant -> dependencies
    dependencies: RwLock<HashMap<ServiceKey, Vec<Dependency>>>,
    instances: Mutex<HashMap<String, u32>>,
}

impl ServiceRegistry {
    pub fn new(bus: ServiceBus) -> Self {
        Self::with_translate(bus, Arc::new(KeyTranslate))
    }

    pub fn with_translate(bus: ServiceBus, translate: Arc<dyn Translate>) -> Self {
        Self {
            bus,
            translate,
            services: RwLock::new(HashMap::new()),
            dependencies: RwLock::new(HashMap::new()),
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &ServiceBus {
        &self.bus
    }

    pub fn translate(&self) -> Arc<dyn Translate> {
        Arc::clone(&self.translate)
    }

    /// Next free instance number for a name key
    pub fn next_instance(&self, name_key: &str) -> u32 {
        let mut instances = self.instances.lock();
        let next = instances.entry(name_key.to_string()).or_insert(0);
        let instance = *next;
        *next += 1;
        instance
    }

    pub fn register(&self, service: &Arc<Service>) -> Result<()> {
        let key = service.key().clone();
        let mut services = self.services.write();
        if services.get(&key).and_then(Weak::upgrade).is_some() {
            return Err(ServiceError::DuplicateService(key));
        }

        // Explicit instance numbers must not be handed out again
        {
            let mut instances = self.instances.lock();
            let next = instances.entry(key.name_key.clone()).or_insert(0);
            *next = (*next).max(key.instance + 1);
        }

        debug!("Registering service {}", key);
        services.insert(key, Arc::downgrade(service));
        Ok(())
    }

    /// Remove a service and every dependency edge touching it
    pub fn deregister(&self, key: &ServiceKey) -> bool {
        let removed = self.services.write().remove(key).is_some();
        if removed {
            let mut dependencies = self.dependencies.write();
            dependencies.remove(key);
            for edges in dependencies.values_mut() {
                edges.retain(|d| &d.service != key);
            }
            debug!("Deregistered service {}", key);
        }
        removed
    }

    pub fn get(&self, key: &ServiceKey) -> Option<Arc<Service>> {
        self.services.read().get(key).and_then(Weak::upgrade)
    }

    /// Live services ordered by key
    pub fn services(&self) -> Vec<Arc<Service>> {
        let mut live: Vec<Arc<Service>> = self
            .services
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        live.sort_by(|a, b| a.key().cmp(b.key()));
        live
    }

    pub fn statuses(&self) -> Vec<ServiceStatus> {
        self.services().iter().map(|s| s.status()).collect()
    }

    /// Declare that `dependant` depends on `dependency`.
    ///
    /// Re-declaring an existing edge updates its type. Self dependencies and
    /// edges that close a cycle are configuration errors.
    pub fn add_dependency(
        &self,
        dependant: &ServiceKey,
        dependency: &ServiceKey,
        kind: DependencyType,
    ) -> Result<()> {
        for key in [dependant, dependency] {
            if self.get(key).is_none() {
                return Err(ServiceError::UnknownService(key.clone()));
            }
        }

        let mut dependencies = self.dependencies.write();
        if dependant == dependency || Self::reaches(&dependencies, dependency, dependant) {
            return Err(ServiceError::DependencyCycle {
                dependant: dependant.clone(),
                dependency: dependency.clone(),
            });
        }

        let edges = dependencies.entry(dependant.clone()).or_default();
        match edges.iter_mut().find(|d| &d.service == dependency) {
            Some(existing) => existing.kind = kind,
            None => edges.push(Dependency {
                service: dependency.clone(),
                kind,
            }),
        }
        debug!("{} depends on {} ({:?})", dependant, dependency, kind);
        Ok(())
    }

    pub fn dependencies_of(&self, key: &ServiceKey) -> Vec<Dependency> {
        self.dependencies
            .read()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Services that depend on `key`, with the type of their dependency
    pub fn dependants_of(&self, key: &ServiceKey) -> Vec<Dependency> {
        let mut dependants: Vec<Dependency> = self
            .dependencies
            .read()
            .iter()
            .filter_map(|(dependant, edges)| {
                edges.iter().find(|d| &d.service == key).map(|d| Dependency {
                    service: dependant.clone(),
                    kind: d.kind,
                })
            })
            .collect();
        dependants.sort_by(|a, b| a.service.cmp(&b.service));
        dependants
    }

    /// Start every registered service. State conflicts are logged and the
    /// service's current status is reported instead.
    pub fn start_all(&self) -> Vec<ServiceStatus> {
        info!("Starting all services");
        self.services()
            .iter()
            .map(|service| {
                service.start().unwrap_or_else(|e| {
                    warn!("{}", e);
                    service.status()
                })
            })
            .collect()
    }

    pub fn stop_all(&self) -> Vec<ServiceStatus> {
        info!("Stopping all services");
        self.services()
            .iter()
            .map(|service| {
                service.stop().unwrap_or_else(|e| {
                    warn!("{}", e);
                    service.status()
                })
            })
            .collect()
    }

    fn reaches(
        dependencies: &HashMap<ServiceKey, Vec<Dependency>>,
        from: &ServiceKey,
        target: &ServiceKey,
    ) -> bool {
        let mut visited = HashSet::new();
        let mut pending = vec![from];
        while let Some(current) = pending.pop() {
            if current == target {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(edges) = dependencies.get(current) {
                pending.extend(edges.iter().map(|d| &d.service));
            }
        }
        false
    }

    fn start_dependencies(&self, key: &ServiceKey) -> bool {
        for dependency in self.dependencies_of(key) {
            let running = match self.get(&dependency.service) {
                Some(target) if target.is_started() => true,
                Some(target) => match target.start() {
                    Ok(status) => status.is_running(),
                    Err(e) => {
                        warn!("Could not start {}, required by {}: {}", dependency.service, key, e);
                        false
                    }
                },
                None => {
                    warn!("Dependency {} of {} is no longer registered", dependency.service, key);
                    false
                }
            };

            if !running && dependency.kind.required_at_start() {
                return false;
            }
        }
        true
    }

    fn stop_dependants(&self, key: &ServiceKey, cause: Cause) -> bool {
        let failing = matches!(
            cause,
            Cause::Failed | Cause::FailedToStop | Cause::DependencyFailed
        );

        let mut all_stopped = true;
        for dependant in self.dependants_of(key) {
            if dependant.kind != DependencyType::AlwaysRequired {
                continue;
            }
            let Some(target) = self.get(&dependant.service) else {
                continue;
            };

            let result = if failing {
                target.dependency_fail()
            } else {
                target.dependency_stop()
            };
            match result {
                Ok(status) => {
                    if !matches!(status.state, State::Stopped | State::Failed | State::Initial) {
                        all_stopped = false;
                    }
                }
                Err(e) => {
                    warn!("Could not stop {}, which requires {}: {}", dependant.service, key, e);
                    all_stopped = false;
                }
            }
        }
        all_stopped
    }
}

impl DependencyCoordinator for ServiceRegistry {
    fn execute(&self, service: &ServiceKey, action: Action, cause: Cause) -> bool {
        debug!("Executing {} for dependencies of {} ({})", action, service, cause);
        match action {
            Action::Start => self.start_dependencies(service),
            Action::Stop => self.stop_dependants(service, cause),
        }
    }
}
