use super::{Phase, Service, ServiceLogic, ServiceSnapshot};
use crate::coordinator::{DependencyCoordinator, NoDependencies};
use crate::error::Result;
use crate::events::{DiscardSink, StatusSink};
use crate::registry::ServiceRegistry;
use crate::status::ServiceKey;
use crate::translate::{KeyTranslate, Translate};
use parking_lot::ReentrantMutex;
use std::cell::Cell;
use std::sync::Arc;
use tracing::info;

/// Builder for [`Service`].
///
/// Without a registry the service has no related services and its status
/// changes go nowhere. With [`ServiceBuilder::registry`] the registry acts
/// as coordinator, its bus receives the status changes, and the built
/// service is registered with it.
pub struct ServiceBuilder {
    name_key: String,
    instance: Option<u32>,
    description_key: Option<String>,
    coordinator: Option<Arc<dyn DependencyCoordinator>>,
    sink: Option<Arc<dyn StatusSink>>,
    translate: Option<Arc<dyn Translate>>,
    registry: Option<Arc<ServiceRegistry>>,
    phase: Phase,
}

impl ServiceBuilder {
    pub fn new<S: Into<String>>(name_key: S) -> Self {
        Self {
            name_key: name_key.into(),
            instance: None,
            description_key: None,
            coordinator: None,
            sink: None,
            translate: None,
            registry: None,
            phase: Phase::INITIAL,
        }
    }

    /// Rebuild a service from a snapshot taken in another process
    pub fn revive(snapshot: ServiceSnapshot) -> Self {
        let phase = snapshot.revived_phase();
        info!(
            "Reviving service {} in state {} (was {})",
            snapshot.key, phase.state, snapshot.state
        );
        Self {
            name_key: snapshot.key.name_key,
            instance: Some(snapshot.key.instance),
            description_key: snapshot.description_key,
            coordinator: None,
            sink: None,
            translate: None,
            registry: None,
            phase,
        }
    }

    pub fn instance(mut self, instance: u32) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn description<S: Into<String>>(mut self, description_key: S) -> Self {
        self.description_key = Some(description_key.into());
        self
    }

    pub fn coordinator(mut self, coordinator: Arc<dyn DependencyCoordinator>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn StatusSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn translate(mut self, translate: Arc<dyn Translate>) -> Self {
        self.translate = Some(translate);
        self
    }

    pub fn registry(mut self, registry: &Arc<ServiceRegistry>) -> Self {
        self.registry = Some(Arc::clone(registry));
        self
    }

    pub fn build<L: ServiceLogic + 'static>(self, logic: L) -> Result<Arc<Service>> {
        let registry = self.registry;

        let instance = match (self.instance, &registry) {
            (Some(instance), _) => instance,
            (None, Some(registry)) => registry.next_instance(&self.name_key),
            (None, None) => 0,
        };

        let coordinator = match (self.coordinator, &registry) {
            (Some(coordinator), _) => coordinator,
            (None, Some(registry)) => Arc::clone(registry) as Arc<dyn DependencyCoordinator>,
            (None, None) => Arc::new(NoDependencies),
        };

        let sink = match (self.sink, &registry) {
            (Some(sink), _) => sink,
            (None, Some(registry)) => Arc::new(registry.bus().clone()) as Arc<dyn StatusSink>,
            (None, None) => Arc::new(DiscardSink),
        };

        let translate = match (self.translate, &registry) {
            (Some(translate), _) => translate,
            (None, Some(registry)) => registry.translate(),
            (None, None) => Arc::new(KeyTranslate),
        };

        let service = Arc::new(Service {
            key: ServiceKey::with_instance(self.name_key, instance),
            description_key: self.description_key,
            phase: ReentrantMutex::new(Cell::new(self.phase)),
            logic: Box::new(logic),
            coordinator,
            sink,
            translate,
        });

        if let Some(registry) = registry {
            registry.register(&service)?;
        }

        Ok(service)
    }
}
