pub mod app;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod monitor;
pub mod registry;
pub mod service;
pub mod status;
pub mod translate;

pub use app::{ConfiguredService, ServiceSet};
pub use config::{LifecycleConfig, ServiceDefinition, DependencyDefinition};
pub use coordinator::{Action, DependencyCoordinator, DependencyType, NoDependencies};
pub use error::{BusError, Result, ServiceError};
pub use events::{
    DiscardSink, EventFilter, ServiceBus, ServiceBusMessage, ServiceEventReceiver, StatusSink,
};
pub use monitor::ServiceMonitor;
pub use registry::{Dependency, ServiceRegistry};
pub use service::{Service, ServiceBuilder, ServiceLogic, ServiceSnapshot};
pub use status::{Cause, ServiceKey, ServiceStatus, State};
pub use translate::{KeyTranslate, MapTranslate, Translate};
