use crate::status::{Cause, ServiceKey, State};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// The operation is not legal from the service's current state
    #[error("Cannot {operation}() service {service} when state is {state}{hint}")]
    StateConflict {
        service: ServiceKey,
        operation: &'static str,
        state: State,
        hint: &'static str,
    },

    #[error("Cause {cause} is not valid for {operation}() on service {service}")]
    InvalidCause {
        service: ServiceKey,
        operation: &'static str,
        cause: Cause,
    },

    #[error("Service {0} is already registered")]
    DuplicateService(ServiceKey),

    #[error("Service {0} is not registered")]
    UnknownService(ServiceKey),

    #[error("Dependency of {dependant} on {dependency} would create a cycle")]
    DependencyCycle {
        dependant: ServiceKey,
        dependency: ServiceKey,
    },

    /// Configuration that loads but cannot describe a valid set of services
    #[error("Service configuration error: {message}")]
    Configuration { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),
}

impl ServiceError {
    pub fn state_conflict(service: &ServiceKey, operation: &'static str, state: State) -> Self {
        let hint = match (operation, state) {
            ("start", State::Failed) => ". Call reset() first",
            ("reset", _) => ". Must be STOPPED or FAILED before reset()",
            _ => "",
        };
        Self::StateConflict {
            service: service.clone(),
            operation,
            state,
            hint,
        }
    }

    pub fn invalid_cause(service: &ServiceKey, operation: &'static str, cause: Cause) -> Self {
        Self::InvalidCause {
            service: service.clone(),
            operation,
            cause,
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// True for errors that signal caller misuse of the lifecycle API
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, Self::StateConflict { .. } | Self::InvalidCause { .. })
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors seen by subscribers of the service bus
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Receiver lagged behind by {0} messages")]
    Lagged(u64),

    #[error("Service bus closed")]
    Closed,
}
