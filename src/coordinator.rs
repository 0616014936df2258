use crate::status::{Cause, ServiceKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Action propagated to related services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Start,
    Stop,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Start => f.write_str("START"),
            Action::Stop => f.write_str("STOP"),
        }
    }
}

/// How strongly a dependant relies on one of its dependencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyType {
    /// Must be running to start, and a stop or failure stops the dependant
    AlwaysRequired,
    /// Must be running to start; later stops are ignored
    RequiredOnlyAtStart,
    /// Started if possible, never blocks the dependant
    Optional,
}

impl DependencyType {
    pub fn required_at_start(&self) -> bool {
        !matches!(self, DependencyType::Optional)
    }
}

/// Brings related services into a consistent state before a service
/// completes its own transition.
///
/// `execute` is called while the calling service holds its exclusive
/// section. Implementations may call lifecycle operations of other services
/// but must not hold locks of their own while doing so.
pub trait DependencyCoordinator: Send + Sync {
    /// For [`Action::Start`], return true only if every required dependency
    /// of `service` is running. For [`Action::Stop`], propagate to dependants
    /// that require `service`; the result is informational.
    fn execute(&self, service: &ServiceKey, action: Action, cause: Cause) -> bool;
}

/// Coordinator for services that have no related services
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDependencies;

impl DependencyCoordinator for NoDependencies {
    fn execute(&self, _service: &ServiceKey, _action: Action, _cause: Cause) -> bool {
        true
    }
}
