//! Service lifecycle state machine.
//!
//! ```text
//!   INITIAL ──start──▶ STARTING ──ok──▶ RUNNING ──stop──▶ STOPPING ──ok──▶ STOPPED
//!      ▲                  │  │                                │              │
//!      │      dependency  │  └─err──▶ FAILED ◀──err / fail────┘              │
//!      │      refused ────┘ (back to      │                                  │
//!      │                    start state)  │ reset                     reset  │
//!      └────────────ok──── RESETTING ◀────┴──────────────────────────────────┘
//! ```
//!
//! Every operation runs inside the service's exclusive section. The lock is
//! reentrant so that dependency propagation coming back to the same service
//! on the same thread does not deadlock.

mod builder;
mod logic;
mod snapshot;

pub use builder::ServiceBuilder;
pub use logic::ServiceLogic;
pub use snapshot::ServiceSnapshot;

use crate::coordinator::{Action, DependencyCoordinator};
use crate::error::{Result, ServiceError};
use crate::events::{ServiceBusMessage, StatusSink};
use crate::status::{Cause, ServiceKey, ServiceStatus, State};
use crate::translate::Translate;
use parking_lot::ReentrantMutex;
use std::cell::Cell;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Phase {
    state: State,
    cause: Option<Cause>,
}

impl Phase {
    const INITIAL: Phase = Phase {
        state: State::Initial,
        cause: None,
    };
}

/// A service with a managed start/stop/reset lifecycle
pub struct Service {
    key: ServiceKey,
    description_key: Option<String>,
    phase: ReentrantMutex<Cell<Phase>>,
    logic: Box<dyn ServiceLogic>,
    coordinator: Arc<dyn DependencyCoordinator>,
    sink: Arc<dyn StatusSink>,
    translate: Arc<dyn Translate>,
}

impl Service {
    pub fn builder<S: Into<String>>(name_key: S) -> ServiceBuilder {
        ServiceBuilder::new(name_key)
    }

    pub fn key(&self) -> &ServiceKey {
        &self.key
    }

    pub fn instance(&self) -> u32 {
        self.key.instance
    }

    pub fn name(&self) -> String {
        self.translate.from_key(&self.key.name_key)
    }

    pub fn description_key(&self) -> Option<&str> {
        self.description_key.as_deref()
    }

    /// Translated description, empty when no description key is set
    pub fn description(&self) -> String {
        match &self.description_key {
            Some(key) => self.translate.from_key(key),
            None => String::new(),
        }
    }

    pub fn state(&self) -> State {
        self.phase.lock().get().state
    }

    pub fn cause(&self) -> Option<Cause> {
        self.phase.lock().get().cause
    }

    /// State and cause read together
    pub fn status(&self) -> ServiceStatus {
        let phase = self.phase.lock().get();
        self.status_of(phase)
    }

    pub fn is_started(&self) -> bool {
        self.state() == State::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == State::Stopped
    }

    pub fn start(&self) -> Result<ServiceStatus> {
        self.start_with(Cause::Started)
    }

    /// Start the service, first asking the coordinator to start whatever it
    /// depends on.
    ///
    /// Returns the current status unchanged when already starting or
    /// running. Fails with a state conflict when STOPPING, RESETTING or
    /// FAILED. If the coordinator refuses, the service returns to the state
    /// it started from with cause DEPENDENCY_FAILED.
    pub fn start_with(&self, cause: Cause) -> Result<ServiceStatus> {
        if !cause.is_start_cause() {
            return Err(ServiceError::invalid_cause(&self.key, "start", cause));
        }

        let guard = self.phase.lock();
        let current = guard.get();
        match current.state {
            State::Running | State::Starting => {
                debug!("{} already started, no action taken", self.key);
                return Ok(self.status_of(current));
            }
            State::Stopping | State::Resetting | State::Failed => {
                return Err(ServiceError::state_conflict(&self.key, "start", current.state));
            }
            State::Initial | State::Stopped => {}
        }

        let beginning_state = current.state;
        info!("Starting service: {}", self.name());
        self.transition(&guard, State::Starting, cause);

        if self.coordinator.execute(&self.key, Action::Start, cause) {
            match self.logic.do_start() {
                Ok(()) => self.transition(&guard, State::Running, cause),
                Err(e) => {
                    error!("Exception occurred while trying to start {}: {:#}", self.name(), e);
                    self.transition(&guard, State::Failed, Cause::FailedToStart);
                }
            }
        } else {
            warn!(
                "Dependencies of {} could not be started, reverting to {}",
                self.name(),
                beginning_state
            );
            self.transition(&guard, beginning_state, Cause::DependencyFailed);
        }

        Ok(self.status_of(guard.get()))
    }

    pub fn stop(&self) -> Result<ServiceStatus> {
        self.stop_with(Cause::Stopped)
    }

    pub fn fail(&self) -> Result<ServiceStatus> {
        self.stop_with(Cause::Failed)
    }

    /// Stop because a service this one always requires has failed
    pub fn dependency_fail(&self) -> Result<ServiceStatus> {
        self.stop_with(Cause::DependencyFailed)
    }

    /// Stop because a service this one always requires has stopped
    pub fn dependency_stop(&self) -> Result<ServiceStatus> {
        self.stop_with(Cause::DependencyStopped)
    }

    /// Stop the service for the given reason.
    ///
    /// A no-op unless STARTING or RUNNING. Dependants that always require
    /// this service are stopped (or failed) through the coordinator before
    /// the stop hook runs; the outcome of that propagation does not prevent
    /// the local stop. A stop hook failure ends in FAILED.
    pub fn stop_with(&self, cause: Cause) -> Result<ServiceStatus> {
        if !cause.is_stop_cause() {
            return Err(ServiceError::invalid_cause(&self.key, "stop", cause));
        }

        let guard = self.phase.lock();
        let current = guard.get();
        match current.state {
            State::Stopped | State::Stopping | State::Failed | State::Resetting => {
                debug!(
                    "Attempting to stop service {}, but it is already {}. No action taken",
                    self.key, current.state
                );
                return Ok(self.status_of(current));
            }
            State::Initial => {
                debug!("{} is INITIAL, stop ignored", self.key);
                return Ok(self.status_of(current));
            }
            State::Starting | State::Running => {}
        }

        info!("Stopping service: {} ({})", self.name(), cause);
        self.transition(&guard, State::Stopping, cause);

        if !self.coordinator.execute(&self.key, Action::Stop, cause) {
            warn!("Not all dependants of {} could be stopped", self.name());
        }

        match self.logic.do_stop() {
            Ok(()) => self.transition(&guard, cause.stop_state(), cause),
            Err(e) => {
                error!("Exception occurred while trying to stop {}: {:#}", self.name(), e);
                // Already failing is reported as a plain failure
                let cause = if cause == Cause::Failed {
                    Cause::Failed
                } else {
                    Cause::FailedToStop
                };
                self.transition(&guard, State::Failed, cause);
            }
        }

        Ok(self.status_of(guard.get()))
    }

    /// Return a STOPPED or FAILED service to INITIAL.
    ///
    /// A reset hook failure is never returned as an error; it leaves the
    /// service FAILED with cause FAILED_TO_RESET.
    pub fn reset(&self) -> Result<ServiceStatus> {
        let guard = self.phase.lock();
        let current = guard.get();
        match current.state {
            State::Initial | State::Resetting => return Ok(self.status_of(current)),
            State::Stopped | State::Failed => {}
            state => return Err(ServiceError::state_conflict(&self.key, "reset", state)),
        }

        info!("Resetting service: {}", self.name());
        self.transition(&guard, State::Resetting, Cause::Reset);

        match self.logic.do_reset() {
            Ok(()) => self.transition(&guard, State::Initial, Cause::Reset),
            Err(e) => {
                error!("Exception while trying to reset {}: {:#}", self.name(), e);
                self.transition(&guard, State::Failed, Cause::FailedToReset);
            }
        }

        Ok(self.status_of(guard.get()))
    }

    /// Persistable copy of identity, state and cause
    pub fn snapshot(&self) -> ServiceSnapshot {
        let phase = self.phase.lock().get();
        ServiceSnapshot {
            key: self.key.clone(),
            description_key: self.description_key.clone(),
            state: phase.state,
            cause: phase.cause,
        }
    }

    /// Commit a new state and cause, publishing the change.
    ///
    /// A transition to the current state is not realized: nothing changes
    /// and nothing is published.
    fn transition(&self, phase: &Cell<Phase>, state: State, cause: Cause) {
        let previous = phase.get();
        if previous.state == state {
            return;
        }

        phase.set(Phase {
            state,
            cause: Some(cause),
        });
        debug!(
            "{} has changed status from {} to {}",
            self.key, previous.state, state
        );
        self.sink.publish(&ServiceBusMessage::new(
            self.key.clone(),
            previous.state,
            state,
            cause,
        ));
    }

    fn status_of(&self, phase: Phase) -> ServiceStatus {
        ServiceStatus::new(self.key.clone(), phase.state, phase.cause)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = self.phase.lock().get();
        f.debug_struct("Service")
            .field("key", &self.key)
            .field("state", &phase.state)
            .field("cause", &phase.cause)
            .finish()
    }
}
