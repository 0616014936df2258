use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Initial,
    Starting,
    Running,
    Stopping,
    Stopped,
    Resetting,
    Failed,
}

impl State {
    /// Get the state name as used in logs and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Initial => "INITIAL",
            State::Starting => "STARTING",
            State::Running => "RUNNING",
            State::Stopping => "STOPPING",
            State::Stopped => "STOPPED",
            State::Resetting => "RESETTING",
            State::Failed => "FAILED",
        }
    }

    /// Whether a service in this state may carry `cause`.
    ///
    /// INITIAL carries nothing, RESET, or DEPENDENCY_FAILED after a refused
    /// start. STARTING and RUNNING only carry STARTED. STOPPING carries any
    /// stop cause, STOPPED only those that do not end in FAILED. RESETTING
    /// carries RESET and FAILED carries a failure cause.
    pub fn admits(&self, cause: Option<Cause>) -> bool {
        let Some(cause) = cause else {
            return *self == State::Initial;
        };
        match self {
            State::Initial => matches!(cause, Cause::Reset | Cause::DependencyFailed),
            State::Starting | State::Running => cause == Cause::Started,
            State::Stopping => cause.is_stop_cause(),
            State::Stopped => cause.is_stop_cause() && cause.stop_state() == State::Stopped,
            State::Resetting => cause == Cause::Reset,
            State::Failed => cause.is_failure(),
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason the current state was entered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Cause {
    Started,
    Stopped,
    Failed,
    FailedToStart,
    FailedToStop,
    FailedToReset,
    Reset,
    DependencyFailed,
    DependencyStopped,
}

impl Cause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cause::Started => "STARTED",
            Cause::Stopped => "STOPPED",
            Cause::Failed => "FAILED",
            Cause::FailedToStart => "FAILED_TO_START",
            Cause::FailedToStop => "FAILED_TO_STOP",
            Cause::FailedToReset => "FAILED_TO_RESET",
            Cause::Reset => "RESET",
            Cause::DependencyFailed => "DEPENDENCY_FAILED",
            Cause::DependencyStopped => "DEPENDENCY_STOPPED",
        }
    }

    /// Causes that end in FAILED once the transition completes
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Cause::Failed | Cause::FailedToStart | Cause::FailedToStop | Cause::FailedToReset
        )
    }

    /// Causes accepted by `stop_with`
    pub fn is_stop_cause(&self) -> bool {
        matches!(
            self,
            Cause::Stopped
                | Cause::Failed
                | Cause::FailedToStop
                | Cause::DependencyFailed
                | Cause::DependencyStopped
        )
    }

    /// Causes accepted by `start_with`
    pub fn is_start_cause(&self) -> bool {
        *self == Cause::Started
    }

    /// A stop with this cause ends in FAILED rather than STOPPED
    pub(crate) fn stop_state(&self) -> State {
        match self {
            Cause::Failed | Cause::FailedToStop => State::Failed,
            _ => State::Stopped,
        }
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a service instance: the name key plus an instance number, so
/// several instances of the same logical service can coexist
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub name_key: String,
    pub instance: u32,
}

impl ServiceKey {
    pub fn new<S: Into<String>>(name_key: S) -> Self {
        Self::with_instance(name_key, 0)
    }

    pub fn with_instance<S: Into<String>>(name_key: S, instance: u32) -> Self {
        Self {
            name_key: name_key.into(),
            instance,
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name_key, self.instance)
    }
}

/// Immutable snapshot returned from every lifecycle operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: ServiceKey,
    pub state: State,
    /// `None` until the service has made its first transition
    pub cause: Option<Cause>,
}

impl ServiceStatus {
    pub fn new(service: ServiceKey, state: State, cause: Option<Cause>) -> Self {
        Self {
            service,
            state,
            cause,
        }
    }

    pub fn is_running(&self) -> bool {
        self.state == State::Running
    }

    /// Check that state and cause belong together, see [`State::admits`]
    pub fn is_consistent(&self) -> bool {
        self.state.admits(self.cause)
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            Some(cause) => write!(f, "{} {} ({})", self.service, self.state, cause),
            None => write!(f, "{} {}", self.service, self.state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_state_from_cause() {
        assert_eq!(Cause::Failed.stop_state(), State::Failed);
        assert_eq!(Cause::FailedToStop.stop_state(), State::Failed);
        assert_eq!(Cause::Stopped.stop_state(), State::Stopped);
        assert_eq!(Cause::DependencyFailed.stop_state(), State::Stopped);
        assert_eq!(Cause::DependencyStopped.stop_state(), State::Stopped);
    }

    #[test]
    fn test_cause_classification() {
        assert!(Cause::Started.is_start_cause());
        assert!(!Cause::Reset.is_start_cause());
        assert!(!Cause::FailedToStart.is_start_cause());
        assert!(!Cause::Stopped.is_start_cause());
        assert!(!Cause::DependencyStopped.is_start_cause());
        assert!(!Cause::DependencyFailed.is_start_cause());
        assert!(Cause::DependencyStopped.is_stop_cause());
        assert!(!Cause::Started.is_stop_cause());
        assert!(!Cause::FailedToReset.is_stop_cause());
    }

    #[test]
    fn test_status_consistency() {
        let key = ServiceKey::new("cache");
        assert!(ServiceStatus::new(key.clone(), State::Initial, None).is_consistent());
        assert!(ServiceStatus::new(key.clone(), State::Running, Some(Cause::Started)).is_consistent());
        assert!(
            ServiceStatus::new(key.clone(), State::Failed, Some(Cause::FailedToStop)).is_consistent()
        );
        assert!(!ServiceStatus::new(key.clone(), State::Failed, Some(Cause::Started)).is_consistent());
        assert!(!ServiceStatus::new(key.clone(), State::Stopped, Some(Cause::Failed)).is_consistent());
        assert!(ServiceStatus::new(key.clone(), State::Stopping, Some(Cause::Failed)).is_consistent());
        assert!(
            !ServiceStatus::new(key.clone(), State::Stopping, Some(Cause::Started)).is_consistent()
        );
        assert!(!ServiceStatus::new(key.clone(), State::Running, None).is_consistent());
        assert!(
            !ServiceStatus::new(key.clone(), State::Running, Some(Cause::Stopped)).is_consistent()
        );
        assert!(
            !ServiceStatus::new(key.clone(), State::Running, Some(Cause::DependencyFailed))
                .is_consistent()
        );
        assert!(
            !ServiceStatus::new(key.clone(), State::Starting, Some(Cause::Reset)).is_consistent()
        );
        assert!(
            ServiceStatus::new(key.clone(), State::Stopped, Some(Cause::DependencyFailed))
                .is_consistent()
        );
        assert!(
            !ServiceStatus::new(key.clone(), State::Stopped, Some(Cause::Started)).is_consistent()
        );
        assert!(
            !ServiceStatus::new(key.clone(), State::Stopped, Some(Cause::FailedToStop))
                .is_consistent()
        );
        assert!(ServiceStatus::new(key.clone(), State::Initial, Some(Cause::Reset)).is_consistent());
        assert!(
            ServiceStatus::new(key.clone(), State::Initial, Some(Cause::DependencyFailed))
                .is_consistent()
        );
        assert!(!ServiceStatus::new(key, State::Initial, Some(Cause::Stopped)).is_consistent());
    }

    #[test]
    fn test_display_and_serde_names() {
        let status = ServiceStatus::new(
            ServiceKey::with_instance("mail", 2),
            State::Stopped,
            Some(Cause::DependencyStopped),
        );
        assert_eq!(status.to_string(), "mail#2 STOPPED (DEPENDENCY_STOPPED)");

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"DEPENDENCY_STOPPED\""));
        assert!(json.contains("\"STOPPED\""));
    }
}
