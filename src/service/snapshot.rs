use super::Phase;
use crate::status::{Cause, ServiceKey, State};
use serde::{Deserialize, Serialize};

/// Persisted form of a service, used to revive it in another process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub key: ServiceKey,
    pub description_key: Option<String>,
    pub state: State,
    pub cause: Option<Cause>,
}

impl ServiceSnapshot {
    /// Phase a revived service starts in.
    ///
    /// None of the hooks have run in the reviving process, so a service that
    /// was running or mid-transition is brought back in the nearest state
    /// that does not claim work is in progress.
    pub(super) fn revived_phase(&self) -> Phase {
        let (state, cause) = match self.state {
            State::Initial => {
                return Phase {
                    state: State::Initial,
                    cause: self.cause.filter(|c| State::Initial.admits(Some(*c))),
                }
            }
            State::Starting => return Phase::INITIAL,
            State::Running | State::Stopping => (State::Stopped, Cause::Stopped),
            State::Resetting => (State::Failed, Cause::FailedToReset),
            State::Stopped => (
                State::Stopped,
                self.cause
                    .filter(|c| State::Stopped.admits(Some(*c)))
                    .unwrap_or(Cause::Stopped),
            ),
            State::Failed => (
                State::Failed,
                self.cause.filter(Cause::is_failure).unwrap_or(Cause::Failed),
            ),
        };
        Phase {
            state,
            cause: Some(cause),
        }
    }
}
