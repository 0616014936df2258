use crate::error::BusError;
use crate::status::{Cause, ServiceKey, ServiceStatus, State};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// A realized state change of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceBusMessage {
    pub service: ServiceKey,
    pub previous: State,
    pub current: State,
    pub cause: Cause,
    pub timestamp: DateTime<Utc>,
}

impl ServiceBusMessage {
    pub fn new(service: ServiceKey, previous: State, current: State, cause: Cause) -> Self {
        Self {
            service,
            previous,
            current,
            cause,
            timestamp: Utc::now(),
        }
    }

    /// Status of the service right after this change
    pub fn status(&self) -> ServiceStatus {
        ServiceStatus::new(self.service.clone(), self.current, Some(self.cause))
    }

    /// Get a human-readable description of the change
    pub fn description(&self) -> String {
        format!(
            "{} changed from {} to {} ({})",
            self.service, self.previous, self.current, self.cause
        )
    }
}

/// Receives one message per realized transition, in order.
///
/// Called while the publishing service holds its exclusive section, so an
/// implementation must not block on that service and must not panic.
pub trait StatusSink: Send + Sync {
    fn publish(&self, message: &ServiceBusMessage);
}

/// Sink that drops every message
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardSink;

impl StatusSink for DiscardSink {
    fn publish(&self, message: &ServiceBusMessage) {
        debug!("Discarding status change: {}", message.description());
    }
}

/// Broadcast bus shared by all services of a registry
#[derive(Debug, Clone)]
pub struct ServiceBus {
    sender: broadcast::Sender<ServiceBusMessage>,
    debug_logging: bool,
}

impl ServiceBus {
    /// Create a new bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceBusMessage> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter applied on receipt
    pub fn subscribe_filtered<S: Into<String>>(
        &self,
        filter: EventFilter,
        name: S,
    ) -> ServiceEventReceiver {
        ServiceEventReceiver::new(self.sender.subscribe(), filter, name.into())
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl StatusSink for ServiceBus {
    fn publish(&self, message: &ServiceBusMessage) {
        if self.debug_logging {
            debug!("Publishing: {}", message.description());
        }

        match message.current {
            State::Failed => error!("Service {} failed: {}", message.service, message.cause),
            State::Running => info!("Service {} is running", message.service),
            _ => {}
        }

        // No receivers is not an error for the publishing service
        if self.sender.send(message.clone()).is_err() {
            debug!(
                "No subscribers for status change of {}",
                message.service
            );
        }
    }
}

/// Event filter for selective handling of bus messages
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    /// Only messages from these services
    Services(Vec<ServiceKey>),
    /// Only messages entering one of these states
    States(Vec<State>),
    /// Only messages entering FAILED
    Failures,
    Custom(fn(&ServiceBusMessage) -> bool),
}

impl EventFilter {
    pub fn matches(&self, message: &ServiceBusMessage) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Services(services) => services.contains(&message.service),
            EventFilter::States(states) => states.contains(&message.current),
            EventFilter::Failures => message.current == State::Failed,
            EventFilter::Custom(filter_fn) => filter_fn(message),
        }
    }
}

/// Bus receiver that skips messages its filter rejects
pub struct ServiceEventReceiver {
    receiver: broadcast::Receiver<ServiceBusMessage>,
    filter: EventFilter,
    name: String,
}

impl ServiceEventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<ServiceBusMessage>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive the next matching message
    pub async fn recv(&mut self) -> Result<ServiceBusMessage, BusError> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => {
                    if self.filter.matches(&message) {
                        debug!("Receiver '{}' received: {}", self.name, message.description());
                        return Ok(message);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} messages", self.name, n);
                    return Err(BusError::Lagged(n));
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Service bus closed for receiver '{}'", self.name);
                    return Err(BusError::Closed);
                }
            }
        }
    }

    /// Receive a matching message without blocking
    pub fn try_recv(&mut self) -> Result<Option<ServiceBusMessage>, BusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(message) => {
                    if self.filter.matches(&message) {
                        return Ok(Some(message));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} messages", self.name, n);
                    return Err(BusError::Lagged(n));
                }
                Err(broadcast::error::TryRecvError::Closed) => return Err(BusError::Closed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn message(name: &str, previous: State, current: State, cause: Cause) -> ServiceBusMessage {
        ServiceBusMessage::new(ServiceKey::new(name), previous, current, cause)
    }

    #[tokio::test]
    async fn test_bus_delivers_to_all_subscribers() {
        let bus = ServiceBus::new(10);
        let mut receiver1 = bus.subscribe();
        let mut receiver2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(&message("db", State::Initial, State::Starting, Cause::Started));

        let first = timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        let second = timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first.current, State::Starting);
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = ServiceBus::with_debug_logging(4);
        assert!(!bus.has_subscribers());
        bus.publish(&message("db", State::Running, State::Stopping, Cause::Stopped));
    }

    #[test]
    fn test_event_filter() {
        let failed = message("db", State::Stopping, State::Failed, Cause::FailedToStop);
        let running = message("web", State::Starting, State::Running, Cause::Started);

        assert!(EventFilter::Failures.matches(&failed));
        assert!(!EventFilter::Failures.matches(&running));
        assert!(EventFilter::Services(vec![ServiceKey::new("web")]).matches(&running));
        assert!(!EventFilter::Services(vec![ServiceKey::new("web")]).matches(&failed));
        assert!(EventFilter::States(vec![State::Running]).matches(&running));
        assert!(EventFilter::Custom(|m| m.cause == Cause::FailedToStop).matches(&failed));
    }

    #[tokio::test]
    async fn test_filtered_receiver_skips_rejected_messages() {
        let bus = ServiceBus::new(10);
        let mut receiver = bus.subscribe_filtered(EventFilter::Failures, "failures");

        bus.publish(&message("web", State::Starting, State::Running, Cause::Started));
        bus.publish(&message("db", State::Starting, State::Failed, Cause::FailedToStart));

        let received = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.service, ServiceKey::new("db"));
        assert_eq!(received.cause, Cause::FailedToStart);
        assert_eq!(receiver.try_recv().unwrap(), None);
    }

    #[test]
    fn test_try_recv_reports_lag() {
        let bus = ServiceBus::new(2);
        let mut receiver = bus.subscribe_filtered(EventFilter::All, "slow");

        for _ in 0..5 {
            bus.publish(&message("db", State::Initial, State::Starting, Cause::Started));
        }

        assert_eq!(receiver.try_recv(), Err(BusError::Lagged(3)));
        assert!(receiver.try_recv().unwrap().is_some());
    }

    #[test]
    fn test_message_round_trips_through_json() {
        let original = message("db", State::Running, State::Stopping, Cause::DependencyFailed);
        let json = serde_json::to_string(&original).unwrap();
        let decoded: ServiceBusMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.status().state, State::Stopping);
    }
}
