use crate::error::BusError;
use crate::events::{EventFilter, ServiceBus, ServiceBusMessage, ServiceEventReceiver};
use crate::status::{ServiceKey, ServiceStatus, State};
use std::collections::{HashMap, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Observes the service bus and keeps the latest status of every service
/// together with a bounded history of transitions
pub struct ServiceMonitor {
    receiver: ServiceEventReceiver,
    latest: HashMap<ServiceKey, ServiceStatus>,
    history: VecDeque<ServiceBusMessage>,
    max_history: usize,
    total: u64,
    failures: u64,
    lagged: u64,
}

impl ServiceMonitor {
    pub fn new(bus: &ServiceBus, max_history: usize) -> Self {
        Self {
            receiver: bus.subscribe_filtered(EventFilter::All, "service_monitor"),
            latest: HashMap::new(),
            history: VecDeque::with_capacity(max_history),
            max_history,
            total: 0,
            failures: 0,
            lagged: 0,
        }
    }

    pub fn record(&mut self, message: ServiceBusMessage) {
        self.total += 1;
        if message.current == State::Failed {
            self.failures += 1;
        }
        self.latest.insert(message.service.clone(), message.status());

        self.history.push_back(message);
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
    }

    /// Record every message already waiting on the bus
    pub fn drain(&mut self) -> usize {
        let mut received = 0;
        loop {
            match self.receiver.try_recv() {
                Ok(Some(message)) => {
                    self.record(message);
                    received += 1;
                }
                Ok(None) | Err(BusError::Closed) => return received,
                Err(BusError::Lagged(n)) => self.lagged += n,
            }
        }
    }

    /// Record messages until `token` is cancelled, then drain what is left
    pub async fn run(&mut self, token: CancellationToken) -> usize {
        info!("Service monitor started");
        let mut received = 0;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                result = self.receiver.recv() => match result {
                    Ok(message) => {
                        self.record(message);
                        received += 1;
                    }
                    Err(BusError::Lagged(n)) => self.lagged += n,
                    Err(BusError::Closed) => {
                        debug!("Service bus closed, monitor stopping");
                        break;
                    }
                },
            }
        }
        received += self.drain();
        info!("Service monitor stopped after {} messages", received);
        received
    }

    pub fn status_of(&self, key: &ServiceKey) -> Option<&ServiceStatus> {
        self.latest.get(key)
    }

    /// Latest known status of every service that has changed state
    pub fn statuses(&self) -> Vec<&ServiceStatus> {
        let mut statuses: Vec<&ServiceStatus> = self.latest.values().collect();
        statuses.sort_by(|a, b| a.service.cmp(&b.service));
        statuses
    }

    pub fn history(&self) -> impl Iterator<Item = &ServiceBusMessage> {
        self.history.iter()
    }

    pub fn history_of(&self, key: &ServiceKey) -> Vec<&ServiceBusMessage> {
        self.history.iter().filter(|m| &m.service == key).collect()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    pub fn lagged(&self) -> u64 {
        self.lagged
    }

    pub fn log_summary(&self) {
        info!("Service monitor summary:");
        info!("  Transitions: {}", self.total);
        info!("  Failures: {}", self.failures);
        if self.lagged > 0 {
            warn!("  Missed: {}", self.lagged);
        }
        for status in self.statuses() {
            info!("  {}", status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StatusSink;
    use crate::status::Cause;
    use std::sync::Arc;
    use tokio::time::{timeout, Duration};

    fn message(name: &str, previous: State, current: State, cause: Cause) -> ServiceBusMessage {
        ServiceBusMessage::new(ServiceKey::new(name), previous, current, cause)
    }

    #[test]
    fn test_drain_records_latest_status() {
        let bus = ServiceBus::new(16);
        let mut monitor = ServiceMonitor::new(&bus, 10);

        bus.publish(&message("db", State::Initial, State::Starting, Cause::Started));
        bus.publish(&message("db", State::Starting, State::Failed, Cause::FailedToStart));
        bus.publish(&message("web", State::Initial, State::Starting, Cause::Started));

        assert_eq!(monitor.drain(), 3);
        assert_eq!(monitor.total(), 3);
        assert_eq!(monitor.failures(), 1);

        let db = monitor.status_of(&ServiceKey::new("db")).unwrap();
        assert_eq!(db.state, State::Failed);
        assert_eq!(db.cause, Some(Cause::FailedToStart));
        assert_eq!(monitor.history_of(&ServiceKey::new("db")).len(), 2);
        assert_eq!(monitor.statuses().len(), 2);
    }

    #[test]
    fn test_history_is_bounded() {
        let bus = ServiceBus::new(64);
        let mut monitor = ServiceMonitor::new(&bus, 3);

        for _ in 0..5 {
            monitor.record(message("db", State::Running, State::Stopping, Cause::Stopped));
        }
        assert_eq!(monitor.history().count(), 3);
        assert_eq!(monitor.total(), 5);
    }

    #[tokio::test]
    async fn test_run_until_cancelled() {
        use crate::registry::ServiceRegistry;
        use crate::service::{Service, ServiceLogic};

        struct Noop;
        impl ServiceLogic for Noop {
            fn do_start(&self) -> anyhow::Result<()> {
                Ok(())
            }
            fn do_stop(&self) -> anyhow::Result<()> {
                Ok(())
            }
        }

        let registry = Arc::new(ServiceRegistry::new(ServiceBus::new(64)));
        let mut monitor = ServiceMonitor::new(registry.bus(), 100);
        let token = CancellationToken::new();

        let handle = {
            let token = token.clone();
            tokio::spawn(async move {
                monitor.run(token).await;
                monitor
            })
        };

        let service = Service::builder("db").registry(&registry).build(Noop).unwrap();
        service.start().unwrap();
        service.stop().unwrap();
        token.cancel();

        let monitor = timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(monitor.total(), 4);
        let status = monitor.status_of(service.key()).unwrap();
        assert_eq!(status.state, State::Stopped);
    }
}
