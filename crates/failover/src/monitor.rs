//! The monitor loop: one tick visits every registered service, decides
//! whether it is due, pings it and drives its outage state machine.

use crate::classify::{ErrorKind, OutageClassification};
use crate::clock::{Clock, SystemClock};
use crate::registry::{MonitoredService, Registry};
use crate::service::Service;
use crate::sink::{EventSink, FailoverEvent, TracingSink};
use crate::state::Transition;
use crate::types::{
    CheckOutcome, MAX_INTERVAL, ServiceOutcome, ServiceSnapshot, ServiceStatus, TickReport,
};
use common::{Error, Result};
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Default minimum spacing between repeated outage events for a service
/// that stays down.
pub const DEFAULT_OUTAGE_LOGGING_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Health monitor driving failover and recovery for a [`Registry`].
///
/// The monitor owns no thread; callers drive it through [`Monitor::tick`],
/// either from a [`crate::Scheduler`] or from the exception bridge.
pub struct Monitor {
    registry: Arc<Registry>,
    classification: Arc<OutageClassification>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn EventSink>,
    outage_logging_interval: RwLock<Duration>,
}

impl Monitor {
    /// Create a monitor with an empty classification, the system clock and
    /// events written to `tracing`.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            classification: Arc::new(OutageClassification::default()),
            clock: Arc::new(SystemClock),
            sink: Arc::new(TracingSink),
            outage_logging_interval: RwLock::new(DEFAULT_OUTAGE_LOGGING_INTERVAL),
        }
    }

    pub fn with_classification(mut self, classification: Arc<OutageClassification>) -> Self {
        self.classification = classification;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_outage_logging_interval(self, interval: Duration) -> Result<Self> {
        self.set_outage_logging_interval(interval)?;
        Ok(self)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn classification(&self) -> &Arc<OutageClassification> {
        &self.classification
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn outage_logging_interval(&self) -> Duration {
        *self.outage_logging_interval.read()
    }

    /// Change the shared outage logging interval. Services with their own
    /// override are unaffected.
    pub fn set_outage_logging_interval(&self, interval: Duration) -> Result<()> {
        if interval > MAX_INTERVAL {
            return Err(Error::config(format!(
                "outage logging interval {interval:?} exceeds {MAX_INTERVAL:?}"
            )));
        }
        *self.outage_logging_interval.write() = interval;
        Ok(())
    }

    pub fn is_outage_indicating(&self, kind: &ErrorKind) -> bool {
        self.classification.is_outage_indicating(kind)
    }

    /// Run one pass over every registered service.
    ///
    /// When `trigger` is an outage-indicating kind, services are gated by
    /// their error interval for this pass only. Ping failures never escape;
    /// failover or recovery errors are returned once every service has been
    /// visited.
    pub fn tick(&self, trigger: Option<&ErrorKind>) -> Result<TickReport> {
        let escalated = trigger.is_some_and(|kind| self.is_outage_indicating(kind));
        if let Some(kind) = trigger {
            debug!(kind = %kind, escalated, "Tick triggered by error");
        }

        let mut errors = Vec::new();
        let outcomes = self
            .registry
            .all()
            .iter()
            .map(|entry| ServiceOutcome {
                service: entry.name().to_string(),
                outcome: self.check(entry, escalated, &mut errors),
            })
            .collect();

        let report = TickReport {
            trigger: trigger.cloned(),
            escalated,
            outcomes,
        };

        match Error::collect(errors) {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    /// Snapshots of every registered service in registration order.
    pub fn snapshot(&self) -> Vec<ServiceSnapshot> {
        let now = self.clock.now();
        self.registry
            .all()
            .iter()
            .map(|entry| entry.snapshot(now))
            .collect()
    }

    fn check(
        &self,
        entry: &MonitoredService,
        escalated: bool,
        errors: &mut Vec<Error>,
    ) -> CheckOutcome {
        let name = entry.name();

        // Held for the whole check so two ticks never ping or fail over the
        // same service at once.
        let Some(mut state) = entry.state.try_lock() else {
            debug!(service = name, "Service is being checked by another tick");
            return CheckOutcome::Busy;
        };

        let settings = entry.settings();
        let interval = if escalated {
            settings.error_interval
        } else if state.status == ServiceStatus::Outage {
            settings.outage_interval
        } else {
            settings.monitoring_interval
        };

        let now = self.clock.now();
        if !state.is_due(now, interval) {
            return CheckOutcome::NotDue;
        }

        let healthy = ping(entry.service().as_ref());
        let logging_interval = settings
            .outage_logging_interval
            .unwrap_or_else(|| self.outage_logging_interval());

        match state.record_ping(now, healthy, logging_interval) {
            Transition::StayHealthy => CheckOutcome::Healthy,
            Transition::StayDown { log } => {
                if log {
                    self.emit_outage(name);
                    state.outage_logged(now);
                }
                CheckOutcome::StillDown
            }
            Transition::EnterOutage => match entry.service().failover() {
                Ok(()) => {
                    state.enter_outage(now);
                    self.emit_outage(name);
                    CheckOutcome::FailedOver
                }
                Err(e) => {
                    error!(service = name, error = %format!("{e:#}"), "Failover failed");
                    errors.push(Error::failover(name, format!("{e:#}")));
                    CheckOutcome::ActionFailed
                }
            },
            Transition::Recover => match entry.service().recover() {
                Ok(()) => {
                    state.recover();
                    self.sink.emit(&FailoverEvent::Recovered {
                        service: name.to_string(),
                    });
                    CheckOutcome::Recovered
                }
                Err(e) => {
                    error!(service = name, error = %format!("{e:#}"), "Recovery failed");
                    errors.push(Error::recovery(name, format!("{e:#}")));
                    CheckOutcome::ActionFailed
                }
            },
        }
    }

    fn emit_outage(&self, name: &str) {
        self.sink.emit(&FailoverEvent::Outage {
            service: name.to_string(),
        });
    }
}

/// Ping a service, treating an error and a panic alike as a failure.
fn ping(service: &dyn Service) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(|| service.ping())) {
        Ok(Ok(())) => {
            debug!(service = service.name(), "Ping succeeded");
            true
        }
        Ok(Err(e)) => {
            warn!(service = service.name(), error = %format!("{e:#}"), "Ping failed");
            false
        }
        Err(payload) => {
            warn!(
                service = service.name(),
                panic = panic_message(payload.as_ref()),
                "Ping panicked"
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
