//! Per-service outage state machine.
//!
//! ```text
//! HEALTHY --ping ok-->   HEALTHY
//! HEALTHY --ping fail--> OUTAGE   (failover, log CRITICAL)
//! OUTAGE  --ping fail--> OUTAGE   (log CRITICAL once per logging interval)
//! OUTAGE  --ping ok-->   HEALTHY  (recover, log INFO)
//! ```

use crate::types::{ServiceStats, ServiceStatus};
use std::time::{Duration, Instant};

/// What the monitor must do after a ping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    StayHealthy,
    EnterOutage,
    StayDown { log: bool },
    Recover,
}

#[derive(Debug, Default)]
pub(crate) struct ServiceState {
    pub(crate) status: ServiceStatus,
    pub(crate) last_ping_at: Option<Instant>,
    pub(crate) last_outage_logged_at: Option<Instant>,
    pub(crate) stats: ServiceStats,
}

impl ServiceState {
    pub(crate) fn is_due(&self, now: Instant, interval: Duration) -> bool {
        match self.last_ping_at {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= interval,
        }
    }

    /// Record a completed ping and decide the transition. Nothing but the
    /// ping bookkeeping changes until the caller commits the transition.
    pub(crate) fn record_ping(
        &mut self,
        now: Instant,
        healthy: bool,
        outage_logging_interval: Duration,
    ) -> Transition {
        self.last_ping_at = Some(now);
        self.stats.record_ping(healthy);

        match (self.status, healthy) {
            (ServiceStatus::Healthy, true) => Transition::StayHealthy,
            (ServiceStatus::Healthy, false) => Transition::EnterOutage,
            (ServiceStatus::Outage, true) => Transition::Recover,
            (ServiceStatus::Outage, false) => Transition::StayDown {
                log: self.outage_log_due(now, outage_logging_interval),
            },
        }
    }

    fn outage_log_due(&self, now: Instant, interval: Duration) -> bool {
        self.last_outage_logged_at
            .is_none_or(|logged| now.saturating_duration_since(logged) >= interval)
    }

    pub(crate) fn enter_outage(&mut self, now: Instant) {
        self.status = ServiceStatus::Outage;
        self.stats.failovers += 1;
        self.outage_logged(now);
    }

    pub(crate) fn outage_logged(&mut self, now: Instant) {
        self.last_outage_logged_at = Some(now);
        self.stats.outage_logs += 1;
    }

    pub(crate) fn recover(&mut self) {
        self.status = ServiceStatus::Healthy;
        self.last_outage_logged_at = None;
        self.stats.recoveries += 1;
    }
}
