//! Service state, settings and report types.

use crate::classify::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Longest interval accepted for any ping or logging cadence.
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Health status of a monitored service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Service answers its pings; consumers use the primary configuration
    #[default]
    Healthy,
    /// Service failed a ping; consumers have been failed over
    Outage,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Healthy => write!(f, "HEALTHY"),
            ServiceStatus::Outage => write!(f, "OUTAGE"),
        }
    }
}

/// Ping cadence for a single service.
///
/// A zero interval means the service is pinged on every tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_logging_override"))]
pub struct ServiceSettings {
    /// Interval between pings while healthy
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_interval")]
    pub monitoring_interval: Duration,

    /// Interval between pings while in outage
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_interval")]
    pub outage_interval: Duration,

    /// Interval between pings on a tick triggered by an outage-indicating error
    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_interval")]
    pub error_interval: Duration,

    /// Per-service override of the monitor's outage logging interval
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub outage_logging_interval: Option<Duration>,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            monitoring_interval: Duration::from_secs(60),
            outage_interval: Duration::from_secs(10),
            error_interval: Duration::from_secs(5),
            outage_logging_interval: None,
        }
    }
}

impl ServiceSettings {
    /// Settings that ping on every tick, whatever the path.
    pub fn every_tick() -> Self {
        Self {
            monitoring_interval: Duration::ZERO,
            outage_interval: Duration::ZERO,
            error_interval: Duration::ZERO,
            outage_logging_interval: None,
        }
    }
}

fn validate_interval(interval: &Duration) -> Result<(), ValidationError> {
    if *interval > MAX_INTERVAL {
        return Err(ValidationError::new("interval_out_of_range"));
    }
    Ok(())
}

fn validate_logging_override(settings: &ServiceSettings) -> Result<(), ValidationError> {
    match settings.outage_logging_interval {
        Some(interval) => validate_interval(&interval),
        None => Ok(()),
    }
}

/// Per-service counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Total pings performed
    pub total_pings: u64,

    /// Pings that failed or panicked
    pub failed_pings: u64,

    /// Current consecutive successful pings
    pub consecutive_successes: u32,

    /// Current consecutive failed pings
    pub consecutive_failures: u32,

    /// Completed failovers
    pub failovers: u64,

    /// Completed recoveries
    pub recoveries: u64,

    /// Outage events emitted, including repeats while still down
    pub outage_logs: u64,
}

impl ServiceStats {
    /// Update counters with a ping result
    pub fn record_ping(&mut self, healthy: bool) {
        self.total_pings += 1;

        if healthy {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.failed_pings += 1;
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
        }
    }
}

/// What a tick did with one service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Interval has not elapsed; nothing happened
    NotDue,
    /// Another tick was processing the service; skipped
    Busy,
    /// Ping succeeded and the service stays healthy
    Healthy,
    /// Ping failed and the service stays in outage
    StillDown,
    /// Ping failed and failover completed
    FailedOver,
    /// Ping succeeded and recovery completed
    Recovered,
    /// Ping ran but the failover or recovery action returned an error
    ActionFailed,
}

impl CheckOutcome {
    /// Whether the service was pinged on this tick
    pub fn pinged(self) -> bool {
        !matches!(self, CheckOutcome::NotDue | CheckOutcome::Busy)
    }
}

/// Outcome for a single service within a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOutcome {
    pub service: String,
    pub outcome: CheckOutcome,
}

/// Result of one monitor pass
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    /// Error kind that triggered this tick, if any
    pub trigger: Option<ErrorKind>,

    /// Whether the trigger was outage-indicating, selecting the error interval
    pub escalated: bool,

    /// Per-service outcomes in registration order
    pub outcomes: Vec<ServiceOutcome>,
}

impl TickReport {
    /// Number of services pinged on this tick
    pub fn pinged(&self) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.pinged()).count()
    }

    /// Outcome for the named service
    pub fn outcome(&self, service: &str) -> Option<CheckOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.service == service)
            .map(|o| o.outcome)
    }
}

/// Point-in-time view of a registered service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub status: ServiceStatus,
    pub settings: ServiceSettings,
    pub stats: ServiceStats,

    /// Time since the last completed ping
    #[serde(with = "humantime_serde")]
    pub since_last_ping: Option<Duration>,
}
