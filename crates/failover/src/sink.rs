//! Outage and recovery events, and where they go.

use parking_lot::Mutex;
use std::fmt;
use tracing::{error, info};

/// Severity of a failover event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "INFO"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Event emitted by the monitor on outage detection or recovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailoverEvent {
    /// Service went down (first detection or a throttled repeat)
    Outage { service: String },
    /// Service came back and recovery completed
    Recovered { service: String },
}

impl FailoverEvent {
    pub fn severity(&self) -> Severity {
        match self {
            FailoverEvent::Outage { .. } => Severity::Critical,
            FailoverEvent::Recovered { .. } => Severity::Info,
        }
    }

    pub fn service(&self) -> &str {
        match self {
            FailoverEvent::Outage { service } | FailoverEvent::Recovered { service } => service,
        }
    }

    pub fn message(&self) -> String {
        match self {
            FailoverEvent::Outage { service } => format!("{service} outage. Failover initiated."),
            FailoverEvent::Recovered { service } => {
                format!("{service} is back up. Recovery complete.")
            }
        }
    }
}

/// Receiver of failover events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &FailoverEvent);
}

/// Writes events to `tracing`; CRITICAL maps to ERROR level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &FailoverEvent) {
        match event.severity() {
            Severity::Critical => error!(
                service = event.service(),
                severity = %Severity::Critical,
                "{}",
                event.message()
            ),
            Severity::Info => info!(
                service = event.service(),
                severity = %Severity::Info,
                "{}",
                event.message()
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CapturingSink {
    events: Mutex<Vec<FailoverEvent>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<FailoverEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Number of captured events with the given severity
    pub fn count(&self, severity: Severity) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.severity() == severity)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CapturingSink {
    fn emit(&self, event: &FailoverEvent) {
        self.events.lock().push(event.clone());
    }
}
