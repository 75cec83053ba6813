//! In-process health monitoring and failover for service dependencies.
//!
//! Each registered [`Service`] (a database replica, a cache, a message
//! broker) is pinged on its own cadence. A failed ping moves the service
//! into outage and runs its failover action; a later successful ping runs
//! its recovery action. Outages are reported as CRITICAL events, repeated
//! at most once per outage logging interval while the service stays down,
//! and recoveries as INFO events.
//!
//! # Features
//!
//! - Per-service monitoring, outage and error intervals (zero pings on
//!   every tick)
//! - Debounced outage events
//! - Exception bridge: an outage-indicating error logged anywhere in the
//!   host triggers an immediate tick
//! - YAML configuration and a tokio scheduler
//!
//! # Example
//!
//! ```no_run
//! use failover::{ErrorKind, ExceptionBridge, FnService, Monitor, Registry, ServiceSettings};
//! use std::sync::Arc;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Arc::new(Registry::new());
//! registry.register(
//!     Arc::new(
//!         FnService::new("database replica")
//!             .on_ping(|| Ok(()))
//!             .on_failover(|| Ok(()))
//!             .on_recover(|| Ok(())),
//!     ),
//!     ServiceSettings::default(),
//! )?;
//!
//! let monitor = Arc::new(Monitor::new(registry));
//! monitor.classification().insert("io".parse()?);
//!
//! // Driven by a scheduler or called directly
//! monitor.tick(None)?;
//!
//! // Errors seen elsewhere in the host
//! let bridge = ExceptionBridge::new(monitor.clone());
//! let err = std::io::Error::from(std::io::ErrorKind::ConnectionRefused);
//! bridge.observe_error(&err)?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod classify;
pub mod clock;
pub mod config;
pub mod monitor;
pub mod registry;
pub mod scheduler;
pub mod service;
pub mod sink;
mod state;
pub mod types;

pub use bridge::{BridgeLayer, ExceptionBridge};
pub use classify::{
    Classified, ErrorKind, KindExtractor, KindSet, OutageClassification, extractor,
    kinds_in_chain, kinds_in_chain_with,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use common::{Error, Result};
pub use config::{ConfigError, FailoverConfig};
pub use monitor::Monitor;
pub use registry::{MonitoredService, Registry};
pub use scheduler::Scheduler;
pub use service::{FnService, RecordingService, Service};
pub use sink::{CapturingSink, EventSink, FailoverEvent, Severity, TracingSink};
pub use types::{
    CheckOutcome, ServiceSettings, ServiceSnapshot, ServiceStats, ServiceStatus, TickReport,
};
