//! The monitored service contract and adapter helpers.

use crate::clock::Clock;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// A monitored dependency.
///
/// `ping` reports health and must not touch shared configuration; all side
/// effects belong in `failover` and `recover`, which must be idempotent.
/// A `ping` that panics is treated exactly like one returning `Err`.
/// Implementations are expected to bound their own latency.
pub trait Service: Send + Sync {
    /// Human-readable name used in log messages
    fn name(&self) -> &str;

    /// Perform one health check against the backing dependency
    fn ping(&self) -> anyhow::Result<()>;

    /// Route consumers away from the dependency
    fn failover(&self) -> anyhow::Result<()>;

    /// Restore the original configuration
    fn recover(&self) -> anyhow::Result<()>;
}

impl<T: Service + ?Sized> Service for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn ping(&self) -> anyhow::Result<()> {
        (**self).ping()
    }

    fn failover(&self) -> anyhow::Result<()> {
        (**self).failover()
    }

    fn recover(&self) -> anyhow::Result<()> {
        (**self).recover()
    }
}

type Action = Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

/// Service assembled from closures.
///
/// Every action defaults to succeeding without doing anything, so a
/// service with nothing to fail over (a cache that is simply bypassed)
/// only needs `on_ping`.
pub struct FnService {
    name: String,
    ping: Action,
    failover: Action,
    recover: Action,
}

impl FnService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ping: Box::new(|| Ok(())),
            failover: Box::new(|| Ok(())),
            recover: Box::new(|| Ok(())),
        }
    }

    pub fn on_ping(mut self, f: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        self.ping = Box::new(f);
        self
    }

    pub fn on_failover(
        mut self,
        f: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.failover = Box::new(f);
        self
    }

    pub fn on_recover(mut self, f: impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        self.recover = Box::new(f);
        self
    }
}

impl fmt::Debug for FnService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnService").field("name", &self.name).finish()
    }
}

impl Service for FnService {
    fn name(&self) -> &str {
        &self.name
    }

    fn ping(&self) -> anyhow::Result<()> {
        (self.ping)()
    }

    fn failover(&self) -> anyhow::Result<()> {
        (self.failover)()
    }

    fn recover(&self) -> anyhow::Result<()> {
        (self.recover)()
    }
}

/// Decorator that records when each ping started, then forwards to the
/// wrapped service.
pub struct RecordingService<S> {
    inner: S,
    clock: Arc<dyn Clock>,
    pings: Mutex<Vec<Instant>>,
}

impl<S: Service> RecordingService<S> {
    pub fn new(inner: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            clock,
            pings: Mutex::new(Vec::new()),
        }
    }

    /// Start instants of every ping so far
    pub fn pings(&self) -> Vec<Instant> {
        self.pings.lock().clone()
    }

    pub fn ping_count(&self) -> usize {
        self.pings.lock().len()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: Service> Service for RecordingService<S> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn ping(&self) -> anyhow::Result<()> {
        self.pings.lock().push(self.clock.now());
        self.inner.ping()
    }

    fn failover(&self) -> anyhow::Result<()> {
        self.inner.failover()
    }

    fn recover(&self) -> anyhow::Result<()> {
        self.inner.recover()
    }
}
