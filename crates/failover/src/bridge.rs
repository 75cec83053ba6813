//! Exception bridge: lets errors logged anywhere in the host trigger an
//! immediate monitor tick.
//!
//! Hosts either call [`ExceptionBridge::observe_error`] from their error
//! path, or install [`BridgeLayer`] in their `tracing` subscriber and tag
//! error events with the kind:
//!
//! ```ignore
//! tracing::error!(error.kind = %ErrorKind::from(err.kind()), "query failed: {err}");
//! ```

use crate::classify::{Classified, ErrorKind, KindExtractor, extractor, kinds_in_chain_with};
use crate::monitor::Monitor;
use crate::types::TickReport;
use common::Result;
use std::cell::Cell;
use std::error::Error as StdError;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::dispatcher::{self, Dispatch, WeakDispatch};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber, debug, error};
use tracing_subscriber::layer::{Context, Layer};

/// Event fields read as the error kind.
const KIND_FIELDS: [&str; 2] = ["error.kind", "error_kind"];

const OWN_TARGET: &str = env!("CARGO_CRATE_NAME");

thread_local! {
    static IN_BRIDGE: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running a bridge-triggered tick.
struct ReentryGuard;

impl ReentryGuard {
    fn enter() -> Option<Self> {
        IN_BRIDGE.with(|active| {
            if active.get() {
                None
            } else {
                active.set(true);
                Some(ReentryGuard)
            }
        })
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        IN_BRIDGE.with(|active| active.set(false));
    }
}

/// Turns outage-indicating errors into monitor ticks.
pub struct ExceptionBridge {
    monitor: Arc<Monitor>,
    extractors: Vec<KindExtractor>,
}

impl ExceptionBridge {
    pub fn new(monitor: Arc<Monitor>) -> Self {
        Self {
            monitor,
            extractors: Vec::new(),
        }
    }

    /// Let [`ExceptionBridge::observe_error`] classify host errors of type `T`
    /// found anywhere in a source chain.
    pub fn with_error_type<T>(mut self) -> Self
    where
        T: Classified + StdError + 'static,
    {
        self.extractors.push(extractor::<T>());
        self
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn is_outage_indicating(&self, kind: &ErrorKind) -> bool {
        self.monitor.is_outage_indicating(kind)
    }

    /// Observe an error of `kind` logged at `level`.
    ///
    /// Runs one tick, synchronously, when the level is ERROR and the kind is
    /// classified. Returns `Ok(None)` when nothing ran, including when called
    /// again from inside a tick this bridge started on the same thread.
    pub fn observe(&self, level: Level, kind: &ErrorKind) -> Result<Option<TickReport>> {
        if level != Level::ERROR || !self.is_outage_indicating(kind) {
            return Ok(None);
        }
        let Some(_guard) = ReentryGuard::enter() else {
            return Ok(None);
        };

        debug!(kind = %kind, "Outage-indicating error observed");
        self.monitor.tick(Some(kind)).map(Some)
    }

    /// Observe an error value, classifying every error in its source chain.
    ///
    /// `std::io::Error` is always recognized; other types only once added
    /// through [`ExceptionBridge::with_error_type`].
    pub fn observe_error(&self, err: &(dyn StdError + 'static)) -> Result<Option<TickReport>> {
        match kinds_in_chain_with(err, &self.extractors)
            .into_iter()
            .find(|kind| self.is_outage_indicating(kind))
        {
            Some(kind) => self.observe(Level::ERROR, &kind),
            None => Ok(None),
        }
    }

    /// A `tracing` layer feeding ERROR events into this bridge.
    pub fn layer(self: &Arc<Self>) -> BridgeLayer {
        BridgeLayer::new(self.clone())
    }
}

/// `tracing_subscriber` layer that inspects ERROR events for an
/// `error.kind` field and hands classified ones to the bridge.
///
/// Events emitted by this crate are ignored.
///
/// The tick runs while the host's event is still being dispatched, where
/// `tracing` drops nested events under a scoped default. The layer keeps a
/// handle to the subscriber it was registered with and re-enters it for the
/// tick, so outage events and action failures still reach every layer.
#[derive(Clone)]
pub struct BridgeLayer {
    bridge: Arc<ExceptionBridge>,
    dispatch: OnceLock<WeakDispatch>,
}

impl BridgeLayer {
    pub fn new(bridge: Arc<ExceptionBridge>) -> Self {
        Self {
            bridge,
            dispatch: OnceLock::new(),
        }
    }

    fn observe(&self, kind: &ErrorKind) {
        if let Err(e) = self.bridge.observe(Level::ERROR, kind) {
            error!(kind = %kind, error = %e, "Error-triggered monitor tick failed");
        }
    }
}

impl<S: Subscriber> Layer<S> for BridgeLayer {
    fn on_register_dispatch(&self, subscriber: &Dispatch) {
        // Weak: the subscriber owns this layer.
        let _ = self.dispatch.set(subscriber.downgrade());
    }

    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() != Level::ERROR || is_own_target(metadata.target()) {
            return;
        }

        let mut visitor = KindVisitor::default();
        event.record(&mut visitor);
        let Some(kind) = visitor.kind.and_then(|raw| ErrorKind::new(raw).ok()) else {
            return;
        };

        match self.dispatch.get().and_then(WeakDispatch::upgrade) {
            Some(dispatch) => dispatcher::with_default(&dispatch, || self.observe(&kind)),
            None => self.observe(&kind),
        }
    }
}

fn is_own_target(target: &str) -> bool {
    target == OWN_TARGET
        || target
            .strip_prefix(OWN_TARGET)
            .is_some_and(|rest| rest.starts_with("::"))
}

#[derive(Default)]
struct KindVisitor {
    kind: Option<String>,
}

impl Visit for KindVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if KIND_FIELDS.contains(&field.name()) {
            self.kind = Some(value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if KIND_FIELDS.contains(&field.name()) {
            self.kind = Some(format!("{value:?}"));
        }
    }
}
