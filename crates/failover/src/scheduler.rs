//! Periodic driver for the monitor loop.

use crate::config::MonitorSettings;
use crate::monitor::Monitor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

/// Ticks a [`Monitor`] on a fixed cadence from a tokio task.
///
/// Ticks run on the blocking pool since service adapters may block.
pub struct Scheduler {
    monitor: Arc<Monitor>,
    tick_interval: Duration,
    stop_signal: Arc<Notify>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(monitor: Arc<Monitor>, tick_interval: Duration) -> Self {
        Self {
            monitor,
            tick_interval,
            stop_signal: Arc::new(Notify::new()),
        }
    }

    pub fn from_settings(monitor: Arc<Monitor>, settings: &MonitorSettings) -> Self {
        Self::new(monitor, settings.tick_interval)
    }

    /// Start ticking. The first tick runs immediately.
    pub fn start(&self) -> JoinHandle<()> {
        let monitor = self.monitor.clone();
        let stop_signal = self.stop_signal.clone();
        let period = self.tick_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(tick_interval_ms = period.as_millis(), "Failover scheduler started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::run_tick(&monitor).await;
                    }
                    _ = stop_signal.notified() => {
                        info!("Failover scheduler stopping");
                        break;
                    }
                }
            }
        })
    }

    /// Stop ticking after the tick in progress, if any
    pub fn stop(&self) {
        self.stop_signal.notify_one();
    }

    async fn run_tick(monitor: &Arc<Monitor>) {
        let monitor = monitor.clone();
        match tokio::task::spawn_blocking(move || monitor.tick(None)).await {
            Ok(Ok(report)) => {
                debug!(pinged = report.pinged(), "Scheduled tick complete");
            }
            Ok(Err(e)) => {
                error!(error = %e, "Scheduled tick failed");
            }
            Err(e) => {
                error!(error = %e, "Scheduled tick panicked");
            }
        }
    }
}
