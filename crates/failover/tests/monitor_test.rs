//! Integration tests for the monitor loop and outage state machine

use failover::{
    CapturingSink, CheckOutcome, ErrorKind, FailoverEvent, FnService, KindSet, ManualClock,
    Monitor, OutageClassification, RecordingService, Registry, Service, ServiceSettings,
    ServiceStatus, Severity,
};
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

/// Service whose health is switched by the test
struct FlakyService {
    name: &'static str,
    up: AtomicBool,
    failover_broken: AtomicBool,
    recover_broken: AtomicBool,
    failovers: AtomicUsize,
    recoveries: AtomicUsize,
    ping_delay: Duration,
}

impl FlakyService {
    fn new(name: &'static str) -> Arc<Self> {
        Self::with_delay(name, Duration::ZERO)
    }

    fn with_delay(name: &'static str, ping_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            up: AtomicBool::new(true),
            failover_broken: AtomicBool::new(false),
            recover_broken: AtomicBool::new(false),
            failovers: AtomicUsize::new(0),
            recoveries: AtomicUsize::new(0),
            ping_delay,
        })
    }

    fn go_down(&self) {
        self.up.store(false, Ordering::SeqCst);
    }

    fn come_back(&self) {
        self.up.store(true, Ordering::SeqCst);
    }

    fn failovers(&self) -> usize {
        self.failovers.load(Ordering::SeqCst)
    }

    fn recoveries(&self) -> usize {
        self.recoveries.load(Ordering::SeqCst)
    }
}

impl Service for FlakyService {
    fn name(&self) -> &str {
        self.name
    }

    fn ping(&self) -> anyhow::Result<()> {
        if !self.ping_delay.is_zero() {
            thread::sleep(self.ping_delay);
        }
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(io::Error::from(io::ErrorKind::ConnectionRefused).into())
        }
    }

    fn failover(&self) -> anyhow::Result<()> {
        if self.failover_broken.load(Ordering::SeqCst) {
            anyhow::bail!("fallback alias missing");
        }
        self.failovers.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn recover(&self) -> anyhow::Result<()> {
        if self.recover_broken.load(Ordering::SeqCst) {
            anyhow::bail!("primary alias missing");
        }
        self.recoveries.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

type Recorded = RecordingService<Arc<FlakyService>>;

struct Harness {
    monitor: Monitor,
    registry: Arc<Registry>,
    sink: Arc<CapturingSink>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        let registry = Arc::new(Registry::new());
        let sink = Arc::new(CapturingSink::new());
        let clock = Arc::new(ManualClock::new());
        let classification = Arc::new(OutageClassification::new(
            KindSet::new().with_kind(ErrorKind::new("io").unwrap()),
        ));
        let monitor = Monitor::new(registry.clone())
            .with_sink(sink.clone())
            .with_clock(clock.clone())
            .with_classification(classification);

        Self {
            monitor,
            registry,
            sink,
            clock,
        }
    }

    /// Register a recorded flaky service
    fn add(
        &self,
        name: &'static str,
        settings: ServiceSettings,
    ) -> (Arc<FlakyService>, Arc<Recorded>) {
        let flaky = FlakyService::new(name);
        let recorded = Arc::new(RecordingService::new(flaky.clone(), self.clock.clone()));
        self.registry.register(recorded.clone(), settings).unwrap();
        (flaky, recorded)
    }

    fn tick(&self) {
        self.monitor.tick(None).unwrap();
    }

    fn status(&self, name: &str) -> ServiceStatus {
        self.registry.get(name).unwrap().status()
    }
}

fn io_kind() -> ErrorKind {
    ErrorKind::from(io::ErrorKind::ConnectionRefused)
}

#[test]
fn test_single_failure_fails_over_once() {
    let h = Harness::new();
    let (db, _) = h.add("database slave", ServiceSettings::every_tick());

    db.go_down();
    let report = h.monitor.tick(None).unwrap();

    assert_eq!(report.outcome("database slave"), Some(CheckOutcome::FailedOver));
    assert_eq!(db.failovers(), 1);
    assert_eq!(
        h.sink.events(),
        vec![FailoverEvent::Outage {
            service: "database slave".into()
        }]
    );
    assert_eq!(h.status("database slave"), ServiceStatus::Outage);
}

#[test]
fn test_outage_logged_once_then_recovery_logged() {
    let h = Harness::new();
    let (db, recorded) = h.add("database slave", ServiceSettings::every_tick());

    db.go_down();
    for _ in 0..3 {
        h.tick();
    }

    assert_eq!(recorded.ping_count(), 3);
    assert_eq!(db.failovers(), 1);
    assert_eq!(h.sink.len(), 1);
    assert_eq!(h.sink.count(Severity::Critical), 1);
    assert_eq!(
        h.sink.events()[0].message(),
        "database slave outage. Failover initiated."
    );

    db.come_back();
    let report = h.monitor.tick(None).unwrap();

    assert_eq!(report.outcome("database slave"), Some(CheckOutcome::Recovered));
    assert_eq!(db.recoveries(), 1);
    assert_eq!(h.sink.len(), 2);
    let recovery = &h.sink.events()[1];
    assert_eq!(recovery.severity(), Severity::Info);
    assert_eq!(
        recovery.message(),
        "database slave is back up. Recovery complete."
    );
    assert_eq!(h.status("database slave"), ServiceStatus::Healthy);

    // Healthy again: no further events or actions.
    h.tick();
    assert_eq!(h.sink.len(), 2);
    assert_eq!(db.recoveries(), 1);
}

#[test]
fn test_outage_relogged_after_logging_interval() {
    let h = Harness::new();
    h.monitor
        .set_outage_logging_interval(Duration::from_secs(1))
        .unwrap();
    let (db, _) = h.add("database slave", ServiceSettings::every_tick());

    db.go_down();
    h.tick();
    assert_eq!(h.sink.count(Severity::Critical), 1);

    h.clock.advance(Duration::from_millis(500));
    h.tick();
    assert_eq!(h.sink.count(Severity::Critical), 1);

    h.clock.advance(Duration::from_millis(700));
    h.tick();
    assert_eq!(h.sink.count(Severity::Critical), 2);
    assert_eq!(db.failovers(), 1);

    // The throttle restarts from the latest log.
    h.clock.advance(Duration::from_millis(900));
    h.tick();
    assert_eq!(h.sink.count(Severity::Critical), 2);

    db.come_back();
    h.tick();
    assert_eq!(h.sink.count(Severity::Info), 1);
    assert_eq!(h.sink.len(), 3);
}

#[test]
fn test_recovery_is_never_throttled() {
    let h = Harness::new();
    let (db, _) = h.add("database slave", ServiceSettings::every_tick());

    for _ in 0..3 {
        db.go_down();
        h.tick();
        db.come_back();
        h.tick();
    }

    assert_eq!(db.failovers(), 3);
    assert_eq!(db.recoveries(), 3);
    assert_eq!(h.sink.count(Severity::Critical), 3);
    assert_eq!(h.sink.count(Severity::Info), 3);
}

#[test]
fn test_ping_monitoring_interval() {
    let h = Harness::new();
    let settings = ServiceSettings {
        monitoring_interval: Duration::from_secs(1),
        ..ServiceSettings::every_tick()
    };
    let (_, recorded) = h.add("database slave", settings);

    for _ in 0..3 {
        h.tick();
        h.clock.advance(Duration::from_millis(300));
    }
    assert_eq!(recorded.ping_count(), 1);

    h.clock.advance(Duration::from_millis(100));
    h.tick();
    assert_eq!(recorded.ping_count(), 2);

    let pings = recorded.pings();
    assert_eq!(pings[1] - pings[0], Duration::from_secs(1));
}

#[test]
fn test_zero_interval_pings_every_tick() {
    let h = Harness::new();
    let (_, recorded) = h.add("database slave", ServiceSettings::every_tick());

    for _ in 0..5 {
        h.tick();
    }
    assert_eq!(recorded.ping_count(), 5);
}

#[test]
fn test_ping_outage_interval() {
    let h = Harness::new();
    let settings = ServiceSettings {
        monitoring_interval: Duration::from_secs(3),
        ..ServiceSettings::every_tick()
    };
    let (db, recorded) = h.add("database slave", settings);

    db.go_down();
    for _ in 0..3 {
        h.tick();
    }
    // The first ping uses the monitoring path; once down, the zero outage
    // interval applies.
    assert_eq!(recorded.ping_count(), 3);

    db.come_back();
    h.tick();
    assert_eq!(h.status("database slave"), ServiceStatus::Healthy);

    // Back on the healthy path, the 3s monitoring interval gates again.
    h.tick();
    assert_eq!(recorded.ping_count(), 4);
}

#[test]
fn test_ping_error_interval() {
    let h = Harness::new();
    let settings = ServiceSettings {
        monitoring_interval: Duration::from_secs(3),
        outage_interval: Duration::from_secs(3),
        error_interval: Duration::ZERO,
        outage_logging_interval: None,
    };
    let (db, recorded) = h.add("database slave", settings);

    db.go_down();
    let kind = io_kind();
    for _ in 0..3 {
        let report = h.monitor.tick(Some(&kind)).unwrap();
        assert!(report.escalated);
    }
    assert_eq!(recorded.ping_count(), 3);
    assert_eq!(db.failovers(), 1);

    // A plain tick falls back to the outage interval.
    h.tick();
    assert_eq!(recorded.ping_count(), 3);
}

#[test]
fn test_unclassified_trigger_uses_normal_interval() {
    let h = Harness::new();
    let settings = ServiceSettings {
        monitoring_interval: Duration::from_secs(3),
        ..ServiceSettings::every_tick()
    };
    let (_, recorded) = h.add("database slave", settings);

    let kind = ErrorKind::new("value").unwrap();
    for _ in 0..3 {
        let report = h.monitor.tick(Some(&kind)).unwrap();
        assert!(!report.escalated);
        assert_eq!(report.trigger.as_ref(), Some(&kind));
    }
    assert_eq!(recorded.ping_count(), 1);
}

#[test]
fn test_services_are_independent() {
    let h = Harness::new();
    let (db, db_recorded) = h.add("database slave", ServiceSettings::every_tick());
    let cache_settings = ServiceSettings {
        monitoring_interval: Duration::from_secs(1),
        ..ServiceSettings::every_tick()
    };
    let (cache, cache_recorded) = h.add("memcached", cache_settings);

    db.go_down();
    for _ in 0..3 {
        h.tick();
        h.clock.advance(Duration::from_millis(400));
    }

    assert_eq!(db.failovers(), 1);
    assert_eq!(cache.failovers(), 0);
    assert_eq!(db_recorded.ping_count(), 3);
    // Ticks at 0ms, 400ms and 800ms: only the first is due on a 1s interval.
    assert_eq!(cache_recorded.ping_count(), 1);
    assert_eq!(h.status("memcached"), ServiceStatus::Healthy);
    assert!(h.sink.events().iter().all(|e| e.service() == "database slave"));
}

#[test]
fn test_registration_order_is_visit_order() {
    let h = Harness::new();
    h.add("database slave", ServiceSettings::every_tick());
    h.add("memcached", ServiceSettings::every_tick());
    h.add("celery", ServiceSettings::every_tick());

    let report = h.monitor.tick(None).unwrap();
    let order: Vec<_> = report.outcomes.iter().map(|o| o.service.as_str()).collect();
    assert_eq!(order, ["database slave", "memcached", "celery"]);
}

#[test]
fn test_panicking_ping_does_not_stop_other_services() {
    let h = Harness::new();
    h.registry
        .register(
            Arc::new(FnService::new("broker").on_ping(|| panic!("socket closed"))),
            ServiceSettings::every_tick(),
        )
        .unwrap();
    let (_, recorded) = h.add("database slave", ServiceSettings::every_tick());

    let report = h.monitor.tick(None).unwrap();
    assert_eq!(report.outcome("broker"), Some(CheckOutcome::FailedOver));
    assert_eq!(report.outcome("database slave"), Some(CheckOutcome::Healthy));
    assert_eq!(recorded.ping_count(), 1);
}

#[test]
fn test_failed_failover_is_surfaced_and_retried() {
    let h = Harness::new();
    let (db, _) = h.add("database slave", ServiceSettings::every_tick());
    let (cache, _) = h.add("memcached", ServiceSettings::every_tick());

    db.failover_broken.store(true, Ordering::SeqCst);
    db.go_down();
    cache.go_down();

    let err = h.monitor.tick(None).unwrap_err();
    assert!(matches!(err, failover::Error::Failover { ref service, .. } if service == "database slave"));

    // The broken service did not move to outage and logged nothing; the
    // other one failed over normally.
    assert_eq!(h.status("database slave"), ServiceStatus::Healthy);
    assert_eq!(h.status("memcached"), ServiceStatus::Outage);
    assert_eq!(cache.failovers(), 1);
    assert_eq!(h.sink.events().len(), 1);

    db.failover_broken.store(false, Ordering::SeqCst);
    let report = h.monitor.tick(None).unwrap();
    assert_eq!(report.outcome("database slave"), Some(CheckOutcome::FailedOver));
    assert_eq!(db.failovers(), 1);
}

#[test]
fn test_failed_recovery_keeps_outage() {
    let h = Harness::new();
    let (db, _) = h.add("database slave", ServiceSettings::every_tick());

    db.go_down();
    h.tick();
    db.recover_broken.store(true, Ordering::SeqCst);
    db.come_back();

    let err = h.monitor.tick(None).unwrap_err();
    assert!(matches!(err, failover::Error::Recovery { .. }));
    assert_eq!(h.status("database slave"), ServiceStatus::Outage);
    assert_eq!(h.sink.count(Severity::Info), 0);

    db.recover_broken.store(false, Ordering::SeqCst);
    h.tick();
    assert_eq!(h.status("database slave"), ServiceStatus::Healthy);
    assert_eq!(db.recoveries(), 1);
}

#[test]
fn test_multiple_action_failures() {
    let h = Harness::new();
    let (db, _) = h.add("database slave", ServiceSettings::every_tick());
    let (cache, _) = h.add("memcached", ServiceSettings::every_tick());

    for service in [&db, &cache] {
        service.failover_broken.store(true, Ordering::SeqCst);
        service.go_down();
    }

    match h.monitor.tick(None) {
        Err(failover::Error::Multiple(errors)) => assert_eq!(errors.len(), 2),
        other => panic!("expected two failover errors, got {other:?}"),
    }
}

#[test]
fn test_unregistered_service_is_not_pinged() {
    let h = Harness::new();
    let (_, recorded) = h.add("database slave", ServiceSettings::every_tick());

    h.tick();
    assert!(h.registry.unregister("database slave"));
    h.tick();

    assert_eq!(recorded.ping_count(), 1);
}

#[test]
fn test_settings_changes_apply_on_next_tick() {
    let h = Harness::new();
    let (_, recorded) = h.add("database slave", ServiceSettings::default());

    h.tick();
    h.tick();
    assert_eq!(recorded.ping_count(), 1);

    h.registry
        .get("database slave")
        .unwrap()
        .update_settings(|s| s.monitoring_interval = Duration::ZERO)
        .unwrap();
    h.tick();
    assert_eq!(recorded.ping_count(), 2);
}

#[test]
fn test_concurrent_ticks_fail_over_once() {
    let registry = Arc::new(Registry::new());
    let db = FlakyService::with_delay("database slave", Duration::from_millis(50));
    registry
        .register(db.clone(), ServiceSettings::every_tick())
        .unwrap();
    let monitor = Monitor::new(registry).with_sink(Arc::new(CapturingSink::new()));

    db.go_down();
    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| monitor.tick(None).unwrap());
        }
    });

    assert_eq!(db.failovers(), 1);
}

#[test]
fn test_snapshot_serializes() {
    let h = Harness::new();
    let (db, _) = h.add("database slave", ServiceSettings::every_tick());

    db.go_down();
    h.tick();
    h.clock.advance(Duration::from_secs(2));

    let snapshots = h.monitor.snapshot();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].status, ServiceStatus::Outage);
    assert_eq!(snapshots[0].stats.failovers, 1);
    assert_eq!(snapshots[0].since_last_ping, Some(Duration::from_secs(2)));

    let json = serde_json::to_value(&snapshots[0]).unwrap();
    assert_eq!(json["name"], "database slave");
    assert_eq!(json["status"], "outage");
    assert_eq!(json["since_last_ping"], "2s");
    assert_eq!(json["stats"]["failed_pings"], 1);
}
