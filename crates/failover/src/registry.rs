//! Registry of monitored services.

use crate::service::Service;
use crate::state::ServiceState;
use crate::types::{ServiceSettings, ServiceSnapshot, ServiceStats, ServiceStatus};
use common::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use validator::Validate;

/// A registered service together with its settings and outage state.
pub struct MonitoredService {
    service: Arc<dyn Service>,
    settings: RwLock<ServiceSettings>,
    pub(crate) state: Mutex<ServiceState>,
}

impl MonitoredService {
    fn new(service: Arc<dyn Service>, settings: ServiceSettings) -> Self {
        Self {
            service,
            settings: RwLock::new(settings),
            state: Mutex::new(ServiceState::default()),
        }
    }

    pub fn name(&self) -> &str {
        self.service.name()
    }

    pub fn service(&self) -> &Arc<dyn Service> {
        &self.service
    }

    pub fn settings(&self) -> ServiceSettings {
        self.settings.read().clone()
    }

    /// Replace the settings after validating them.
    pub fn set_settings(&self, settings: ServiceSettings) -> Result<()> {
        validate_settings(self.name(), &settings)?;
        *self.settings.write() = settings;
        Ok(())
    }

    /// Modify a copy of the settings and apply it if it validates.
    pub fn update_settings(&self, f: impl FnOnce(&mut ServiceSettings)) -> Result<()> {
        let mut settings = self.settings();
        f(&mut settings);
        self.set_settings(settings)
    }

    /// Current status. Blocks while a tick is processing this service.
    pub fn status(&self) -> ServiceStatus {
        self.state.lock().status
    }

    pub fn stats(&self) -> ServiceStats {
        self.state.lock().stats
    }

    pub(crate) fn snapshot(&self, now: Instant) -> ServiceSnapshot {
        let state = self.state.lock();
        ServiceSnapshot {
            name: self.name().to_string(),
            status: state.status,
            settings: self.settings(),
            stats: state.stats,
            since_last_ping: state
                .last_ping_at
                .map(|last| now.saturating_duration_since(last)),
        }
    }
}

impl fmt::Debug for MonitoredService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonitoredService")
            .field("name", &self.name())
            .field("settings", &*self.settings.read())
            .finish()
    }
}

fn validate_settings(name: &str, settings: &ServiceSettings) -> Result<()> {
    settings
        .validate()
        .map_err(|e| Error::config(format!("invalid settings for {name}: {e}")))
}

/// Ordered set of monitored services.
///
/// Registration order is the order the monitor visits services in.
#[derive(Debug, Default)]
pub struct Registry {
    services: RwLock<Vec<Arc<MonitoredService>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service.
    ///
    /// Registering the same instance again is a no-op that returns the
    /// existing handle and leaves its settings untouched. A different
    /// instance under an already registered name is rejected.
    pub fn register(
        &self,
        service: Arc<dyn Service>,
        settings: ServiceSettings,
    ) -> Result<Arc<MonitoredService>> {
        let name = service.name().to_string();
        if name.trim().is_empty() {
            return Err(Error::config("service name must not be empty"));
        }
        validate_settings(&name, &settings)?;

        let mut services = self.services.write();
        if let Some(existing) = services.iter().find(|s| s.name() == name) {
            if Arc::ptr_eq(existing.service(), &service) {
                debug!(service = %name, "Service already registered");
                return Ok(existing.clone());
            }
            return Err(Error::config(format!(
                "a different service named {name:?} is already registered"
            )));
        }

        info!(
            service = %name,
            monitoring_interval_ms = settings.monitoring_interval.as_millis(),
            outage_interval_ms = settings.outage_interval.as_millis(),
            error_interval_ms = settings.error_interval.as_millis(),
            "Registering service"
        );

        let entry = Arc::new(MonitoredService::new(service, settings));
        services.push(entry.clone());
        Ok(entry)
    }

    /// Remove the named service; returns whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        let mut services = self.services.write();
        let before = services.len();
        services.retain(|s| s.name() != name);

        let removed = services.len() != before;
        if removed {
            info!(service = name, "Unregistered service");
        }
        removed
    }

    pub fn clear(&self) {
        self.services.write().clear();
    }

    /// All services in registration order.
    pub fn all(&self) -> Vec<Arc<MonitoredService>> {
        self.services.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<MonitoredService>> {
        self.services
            .read()
            .iter()
            .find(|s| s.name() == name)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::FnService;
    use std::time::Duration;

    fn service(name: &str) -> Arc<dyn Service> {
        Arc::new(FnService::new(name))
    }

    #[test]
    fn test_registration_order() {
        let registry = Registry::new();
        for name in ["db", "cache", "broker"] {
            registry.register(service(name), ServiceSettings::default()).unwrap();
        }

        let names: Vec<_> = registry.all().iter().map(|s| s.name().to_string()).collect();
        assert_eq!(names, ["db", "cache", "broker"]);
    }

    #[test]
    fn test_register_same_instance_is_idempotent() {
        let registry = Registry::new();
        let db = service("db");

        let first = registry.register(db.clone(), ServiceSettings::default()).unwrap();
        let second = registry.register(db, ServiceSettings::every_tick()).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(second.settings(), ServiceSettings::default());
    }

    #[test]
    fn test_register_rejects_name_clash() {
        let registry = Registry::new();
        registry.register(service("db"), ServiceSettings::default()).unwrap();

        let err = registry
            .register(service("db"), ServiceSettings::default())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_register_validates() {
        let registry = Registry::new();
        assert!(registry.register(service(" "), ServiceSettings::default()).is_err());

        let mut settings = ServiceSettings::default();
        settings.monitoring_interval = Duration::from_secs(3 * 24 * 60 * 60);
        assert!(registry.register(service("db"), settings).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unregister_and_clear() {
        let registry = Registry::new();
        registry.register(service("db"), ServiceSettings::default()).unwrap();
        registry.register(service("cache"), ServiceSettings::default()).unwrap();

        assert!(registry.unregister("db"));
        assert!(!registry.unregister("db"));
        assert!(registry.get("db").is_none());
        assert!(registry.get("cache").is_some());

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_settings_update_is_validated() {
        let registry = Registry::new();
        let handle = registry
            .register(service("db"), ServiceSettings::default())
            .unwrap();

        handle
            .update_settings(|s| s.monitoring_interval = Duration::ZERO)
            .unwrap();
        assert_eq!(handle.settings().monitoring_interval, Duration::ZERO);

        let result = handle.update_settings(|s| s.error_interval = Duration::from_secs(u64::MAX));
        assert!(result.is_err());
        assert_eq!(handle.settings().error_interval, ServiceSettings::default().error_interval);
    }
}
