use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Discrete health level exposed by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverallStatus {
    Ok,
    Warn,
    Crit,
}

impl Default for OverallStatus {
    fn default() -> Self {
        OverallStatus::Warn
    }
}

/// Lightweight gauge descriptor included in status snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusGauge {
    pub label: String,
    pub value: f64,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ServiceStatus {
    overall: OverallStatus,
    warnings: Vec<String>,
    errors: Vec<String>,
    gauges: Vec<StatusGauge>,
}

/// Immutable snapshot handed to consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatusSnapshot {
    pub name: String,
    pub overall: OverallStatus,
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
    pub gauges: Vec<StatusGauge>,
}

/// Shared handle so the owning service can mutate its own status safely.
#[derive(Clone)]
pub struct ServiceStatusHandle {
    name: &'static str,
    inner: Arc<RwLock<ServiceStatus>>,
}

impl ServiceStatusHandle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(RwLock::new(ServiceStatus::default())),
        }
    }

    pub fn service_name(&self) -> &'static str {
        self.name
    }

    fn update<F>(&self, mutator: F)
    where
        F: FnOnce(&mut ServiceStatus),
    {
        let mut guard = self.inner.write().expect("status poisoned");
        mutator(&mut guard);
    }

    pub fn set_overall(&self, status: OverallStatus) {
        self.update(|s| s.overall = status);
    }

    pub fn push_warning(&self, msg: impl Into<String>) {
        self.update(|s| s.warnings.push(msg.into()));
    }

    pub fn clear_warnings(&self) {
        self.update(|s| s.warnings.clear());
    }

    pub fn push_error(&self, msg: impl Into<String>) {
        self.update(|s| s.errors.push(msg.into()));
    }

    pub fn clear_errors(&self) {
        self.update(|s| s.errors.clear());
    }

    pub fn set_gauges(&self, gauges: Vec<StatusGauge>) {
        self.update(|s| s.gauges = gauges);
    }

    pub fn overall(&self) -> OverallStatus {
        let guard = self.inner.read().expect("status poisoned");
        guard.overall
    }

    pub fn snapshot(&self) -> ServiceStatusSnapshot {
        let guard = self.inner.read().expect("status poisoned");
        ServiceStatusSnapshot {
            name: self.name.to_string(),
            overall: guard.overall,
            warnings: guard.warnings.clone(),
            errors: guard.errors.clone(),
            gauges: guard.gauges.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_updates_are_visible_in_snapshots() {
        let status = ServiceStatusHandle::new("recon_supervisor");
        assert_eq!(status.overall(), OverallStatus::Warn);

        status.set_overall(OverallStatus::Crit);
        status.push_error("ledger query failed");
        status.set_gauges(vec![StatusGauge {
            label: "error_streak".to_string(),
            value: 2.0,
            unit: None,
        }]);

        let snap = status.snapshot();
        assert_eq!(snap.name, "recon_supervisor");
        assert_eq!(snap.overall, OverallStatus::Crit);
        assert_eq!(snap.errors, vec!["ledger query failed".to_string()]);
        assert_eq!(snap.gauges.len(), 1);

        status.clear_errors();
        status.set_overall(OverallStatus::Ok);
        let snap = status.snapshot();
        assert!(snap.errors.is_empty());
        assert_eq!(snap.overall, OverallStatus::Ok);
    }
}
