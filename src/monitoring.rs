//! Invocation monitoring and usage tracking

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Usage counters for one route
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteUsage {
    pub invocations: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub peak_duration: Duration,
}

/// Point-in-time snapshot of all counters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvocationStats {
    /// When counting started
    pub since: DateTime<Utc>,
    pub total_requests: u64,
    pub completed: u64,
    pub failed: u64,

    /// Request count per outcome tag
    pub by_outcome: BTreeMap<String, u64>,

    /// Usage per route path
    pub by_route: BTreeMap<String, RouteUsage>,
    pub peak_duration: Duration,
}

impl InvocationStats {
    /// Average request duration, or zero before the first request
    pub fn average_duration(&self) -> Duration {
        let total: Duration = self.by_route.values().map(|u| u.total_duration).sum();
        total
            .as_nanos()
            .checked_div(u128::from(self.total_requests))
            .map_or(Duration::ZERO, |avg| Duration::from_nanos(u64::try_from(avg).unwrap_or(u64::MAX)))
    }
}

/// Lock-free counters shared by all request tasks
#[derive(Debug)]
pub struct InvocationMonitor {
    since: DateTime<Utc>,
    total: AtomicU64,
    completed: AtomicU64,
    peak_micros: AtomicU64,
    outcomes: DashMap<&'static str, u64>,
    routes: DashMap<String, RouteUsage>,
}

impl InvocationMonitor {
    pub fn new() -> Self {
        Self {
            since: Utc::now(),
            total: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            peak_micros: AtomicU64::new(0),
            outcomes: DashMap::new(),
            routes: DashMap::new(),
        }
    }

    /// Record one finished request
    pub fn record(&self, route: &str, outcome: &'static str, success: bool, duration: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.completed.fetch_add(1, Ordering::Relaxed);
        }
        self.peak_micros
            .fetch_max(duration.as_micros() as u64, Ordering::Relaxed);

        *self.outcomes.entry(outcome).or_insert(0) += 1;

        let mut usage = self.routes.entry(route.to_string()).or_default();
        usage.invocations += 1;
        if !success {
            usage.failures += 1;
        }
        usage.total_duration += duration;
        usage.peak_duration = usage.peak_duration.max(duration);
    }

    /// Snapshot the counters
    pub fn snapshot(&self) -> InvocationStats {
        let total = self.total.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);

        InvocationStats {
            since: self.since,
            total_requests: total,
            completed,
            failed: total.saturating_sub(completed),
            by_outcome: self
                .outcomes
                .iter()
                .map(|e| (e.key().to_string(), *e.value()))
                .collect(),
            by_route: self
                .routes
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            peak_duration: Duration::from_micros(self.peak_micros.load(Ordering::Relaxed)),
        }
    }
}

impl Default for InvocationMonitor {
    fn default() -> Self {
        Self::new()
    }
}
