//! Structured logging setup and in-process counters for the navigator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

static TRACING_INIT: OnceCell<()> = OnceCell::new();

#[derive(Debug, Default)]
pub struct AppMetrics {
    turns_total: AtomicU64,
    failed_turns_total: AtomicU64,
    citations_total: AtomicU64,
    unanswered_queries_total: AtomicU64,
    incidents_filed_total: AtomicU64,
    status_lookups_total: AtomicU64,
    total_latency_millis: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub turns_total: u64,
    pub failed_turns_total: u64,
    pub citations_total: u64,
    pub unanswered_queries_total: u64,
    pub incidents_filed_total: u64,
    pub status_lookups_total: u64,
    pub avg_latency_millis: f64,
}

impl AppMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_turn(&self) {
        self.turns_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failed_turn(&self) {
        self.failed_turns_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a knowledge query; zero citations counts as unanswered.
    pub fn add_citations(&self, citations: usize) {
        if citations == 0 {
            self.unanswered_queries_total
                .fetch_add(1, Ordering::Relaxed);
        }
        self.citations_total
            .fetch_add(citations as u64, Ordering::Relaxed);
    }

    pub fn inc_incident_filed(&self) {
        self.incidents_filed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_status_lookup(&self) {
        self.status_lookups_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_latency(&self, duration: Duration) {
        self.total_latency_millis
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let turns = self.turns_total.load(Ordering::Relaxed);
        let latency = self.total_latency_millis.load(Ordering::Relaxed);

        MetricsSnapshot {
            turns_total: turns,
            failed_turns_total: self.failed_turns_total.load(Ordering::Relaxed),
            citations_total: self.citations_total.load(Ordering::Relaxed),
            unanswered_queries_total: self.unanswered_queries_total.load(Ordering::Relaxed),
            incidents_filed_total: self.incidents_filed_total.load(Ordering::Relaxed),
            status_lookups_total: self.status_lookups_total.load(Ordering::Relaxed),
            avg_latency_millis: if turns == 0 {
                0.0
            } else {
                latency as f64 / turns as f64
            },
        }
    }
}

/// Installs the JSON subscriber once per process. `RUST_LOG` overrides the
/// default filter.
pub fn init_tracing(service_name: &str) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}=info,civic_api=info,civic_agents=info,civic_storage=info",
                service_name
            ))
        });

        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(true)
            .init();
    });
}
