use axum::{routing::get, Router};
use metrics::{counter, describe_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

use crate::domain::{Level, ResultStatus};
use crate::rules::RedFlag;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder. Call once per process.
    pub fn init() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("shortlist_requests_total", "Shortlist computations.");
        describe_counter!(
            "shortlist_no_result_total",
            "Shortlist computations without any candidate."
        );
        describe_counter!(
            "shortlist_red_flags_total",
            "Red flags raised on the top candidate, by flag code."
        );
        describe_counter!(
            "shortlist_reliability_total",
            "Reliability verdicts, by level."
        );
    });
}

/// Count one finished shortlist. Without an installed recorder this is a no-op.
pub fn record_outcome(status: ResultStatus, red_flags: &[RedFlag], reliability: Level) {
    counter!("shortlist_requests_total").increment(1);
    if status == ResultStatus::NoResult {
        counter!("shortlist_no_result_total").increment(1);
    }
    for flag in red_flags {
        counter!("shortlist_red_flags_total", "flag" => flag.code()).increment(1);
    }
    counter!("shortlist_reliability_total", "level" => reliability.to_string()).increment(1);
}
