use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct AgentMetrics {
    runs: Counter<u64>,
    duration_ms: Histogram<f64>,
    links: Counter<u64>,
}

static METRICS: OnceCell<AgentMetrics> = OnceCell::new();

fn handles() -> &'static AgentMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("trendpulse.agent");
        AgentMetrics {
            runs: meter
                .u64_counter("topic_runs_total")
                .with_description("Topic research runs by terminal status")
                .init(),
            duration_ms: meter
                .f64_histogram("topic_run_duration_ms")
                .with_description("Topic research runtime in milliseconds")
                .init(),
            links: meter
                .u64_counter("agent_links_total")
                .with_description("Search hits folded into research context")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("TRENDPULSE_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "TRENDPULSE_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export agent metrics."
        );
    }
}

/// Record OTEL metrics for a finished topic run (no-op if no provider installed).
pub fn record_topic_run(status: &str, duration_ms: u64, links: usize) {
    let metrics = handles();
    let attrs = [KeyValue::new("status", status.to_string())];

    metrics.runs.add(1, &attrs);
    metrics.duration_ms.record(duration_ms as f64, &attrs);
    metrics.links.add(links as u64, &attrs);
}
