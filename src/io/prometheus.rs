//! Prometheus text exposition for monitor metrics
//!
//! Rendered on demand by `GET /metrics` on the HTTP adapter.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.2}");
}

/// Write a histogram metric with cumulative buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {}", avg * count);
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_movement_metrics(&mut output, site_id, &summary);
    write_one_shot_metrics(&mut output, site_id, &summary);
    write_stream_metrics(&mut output, site_id, &summary);

    output
}

fn write_movement_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "curfew_movements_total",
        "Movements received",
        MetricType::Counter,
        site,
        summary.movements_total,
    );
    write_gauge_f64(
        output,
        "curfew_movements_per_sec",
        "Movements received per second since last scrape",
        site,
        summary.movements_per_sec,
    );
    write_metric(
        output,
        "curfew_violations_total",
        "Movements that breached a curfew",
        MetricType::Counter,
        site,
        summary.violations_total,
    );
    write_metric(
        output,
        "curfew_dispatch_rejected_total",
        "Dispatch jobs rejected because the queue was full",
        MetricType::Counter,
        site,
        summary.dispatch_rejected_total,
    );
    write_metric(
        output,
        "curfew_dispatch_queue_depth",
        "Dispatch jobs waiting for a worker",
        MetricType::Gauge,
        site,
        summary.dispatch_queue_depth,
    );
    write_histogram(
        output,
        "curfew_dispatch_latency_us",
        "Movement submit to delivery complete in microseconds",
        site,
        &summary.lat_buckets,
        summary.avg_dispatch_latency_us,
    );
    write_metric(
        output,
        "curfew_dispatch_latency_p99_us",
        "99th percentile dispatch latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
}

fn write_one_shot_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "curfew_one_shots_registered_total",
        "Violation subscriptions registered",
        MetricType::Counter,
        site,
        summary.one_shots_registered,
    );
    write_metric(
        output,
        "curfew_one_shots_resolved_total",
        "Violation subscriptions resolved with a violation",
        MetricType::Counter,
        site,
        summary.one_shots_resolved,
    );
    write_metric(
        output,
        "curfew_one_shots_cancelled_total",
        "Violation subscriptions cancelled by reset",
        MetricType::Counter,
        site,
        summary.one_shots_cancelled,
    );
    write_metric(
        output,
        "curfew_one_shots_failed_total",
        "Violation deliveries whose waiter had gone",
        MetricType::Counter,
        site,
        summary.one_shots_failed,
    );
    write_metric(
        output,
        "curfew_one_shots_pruned_total",
        "Abandoned violation subscriptions removed by housekeeping",
        MetricType::Counter,
        site,
        summary.one_shots_pruned,
    );
    write_metric(
        output,
        "curfew_one_shots_pending",
        "Violation subscriptions currently waiting",
        MetricType::Gauge,
        site,
        summary.pending_one_shots,
    );
}

fn write_stream_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "curfew_streams_connected_total",
        "Movement streams opened",
        MetricType::Counter,
        site,
        summary.streams_connected,
    );
    write_metric(
        output,
        "curfew_streams_disconnected_total",
        "Movement streams closed",
        MetricType::Counter,
        site,
        summary.streams_disconnected,
    );
    write_metric(
        output,
        "curfew_streams_active",
        "Movement streams currently connected",
        MetricType::Gauge,
        site,
        summary.active_streams,
    );
    write_metric(
        output,
        "curfew_stream_pushes_total",
        "Notifications queued to streams",
        MetricType::Counter,
        site,
        summary.stream_pushes,
    );
    write_metric(
        output,
        "curfew_stream_drops_total",
        "Notifications dropped because a stream queue was full",
        MetricType::Counter,
        site,
        summary.stream_drops,
    );
}
