//! Snapshot exporters: JSON map, Prometheus exposition text, CSV, Markdown.

use std::fmt::Write;

use super::MetricsSnapshot;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Prometheus,
    Csv,
    Markdown,
}

impl std::str::FromStr for ExportFormat {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" | "dict" => Ok(ExportFormat::Json),
            "prometheus" => Ok(ExportFormat::Prometheus),
            "csv" => Ok(ExportFormat::Csv),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            other => Err(crate::error::Error::Data(format!(
                "unsupported export format: {other}"
            ))),
        }
    }
}

pub(super) fn export(snapshot: &MetricsSnapshot, format: ExportFormat) -> String {
    match format {
        ExportFormat::Json => {
            serde_json::to_string_pretty(snapshot).unwrap_or_else(|_| "{}".to_string())
        }
        ExportFormat::Prometheus => to_prometheus(snapshot),
        ExportFormat::Csv => to_csv(snapshot),
        ExportFormat::Markdown => to_markdown(snapshot),
    }
}

fn sorted_operations(snapshot: &MetricsSnapshot) -> Vec<&String> {
    let mut names: Vec<&String> = snapshot.operations.keys().collect();
    names.sort();
    names
}

fn to_prometheus(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::with_capacity(2048);

    out.push_str("# HELP storage_operations_total Total storage operations\n");
    out.push_str("# TYPE storage_operations_total counter\n");
    for name in sorted_operations(snapshot) {
        let stats = &snapshot.operations[name];
        let _ = writeln!(
            out,
            "storage_operations_total{{operation=\"{name}\",status=\"total\"}} {}",
            stats.total_count
        );
        let _ = writeln!(
            out,
            "storage_operations_total{{operation=\"{name}\",status=\"success\"}} {}",
            stats.success_count
        );
        let _ = writeln!(
            out,
            "storage_operations_total{{operation=\"{name}\",status=\"error\"}} {}",
            stats.error_count
        );
    }

    out.push_str("\n# HELP storage_operation_duration_milliseconds Operation duration\n");
    out.push_str("# TYPE storage_operation_duration_milliseconds summary\n");
    for name in sorted_operations(snapshot) {
        let stats = &snapshot.operations[name];
        let mut percentiles: Vec<&String> = stats.latency_ms.keys().collect();
        percentiles.sort();
        for p in percentiles {
            let quantile = p
                .trim_start_matches('p')
                .parse::<f64>()
                .map_or(0.5, |v| v / 100.0);
            let _ = writeln!(
                out,
                "storage_operation_duration_milliseconds{{operation=\"{name}\",quantile=\"{quantile}\"}} {:.3}",
                stats.latency_ms[p]
            );
        }
    }

    out.push_str("\n# HELP storage_errors_total Errors by family\n");
    out.push_str("# TYPE storage_errors_total counter\n");
    let mut families: Vec<&String> = snapshot.errors_by_family.keys().collect();
    families.sort();
    for family in families {
        let _ = writeln!(
            out,
            "storage_errors_total{{family=\"{family}\"}} {}",
            snapshot.errors_by_family[family]
        );
    }

    out
}

fn to_csv(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::from("operation,total,success,error,success_rate,p50_ms,p95_ms,p99_ms\n");
    for name in sorted_operations(snapshot) {
        let stats = &snapshot.operations[name];
        let _ = writeln!(
            out,
            "{name},{},{},{},{:.4},{:.3},{:.3},{:.3}",
            stats.total_count,
            stats.success_count,
            stats.error_count,
            stats.success_rate,
            stats.latency_ms.get("p50").copied().unwrap_or(0.0),
            stats.latency_ms.get("p95").copied().unwrap_or(0.0),
            stats.latency_ms.get("p99").copied().unwrap_or(0.0),
        );
    }
    out
}

fn to_markdown(snapshot: &MetricsSnapshot) -> String {
    let mut out = String::from(
        "| Operation | Total | Success | Error | Success rate | p50 (ms) | p95 (ms) | p99 (ms) |\n\
         |---|---|---|---|---|---|---|---|\n",
    );
    for name in sorted_operations(snapshot) {
        let stats = &snapshot.operations[name];
        let _ = writeln!(
            out,
            "| {name} | {} | {} | {} | {:.1}% | {:.2} | {:.2} | {:.2} |",
            stats.total_count,
            stats.success_count,
            stats.error_count,
            stats.success_rate * 100.0,
            stats.latency_ms.get("p50").copied().unwrap_or(0.0),
            stats.latency_ms.get("p95").copied().unwrap_or(0.0),
            stats.latency_ms.get("p99").copied().unwrap_or(0.0),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsCollector;
    use std::time::Duration;

    fn collector_with_data() -> MetricsCollector {
        let metrics = MetricsCollector::default();
        metrics.record_operation("l1_store", Duration::from_millis(2), true);
        metrics.record_operation("l1_store", Duration::from_millis(4), false);
        metrics.record_error("l1_store", "timeout", "deadline exceeded");
        metrics
    }

    #[test]
    fn prometheus_export_contains_counters_and_quantiles() {
        let text = collector_with_data().export(ExportFormat::Prometheus);
        assert!(text.contains("storage_operations_total{operation=\"l1_store\",status=\"total\"} 2"));
        assert!(text.contains("quantile=\"0.5\""));
        assert!(text.contains("storage_errors_total{family=\"timeout\"} 1"));
    }

    #[test]
    fn csv_export_has_header_and_row() {
        let text = collector_with_data().export(ExportFormat::Csv);
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("operation,total"));
        assert!(lines.next().unwrap().starts_with("l1_store,2,1,1"));
    }

    #[test]
    fn markdown_export_renders_table() {
        let text = collector_with_data().export(ExportFormat::Markdown);
        assert!(text.starts_with("| Operation |"));
        assert!(text.contains("| l1_store | 2 | 1 | 1 |"));
    }

    #[test]
    fn json_export_parses_back() {
        let text = collector_with_data().export(ExportFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["operations"]["l1_store"]["total_count"], 2);
    }
}
