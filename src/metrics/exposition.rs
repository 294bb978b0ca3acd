// Prometheus text exposition (version 0.0.4).

use crate::metrics::registry::{MetricKind, MetricsRegistry, Series};

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_labels(names: &[String], values: &[String], extra: Option<(&str, &str)>) -> String {
    let mut pairs: Vec<String> = names
        .iter()
        .zip(values.iter())
        .map(|(name, value)| format!("{}=\"{}\"", name, escape_label_value(value)))
        .collect();
    if let Some((name, value)) = extra {
        pairs.push(format!("{}=\"{}\"", name, escape_label_value(value)));
    }
    if pairs.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", pairs.join(","))
    }
}

fn format_value(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Render the registry's current state as Prometheus text format.
pub fn render(registry: &MetricsRegistry) -> String {
    let mut out = String::new();

    for family in registry.families_snapshot() {
        let kind = match family.kind {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        };
        out.push_str(&format!("# HELP {} {}\n", family.name, escape_help(&family.help)));
        out.push_str(&format!("# TYPE {} {}\n", family.name, kind));

        let series = family.series.read();
        let mut entries: Vec<_> = series.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        for (label_values, value) in entries {
            match value {
                Series::Value(v) => {
                    let labels = format_labels(&family.label_names, label_values, None);
                    out.push_str(&format!("{}{} {}\n", family.name, labels, format_value(*v)));
                }
                Series::Histogram {
                    bucket_counts,
                    sum,
                    count,
                } => {
                    for (i, upper) in family.buckets.iter().enumerate() {
                        let le = format!("{}", upper);
                        let labels =
                            format_labels(&family.label_names, label_values, Some(("le", &le)));
                        out.push_str(&format!(
                            "{}_bucket{} {}\n",
                            family.name, labels, bucket_counts[i]
                        ));
                    }
                    let inf_labels =
                        format_labels(&family.label_names, label_values, Some(("le", "+Inf")));
                    out.push_str(&format!("{}_bucket{} {}\n", family.name, inf_labels, count));
                    let labels = format_labels(&family.label_names, label_values, None);
                    out.push_str(&format!("{}_sum{} {}\n", family.name, labels, sum));
                    out.push_str(&format!("{}_count{} {}\n", family.name, labels, count));
                }
                Series::Summary { sum, count } => {
                    let labels = format_labels(&family.label_names, label_values, None);
                    out.push_str(&format!("{}_sum{} {}\n", family.name, labels, sum));
                    out.push_str(&format!("{}_count{} {}\n", family.name, labels, count));
                }
            }
        }
    }

    out
}
