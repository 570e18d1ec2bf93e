//! Parsing for the conventional `name value` metrics exposition format
//!
//! The scrape endpoints of every subsystem expose plain-text metrics, one
//! `name value` pair per line. Comment lines start with `#`. A name may
//! carry a `{label="..."}` suffix; labels are discarded by the core and
//! the values of all labeled series with the same base name collapse to
//! whichever appears last.

use std::collections::HashMap;

/// Parse a metrics text blob into a name → value map
pub fn parse_metrics_text(text: &str) -> HashMap<String, f64> {
    parse_metrics_text_with_prefix(text, "")
}

/// Parse, keeping only metrics with `prefix` and stripping it from names
pub fn parse_metrics_text_with_prefix(text: &str, prefix: &str) -> HashMap<String, f64> {
    let mut metrics = HashMap::new();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((name_part, value_part)) = line.rsplit_once(' ') else {
            continue;
        };
        let Ok(value) = value_part.trim().parse::<f64>() else {
            continue;
        };
        let base_name = name_part.split('{').next().unwrap_or(name_part).trim();
        if base_name.is_empty() {
            continue;
        }
        if prefix.is_empty() {
            metrics.insert(base_name.to_string(), value);
        } else if let Some(stripped) = base_name.strip_prefix(prefix) {
            metrics.insert(stripped.to_string(), value);
        }
    }

    metrics
}

/// Convenience lookup with a default for absent metrics
pub fn metric_or(metrics: &HashMap<String, f64>, name: &str, default: f64) -> f64 {
    metrics.get(name).copied().unwrap_or(default)
}
