//! Prometheus text exposition format.
//!
//! Renders monitor samples into the Prometheus text exposition format for
//! scraping by a Prometheus server or compatible agent.

use crate::sink::Sample;

/// Render samples into Prometheus text format.
///
/// Samples are grouped by metric family in first-seen order; each family
/// gets one `# HELP` and one `# TYPE ... gauge` line.
pub fn render_prometheus(samples: &[Sample]) -> String {
    let mut families: Vec<&str> = Vec::new();
    for s in samples {
        if !families.contains(&s.metric.as_str()) {
            families.push(&s.metric);
        }
    }

    let mut out = String::new();
    for family in families {
        let members: Vec<&Sample> = samples.iter().filter(|s| s.metric == family).collect();
        out.push_str(&format!("# HELP {family} {}\n", members[0].help));
        out.push_str(&format!("# TYPE {family} gauge\n"));
        for s in members {
            out.push_str(&format!("{family}{} {}\n", render_labels(&s.labels), s.value));
        }
    }
    out
}

fn render_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let rendered: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
        .collect();
    format!("{{{}}}", rendered.join(","))
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
