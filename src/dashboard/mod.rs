//! Status dashboard: telemetry payloads, the rendered view and the poll loop.

mod poller;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use poller::{HttpTelemetry, PlainRenderer, Poller, Renderer, TelemetrySource};

/// Shown in place of cpu and battery when a guarded fetch fails.
pub const PLACEHOLDER: &str = "??";

/// Shown before the first successful fetch.
const UNKNOWN: &str = "-";

/// A telemetry reading as the backend sends it: a number, a string, or null.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
    #[default]
    Missing,
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[allow(clippy::cast_possible_truncation)]
            Self::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Missing => f.write_str("n/a"),
        }
    }
}

/// Body of `GET /info`. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InfoPayload {
    #[serde(default)]
    pub cpu: MetricValue,
    #[serde(default)]
    pub battery: MetricValue,
}

/// One entry of `GET /nodes`. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub id: String,
    #[serde(default)]
    pub cpu: MetricValue,
    #[serde(default)]
    pub battery: MetricValue,
}

impl NodeStatus {
    /// The list line for this node.
    #[must_use]
    pub fn line(&self) -> String {
        format!("{} — CPU: {}% — Battery: {}%", self.id, self.cpu, self.battery)
    }
}

/// Everything the dashboard shows, rebuilt on every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DashboardView {
    /// Local wall-clock time of the last cycle, `HH:MM:SS`.
    pub clock: String,
    pub cpu: String,
    pub battery: String,
    /// Node lines in server order.
    pub nodes: Vec<String>,
    /// Completed update cycles.
    pub cycles: u64,
}

impl Default for DashboardView {
    fn default() -> Self {
        Self {
            clock: String::new(),
            cpu: UNKNOWN.to_string(),
            battery: UNKNOWN.to_string(),
            nodes: Vec::new(),
            cycles: 0,
        }
    }
}

impl DashboardView {
    fn show_info(&mut self, info: &InfoPayload) {
        self.cpu = info.cpu.to_string();
        self.battery = info.battery.to_string();
    }

    fn show_nodes(&mut self, nodes: &[NodeStatus]) {
        self.nodes = nodes.iter().map(NodeStatus::line).collect();
    }

    fn show_placeholder_info(&mut self) {
        self.cpu = PLACEHOLDER.to_string();
        self.battery = PLACEHOLDER.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_values_accept_numbers_strings_and_null() {
        let info: InfoPayload =
            serde_json::from_str(r#"{"cpu": 12.0, "battery": "charging", "status": "ok"}"#)
                .unwrap();
        assert_eq!(info.cpu.to_string(), "12");
        assert_eq!(info.battery.to_string(), "charging");

        let info: InfoPayload = serde_json::from_str(r#"{"cpu": 7.5, "battery": null}"#).unwrap();
        assert_eq!(info.cpu.to_string(), "7.5");
        assert_eq!(info.battery, MetricValue::Missing);

        let info: InfoPayload = serde_json::from_str("{}").unwrap();
        assert_eq!(info.cpu.to_string(), "n/a");
    }

    #[test]
    fn node_line_format() {
        let nodes: Vec<NodeStatus> = serde_json::from_str(
            r#"[{"id": "nodeA", "cpu": 40, "battery": 91, "ip": "10.0.0.2"},
                {"id": "nodeB", "cpu": "?", "battery": null}]"#,
        )
        .unwrap();
        assert_eq!(nodes[0].line(), "nodeA — CPU: 40% — Battery: 91%");
        assert_eq!(nodes[1].line(), "nodeB — CPU: ?% — Battery: n/a%");
    }

    #[test]
    fn fresh_view_shows_unknown() {
        let view = DashboardView::default();
        assert_eq!(view.cpu, "-");
        assert!(view.nodes.is_empty());
    }
}
