//! Static per-page tables: which snapshot fields feed which metric window, and
//! which rules alert on them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::notifications::Severity;
use crate::threshold::ThresholdRule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageKind {
    Dashboard,
    Energy,
    Hardware,
    Network,
    Scores,
}

impl PageKind {
    pub const ALL: [PageKind; 5] = [
        PageKind::Dashboard,
        PageKind::Energy,
        PageKind::Hardware,
        PageKind::Network,
        PageKind::Scores,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PageKind::Dashboard => "dashboard",
            PageKind::Energy => "energy",
            PageKind::Hardware => "hardware",
            PageKind::Network => "network",
            PageKind::Scores => "scores",
        }
    }

    pub fn push_path(self) -> String {
        format!("/ws/{}/", self.as_str())
    }

    pub fn poll_path(self) -> String {
        format!("/api/{}-data/", self.as_str())
    }
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PageKind::ALL
            .into_iter()
            .find(|page| page.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown page `{s}`"))
    }
}

/// Mapping of one metric key onto the snapshot fields that carry it.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSpec {
    pub key: &'static str,
    /// Array field of a full snapshot, e.g. `cpu_data`.
    pub series_field: &'static str,
    /// Field of a single row record, e.g. `cpu_usage`.
    pub row_field: &'static str,
    /// Optional server-computed average, e.g. `avg_cpu`.
    pub average_field: Option<&'static str>,
}

const fn series(
    key: &'static str,
    series_field: &'static str,
    row_field: &'static str,
    average_field: Option<&'static str>,
) -> SeriesSpec {
    SeriesSpec {
        key,
        series_field,
        row_field,
        average_field,
    }
}

#[derive(Debug, Clone)]
pub struct PageProfile {
    pub kind: PageKind,
    pub series: Vec<SeriesSpec>,
    pub rules: Vec<ThresholdRule>,
}

impl PageProfile {
    pub fn for_page(kind: PageKind) -> Self {
        let series = match kind {
            PageKind::Dashboard => vec![
                series("cpu", "cpu_data", "cpu_usage", Some("avg_cpu")),
                series("ram", "ram_data", "ram_usage", Some("avg_ram")),
                series("power_watts", "power_data", "power_watts", Some("avg_power")),
                series("eco_score", "eco_data", "eco_score", Some("avg_eco")),
                series("co2", "co2_data", "co2_equiv_g", None),
            ],
            PageKind::Energy => vec![
                series("power_watts", "power_data", "power_watts", Some("avg_power")),
                series("co2", "co2_data", "co2_equiv_g", Some("avg_co2")),
                series("overheating", "overheating_data", "overheating", Some("avg_overheating")),
                series("active_devices", "active_devices_data", "active_devices", Some("avg_active")),
            ],
            PageKind::Hardware => vec![
                series("cpu", "cpu_data", "cpu_usage", Some("avg_cpu")),
                series("ram", "ram_data", "ram_usage", Some("avg_ram")),
                series("battery_health", "battery_data", "battery_health", Some("avg_battery")),
                series("age_years", "age_data", "age_years", Some("avg_age")),
            ],
            PageKind::Network => vec![
                series("network_load", "network_load_data", "network_load_mbps", Some("avg_network_load")),
                series("requests", "requests_data", "requests_per_min", Some("avg_requests")),
                series("cloud_dependency", "cloud_dependency_data", "cloud_dependency_score", Some("avg_cloud")),
            ],
            PageKind::Scores => vec![
                series("eco_score", "eco_data", "eco_score", Some("avg_eco")),
                series("obsolescence", "obsolescence_data", "obsolescence_score", Some("avg_obsolescence")),
                series("bigtech", "bigtech_data", "bigtech_dependency", Some("avg_bigtech")),
                series("co2_savings", "co2_savings_data", "co2_savings_kg_year", Some("avg_co2_savings")),
            ],
        };

        let rules = canonical_rules()
            .into_iter()
            .filter(|rule| series.iter().any(|s| s.key == rule.metric_key))
            .collect();

        Self {
            kind,
            series,
            rules,
        }
    }

    /// Replace the rule table, e.g. with rules loaded from configuration.
    pub fn with_rules(mut self, rules: Vec<ThresholdRule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn series_for(&self, key: &str) -> Option<&SeriesSpec> {
        self.series.iter().find(|s| s.key == key)
    }
}

/// Every known rule; a page keeps those whose metric it tracks.
fn canonical_rules() -> Vec<ThresholdRule> {
    vec![
        ThresholdRule::above("cpu", 85.0, Severity::Warning, "High CPU", "CPU {value}% > 85%"),
        ThresholdRule::above("ram", 85.0, Severity::Warning, "High RAM", "RAM {value}% > 85%"),
        ThresholdRule::above(
            "power_watts",
            200.0,
            Severity::Warning,
            "High power draw",
            "Power {value}W > 200W",
        ),
        ThresholdRule::above("co2", 500.0, Severity::Danger, "High CO₂", "CO₂ {value}g > 500g"),
        ThresholdRule::below(
            "eco_score",
            40.0,
            Severity::Danger,
            "Low eco score",
            "Eco score {value} < 40",
        ),
        ThresholdRule::above(
            "overheating",
            80.0,
            Severity::Danger,
            "Overheating",
            "Temperature {value}°C > 80°C",
        ),
        ThresholdRule::above(
            "cloud_dependency",
            80.0,
            Severity::Danger,
            "High cloud dependency",
            "Cloud dependency {value}% > 80%",
        ),
        ThresholdRule::below(
            "battery_health",
            50.0,
            Severity::Danger,
            "Battery health low",
            "Battery health {value}% < 50%",
        ),
    ]
}
