//! metrics.rs
//!
//! Prometheus exposition of bridge activity and the last UPS status seen.

use std::fmt::Write;
use std::sync::atomic::AtomicU64;
use std::sync::Mutex;

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue, LabelValueEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::info::Info;
use prometheus_client::registry::Registry;

use crate::status::StatusMap;

/// Units that can be stripped from values, longest first
const ALL_UNITS: &[&str] = &[
    "Percent Load Capacity",
    "Minutes",
    "Seconds",
    "Percent",
    "Volts",
    "Watts",
    "Amps",
    "Hz",
    "VA",
    "C",
];

/// Keys reported as labels on the info metric instead of as gauges.
const INFO_KEYS: &[&str] = &[
    "apc", "hostname", "upsname", "version", "cable", "model", "upsmode", "driver", "apcmodel",
];

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ApcInfoLabels {
    pub apc: String,
    pub hostname: String,
    pub upsname: String,
    pub version: String,
    pub cable: String,
    pub model: String,
    pub upsmode: String,
    pub driver: String,
    pub apcmodel: String,
}

impl ApcInfoLabels {
    fn from_status(status: &StatusMap) -> Self {
        let field = |key: &str| status.get(key).unwrap_or_default().to_string();
        Self {
            apc: field("apc"),
            hostname: field("hostname"),
            upsname: field("upsname"),
            version: field("version"),
            cable: field("cable"),
            model: field("model"),
            upsmode: field("upsmode"),
            driver: field("driver"),
            apcmodel: field("apcmodel"),
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum QueryOutcome {
    Ok,
    Truncated,
    Unreachable,
    Aborted,
}

impl QueryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Truncated => "truncated",
            Self::Unreachable => "unreachable",
            Self::Aborted => "aborted",
        }
    }

    /// No status came back, so earlier UPS values no longer hold.
    fn is_failure(self) -> bool {
        matches!(self, Self::Unreachable | Self::Aborted)
    }
}

impl EncodeLabelValue for QueryOutcome {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
        encoder.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum PushOutcome {
    Ok,
    Failed,
}

impl PushOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Failed => "failed",
        }
    }
}

impl EncodeLabelValue for PushOutcome {
    fn encode(&self, encoder: &mut LabelValueEncoder) -> Result<(), std::fmt::Error> {
        encoder.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct QueryLabels {
    outcome: QueryOutcome,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct PushLabels {
    outcome: PushOutcome,
}

#[derive(Debug, Default)]
pub struct Metrics {
    nis_queries: Family<QueryLabels, Counter>,
    hub_pushes: Family<PushLabels, Counter>,
    last_status: Mutex<Option<StatusMap>>,
}

impl Metrics {
    pub fn record_query(&self, outcome: QueryOutcome) {
        self.nis_queries.get_or_create(&QueryLabels { outcome }).inc();
        if outcome.is_failure() {
            self.clear_status();
        }
    }

    pub fn record_push(&self, outcome: PushOutcome) {
        self.hub_pushes.get_or_create(&PushLabels { outcome }).inc();
    }

    /// Remember the latest status for the UPS gauges.
    pub fn update_status(&self, status: &StatusMap) {
        if let Ok(mut last) = self.last_status.lock() {
            *last = Some(status.clone());
        }
    }

    /// Drop the UPS gauges until the next successful query.
    pub fn clear_status(&self) {
        if let Ok(mut last) = self.last_status.lock() {
            *last = None;
        }
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> Result<String, std::fmt::Error> {
        let mut registry = Registry::default();
        registry.register(
            "apcupsd_bridge_nis_queries",
            "apcupsd NIS queries by outcome",
            self.nis_queries.clone(),
        );
        registry.register(
            "apcupsd_bridge_hub_pushes",
            "Pushes to the hub by outcome",
            self.hub_pushes.clone(),
        );

        // A poisoned lock only loses the UPS gauges for this scrape.
        if let Ok(last) = self.last_status.lock() {
            if let Some(status) = last.as_ref() {
                register_status(&mut registry, status);
            }
        }

        let mut body = String::new();
        encode(&mut body, &registry)?;
        Ok(body)
    }
}

fn register_status(registry: &mut Registry, status: &StatusMap) {
    registry.register(
        "apcupsd",
        "APC UPS daemon information",
        Info::new(ApcInfoLabels::from_status(status)),
    );

    for (key, value) in status.iter() {
        if INFO_KEYS.contains(&key) {
            continue;
        }

        if let Ok(numeric_value) = strip_unit(value).parse::<f64>() {
            let gauge: Gauge<f64, AtomicU64> = Gauge::default();
            gauge.set(numeric_value);
            let metric_name = format!("apcupsd_{}", metric_suffix(key));
            let description = format!("APC UPS {}", key.to_uppercase());
            registry.register(metric_name, description, gauge);
        }
    }
}

/// Removes a trailing unit word, along with the space before it.
pub fn strip_unit(value: &str) -> &str {
    for unit in ALL_UNITS {
        if let Some(stripped) = value.strip_suffix(unit) {
            if let Some(final_stripped) = stripped.strip_suffix(' ') {
                return final_stripped;
            }
        }
    }
    value
}

/// Keys like "end apc" are not valid metric names as-is.
fn metric_suffix(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
