//! Simulator configuration
//!
//! Loaded from an optional config file (format picked by extension) with
//! `ADC_STREAM__SECTION__KEY` environment overrides on top.

use adc_stream::{AcquisitionConfig, PumpConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Top-level simulator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub acquisition: AcquisitionConfig,
    pub pump: PumpConfig,
    pub source: SourceConfig,
    pub endpoint: EndpointConfig,
    pub logging: LoggingConfig,
    /// Stop after this long; run until Ctrl-C when unset
    pub duration_ms: Option<u64>,
    /// Prometheus exporter listen address
    pub metrics_addr: Option<SocketAddr>,
}

impl SimConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder
            .add_source(
                config::Environment::with_prefix("ADC_STREAM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

/// Synthetic sample source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Time between completed blocks
    pub block_interval_us: u64,
    /// Mid-scale of the primary signal (raw ADC counts)
    pub baseline: u16,
    /// Peak deviation of the primary signal
    pub amplitude: u16,
    /// Rows per full sine period
    pub period_rows: u32,
    /// Raw reference channel reading
    pub reference_raw: u16,
    /// Inject a conversion error every N blocks
    pub fault_every: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            block_interval_us: 1000,
            baseline: 2048,
            amplitude: 1500,
            period_rows: 48_000,
            reference_raw: 1652,
            fault_every: None,
        }
    }
}

/// Simulated bulk IN endpoint and host reader
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Time from submission to completion
    pub transfer_latency_us: u64,
    /// Reject every N-th submission
    pub reject_every: Option<u64>,
    /// Throughput report period
    pub report_interval_ms: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            transfer_latency_us: 250,
            reject_every: None,
            report_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
