//! ADC Stream Simulator
//!
//! Runs the streaming pipeline on a host with a synthetic sample source and a
//! simulated bulk IN endpoint, reporting host-side throughput.

pub mod endpoint;
pub mod settings;
pub mod source;

use adc_stream::{Entry, LossReport, Session, SessionStats};
use anyhow::{anyhow, Context};
use endpoint::HostStats;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Serialize;
use settings::{LoggingConfig, SimConfig};
use source::SyntheticSource;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Final report printed when the simulator exits
#[derive(Debug, Clone, Serialize)]
pub struct SimReport {
    pub blocks_generated: u64,
    pub session: SessionStats,
    pub host: HostStats,
    /// Entries left in the ring after the session stopped
    pub residual: ResidualSummary,
}

/// Summary of the final measurement readout
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResidualSummary {
    pub entries: usize,
    pub errors: usize,
    pub latest: Option<Entry>,
    pub mean: Option<Entry>,
    pub losses: LossReport,
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level: Level = config
        .level
        .parse()
        .with_context(|| format!("Invalid log level {:?}", config.level))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
    .context("Failed to set tracing subscriber")
}

/// Run one session until the configured duration elapses or Ctrl-C
pub async fn run(config: SimConfig) -> anyhow::Result<SimReport> {
    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!("Serving metrics on {}", addr);
    }

    let session = Session::open(config.acquisition.clone(), config.pump.clone())?;
    let (aggregator, mut pump, handle) = session.into_parts();

    let (mut endpoint, host) = endpoint::connect(&config.endpoint, handle.completion_signal());
    let host_task = tokio::spawn(host.run());

    // Endpoint is dropped with the task, which ends the host reader
    let pump_task = tokio::spawn(async move { pump.run(&mut endpoint).await.map(|()| pump) });

    let source = SyntheticSource::new(config.source.clone(), config.acquisition.layout.clone());
    let source_thread = match source.spawn(
        aggregator,
        handle.clone(),
        Duration::from_micros(config.source.block_interval_us),
    ) {
        Ok(thread) => thread,
        Err(e) => {
            handle.stop();
            return Err(e).context("Failed to start sample source");
        }
    };

    match config.duration_ms {
        Some(ms) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?,
    }

    info!("Stopping session");
    handle.stop();

    let mut pump = pump_task.await??;
    let blocks_generated = tokio::task::spawn_blocking(move || source_thread.join())
        .await?
        .map_err(|_| anyhow!("Sample source thread panicked"))?;
    let host = host_task.await?;

    let readout = pump.read_out();
    info!(
        "{} entries left unsent ({} errors)",
        readout.measurements.len(),
        readout.error_count()
    );

    Ok(SimReport {
        blocks_generated,
        session: handle.stats(),
        host,
        residual: ResidualSummary {
            entries: readout.measurements.len(),
            errors: readout.error_count(),
            latest: readout.latest(),
            mean: readout.mean(),
            losses: readout.losses,
        },
    })
}
