use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use trigger_recorder::cli::Args;
use trigger_recorder::config::{Config, ConfigStore};
use trigger_recorder::identity::HostIdentity;
use trigger_recorder::kind::SensorKind;
use trigger_recorder::recording::auto_wait::{auto_wait_seconds, measure_latencies, LATENCY_SAMPLES};
use trigger_recorder::recording::RecordingSupervisor;
use trigger_recorder::sensors::{build_reader, SensorReader};
use trigger_recorder::storage::{SqliteSink, StorageSink};

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,trigger_recorder=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing()?;

    let config = Config::from_env(&args)?;
    if args.print_config {
        println!(
            "{}",
            serde_json::to_string_pretty(&config.settings.expanded())?
        );
        return Ok(());
    }

    let reader = build_reader(config.sensor_provider, config.settings.colour_channels);
    if args.measure_latency {
        return print_suggested_waits(&config, reader, &args).await;
    }

    let sink: Arc<dyn StorageSink> = Arc::new(
        SqliteSink::open(&config.database_path).context("failed to prepare trigger database")?,
    );
    let identity = if config.settings.record_identity {
        HostIdentity::resolve(config.sensor_name.clone(), config.ip.clone())
    } else {
        HostIdentity::anonymous()
    };
    tracing::info!(
        database = %config.database_path.display(),
        provider = ?config.sensor_provider,
        sensor_name = ?identity.sensor_name,
        ip = ?identity.ip,
        "trigger-recorder starting"
    );

    let store: Arc<dyn ConfigStore> = Arc::new(config.settings.clone());
    let cancel = CancellationToken::new();
    let handle = RecordingSupervisor::new(store, reader, sink)
        .with_identity(identity)
        .with_monitor_settings(config.monitor_settings())
        .with_restart_backoff(config.restart_backoff())
        .start(cancel.clone());

    if handle.launched().is_empty() {
        tracing::warn!("no trigger monitors enabled; waiting for shutdown");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown requested");
    cancel.cancel();
    handle.join().await;
    Ok(())
}

async fn print_suggested_waits(
    config: &Config,
    reader: Arc<dyn SensorReader>,
    args: &Args,
) -> Result<()> {
    let kinds: Vec<SensorKind> = SensorKind::ALL
        .into_iter()
        .filter(|kind| config.settings.is_installed(*kind) && !kind.records_unconditionally())
        .collect();
    let measured = kinds.clone();
    let samples = tokio::task::spawn_blocking(move || {
        measure_latencies(reader.as_ref(), &measured, LATENCY_SAMPLES)
    })
    .await
    .context("latency measurement task failed")?;

    let waits = auto_wait_seconds(&kinds, &samples, args.latency_multiplier, args.set_lowest);
    let mut settings = config.settings.clone();
    for (kind, wait) in waits {
        settings.triggers.entry(kind).or_default().wait_seconds = Some(wait);
    }
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}
