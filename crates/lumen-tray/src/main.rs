use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use ksni::TrayMethods;
use lumen_core::{
    run_actuator, run_sampler, run_status, Actuator, BrightnessBackend, GoalArbiter, LightSampler,
    SharedState,
};
use lumen_ddc::DdcutilBackend;
use lumen_influx::InfluxSource;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod tray;

use crate::config::{Config, Displays, RawConfig};
use crate::tray::LumenTray;

#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "LUMEN_CONFIG", default_value = "lumen.toml")]
    config: PathBuf,

    /// InfluxDB API token, overrides the config file
    #[arg(long, env = "LUMEN_INFLUX_TOKEN", hide_env_values = true)]
    influx_token: Option<String>,

    /// Run without the tray icon
    #[arg(long)]
    no_tray: bool,

    /// Print an example config and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", toml::to_string(&RawConfig::example())?);
        return Ok(());
    }

    let mut raw_config = match RawConfig::load(&args.config) {
        Ok(val) => val,
        Err(e) => {
            eprintln!("Error: Failed to load config: {:#}", e);
            eprintln!();
            eprintln!("Example config:\n\n{}", toml::to_string(&RawConfig::example())?);
            std::process::exit(2);
        }
    };
    if let Some(token) = args.influx_token {
        raw_config.influx.token = Some(token);
    }
    let config: Config = raw_config.try_into().context("Invalid config")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(config, !args.no_tray).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn run(config: Config, with_tray: bool) -> anyhow::Result<()> {
    match &config.displays {
        Displays::Ddcutil => {
            let backend = DdcutilBackend::new(config.command_timeout, config.write_timeout)?;
            run_with_backend(config, backend, with_tray).await
        }
        #[cfg(target_os = "linux")]
        Displays::I2c { buses, max_bus } => {
            let backend = if buses.is_empty() {
                lumen_ddc::I2cBackend::scan(*max_bus)
            } else {
                lumen_ddc::I2cBackend::with_buses(buses.clone())
            };
            run_with_backend(config, backend, with_tray).await
        }
        #[cfg(not(target_os = "linux"))]
        Displays::I2c { .. } => anyhow::bail!("the i2c display backend is only available on Linux"),
    }
}

async fn run_with_backend<B>(config: Config, backend: B, with_tray: bool) -> anyhow::Result<()>
where
    B: BrightnessBackend + 'static,
{
    let shared = Arc::new(SharedState::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let source = InfluxSource::new(
        &config.influx.url,
        config.influx.org.clone(),
        config.influx.token.clone(),
        &config.influx.series,
        config.influx.window,
        config.influx.timeout,
    )?;
    source.check_health().await?;

    let actuator = Actuator::start(Arc::new(backend), shared.clone(), config.write_timeout)
        .await
        .context("Failed to initialise displays")?;

    let sampler = LightSampler::new(source, config.mapping, config.on_missing, shared.clone());
    let arbiter = GoalArbiter::new(config.hysteresis, shared.clone());

    let mut tasks = JoinSet::new();
    tasks.spawn(run_sampler(sampler, arbiter, config.cadence.sample, shutdown_rx.clone()));
    tasks.spawn(run_actuator(actuator, shared.clone(), config.cadence.step, shutdown_rx.clone()));

    if with_tray && config.tray {
        match LumenTray::new(shutdown_tx.clone()).spawn().await {
            Ok(handle) => {
                let status_rx = shutdown_rx.clone();
                let status_shared = shared.clone();
                let period = config.cadence.status;
                tasks.spawn(async move {
                    let (snap_tx, mut snap_rx) = watch::channel(status_shared.snapshot());
                    let publisher = run_status(status_shared, period, status_rx, move |snap| {
                        let _ = snap_tx.send(snap);
                    });
                    let updater = async {
                        while snap_rx.changed().await.is_ok() {
                            let snap = *snap_rx.borrow_and_update();
                            handle.update(move |tray: &mut LumenTray| tray.status = snap).await;
                        }
                    };
                    tokio::join!(publisher, updater);
                    handle.shutdown().await;
                });
            }
            Err(e) => warn!("tray icon unavailable, running headless: {}", e),
        }
    } else {
        let status_rx = shutdown_rx.clone();
        tasks.spawn(run_status(shared.clone(), config.cadence.status, status_rx, |snap| {
            info!(
                brightness = ?snap.brightness,
                goal = ?snap.goal,
                lux = ?snap.light_level,
                "status"
            );
        }));
    }

    info!("lumen running");
    let mut shutdown_rx = shutdown_rx;
    tokio::select! {
        res = signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            info!("interrupted, shutting down");
        }
        _ = terminate() => info!("terminated, shutting down"),
        _ = shutdown_rx.changed() => info!("shutting down"),
    }
    let _ = shutdown_tx.send(true);

    while let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            warn!("task ended abnormally: {}", e);
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        }
        Err(e) => {
            warn!("cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
