use std::{sync::Arc, time::SystemTime};
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{info, warn};

use crate::config::{parse_args, Config, SensorKind};
use lifecycle::{LifecycleController, LifecycleState};
use scheduler::Sampler;
use sensor::{SampleSource, ThermalZone, VcGenCmd};
use server::Facade;
use signals::Signals;
use store::Store;

mod config;
mod error;
mod lifecycle;
mod response;
mod scheduler;
mod sensor;
mod server;
mod signals;
mod snapshot;
mod store;

fn sample_source(config: &Config) -> Arc<dyn SampleSource> {
    match config.sensor {
        SensorKind::Cpu => Arc::new(ThermalZone::new(&config.thermal_zone_path)),
        SensorKind::Gpu => Arc::new(VcGenCmd::new(&config.vcgencmd_path)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = Config::load(&parse_args(std::env::args().skip(1))?)?;
    let exe_dir = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()));
    let snapshot_path = config.snapshot_path(exe_dir.as_deref());
    let addr = config.socket_addr()?;
    if !config.time_key_is_chronological() {
        warn!(
            "time_key_format {:?} does not start with the year, samples may list out of order",
            config.time_key_format
        );
    }

    let store = Arc::new(Store::new(config.expiry()));
    match store.load_from(&snapshot_path, SystemTime::now()) {
        Ok(entries) => info!("loaded {} entries from {:?}", entries, snapshot_path),
        Err(e) if e.is_not_found() => info!("no snapshot at {:?}, starting empty", snapshot_path),
        Err(e) => warn!("ignoring unreadable snapshot: {}", e),
    }

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(Signals::install()?.forward(events_tx));
    let lifecycle = tokio::spawn(
        LifecycleController::new(store.clone(), snapshot_path.clone()).run(events_rx),
    );

    let sampler = Arc::new(Sampler::new(
        store.clone(),
        sample_source(&config),
        config.time_key_format.clone(),
        config.sample_timeout(),
    ));
    if let Err(e) = sampler.sample_once().await {
        warn!("initial sample failed: {}", e);
    }

    tokio::spawn(scheduler::run_sampling(sampler.clone(), config.sample_interval()));
    tokio::spawn(scheduler::run_snapshots(
        store.clone(),
        snapshot_path,
        config.snapshot_interval(),
    ));
    tokio::spawn(scheduler::run_sweeper(store, config.sweep_interval()));

    let listener = TcpListener::bind(addr).await?;
    let mut server = tokio::spawn(server::serve(listener, Arc::new(Facade::new(sampler))));

    tokio::select! {
        state = lifecycle => {
            if state? == LifecycleState::Stopped {
                info!("snapshot saved, exiting");
                std::process::exit(0);
            }
            warn!("lifecycle events are no longer delivered");
            (&mut server).await?
        }
        result = &mut server => result?,
    }
}
