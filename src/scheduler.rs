use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, SystemTime},
};

use chrono::Local;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, warn};

use crate::{
    error::{SampleError, SnapshotError},
    sensor::SampleSource,
    store::{Sample, Store},
};

/// One sampling tick: read the source and record the value under the current
/// local time.
pub struct Sampler {
    store: Arc<Store>,
    source: Arc<dyn SampleSource>,
    time_key_format: String,
    timeout: Option<Duration>,
}

impl Sampler {
    pub fn new(
        store: Arc<Store>,
        source: Arc<dyn SampleSource>,
        time_key_format: impl Into<String>,
        timeout: Option<Duration>,
    ) -> Self {
        Sampler {
            store,
            source,
            time_key_format: time_key_format.into(),
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub async fn sample_once(&self) -> Result<Sample, SampleError> {
        let source = self.source.clone();
        let read = tokio::task::spawn_blocking(move || source.read());
        let value = match self.timeout {
            Some(limit) => time::timeout(limit, read)
                .await
                .map_err(|_| SampleError::Timeout(limit))???,
            None => read.await??,
        };

        let key = Local::now().format(&self.time_key_format).to_string();
        self.store.set(key.clone(), value);
        Ok(Sample { key, value })
    }
}

/// Saves on the blocking pool so a slow disk never stalls the caller's runtime thread.
pub async fn save_snapshot(store: &Arc<Store>, path: &Path) -> Result<usize, SnapshotError> {
    let store = store.clone();
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || store.save_to(path)).await?
}

// First tick one period from now; a late tick delays the schedule instead of bursting.
fn ticker(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

pub async fn run_sampling(sampler: Arc<Sampler>, period: Duration) {
    let mut interval = ticker(period);
    loop {
        interval.tick().await;
        match sampler.sample_once().await {
            Ok(sample) => debug!(key = %sample.key, value = sample.value, "recorded sample"),
            Err(e) => warn!("skipping sample: {}", e),
        }
    }
}

pub async fn run_snapshots(store: Arc<Store>, path: PathBuf, period: Duration) {
    let mut interval = ticker(period);
    loop {
        interval.tick().await;
        match save_snapshot(&store, &path).await {
            Ok(entries) => debug!("saved {} entries to {:?}", entries, path),
            Err(e) => error!("failed to save snapshot: {}", e),
        }
    }
}

pub async fn run_sweeper(store: Arc<Store>, period: Duration) {
    let mut interval = ticker(period);
    loop {
        interval.tick().await;
        let removed = store.sweep_expired(SystemTime::now());
        if removed > 0 {
            debug!("evicted {} expired entries", removed);
        }
    }
}
