use std::{path::PathBuf, sync::Arc};

use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info};

use crate::{scheduler::save_snapshot, store::Store};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Interrupt,
    Terminate,
    Quit,
    Hangup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// Save, then stop.
    Terminate,
    /// Save, then empty the store and keep running.
    Reload,
}

impl SignalKind {
    pub fn class(&self) -> EventClass {
        match self {
            SignalKind::Interrupt | SignalKind::Terminate | SignalKind::Quit => {
                EventClass::Terminate
            }
            SignalKind::Hangup => EventClass::Reload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleEvent {
    pub kind: SignalKind,
}

impl From<SignalKind> for LifecycleEvent {
    fn from(kind: SignalKind) -> Self {
        LifecycleEvent { kind }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Running,
    Draining,
    Stopped,
}

pub struct LifecycleController {
    store: Arc<Store>,
    snapshot_path: PathBuf,
    state: LifecycleState,
    last_saved: Option<usize>,
}

impl LifecycleController {
    pub fn new(store: Arc<Store>, snapshot_path: PathBuf) -> Self {
        LifecycleController {
            store,
            snapshot_path,
            state: LifecycleState::Running,
            last_saved: None,
        }
    }

    /// Entries written by the most recent event's save, `None` if it failed
    /// or no event has been handled yet.
    pub fn last_saved(&self) -> Option<usize> {
        self.last_saved
    }

    /// Handles one event to completion. The snapshot is written before the
    /// store is cleared or the controller stops, even when the write fails.
    pub async fn handle(&mut self, event: LifecycleEvent) -> LifecycleState {
        if self.state == LifecycleState::Stopped {
            return self.state;
        }

        info!("received {:?}, saving snapshot", event.kind);
        self.state = LifecycleState::Draining;
        self.last_saved = match save_snapshot(&self.store, &self.snapshot_path).await {
            Ok(entries) => {
                info!("saved {} entries to {:?}", entries, self.snapshot_path);
                Some(entries)
            }
            Err(e) => {
                error!("failed to save snapshot: {}", e);
                None
            }
        };

        self.state = match event.kind.class() {
            EventClass::Terminate => LifecycleState::Stopped,
            EventClass::Reload => {
                let removed = self.store.clear();
                info!("cleared {} entries", removed);
                LifecycleState::Running
            }
        };
        self.state
    }

    /// Drains events in arrival order until a terminate event has been
    /// handled or every sender is gone.
    pub async fn run(mut self, mut events: UnboundedReceiver<LifecycleEvent>) -> LifecycleState {
        while let Some(event) = events.recv().await {
            if self.handle(event).await == LifecycleState::Stopped {
                break;
            }
        }
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tokio::sync::mpsc;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn filled_store(count: usize) -> Arc<Store> {
        let store = Arc::new(Store::new(HOUR));
        for i in 0..count {
            store.set(format!("2024-01-01 00:0{}:00", i), 20.0 + i as f64);
        }
        store
    }

    fn saved_entries(path: &std::path::Path) -> usize {
        Store::new(HOUR).load_from(path, SystemTime::now()).unwrap()
    }

    #[test]
    fn signal_classes() {
        assert_eq!(SignalKind::Interrupt.class(), EventClass::Terminate);
        assert_eq!(SignalKind::Terminate.class(), EventClass::Terminate);
        assert_eq!(SignalKind::Quit.class(), EventClass::Terminate);
        assert_eq!(SignalKind::Hangup.class(), EventClass::Reload);
    }

    #[tokio::test]
    async fn reload_saves_then_clears() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.dat");
        let store = filled_store(5);

        let mut controller = LifecycleController::new(store.clone(), path.clone());
        let state = controller.handle(SignalKind::Hangup.into()).await;

        assert_eq!(state, LifecycleState::Running);
        assert_eq!(controller.last_saved(), Some(5));
        assert!(store.is_empty());
        assert_eq!(saved_entries(&path), 5);
    }

    #[tokio::test]
    async fn terminate_saves_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.dat");
        let store = filled_store(3);

        let mut controller = LifecycleController::new(store.clone(), path.clone());
        assert_eq!(
            controller.handle(SignalKind::Terminate.into()).await,
            LifecycleState::Stopped
        );
        // Terminate keeps the in-memory entries; only the process ends
        assert_eq!(store.len(), 3);
        assert_eq!(saved_entries(&path), 3);

        // Nothing happens after stopping
        assert_eq!(
            controller.handle(SignalKind::Hangup.into()).await,
            LifecycleState::Stopped
        );
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn failed_save_still_clears_on_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("cache.dat");
        let store = filled_store(2);

        let mut controller = LifecycleController::new(store.clone(), path);
        assert_eq!(
            controller.handle(SignalKind::Hangup.into()).await,
            LifecycleState::Running
        );
        assert_eq!(controller.last_saved(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn run_processes_queue_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.dat");
        let store = filled_store(4);
        let (tx, rx) = mpsc::unbounded_channel();

        // Queued before the controller starts: reload, then quit. The quit's
        // save happens after the clear, so the final file is empty.
        tx.send(SignalKind::Hangup.into()).unwrap();
        tx.send(SignalKind::Quit.into()).unwrap();
        tx.send(SignalKind::Hangup.into()).unwrap();

        let state = LifecycleController::new(store.clone(), path.clone())
            .run(rx)
            .await;
        assert_eq!(state, LifecycleState::Stopped);
        assert_eq!(saved_entries(&path), 0);
    }

    #[tokio::test]
    async fn terminate_save_lands_before_run_returns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.dat");
        let store = filled_store(2);
        let (tx, rx) = mpsc::unbounded_channel();

        let controller = tokio::spawn(LifecycleController::new(store.clone(), path.clone()).run(rx));
        store.set("2024-01-01 00:09:00", 25.0);
        tx.send(SignalKind::Interrupt.into()).unwrap();

        assert_eq!(controller.await.unwrap(), LifecycleState::Stopped);
        assert_eq!(saved_entries(&path), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn signal_save_races_periodic_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.dat");
        let store = Arc::new(Store::new(HOUR));
        for i in 0..2000 {
            store.set(format!("key-{:05}", i), i as f64);
        }

        let periodic = tokio::spawn(crate::scheduler::run_snapshots(
            store.clone(),
            path.clone(),
            Duration::from_millis(1),
        ));
        for _ in 0..50 {
            let mut controller = LifecycleController::new(store.clone(), path.clone());
            assert_eq!(
                controller.handle(SignalKind::Interrupt.into()).await,
                LifecycleState::Stopped
            );
            assert_eq!(controller.last_saved(), Some(2000));
            assert_eq!(saved_entries(&path), 2000);
        }

        // Same race through the event queue
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(SignalKind::Terminate.into()).unwrap();
        let state = LifecycleController::new(store.clone(), path.clone())
            .run(rx)
            .await;
        assert_eq!(state, LifecycleState::Stopped);
        periodic.abort();

        assert_eq!(saved_entries(&path), 2000);
    }

    #[tokio::test]
    async fn run_ends_when_senders_drop() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = mpsc::unbounded_channel::<LifecycleEvent>();
        drop(tx);
        let state = LifecycleController::new(filled_store(1), dir.path().join("cache.dat"))
            .run(rx)
            .await;
        assert_eq!(state, LifecycleState::Running);
    }
}
