use leadflow::config::StorageConfig;
use leadflow::distribution::{
    DistributionStore, DistributionTx, InMemoryDistributionStore, LeadNotification, LeadNotifier,
    NotifyError, SqliteDistributionStore, StoreError,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Store selected at startup from `LEADFLOW_DATABASE`.
pub(crate) enum ConfiguredStore {
    Memory(InMemoryDistributionStore),
    Sqlite(SqliteDistributionStore),
}

impl DistributionStore for ConfiguredStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn DistributionTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        match self {
            ConfiguredStore::Memory(store) => store.transaction(work),
            ConfiguredStore::Sqlite(store) => store.transaction(work),
        }
    }
}

pub(crate) fn open_store(storage: &StorageConfig) -> Result<ConfiguredStore, StoreError> {
    match storage {
        StorageConfig::Memory => {
            info!("using in-memory distribution store");
            Ok(ConfiguredStore::Memory(InMemoryDistributionStore::default()))
        }
        StorageConfig::Sqlite(path) => {
            info!(path = %path.display(), "opening sqlite distribution store");
            Ok(ConfiguredStore::Sqlite(SqliteDistributionStore::open(path)?))
        }
    }
}

/// Keeps notifications in memory so the demo can print what would have been sent.
#[derive(Default, Clone)]
pub(crate) struct InMemoryNotifier {
    events: Arc<Mutex<Vec<LeadNotification>>>,
}

impl LeadNotifier for InMemoryNotifier {
    fn publish(&self, notification: LeadNotification) -> Result<(), NotifyError> {
        let mut guard = self
            .events
            .lock()
            .map_err(|_| NotifyError::Transport("notifier mutex poisoned".to_string()))?;
        guard.push(notification);
        Ok(())
    }
}

impl InMemoryNotifier {
    pub(crate) fn drain(&self) -> Vec<LeadNotification> {
        match self.events.lock() {
            Ok(mut guard) => guard.drain(..).collect(),
            Err(_) => Vec::new(),
        }
    }
}
