use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::distribution::domain::{
    LeadContact, LeadSource, NewLead, PropertyId, QueueEntry, QueueId, RealtorId,
};
use crate::distribution::memory::InMemoryDistributionStore;
use crate::distribution::notify::{LeadNotification, LeadNotifier, NotifyError};
use crate::distribution::policy::DistributionConfig;
use crate::distribution::service::LeadDistributionService;
use crate::distribution::store::{DistributionStore, DistributionTx, StoreError};

pub(super) type MemoryService = LeadDistributionService<InMemoryDistributionStore, MemoryNotifier>;

pub(super) fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 10, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn minutes(value: i64) -> Duration {
    Duration::minutes(value)
}

pub(super) fn queue_id() -> QueueId {
    QueueId::new("agency-centro")
}

pub(super) fn realtor(id: &str) -> RealtorId {
    RealtorId::new(id)
}

pub(super) fn intake() -> NewLead {
    NewLead {
        queue_id: queue_id(),
        property_id: Some(PropertyId::new("apt-1204")),
        contact: LeadContact {
            name: "Marina Costa".to_string(),
            email: Some("marina@example.com".to_string()),
            phone: Some("+55 11 99876-5432".to_string()),
        },
        message: Some("Is the apartment still available?".to_string()),
        source: LeadSource::Portal,
    }
}

pub(super) fn config() -> DistributionConfig {
    DistributionConfig::default()
}

/// Notifier that keeps every notification for later inspection.
#[derive(Default)]
pub(super) struct MemoryNotifier {
    sent: Mutex<Vec<LeadNotification>>,
}

impl MemoryNotifier {
    pub(super) fn sent(&self) -> Vec<LeadNotification> {
        self.sent.lock().expect("notifier mutex poisoned").clone()
    }

    pub(super) fn templates(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|notification| notification.template)
            .collect()
    }
}

impl LeadNotifier for MemoryNotifier {
    fn publish(&self, notification: LeadNotification) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .expect("notifier mutex poisoned")
            .push(notification);
        Ok(())
    }
}

pub(super) struct FailingNotifier;

impl LeadNotifier for FailingNotifier {
    fn publish(&self, _notification: LeadNotification) -> Result<(), NotifyError> {
        Err(NotifyError::Transport("smtp relay offline".to_string()))
    }
}

/// Store whose transactions never start.
pub(super) struct UnavailableStore;

impl DistributionStore for UnavailableStore {
    fn transaction<T, E, F>(&self, _work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn DistributionTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        Err(StoreError::Unavailable("database offline".to_string()).into())
    }
}

pub(super) fn build_service() -> (
    MemoryService,
    Arc<InMemoryDistributionStore>,
    Arc<MemoryNotifier>,
) {
    build_service_with(config())
}

pub(super) fn build_service_with(
    config: DistributionConfig,
) -> (
    MemoryService,
    Arc<InMemoryDistributionStore>,
    Arc<MemoryNotifier>,
) {
    let store = Arc::new(InMemoryDistributionStore::default());
    let notifier = Arc::new(MemoryNotifier::default());
    let service = LeadDistributionService::new(store.clone(), notifier.clone(), config);
    (service, store, notifier)
}

/// Joins the given realtors in order, so the first one heads the queue.
pub(super) fn seed_queue<S, N>(service: &LeadDistributionService<S, N>, realtors: &[&str])
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    for id in realtors {
        let display_name = format!("Realtor {id}");
        service
            .join_queue(&queue_id(), &realtor(id), &display_name, now())
            .expect("realtor joins queue");
    }
}

pub(super) fn order(entries: &[QueueEntry]) -> Vec<&str> {
    entries.iter().map(|entry| entry.realtor_id.as_str()).collect()
}

pub(super) fn entry<'a>(entries: &'a [QueueEntry], id: &str) -> &'a QueueEntry {
    entries
        .iter()
        .find(|entry| entry.realtor_id.as_str() == id)
        .expect("realtor present in snapshot")
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
