use chrono::{DateTime, Utc};

use super::domain::{Lead, LeadEvent, LeadId, LeadStatus, QueueId};
use super::queue::RealtorQueue;

/// Storage abstraction with all-or-nothing transactions.
///
/// `work` sees a consistent view of queues and leads; its writes become visible only when it
/// returns `Ok`. Implementations serialize writers, which is what keeps two realtors from
/// winning the same lead.
pub trait DistributionStore: Send + Sync {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn DistributionTx) -> Result<T, E>,
        E: From<StoreError>;
}

/// Operations available inside a store transaction.
pub trait DistributionTx {
    /// Loads a queue; unknown queues come back empty.
    fn queue(&self, queue_id: &QueueId) -> Result<RealtorQueue, StoreError>;
    /// Replaces the stored membership of the queue with `queue`.
    fn save_queue(&mut self, queue: &RealtorQueue) -> Result<(), StoreError>;
    fn lead(&self, id: &LeadId) -> Result<Option<Lead>, StoreError>;
    fn insert_lead(&mut self, lead: &Lead) -> Result<(), StoreError>;
    fn save_lead(&mut self, lead: &Lead) -> Result<(), StoreError>;
    /// Leads in `status`, oldest first.
    fn leads_with_status(
        &self,
        queue_id: Option<&QueueId>,
        status: LeadStatus,
        limit: usize,
    ) -> Result<Vec<Lead>, StoreError>;
    /// Reserved leads whose reservation ended at or before `now`, earliest expiry first.
    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Lead>, StoreError>;
    fn append_event(&mut self, event: &LeadEvent) -> Result<(), StoreError>;
    fn events(&self, lead_id: &LeadId) -> Result<Vec<LeadEvent>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("stored record is corrupt: {0}")]
    Corrupt(String),
}
