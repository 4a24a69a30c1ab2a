use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::domain::{Lead, LeadEvent, LeadId, LeadStatus, QueueEntry, QueueId};
use super::queue::RealtorQueue;
use super::store::{DistributionStore, DistributionTx, StoreError};

/// Process-local store used for demos, tests, and `LEADFLOW_DATABASE=memory`.
///
/// Each transaction works on a copy of the state which replaces the committed state on success.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDistributionStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default, Clone)]
struct MemoryState {
    queues: HashMap<QueueId, Vec<QueueEntry>>,
    leads: HashMap<LeadId, Lead>,
    events: HashMap<LeadId, Vec<LeadEvent>>,
}

impl DistributionStore for InMemoryDistributionStore {
    fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn DistributionTx) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".to_string()))?;

        let mut working = guard.clone();
        let value = work(&mut working)?;
        *guard = working;
        Ok(value)
    }
}

impl DistributionTx for MemoryState {
    fn queue(&self, queue_id: &QueueId) -> Result<RealtorQueue, StoreError> {
        let entries = self.queues.get(queue_id).cloned().unwrap_or_default();
        Ok(RealtorQueue::new(queue_id.clone(), entries))
    }

    fn save_queue(&mut self, queue: &RealtorQueue) -> Result<(), StoreError> {
        if queue.is_empty() {
            self.queues.remove(queue.queue_id());
        } else {
            self.queues.insert(queue.queue_id().clone(), queue.snapshot());
        }
        Ok(())
    }

    fn lead(&self, id: &LeadId) -> Result<Option<Lead>, StoreError> {
        Ok(self.leads.get(id).cloned())
    }

    fn insert_lead(&mut self, lead: &Lead) -> Result<(), StoreError> {
        if self.leads.contains_key(&lead.id) {
            return Err(StoreError::Conflict);
        }
        self.leads.insert(lead.id.clone(), lead.clone());
        Ok(())
    }

    fn save_lead(&mut self, lead: &Lead) -> Result<(), StoreError> {
        match self.leads.get_mut(&lead.id) {
            Some(stored) => {
                *stored = lead.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound),
        }
    }

    fn leads_with_status(
        &self,
        queue_id: Option<&QueueId>,
        status: LeadStatus,
        limit: usize,
    ) -> Result<Vec<Lead>, StoreError> {
        let mut leads: Vec<Lead> = self
            .leads
            .values()
            .filter(|lead| lead.status == status)
            .filter(|lead| queue_id.map_or(true, |queue_id| &lead.queue_id == queue_id))
            .cloned()
            .collect();
        leads.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        leads.truncate(limit);
        Ok(leads)
    }

    fn expired_reservations(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Lead>, StoreError> {
        let mut leads: Vec<(DateTime<Utc>, Lead)> = self
            .leads
            .values()
            .filter(|lead| lead.status == LeadStatus::Reserved)
            .filter_map(|lead| {
                lead.reservation
                    .as_ref()
                    .filter(|reservation| reservation.is_expired(now))
                    .map(|reservation| (reservation.expires_at, lead.clone()))
            })
            .collect();
        leads.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        Ok(leads.into_iter().take(limit).map(|(_, lead)| lead).collect())
    }

    fn append_event(&mut self, event: &LeadEvent) -> Result<(), StoreError> {
        self.events
            .entry(event.lead_id.clone())
            .or_default()
            .push(event.clone());
        Ok(())
    }

    fn events(&self, lead_id: &LeadId) -> Result<Vec<LeadEvent>, StoreError> {
        Ok(self.events.get(lead_id).cloned().unwrap_or_default())
    }
}
