//! Lead distribution: realtor queues, reservations, expiry, and score-driven ordering.
//!
//! Every state change runs inside a single [`DistributionStore`] transaction so concurrent
//! accepts, rejects, and sweeps observe a consistent queue.

pub mod domain;
pub mod memory;
pub mod notify;
pub mod policy;
pub mod queue;
pub mod router;
pub mod service;
pub mod sqlite;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod tests;

pub use domain::{
    EntryStats, EntryStatus, Lead, LeadContact, LeadEvent, LeadEventKind, LeadId, LeadSource,
    LeadStatus, LeadValidationError, LeadView, NewLead, PipelineStage, PropertyId, QueueEntry,
    QueueId, RealtorId, Reservation,
};
pub use memory::InMemoryDistributionStore;
pub use notify::{LeadNotification, LeadNotifier, NotifyError, TracingNotifier};
pub use policy::{DistributionConfig, Outcome, ScoringPolicy};
pub use queue::{QueueError, RealtorQueue};
pub use router::distribution_router;
pub use service::{DistributionError, ExpiryReport, LeadDistributionService, Reassignment};
pub use sqlite::SqliteDistributionStore;
pub use store::{DistributionStore, DistributionTx, StoreError};
pub use sweeper::ExpirySweeper;
