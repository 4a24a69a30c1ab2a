use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::domain::{LeadId, RealtorId};

pub const LEAD_OFFERED: &str = "lead_offered";
pub const LEAD_REASSIGNED: &str = "lead_reassigned";
pub const LEAD_EXHAUSTED: &str = "lead_exhausted";

/// Outbound hook for e-mail, SMS, or push adapters.
pub trait LeadNotifier: Send + Sync {
    fn publish(&self, notification: LeadNotification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadNotification {
    pub template: String,
    pub lead_id: LeadId,
    pub realtor_id: Option<RealtorId>,
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Notifier that only writes structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl LeadNotifier for TracingNotifier {
    fn publish(&self, notification: LeadNotification) -> Result<(), NotifyError> {
        info!(
            template = %notification.template,
            lead = %notification.lead_id,
            realtor = ?notification.realtor_id.as_ref().map(RealtorId::as_str),
            details = ?notification.details,
            "lead notification"
        );
        Ok(())
    }
}
