use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier wrapper for inbound leads.
    LeadId
);
string_id!(
    /// Identifier wrapper for realtors taking part in a queue.
    RealtorId
);
string_id!(
    /// A distribution pool, usually one per agency or realtor team.
    QueueId
);
string_id!(PropertyId);

/// Channel a lead arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    Website,
    Portal,
    WhatsApp,
    Phone,
    Referral,
    Manual,
}

/// Contact details supplied by the prospective buyer or renter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadContact {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Intake payload for a lead that still needs a realtor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLead {
    pub queue_id: QueueId,
    #[serde(default)]
    pub property_id: Option<PropertyId>,
    pub contact: LeadContact,
    #[serde(default)]
    pub message: Option<String>,
    pub source: LeadSource,
}

impl NewLead {
    pub fn validate(&self) -> Result<(), LeadValidationError> {
        if self.queue_id.as_str().trim().is_empty() {
            return Err(LeadValidationError::MissingQueue);
        }
        if self.contact.name.trim().is_empty() {
            return Err(LeadValidationError::MissingContactName);
        }

        let email = non_blank(self.contact.email.as_deref());
        let phone = non_blank(self.contact.phone.as_deref());
        if email.is_none() && phone.is_none() {
            return Err(LeadValidationError::MissingContactChannel);
        }
        if let Some(email) = email {
            if !email.contains('@') {
                return Err(LeadValidationError::InvalidEmail(email.to_string()));
            }
        }
        if let Some(phone) = phone {
            let digits = phone.chars().filter(char::is_ascii_digit).count();
            if digits < 8 {
                return Err(LeadValidationError::InvalidPhone(phone.to_string()));
            }
        }

        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Reasons an intake payload is refused before it reaches the queue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LeadValidationError {
    #[error("queue_id is required")]
    MissingQueue,
    #[error("contact name is required")]
    MissingContactName,
    #[error("an email address or phone number is required")]
    MissingContactChannel,
    #[error("'{0}' is not a valid email address")]
    InvalidEmail(String),
    #[error("'{0}' is not a valid phone number")]
    InvalidPhone(String),
    #[error("display name is required")]
    MissingDisplayName,
}

/// CRM pipeline stage tracked per lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    New,
    Contact,
    Visit,
    Proposal,
    Documents,
    Won,
    Lost,
}

impl PipelineStage {
    pub const fn label(self) -> &'static str {
        match self {
            PipelineStage::New => "NEW",
            PipelineStage::Contact => "CONTACT",
            PipelineStage::Visit => "VISIT",
            PipelineStage::Proposal => "PROPOSAL",
            PipelineStage::Documents => "DOCUMENTS",
            PipelineStage::Won => "WON",
            PipelineStage::Lost => "LOST",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, PipelineStage::Won | PipelineStage::Lost)
    }

    const fn rank(self) -> u8 {
        match self {
            PipelineStage::New => 0,
            PipelineStage::Contact => 1,
            PipelineStage::Visit => 2,
            PipelineStage::Proposal => 3,
            PipelineStage::Documents => 4,
            PipelineStage::Won | PipelineStage::Lost => 5,
        }
    }

    /// Stages only move forward; `Lost` is reachable from any open stage.
    pub fn can_advance_to(self, next: PipelineStage) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == PipelineStage::Lost || next.rank() > self.rank()
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Distribution state of a lead, independent of its pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    /// No eligible realtor was available; retried when the queue changes.
    Waiting,
    Reserved,
    Accepted,
    /// Every member of the queue declined or let the reservation lapse.
    Exhausted,
    Closed,
}

impl LeadStatus {
    pub const fn label(self) -> &'static str {
        match self {
            LeadStatus::Waiting => "waiting",
            LeadStatus::Reserved => "reserved",
            LeadStatus::Accepted => "accepted",
            LeadStatus::Exhausted => "exhausted",
            LeadStatus::Closed => "closed",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Time-bounded first right of acceptance held by one realtor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub realtor_id: RealtorId,
    pub offered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub queue_id: QueueId,
    pub property_id: Option<PropertyId>,
    pub contact: LeadContact,
    pub message: Option<String>,
    pub source: LeadSource,
    pub status: LeadStatus,
    pub stage: PipelineStage,
    pub reservation: Option<Reservation>,
    pub assigned_realtor: Option<RealtorId>,
    /// Realtors that rejected, released, or let a reservation expire.
    pub declined_by: Vec<RealtorId>,
    pub offer_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Lead {
    pub fn new(id: LeadId, intake: NewLead, now: DateTime<Utc>) -> Self {
        Self {
            id,
            queue_id: intake.queue_id,
            property_id: intake.property_id,
            contact: intake.contact,
            message: intake.message,
            source: intake.source,
            status: LeadStatus::Waiting,
            stage: PipelineStage::New,
            reservation: None,
            assigned_realtor: None,
            declined_by: Vec::new(),
            offer_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_declined(&self, realtor_id: &RealtorId) -> bool {
        self.declined_by.contains(realtor_id)
    }

    /// Public representation; contact details stay hidden until a realtor owns the lead.
    pub fn view(&self) -> LeadView {
        let contact = match self.status {
            LeadStatus::Accepted | LeadStatus::Closed => Some(self.contact.clone()),
            _ => None,
        };

        LeadView {
            lead_id: self.id.clone(),
            queue_id: self.queue_id.clone(),
            property_id: self.property_id.clone(),
            source: self.source,
            status: self.status.label(),
            stage: self.stage.label(),
            reserved_for: self
                .reservation
                .as_ref()
                .map(|reservation| reservation.realtor_id.clone()),
            reservation_expires_at: self
                .reservation
                .as_ref()
                .map(|reservation| reservation.expires_at),
            assigned_realtor: self.assigned_realtor.clone(),
            offer_count: self.offer_count,
            declined_count: self.declined_by.len(),
            contact,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LeadView {
    pub lead_id: LeadId,
    pub queue_id: QueueId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub property_id: Option<PropertyId>,
    pub source: LeadSource,
    pub status: &'static str,
    pub stage: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_for: Option<RealtorId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_realtor: Option<RealtorId>,
    pub offer_count: u32,
    pub declined_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<LeadContact>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Active,
    Paused,
}

impl EntryStatus {
    pub const fn label(self) -> &'static str {
        match self {
            EntryStatus::Active => "active",
            EntryStatus::Paused => "paused",
        }
    }
}

/// Outcome counters kept per queue membership.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryStats {
    pub offered: u32,
    pub accepted: u32,
    pub rejected: u32,
    pub expired: u32,
    pub won: u32,
    pub lost: u32,
}

/// A realtor's seat in a distribution queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue_id: QueueId,
    pub realtor_id: RealtorId,
    pub display_name: String,
    pub position: u32,
    pub score: i32,
    pub status: EntryStatus,
    pub open_reservations: u32,
    pub last_offered_at: Option<DateTime<Utc>>,
    pub consecutive_expirations: u32,
    pub stats: EntryStats,
    pub joined_at: DateTime<Utc>,
}

/// Audit trail entry recorded alongside every lead mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadEvent {
    pub lead_id: LeadId,
    pub at: DateTime<Utc>,
    pub kind: LeadEventKind,
}

impl LeadEvent {
    pub fn new(lead_id: LeadId, at: DateTime<Utc>, kind: LeadEventKind) -> Self {
        Self { lead_id, at, kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LeadEventKind {
    Created,
    Offered {
        realtor_id: RealtorId,
        expires_at: DateTime<Utc>,
    },
    Accepted {
        realtor_id: RealtorId,
    },
    Rejected {
        realtor_id: RealtorId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Expired {
        realtor_id: RealtorId,
    },
    Released {
        realtor_id: RealtorId,
    },
    ManuallyAssigned {
        realtor_id: RealtorId,
    },
    Exhausted,
    StageChanged {
        from: PipelineStage,
        to: PipelineStage,
    },
}
