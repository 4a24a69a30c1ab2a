use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::domain::{
    EntryStatus, Lead, LeadEvent, LeadEventKind, LeadId, LeadStatus, LeadValidationError, NewLead,
    PipelineStage, QueueEntry, QueueId, RealtorId, Reservation,
};
use super::notify::{
    LeadNotification, LeadNotifier, LEAD_EXHAUSTED, LEAD_OFFERED, LEAD_REASSIGNED,
};
use super::policy::{DistributionConfig, Outcome};
use super::queue::{QueueError, RealtorQueue};
use super::store::{DistributionStore, DistributionTx, StoreError};

/// Service composing the transactional store, the queue rules, and outbound notifications.
pub struct LeadDistributionService<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    config: DistributionConfig,
}

fn next_lead_id() -> LeadId {
    LeadId(format!("lead-{}", Uuid::new_v4().simple()))
}

/// Where a lead ended up after an offer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Placement {
    Offered(RealtorId),
    Waiting,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reassignment {
    pub lead_id: LeadId,
    pub realtor_id: RealtorId,
}

/// Summary of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExpiryReport {
    pub expired: Vec<LeadId>,
    pub reoffered: Vec<Reassignment>,
    pub exhausted: Vec<LeadId>,
    pub paused: Vec<RealtorId>,
}

impl ExpiryReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty()
    }
}

impl<S, N> LeadDistributionService<S, N>
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    pub fn new(store: Arc<S>, notifier: Arc<N>, config: DistributionConfig) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }

    /// Record a new lead and offer it to the next eligible realtor in one transaction.
    pub fn register_lead(
        &self,
        intake: NewLead,
        now: DateTime<Utc>,
    ) -> Result<Lead, DistributionError> {
        intake.validate()?;
        let lead_id = next_lead_id();

        let (lead, outbox) = self.store.transaction(|tx| -> Result<_, DistributionError> {
            let mut queue = tx.queue(&intake.queue_id)?;
            let mut lead = Lead::new(lead_id, intake, now);
            tx.insert_lead(&lead)?;
            tx.append_event(&LeadEvent::new(
                lead.id.clone(),
                now,
                LeadEventKind::Created,
            ))?;

            let mut outbox = Vec::new();
            self.place(tx, &mut queue, &mut lead, now, &mut outbox)?;
            tx.save_lead(&lead)?;
            tx.save_queue(&queue)?;
            Ok((lead, outbox))
        })?;

        info!(
            lead = %lead.id,
            queue = %lead.queue_id,
            status = lead.status.label(),
            "lead registered"
        );
        self.dispatch(outbox);
        Ok(lead)
    }

    /// Accept an open reservation. Only the reserved realtor may accept, and only in time.
    pub fn accept(
        &self,
        lead_id: &LeadId,
        realtor_id: &RealtorId,
        now: DateTime<Utc>,
    ) -> Result<Lead, DistributionError> {
        let scoring = &self.config.scoring;
        let (lead, outbox) = self.store.transaction(|tx| -> Result<_, DistributionError> {
            let mut lead = load_lead(tx, lead_id)?;
            let reservation = reserved_for(&lead, realtor_id, "accept")?;
            if reservation.is_expired(now) {
                return Err(DistributionError::ReservationExpired {
                    lead: lead.id.clone(),
                    expired_at: reservation.expires_at,
                });
            }

            let mut queue = tx.queue(&lead.queue_id)?;
            release_hold(&mut queue, &mut lead);
            if let Some(entry) = queue.entry_mut(realtor_id) {
                entry.stats.accepted += 1;
                entry.consecutive_expirations = 0;
            }
            let delta = scoring.score_delta(Outcome::Accepted, Some(&reservation), now);
            queue.adjust_score(realtor_id, delta, scoring)?;

            lead.status = LeadStatus::Accepted;
            lead.assigned_realtor = Some(realtor_id.clone());
            lead.updated_at = now;
            tx.append_event(&LeadEvent::new(
                lead.id.clone(),
                now,
                LeadEventKind::Accepted {
                    realtor_id: realtor_id.clone(),
                },
            ))?;
            tx.save_lead(&lead)?;

            // The accepted reservation freed capacity for leads that were waiting.
            let mut outbox = Vec::new();
            self.offer_pending(tx, &mut queue, now, &mut outbox)?;
            tx.save_queue(&queue)?;
            Ok((lead, outbox))
        })?;

        info!(lead = %lead.id, realtor = %realtor_id, "lead accepted");
        self.dispatch(outbox);
        Ok(lead)
    }

    /// Decline an open reservation; the lead moves on to the next eligible realtor.
    pub fn reject(
        &self,
        lead_id: &LeadId,
        realtor_id: &RealtorId,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Lead, DistributionError> {
        let scoring = &self.config.scoring;
        let (lead, outbox) = self.store.transaction(|tx| -> Result<_, DistributionError> {
            let mut lead = load_lead(tx, lead_id)?;
            let reservation = reserved_for(&lead, realtor_id, "reject")?;

            let mut queue = tx.queue(&lead.queue_id)?;
            release_hold(&mut queue, &mut lead);
            if let Some(entry) = queue.entry_mut(realtor_id) {
                entry.stats.rejected += 1;
            }
            let delta = scoring.score_delta(Outcome::Rejected, Some(&reservation), now);
            queue.adjust_score(realtor_id, delta, scoring)?;

            decline(&mut lead, realtor_id);
            tx.append_event(&LeadEvent::new(
                lead.id.clone(),
                now,
                LeadEventKind::Rejected {
                    realtor_id: realtor_id.clone(),
                    reason,
                },
            ))?;

            let mut outbox = Vec::new();
            self.place(tx, &mut queue, &mut lead, now, &mut outbox)?;
            tx.save_lead(&lead)?;
            self.offer_pending(tx, &mut queue, now, &mut outbox)?;
            tx.save_queue(&queue)?;
            Ok((lead, outbox))
        })?;

        info!(
            lead = %lead.id,
            realtor = %realtor_id,
            status = lead.status.label(),
            "lead rejected"
        );
        self.dispatch(outbox);
        Ok(lead)
    }

    /// Release every reservation that lapsed at or before `now` and re-offer the leads.
    pub fn expire_due(&self, now: DateTime<Utc>) -> Result<ExpiryReport, DistributionError> {
        let scoring = &self.config.scoring;
        let (report, outbox) = self.store.transaction(|tx| -> Result<_, DistributionError> {
            let due = tx.expired_reservations(now, self.config.sweep_batch)?;
            let mut queues: HashMap<QueueId, RealtorQueue> = HashMap::new();
            let mut report = ExpiryReport::default();
            let mut outbox = Vec::new();

            for mut lead in due {
                let queue = match queues.entry(lead.queue_id.clone()) {
                    Entry::Occupied(slot) => slot.into_mut(),
                    Entry::Vacant(slot) => slot.insert(tx.queue(&lead.queue_id)?),
                };
                let Some(reservation) = release_hold(queue, &mut lead) else {
                    continue;
                };
                let realtor_id = reservation.realtor_id.clone();

                if let Some(entry) = queue.entry_mut(&realtor_id) {
                    entry.stats.expired += 1;
                    entry.consecutive_expirations += 1;
                    let pause = entry.status == EntryStatus::Active
                        && scoring.should_pause(entry.consecutive_expirations);

                    let delta = scoring.score_delta(Outcome::Expired, Some(&reservation), now);
                    queue.adjust_score(&realtor_id, delta, scoring)?;
                    if pause {
                        queue.pause(&realtor_id)?;
                        warn!(
                            queue = %lead.queue_id,
                            realtor = %realtor_id,
                            "realtor paused after consecutive expired reservations"
                        );
                        report.paused.push(realtor_id.clone());
                    }
                }

                decline(&mut lead, &realtor_id);
                tx.append_event(&LeadEvent::new(
                    lead.id.clone(),
                    now,
                    LeadEventKind::Expired {
                        realtor_id: realtor_id.clone(),
                    },
                ))?;
                report.expired.push(lead.id.clone());

                match self.place(tx, queue, &mut lead, now, &mut outbox)? {
                    Placement::Offered(next) => report.reoffered.push(Reassignment {
                        lead_id: lead.id.clone(),
                        realtor_id: next,
                    }),
                    Placement::Exhausted => report.exhausted.push(lead.id.clone()),
                    Placement::Waiting => {}
                }
                tx.save_lead(&lead)?;
            }

            for queue in queues.values_mut() {
                report
                    .reoffered
                    .extend(self.offer_pending(tx, queue, now, &mut outbox)?);
                tx.save_queue(queue)?;
            }
            Ok((report, outbox))
        })?;

        if !report.is_empty() {
            info!(
                expired = report.expired.len(),
                reoffered = report.reoffered.len(),
                exhausted = report.exhausted.len(),
                paused = report.paused.len(),
                "expired reservations swept"
            );
        }
        self.dispatch(outbox);
        Ok(report)
    }

    /// Hand an accepted lead back to the pool; the releasing realtor is not offered it again.
    pub fn release(
        &self,
        lead_id: &LeadId,
        realtor_id: &RealtorId,
        now: DateTime<Utc>,
    ) -> Result<Lead, DistributionError> {
        let (lead, outbox) = self.store.transaction(|tx| -> Result<_, DistributionError> {
            let mut lead = load_lead(tx, lead_id)?;
            assigned_to(&lead, realtor_id, "release")?;

            let mut queue = tx.queue(&lead.queue_id)?;
            lead.assigned_realtor = None;
            decline(&mut lead, realtor_id);
            tx.append_event(&LeadEvent::new(
                lead.id.clone(),
                now,
                LeadEventKind::Released {
                    realtor_id: realtor_id.clone(),
                },
            ))?;

            let mut outbox = Vec::new();
            self.place(tx, &mut queue, &mut lead, now, &mut outbox)?;
            tx.save_lead(&lead)?;
            tx.save_queue(&queue)?;
            Ok((lead, outbox))
        })?;

        info!(lead = %lead.id, realtor = %realtor_id, "lead released");
        self.dispatch(outbox);
        Ok(lead)
    }

    /// Administrative override assigning an unowned lead directly to a queue member.
    pub fn assign_manually(
        &self,
        lead_id: &LeadId,
        realtor_id: &RealtorId,
        now: DateTime<Utc>,
    ) -> Result<Lead, DistributionError> {
        let (lead, outbox) = self.store.transaction(|tx| -> Result<_, DistributionError> {
            let mut lead = load_lead(tx, lead_id)?;
            match lead.status {
                LeadStatus::Waiting | LeadStatus::Exhausted | LeadStatus::Reserved => {}
                status => {
                    return Err(DistributionError::InvalidTransition {
                        lead: lead.id.clone(),
                        status,
                        action: "assign",
                    })
                }
            }

            let mut queue = tx.queue(&lead.queue_id)?;
            if !queue.contains(realtor_id) {
                return Err(DistributionError::RealtorNotInQueue {
                    queue: lead.queue_id.clone(),
                    realtor: realtor_id.clone(),
                });
            }

            release_hold(&mut queue, &mut lead);
            lead.status = LeadStatus::Accepted;
            lead.assigned_realtor = Some(realtor_id.clone());
            lead.updated_at = now;
            tx.append_event(&LeadEvent::new(
                lead.id.clone(),
                now,
                LeadEventKind::ManuallyAssigned {
                    realtor_id: realtor_id.clone(),
                },
            ))?;
            tx.save_lead(&lead)?;

            let mut outbox = Vec::new();
            self.offer_pending(tx, &mut queue, now, &mut outbox)?;
            tx.save_queue(&queue)?;
            Ok((lead, outbox))
        })?;

        info!(lead = %lead.id, realtor = %realtor_id, "lead assigned manually");
        self.dispatch(outbox);
        Ok(lead)
    }

    /// Move an accepted lead through the CRM pipeline. `WON` and `LOST` close the lead.
    pub fn advance_stage(
        &self,
        lead_id: &LeadId,
        realtor_id: &RealtorId,
        stage: PipelineStage,
        now: DateTime<Utc>,
    ) -> Result<Lead, DistributionError> {
        let scoring = &self.config.scoring;
        let lead = self.store.transaction(|tx| -> Result<_, DistributionError> {
            let mut lead = load_lead(tx, lead_id)?;
            assigned_to(&lead, realtor_id, "update the stage of")?;

            let from = lead.stage;
            if !from.can_advance_to(stage) {
                return Err(DistributionError::InvalidStage {
                    lead: lead.id.clone(),
                    from,
                    to: stage,
                });
            }

            lead.stage = stage;
            lead.updated_at = now;
            tx.append_event(&LeadEvent::new(
                lead.id.clone(),
                now,
                LeadEventKind::StageChanged { from, to: stage },
            ))?;

            if stage.is_terminal() {
                lead.status = LeadStatus::Closed;
                let outcome = if stage == PipelineStage::Won {
                    Outcome::Won
                } else {
                    Outcome::Lost
                };

                let mut queue = tx.queue(&lead.queue_id)?;
                if let Some(entry) = queue.entry_mut(realtor_id) {
                    match outcome {
                        Outcome::Won => entry.stats.won += 1,
                        _ => entry.stats.lost += 1,
                    }
                    let delta = scoring.score_delta(outcome, None, now);
                    queue.adjust_score(realtor_id, delta, scoring)?;
                    tx.save_queue(&queue)?;
                }
            }

            tx.save_lead(&lead)?;
            Ok(lead)
        })?;

        info!(
            lead = %lead.id,
            realtor = %realtor_id,
            stage = lead.stage.label(),
            "lead stage updated"
        );
        Ok(lead)
    }

    /// Offer waiting or exhausted leads of a queue to members that have not passed on them.
    pub fn retry_waiting(
        &self,
        queue_id: &QueueId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Reassignment>, DistributionError> {
        let (offered, outbox) = self.store.transaction(|tx| -> Result<_, DistributionError> {
            let mut queue = tx.queue(queue_id)?;
            let mut outbox = Vec::new();
            let offered = self.offer_pending(tx, &mut queue, now, &mut outbox)?;
            tx.save_queue(&queue)?;
            Ok((offered, outbox))
        })?;

        self.dispatch(outbox);
        Ok(offered)
    }

    pub fn join_queue(
        &self,
        queue_id: &QueueId,
        realtor_id: &RealtorId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, DistributionError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(LeadValidationError::MissingDisplayName.into());
        }

        let scoring = &self.config.scoring;
        let (entry, outbox) = self.store.transaction(|tx| -> Result<_, DistributionError> {
            let mut queue = tx.queue(queue_id)?;
            queue.join(realtor_id.clone(), display_name.to_string(), scoring, now)?;

            let mut outbox = Vec::new();
            self.offer_pending(tx, &mut queue, now, &mut outbox)?;
            tx.save_queue(&queue)?;
            let entry = queue
                .entry(realtor_id)
                .cloned()
                .ok_or_else(|| DistributionError::RealtorNotInQueue {
                    queue: queue_id.clone(),
                    realtor: realtor_id.clone(),
                })?;
            Ok((entry, outbox))
        })?;

        info!(queue = %queue_id, realtor = %realtor_id, position = entry.position, "realtor joined queue");
        self.dispatch(outbox);
        Ok(entry)
    }

    /// Remove a realtor from a queue. Refused while the realtor holds open reservations.
    pub fn leave_queue(
        &self,
        queue_id: &QueueId,
        realtor_id: &RealtorId,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, DistributionError> {
        let (removed, outbox) = self.store.transaction(|tx| -> Result<_, DistributionError> {
            let mut queue = tx.queue(queue_id)?;
            let open = queue
                .entry(realtor_id)
                .map(|entry| entry.open_reservations)
                .unwrap_or(0);
            if open > 0 {
                return Err(DistributionError::Conflict(format!(
                    "realtor {realtor_id} still holds {open} open reservation(s)"
                )));
            }
            let removed = queue.leave(realtor_id)?;

            let mut outbox = Vec::new();
            self.offer_pending(tx, &mut queue, now, &mut outbox)?;
            tx.save_queue(&queue)?;
            Ok((removed, outbox))
        })?;

        info!(queue = %queue_id, realtor = %realtor_id, "realtor left queue");
        self.dispatch(outbox);
        Ok(removed)
    }

    pub fn pause(
        &self,
        queue_id: &QueueId,
        realtor_id: &RealtorId,
    ) -> Result<Vec<QueueEntry>, DistributionError> {
        let snapshot = self.update_queue(queue_id, |queue| Ok(queue.pause(realtor_id)?))?;
        info!(queue = %queue_id, realtor = %realtor_id, "realtor paused");
        Ok(snapshot)
    }

    /// Reactivate a realtor and immediately offer any leads that were waiting for capacity.
    pub fn resume(
        &self,
        queue_id: &QueueId,
        realtor_id: &RealtorId,
        now: DateTime<Utc>,
    ) -> Result<Vec<QueueEntry>, DistributionError> {
        let (snapshot, outbox) = self.store.transaction(|tx| -> Result<_, DistributionError> {
            let mut queue = tx.queue(queue_id)?;
            queue.resume(realtor_id)?;
            let mut outbox = Vec::new();
            self.offer_pending(tx, &mut queue, now, &mut outbox)?;
            tx.save_queue(&queue)?;
            Ok((queue.snapshot(), outbox))
        })?;

        info!(queue = %queue_id, realtor = %realtor_id, "realtor resumed");
        self.dispatch(outbox);
        Ok(snapshot)
    }

    pub fn swap_positions(
        &self,
        queue_id: &QueueId,
        first: &RealtorId,
        second: &RealtorId,
    ) -> Result<Vec<QueueEntry>, DistributionError> {
        self.update_queue(queue_id, |queue| Ok(queue.swap(first, second)?))
    }

    pub fn move_to(
        &self,
        queue_id: &QueueId,
        realtor_id: &RealtorId,
        position: u32,
    ) -> Result<Vec<QueueEntry>, DistributionError> {
        self.update_queue(queue_id, |queue| {
            queue.move_to(realtor_id, position)?;
            Ok(())
        })
    }

    pub fn rebalance(&self, queue_id: &QueueId) -> Result<Vec<QueueEntry>, DistributionError> {
        self.update_queue(queue_id, |queue| {
            queue.rebalance_by_score();
            Ok(())
        })
    }

    pub fn queue_snapshot(&self, queue_id: &QueueId) -> Result<Vec<QueueEntry>, DistributionError> {
        self.store
            .transaction(|tx| -> Result<_, DistributionError> { Ok(tx.queue(queue_id)?.snapshot()) })
    }

    pub fn lead(&self, lead_id: &LeadId) -> Result<Lead, DistributionError> {
        self.store
            .transaction(|tx| -> Result<_, DistributionError> { load_lead(tx, lead_id) })
    }

    pub fn lead_history(&self, lead_id: &LeadId) -> Result<Vec<LeadEvent>, DistributionError> {
        self.store.transaction(|tx| -> Result<_, DistributionError> {
            load_lead(tx, lead_id)?;
            Ok(tx.events(lead_id)?)
        })
    }

    fn update_queue<F>(
        &self,
        queue_id: &QueueId,
        mutate: F,
    ) -> Result<Vec<QueueEntry>, DistributionError>
    where
        F: FnOnce(&mut RealtorQueue) -> Result<(), DistributionError>,
    {
        self.store.transaction(|tx| -> Result<_, DistributionError> {
            let mut queue = tx.queue(queue_id)?;
            mutate(&mut queue)?;
            tx.save_queue(&queue)?;
            Ok(queue.snapshot())
        })
    }

    /// Reserve the lead for the first eligible realtor, or park it as waiting/exhausted.
    fn place(
        &self,
        tx: &mut dyn DistributionTx,
        queue: &mut RealtorQueue,
        lead: &mut Lead,
        now: DateTime<Utc>,
        outbox: &mut Vec<LeadNotification>,
    ) -> Result<Placement, DistributionError> {
        lead.updated_at = now;
        lead.reservation = None;

        let candidate = queue
            .next_eligible(&lead.declined_by, self.config.max_open_reservations)
            .map(|entry| entry.realtor_id.clone());

        let Some(realtor_id) = candidate else {
            if queue.all_declined(&lead.declined_by) {
                if lead.status != LeadStatus::Exhausted {
                    lead.status = LeadStatus::Exhausted;
                    tx.append_event(&LeadEvent::new(
                        lead.id.clone(),
                        now,
                        LeadEventKind::Exhausted,
                    ))?;
                    outbox.push(notification(LEAD_EXHAUSTED, lead, None));
                }
                return Ok(Placement::Exhausted);
            }
            lead.status = LeadStatus::Waiting;
            return Ok(Placement::Waiting);
        };

        let expires_at = now + self.config.reservation_window();
        lead.reservation = Some(Reservation {
            realtor_id: realtor_id.clone(),
            offered_at: now,
            expires_at,
        });
        lead.status = LeadStatus::Reserved;
        lead.offer_count += 1;

        if let Some(entry) = queue.entry_mut(&realtor_id) {
            entry.open_reservations += 1;
            entry.last_offered_at = Some(now);
            entry.stats.offered += 1;
        }
        queue.rotate_to_back(&realtor_id)?;

        tx.append_event(&LeadEvent::new(
            lead.id.clone(),
            now,
            LeadEventKind::Offered {
                realtor_id: realtor_id.clone(),
                expires_at,
            },
        ))?;

        let template = if lead.offer_count > 1 {
            LEAD_REASSIGNED
        } else {
            LEAD_OFFERED
        };
        let mut message = notification(template, lead, Some(&realtor_id));
        message
            .details
            .insert("expires_at".to_string(), expires_at.to_rfc3339());
        outbox.push(message);

        Ok(Placement::Offered(realtor_id))
    }

    fn offer_pending(
        &self,
        tx: &mut dyn DistributionTx,
        queue: &mut RealtorQueue,
        now: DateTime<Utc>,
        outbox: &mut Vec<LeadNotification>,
    ) -> Result<Vec<Reassignment>, DistributionError> {
        let batch = self.config.sweep_batch;
        let queue_id = queue.queue_id().clone();
        let mut pending = tx.leads_with_status(Some(&queue_id), LeadStatus::Waiting, batch)?;
        pending.extend(tx.leads_with_status(Some(&queue_id), LeadStatus::Exhausted, batch)?);
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut offered = Vec::new();
        for mut lead in pending {
            let eligible = queue
                .next_eligible(&lead.declined_by, self.config.max_open_reservations)
                .is_some();
            // A waiting lead whose remaining members all passed on it is exhausted.
            let newly_exhausted =
                lead.status == LeadStatus::Waiting && queue.all_declined(&lead.declined_by);
            if !eligible && !newly_exhausted {
                continue;
            }
            let placement = self.place(tx, queue, &mut lead, now, outbox)?;
            tx.save_lead(&lead)?;
            if let Placement::Offered(realtor_id) = placement {
                offered.push(Reassignment {
                    lead_id: lead.id.clone(),
                    realtor_id,
                });
            }
        }
        Ok(offered)
    }

    fn dispatch(&self, outbox: Vec<LeadNotification>) {
        for message in outbox {
            let lead_id = message.lead_id.clone();
            if let Err(err) = self.notifier.publish(message) {
                warn!(lead = %lead_id, error = %err, "lead notification failed");
            }
        }
    }
}

fn load_lead(tx: &dyn DistributionTx, lead_id: &LeadId) -> Result<Lead, DistributionError> {
    tx.lead(lead_id)?
        .ok_or_else(|| DistributionError::LeadNotFound(lead_id.clone()))
}

fn reserved_for(
    lead: &Lead,
    realtor_id: &RealtorId,
    action: &'static str,
) -> Result<Reservation, DistributionError> {
    match (lead.status, lead.reservation.as_ref()) {
        (LeadStatus::Reserved, Some(reservation)) if &reservation.realtor_id == realtor_id => {
            Ok(reservation.clone())
        }
        (LeadStatus::Reserved, Some(_)) => Err(DistributionError::NotReservedFor {
            lead: lead.id.clone(),
            realtor: realtor_id.clone(),
        }),
        (status, _) => Err(DistributionError::InvalidTransition {
            lead: lead.id.clone(),
            status,
            action,
        }),
    }
}

fn assigned_to(
    lead: &Lead,
    realtor_id: &RealtorId,
    action: &'static str,
) -> Result<(), DistributionError> {
    if lead.status != LeadStatus::Accepted {
        return Err(DistributionError::InvalidTransition {
            lead: lead.id.clone(),
            status: lead.status,
            action,
        });
    }
    match &lead.assigned_realtor {
        Some(assigned) if assigned == realtor_id => Ok(()),
        _ => Err(DistributionError::NotAssignedTo {
            lead: lead.id.clone(),
            realtor: realtor_id.clone(),
        }),
    }
}

/// Drops the lead's reservation and frees the holder's capacity.
fn release_hold(queue: &mut RealtorQueue, lead: &mut Lead) -> Option<Reservation> {
    let reservation = lead.reservation.take()?;
    if let Some(entry) = queue.entry_mut(&reservation.realtor_id) {
        entry.open_reservations = entry.open_reservations.saturating_sub(1);
    }
    Some(reservation)
}

fn decline(lead: &mut Lead, realtor_id: &RealtorId) {
    if !lead.has_declined(realtor_id) {
        lead.declined_by.push(realtor_id.clone());
    }
}

fn notification(
    template: &str,
    lead: &Lead,
    realtor_id: Option<&RealtorId>,
) -> LeadNotification {
    let mut details = BTreeMap::new();
    details.insert("queue_id".to_string(), lead.queue_id.to_string());
    details.insert("offer_count".to_string(), lead.offer_count.to_string());
    if let Some(property_id) = &lead.property_id {
        details.insert("property_id".to_string(), property_id.to_string());
    }

    LeadNotification {
        template: template.to_string(),
        lead_id: lead.id.clone(),
        realtor_id: realtor_id.cloned(),
        details,
    }
}

/// Error raised by the distribution service.
#[derive(Debug, thiserror::Error)]
pub enum DistributionError {
    #[error(transparent)]
    Validation(#[from] LeadValidationError),
    #[error("lead {0} not found")]
    LeadNotFound(LeadId),
    #[error("realtor {realtor} is not a member of queue {queue}")]
    RealtorNotInQueue { queue: QueueId, realtor: RealtorId },
    #[error("lead {lead} is not reserved for realtor {realtor}")]
    NotReservedFor { lead: LeadId, realtor: RealtorId },
    #[error("lead {lead} is not assigned to realtor {realtor}")]
    NotAssignedTo { lead: LeadId, realtor: RealtorId },
    #[error("reservation for lead {lead} expired at {expired_at}")]
    ReservationExpired {
        lead: LeadId,
        expired_at: DateTime<Utc>,
    },
    #[error("cannot {action} lead {lead} while it is {status}")]
    InvalidTransition {
        lead: LeadId,
        status: LeadStatus,
        action: &'static str,
    },
    #[error("lead {lead} cannot move from {from} to {to}")]
    InvalidStage {
        lead: LeadId,
        from: PipelineStage,
        to: PipelineStage,
    },
    #[error("{0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<QueueError> for DistributionError {
    fn from(value: QueueError) -> Self {
        match value {
            QueueError::UnknownRealtor { queue, realtor } => {
                DistributionError::RealtorNotInQueue { queue, realtor }
            }
            err @ QueueError::AlreadyMember { .. } => DistributionError::Conflict(err.to_string()),
        }
    }
}
