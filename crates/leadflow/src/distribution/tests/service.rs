use super::common::*;
use std::sync::Arc;

use tokio::sync::watch;

use crate::distribution::domain::{
    EntryStatus, LeadEventKind, LeadId, LeadStatus, LeadValidationError, PipelineStage,
};
use crate::distribution::notify::{LEAD_EXHAUSTED, LEAD_OFFERED, LEAD_REASSIGNED};
use crate::distribution::service::{DistributionError, LeadDistributionService};
use crate::distribution::store::StoreError;
use crate::distribution::sweeper::ExpirySweeper;
use crate::distribution::{InMemoryDistributionStore, Lead};

fn reserved_for(lead: &Lead) -> &str {
    lead.reservation
        .as_ref()
        .map(|reservation| reservation.realtor_id.as_str())
        .expect("lead holds a reservation")
}

fn event_types(service: &MemoryService, lead_id: &LeadId) -> Vec<&'static str> {
    service
        .lead_history(lead_id)
        .expect("history loads")
        .into_iter()
        .map(|event| match event.kind {
            LeadEventKind::Created => "created",
            LeadEventKind::Offered { .. } => "offered",
            LeadEventKind::Accepted { .. } => "accepted",
            LeadEventKind::Rejected { .. } => "rejected",
            LeadEventKind::Expired { .. } => "expired",
            LeadEventKind::Released { .. } => "released",
            LeadEventKind::ManuallyAssigned { .. } => "manually_assigned",
            LeadEventKind::Exhausted => "exhausted",
            LeadEventKind::StageChanged { .. } => "stage_changed",
        })
        .collect()
}

#[test]
fn register_reserves_lead_for_queue_head() {
    let (service, _, notifier) = build_service();
    seed_queue(&service, &["ana", "bruno", "carla"]);

    let lead = service.register_lead(intake(), now()).expect("lead registers");

    assert_eq!(lead.status, LeadStatus::Reserved);
    assert_eq!(reserved_for(&lead), "ana");
    let reservation = lead.reservation.as_ref().expect("reservation");
    assert_eq!(reservation.expires_at, now() + minutes(15));
    assert_eq!(lead.offer_count, 1);
    assert!(lead.view().contact.is_none(), "contact hidden until accepted");

    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    assert_eq!(order(&queue), vec!["bruno", "carla", "ana"]);
    let ana = entry(&queue, "ana");
    assert_eq!(ana.open_reservations, 1);
    assert_eq!(ana.stats.offered, 1);
    assert_eq!(ana.last_offered_at, Some(now()));

    assert_eq!(event_types(&service, &lead.id), vec!["created", "offered"]);
    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].template, LEAD_OFFERED);
    assert_eq!(sent[0].realtor_id.as_ref().map(|id| id.as_str()), Some("ana"));
    assert_eq!(
        sent[0].details.get("property_id").map(String::as_str),
        Some("apt-1204")
    );
}

#[test]
fn consecutive_leads_rotate_round_robin() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana", "bruno", "carla"]);

    let holders: Vec<String> = (0..3)
        .map(|offset| {
            let lead = service
                .register_lead(intake(), now() + minutes(offset))
                .expect("lead registers");
            reserved_for(&lead).to_string()
        })
        .collect();
    assert_eq!(holders, vec!["ana", "bruno", "carla"]);

    let overflow = service
        .register_lead(intake(), now() + minutes(4))
        .expect("lead registers");
    assert_eq!(overflow.status, LeadStatus::Waiting);
    assert!(overflow.reservation.is_none());
}

#[test]
fn register_without_members_waits_until_someone_joins() {
    let (service, _, notifier) = build_service();

    let lead = service.register_lead(intake(), now()).expect("lead registers");
    assert_eq!(lead.status, LeadStatus::Waiting);
    assert!(notifier.sent().is_empty());

    service
        .join_queue(&queue_id(), &realtor("ana"), "Ana Lima", now() + minutes(2))
        .expect("ana joins");

    let stored = service.lead(&lead.id).expect("lead loads");
    assert_eq!(stored.status, LeadStatus::Reserved);
    assert_eq!(reserved_for(&stored), "ana");
    assert_eq!(notifier.templates(), vec![LEAD_OFFERED.to_string()]);
}

#[test]
fn register_rejects_invalid_intake_without_storing() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana"]);
    let mut payload = intake();
    payload.contact.email = None;
    payload.contact.phone = Some("  ".to_string());

    match service.register_lead(payload, now()) {
        Err(DistributionError::Validation(LeadValidationError::MissingContactChannel)) => {}
        other => panic!("expected validation error, got {other:?}"),
    }

    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    assert_eq!(entry(&queue, "ana").open_reservations, 0);
}

#[test]
fn quick_accept_earns_bonus_and_reveals_contact() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana", "bruno"]);
    let lead = service.register_lead(intake(), now()).expect("lead registers");

    let accepted = service
        .accept(&lead.id, &realtor("ana"), now() + minutes(2))
        .expect("ana accepts");

    assert_eq!(accepted.status, LeadStatus::Accepted);
    assert_eq!(
        accepted.assigned_realtor.as_ref().map(|id| id.as_str()),
        Some("ana")
    );
    assert!(accepted.reservation.is_none());
    assert_eq!(
        accepted.view().contact.map(|contact| contact.name),
        Some("Marina Costa".to_string())
    );

    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    let ana = entry(&queue, "ana");
    assert_eq!(ana.score, 108);
    assert_eq!(ana.open_reservations, 0);
    assert_eq!(ana.stats.accepted, 1);
}

#[test]
fn late_accept_earns_base_points_only() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana"]);
    let lead = service.register_lead(intake(), now()).expect("lead registers");

    service
        .accept(&lead.id, &realtor("ana"), now() + minutes(10))
        .expect("ana accepts");

    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    assert_eq!(entry(&queue, "ana").score, 105);
}

#[test]
fn accept_by_other_realtor_is_refused() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana", "bruno"]);
    let lead = service.register_lead(intake(), now()).expect("lead registers");

    match service.accept(&lead.id, &realtor("bruno"), now()) {
        Err(DistributionError::NotReservedFor { realtor, .. }) => {
            assert_eq!(realtor.as_str(), "bruno")
        }
        other => panic!("expected not reserved error, got {other:?}"),
    }

    let stored = service.lead(&lead.id).expect("lead loads");
    assert_eq!(stored.status, LeadStatus::Reserved);
    assert_eq!(reserved_for(&stored), "ana");
}

#[test]
fn accept_after_window_reports_expiry() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana"]);
    let lead = service.register_lead(intake(), now()).expect("lead registers");

    match service.accept(&lead.id, &realtor("ana"), now() + minutes(15)) {
        Err(DistributionError::ReservationExpired { expired_at, .. }) => {
            assert_eq!(expired_at, now() + minutes(15))
        }
        other => panic!("expected expired reservation, got {other:?}"),
    }

    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    assert_eq!(entry(&queue, "ana").open_reservations, 1);
}

#[test]
fn accept_unknown_lead_is_not_found() {
    let (service, _, _) = build_service();

    assert!(matches!(
        service.accept(&LeadId::new("lead-missing"), &realtor("ana"), now()),
        Err(DistributionError::LeadNotFound(_))
    ));
}

#[test]
fn accept_frees_capacity_for_waiting_leads() {
    let (service, _, notifier) = build_service();
    seed_queue(&service, &["ana"]);
    let first = service.register_lead(intake(), now()).expect("first lead");
    let second = service
        .register_lead(intake(), now() + minutes(1))
        .expect("second lead");
    assert_eq!(second.status, LeadStatus::Waiting);

    service
        .accept(&first.id, &realtor("ana"), now() + minutes(2))
        .expect("ana accepts");

    let second = service.lead(&second.id).expect("second loads");
    assert_eq!(second.status, LeadStatus::Reserved);
    assert_eq!(reserved_for(&second), "ana");
    assert_eq!(
        notifier.templates(),
        vec![LEAD_OFFERED.to_string(), LEAD_OFFERED.to_string()]
    );
}

#[test]
fn reject_moves_lead_to_next_realtor() {
    let (service, _, notifier) = build_service();
    seed_queue(&service, &["ana", "bruno"]);
    let lead = service.register_lead(intake(), now()).expect("lead registers");

    let rejected = service
        .reject(
            &lead.id,
            &realtor("ana"),
            Some("outside my region".to_string()),
            now() + minutes(1),
        )
        .expect("ana rejects");

    assert_eq!(rejected.status, LeadStatus::Reserved);
    assert_eq!(reserved_for(&rejected), "bruno");
    assert_eq!(rejected.offer_count, 2);
    assert!(rejected.has_declined(&realtor("ana")));

    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    let ana = entry(&queue, "ana");
    assert_eq!(ana.score, 97);
    assert_eq!(ana.stats.rejected, 1);
    assert_eq!(ana.open_reservations, 0);

    assert_eq!(
        event_types(&service, &lead.id),
        vec!["created", "offered", "rejected", "offered"]
    );
    assert_eq!(
        notifier.templates(),
        vec![LEAD_OFFERED.to_string(), LEAD_REASSIGNED.to_string()]
    );
}

#[test]
fn lead_declined_by_everyone_is_exhausted_until_a_new_member_joins() {
    let (service, _, notifier) = build_service();
    seed_queue(&service, &["ana", "bruno"]);
    let lead = service.register_lead(intake(), now()).expect("lead registers");

    service
        .reject(&lead.id, &realtor("ana"), None, now())
        .expect("ana rejects");
    let exhausted = service
        .reject(&lead.id, &realtor("bruno"), None, now())
        .expect("bruno rejects");

    assert_eq!(exhausted.status, LeadStatus::Exhausted);
    assert!(exhausted.reservation.is_none());
    assert_eq!(
        event_types(&service, &lead.id).last().copied(),
        Some("exhausted")
    );
    assert!(notifier.templates().contains(&LEAD_EXHAUSTED.to_string()));

    let retried = service
        .retry_waiting(&queue_id(), now() + minutes(5))
        .expect("retry runs");
    assert!(retried.is_empty(), "nobody new can take the lead");

    service
        .join_queue(&queue_id(), &realtor("carla"), "Carla Souza", now() + minutes(6))
        .expect("carla joins");

    let reoffered = service.lead(&lead.id).expect("lead loads");
    assert_eq!(reoffered.status, LeadStatus::Reserved);
    assert_eq!(reserved_for(&reoffered), "carla");
    assert_eq!(reoffered.offer_count, 3);
}

#[test]
fn expired_reservation_is_reoffered_and_penalised() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana", "bruno"]);
    let lead = service.register_lead(intake(), now()).expect("lead registers");

    let early = service
        .expire_due(now() + minutes(14))
        .expect("sweep runs");
    assert!(early.is_empty());

    let report = service
        .expire_due(now() + minutes(15))
        .expect("sweep runs");
    assert_eq!(report.expired, vec![lead.id.clone()]);
    assert_eq!(report.reoffered.len(), 1);
    assert_eq!(report.reoffered[0].realtor_id.as_str(), "bruno");
    assert!(report.paused.is_empty());

    let stored = service.lead(&lead.id).expect("lead loads");
    assert_eq!(reserved_for(&stored), "bruno");
    assert!(stored.has_declined(&realtor("ana")));

    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    let ana = entry(&queue, "ana");
    assert_eq!(ana.score, 95);
    assert_eq!(ana.stats.expired, 1);
    assert_eq!(ana.consecutive_expirations, 1);
    assert_eq!(ana.open_reservations, 0);
}

#[test]
fn repeated_expirations_pause_the_realtor() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana"]);
    let leads: Vec<Lead> = (0..3)
        .map(|offset| {
            service
                .register_lead(intake(), now() + chrono::Duration::seconds(offset))
                .expect("lead registers")
        })
        .collect();
    assert_eq!(leads[1].status, LeadStatus::Waiting);

    let first = service
        .expire_due(now() + minutes(15))
        .expect("first sweep");
    assert_eq!(first.exhausted, vec![leads[0].id.clone()]);
    assert_eq!(first.reoffered.len(), 1);
    assert_eq!(first.reoffered[0].lead_id, leads[1].id);

    service
        .expire_due(now() + minutes(30))
        .expect("second sweep");
    let third = service
        .expire_due(now() + minutes(45))
        .expect("third sweep");
    assert_eq!(third.paused, vec![realtor("ana")]);

    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    let ana = entry(&queue, "ana");
    assert_eq!(ana.status, EntryStatus::Paused);
    assert_eq!(ana.score, 85);
    assert_eq!(ana.consecutive_expirations, 3);

    service
        .join_queue(&queue_id(), &realtor("bruno"), "Bruno Alves", now() + minutes(50))
        .expect("bruno joins");
    let oldest = service.lead(&leads[0].id).expect("lead loads");
    assert_eq!(reserved_for(&oldest), "bruno");
}

#[test]
fn paused_realtor_is_skipped_until_resumed() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana"]);
    service
        .pause(&queue_id(), &realtor("ana"))
        .expect("ana pauses");

    let lead = service.register_lead(intake(), now()).expect("lead registers");
    assert_eq!(lead.status, LeadStatus::Waiting);

    let queue = service
        .resume(&queue_id(), &realtor("ana"), now() + minutes(1))
        .expect("ana resumes");
    assert_eq!(entry(&queue, "ana").status, EntryStatus::Active);

    let stored = service.lead(&lead.id).expect("lead loads");
    assert_eq!(reserved_for(&stored), "ana");
}

#[test]
fn release_hands_lead_to_next_realtor_without_penalty() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana", "bruno"]);
    let lead = service.register_lead(intake(), now()).expect("lead registers");

    assert!(matches!(
        service.release(&lead.id, &realtor("ana"), now()),
        Err(DistributionError::InvalidTransition { status: LeadStatus::Reserved, .. })
    ));

    service
        .accept(&lead.id, &realtor("ana"), now())
        .expect("ana accepts");
    assert!(matches!(
        service.release(&lead.id, &realtor("bruno"), now()),
        Err(DistributionError::NotAssignedTo { .. })
    ));

    let released = service
        .release(&lead.id, &realtor("ana"), now() + minutes(30))
        .expect("ana releases");

    assert_eq!(released.status, LeadStatus::Reserved);
    assert_eq!(reserved_for(&released), "bruno");
    assert!(released.assigned_realtor.is_none());
    assert!(released.has_declined(&realtor("ana")));

    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    assert_eq!(entry(&queue, "ana").score, 108);
}

#[test]
fn manual_assignment_takes_over_exhausted_and_reserved_leads() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana", "bruno"]);
    let exhausted = service.register_lead(intake(), now()).expect("lead registers");
    service
        .reject(&exhausted.id, &realtor("ana"), None, now())
        .expect("ana rejects");
    service
        .reject(&exhausted.id, &realtor("bruno"), None, now())
        .expect("bruno rejects");

    let assigned = service
        .assign_manually(&exhausted.id, &realtor("bruno"), now() + minutes(1))
        .expect("manual assignment");
    assert_eq!(assigned.status, LeadStatus::Accepted);
    assert_eq!(
        assigned.assigned_realtor.as_ref().map(|id| id.as_str()),
        Some("bruno")
    );

    let reserved = service
        .register_lead(intake(), now() + minutes(2))
        .expect("lead registers");
    let holder = realtor(reserved_for(&reserved));
    let other = if holder.as_str() == "ana" { "bruno" } else { "ana" };
    service
        .assign_manually(&reserved.id, &realtor(other), now() + minutes(3))
        .expect("manual assignment over reservation");

    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    assert_eq!(entry(&queue, holder.as_str()).open_reservations, 0);

    assert!(matches!(
        service.assign_manually(&reserved.id, &realtor("ana"), now()),
        Err(DistributionError::InvalidTransition { status: LeadStatus::Accepted, .. })
    ));
}

#[test]
fn manual_assignment_requires_queue_membership() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana"]);
    let lead = service.register_lead(intake(), now()).expect("lead registers");

    match service.assign_manually(&lead.id, &realtor("zeca"), now()) {
        Err(DistributionError::RealtorNotInQueue { realtor, .. }) => {
            assert_eq!(realtor.as_str(), "zeca")
        }
        other => panic!("expected membership error, got {other:?}"),
    }
}

#[test]
fn pipeline_moves_forward_and_won_rewards_the_realtor() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana", "bruno"]);
    let lead = service.register_lead(intake(), now()).expect("lead registers");
    service
        .accept(&lead.id, &realtor("ana"), now())
        .expect("ana accepts");

    for stage in [PipelineStage::Contact, PipelineStage::Visit] {
        service
            .advance_stage(&lead.id, &realtor("ana"), stage, now() + minutes(5))
            .expect("stage advances");
    }

    match service.advance_stage(&lead.id, &realtor("ana"), PipelineStage::Contact, now()) {
        Err(DistributionError::InvalidStage { from, to, .. }) => {
            assert_eq!(from, PipelineStage::Visit);
            assert_eq!(to, PipelineStage::Contact);
        }
        other => panic!("expected invalid stage, got {other:?}"),
    }
    assert!(matches!(
        service.advance_stage(&lead.id, &realtor("bruno"), PipelineStage::Proposal, now()),
        Err(DistributionError::NotAssignedTo { .. })
    ));

    let won = service
        .advance_stage(&lead.id, &realtor("ana"), PipelineStage::Won, now() + minutes(60))
        .expect("deal won");
    assert_eq!(won.status, LeadStatus::Closed);
    assert_eq!(won.stage, PipelineStage::Won);

    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    assert_eq!(order(&queue), vec!["ana", "bruno"]);
    let ana = entry(&queue, "ana");
    assert_eq!(ana.score, 128);
    assert_eq!(ana.stats.won, 1);

    assert!(matches!(
        service.advance_stage(&lead.id, &realtor("ana"), PipelineStage::Lost, now()),
        Err(DistributionError::InvalidTransition { status: LeadStatus::Closed, .. })
    ));
}

#[test]
fn lost_is_reachable_from_any_open_stage() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana"]);
    let lead = service.register_lead(intake(), now()).expect("lead registers");
    service
        .accept(&lead.id, &realtor("ana"), now() + minutes(10))
        .expect("ana accepts");

    let lost = service
        .advance_stage(&lead.id, &realtor("ana"), PipelineStage::Lost, now() + minutes(20))
        .expect("deal lost");

    assert_eq!(lost.status, LeadStatus::Closed);
    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    let ana = entry(&queue, "ana");
    assert_eq!(ana.stats.lost, 1);
    assert_eq!(ana.score, 105);
}

#[test]
fn leave_is_refused_while_holding_reservations() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana", "bruno"]);
    let lead = service.register_lead(intake(), now()).expect("lead registers");

    assert!(matches!(
        service.leave_queue(&queue_id(), &realtor("ana"), now()),
        Err(DistributionError::Conflict(_))
    ));

    service
        .accept(&lead.id, &realtor("ana"), now())
        .expect("ana accepts");
    let removed = service
        .leave_queue(&queue_id(), &realtor("ana"), now())
        .expect("ana leaves");
    assert_eq!(removed.realtor_id.as_str(), "ana");

    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    assert_eq!(order(&queue), vec!["bruno"]);
    assert_eq!(entry(&queue, "bruno").position, 1);
}

#[test]
fn waiting_lead_is_exhausted_when_the_last_undeclined_member_leaves() {
    let (service, _, notifier) = build_service();
    seed_queue(&service, &["ana", "bruno"]);
    service
        .pause(&queue_id(), &realtor("bruno"))
        .expect("bruno pauses");

    let lead = service.register_lead(intake(), now()).expect("lead registers");
    let waiting = service
        .reject(&lead.id, &realtor("ana"), None, now() + minutes(1))
        .expect("ana rejects");
    assert_eq!(waiting.status, LeadStatus::Waiting);

    service
        .leave_queue(&queue_id(), &realtor("bruno"), now() + minutes(2))
        .expect("bruno leaves");

    let stored = service.lead(&lead.id).expect("lead loads");
    assert_eq!(stored.status, LeadStatus::Exhausted);
    assert!(stored.reservation.is_none());
    assert_eq!(
        notifier.templates(),
        vec![LEAD_OFFERED.to_string(), LEAD_EXHAUSTED.to_string()]
    );

    let history = service.lead_history(&lead.id).expect("history loads");
    assert!(matches!(
        history.last().map(|event| &event.kind),
        Some(LeadEventKind::Exhausted)
    ));

    assert!(service
        .retry_waiting(&queue_id(), now() + minutes(3))
        .expect("retry runs")
        .is_empty());
    assert_eq!(notifier.templates().len(), 2);
}

#[test]
fn join_twice_conflicts_and_blank_names_are_rejected() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana"]);

    assert!(matches!(
        service.join_queue(&queue_id(), &realtor("ana"), "Ana", now()),
        Err(DistributionError::Conflict(_))
    ));
    assert!(matches!(
        service.join_queue(&queue_id(), &realtor("bruno"), "   ", now()),
        Err(DistributionError::Validation(LeadValidationError::MissingDisplayName))
    ));
}

#[test]
fn admin_reordering_is_persisted() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana", "bruno", "carla"]);

    let swapped = service
        .swap_positions(&queue_id(), &realtor("ana"), &realtor("carla"))
        .expect("swap");
    assert_eq!(order(&swapped), vec!["carla", "bruno", "ana"]);

    service
        .move_to(&queue_id(), &realtor("ana"), 1)
        .expect("move");
    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    assert_eq!(order(&queue), vec!["ana", "carla", "bruno"]);

    let lead = service.register_lead(intake(), now()).expect("lead registers");
    service
        .reject(&lead.id, &realtor("ana"), None, now())
        .expect("ana rejects");

    let rebalanced = service.rebalance(&queue_id()).expect("rebalance");
    assert_eq!(order(&rebalanced), vec!["bruno", "carla", "ana"]);

    assert!(matches!(
        service.move_to(&queue_id(), &realtor("zeca"), 1),
        Err(DistributionError::RealtorNotInQueue { .. })
    ));
}

#[test]
fn concurrent_registrations_never_double_book_a_realtor() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana", "bruno", "carla"]);

    let leads: Vec<Lead> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..6)
            .map(|offset| {
                let service = &service;
                scope.spawn(move || {
                    service
                        .register_lead(intake(), now() + chrono::Duration::seconds(offset))
                        .expect("lead registers")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread completes"))
            .collect()
    });

    let mut holders: Vec<&str> = leads
        .iter()
        .filter(|lead| lead.status == LeadStatus::Reserved)
        .map(reserved_for)
        .collect();
    holders.sort_unstable();
    assert_eq!(holders, vec!["ana", "bruno", "carla"]);
    assert_eq!(
        leads
            .iter()
            .filter(|lead| lead.status == LeadStatus::Waiting)
            .count(),
        3
    );

    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    assert!(queue.iter().all(|entry| entry.open_reservations == 1));
}

#[test]
fn racing_accepts_settle_on_a_single_winner() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana"]);
    let lead = service.register_lead(intake(), now()).expect("lead registers");

    let results: Vec<Result<Lead, DistributionError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let service = &service;
                let lead_id = lead.id.clone();
                scope.spawn(move || service.accept(&lead_id, &realtor("ana"), now()))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread completes"))
            .collect()
    });

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results.iter().filter_map(|result| result.as_ref().err()).all(|err| matches!(
        err,
        DistributionError::InvalidTransition { status: LeadStatus::Accepted, .. }
    )));

    let queue = service.queue_snapshot(&queue_id()).expect("snapshot");
    let ana = entry(&queue, "ana");
    assert_eq!(ana.stats.accepted, 1);
    assert_eq!(ana.score, 108);
}

#[test]
fn notification_failures_do_not_undo_distribution() {
    let store = Arc::new(InMemoryDistributionStore::default());
    let service = LeadDistributionService::new(store, Arc::new(FailingNotifier), config());
    seed_queue(&service, &["ana"]);

    let lead = service.register_lead(intake(), now()).expect("lead registers");

    let stored = service.lead(&lead.id).expect("lead loads");
    assert_eq!(stored.status, LeadStatus::Reserved);
}

#[test]
fn store_outage_surfaces_as_store_error() {
    let service = LeadDistributionService::new(
        Arc::new(UnavailableStore),
        Arc::new(MemoryNotifier::default()),
        config(),
    );

    match service.register_lead(intake(), now()) {
        Err(DistributionError::Store(StoreError::Unavailable(message))) => {
            assert_eq!(message, "database offline")
        }
        other => panic!("expected store error, got {other:?}"),
    }
}

#[test]
fn history_of_unknown_lead_is_not_found() {
    let (service, _, _) = build_service();

    assert!(matches!(
        service.lead_history(&LeadId::new("lead-missing")),
        Err(DistributionError::LeadNotFound(_))
    ));
}

#[test]
fn sweeper_tick_expires_due_reservations() {
    let (service, _, _) = build_service();
    seed_queue(&service, &["ana", "bruno"]);
    let lead = service.register_lead(intake(), now()).expect("lead registers");
    let service = Arc::new(service);
    let sweeper = ExpirySweeper::new(service.clone(), std::time::Duration::from_secs(30));

    let report = sweeper
        .sweep_once(now() + minutes(16))
        .expect("sweep succeeds");

    assert_eq!(report.expired, vec![lead.id.clone()]);
    let stored = service.lead(&lead.id).expect("lead loads");
    assert_eq!(reserved_for(&stored), "bruno");
}

#[tokio::test]
async fn sweeper_stops_when_shutdown_is_signalled() {
    let (service, _, _) = build_service();
    let sweeper = ExpirySweeper::new(Arc::new(service), std::time::Duration::from_millis(20));
    let (shutdown, receiver) = watch::channel(false);

    let handle = sweeper.spawn(receiver);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    shutdown.send(true).expect("sweeper listening");

    tokio::time::timeout(std::time::Duration::from_secs(1), handle)
        .await
        .expect("sweeper stops in time")
        .expect("sweeper task completes");
}
