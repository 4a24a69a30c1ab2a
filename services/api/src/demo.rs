use crate::infra::InMemoryNotifier;
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use leadflow::distribution::{
    DistributionConfig, InMemoryDistributionStore, Lead, LeadContact, LeadDistributionService,
    LeadSource, NewLead, PipelineStage, PropertyId, QueueEntry, QueueId, RealtorId,
};
use leadflow::error::AppError;
use std::sync::Arc;

type DemoService = LeadDistributionService<InMemoryDistributionStore, InMemoryNotifier>;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Number of inbound leads to simulate.
    #[arg(long, default_value_t = 4)]
    pub(crate) leads: usize,
    /// Reservation window in seconds used for the simulated queue.
    #[arg(long, default_value_t = 900)]
    pub(crate) window_secs: u32,
    /// Print the audit trail of every lead at the end of the demo.
    #[arg(long)]
    pub(crate) history: bool,
}

const REALTORS: [(&str, &str); 3] = [
    ("ana", "Ana Lima"),
    ("bruno", "Bruno Alves"),
    ("carla", "Carla Souza"),
];

const PROSPECTS: [(&str, LeadSource); 5] = [
    ("Paulo Mendes", LeadSource::Portal),
    ("Rita Campos", LeadSource::Website),
    ("Sergio Dias", LeadSource::WhatsApp),
    ("Tania Rocha", LeadSource::Phone),
    ("Ursula Prado", LeadSource::Referral),
];

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs {
        leads,
        window_secs,
        history,
    } = args;

    let config = DistributionConfig {
        reservation_window_secs: window_secs.max(60),
        ..DistributionConfig::default()
    };
    let window = config.reservation_window();
    let notifier = Arc::new(InMemoryNotifier::default());
    let service = LeadDistributionService::new(
        Arc::new(InMemoryDistributionStore::default()),
        notifier.clone(),
        config,
    );
    let queue_id = QueueId::new("demo-agency");
    let start = Utc::now();

    println!("Lead distribution demo");
    for (id, name) in REALTORS {
        service.join_queue(&queue_id, &RealtorId::new(id), name, start)?;
    }
    print_queue("Initial queue", &service.queue_snapshot(&queue_id)?);

    println!("\nInbound leads");
    let mut registered = Vec::new();
    for index in 0..leads.max(1) {
        let (name, source) = PROSPECTS[index % PROSPECTS.len()];
        let at = start + Duration::minutes(index as i64);
        let lead = service.register_lead(prospect(&queue_id, name, source, index), at)?;
        println!("- {} via {:?} -> {}", lead.id, source, placement(&lead));
        registered.push(lead);
    }
    print_notifications(&notifier);

    let mut cursor = start;
    println!("\nRealtor responses");
    for lead in &registered {
        let lead = service.lead(&lead.id)?;
        let Some(reservation) = lead.reservation.clone() else {
            continue;
        };
        // Answer half a minute after the offer so every response lands inside the window.
        let at = reservation.offered_at + Duration::seconds(30);
        cursor = cursor.max(at);
        match reservation.realtor_id.as_str() {
            "ana" => {
                let accepted = service.accept(&lead.id, &reservation.realtor_id, at)?;
                println!("- ana accepted {} ({})", accepted.id, placement(&accepted));
            }
            "bruno" => {
                let rejected = service.reject(
                    &lead.id,
                    &reservation.realtor_id,
                    Some("outside my neighbourhood".to_string()),
                    at,
                )?;
                println!("- bruno rejected {} -> {}", rejected.id, placement(&rejected));
            }
            other => println!("- {other} did not answer {}", lead.id),
        }
    }
    print_notifications(&notifier);

    let sweep_at = cursor + window;
    let report = service.expire_due(sweep_at)?;
    println!(
        "\nExpiry sweep at +{} min: {} expired, {} re-offered, {} exhausted, {} paused",
        (sweep_at - start).num_minutes(),
        report.expired.len(),
        report.reoffered.len(),
        report.exhausted.len(),
        report.paused.len()
    );
    for reassignment in &report.reoffered {
        println!("- {} -> {}", reassignment.lead_id, reassignment.realtor_id);
    }
    print_notifications(&notifier);

    if let Some(won) = close_first_accepted(&service, &registered, sweep_at)? {
        println!("\nPipeline: {} reached {} for ana", won.id, won.stage);
    }

    print_queue("\nFinal queue", &service.queue_snapshot(&queue_id)?);

    if history {
        println!("\nAudit trail");
        for lead in &registered {
            println!("- {}", lead.id);
            for event in service.lead_history(&lead.id)? {
                match serde_json::to_string(&event.kind) {
                    Ok(kind) => println!("    {} {}", event.at.format("%H:%M:%S"), kind),
                    Err(err) => println!("    event unavailable: {err}"),
                }
            }
        }
    }

    Ok(())
}

fn prospect(queue_id: &QueueId, name: &str, source: LeadSource, index: usize) -> NewLead {
    let handle = name
        .split_whitespace()
        .next()
        .unwrap_or("lead")
        .to_ascii_lowercase();
    NewLead {
        queue_id: queue_id.clone(),
        property_id: Some(PropertyId::new(format!("listing-{}", 100 + index))),
        contact: LeadContact {
            name: name.to_string(),
            email: Some(format!("{handle}@example.com")),
            phone: None,
        },
        message: None,
        source,
    }
}

fn close_first_accepted(
    service: &DemoService,
    registered: &[Lead],
    at: DateTime<Utc>,
) -> Result<Option<Lead>, AppError> {
    let ana = RealtorId::new("ana");
    for lead in registered {
        let lead = service.lead(&lead.id)?;
        if lead.assigned_realtor.as_ref() != Some(&ana) {
            continue;
        }
        service.advance_stage(&lead.id, &ana, PipelineStage::Visit, at)?;
        let won = service.advance_stage(&lead.id, &ana, PipelineStage::Won, at)?;
        return Ok(Some(won));
    }
    Ok(None)
}

fn placement(lead: &Lead) -> String {
    match (&lead.reservation, &lead.assigned_realtor) {
        (Some(reservation), _) => format!(
            "reserved for {} until {}",
            reservation.realtor_id,
            reservation.expires_at.format("%H:%M")
        ),
        (None, Some(realtor)) => format!("{} with {}", lead.status, realtor),
        (None, None) => lead.status.to_string(),
    }
}

fn print_queue(title: &str, entries: &[QueueEntry]) {
    println!("{title}");
    for entry in entries {
        println!(
            "  {}. {:<12} score {:>4} | {:<6} | open {}",
            entry.position,
            entry.display_name,
            entry.score,
            entry.status.label(),
            entry.open_reservations
        );
    }
}

fn print_notifications(notifier: &InMemoryNotifier) {
    let sent = notifier.drain();
    if sent.is_empty() {
        return;
    }
    println!("  Notifications:");
    for notification in sent {
        let recipient = notification
            .realtor_id
            .as_ref()
            .map(|realtor| realtor.to_string())
            .unwrap_or_else(|| "queue admins".to_string());
        println!(
            "    - template={} lead={} -> {}",
            notification.template, notification.lead_id, recipient
        );
    }
}
