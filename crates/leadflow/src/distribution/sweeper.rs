use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::notify::LeadNotifier;
use super::service::{ExpiryReport, LeadDistributionService};
use super::store::DistributionStore;

/// Background loop releasing lapsed reservations on a fixed interval.
pub struct ExpirySweeper<S, N> {
    service: Arc<LeadDistributionService<S, N>>,
    interval: Duration,
}

impl<S, N> ExpirySweeper<S, N>
where
    S: DistributionStore + 'static,
    N: LeadNotifier + 'static,
{
    pub fn new(service: Arc<LeadDistributionService<S, N>>, interval: Duration) -> Self {
        Self {
            service,
            interval: interval.max(Duration::from_millis(10)),
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once(Utc::now());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("expiry sweeper stopping");
                        break;
                    }
                }
            }
        }
    }

    pub fn sweep_once(&self, now: DateTime<Utc>) -> Option<ExpiryReport> {
        match self.service.expire_due(now) {
            Ok(report) => Some(report),
            Err(err) => {
                warn!(error = %err, "expiry sweep failed");
                None
            }
        }
    }
}
