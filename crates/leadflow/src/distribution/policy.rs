use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::Reservation;

/// Result of a distribution step that feeds back into a realtor's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Accepted,
    Rejected,
    Expired,
    Won,
    Lost,
}

/// Score weights and queue reordering rules.
///
/// Penalties are stored as positive magnitudes and subtracted when applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    pub initial_score: i32,
    pub accept_points: i32,
    pub quick_accept_bonus: i32,
    /// Share of the reservation window that still counts as a quick accept.
    pub quick_accept_fraction: f32,
    pub reject_penalty: i32,
    pub expire_penalty: i32,
    pub won_points: i32,
    pub lost_penalty: i32,
    pub min_score: i32,
    pub max_score: i32,
    /// Score gap that lets a realtor swap places with a neighbour. Zero disables swaps.
    pub swap_threshold: u32,
    /// Consecutive expirations before a realtor is paused. Zero disables auto-pause.
    pub auto_pause_after_expirations: u32,
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            initial_score: 100,
            accept_points: 5,
            quick_accept_bonus: 3,
            quick_accept_fraction: 0.25,
            reject_penalty: 3,
            expire_penalty: 5,
            won_points: 20,
            lost_penalty: 0,
            min_score: 0,
            max_score: 1000,
            swap_threshold: 10,
            auto_pause_after_expirations: 3,
        }
    }
}

impl ScoringPolicy {
    pub fn score_delta(
        &self,
        outcome: Outcome,
        reservation: Option<&Reservation>,
        at: DateTime<Utc>,
    ) -> i32 {
        match outcome {
            Outcome::Accepted => {
                let quick = reservation
                    .map(|reservation| self.is_quick_accept(reservation, at))
                    .unwrap_or(false);
                if quick {
                    self.accept_points.saturating_add(self.quick_accept_bonus)
                } else {
                    self.accept_points
                }
            }
            Outcome::Rejected => self.reject_penalty.saturating_neg(),
            Outcome::Expired => self.expire_penalty.saturating_neg(),
            Outcome::Won => self.won_points,
            Outcome::Lost => self.lost_penalty.saturating_neg(),
        }
    }

    pub fn apply(&self, score: i32, delta: i32) -> i32 {
        let raw = i64::from(score) + i64::from(delta);
        raw.clamp(i64::from(self.min_score), i64::from(self.max_score)) as i32
    }

    pub fn starting_score(&self) -> i32 {
        self.apply(self.initial_score, 0)
    }

    pub fn should_pause(&self, consecutive_expirations: u32) -> bool {
        self.auto_pause_after_expirations > 0
            && consecutive_expirations >= self.auto_pause_after_expirations
    }

    fn is_quick_accept(&self, reservation: &Reservation, at: DateTime<Utc>) -> bool {
        let window = (reservation.expires_at - reservation.offered_at).num_milliseconds();
        let elapsed = (at - reservation.offered_at).num_milliseconds();
        if window <= 0 || elapsed < 0 {
            return false;
        }
        (elapsed as f64) <= (window as f64) * f64::from(self.quick_accept_fraction)
    }
}

/// Runtime knobs for the distribution service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionConfig {
    pub reservation_window_secs: u32,
    /// Open reservations a realtor may hold at once before being skipped.
    pub max_open_reservations: u32,
    pub sweep_interval_secs: u64,
    pub sweep_batch: usize,
    pub scoring: ScoringPolicy,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            reservation_window_secs: 900,
            max_open_reservations: 1,
            sweep_interval_secs: 30,
            sweep_batch: 100,
            scoring: ScoringPolicy::default(),
        }
    }
}

impl DistributionConfig {
    pub fn reservation_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.reservation_window_secs))
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}
