use chrono::{DateTime, Utc};

use super::domain::{EntryStats, EntryStatus, QueueEntry, QueueId, RealtorId};
use super::policy::ScoringPolicy;

/// Ordered view over a single queue's entries.
///
/// Positions are always dense and start at 1; every mutating call renumbers.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtorQueue {
    queue_id: QueueId,
    entries: Vec<QueueEntry>,
}

impl RealtorQueue {
    pub fn new(queue_id: QueueId, mut entries: Vec<QueueEntry>) -> Self {
        entries.sort_by_key(|entry| entry.position);
        let mut queue = Self { queue_id, entries };
        queue.renumber();
        queue
    }

    pub fn queue_id(&self) -> &QueueId {
        &self.queue_id
    }

    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, realtor_id: &RealtorId) -> bool {
        self.entries
            .iter()
            .any(|entry| &entry.realtor_id == realtor_id)
    }

    pub fn entry(&self, realtor_id: &RealtorId) -> Option<&QueueEntry> {
        self.entries
            .iter()
            .find(|entry| &entry.realtor_id == realtor_id)
    }

    pub(crate) fn entry_mut(&mut self, realtor_id: &RealtorId) -> Option<&mut QueueEntry> {
        self.entries
            .iter_mut()
            .find(|entry| &entry.realtor_id == realtor_id)
    }

    pub fn join(
        &mut self,
        realtor_id: RealtorId,
        display_name: String,
        policy: &ScoringPolicy,
        now: DateTime<Utc>,
    ) -> Result<&QueueEntry, QueueError> {
        if self.contains(&realtor_id) {
            return Err(QueueError::AlreadyMember {
                queue: self.queue_id.clone(),
                realtor: realtor_id,
            });
        }

        self.entries.push(QueueEntry {
            queue_id: self.queue_id.clone(),
            realtor_id,
            display_name,
            position: 0,
            score: policy.starting_score(),
            status: EntryStatus::Active,
            open_reservations: 0,
            last_offered_at: None,
            consecutive_expirations: 0,
            stats: EntryStats::default(),
            joined_at: now,
        });
        self.renumber();

        Ok(&self.entries[self.entries.len() - 1])
    }

    pub fn leave(&mut self, realtor_id: &RealtorId) -> Result<QueueEntry, QueueError> {
        let index = self.index_of(realtor_id)?;
        let removed = self.entries.remove(index);
        self.renumber();
        Ok(removed)
    }

    pub fn pause(&mut self, realtor_id: &RealtorId) -> Result<(), QueueError> {
        let index = self.index_of(realtor_id)?;
        self.entries[index].status = EntryStatus::Paused;
        Ok(())
    }

    pub fn resume(&mut self, realtor_id: &RealtorId) -> Result<(), QueueError> {
        let index = self.index_of(realtor_id)?;
        let entry = &mut self.entries[index];
        entry.status = EntryStatus::Active;
        entry.consecutive_expirations = 0;
        Ok(())
    }

    /// First active entry, in position order, that is not excluded and still has capacity.
    pub fn next_eligible(
        &self,
        excluded: &[RealtorId],
        max_open_reservations: u32,
    ) -> Option<&QueueEntry> {
        self.entries.iter().find(|entry| {
            entry.status == EntryStatus::Active
                && entry.open_reservations < max_open_reservations
                && !excluded.contains(&entry.realtor_id)
        })
    }

    /// True when every member has already passed on the lead.
    pub fn all_declined(&self, declined: &[RealtorId]) -> bool {
        !self.entries.is_empty()
            && self
                .entries
                .iter()
                .all(|entry| declined.contains(&entry.realtor_id))
    }

    /// Round robin step: the realtor moves to the tail and everyone behind shifts forward.
    pub fn rotate_to_back(&mut self, realtor_id: &RealtorId) -> Result<(), QueueError> {
        let index = self.index_of(realtor_id)?;
        let entry = self.entries.remove(index);
        self.entries.push(entry);
        self.renumber();
        Ok(())
    }

    /// Applies a clamped score change and performs at most one neighbour swap.
    pub fn adjust_score(
        &mut self,
        realtor_id: &RealtorId,
        delta: i32,
        policy: &ScoringPolicy,
    ) -> Result<i32, QueueError> {
        let index = self.index_of(realtor_id)?;
        let score = policy.apply(self.entries[index].score, delta);
        self.entries[index].score = score;

        if policy.swap_threshold > 0 {
            let threshold = i64::from(policy.swap_threshold);
            let ahead = index
                .checked_sub(1)
                .filter(|&ahead| i64::from(score) - i64::from(self.entries[ahead].score) >= threshold);
            let behind = Some(index + 1).filter(|&behind| {
                behind < self.entries.len()
                    && i64::from(self.entries[behind].score) - i64::from(score) >= threshold
            });

            if let Some(ahead) = ahead {
                self.entries.swap(ahead, index);
            } else if let Some(behind) = behind {
                self.entries.swap(index, behind);
            }
            self.renumber();
        }

        Ok(score)
    }

    pub fn swap(&mut self, first: &RealtorId, second: &RealtorId) -> Result<(), QueueError> {
        let a = self.index_of(first)?;
        let b = self.index_of(second)?;
        self.entries.swap(a, b);
        self.renumber();
        Ok(())
    }

    /// Moves a realtor to `position`, clamped to the queue bounds. Returns the final position.
    pub fn move_to(&mut self, realtor_id: &RealtorId, position: u32) -> Result<u32, QueueError> {
        let index = self.index_of(realtor_id)?;
        let entry = self.entries.remove(index);
        let target = (position.max(1) as usize - 1).min(self.entries.len());
        self.entries.insert(target, entry);
        self.renumber();
        Ok(target as u32 + 1)
    }

    /// Stable sort by score descending; ties keep their current order.
    pub fn rebalance_by_score(&mut self) {
        self.entries.sort_by(|a, b| b.score.cmp(&a.score));
        self.renumber();
    }

    fn index_of(&self, realtor_id: &RealtorId) -> Result<usize, QueueError> {
        self.entries
            .iter()
            .position(|entry| &entry.realtor_id == realtor_id)
            .ok_or_else(|| QueueError::UnknownRealtor {
                queue: self.queue_id.clone(),
                realtor: realtor_id.clone(),
            })
    }

    fn renumber(&mut self) {
        for (index, entry) in self.entries.iter_mut().enumerate() {
            entry.position = index as u32 + 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("realtor {realtor} is not a member of queue {queue}")]
    UnknownRealtor { queue: QueueId, realtor: RealtorId },
    #[error("realtor {realtor} already belongs to queue {queue}")]
    AlreadyMember { queue: QueueId, realtor: RealtorId },
}
