//! In-memory, thread-safe implementations of the storage boundary.
//!
//! These are useful for testing or for applications that do not require
//! persistent storage.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::instrument;
use uuid::Uuid;

use crate::event::CirculationEvent;
use crate::rules::{Condition, ConditionType, Limit};
use crate::store::{
    BlockCatalog, EventLogStore, FeeFineSource, JobStore, LoanSource, PatronDirectory,
    UserSummaryStore,
};
use crate::summary::UserSummary;
use crate::sync::{FeeFineSnapshot, LoanSnapshot, SynchronizationJob, SyncStatus};
use crate::{Error, Event as _, Result};

/// An in-memory, thread-safe summary store keyed by patron.
#[derive(Debug, Default)]
pub struct InMemoryUserSummaryStore {
    summaries: DashMap<Uuid, UserSummary>,
}

#[async_trait]
impl UserSummaryStore for InMemoryUserSummaryStore {
    async fn get_by_id(&self, id: &Uuid) -> Result<Option<UserSummary>> {
        Ok(self
            .summaries
            .iter()
            .find(|entry| entry.value().id == *id)
            .map(|entry| entry.value().clone()))
    }

    async fn get_by_user_id(&self, user_id: &Uuid) -> Result<Option<UserSummary>> {
        Ok(self.summaries.get(user_id).map(|entry| entry.value().clone()))
    }

    async fn find_by_fee_fine_id(&self, fee_fine_id: &Uuid) -> Result<Option<UserSummary>> {
        Ok(self
            .summaries
            .iter()
            .find(|entry| {
                entry
                    .value()
                    .open_fees_fines
                    .iter()
                    .any(|f| f.fee_fine_id == *fee_fine_id)
            })
            .map(|entry| entry.value().clone()))
    }

    #[instrument(skip(self, summary), fields(user_id = %summary.user_id))]
    async fn save(&self, summary: &UserSummary) -> Result<Uuid> {
        match self.summaries.entry(summary.user_id) {
            Entry::Occupied(_) => Err(Error::Conflict),
            Entry::Vacant(slot) => {
                slot.insert(summary.clone());
                Ok(summary.id)
            }
        }
    }

    async fn upsert(&self, summary: &UserSummary) -> Result<Uuid> {
        self.summaries.insert(summary.user_id, summary.clone());
        Ok(summary.id)
    }

    #[instrument(skip(self, summary), fields(user_id = %summary.user_id, expected_version))]
    async fn update(&self, summary: &UserSummary, expected_version: i64) -> Result<()> {
        match self.summaries.get_mut(&summary.user_id) {
            Some(mut stored) => {
                if stored.version != expected_version {
                    return Err(Error::Conflict);
                }
                *stored = summary.clone();
                Ok(())
            }
            // A summary deleted out from under a writer is a concurrency
            // artifact as well; the retry re-resolves and recreates it.
            None => Err(Error::Conflict),
        }
    }

    async fn delete(&self, id: &Uuid) -> Result<()> {
        self.summaries.retain(|_, summary| summary.id != *id);
        Ok(())
    }

    async fn delete_by_user_id(&self, user_id: &Uuid) -> Result<()> {
        self.summaries.remove(user_id);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_all(&self) -> Result<()> {
        self.summaries.clear();
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct LoggedEvent {
    id: Uuid,
    seq: u64,
    event: CirculationEvent,
}

/// An in-memory event log, append-only and keyed per event kind.
#[derive(Debug, Default)]
pub struct InMemoryEventLog {
    streams: DashMap<&'static str, Vec<LoggedEvent>>,
    next_seq: AtomicU64,
}

#[async_trait]
impl EventLogStore for InMemoryEventLog {
    #[instrument(skip(self, event), fields(event_type = event.event_type()))]
    async fn save(&self, event: &CirculationEvent) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.streams.entry(event.event_type()).or_default().push(LoggedEvent {
            id,
            seq,
            event: event.clone(),
        });
        Ok(id)
    }

    async fn find_by_user_id(&self, user_id: &Uuid) -> Result<Vec<CirculationEvent>> {
        let mut logged = Vec::new();
        for stream in self.streams.iter() {
            for entry in stream.value() {
                if entry.event.user_id() == Some(*user_id) {
                    logged.push(entry.clone());
                }
            }
        }
        // Streams are per kind; the global sequence restores append order.
        logged.sort_by_key(|entry| entry.seq);
        Ok(logged.into_iter().map(|entry| entry.event).collect())
    }

    async fn remove_by_user_id(&self, user_id: &Uuid) -> Result<()> {
        for mut stream in self.streams.iter_mut() {
            stream
                .value_mut()
                .retain(|entry| entry.event.user_id() != Some(*user_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_all(&self) -> Result<()> {
        self.streams.clear();
        Ok(())
    }
}

/// An in-memory block condition catalog with its per-group limits.
#[derive(Debug, Default)]
pub struct InMemoryBlockCatalog {
    conditions: DashMap<ConditionType, Condition>,
    limits: DashMap<Uuid, Vec<Limit>>,
}

impl InMemoryBlockCatalog {
    /// Inserts or replaces a condition's catalog entry.
    pub fn put_condition(&self, condition: Condition) {
        self.conditions.insert(condition.condition_type, condition);
    }

    /// Removes a condition from the catalog, leaving any limits that point
    /// at it dangling.
    pub fn remove_condition(&self, condition_type: ConditionType) {
        self.conditions.remove(&condition_type);
    }

    /// Adds a limit for the limit's patron group.
    pub fn put_limit(&self, limit: Limit) {
        self.limits.entry(limit.patron_group_id).or_default().push(limit);
    }
}

#[async_trait]
impl BlockCatalog for InMemoryBlockCatalog {
    async fn find_limits_for_patron_group(&self, patron_group_id: &Uuid) -> Result<Vec<Limit>> {
        Ok(self
            .limits
            .get(patron_group_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn get_condition(&self, condition_type: ConditionType) -> Result<Option<Condition>> {
        Ok(self
            .conditions
            .get(&condition_type)
            .map(|entry| entry.value().clone()))
    }
}

/// An in-memory patron-to-group directory.
#[derive(Debug, Default)]
pub struct InMemoryPatronDirectory {
    groups: DashMap<Uuid, Uuid>,
}

impl InMemoryPatronDirectory {
    /// Assigns a patron to a patron group.
    pub fn set_patron_group(&self, user_id: Uuid, patron_group_id: Uuid) {
        self.groups.insert(user_id, patron_group_id);
    }
}

#[async_trait]
impl PatronDirectory for InMemoryPatronDirectory {
    async fn find_patron_group_id(&self, user_id: &Uuid) -> Result<Uuid> {
        self.groups
            .get(user_id)
            .map(|entry| *entry.value())
            .ok_or_else(|| Error::NotFound(format!("patron group for user {user_id}")))
    }
}

/// An in-memory synchronization job store.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: DashMap<Uuid, SynchronizationJob>,
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn get(&self, id: &Uuid) -> Result<Option<SynchronizationJob>> {
        Ok(self.jobs.get(id).map(|entry| entry.value().clone()))
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn save(&self, job: &SynchronizationJob) -> Result<Uuid> {
        self.jobs.insert(job.id, job.clone());
        Ok(job.id)
    }

    async fn update(&self, job: &SynchronizationJob) -> Result<()> {
        match self.jobs.get_mut(&job.id) {
            Some(mut stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("synchronization job {}", job.id))),
        }
    }

    async fn get_oldest_open_job(&self) -> Result<Option<SynchronizationJob>> {
        Ok(self
            .jobs
            .iter()
            .filter(|entry| entry.value().status == SyncStatus::Open)
            .min_by_key(|entry| (entry.value().requested_at, entry.value().id))
            .map(|entry| entry.value().clone()))
    }

    async fn find_in_progress(&self) -> Result<Option<SynchronizationJob>> {
        Ok(self
            .jobs
            .iter()
            .find(|entry| entry.value().status == SyncStatus::InProgress)
            .map(|entry| entry.value().clone()))
    }

    async fn delete(&self, id: &Uuid) -> Result<()> {
        self.jobs.remove(id);
        Ok(())
    }
}

/// An in-memory loan snapshot source, paged in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryLoanSource {
    loans: DashMap<usize, LoanSnapshot>,
    next_index: AtomicUsize,
}

impl InMemoryLoanSource {
    /// Adds a loan snapshot to the source.
    pub fn push(&self, loan: LoanSnapshot) {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        self.loans.insert(index, loan);
    }
}

#[async_trait]
impl LoanSource for InMemoryLoanSource {
    async fn fetch_page(
        &self,
        user_id: Option<&Uuid>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LoanSnapshot>> {
        let count = self.next_index.load(Ordering::SeqCst);
        let mut matching = Vec::new();
        for index in 0..count {
            if let Some(loan) = self.loans.get(&index) {
                if user_id.is_none_or(|u| *u == loan.value().user_id) {
                    matching.push(loan.value().clone());
                }
            }
        }
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }
}

/// An in-memory fee/fine snapshot source, paged in insertion order.
#[derive(Debug, Default)]
pub struct InMemoryFeeFineSource {
    fees_fines: DashMap<usize, FeeFineSnapshot>,
    next_index: AtomicUsize,
}

impl InMemoryFeeFineSource {
    /// Adds a fee/fine snapshot to the source.
    pub fn push(&self, fee_fine: FeeFineSnapshot) {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        self.fees_fines.insert(index, fee_fine);
    }
}

#[async_trait]
impl FeeFineSource for InMemoryFeeFineSource {
    async fn fetch_page(
        &self,
        user_id: Option<&Uuid>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<FeeFineSnapshot>> {
        let count = self.next_index.load(Ordering::SeqCst);
        let mut matching = Vec::new();
        for index in 0..count {
            if let Some(fee_fine) = self.fees_fines.get(&index) {
                if user_id.is_none_or(|u| *u == fee_fine.value().user_id) {
                    matching.push(fee_fine.value().clone());
                }
            }
        }
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }
}
