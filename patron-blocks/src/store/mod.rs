//! The storage and snapshot-source boundary: one capability trait per
//! collaborator, plus reference in-memory implementations.

use async_trait::async_trait;
use uuid::Uuid;

use crate::Result;
use crate::event::CirculationEvent;
use crate::rules::{Condition, ConditionType, Limit};
use crate::summary::UserSummary;
use crate::sync::{FeeFineSnapshot, LoanSnapshot, SynchronizationJob};

// The in-memory implementations are compiled when the `in-memory` feature is
// enabled (this is the default).
#[cfg(feature = "in-memory")]
/// In-memory implementations of every boundary trait.
pub mod in_memory;

/// Persistence for [`UserSummary`] aggregates.
///
/// Writes are protected by optimistic concurrency: [`save`](Self::save)
/// fails with [`Conflict`](crate::Error::Conflict) when a summary already
/// exists for the user, and [`update`](Self::update) fails with `Conflict`
/// when the stored version no longer equals `expected_version`.
#[async_trait]
pub trait UserSummaryStore: Send + Sync {
    /// Loads a summary by its id.
    async fn get_by_id(&self, id: &Uuid) -> Result<Option<UserSummary>>;

    /// Loads the summary belonging to a patron.
    async fn get_by_user_id(&self, user_id: &Uuid) -> Result<Option<UserSummary>>;

    /// Finds the summary whose fee/fine collection references the given
    /// fee/fine id. Used to resolve balance-change events that carry no
    /// `user_id`.
    async fn find_by_fee_fine_id(&self, fee_fine_id: &Uuid) -> Result<Option<UserSummary>>;

    /// Persists a new summary, returning its id. Fails with
    /// [`Conflict`](crate::Error::Conflict) when the patron already has one.
    async fn save(&self, summary: &UserSummary) -> Result<Uuid>;

    /// Persists a summary unconditionally, returning its id.
    async fn upsert(&self, summary: &UserSummary) -> Result<Uuid>;

    /// Replaces the patron's stored summary if its version still equals
    /// `expected_version`; fails with [`Conflict`](crate::Error::Conflict)
    /// otherwise.
    async fn update(&self, summary: &UserSummary, expected_version: i64) -> Result<()>;

    /// Deletes a summary by its id. Deleting a summary that does not exist
    /// is a no-op.
    async fn delete(&self, id: &Uuid) -> Result<()>;

    /// Deletes the summary belonging to a patron, if any.
    async fn delete_by_user_id(&self, user_id: &Uuid) -> Result<()>;

    /// Deletes every summary in the tenant.
    async fn delete_all(&self) -> Result<()>;
}

/// The append-only event log, kept per event kind.
///
/// Event handlers only ever append; the synchronization orchestrator is the
/// sole reader (for per-user rebuild) and cleaner.
#[async_trait]
pub trait EventLogStore: Send + Sync {
    /// Appends an event, returning its log id.
    async fn save(&self, event: &CirculationEvent) -> Result<Uuid>;

    /// Returns every logged event for a patron in append order. Used only by
    /// the synchronization rebuild path.
    async fn find_by_user_id(&self, user_id: &Uuid) -> Result<Vec<CirculationEvent>>;

    /// Removes every logged event for a patron.
    async fn remove_by_user_id(&self, user_id: &Uuid) -> Result<()>;

    /// Removes every logged event in the tenant.
    async fn remove_all(&self) -> Result<()>;
}

/// Read access to the tenant's block condition catalog and limits.
///
/// The catalog is mutated through a separate administrative path; the rule
/// evaluator re-reads current values on every evaluation.
#[async_trait]
pub trait BlockCatalog: Send + Sync {
    /// Returns every limit configured for a patron group.
    async fn find_limits_for_patron_group(&self, patron_group_id: &Uuid) -> Result<Vec<Limit>>;

    /// Returns the catalog entry for a condition kind, if it still exists.
    async fn get_condition(&self, condition_type: ConditionType) -> Result<Option<Condition>>;
}

/// Resolution of patrons to their patron group.
#[async_trait]
pub trait PatronDirectory: Send + Sync {
    /// Returns the patron group a patron belongs to.
    async fn find_patron_group_id(&self, user_id: &Uuid) -> Result<Uuid>;
}

/// A paged view over the system-of-record's open loans.
#[async_trait]
pub trait LoanSource: Send + Sync {
    /// Fetches one page of open-loan snapshots, optionally restricted to a
    /// single patron. `offset` is an index into the (filtered) result set.
    async fn fetch_page(
        &self,
        user_id: Option<&Uuid>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LoanSnapshot>>;
}

/// A paged view over the system-of-record's open fees/fines.
#[async_trait]
pub trait FeeFineSource: Send + Sync {
    /// Fetches one page of fee/fine snapshots, optionally restricted to a
    /// single patron. `offset` is an index into the (filtered) result set.
    async fn fetch_page(
        &self,
        user_id: Option<&Uuid>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<FeeFineSnapshot>>;
}

/// Persistence for [`SynchronizationJob`] records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Loads a job by id.
    async fn get(&self, id: &Uuid) -> Result<Option<SynchronizationJob>>;

    /// Persists a new job, returning its id.
    async fn save(&self, job: &SynchronizationJob) -> Result<Uuid>;

    /// Replaces a stored job. Fails with
    /// [`NotFound`](crate::Error::NotFound) for an unknown id.
    async fn update(&self, job: &SynchronizationJob) -> Result<()>;

    /// Returns the open job that was requested first, if any.
    async fn get_oldest_open_job(&self) -> Result<Option<SynchronizationJob>>;

    /// Returns the job currently in progress, if any.
    async fn find_in_progress(&self) -> Result<Option<SynchronizationJob>>;

    /// Deletes a job by id. Deleting a job that does not exist is a no-op.
    async fn delete(&self, id: &Uuid) -> Result<()>;
}
