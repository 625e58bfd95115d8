//! Bulk (re)synchronization of user summaries from the system-of-record:
//! job tracking, snapshot paging, event synthesis, and per-patron rebuild.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::event::CirculationEvent;
use crate::overdue::GracePeriod;
use crate::store::{EventLogStore, FeeFineSource, JobStore, LoanSource, UserSummaryStore};
use crate::writer::SummaryWriter;
use crate::{Clock, Error, Result, SystemClock};

/// How many snapshots each page fetched from a source holds.
pub const SYNC_PAGE_SIZE: usize = 500;

/// What a synchronization job covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncScope {
    /// Rebuild every patron in the tenant.
    Full,
    /// Rebuild a single patron.
    User,
}

/// Where a synchronization job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Requested, not yet picked up.
    Open,
    /// Currently running. At most one job per tenant is in progress.
    InProgress,
    /// Finished successfully.
    Done,
    /// Finished with errors; see the job's error list.
    Failed,
}

/// A synchronization request and its progress record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynchronizationJob {
    /// The job's identifier.
    pub id: Uuid,
    /// What the job covers.
    pub scope: SyncScope,
    /// The patron to rebuild; present iff `scope` is [`SyncScope::User`].
    pub user_id: Option<Uuid>,
    /// Where the job is in its lifecycle.
    pub status: SyncStatus,
    /// Loans seen in the source so far.
    pub total_number_of_loans: u32,
    /// Fees/fines seen in the source so far.
    pub total_number_of_fees_fines: u32,
    /// Loans turned into events so far. Persisted after every page and
    /// never rolled back, so a failed job still shows how far it got.
    pub number_of_processed_loans: u32,
    /// Fees/fines turned into events so far.
    pub number_of_processed_fees_fines: u32,
    /// Failure messages accumulated before the job was marked failed.
    pub errors: Vec<String>,
    /// When the job was requested; the orchestrator picks up the oldest
    /// open job first.
    pub requested_at: DateTime<Utc>,
}

impl SynchronizationJob {
    /// Creates a new open job.
    pub fn new(scope: SyncScope, user_id: Option<Uuid>, requested_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scope,
            user_id,
            status: SyncStatus::Open,
            total_number_of_loans: 0,
            total_number_of_fees_fines: 0,
            number_of_processed_loans: 0,
            number_of_processed_fees_fines: 0,
            errors: Vec::new(),
            requested_at,
        }
    }
}

/// The item status a loan snapshot reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanItemStatus {
    /// The item is checked out and nothing else happened to it.
    CheckedOut,
    /// The patron claimed to have returned the item.
    ClaimedReturned,
    /// The patron declared the item lost.
    DeclaredLost,
    /// The item aged to lost.
    AgedToLost,
}

/// One open loan as reported by the system-of-record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanSnapshot {
    /// The loan's identifier.
    pub loan_id: Uuid,
    /// The patron the loan belongs to.
    pub user_id: Uuid,
    /// When the item is due back.
    pub due_date: DateTime<Utc>,
    /// The loaned item's current status.
    pub item_status: LoanItemStatus,
    /// Whether the current due date was set by a recall.
    pub due_date_changed_by_recall: bool,
    /// Grace period from the loan policy, if any.
    pub grace_period: Option<GracePeriod>,
}

/// One open fee/fine as reported by the system-of-record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeFineSnapshot {
    /// The fee/fine's identifier.
    pub fee_fine_id: Uuid,
    /// The patron the fee/fine belongs to.
    pub user_id: Uuid,
    /// The kind of fee/fine.
    pub fee_fine_type_id: Uuid,
    /// The loan the fee/fine was charged for, if any.
    pub loan_id: Option<Uuid>,
    /// The remaining balance.
    pub balance: Decimal,
}

/// Drives synchronization jobs: wipes the covered summaries, pages through
/// the snapshot sources synthesizing the equivalent events, and rebuilds
/// every touched patron from the freshly logged stream.
pub struct Synchronizer {
    jobs: Arc<dyn JobStore>,
    summaries: Arc<dyn UserSummaryStore>,
    events: Arc<dyn EventLogStore>,
    loans: Arc<dyn LoanSource>,
    fees_fines: Arc<dyn FeeFineSource>,
    writer: SummaryWriter<dyn UserSummaryStore>,
    clock: Arc<dyn Clock>,
}

impl Synchronizer {
    /// Creates a synchronizer over the given collaborators.
    pub fn new(
        jobs: Arc<dyn JobStore>,
        summaries: Arc<dyn UserSummaryStore>,
        events: Arc<dyn EventLogStore>,
        loans: Arc<dyn LoanSource>,
        fees_fines: Arc<dyn FeeFineSource>,
    ) -> Self {
        Self {
            writer: SummaryWriter::new(Arc::clone(&summaries)),
            jobs,
            summaries,
            events,
            loans,
            fees_fines,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used to timestamp jobs and synthesized events.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Records a synchronization request as a new open job and returns its
    /// id. A user-scoped request must name a patron; a full request must
    /// not.
    pub async fn request(&self, scope: SyncScope, user_id: Option<Uuid>) -> Result<Uuid> {
        match (scope, user_id) {
            (SyncScope::User, None) => Err(Error::Validation(
                "a user-scoped synchronization requires a user id".into(),
            )),
            (SyncScope::Full, Some(_)) => Err(Error::Validation(
                "a full synchronization cannot name a user".into(),
            )),
            _ => {
                let job = SynchronizationJob::new(scope, user_id, self.clock.now());
                self.jobs.save(&job).await
            }
        }
    }

    /// Loads a job by id, failing with [`Error::NotFound`] for an unknown
    /// one.
    pub async fn job(&self, id: &Uuid) -> Result<SynchronizationJob> {
        self.jobs
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("synchronization job {id}")))
    }

    /// Picks up and drives the oldest open job.
    ///
    /// Returns `None` without touching anything when no job is open or one
    /// is already in progress; an open job left behind is checked again on
    /// the next call, never run concurrently. Returns the driven job's id
    /// otherwise; the job itself ends up `Done` or `Failed`, with failures
    /// recorded in its error list rather than propagated.
    #[instrument(skip(self))]
    pub async fn run_due(&self) -> Result<Option<Uuid>> {
        if self.jobs.find_in_progress().await?.is_some() {
            tracing::debug!("a synchronization job is already in progress");
            return Ok(None);
        }
        let Some(mut job) = self.jobs.get_oldest_open_job().await? else {
            return Ok(None);
        };

        job.status = SyncStatus::InProgress;
        self.jobs.update(&job).await?;
        tracing::info!(job_id = %job.id, scope = ?job.scope, "synchronization started");

        match self.execute(&mut job).await {
            Ok(()) => {
                job.status = SyncStatus::Done;
                tracing::info!(job_id = %job.id, "synchronization finished");
            }
            Err(error) => {
                tracing::warn!(job_id = %job.id, %error, "synchronization failed");
                job.errors.push(error.to_string());
                job.status = SyncStatus::Failed;
            }
        }
        self.jobs.update(&job).await?;
        Ok(Some(job.id))
    }

    async fn execute(&self, job: &mut SynchronizationJob) -> Result<()> {
        self.purge(job).await?;

        let mut touched = BTreeSet::new();
        self.import_loans(job, &mut touched).await?;
        self.import_fees_fines(job, &mut touched).await?;

        // The covered summaries were purged above; replaying the freshly
        // logged stream is what repopulates them.
        for user_id in &touched {
            let events = self.events.find_by_user_id(user_id).await?;
            self.writer.rebuild(user_id, &events).await?;
        }
        Ok(())
    }

    /// A rebuild is a full replace, not a merge.
    async fn purge(&self, job: &SynchronizationJob) -> Result<()> {
        match job.scope {
            SyncScope::Full => {
                self.events.remove_all().await?;
                self.summaries.delete_all().await?;
            }
            SyncScope::User => {
                let user_id = job
                    .user_id
                    .ok_or_else(|| Error::Validation("user-scoped job has no user id".into()))?;
                self.events.remove_by_user_id(&user_id).await?;
                self.summaries.delete_by_user_id(&user_id).await?;
            }
        }
        Ok(())
    }

    async fn import_loans(
        &self,
        job: &mut SynchronizationJob,
        touched: &mut BTreeSet<Uuid>,
    ) -> Result<()> {
        let mut offset = 0;
        loop {
            let page = self
                .loans
                .fetch_page(job.user_id.as_ref(), offset, SYNC_PAGE_SIZE)
                .await?;
            if page.is_empty() {
                break;
            }
            let fetched = page.len();
            job.total_number_of_loans += fetched as u32;

            let now = self.clock.now();
            for loan in &page {
                touched.insert(loan.user_id);
                for event in events_for_loan(loan, now) {
                    self.events.save(&event).await?;
                }
            }

            job.number_of_processed_loans += fetched as u32;
            self.jobs.update(job).await?;

            offset += fetched;
            if fetched < SYNC_PAGE_SIZE {
                break;
            }
        }
        Ok(())
    }

    async fn import_fees_fines(
        &self,
        job: &mut SynchronizationJob,
        touched: &mut BTreeSet<Uuid>,
    ) -> Result<()> {
        let mut offset = 0;
        loop {
            let page = self
                .fees_fines
                .fetch_page(job.user_id.as_ref(), offset, SYNC_PAGE_SIZE)
                .await?;
            if page.is_empty() {
                break;
            }
            let fetched = page.len();
            job.total_number_of_fees_fines += fetched as u32;

            let now = self.clock.now();
            for fee_fine in &page {
                touched.insert(fee_fine.user_id);
                self.events.save(&event_for_fee_fine(fee_fine, now)).await?;
            }

            job.number_of_processed_fees_fines += fetched as u32;
            self.jobs.update(job).await?;

            offset += fetched;
            if fetched < SYNC_PAGE_SIZE {
                break;
            }
        }
        Ok(())
    }
}

/// Synthesizes the event stream equivalent to one loan snapshot.
///
/// The due-date change is ordered before the status events: a due-date
/// change clears the lost flag when applied, so emitting it after a
/// declared-lost from the same snapshot would undo the loss.
fn events_for_loan(loan: &LoanSnapshot, now: DateTime<Utc>) -> Vec<CirculationEvent> {
    let mut events = vec![CirculationEvent::ItemCheckedOut {
        user_id: loan.user_id,
        loan_id: loan.loan_id,
        due_date: loan.due_date,
        grace_period: loan.grace_period,
        occurred_at: now,
    }];
    if loan.due_date_changed_by_recall {
        events.push(CirculationEvent::LoanDueDateChanged {
            user_id: loan.user_id,
            loan_id: loan.loan_id,
            due_date: loan.due_date,
            changed_by_recall: true,
            occurred_at: now,
        });
    }
    match loan.item_status {
        LoanItemStatus::CheckedOut => {}
        LoanItemStatus::ClaimedReturned => events.push(CirculationEvent::ItemClaimedReturned {
            user_id: loan.user_id,
            loan_id: loan.loan_id,
            occurred_at: now,
        }),
        LoanItemStatus::DeclaredLost => events.push(CirculationEvent::ItemDeclaredLost {
            user_id: loan.user_id,
            loan_id: loan.loan_id,
            occurred_at: now,
        }),
        LoanItemStatus::AgedToLost => events.push(CirculationEvent::ItemAgedToLost {
            user_id: loan.user_id,
            loan_id: loan.loan_id,
            occurred_at: now,
        }),
    }
    events
}

fn event_for_fee_fine(fee_fine: &FeeFineSnapshot, now: DateTime<Utc>) -> CirculationEvent {
    CirculationEvent::FeeFineBalanceChanged {
        user_id: Some(fee_fine.user_id),
        fee_fine_id: fee_fine.fee_fine_id,
        fee_fine_type_id: fee_fine.fee_fine_type_id,
        loan_id: fee_fine.loan_id,
        balance: fee_fine.balance,
        occurred_at: now,
    }
}
