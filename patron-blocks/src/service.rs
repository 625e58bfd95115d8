//! The composed surface of the crate: event handling, block queries, and
//! synchronization commands.

use std::sync::Arc;

use futures::future;
use tracing::instrument;
use uuid::Uuid;

use crate::event::CirculationEvent;
use crate::rules::{self, PatronBlock};
use crate::store::{
    BlockCatalog, EventLogStore, FeeFineSource, JobStore, LoanSource, PatronDirectory,
    UserSummaryStore,
};
use crate::sync::{SyncScope, SynchronizationJob, Synchronizer};
use crate::writer::{RetryDelay, SummaryWriter};
use crate::{Clock, Error, Event as _, Result, SystemClock};

/// The automated patron blocks service.
///
/// Owns no business state of its own; it wires the write coordinator, the
/// rule evaluator, and the synchronization orchestrator to the injected
/// storage collaborators.
pub struct PatronBlocksService {
    summaries: Arc<dyn UserSummaryStore>,
    event_log: Arc<dyn EventLogStore>,
    catalog: Arc<dyn BlockCatalog>,
    patrons: Arc<dyn PatronDirectory>,
    writer: SummaryWriter<dyn UserSummaryStore>,
    synchronizer: Synchronizer,
    clock: Arc<dyn Clock>,
}

impl PatronBlocksService {
    /// Creates a service over the given collaborators.
    pub fn new(
        summaries: Arc<dyn UserSummaryStore>,
        event_log: Arc<dyn EventLogStore>,
        catalog: Arc<dyn BlockCatalog>,
        patrons: Arc<dyn PatronDirectory>,
        jobs: Arc<dyn JobStore>,
        loans: Arc<dyn LoanSource>,
        fees_fines: Arc<dyn FeeFineSource>,
    ) -> Self {
        let writer = SummaryWriter::new(Arc::clone(&summaries));
        let synchronizer = Synchronizer::new(
            jobs,
            Arc::clone(&summaries),
            Arc::clone(&event_log),
            loans,
            fees_fines,
        );
        Self {
            summaries,
            event_log,
            catalog,
            patrons,
            writer,
            synchronizer,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock used for rule evaluation, job timestamps, and
    /// event synthesis.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.synchronizer = self.synchronizer.with_clock(Arc::clone(&clock));
        self.clock = clock;
        self
    }

    /// Replaces the pause the write coordinator takes between conflict
    /// retries.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Arc<dyn RetryDelay>) -> Self {
        self.writer = self.writer.with_delay(delay);
        self
    }

    /// Handles one circulation event, the sole mutation entry point.
    ///
    /// The event is appended to the event log (the rebuild
    /// system-of-record) and then folded into its patron's summary through
    /// the write coordinator. Returns the summary id.
    #[instrument(skip(self, event), fields(event_type = event.event_type()))]
    pub async fn handle_event(&self, event: CirculationEvent) -> Result<Uuid> {
        self.event_log.save(&event).await?;
        self.writer.apply(&event).await
    }

    /// Returns every automated block currently in force for a patron.
    ///
    /// A pure read: the patron's summary is evaluated against each limit
    /// configured for their patron group, concurrently, and the per-limit
    /// results are joined. Conditions whose final flags are all false are
    /// omitted entirely. A limit pointing at a deleted condition is a
    /// data-integrity fault and surfaces as [`Error::NotFound`]; a failed
    /// query must never read as "no blocks".
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn get_blocks_for_user(&self, user_id: &Uuid) -> Result<Vec<PatronBlock>> {
        let Some(summary) = self.summaries.get_by_user_id(user_id).await? else {
            // No summary means no recorded activity, which cannot block.
            return Ok(Vec::new());
        };

        let patron_group_id = self.patrons.find_patron_group_id(user_id).await?;
        let limits = self
            .catalog
            .find_limits_for_patron_group(&patron_group_id)
            .await?;
        let now = self.clock.now();

        let evaluations = limits.into_iter().map(|limit| {
            let catalog = Arc::clone(&self.catalog);
            let summary = &summary;
            async move {
                let condition = catalog
                    .get_condition(limit.condition_type)
                    .await?
                    .ok_or_else(|| {
                        Error::NotFound(format!(
                            "block condition {:?} referenced by a limit",
                            limit.condition_type
                        ))
                    })?;
                let raw = rules::evaluate(summary, limit.condition_type, limit.value, now);
                let flags = condition.mask(raw);
                Ok::<Option<PatronBlock>, Error>(flags.any().then(|| PatronBlock {
                    condition_type: limit.condition_type,
                    message: condition.message.clone(),
                    block_borrowing: flags.block_borrowing,
                    block_renewals: flags.block_renewals,
                    block_requests: flags.block_requests,
                }))
            }
        });

        let blocks = future::try_join_all(evaluations).await?;
        Ok(blocks.into_iter().flatten().collect())
    }

    /// Records a synchronization request, returning the new job's id.
    pub async fn request_synchronization(
        &self,
        scope: SyncScope,
        user_id: Option<Uuid>,
    ) -> Result<Uuid> {
        self.synchronizer.request(scope, user_id).await
    }

    /// Picks up and drives the oldest open synchronization job; a no-op
    /// returning `None` when one is already in flight.
    pub async fn run_due_synchronization(&self) -> Result<Option<Uuid>> {
        self.synchronizer.run_due().await
    }

    /// Returns a synchronization job's current state, failing with
    /// [`Error::NotFound`] for an unknown id.
    pub async fn get_synchronization_job(&self, id: &Uuid) -> Result<SynchronizationJob> {
        self.synchronizer.job(id).await
    }
}
