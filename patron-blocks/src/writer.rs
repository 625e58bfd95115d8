//! The write coordinator: fetch-modify-write with optimistic concurrency
//! and bounded retry.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;
use uuid::Uuid;

use crate::event::CirculationEvent;
use crate::store::UserSummaryStore;
use crate::summary::UserSummary;
use crate::{Error, Event as _, Result};

/// How many times a versioned write is retried after a concurrency
/// conflict before the conflict is surfaced to the caller.
///
/// Bursty concurrent updates to one patron's summary (a checkout and a fee
/// event racing, say) settle well within this bound; a writer that still
/// conflicts afterwards fails instead of looping forever.
pub const MAX_CONFLICT_RETRIES: u32 = 10;

/// A pause taken between conflict retries.
///
/// Injected so tests can observe attempt counts without wall-clock waits
/// and applications can plug in a real backoff on their runtime of choice.
#[async_trait]
pub trait RetryDelay: Send + Sync {
    /// Waits before retry number `attempt` (1-based).
    async fn pause(&self, attempt: u32);
}

/// A [`RetryDelay`] that does not wait at all.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

#[async_trait]
impl RetryDelay for NoDelay {
    async fn pause(&self, _attempt: u32) {}
}

/// Coordinates all writes to [`UserSummary`] aggregates.
///
/// Every mutation goes through [`apply`](SummaryWriter::apply): fetch or
/// create the patron's summary, fold the event into it, and write it back
/// under a version check. A conflicting write is re-driven from the
/// now-current state, never from the stale in-memory copy, at most
/// [`MAX_CONFLICT_RETRIES`] times.
pub struct SummaryWriter<S: UserSummaryStore + ?Sized> {
    store: Arc<S>,
    delay: Arc<dyn RetryDelay>,
}

impl<S: UserSummaryStore + ?Sized> SummaryWriter<S> {
    /// Creates a writer over the given summary store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            delay: Arc::new(NoDelay),
        }
    }

    /// Replaces the pause taken between conflict retries.
    #[must_use]
    pub fn with_delay(mut self, delay: Arc<dyn RetryDelay>) -> Self {
        self.delay = delay;
        self
    }

    /// Folds one event into its patron's summary and returns the summary
    /// id.
    ///
    /// A patron with no summary yet gets an empty one synthesized; that is
    /// not an error. Only [`Error::Conflict`] is retried; every other
    /// failure (notably the unowned-fee/fine [`Error::NotFound`])
    /// propagates immediately.
    #[instrument(skip(self, event), fields(event_type = event.event_type()))]
    pub async fn apply(&self, event: &CirculationEvent) -> Result<Uuid> {
        let mut attempt = 0;
        loop {
            match self.try_apply(event).await {
                Err(Error::Conflict) if attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    tracing::debug!(attempt, "retrying after version conflict");
                    self.delay.pause(attempt).await;
                }
                outcome => return outcome,
            }
        }
    }

    /// Rebuilds a patron's summary from scratch by folding the given event
    /// stream into a fresh aggregate and storing it whole.
    ///
    /// Any existing summary is deleted first; a rebuild is a replace, not
    /// a merge.
    #[instrument(skip(self, events), fields(user_id = %user_id, events = events.len()))]
    pub async fn rebuild(&self, user_id: &Uuid, events: &[CirculationEvent]) -> Result<Uuid> {
        self.store.delete_by_user_id(user_id).await?;
        let mut summary = UserSummary::new(*user_id);
        for event in events {
            summary.apply(event);
        }
        self.store.upsert(&summary).await
    }

    async fn try_apply(&self, event: &CirculationEvent) -> Result<Uuid> {
        match self.resolve_target(event).await? {
            Some(mut summary) => {
                let expected_version = summary.version;
                summary.apply(event);
                self.store.update(&summary, expected_version).await?;
                Ok(summary.id)
            }
            None => {
                let user_id = event
                    .user_id()
                    .ok_or_else(|| Error::Validation("event names no patron".into()))?;
                let mut summary = UserSummary::new(user_id);
                summary.apply(event);
                // Racing creators collide here as a Conflict and re-drive
                // through the update path.
                self.store.save(&summary).await
            }
        }
    }

    /// Finds the summary an event targets.
    ///
    /// Events that carry a `user_id` target that patron's summary, created
    /// on demand. A balance change without one is resolved by reverse
    /// lookup on its `fee_fine_id`; when no summary references the fee/fine
    /// this fails with [`Error::NotFound`], which is never retried.
    async fn resolve_target(&self, event: &CirculationEvent) -> Result<Option<UserSummary>> {
        match event.user_id() {
            Some(user_id) => self.store.get_by_user_id(&user_id).await,
            None => {
                let CirculationEvent::FeeFineBalanceChanged { fee_fine_id, .. } = event else {
                    return Err(Error::Validation("event names no patron".into()));
                };
                self.store
                    .find_by_fee_fine_id(fee_fine_id)
                    .await?
                    .map(Some)
                    .ok_or_else(|| {
                        Error::NotFound(format!("user summary owning fee/fine {fee_fine_id}"))
                    })
            }
        }
    }
}
