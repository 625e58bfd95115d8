//! # Automated Patron Blocks
//!
//! `patron-blocks` keeps a per-patron materialized summary of circulation
//! activity (open loans, open fees/fines) projected from a stream of typed
//! domain events, and evaluates that summary against tenant-configured
//! thresholds to decide whether a patron should be blocked from borrowing,
//! renewing, or requesting items.
//!
//! ## Core Concepts
//!
//! - **[`CirculationEvent`]**: an immutable fact about one patron's
//!   circulation activity (checkout, check-in, loss, fee/fine balance
//!   change, ...).
//! - **[`UserSummary`]**: the per-patron aggregate, mutated only by applying
//!   events and protected by an optimistic-concurrency version.
//! - **[`SummaryWriter`]**: the write coordinator that fetches, projects, and
//!   writes under a version check with bounded retry on conflicts.
//! - **[`Condition`] / [`Limit`]**: the block rule catalog and the per-group
//!   thresholds it is evaluated against.
//! - **[`Synchronizer`]**: rebuilds summaries for one patron or the whole
//!   tenant from an external system-of-record, tracking job progress.
//! - **[`PatronBlocksService`]**: the composed surface: event handling,
//!   block queries, and synchronization commands.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use chrono::{Duration, Utc};
//! use patron_blocks::{
//!     CirculationEvent, PatronBlocksService,
//!     store::in_memory::{
//!         InMemoryBlockCatalog, InMemoryEventLog, InMemoryFeeFineSource,
//!         InMemoryJobStore, InMemoryLoanSource, InMemoryPatronDirectory,
//!         InMemoryUserSummaryStore,
//!     },
//! };
//! use uuid::Uuid;
//!
//! async fn example() -> patron_blocks::Result<()> {
//!     let directory = Arc::new(InMemoryPatronDirectory::default());
//!     let user_id = Uuid::new_v4();
//!     directory.set_patron_group(user_id, Uuid::new_v4());
//!
//!     let service = PatronBlocksService::new(
//!         Arc::new(InMemoryUserSummaryStore::default()),
//!         Arc::new(InMemoryEventLog::default()),
//!         Arc::new(InMemoryBlockCatalog::default()),
//!         directory,
//!         Arc::new(InMemoryJobStore::default()),
//!         Arc::new(InMemoryLoanSource::default()),
//!         Arc::new(InMemoryFeeFineSource::default()),
//!     );
//!
//!     service
//!         .handle_event(CirculationEvent::ItemCheckedOut {
//!             user_id,
//!             loan_id: Uuid::new_v4(),
//!             due_date: Utc::now() + Duration::days(21),
//!             grace_period: None,
//!             occurred_at: Utc::now(),
//!         })
//!         .await?;
//!
//!     // No limits configured for the patron's group yet, so no blocks.
//!     let blocks = service.get_blocks_for_user(&user_id).await?;
//!     assert!(blocks.is_empty());
//!     Ok(())
//! }
//! ```
#![deny(missing_docs)]

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

pub mod event;
pub mod overdue;
pub mod rules;
pub mod service;
pub mod store;
pub mod summary;
pub mod sync;
pub mod writer;

pub use event::CirculationEvent;
pub use overdue::{GracePeriod, Interval};
pub use rules::{BlockFlags, Condition, ConditionType, Limit, PatronBlock};
pub use service::PatronBlocksService;
pub use summary::{OpenFeeFine, OpenLoan, UserSummary};
pub use sync::{SyncScope, SyncStatus, SynchronizationJob, Synchronizer};
pub use writer::{MAX_CONFLICT_RETRIES, NoDelay, RetryDelay, SummaryWriter};

/// The error type for this crate.
#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    /// A versioned write lost an optimistic-concurrency race. Retried by the
    /// write coordinator up to [`MAX_CONFLICT_RETRIES`] times before it is
    /// surfaced to the caller.
    #[error("optimistic concurrency conflict")]
    Conflict,
    /// A referenced entity does not exist: a fee/fine balance change with no
    /// owning summary, a limit pointing at a deleted condition, an unknown
    /// synchronization job id. Never retried.
    #[error("{0} not found")]
    NotFound(String),
    /// Caller input was rejected before any mutation was attempted.
    #[error("validation error: {0}")]
    Validation(String),
    /// Wraps an error reported by a storage collaborator.
    #[error("storage error: {0}")]
    Store(String),
    /// A snapshot source or the patron directory failed. During
    /// synchronization this is recorded into the job's error list.
    #[error("upstream error: {0}")]
    Upstream(String),
}

/// A specialized `Result` type for this crate's operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A marker trait for events.
///
/// Events must be serializable, deserializable, clonable, and debuggable.
/// The [`event_type`](Event::event_type) name keys the append-only,
/// per-kind event log.
pub trait Event: Serialize + DeserializeOwned + Clone + Debug + Send + Sync {
    /// Returns a static string slice naming the kind of the event.
    fn event_type(&self) -> &'static str;
}

/// A source of the current instant.
///
/// Rule evaluation and event synthesis never read the wall clock directly;
/// they go through this seam so tests can substitute a manual clock.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
