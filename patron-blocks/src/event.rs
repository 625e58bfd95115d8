//! The closed set of circulation events the projection engine folds into
//! user summaries.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Event;
use crate::overdue::GracePeriod;

/// An immutable fact about one patron's circulation activity.
///
/// Every variant carries the affected patron's `user_id`, except
/// [`FeeFineBalanceChanged`](CirculationEvent::FeeFineBalanceChanged), whose
/// producer may only know the `fee_fine_id`; the write coordinator then
/// resolves the owning summary by reverse lookup. `occurred_at` is the
/// event's creation timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CirculationEvent {
    /// A loan was opened for the patron.
    ItemCheckedOut {
        /// The patron the loan belongs to.
        user_id: Uuid,
        /// The loan's identifier.
        loan_id: Uuid,
        /// When the item is due back.
        due_date: DateTime<Utc>,
        /// Grace period absorbing small overdue amounts, if the loan policy
        /// grants one.
        grace_period: Option<GracePeriod>,
        /// When the event was created.
        occurred_at: DateTime<Utc>,
    },
    /// The loaned item was returned and the loan closed.
    ItemCheckedIn {
        /// The patron the loan belongs to.
        user_id: Uuid,
        /// The loan's identifier.
        loan_id: Uuid,
        /// When the event was created.
        occurred_at: DateTime<Utc>,
    },
    /// The patron declared the loaned item lost.
    ItemDeclaredLost {
        /// The patron the loan belongs to.
        user_id: Uuid,
        /// The loan's identifier.
        loan_id: Uuid,
        /// When the event was created.
        occurred_at: DateTime<Utc>,
    },
    /// The loaned item aged to lost after remaining overdue.
    ItemAgedToLost {
        /// The patron the loan belongs to.
        user_id: Uuid,
        /// The loan's identifier.
        loan_id: Uuid,
        /// When the event was created.
        occurred_at: DateTime<Utc>,
    },
    /// The patron claimed to have returned the item.
    ItemClaimedReturned {
        /// The patron the loan belongs to.
        user_id: Uuid,
        /// The loan's identifier.
        loan_id: Uuid,
        /// When the event was created.
        occurred_at: DateTime<Utc>,
    },
    /// The loan's due date moved, e.g. after a renewal or a recall.
    LoanDueDateChanged {
        /// The patron the loan belongs to.
        user_id: Uuid,
        /// The loan's identifier.
        loan_id: Uuid,
        /// The new due date.
        due_date: DateTime<Utc>,
        /// Whether the change was caused by a recall.
        changed_by_recall: bool,
        /// When the event was created.
        occurred_at: DateTime<Utc>,
    },
    /// The remaining balance of a fee/fine changed. A balance of zero closes
    /// the fee/fine.
    FeeFineBalanceChanged {
        /// The patron the fee/fine belongs to, when the producer knows it.
        user_id: Option<Uuid>,
        /// The fee/fine's identifier.
        fee_fine_id: Uuid,
        /// The kind of fee/fine (overdue fine, lost item fee, ...).
        fee_fine_type_id: Uuid,
        /// The loan the fee/fine was charged for, if any.
        loan_id: Option<Uuid>,
        /// The remaining balance.
        balance: Decimal,
        /// When the event was created.
        occurred_at: DateTime<Utc>,
    },
}

impl CirculationEvent {
    /// Returns the patron the event refers to, when the event carries one.
    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::ItemCheckedOut { user_id, .. }
            | Self::ItemCheckedIn { user_id, .. }
            | Self::ItemDeclaredLost { user_id, .. }
            | Self::ItemAgedToLost { user_id, .. }
            | Self::ItemClaimedReturned { user_id, .. }
            | Self::LoanDueDateChanged { user_id, .. } => Some(*user_id),
            Self::FeeFineBalanceChanged { user_id, .. } => *user_id,
        }
    }

    /// Returns the loan the event refers to, when the event carries one.
    pub fn loan_id(&self) -> Option<Uuid> {
        match self {
            Self::ItemCheckedOut { loan_id, .. }
            | Self::ItemCheckedIn { loan_id, .. }
            | Self::ItemDeclaredLost { loan_id, .. }
            | Self::ItemAgedToLost { loan_id, .. }
            | Self::ItemClaimedReturned { loan_id, .. }
            | Self::LoanDueDateChanged { loan_id, .. } => Some(*loan_id),
            Self::FeeFineBalanceChanged { loan_id, .. } => *loan_id,
        }
    }

    /// Returns the event's creation timestamp.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::ItemCheckedOut { occurred_at, .. }
            | Self::ItemCheckedIn { occurred_at, .. }
            | Self::ItemDeclaredLost { occurred_at, .. }
            | Self::ItemAgedToLost { occurred_at, .. }
            | Self::ItemClaimedReturned { occurred_at, .. }
            | Self::LoanDueDateChanged { occurred_at, .. }
            | Self::FeeFineBalanceChanged { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Event for CirculationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            Self::ItemCheckedOut { .. } => "ItemCheckedOut",
            Self::ItemCheckedIn { .. } => "ItemCheckedIn",
            Self::ItemDeclaredLost { .. } => "ItemDeclaredLost",
            Self::ItemAgedToLost { .. } => "ItemAgedToLost",
            Self::ItemClaimedReturned { .. } => "ItemClaimedReturned",
            Self::LoanDueDateChanged { .. } => "LoanDueDateChanged",
            Self::FeeFineBalanceChanged { .. } => "FeeFineBalanceChanged",
        }
    }
}
