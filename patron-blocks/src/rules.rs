//! The block condition catalog, per-group limits, and the pure rule
//! evaluator that turns a user summary into block decisions.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::overdue;
use crate::summary::{OpenLoan, UserSummary};

/// The fixed catalog of block rule kinds. Identity is the
/// variant itself; conditions are enumerable, not user-assignable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// Maximum number of items charged out.
    MaxNumberOfItemsChargedOut,
    /// Maximum number of lost items.
    MaxNumberOfLostItems,
    /// Maximum number of overdue items.
    MaxNumberOfOverdueItems,
    /// Maximum number of overdue recalls.
    MaxNumberOfOverdueRecalls,
    /// Recall overdue by maximum number of days.
    RecallOverdueByMaximumNumberOfDays,
    /// Maximum outstanding fee/fine balance.
    MaxOutstandingFeeFineBalance,
}

impl ConditionType {
    /// Returns every condition kind in the catalog.
    pub fn all() -> [ConditionType; 6] {
        [
            Self::MaxNumberOfItemsChargedOut,
            Self::MaxNumberOfLostItems,
            Self::MaxNumberOfOverdueItems,
            Self::MaxNumberOfOverdueRecalls,
            Self::RecallOverdueByMaximumNumberOfDays,
            Self::MaxOutstandingFeeFineBalance,
        ]
    }
}

/// A catalog entry: one rule kind plus its tenant-editable enablement flags
/// and display message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Which rule this condition configures.
    pub condition_type: ConditionType,
    /// Whether a triggered rule actually blocks borrowing.
    pub block_borrowing: bool,
    /// Whether a triggered rule actually blocks renewals.
    pub block_renewals: bool,
    /// Whether a triggered rule actually blocks requests.
    pub block_requests: bool,
    /// The message shown to staff and patrons when the block is in force.
    pub message: String,
}

impl Condition {
    /// ANDs raw evaluation results with this condition's enablement flags.
    pub fn mask(&self, raw: BlockFlags) -> BlockFlags {
        BlockFlags {
            block_borrowing: self.block_borrowing && raw.block_borrowing,
            block_renewals: self.block_renewals && raw.block_renewals,
            block_requests: self.block_requests && raw.block_requests,
        }
    }
}

/// A numeric threshold for one condition and one patron group. Absence of a
/// limit for a (condition, group) pair means "no restriction".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    /// Which rule the threshold applies to.
    pub condition_type: ConditionType,
    /// The patron group the threshold applies to.
    pub patron_group_id: Uuid,
    /// The threshold value. Counts and day values are whole numbers;
    /// balance thresholds may carry fractions.
    pub value: Decimal,
}

/// The three independent block decisions a rule evaluation produces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFlags {
    /// Block new checkouts.
    pub block_borrowing: bool,
    /// Block renewals.
    pub block_renewals: bool,
    /// Block item requests.
    pub block_requests: bool,
}

impl BlockFlags {
    /// Returns flags with the same value for all three actions.
    pub fn uniform(blocked: bool) -> Self {
        Self {
            block_borrowing: blocked,
            block_renewals: blocked,
            block_requests: blocked,
        }
    }

    /// Returns whether any of the three actions is blocked.
    pub fn any(&self) -> bool {
        self.block_borrowing || self.block_renewals || self.block_requests
    }
}

/// One triggered block for a patron, as returned by the block query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatronBlock {
    /// The condition that triggered.
    pub condition_type: ConditionType,
    /// The condition's display message.
    pub message: String,
    /// Block new checkouts.
    pub block_borrowing: bool,
    /// Block renewals.
    pub block_renewals: bool,
    /// Block item requests.
    pub block_requests: bool,
}

/// Evaluates one condition against a summary.
///
/// Pure and non-suspending. Every loan-scanning predicate first excludes
/// claimed-returned loans: a claimed-returned item is inert for blocking
/// purposes. The returned flags are raw rule results; the caller still ANDs
/// them with the condition's enablement flags via [`Condition::mask`].
pub fn evaluate(
    summary: &UserSummary,
    condition_type: ConditionType,
    limit: Decimal,
    now: DateTime<Utc>,
) -> BlockFlags {
    let active: Vec<&OpenLoan> = summary
        .open_loans
        .iter()
        .filter(|l| !l.item_claimed_returned)
        .collect();

    match condition_type {
        ConditionType::MaxNumberOfItemsChargedOut => {
            let charged_out = Decimal::from(active.len() as u64);
            // Reaching the limit stops new borrowing; exceeding it stops
            // everything.
            BlockFlags {
                block_borrowing: charged_out >= limit,
                block_renewals: charged_out > limit,
                block_requests: charged_out > limit,
            }
        }
        ConditionType::MaxNumberOfLostItems => {
            let lost = active.iter().filter(|l| l.item_lost).count();
            BlockFlags::uniform(Decimal::from(lost as u64) > limit)
        }
        ConditionType::MaxNumberOfOverdueItems => {
            let overdue = active.iter().filter(|l| l.is_overdue(now)).count();
            BlockFlags::uniform(Decimal::from(overdue as u64) > limit)
        }
        ConditionType::MaxNumberOfOverdueRecalls => {
            let overdue_recalls = active
                .iter()
                .filter(|l| l.recall && l.is_overdue(now))
                .count();
            BlockFlags::uniform(Decimal::from(overdue_recalls as u64) > limit)
        }
        ConditionType::RecallOverdueByMaximumNumberOfDays => {
            let any_over = active.iter().any(|l| {
                l.recall
                    && l.is_overdue(now)
                    && Decimal::from(overdue::overdue_days(l.overdue_minutes(now))) > limit
            });
            BlockFlags::uniform(any_over)
        }
        ConditionType::MaxOutstandingFeeFineBalance => {
            let claimed_returned: HashSet<Uuid> = summary
                .open_loans
                .iter()
                .filter(|l| l.item_claimed_returned)
                .map(|l| l.loan_id)
                .collect();
            // Fees/fines with no loan always count; loan-linked ones only
            // when the loan is not claimed-returned.
            let outstanding = summary
                .open_fees_fines
                .iter()
                .filter(|f| f.loan_id.is_none_or(|loan_id| !claimed_returned.contains(&loan_id)))
                .fold(Decimal::ZERO, |total, f| total + f.balance);
            BlockFlags::uniform(outstanding > limit)
        }
    }
}
