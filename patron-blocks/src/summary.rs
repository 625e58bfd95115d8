//! The per-patron aggregate and the projection engine that folds
//! circulation events into it.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::event::CirculationEvent;
use crate::overdue::{self, GracePeriod};

/// An open loan as tracked on a [`UserSummary`]. At most one entry exists
/// per `loan_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenLoan {
    /// The loan's identifier.
    pub loan_id: Uuid,
    /// When the item is due back. A loan synthesized from a loss or claim
    /// event that missed its checkout has no due date and is never overdue.
    pub due_date: Option<DateTime<Utc>>,
    /// Whether the current due date was set by a recall.
    pub recall: bool,
    /// Whether the item was declared or aged to lost.
    pub item_lost: bool,
    /// Whether the patron claimed to have returned the item. A
    /// claimed-returned loan is inert for blocking purposes.
    pub item_claimed_returned: bool,
    /// Grace period from the loan policy, if any.
    pub grace_period: Option<GracePeriod>,
}

impl OpenLoan {
    fn minimal(loan_id: Uuid) -> Self {
        Self {
            loan_id,
            due_date: None,
            recall: false,
            item_lost: false,
            item_claimed_returned: false,
            grace_period: None,
        }
    }

    /// Returns how many minutes past due this loan is at `now`, honoring its
    /// grace period. A loan with no due date is never overdue.
    pub fn overdue_minutes(&self, now: DateTime<Utc>) -> i64 {
        self.due_date
            .map_or(0, |due| overdue::overdue_minutes(due, self.grace_period.as_ref(), now))
    }

    /// Returns whether this loan is overdue at `now`.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.overdue_minutes(now) > 0
    }
}

/// An open fee/fine as tracked on a [`UserSummary`]. At most one entry
/// exists per `fee_fine_id`; an entry whose balance reaches zero is removed,
/// not retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenFeeFine {
    /// The fee/fine's identifier.
    pub fee_fine_id: Uuid,
    /// The kind of fee/fine.
    pub fee_fine_type_id: Uuid,
    /// The loan the fee/fine was charged for, if any.
    pub loan_id: Option<Uuid>,
    /// The remaining balance.
    pub balance: Decimal,
}

/// The materialized circulation summary for one patron.
///
/// Created lazily on the first event for a patron and mutated exclusively by
/// [`apply`](UserSummary::apply). The `version` field backs the optimistic
/// concurrency protocol of the write coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    /// The summary's identifier, derived deterministically from `user_id`
    /// so a rebuild against an unchanged source reproduces it exactly.
    pub id: Uuid,
    /// The patron this summary belongs to. One summary per patron.
    pub user_id: Uuid,
    /// Open loans, at most one per loan id.
    pub open_loans: Vec<OpenLoan>,
    /// Open fees/fines, at most one per fee/fine id.
    pub open_fees_fines: Vec<OpenFeeFine>,
    /// Monotonic version, bumped by each applied event and compared at
    /// write time.
    pub version: i64,
}

impl UserSummary {
    /// Creates an empty summary for a patron.
    pub fn new(user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v5(&Uuid::NAMESPACE_OID, user_id.as_bytes()),
            user_id,
            open_loans: Vec::new(),
            open_fees_fines: Vec::new(),
            version: 0,
        }
    }

    /// Applies an event to the summary, changing its state.
    ///
    /// This is a total function: no event kind is rejected. References to
    /// unknown loans or fees/fines follow upsert-or-create semantics (a
    /// loss must be representable even when the checkout event was missed),
    /// and events that find nothing to change are no-ops, never errors.
    pub fn apply(&mut self, event: &CirculationEvent) {
        match event {
            CirculationEvent::ItemCheckedOut {
                loan_id,
                due_date,
                grace_period,
                ..
            } => {
                // Idempotent: a loan that is already open stays as it is.
                if !self.open_loans.iter().any(|l| l.loan_id == *loan_id) {
                    self.open_loans.push(OpenLoan {
                        loan_id: *loan_id,
                        due_date: Some(*due_date),
                        recall: false,
                        item_lost: false,
                        item_claimed_returned: false,
                        grace_period: *grace_period,
                    });
                }
            }
            CirculationEvent::ItemCheckedIn { loan_id, .. } => {
                self.open_loans.retain(|l| l.loan_id != *loan_id);
            }
            CirculationEvent::ItemDeclaredLost { loan_id, .. }
            | CirculationEvent::ItemAgedToLost { loan_id, .. } => {
                self.loan_or_insert(*loan_id).item_lost = true;
            }
            CirculationEvent::ItemClaimedReturned { loan_id, .. } => {
                self.loan_or_insert(*loan_id).item_claimed_returned = true;
            }
            CirculationEvent::LoanDueDateChanged {
                loan_id,
                due_date,
                changed_by_recall,
                ..
            } => {
                let loan = self.loan_or_insert(*loan_id);
                loan.due_date = Some(*due_date);
                loan.recall = *changed_by_recall;
                // A due date change implies the loan is active again.
                loan.item_lost = false;
            }
            CirculationEvent::FeeFineBalanceChanged {
                fee_fine_id,
                fee_fine_type_id,
                loan_id,
                balance,
                ..
            } => {
                if *balance > Decimal::ZERO {
                    match self
                        .open_fees_fines
                        .iter_mut()
                        .find(|f| f.fee_fine_id == *fee_fine_id)
                    {
                        Some(fee_fine) => {
                            fee_fine.fee_fine_type_id = *fee_fine_type_id;
                            fee_fine.loan_id = *loan_id;
                            fee_fine.balance = *balance;
                        }
                        None => self.open_fees_fines.push(OpenFeeFine {
                            fee_fine_id: *fee_fine_id,
                            fee_fine_type_id: *fee_fine_type_id,
                            loan_id: *loan_id,
                            balance: *balance,
                        }),
                    }
                } else {
                    self.open_fees_fines.retain(|f| f.fee_fine_id != *fee_fine_id);
                }
            }
        }
        self.version += 1;
    }

    /// Returns the open loan with the given id, if any.
    pub fn loan(&self, loan_id: &Uuid) -> Option<&OpenLoan> {
        self.open_loans.iter().find(|l| l.loan_id == *loan_id)
    }

    /// Returns the open fee/fine with the given id, if any.
    pub fn fee_fine(&self, fee_fine_id: &Uuid) -> Option<&OpenFeeFine> {
        self.open_fees_fines
            .iter()
            .find(|f| f.fee_fine_id == *fee_fine_id)
    }

    fn loan_or_insert(&mut self, loan_id: Uuid) -> &mut OpenLoan {
        let position = match self.open_loans.iter().position(|l| l.loan_id == loan_id) {
            Some(position) => position,
            None => {
                self.open_loans.push(OpenLoan::minimal(loan_id));
                self.open_loans.len() - 1
            }
        };
        &mut self.open_loans[position]
    }
}
