//! Integration tests for the projection engine, overdue calculator, rule
//! evaluator, and write coordinator.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use futures::executor::block_on;
use rust_decimal_macros::dec;
use uuid::Uuid;

use patron_blocks::store::UserSummaryStore;
use patron_blocks::store::in_memory::{
    InMemoryBlockCatalog, InMemoryEventLog, InMemoryFeeFineSource, InMemoryJobStore,
    InMemoryLoanSource, InMemoryPatronDirectory, InMemoryUserSummaryStore,
};
use patron_blocks::{
    CirculationEvent, Clock, Condition, ConditionType, Error, GracePeriod, Interval, Limit,
    MAX_CONFLICT_RETRIES, OpenLoan, PatronBlocksService, SummaryWriter, UserSummary, overdue,
    rules,
};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 12, 0, 0).unwrap()
}

fn checked_out(user_id: Uuid, loan_id: Uuid, due_date: DateTime<Utc>) -> CirculationEvent {
    CirculationEvent::ItemCheckedOut {
        user_id,
        loan_id,
        due_date,
        grace_period: None,
        occurred_at: base_time(),
    }
}

fn open_loan(due_date: Option<DateTime<Utc>>) -> OpenLoan {
    OpenLoan {
        loan_id: Uuid::new_v4(),
        due_date,
        recall: false,
        item_lost: false,
        item_claimed_returned: false,
        grace_period: None,
    }
}

/// A clock whose instant is set by the test.
struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    fn new(instant: DateTime<Utc>) -> Self {
        Self(Mutex::new(instant))
    }

    fn set(&self, instant: DateTime<Utc>) {
        *self.0.lock().unwrap() = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

// -- Projection ----------------------------------------------------------

#[test]
fn checkout_is_idempotent() {
    let user_id = Uuid::new_v4();
    let loan_id = Uuid::new_v4();
    let mut summary = UserSummary::new(user_id);

    let event = checked_out(user_id, loan_id, base_time() + Duration::days(7));
    summary.apply(&event);
    summary.apply(&event);

    assert_eq!(summary.open_loans.len(), 1, "duplicate checkout must not duplicate the loan");
    assert_eq!(summary.version, 2, "every applied event bumps the version");
}

#[test]
fn check_in_removes_loan_and_ignores_unknown() {
    let user_id = Uuid::new_v4();
    let loan_id = Uuid::new_v4();
    let mut summary = UserSummary::new(user_id);
    summary.apply(&checked_out(user_id, loan_id, base_time() + Duration::days(7)));

    summary.apply(&CirculationEvent::ItemCheckedIn {
        user_id,
        loan_id,
        occurred_at: base_time(),
    });
    assert!(summary.open_loans.is_empty(), "check-in closes the loan");

    // Checking in a loan that was never seen is a no-op, not an error.
    summary.apply(&CirculationEvent::ItemCheckedIn {
        user_id,
        loan_id: Uuid::new_v4(),
        occurred_at: base_time(),
    });
    assert!(summary.open_loans.is_empty());
}

#[test]
fn loss_is_representable_without_the_checkout() {
    let user_id = Uuid::new_v4();
    let loan_id = Uuid::new_v4();
    let mut summary = UserSummary::new(user_id);

    summary.apply(&CirculationEvent::ItemDeclaredLost {
        user_id,
        loan_id,
        occurred_at: base_time(),
    });

    let loan = summary.loan(&loan_id).expect("a minimal loan is created");
    assert!(loan.item_lost);
    assert!(loan.due_date.is_none());
    assert!(!loan.is_overdue(base_time() + Duration::days(365)), "no due date, never overdue");
}

#[test]
fn aged_to_lost_sets_the_same_flag() {
    let user_id = Uuid::new_v4();
    let loan_id = Uuid::new_v4();
    let mut summary = UserSummary::new(user_id);
    summary.apply(&checked_out(user_id, loan_id, base_time() + Duration::days(7)));

    summary.apply(&CirculationEvent::ItemAgedToLost {
        user_id,
        loan_id,
        occurred_at: base_time(),
    });

    assert!(summary.loan(&loan_id).expect("loan exists").item_lost);
}

#[test]
fn claimed_returned_is_upserted() {
    let user_id = Uuid::new_v4();
    let loan_id = Uuid::new_v4();
    let mut summary = UserSummary::new(user_id);

    summary.apply(&CirculationEvent::ItemClaimedReturned {
        user_id,
        loan_id,
        occurred_at: base_time(),
    });

    assert!(summary.loan(&loan_id).expect("loan exists").item_claimed_returned);
}

#[test]
fn due_date_change_reactivates_a_lost_loan() {
    let user_id = Uuid::new_v4();
    let loan_id = Uuid::new_v4();
    let mut summary = UserSummary::new(user_id);
    summary.apply(&checked_out(user_id, loan_id, base_time() + Duration::days(7)));
    summary.apply(&CirculationEvent::ItemDeclaredLost {
        user_id,
        loan_id,
        occurred_at: base_time(),
    });

    let new_due = base_time() + Duration::days(3);
    summary.apply(&CirculationEvent::LoanDueDateChanged {
        user_id,
        loan_id,
        due_date: new_due,
        changed_by_recall: true,
        occurred_at: base_time(),
    });

    let loan = summary.loan(&loan_id).expect("loan exists");
    assert_eq!(loan.due_date, Some(new_due));
    assert!(loan.recall);
    assert!(!loan.item_lost, "a due date change implies the loan is active again");
}

#[test]
fn fee_fine_balance_is_upserted_and_removed_at_zero() {
    let user_id = Uuid::new_v4();
    let fee_fine_id = Uuid::new_v4();
    let fee_fine_type_id = Uuid::new_v4();
    let mut summary = UserSummary::new(user_id);

    let balance_changed = |balance| CirculationEvent::FeeFineBalanceChanged {
        user_id: Some(user_id),
        fee_fine_id,
        fee_fine_type_id,
        loan_id: None,
        balance,
        occurred_at: base_time(),
    };

    summary.apply(&balance_changed(dec!(5.00)));
    assert_eq!(summary.fee_fine(&fee_fine_id).expect("fee exists").balance, dec!(5.00));

    summary.apply(&balance_changed(dec!(7.50)));
    assert_eq!(summary.open_fees_fines.len(), 1, "same fee id is upserted, not duplicated");
    assert_eq!(summary.fee_fine(&fee_fine_id).expect("fee exists").balance, dec!(7.50));

    summary.apply(&balance_changed(dec!(0)));
    assert!(summary.open_fees_fines.is_empty(), "a zero balance closes the fee/fine");
}

#[test]
fn events_for_distinct_loans_commute() {
    let user_id = Uuid::new_v4();
    let loan_a = Uuid::new_v4();
    let loan_b = Uuid::new_v4();

    let first = checked_out(user_id, loan_a, base_time() + Duration::days(7));
    let second = CirculationEvent::ItemDeclaredLost {
        user_id,
        loan_id: loan_b,
        occurred_at: base_time(),
    };

    let mut forward = UserSummary::new(user_id);
    forward.apply(&first);
    forward.apply(&second);

    let mut reverse = UserSummary::new(user_id);
    reverse.apply(&second);
    reverse.apply(&first);

    let sorted = |summary: &UserSummary| {
        let mut loans = summary.open_loans.clone();
        loans.sort_by_key(|l| l.loan_id);
        loans
    };
    assert_eq!(sorted(&forward), sorted(&reverse));
    assert_eq!(forward.version, reverse.version);
}

// -- Overdue calculator --------------------------------------------------

#[test]
fn grace_period_boundary() {
    let now = base_time();
    let due = now - Duration::minutes(61);

    let sixty = GracePeriod { duration: 60, interval: Interval::Minutes };
    assert_eq!(overdue::overdue_minutes(due, Some(&sixty), now), 61);

    let sixty_one = GracePeriod { duration: 61, interval: Interval::Minutes };
    assert_eq!(
        overdue::overdue_minutes(due, Some(&sixty_one), now),
        0,
        "a grace period absorbing the whole overdue amount forgives it entirely"
    );
}

#[test]
fn overdue_without_grace_period() {
    let now = base_time();
    assert_eq!(overdue::overdue_minutes(now - Duration::minutes(5), None, now), 5);
    assert_eq!(overdue::overdue_minutes(now + Duration::minutes(5), None, now), 0);
    assert_eq!(overdue::overdue_minutes(now, None, now), 0);
}

#[test]
fn grace_period_unit_conversion() {
    assert_eq!(GracePeriod { duration: 90, interval: Interval::Minutes }.minutes(), 90);
    assert_eq!(GracePeriod { duration: 2, interval: Interval::Hours }.minutes(), 120);
    assert_eq!(GracePeriod { duration: 1, interval: Interval::Days }.minutes(), 1440);
    assert_eq!(GracePeriod { duration: 1, interval: Interval::Weeks }.minutes(), 10_080);
    assert_eq!(GracePeriod { duration: 1, interval: Interval::Months }.minutes(), 44_640);
}

#[test]
fn overdue_days_round_up() {
    assert_eq!(overdue::overdue_days(0), 0);
    assert_eq!(overdue::overdue_days(1), 1);
    assert_eq!(overdue::overdue_days(1440), 1);
    assert_eq!(overdue::overdue_days(1441), 2);
}

// -- Rule evaluator ------------------------------------------------------

#[test]
fn charged_out_boundary() {
    let now = base_time();
    let mut summary = UserSummary::new(Uuid::new_v4());
    for _ in 0..20 {
        summary.open_loans.push(open_loan(Some(now + Duration::days(7))));
    }

    let at_limit = rules::evaluate(&summary, ConditionType::MaxNumberOfItemsChargedOut, dec!(20), now);
    assert!(at_limit.block_borrowing, "reaching the limit stops new borrowing");
    assert!(!at_limit.block_renewals);
    assert!(!at_limit.block_requests);

    summary.open_loans.push(open_loan(Some(now + Duration::days(7))));
    let over_limit = rules::evaluate(&summary, ConditionType::MaxNumberOfItemsChargedOut, dec!(20), now);
    assert!(over_limit.block_borrowing);
    assert!(over_limit.block_renewals);
    assert!(over_limit.block_requests);
}

#[test]
fn claimed_returned_loans_are_inert() {
    let now = base_time();
    let mut summary = UserSummary::new(Uuid::new_v4());
    for i in 0..25 {
        let mut loan = open_loan(Some(now + Duration::days(7)));
        loan.item_claimed_returned = i < 6;
        summary.open_loans.push(loan);
    }

    let flags = rules::evaluate(&summary, ConditionType::MaxNumberOfItemsChargedOut, dec!(20), now);
    assert!(!flags.any(), "6 of 25 loans are claimed returned, leaving 19 under the limit");
}

#[test]
fn lost_items_block_only_above_the_limit() {
    let now = base_time();
    let mut summary = UserSummary::new(Uuid::new_v4());
    for i in 0..3 {
        let mut loan = open_loan(Some(now + Duration::days(7)));
        loan.item_lost = true;
        loan.item_claimed_returned = i == 0;
        summary.open_loans.push(loan);
    }

    assert!(rules::evaluate(&summary, ConditionType::MaxNumberOfLostItems, dec!(1), now).any());
    assert!(!rules::evaluate(&summary, ConditionType::MaxNumberOfLostItems, dec!(2), now).any());
}

#[test]
fn overdue_items_honor_grace_periods() {
    let now = base_time();
    let mut summary = UserSummary::new(Uuid::new_v4());

    // Overdue by 61 minutes.
    summary.open_loans.push(open_loan(Some(now - Duration::minutes(61))));
    // Also 61 minutes past due, but fully absorbed by a 2-hour grace period.
    let mut graced = open_loan(Some(now - Duration::minutes(61)));
    graced.grace_period = Some(GracePeriod { duration: 2, interval: Interval::Hours });
    summary.open_loans.push(graced);
    // Not yet due.
    summary.open_loans.push(open_loan(Some(now + Duration::hours(1))));

    assert!(rules::evaluate(&summary, ConditionType::MaxNumberOfOverdueItems, dec!(0), now).any());
    assert!(!rules::evaluate(&summary, ConditionType::MaxNumberOfOverdueItems, dec!(1), now).any());
}

#[test]
fn overdue_recalls_count_only_recalled_loans() {
    let now = base_time();
    let mut summary = UserSummary::new(Uuid::new_v4());

    let mut recalled = open_loan(Some(now - Duration::hours(3)));
    recalled.recall = true;
    summary.open_loans.push(recalled);
    // Overdue but never recalled.
    summary.open_loans.push(open_loan(Some(now - Duration::hours(3))));

    assert!(rules::evaluate(&summary, ConditionType::MaxNumberOfOverdueRecalls, dec!(0), now).any());
    assert!(!rules::evaluate(&summary, ConditionType::MaxNumberOfOverdueRecalls, dec!(1), now).any());
}

#[test]
fn recall_overdue_by_days_is_existential() {
    let now = base_time();
    let mut summary = UserSummary::new(Uuid::new_v4());

    let mut recalled = open_loan(Some(now - Duration::days(3)));
    recalled.recall = true;
    summary.open_loans.push(recalled);

    let rule = ConditionType::RecallOverdueByMaximumNumberOfDays;
    assert!(rules::evaluate(&summary, rule, dec!(2), now).any(), "3 days overdue exceeds 2");
    assert!(!rules::evaluate(&summary, rule, dec!(3), now).any(), "3 days does not exceed 3");
}

#[test]
fn outstanding_balance_is_aggregated() {
    let now = base_time();
    let user_id = Uuid::new_v4();
    let mut summary = UserSummary::new(user_id);

    for _ in 0..2 {
        summary.apply(&CirculationEvent::FeeFineBalanceChanged {
            user_id: Some(user_id),
            fee_fine_id: Uuid::new_v4(),
            fee_fine_type_id: Uuid::new_v4(),
            loan_id: None,
            balance: dec!(14.00),
            occurred_at: now,
        });
    }

    let rule = ConditionType::MaxOutstandingFeeFineBalance;
    assert!(!rules::evaluate(&summary, rule, dec!(28.00), now).any(), "28.00 does not exceed 28.00");
    assert!(rules::evaluate(&summary, rule, dec!(27.99), now).any());
}

#[test]
fn balance_of_claimed_returned_loans_is_excluded() {
    let now = base_time();
    let mut summary = UserSummary::new(Uuid::new_v4());

    let mut claimed = open_loan(Some(now + Duration::days(7)));
    claimed.item_claimed_returned = true;
    let claimed_loan_id = claimed.loan_id;
    summary.open_loans.push(claimed);

    summary.open_fees_fines.push(patron_blocks::OpenFeeFine {
        fee_fine_id: Uuid::new_v4(),
        fee_fine_type_id: Uuid::new_v4(),
        loan_id: Some(claimed_loan_id),
        balance: dec!(100.00),
    });
    summary.open_fees_fines.push(patron_blocks::OpenFeeFine {
        fee_fine_id: Uuid::new_v4(),
        fee_fine_type_id: Uuid::new_v4(),
        loan_id: None,
        balance: dec!(3.00),
    });

    let rule = ConditionType::MaxOutstandingFeeFineBalance;
    assert!(!rules::evaluate(&summary, rule, dec!(5.00), now).any(), "only the unlinked 3.00 counts");
    assert!(rules::evaluate(&summary, rule, dec!(2.99), now).any());
}

#[test]
fn enablement_flags_mask_raw_results() {
    let condition = Condition {
        condition_type: ConditionType::MaxNumberOfLostItems,
        block_borrowing: true,
        block_renewals: false,
        block_requests: false,
        message: "Maximum number of lost items reached".into(),
    };

    let masked = condition.mask(patron_blocks::BlockFlags::uniform(true));
    assert!(masked.block_borrowing);
    assert!(!masked.block_renewals);
    assert!(!masked.block_requests);
}

// -- Write coordinator ---------------------------------------------------

/// A store whose versioned writes always lose the race.
#[derive(Default)]
struct AlwaysConflictingStore {
    update_attempts: AtomicU32,
}

#[async_trait]
impl UserSummaryStore for AlwaysConflictingStore {
    async fn get_by_id(&self, _id: &Uuid) -> patron_blocks::Result<Option<UserSummary>> {
        Ok(None)
    }

    async fn get_by_user_id(&self, user_id: &Uuid) -> patron_blocks::Result<Option<UserSummary>> {
        Ok(Some(UserSummary::new(*user_id)))
    }

    async fn find_by_fee_fine_id(
        &self,
        _fee_fine_id: &Uuid,
    ) -> patron_blocks::Result<Option<UserSummary>> {
        Ok(None)
    }

    async fn save(&self, _summary: &UserSummary) -> patron_blocks::Result<Uuid> {
        Err(Error::Conflict)
    }

    async fn upsert(&self, summary: &UserSummary) -> patron_blocks::Result<Uuid> {
        Ok(summary.id)
    }

    async fn update(
        &self,
        _summary: &UserSummary,
        _expected_version: i64,
    ) -> patron_blocks::Result<()> {
        self.update_attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::Conflict)
    }

    async fn delete(&self, _id: &Uuid) -> patron_blocks::Result<()> {
        Ok(())
    }

    async fn delete_by_user_id(&self, _user_id: &Uuid) -> patron_blocks::Result<()> {
        Ok(())
    }

    async fn delete_all(&self) -> patron_blocks::Result<()> {
        Ok(())
    }
}

#[test]
fn permanent_conflicts_fail_after_the_retry_bound() {
    let store = Arc::new(AlwaysConflictingStore::default());
    let writer = SummaryWriter::new(Arc::clone(&store));
    let user_id = Uuid::new_v4();

    let err = block_on(writer.apply(&checked_out(user_id, Uuid::new_v4(), base_time())))
        .expect_err("a permanent conflict must surface");
    assert!(matches!(err, Error::Conflict));
    assert_eq!(
        store.update_attempts.load(Ordering::SeqCst),
        MAX_CONFLICT_RETRIES + 1,
        "one initial attempt plus the bounded retries"
    );
}

/// Delegates to an in-memory store after injecting a fixed number of
/// conflicts into versioned updates.
struct FlakyStore {
    inner: InMemoryUserSummaryStore,
    remaining_conflicts: AtomicU32,
}

#[async_trait]
impl UserSummaryStore for FlakyStore {
    async fn get_by_id(&self, id: &Uuid) -> patron_blocks::Result<Option<UserSummary>> {
        self.inner.get_by_id(id).await
    }

    async fn get_by_user_id(&self, user_id: &Uuid) -> patron_blocks::Result<Option<UserSummary>> {
        self.inner.get_by_user_id(user_id).await
    }

    async fn find_by_fee_fine_id(
        &self,
        fee_fine_id: &Uuid,
    ) -> patron_blocks::Result<Option<UserSummary>> {
        self.inner.find_by_fee_fine_id(fee_fine_id).await
    }

    async fn save(&self, summary: &UserSummary) -> patron_blocks::Result<Uuid> {
        self.inner.save(summary).await
    }

    async fn upsert(&self, summary: &UserSummary) -> patron_blocks::Result<Uuid> {
        self.inner.upsert(summary).await
    }

    async fn update(
        &self,
        summary: &UserSummary,
        expected_version: i64,
    ) -> patron_blocks::Result<()> {
        if self
            .remaining_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Conflict);
        }
        self.inner.update(summary, expected_version).await
    }

    async fn delete(&self, id: &Uuid) -> patron_blocks::Result<()> {
        self.inner.delete(id).await
    }

    async fn delete_by_user_id(&self, user_id: &Uuid) -> patron_blocks::Result<()> {
        self.inner.delete_by_user_id(user_id).await
    }

    async fn delete_all(&self) -> patron_blocks::Result<()> {
        self.inner.delete_all().await
    }
}

#[test]
fn transient_conflicts_are_retried_against_fresh_state() {
    let store = Arc::new(FlakyStore {
        inner: InMemoryUserSummaryStore::default(),
        remaining_conflicts: AtomicU32::new(2),
    });
    let writer = SummaryWriter::new(Arc::clone(&store));
    let user_id = Uuid::new_v4();
    let loan_id = Uuid::new_v4();

    block_on(writer.apply(&checked_out(user_id, loan_id, base_time() + Duration::days(7))))
        .expect("the first event creates the summary");
    block_on(writer.apply(&CirculationEvent::ItemCheckedIn {
        user_id,
        loan_id,
        occurred_at: base_time(),
    }))
    .expect("two injected conflicts stay within the retry bound");

    let summary = block_on(store.get_by_user_id(&user_id))
        .expect("load")
        .expect("summary exists");
    assert!(summary.open_loans.is_empty(), "the check-in won through after retrying");
}

/// Counts reverse lookups while reporting that no summary owns the fee.
#[derive(Default)]
struct OrphanFeeFineStore {
    lookups: AtomicU32,
}

#[async_trait]
impl UserSummaryStore for OrphanFeeFineStore {
    async fn get_by_id(&self, _id: &Uuid) -> patron_blocks::Result<Option<UserSummary>> {
        Ok(None)
    }

    async fn get_by_user_id(&self, _user_id: &Uuid) -> patron_blocks::Result<Option<UserSummary>> {
        Ok(None)
    }

    async fn find_by_fee_fine_id(
        &self,
        _fee_fine_id: &Uuid,
    ) -> patron_blocks::Result<Option<UserSummary>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    }

    async fn save(&self, summary: &UserSummary) -> patron_blocks::Result<Uuid> {
        Ok(summary.id)
    }

    async fn upsert(&self, summary: &UserSummary) -> patron_blocks::Result<Uuid> {
        Ok(summary.id)
    }

    async fn update(
        &self,
        _summary: &UserSummary,
        _expected_version: i64,
    ) -> patron_blocks::Result<()> {
        Ok(())
    }

    async fn delete(&self, _id: &Uuid) -> patron_blocks::Result<()> {
        Ok(())
    }

    async fn delete_by_user_id(&self, _user_id: &Uuid) -> patron_blocks::Result<()> {
        Ok(())
    }

    async fn delete_all(&self) -> patron_blocks::Result<()> {
        Ok(())
    }
}

#[test]
fn unowned_fee_fine_balance_change_is_not_retried() {
    let store = Arc::new(OrphanFeeFineStore::default());
    let writer = SummaryWriter::new(Arc::clone(&store));

    let event = CirculationEvent::FeeFineBalanceChanged {
        user_id: None,
        fee_fine_id: Uuid::new_v4(),
        fee_fine_type_id: Uuid::new_v4(),
        loan_id: None,
        balance: dec!(3.50),
        occurred_at: base_time(),
    };
    let err = block_on(writer.apply(&event)).expect_err("no summary owns the fee");
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(store.lookups.load(Ordering::SeqCst), 1, "referential failures are not retried");
}

#[test]
fn unowned_fee_fine_is_resolved_by_reverse_lookup() {
    let store = Arc::new(InMemoryUserSummaryStore::default());
    let writer = SummaryWriter::new(Arc::clone(&store));
    let user_id = Uuid::new_v4();
    let fee_fine_id = Uuid::new_v4();
    let fee_fine_type_id = Uuid::new_v4();

    block_on(writer.apply(&CirculationEvent::FeeFineBalanceChanged {
        user_id: Some(user_id),
        fee_fine_id,
        fee_fine_type_id,
        loan_id: None,
        balance: dec!(10.00),
        occurred_at: base_time(),
    }))
    .expect("the owning summary is created");

    // The follow-up event only knows the fee id; the coordinator finds the
    // owner by reverse lookup.
    block_on(writer.apply(&CirculationEvent::FeeFineBalanceChanged {
        user_id: None,
        fee_fine_id,
        fee_fine_type_id,
        loan_id: None,
        balance: dec!(0),
        occurred_at: base_time(),
    }))
    .expect("resolution by fee id succeeds");

    let summary = block_on(store.get_by_user_id(&user_id))
        .expect("load")
        .expect("summary exists");
    assert!(summary.open_fees_fines.is_empty(), "the zero balance closed the fee");
}

// -- Summary store -------------------------------------------------------

#[test]
fn save_conflicts_on_an_existing_summary() {
    let store = InMemoryUserSummaryStore::default();
    let summary = UserSummary::new(Uuid::new_v4());

    block_on(store.save(&summary)).expect("initial save");
    let err = block_on(store.save(&summary)).expect_err("one summary per patron");
    assert!(matches!(err, Error::Conflict));
}

#[test]
fn versioned_update_detects_stale_writers() {
    let store = InMemoryUserSummaryStore::default();
    let user_id = Uuid::new_v4();
    let mut summary = UserSummary::new(user_id);
    summary.apply(&checked_out(user_id, Uuid::new_v4(), base_time()));
    block_on(store.save(&summary)).expect("save at version 1");

    let err = block_on(store.update(&summary, 0)).expect_err("stale expected version");
    assert!(matches!(err, Error::Conflict));
    block_on(store.update(&summary, 1)).expect("matching expected version");
}

#[test]
fn summaries_are_addressable_by_id() {
    let store = InMemoryUserSummaryStore::default();
    let summary = UserSummary::new(Uuid::new_v4());
    block_on(store.save(&summary)).expect("save");

    let loaded = block_on(store.get_by_id(&summary.id)).expect("load");
    assert_eq!(loaded, Some(summary.clone()));

    block_on(store.delete(&summary.id)).expect("delete");
    assert_eq!(block_on(store.get_by_id(&summary.id)).expect("load"), None);
    // Deleting again is a no-op.
    block_on(store.delete(&summary.id)).expect("repeat delete");
}

#[test]
fn the_whole_condition_catalog_can_be_seeded() {
    use patron_blocks::store::BlockCatalog;

    let catalog = InMemoryBlockCatalog::default();
    for condition_type in ConditionType::all() {
        catalog.put_condition(Condition {
            condition_type,
            block_borrowing: true,
            block_renewals: true,
            block_requests: true,
            message: String::new(),
        });
    }

    for condition_type in ConditionType::all() {
        let condition = block_on(catalog.get_condition(condition_type))
            .expect("lookup")
            .expect("seeded condition exists");
        assert_eq!(condition.condition_type, condition_type);
    }
}

// -- End to end ----------------------------------------------------------

#[test]
fn overdue_block_appears_once_the_due_date_passes() {
    let start = base_time();
    let clock = Arc::new(ManualClock::new(start));
    let directory = Arc::new(InMemoryPatronDirectory::default());
    let catalog = Arc::new(InMemoryBlockCatalog::default());

    let user_id = Uuid::new_v4();
    let patron_group_id = Uuid::new_v4();
    directory.set_patron_group(user_id, patron_group_id);
    catalog.put_condition(Condition {
        condition_type: ConditionType::MaxNumberOfOverdueItems,
        block_borrowing: true,
        block_renewals: true,
        block_requests: true,
        message: "Maximum number of overdue items reached".into(),
    });
    catalog.put_limit(Limit {
        condition_type: ConditionType::MaxNumberOfOverdueItems,
        patron_group_id,
        value: dec!(0),
    });

    let service = PatronBlocksService::new(
        Arc::new(InMemoryUserSummaryStore::default()),
        Arc::new(InMemoryEventLog::default()),
        catalog,
        directory,
        Arc::new(InMemoryJobStore::default()),
        Arc::new(InMemoryLoanSource::default()),
        Arc::new(InMemoryFeeFineSource::default()),
    )
    .with_clock(clock.clone());

    block_on(service.handle_event(CirculationEvent::ItemCheckedOut {
        user_id,
        loan_id: Uuid::new_v4(),
        due_date: start + Duration::hours(1),
        grace_period: None,
        occurred_at: start,
    }))
    .expect("checkout");

    let blocks = block_on(service.get_blocks_for_user(&user_id)).expect("query");
    assert!(blocks.is_empty(), "the loan is not yet overdue");

    clock.set(start + Duration::hours(2));
    let blocks = block_on(service.get_blocks_for_user(&user_id)).expect("query");
    assert_eq!(blocks.len(), 1);
    let block = &blocks[0];
    assert_eq!(block.condition_type, ConditionType::MaxNumberOfOverdueItems);
    assert_eq!(block.message, "Maximum number of overdue items reached");
    assert!(block.block_borrowing && block.block_renewals && block.block_requests);
}

#[test]
fn disabled_conditions_are_omitted_from_the_block_set() {
    let start = base_time();
    let clock = Arc::new(ManualClock::new(start));
    let directory = Arc::new(InMemoryPatronDirectory::default());
    let catalog = Arc::new(InMemoryBlockCatalog::default());

    let user_id = Uuid::new_v4();
    let patron_group_id = Uuid::new_v4();
    directory.set_patron_group(user_id, patron_group_id);
    catalog.put_condition(Condition {
        condition_type: ConditionType::MaxNumberOfItemsChargedOut,
        block_borrowing: false,
        block_renewals: false,
        block_requests: false,
        message: "Maximum number of items charged out reached".into(),
    });
    catalog.put_limit(Limit {
        condition_type: ConditionType::MaxNumberOfItemsChargedOut,
        patron_group_id,
        value: dec!(0),
    });

    let service = PatronBlocksService::new(
        Arc::new(InMemoryUserSummaryStore::default()),
        Arc::new(InMemoryEventLog::default()),
        catalog,
        directory,
        Arc::new(InMemoryJobStore::default()),
        Arc::new(InMemoryLoanSource::default()),
        Arc::new(InMemoryFeeFineSource::default()),
    )
    .with_clock(clock.clone());

    block_on(service.handle_event(checked_out(
        user_id,
        Uuid::new_v4(),
        start + Duration::days(7),
    )))
    .expect("checkout");

    let blocks = block_on(service.get_blocks_for_user(&user_id)).expect("query");
    assert!(blocks.is_empty(), "a condition with every action disabled never surfaces");
}

#[test]
fn a_limit_referencing_a_deleted_condition_is_an_error() {
    let directory = Arc::new(InMemoryPatronDirectory::default());
    let catalog = Arc::new(InMemoryBlockCatalog::default());

    let user_id = Uuid::new_v4();
    let patron_group_id = Uuid::new_v4();
    directory.set_patron_group(user_id, patron_group_id);
    // A limit is configured, but its condition was deleted from the catalog.
    catalog.put_limit(Limit {
        condition_type: ConditionType::MaxNumberOfLostItems,
        patron_group_id,
        value: dec!(2),
    });

    let service = PatronBlocksService::new(
        Arc::new(InMemoryUserSummaryStore::default()),
        Arc::new(InMemoryEventLog::default()),
        catalog,
        directory,
        Arc::new(InMemoryJobStore::default()),
        Arc::new(InMemoryLoanSource::default()),
        Arc::new(InMemoryFeeFineSource::default()),
    );

    block_on(service.handle_event(checked_out(
        user_id,
        Uuid::new_v4(),
        base_time() + Duration::days(7),
    )))
    .expect("checkout");

    let err = block_on(service.get_blocks_for_user(&user_id))
        .expect_err("a dangling limit must not read as no blocks");
    assert!(matches!(err, Error::NotFound(_)));
}
