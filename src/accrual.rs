use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::book::LoanBook;
use crate::decimal::Money;
use crate::errors::Result;
use crate::events::EventName;
use crate::ledger::AccountKey;
use crate::loans::{BillId, Fee, FeeKind, FeeStatus};
use crate::products::{days_between, InterestType};
use crate::schedule::RowStatus;

/// outcome of an accrual attempt
///
/// Prerequisite failures are expected states in normal flow, so they come
/// back as typed outcomes rather than errors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AccrualOutcome {
    Accrued(Money),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    BillNotGenerated,
    /// principal, interest and fee dues are all zero
    BillClear,
    MinimumAlreadyPaid,
    NotPastDue,
    NothingToAccrue,
}

impl LoanBook {
    /// accrue one period of interest on a bill
    ///
    /// Idempotent only through the prerequisite re-check: there is no dedup
    /// key, so callers must not invoke this twice for the same period
    /// without an intervening state change.
    #[instrument(skip(self))]
    pub fn accrue_interest(&mut self, bill_id: BillId, as_of: NaiveDate) -> Result<AccrualOutcome> {
        let bill = self.bill(bill_id)?.clone();
        if !bill.is_generated {
            return Ok(AccrualOutcome::Skipped(SkipReason::BillNotGenerated));
        }
        let loan = self.loan(bill.loan_id)?.clone();

        let outstanding = self.receivables_as_of(bill_id, as_of);
        if outstanding.is_zero() {
            return Ok(AccrualOutcome::Skipped(SkipReason::BillClear));
        }

        let basis = match loan.product.interest_type {
            InterestType::Flat => bill.principal,
            InterestType::Reducing => self
                .ledger
                .balance_as_of(&AccountKey::principal_receivable(bill_id), Some(as_of))
                .max(Money::ZERO),
        };
        let amount = basis.monthly_interest(loan.monthly_rate).to_instalment();
        if !amount.is_positive() {
            return Ok(AccrualOutcome::Skipped(SkipReason::NothingToAccrue));
        }

        let event_id = self.events.record(
            EventName::AccrueInterest,
            as_of,
            amount,
            Some(bill.loan_id),
            json!({ "bill_id": bill_id.to_string() }),
            &self.clock().clone(),
        );
        let event = self.events.get(event_id).expect("just recorded").clone();
        self.ledger.post(
            &event,
            AccountKey::interest_receivable(bill_id),
            AccountKey::interest_earned(bill_id),
            amount,
        )?;
        self.ledger.post(
            &event,
            AccountKey::due_control(bill_id),
            AccountKey::maximum_due(bill_id),
            amount,
        )?;

        info!(bill = %bill_id, %amount, "interest accrued");
        Ok(AccrualOutcome::Accrued(amount))
    }

    /// charge the product's late fine once the minimum has gone unpaid past
    /// the due date
    ///
    /// The fine itself joins the minimum due, so it must be paid before the
    /// bill counts as minimum-paid again. Same idempotence caveat as
    /// interest accrual.
    #[instrument(skip(self))]
    pub fn accrue_late_fine(&mut self, bill_id: BillId, as_of: NaiveDate) -> Result<AccrualOutcome> {
        let bill = self.bill(bill_id)?.clone();
        if !bill.is_generated {
            return Ok(AccrualOutcome::Skipped(SkipReason::BillNotGenerated));
        }
        if as_of < bill.due_date {
            return Ok(AccrualOutcome::Skipped(SkipReason::NotPastDue));
        }
        let minimum = self
            .ledger
            .balance_as_of(&AccountKey::minimum_due(bill_id), Some(as_of))
            .max(Money::ZERO);
        if minimum.is_zero() {
            return Ok(AccrualOutcome::Skipped(SkipReason::MinimumAlreadyPaid));
        }

        let loan = self.loan(bill.loan_id)?.clone();
        let amount = loan.product.late_fee;
        if !amount.is_positive() {
            return Ok(AccrualOutcome::Skipped(SkipReason::NothingToAccrue));
        }

        let event_id = self.events.record(
            EventName::AccrueLateFine,
            as_of,
            amount,
            Some(bill.loan_id),
            json!({ "bill_id": bill_id.to_string() }),
            &self.clock().clone(),
        );
        let event = self.events.get(event_id).expect("just recorded").clone();
        self.ledger.post(
            &event,
            AccountKey::late_fee_receivable(bill_id),
            AccountKey::late_fee_earned(bill_id),
            amount,
        )?;
        self.ledger.post(
            &event,
            AccountKey::due_control(bill_id),
            AccountKey::minimum_due(bill_id),
            amount,
        )?;
        self.ledger.post(
            &event,
            AccountKey::due_control(bill_id),
            AccountKey::maximum_due(bill_id),
            amount,
        )?;

        self.fees.push(Fee {
            id: Uuid::new_v4(),
            loan_id: bill.loan_id,
            bill_id: Some(bill_id),
            kind: FeeKind::LateFee,
            amount,
            tax: Money::ZERO,
            status: FeeStatus::Unpaid,
            charged_on: as_of,
        });

        self.attach_late_fee_to_schedule(bill_id, amount, as_of);

        let dpd = days_between(bill.due_date, as_of).max(0) as i32;
        self.loan_mut(bill.loan_id)?.mark_dpd(dpd);

        info!(bill = %bill_id, %amount, dpd, "late fine accrued");
        Ok(AccrualOutcome::Accrued(amount))
    }

    fn receivables_as_of(&self, bill_id: BillId, as_of: NaiveDate) -> Money {
        let cutoff = Some(as_of);
        let p = self
            .ledger
            .balance_as_of(&AccountKey::principal_receivable(bill_id), cutoff);
        let i = self
            .ledger
            .balance_as_of(&AccountKey::interest_receivable(bill_id), cutoff);
        let l = self
            .ledger
            .balance_as_of(&AccountKey::late_fee_receivable(bill_id), cutoff);
        let a = self
            .ledger
            .balance_as_of(&AccountKey::atm_fee_receivable(bill_id), cutoff);
        (p + i + l + a).max(Money::ZERO)
    }

    /// carry the fine onto the overdue instalment row so sliding sees it
    fn attach_late_fee_to_schedule(&mut self, bill_id: BillId, amount: Money, as_of: NaiveDate) {
        let target = self
            .schedule
            .bill_rows(bill_id)
            .into_iter()
            .filter(|r| !r.is_paid())
            .find(|r| r.due_date <= as_of)
            .or_else(|| {
                self.schedule
                    .bill_rows(bill_id)
                    .into_iter()
                    .find(|r| !r.is_paid())
            })
            .map(|r| r.id);
        let Some(row_id) = target else {
            return;
        };

        let mut superseded = self
            .schedule
            .row(row_id)
            .expect("row id just resolved")
            .clone();
        self.schedule.deactivate(row_id);
        superseded.id = Uuid::new_v4();
        superseded.late_fee_due += amount;
        superseded.closing_pre_due += amount;
        superseded.row_status = RowStatus::Active;
        let loan_id = superseded.loan_id;
        self.schedule.insert(superseded);

        let deferred = self.deferred_interest_for(loan_id);
        self.schedule.regroup(loan_id, &deferred);
    }
}
