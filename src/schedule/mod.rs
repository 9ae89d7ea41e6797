pub mod adjust;
pub mod builder;
pub mod moratorium;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::loans::{BillId, LoanId, MoratoriumInterest};

pub type RowId = Uuid;

/// schedule rows are superseded, never edited: exactly one Active row per
/// (loan, bill, seq) at any time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    UnPaid,
    Paid,
}

/// one instalment of a loan schedule
///
/// Rows with `bill_id = None` are loan-level aggregates summing all
/// bill-level rows sharing a due date; the payment engine operates against
/// those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmiRow {
    pub id: RowId,
    pub loan_id: LoanId,
    pub bill_id: Option<BillId>,
    pub seq: u32,
    pub due_date: NaiveDate,
    pub principal_due: Money,
    pub interest_due: Money,
    /// flat-interest split for an EMI straddling a month boundary
    pub interest_current_month: Money,
    pub interest_next_month: Money,
    pub downpayment_due: Money,
    pub late_fee_due: Money,
    pub atm_fee_due: Money,
    /// balance owed before this instalment's due date (includes its own
    /// interest)
    pub closing_pre_due: Money,
    /// principal left once this instalment is settled; 0 on the final row
    pub closing_post_due: Money,
    pub payment_received: Money,
    pub payment_status: PaymentStatus,
    pub dpd: i32,
    pub row_status: RowStatus,
}

impl EmiRow {
    pub fn total_due(&self) -> Money {
        self.principal_due
            + self.interest_due
            + self.downpayment_due
            + self.late_fee_due
            + self.atm_fee_due
    }

    pub fn outstanding(&self) -> Money {
        (self.total_due() - self.payment_received).max(Money::ZERO)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.row_status, RowStatus::Active)
    }

    pub fn is_paid(&self) -> bool {
        matches!(self.payment_status, PaymentStatus::Paid)
    }

    /// zero-due placeholder inserted by a moratorium
    pub fn is_suspended(&self) -> bool {
        self.total_due().is_zero() && !self.is_paid()
    }
}

/// all schedule rows, active and superseded
#[derive(Debug, Default)]
pub struct ScheduleStore {
    rows: Vec<EmiRow>,
}

impl ScheduleStore {
    pub fn new() -> Self {
        Self { rows: Vec::new() }
    }

    pub fn insert(&mut self, row: EmiRow) -> RowId {
        let id = row.id;
        self.rows.push(row);
        id
    }

    pub fn rows(&self) -> &[EmiRow] {
        &self.rows
    }

    pub fn row(&self, id: RowId) -> Option<&EmiRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn row_mut(&mut self, id: RowId) -> Option<&mut EmiRow> {
        self.rows.iter_mut().find(|r| r.id == id)
    }

    /// active bill-level rows for a bill, by instalment number
    pub fn bill_rows(&self, bill_id: BillId) -> Vec<&EmiRow> {
        let mut found: Vec<&EmiRow> = self
            .rows
            .iter()
            .filter(|r| r.bill_id == Some(bill_id) && r.is_active())
            .collect();
        found.sort_by_key(|r| r.seq);
        found
    }

    /// active bill-level rows across a loan, by due date then instalment
    pub fn loan_bill_rows(&self, loan_id: LoanId) -> Vec<&EmiRow> {
        let mut found: Vec<&EmiRow> = self
            .rows
            .iter()
            .filter(|r| r.loan_id == loan_id && r.bill_id.is_some() && r.is_active())
            .collect();
        found.sort_by_key(|r| (r.due_date, r.seq));
        found
    }

    /// active loan-level aggregate rows, by due date
    pub fn loan_rows(&self, loan_id: LoanId) -> Vec<&EmiRow> {
        let mut found: Vec<&EmiRow> = self
            .rows
            .iter()
            .filter(|r| r.loan_id == loan_id && r.bill_id.is_none() && r.is_active())
            .collect();
        found.sort_by_key(|r| r.due_date);
        found
    }

    pub fn deactivate(&mut self, id: RowId) {
        if let Some(row) = self.row_mut(id) {
            row.row_status = RowStatus::Inactive;
        }
    }

    pub fn deactivate_bill_rows(&mut self, bill_id: BillId) {
        for row in self
            .rows
            .iter_mut()
            .filter(|r| r.bill_id == Some(bill_id) && r.is_active())
        {
            row.row_status = RowStatus::Inactive;
        }
    }

    fn deactivate_loan_rows(&mut self, loan_id: LoanId) {
        for row in self
            .rows
            .iter_mut()
            .filter(|r| r.loan_id == loan_id && r.bill_id.is_none() && r.is_active())
        {
            row.row_status = RowStatus::Inactive;
        }
    }

    /// rebuild the loan-level aggregate rows from the active bill-level rows
    ///
    /// Bill-level rows sharing a due date collapse into one loan-level row;
    /// deferred moratorium interest keyed to that due date is folded into the
    /// aggregate's interest. Stale aggregates are deactivated, never edited,
    /// and running this twice without intervening bill-level changes yields
    /// identical aggregates.
    pub fn regroup(&mut self, loan_id: LoanId, deferred: &[MoratoriumInterest]) {
        self.deactivate_loan_rows(loan_id);

        let mut due_dates: Vec<NaiveDate> = self
            .rows
            .iter()
            .filter(|r| r.loan_id == loan_id && r.bill_id.is_some() && r.is_active())
            .map(|r| r.due_date)
            .collect();
        due_dates.sort();
        due_dates.dedup();

        let mut aggregates = Vec::new();
        for (i, due_date) in due_dates.iter().enumerate() {
            let group: Vec<&EmiRow> = self
                .rows
                .iter()
                .filter(|r| {
                    r.loan_id == loan_id
                        && r.bill_id.is_some()
                        && r.is_active()
                        && r.due_date == *due_date
                })
                .collect();

            let mut agg = EmiRow {
                id: Uuid::new_v4(),
                loan_id,
                bill_id: None,
                seq: (i + 1) as u32,
                due_date: *due_date,
                principal_due: Money::ZERO,
                interest_due: Money::ZERO,
                interest_current_month: Money::ZERO,
                interest_next_month: Money::ZERO,
                downpayment_due: Money::ZERO,
                late_fee_due: Money::ZERO,
                atm_fee_due: Money::ZERO,
                closing_pre_due: Money::ZERO,
                closing_post_due: Money::ZERO,
                payment_received: Money::ZERO,
                payment_status: PaymentStatus::UnPaid,
                dpd: 0,
                row_status: RowStatus::Active,
            };
            for row in &group {
                agg.principal_due += row.principal_due;
                agg.interest_due += row.interest_due;
                agg.interest_current_month += row.interest_current_month;
                agg.interest_next_month += row.interest_next_month;
                agg.downpayment_due += row.downpayment_due;
                agg.late_fee_due += row.late_fee_due;
                agg.atm_fee_due += row.atm_fee_due;
                agg.closing_pre_due += row.closing_pre_due;
                agg.closing_post_due += row.closing_post_due;
                agg.payment_received += row.payment_received;
                agg.dpd = agg.dpd.max(row.dpd);
            }
            for extra in deferred
                .iter()
                .filter(|m| m.due_date == *due_date && group.iter().any(|r| r.bill_id == Some(m.bill_id)))
            {
                agg.interest_due += extra.amount;
                agg.closing_pre_due += extra.amount;
            }
            if !agg.total_due().is_zero() && agg.payment_received >= agg.total_due() {
                agg.payment_status = PaymentStatus::Paid;
            }
            aggregates.push(agg);
        }

        for agg in aggregates {
            self.rows.push(agg);
        }
    }
}
