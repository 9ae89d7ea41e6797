use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::{Money, Rate};
use crate::products::ProductSpec;

pub type LoanId = Uuid;
pub type BillId = Uuid;
pub type FeeId = Uuid;
pub type MoratoriumId = Uuid;

/// DPD value meaning "not delinquent"
pub const DPD_NOT_DELINQUENT: i32 = -1;

/// loan status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanStatus {
    /// active and accepting swipes/payments
    Active,
    /// fully repaid, schedule closed out
    Completed,
    /// outstanding principal expensed for non-payment
    WrittenOff,
}

/// a credit facility instance
///
/// Never deleted; superseded schedule rows are deactivated instead (see
/// `schedule::RowStatus`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub user_id: Uuid,
    pub lender_id: Uuid,
    pub product: ProductSpec,
    pub monthly_rate: Rate,
    /// activation date the schedule amortizes from
    pub amortization_date: NaiveDate,
    pub tenure: u32,
    pub downpayment_rate: Rate,
    pub status: LoanStatus,
    /// days past due right now; -1 when not delinquent
    pub current_dpd: i32,
    /// worst DPD ever observed
    pub ever_dpd: i32,
    /// a transaction converted into its own sub-loan keeps a link to its
    /// parent so payments allocate across the whole group
    pub parent_loan_id: Option<LoanId>,
}

impl Loan {
    pub fn is_active(&self) -> bool {
        matches!(self.status, LoanStatus::Active)
    }

    pub fn mark_dpd(&mut self, dpd: i32) {
        self.current_dpd = dpd;
        if dpd > self.ever_dpd {
            self.ever_dpd = dpd;
        }
    }

    pub fn clear_dpd(&mut self) {
        self.current_dpd = DPD_NOT_DELINQUENT;
    }
}

/// one statement period of a loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bill {
    pub id: BillId,
    pub loan_id: LoanId,
    /// period covers [start_date, close_date)
    pub start_date: NaiveDate,
    pub close_date: NaiveDate,
    pub due_date: NaiveDate,
    pub tenure: u32,
    /// billed principal, set at generation time
    pub principal: Money,
    /// per-instalment principal slice
    pub principal_instalment: Money,
    /// cash drawn through ATM swipes this period, for fee assessment
    pub atm_drawn: Money,
    pub is_generated: bool,
}

impl Bill {
    pub fn covers(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date < self.close_date
    }
}

/// fee taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeKind {
    LateFee,
    AtmFee,
    ResetJoiningFee,
    CardReloadFee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeeStatus {
    Unpaid,
    Paid,
    Reversed,
}

/// a charge raised against a loan or one of its bills
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fee {
    pub id: FeeId,
    pub loan_id: LoanId,
    pub bill_id: Option<BillId>,
    pub kind: FeeKind,
    /// gross amount including tax
    pub amount: Money,
    pub tax: Money,
    pub status: FeeStatus,
    pub charged_on: NaiveDate,
}

impl Fee {
    pub fn is_unpaid(&self) -> bool {
        matches!(self.status, FeeStatus::Unpaid)
    }
}

/// payment-suspension window for a loan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Moratorium {
    pub id: MoratoriumId,
    pub loan_id: LoanId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl Moratorium {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start_date && date <= self.end_date
    }
}

/// interest deferred by a moratorium, folded into the first instalment
/// after the window; keyed like schedule rows so regroup can pick it up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoratoriumInterest {
    pub moratorium_id: MoratoriumId,
    pub bill_id: BillId,
    pub due_date: NaiveDate,
    pub amount: Money,
}
