pub mod slide;
pub mod waterfall;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::decimal::Money;
use crate::loans::{BillId, LoanId};

pub use waterfall::{AllocationResult, PaymentAllocator, Waterfall};

/// settlement confirmation supplied by the payment-request collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub id: Uuid,
    pub amount: Money,
    pub effective_date: NaiveDate,
    pub kind: PaymentKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentKind {
    Payment,
    Refund,
}

/// ledger component a payment slice settled against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitComponent {
    AtmFee,
    LateFee,
    Interest,
    Principal,
    PrepaymentCredit,
}

/// how much of one payment settled a specific instalment
///
/// Written once per settlement action and marked inactive (never edited)
/// when a reslide or reschedule invalidates the attribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentMapping {
    pub id: Uuid,
    pub payment_ref: Uuid,
    pub loan_id: LoanId,
    pub due_date: NaiveDate,
    pub seq: u32,
    pub amount: Money,
    pub active: bool,
}

/// how much of one payment settled each ledger component, for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentSplit {
    pub id: Uuid,
    pub payment_ref: Uuid,
    pub loan_id: LoanId,
    pub bill_id: Option<BillId>,
    pub component: SplitComponent,
    pub amount: Money,
    pub active: bool,
}

/// payment attribution records, instalment- and component-grained
#[derive(Debug, Default)]
pub struct PaymentLog {
    mappings: Vec<PaymentMapping>,
    splits: Vec<PaymentSplit>,
}

impl PaymentLog {
    pub fn new() -> Self {
        Self {
            mappings: Vec::new(),
            splits: Vec::new(),
        }
    }

    pub fn record_mapping(
        &mut self,
        payment_ref: Uuid,
        loan_id: LoanId,
        due_date: NaiveDate,
        seq: u32,
        amount: Money,
    ) {
        self.mappings.push(PaymentMapping {
            id: Uuid::new_v4(),
            payment_ref,
            loan_id,
            due_date,
            seq,
            amount,
            active: true,
        });
    }

    pub fn record_split(
        &mut self,
        payment_ref: Uuid,
        loan_id: LoanId,
        bill_id: Option<BillId>,
        component: SplitComponent,
        amount: Money,
    ) {
        self.splits.push(PaymentSplit {
            id: Uuid::new_v4(),
            payment_ref,
            loan_id,
            bill_id,
            component,
            amount,
            active: true,
        });
    }

    pub fn mappings(&self) -> &[PaymentMapping] {
        &self.mappings
    }

    pub fn splits(&self) -> &[PaymentSplit] {
        &self.splits
    }

    /// active mappings attributed to instalments of a loan due after `date`
    pub fn active_mappings_after(&self, loan_id: LoanId, date: NaiveDate) -> Vec<&PaymentMapping> {
        self.mappings
            .iter()
            .filter(|m| m.active && m.loan_id == loan_id && m.due_date > date)
            .collect()
    }

    /// deactivate every active mapping for a loan due after `date`,
    /// returning the total amount that must be re-attributed
    pub fn void_mappings_after(&mut self, loan_id: LoanId, date: NaiveDate) -> Money {
        let mut voided = Money::ZERO;
        for mapping in self
            .mappings
            .iter_mut()
            .filter(|m| m.active && m.loan_id == loan_id && m.due_date > date)
        {
            mapping.active = false;
            voided += mapping.amount;
        }
        voided
    }

    /// total actively attributed to one payment ref
    pub fn attributed(&self, payment_ref: Uuid) -> Money {
        self.mappings
            .iter()
            .filter(|m| m.active && m.payment_ref == payment_ref)
            .map(|m| m.amount)
            .sum()
    }
}
