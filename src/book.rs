use std::collections::HashMap;

use chrono::NaiveDate;
use hourglass_rs::SafeTimeProvider;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{EventLog, EventName};
use crate::ledger::{AccountKey, Ledger};
use crate::loans::{
    Bill, BillId, Fee, Loan, LoanId, LoanStatus, Moratorium, MoratoriumInterest,
    DPD_NOT_DELINQUENT,
};
use crate::payments::PaymentLog;
use crate::products::ProductSpec;
use crate::schedule::ScheduleStore;

/// outstanding components of one generated bill, read from the ledger
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BillOutstanding {
    pub atm_fee: Money,
    pub late_fee: Money,
    pub interest: Money,
    pub principal: Money,
}

impl BillOutstanding {
    pub fn total(&self) -> Money {
        self.atm_fee + self.late_fee + self.interest + self.principal
    }

    pub fn is_clear(&self) -> bool {
        self.total().is_zero()
    }
}

/// the single-writer aggregate for a ledger of loans
///
/// All mutation flows through `&mut LoanBook`; callers serialize work per
/// loan (one unit of work at a time), and batch jobs across loans may run
/// book-by-book in parallel.
pub struct LoanBook {
    pub ledger: Ledger,
    pub events: EventLog,
    pub loans: HashMap<LoanId, Loan>,
    pub bills: Vec<Bill>,
    pub schedule: ScheduleStore,
    pub fees: Vec<Fee>,
    pub payments: PaymentLog,
    pub moratoria: Vec<Moratorium>,
    pub moratorium_interest: Vec<MoratoriumInterest>,
    time: SafeTimeProvider,
}

impl LoanBook {
    pub fn new(time: SafeTimeProvider) -> Self {
        Self {
            ledger: Ledger::new(),
            events: EventLog::new(),
            loans: HashMap::new(),
            bills: Vec::new(),
            schedule: ScheduleStore::new(),
            fees: Vec::new(),
            payments: PaymentLog::new(),
            moratoria: Vec::new(),
            moratorium_interest: Vec::new(),
            time,
        }
    }

    pub fn clock(&self) -> &SafeTimeProvider {
        &self.time
    }

    /// originate a loan from a product's capability bundle
    pub fn originate(
        &mut self,
        user_id: Uuid,
        lender_id: Uuid,
        product: ProductSpec,
        amortization_date: NaiveDate,
    ) -> LoanId {
        let id = Uuid::new_v4();
        let loan = Loan {
            id,
            user_id,
            lender_id,
            monthly_rate: product.monthly_rate,
            tenure: product.tenure,
            downpayment_rate: product.downpayment_rate,
            product,
            amortization_date,
            status: LoanStatus::Active,
            current_dpd: DPD_NOT_DELINQUENT,
            ever_dpd: 0,
            parent_loan_id: None,
        };
        info!(loan = %id, date = %amortization_date, "loan originated");
        self.loans.insert(id, loan);
        id
    }

    /// originate a sub-loan (e.g. a transaction converted to its own loan)
    /// that settles inside the parent's allocation group
    pub fn originate_child(
        &mut self,
        parent_id: LoanId,
        product: ProductSpec,
        amortization_date: NaiveDate,
    ) -> Result<LoanId> {
        let parent = self.loan(parent_id)?;
        let (user_id, lender_id) = (parent.user_id, parent.lender_id);
        let id = self.originate(user_id, lender_id, product, amortization_date);
        if let Some(child) = self.loans.get_mut(&id) {
            child.parent_loan_id = Some(parent_id);
        }
        Ok(id)
    }

    pub fn loan(&self, id: LoanId) -> Result<&Loan> {
        self.loans.get(&id).ok_or(LedgerError::UnknownLoan { id })
    }

    pub fn loan_mut(&mut self, id: LoanId) -> Result<&mut Loan> {
        self.loans
            .get_mut(&id)
            .ok_or(LedgerError::UnknownLoan { id })
    }

    /// the allocation group: a loan plus its children, payment order parent
    /// first
    pub fn allocation_group(&self, id: LoanId) -> Vec<LoanId> {
        let mut group = vec![id];
        let mut children: Vec<LoanId> = self
            .loans
            .values()
            .filter(|l| l.parent_loan_id == Some(id))
            .map(|l| l.id)
            .collect();
        children.sort_by_key(|child| {
            self.loans
                .get(child)
                .map(|l| l.amortization_date)
                .unwrap_or(NaiveDate::MIN)
        });
        group.extend(children);
        group
    }

    pub fn bill(&self, id: BillId) -> Result<&Bill> {
        self.bills
            .iter()
            .find(|b| b.id == id)
            .ok_or(LedgerError::UnknownBill { id })
    }

    pub fn bill_mut(&mut self, id: BillId) -> Result<&mut Bill> {
        self.bills
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or(LedgerError::UnknownBill { id })
    }

    /// a loan's bills ordered by start date
    pub fn bills_for(&self, loan_id: LoanId) -> Vec<&Bill> {
        let mut found: Vec<&Bill> = self.bills.iter().filter(|b| b.loan_id == loan_id).collect();
        found.sort_by_key(|b| b.start_date);
        found
    }

    /// generated bills that still owe something, oldest first
    pub fn unpaid_bills(&self, loan_id: LoanId) -> Vec<BillId> {
        self.bills_for(loan_id)
            .into_iter()
            .filter(|b| b.is_generated && !self.bill_outstanding(b.id).is_clear())
            .map(|b| b.id)
            .collect()
    }

    /// outstanding components of a bill, derived from ledger balances
    pub fn bill_outstanding(&self, bill_id: BillId) -> BillOutstanding {
        BillOutstanding {
            atm_fee: self
                .ledger
                .balance(&AccountKey::atm_fee_receivable(bill_id))
                .max(Money::ZERO),
            late_fee: self
                .ledger
                .balance(&AccountKey::late_fee_receivable(bill_id))
                .max(Money::ZERO),
            interest: self
                .ledger
                .balance(&AccountKey::interest_receivable(bill_id))
                .max(Money::ZERO),
            principal: self
                .ledger
                .balance(&AccountKey::principal_receivable(bill_id))
                .max(Money::ZERO),
        }
    }

    /// what is still owed to satisfy the minimum across a bill
    pub fn minimum_due(&self, bill_id: BillId) -> Money {
        self.ledger
            .balance(&AccountKey::minimum_due(bill_id))
            .max(Money::ZERO)
    }

    /// what is still owed to fully close a bill
    pub fn maximum_due(&self, bill_id: BillId) -> Money {
        self.ledger
            .balance(&AccountKey::maximum_due(bill_id))
            .max(Money::ZERO)
    }

    /// deferred moratorium interest for a loan's bills
    pub fn deferred_interest_for(&self, loan_id: LoanId) -> Vec<MoratoriumInterest> {
        let bill_ids: Vec<BillId> = self.bills_for(loan_id).iter().map(|b| b.id).collect();
        self.moratorium_interest
            .iter()
            .filter(|m| bill_ids.contains(&m.bill_id))
            .cloned()
            .collect()
    }

    /// expense the outstanding principal for non-payment
    ///
    /// The written-off balance stays on the loan's expense book so a later
    /// over-payment can recover against it.
    pub fn write_off(&mut self, loan_id: LoanId, as_of: NaiveDate) -> Result<Money> {
        let loan = self.loan(loan_id)?;
        if !loan.is_active() {
            return Err(LedgerError::LoanNotActive {
                status: loan.status,
            });
        }
        let bills: Vec<BillId> = self
            .bills_for(loan_id)
            .into_iter()
            .filter(|b| b.is_generated)
            .map(|b| b.id)
            .collect();

        let event_id = self.events.record(
            EventName::WriteOff,
            as_of,
            Money::ZERO,
            Some(loan_id),
            json!({}),
            &self.time,
        );
        let event = self.events.get(event_id).expect("just recorded").clone();

        let mut written_off = Money::ZERO;
        for bill_id in bills {
            let principal = self
                .ledger
                .balance(&AccountKey::principal_receivable(bill_id))
                .max(Money::ZERO);
            if principal.is_zero() {
                continue;
            }
            self.ledger.post(
                &event,
                AccountKey::write_off_expense(loan_id),
                AccountKey::principal_receivable(bill_id),
                principal,
            )?;
            written_off += principal;
        }
        self.events.set_amount(event_id, written_off);
        self.loan_mut(loan_id)?.status = LoanStatus::WrittenOff;
        info!(loan = %loan_id, amount = %written_off, "loan written off");
        Ok(written_off)
    }

    /// balance still recoverable against a past write-off
    pub fn written_off_balance(&self, loan_id: LoanId) -> Money {
        self.ledger
            .balance(&AccountKey::write_off_expense(loan_id))
            .max(Money::ZERO)
    }
}
