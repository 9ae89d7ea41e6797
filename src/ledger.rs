use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::{EventId, TriggerEvent};
use crate::loans::{BillId, LoanId};

pub type AccountId = Uuid;
pub type EntryId = Uuid;

/// who a book account belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OwnerKind {
    User,
    Lender,
    Bill,
    Loan,
}

/// accounting class, fixing the balance sign convention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountClass {
    Asset,
    Liability,
    Revenue,
    Expense,
    ContraAsset,
}

impl AccountClass {
    /// asset/expense accounts grow with debits; the rest with credits
    pub fn is_debit_normal(&self) -> bool {
        matches!(self, AccountClass::Asset | AccountClass::Expense)
    }
}

/// ledger buckets the engine posts into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccountName {
    UnbilledReceivable,
    PrincipalReceivable,
    InterestReceivable,
    InterestEarned,
    LateFeeReceivable,
    LateFeeEarned,
    AtmFeeReceivable,
    FeeEarned,
    MinimumDue,
    MaximumDue,
    DueControl,
    PaymentClearing,
    PrepaymentCredit,
    CardSettlement,
    WriteOffExpense,
}

/// identity of one book account: (owner, owner kind, name, class)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountKey {
    pub owner_id: Uuid,
    pub owner_kind: OwnerKind,
    pub name: AccountName,
    pub class: AccountClass,
}

impl AccountKey {
    pub fn new(owner_id: Uuid, owner_kind: OwnerKind, name: AccountName, class: AccountClass) -> Self {
        Self {
            owner_id,
            owner_kind,
            name,
            class,
        }
    }

    // the bill-side books

    pub fn unbilled(bill: BillId) -> Self {
        Self::new(bill, OwnerKind::Bill, AccountName::UnbilledReceivable, AccountClass::Asset)
    }

    pub fn principal_receivable(bill: BillId) -> Self {
        Self::new(bill, OwnerKind::Bill, AccountName::PrincipalReceivable, AccountClass::Asset)
    }

    pub fn interest_receivable(bill: BillId) -> Self {
        Self::new(bill, OwnerKind::Bill, AccountName::InterestReceivable, AccountClass::Asset)
    }

    pub fn interest_earned(bill: BillId) -> Self {
        Self::new(bill, OwnerKind::Bill, AccountName::InterestEarned, AccountClass::Revenue)
    }

    pub fn late_fee_receivable(bill: BillId) -> Self {
        Self::new(bill, OwnerKind::Bill, AccountName::LateFeeReceivable, AccountClass::Asset)
    }

    pub fn late_fee_earned(bill: BillId) -> Self {
        Self::new(bill, OwnerKind::Bill, AccountName::LateFeeEarned, AccountClass::Revenue)
    }

    pub fn atm_fee_receivable(bill: BillId) -> Self {
        Self::new(bill, OwnerKind::Bill, AccountName::AtmFeeReceivable, AccountClass::Asset)
    }

    pub fn fee_earned(bill: BillId) -> Self {
        Self::new(bill, OwnerKind::Bill, AccountName::FeeEarned, AccountClass::Revenue)
    }

    /// minimum owed to stay out of delinquency, tracked per bill
    pub fn minimum_due(bill: BillId) -> Self {
        Self::new(bill, OwnerKind::Bill, AccountName::MinimumDue, AccountClass::Liability)
    }

    /// full amount owed to close the bill, tracked in parallel
    pub fn maximum_due(bill: BillId) -> Self {
        Self::new(bill, OwnerKind::Bill, AccountName::MaximumDue, AccountClass::Liability)
    }

    /// balancing side for the min/max due memo books
    pub fn due_control(bill: BillId) -> Self {
        Self::new(bill, OwnerKind::Bill, AccountName::DueControl, AccountClass::ContraAsset)
    }

    // the participant-side books

    pub fn payment_clearing(user: Uuid) -> Self {
        Self::new(user, OwnerKind::User, AccountName::PaymentClearing, AccountClass::Asset)
    }

    pub fn card_settlement(lender: Uuid) -> Self {
        Self::new(lender, OwnerKind::Lender, AccountName::CardSettlement, AccountClass::Liability)
    }

    pub fn prepayment_credit(loan: LoanId) -> Self {
        Self::new(loan, OwnerKind::Loan, AccountName::PrepaymentCredit, AccountClass::Liability)
    }

    pub fn write_off_expense(loan: LoanId) -> Self {
        Self::new(loan, OwnerKind::Loan, AccountName::WriteOffExpense, AccountClass::Expense)
    }
}

/// one balanced double-entry posting, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub event_id: EventId,
    /// business date, copied from the triggering event
    pub post_date: NaiveDate,
    pub debit_account: AccountId,
    pub credit_account: AccountId,
    pub amount: Money,
}

/// append-only double-entry store with lazily materialized accounts
#[derive(Debug, Default)]
pub struct Ledger {
    accounts: HashMap<AccountKey, AccountId>,
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            accounts: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// look up the account id for a key, materializing it on first use
    pub fn account(&mut self, key: AccountKey) -> AccountId {
        *self.accounts.entry(key).or_insert_with(Uuid::new_v4)
    }

    /// id for an existing account, if any posting ever touched it
    pub fn existing_account(&self, key: &AccountKey) -> Option<AccountId> {
        self.accounts.get(key).copied()
    }

    /// post one balanced entry under `event`
    ///
    /// Direction is carried by the debit/credit sides, so the amount must be
    /// strictly positive.
    pub fn post(
        &mut self,
        event: &TriggerEvent,
        debit: AccountKey,
        credit: AccountKey,
        amount: Money,
    ) -> Result<EntryId> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositivePosting { amount });
        }
        let debit_account = self.account(debit);
        let credit_account = self.account(credit);
        let id = Uuid::new_v4();
        debug!(
            event = ?event.name,
            post_date = %event.post_date,
            %amount,
            debit = ?debit.name,
            credit = ?credit.name,
            "ledger post"
        );
        self.entries.push(LedgerEntry {
            id,
            event_id: event.id,
            post_date: event.post_date,
            debit_account,
            credit_account,
            amount,
        });
        Ok(id)
    }

    /// signed balance honoring the account-class sign convention
    pub fn balance(&self, key: &AccountKey) -> Money {
        self.balance_as_of(key, None)
    }

    /// balance considering only entries with post date <= cutoff
    pub fn balance_as_of(&self, key: &AccountKey, cutoff: Option<NaiveDate>) -> Money {
        let Some(account) = self.existing_account(key) else {
            return Money::ZERO;
        };
        let mut debits = Money::ZERO;
        let mut credits = Money::ZERO;
        for entry in &self.entries {
            if let Some(cutoff) = cutoff {
                if entry.post_date > cutoff {
                    continue;
                }
            }
            if entry.debit_account == account {
                debits += entry.amount;
            }
            if entry.credit_account == account {
                credits += entry.amount;
            }
        }
        if key.class.is_debit_normal() {
            debits - credits
        } else {
            credits - debits
        }
    }

    /// entries that touched `key`, in post-date order
    pub fn entries_for(&self, key: &AccountKey) -> Vec<&LedgerEntry> {
        let Some(account) = self.existing_account(key) else {
            return Vec::new();
        };
        let mut found: Vec<&LedgerEntry> = self
            .entries
            .iter()
            .filter(|e| e.debit_account == account || e.credit_account == account)
            .collect();
        found.sort_by_key(|e| e.post_date);
        found
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    /// total amount posted under one event
    pub fn posted_under(&self, event_id: EventId) -> Money {
        self.entries
            .iter()
            .filter(|e| e.event_id == event_id)
            .map(|e| e.amount)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventLog, EventName};
    use chrono::Utc;
    use hourglass_rs::{SafeTimeProvider, TimeSource};
    use serde_json::Value;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn test_event(log: &mut EventLog, post_date: NaiveDate) -> TriggerEvent {
        let time = SafeTimeProvider::new(TimeSource::Test(Utc::now()));
        let id = log.record(
            EventName::Swipe,
            post_date,
            Money::ZERO,
            None,
            Value::Null,
            &time,
        );
        log.get(id).unwrap().clone()
    }

    #[test]
    fn test_post_rejects_non_positive_amounts() {
        let mut ledger = Ledger::new();
        let mut log = EventLog::new();
        let event = test_event(&mut log, d(2024, 1, 8));
        let bill = Uuid::new_v4();
        let lender = Uuid::new_v4();

        let zero = ledger.post(
            &event,
            AccountKey::unbilled(bill),
            AccountKey::card_settlement(lender),
            Money::ZERO,
        );
        assert!(matches!(zero, Err(LedgerError::NonPositivePosting { .. })));

        let negative = ledger.post(
            &event,
            AccountKey::unbilled(bill),
            AccountKey::card_settlement(lender),
            Money::from_major(-5),
        );
        assert!(matches!(negative, Err(LedgerError::NonPositivePosting { .. })));
    }

    #[test]
    fn test_sign_convention_by_class() {
        let mut ledger = Ledger::new();
        let mut log = EventLog::new();
        let event = test_event(&mut log, d(2024, 1, 8));
        let bill = Uuid::new_v4();
        let lender = Uuid::new_v4();

        let receivable = AccountKey::unbilled(bill);
        let settlement = AccountKey::card_settlement(lender);
        ledger
            .post(&event, receivable, settlement, Money::from_major(1000))
            .unwrap();

        // asset grows with the debit, liability with the credit
        assert_eq!(ledger.balance(&receivable), Money::from_major(1000));
        assert_eq!(ledger.balance(&settlement), Money::from_major(1000));
    }

    #[test]
    fn test_accounts_materialize_lazily_and_once() {
        let mut ledger = Ledger::new();
        let bill = Uuid::new_v4();
        let key = AccountKey::principal_receivable(bill);

        assert!(ledger.existing_account(&key).is_none());
        let first = ledger.account(key);
        let second = ledger.account(key);
        assert_eq!(first, second);
    }

    #[test]
    fn test_balance_as_of_cutoff() {
        let mut ledger = Ledger::new();
        let mut log = EventLog::new();
        let bill = Uuid::new_v4();
        let lender = Uuid::new_v4();
        let receivable = AccountKey::principal_receivable(bill);
        let settlement = AccountKey::card_settlement(lender);

        let jan = test_event(&mut log, d(2024, 1, 8));
        let feb = test_event(&mut log, d(2024, 2, 8));
        ledger.post(&jan, receivable, settlement, Money::from_major(100)).unwrap();
        ledger.post(&feb, receivable, settlement, Money::from_major(50)).unwrap();

        assert_eq!(
            ledger.balance_as_of(&receivable, Some(d(2024, 1, 31))),
            Money::from_major(100)
        );
        assert_eq!(ledger.balance(&receivable), Money::from_major(150));
    }

    #[test]
    fn test_every_entry_references_a_recorded_event() {
        let mut ledger = Ledger::new();
        let mut log = EventLog::new();
        let event = test_event(&mut log, d(2024, 1, 8));
        let bill = Uuid::new_v4();
        let lender = Uuid::new_v4();

        ledger
            .post(
                &event,
                AccountKey::unbilled(bill),
                AccountKey::card_settlement(lender),
                Money::from_major(10),
            )
            .unwrap();

        for entry in ledger.entries() {
            assert!(entry.amount.is_positive());
            assert!(log.get(entry.event_id).is_some());
        }
    }
}
