use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::book::LoanBook;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::EventName;
use crate::ledger::AccountKey;
use crate::loans::{Bill, BillId, Fee, FeeKind, FeeStatus, LoanId};
use crate::products::{add_months, shift_days};
use crate::schedule::builder;

impl LoanBook {
    /// ingest one card swipe into the covering bill's unbilled book
    ///
    /// Opens (and generates) any skipped billing periods first, so the
    /// covering bill always exists.
    #[instrument(skip(self, description))]
    pub fn record_swipe(
        &mut self,
        loan_id: LoanId,
        amount: Money,
        txn_date: NaiveDate,
        description: &str,
        is_cash: bool,
    ) -> Result<BillId> {
        let loan = self.loan(loan_id)?;
        if !loan.is_active() {
            return Err(LedgerError::LoanNotActive { status: loan.status });
        }
        if !amount.is_positive() {
            return Err(LedgerError::NonPositivePosting { amount });
        }
        let lender_id = loan.lender_id;

        let bill_id = self.bill_covering(loan_id, txn_date)?;

        let event_id = self.events.record(
            EventName::Swipe,
            txn_date,
            amount,
            Some(loan_id),
            json!({ "bill_id": bill_id.to_string(), "description": description, "is_cash": is_cash }),
            &self.clock().clone(),
        );
        let event = self.events.get(event_id).expect("just recorded").clone();
        self.ledger.post(
            &event,
            AccountKey::unbilled(bill_id),
            AccountKey::card_settlement(lender_id),
            amount,
        )?;

        if is_cash {
            self.bill_mut(bill_id)?.atm_drawn += amount;
        }
        Ok(bill_id)
    }

    /// the bill whose period covers `txn_date`
    ///
    /// When the date has skipped past the newest bill's close, each missed
    /// period is opened and generated month by month before the next one
    /// opens — ordering matters because a later period's interest basis
    /// depends on the earlier ones being closed first.
    pub fn bill_covering(&mut self, loan_id: LoanId, txn_date: NaiveDate) -> Result<BillId> {
        let loan = self.loan(loan_id)?;
        if txn_date < loan.amortization_date {
            return Err(LedgerError::NoCoveringBill { date: txn_date });
        }

        if self.bills_for(loan_id).is_empty() {
            let start = loan.amortization_date;
            self.open_bill(loan_id, start)?;
        }

        loop {
            let newest = self
                .bills_for(loan_id)
                .last()
                .map(|b| (*b).clone())
                .expect("at least one bill exists");
            if newest.covers(txn_date) {
                return Ok(newest.id);
            }
            if txn_date < newest.start_date {
                // backdated past the oldest period we track
                return self
                    .bills_for(loan_id)
                    .iter()
                    .find(|b| b.covers(txn_date))
                    .map(|b| b.id)
                    .ok_or(LedgerError::NoCoveringBill { date: txn_date });
            }
            // gap: close out the stale period, then open the next one
            if !newest.is_generated {
                self.generate_specific_bill(newest.id, newest.close_date)?;
            }
            self.open_bill(loan_id, newest.close_date)?;
        }
    }

    fn open_bill(&mut self, loan_id: LoanId, start: NaiveDate) -> Result<BillId> {
        let loan = self.loan(loan_id)?;
        let close = add_months(start, 1);
        let due = shift_days(close, loan.product.grace_days);
        let bill = Bill {
            id: Uuid::new_v4(),
            loan_id,
            start_date: start,
            close_date: close,
            due_date: due,
            tenure: loan.tenure,
            principal: Money::ZERO,
            principal_instalment: Money::ZERO,
            atm_drawn: Money::ZERO,
            is_generated: false,
        };
        let id = bill.id;
        self.bills.push(bill);
        Ok(id)
    }

    /// generate the earliest not-yet-generated bill, opening one if none
    /// exists
    pub fn generate_bill(&mut self, loan_id: LoanId, as_of: NaiveDate) -> Result<BillId> {
        self.generate_bill_opts(loan_id, as_of, false)
    }

    pub fn generate_bill_opts(
        &mut self,
        loan_id: LoanId,
        as_of: NaiveDate,
        skip_schedule: bool,
    ) -> Result<BillId> {
        let target = self
            .bills_for(loan_id)
            .iter()
            .find(|b| !b.is_generated)
            .map(|b| b.id);
        let bill_id = match target {
            Some(id) => id,
            None => {
                let start = self
                    .bills_for(loan_id)
                    .last()
                    .map(|b| b.close_date)
                    .unwrap_or(self.loan(loan_id)?.amortization_date);
                self.open_bill(loan_id, start)?
            }
        };
        self.generate_bill_with(bill_id, as_of, skip_schedule)?;
        Ok(bill_id)
    }

    /// generate one specific bill; generating twice is an error, never a
    /// re-transfer
    pub fn generate_specific_bill(&mut self, bill_id: BillId, as_of: NaiveDate) -> Result<()> {
        self.generate_bill_with(bill_id, as_of, false)
    }

    #[instrument(skip(self))]
    fn generate_bill_with(
        &mut self,
        bill_id: BillId,
        as_of: NaiveDate,
        skip_schedule: bool,
    ) -> Result<()> {
        let bill = self.bill(bill_id)?;
        if bill.is_generated {
            return Err(LedgerError::BillAlreadyGenerated { id: bill_id });
        }
        let loan_id = bill.loan_id;
        let loan = self.loan(loan_id)?.clone();
        if loan.tenure == 0 {
            return Err(LedgerError::InvalidTenure { tenure: 0 });
        }

        let unbilled = self.ledger.balance(&AccountKey::unbilled(bill_id));

        let event_id = self.events.record(
            EventName::BillGenerate,
            as_of,
            unbilled,
            Some(loan_id),
            json!({ "bill_id": bill_id.to_string() }),
            &self.clock().clone(),
        );
        let event = self.events.get(event_id).expect("just recorded").clone();

        if unbilled.is_positive() {
            self.ledger.post(
                &event,
                AccountKey::principal_receivable(bill_id),
                AccountKey::unbilled(bill_id),
                unbilled,
            )?;
        }

        let instalment = (unbilled / rust_decimal::Decimal::from(loan.tenure)).to_instalment();
        let first_interest = unbilled.monthly_interest(loan.monthly_rate);

        {
            let bill = self.bill_mut(bill_id)?;
            bill.principal = unbilled;
            bill.principal_instalment = instalment;
            bill.is_generated = true;
        }

        let min_due = instalment + first_interest;
        if min_due.is_positive() {
            self.ledger.post(
                &event,
                AccountKey::due_control(bill_id),
                AccountKey::minimum_due(bill_id),
                min_due,
            )?;
        }
        // the maximum-due book starts at billed principal; accruals and
        // fees grow it as they land
        if unbilled.is_positive() {
            self.ledger.post(
                &event,
                AccountKey::due_control(bill_id),
                AccountKey::maximum_due(bill_id),
                unbilled,
            )?;
        }

        self.add_minimum_due_to_open_bills(loan_id, bill_id, as_of)?;

        if !skip_schedule {
            if unbilled.is_positive() {
                builder::build_bill_schedule(self, bill_id)?;
            }
            if self.bill(bill_id)?.atm_drawn.is_positive() {
                self.assess_atm_fee(bill_id, as_of)?;
            }
        }

        info!(bill = %bill_id, amount = %unbilled, "bill generated");
        Ok(())
    }

    /// every earlier still-open bill has its next instalment fall due when a
    /// new statement generates
    fn add_minimum_due_to_open_bills(
        &mut self,
        loan_id: LoanId,
        current: BillId,
        as_of: NaiveDate,
    ) -> Result<()> {
        let open: Vec<(BillId, Money)> = self
            .bills_for(loan_id)
            .iter()
            .filter(|b| b.id != current && b.is_generated)
            .map(|b| (b.id, b.principal_instalment))
            .collect();

        for (bill_id, instalment) in open {
            let headroom = self.maximum_due(bill_id) - self.minimum_due(bill_id);
            let addition = instalment.min(headroom.max(Money::ZERO));
            if !addition.is_positive() {
                continue;
            }
            let event_id = self.events.record(
                EventName::BillGenerate,
                as_of,
                addition,
                Some(loan_id),
                json!({ "bill_id": bill_id.to_string(), "minimum_due_rollover": true }),
                &self.clock().clone(),
            );
            let event = self.events.get(event_id).expect("just recorded").clone();
            self.ledger.post(
                &event,
                AccountKey::due_control(bill_id),
                AccountKey::minimum_due(bill_id),
                addition,
            )?;
        }
        Ok(())
    }

    /// raise a standalone charge (joining-fee reset, card reload, ...)
    /// against a bill
    pub fn charge_fee(
        &mut self,
        bill_id: BillId,
        kind: FeeKind,
        amount: Money,
        tax: Money,
        as_of: NaiveDate,
    ) -> Result<()> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositivePosting { amount });
        }
        let bill = self.bill(bill_id)?;
        let loan_id = bill.loan_id;

        let event_id = self.events.record(
            EventName::FeeCharge,
            as_of,
            amount,
            Some(loan_id),
            json!({ "bill_id": bill_id.to_string(), "fee": format!("{kind:?}") }),
            &self.clock().clone(),
        );
        let event = self.events.get(event_id).expect("just recorded").clone();
        // non-late charges share the card-fee book and settle in the
        // first fee tier of the waterfall
        let receivable = match kind {
            FeeKind::LateFee => AccountKey::late_fee_receivable(bill_id),
            FeeKind::AtmFee | FeeKind::ResetJoiningFee | FeeKind::CardReloadFee => {
                AccountKey::atm_fee_receivable(bill_id)
            }
        };
        self.ledger
            .post(&event, receivable, AccountKey::fee_earned(bill_id), amount)?;
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
            loan_id,
            bill_id: Some(bill_id),
            kind,
            amount,
            tax,
            status: FeeStatus::Unpaid,
            charged_on: as_of,
        });
        Ok(())
    }

    /// one ATM fee per generated bill with cash draws, when the product
    /// charges one
    fn assess_atm_fee(&mut self, bill_id: BillId, as_of: NaiveDate) -> Result<()> {
        let bill = self.bill(bill_id)?;
        let loan_id = bill.loan_id;
        let loan = self.loan(loan_id)?;
        let Some(fee_amount) = loan.product.atm_fee else {
            return Ok(());
        };

        let event_id = self.events.record(
            EventName::FeeCharge,
            as_of,
            fee_amount,
            Some(loan_id),
            json!({ "bill_id": bill_id.to_string(), "fee": "atm" }),
            &self.clock().clone(),
        );
        let event = self.events.get(event_id).expect("just recorded").clone();
        self.ledger.post(
            &event,
            AccountKey::atm_fee_receivable(bill_id),
            AccountKey::fee_earned(bill_id),
            fee_amount,
        )?;
        self.ledger.post(
            &event,
            AccountKey::due_control(bill_id),
            AccountKey::minimum_due(bill_id),
            fee_amount,
        )?;
        self.ledger.post(
            &event,
            AccountKey::due_control(bill_id),
            AccountKey::maximum_due(bill_id),
            fee_amount,
        )?;

        self.fees.push(Fee {
            id: Uuid::new_v4(),
            loan_id,
            bill_id: Some(bill_id),
            kind: FeeKind::AtmFee,
            amount: fee_amount,
            tax: Money::ZERO,
            status: FeeStatus::Unpaid,
            charged_on: as_of,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::products::ProductSpec;
    use hourglass_rs::{SafeTimeProvider, TimeSource};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn book_with_card_loan() -> (LoanBook, LoanId) {
        let mut book = LoanBook::new(SafeTimeProvider::new(TimeSource::Test(chrono::Utc::now())));
        let product = ProductSpec::revolving_card(Rate::from_percentage(3));
        let loan_id = book.originate(Uuid::new_v4(), Uuid::new_v4(), product, d(2024, 1, 1));
        (book, loan_id)
    }

    #[test]
    fn test_swipe_lands_in_unbilled() {
        let (mut book, loan_id) = book_with_card_loan();

        let bill_id = book
            .record_swipe(loan_id, Money::from_major(1000), d(2024, 1, 8), "grocer", false)
            .unwrap();

        assert_eq!(
            book.ledger.balance(&AccountKey::unbilled(bill_id)),
            Money::from_major(1000)
        );
        assert!(!book.bill(bill_id).unwrap().is_generated);
    }

    #[test]
    fn test_generate_transfers_unbilled_to_principal() {
        let (mut book, loan_id) = book_with_card_loan();
        let bill_id = book
            .record_swipe(loan_id, Money::from_major(1000), d(2024, 1, 8), "grocer", false)
            .unwrap();

        book.generate_bill(loan_id, d(2024, 2, 1)).unwrap();

        assert_eq!(book.ledger.balance(&AccountKey::unbilled(bill_id)), Money::ZERO);
        assert_eq!(
            book.ledger.balance(&AccountKey::principal_receivable(bill_id)),
            Money::from_major(1000)
        );
        let bill = book.bill(bill_id).unwrap();
        assert!(bill.is_generated);
        assert_eq!(bill.principal, Money::from_major(1000));
        assert_eq!(bill.principal_instalment, Money::from_str_exact("83.33").unwrap());
        // minimum due = instalment + one month of flat interest; maximum
        // starts at billed principal
        assert_eq!(book.minimum_due(bill_id), Money::from_str_exact("113.33").unwrap());
        assert_eq!(book.maximum_due(bill_id), Money::from_major(1000));
    }

    #[test]
    fn test_generate_twice_is_an_error() {
        let (mut book, loan_id) = book_with_card_loan();
        let bill_id = book
            .record_swipe(loan_id, Money::from_major(500), d(2024, 1, 8), "grocer", false)
            .unwrap();
        book.generate_specific_bill(bill_id, d(2024, 2, 1)).unwrap();

        let again = book.generate_specific_bill(bill_id, d(2024, 2, 1));
        assert!(matches!(again, Err(LedgerError::BillAlreadyGenerated { .. })));
        // no re-transfer happened
        assert_eq!(
            book.ledger.balance(&AccountKey::principal_receivable(bill_id)),
            Money::from_major(500)
        );
    }

    #[test]
    fn test_gap_fill_generates_skipped_periods_in_order() {
        let (mut book, loan_id) = book_with_card_loan();
        let first = book
            .record_swipe(loan_id, Money::from_major(1000), d(2024, 1, 8), "grocer", false)
            .unwrap();

        // next swipe lands three periods later; the two stale periods must
        // be closed out along the way
        let fourth = book
            .record_swipe(loan_id, Money::from_major(200), d(2024, 4, 10), "fuel", false)
            .unwrap();

        let bills = book.bills_for(loan_id);
        assert_eq!(bills.len(), 4);
        assert!(bills[0].is_generated);
        assert!(bills[1].is_generated);
        assert!(bills[2].is_generated);
        assert!(!bills[3].is_generated);
        assert_eq!(bills[0].id, first);
        assert_eq!(bills[3].id, fourth);
        // the empty middle periods billed nothing
        assert_eq!(bills[1].principal, Money::ZERO);
        assert_eq!(bills[2].principal, Money::ZERO);
        // periods tile with no gaps
        assert_eq!(bills[0].close_date, bills[1].start_date);
        assert_eq!(bills[1].close_date, bills[2].start_date);
        assert_eq!(bills[2].close_date, bills[3].start_date);
    }

    #[test]
    fn test_atm_fee_assessed_on_generation() {
        let (mut book, loan_id) = book_with_card_loan();
        let bill_id = book
            .record_swipe(loan_id, Money::from_major(1000), d(2024, 1, 8), "atm draw", true)
            .unwrap();

        book.generate_bill(loan_id, d(2024, 2, 1)).unwrap();

        assert_eq!(
            book.ledger.balance(&AccountKey::atm_fee_receivable(bill_id)),
            Money::from_major(50)
        );
        assert_eq!(book.fees.len(), 1);
        assert_eq!(book.fees[0].kind, FeeKind::AtmFee);
        // the fee is part of the minimum
        assert_eq!(book.minimum_due(bill_id), Money::from_str_exact("163.33").unwrap());
    }

    #[test]
    fn test_standalone_fee_charge() {
        let (mut book, loan_id) = book_with_card_loan();
        let bill_id = book
            .record_swipe(loan_id, Money::from_major(1000), d(2024, 1, 8), "grocer", false)
            .unwrap();
        book.generate_bill(loan_id, d(2024, 2, 1)).unwrap();
        let min_before = book.minimum_due(bill_id);

        book.charge_fee(
            bill_id,
            FeeKind::CardReloadFee,
            Money::from_major(118),
            Money::from_major(18),
            d(2024, 2, 5),
        )
        .unwrap();

        assert_eq!(book.minimum_due(bill_id), min_before + Money::from_major(118));
        assert_eq!(book.fees.len(), 1);
        assert_eq!(book.fees[0].kind, FeeKind::CardReloadFee);
        assert_eq!(book.fees[0].tax, Money::from_major(18));
        assert!(book.fees[0].is_unpaid());
    }

    #[test]
    fn test_second_bill_rolls_minimum_into_open_first() {
        let (mut book, loan_id) = book_with_card_loan();
        let first = book
            .record_swipe(loan_id, Money::from_major(1000), d(2024, 1, 8), "grocer", false)
            .unwrap();
        book.generate_bill(loan_id, d(2024, 2, 1)).unwrap();
        let min_before = book.minimum_due(first);

        book.record_swipe(loan_id, Money::from_major(2000), d(2024, 2, 10), "travel", false)
            .unwrap();
        book.generate_bill(loan_id, d(2024, 3, 1)).unwrap();

        // the first bill's next instalment fell due with the new statement
        assert_eq!(
            book.minimum_due(first),
            min_before + book.bill(first).unwrap().principal_instalment
        );
    }
}
