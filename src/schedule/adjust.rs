use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::book::LoanBook;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::EventName;
use crate::loans::{LoanId, LoanStatus};
use crate::products::InterestType;
use crate::schedule::{EmiRow, PaymentStatus, RowStatus};

impl LoanBook {
    /// stretch every generated bill's remaining schedule to `new_tenure`
    /// instalments
    ///
    /// Future rows (due on or after `from_date`) are superseded by evenly
    /// re-split principal slices with recomputed interest; trailing rows are
    /// appended when the new tenure exceeds the remaining count. Payments
    /// already attributed to the old future rows are invalid afterwards, so
    /// the re-slide runs last.
    #[instrument(skip(self))]
    pub fn extend_tenure(
        &mut self,
        loan_id: LoanId,
        new_tenure: u32,
        from_date: NaiveDate,
    ) -> Result<()> {
        if new_tenure == 0 {
            return Err(LedgerError::InvalidTenure { tenure: new_tenure });
        }
        let loan = self.loan(loan_id)?.clone();

        let bill_ids: Vec<_> = self
            .bills_for(loan_id)
            .iter()
            .filter(|b| b.is_generated)
            .map(|b| b.id)
            .collect();

        for bill_id in bill_ids {
            let bill = self.bill(bill_id)?.clone();
            let rows: Vec<EmiRow> = self
                .schedule
                .bill_rows(bill_id)
                .into_iter()
                .cloned()
                .collect();
            if rows.is_empty() {
                continue;
            }

            let past: Vec<&EmiRow> = rows.iter().filter(|r| r.due_date < from_date).collect();
            let future: Vec<&EmiRow> = rows.iter().filter(|r| r.due_date >= from_date).collect();
            if future.is_empty() {
                continue;
            }
            if new_tenure <= past.len() as u32 {
                return Err(LedgerError::InvalidTenure { tenure: new_tenure });
            }

            let settled_principal: Money = past.iter().map(|r| r.principal_due).sum();
            let remaining = bill.principal - settled_principal;
            let k = new_tenure - past.len() as u32;
            let per = (bill.principal / Decimal::from(new_tenure)).to_instalment();

            for row in &future {
                self.schedule.deactivate(row.id);
            }

            let first_seq = past.len() as u32 + 1;
            let rule = loan.product.due_date_rule;
            let mut balance = remaining;
            let monthly = bill.principal.monthly_interest(loan.monthly_rate).to_instalment();
            for offset in 0..k {
                let seq = first_seq + offset;
                let is_last = offset == k - 1;
                let principal_due = if is_last {
                    balance
                } else {
                    per.min(balance)
                };
                let interest_due = match loan.product.interest_type {
                    InterestType::Flat => monthly,
                    InterestType::Reducing => {
                        balance.monthly_interest(loan.monthly_rate).to_instalment()
                    }
                };
                balance -= principal_due;
                self.schedule.insert(EmiRow {
                    id: Uuid::new_v4(),
                    loan_id,
                    bill_id: Some(bill_id),
                    seq,
                    due_date: rule.due_date(seq, bill.close_date),
                    principal_due,
                    interest_due,
                    interest_current_month: interest_due,
                    interest_next_month: Money::ZERO,
                    downpayment_due: Money::ZERO,
                    late_fee_due: Money::ZERO,
                    atm_fee_due: Money::ZERO,
                    closing_pre_due: balance + principal_due + interest_due,
                    closing_post_due: balance,
                    payment_received: Money::ZERO,
                    payment_status: PaymentStatus::UnPaid,
                    dpd: 0,
                    row_status: RowStatus::Active,
                });
            }

            let bill = self.bill_mut(bill_id)?;
            bill.tenure = new_tenure;
            bill.principal_instalment = per;
        }

        self.events.record(
            EventName::TenureExtend,
            from_date,
            Money::ZERO,
            Some(loan_id),
            serde_json::json!({ "new_tenure": new_tenure }),
            &self.clock().clone(),
        );

        let deferred = self.deferred_interest_for(loan_id);
        self.schedule.regroup(loan_id, &deferred);

        // prior attributions now point at renumbered rows
        self.readjust_future_payment(loan_id, from_date)?;
        info!(loan = %loan_id, new_tenure, "tenure extended");
        Ok(())
    }

    /// re-slide money that was applied to instalments due after `after_date`
    /// under a superseded schedule
    ///
    /// Voids the stale mappings, resets the affected rows to unpaid and
    /// walks the same amounts back in due-date order. The re-slid total must
    /// match the voided total exactly; a remainder aborts the unit of work.
    #[instrument(skip(self))]
    pub fn readjust_future_payment(
        &mut self,
        loan_id: LoanId,
        after_date: NaiveDate,
    ) -> Result<Money> {
        // queue of (payment ref, amount) in original attribution order
        let queue: Vec<(Uuid, Money)> = {
            let mut stale = self.payments.active_mappings_after(loan_id, after_date);
            stale.sort_by_key(|m| (m.due_date, m.seq));
            stale.iter().map(|m| (m.payment_ref, m.amount)).collect()
        };
        let voided = self.payments.void_mappings_after(loan_id, after_date);
        if voided.is_zero() {
            return Ok(Money::ZERO);
        }

        // reset the affected rows
        let reset_ids: Vec<Uuid> = self
            .schedule
            .rows()
            .iter()
            .filter(|r| {
                r.is_active()
                    && r.loan_id == loan_id
                    && r.bill_id.is_some()
                    && r.due_date > after_date
                    && r.payment_received.is_positive()
            })
            .map(|r| r.id)
            .collect();
        for id in reset_ids {
            if let Some(row) = self.schedule.row_mut(id) {
                row.payment_received = Money::ZERO;
                row.payment_status = PaymentStatus::UnPaid;
            }
        }

        // walk the queue back into the new schedule, oldest due first
        let target_ids: Vec<Uuid> = self
            .schedule
            .loan_bill_rows(loan_id)
            .into_iter()
            .filter(|r| r.due_date > after_date)
            .map(|r| r.id)
            .collect();

        let mut queue = queue.into_iter();
        let mut pending: Option<(Uuid, Money)> = queue.next();
        let mut reslid = Money::ZERO;
        for row_id in target_ids {
            loop {
                let Some((payment_ref, amount)) = pending else {
                    break;
                };
                let (capacity, due_date, seq) = {
                    let row = self.schedule.row(row_id).expect("target row exists");
                    (row.outstanding(), row.due_date, row.seq)
                };
                if capacity.is_zero() {
                    break;
                }
                let take = amount.min(capacity);
                {
                    let row = self.schedule.row_mut(row_id).expect("target row exists");
                    row.payment_received += take;
                    if row.outstanding().is_zero() {
                        row.payment_status = PaymentStatus::Paid;
                    }
                }
                self.payments
                    .record_mapping(payment_ref, loan_id, due_date, seq, take);
                reslid += take;
                let left = amount - take;
                pending = if left.is_positive() {
                    Some((payment_ref, left))
                } else {
                    queue.next()
                };
            }
            if pending.is_none() {
                break;
            }
        }

        let remainder = voided - reslid;
        if !remainder.is_zero() {
            return Err(LedgerError::AllocationRemainder { remainder });
        }

        let deferred = self.deferred_interest_for(loan_id);
        self.schedule.regroup(loan_id, &deferred);
        Ok(voided)
    }

    /// close a loan whose last payment extinguished it early
    ///
    /// All future instalments go to zero due; the first of them is marked
    /// Paid carrying its pre-payment closing balance, and the attribution
    /// rows of the voided instalments are aggregated into it.
    #[instrument(skip(self))]
    pub fn close_loan(&mut self, loan_id: LoanId, last_payment_date: NaiveDate) -> Result<()> {
        self.loan(loan_id)?;

        let future: Vec<EmiRow> = {
            let mut rows: Vec<EmiRow> = self
                .schedule
                .rows()
                .iter()
                .filter(|r| {
                    r.is_active()
                        && r.loan_id == loan_id
                        && r.bill_id.is_some()
                        && r.due_date > last_payment_date
                        && !r.is_paid()
                })
                .cloned()
                .collect();
            rows.sort_by_key(|r| (r.due_date, r.seq));
            rows
        };

        let aggregated = self.payments.void_mappings_after(loan_id, last_payment_date);

        let mut closing_row: Option<(NaiveDate, u32)> = None;
        for (i, row) in future.iter().enumerate() {
            self.schedule.deactivate(row.id);
            let mut replacement = row.clone();
            replacement.id = Uuid::new_v4();
            replacement.principal_due = Money::ZERO;
            replacement.interest_due = Money::ZERO;
            replacement.interest_current_month = Money::ZERO;
            replacement.interest_next_month = Money::ZERO;
            replacement.downpayment_due = Money::ZERO;
            replacement.late_fee_due = Money::ZERO;
            replacement.atm_fee_due = Money::ZERO;
            if i == 0 {
                replacement.payment_received = row.closing_pre_due;
                replacement.payment_status = PaymentStatus::Paid;
                closing_row = Some((row.due_date, row.seq));
            } else {
                replacement.payment_received = Money::ZERO;
                replacement.payment_status = PaymentStatus::UnPaid;
            }
            replacement.closing_pre_due = Money::ZERO;
            replacement.closing_post_due = Money::ZERO;
            self.schedule.insert(replacement);
        }

        if let (Some((due_date, seq)), true) = (closing_row, aggregated.is_positive()) {
            // voided future attributions roll up into the closing instalment
            self.payments
                .record_mapping(Uuid::new_v4(), loan_id, due_date, seq, aggregated);
        }

        self.events.record(
            EventName::LoanClose,
            last_payment_date,
            Money::ZERO,
            Some(loan_id),
            serde_json::json!({}),
            &self.clock().clone(),
        );

        let loan = self.loan_mut(loan_id)?;
        loan.status = LoanStatus::Completed;
        loan.clear_dpd();

        let deferred = self.deferred_interest_for(loan_id);
        self.schedule.regroup(loan_id, &deferred);
        info!(loan = %loan_id, "loan closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::loans::{BillId, DPD_NOT_DELINQUENT};
    use crate::products::ProductSpec;
    use hourglass_rs::{SafeTimeProvider, TimeSource};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn billed_loan() -> (LoanBook, LoanId, BillId) {
        let mut book = LoanBook::new(SafeTimeProvider::new(TimeSource::Test(chrono::Utc::now())));
        let product = ProductSpec::revolving_card(Rate::from_percentage(3));
        let loan_id = book.originate(Uuid::new_v4(), Uuid::new_v4(), product, d(2024, 1, 1));
        let bill_id = book
            .record_swipe(loan_id, Money::from_major(1200), d(2024, 1, 8), "swipe", false)
            .unwrap();
        book.generate_bill(loan_id, d(2024, 2, 1)).unwrap();
        (book, loan_id, bill_id)
    }

    #[test]
    fn test_extension_respins_future_rows() {
        let (mut book, loan_id, bill_id) = billed_loan();
        assert_eq!(book.schedule.bill_rows(bill_id).len(), 12);

        book.extend_tenure(loan_id, 18, d(2024, 1, 1)).unwrap();

        let rows = book.schedule.bill_rows(bill_id);
        assert_eq!(rows.len(), 18);
        let total: Money = rows.iter().map(|r| r.principal_due).sum();
        assert_eq!(total, Money::from_major(1200));
        assert_eq!(
            book.bill(bill_id).unwrap().principal_instalment,
            Money::from_str_exact("66.67").unwrap()
        );
        assert_eq!(rows.last().unwrap().closing_post_due, Money::ZERO);
    }

    #[test]
    fn test_zero_tenure_is_rejected() {
        let (mut book, loan_id, _) = billed_loan();
        let result = book.extend_tenure(loan_id, 0, d(2024, 1, 1));
        assert!(matches!(result, Err(LedgerError::InvalidTenure { .. })));
    }

    #[test]
    fn test_readjust_conserves_reslid_amount() {
        let (mut book, loan_id, bill_id) = billed_loan();

        // hand-apply a payment onto the second instalment, as if over-applied
        // under an old schedule
        let target = book.schedule.bill_rows(bill_id)[1].clone();
        let payment_ref = Uuid::new_v4();
        {
            let row = book.schedule.row_mut(target.id).unwrap();
            row.payment_received = Money::from_major(100);
        }
        book.payments.record_mapping(
            payment_ref,
            loan_id,
            target.due_date,
            target.seq,
            Money::from_major(100),
        );

        let reslid = book
            .readjust_future_payment(loan_id, d(2024, 1, 1))
            .unwrap();
        assert_eq!(reslid, Money::from_major(100));

        // the amount moved to the earliest open instalment
        let first = book.schedule.bill_rows(bill_id)[0].clone();
        assert_eq!(first.payment_received, Money::from_major(100));
        assert_eq!(book.payments.attributed(payment_ref), Money::from_major(100));
    }

    #[test]
    fn test_close_marks_first_future_row_paid() {
        let (mut book, loan_id, bill_id) = billed_loan();
        let first_future = book.schedule.bill_rows(bill_id)[0].clone();

        book.close_loan(loan_id, d(2024, 2, 1)).unwrap();

        let rows = book.schedule.bill_rows(bill_id);
        let closing = &rows[0];
        assert!(closing.is_paid());
        assert_eq!(closing.payment_received, first_future.closing_pre_due);
        for row in &rows[1..] {
            assert_eq!(row.total_due(), Money::ZERO);
            assert!(!row.is_paid());
        }

        let loan = book.loan(loan_id).unwrap();
        assert_eq!(loan.status, LoanStatus::Completed);
        assert_eq!(loan.current_dpd, DPD_NOT_DELINQUENT);
    }
}
