use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;
use tracing::instrument;
use uuid::Uuid;

use crate::book::LoanBook;
use crate::decimal::{Money, Rate};
use crate::errors::{LedgerError, Result};
use crate::loans::{Bill, BillId};
use crate::products::{days_between, days_in_month, DueDateRule, InterestType};
use crate::schedule::{EmiRow, PaymentStatus, RowStatus};

/// build the bill-level instalment rows for a freshly generated bill, then
/// regroup the loan's aggregate rows
///
/// Rounding is round-up at instalment granularity with the residual folded
/// into that instalment's interest, so the rows always sum back to
/// principal + total interest exactly.
#[instrument(skip(book))]
pub fn build_bill_schedule(book: &mut LoanBook, bill_id: BillId) -> Result<()> {
    let bill = book.bill(bill_id)?.clone();
    let loan = book.loan(bill.loan_id)?.clone();
    if bill.tenure == 0 {
        return Err(LedgerError::InvalidTenure { tenure: 0 });
    }

    let downpayment = (bill.principal * loan.downpayment_rate.as_decimal()).to_instalment();
    let rule = loan.product.due_date_rule;
    let rows = match loan.product.interest_type {
        InterestType::Flat => flat_rows(&bill, rule, loan.monthly_rate, downpayment),
        InterestType::Reducing => reducing_rows(&bill, rule, loan.monthly_rate, downpayment),
    };

    for row in rows {
        book.schedule.insert(row);
    }
    let deferred = book.deferred_interest_for(bill.loan_id);
    book.schedule.regroup(bill.loan_id, &deferred);
    Ok(())
}

fn flat_rows(
    bill: &Bill,
    rule: DueDateRule,
    monthly_rate: Rate,
    downpayment: Money,
) -> Vec<EmiRow> {
    let n = bill.tenure;
    let per = bill.principal_instalment;
    let interest = bill.principal.monthly_interest(monthly_rate).to_instalment();

    let mut rows = Vec::with_capacity(n as usize);
    let mut principal_left = bill.principal;
    let mut prev_due = bill.close_date;

    for seq in 1..=n {
        let due_date = rule.due_date(seq, bill.close_date);
        let principal_due = if seq == n {
            // the last slice absorbs the rounding residue
            principal_left
        } else {
            per.min(principal_left)
        };
        principal_left -= principal_due;

        let (current, next) = straddle_split(interest, prev_due, due_date, monthly_rate, bill.principal);

        rows.push(EmiRow {
            id: Uuid::new_v4(),
            loan_id: bill.loan_id,
            bill_id: Some(bill.id),
            seq,
            due_date,
            principal_due,
            interest_due: interest,
            interest_current_month: current,
            interest_next_month: next,
            downpayment_due: if seq == 1 { downpayment } else { Money::ZERO },
            late_fee_due: Money::ZERO,
            atm_fee_due: Money::ZERO,
            closing_pre_due: principal_left + principal_due + interest,
            closing_post_due: principal_left,
            payment_received: Money::ZERO,
            payment_status: PaymentStatus::UnPaid,
            dpd: 0,
            row_status: RowStatus::Active,
        });
        prev_due = due_date;
    }
    rows
}

fn reducing_rows(
    bill: &Bill,
    rule: DueDateRule,
    monthly_rate: Rate,
    downpayment: Money,
) -> Vec<EmiRow> {
    let n = bill.tenure;
    let emi = equated_instalment(bill.principal, monthly_rate, n);

    let mut rows = Vec::with_capacity(n as usize);
    let mut balance = bill.principal;

    for seq in 1..=n {
        let due_date = rule.due_date(seq, bill.close_date);
        let interest_due = balance.monthly_interest(monthly_rate).to_instalment();
        let principal_due = if seq == n {
            balance
        } else {
            (emi - interest_due).min(balance)
        };
        balance -= principal_due;

        rows.push(EmiRow {
            id: Uuid::new_v4(),
            loan_id: bill.loan_id,
            bill_id: Some(bill.id),
            seq,
            due_date,
            principal_due,
            interest_due,
            interest_current_month: interest_due,
            interest_next_month: Money::ZERO,
            downpayment_due: if seq == 1 { downpayment } else { Money::ZERO },
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
    rows
}

/// split one period's flat interest into current- and next-month components
/// when the EMI straddles a month boundary
fn straddle_split(
    interest: Money,
    period_start: NaiveDate,
    due_date: NaiveDate,
    monthly_rate: Rate,
    principal: Money,
) -> (Money, Money) {
    if period_start.year() == due_date.year() && period_start.month() == due_date.month() {
        return (interest, Money::ZERO);
    }
    let month_end = NaiveDate::from_ymd_opt(
        period_start.year(),
        period_start.month(),
        days_in_month(period_start.year(), period_start.month()),
    )
    .expect("month end is valid");
    let days_current = days_between(period_start, month_end).max(0) as u32;
    let current = principal
        .prorated_interest(monthly_rate, days_current.min(30))
        .to_instalment()
        .min(interest);
    (current, interest - current)
}

/// the classic equated instalment: P * r * (1+r)^n / ((1+r)^n - 1),
/// rounded up at instalment granularity
fn equated_instalment(principal: Money, monthly_rate: Rate, months: u32) -> Money {
    if months == 0 {
        return principal;
    }
    let r = monthly_rate.as_decimal();
    if r.is_zero() {
        return (principal / Decimal::from(months)).ceil_instalment();
    }

    let mut compound = Decimal::ONE;
    let base = Decimal::ONE + r;
    for _ in 0..months {
        compound *= base;
    }

    let numerator = principal.as_decimal() * r * compound;
    let denominator = compound - Decimal::ONE;
    Money::from_decimal(numerator / denominator).ceil_instalment()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::loans::LoanId;
    use crate::products::ProductSpec;
    use hourglass_rs::{SafeTimeProvider, TimeSource};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn billed(product: ProductSpec, principal: i64) -> (LoanBook, LoanId, BillId) {
        let mut book = LoanBook::new(SafeTimeProvider::new(TimeSource::Test(chrono::Utc::now())));
        let loan_id = book.originate(Uuid::new_v4(), Uuid::new_v4(), product, d(2024, 1, 1));
        let bill_id = book
            .record_swipe(loan_id, Money::from_major(principal), d(2024, 1, 8), "swipe", false)
            .unwrap();
        book.generate_bill(loan_id, d(2024, 2, 1)).unwrap();
        (book, loan_id, bill_id)
    }

    #[test]
    fn test_flat_schedule_conserves_principal() {
        let (book, _, bill_id) =
            billed(ProductSpec::revolving_card(Rate::from_percentage(3)), 1000);

        let rows = book.schedule.bill_rows(bill_id);
        assert_eq!(rows.len(), 12);

        let total_principal: Money = rows.iter().map(|r| r.principal_due).sum();
        assert_eq!(total_principal, Money::from_major(1000));

        // flat: every instalment carries one month of interest on the
        // billed principal
        for row in &rows {
            assert_eq!(row.interest_due, Money::from_major(30));
        }

        // final post-due closing balance is exactly zero
        assert_eq!(rows.last().unwrap().closing_post_due, Money::ZERO);
    }

    #[test]
    fn test_flat_rounding_residue_lands_on_last_row() {
        let (book, _, bill_id) =
            billed(ProductSpec::revolving_card(Rate::from_percentage(3)), 1000);

        let rows = book.schedule.bill_rows(bill_id);
        assert_eq!(rows[0].principal_due, Money::from_str_exact("83.33").unwrap());
        assert_eq!(
            rows.last().unwrap().principal_due,
            Money::from_str_exact("83.37").unwrap()
        );
    }

    #[test]
    fn test_closing_balances_run_down() {
        let (book, _, bill_id) =
            billed(ProductSpec::revolving_card(Rate::from_percentage(3)), 1000);

        let rows = book.schedule.bill_rows(bill_id);
        for pair in rows.windows(2) {
            assert_eq!(
                pair[0].closing_post_due - pair[1].principal_due,
                pair[1].closing_post_due
            );
            // pre-due includes the instalment's own interest
            assert_eq!(
                pair[1].closing_pre_due,
                pair[1].closing_post_due + pair[1].principal_due + pair[1].interest_due
            );
        }
    }

    #[test]
    fn test_reducing_schedule_conserves_principal() {
        let (book, _, bill_id) = billed(ProductSpec::term_loan(Rate::from_percentage(2), 12), 10_000);

        let rows = book.schedule.bill_rows(bill_id);
        assert_eq!(rows.len(), 12);

        let total_principal: Money = rows.iter().map(|r| r.principal_due).sum();
        assert_eq!(total_principal, Money::from_major(10_000));
        assert_eq!(rows.last().unwrap().closing_post_due, Money::ZERO);

        // interest declines with the balance
        for pair in rows.windows(2) {
            assert!(pair[1].interest_due < pair[0].interest_due);
        }
    }

    #[test]
    fn test_downpayment_rides_on_first_instalment() {
        let (book, _, bill_id) = billed(
            ProductSpec::secured_card(Rate::from_percentage(3), Rate::from_percentage(10)),
            1000,
        );

        let rows = book.schedule.bill_rows(bill_id);
        assert_eq!(rows[0].downpayment_due, Money::from_major(100));
        for row in &rows[1..] {
            assert_eq!(row.downpayment_due, Money::ZERO);
        }
    }

    #[test]
    fn test_straddle_split_totals_one_month() {
        let interest = Money::from_major(30);
        let (current, next) = straddle_split(
            interest,
            d(2024, 1, 20),
            d(2024, 2, 15),
            Rate::from_percentage(3),
            Money::from_major(1000),
        );
        assert_eq!(current + next, interest);
        assert!(current.is_positive());
        assert!(next.is_positive());

        // same-month EMI keeps everything in the current component
        let (current, next) = straddle_split(
            interest,
            d(2024, 1, 2),
            d(2024, 1, 15),
            Rate::from_percentage(3),
            Money::from_major(1000),
        );
        assert_eq!(current, interest);
        assert_eq!(next, Money::ZERO);
    }

    #[test]
    fn test_equated_instalment_formula() {
        // zero rate splits the principal evenly
        assert_eq!(
            equated_instalment(Money::from_major(1200), Rate::ZERO, 12),
            Money::from_major(100)
        );

        // 10k at 2%/month over 12 months: EMI near 945.60, rounded up
        let emi = equated_instalment(Money::from_major(10_000), Rate::from_percentage(2), 12);
        assert!(emi >= Money::from_str_exact("945.59").unwrap());
        assert!(emi <= Money::from_str_exact("945.61").unwrap());
    }
}
