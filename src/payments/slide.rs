use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use crate::book::LoanBook;
use crate::decimal::Money;
use crate::loans::LoanId;
use crate::schedule::PaymentStatus;

/// slide a settled amount into the schedule, oldest due first
///
/// Instalments settle in due-date order across every loan in the group;
/// within one instalment the amount covers its fees, then interest, then
/// principal — the same tier order the ledger allocation used. One exact
/// `PaymentMapping` is written per instalment touched. Returns whatever the
/// schedule could not absorb.
pub(crate) fn slide_into_instalments(
    book: &mut LoanBook,
    group: &[LoanId],
    total: Money,
    payment_date: NaiveDate,
    payment_ref: Uuid,
) -> Money {
    let mut targets: Vec<(Uuid, LoanId)> = Vec::new();
    for &loan_id in group {
        for row in book.schedule.loan_bill_rows(loan_id) {
            if !row.is_paid() && row.outstanding().is_positive() {
                targets.push((row.id, loan_id));
            }
        }
    }
    targets.sort_by_key(|(id, _)| {
        let row = book.schedule.row(*id).expect("row id just collected");
        (row.due_date, row.seq)
    });

    let mut remaining = total;
    for (row_id, loan_id) in targets {
        if remaining.is_zero() {
            break;
        }
        let (due_date, seq, take) = {
            let row = book.schedule.row(row_id).expect("row id just collected");
            (row.due_date, row.seq, remaining.min(row.outstanding()))
        };
        if !take.is_positive() {
            continue;
        }
        {
            let row = book.schedule.row_mut(row_id).expect("row id just collected");
            row.payment_received += take;
            if row.outstanding().is_zero() {
                row.payment_status = PaymentStatus::Paid;
                if row.due_date >= payment_date {
                    row.dpd = 0;
                }
            }
        }
        book.payments
            .record_mapping(payment_ref, loan_id, due_date, seq, take);
        debug!(loan = %loan_id, %due_date, %take, "payment slid into instalment");
        remaining -= take;
    }

    for &loan_id in group {
        let deferred = book.deferred_interest_for(loan_id);
        book.schedule.regroup(loan_id, &deferred);
    }
    remaining
}
