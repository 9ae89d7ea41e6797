use chrono::NaiveDate;
use serde_json::json;
use tracing::{info, instrument};

use crate::book::LoanBook;
use crate::decimal::Money;
use crate::errors::Result;
use crate::events::{EventId, EventName};
use crate::ledger::AccountKey;
use crate::loans::{BillId, FeeKind, FeeStatus};

/// what the anomaly handler is allowed to undo
///
/// Interest reversal is the active path. Late-fee reversal is an explicit
/// extension point: it stays off unless a caller opts in, and even then it
/// re-checks the minimum-paid prerequisite as of the original accrual date
/// before touching anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReversalPolicy {
    pub reverse_late_fees: bool,
}

/// one undone accrual
#[derive(Debug, Clone, PartialEq)]
pub struct ReversedAccrual {
    pub original_event: EventId,
    pub amount: Money,
}

/// detects accruals that a late-arriving payment invalidated and reverses
/// exactly those postings
pub struct ReversalEngine {
    policy: ReversalPolicy,
}

impl ReversalEngine {
    pub fn new(policy: ReversalPolicy) -> Self {
        Self { policy }
    }

    /// reverse accruals whose post date falls after a backdated payment's
    /// effective date
    ///
    /// Run this before allocating the payment: the scan keys off the bill's
    /// receivable books, ordered by original post date, and skips accruals
    /// that were already reversed.
    #[instrument(skip(self, book))]
    pub fn reverse_out_of_order(
        &self,
        book: &mut LoanBook,
        bill_id: BillId,
        payment_post_date: NaiveDate,
    ) -> Result<Vec<ReversedAccrual>> {
        let mut reversed = self.reverse_interest(book, bill_id, payment_post_date)?;
        if self.policy.reverse_late_fees {
            reversed.extend(self.reverse_late_fines(book, bill_id, payment_post_date)?);
        }
        Ok(reversed)
    }

    fn reverse_interest(
        &self,
        book: &mut LoanBook,
        bill_id: BillId,
        payment_post_date: NaiveDate,
    ) -> Result<Vec<ReversedAccrual>> {
        let targets = self.stale_accruals(
            book,
            AccountKey::interest_receivable(bill_id),
            EventName::AccrueInterest,
            EventName::ReverseInterestCharges,
            payment_post_date,
        );

        let mut reversed = Vec::new();
        for (original_event, amount) in targets {
            let loan_id = book.bill(bill_id)?.loan_id;
            let event_id = book.events.record(
                EventName::ReverseInterestCharges,
                payment_post_date,
                amount,
                Some(loan_id),
                json!({
                    "bill_id": bill_id.to_string(),
                    "reversed_event": original_event.to_string(),
                }),
                &book.clock().clone(),
            );
            let event = book.events.get(event_id).expect("just recorded").clone();
            book.ledger.post(
                &event,
                AccountKey::interest_earned(bill_id),
                AccountKey::interest_receivable(bill_id),
                amount,
            )?;
            let max_cut = book.maximum_due(bill_id).min(amount);
            if max_cut.is_positive() {
                book.ledger.post(
                    &event,
                    AccountKey::maximum_due(bill_id),
                    AccountKey::due_control(bill_id),
                    max_cut,
                )?;
            }
            info!(bill = %bill_id, %amount, "interest accrual reversed");
            reversed.push(ReversedAccrual {
                original_event,
                amount,
            });
        }
        Ok(reversed)
    }

    fn reverse_late_fines(
        &self,
        book: &mut LoanBook,
        bill_id: BillId,
        payment_post_date: NaiveDate,
    ) -> Result<Vec<ReversedAccrual>> {
        let targets = self.stale_accruals(
            book,
            AccountKey::late_fee_receivable(bill_id),
            EventName::AccrueLateFine,
            EventName::ReverseLateFine,
            payment_post_date,
        );

        let mut reversed = Vec::new();
        for (original_event, amount) in targets {
            // with the backdated payment now in the book, re-run the
            // prerequisite as of the fine's own post date
            let accrual_date = book
                .events
                .get(original_event)
                .map(|e| e.post_date)
                .unwrap_or(payment_post_date);
            let minimum_then = book
                .ledger
                .balance_as_of(&AccountKey::minimum_due(bill_id), Some(accrual_date))
                .max(Money::ZERO);
            if minimum_then > amount {
                // the minimum was still unpaid even counting the payment;
                // the fine stands
                continue;
            }

            let loan_id = book.bill(bill_id)?.loan_id;
            let event_id = book.events.record(
                EventName::ReverseLateFine,
                payment_post_date,
                amount,
                Some(loan_id),
                json!({
                    "bill_id": bill_id.to_string(),
                    "reversed_event": original_event.to_string(),
                }),
                &book.clock().clone(),
            );
            let event = book.events.get(event_id).expect("just recorded").clone();
            let still_unpaid = book
                .ledger
                .balance(&AccountKey::late_fee_receivable(bill_id))
                .max(Money::ZERO);
            if still_unpaid >= amount {
                // classic reversal: the fine was never collected
                book.ledger.post(
                    &event,
                    AccountKey::late_fee_earned(bill_id),
                    AccountKey::late_fee_receivable(bill_id),
                    amount,
                )?;
                let minimum_now = book.minimum_due(bill_id).min(amount);
                if minimum_now.is_positive() {
                    book.ledger.post(
                        &event,
                        AccountKey::minimum_due(bill_id),
                        AccountKey::due_control(bill_id),
                        minimum_now,
                    )?;
                }
            } else {
                // the backdated payment already settled the fine; refund it
                // into the loan's credit instead
                book.ledger.post(
                    &event,
                    AccountKey::late_fee_earned(bill_id),
                    AccountKey::prepayment_credit(loan_id),
                    amount,
                )?;
            }
            let max_cut = book.maximum_due(bill_id).min(amount);
            if max_cut.is_positive() {
                book.ledger.post(
                    &event,
                    AccountKey::maximum_due(bill_id),
                    AccountKey::due_control(bill_id),
                    max_cut,
                )?;
            }
            if let Some(fee) = book.fees.iter_mut().find(|f| {
                f.bill_id == Some(bill_id)
                    && f.kind == FeeKind::LateFee
                    && f.status != FeeStatus::Reversed
                    && f.amount == amount
            }) {
                fee.status = FeeStatus::Reversed;
            }
            info!(bill = %bill_id, %amount, "late fine reversed");
            reversed.push(ReversedAccrual {
                original_event,
                amount,
            });
        }
        Ok(reversed)
    }

    /// accrual postings on `receivable` whose event post-dates the payment
    /// and which no reversal event references yet, oldest first
    fn stale_accruals(
        &self,
        book: &LoanBook,
        receivable: AccountKey,
        accrual_name: EventName,
        reversal_name: EventName,
        payment_post_date: NaiveDate,
    ) -> Vec<(EventId, Money)> {
        let Some(account) = book.ledger.existing_account(&receivable) else {
            return Vec::new();
        };
        let already_reversed: Vec<String> = book
            .events
            .events()
            .iter()
            .filter(|e| e.name == reversal_name)
            .filter_map(|e| e.metadata.get("reversed_event").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .collect();

        book.ledger
            .entries_for(&receivable)
            .into_iter()
            .filter(|entry| entry.debit_account == account)
            .filter_map(|entry| {
                let event = book.events.get(entry.event_id)?;
                if event.name != accrual_name {
                    return None;
                }
                if event.post_date <= payment_post_date {
                    return None;
                }
                if already_reversed.contains(&event.id.to_string()) {
                    return None;
                }
                Some((event.id, entry.amount))
            })
            .collect()
    }
}
