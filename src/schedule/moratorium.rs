use chrono::NaiveDate;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::book::LoanBook;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::EventName;
use crate::loans::{LoanId, Moratorium, MoratoriumInterest};
use crate::products::add_months;
use crate::schedule::{EmiRow, PaymentStatus, RowStatus};

/// outcome of a moratorium request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoratoriumOutcome {
    Applied { inserted: u32 },
    /// no schedule rows exist yet, nothing to suspend
    NoSchedule,
}

impl LoanBook {
    /// suspend instalments falling inside [start, end]
    ///
    /// For each bill, the instalments due inside the window become synthetic
    /// zero-due rows and everything from the window on shifts forward by the
    /// number of suspended months. The interest those months would have
    /// collected is not spread: it lands entirely on the first instalment
    /// after the window, tracked in its own deferred-interest table so
    /// regroup can fold it into the loan-level rows.
    #[instrument(skip(self))]
    pub fn apply_moratorium(
        &mut self,
        loan_id: LoanId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<MoratoriumOutcome> {
        if end < start {
            return Err(LedgerError::InvalidMoratoriumWindow { start, end });
        }
        self.loan(loan_id)?;
        if self.schedule.loan_bill_rows(loan_id).is_empty() {
            return Ok(MoratoriumOutcome::NoSchedule);
        }

        let moratorium_id = Uuid::new_v4();
        let mut inserted_total = 0u32;

        let bill_ids: Vec<_> = self
            .bills_for(loan_id)
            .iter()
            .filter(|b| b.is_generated)
            .map(|b| b.id)
            .collect();

        for bill_id in bill_ids {
            let rows: Vec<EmiRow> = self
                .schedule
                .bill_rows(bill_id)
                .into_iter()
                .cloned()
                .collect();
            let skipped: Vec<&EmiRow> = rows
                .iter()
                .filter(|r| !r.is_paid() && r.due_date >= start && r.due_date <= end)
                .collect();
            let n_skip = skipped.len() as u32;
            if n_skip == 0 {
                continue;
            }

            let deferred: Money = skipped.iter().map(|r| r.interest_due).sum();
            let first_seq = skipped.iter().map(|r| r.seq).min().expect("non-empty");
            let carry_balance = rows
                .iter()
                .filter(|r| r.seq < first_seq)
                .last()
                .map(|r| r.closing_post_due)
                .unwrap_or(self.bill(bill_id)?.principal);

            // supersede everything from the window on
            let shifted: Vec<EmiRow> = rows
                .iter()
                .filter(|r| r.seq >= first_seq)
                .cloned()
                .collect();
            for row in &shifted {
                self.schedule.deactivate(row.id);
            }

            // synthetic zero-due placeholders occupy the suspended months
            for (offset, skipped_row) in skipped.iter().enumerate() {
                self.schedule.insert(EmiRow {
                    id: Uuid::new_v4(),
                    loan_id,
                    bill_id: Some(bill_id),
                    seq: first_seq + offset as u32,
                    due_date: skipped_row.due_date,
                    principal_due: Money::ZERO,
                    interest_due: Money::ZERO,
                    interest_current_month: Money::ZERO,
                    interest_next_month: Money::ZERO,
                    downpayment_due: Money::ZERO,
                    late_fee_due: Money::ZERO,
                    atm_fee_due: Money::ZERO,
                    closing_pre_due: carry_balance,
                    closing_post_due: carry_balance,
                    payment_received: Money::ZERO,
                    payment_status: PaymentStatus::UnPaid,
                    dpd: 0,
                    row_status: RowStatus::Active,
                });
            }

            // the original rows ride out beyond the window
            let mut first_post_window_due = None;
            for row in shifted {
                let mut moved = row.clone();
                moved.id = Uuid::new_v4();
                moved.seq += n_skip;
                moved.due_date = add_months(moved.due_date, n_skip);
                moved.row_status = RowStatus::Active;
                if first_post_window_due.is_none() {
                    first_post_window_due = Some(moved.due_date);
                }
                self.schedule.insert(moved);
            }

            if let Some(due_date) = first_post_window_due {
                if deferred.is_positive() {
                    self.moratorium_interest.push(MoratoriumInterest {
                        moratorium_id,
                        bill_id,
                        due_date,
                        amount: deferred,
                    });
                }
            }
            inserted_total += n_skip;
        }

        if inserted_total == 0 {
            return Ok(MoratoriumOutcome::NoSchedule);
        }

        self.moratoria.push(Moratorium {
            id: moratorium_id,
            loan_id,
            start_date: start,
            end_date: end,
        });
        self.events.record(
            EventName::MoratoriumApply,
            start,
            Money::ZERO,
            Some(loan_id),
            serde_json::json!({ "end": end.to_string(), "inserted": inserted_total }),
            &self.clock().clone(),
        );

        let deferred = self.deferred_interest_for(loan_id);
        self.schedule.regroup(loan_id, &deferred);

        info!(loan = %loan_id, inserted = inserted_total, "moratorium applied");
        Ok(MoratoriumOutcome::Applied {
            inserted: inserted_total,
        })
    }
}
