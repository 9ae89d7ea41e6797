use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::book::LoanBook;
use crate::decimal::Money;
use crate::errors::{LedgerError, Result};
use crate::events::EventName;
use crate::ledger::AccountKey;
use crate::loans::{BillId, FeeKind, FeeStatus, LoanId, LoanStatus};
use crate::payments::{slide, PaymentRequest, SplitComponent};

/// fixed-order tier configuration for payment allocation
#[derive(Debug, Clone)]
pub struct Waterfall {
    /// fee kinds settle first, in this order
    pub fee_priority: Vec<FeeKind>,
}

impl Waterfall {
    /// standard order: ATM fee, late fee, then interest, then principal
    pub fn standard() -> Self {
        Self {
            fee_priority: vec![FeeKind::AtmFee, FeeKind::LateFee],
        }
    }
}

impl Default for Waterfall {
    fn default() -> Self {
        Self::standard()
    }
}

/// how one payment was applied
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AllocationResult {
    pub payment_ref: Uuid,
    pub applied_fees: Money,
    pub applied_interest: Money,
    pub applied_principal: Money,
    /// excess held against the loan after every bill was satisfied
    pub prepayment_credit: Money,
    /// portion of the credit that recovered a prior write-off
    pub recovered: Money,
    pub loan_closed: bool,
}

impl AllocationResult {
    /// everything the payment turned into; always equals the input amount
    pub fn total(&self) -> Money {
        self.applied_fees + self.applied_interest + self.applied_principal + self.prepayment_credit
    }
}

/// the payment allocation engine
///
/// Splits an incoming payment across the unpaid bills of an allocation
/// group in fee -> interest -> principal order, posts the ledger entries,
/// then slides the same total into the EMI schedule.
pub struct PaymentAllocator {
    waterfall: Waterfall,
}

impl PaymentAllocator {
    pub fn new(waterfall: Waterfall) -> Self {
        Self { waterfall }
    }

    #[instrument(skip(self, book, payment), fields(amount = %payment.amount))]
    pub fn allocate(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        payment: &PaymentRequest,
    ) -> Result<AllocationResult> {
        if !payment.amount.is_positive() {
            return Err(LedgerError::InvalidPaymentAmount {
                amount: payment.amount,
            });
        }
        let loan = book.loan(loan_id)?;
        if loan.status == LoanStatus::Completed {
            return Err(LedgerError::LoanNotActive {
                status: loan.status,
            });
        }
        let user_id = loan.user_id;
        let group = book.allocation_group(loan_id);

        let event_id = book.events.record(
            EventName::PaymentReceived,
            payment.effective_date,
            payment.amount,
            Some(loan_id),
            json!({ "payment_request_id": payment.id.to_string() }),
            &book.clock().clone(),
        );
        let event = book.events.get(event_id).expect("just recorded").clone();

        // unpaid bills across the whole group, oldest statement first
        let mut bills: Vec<BillId> = Vec::new();
        for &member in &group {
            bills.extend(book.unpaid_bills(member));
        }
        bills.sort_by_key(|id| book.bill(*id).map(|b| b.start_date).unwrap_or_default());

        let mut result = AllocationResult {
            payment_ref: payment.id,
            ..AllocationResult::default()
        };
        let mut remaining = payment.amount;

        for kind in &self.waterfall.fee_priority {
            let applied = self.run_tier(
                book,
                &event,
                payment.id,
                &bills,
                user_id,
                Tier::Fee(*kind),
                &mut remaining,
            )?;
            result.applied_fees += applied;
        }
        result.applied_interest = self.run_tier(
            book,
            &event,
            payment.id,
            &bills,
            user_id,
            Tier::Interest,
            &mut remaining,
        )?;
        result.applied_principal = self.run_tier(
            book,
            &event,
            payment.id,
            &bills,
            user_id,
            Tier::Principal,
            &mut remaining,
        )?;

        // anything beyond the total outstanding is held as a credit
        if remaining.is_positive() {
            result.prepayment_credit = remaining;
            book.ledger.post(
                &event,
                AccountKey::payment_clearing(user_id),
                AccountKey::prepayment_credit(loan_id),
                remaining,
            )?;
            book.payments.record_split(
                payment.id,
                loan_id,
                None,
                SplitComponent::PrepaymentCredit,
                remaining,
            );
            result.recovered = self.recover_write_off(book, loan_id, payment)?;
        }

        if result.total() != payment.amount {
            return Err(LedgerError::WaterfallImbalance {
                input: payment.amount,
                applied: result.total(),
            });
        }

        // mirror the same total into the schedule
        slide::slide_into_instalments(
            book,
            &group,
            payment.amount,
            payment.effective_date,
            payment.id,
        );

        result.loan_closed = self.settle_cleared_loans(book, &group, payment)?;

        // a loan whose minimum is satisfied again stops being delinquent
        for &member in &group {
            let minimum_clear = book
                .bills_for(member)
                .iter()
                .filter(|b| b.is_generated)
                .all(|b| book.minimum_due(b.id).is_zero());
            if minimum_clear {
                book.loan_mut(member)?.clear_dpd();
            }
        }

        info!(
            loan = %loan_id,
            fees = %result.applied_fees,
            interest = %result.applied_interest,
            principal = %result.applied_principal,
            credit = %result.prepayment_credit,
            "payment allocated"
        );
        Ok(result)
    }

    /// consume one tier of the waterfall across all bills
    ///
    /// When the running amount cannot cover the tier, bills share pro-rata
    /// by outstanding, with the rounding residue on the oldest bill.
    #[allow(clippy::too_many_arguments)]
    fn run_tier(
        &self,
        book: &mut LoanBook,
        event: &crate::events::TriggerEvent,
        payment_ref: Uuid,
        bills: &[BillId],
        user_id: Uuid,
        tier: Tier,
        remaining: &mut Money,
    ) -> Result<Money> {
        if remaining.is_zero() {
            return Ok(Money::ZERO);
        }
        let outstanding: Vec<Money> = bills
            .iter()
            .map(|&b| tier.outstanding(book, b))
            .collect();
        let tier_total: Money = outstanding.iter().copied().sum();
        if tier_total.is_zero() {
            return Ok(Money::ZERO);
        }

        let take = (*remaining).min(tier_total);
        let mut shares = if take == tier_total {
            outstanding.clone()
        } else {
            let mut shares = take.split_prorata(&outstanding);
            // the truncation residue may nudge a share past its bill's
            // outstanding; push the overflow to the next bill with headroom
            for i in 0..shares.len() {
                let over = shares[i] - outstanding[i];
                if over.is_positive() {
                    shares[i] = outstanding[i];
                    if i + 1 < shares.len() {
                        shares[i + 1] += over;
                    }
                }
            }
            shares
        };
        // zero-outstanding bills take no part of the tier
        for (share, cap) in shares.iter_mut().zip(outstanding.iter()) {
            if cap.is_zero() {
                *share = Money::ZERO;
            }
        }

        let mut applied = Money::ZERO;
        for (&bill_id, share) in bills.iter().zip(shares) {
            if !share.is_positive() {
                continue;
            }
            let loan_id = book.bill(bill_id)?.loan_id;
            book.ledger.post(
                event,
                AccountKey::payment_clearing(user_id),
                tier.receivable(bill_id),
                share,
            )?;
            self.reduce_due_books(book, event, bill_id, share)?;
            if let Tier::Fee(kind) = tier {
                self.settle_fees(book, bill_id, kind, share);
            }
            book.payments.record_split(
                payment_ref,
                loan_id,
                Some(bill_id),
                tier.component(),
                share,
            );
            applied += share;
            *remaining -= share;
        }
        Ok(applied)
    }

    /// a payment against any component also works down the bill's minimum
    /// and maximum due books
    fn reduce_due_books(
        &self,
        book: &mut LoanBook,
        event: &crate::events::TriggerEvent,
        bill_id: BillId,
        amount: Money,
    ) -> Result<()> {
        let min_cut = amount.min(book.minimum_due(bill_id));
        if min_cut.is_positive() {
            book.ledger.post(
                event,
                AccountKey::minimum_due(bill_id),
                AccountKey::due_control(bill_id),
                min_cut,
            )?;
        }
        let max_cut = amount.min(book.maximum_due(bill_id));
        if max_cut.is_positive() {
            book.ledger.post(
                event,
                AccountKey::maximum_due(bill_id),
                AccountKey::due_control(bill_id),
                max_cut,
            )?;
        }
        Ok(())
    }

    /// mark fee records paid as their receivable clears, oldest first
    ///
    /// The non-late kinds share one receivable book, so the ATM tier
    /// settles all of them.
    fn settle_fees(&self, book: &mut LoanBook, bill_id: BillId, kind: FeeKind, mut amount: Money) {
        let covered: &[FeeKind] = match kind {
            FeeKind::LateFee => &[FeeKind::LateFee],
            _ => &[
                FeeKind::AtmFee,
                FeeKind::ResetJoiningFee,
                FeeKind::CardReloadFee,
            ],
        };
        let mut fee_ids: Vec<Uuid> = book
            .fees
            .iter()
            .filter(|f| f.bill_id == Some(bill_id) && covered.contains(&f.kind) && f.is_unpaid())
            .map(|f| f.id)
            .collect();
        fee_ids.sort_by_key(|id| {
            book.fees
                .iter()
                .find(|f| f.id == *id)
                .map(|f| f.charged_on)
                .unwrap_or_default()
        });
        for id in fee_ids {
            if amount.is_zero() {
                break;
            }
            let fee = book
                .fees
                .iter_mut()
                .find(|f| f.id == id)
                .expect("fee id just collected");
            if amount >= fee.amount {
                amount -= fee.amount;
                fee.status = FeeStatus::Paid;
            } else {
                break;
            }
        }
    }

    /// a prepayment credit on a written-off loan recovers the expense
    fn recover_write_off(
        &self,
        book: &mut LoanBook,
        loan_id: LoanId,
        payment: &PaymentRequest,
    ) -> Result<Money> {
        let written_off = book.written_off_balance(loan_id);
        let credit = book
            .ledger
            .balance(&AccountKey::prepayment_credit(loan_id))
            .max(Money::ZERO);
        let recover = written_off.min(credit);
        if !recover.is_positive() {
            return Ok(Money::ZERO);
        }

        let event_id = book.events.record(
            EventName::WriteOffRecovery,
            payment.effective_date,
            recover,
            Some(loan_id),
            json!({ "payment_request_id": payment.id.to_string() }),
            &book.clock().clone(),
        );
        let event = book.events.get(event_id).expect("just recorded").clone();
        book.ledger.post(
            &event,
            AccountKey::prepayment_credit(loan_id),
            AccountKey::write_off_expense(loan_id),
            recover,
        )?;
        info!(loan = %loan_id, amount = %recover, "write-off recovered");
        Ok(recover)
    }

    /// settle loans the payment fully extinguished
    ///
    /// A loan cleared ahead of its schedule is closed out (future rows
    /// zeroed); one cleared on its last instalment just completes.
    fn settle_cleared_loans(
        &self,
        book: &mut LoanBook,
        group: &[LoanId],
        payment: &PaymentRequest,
    ) -> Result<bool> {
        let mut closed = false;
        for &member in group {
            if !book.loan(member)?.is_active() {
                continue;
            }
            let all_clear = book
                .bills_for(member)
                .iter()
                .filter(|b| b.is_generated)
                .all(|b| book.bill_outstanding(b.id).is_clear());
            if !all_clear || book.bills_for(member).is_empty() {
                continue;
            }
            let has_future_dues = book
                .schedule
                .loan_bill_rows(member)
                .iter()
                .any(|r| !r.is_paid() && r.outstanding().is_positive());
            if has_future_dues {
                book.close_loan(member, payment.effective_date)?;
                closed = true;
            } else if !book.schedule.loan_bill_rows(member).is_empty() {
                let loan = book.loan_mut(member)?;
                loan.status = LoanStatus::Completed;
                loan.clear_dpd();
                closed = true;
            }
        }
        Ok(closed)
    }
}

#[derive(Debug, Clone, Copy)]
enum Tier {
    Fee(FeeKind),
    Interest,
    Principal,
}

impl Tier {
    fn outstanding(&self, book: &LoanBook, bill_id: BillId) -> Money {
        let out = book.bill_outstanding(bill_id);
        match self {
            Tier::Fee(FeeKind::AtmFee) => out.atm_fee,
            Tier::Fee(_) => out.late_fee,
            Tier::Interest => out.interest,
            Tier::Principal => out.principal,
        }
    }

    fn receivable(&self, bill_id: BillId) -> AccountKey {
        match self {
            Tier::Fee(FeeKind::AtmFee) => AccountKey::atm_fee_receivable(bill_id),
            Tier::Fee(_) => AccountKey::late_fee_receivable(bill_id),
            Tier::Interest => AccountKey::interest_receivable(bill_id),
            Tier::Principal => AccountKey::principal_receivable(bill_id),
        }
    }

    fn component(&self) -> SplitComponent {
        match self {
            Tier::Fee(FeeKind::AtmFee) => SplitComponent::AtmFee,
            Tier::Fee(_) => SplitComponent::LateFee,
            Tier::Interest => SplitComponent::Interest,
            Tier::Principal => SplitComponent::Principal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Rate;
    use crate::payments::PaymentKind;
    use crate::products::ProductSpec;
    use chrono::NaiveDate;
    use hourglass_rs::{SafeTimeProvider, TimeSource};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn pay(amount: &str, date: NaiveDate) -> PaymentRequest {
        PaymentRequest {
            id: Uuid::new_v4(),
            amount: Money::from_str_exact(amount).unwrap(),
            effective_date: date,
            kind: PaymentKind::Payment,
        }
    }

    fn card_book() -> (LoanBook, LoanId) {
        let mut book = LoanBook::new(SafeTimeProvider::new(TimeSource::Test(chrono::Utc::now())));
        let product = ProductSpec::revolving_card(Rate::from_percentage(3));
        let loan_id = book.originate(Uuid::new_v4(), Uuid::new_v4(), product, d(2024, 1, 1));
        (book, loan_id)
    }

    #[test]
    fn test_minimum_due_walkthrough() {
        // principal 1000 swiped on day 8, billed; minimum due is
        // instalment + interest; a partial 100 leaves 930 principal and a
        // 13.33 minimum; the late fine adds 100 to both books; paying the
        // remaining 113.33 clears everything and banks the fine
        let (mut book, loan_id) = card_book();
        let bill_id = book
            .record_swipe(loan_id, Money::from_major(1000), d(2024, 1, 8), "grocer", false)
            .unwrap();
        book.generate_bill(loan_id, d(2024, 2, 1)).unwrap();
        book.accrue_interest(bill_id, d(2024, 2, 1)).unwrap();

        assert_eq!(book.minimum_due(bill_id), Money::from_str_exact("113.33").unwrap());

        let allocator = PaymentAllocator::new(Waterfall::standard());
        let partial = pay("100", d(2024, 2, 10));
        let result = allocator.allocate(&mut book, loan_id, &partial).unwrap();

        // interest first, the rest into principal
        assert_eq!(result.applied_interest, Money::from_major(30));
        assert_eq!(result.applied_principal, Money::from_major(70));
        assert_eq!(
            book.ledger.balance(&AccountKey::principal_receivable(bill_id)),
            Money::from_major(930)
        );
        assert_eq!(book.minimum_due(bill_id), Money::from_str_exact("13.33").unwrap());

        // the fine joins the minimum
        book.accrue_late_fine(bill_id, book.bill(bill_id).unwrap().due_date)
            .unwrap();
        assert_eq!(
            book.ledger.balance(&AccountKey::late_fee_receivable(bill_id)),
            Money::from_major(100)
        );
        assert_eq!(book.minimum_due(bill_id), Money::from_str_exact("113.33").unwrap());

        // clearing the minimum clears the fine and banks its revenue
        let rest = pay("113.33", d(2024, 2, 20));
        let result = allocator.allocate(&mut book, loan_id, &rest).unwrap();
        assert_eq!(result.applied_fees, Money::from_major(100));
        assert_eq!(book.minimum_due(bill_id), Money::ZERO);
        assert_eq!(
            book.ledger.balance(&AccountKey::late_fee_receivable(bill_id)),
            Money::ZERO
        );
        assert_eq!(
            book.ledger.balance(&AccountKey::late_fee_earned(bill_id)),
            Money::from_major(100)
        );
        assert_eq!(
            book.ledger.balance(&AccountKey::principal_receivable(bill_id)),
            Money::from_str_exact("916.67").unwrap()
        );
    }

    #[test]
    fn test_two_bills_settle_oldest_first() {
        // bills of 1000 and 2000 with 30 and 60 of accrued interest: paying
        // the exact total must clear the earlier bill entirely, not strand
        // residue on it
        let (mut book, loan_id) = card_book();
        let first = book
            .record_swipe(loan_id, Money::from_major(1000), d(2024, 1, 8), "one", false)
            .unwrap();
        book.generate_bill(loan_id, d(2024, 2, 1)).unwrap();
        book.accrue_interest(first, d(2024, 2, 1)).unwrap();

        let second = book
            .record_swipe(loan_id, Money::from_major(2000), d(2024, 2, 10), "two", false)
            .unwrap();
        book.generate_bill(loan_id, d(2024, 3, 1)).unwrap();
        book.accrue_interest(second, d(2024, 3, 1)).unwrap();

        let allocator = PaymentAllocator::new(Waterfall::standard());
        let result = allocator
            .allocate(&mut book, loan_id, &pay("3090", d(2024, 3, 5)))
            .unwrap();

        assert_eq!(result.applied_interest, Money::from_major(90));
        assert_eq!(result.applied_principal, Money::from_major(3000));
        assert_eq!(result.prepayment_credit, Money::ZERO);
        assert!(book.bill_outstanding(first).is_clear());
        assert!(book.bill_outstanding(second).is_clear());
    }

    #[test]
    fn test_partial_interest_tier_is_prorata_oldest_residue() {
        let (mut book, loan_id) = card_book();
        let first = book
            .record_swipe(loan_id, Money::from_major(1000), d(2024, 1, 8), "one", false)
            .unwrap();
        book.generate_bill(loan_id, d(2024, 2, 1)).unwrap();
        book.accrue_interest(first, d(2024, 2, 1)).unwrap();

        let second = book
            .record_swipe(loan_id, Money::from_major(2000), d(2024, 2, 10), "two", false)
            .unwrap();
        book.generate_bill(loan_id, d(2024, 3, 1)).unwrap();
        book.accrue_interest(second, d(2024, 3, 1)).unwrap();

        // 45 against 30 + 60 of interest splits 15/30 by outstanding
        let allocator = PaymentAllocator::new(Waterfall::standard());
        let result = allocator
            .allocate(&mut book, loan_id, &pay("45", d(2024, 3, 5)))
            .unwrap();

        assert_eq!(result.applied_interest, Money::from_major(45));
        assert_eq!(
            book.ledger.balance(&AccountKey::interest_receivable(first)),
            Money::from_major(15)
        );
        assert_eq!(
            book.ledger.balance(&AccountKey::interest_receivable(second)),
            Money::from_major(30)
        );
    }

    #[test]
    fn test_payment_conservation_with_excess() {
        let (mut book, loan_id) = card_book();
        let bill_id = book
            .record_swipe(loan_id, Money::from_major(100), d(2024, 1, 8), "one", false)
            .unwrap();
        book.generate_bill(loan_id, d(2024, 2, 1)).unwrap();
        book.accrue_interest(bill_id, d(2024, 2, 1)).unwrap();

        let allocator = PaymentAllocator::new(Waterfall::standard());
        let payment = pay("500", d(2024, 2, 10));
        let result = allocator.allocate(&mut book, loan_id, &payment).unwrap();

        // no money created or destroyed
        assert_eq!(result.total(), payment.amount);
        assert_eq!(result.applied_interest, Money::from_major(3));
        assert_eq!(result.applied_principal, Money::from_major(100));
        assert_eq!(result.prepayment_credit, Money::from_major(397));
        assert_eq!(
            book.ledger.balance(&AccountKey::prepayment_credit(loan_id)),
            Money::from_major(397)
        );
        // the clearing account saw exactly the input amount
        let user = book.loan(loan_id).unwrap().user_id;
        assert_eq!(
            book.ledger.balance(&AccountKey::payment_clearing(user)),
            payment.amount
        );
    }

    #[test]
    fn test_overpayment_recovers_write_off() {
        let (mut book, loan_id) = card_book();
        book.record_swipe(loan_id, Money::from_major(1000), d(2024, 1, 8), "one", false)
            .unwrap();
        book.generate_bill(loan_id, d(2024, 2, 1)).unwrap();

        let written_off = book.write_off(loan_id, d(2024, 6, 1)).unwrap();
        assert_eq!(written_off, Money::from_major(1000));
        assert_eq!(book.written_off_balance(loan_id), Money::from_major(1000));

        let allocator = PaymentAllocator::new(Waterfall::standard());
        let result = allocator
            .allocate(&mut book, loan_id, &pay("400", d(2024, 7, 1)))
            .unwrap();

        assert_eq!(result.prepayment_credit, Money::from_major(400));
        assert_eq!(result.recovered, Money::from_major(400));
        assert_eq!(book.written_off_balance(loan_id), Money::from_major(600));
    }

    #[test]
    fn test_full_early_payoff_closes_the_loan() {
        let (mut book, loan_id) = card_book();
        let bill_id = book
            .record_swipe(loan_id, Money::from_major(1000), d(2024, 1, 8), "one", false)
            .unwrap();
        book.generate_bill(loan_id, d(2024, 2, 1)).unwrap();
        book.accrue_interest(bill_id, d(2024, 2, 1)).unwrap();

        let allocator = PaymentAllocator::new(Waterfall::standard());
        let result = allocator
            .allocate(&mut book, loan_id, &pay("1030", d(2024, 2, 10)))
            .unwrap();

        assert!(result.loan_closed);
        assert_eq!(
            book.loan(loan_id).unwrap().status,
            LoanStatus::Completed
        );
        assert!(book.bill_outstanding(bill_id).is_clear());
    }

    #[test]
    fn test_zero_payment_is_rejected() {
        let (mut book, loan_id) = card_book();
        let allocator = PaymentAllocator::new(Waterfall::standard());
        let result = allocator.allocate(&mut book, loan_id, &pay("0", d(2024, 2, 10)));
        assert!(matches!(
            result,
            Err(LedgerError::InvalidPaymentAmount { .. })
        ));
    }
}
