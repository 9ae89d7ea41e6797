use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::decimal::{Money, Rate};

/// product families shipped with the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductKind {
    RevolvingCard,
    SecuredCard,
    TermLoan,
}

/// how interest is computed over the schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterestType {
    /// rate on the billed principal every period
    Flat,
    /// rate on the declining balance
    Reducing,
}

/// due-date placement rule
///
/// Products differ only in where instalment due dates land; everything else
/// about the schedule is shared. Each family supplies one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DueDateRule {
    /// fixed day-of-month anchor, first due the month after amortization
    DayOfMonth(u32),
    /// snap to the 1st or 15th bucket nearest after the amortization day
    FirstOrFifteenth,
    /// literal month increments from the amortization date
    MonthlyFromActivation,
}

impl DueDateRule {
    /// due date for instalment `seq` (1-based) of a loan amortizing at
    /// `amortization_date`
    pub fn due_date(&self, seq: u32, amortization_date: NaiveDate) -> NaiveDate {
        match self {
            DueDateRule::DayOfMonth(day) => {
                let anchored = with_day_clamped(amortization_date, *day);
                add_months(anchored, seq)
            }
            DueDateRule::FirstOrFifteenth => {
                let first_due = if amortization_date.day() < 15 {
                    with_day_clamped(amortization_date, 15)
                } else {
                    with_day_clamped(add_months(amortization_date, 1), 1)
                };
                add_months(first_due, seq - 1)
            }
            DueDateRule::MonthlyFromActivation => add_months(amortization_date, seq),
        }
    }
}

/// capability bundle for one loan/card product
///
/// Replaces a subtype hierarchy with a closed set of tagged variants: the
/// schedule offset, the interest style and the origination parameters travel
/// together and the engine depends on nothing else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSpec {
    pub kind: ProductKind,
    pub due_date_rule: DueDateRule,
    pub interest_type: InterestType,
    pub monthly_rate: Rate,
    pub tenure: u32,
    pub downpayment_rate: Rate,
    /// days from bill close to bill due date
    pub grace_days: i64,
    /// flat late fine charged when the minimum goes unpaid past due date
    pub late_fee: Money,
    /// assessed once per generated bill when the product supports ATM draws
    pub atm_fee: Option<Money>,
}

impl ProductSpec {
    /// revolving card: flat interest, 12 instalments, due on the 15th
    pub fn revolving_card(monthly_rate: Rate) -> Self {
        Self {
            kind: ProductKind::RevolvingCard,
            due_date_rule: DueDateRule::FirstOrFifteenth,
            interest_type: InterestType::Flat,
            monthly_rate,
            tenure: 12,
            downpayment_rate: Rate::ZERO,
            grace_days: 15,
            late_fee: Money::from_major(100),
            atm_fee: Some(Money::from_major(50)),
        }
    }

    /// secured card: flat interest with a downpayment slice on instalment 1
    pub fn secured_card(monthly_rate: Rate, downpayment_rate: Rate) -> Self {
        Self {
            kind: ProductKind::SecuredCard,
            due_date_rule: DueDateRule::DayOfMonth(5),
            interest_type: InterestType::Flat,
            monthly_rate,
            tenure: 12,
            downpayment_rate,
            grace_days: 15,
            late_fee: Money::from_major(100),
            atm_fee: None,
        }
    }

    /// term loan: reducing balance over an explicit tenure
    pub fn term_loan(monthly_rate: Rate, tenure: u32) -> Self {
        Self {
            kind: ProductKind::TermLoan,
            due_date_rule: DueDateRule::MonthlyFromActivation,
            interest_type: InterestType::Reducing,
            monthly_rate,
            tenure,
            downpayment_rate: Rate::ZERO,
            grace_days: 0,
            late_fee: Money::from_major(250),
            atm_fee: None,
        }
    }

    pub fn charges_atm_fee(&self) -> bool {
        self.atm_fee.is_some()
    }
}

/// add whole months, clamping the day to the target month's length
pub fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    let total = date.year() * 12 + date.month0() as i32 + months as i32;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let day = date.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).expect("clamped day is valid")
}

/// replace the day component, clamping to the month's length
pub fn with_day_clamped(date: NaiveDate, day: u32) -> NaiveDate {
    let clamped = day.min(days_in_month(date.year(), date.month()));
    NaiveDate::from_ymd_opt(date.year(), date.month(), clamped).expect("clamped day is valid")
}

/// whole days from `start` to `end`
pub fn days_between(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days()
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 30,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

/// date shifted by whole days
pub fn shift_days(date: NaiveDate, days: i64) -> NaiveDate {
    date + Duration::days(days)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_add_months_clamps_day() {
        assert_eq!(add_months(d(2024, 1, 31), 1), d(2024, 2, 29));
        assert_eq!(add_months(d(2023, 1, 31), 1), d(2023, 2, 28));
        assert_eq!(add_months(d(2024, 11, 30), 3), d(2025, 2, 28));
    }

    #[test]
    fn test_day_of_month_rule() {
        let rule = DueDateRule::DayOfMonth(5);
        let amort = d(2024, 1, 8);
        assert_eq!(rule.due_date(1, amort), d(2024, 2, 5));
        assert_eq!(rule.due_date(3, amort), d(2024, 4, 5));
    }

    #[test]
    fn test_first_or_fifteenth_rule() {
        let rule = DueDateRule::FirstOrFifteenth;
        // amortizing before the 15th snaps to the 15th of the same month
        assert_eq!(rule.due_date(1, d(2024, 1, 8)), d(2024, 1, 15));
        assert_eq!(rule.due_date(2, d(2024, 1, 8)), d(2024, 2, 15));
        // on or after the 15th snaps to the 1st of the next month
        assert_eq!(rule.due_date(1, d(2024, 1, 20)), d(2024, 2, 1));
    }

    #[test]
    fn test_monthly_from_activation_rule() {
        let rule = DueDateRule::MonthlyFromActivation;
        assert_eq!(rule.due_date(1, d(2024, 3, 31)), d(2024, 4, 30));
        assert_eq!(rule.due_date(12, d(2024, 3, 31)), d(2025, 3, 31));
    }

    #[test]
    fn test_product_presets() {
        let card = ProductSpec::revolving_card(Rate::from_percentage(3));
        assert_eq!(card.interest_type, InterestType::Flat);
        assert!(card.charges_atm_fee());

        let loan = ProductSpec::term_loan(Rate::from_percentage(2), 24);
        assert_eq!(loan.interest_type, InterestType::Reducing);
        assert_eq!(loan.tenure, 24);
        assert!(!loan.charges_atm_fee());
    }
}
