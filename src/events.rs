use chrono::{DateTime, NaiveDate, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::decimal::Money;
use crate::loans::LoanId;

pub type EventId = Uuid;

/// taxonomy of business occurrences that move the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventName {
    Swipe,
    BillGenerate,
    AccrueInterest,
    AccrueLateFine,
    FeeCharge,
    PaymentReceived,
    Refund,
    ReverseInterestCharges,
    ReverseLateFine,
    MoratoriumApply,
    TenureExtend,
    LoanClose,
    WriteOff,
    WriteOffRecovery,
}

/// one immutable business occurrence
///
/// Every ledger entry references exactly one of these. `amount` is a
/// convenience denormalization of the net effect; the entries are
/// authoritative. `post_date` is the business-effective date and may differ
/// arbitrarily from `recorded_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub id: EventId,
    pub name: EventName,
    pub post_date: NaiveDate,
    pub amount: Money,
    pub loan_id: Option<LoanId>,
    pub metadata: Value,
    pub recorded_at: DateTime<Utc>,
}

/// append-only log of trigger events
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<TriggerEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    /// record an event, returning its durable id before any entry
    /// referencing it is created
    pub fn record(
        &mut self,
        name: EventName,
        post_date: NaiveDate,
        amount: Money,
        loan_id: Option<LoanId>,
        metadata: Value,
        time: &SafeTimeProvider,
    ) -> EventId {
        let id = Uuid::new_v4();
        self.events.push(TriggerEvent {
            id,
            name,
            post_date,
            amount,
            loan_id,
            metadata,
            recorded_at: time.now(),
        });
        id
    }

    /// update the denormalized net amount once the entries are posted
    pub fn set_amount(&mut self, id: EventId, amount: Money) {
        if let Some(event) = self.events.iter_mut().find(|e| e.id == id) {
            event.amount = amount;
        }
    }

    pub fn get(&self, id: EventId) -> Option<&TriggerEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn events(&self) -> &[TriggerEvent] {
        &self.events
    }

    /// events for a loan with the given name, ordered by post date
    pub fn for_loan(&self, loan_id: LoanId, name: EventName) -> Vec<&TriggerEvent> {
        let mut found: Vec<&TriggerEvent> = self
            .events
            .iter()
            .filter(|e| e.loan_id == Some(loan_id) && e.name == name)
            .collect();
        found.sort_by_key(|e| e.post_date);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hourglass_rs::TimeSource;
    use serde_json::json;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_record_returns_durable_id() {
        let time = SafeTimeProvider::new(TimeSource::Test(Utc::now()));
        let mut log = EventLog::new();
        let loan_id = Uuid::new_v4();

        let id = log.record(
            EventName::BillGenerate,
            d(2024, 2, 1),
            Money::from_major(1000),
            Some(loan_id),
            json!({"bill": "b-1"}),
            &time,
        );

        let event = log.get(id).unwrap();
        assert_eq!(event.name, EventName::BillGenerate);
        assert_eq!(event.post_date, d(2024, 2, 1));
        assert_eq!(event.metadata["bill"], "b-1");
    }

    #[test]
    fn test_for_loan_orders_by_post_date() {
        let time = SafeTimeProvider::new(TimeSource::Test(Utc::now()));
        let mut log = EventLog::new();
        let loan_id = Uuid::new_v4();

        // recorded out of business order
        log.record(
            EventName::AccrueInterest,
            d(2024, 3, 1),
            Money::from_major(30),
            Some(loan_id),
            Value::Null,
            &time,
        );
        log.record(
            EventName::AccrueInterest,
            d(2024, 2, 1),
            Money::from_major(30),
            Some(loan_id),
            Value::Null,
            &time,
        );

        let found = log.for_loan(loan_id, EventName::AccrueInterest);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].post_date, d(2024, 2, 1));
        assert_eq!(found[1].post_date, d(2024, 3, 1));
    }

    #[test]
    fn test_set_amount_updates_denormalized_net() {
        let time = SafeTimeProvider::new(TimeSource::Test(Utc::now()));
        let mut log = EventLog::new();

        let id = log.record(
            EventName::PaymentReceived,
            d(2024, 2, 20),
            Money::ZERO,
            None,
            Value::Null,
            &time,
        );
        log.set_amount(id, Money::from_major(113));
        assert_eq!(log.get(id).unwrap().amount, Money::from_major(113));
    }
}
