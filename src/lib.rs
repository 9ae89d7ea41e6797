pub mod accrual;
pub mod billing;
pub mod book;
pub mod decimal;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod loans;
pub mod payments;
pub mod products;
pub mod reversal;
pub mod schedule;

// re-export key types
pub use accrual::{AccrualOutcome, SkipReason};
pub use book::{BillOutstanding, LoanBook};
pub use decimal::{Money, Rate};
pub use errors::{LedgerError, Result};
pub use events::{EventId, EventLog, EventName, TriggerEvent};
pub use ledger::{AccountClass, AccountKey, AccountName, Ledger, LedgerEntry, OwnerKind};
pub use loans::{
    Bill, BillId, Fee, FeeKind, FeeStatus, Loan, LoanId, LoanStatus, Moratorium,
    MoratoriumInterest, DPD_NOT_DELINQUENT,
};
pub use payments::{
    AllocationResult, PaymentAllocator, PaymentKind, PaymentLog, PaymentMapping, PaymentRequest,
    PaymentSplit, SplitComponent, Waterfall,
};
pub use products::{DueDateRule, InterestType, ProductKind, ProductSpec};
pub use reversal::{ReversalEngine, ReversalPolicy, ReversedAccrual};
pub use schedule::moratorium::MoratoriumOutcome;
pub use schedule::{EmiRow, PaymentStatus, RowStatus, ScheduleStore};

// re-export external dependencies that users will need
pub use chrono;
pub use hourglass_rs::{SafeTimeProvider, TimeSource};
pub use rust_decimal::Decimal;
pub use uuid::Uuid;
