use chrono::NaiveDate;
use thiserror::Error;

use crate::decimal::Money;
use crate::loans::{BillId, LoanId, LoanStatus};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("posting amount must be positive: {amount}")]
    NonPositivePosting { amount: Money },

    #[error("unknown loan: {id}")]
    UnknownLoan { id: LoanId },

    #[error("unknown bill: {id}")]
    UnknownBill { id: BillId },

    #[error("bill already generated: {id}")]
    BillAlreadyGenerated { id: BillId },

    #[error("no bill covers transaction date {date}")]
    NoCoveringBill { date: NaiveDate },

    #[error("loan not active: current status is {status:?}")]
    LoanNotActive { status: LoanStatus },

    #[error("invalid payment amount: {amount}")]
    InvalidPaymentAmount { amount: Money },

    #[error("invalid tenure: {tenure}")]
    InvalidTenure { tenure: u32 },

    #[error("invalid moratorium window: {start} to {end}")]
    InvalidMoratoriumWindow { start: NaiveDate, end: NaiveDate },

    #[error("invalid date: {message}")]
    InvalidDate { message: String },

    #[error("nothing written off for loan {id}")]
    NothingWrittenOff { id: LoanId },

    // a nonzero leftover after a full re-slide means attribution was lost;
    // the enclosing unit of work must abort
    #[error("allocation remainder not zero: {remainder} left after re-slide")]
    AllocationRemainder { remainder: Money },

    #[error("waterfall out of balance: input {input}, applied {applied}")]
    WaterfallImbalance { input: Money, applied: Money },

    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },
}

pub type Result<T> = std::result::Result<T, LedgerError>;
