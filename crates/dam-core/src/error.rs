use thiserror::Error;

use crate::access::Action;
use crate::ledger::LedgerError;
use crate::storage::LayoutConflict;
use crate::types::Amount;

/// Canonical error type returned by every market operation.
///
/// Each variant is terminal for the call that produced it: nothing the call
/// touched has been committed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MarketError {
    /// Caller lacks the role the action requires.
    #[error("{}", .0.denial_reason())]
    Unauthorized(Action),

    /// Index does not reference an existing asset.
    #[error("The asset reference is not valid!")]
    InvalidReference { index: u64 },

    /// Attached payment differs from the asset price.
    #[error("Value and price are different!")]
    ValueMismatch { expected: Amount, actual: Amount },

    /// Asset has already left the `ForSale` state.
    #[error("This item is not for sale!")]
    NotForSale { index: u64 },

    /// Withdrawal exceeds the market balance.
    #[error("Not enough money!")]
    InsufficientFunds { requested: Amount, available: Amount },

    /// `initialize` ran before on this storage.
    #[error("market is already initialized")]
    AlreadyInitialized,

    /// Mutating call against storage that was never initialized.
    #[error("market is not initialized")]
    NotInitialized,

    /// Share percent outside `[0, 100]` while strict validation is enabled.
    #[error("share percent {0} is outside 0..=100")]
    InvalidSharePercent(u32),

    /// Buyer could not fund the attached payment.
    #[error("payment failed: {0}")]
    PaymentFailed(LedgerError),

    /// Outbound transfer to the owner was rejected; balance left untouched.
    #[error("transfer failed: {0}")]
    TransferFailed(LedgerError),

    /// The market's own escrow account tried to pay for an asset.
    #[error("the market escrow account cannot buy assets")]
    EscrowBuyer,

    /// Crediting the market balance would overflow.
    #[error("market balance overflow")]
    BalanceOverflow,

    /// The active logic version does not expose the operation.
    #[error("operation `{0}` is not supported by the active logic version")]
    UnsupportedOperation(&'static str),

    /// Proposed logic is not strictly newer than the active one.
    #[error("logic version {proposed} cannot replace version {current}")]
    VersionMismatch { current: u32, proposed: u32 },

    /// Proposed logic does not extend the active storage layout.
    #[error("incompatible storage layout: {0}")]
    IncompatibleLayout(LayoutConflict),
}

/// Failure to parse a decimal amount.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnitsError {
    #[error("empty amount")]
    Empty,
    #[error("invalid digit in amount `{0}`")]
    InvalidDigit(String),
    #[error("amount `{0}` has more than 18 fractional digits")]
    TooPrecise(String),
    #[error("amount `{0}` overflows")]
    Overflow(String),
}
