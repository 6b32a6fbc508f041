//! Error taxonomy for the economy ledger
//!
//! Business-rule violations are typed and recoverable; storage failures are
//! wrapped so callers never see a raw backend error. `Timeout` and `Conflict`
//! are the only kinds a caller may retry unchanged.

use crate::types::AccountId;
use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

/// Result type for economy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Economy ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Account has no ledger presence
    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    /// Sender balance cannot cover the requested amount
    #[error("insufficient balance: account {account} has {balance}, needs {required}")]
    InsufficientBalance {
        /// Account that failed the solvency check
        account: AccountId,
        /// Balance at check time
        balance: u64,
        /// Amount the operation required
        required: u64,
    },

    /// Rolling-window outbound transfer cap would be exceeded
    #[error(
        "daily transfer limit exceeded for {account}: {spent} already sent, {attempted} requested, cap {limit}"
    )]
    TransferLimitExceeded {
        /// Sending account
        account: AccountId,
        /// Outbound total already inside the window
        spent: u64,
        /// Amount of the rejected transfer
        attempted: u64,
        /// Configured cap
        limit: u64,
    },

    /// Shop item does not exist
    #[error("item not found: {0}")]
    ItemNotFound(Uuid),

    /// Item exists but is not purchasable
    #[error("item not available: {0}")]
    ItemNotAvailable(Uuid),

    /// Finite stock cannot cover the requested quantity
    #[error("item out of stock: {item} has {stock} left, requested {requested}")]
    ItemOutOfStock {
        /// Item that ran out
        item: Uuid,
        /// Stock remaining at check time
        stock: u32,
        /// Quantity requested
        requested: u32,
    },

    /// Malformed movement: self-transfer, zero amount, arithmetic overflow,
    /// or failed re-validation at trade settlement
    #[error("invalid transfer: {0}")]
    InvalidTransfer(String),

    /// Daily reward already granted for this calendar day
    #[error("daily reward already claimed by {account} on {claim_date}")]
    AlreadyClaimed {
        /// Claiming competitor
        account: AccountId,
        /// Calendar day in the reference timezone
        claim_date: NaiveDate,
    },

    /// Operation not permitted in the entity's current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Caller is not permitted to act on this entity
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Unit of work exceeded its time budget; nothing was applied
    #[error("operation timed out before execution")]
    Timeout,

    /// Concurrent modification detected at commit time
    #[error("conflict: {0}")]
    Conflict(String),

    /// Shop does not exist
    #[error("shop not found: {0}")]
    ShopNotFound(Uuid),

    /// Trade does not exist
    #[error("trade not found: {0}")]
    TradeNotFound(Uuid),

    /// Inventory grant does not exist
    #[error("grant not found: {0}")]
    GrantNotFound(Uuid),

    /// Ledger transaction does not exist
    #[error("transaction not found: {0}")]
    TransactionNotFound(Uuid),

    /// Storage error (RocksDB)
    #[error("storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Actor mailbox or response channel failure
    #[error("concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller may retry the operation unchanged, with backoff.
    ///
    /// Every other kind requires changing the request (adding funds, picking
    /// another item) before a retry can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout | Error::Conflict(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::Timeout.is_retryable());
        assert!(Error::Conflict("version changed".to_string()).is_retryable());
        assert!(!Error::InvalidTransfer("self transfer".to_string()).is_retryable());
        assert!(!Error::InsufficientBalance {
            account: AccountId::new("alice"),
            balance: 10,
            required: 60,
        }
        .is_retryable());
    }

    #[test]
    fn test_display_carries_amounts() {
        let err = Error::TransferLimitExceeded {
            account: AccountId::new("alice"),
            spent: 60,
            attempted: 50,
            limit: 100,
        };
        let text = err.to_string();
        assert!(text.contains("60"));
        assert!(text.contains("50"));
        assert!(text.contains("100"));
    }
}
