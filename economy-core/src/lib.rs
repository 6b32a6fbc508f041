//! Economy ledger engine for a competitive-gaming virtual currency
//!
//! Balance accounting, peer-to-peer transfers, shop purchases against finite
//! stock, two-party trades with atomic settlement, and idempotent daily
//! rewards — all under concurrent access.
//!
//! # Architecture
//!
//! - **Materialized balances**: every ledger insert updates the account row
//!   in the same atomic batch, so balances and the transaction log can never
//!   disagree
//! - **Single writer**: one actor task serializes all mutating units of work,
//!   eliminating lost updates and lock-ordering deadlocks
//! - **Append-only ledger**: transactions are immutable once committed
//! - **Injected collaborators**: cache invalidation is a capability passed in
//!   at construction, not a process global
//!
//! # Invariants
//!
//! - Non-negativity: no reachable state holds a negative balance
//! - Conservation: transfers and trade settlements move value, they never
//!   create or destroy it
//! - All-or-nothing: a failed operation leaves the ledger exactly as it was

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod actor;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod storage;
pub mod types;

// Re-exports
pub use cache::{CacheInvalidator, InMemoryCache, NoopInvalidator};
pub use config::{Config, EconomyRules};
pub use engine::Economy;
pub use error::{Error, Result};
pub use types::{
    AccountId, Balance, CurrencyAccount, DailyRewardClaim, InventoryGrant, LedgerTransaction,
    NewItem, PurchaseReceipt, RewardGrant, Shop, ShopItem, Trade, TradeItemLeg, TradeOffer,
    TradeOutcome, TradeStatus, TransactionKind,
};
