//! Core types for the economy ledger
//!
//! All amounts are unsigned integers in the smallest currency unit; exactness
//! comes from integer arithmetic with checked mutations, and balances can
//! never go negative by construction.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Competitor account identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of currency movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TransactionKind {
    /// Peer-to-peer transfer
    Transfer = 1,
    /// Shop purchase (debit sink, no credited account)
    Purchase = 2,
    /// Daily reward grant (system credit, no debited account)
    DailyReward = 3,
    /// One leg of an accepted trade
    TradeSettlement = 4,
    /// Administrative reversal of a purchase
    Refund = 5,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::Transfer => "transfer",
            TransactionKind::Purchase => "purchase",
            TransactionKind::DailyReward => "daily_reward",
            TransactionKind::TradeSettlement => "trade_settlement",
            TransactionKind::Refund => "refund",
        };
        write!(f, "{}", name)
    }
}

/// Immutable ledger record of a single currency movement
///
/// `from_account` is `None` for system grants (rewards, refunds);
/// `to_account` is `None` for sinks (purchases). Rows are append-only and
/// never modified after commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Unique transaction ID (UUIDv7 for time-ordering)
    pub id: Uuid,

    /// Debited account, if any
    pub from_account: Option<AccountId>,

    /// Credited account, if any
    pub to_account: Option<AccountId>,

    /// Amount moved (always positive)
    pub amount: u64,

    /// Kind of movement
    pub kind: TransactionKind,

    /// Caller-supplied reason, kept for audit
    pub reason: String,

    /// Additional metadata (entity ids, linkage to reversed transactions)
    #[serde(default)]
    pub metadata: HashMap<String, String>,

    /// Commit timestamp
    pub created_at: DateTime<Utc>,
}

/// Materialized running balance for one competitor
///
/// Updated in the same atomic batch as every ledger insert touching the
/// account, so the row and the transaction log can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrencyAccount {
    /// Owning competitor
    pub account_id: AccountId,

    /// Current balance in smallest currency units
    pub balance: u64,

    /// Bumped on every mutation; guards against lost updates at commit
    pub version: u64,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl CurrencyAccount {
    /// Fresh zero-balance account; every competitor implicitly starts here
    pub fn new_empty(account_id: AccountId, now: DateTime<Utc>) -> Self {
        Self {
            account_id,
            balance: 0,
            version: 0,
            updated_at: now,
        }
    }

    /// Copy with `amount` debited; fails `InsufficientBalance` rather than
    /// ever going negative
    pub fn debited(&self, amount: u64, now: DateTime<Utc>) -> crate::Result<Self> {
        let balance = self.balance.checked_sub(amount).ok_or_else(|| {
            crate::Error::InsufficientBalance {
                account: self.account_id.clone(),
                balance: self.balance,
                required: amount,
            }
        })?;
        Ok(Self {
            account_id: self.account_id.clone(),
            balance,
            version: self.version + 1,
            updated_at: now,
        })
    }

    /// Copy with `amount` credited, checked against overflow
    pub fn credited(&self, amount: u64, now: DateTime<Utc>) -> crate::Result<Self> {
        let balance = self.balance.checked_add(amount).ok_or_else(|| {
            crate::Error::InvalidTransfer(format!(
                "crediting {} to {} would overflow the balance",
                amount, self.account_id
            ))
        })?;
        Ok(Self {
            account_id: self.account_id.clone(),
            balance,
            version: self.version + 1,
            updated_at: now,
        })
    }
}

/// Balance read returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balance {
    /// Account the balance belongs to
    pub account_id: AccountId,

    /// Current balance, never negative
    pub balance: u64,

    /// Configured smallest-unit display name
    pub currency_unit: String,
}

/// A shop grouping purchasable items
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    /// Unique shop ID
    pub shop_id: Uuid,

    /// Display name
    pub name: String,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// A purchasable item with finite or unlimited stock
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopItem {
    /// Unique item ID
    pub item_id: Uuid,

    /// Owning shop
    pub shop_id: Uuid,

    /// Display name
    pub name: String,

    /// Price per unit (always positive)
    pub price: u64,

    /// Remaining stock; `None` means unlimited
    pub stock: Option<u32>,

    /// Whether the item can currently be purchased
    pub is_available: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

/// Parameters for adding an item to a shop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewItem {
    /// Display name
    pub name: String,

    /// Price per unit
    pub price: u64,

    /// Initial stock; `None` means unlimited
    pub stock: Option<u32>,

    /// Whether the item is purchasable immediately
    pub is_available: bool,
}

/// Items held by a competitor as a result of a purchase or trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InventoryGrant {
    /// Unique grant ID
    pub grant_id: Uuid,

    /// Owning competitor
    pub competitor_id: AccountId,

    /// Item held
    pub item_id: Uuid,

    /// Quantity granted
    pub quantity: u32,

    /// Quantity consumed so far; never exceeds `quantity`
    pub used_quantity: u32,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl InventoryGrant {
    /// Unconsumed quantity remaining on this grant
    pub fn available(&self) -> u32 {
        self.quantity - self.used_quantity
    }
}

/// Result of a successful purchase, rich enough for the caller's audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseReceipt {
    /// The committed `Purchase` ledger row
    pub transaction: LedgerTransaction,

    /// Shop the item belongs to
    pub shop_id: Uuid,

    /// Purchased item
    pub item_id: Uuid,

    /// Units bought
    pub quantity: u32,

    /// Price per unit at purchase time
    pub unit_price: u64,

    /// Total debited (`unit_price * quantity`)
    pub total_cost: u64,

    /// Stock before the decrement (`None` for unlimited items)
    pub stock_before: Option<u32>,

    /// Stock after the decrement (`None` for unlimited items)
    pub stock_after: Option<u32>,

    /// Inventory grant created by this purchase
    pub grant: InventoryGrant,
}

/// One item leg of a trade offer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeItemLeg {
    /// Offered item
    pub item_id: Uuid,

    /// Offered quantity
    pub quantity: u32,
}

/// What one party puts on the table: currency, items, or both
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeOffer {
    /// Currency amount offered (0 for pure item trades)
    #[serde(default)]
    pub currency: u64,

    /// Item legs drawn from the offerer's inventory grants
    #[serde(default)]
    pub items: Vec<TradeItemLeg>,
}

impl TradeOffer {
    /// Offer consisting only of currency
    pub fn currency(amount: u64) -> Self {
        Self {
            currency: amount,
            items: Vec::new(),
        }
    }

    /// Offer consisting only of items
    pub fn items(items: Vec<TradeItemLeg>) -> Self {
        Self { currency: 0, items }
    }

    /// True when the offer moves nothing
    pub fn is_empty(&self) -> bool {
        self.currency == 0 && self.items.is_empty()
    }
}

/// Trade lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum TradeStatus {
    /// Awaiting the counterparty's response
    Pending = 1,
    /// Settled; both legs committed (terminal)
    Accepted = 2,
    /// Declined by the counterparty (terminal)
    Rejected = 3,
    /// Withdrawn before resolution (terminal)
    Cancelled = 4,
}

/// A two-party exchange proposal
///
/// Escrow is logical: nothing moves until the counterparty accepts and
/// settlement re-validates both sides against live state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Unique trade ID
    pub trade_id: Uuid,

    /// Proposing party
    pub initiator_id: AccountId,

    /// Party that must respond
    pub counterparty_id: AccountId,

    /// What the initiator gives up
    pub initiator_offer: TradeOffer,

    /// What the counterparty gives up
    pub counterparty_offer: TradeOffer,

    /// Current lifecycle status
    pub status: TradeStatus,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Set exactly once, when the trade leaves `Pending`
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Trade {
    /// Whether the trade has reached a terminal status
    pub fn is_resolved(&self) -> bool {
        !matches!(self.status, TradeStatus::Pending)
    }
}

/// Result of responding to a trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    /// The trade in its post-response state
    pub trade: Trade,

    /// Settlement ledger rows (empty unless the trade was accepted)
    pub settlement: Vec<LedgerTransaction>,
}

/// At-most-once-per-day reward claim marker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyRewardClaim {
    /// Claiming competitor
    pub competitor_id: AccountId,

    /// Calendar day in the configured reference timezone
    pub claim_date: NaiveDate,

    /// Amount credited
    pub reward_amount: u64,

    /// Ledger row created alongside this claim
    pub transaction_id: Uuid,

    /// Claim timestamp
    pub created_at: DateTime<Utc>,
}

/// Result of a successful daily reward claim
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardGrant {
    /// The committed `DailyReward` ledger row
    pub transaction: LedgerTransaction,

    /// Day the claim was registered under
    pub claim_date: NaiveDate,

    /// Amount credited
    pub reward_amount: u64,
}
