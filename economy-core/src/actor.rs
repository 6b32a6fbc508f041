//! Single-writer actor for mutating operations
//!
//! All mutations funnel through one Tokio task:
//! - One logical writer eliminates lost updates: the solvency/stock checks
//!   and the commit they guard always observe the same state.
//! - Lock ordering across account pairs becomes a non-issue; there is
//!   nothing to deadlock against.
//! - Each message carries a deadline. An operation that cannot start before
//!   its deadline is refused with `Timeout` and has no observable effect;
//!   once started it always runs to commit or typed error.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │              Route handlers (callers)                 │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ EconomyHandle (Clone)
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │             EconomyActor (single task)                │
//! │   read → validate → build WriteBatch → commit         │
//! └─────────────────────┬────────────────────────────────┘
//!                       ▼
//!                 Storage (RocksDB)
//! ```
//!
//! Reads do not pass through the actor; they go straight to storage.

use crate::config::EconomyRules;
use crate::error::{Error, Result};
use crate::storage::Storage;
use crate::types::{
    AccountId, DailyRewardClaim, InventoryGrant, LedgerTransaction, NewItem, PurchaseReceipt,
    RewardGrant, Shop, ShopItem, Trade, TradeItemLeg, TradeOffer, TradeOutcome, TradeStatus,
    TransactionKind,
};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use uuid::Uuid;

/// Message sent to the economy actor
pub enum EconomyMessage {
    /// Move currency between two competitors
    Transfer {
        /// Sender
        from: AccountId,
        /// Receiver
        to: AccountId,
        /// Amount in smallest units
        amount: u64,
        /// Audit reason
        reason: String,
        /// Latest start time
        deadline: Instant,
        /// Outcome channel
        respond: oneshot::Sender<Result<LedgerTransaction>>,
    },

    /// Create a shop
    CreateShop {
        /// Display name
        name: String,
        /// Latest start time
        deadline: Instant,
        /// Outcome channel
        respond: oneshot::Sender<Result<Shop>>,
    },

    /// Add an item to a shop
    AddItem {
        /// Target shop
        shop_id: Uuid,
        /// Item parameters
        item: NewItem,
        /// Latest start time
        deadline: Instant,
        /// Outcome channel
        respond: oneshot::Sender<Result<ShopItem>>,
    },

    /// Toggle item availability
    SetItemAvailability {
        /// Target item
        item_id: Uuid,
        /// New availability
        available: bool,
        /// Latest start time
        deadline: Instant,
        /// Outcome channel
        respond: oneshot::Sender<Result<ShopItem>>,
    },

    /// Buy units of an item
    Purchase {
        /// Target item
        item_id: Uuid,
        /// Paying competitor
        buyer: AccountId,
        /// Units to buy
        quantity: u32,
        /// Latest start time
        deadline: Instant,
        /// Outcome channel
        respond: oneshot::Sender<Result<PurchaseReceipt>>,
    },

    /// Reverse a purchase
    RefundPurchase {
        /// The `Purchase` ledger row to reverse
        transaction_id: Uuid,
        /// Latest start time
        deadline: Instant,
        /// Outcome channel
        respond: oneshot::Sender<Result<LedgerTransaction>>,
    },

    /// Consume part of an inventory grant
    UseGrant {
        /// Target grant
        grant_id: Uuid,
        /// Acting competitor (must own the grant)
        competitor: AccountId,
        /// Units to consume
        quantity: u32,
        /// Latest start time
        deadline: Instant,
        /// Outcome channel
        respond: oneshot::Sender<Result<InventoryGrant>>,
    },

    /// Propose a trade
    CreateTrade {
        /// Proposing party
        initiator: AccountId,
        /// Responding party
        counterparty: AccountId,
        /// Initiator's side
        initiator_offer: TradeOffer,
        /// Counterparty's side
        counterparty_offer: TradeOffer,
        /// Latest start time
        deadline: Instant,
        /// Outcome channel
        respond: oneshot::Sender<Result<Trade>>,
    },

    /// Accept or reject a pending trade
    RespondTrade {
        /// Target trade
        trade_id: Uuid,
        /// Acting competitor (must be the counterparty)
        responder: AccountId,
        /// true to accept and settle, false to reject
        accept: bool,
        /// Latest start time
        deadline: Instant,
        /// Outcome channel
        respond: oneshot::Sender<Result<TradeOutcome>>,
    },

    /// Withdraw a pending trade
    CancelTrade {
        /// Target trade
        trade_id: Uuid,
        /// Acting competitor (either party)
        requester: AccountId,
        /// Latest start time
        deadline: Instant,
        /// Outcome channel
        respond: oneshot::Sender<Result<Trade>>,
    },

    /// Claim the once-per-day reward
    ClaimDailyReward {
        /// Claiming competitor
        competitor: AccountId,
        /// Latest start time
        deadline: Instant,
        /// Outcome channel
        respond: oneshot::Sender<Result<RewardGrant>>,
    },

    /// Stop the actor
    Shutdown,
}

/// Actor that serializes all mutating units of work
pub struct EconomyActor {
    storage: Arc<Storage>,
    rules: EconomyRules,
    reward_offset: FixedOffset,
    mailbox: mpsc::Receiver<EconomyMessage>,
}

impl EconomyActor {
    /// Create new actor
    pub fn new(
        storage: Arc<Storage>,
        rules: EconomyRules,
        reward_offset: FixedOffset,
        mailbox: mpsc::Receiver<EconomyMessage>,
    ) -> Self {
        Self {
            storage,
            rules,
            reward_offset,
            mailbox,
        }
    }

    /// Run the actor event loop until shutdown or all handles drop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            match msg {
                EconomyMessage::Shutdown => break,
                other => self.handle_message(other),
            }
        }
        tracing::debug!("economy actor stopped");
    }

    fn handle_message(&self, msg: EconomyMessage) {
        match msg {
            EconomyMessage::Transfer {
                from,
                to,
                amount,
                reason,
                deadline,
                respond,
            } => {
                if Self::expired(deadline) {
                    let _ = respond.send(Err(Error::Timeout));
                    return;
                }
                let _ = respond.send(self.handle_transfer(from, to, amount, reason));
            }
            EconomyMessage::CreateShop {
                name,
                deadline,
                respond,
            } => {
                if Self::expired(deadline) {
                    let _ = respond.send(Err(Error::Timeout));
                    return;
                }
                let _ = respond.send(self.handle_create_shop(name));
            }
            EconomyMessage::AddItem {
                shop_id,
                item,
                deadline,
                respond,
            } => {
                if Self::expired(deadline) {
                    let _ = respond.send(Err(Error::Timeout));
                    return;
                }
                let _ = respond.send(self.handle_add_item(shop_id, item));
            }
            EconomyMessage::SetItemAvailability {
                item_id,
                available,
                deadline,
                respond,
            } => {
                if Self::expired(deadline) {
                    let _ = respond.send(Err(Error::Timeout));
                    return;
                }
                let _ = respond.send(self.handle_set_item_availability(item_id, available));
            }
            EconomyMessage::Purchase {
                item_id,
                buyer,
                quantity,
                deadline,
                respond,
            } => {
                if Self::expired(deadline) {
                    let _ = respond.send(Err(Error::Timeout));
                    return;
                }
                let _ = respond.send(self.handle_purchase(item_id, buyer, quantity));
            }
            EconomyMessage::RefundPurchase {
                transaction_id,
                deadline,
                respond,
            } => {
                if Self::expired(deadline) {
                    let _ = respond.send(Err(Error::Timeout));
                    return;
                }
                let _ = respond.send(self.handle_refund(transaction_id));
            }
            EconomyMessage::UseGrant {
                grant_id,
                competitor,
                quantity,
                deadline,
                respond,
            } => {
                if Self::expired(deadline) {
                    let _ = respond.send(Err(Error::Timeout));
                    return;
                }
                let _ = respond.send(self.handle_use_grant(grant_id, competitor, quantity));
            }
            EconomyMessage::CreateTrade {
                initiator,
                counterparty,
                initiator_offer,
                counterparty_offer,
                deadline,
                respond,
            } => {
                if Self::expired(deadline) {
                    let _ = respond.send(Err(Error::Timeout));
                    return;
                }
                let _ = respond.send(self.handle_create_trade(
                    initiator,
                    counterparty,
                    initiator_offer,
                    counterparty_offer,
                ));
            }
            EconomyMessage::RespondTrade {
                trade_id,
                responder,
                accept,
                deadline,
                respond,
            } => {
                if Self::expired(deadline) {
                    let _ = respond.send(Err(Error::Timeout));
                    return;
                }
                let _ = respond.send(self.handle_respond_trade(trade_id, responder, accept));
            }
            EconomyMessage::CancelTrade {
                trade_id,
                requester,
                deadline,
                respond,
            } => {
                if Self::expired(deadline) {
                    let _ = respond.send(Err(Error::Timeout));
                    return;
                }
                let _ = respond.send(self.handle_cancel_trade(trade_id, requester));
            }
            EconomyMessage::ClaimDailyReward {
                competitor,
                deadline,
                respond,
            } => {
                if Self::expired(deadline) {
                    let _ = respond.send(Err(Error::Timeout));
                    return;
                }
                let _ = respond.send(self.handle_claim(competitor));
            }
            EconomyMessage::Shutdown => {
                // Handled in the run loop
            }
        }
    }

    fn expired(deadline: Instant) -> bool {
        Instant::now() > deadline
    }

    // Transfer

    fn handle_transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: u64,
        reason: String,
    ) -> Result<LedgerTransaction> {
        let now = Utc::now();

        let from_acct = self.storage.account_or_default(&from, now)?;
        if from_acct.balance < amount {
            return Err(Error::InsufficientBalance {
                account: from,
                balance: from_acct.balance,
                required: amount,
            });
        }

        let window_start = now - Duration::hours(self.rules.transfer_window_hours);
        let spent = self.storage.outbound_transfer_total(&from, window_start)?;
        if spent.saturating_add(amount) > self.rules.daily_transfer_limit {
            return Err(Error::TransferLimitExceeded {
                account: from,
                spent,
                attempted: amount,
                limit: self.rules.daily_transfer_limit,
            });
        }

        let to_acct = self.storage.account_or_default(&to, now)?;

        let txn = LedgerTransaction {
            id: Uuid::now_v7(),
            from_account: Some(from.clone()),
            to_account: Some(to.clone()),
            amount,
            kind: TransactionKind::Transfer,
            reason,
            metadata: HashMap::new(),
            created_at: now,
        };

        let from_version = from_acct.version;
        let to_version = to_acct.version;
        let from_after = from_acct.debited(amount, now)?;
        let to_after = to_acct.credited(amount, now)?;

        self.storage.commit_transfer(
            &txn,
            (&from_after, from_version),
            (&to_after, to_version),
        )?;
        Ok(txn)
    }

    // Shop administration

    fn handle_create_shop(&self, name: String) -> Result<Shop> {
        let shop = Shop {
            shop_id: Uuid::now_v7(),
            name,
            created_at: Utc::now(),
        };
        self.storage.put_shop(&shop)?;
        Ok(shop)
    }

    fn handle_add_item(&self, shop_id: Uuid, item: NewItem) -> Result<ShopItem> {
        self.storage
            .get_shop(shop_id)?
            .ok_or(Error::ShopNotFound(shop_id))?;

        let now = Utc::now();
        let shop_item = ShopItem {
            item_id: Uuid::now_v7(),
            shop_id,
            name: item.name,
            price: item.price,
            stock: item.stock,
            is_available: item.is_available,
            created_at: now,
            updated_at: now,
        };
        self.storage.commit_item_added(&shop_item)?;
        Ok(shop_item)
    }

    fn handle_set_item_availability(&self, item_id: Uuid, available: bool) -> Result<ShopItem> {
        let mut item = self
            .storage
            .get_item(item_id)?
            .ok_or(Error::ItemNotFound(item_id))?;
        item.is_available = available;
        item.updated_at = Utc::now();
        self.storage.put_item(&item)?;
        Ok(item)
    }

    // Purchase

    fn handle_purchase(
        &self,
        item_id: Uuid,
        buyer: AccountId,
        quantity: u32,
    ) -> Result<PurchaseReceipt> {
        let now = Utc::now();

        let item = self
            .storage
            .get_item(item_id)?
            .ok_or(Error::ItemNotFound(item_id))?;
        if !item.is_available {
            return Err(Error::ItemNotAvailable(item_id));
        }
        if let Some(stock) = item.stock {
            if stock < quantity {
                return Err(Error::ItemOutOfStock {
                    item: item_id,
                    stock,
                    requested: quantity,
                });
            }
        }

        let total_cost = item.price.checked_mul(quantity as u64).ok_or_else(|| {
            Error::InvalidTransfer(format!(
                "purchase total for {} x{} overflows",
                item_id, quantity
            ))
        })?;

        let buyer_acct = self.storage.account_or_default(&buyer, now)?;
        if buyer_acct.balance < total_cost {
            return Err(Error::InsufficientBalance {
                account: buyer,
                balance: buyer_acct.balance,
                required: total_cost,
            });
        }

        let stock_before = item.stock;
        let mut item_after = item.clone();
        if let Some(stock) = item_after.stock {
            item_after.stock = Some(stock - quantity);
        }
        item_after.updated_at = now;

        let grant = InventoryGrant {
            grant_id: Uuid::now_v7(),
            competitor_id: buyer.clone(),
            item_id,
            quantity,
            used_quantity: 0,
            created_at: now,
        };

        let mut metadata = HashMap::new();
        metadata.insert("item_id".to_string(), item_id.to_string());
        metadata.insert("shop_id".to_string(), item.shop_id.to_string());
        metadata.insert("quantity".to_string(), quantity.to_string());
        metadata.insert("grant_id".to_string(), grant.grant_id.to_string());

        // Debit sink: shop revenue is burned, not credited to any competitor
        let txn = LedgerTransaction {
            id: Uuid::now_v7(),
            from_account: Some(buyer.clone()),
            to_account: None,
            amount: total_cost,
            kind: TransactionKind::Purchase,
            reason: format!("purchase {} x{}", item.name, quantity),
            metadata,
            created_at: now,
        };

        let buyer_version = buyer_acct.version;
        let buyer_after = buyer_acct.debited(total_cost, now)?;

        self.storage
            .commit_purchase(&txn, (&buyer_after, buyer_version), &item_after, &grant)?;

        Ok(PurchaseReceipt {
            transaction: txn,
            shop_id: item.shop_id,
            item_id,
            quantity,
            unit_price: item.price,
            total_cost,
            stock_before,
            stock_after: item_after.stock,
            grant,
        })
    }

    fn handle_refund(&self, transaction_id: Uuid) -> Result<LedgerTransaction> {
        let now = Utc::now();

        let original = self
            .storage
            .get_transaction(transaction_id)?
            .ok_or(Error::TransactionNotFound(transaction_id))?;
        if original.kind != TransactionKind::Purchase {
            return Err(Error::InvalidTransfer(format!(
                "transaction {} is a {}, only purchases can be refunded",
                transaction_id, original.kind
            )));
        }

        let grant_id = original
            .metadata
            .get("grant_id")
            .and_then(|raw| Uuid::parse_str(raw).ok())
            .ok_or_else(|| {
                Error::InvalidState(format!(
                    "purchase {} carries no grant reference",
                    transaction_id
                ))
            })?;
        // The grant is removed on refund, so a missing grant means the
        // purchase was already reversed
        let grant = self.storage.get_grant(grant_id)?.ok_or_else(|| {
            Error::InvalidState(format!("purchase {} was already refunded", transaction_id))
        })?;
        if grant.used_quantity > 0 {
            return Err(Error::InvalidState(format!(
                "grant {} is partially used ({} of {})",
                grant_id, grant.used_quantity, grant.quantity
            )));
        }

        let buyer = original.from_account.clone().ok_or_else(|| {
            Error::InvalidState(format!("purchase {} has no buyer account", transaction_id))
        })?;

        // Restore stock if the item still exists and tracks a finite count
        let restored_item = match self.storage.get_item(grant.item_id)? {
            Some(mut item) => {
                if let Some(stock) = item.stock {
                    item.stock = Some(stock.saturating_add(grant.quantity));
                }
                item.updated_at = now;
                Some(item)
            }
            None => None,
        };

        let mut metadata = HashMap::new();
        metadata.insert("refunds".to_string(), transaction_id.to_string());
        metadata.insert("grant_id".to_string(), grant_id.to_string());

        let txn = LedgerTransaction {
            id: Uuid::now_v7(),
            from_account: None,
            to_account: Some(buyer.clone()),
            amount: original.amount,
            kind: TransactionKind::Refund,
            reason: format!("refund of {}", transaction_id),
            metadata,
            created_at: now,
        };

        let buyer_acct = self.storage.account_or_default(&buyer, now)?;
        let buyer_version = buyer_acct.version;
        let buyer_after = buyer_acct.credited(original.amount, now)?;

        self.storage.commit_refund(
            &txn,
            (&buyer_after, buyer_version),
            restored_item.as_ref(),
            &grant,
        )?;
        Ok(txn)
    }

    fn handle_use_grant(
        &self,
        grant_id: Uuid,
        competitor: AccountId,
        quantity: u32,
    ) -> Result<InventoryGrant> {
        let mut grant = self
            .storage
            .get_grant(grant_id)?
            .ok_or(Error::GrantNotFound(grant_id))?;
        if grant.competitor_id != competitor {
            return Err(Error::NotAuthorized(format!(
                "{} does not own grant {}",
                competitor, grant_id
            )));
        }
        if quantity > grant.available() {
            return Err(Error::InvalidState(format!(
                "grant {} has {} unused, cannot use {}",
                grant_id,
                grant.available(),
                quantity
            )));
        }
        grant.used_quantity += quantity;
        self.storage.put_grant(&grant)?;
        Ok(grant)
    }

    // Trades

    fn handle_create_trade(
        &self,
        initiator: AccountId,
        counterparty: AccountId,
        initiator_offer: TradeOffer,
        counterparty_offer: TradeOffer,
    ) -> Result<Trade> {
        // Shape checks only; live solvency is re-validated at acceptance
        Self::aggregate_legs(&initiator_offer.items)?;
        Self::aggregate_legs(&counterparty_offer.items)?;

        let trade = Trade {
            trade_id: Uuid::now_v7(),
            initiator_id: initiator,
            counterparty_id: counterparty,
            initiator_offer,
            counterparty_offer,
            status: TradeStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
        };
        self.storage.put_trade(&trade)?;
        Ok(trade)
    }

    fn handle_respond_trade(
        &self,
        trade_id: Uuid,
        responder: AccountId,
        accept: bool,
    ) -> Result<TradeOutcome> {
        let now = Utc::now();

        let trade = self
            .storage
            .get_trade(trade_id)?
            .ok_or(Error::TradeNotFound(trade_id))?;
        if trade.is_resolved() {
            return Err(Error::InvalidState(format!(
                "trade {} was already resolved",
                trade_id
            )));
        }
        if responder != trade.counterparty_id {
            return Err(Error::NotAuthorized(format!(
                "only the counterparty may respond to trade {}",
                trade_id
            )));
        }

        if !accept {
            let mut resolved = trade;
            resolved.status = TradeStatus::Rejected;
            resolved.resolved_at = Some(now);
            self.storage.put_trade(&resolved)?;
            return Ok(TradeOutcome {
                trade: resolved,
                settlement: Vec::new(),
            });
        }

        // Settlement: re-validate both sides against live state, then commit
        // everything in one batch. Any failure leaves the trade Pending -- a
        // failed settlement is not a rejection.
        let initiator = trade.initiator_id.clone();
        let counterparty = trade.counterparty_id.clone();

        let init_acct = self.storage.account_or_default(&initiator, now)?;
        if init_acct.balance < trade.initiator_offer.currency {
            return Err(Error::InvalidTransfer(format!(
                "initiator {} is no longer solvent for the offered {}",
                initiator, trade.initiator_offer.currency
            )));
        }
        let cpty_acct = self.storage.account_or_default(&counterparty, now)?;
        if cpty_acct.balance < trade.counterparty_offer.currency {
            return Err(Error::InvalidTransfer(format!(
                "counterparty {} is no longer solvent for the offered {}",
                counterparty, trade.counterparty_offer.currency
            )));
        }

        let mut grant_puts = Vec::new();
        let mut grant_deletes = Vec::new();
        self.plan_item_legs(
            &initiator,
            &counterparty,
            &trade.initiator_offer.items,
            now,
            &mut grant_puts,
            &mut grant_deletes,
        )?;
        self.plan_item_legs(
            &counterparty,
            &initiator,
            &trade.counterparty_offer.items,
            now,
            &mut grant_puts,
            &mut grant_deletes,
        )?;

        let mut settlement = Vec::new();
        if trade.initiator_offer.currency > 0 {
            settlement.push(Self::settlement_txn(
                &initiator,
                &counterparty,
                trade.initiator_offer.currency,
                trade_id,
                now,
            ));
        }
        if trade.counterparty_offer.currency > 0 {
            settlement.push(Self::settlement_txn(
                &counterparty,
                &initiator,
                trade.counterparty_offer.currency,
                trade_id,
                now,
            ));
        }

        let init_version = init_acct.version;
        let cpty_version = cpty_acct.version;
        let init_after = init_acct
            .debited(trade.initiator_offer.currency, now)?
            .credited(trade.counterparty_offer.currency, now)?;
        let cpty_after = cpty_acct
            .debited(trade.counterparty_offer.currency, now)?
            .credited(trade.initiator_offer.currency, now)?;

        let mut resolved = trade;
        resolved.status = TradeStatus::Accepted;
        resolved.resolved_at = Some(now);

        self.storage.commit_trade_settlement(
            &resolved,
            &settlement,
            (&init_after, init_version),
            (&cpty_after, cpty_version),
            &grant_puts,
            &grant_deletes,
        )?;

        Ok(TradeOutcome {
            trade: resolved,
            settlement,
        })
    }

    fn handle_cancel_trade(&self, trade_id: Uuid, requester: AccountId) -> Result<Trade> {
        let trade = self
            .storage
            .get_trade(trade_id)?
            .ok_or(Error::TradeNotFound(trade_id))?;
        if trade.is_resolved() {
            return Err(Error::InvalidState(format!(
                "trade {} was already resolved",
                trade_id
            )));
        }
        if requester != trade.initiator_id && requester != trade.counterparty_id {
            return Err(Error::NotAuthorized(format!(
                "{} is not a party to trade {}",
                requester, trade_id
            )));
        }

        let mut resolved = trade;
        resolved.status = TradeStatus::Cancelled;
        resolved.resolved_at = Some(Utc::now());
        self.storage.put_trade(&resolved)?;
        Ok(resolved)
    }

    fn settlement_txn(
        from: &AccountId,
        to: &AccountId,
        amount: u64,
        trade_id: Uuid,
        now: DateTime<Utc>,
    ) -> LedgerTransaction {
        let mut metadata = HashMap::new();
        metadata.insert("trade_id".to_string(), trade_id.to_string());
        LedgerTransaction {
            id: Uuid::now_v7(),
            from_account: Some(from.clone()),
            to_account: Some(to.clone()),
            amount,
            kind: TransactionKind::TradeSettlement,
            reason: format!("settlement of trade {}", trade_id),
            metadata,
            created_at: now,
        }
    }

    /// Merge duplicate item legs so one offer cannot double-count a grant
    fn aggregate_legs(legs: &[TradeItemLeg]) -> Result<Vec<TradeItemLeg>> {
        let mut merged: Vec<TradeItemLeg> = Vec::new();
        for leg in legs {
            if leg.quantity == 0 {
                return Err(Error::InvalidTransfer(
                    "trade item quantity must be positive".to_string(),
                ));
            }
            match merged.iter_mut().find(|m| m.item_id == leg.item_id) {
                Some(existing) => {
                    existing.quantity = existing.quantity.checked_add(leg.quantity).ok_or_else(
                        || Error::InvalidTransfer("trade item quantity overflows".to_string()),
                    )?;
                }
                None => merged.push(leg.clone()),
            }
        }
        Ok(merged)
    }

    /// Plan inventory movement for one side's item legs: consume from the
    /// offerer's grants oldest-first, mint one grant per leg for the receiver
    fn plan_item_legs(
        &self,
        offerer: &AccountId,
        receiver: &AccountId,
        legs: &[TradeItemLeg],
        now: DateTime<Utc>,
        grant_puts: &mut Vec<InventoryGrant>,
        grant_deletes: &mut Vec<InventoryGrant>,
    ) -> Result<()> {
        for leg in Self::aggregate_legs(legs)? {
            let grants = self.storage.grants_for(offerer, leg.item_id)?;
            let available: u32 = grants.iter().map(|g| g.available()).sum();
            if available < leg.quantity {
                return Err(Error::InvalidTransfer(format!(
                    "{} no longer holds {} of item {} (has {})",
                    offerer, leg.quantity, leg.item_id, available
                )));
            }

            let mut remaining = leg.quantity;
            for grant in &grants {
                if remaining == 0 {
                    break;
                }
                let take = remaining.min(grant.available());
                if take == 0 {
                    continue;
                }
                remaining -= take;
                let mut reduced = grant.clone();
                reduced.quantity -= take;
                if reduced.quantity == 0 {
                    grant_deletes.push(grant.clone());
                } else {
                    grant_puts.push(reduced);
                }
            }

            grant_puts.push(InventoryGrant {
                grant_id: Uuid::now_v7(),
                competitor_id: receiver.clone(),
                item_id: leg.item_id,
                quantity: leg.quantity,
                used_quantity: 0,
                created_at: now,
            });
        }
        Ok(())
    }

    // Daily reward

    fn handle_claim(&self, competitor: AccountId) -> Result<RewardGrant> {
        let now = Utc::now();
        // Day boundary comes from the configured reference timezone, never
        // from the caller
        let claim_date = now.with_timezone(&self.reward_offset).date_naive();

        if self.storage.get_claim(&competitor, claim_date)?.is_some() {
            return Err(Error::AlreadyClaimed {
                account: competitor,
                claim_date,
            });
        }

        let amount = self.rules.daily_reward_amount;
        let txn = LedgerTransaction {
            id: Uuid::now_v7(),
            from_account: None,
            to_account: Some(competitor.clone()),
            amount,
            kind: TransactionKind::DailyReward,
            reason: "daily reward".to_string(),
            metadata: HashMap::new(),
            created_at: now,
        };
        let claim = DailyRewardClaim {
            competitor_id: competitor.clone(),
            claim_date,
            reward_amount: amount,
            transaction_id: txn.id,
            created_at: now,
        };

        let acct = self.storage.account_or_default(&competitor, now)?;
        let version = acct.version;
        let after = acct.credited(amount, now)?;

        self.storage
            .commit_reward_claim(&claim, &txn, (&after, version))?;

        Ok(RewardGrant {
            transaction: txn,
            claim_date,
            reward_amount: amount,
        })
    }
}

/// Handle for sending messages to the actor
#[derive(Clone)]
pub struct EconomyHandle {
    sender: mpsc::Sender<EconomyMessage>,
}

impl EconomyHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<EconomyMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        deadline: Instant,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> EconomyMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        let msg = make(tx);
        // A full mailbox past the deadline means the operation never
        // enqueued, so failing here is side-effect free
        tokio::time::timeout_at(deadline, self.sender.send(msg))
            .await
            .map_err(|_| Error::Timeout)?
            .map_err(|_| Error::Concurrency("actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("actor response channel closed".to_string()))?
    }

    /// Move currency between two competitors
    pub async fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: u64,
        reason: String,
        deadline: Instant,
    ) -> Result<LedgerTransaction> {
        self.request(deadline, |respond| EconomyMessage::Transfer {
            from,
            to,
            amount,
            reason,
            deadline,
            respond,
        })
        .await
    }

    /// Create a shop
    pub async fn create_shop(&self, name: String, deadline: Instant) -> Result<Shop> {
        self.request(deadline, |respond| EconomyMessage::CreateShop {
            name,
            deadline,
            respond,
        })
        .await
    }

    /// Add an item to a shop
    pub async fn add_item(
        &self,
        shop_id: Uuid,
        item: NewItem,
        deadline: Instant,
    ) -> Result<ShopItem> {
        self.request(deadline, |respond| EconomyMessage::AddItem {
            shop_id,
            item,
            deadline,
            respond,
        })
        .await
    }

    /// Toggle item availability
    pub async fn set_item_availability(
        &self,
        item_id: Uuid,
        available: bool,
        deadline: Instant,
    ) -> Result<ShopItem> {
        self.request(deadline, |respond| EconomyMessage::SetItemAvailability {
            item_id,
            available,
            deadline,
            respond,
        })
        .await
    }

    /// Buy units of an item
    pub async fn purchase(
        &self,
        item_id: Uuid,
        buyer: AccountId,
        quantity: u32,
        deadline: Instant,
    ) -> Result<PurchaseReceipt> {
        self.request(deadline, |respond| EconomyMessage::Purchase {
            item_id,
            buyer,
            quantity,
            deadline,
            respond,
        })
        .await
    }

    /// Reverse a purchase
    pub async fn refund_purchase(
        &self,
        transaction_id: Uuid,
        deadline: Instant,
    ) -> Result<LedgerTransaction> {
        self.request(deadline, |respond| EconomyMessage::RefundPurchase {
            transaction_id,
            deadline,
            respond,
        })
        .await
    }

    /// Consume part of an inventory grant
    pub async fn use_grant(
        &self,
        grant_id: Uuid,
        competitor: AccountId,
        quantity: u32,
        deadline: Instant,
    ) -> Result<InventoryGrant> {
        self.request(deadline, |respond| EconomyMessage::UseGrant {
            grant_id,
            competitor,
            quantity,
            deadline,
            respond,
        })
        .await
    }

    /// Propose a trade
    pub async fn create_trade(
        &self,
        initiator: AccountId,
        counterparty: AccountId,
        initiator_offer: TradeOffer,
        counterparty_offer: TradeOffer,
        deadline: Instant,
    ) -> Result<Trade> {
        self.request(deadline, |respond| EconomyMessage::CreateTrade {
            initiator,
            counterparty,
            initiator_offer,
            counterparty_offer,
            deadline,
            respond,
        })
        .await
    }

    /// Accept or reject a pending trade
    pub async fn respond_trade(
        &self,
        trade_id: Uuid,
        responder: AccountId,
        accept: bool,
        deadline: Instant,
    ) -> Result<TradeOutcome> {
        self.request(deadline, |respond| EconomyMessage::RespondTrade {
            trade_id,
            responder,
            accept,
            deadline,
            respond,
        })
        .await
    }

    /// Withdraw a pending trade
    pub async fn cancel_trade(
        &self,
        trade_id: Uuid,
        requester: AccountId,
        deadline: Instant,
    ) -> Result<Trade> {
        self.request(deadline, |respond| EconomyMessage::CancelTrade {
            trade_id,
            requester,
            deadline,
            respond,
        })
        .await
    }

    /// Claim the once-per-day reward
    pub async fn claim_daily_reward(
        &self,
        competitor: AccountId,
        deadline: Instant,
    ) -> Result<RewardGrant> {
        self.request(deadline, |respond| EconomyMessage::ClaimDailyReward {
            competitor,
            deadline,
            respond,
        })
        .await
    }

    /// Stop the actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(EconomyMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the economy actor
pub fn spawn_economy_actor(
    storage: Arc<Storage>,
    rules: EconomyRules,
    reward_offset: FixedOffset,
    mailbox_capacity: usize,
) -> EconomyHandle {
    let (tx, rx) = mpsc::channel(mailbox_capacity);
    let actor = EconomyActor::new(storage, rules, reward_offset, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    EconomyHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use std::time::Duration as StdDuration;

    fn test_handle() -> (EconomyHandle, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.economy.daily_reward_amount = 100;

        let storage = Arc::new(Storage::open(&config).unwrap());
        let offset = FixedOffset::east_opt(0).unwrap();
        let handle = spawn_economy_actor(storage, config.economy, offset, 64);
        (handle, temp_dir)
    }

    fn far_deadline() -> Instant {
        Instant::now() + StdDuration::from_secs(5)
    }

    #[tokio::test]
    async fn test_transfer_requires_solvency() {
        let (handle, _temp) = test_handle();
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");

        let err = handle
            .transfer(alice, bob, 10, "gift".to_string(), far_deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_reward_then_transfer() {
        let (handle, _temp) = test_handle();
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");

        let grant = handle
            .claim_daily_reward(alice.clone(), far_deadline())
            .await
            .unwrap();
        assert_eq!(grant.reward_amount, 100);

        let txn = handle
            .transfer(alice, bob, 60, "gift".to_string(), far_deadline())
            .await
            .unwrap();
        assert_eq!(txn.amount, 60);
        assert_eq!(txn.kind, TransactionKind::Transfer);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_deadline_is_refused() {
        let (handle, _temp) = test_handle();
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");

        let past = Instant::now() - StdDuration::from_millis(50);
        let err = handle
            .transfer(alice, bob, 10, "late".to_string(), past)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_second_claim_same_day_rejected() {
        let (handle, _temp) = test_handle();
        let alice = AccountId::new("alice");

        handle
            .claim_daily_reward(alice.clone(), far_deadline())
            .await
            .unwrap();
        let err = handle
            .claim_daily_reward(alice, far_deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyClaimed { .. }));

        handle.shutdown().await.unwrap();
    }
}
