//! Main engine orchestration layer
//!
//! `Economy` ties storage, the single-writer actor, cache invalidation, and
//! metrics into the high-level ledger API consumed by route handlers.
//!
//! # Example
//!
//! ```no_run
//! use economy_core::{AccountId, Config, Economy};
//!
//! #[tokio::main]
//! async fn main() -> economy_core::Result<()> {
//!     let economy = Economy::open(Config::default()).await?;
//!
//!     let alice = AccountId::new("alice");
//!     let reward = economy.claim_daily_reward(&alice).await?;
//!     println!("granted {} on {}", reward.reward_amount, reward.claim_date);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    actor::{spawn_economy_actor, EconomyHandle},
    cache::{namespaces, CacheInvalidator, NoopInvalidator},
    metrics::Metrics,
    storage::{Storage, StorageStats},
    types::{
        AccountId, Balance, InventoryGrant, LedgerTransaction, NewItem, PurchaseReceipt,
        RewardGrant, Shop, ShopItem, Trade, TradeOffer, TradeOutcome, TradeStatus,
    },
    Config, Error, Result,
};
use chrono::FixedOffset;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

/// Main economy ledger interface
pub struct Economy {
    /// Actor handle for mutating operations
    handle: EconomyHandle,

    /// Direct storage access (for reads)
    storage: Arc<Storage>,

    /// Injected cache invalidation capability
    cache: Arc<dyn CacheInvalidator>,

    /// Prometheus collectors
    metrics: Metrics,

    /// Time budget per mutating operation
    op_timeout: std::time::Duration,

    /// Configuration
    config: Config,
}

impl Economy {
    /// Open the engine with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let reward_offset = FixedOffset::east_opt(config.economy.reward_utc_offset_minutes * 60)
            .ok_or_else(|| {
                Error::Config(format!(
                    "invalid reward_utc_offset_minutes: {}",
                    config.economy.reward_utc_offset_minutes
                ))
            })?;
        if config.economy.daily_reward_amount == 0 {
            // Ledger rows carry positive amounts, a zero reward cannot commit
            return Err(Error::Config(
                "daily_reward_amount must be positive".to_string(),
            ));
        }
        if config.economy.transfer_window_hours <= 0 {
            return Err(Error::Config(
                "transfer_window_hours must be positive".to_string(),
            ));
        }

        let storage = Arc::new(Storage::open(&config)?);
        let metrics =
            Metrics::new().map_err(|e| Error::Config(format!("metrics registry: {}", e)))?;

        let handle = spawn_economy_actor(
            storage.clone(),
            config.economy.clone(),
            reward_offset,
            config.mailbox_capacity,
        );

        Ok(Self {
            handle,
            storage,
            cache: Arc::new(NoopInvalidator),
            metrics,
            op_timeout: std::time::Duration::from_millis(config.op_timeout_ms),
            config,
        })
    }

    /// Attach a cache invalidation capability
    pub fn with_cache(mut self, cache: Arc<dyn CacheInvalidator>) -> Self {
        self.cache = cache;
        self
    }

    /// Access the engine's metrics collectors
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.op_timeout
    }

    // Reads

    /// Current balance; competitors without ledger presence read as zero
    pub fn balance(&self, account: &AccountId) -> Result<Balance> {
        let stored = self.storage.get_account(account)?;
        Ok(Balance {
            account_id: account.clone(),
            balance: stored.map(|a| a.balance).unwrap_or(0),
            currency_unit: self.config.economy.currency_unit.clone(),
        })
    }

    /// Ledger history for an account, newest first
    pub fn history(
        &self,
        account: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>> {
        self.storage.history(account, limit, offset)
    }

    /// Get a ledger transaction by ID
    pub fn transaction(&self, id: Uuid) -> Result<LedgerTransaction> {
        self.storage
            .get_transaction(id)?
            .ok_or(Error::TransactionNotFound(id))
    }

    /// Get a shop by ID
    pub fn shop(&self, shop_id: Uuid) -> Result<Shop> {
        self.storage
            .get_shop(shop_id)?
            .ok_or(Error::ShopNotFound(shop_id))
    }

    /// Get an item by ID
    pub fn item(&self, item_id: Uuid) -> Result<ShopItem> {
        self.storage
            .get_item(item_id)?
            .ok_or(Error::ItemNotFound(item_id))
    }

    /// All items of a shop
    pub fn shop_items(&self, shop_id: Uuid) -> Result<Vec<ShopItem>> {
        self.storage.list_shop_items(shop_id)
    }

    /// Get a trade by ID
    pub fn trade(&self, trade_id: Uuid) -> Result<Trade> {
        self.storage
            .get_trade(trade_id)?
            .ok_or(Error::TradeNotFound(trade_id))
    }

    /// Get an inventory grant by ID
    pub fn grant(&self, grant_id: Uuid) -> Result<InventoryGrant> {
        self.storage
            .get_grant(grant_id)?
            .ok_or(Error::GrantNotFound(grant_id))
    }

    /// All grants of one item held by a competitor
    pub fn grants_for(&self, owner: &AccountId, item_id: Uuid) -> Result<Vec<InventoryGrant>> {
        self.storage.grants_for(owner, item_id)
    }

    /// Approximate storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        self.storage.stats()
    }

    // Mutations

    /// Move currency between two competitors
    pub async fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: u64,
        reason: impl Into<String>,
    ) -> Result<LedgerTransaction> {
        if amount == 0 {
            return Err(Error::InvalidTransfer(
                "transfer amount must be positive".to_string(),
            ));
        }
        if from == to {
            return Err(Error::InvalidTransfer(
                "cannot transfer to the same account".to_string(),
            ));
        }

        let started = std::time::Instant::now();
        let result = self
            .handle
            .transfer(
                from.clone(),
                to.clone(),
                amount,
                reason.into(),
                self.deadline(),
            )
            .await;

        match &result {
            Ok(txn) => {
                self.metrics.transfers_total.inc();
                self.metrics.observe_duration(started.elapsed());
                self.cache.clear(namespaces::BALANCE, from.as_str());
                self.cache.clear(namespaces::BALANCE, to.as_str());
                tracing::info!(
                    txn_id = %txn.id,
                    from = %from,
                    to = %to,
                    amount,
                    "transfer committed"
                );
            }
            Err(err) => {
                self.metrics.record_rejection("transfer");
                tracing::warn!(from = %from, to = %to, amount, error = %err, "transfer rejected");
            }
        }
        result
    }

    /// Create a shop (caller enforces admin permissions)
    pub async fn create_shop(&self, name: impl Into<String>) -> Result<Shop> {
        let name = name.into();
        let result = self.handle.create_shop(name, self.deadline()).await;
        if let Ok(shop) = &result {
            tracing::info!(shop_id = %shop.shop_id, name = %shop.name, "shop created");
        }
        result
    }

    /// Add an item to a shop (caller enforces admin permissions)
    pub async fn add_item(&self, shop_id: Uuid, item: NewItem) -> Result<ShopItem> {
        if item.price == 0 {
            return Err(Error::InvalidTransfer(
                "item price must be positive".to_string(),
            ));
        }

        let result = self.handle.add_item(shop_id, item, self.deadline()).await;
        if let Ok(item) = &result {
            self.cache.clear(namespaces::SHOP, &shop_id.to_string());
            tracing::info!(
                item_id = %item.item_id,
                shop_id = %shop_id,
                price = item.price,
                "item added"
            );
        }
        result
    }

    /// Toggle an item's availability (caller enforces admin permissions)
    pub async fn set_item_availability(
        &self,
        item_id: Uuid,
        available: bool,
    ) -> Result<ShopItem> {
        let result = self
            .handle
            .set_item_availability(item_id, available, self.deadline())
            .await;
        if let Ok(item) = &result {
            self.cache.clear(namespaces::SHOP, &item.shop_id.to_string());
            tracing::info!(item_id = %item.item_id, available, "item availability changed");
        }
        result
    }

    /// Buy units of an item
    ///
    /// Not idempotent by design: each call consumes stock and currency.
    /// Callers needing retry-safety must dedupe at the request layer.
    pub async fn purchase(
        &self,
        item_id: Uuid,
        buyer: &AccountId,
        quantity: u32,
    ) -> Result<PurchaseReceipt> {
        if quantity == 0 {
            return Err(Error::InvalidTransfer(
                "purchase quantity must be positive".to_string(),
            ));
        }

        let started = std::time::Instant::now();
        let result = self
            .handle
            .purchase(item_id, buyer.clone(), quantity, self.deadline())
            .await;

        match &result {
            Ok(receipt) => {
                self.metrics.purchases_total.inc();
                self.metrics.observe_duration(started.elapsed());
                self.cache.clear(namespaces::BALANCE, buyer.as_str());
                self.cache
                    .clear(namespaces::SHOP, &receipt.shop_id.to_string());
                tracing::info!(
                    txn_id = %receipt.transaction.id,
                    buyer = %buyer,
                    item_id = %item_id,
                    quantity,
                    total_cost = receipt.total_cost,
                    stock_before = ?receipt.stock_before,
                    stock_after = ?receipt.stock_after,
                    "purchase committed"
                );
            }
            Err(err) => {
                self.metrics.record_rejection("purchase");
                tracing::warn!(buyer = %buyer, item_id = %item_id, quantity, error = %err, "purchase rejected");
            }
        }
        result
    }

    /// Reverse a purchase (caller enforces admin permissions)
    pub async fn refund_purchase(&self, transaction_id: Uuid) -> Result<LedgerTransaction> {
        let result = self
            .handle
            .refund_purchase(transaction_id, self.deadline())
            .await;

        match &result {
            Ok(txn) => {
                if let Some(buyer) = &txn.to_account {
                    self.cache.clear(namespaces::BALANCE, buyer.as_str());
                }
                tracing::info!(txn_id = %txn.id, refunds = %transaction_id, "refund committed");
            }
            Err(err) => {
                self.metrics.record_rejection("refund");
                tracing::warn!(transaction_id = %transaction_id, error = %err, "refund rejected");
            }
        }
        result
    }

    /// Consume part of an inventory grant
    pub async fn use_grant(
        &self,
        grant_id: Uuid,
        competitor: &AccountId,
        quantity: u32,
    ) -> Result<InventoryGrant> {
        if quantity == 0 {
            return Err(Error::InvalidTransfer(
                "use quantity must be positive".to_string(),
            ));
        }
        self.handle
            .use_grant(grant_id, competitor.clone(), quantity, self.deadline())
            .await
    }

    /// Propose a trade; nothing moves until the counterparty accepts
    pub async fn create_trade(
        &self,
        initiator: &AccountId,
        counterparty: &AccountId,
        initiator_offer: TradeOffer,
        counterparty_offer: TradeOffer,
    ) -> Result<Trade> {
        if initiator == counterparty {
            return Err(Error::InvalidTransfer(
                "cannot trade with yourself".to_string(),
            ));
        }
        if initiator_offer.is_empty() && counterparty_offer.is_empty() {
            return Err(Error::InvalidTransfer(
                "trade must move currency or items".to_string(),
            ));
        }

        let result = self
            .handle
            .create_trade(
                initiator.clone(),
                counterparty.clone(),
                initiator_offer,
                counterparty_offer,
                self.deadline(),
            )
            .await;

        match &result {
            Ok(trade) => {
                self.metrics.trades_created_total.inc();
                tracing::info!(
                    trade_id = %trade.trade_id,
                    initiator = %initiator,
                    counterparty = %counterparty,
                    "trade proposed"
                );
            }
            Err(err) => {
                self.metrics.record_rejection("create_trade");
                tracing::warn!(initiator = %initiator, error = %err, "trade proposal rejected");
            }
        }
        result
    }

    /// Accept or reject a pending trade; acceptance settles atomically
    pub async fn respond_to_trade(
        &self,
        trade_id: Uuid,
        responder: &AccountId,
        accept: bool,
    ) -> Result<TradeOutcome> {
        let started = std::time::Instant::now();
        let result = self
            .handle
            .respond_trade(trade_id, responder.clone(), accept, self.deadline())
            .await;

        match &result {
            Ok(outcome) => {
                self.cache.clear(namespaces::TRADE, &trade_id.to_string());
                match outcome.trade.status {
                    TradeStatus::Accepted => {
                        self.metrics.record_trade_resolved("accepted");
                        self.metrics.observe_duration(started.elapsed());
                        self.cache
                            .clear(namespaces::BALANCE, outcome.trade.initiator_id.as_str());
                        self.cache
                            .clear(namespaces::BALANCE, outcome.trade.counterparty_id.as_str());
                    }
                    TradeStatus::Rejected => self.metrics.record_trade_resolved("rejected"),
                    _ => {}
                }
                tracing::info!(
                    trade_id = %trade_id,
                    responder = %responder,
                    status = ?outcome.trade.status,
                    settlement_legs = outcome.settlement.len(),
                    "trade response committed"
                );
            }
            Err(err) => {
                self.metrics.record_rejection("respond_trade");
                tracing::warn!(trade_id = %trade_id, responder = %responder, accept, error = %err, "trade response rejected");
            }
        }
        result
    }

    /// Withdraw a pending trade; either party may cancel
    pub async fn cancel_trade(&self, trade_id: Uuid, requester: &AccountId) -> Result<Trade> {
        let result = self
            .handle
            .cancel_trade(trade_id, requester.clone(), self.deadline())
            .await;

        match &result {
            Ok(_) => {
                self.metrics.record_trade_resolved("cancelled");
                self.cache.clear(namespaces::TRADE, &trade_id.to_string());
                tracing::info!(trade_id = %trade_id, requester = %requester, "trade cancelled");
            }
            Err(err) => {
                self.metrics.record_rejection("cancel_trade");
                tracing::warn!(trade_id = %trade_id, requester = %requester, error = %err, "trade cancel rejected");
            }
        }
        result
    }

    /// Claim the once-per-day reward
    pub async fn claim_daily_reward(&self, competitor: &AccountId) -> Result<RewardGrant> {
        let started = std::time::Instant::now();
        let result = self
            .handle
            .claim_daily_reward(competitor.clone(), self.deadline())
            .await;

        match &result {
            Ok(grant) => {
                self.metrics.rewards_claimed_total.inc();
                self.metrics.observe_duration(started.elapsed());
                self.cache.clear(namespaces::BALANCE, competitor.as_str());
                tracing::info!(
                    txn_id = %grant.transaction.id,
                    competitor = %competitor,
                    claim_date = %grant.claim_date,
                    amount = grant.reward_amount,
                    "daily reward committed"
                );
            }
            Err(err) => {
                self.metrics.record_rejection("claim_daily_reward");
                tracing::warn!(competitor = %competitor, error = %err, "daily reward rejected");
            }
        }
        result
    }

    /// Shutdown the engine
    pub async fn shutdown(self) -> Result<()> {
        self.handle.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;

    async fn test_economy() -> (Economy, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = temp_dir.path().to_path_buf();
        config.economy.daily_reward_amount = 100;

        let economy = Economy::open(config).await.unwrap();
        (economy, temp_dir)
    }

    #[tokio::test]
    async fn test_open_and_shutdown() {
        let (economy, _temp) = test_economy().await;
        economy.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_implicit_zero_balance() {
        let (economy, _temp) = test_economy().await;
        let balance = economy.balance(&AccountId::new("nobody")).unwrap();
        assert_eq!(balance.balance, 0);
        assert_eq!(balance.currency_unit, "coins");
        economy.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_static_validation_precedes_actor() {
        let (economy, _temp) = test_economy().await;
        let alice = AccountId::new("alice");

        let err = economy.transfer(&alice, &alice, 10, "self").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransfer(_)));

        let bob = AccountId::new("bob");
        let err = economy.transfer(&alice, &bob, 0, "zero").await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransfer(_)));

        economy.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_cache_invalidated_after_commit() {
        let (economy, _temp) = test_economy().await;
        let cache = Arc::new(InMemoryCache::new());
        let economy = economy.with_cache(cache.clone());

        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");
        cache.put(namespaces::BALANCE, "alice", "stale");
        cache.put(namespaces::BALANCE, "bob", "stale");

        economy.claim_daily_reward(&alice).await.unwrap();
        assert_eq!(cache.get(namespaces::BALANCE, "alice"), None);

        // Failed transfer must not clear the receiver's entry
        let err = economy
            .transfer(&alice, &bob, 1_000_000, "too much")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
        assert_eq!(cache.get(namespaces::BALANCE, "bob").as_deref(), Some("stale"));

        economy.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_metrics_track_outcomes() {
        let (economy, _temp) = test_economy().await;
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");

        economy.claim_daily_reward(&alice).await.unwrap();
        economy.transfer(&alice, &bob, 10, "gift").await.unwrap();
        let _ = economy.transfer(&alice, &bob, 1_000_000, "too much").await;

        assert_eq!(economy.metrics().transfers_total.get(), 1);
        assert_eq!(economy.metrics().rewards_claimed_total.get(), 1);
        assert_eq!(
            economy
                .metrics()
                .rejected_operations_total
                .with_label_values(&["transfer"])
                .get(),
            1
        );

        economy.shutdown().await.unwrap();
    }
}
