//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Materialized balances (key: account id)
//! - `transactions` - Append-only ledger rows (key: transaction id)
//! - `shops` - Shops (key: shop id)
//! - `items` - Shop items (key: item id)
//! - `grants` - Inventory grants (key: grant id)
//! - `trades` - Trades (key: trade id)
//! - `claims` - Daily reward claims (key: account || day)
//! - `indices` - Secondary indices, tagged by a leading byte
//!
//! Every mutating engine operation commits through one `WriteBatch`, so the
//! ledger row, the materialized balances, and the entity rows it touches are
//! applied together or not at all.

use crate::{
    error::{Error, Result},
    types::{
        AccountId, CurrencyAccount, DailyRewardClaim, InventoryGrant, LedgerTransaction, Shop,
        ShopItem, Trade, TransactionKind,
    },
    Config,
};
use chrono::{DateTime, NaiveDate, Utc};
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    WriteBatch, DB,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_TRANSACTIONS: &str = "transactions";
const CF_SHOPS: &str = "shops";
const CF_ITEMS: &str = "items";
const CF_GRANTS: &str = "grants";
const CF_TRADES: &str = "trades";
const CF_CLAIMS: &str = "claims";
const CF_INDICES: &str = "indices";

// Index key tags (first byte in CF_INDICES)
const IDX_HISTORY: u8 = b'h'; // account || '|' || ts_be || txn_id
const IDX_OUTBOUND: u8 = b'o'; // account || '|' || ts_be || txn_id -> amount_le
const IDX_SHOP_ITEMS: u8 = b's'; // shop_id || item_id
const IDX_OWNER_GRANTS: u8 = b'g'; // account || '|' || item_id || grant_id

/// Empty index value; membership lives entirely in the key
const NO_VALUE: &[u8] = &[];

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

/// An account row to commit plus the version the unit of work read it at.
/// The commit fails `Conflict` if the stored version moved in between.
pub type AccountWrite<'a> = (&'a CurrencyAccount, u64);

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_target_file_size_base(config.rocksdb.target_file_size_mb * 1024 * 1024);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for the append-heavy transaction log
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_SHOPS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_ITEMS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_GRANTS, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_TRADES, Self::cf_options_hot()),
            ColumnFamilyDescriptor::new(CF_CLAIMS, Self::cf_options_log()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!(path = %path.display(), "opened economy ledger store");

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_log() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_hot() -> Options {
        let mut opts = Options::default();
        // Frequently re-read inside units of work, favor decode speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("column family {} not found", name)))
    }

    // Encode/decode helpers

    fn get_decoded<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf_handle(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    fn batch_put<T: Serialize>(
        &self,
        batch: &mut WriteBatch,
        cf_name: &str,
        key: &[u8],
        value: &T,
    ) -> Result<()> {
        let cf = self.cf_handle(cf_name)?;
        batch.put_cf(cf, key, bincode::serialize(value)?);
        Ok(())
    }

    // Index key builders

    fn timeline_prefix(tag: u8, account: &AccountId) -> Vec<u8> {
        let mut key = vec![tag];
        key.extend_from_slice(account.as_str().as_bytes());
        key.push(b'|');
        key
    }

    fn timeline_key(tag: u8, account: &AccountId, ts_nanos: i64, txn_id: Uuid) -> Vec<u8> {
        let mut key = Self::timeline_prefix(tag, account);
        key.extend_from_slice(&ts_nanos.to_be_bytes());
        key.extend_from_slice(txn_id.as_bytes());
        key
    }

    fn shop_items_prefix(shop_id: Uuid) -> Vec<u8> {
        let mut key = vec![IDX_SHOP_ITEMS];
        key.extend_from_slice(shop_id.as_bytes());
        key
    }

    fn shop_items_key(shop_id: Uuid, item_id: Uuid) -> Vec<u8> {
        let mut key = Self::shop_items_prefix(shop_id);
        key.extend_from_slice(item_id.as_bytes());
        key
    }

    fn owner_grants_prefix(owner: &AccountId, item_id: Uuid) -> Vec<u8> {
        let mut key = vec![IDX_OWNER_GRANTS];
        key.extend_from_slice(owner.as_str().as_bytes());
        key.push(b'|');
        key.extend_from_slice(item_id.as_bytes());
        key
    }

    fn owner_grants_key(owner: &AccountId, item_id: Uuid, grant_id: Uuid) -> Vec<u8> {
        let mut key = Self::owner_grants_prefix(owner, item_id);
        key.extend_from_slice(grant_id.as_bytes());
        key
    }

    fn claim_key(account: &AccountId, claim_date: NaiveDate) -> Vec<u8> {
        let mut key = account.as_str().as_bytes().to_vec();
        key.push(b'|');
        key.extend_from_slice(claim_date.format("%Y-%m-%d").to_string().as_bytes());
        key
    }

    fn parse_timeline_suffix(suffix: &[u8]) -> Result<(i64, Uuid)> {
        if suffix.len() != 24 {
            return Err(Error::Storage("malformed timeline index key".to_string()));
        }
        let ts = i64::from_be_bytes(
            suffix[..8]
                .try_into()
                .map_err(|_| Error::Storage("malformed timeline timestamp".to_string()))?,
        );
        let id_bytes: [u8; 16] = suffix[8..24]
            .try_into()
            .map_err(|_| Error::Storage("malformed timeline transaction id".to_string()))?;
        Ok((ts, Uuid::from_bytes(id_bytes)))
    }

    // Account reads

    /// Get materialized account row, if the competitor has been touched
    pub fn get_account(&self, account: &AccountId) -> Result<Option<CurrencyAccount>> {
        self.get_decoded(CF_ACCOUNTS, account.as_str().as_bytes())
    }

    /// Get account row, falling back to the implicit zero-balance account
    pub fn account_or_default(
        &self,
        account: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<CurrencyAccount> {
        Ok(self
            .get_account(account)?
            .unwrap_or_else(|| CurrencyAccount::new_empty(account.clone(), now)))
    }

    // Transaction reads

    /// Get ledger transaction by ID
    pub fn get_transaction(&self, id: Uuid) -> Result<Option<LedgerTransaction>> {
        self.get_decoded(CF_TRANSACTIONS, id.as_bytes())
    }

    /// Page through an account's ledger history, newest first
    pub fn history(
        &self,
        account: &AccountId,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let prefix = Self::timeline_prefix(IDX_HISTORY, account);

        let mut entries: Vec<(i64, Uuid)> = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            entries.push(Self::parse_timeline_suffix(&key[prefix.len()..])?);
        }

        entries.sort_by(|a, b| b.cmp(a));

        let mut out = Vec::with_capacity(limit.min(entries.len()));
        for (_, txn_id) in entries.into_iter().skip(offset).take(limit) {
            let txn = self.get_transaction(txn_id)?.ok_or_else(|| {
                Error::Storage(format!("history index references missing transaction {}", txn_id))
            })?;
            out.push(txn);
        }
        Ok(out)
    }

    /// Sum of `Transfer` debits sent by `account` since `window_start`
    pub fn outbound_transfer_total(
        &self,
        account: &AccountId,
        window_start: DateTime<Utc>,
    ) -> Result<u64> {
        let cf = self.cf_handle(CF_INDICES)?;
        let prefix = Self::timeline_prefix(IDX_OUTBOUND, account);
        let start_nanos = window_start.timestamp_nanos_opt().unwrap_or(i64::MIN);

        let mut total: u64 = 0;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let (ts, _) = Self::parse_timeline_suffix(&key[prefix.len()..])?;
            if ts < start_nanos {
                continue;
            }
            let amount = u64::from_le_bytes(
                value[..8]
                    .try_into()
                    .map_err(|_| Error::Storage("malformed outbound index value".to_string()))?,
            );
            total = total.saturating_add(amount);
        }
        Ok(total)
    }

    // Shop/item reads

    /// Get shop by ID
    pub fn get_shop(&self, shop_id: Uuid) -> Result<Option<Shop>> {
        self.get_decoded(CF_SHOPS, shop_id.as_bytes())
    }

    /// Get item by ID
    pub fn get_item(&self, item_id: Uuid) -> Result<Option<ShopItem>> {
        self.get_decoded(CF_ITEMS, item_id.as_bytes())
    }

    /// All items belonging to a shop
    pub fn list_shop_items(&self, shop_id: Uuid) -> Result<Vec<ShopItem>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let prefix = Self::shop_items_prefix(shop_id);

        let mut items = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id_bytes: [u8; 16] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("malformed shop items index key".to_string()))?;
            let item_id = Uuid::from_bytes(id_bytes);
            let shop_item = self.get_item(item_id)?.ok_or_else(|| {
                Error::Storage(format!("shop index references missing item {}", item_id))
            })?;
            items.push(shop_item);
        }
        Ok(items)
    }

    // Grant reads

    /// Get grant by ID
    pub fn get_grant(&self, grant_id: Uuid) -> Result<Option<InventoryGrant>> {
        self.get_decoded(CF_GRANTS, grant_id.as_bytes())
    }

    /// All grants of one item held by one competitor, oldest first
    pub fn grants_for(&self, owner: &AccountId, item_id: Uuid) -> Result<Vec<InventoryGrant>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let prefix = Self::owner_grants_prefix(owner, item_id);

        let mut grants = Vec::new();
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            let id_bytes: [u8; 16] = key[prefix.len()..]
                .try_into()
                .map_err(|_| Error::Storage("malformed grant index key".to_string()))?;
            let grant_id = Uuid::from_bytes(id_bytes);
            let grant = self.get_grant(grant_id)?.ok_or_else(|| {
                Error::Storage(format!("grant index references missing grant {}", grant_id))
            })?;
            grants.push(grant);
        }
        grants.sort_by_key(|g| g.created_at);
        Ok(grants)
    }

    // Trade/claim reads

    /// Get trade by ID
    pub fn get_trade(&self, trade_id: Uuid) -> Result<Option<Trade>> {
        self.get_decoded(CF_TRADES, trade_id.as_bytes())
    }

    /// Get a competitor's claim for one calendar day, if present
    pub fn get_claim(
        &self,
        account: &AccountId,
        claim_date: NaiveDate,
    ) -> Result<Option<DailyRewardClaim>> {
        self.get_decoded(CF_CLAIMS, &Self::claim_key(account, claim_date))
    }

    // Batch builders

    fn guard_account_version(&self, account: &AccountId, expected: u64) -> Result<()> {
        let current = self.get_account(account)?.map(|a| a.version).unwrap_or(0);
        if current != expected {
            return Err(Error::Conflict(format!(
                "account {} version moved: expected {}, found {}",
                account, expected, current
            )));
        }
        Ok(())
    }

    fn batch_transaction(&self, batch: &mut WriteBatch, txn: &LedgerTransaction) -> Result<()> {
        self.batch_put(batch, CF_TRANSACTIONS, txn.id.as_bytes(), txn)?;

        let cf_indices = self.cf_handle(CF_INDICES)?;
        let ts = txn.created_at.timestamp_nanos_opt().unwrap_or(0);

        if let Some(from) = &txn.from_account {
            batch.put_cf(
                cf_indices,
                Self::timeline_key(IDX_HISTORY, from, ts, txn.id),
                NO_VALUE,
            );
            // Only peer-to-peer transfers count toward the daily cap
            if txn.kind == TransactionKind::Transfer {
                batch.put_cf(
                    cf_indices,
                    Self::timeline_key(IDX_OUTBOUND, from, ts, txn.id),
                    txn.amount.to_le_bytes(),
                );
            }
        }
        if let Some(to) = &txn.to_account {
            batch.put_cf(
                cf_indices,
                Self::timeline_key(IDX_HISTORY, to, ts, txn.id),
                NO_VALUE,
            );
        }
        Ok(())
    }

    fn batch_account(&self, batch: &mut WriteBatch, account: &CurrencyAccount) -> Result<()> {
        self.batch_put(
            batch,
            CF_ACCOUNTS,
            account.account_id.as_str().as_bytes(),
            account,
        )
    }

    fn batch_grant(&self, batch: &mut WriteBatch, grant: &InventoryGrant) -> Result<()> {
        self.batch_put(batch, CF_GRANTS, grant.grant_id.as_bytes(), grant)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        batch.put_cf(
            cf_indices,
            Self::owner_grants_key(&grant.competitor_id, grant.item_id, grant.grant_id),
            NO_VALUE,
        );
        Ok(())
    }

    fn batch_grant_delete(&self, batch: &mut WriteBatch, grant: &InventoryGrant) -> Result<()> {
        let cf_grants = self.cf_handle(CF_GRANTS)?;
        batch.delete_cf(cf_grants, grant.grant_id.as_bytes());
        let cf_indices = self.cf_handle(CF_INDICES)?;
        batch.delete_cf(
            cf_indices,
            Self::owner_grants_key(&grant.competitor_id, grant.item_id, grant.grant_id),
        );
        Ok(())
    }

    // Atomic commits, one per engine operation

    /// Commit a transfer: one ledger row plus both account rows
    pub fn commit_transfer(
        &self,
        txn: &LedgerTransaction,
        from: AccountWrite<'_>,
        to: AccountWrite<'_>,
    ) -> Result<()> {
        self.guard_account_version(&from.0.account_id, from.1)?;
        self.guard_account_version(&to.0.account_id, to.1)?;

        let mut batch = WriteBatch::default();
        self.batch_transaction(&mut batch, txn)?;
        self.batch_account(&mut batch, from.0)?;
        self.batch_account(&mut batch, to.0)?;
        self.db.write(batch)?;

        tracing::debug!(txn_id = %txn.id, amount = txn.amount, "transfer committed");
        Ok(())
    }

    /// Commit a purchase: ledger row, buyer debit, stock decrement, grant
    pub fn commit_purchase(
        &self,
        txn: &LedgerTransaction,
        buyer: AccountWrite<'_>,
        item: &ShopItem,
        grant: &InventoryGrant,
    ) -> Result<()> {
        self.guard_account_version(&buyer.0.account_id, buyer.1)?;

        let mut batch = WriteBatch::default();
        self.batch_transaction(&mut batch, txn)?;
        self.batch_account(&mut batch, buyer.0)?;
        self.batch_put(&mut batch, CF_ITEMS, item.item_id.as_bytes(), item)?;
        self.batch_grant(&mut batch, grant)?;
        self.db.write(batch)?;

        tracing::debug!(txn_id = %txn.id, item_id = %item.item_id, "purchase committed");
        Ok(())
    }

    /// Commit a refund: ledger row, buyer credit, optional stock restore,
    /// grant removal
    pub fn commit_refund(
        &self,
        txn: &LedgerTransaction,
        buyer: AccountWrite<'_>,
        restored_item: Option<&ShopItem>,
        grant: &InventoryGrant,
    ) -> Result<()> {
        self.guard_account_version(&buyer.0.account_id, buyer.1)?;

        let mut batch = WriteBatch::default();
        self.batch_transaction(&mut batch, txn)?;
        self.batch_account(&mut batch, buyer.0)?;
        if let Some(item) = restored_item {
            self.batch_put(&mut batch, CF_ITEMS, item.item_id.as_bytes(), item)?;
        }
        self.batch_grant_delete(&mut batch, grant)?;
        self.db.write(batch)?;

        tracing::debug!(txn_id = %txn.id, grant_id = %grant.grant_id, "refund committed");
        Ok(())
    }

    /// Persist a trade row (creation and non-settling resolutions)
    pub fn put_trade(&self, trade: &Trade) -> Result<()> {
        let cf = self.cf_handle(CF_TRADES)?;
        self.db
            .put_cf(cf, trade.trade_id.as_bytes(), bincode::serialize(trade)?)?;
        Ok(())
    }

    /// Commit an accepted trade: status flip, settlement rows, both account
    /// rows, and every inventory grant the item legs touch
    #[allow(clippy::too_many_arguments)]
    pub fn commit_trade_settlement(
        &self,
        trade: &Trade,
        txns: &[LedgerTransaction],
        initiator: AccountWrite<'_>,
        counterparty: AccountWrite<'_>,
        grant_puts: &[InventoryGrant],
        grant_deletes: &[InventoryGrant],
    ) -> Result<()> {
        self.guard_account_version(&initiator.0.account_id, initiator.1)?;
        self.guard_account_version(&counterparty.0.account_id, counterparty.1)?;

        let mut batch = WriteBatch::default();
        self.batch_put(&mut batch, CF_TRADES, trade.trade_id.as_bytes(), trade)?;
        for txn in txns {
            self.batch_transaction(&mut batch, txn)?;
        }
        self.batch_account(&mut batch, initiator.0)?;
        self.batch_account(&mut batch, counterparty.0)?;
        for grant in grant_puts {
            self.batch_grant(&mut batch, grant)?;
        }
        for grant in grant_deletes {
            self.batch_grant_delete(&mut batch, grant)?;
        }
        self.db.write(batch)?;

        tracing::debug!(trade_id = %trade.trade_id, legs = txns.len(), "trade settled");
        Ok(())
    }

    /// Commit a daily reward: claim marker, ledger row, and credit together
    pub fn commit_reward_claim(
        &self,
        claim: &DailyRewardClaim,
        txn: &LedgerTransaction,
        competitor: AccountWrite<'_>,
    ) -> Result<()> {
        self.guard_account_version(&competitor.0.account_id, competitor.1)?;

        let mut batch = WriteBatch::default();
        self.batch_put(
            &mut batch,
            CF_CLAIMS,
            &Self::claim_key(&claim.competitor_id, claim.claim_date),
            claim,
        )?;
        self.batch_transaction(&mut batch, txn)?;
        self.batch_account(&mut batch, competitor.0)?;
        self.db.write(batch)?;

        tracing::debug!(txn_id = %txn.id, claim_date = %claim.claim_date, "daily reward committed");
        Ok(())
    }

    /// Persist a shop
    pub fn put_shop(&self, shop: &Shop) -> Result<()> {
        let cf = self.cf_handle(CF_SHOPS)?;
        self.db
            .put_cf(cf, shop.shop_id.as_bytes(), bincode::serialize(shop)?)?;
        Ok(())
    }

    /// Commit a new item: item row plus shop membership index
    pub fn commit_item_added(&self, item: &ShopItem) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.batch_put(&mut batch, CF_ITEMS, item.item_id.as_bytes(), item)?;
        let cf_indices = self.cf_handle(CF_INDICES)?;
        batch.put_cf(
            cf_indices,
            Self::shop_items_key(item.shop_id, item.item_id),
            NO_VALUE,
        );
        self.db.write(batch)?;
        Ok(())
    }

    /// Overwrite an existing item row (availability toggles)
    pub fn put_item(&self, item: &ShopItem) -> Result<()> {
        let cf = self.cf_handle(CF_ITEMS)?;
        self.db
            .put_cf(cf, item.item_id.as_bytes(), bincode::serialize(item)?)?;
        Ok(())
    }

    /// Overwrite an existing grant row (consumption tracking)
    pub fn put_grant(&self, grant: &InventoryGrant) -> Result<()> {
        let cf = self.cf_handle(CF_GRANTS)?;
        self.db
            .put_cf(cf, grant.grant_id.as_bytes(), bincode::serialize(grant)?)?;
        Ok(())
    }

    // Statistics

    /// Approximate storage statistics
    pub fn stats(&self) -> Result<StorageStats> {
        Ok(StorageStats {
            total_accounts: self.approximate_count(CF_ACCOUNTS)?,
            total_transactions: self.approximate_count(CF_TRANSACTIONS)?,
            total_trades: self.approximate_count(CF_TRADES)?,
        })
    }

    fn approximate_count(&self, cf_name: &str) -> Result<u64> {
        let cf = self.cf_handle(cf_name)?;
        let prop = self
            .db
            .property_int_value_cf(cf, "rocksdb.estimate-num-keys")?
            .unwrap_or(0);
        Ok(prop)
    }

    /// Close database (graceful shutdown)
    pub fn close(self) -> Result<()> {
        drop(self.db);
        tracing::info!("economy ledger store closed");
        Ok(())
    }
}

/// Approximate row counts
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Materialized account rows
    pub total_accounts: u64,
    /// Ledger transactions
    pub total_transactions: u64,
    /// Trades in any state
    pub total_trades: u64,
}
