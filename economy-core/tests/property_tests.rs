//! Property-based tests for economy ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Conservation: transfers move value, they never create or destroy it
//! - Non-negativity: no reachable state holds a negative balance
//! - All-or-nothing: a failed operation leaves the ledger untouched
//! - Idempotency: at most one daily reward claim per competitor per day

use economy_core::{
    AccountId, Config, Economy, Error, NewItem, TradeItemLeg, TradeOffer, TradeStatus,
};
use proptest::prelude::*;
use std::sync::Arc;

async fn open_economy(reward: u64, transfer_cap: u64) -> (Economy, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.data_dir = temp_dir.path().to_path_buf();
    config.economy.daily_reward_amount = reward;
    config.economy.daily_transfer_limit = transfer_cap;

    let economy = Economy::open(config).await.unwrap();
    (economy, temp_dir)
}

/// Strategy for a sequence of transfer attempts inside a 3-account set
fn transfer_plan() -> impl Strategy<Value = Vec<(usize, usize, u64)>> {
    prop::collection::vec((0usize..3, 0usize..3, 1u64..200), 1..25)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: the balance sum of a closed account set is invariant under
    /// any sequence of transfer attempts, successful or not
    #[test]
    fn prop_conservation_under_transfers(plan in transfer_plan()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (economy, _temp) = open_economy(1_000, 1_000_000).await;
            let accounts = vec![
                AccountId::new("alpha"),
                AccountId::new("bravo"),
                AccountId::new("charlie"),
            ];

            for account in &accounts {
                economy.claim_daily_reward(account).await.unwrap();
            }
            let initial_total = 3 * 1_000u64;

            for (from, to, amount) in plan {
                if from == to {
                    continue;
                }
                match economy
                    .transfer(&accounts[from], &accounts[to], amount, "shuffle")
                    .await
                {
                    Ok(_) => {}
                    Err(Error::InsufficientBalance { .. }) => {}
                    Err(other) => panic!("unexpected transfer error: {}", other),
                }
            }

            let mut total = 0u64;
            for account in &accounts {
                let balance = economy.balance(account).unwrap().balance;
                // Non-negativity is structural (u64), but no account may hold
                // more than everything in circulation
                prop_assert!(balance <= initial_total);
                total += balance;
            }
            prop_assert_eq!(total, initial_total);

            economy.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: a transfer rejected for insolvency changes neither balance
    #[test]
    fn prop_failed_transfer_is_a_noop(balance in 1u64..100, excess in 1u64..100) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (economy, _temp) = open_economy(balance, 1_000_000).await;
            let alice = AccountId::new("alice");
            let bob = AccountId::new("bob");

            economy.claim_daily_reward(&alice).await.unwrap();

            let attempt = balance + excess;
            let err = economy
                .transfer(&alice, &bob, attempt, "too much")
                .await
                .unwrap_err();
            prop_assert!(matches!(err, Error::InsufficientBalance { .. }));

            prop_assert_eq!(economy.balance(&alice).unwrap().balance, balance);
            prop_assert_eq!(economy.balance(&bob).unwrap().balance, 0);
            prop_assert!(economy.history(&bob, 10, 0).unwrap().is_empty());

            economy.shutdown().await.unwrap();
            Ok(())
        })?;
    }

    /// Property: ledger history pages newest-first without gaps
    #[test]
    fn prop_history_newest_first(count in 1usize..10) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let (economy, _temp) = open_economy(10_000, 1_000_000).await;
            let alice = AccountId::new("alice");
            let bob = AccountId::new("bob");

            economy.claim_daily_reward(&alice).await.unwrap();

            let mut ids = Vec::new();
            for i in 0..count {
                let txn = economy
                    .transfer(&alice, &bob, 1 + i as u64, "drip")
                    .await
                    .unwrap();
                ids.push(txn.id);
            }

            // History includes the reward plus every transfer, newest first
            let history = economy.history(&alice, count + 1, 0).unwrap();
            prop_assert_eq!(history.len(), count + 1);
            for (i, txn_id) in ids.iter().rev().enumerate() {
                prop_assert_eq!(&history[i].id, txn_id);
            }

            economy.shutdown().await.unwrap();
            Ok(())
        })?;
    }
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    /// Scenario: A has 100, transfers 60 to B
    #[tokio::test]
    async fn test_transfer_moves_balance() {
        let (economy, _temp) = open_economy(100, 1_000_000).await;
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");

        economy.claim_daily_reward(&alice).await.unwrap();
        assert_eq!(economy.balance(&alice).unwrap().balance, 100);

        let prior_bob = economy.balance(&bob).unwrap().balance;
        economy.transfer(&alice, &bob, 60, "gift").await.unwrap();

        assert_eq!(economy.balance(&alice).unwrap().balance, 40);
        assert_eq!(economy.balance(&bob).unwrap().balance, prior_bob + 60);

        economy.shutdown().await.unwrap();
    }

    /// Scenario: A has 30, a 60 transfer fails and changes nothing
    #[tokio::test]
    async fn test_insolvent_transfer_rejected() {
        let (economy, _temp) = open_economy(30, 1_000_000).await;
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");

        economy.claim_daily_reward(&alice).await.unwrap();

        let err = economy.transfer(&alice, &bob, 60, "gift").await.unwrap_err();
        assert!(matches!(
            err,
            Error::InsufficientBalance {
                balance: 30,
                required: 60,
                ..
            }
        ));

        assert_eq!(economy.balance(&alice).unwrap().balance, 30);
        assert_eq!(economy.balance(&bob).unwrap().balance, 0);

        economy.shutdown().await.unwrap();
    }

    /// Scenario: transfer cap 100; 60 passes, the next 50 is refused
    #[tokio::test]
    async fn test_daily_transfer_cap() {
        let (economy, _temp) = open_economy(200, 100).await;
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");
        let carol = AccountId::new("carol");

        economy.claim_daily_reward(&alice).await.unwrap();
        economy.transfer(&alice, &bob, 60, "first").await.unwrap();

        let err = economy
            .transfer(&alice, &carol, 50, "second")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TransferLimitExceeded {
                spent: 60,
                attempted: 50,
                limit: 100,
                ..
            }
        ));

        // Only the first transfer took effect
        assert_eq!(economy.balance(&alice).unwrap().balance, 140);
        assert_eq!(economy.balance(&carol).unwrap().balance, 0);

        economy.shutdown().await.unwrap();
    }

    /// Purchases only count against the buyer's solvency, not the transfer cap
    #[tokio::test]
    async fn test_purchases_do_not_consume_transfer_cap() {
        let (economy, _temp) = open_economy(200, 100).await;
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");

        economy.claim_daily_reward(&alice).await.unwrap();

        let shop = economy.create_shop("armory").await.unwrap();
        let item = economy
            .add_item(
                shop.shop_id,
                NewItem {
                    name: "banner".to_string(),
                    price: 80,
                    stock: None,
                    is_available: true,
                },
            )
            .await
            .unwrap();
        economy.purchase(item.item_id, &alice, 1).await.unwrap();

        // The full cap is still available after an 80-coin purchase
        economy.transfer(&alice, &bob, 100, "gift").await.unwrap();
        assert_eq!(economy.balance(&alice).unwrap().balance, 20);

        economy.shutdown().await.unwrap();
    }

    /// Scenario: two concurrent buyers race for the last unit
    #[tokio::test]
    async fn test_concurrent_purchase_of_last_unit() {
        let (economy, _temp) = open_economy(100, 1_000_000).await;
        let economy = Arc::new(economy);
        let buyer_x = AccountId::new("buyer-x");
        let buyer_y = AccountId::new("buyer-y");

        economy.claim_daily_reward(&buyer_x).await.unwrap();
        economy.claim_daily_reward(&buyer_y).await.unwrap();

        let shop = economy.create_shop("armory").await.unwrap();
        let item = economy
            .add_item(
                shop.shop_id,
                NewItem {
                    name: "last shield".to_string(),
                    price: 10,
                    stock: Some(1),
                    is_available: true,
                },
            )
            .await
            .unwrap();

        let a = {
            let economy = economy.clone();
            let buyer = buyer_x.clone();
            tokio::spawn(async move { economy.purchase(item.item_id, &buyer, 1).await })
        };
        let b = {
            let economy = economy.clone();
            let buyer = buyer_y.clone();
            tokio::spawn(async move { economy.purchase(item.item_id, &buyer, 1).await })
        };

        let results = [a.await.unwrap(), b.await.unwrap()];
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(Error::ItemOutOfStock {
                stock: 0,
                requested: 1,
                ..
            })
        )));

        assert_eq!(economy.item(item.item_id).unwrap().stock, Some(0));

        // Exactly one buyer paid
        let paid = [&buyer_x, &buyer_y]
            .iter()
            .filter(|b| economy.balance(b).unwrap().balance == 90)
            .count();
        assert_eq!(paid, 1);

        // Dropping the last handle stops the actor
        drop(economy);
    }

    /// Purchase debits, decrements stock, and grants inventory atomically
    #[tokio::test]
    async fn test_purchase_receipt_and_grant() {
        let (economy, _temp) = open_economy(100, 1_000_000).await;
        let bob = AccountId::new("bob");

        economy.claim_daily_reward(&bob).await.unwrap();

        let shop = economy.create_shop("armory").await.unwrap();
        let item = economy
            .add_item(
                shop.shop_id,
                NewItem {
                    name: "shield".to_string(),
                    price: 10,
                    stock: Some(5),
                    is_available: true,
                },
            )
            .await
            .unwrap();

        let receipt = economy.purchase(item.item_id, &bob, 2).await.unwrap();
        assert_eq!(receipt.total_cost, 20);
        assert_eq!(receipt.stock_before, Some(5));
        assert_eq!(receipt.stock_after, Some(3));
        // Pure sink: nothing is credited
        assert!(receipt.transaction.to_account.is_none());
        assert_eq!(receipt.grant.quantity, 2);
        assert_eq!(receipt.grant.used_quantity, 0);

        assert_eq!(economy.balance(&bob).unwrap().balance, 80);
        assert_eq!(economy.item(item.item_id).unwrap().stock, Some(3));
        assert_eq!(economy.grants_for(&bob, item.item_id).unwrap().len(), 1);

        economy.shutdown().await.unwrap();
    }

    /// A failed purchase precondition leaves every row untouched
    #[tokio::test]
    async fn test_purchase_failures_are_noops() {
        let (economy, _temp) = open_economy(100, 1_000_000).await;
        let bob = AccountId::new("bob");

        economy.claim_daily_reward(&bob).await.unwrap();

        let shop = economy.create_shop("armory").await.unwrap();
        let scarce = economy
            .add_item(
                shop.shop_id,
                NewItem {
                    name: "scarce".to_string(),
                    price: 10,
                    stock: Some(2),
                    is_available: true,
                },
            )
            .await
            .unwrap();
        let hidden = economy
            .add_item(
                shop.shop_id,
                NewItem {
                    name: "hidden".to_string(),
                    price: 10,
                    stock: None,
                    is_available: false,
                },
            )
            .await
            .unwrap();
        let pricey = economy
            .add_item(
                shop.shop_id,
                NewItem {
                    name: "pricey".to_string(),
                    price: 500,
                    stock: Some(1),
                    is_available: true,
                },
            )
            .await
            .unwrap();

        let err = economy.purchase(scarce.item_id, &bob, 3).await.unwrap_err();
        assert!(matches!(err, Error::ItemOutOfStock { stock: 2, requested: 3, .. }));

        let err = economy.purchase(hidden.item_id, &bob, 1).await.unwrap_err();
        assert!(matches!(err, Error::ItemNotAvailable(_)));

        let err = economy.purchase(pricey.item_id, &bob, 1).await.unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));

        let err = economy
            .purchase(uuid::Uuid::now_v7(), &bob, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ItemNotFound(_)));

        // Nothing moved
        assert_eq!(economy.balance(&bob).unwrap().balance, 100);
        assert_eq!(economy.item(scarce.item_id).unwrap().stock, Some(2));
        assert_eq!(economy.item(pricey.item_id).unwrap().stock, Some(1));
        assert!(economy.grants_for(&bob, scarce.item_id).unwrap().is_empty());

        economy.shutdown().await.unwrap();
    }

    /// Scenario: second same-day claim yields AlreadyClaimed and one credit
    #[tokio::test]
    async fn test_daily_claim_idempotent() {
        let (economy, _temp) = open_economy(50, 1_000_000).await;
        let alice = AccountId::new("alice");

        let grant = economy.claim_daily_reward(&alice).await.unwrap();
        assert_eq!(grant.reward_amount, 50);

        let err = economy.claim_daily_reward(&alice).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyClaimed { .. }));

        // Exactly one credit landed
        assert_eq!(economy.balance(&alice).unwrap().balance, 50);
        assert_eq!(economy.history(&alice, 10, 0).unwrap().len(), 1);

        economy.shutdown().await.unwrap();
    }

    /// Trade accepted: both legs settle atomically
    #[tokio::test]
    async fn test_trade_settlement_moves_both_legs() {
        let (economy, _temp) = open_economy(100, 1_000_000).await;
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");

        economy.claim_daily_reward(&alice).await.unwrap();
        economy.claim_daily_reward(&bob).await.unwrap();

        // Bob buys shields, then trades one to Alice for 20 coins
        let shop = economy.create_shop("armory").await.unwrap();
        let item = economy
            .add_item(
                shop.shop_id,
                NewItem {
                    name: "shield".to_string(),
                    price: 10,
                    stock: Some(5),
                    is_available: true,
                },
            )
            .await
            .unwrap();
        economy.purchase(item.item_id, &bob, 2).await.unwrap();

        let trade = economy
            .create_trade(
                &bob,
                &alice,
                TradeOffer::items(vec![TradeItemLeg {
                    item_id: item.item_id,
                    quantity: 1,
                }]),
                TradeOffer::currency(20),
            )
            .await
            .unwrap();
        assert_eq!(trade.status, TradeStatus::Pending);

        // Proposal alone moves nothing
        assert_eq!(economy.balance(&alice).unwrap().balance, 100);
        assert_eq!(economy.balance(&bob).unwrap().balance, 80);

        let outcome = economy
            .respond_to_trade(trade.trade_id, &alice, true)
            .await
            .unwrap();
        assert_eq!(outcome.trade.status, TradeStatus::Accepted);
        assert!(outcome.trade.resolved_at.is_some());
        assert_eq!(outcome.settlement.len(), 1);

        assert_eq!(economy.balance(&alice).unwrap().balance, 80);
        assert_eq!(economy.balance(&bob).unwrap().balance, 100);

        // One shield moved from Bob to Alice
        let bob_grants = economy.grants_for(&bob, item.item_id).unwrap();
        assert_eq!(bob_grants.iter().map(|g| g.available()).sum::<u32>(), 1);
        let alice_grants = economy.grants_for(&alice, item.item_id).unwrap();
        assert_eq!(alice_grants.iter().map(|g| g.available()).sum::<u32>(), 1);

        economy.shutdown().await.unwrap();
    }

    /// Scenario: settlement re-validation fails, trade remains Pending
    #[tokio::test]
    async fn test_failed_settlement_keeps_trade_pending() {
        let (economy, _temp) = open_economy(200, 1_000_000).await;
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");

        economy.claim_daily_reward(&alice).await.unwrap();
        // Bob never claims: he cannot cover his own offer at accept time

        let trade = economy
            .create_trade(
                &alice,
                &bob,
                TradeOffer::currency(50),
                TradeOffer::currency(20),
            )
            .await
            .unwrap();

        let err = economy
            .respond_to_trade(trade.trade_id, &bob, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransfer(_)));

        // Not silently rejected: a failed settlement is a distinct outcome
        let stored = economy.trade(trade.trade_id).unwrap();
        assert_eq!(stored.status, TradeStatus::Pending);
        assert_eq!(economy.balance(&alice).unwrap().balance, 200);
        assert_eq!(economy.balance(&bob).unwrap().balance, 0);

        // Funding Bob lets the same trade settle on retry
        economy.claim_daily_reward(&bob).await.unwrap();
        let outcome = economy
            .respond_to_trade(trade.trade_id, &bob, true)
            .await
            .unwrap();
        assert_eq!(outcome.trade.status, TradeStatus::Accepted);
        assert_eq!(economy.balance(&alice).unwrap().balance, 170);
        assert_eq!(economy.balance(&bob).unwrap().balance, 230);

        economy.shutdown().await.unwrap();
    }

    /// Resolved trades accept no further responses
    #[tokio::test]
    async fn test_trade_terminal_states_are_final() {
        let (economy, _temp) = open_economy(100, 1_000_000).await;
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");

        economy.claim_daily_reward(&alice).await.unwrap();
        economy.claim_daily_reward(&bob).await.unwrap();

        let trade = economy
            .create_trade(
                &alice,
                &bob,
                TradeOffer::currency(10),
                TradeOffer::currency(5),
            )
            .await
            .unwrap();

        let outcome = economy
            .respond_to_trade(trade.trade_id, &bob, false)
            .await
            .unwrap();
        assert_eq!(outcome.trade.status, TradeStatus::Rejected);
        assert!(outcome.settlement.is_empty());

        // Any further response fails and moves nothing
        let err = economy
            .respond_to_trade(trade.trade_id, &bob, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        assert_eq!(economy.balance(&alice).unwrap().balance, 100);
        assert_eq!(economy.balance(&bob).unwrap().balance, 100);

        economy.shutdown().await.unwrap();
    }

    /// Only the counterparty may respond; either party may cancel
    #[tokio::test]
    async fn test_trade_authorization() {
        let (economy, _temp) = open_economy(100, 1_000_000).await;
        let alice = AccountId::new("alice");
        let bob = AccountId::new("bob");
        let mallory = AccountId::new("mallory");

        economy.claim_daily_reward(&alice).await.unwrap();

        let trade = economy
            .create_trade(
                &alice,
                &bob,
                TradeOffer::currency(10),
                TradeOffer::default(),
            )
            .await
            .unwrap();

        // Neither the initiator nor a stranger may respond
        for wrong in [&alice, &mallory] {
            let err = economy
                .respond_to_trade(trade.trade_id, wrong, true)
                .await
                .unwrap_err();
            assert!(matches!(err, Error::NotAuthorized(_)));
        }

        // A stranger cannot cancel, the initiator can
        let err = economy
            .cancel_trade(trade.trade_id, &mallory)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotAuthorized(_)));

        let cancelled = economy.cancel_trade(trade.trade_id, &alice).await.unwrap();
        assert_eq!(cancelled.status, TradeStatus::Cancelled);

        let err = economy
            .respond_to_trade(trade.trade_id, &bob, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        economy.shutdown().await.unwrap();
    }

    /// Refund credits the buyer back and restores finite stock
    #[tokio::test]
    async fn test_refund_reverses_purchase() {
        let (economy, _temp) = open_economy(100, 1_000_000).await;
        let bob = AccountId::new("bob");

        economy.claim_daily_reward(&bob).await.unwrap();

        let shop = economy.create_shop("armory").await.unwrap();
        let item = economy
            .add_item(
                shop.shop_id,
                NewItem {
                    name: "shield".to_string(),
                    price: 10,
                    stock: Some(5),
                    is_available: true,
                },
            )
            .await
            .unwrap();

        let receipt = economy.purchase(item.item_id, &bob, 2).await.unwrap();
        assert_eq!(economy.balance(&bob).unwrap().balance, 80);

        let refund = economy
            .refund_purchase(receipt.transaction.id)
            .await
            .unwrap();
        assert_eq!(refund.amount, 20);
        assert_eq!(economy.balance(&bob).unwrap().balance, 100);
        assert_eq!(economy.item(item.item_id).unwrap().stock, Some(5));
        assert!(economy.grants_for(&bob, item.item_id).unwrap().is_empty());

        // A second refund of the same purchase is refused
        let err = economy
            .refund_purchase(receipt.transaction.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(economy.balance(&bob).unwrap().balance, 100);

        economy.shutdown().await.unwrap();
    }

    /// Grant consumption never exceeds the granted quantity
    #[tokio::test]
    async fn test_grant_consumption_bounded() {
        let (economy, _temp) = open_economy(100, 1_000_000).await;
        let bob = AccountId::new("bob");
        let mallory = AccountId::new("mallory");

        economy.claim_daily_reward(&bob).await.unwrap();

        let shop = economy.create_shop("armory").await.unwrap();
        let item = economy
            .add_item(
                shop.shop_id,
                NewItem {
                    name: "potion".to_string(),
                    price: 5,
                    stock: None,
                    is_available: true,
                },
            )
            .await
            .unwrap();
        let receipt = economy.purchase(item.item_id, &bob, 3).await.unwrap();
        let grant_id = receipt.grant.grant_id;

        // Only the owner may consume
        let err = economy.use_grant(grant_id, &mallory, 1).await.unwrap_err();
        assert!(matches!(err, Error::NotAuthorized(_)));

        let grant = economy.use_grant(grant_id, &bob, 2).await.unwrap();
        assert_eq!(grant.used_quantity, 2);

        // used_quantity can never exceed quantity
        let err = economy.use_grant(grant_id, &bob, 2).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let grant = economy.use_grant(grant_id, &bob, 1).await.unwrap();
        assert_eq!(grant.used_quantity, 3);

        economy.shutdown().await.unwrap();
    }

    /// A partially used grant blocks the refund path
    #[tokio::test]
    async fn test_refund_refused_after_use() {
        let (economy, _temp) = open_economy(100, 1_000_000).await;
        let bob = AccountId::new("bob");

        economy.claim_daily_reward(&bob).await.unwrap();

        let shop = economy.create_shop("armory").await.unwrap();
        let item = economy
            .add_item(
                shop.shop_id,
                NewItem {
                    name: "potion".to_string(),
                    price: 5,
                    stock: None,
                    is_available: true,
                },
            )
            .await
            .unwrap();
        let receipt = economy.purchase(item.item_id, &bob, 3).await.unwrap();
        economy
            .use_grant(receipt.grant.grant_id, &bob, 1)
            .await
            .unwrap();

        let err = economy
            .refund_purchase(receipt.transaction.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(economy.balance(&bob).unwrap().balance, 85);

        economy.shutdown().await.unwrap();
    }
}
