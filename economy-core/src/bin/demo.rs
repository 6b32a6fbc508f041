//! End-to-end demo: rewards, a transfer, a purchase, and a trade against a
//! throwaway data directory.

use anyhow::Result;
use economy_core::{AccountId, Config, Economy, NewItem, TradeOffer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = Config::from_env()?;
    if std::env::var("ECONOMY_DATA_DIR").is_err() {
        config.data_dir = std::env::temp_dir().join("economy-demo");
    }
    config.economy.daily_reward_amount = 100;

    let economy = Economy::open(config).await?;

    let alice = AccountId::new("alice");
    let bob = AccountId::new("bob");

    // Fund both competitors with the daily reward; a second run against the
    // same data dir will report AlreadyClaimed, which is fine for a demo
    for competitor in [&alice, &bob] {
        match economy.claim_daily_reward(competitor).await {
            Ok(grant) => println!("{} claimed {} coins", competitor, grant.reward_amount),
            Err(err) => println!("{} claim skipped: {}", competitor, err),
        }
    }

    economy.transfer(&alice, &bob, 30, "demo gift").await?;
    println!(
        "after transfer: alice={} bob={}",
        economy.balance(&alice)?.balance,
        economy.balance(&bob)?.balance
    );

    let shop = economy.create_shop("demo armory").await?;
    let item = economy
        .add_item(
            shop.shop_id,
            NewItem {
                name: "wooden shield".to_string(),
                price: 25,
                stock: Some(10),
                is_available: true,
            },
        )
        .await?;

    let receipt = economy.purchase(item.item_id, &bob, 2).await?;
    println!("purchase receipt:\n{}", serde_json::to_string_pretty(&receipt)?);

    let trade = economy
        .create_trade(
            &bob,
            &alice,
            TradeOffer::items(vec![economy_core::TradeItemLeg {
                item_id: item.item_id,
                quantity: 1,
            }]),
            TradeOffer::currency(20),
        )
        .await?;
    let outcome = economy.respond_to_trade(trade.trade_id, &alice, true).await?;
    println!(
        "trade {} resolved as {:?}, {} settlement leg(s)",
        trade.trade_id,
        outcome.trade.status,
        outcome.settlement.len()
    );

    println!(
        "final balances: alice={} bob={}",
        economy.balance(&alice)?.balance,
        economy.balance(&bob)?.balance
    );

    economy.shutdown().await?;
    Ok(())
}
