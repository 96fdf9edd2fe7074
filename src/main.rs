use std::error::Error;

use alloy::primitives::{Address, U256};
use alloy::providers::ProviderBuilder;
use serde::Serialize;

use auto_compounder::config::RuntimeConfig;
use auto_compounder::pools::oracle::{check_price_safety, read_price};
use auto_compounder::pools::pricing::sqrt_price_x96_to_price;
use auto_compounder::pools::rpc::{PositionSnapshot, fetch_snapshot};
use auto_compounder::rebalance::{BonusMode, ideal_ratio, max_deposit, plan_conversion};
use auto_compounder::vault::{compound_fee, protocol_share};

/// What a keeper would get out of compounding the position right now,
/// without swapping.
#[derive(Debug, Serialize)]
struct CompoundPreview {
    snapshot: PositionSnapshot,
    pool: Address,
    tick: i32,
    price_x96: U256,
    /// token1 per token0, 18 decimals.
    price: Option<U256>,
    price_check: Result<(), String>,
    bonus_mode: BonusMode,
    conversion_sells_token0: bool,
    conversion_amount_token0: U256,
    deposit0: U256,
    deposit1: U256,
    fee0: U256,
    fee1: U256,
    keeper_bonus0: U256,
    keeper_bonus1: U256,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RuntimeConfig::from_env()?;
    let provider = ProviderBuilder::new().connect_http(config.rpc_url.parse()?);

    let (snapshot, pool) = fetch_snapshot(
        provider,
        config.position_manager,
        config.factory,
        config.position_id,
    )
    .await?;

    let reading = read_price(&pool, &pool.key)?;
    let price_check = check_price_safety(&pool, &pool.key, &reading, config.bonus.max_tick_deviation)
        .map_err(|err| err.to_string());
    if let Err(reason) = &price_check {
        tracing::warn!(%reason, "compounding would be rejected at the current price");
    }

    let (fees0, fees1) = (snapshot.fees0, snapshot.fees1);
    let ideal = ideal_ratio(
        reading.sqrt_price_x96,
        snapshot.position.tick_lower,
        snapshot.position.tick_upper,
    )?;
    let plan = plan_conversion(
        ideal,
        reading.price_x96,
        fees0,
        fees1,
        config.bonus_mode,
        false,
        &config.bonus,
    )?;
    let (deposit0, deposit1) =
        max_deposit(fees0, fees1, &plan, config.bonus_mode, false, &config.bonus)?;
    let (fee0, fee1) = compound_fee(
        config.bonus_mode,
        &config.bonus,
        reading.price_x96,
        (fees0, fees1),
        (deposit0, deposit1),
    )?;

    let preview = CompoundPreview {
        pool: pool.address,
        tick: reading.tick,
        price_x96: reading.price_x96,
        price: sqrt_price_x96_to_price(reading.sqrt_price_x96),
        price_check,
        bonus_mode: config.bonus_mode,
        conversion_sells_token0: plan.sell_a,
        conversion_amount_token0: plan.delta_a,
        deposit0,
        deposit1,
        fee0,
        fee1,
        keeper_bonus0: fee0 - protocol_share(fee0, &config.bonus)?,
        keeper_bonus1: fee1 - protocol_share(fee1, &config.bonus)?,
        snapshot,
    };

    tracing::info!(
        position_id = %config.position_id,
        bonus_mode = %config.bonus_mode,
        "computed compound preview"
    );
    println!("{}", serde_json::to_string_pretty(&preview)?);

    Ok(())
}
