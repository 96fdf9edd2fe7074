//! Read-only snapshot of one position and its pool from a live node.

use alloy::{
    primitives::{Address, U256, aliases::U24},
    providers::Provider,
    sol,
};
use futures_util::future;
use serde::Serialize;

use super::oracle::TWAP_SECONDS;
use crate::external::{ExternalError, PoolKey, PoolOracle, PoolState, PositionInfo};

sol! {
    #[sol(rpc)]
    contract NonfungiblePositionManager {
        struct CollectParams {
            uint256 tokenId;
            address recipient;
            uint128 amount0Max;
            uint128 amount1Max;
        }

        function ownerOf(uint256 tokenId) external view returns (address owner);

        function positions(uint256 tokenId) external view returns (
            uint96 nonce,
            address operator,
            address token0,
            address token1,
            uint24 fee,
            int24 tickLower,
            int24 tickUpper,
            uint128 liquidity,
            uint256 feeGrowthInside0LastX128,
            uint256 feeGrowthInside1LastX128,
            uint128 tokensOwed0,
            uint128 tokensOwed1
        );

        function collect(CollectParams calldata params) external payable returns (uint256 amount0, uint256 amount1);
    }
}

sol! {
    #[sol(rpc)]
    contract UniswapV3Factory {
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool);
    }
}

sol! {
    #[sol(rpc)]
    contract UniswapV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96,
            int24 tick,
            uint16 observationIndex,
            uint16 observationCardinality,
            uint16 observationCardinalityNext,
            uint8 feeProtocol,
            bool unlocked
        );

        function observe(uint32[] calldata secondsAgos) external view returns (
            int56[] memory tickCumulatives,
            uint160[] memory secondsPerLiquidityCumulativeX128s
        );
    }
}

/// A position as the manager reports it, plus what a `collect` would pay out
/// right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PositionSnapshot {
    pub position_id: U256,
    pub owner: Address,
    pub position: PositionInfo,
    pub fees0: U256,
    pub fees1: U256,
}

/// Pool state frozen at fetch time. Only the `[0, TWAP_SECONDS]` observation
/// is available; any other window is reported as unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSnapshot {
    pub address: Address,
    pub key: PoolKey,
    pub state: PoolState,
    /// `None` when the pool reverted the observation (not enough history).
    pub cumulatives: Option<[i64; 2]>,
}

impl PoolOracle for PoolSnapshot {
    fn pool_state(&self, key: &PoolKey) -> Result<PoolState, ExternalError> {
        if *key != self.key {
            return Err(ExternalError::UnknownPool(*key));
        }
        Ok(self.state)
    }

    fn observe(&self, key: &PoolKey, seconds_agos: &[u32]) -> Result<Vec<i64>, ExternalError> {
        if *key != self.key {
            return Err(ExternalError::UnknownPool(*key));
        }
        let cumulatives = self
            .cumulatives
            .ok_or(ExternalError::ObservationUnavailable {
                seconds_ago: TWAP_SECONDS,
            })?;
        seconds_agos
            .iter()
            .map(|ago| match *ago {
                0 => Ok(cumulatives[0]),
                TWAP_SECONDS => Ok(cumulatives[1]),
                other => Err(ExternalError::ObservationUnavailable { seconds_ago: other }),
            })
            .collect()
    }
}

fn provider_error(context: &str, err: impl std::fmt::Display) -> ExternalError {
    ExternalError::Provider(format!("{context}: {err}"))
}

/// Fetches the position, its pool and its owed fees.
///
/// The fee figure comes from an `eth_call` of `collect` sent from the current
/// owner, so it includes fees accrued since the last poke.
pub async fn fetch_snapshot<P: Provider + Clone>(
    provider: P,
    position_manager: Address,
    factory: Address,
    position_id: U256,
) -> Result<(PositionSnapshot, PoolSnapshot), ExternalError> {
    let manager = NonfungiblePositionManager::new(position_manager, provider.clone());

    let positions_call = manager.positions(position_id);
    let owner_call = manager.ownerOf(position_id);
    let (raw, owner) = future::try_join(
        async { positions_call.call().await },
        async { owner_call.call().await },
    )
    .await
    .map_err(|err| provider_error("position lookup", err))?;

    let position = PositionInfo {
        token0: raw.token0,
        token1: raw.token1,
        fee: raw.fee.to::<u32>(),
        tick_lower: raw.tickLower.as_i32(),
        tick_upper: raw.tickUpper.as_i32(),
        liquidity: raw.liquidity,
    };
    let key = position.pool_key();

    let pool_address = UniswapV3Factory::new(factory, provider.clone())
        .getPool(key.token0, key.token1, U24::from(key.fee))
        .call()
        .await
        .map_err(|err| provider_error("pool lookup", err))?;
    if pool_address == Address::ZERO {
        return Err(ExternalError::UnknownPool(key));
    }

    let pool = UniswapV3Pool::new(pool_address, provider);
    let slot0_call = pool.slot0();
    let observe_call = pool.observe(vec![0, TWAP_SECONDS]);
    let collect_call = manager
        .collect(NonfungiblePositionManager::CollectParams {
            tokenId: position_id,
            recipient: owner,
            amount0Max: u128::MAX,
            amount1Max: u128::MAX,
        })
        .from(owner);

    let (slot0, observed, collected) = future::join3(
        async { slot0_call.call().await },
        async { observe_call.call().await },
        async { collect_call.call().await },
    )
    .await;
    let slot0 = slot0.map_err(|err| provider_error("slot0", err))?;
    let collected = collected.map_err(|err| provider_error("collect simulation", err))?;

    let cumulatives = match observed {
        Ok(obs) => match obs.tickCumulatives.as_slice() {
            &[now, then] => Some([now.as_i64(), then.as_i64()]),
            _ => None,
        },
        Err(err) => {
            tracing::warn!(pool = %pool_address, error = %err, "observe reverted");
            None
        }
    };

    let position_snapshot = PositionSnapshot {
        position_id,
        owner,
        position,
        fees0: collected.amount0,
        fees1: collected.amount1,
    };
    let pool_snapshot = PoolSnapshot {
        address: pool_address,
        key,
        state: PoolState {
            sqrt_price_x96: U256::from(slot0.sqrtPriceX96),
            tick: slot0.tick.as_i32(),
            observation_cardinality: slot0.observationCardinality,
        },
        cumulatives,
    };

    tracing::info!(
        position_id = %position_id,
        owner = %owner,
        pool = %pool_address,
        tick = pool_snapshot.state.tick,
        fees0 = %position_snapshot.fees0,
        fees1 = %position_snapshot.fees1,
        "fetched position snapshot"
    );
    Ok((position_snapshot, pool_snapshot))
}
