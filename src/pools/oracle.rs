use alloy_primitives::U256;

use super::pricing::price_x96_from_sqrt;
use crate::error::VaultError;
use crate::external::{PoolKey, PoolOracle};

/// Window of the manipulation check, in seconds.
pub const TWAP_SECONDS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceReading {
    pub sqrt_price_x96: U256,
    pub tick: i32,
    /// token1 per token0, X96.
    pub price_x96: U256,
    pub observation_cardinality: u16,
}

pub fn read_price<O: PoolOracle + ?Sized>(
    pool: &O,
    key: &PoolKey,
) -> Result<PriceReading, VaultError> {
    let state = pool.pool_state(key)?;
    Ok(PriceReading {
        sqrt_price_x96: state.sqrt_price_x96,
        tick: state.tick,
        price_x96: price_x96_from_sqrt(state.sqrt_price_x96)?,
        observation_cardinality: state.observation_cardinality,
    })
}

/// Average tick between two cumulatives `window` seconds apart, rounded
/// toward negative infinity.
pub fn twap_tick(cumulative_now: i64, cumulative_then: i64, window: u32) -> Option<i32> {
    let delta = cumulative_now.checked_sub(cumulative_then)?;
    let tick = delta.div_euclid(i64::from(window.max(1)));
    i32::try_from(tick).ok()
}

/// Rejects the reading unless the pool has history and its TWAP tick is
/// strictly less than `max_deviation` ticks away from the current tick.
pub fn check_price_safety<O: PoolOracle + ?Sized>(
    pool: &O,
    key: &PoolKey,
    reading: &PriceReading,
    max_deviation: u32,
) -> Result<(), VaultError> {
    let suspected = |twap_tick| VaultError::PriceManipulationSuspected {
        current_tick: reading.tick,
        twap_tick,
    };

    if reading.observation_cardinality < 2 {
        return Err(suspected(None));
    }

    // An observe failure means not enough history; it is a price verdict,
    // not a collaborator failure.
    let cumulatives = match pool.observe(key, &[0, TWAP_SECONDS]) {
        Ok(values) => values,
        Err(err) => {
            tracing::warn!(
                pool_fee = key.fee,
                error = %err,
                "twap observation unavailable"
            );
            return Err(suspected(None));
        }
    };
    let &[now, then] = cumulatives.as_slice() else {
        return Err(suspected(None));
    };
    let Some(twap) = twap_tick(now, then, TWAP_SECONDS) else {
        return Err(suspected(None));
    };

    let deviation = (i64::from(twap) - i64::from(reading.tick)).unsigned_abs();
    if deviation >= u64::from(max_deviation) {
        tracing::warn!(
            current_tick = reading.tick,
            twap_tick = twap,
            max_deviation,
            "pool price diverges from twap"
        );
        return Err(suspected(Some(twap)));
    }

    tracing::debug!(
        current_tick = reading.tick,
        twap_tick = twap,
        "price check passed"
    );
    Ok(())
}
