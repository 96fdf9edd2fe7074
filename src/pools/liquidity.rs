//! Token amounts backing a unit of range liquidity, and the inverse.
//!
//! Bounds are sqrt prices in X96; every helper sorts its bounds first, so
//! callers can pass them in either order.

use alloy_primitives::U256;

use super::pricing::{Q96, div, mul, mul_div_checked, sub};
use crate::error::VaultError;

fn sorted(sqrt_a: U256, sqrt_b: U256) -> (U256, U256) {
    if sqrt_a > sqrt_b {
        (sqrt_b, sqrt_a)
    } else {
        (sqrt_a, sqrt_b)
    }
}

/// `L * 2^96 * (√b - √a) / √b / √a`
pub fn amount0_for_liquidity(
    sqrt_a: U256,
    sqrt_b: U256,
    liquidity: U256,
) -> Result<U256, VaultError> {
    let (lower, upper) = sorted(sqrt_a, sqrt_b);
    let shifted = mul(liquidity, Q96, "amount0 for liquidity")?;
    let width = sub(upper, lower, "amount0 for liquidity")?;
    let scaled = mul_div_checked(shifted, width, upper, "amount0 for liquidity")?;
    div(scaled, lower, "amount0 for liquidity")
}

/// `L * (√b - √a) / 2^96`
pub fn amount1_for_liquidity(
    sqrt_a: U256,
    sqrt_b: U256,
    liquidity: U256,
) -> Result<U256, VaultError> {
    let (lower, upper) = sorted(sqrt_a, sqrt_b);
    let width = sub(upper, lower, "amount1 for liquidity")?;
    mul_div_checked(liquidity, width, Q96, "amount1 for liquidity")
}

/// Splits `liquidity` into the (token0, token1) amounts it represents at the
/// current sqrt price.
pub fn amounts_for_liquidity(
    sqrt_price: U256,
    sqrt_a: U256,
    sqrt_b: U256,
    liquidity: U256,
) -> Result<(U256, U256), VaultError> {
    let (lower, upper) = sorted(sqrt_a, sqrt_b);
    if sqrt_price <= lower {
        Ok((amount0_for_liquidity(lower, upper, liquidity)?, U256::ZERO))
    } else if sqrt_price < upper {
        Ok((
            amount0_for_liquidity(sqrt_price, upper, liquidity)?,
            amount1_for_liquidity(lower, sqrt_price, liquidity)?,
        ))
    } else {
        Ok((U256::ZERO, amount1_for_liquidity(lower, upper, liquidity)?))
    }
}

pub fn liquidity_for_amount0(
    sqrt_a: U256,
    sqrt_b: U256,
    amount0: U256,
) -> Result<U256, VaultError> {
    let (lower, upper) = sorted(sqrt_a, sqrt_b);
    let intermediate = mul_div_checked(lower, upper, Q96, "liquidity for amount0")?;
    let width = sub(upper, lower, "liquidity for amount0")?;
    mul_div_checked(amount0, intermediate, width, "liquidity for amount0")
}

pub fn liquidity_for_amount1(
    sqrt_a: U256,
    sqrt_b: U256,
    amount1: U256,
) -> Result<U256, VaultError> {
    let (lower, upper) = sorted(sqrt_a, sqrt_b);
    let width = sub(upper, lower, "liquidity for amount1")?;
    mul_div_checked(amount1, Q96, width, "liquidity for amount1")
}

/// Largest liquidity both amounts can pay for at the current sqrt price.
pub fn liquidity_for_amounts(
    sqrt_price: U256,
    sqrt_a: U256,
    sqrt_b: U256,
    amount0: U256,
    amount1: U256,
) -> Result<U256, VaultError> {
    let (lower, upper) = sorted(sqrt_a, sqrt_b);
    if sqrt_price <= lower {
        liquidity_for_amount0(lower, upper, amount0)
    } else if sqrt_price < upper {
        let from0 = liquidity_for_amount0(sqrt_price, upper, amount0)?;
        let from1 = liquidity_for_amount1(lower, sqrt_price, amount1)?;
        Ok(from0.min(from1))
    } else {
        liquidity_for_amount1(lower, upper, amount1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pools::pricing::sqrt_price_at_tick;

    fn bounds(lower: i32, upper: i32) -> (U256, U256) {
        (
            sqrt_price_at_tick(lower).expect("lower tick is valid"),
            sqrt_price_at_tick(upper).expect("upper tick is valid"),
        )
    }

    #[test]
    fn price_below_range_needs_only_token0() {
        let (lower, upper) = bounds(100, 200);
        let (a0, a1) = amounts_for_liquidity(Q96, lower, upper, Q96)
            .expect("amounts should fit");
        assert!(a0 > U256::ZERO);
        assert_eq!(a1, U256::ZERO);
    }

    #[test]
    fn price_above_range_needs_only_token1() {
        let (lower, upper) = bounds(-200, -100);
        let (a0, a1) = amounts_for_liquidity(Q96, lower, upper, Q96)
            .expect("amounts should fit");
        assert_eq!(a0, U256::ZERO);
        assert!(a1 > U256::ZERO);
    }

    #[test]
    fn symmetric_range_around_unit_price_is_balanced() {
        let (lower, upper) = bounds(-600, 600);
        let (a0, a1) = amounts_for_liquidity(Q96, lower, upper, Q96)
            .expect("amounts should fit");
        let diff = if a0 > a1 { a0 - a1 } else { a1 - a0 };
        // Both sides are within a fraction of a percent of each other.
        assert!(diff * U256::from(1000) < a0, "a0={a0} a1={a1}");
    }

    #[test]
    fn liquidity_round_trip_never_exceeds_amounts() {
        let (lower, upper) = bounds(-600, 600);
        let amount = U256::from(1_000_000_000_000u64);
        let liquidity = liquidity_for_amounts(Q96, lower, upper, amount, amount)
            .expect("liquidity should fit");
        let (a0, a1) = amounts_for_liquidity(Q96, lower, upper, liquidity)
            .expect("amounts should fit");
        assert!(a0 <= amount && a1 <= amount);
    }

    #[test]
    fn bounds_order_does_not_matter() {
        let (lower, upper) = bounds(-600, 600);
        assert_eq!(
            amount0_for_liquidity(lower, upper, Q96).expect("amount should fit"),
            amount0_for_liquidity(upper, lower, Q96).expect("amount should fit"),
        );
    }

    #[test]
    fn empty_range_is_an_arithmetic_fault() {
        let (lower, _) = bounds(0, 1);
        assert!(liquidity_for_amount1(lower, lower, U256::from(1)).is_err());
    }
}
