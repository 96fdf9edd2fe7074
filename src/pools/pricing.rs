use alloy_primitives::U256;
use uniswap_v3_math::full_math::mul_div;
use uniswap_v3_math::tick_math::get_sqrt_ratio_at_tick;

use crate::error::VaultError;

pub const Q64: U256 = U256::from_limbs([0, 1, 0, 0]); // 2^64
pub const Q96: U256 = U256::from_limbs([0, 0x1_0000_0000, 0, 0]); // 2^96

/// Display scale for human-readable prices: 10^18.
const PRICE_SCALE: U256 = U256::from_limbs([1_000_000_000_000_000_000u64, 0, 0, 0]);

/// Converts sqrtPriceX96 to an X96 price of token1 in token0 units.
pub fn price_x96_from_sqrt(sqrt_price_x96: U256) -> Result<U256, VaultError> {
    mul_div_checked(sqrt_price_x96, sqrt_price_x96, Q96, "price from sqrt price")
}

/// Converts sqrtPriceX96 to price (token1/token0) scaled by 10^18.
/// Returns None on overflow.
pub fn sqrt_price_x96_to_price(sqrt_price_x96: U256) -> Option<U256> {
    // price_scaled = sqrtPriceX96² * 10^18 / 2^192
    let scaled = sqrt_price_x96.checked_mul(PRICE_SCALE)?;
    mul_div(sqrt_price_x96, scaled, Q96 * Q96).ok()
}

pub fn sqrt_price_at_tick(tick: i32) -> Result<U256, VaultError> {
    get_sqrt_ratio_at_tick(tick).map_err(|_| VaultError::ArithmeticFault("sqrt price at tick"))
}

/// 512-bit intermediate `a * b / denominator`, floor rounded.
pub fn mul_div_checked(
    a: U256,
    b: U256,
    denominator: U256,
    context: &'static str,
) -> Result<U256, VaultError> {
    if denominator.is_zero() {
        return Err(VaultError::ArithmeticFault(context));
    }
    mul_div(a, b, denominator).map_err(|_| VaultError::ArithmeticFault(context))
}

pub fn add(a: U256, b: U256, context: &'static str) -> Result<U256, VaultError> {
    a.checked_add(b).ok_or(VaultError::ArithmeticFault(context))
}

pub fn sub(a: U256, b: U256, context: &'static str) -> Result<U256, VaultError> {
    a.checked_sub(b).ok_or(VaultError::ArithmeticFault(context))
}

pub fn mul(a: U256, b: U256, context: &'static str) -> Result<U256, VaultError> {
    a.checked_mul(b).ok_or(VaultError::ArithmeticFault(context))
}

pub fn div(a: U256, b: U256, context: &'static str) -> Result<U256, VaultError> {
    a.checked_div(b).ok_or(VaultError::ArithmeticFault(context))
}
