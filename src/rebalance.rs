//! Turns a pair of token amounts into the mix a range position will accept.
//!
//! The conversion is sized at the current pool price with no slippage
//! allowance; the bonus reserved for a non-owner caller is carved out of the
//! conversion before the swap so it is never reinvested.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::config::BonusConfig;
use crate::error::VaultError;
use crate::external::{ExactInputParams, PoolKey, PoolOracle, SwapRouter, encode_path};
use crate::pools::liquidity::amounts_for_liquidity;
use crate::pools::oracle::{check_price_safety, read_price};
use crate::pools::pricing::{Q64, Q96, add, div, mul, mul_div_checked, sqrt_price_at_tick, sub};

/// Token in which a non-owner caller takes its bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BonusMode {
    /// Bonus is taken from each token in proportion to what was compounded.
    #[default]
    None,
    /// Bonus is paid entirely in token0.
    TokenA,
    /// Bonus is paid entirely in token1.
    TokenB,
}

impl fmt::Display for BonusMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::TokenA => write!(f, "token0"),
            Self::TokenB => write!(f, "token1"),
        }
    }
}

impl FromStr for BonusMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "none" | "both" | "" => Ok(Self::None),
            "token0" | "a" | "token_a" => Ok(Self::TokenA),
            "token1" | "b" | "token_b" => Ok(Self::TokenB),
            other => Err(format!("unknown bonus mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceRequest {
    pub pool: PoolKey,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub amount_a: U256,
    pub amount_b: U256,
    pub bonus_mode: BonusMode,
    pub is_owner: bool,
    pub do_swap: bool,
    pub deadline: u64,
    /// Account that holds the amounts and receives swap output.
    pub vault: Address,
    pub bonus: BonusConfig,
}

/// The single conversion leg that was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapLeg {
    pub sell_a: bool,
    pub amount_in: U256,
    pub amount_out: U256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceOutcome {
    pub amount_a: U256,
    pub amount_b: U256,
    pub price_x96: U256,
    pub max_deposit_a: U256,
    pub max_deposit_b: U256,
    pub swap: Option<SwapLeg>,
}

/// How much token0 to convert, and in which direction, before any swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConversionPlan {
    pub sell_a: bool,
    /// Always expressed in token0 units.
    pub delta_a: U256,
    /// Bonus reserved in token0 (`TokenA` mode only).
    pub reward_a: U256,
    /// Bonus reserved in token1 (`TokenB` mode only).
    pub reward_b: U256,
}

/// Token0/token1 mix that one synthetic unit of liquidity needs.
pub fn ideal_ratio(
    sqrt_price_x96: U256,
    tick_lower: i32,
    tick_upper: i32,
) -> Result<(U256, U256), VaultError> {
    let sqrt_lower = sqrt_price_at_tick(tick_lower)?;
    let sqrt_upper = sqrt_price_at_tick(tick_upper)?;
    amounts_for_liquidity(sqrt_price_x96, sqrt_lower, sqrt_upper, Q96)
}

/// Sizes the conversion for `amount_a`/`amount_b` at `price_x96`, then
/// carves out the caller bonus in single-token modes.
pub fn plan_conversion(
    ideal: (U256, U256),
    price_x96: U256,
    amount_a: U256,
    amount_b: U256,
    bonus_mode: BonusMode,
    is_owner: bool,
    bonus: &BonusConfig,
) -> Result<ConversionPlan, VaultError> {
    let (ideal_a, ideal_b) = ideal;
    let mut plan = ConversionPlan::default();

    if ideal_a.is_zero() {
        plan.sell_a = true;
        plan.delta_a = amount_a;
    } else if ideal_b.is_zero() {
        plan.sell_a = false;
        plan.delta_a = mul_div_checked(amount_b, Q96, price_x96, "token1 to token0")?;
    } else {
        let ratio_x96 = mul_div_checked(ideal_a, Q96, ideal_b, "ideal ratio")?;
        let have_a = mul(amount_a, Q96, "surplus side")?;
        let want_a = mul(ratio_x96, amount_b, "surplus side")?;
        plan.sell_a = want_a < have_a;
        let excess = if plan.sell_a {
            have_a - want_a
        } else {
            want_a - have_a
        };
        let denominator = add(
            mul_div_checked(ratio_x96, price_x96, Q96, "conversion size")?,
            Q96,
            "conversion size",
        )?;
        plan.delta_a = div(excess, denominator, "conversion size")?;
    }

    if is_owner {
        return Ok(plan);
    }

    match bonus_mode {
        BonusMode::None => {}
        BonusMode::TokenA => {
            let b_in_a = mul_div_checked(amount_b, Q96, price_x96, "token0 bonus")?;
            let total_a = add(amount_a, b_in_a, "token0 bonus")?;
            plan.reward_a = mul_div_checked(total_a, bonus.total_bonus_x64, Q64, "token0 bonus")?;
            // Keep the bonus in token0: sell less of it, or buy more.
            let reserve_a = plan.reward_a;
            apply_reserve(&mut plan, reserve_a, true)?;
        }
        BonusMode::TokenB => {
            let a_in_b = mul_div_checked(amount_a, price_x96, Q96, "token1 bonus")?;
            let total_b = add(amount_b, a_in_b, "token1 bonus")?;
            plan.reward_b = mul_div_checked(total_b, bonus.total_bonus_x64, Q64, "token1 bonus")?;
            let reserve_a = mul_div_checked(plan.reward_b, Q96, price_x96, "token1 bonus")?;
            apply_reserve(&mut plan, reserve_a, false)?;
        }
    }

    Ok(plan)
}

/// Shrinks the conversion leg that would spend the reserved token, flipping
/// direction when the reserve is larger than the leg.
fn apply_reserve(
    plan: &mut ConversionPlan,
    reserve_a: U256,
    reserve_token_a: bool,
) -> Result<(), VaultError> {
    let spends_reserved_token = plan.sell_a == reserve_token_a;
    if !spends_reserved_token {
        plan.delta_a = add(plan.delta_a, reserve_a, "bonus reserve")?;
    } else if plan.delta_a >= reserve_a {
        plan.delta_a -= reserve_a;
    } else {
        plan.delta_a = reserve_a - plan.delta_a;
        plan.sell_a = !plan.sell_a;
    }
    Ok(())
}

/// Amounts that may be deposited while leaving the caller bonus behind.
pub fn max_deposit(
    amount_a: U256,
    amount_b: U256,
    plan: &ConversionPlan,
    bonus_mode: BonusMode,
    is_owner: bool,
    bonus: &BonusConfig,
) -> Result<(U256, U256), VaultError> {
    if is_owner {
        return Ok((amount_a, amount_b));
    }
    match bonus_mode {
        BonusMode::None => {
            let scale = add(Q64, bonus.total_bonus_x64, "deposit cap")?;
            Ok((
                mul_div_checked(amount_a, Q64, scale, "deposit cap")?,
                mul_div_checked(amount_b, Q64, scale, "deposit cap")?,
            ))
        }
        BonusMode::TokenA => Ok((amount_a.saturating_sub(plan.reward_a), amount_b)),
        BonusMode::TokenB => Ok((amount_a, amount_b.saturating_sub(plan.reward_b))),
    }
}

/// Checks the pool price, sizes the conversion and, when asked, executes it
/// through the pool's own fee tier.
pub fn rebalance<E>(ext: &mut E, request: &RebalanceRequest) -> Result<RebalanceOutcome, VaultError>
where
    E: PoolOracle + SwapRouter + ?Sized,
{
    let reading = read_price(ext, &request.pool)?;
    check_price_safety(ext, &request.pool, &reading, request.bonus.max_tick_deviation)?;

    let ideal = ideal_ratio(reading.sqrt_price_x96, request.tick_lower, request.tick_upper)?;
    let plan = plan_conversion(
        ideal,
        reading.price_x96,
        request.amount_a,
        request.amount_b,
        request.bonus_mode,
        request.is_owner,
        &request.bonus,
    )?;

    tracing::debug!(
        sell_a = plan.sell_a,
        delta_a = %plan.delta_a,
        reward_a = %plan.reward_a,
        reward_b = %plan.reward_b,
        price_x96 = %reading.price_x96,
        "conversion planned"
    );

    let mut amount_a = request.amount_a;
    let mut amount_b = request.amount_b;
    let mut swap = None;

    if request.do_swap && !plan.delta_a.is_zero() {
        let (token_in, token_out, wanted, held) = if plan.sell_a {
            (request.pool.token0, request.pool.token1, plan.delta_a, amount_a)
        } else {
            let delta_b = mul_div_checked(plan.delta_a, reading.price_x96, Q96, "token1 spend")?;
            (request.pool.token1, request.pool.token0, delta_b, amount_b)
        };
        let amount_in = wanted.min(held);

        if !amount_in.is_zero() {
            let params = ExactInputParams {
                path: encode_path(token_in, request.pool.fee, token_out),
                recipient: request.vault,
                deadline: request.deadline,
                amount_in,
                amount_out_minimum: U256::ZERO,
            };
            let amount_out = ext.exact_input(request.vault, &params)?;
            if plan.sell_a {
                amount_a = sub(amount_a, amount_in, "swap settlement")?;
                amount_b = add(amount_b, amount_out, "swap settlement")?;
            } else {
                amount_b = sub(amount_b, amount_in, "swap settlement")?;
                amount_a = add(amount_a, amount_out, "swap settlement")?;
            }
            tracing::debug!(
                sell_a = plan.sell_a,
                amount_in = %amount_in,
                amount_out = %amount_out,
                "conversion swapped"
            );
            swap = Some(SwapLeg {
                sell_a: plan.sell_a,
                amount_in,
                amount_out,
            });
        }
    }

    let (max_deposit_a, max_deposit_b) = max_deposit(
        amount_a,
        amount_b,
        &plan,
        request.bonus_mode,
        request.is_owner,
        &request.bonus,
    )?;

    Ok(RebalanceOutcome {
        amount_a,
        amount_b,
        price_x96: reading.price_x96,
        max_deposit_a,
        max_deposit_b,
        swap,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn units(n: u64) -> U256 {
        U256::from(n) * U256::from(1_000_000_000_000_000_000u64)
    }

    #[test]
    fn bonus_mode_parses_aliases() {
        assert_eq!("token0".parse::<BonusMode>(), Ok(BonusMode::TokenA));
        assert_eq!("B".parse::<BonusMode>(), Ok(BonusMode::TokenB));
        assert_eq!("none".parse::<BonusMode>(), Ok(BonusMode::None));
        assert!("token2".parse::<BonusMode>().is_err());
    }

    #[test]
    fn all_token0_range_sells_nothing_when_holding_token0() {
        // Range above the current price: only token0 is needed.
        let ideal = ideal_ratio(Q96, 600, 1200).expect("ratio should compute");
        assert_eq!(ideal.1, U256::ZERO);
        let plan = plan_conversion(
            ideal,
            Q96,
            units(100),
            U256::ZERO,
            BonusMode::None,
            true,
            &BonusConfig::default(),
        )
        .expect("plan should compute");
        assert!(!plan.sell_a);
        assert_eq!(plan.delta_a, U256::ZERO);
    }

    #[test]
    fn all_token1_range_sells_all_token0() {
        let ideal = ideal_ratio(Q96, -1200, -600).expect("ratio should compute");
        assert_eq!(ideal.0, U256::ZERO);
        let plan = plan_conversion(
            ideal,
            Q96,
            units(40),
            units(10),
            BonusMode::None,
            true,
            &BonusConfig::default(),
        )
        .expect("plan should compute");
        assert!(plan.sell_a);
        assert_eq!(plan.delta_a, units(40));
    }

    #[test]
    fn balanced_range_converts_half_the_surplus() {
        // 1:1 ideal mix at unit price, holding only token0.
        let plan = plan_conversion(
            (Q96, Q96),
            Q96,
            units(100),
            U256::ZERO,
            BonusMode::None,
            true,
            &BonusConfig::default(),
        )
        .expect("plan should compute");
        assert!(plan.sell_a);
        assert_eq!(plan.delta_a, units(50));
    }

    #[test]
    fn token0_bonus_reduces_token0_sale() {
        let config = BonusConfig::default();
        let owner_plan = plan_conversion(
            (Q96, Q96),
            Q96,
            units(100),
            U256::ZERO,
            BonusMode::TokenA,
            true,
            &config,
        )
        .expect("plan should compute");
        let caller_plan = plan_conversion(
            (Q96, Q96),
            Q96,
            units(100),
            U256::ZERO,
            BonusMode::TokenA,
            false,
            &config,
        )
        .expect("plan should compute");
        let expected = mul_div_checked(units(100), config.total_bonus_x64, Q64, "test")
            .expect("bonus should fit");
        assert_eq!(caller_plan.reward_a, expected);
        assert!(expected <= units(2) && expected > units(2) - U256::from(100));
        assert!(caller_plan.sell_a);
        assert_eq!(caller_plan.delta_a, owner_plan.delta_a - caller_plan.reward_a);
    }

    #[test]
    fn token1_reserve_larger_than_leg_flips_direction() {
        // Holding a perfect mix: no conversion needed, so a token1 bonus
        // must be bought with token0.
        let plan = plan_conversion(
            (Q96, Q96),
            Q96,
            units(50),
            units(50),
            BonusMode::TokenB,
            false,
            &BonusConfig::default(),
        )
        .expect("plan should compute");
        assert!(plan.sell_a);
        assert_eq!(plan.delta_a, plan.reward_b);
    }

    #[test]
    fn max_deposit_none_mode_leaves_room_for_fee() {
        let config = BonusConfig::default();
        let (a, b) = max_deposit(
            units(102),
            units(51),
            &ConversionPlan::default(),
            BonusMode::None,
            false,
            &config,
        )
        .expect("deposit cap should compute");
        assert!(a > units(99) && a < units(101), "a={a}");
        assert!(b > units(49) && b < units(51), "b={b}");
    }

    #[test]
    fn zero_price_is_an_arithmetic_fault() {
        let err = plan_conversion(
            (Q96, U256::ZERO),
            U256::ZERO,
            U256::ZERO,
            units(1),
            BonusMode::None,
            true,
            &BonusConfig::default(),
        )
        .expect_err("zero price cannot be divided by");
        assert!(matches!(err, VaultError::ArithmeticFault(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        #[test]
        fn owner_deposit_cap_is_never_below_caller_cap(
            a in 0u64..u64::MAX,
            b in 0u64..u64::MAX,
            mode in prop_oneof![
                Just(BonusMode::None),
                Just(BonusMode::TokenA),
                Just(BonusMode::TokenB),
            ],
        ) {
            let config = BonusConfig::default();
            let (a, b) = (U256::from(a), U256::from(b));
            let plan = plan_conversion((Q96, Q96), Q96, a, b, mode, false, &config)
                .expect("plan should compute");
            let owner = max_deposit(a, b, &plan, mode, true, &config).expect("cap should compute");
            let caller = max_deposit(a, b, &plan, mode, false, &config).expect("cap should compute");
            prop_assert!(caller.0 <= owner.0 && caller.1 <= owner.1);
        }

        #[test]
        fn conversion_never_exceeds_total_value(
            a in 0u64..u64::MAX,
            b in 0u64..u64::MAX,
            ideal_a in 1u64..u64::MAX,
            ideal_b in 1u64..u64::MAX,
        ) {
            let (a, b) = (U256::from(a), U256::from(b));
            let plan = plan_conversion(
                (U256::from(ideal_a), U256::from(ideal_b)),
                Q96,
                a,
                b,
                BonusMode::None,
                true,
                &BonusConfig::default(),
            )
            .expect("plan should compute");
            // At unit price the value to move never exceeds what is held on
            // the surplus side.
            if plan.sell_a {
                prop_assert!(plan.delta_a <= a);
            } else {
                prop_assert!(plan.delta_a <= b);
            }
        }
    }
}
