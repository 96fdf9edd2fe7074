//! In-memory stand-ins for the chain: tokens, pools, a position manager and
//! a single-hop router.
//!
//! Pools have unlimited depth: swaps fill at the current price minus the
//! pool fee and never move it. The position manager uses the same range math
//! as the vault, so liquidity and pulled amounts round down.

use std::collections::{BTreeMap, HashMap, HashSet};

use alloy_primitives::{Address, U256};

use crate::external::{
    Clock, DecreaseLiquidityParams, ExactInputParams, ExternalError, IncreaseLiquidityParams,
    LiquidityChange, PoolKey, PoolOracle, PoolState, PositionInfo, PositionManager, SwapRouter,
    TokenBank, decode_path,
};
use crate::pools::liquidity::{amounts_for_liquidity, liquidity_for_amounts};
use crate::pools::pricing::{Q96, price_x96_from_sqrt, sqrt_price_at_tick};

pub const SIM_POSITION_MANAGER: Address = Address::repeat_byte(0xa1);
pub const SIM_ROUTER: Address = Address::repeat_byte(0xa2);
pub const SIM_WRAPPED_NATIVE: Address = Address::repeat_byte(0xee);

const FEE_DENOMINATOR: u64 = 1_000_000;
const DEFAULT_CARDINALITY: u16 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimPool {
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub twap_tick: i32,
    pub observation_cardinality: u16,
    pub observe_fails: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SimPosition {
    owner: Address,
    info: PositionInfo,
    owed0: U256,
    owed1: U256,
}

/// Collaborator calls that can be made to fail on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimCall {
    Approve,
    IncreaseLiquidity,
    Swap,
    Transfer,
}

impl SimCall {
    fn collaborator(self) -> &'static str {
        match self {
            Self::Approve | Self::Transfer => "token",
            Self::IncreaseLiquidity => "position manager",
            Self::Swap => "router",
        }
    }
}

type CollectHook = Box<dyn FnMut()>;

#[derive(Default)]
pub struct SimChain {
    now: u64,
    balances: HashMap<(Address, Address), U256>,
    native: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    pools: HashMap<PoolKey, SimPool>,
    positions: BTreeMap<U256, SimPosition>,
    next_position_id: u64,
    approve_calls: usize,
    swaps: Vec<ExactInputParams>,
    on_collect: Option<CollectHook>,
    failing: HashSet<SimCall>,
}

fn rejected(collaborator: &'static str, reason: impl Into<String>) -> ExternalError {
    ExternalError::Rejected {
        collaborator,
        reason: reason.into(),
    }
}

fn math(collaborator: &'static str) -> impl Fn(crate::error::VaultError) -> ExternalError {
    move |err| rejected(collaborator, err.to_string())
}

impl SimChain {
    pub fn new(now: u64) -> Self {
        Self {
            now,
            next_position_id: 1,
            ..Self::default()
        }
    }

    pub fn set_now(&mut self, now: u64) {
        self.now = now;
    }

    /// Creates a pool at `tick` whose TWAP agrees with the spot price.
    pub fn add_pool(&mut self, token_a: Address, token_b: Address, fee: u32, tick: i32) -> PoolKey {
        let key = PoolKey::new(token_a, token_b, fee);
        let sqrt_price_x96 = sqrt_price_at_tick(tick).unwrap_or(Q96);
        self.pools.insert(
            key,
            SimPool {
                sqrt_price_x96,
                tick,
                twap_tick: tick,
                observation_cardinality: DEFAULT_CARDINALITY,
                observe_fails: false,
            },
        );
        key
    }

    pub fn pool_mut(&mut self, key: &PoolKey) -> Option<&mut SimPool> {
        self.pools.get_mut(key)
    }

    pub fn set_twap_tick(&mut self, key: &PoolKey, twap_tick: i32) {
        if let Some(pool) = self.pools.get_mut(key) {
            pool.twap_tick = twap_tick;
        }
    }

    pub fn mint(&mut self, token: Address, account: Address, amount: U256) {
        let balance = self.balances.entry((token, account)).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn fund_native(&mut self, account: Address, amount: U256) {
        let balance = self.native.entry(account).or_default();
        *balance = balance.saturating_add(amount);
    }

    pub fn native_balance(&self, account: Address) -> U256 {
        self.native.get(&account).copied().unwrap_or_default()
    }

    /// Mints an empty position for `owner` on an existing pool.
    pub fn mint_position(
        &mut self,
        owner: Address,
        key: PoolKey,
        tick_lower: i32,
        tick_upper: i32,
    ) -> U256 {
        let id = U256::from(self.next_position_id);
        self.next_position_id += 1;
        self.positions.insert(
            id,
            SimPosition {
                owner,
                info: PositionInfo {
                    token0: key.token0,
                    token1: key.token1,
                    fee: key.fee,
                    tick_lower,
                    tick_upper,
                    liquidity: 0,
                },
                owed0: U256::ZERO,
                owed1: U256::ZERO,
            },
        );
        id
    }

    /// Credits trading fees to a position, backed by manager reserves.
    pub fn accrue_fees(&mut self, position_id: U256, fees0: U256, fees1: U256) {
        let Some(position) = self.positions.get_mut(&position_id) else {
            return;
        };
        position.owed0 = position.owed0.saturating_add(fees0);
        position.owed1 = position.owed1.saturating_add(fees1);
        let (token0, token1) = (position.info.token0, position.info.token1);
        self.mint(token0, SIM_POSITION_MANAGER, fees0);
        self.mint(token1, SIM_POSITION_MANAGER, fees1);
    }

    pub fn approve_calls(&self) -> usize {
        self.approve_calls
    }

    pub fn swaps(&self) -> &[ExactInputParams] {
        &self.swaps
    }

    /// Runs `hook` at the start of every `collect`, while the caller is
    /// mid-operation.
    pub fn on_collect(&mut self, hook: impl FnMut() + 'static) {
        self.on_collect = Some(Box::new(hook));
    }

    /// Makes every later `call` fail until switched back off.
    pub fn set_failing(&mut self, call: SimCall, failing: bool) {
        if failing {
            self.failing.insert(call);
        } else {
            self.failing.remove(&call);
        }
    }

    fn check_enabled(&self, call: SimCall) -> Result<(), ExternalError> {
        if self.failing.contains(&call) {
            return Err(rejected(call.collaborator(), "call disabled"));
        }
        Ok(())
    }

    fn pool(&self, key: &PoolKey) -> Result<&SimPool, ExternalError> {
        self.pools.get(key).ok_or(ExternalError::UnknownPool(*key))
    }

    fn owned_position(
        &mut self,
        sender: Address,
        position_id: U256,
    ) -> Result<&mut SimPosition, ExternalError> {
        let position = self
            .positions
            .get_mut(&position_id)
            .ok_or(ExternalError::UnknownPosition(position_id))?;
        if position.owner != sender {
            return Err(ExternalError::NotPositionOwner {
                position_id,
                account: sender,
            });
        }
        Ok(position)
    }

    fn check_deadline(&self, collaborator: &'static str, deadline: u64) -> Result<(), ExternalError> {
        if deadline < self.now {
            return Err(rejected(collaborator, "transaction too old"));
        }
        Ok(())
    }

    fn move_tokens(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), ExternalError> {
        let available = self.balance_of(token, from);
        if available < amount {
            return Err(ExternalError::InsufficientFunds {
                token,
                account: from,
                requested: amount,
                available,
            });
        }
        self.balances.insert((token, from), available - amount);
        self.mint(token, to, amount);
        Ok(())
    }

    fn range_bounds(info: &PositionInfo) -> Result<(U256, U256), ExternalError> {
        let lower = sqrt_price_at_tick(info.tick_lower).map_err(math("position manager"))?;
        let upper = sqrt_price_at_tick(info.tick_upper).map_err(math("position manager"))?;
        Ok((lower, upper))
    }
}

impl Clock for SimChain {
    fn now(&self) -> u64 {
        self.now
    }
}

impl PositionManager for SimChain {
    fn position_manager_address(&self) -> Address {
        SIM_POSITION_MANAGER
    }

    fn owner_of(&self, position_id: U256) -> Result<Address, ExternalError> {
        self.positions
            .get(&position_id)
            .map(|position| position.owner)
            .ok_or(ExternalError::UnknownPosition(position_id))
    }

    fn position(&self, position_id: U256) -> Result<PositionInfo, ExternalError> {
        self.positions
            .get(&position_id)
            .map(|position| position.info)
            .ok_or(ExternalError::UnknownPosition(position_id))
    }

    fn collect(
        &mut self,
        sender: Address,
        position_id: U256,
        recipient: Address,
    ) -> Result<(U256, U256), ExternalError> {
        if let Some(hook) = self.on_collect.as_mut() {
            hook();
        }
        let position = self.owned_position(sender, position_id)?;
        let (owed0, owed1) = (position.owed0, position.owed1);
        let (token0, token1) = (position.info.token0, position.info.token1);
        position.owed0 = U256::ZERO;
        position.owed1 = U256::ZERO;
        self.move_tokens(token0, SIM_POSITION_MANAGER, recipient, owed0)?;
        self.move_tokens(token1, SIM_POSITION_MANAGER, recipient, owed1)?;
        Ok((owed0, owed1))
    }

    fn increase_liquidity(
        &mut self,
        sender: Address,
        params: &IncreaseLiquidityParams,
    ) -> Result<LiquidityChange, ExternalError> {
        self.check_enabled(SimCall::IncreaseLiquidity)?;
        self.check_deadline("position manager", params.deadline)?;
        let info = self.owned_position(sender, params.position_id)?.info;
        let sqrt_price = self.pool(&info.pool_key())?.sqrt_price_x96;
        let (lower, upper) = Self::range_bounds(&info)?;

        let liquidity = liquidity_for_amounts(
            sqrt_price,
            lower,
            upper,
            params.amount0_desired,
            params.amount1_desired,
        )
        .map_err(math("position manager"))?;
        let (amount0, amount1) = amounts_for_liquidity(sqrt_price, lower, upper, liquidity)
            .map_err(math("position manager"))?;
        if amount0 < params.amount0_min || amount1 < params.amount1_min {
            return Err(rejected("position manager", "price slippage check"));
        }
        let liquidity = u128::try_from(liquidity)
            .map_err(|_| rejected("position manager", "liquidity overflow"))?;

        if !amount0.is_zero() {
            self.transfer_from(SIM_POSITION_MANAGER, info.token0, sender, SIM_POSITION_MANAGER, amount0)?;
        }
        if !amount1.is_zero() {
            self.transfer_from(SIM_POSITION_MANAGER, info.token1, sender, SIM_POSITION_MANAGER, amount1)?;
        }
        let position = self.owned_position(sender, params.position_id)?;
        position.info.liquidity = position
            .info
            .liquidity
            .checked_add(liquidity)
            .ok_or_else(|| rejected("position manager", "liquidity overflow"))?;

        Ok(LiquidityChange {
            liquidity,
            amount0,
            amount1,
        })
    }

    fn decrease_liquidity(
        &mut self,
        sender: Address,
        params: &DecreaseLiquidityParams,
    ) -> Result<(U256, U256), ExternalError> {
        self.check_deadline("position manager", params.deadline)?;
        let info = self.owned_position(sender, params.position_id)?.info;
        if params.liquidity > info.liquidity {
            return Err(rejected("position manager", "not enough liquidity"));
        }
        let sqrt_price = self.pool(&info.pool_key())?.sqrt_price_x96;
        let (lower, upper) = Self::range_bounds(&info)?;
        let (amount0, amount1) =
            amounts_for_liquidity(sqrt_price, lower, upper, U256::from(params.liquidity))
                .map_err(math("position manager"))?;
        if amount0 < params.amount0_min || amount1 < params.amount1_min {
            return Err(rejected("position manager", "price slippage check"));
        }

        let position = self.owned_position(sender, params.position_id)?;
        position.info.liquidity -= params.liquidity;
        position.owed0 = position.owed0.saturating_add(amount0);
        position.owed1 = position.owed1.saturating_add(amount1);
        Ok((amount0, amount1))
    }

    fn transfer_position(
        &mut self,
        from: Address,
        to: Address,
        position_id: U256,
    ) -> Result<(), ExternalError> {
        self.owned_position(from, position_id)?.owner = to;
        Ok(())
    }
}

impl PoolOracle for SimChain {
    fn pool_state(&self, key: &PoolKey) -> Result<PoolState, ExternalError> {
        let pool = self.pool(key)?;
        Ok(PoolState {
            sqrt_price_x96: pool.sqrt_price_x96,
            tick: pool.tick,
            observation_cardinality: pool.observation_cardinality,
        })
    }

    fn observe(&self, key: &PoolKey, seconds_agos: &[u32]) -> Result<Vec<i64>, ExternalError> {
        let pool = self.pool(key)?;
        let oldest = seconds_agos.iter().copied().max().unwrap_or_default();
        if pool.observe_fails || pool.observation_cardinality < 2 || u64::from(oldest) > self.now {
            return Err(ExternalError::ObservationUnavailable { seconds_ago: oldest });
        }
        Ok(seconds_agos
            .iter()
            .map(|ago| {
                let at = self.now.saturating_sub(u64::from(*ago));
                i64::from(pool.twap_tick).saturating_mul(i64::try_from(at).unwrap_or(i64::MAX))
            })
            .collect())
    }
}

impl SwapRouter for SimChain {
    fn router_address(&self) -> Address {
        SIM_ROUTER
    }

    fn exact_input(
        &mut self,
        payer: Address,
        params: &ExactInputParams,
    ) -> Result<U256, ExternalError> {
        self.check_enabled(SimCall::Swap)?;
        self.check_deadline("router", params.deadline)?;
        let (token_in, fee, token_out) =
            decode_path(&params.path).ok_or_else(|| rejected("router", "malformed path"))?;
        let key = PoolKey::new(token_in, token_out, fee);
        let price_x96 = price_x96_from_sqrt(self.pool(&key)?.sqrt_price_x96).map_err(math("router"))?;

        let gross = if token_in == key.token0 {
            params.amount_in.checked_mul(price_x96).map(|v| v / Q96)
        } else {
            params.amount_in.checked_mul(Q96).and_then(|v| v.checked_div(price_x96))
        }
        .ok_or_else(|| rejected("router", "amount overflow"))?;
        let fee_kept = U256::from(FEE_DENOMINATOR - u64::from(fee).min(FEE_DENOMINATOR));
        let amount_out = gross * fee_kept / U256::from(FEE_DENOMINATOR);
        if amount_out < params.amount_out_minimum {
            return Err(rejected("router", "too little received"));
        }

        self.transfer_from(SIM_ROUTER, token_in, payer, SIM_ROUTER, params.amount_in)?;
        self.mint(token_out, params.recipient, amount_out);
        self.swaps.push(params.clone());
        Ok(amount_out)
    }
}

impl TokenBank for SimChain {
    fn balance_of(&self, token: Address, account: Address) -> U256 {
        self.balances
            .get(&(token, account))
            .copied()
            .unwrap_or_default()
    }

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    fn approve(
        &mut self,
        owner: Address,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), ExternalError> {
        self.check_enabled(SimCall::Approve)?;
        self.approve_calls += 1;
        self.allowances.insert((token, owner, spender), amount);
        Ok(())
    }

    fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), ExternalError> {
        self.check_enabled(SimCall::Transfer)?;
        self.move_tokens(token, from, to, amount)
    }

    fn transfer_from(
        &mut self,
        spender: Address,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), ExternalError> {
        let allowed = self.allowance(token, from, spender);
        if allowed < amount {
            return Err(ExternalError::InsufficientAllowance {
                token,
                owner: from,
                spender,
                requested: amount,
            });
        }
        self.move_tokens(token, from, to, amount)?;
        if allowed != U256::MAX {
            self.allowances.insert((token, from, spender), allowed - amount);
        }
        Ok(())
    }

    fn wrapped_native(&self) -> Address {
        SIM_WRAPPED_NATIVE
    }

    fn wrap_native(&mut self, from: Address, to: Address, amount: U256) -> Result<(), ExternalError> {
        let available = self.native_balance(from);
        if available < amount {
            return Err(ExternalError::InsufficientFunds {
                token: Address::ZERO,
                account: from,
                requested: amount,
                available,
            });
        }
        self.native.insert(from, available - amount);
        self.mint(SIM_WRAPPED_NATIVE, to, amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::encode_path;

    fn tokens() -> (Address, Address) {
        (Address::repeat_byte(0x10), Address::repeat_byte(0x20))
    }

    #[test]
    fn router_fills_at_pool_price_minus_fee() {
        let (t0, t1) = tokens();
        let payer = Address::repeat_byte(0x01);
        let mut chain = SimChain::new(1_000);
        chain.add_pool(t0, t1, 3000, 0);
        chain.mint(t0, payer, U256::from(1_000_000));
        chain
            .approve(payer, t0, SIM_ROUTER, U256::MAX)
            .expect("approve should succeed");

        let out = chain
            .exact_input(
                payer,
                &ExactInputParams {
                    path: encode_path(t0, 3000, t1),
                    recipient: payer,
                    deadline: 1_000,
                    amount_in: U256::from(1_000_000),
                    amount_out_minimum: U256::ZERO,
                },
            )
            .expect("swap should fill");
        assert_eq!(out, U256::from(997_000));
        assert_eq!(chain.balance_of(t1, payer), U256::from(997_000));
        assert_eq!(chain.balance_of(t0, payer), U256::ZERO);
    }

    #[test]
    fn disabled_calls_are_rejected_until_enabled() {
        let (t0, _) = tokens();
        let owner = Address::repeat_byte(0x01);
        let mut chain = SimChain::new(0);
        chain.mint(t0, owner, U256::from(10));
        chain.set_failing(SimCall::Transfer, true);
        assert!(matches!(
            chain.transfer(t0, owner, SIM_ROUTER, U256::from(1)),
            Err(ExternalError::Rejected { collaborator: "token", .. })
        ));
        assert_eq!(chain.balance_of(t0, owner), U256::from(10));

        chain.set_failing(SimCall::Transfer, false);
        chain
            .transfer(t0, owner, SIM_ROUTER, U256::from(1))
            .expect("re-enabled transfer should succeed");
    }

    #[test]
    fn transfer_from_requires_allowance() {
        let (t0, _) = tokens();
        let owner = Address::repeat_byte(0x01);
        let spender = Address::repeat_byte(0x02);
        let mut chain = SimChain::new(0);
        chain.mint(t0, owner, U256::from(10));
        assert!(matches!(
            chain.transfer_from(spender, t0, owner, spender, U256::from(1)),
            Err(ExternalError::InsufficientAllowance { .. })
        ));
        chain
            .approve(owner, t0, spender, U256::from(4))
            .expect("approve should succeed");
        chain
            .transfer_from(spender, t0, owner, spender, U256::from(4))
            .expect("allowed transfer should succeed");
        assert_eq!(chain.allowance(t0, owner, spender), U256::ZERO);
    }

    #[test]
    fn observe_reports_configured_twap() {
        let (t0, t1) = tokens();
        let mut chain = SimChain::new(10_000);
        let key = chain.add_pool(t0, t1, 500, 120);
        chain.set_twap_tick(&key, -40);
        let cumulatives = chain.observe(&key, &[0, 60]).expect("observe should succeed");
        assert_eq!((cumulatives[0] - cumulatives[1]) / 60, -40);
    }

    #[test]
    fn liquidity_round_trip_returns_funds_as_owed() {
        let (t0, t1) = tokens();
        let owner = Address::repeat_byte(0x01);
        let mut chain = SimChain::new(0);
        let key = chain.add_pool(t0, t1, 3000, 0);
        let id = chain.mint_position(owner, key, -600, 600);
        chain.mint(t0, owner, U256::from(1_000_000u64));
        chain.mint(t1, owner, U256::from(1_000_000u64));
        for token in [t0, t1] {
            chain
                .approve(owner, token, SIM_POSITION_MANAGER, U256::MAX)
                .expect("approve should succeed");
        }

        let added = chain
            .increase_liquidity(
                owner,
                &IncreaseLiquidityParams {
                    position_id: id,
                    amount0_desired: U256::from(1_000_000u64),
                    amount1_desired: U256::from(1_000_000u64),
                    amount0_min: U256::ZERO,
                    amount1_min: U256::ZERO,
                    deadline: 0,
                },
            )
            .expect("increase should succeed");
        assert!(added.liquidity > 0);

        let released = chain
            .decrease_liquidity(
                owner,
                &DecreaseLiquidityParams {
                    position_id: id,
                    liquidity: added.liquidity,
                    amount0_min: U256::ZERO,
                    amount1_min: U256::ZERO,
                    deadline: 0,
                },
            )
            .expect("decrease should succeed");
        assert!(released.0 <= added.amount0 && released.1 <= added.amount1);

        let collected = chain.collect(owner, id, owner).expect("collect should succeed");
        assert_eq!(collected, released);
    }
}
