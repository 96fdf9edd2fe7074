//! Operations only a position's owner may perform while it sits in custody.

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use super::{Vault, check_deadline, park, reinvest};
use crate::custody::Txn;
use crate::error::VaultError;
use crate::external::{DecreaseLiquidityParams, External};
use crate::pools::oracle::{check_price_safety, read_price};
use crate::pools::pricing::add;
use crate::rebalance::{BonusMode, RebalanceRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecreaseAndCollectParams {
    pub position_id: U256,
    pub liquidity: u128,
    pub amount0_min: U256,
    pub amount1_min: U256,
    pub deadline: u64,
    pub recipient: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopUpParams {
    pub position_id: U256,
    pub amount_a: U256,
    pub amount_b: U256,
    /// Native asset to wrap into whichever side of the pair is the wrapped
    /// native token.
    pub native_amount: U256,
    pub deadline: u64,
    pub do_swap: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TopUpOutcome {
    pub liquidity: u128,
    pub added_a: U256,
    pub added_b: U256,
}

impl Vault {
    /// Sends accrued fees straight to `recipient`, bypassing the ledger.
    pub fn collect<E>(
        &self,
        ext: &mut E,
        caller: Address,
        position_id: U256,
        recipient: Address,
    ) -> Result<(U256, U256), VaultError>
    where
        E: External + ?Sized,
    {
        let _entry = self.guard.enter()?;
        let txn = Txn::new(&self.store);
        self.require_owner(&txn, caller, position_id, "collect fees")?;
        self.require_recipient(recipient)?;
        Ok(ext.collect(self.address, position_id, recipient)?)
    }

    pub fn decrease_liquidity_and_collect<E>(
        &self,
        ext: &mut E,
        caller: Address,
        params: DecreaseAndCollectParams,
    ) -> Result<(U256, U256), VaultError>
    where
        E: External + ?Sized,
    {
        let _entry = self.guard.enter()?;
        let txn = Txn::new(&self.store);
        self.require_owner(&txn, caller, params.position_id, "remove liquidity")?;
        self.require_recipient(params.recipient)?;

        let (released_a, released_b) = ext.decrease_liquidity(
            self.address,
            &DecreaseLiquidityParams {
                position_id: params.position_id,
                liquidity: params.liquidity,
                amount0_min: params.amount0_min,
                amount1_min: params.amount1_min,
                deadline: params.deadline,
            },
        )?;
        let collected = ext.collect(self.address, params.position_id, params.recipient)?;
        tracing::info!(
            position_id = %params.position_id,
            liquidity = params.liquidity,
            released_a = %released_a,
            released_b = %released_b,
            "liquidity removed"
        );
        Ok(collected)
    }

    /// Adds fresh funds from the owner, together with the owner's stored
    /// balances, to the position. What does not fit stays credited, and so
    /// does everything pulled in if a later step fails.
    pub fn top_up<E>(
        &self,
        ext: &mut E,
        caller: Address,
        params: TopUpParams,
    ) -> Result<TopUpOutcome, VaultError>
    where
        E: External + ?Sized,
    {
        let _entry = self.guard.enter()?;
        let mut txn = Txn::new(&self.store);
        let owner = self.require_owner(&txn, caller, params.position_id, "top up the position")?;
        check_deadline(ext.now(), params.deadline)?;

        let position = ext.position(params.position_id)?;
        let (token_a, token_b) = (position.token0, position.token1);
        let key = position.pool_key();
        let config = txn.config();

        let mut native_a = U256::ZERO;
        let mut native_b = U256::ZERO;
        if !params.native_amount.is_zero() {
            let wrapped = ext.wrapped_native();
            if wrapped == token_a {
                native_a = params.native_amount;
            } else if wrapped == token_b {
                native_b = params.native_amount;
            } else {
                return Err(VaultError::InvalidAsset(wrapped));
            }
        }

        let before = (txn.balance_of(owner, token_a), txn.balance_of(owner, token_b));
        let total_a = add(before.0, add(params.amount_a, native_a, "top up")?, "top up")?;
        let total_b = add(before.1, add(params.amount_b, native_b, "top up")?, "top up")?;
        if total_a.is_zero() && total_b.is_zero() {
            return Err(VaultError::ZeroAmount);
        }

        let reading = read_price(ext, &key)?;
        check_price_safety(ext, &key, &reading, config.max_tick_deviation)?;

        // `held` never exceeds the checked totals above.
        let mut held = before;
        let pulled = (|| {
            if !params.native_amount.is_zero() {
                ext.wrap_native(caller, self.address, params.native_amount)?;
                held = (held.0 + native_a, held.1 + native_b);
            }
            if !params.amount_a.is_zero() {
                ext.transfer_from(self.address, token_a, caller, self.address, params.amount_a)?;
                held.0 += params.amount_a;
            }
            if !params.amount_b.is_zero() {
                ext.transfer_from(self.address, token_b, caller, self.address, params.amount_b)?;
                held.1 += params.amount_b;
            }
            Ok::<_, VaultError>(())
        })();
        if let Err(err) = pulled {
            return Err(park(txn, owner, (token_a, token_b), before, held, err));
        }

        let request = RebalanceRequest {
            pool: key,
            tick_lower: position.tick_lower,
            tick_upper: position.tick_upper,
            amount_a: held.0,
            amount_b: held.1,
            bonus_mode: BonusMode::None,
            is_owner: true,
            do_swap: params.do_swap,
            deadline: params.deadline,
            vault: self.address,
            bonus: config,
        };
        let added = match reinvest(ext, params.position_id, &request, &mut held) {
            Ok((_, added)) => added,
            Err(err) => return Err(park(txn, owner, (token_a, token_b), before, held, err)),
        };
        let outcome = TopUpOutcome {
            liquidity: added.liquidity,
            added_a: added.amount0,
            added_b: added.amount1,
        };

        txn.set_balance(owner, token_a, held.0);
        txn.set_balance(owner, token_b, held.1);
        txn.commit()?;

        tracing::info!(
            position_id = %params.position_id,
            liquidity = outcome.liquidity,
            added_a = %outcome.added_a,
            added_b = %outcome.added_b,
            "position topped up"
        );
        Ok(outcome)
    }
}
