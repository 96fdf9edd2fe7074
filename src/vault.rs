//! Custody vault and the compounding operation.
//!
//! Every mutating method enters the reentrancy guard and stages its writes in
//! a [`Txn`]. Checks without side effects run before the first collaborator
//! call that moves funds. Once funds have moved, a later failure still
//! commits a ledger entry for them. Collaborators are passed in per call;
//! the vault never keeps them.

pub mod admin;
pub mod events;
pub mod guard;
pub mod owner;


use std::path::Path;
use std::sync::Mutex;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::config::BonusConfig;
use crate::custody::approvals::{MAX_APPROVE_AMOUNT, missing_approval_pairs};
use crate::custody::{SnapshotError, Store, Txn, load_snapshot, lock_store, save_snapshot};
use crate::error::VaultError;
use crate::external::{External, IncreaseLiquidityParams, LiquidityChange};
use crate::pools::oracle::{check_price_safety, read_price};
use crate::pools::pricing::{Q64, Q96, add, mul_div_checked, sub};
use crate::rebalance::{BonusMode, RebalanceRequest, rebalance};
use events::VaultEvent;
use guard::ReentrancyGuard;

/// Furthest a deadline may lie in the future.
pub const MAX_DEADLINE_WINDOW_SECS: u64 = 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoCompoundParams {
    pub position_id: U256,
    pub deadline: u64,
    pub bonus_mode: BonusMode,
    pub do_swap: bool,
    /// Pay out the caller's balances of both tokens here afterwards.
    pub withdraw_to: Option<Address>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompoundOutcome {
    pub bonus_a: U256,
    pub bonus_b: U256,
    pub compounded_a: U256,
    pub compounded_b: U256,
}

#[derive(Debug)]
pub struct Vault {
    address: Address,
    store: Mutex<Store>,
    guard: ReentrancyGuard,
}

impl Vault {
    pub fn new(address: Address, admin: Address) -> Self {
        Self::with_config(address, admin, BonusConfig::default())
    }

    pub fn with_config(address: Address, admin: Address, config: BonusConfig) -> Self {
        Self::from_store(address, Store::new(admin, config))
    }

    pub fn from_store(address: Address, store: Store) -> Self {
        Self {
            address,
            store: Mutex::new(store),
            guard: ReentrancyGuard::default(),
        }
    }

    pub fn from_snapshot(address: Address, path: &Path) -> Result<Self, SnapshotError> {
        Ok(Self::from_store(address, load_snapshot(path)?))
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<(), SnapshotError> {
        let store = self.store_snapshot();
        save_snapshot(path, &store)
    }

    /// Copy of the committed state.
    pub fn store_snapshot(&self) -> Store {
        lock_store(&self.store).clone()
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn owner_of(&self, position_id: U256) -> Option<Address> {
        lock_store(&self.store).registry.owner_of(position_id)
    }

    pub fn positions_of(&self, account: Address) -> Vec<U256> {
        lock_store(&self.store).registry.positions_of(account).to_vec()
    }

    pub fn position_count(&self, account: Address) -> usize {
        lock_store(&self.store).registry.position_count(account)
    }

    pub fn balance_of(&self, account: Address, token: Address) -> U256 {
        lock_store(&self.store).ledger.balance_of(account, token)
    }

    pub fn config(&self) -> BonusConfig {
        lock_store(&self.store).config
    }

    pub fn admin(&self) -> Address {
        lock_store(&self.store).admin
    }

    pub fn events(&self) -> Vec<VaultEvent> {
        lock_store(&self.store).events.clone()
    }

    /// Takes the committed events, leaving the log empty.
    pub fn drain_events(&self) -> Vec<VaultEvent> {
        std::mem::take(&mut lock_store(&self.store).events)
    }

    /// Takes custody of a position its caller owns.
    pub fn deposit<E>(&self, ext: &mut E, caller: Address, position_id: U256) -> Result<(), VaultError>
    where
        E: External + ?Sized,
    {
        let _entry = self.guard.enter()?;
        let mut txn = Txn::new(&self.store);

        txn.register(caller, position_id)?;
        let holder = ext.owner_of(position_id)?;
        if holder != caller {
            tracing::warn!(
                caller = %caller,
                holder = %holder,
                position_id = %position_id,
                "deposit rejected: caller does not hold the position"
            );
            return Err(VaultError::Unauthorized {
                caller,
                action: "deposit a position it does not hold",
            });
        }

        let position = ext.position(position_id)?;
        self.ensure_approvals(ext, &mut txn, &[position.token0, position.token1])?;
        ext.transfer_position(caller, self.address, position_id)?;

        txn.emit(VaultEvent::Deposited {
            account: caller,
            position_id,
        });
        txn.commit()
    }

    /// Returns a position to `destination`, optionally paying out the
    /// caller's balances of the position's tokens.
    pub fn withdraw<E>(
        &self,
        ext: &mut E,
        caller: Address,
        position_id: U256,
        destination: Address,
        withdraw_balances: bool,
    ) -> Result<(), VaultError>
    where
        E: External + ?Sized,
    {
        let _entry = self.guard.enter()?;
        let mut txn = Txn::new(&self.store);

        self.require_owner(&txn, caller, position_id, "withdraw the position")?;
        self.require_recipient(destination)?;

        let position = ext.position(position_id)?;
        txn.unregister(position_id)?;
        ext.transfer_position(self.address, destination, position_id)?;
        txn.emit(VaultEvent::Withdrawn {
            account: caller,
            to: destination,
            position_id,
        });
        txn.commit()?;

        if withdraw_balances {
            let mut payout = Txn::new(&self.store);
            self.pay_out_all(ext, &mut payout, caller, &[position.token0, position.token1], destination)?;
            payout.commit()?;
        }
        Ok(())
    }

    pub fn withdraw_balance<E>(
        &self,
        ext: &mut E,
        caller: Address,
        token: Address,
        destination: Address,
        amount: U256,
    ) -> Result<(), VaultError>
    where
        E: External + ?Sized,
    {
        let _entry = self.guard.enter()?;
        if amount.is_zero() {
            return Err(VaultError::ZeroAmount);
        }
        self.require_recipient(destination)?;

        let mut txn = Txn::new(&self.store);
        self.pay_out(ext, &mut txn, caller, token, destination, amount)?;
        txn.commit()
    }

    /// Harvests the position's fees, reinvests what fits and pays the caller
    /// bonus.
    pub fn auto_compound<E>(
        &self,
        ext: &mut E,
        caller: Address,
        params: AutoCompoundParams,
    ) -> Result<CompoundOutcome, VaultError>
    where
        E: External + ?Sized,
    {
        let _entry = self.guard.enter()?;
        let mut txn = Txn::new(&self.store);
        let position_id = params.position_id;

        let owner = txn
            .owner_of(position_id)
            .ok_or(VaultError::NotFound(position_id))?;
        check_deadline(ext.now(), params.deadline)?;
        if let Some(destination) = params.withdraw_to {
            self.require_recipient(destination)?;
        }

        let position = ext.position(position_id)?;
        let (token_a, token_b) = (position.token0, position.token1);
        let key = position.pool_key();
        let config = txn.config();
        let admin = txn.admin();
        let is_owner = caller == owner;

        // A divergent price must leave the fees with the position manager.
        let reading = read_price(ext, &key)?;
        check_price_safety(ext, &key, &reading, config.max_tick_deviation)?;

        let (collected_a, collected_b) = ext.collect(self.address, position_id, self.address)?;
        let before = (txn.balance_of(owner, token_a), txn.balance_of(owner, token_b));
        let mut held = (
            add(before.0, collected_a, "merge balances")?,
            add(before.1, collected_b, "merge balances")?,
        );
        let mut outcome = CompoundOutcome::default();

        if !held.0.is_zero() || !held.1.is_zero() {
            let request = RebalanceRequest {
                pool: key,
                tick_lower: position.tick_lower,
                tick_upper: position.tick_upper,
                amount_a: held.0,
                amount_b: held.1,
                bonus_mode: params.bonus_mode,
                is_owner,
                do_swap: params.do_swap,
                deadline: params.deadline,
                vault: self.address,
                bonus: config,
            };
            let reinvested = reinvest(ext, position_id, &request, &mut held);
            let settled = reinvested.and_then(|(price_x96, added)| {
                if is_owner {
                    return Ok((added, (U256::ZERO, U256::ZERO)));
                }
                let available = (
                    add(held.0, added.amount0, "compound fee")?,
                    add(held.1, added.amount1, "compound fee")?,
                );
                let fee = compound_fee(
                    params.bonus_mode,
                    &config,
                    price_x96,
                    available,
                    (added.amount0, added.amount1),
                )?;
                Ok((added, fee))
            });
            let (added, (fee_a, fee_b)) = match settled {
                Ok(settled) => settled,
                Err(err) => return Err(park(txn, owner, (token_a, token_b), before, held, err)),
            };
            outcome.compounded_a = added.amount0;
            outcome.compounded_b = added.amount1;

            txn.set_balance(owner, token_a, sub(held.0, fee_a, "owner residual")?);
            txn.set_balance(owner, token_b, sub(held.1, fee_b, "owner residual")?);

            if !is_owner {
                let (bonus_a, bonus_b) =
                    distribute_fee(&mut txn, caller, admin, &config, (token_a, token_b), (fee_a, fee_b))?;
                outcome.bonus_a = bonus_a;
                outcome.bonus_b = bonus_b;
            }
        } else {
            tracing::debug!(position_id = %position_id, "nothing to compound");
        }

        txn.emit(VaultEvent::Compounded {
            caller,
            position_id,
            token_a,
            token_b,
            compounded_a: outcome.compounded_a,
            compounded_b: outcome.compounded_b,
            bonus_a: outcome.bonus_a,
            bonus_b: outcome.bonus_b,
        });
        txn.commit()?;

        // The compound stands even if the payout fails; balances stay credited.
        if let Some(destination) = params.withdraw_to {
            let mut payout = Txn::new(&self.store);
            self.pay_out_all(ext, &mut payout, caller, &[token_a, token_b], destination)?;
            payout.commit()?;
        }
        Ok(outcome)
    }

    fn require_owner(
        &self,
        txn: &Txn<'_>,
        caller: Address,
        position_id: U256,
        action: &'static str,
    ) -> Result<Address, VaultError> {
        let owner = txn
            .owner_of(position_id)
            .ok_or(VaultError::NotFound(position_id))?;
        if owner != caller {
            tracing::warn!(
                caller = %caller,
                owner = %owner,
                position_id = %position_id,
                action,
                "caller is not the position owner"
            );
            return Err(VaultError::Unauthorized { caller, action });
        }
        Ok(owner)
    }

    fn require_recipient(&self, destination: Address) -> Result<(), VaultError> {
        if destination == self.address || destination == Address::ZERO {
            return Err(VaultError::InvalidRecipient(destination));
        }
        Ok(())
    }

    /// Grants the position manager and the router unlimited allowance for
    /// tokens seen for the first time.
    fn ensure_approvals<E>(
        &self,
        ext: &mut E,
        txn: &mut Txn<'_>,
        tokens: &[Address],
    ) -> Result<(), VaultError>
    where
        E: External + ?Sized,
    {
        let pairs = missing_approval_pairs(
            tokens,
            |token| txn.is_approved(token),
            ext.position_manager_address(),
            ext.router_address(),
        );
        for (token, spender) in pairs {
            ext.approve(self.address, token, spender, MAX_APPROVE_AMOUNT)?;
            txn.mark_approved(token);
            tracing::debug!(token = %token, spender = %spender, "granted allowance");
        }
        Ok(())
    }

    fn pay_out<E>(
        &self,
        ext: &mut E,
        txn: &mut Txn<'_>,
        account: Address,
        token: Address,
        destination: Address,
        amount: U256,
    ) -> Result<(), VaultError>
    where
        E: External + ?Sized,
    {
        txn.debit(account, token, amount)?;
        ext.transfer(token, self.address, destination, amount)?;
        txn.emit(VaultEvent::BalanceWithdrawn {
            account,
            token,
            to: destination,
            amount,
        });
        Ok(())
    }

    fn pay_out_all<E>(
        &self,
        ext: &mut E,
        txn: &mut Txn<'_>,
        account: Address,
        tokens: &[Address],
        destination: Address,
    ) -> Result<(), VaultError>
    where
        E: External + ?Sized,
    {
        for token in tokens {
            let amount = txn.balance_of(account, *token);
            if !amount.is_zero() {
                self.pay_out(ext, txn, account, *token, destination, amount)?;
            }
        }
        Ok(())
    }
}

/// Converts the funds in `held` and adds what fits to the position.
///
/// `held` tracks what the vault holds for the owner after every collaborator
/// call that succeeded, so a caller can credit it when a later one fails.
/// Returns the price used and the liquidity added.
fn reinvest<E>(
    ext: &mut E,
    position_id: U256,
    request: &RebalanceRequest,
    held: &mut (U256, U256),
) -> Result<(U256, LiquidityChange), VaultError>
where
    E: External + ?Sized,
{
    let rebalanced = rebalance(ext, request)?;
    *held = (rebalanced.amount_a, rebalanced.amount_b);
    if rebalanced.max_deposit_a.is_zero() && rebalanced.max_deposit_b.is_zero() {
        return Ok((rebalanced.price_x96, LiquidityChange::default()));
    }

    let added = ext.increase_liquidity(
        request.vault,
        &IncreaseLiquidityParams {
            position_id,
            amount0_desired: rebalanced.max_deposit_a,
            amount1_desired: rebalanced.max_deposit_b,
            amount0_min: U256::ZERO,
            amount1_min: U256::ZERO,
            deadline: request.deadline,
        },
    )?;
    *held = (
        sub(held.0, added.amount0, "owner residual")?,
        sub(held.1, added.amount1, "owner residual")?,
    );
    Ok((rebalanced.price_x96, added))
}

/// Credits the owner with whatever the vault took in before `err`, commits,
/// and hands `err` back.
fn park(
    mut txn: Txn<'_>,
    owner: Address,
    tokens: (Address, Address),
    before: (U256, U256),
    held: (U256, U256),
    err: VaultError,
) -> VaultError {
    let settled = [(tokens.0, before.0, held.0), (tokens.1, before.1, held.1)]
        .into_iter()
        .try_for_each(|(token, before, held)| {
            if held >= before {
                txn.credit(owner, token, held - before).map(drop)
            } else {
                txn.debit(owner, token, before - held).map(drop)
            }
        });
    if let Err(park_err) = settled.and_then(|()| txn.commit()) {
        tracing::error!(owner = %owner, error = %park_err, "failed to credit funds after aborted reinvestment");
        return err;
    }
    tracing::warn!(
        owner = %owner,
        held_a = %held.0,
        held_b = %held.1,
        error = %err,
        "reinvestment aborted; funds credited to owner"
    );
    err
}

pub fn check_deadline(now: u64, deadline: u64) -> Result<(), VaultError> {
    if deadline < now || deadline > now.saturating_add(MAX_DEADLINE_WINDOW_SECS) {
        tracing::warn!(now, deadline, "deadline outside accepted window");
        return Err(VaultError::DeadlineInvalid { deadline, now });
    }
    Ok(())
}

/// Protocol fee charged on what a non-owner compounded, per token.
pub fn compound_fee(
    bonus_mode: BonusMode,
    config: &BonusConfig,
    price_x96: U256,
    available: (U256, U256),
    compounded: (U256, U256),
) -> Result<(U256, U256), VaultError> {
    let total = config.total_bonus_x64;
    let (available_a, available_b) = available;
    let (compounded_a, compounded_b) = compounded;
    match bonus_mode {
        BonusMode::None => Ok((
            mul_div_checked(compounded_a, total, Q64, "compound fee")?,
            mul_div_checked(compounded_b, total, Q64, "compound fee")?,
        )),
        BonusMode::TokenA => {
            let added_total_a = add(
                compounded_a,
                mul_div_checked(compounded_b, Q96, price_x96, "compound fee")?,
                "compound fee",
            )?;
            let fee_a = mul_div_checked(added_total_a, total, Q64, "compound fee")?;
            let cap = sub(available_a, compounded_a, "compound fee")?;
            Ok((fee_a.min(cap), U256::ZERO))
        }
        BonusMode::TokenB => {
            let added_total_a = add(
                compounded_a,
                mul_div_checked(compounded_b, Q96, price_x96, "compound fee")?,
                "compound fee",
            )?;
            let added_total_b = mul_div_checked(added_total_a, price_x96, Q96, "compound fee")?;
            let fee_b = mul_div_checked(added_total_b, total, Q64, "compound fee")?;
            let cap = sub(available_b, compounded_b, "compound fee")?;
            Ok((U256::ZERO, fee_b.min(cap)))
        }
    }
}

/// Credits the fee between caller and administrator; returns the caller's
/// share.
fn distribute_fee(
    txn: &mut Txn<'_>,
    caller: Address,
    admin: Address,
    config: &BonusConfig,
    tokens: (Address, Address),
    fees: (U256, U256),
) -> Result<(U256, U256), VaultError> {
    let mut bonus = [U256::ZERO; 2];
    for (slot, (token, fee)) in [(tokens.0, fees.0), (tokens.1, fees.1)].into_iter().enumerate() {
        if fee.is_zero() {
            continue;
        }
        if caller == admin {
            txn.credit(admin, token, fee)?;
            bonus[slot] = fee;
            continue;
        }
        let protocol = protocol_share(fee, config)?;
        let caller_share = fee - protocol;
        txn.credit(admin, token, protocol)?;
        txn.credit(caller, token, caller_share)?;
        bonus[slot] = caller_share;
    }
    Ok((bonus[0], bonus[1]))
}

/// Part of `fee` kept by the protocol, rounded down.
pub fn protocol_share(fee: U256, config: &BonusConfig) -> Result<U256, VaultError> {
    if config.total_bonus_x64.is_zero() {
        return Ok(U256::ZERO);
    }
    let protocol_x64 = sub(
        config.total_bonus_x64,
        config.compounder_bonus_x64,
        "protocol share",
    )?;
    mul_div_checked(fee, protocol_x64, config.total_bonus_x64, "protocol share")
}
