//! Contracts the vault expects from the outside world.
//!
//! The position manager, the pool, the swap router and the token layer are
//! not implemented here. They are capabilities handed to every vault call, so
//! a caller can back them with a live node, an in-memory simulation
//! (`crate::sim`) or anything else that honours the semantics below.

use std::fmt;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Largest fee tier that fits the packed `uint24` used in swap paths.
const MAX_FEE_PIPS: u32 = (1 << 24) - 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalError {
    UnknownPosition(U256),
    UnknownPool(PoolKey),
    NotPositionOwner {
        position_id: U256,
        account: Address,
    },
    InsufficientFunds {
        token: Address,
        account: Address,
        requested: U256,
        available: U256,
    },
    InsufficientAllowance {
        token: Address,
        owner: Address,
        spender: Address,
        requested: U256,
    },
    ObservationUnavailable {
        seconds_ago: u32,
    },
    Rejected {
        collaborator: &'static str,
        reason: String,
    },
    Provider(String),
}

impl fmt::Display for ExternalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownPosition(id) => write!(f, "position manager has no position {id}"),
            Self::UnknownPool(key) => write!(
                f,
                "no pool for {}/{} at fee {}",
                key.token0, key.token1, key.fee
            ),
            Self::NotPositionOwner {
                position_id,
                account,
            } => write!(f, "{account} does not own position {position_id}"),
            Self::InsufficientFunds {
                token,
                account,
                requested,
                available,
            } => write!(
                f,
                "{account} holds {available} of {token}, {requested} requested"
            ),
            Self::InsufficientAllowance {
                token,
                owner,
                spender,
                requested,
            } => write!(
                f,
                "{spender} may not move {requested} of {token} on behalf of {owner}"
            ),
            Self::ObservationUnavailable { seconds_ago } => {
                write!(f, "no price observation {seconds_ago}s ago")
            }
            Self::Rejected {
                collaborator,
                reason,
            } => write!(f, "{collaborator} rejected the call: {reason}"),
            Self::Provider(message) => write!(f, "provider error: {message}"),
        }
    }
}

impl std::error::Error for ExternalError {}

/// Identifies a pool by its canonical token order and fee tier (pips).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
}

impl PoolKey {
    /// Builds a key from an unordered pair.
    pub fn new(token_a: Address, token_b: Address, fee: u32) -> Self {
        let (token0, token1) = if token_a < token_b {
            (token_a, token_b)
        } else {
            (token_b, token_a)
        };
        Self {
            token0,
            token1,
            fee,
        }
    }
}

/// What the position manager reports for a position handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionInfo {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
}

impl PositionInfo {
    pub fn pool_key(&self) -> PoolKey {
        PoolKey {
            token0: self.token0,
            token1: self.token1,
            fee: self.fee,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncreaseLiquidityParams {
    pub position_id: U256,
    pub amount0_desired: U256,
    pub amount1_desired: U256,
    pub amount0_min: U256,
    pub amount1_min: U256,
    pub deadline: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecreaseLiquidityParams {
    pub position_id: U256,
    pub liquidity: u128,
    pub amount0_min: U256,
    pub amount1_min: U256,
    pub deadline: u64,
}

/// Liquidity minted and the token amounts actually pulled for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiquidityChange {
    pub liquidity: u128,
    pub amount0: U256,
    pub amount1: U256,
}

/// Live pool state as reported by the pool itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolState {
    pub sqrt_price_x96: U256,
    pub tick: i32,
    pub observation_cardinality: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExactInputParams {
    /// Packed `token ‖ fee ‖ token` route, see [`encode_path`].
    pub path: Vec<u8>,
    pub recipient: Address,
    pub deadline: u64,
    pub amount_in: U256,
    pub amount_out_minimum: U256,
}

/// Packs a single-hop route the way the router expects it: 20-byte token in,
/// 3-byte big-endian fee, 20-byte token out.
pub fn encode_path(token_in: Address, fee: u32, token_out: Address) -> Vec<u8> {
    let fee = fee.min(MAX_FEE_PIPS).to_be_bytes();
    let mut path = Vec::with_capacity(43);
    path.extend_from_slice(token_in.as_slice());
    path.extend_from_slice(&fee[1..]);
    path.extend_from_slice(token_out.as_slice());
    path
}

/// Reverses [`encode_path`] for single-hop routes.
pub fn decode_path(path: &[u8]) -> Option<(Address, u32, Address)> {
    if path.len() != 43 {
        return None;
    }
    let token_in = Address::from_slice(&path[..20]);
    let fee = u32::from_be_bytes([0, path[20], path[21], path[22]]);
    let token_out = Address::from_slice(&path[23..]);
    Some((token_in, fee, token_out))
}

pub trait Clock {
    /// Current block timestamp in seconds.
    fn now(&self) -> u64;
}

pub trait PositionManager {
    fn position_manager_address(&self) -> Address;

    fn owner_of(&self, position_id: U256) -> Result<Address, ExternalError>;

    fn position(&self, position_id: U256) -> Result<PositionInfo, ExternalError>;

    /// Collects everything owed to the position and sends it to `recipient`.
    fn collect(
        &mut self,
        sender: Address,
        position_id: U256,
        recipient: Address,
    ) -> Result<(U256, U256), ExternalError>;

    /// Adds liquidity paid for by `sender`. The amounts pulled may be lower
    /// than desired because of the manager's own rounding.
    fn increase_liquidity(
        &mut self,
        sender: Address,
        params: &IncreaseLiquidityParams,
    ) -> Result<LiquidityChange, ExternalError>;

    /// Burns liquidity; the released amounts become collectable.
    fn decrease_liquidity(
        &mut self,
        sender: Address,
        params: &DecreaseLiquidityParams,
    ) -> Result<(U256, U256), ExternalError>;

    fn transfer_position(
        &mut self,
        from: Address,
        to: Address,
        position_id: U256,
    ) -> Result<(), ExternalError>;
}

pub trait PoolOracle {
    fn pool_state(&self, key: &PoolKey) -> Result<PoolState, ExternalError>;

    /// Tick cumulatives for each entry of `seconds_agos`, in the same order.
    fn observe(&self, key: &PoolKey, seconds_agos: &[u32]) -> Result<Vec<i64>, ExternalError>;
}

pub trait SwapRouter {
    fn router_address(&self) -> Address;

    /// Swaps `amount_in` pulled from `payer` along `params.path`.
    fn exact_input(
        &mut self,
        payer: Address,
        params: &ExactInputParams,
    ) -> Result<U256, ExternalError>;
}

pub trait TokenBank {
    fn balance_of(&self, token: Address, account: Address) -> U256;

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256;

    fn approve(
        &mut self,
        owner: Address,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<(), ExternalError>;

    /// Moves tokens held by `from`, acting as `from`.
    fn transfer(
        &mut self,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), ExternalError>;

    /// Moves tokens held by `from`, acting as `spender` under an allowance.
    fn transfer_from(
        &mut self,
        spender: Address,
        token: Address,
        from: Address,
        to: Address,
        amount: U256,
    ) -> Result<(), ExternalError>;

    /// Address of the wrapped form of the network's native asset.
    fn wrapped_native(&self) -> Address;

    /// Takes `amount` of native asset from `from` and credits the wrapped
    /// token to `to`.
    fn wrap_native(&mut self, from: Address, to: Address, amount: U256)
    -> Result<(), ExternalError>;
}

/// Everything a vault call may touch.
pub trait External: Clock + PositionManager + PoolOracle + SwapRouter + TokenBank {}

impl<T> External for T where T: Clock + PositionManager + PoolOracle + SwapRouter + TokenBank {}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn pool_key_orders_tokens() {
        let low = address!("0000000000000000000000000000000000000001");
        let high = address!("0000000000000000000000000000000000000002");
        assert_eq!(PoolKey::new(high, low, 3000), PoolKey::new(low, high, 3000));
        assert_eq!(PoolKey::new(high, low, 3000).token0, low);
    }

    #[test]
    fn path_packs_fee_as_uint24() {
        let token_in = address!("1111111111111111111111111111111111111111");
        let token_out = address!("2222222222222222222222222222222222222222");
        let path = encode_path(token_in, 3000, token_out);
        assert_eq!(path.len(), 43);
        assert_eq!(&path[20..23], &[0x00, 0x0b, 0xb8]);
        assert_eq!(decode_path(&path), Some((token_in, 3000, token_out)));
        assert_eq!(decode_path(&path[1..]), None);
    }
}
