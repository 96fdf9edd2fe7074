use std::fmt;
use std::str::FromStr;

use alloy_primitives::{Address, U256, address};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;
use crate::pools::pricing::Q64;
use crate::rebalance::BonusMode;

/// Hard ceiling on the total bonus: 2 % in X64.
pub const MAX_TOTAL_BONUS_X64: U256 = U256::from_limbs([368_934_881_474_191_032, 0, 0, 0]);
pub const DEFAULT_TOTAL_BONUS_X64: U256 = MAX_TOTAL_BONUS_X64;
pub const DEFAULT_COMPOUNDER_BONUS_X64: U256 = U256::from_limbs([184_467_440_737_095_516, 0, 0, 0]);
pub const DEFAULT_MAX_TICK_DEVIATION: u32 = 100;

pub const DEFAULT_RPC_URL: &str = "https://eth.drpc.org";
pub const DEFAULT_POSITION_MANAGER: Address = address!("C36442b4a4522E871399CD717aBDD847Ab11FE88");
pub const DEFAULT_FACTORY: Address = address!("1F98431c8aD98523631AE4a59f267346ea31F984");
pub const DEFAULT_BONUS_MODE: BonusMode = BonusMode::None;

const BPS_DENOMINATOR: u64 = 10_000;

/// Fee parameters shared by every compound call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusConfig {
    pub total_bonus_x64: U256,
    pub compounder_bonus_x64: U256,
    pub max_tick_deviation: u32,
}

impl Default for BonusConfig {
    fn default() -> Self {
        Self {
            total_bonus_x64: DEFAULT_TOTAL_BONUS_X64,
            compounder_bonus_x64: DEFAULT_COMPOUNDER_BONUS_X64,
            max_tick_deviation: DEFAULT_MAX_TICK_DEVIATION,
        }
    }
}

impl BonusConfig {
    pub fn new(
        total_bonus_x64: U256,
        compounder_bonus_x64: U256,
        max_tick_deviation: u32,
    ) -> Result<Self, VaultError> {
        if total_bonus_x64 > MAX_TOTAL_BONUS_X64 {
            return Err(VaultError::InvalidConfig(format!(
                "total bonus {total_bonus_x64} exceeds ceiling {MAX_TOTAL_BONUS_X64}"
            )));
        }
        if compounder_bonus_x64 > total_bonus_x64 {
            return Err(VaultError::InvalidConfig(format!(
                "compounder bonus {compounder_bonus_x64} exceeds total {total_bonus_x64}"
            )));
        }
        Ok(Self {
            total_bonus_x64,
            compounder_bonus_x64,
            max_tick_deviation,
        })
    }

    /// Builds a config from basis points, e.g. 200 = 2 %.
    pub fn from_bps(
        total_bps: u64,
        compounder_bps: u64,
        max_tick_deviation: u32,
    ) -> Result<Self, VaultError> {
        Self::new(
            bps_to_x64(total_bps),
            bps_to_x64(compounder_bps),
            max_tick_deviation,
        )
    }
}

pub fn bps_to_x64(bps: u64) -> U256 {
    Q64 * U256::from(bps) / U256::from(BPS_DENOMINATOR)
}

/// Settings of the preview binary.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub rpc_url: String,
    pub position_id: U256,
    pub position_manager: Address,
    pub factory: Address,
    pub bonus_mode: BonusMode,
    pub bonus: BonusConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingEnv(&'static str),
    InvalidEnvValue { name: &'static str, value: String },
    InvalidBonus(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingEnv(name) => write!(f, "required env var {name} is not set"),
            Self::InvalidEnvValue { name, value } => {
                write!(f, "invalid env var {name}={value}")
            }
            Self::InvalidBonus(message) => write!(f, "invalid bonus settings: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    pub fn from_vars<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rpc_url = lookup("RPC")
            .unwrap_or_else(|| DEFAULT_RPC_URL.to_string())
            .trim()
            .to_string();
        if rpc_url.is_empty() {
            return Err(ConfigError::InvalidEnvValue {
                name: "RPC",
                value: "<empty>".to_string(),
            });
        }

        let raw_id = lookup("POSITION_ID").ok_or(ConfigError::MissingEnv("POSITION_ID"))?;
        let position_id = U256::from_str(raw_id.trim()).map_err(|_| {
            ConfigError::InvalidEnvValue {
                name: "POSITION_ID",
                value: raw_id.clone(),
            }
        })?;

        let position_manager =
            parse_env_parsed(&lookup, "POSITION_MANAGER", DEFAULT_POSITION_MANAGER)?;
        let factory = parse_env_parsed(&lookup, "FACTORY", DEFAULT_FACTORY)?;
        let bonus_mode = parse_env_parsed(&lookup, "BONUS_MODE", DEFAULT_BONUS_MODE)?;

        let total_bps = parse_env_parsed(&lookup, "TOTAL_BONUS_BPS", 200u64)?;
        let compounder_bps = parse_env_parsed(&lookup, "COMPOUNDER_BONUS_BPS", 100u64)?;
        let max_tick_deviation =
            parse_env_parsed(&lookup, "MAX_TICK_DEVIATION", DEFAULT_MAX_TICK_DEVIATION)?;
        let bonus = BonusConfig::from_bps(total_bps, compounder_bps, max_tick_deviation)
            .map_err(|err| ConfigError::InvalidBonus(err.to_string()))?;

        Ok(Self {
            rpc_url,
            position_id,
            position_manager,
            factory,
            bonus_mode,
            bonus,
        })
    }
}

fn parse_env_parsed<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidEnvValue { name, value: raw })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_two_percent_split_evenly() {
        let config = BonusConfig::default();
        assert_eq!(config.total_bonus_x64, Q64 / U256::from(50));
        assert_eq!(config.compounder_bonus_x64, config.total_bonus_x64 / U256::from(2));
        assert_eq!(config.max_tick_deviation, 100);
        assert_eq!(bps_to_x64(200), MAX_TOTAL_BONUS_X64);
    }

    #[test]
    fn bonus_config_rejects_out_of_bounds_values() {
        assert!(matches!(
            BonusConfig::new(MAX_TOTAL_BONUS_X64 + U256::from(1), U256::ZERO, 100),
            Err(VaultError::InvalidConfig(_))
        ));
        assert!(matches!(
            BonusConfig::new(U256::from(10), U256::from(11), 100),
            Err(VaultError::InvalidConfig(_))
        ));
    }

    #[test]
    fn runtime_config_requires_position_id() {
        let err = RuntimeConfig::from_vars(vars(&[])).expect_err("position id is required");
        assert_eq!(err, ConfigError::MissingEnv("POSITION_ID"));
    }

    #[test]
    fn runtime_config_applies_defaults_and_overrides() {
        let config = RuntimeConfig::from_vars(vars(&[
            ("POSITION_ID", "4242"),
            ("BONUS_MODE", "token1"),
            ("TOTAL_BONUS_BPS", "150"),
            ("COMPOUNDER_BONUS_BPS", "50"),
        ]))
        .expect("config should parse");
        assert_eq!(config.rpc_url, DEFAULT_RPC_URL);
        assert_eq!(config.position_id, U256::from(4242));
        assert_eq!(config.position_manager, DEFAULT_POSITION_MANAGER);
        assert_eq!(config.bonus_mode, BonusMode::TokenB);
        assert_eq!(config.bonus.total_bonus_x64, bps_to_x64(150));
        assert_eq!(config.bonus.max_tick_deviation, DEFAULT_MAX_TICK_DEVIATION);
    }

    #[test]
    fn runtime_config_rejects_garbage() {
        let err = RuntimeConfig::from_vars(vars(&[
            ("POSITION_ID", "1"),
            ("MAX_TICK_DEVIATION", "wide"),
        ]))
        .expect_err("deviation must be numeric");
        assert!(matches!(
            err,
            ConfigError::InvalidEnvValue {
                name: "MAX_TICK_DEVIATION",
                ..
            }
        ));

        let err = RuntimeConfig::from_vars(vars(&[
            ("POSITION_ID", "1"),
            ("TOTAL_BONUS_BPS", "500"),
        ]))
        .expect_err("bonus above the ceiling must be rejected");
        assert!(matches!(err, ConfigError::InvalidBonus(_)));
    }
}
