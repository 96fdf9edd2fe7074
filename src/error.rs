use std::fmt;

use alloy_primitives::{Address, U256};

use crate::external::ExternalError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    NotFound(U256),
    Unauthorized {
        caller: Address,
        action: &'static str,
    },
    DeadlineInvalid {
        deadline: u64,
        now: u64,
    },
    PriceManipulationSuspected {
        current_tick: i32,
        twap_tick: Option<i32>,
    },
    CapacityExceeded {
        owner: Address,
        limit: usize,
    },
    InsufficientBalance {
        account: Address,
        token: Address,
        requested: U256,
        available: U256,
    },
    InvalidAsset(Address),
    ArithmeticFault(&'static str),
    ReentrancyBlocked,
    AlreadyRegistered(U256),
    ZeroAmount,
    InvalidRecipient(Address),
    InvalidConfig(String),
    External(ExternalError),
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "position {id} is not held by the vault"),
            Self::Unauthorized { caller, action } => {
                write!(f, "{caller} is not allowed to {action}")
            }
            Self::DeadlineInvalid { deadline, now } => {
                write!(f, "deadline {deadline} is outside the accepted window at {now}")
            }
            Self::PriceManipulationSuspected {
                current_tick,
                twap_tick: Some(twap_tick),
            } => write!(
                f,
                "pool tick {current_tick} diverges from twap tick {twap_tick}"
            ),
            Self::PriceManipulationSuspected {
                current_tick,
                twap_tick: None,
            } => write!(
                f,
                "pool at tick {current_tick} has no usable price history"
            ),
            Self::CapacityExceeded { owner, limit } => {
                write!(f, "{owner} already has {limit} positions in custody")
            }
            Self::InsufficientBalance {
                account,
                token,
                requested,
                available,
            } => write!(
                f,
                "{account} has {available} of {token} credited, {requested} requested"
            ),
            Self::InvalidAsset(token) => write!(f, "{token} cannot be used here"),
            Self::ArithmeticFault(context) => write!(f, "arithmetic fault in {context}"),
            Self::ReentrancyBlocked => write!(f, "vault is already executing an operation"),
            Self::AlreadyRegistered(id) => write!(f, "position {id} is already registered"),
            Self::ZeroAmount => write!(f, "amount must be greater than zero"),
            Self::InvalidRecipient(to) => write!(f, "{to} cannot receive this transfer"),
            Self::InvalidConfig(message) => write!(f, "invalid config: {message}"),
            Self::External(err) => write!(f, "collaborator failure: {err}"),
        }
    }
}

impl std::error::Error for VaultError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::External(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ExternalError> for VaultError {
    fn from(value: ExternalError) -> Self {
        Self::External(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_errors_convert_and_keep_source() {
        let err: VaultError = ExternalError::Provider("timeout".to_string()).into();
        assert!(matches!(err, VaultError::External(_)));
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("timeout"));
    }

    #[test]
    fn price_error_mentions_both_ticks() {
        let err = VaultError::PriceManipulationSuspected {
            current_tick: 250,
            twap_tick: Some(100),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("250") && rendered.contains("100"));
    }
}
