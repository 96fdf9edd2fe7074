use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

/// Record of a committed vault operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VaultEvent {
    Deposited {
        account: Address,
        position_id: U256,
    },
    Withdrawn {
        account: Address,
        to: Address,
        position_id: U256,
    },
    BalanceAdded {
        account: Address,
        token: Address,
        amount: U256,
    },
    BalanceRemoved {
        account: Address,
        token: Address,
        amount: U256,
    },
    BalanceWithdrawn {
        account: Address,
        token: Address,
        to: Address,
        amount: U256,
    },
    Compounded {
        caller: Address,
        position_id: U256,
        token_a: Address,
        token_b: Address,
        compounded_a: U256,
        compounded_b: U256,
        bonus_a: U256,
        bonus_b: U256,
    },
    BonusUpdated {
        total_bonus_x64: U256,
        compounder_bonus_x64: U256,
    },
    MaxTickDeviationUpdated {
        max_tick_deviation: u32,
    },
    AdminTransferred {
        from: Address,
        to: Address,
    },
}

impl VaultEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Deposited { .. } => "deposited",
            Self::Withdrawn { .. } => "withdrawn",
            Self::BalanceAdded { .. } => "balance_added",
            Self::BalanceRemoved { .. } => "balance_removed",
            Self::BalanceWithdrawn { .. } => "balance_withdrawn",
            Self::Compounded { .. } => "compounded",
            Self::BonusUpdated { .. } => "bonus_updated",
            Self::MaxTickDeviationUpdated { .. } => "max_tick_deviation_updated",
            Self::AdminTransferred { .. } => "admin_transferred",
        }
    }

    pub(crate) fn log(&self) {
        match self {
            Self::Compounded {
                caller,
                position_id,
                compounded_a,
                compounded_b,
                bonus_a,
                bonus_b,
                ..
            } => tracing::info!(
                caller = %caller,
                position_id = %position_id,
                compounded_a = %compounded_a,
                compounded_b = %compounded_b,
                bonus_a = %bonus_a,
                bonus_b = %bonus_b,
                "position compounded"
            ),
            Self::Deposited {
                account,
                position_id,
            } => tracing::info!(account = %account, position_id = %position_id, "position deposited"),
            Self::Withdrawn {
                account,
                to,
                position_id,
            } => tracing::info!(
                account = %account,
                to = %to,
                position_id = %position_id,
                "position withdrawn"
            ),
            other => tracing::debug!(event = other.name(), details = ?other, "vault event"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_serialize_with_snake_case_tag() {
        let event = VaultEvent::MaxTickDeviationUpdated {
            max_tick_deviation: 42,
        };
        let json = serde_json::to_value(&event).expect("event should serialize");
        assert_eq!(json["event"], event.name());
        assert_eq!(json["max_tick_deviation"], 42);
    }
}
