use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// Per-account token credit owed by the vault and not yet paid out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    balances: BTreeMap<Address, BTreeMap<Address, U256>>,
}

impl Ledger {
    pub fn balance_of(&self, account: Address, token: Address) -> U256 {
        self.balances
            .get(&account)
            .and_then(|tokens| tokens.get(&token))
            .copied()
            .unwrap_or_default()
    }

    /// Zero balances are dropped so an emptied account leaves no entry.
    pub fn set(&mut self, account: Address, token: Address, amount: U256) {
        if amount.is_zero() {
            if let Some(tokens) = self.balances.get_mut(&account) {
                tokens.remove(&token);
                if tokens.is_empty() {
                    self.balances.remove(&account);
                }
            }
            return;
        }
        self.balances
            .entry(account)
            .or_default()
            .insert(token, amount);
    }

    pub fn credit(
        &mut self,
        account: Address,
        token: Address,
        amount: U256,
    ) -> Result<U256, VaultError> {
        let next = credited(self.balance_of(account, token), amount)?;
        self.set(account, token, next);
        Ok(next)
    }

    pub fn debit(
        &mut self,
        account: Address,
        token: Address,
        amount: U256,
    ) -> Result<U256, VaultError> {
        let next = debited(account, token, self.balance_of(account, token), amount)?;
        self.set(account, token, next);
        Ok(next)
    }

    /// Sum of all credit in `token`; never above what the vault holds.
    pub fn total_of(&self, token: Address) -> U256 {
        self.balances
            .values()
            .filter_map(|tokens| tokens.get(&token))
            .fold(U256::ZERO, |acc, amount| acc.saturating_add(*amount))
    }

    pub fn accounts(&self) -> impl Iterator<Item = Address> + '_ {
        self.balances.keys().copied()
    }
}

pub(crate) fn credited(current: U256, amount: U256) -> Result<U256, VaultError> {
    current
        .checked_add(amount)
        .ok_or(VaultError::ArithmeticFault("balance credit"))
}

pub(crate) fn debited(
    account: Address,
    token: Address,
    current: U256,
    amount: U256,
) -> Result<U256, VaultError> {
    current
        .checked_sub(amount)
        .ok_or(VaultError::InsufficientBalance {
            account,
            token,
            requested: amount,
            available: current,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credit_and_debit_are_checked() {
        let account = Address::repeat_byte(1);
        let token = Address::repeat_byte(2);
        let mut ledger = Ledger::default();

        assert_eq!(ledger.credit(account, token, U256::from(10)), Ok(U256::from(10)));
        assert_eq!(ledger.debit(account, token, U256::from(4)), Ok(U256::from(6)));
        assert_eq!(
            ledger.debit(account, token, U256::from(7)),
            Err(VaultError::InsufficientBalance {
                account,
                token,
                requested: U256::from(7),
                available: U256::from(6),
            })
        );
        assert_eq!(ledger.balance_of(account, token), U256::from(6));

        ledger.set(account, token, U256::MAX);
        assert_eq!(
            ledger.credit(account, token, U256::from(1)),
            Err(VaultError::ArithmeticFault("balance credit"))
        );
    }

    #[test]
    fn zeroed_balances_leave_no_entries() {
        let account = Address::repeat_byte(1);
        let token = Address::repeat_byte(2);
        let mut ledger = Ledger::default();
        ledger.credit(account, token, U256::from(3)).expect("credit should succeed");
        ledger.debit(account, token, U256::from(3)).expect("debit should succeed");
        assert_eq!(ledger, Ledger::default());
        assert_eq!(ledger.accounts().count(), 0);
    }

    #[test]
    fn total_sums_across_accounts() {
        let token = Address::repeat_byte(9);
        let mut ledger = Ledger::default();
        ledger.set(Address::repeat_byte(1), token, U256::from(5));
        ledger.set(Address::repeat_byte(2), token, U256::from(7));
        ledger.set(Address::repeat_byte(2), Address::repeat_byte(8), U256::from(100));
        assert_eq!(ledger.total_of(token), U256::from(12));
    }
}
