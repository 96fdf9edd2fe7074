use alloy_primitives::{Address, U256};

use super::Vault;
use super::events::VaultEvent;
use crate::config::BonusConfig;
use crate::custody::Txn;
use crate::error::VaultError;

impl Vault {
    /// Lowers the total bonus and sets the caller's share of it. The total
    /// can never be raised again.
    pub fn set_bonus(
        &self,
        caller: Address,
        total_bonus_x64: U256,
        compounder_bonus_x64: U256,
    ) -> Result<(), VaultError> {
        let _entry = self.guard.enter()?;
        let mut txn = Txn::new(&self.store);
        require_admin(&txn, caller, "set the bonus")?;

        let current = txn.config();
        if total_bonus_x64 > current.total_bonus_x64 {
            return Err(VaultError::InvalidConfig(format!(
                "total bonus {total_bonus_x64} is above the current {}",
                current.total_bonus_x64
            )));
        }
        let next = BonusConfig::new(
            total_bonus_x64,
            compounder_bonus_x64,
            current.max_tick_deviation,
        )?;

        txn.set_config(next);
        txn.emit(VaultEvent::BonusUpdated {
            total_bonus_x64,
            compounder_bonus_x64,
        });
        txn.commit()
    }

    pub fn set_max_tick_deviation(&self, caller: Address, ticks: u32) -> Result<(), VaultError> {
        let _entry = self.guard.enter()?;
        let mut txn = Txn::new(&self.store);
        require_admin(&txn, caller, "set the tick deviation")?;

        let mut next = txn.config();
        next.max_tick_deviation = ticks;
        txn.set_config(next);
        txn.emit(VaultEvent::MaxTickDeviationUpdated {
            max_tick_deviation: ticks,
        });
        txn.commit()
    }

    pub fn transfer_admin(&self, caller: Address, new_admin: Address) -> Result<(), VaultError> {
        let _entry = self.guard.enter()?;
        let mut txn = Txn::new(&self.store);
        require_admin(&txn, caller, "transfer administration")?;
        if new_admin == Address::ZERO {
            return Err(VaultError::InvalidRecipient(new_admin));
        }

        txn.set_admin(new_admin);
        txn.emit(VaultEvent::AdminTransferred {
            from: caller,
            to: new_admin,
        });
        txn.commit()
    }
}

fn require_admin(txn: &Txn<'_>, caller: Address, action: &'static str) -> Result<(), VaultError> {
    if txn.admin() != caller {
        tracing::warn!(caller = %caller, action, "admin call rejected");
        return Err(VaultError::Unauthorized { caller, action });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_TOTAL_BONUS_X64, MAX_TOTAL_BONUS_X64};

    fn vault() -> (Vault, Address) {
        let admin = Address::repeat_byte(0xad);
        (Vault::new(Address::repeat_byte(0x11), admin), admin)
    }

    #[test]
    fn bonus_can_be_lowered_but_not_raised() {
        let (vault, admin) = vault();
        let lower = DEFAULT_TOTAL_BONUS_X64 / U256::from(2);
        vault
            .set_bonus(admin, lower, lower / U256::from(4))
            .expect("lowering should succeed");
        assert_eq!(vault.config().total_bonus_x64, lower);

        let err = vault
            .set_bonus(admin, MAX_TOTAL_BONUS_X64, U256::ZERO)
            .expect_err("raising must be rejected");
        assert!(matches!(err, VaultError::InvalidConfig(_)));
        assert_eq!(vault.config().total_bonus_x64, lower);
    }

    #[test]
    fn compounder_share_cannot_exceed_total() {
        let (vault, admin) = vault();
        let err = vault
            .set_bonus(admin, U256::from(10), U256::from(11))
            .expect_err("share above total must be rejected");
        assert!(matches!(err, VaultError::InvalidConfig(_)));
        assert_eq!(vault.config(), BonusConfig::default());
    }

    #[test]
    fn non_admin_calls_are_rejected() {
        let (vault, _) = vault();
        let stranger = Address::repeat_byte(0x99);
        assert!(matches!(
            vault.set_max_tick_deviation(stranger, 5),
            Err(VaultError::Unauthorized { .. })
        ));
        assert!(matches!(
            vault.transfer_admin(stranger, stranger),
            Err(VaultError::Unauthorized { .. })
        ));
        assert!(vault.events().is_empty());
    }

    #[test]
    fn admin_transfer_hands_over_setters() {
        let (vault, admin) = vault();
        let next = Address::repeat_byte(0xbe);
        vault.transfer_admin(admin, next).expect("transfer should succeed");
        assert_eq!(vault.admin(), next);
        vault
            .set_max_tick_deviation(next, 30)
            .expect("new admin should be accepted");
        assert_eq!(vault.config().max_tick_deviation, 30);
        assert!(vault.set_max_tick_deviation(admin, 40).is_err());
        assert_eq!(vault.events().len(), 2);
    }
}
