//! Staged writes of one vault operation.
//!
//! Reads fall through to the committed store under a short lock; writes stay
//! in the overlay until `commit`, so a failed operation leaves the store
//! untouched and concurrent readers never observe half an operation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use alloy_primitives::{Address, U256};

use super::ledger::{credited, debited};
use super::registry::{MAX_POSITIONS_PER_ACCOUNT, Registry};
use super::{Store, lock_store};
use crate::config::BonusConfig;
use crate::error::VaultError;
use crate::vault::events::VaultEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistryOp {
    Insert { owner: Address, position_id: U256 },
    Remove { owner: Address, position_id: U256 },
}

pub struct Txn<'s> {
    store: &'s Mutex<Store>,
    balances: BTreeMap<(Address, Address), U256>,
    registry: Vec<RegistryOp>,
    approvals: BTreeSet<Address>,
    config: Option<BonusConfig>,
    admin: Option<Address>,
    events: Vec<VaultEvent>,
}

impl<'s> Txn<'s> {
    pub fn new(store: &'s Mutex<Store>) -> Self {
        Self {
            store,
            balances: BTreeMap::new(),
            registry: Vec::new(),
            approvals: BTreeSet::new(),
            config: None,
            admin: None,
            events: Vec::new(),
        }
    }

    pub fn balance_of(&self, account: Address, token: Address) -> U256 {
        if let Some(amount) = self.balances.get(&(account, token)) {
            return *amount;
        }
        lock_store(self.store).ledger.balance_of(account, token)
    }

    pub fn set_balance(&mut self, account: Address, token: Address, amount: U256) {
        self.balances.insert((account, token), amount);
    }

    pub fn credit(
        &mut self,
        account: Address,
        token: Address,
        amount: U256,
    ) -> Result<U256, VaultError> {
        if amount.is_zero() {
            return Ok(self.balance_of(account, token));
        }
        let next = credited(self.balance_of(account, token), amount)?;
        self.set_balance(account, token, next);
        self.emit(VaultEvent::BalanceAdded {
            account,
            token,
            amount,
        });
        Ok(next)
    }

    pub fn debit(
        &mut self,
        account: Address,
        token: Address,
        amount: U256,
    ) -> Result<U256, VaultError> {
        if amount.is_zero() {
            return Ok(self.balance_of(account, token));
        }
        let next = debited(account, token, self.balance_of(account, token), amount)?;
        self.set_balance(account, token, next);
        self.emit(VaultEvent::BalanceRemoved {
            account,
            token,
            amount,
        });
        Ok(next)
    }

    pub fn owner_of(&self, position_id: U256) -> Option<Address> {
        for op in self.registry.iter().rev() {
            match *op {
                RegistryOp::Insert {
                    owner,
                    position_id: id,
                } if id == position_id => return Some(owner),
                RegistryOp::Remove {
                    position_id: id, ..
                } if id == position_id => return None,
                _ => {}
            }
        }
        lock_store(self.store).registry.owner_of(position_id)
    }

    fn position_count(&self, owner: Address) -> usize {
        let committed = lock_store(self.store).registry.position_count(owner);
        self.registry.iter().fold(committed, |count, op| match *op {
            RegistryOp::Insert { owner: o, .. } if o == owner => count + 1,
            RegistryOp::Remove { owner: o, .. } if o == owner => count.saturating_sub(1),
            _ => count,
        })
    }

    pub fn register(&mut self, owner: Address, position_id: U256) -> Result<(), VaultError> {
        if self.owner_of(position_id).is_some() {
            return Err(VaultError::AlreadyRegistered(position_id));
        }
        if self.position_count(owner) >= MAX_POSITIONS_PER_ACCOUNT {
            return Err(VaultError::CapacityExceeded {
                owner,
                limit: MAX_POSITIONS_PER_ACCOUNT,
            });
        }
        self.registry.push(RegistryOp::Insert { owner, position_id });
        Ok(())
    }

    /// Stages removal and returns the owner being removed.
    pub fn unregister(&mut self, position_id: U256) -> Result<Address, VaultError> {
        let owner = self
            .owner_of(position_id)
            .ok_or(VaultError::NotFound(position_id))?;
        self.registry.push(RegistryOp::Remove { owner, position_id });
        Ok(owner)
    }

    pub fn is_approved(&self, token: Address) -> bool {
        self.approvals.contains(&token) || lock_store(self.store).approved_tokens.contains(&token)
    }

    pub fn mark_approved(&mut self, token: Address) {
        self.approvals.insert(token);
    }

    pub fn config(&self) -> BonusConfig {
        self.config.unwrap_or_else(|| lock_store(self.store).config)
    }

    pub fn set_config(&mut self, config: BonusConfig) {
        self.config = Some(config);
    }

    pub fn admin(&self) -> Address {
        self.admin.unwrap_or_else(|| lock_store(self.store).admin)
    }

    pub fn set_admin(&mut self, admin: Address) {
        self.admin = Some(admin);
    }

    pub fn emit(&mut self, event: VaultEvent) {
        self.events.push(event);
    }

    /// Applies every staged write under one lock and publishes the events.
    pub fn commit(self) -> Result<(), VaultError> {
        let mut store = lock_store(self.store);

        let registry = if self.registry.is_empty() {
            None
        } else {
            Some(apply_registry_ops(&store.registry, &self.registry)?)
        };

        if let Some(registry) = registry {
            store.registry = registry;
        }
        for ((account, token), amount) in self.balances {
            store.ledger.set(account, token, amount);
        }
        store.approved_tokens.extend(self.approvals);
        if let Some(config) = self.config {
            store.config = config;
        }
        if let Some(admin) = self.admin {
            store.admin = admin;
        }
        for event in &self.events {
            event.log();
        }
        store.events.extend(self.events);
        Ok(())
    }
}

fn apply_registry_ops(base: &Registry, ops: &[RegistryOp]) -> Result<Registry, VaultError> {
    let mut registry = base.clone();
    for op in ops {
        match *op {
            RegistryOp::Insert { owner, position_id } => registry.insert(owner, position_id)?,
            RegistryOp::Remove { position_id, .. } => {
                registry.remove(position_id)?;
            }
        }
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Mutex<Store> {
        Mutex::new(Store::new(Address::repeat_byte(0xad), BonusConfig::default()))
    }

    #[test]
    fn dropped_txn_leaves_store_untouched() {
        let store = store();
        let account = Address::repeat_byte(1);
        let token = Address::repeat_byte(2);
        {
            let mut txn = Txn::new(&store);
            txn.credit(account, token, U256::from(5)).expect("credit should succeed");
            txn.register(account, U256::from(1)).expect("register should succeed");
            assert_eq!(txn.balance_of(account, token), U256::from(5));
            assert_eq!(txn.owner_of(U256::from(1)), Some(account));
        }
        let committed = lock_store(&store);
        assert_eq!(committed.ledger.balance_of(account, token), U256::ZERO);
        assert!(committed.registry.is_empty());
        assert!(committed.events.is_empty());
    }

    #[test]
    fn commit_applies_writes_and_events() {
        let store = store();
        let account = Address::repeat_byte(1);
        let token = Address::repeat_byte(2);
        let mut txn = Txn::new(&store);
        txn.credit(account, token, U256::from(5)).expect("credit should succeed");
        txn.debit(account, token, U256::from(2)).expect("debit should succeed");
        txn.register(account, U256::from(1)).expect("register should succeed");
        txn.mark_approved(token);
        txn.commit().expect("commit should succeed");

        let committed = lock_store(&store);
        assert_eq!(committed.ledger.balance_of(account, token), U256::from(3));
        assert_eq!(committed.registry.owner_of(U256::from(1)), Some(account));
        assert!(committed.approved_tokens.contains(&token));
        assert_eq!(committed.events.len(), 2);
    }

    #[test]
    fn staged_removal_hides_owner() {
        let store = store();
        let account = Address::repeat_byte(1);
        lock_store(&store)
            .registry
            .insert(account, U256::from(7))
            .expect("seed insert should succeed");
        let mut txn = Txn::new(&store);
        assert_eq!(txn.unregister(U256::from(7)), Ok(account));
        assert_eq!(txn.owner_of(U256::from(7)), None);
        assert_eq!(
            txn.unregister(U256::from(7)),
            Err(VaultError::NotFound(U256::from(7)))
        );
    }
}
