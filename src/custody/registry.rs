use std::collections::BTreeMap;

use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

pub const MAX_POSITIONS_PER_ACCOUNT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Slot {
    owner: Address,
    /// Index into the owner's entry of `held`.
    index: usize,
}

/// Which account owns each custodied position.
///
/// Each owner's list is an arena with a back-pointer per position, so removal
/// is a swap-remove. List order is therefore not stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registry {
    slots: BTreeMap<U256, Slot>,
    held: BTreeMap<Address, Vec<U256>>,
}

impl Registry {
    pub fn owner_of(&self, position_id: U256) -> Option<Address> {
        self.slots.get(&position_id).map(|slot| slot.owner)
    }

    pub fn positions_of(&self, owner: Address) -> &[U256] {
        self.held.get(&owner).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn position_count(&self, owner: Address) -> usize {
        self.positions_of(owner).len()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Fails without mutating when `insert` would fail.
    pub fn check_insert(&self, owner: Address, position_id: U256) -> Result<(), VaultError> {
        if self.slots.contains_key(&position_id) {
            return Err(VaultError::AlreadyRegistered(position_id));
        }
        if self.position_count(owner) >= MAX_POSITIONS_PER_ACCOUNT {
            return Err(VaultError::CapacityExceeded {
                owner,
                limit: MAX_POSITIONS_PER_ACCOUNT,
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, owner: Address, position_id: U256) -> Result<(), VaultError> {
        self.check_insert(owner, position_id)?;
        let list = self.held.entry(owner).or_default();
        self.slots.insert(
            position_id,
            Slot {
                owner,
                index: list.len(),
            },
        );
        list.push(position_id);
        Ok(())
    }

    /// Removes the position and returns its former owner.
    pub fn remove(&mut self, position_id: U256) -> Result<Address, VaultError> {
        let slot = self
            .slots
            .remove(&position_id)
            .ok_or(VaultError::NotFound(position_id))?;
        let Some(list) = self.held.get_mut(&slot.owner) else {
            return Ok(slot.owner);
        };
        list.swap_remove(slot.index);
        if let Some(moved_slot) = list
            .get(slot.index)
            .and_then(|moved| self.slots.get_mut(moved))
        {
            moved_slot.index = slot.index;
        }
        if list.is_empty() {
            self.held.remove(&slot.owner);
        }
        Ok(slot.owner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> U256 {
        U256::from(n)
    }

    #[test]
    fn insert_then_remove_restores_empty_state() {
        let owner = Address::repeat_byte(7);
        let mut registry = Registry::default();
        registry.insert(owner, id(1)).expect("insert should succeed");
        assert_eq!(registry.owner_of(id(1)), Some(owner));
        assert_eq!(registry.remove(id(1)), Ok(owner));
        assert!(registry.is_empty());
        assert_eq!(registry.position_count(owner), 0);
        assert_eq!(registry, Registry::default());
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = Registry::default();
        registry
            .insert(Address::repeat_byte(1), id(9))
            .expect("first insert should succeed");
        assert_eq!(
            registry.insert(Address::repeat_byte(2), id(9)),
            Err(VaultError::AlreadyRegistered(id(9)))
        );
    }

    #[test]
    fn capacity_is_enforced_per_owner() {
        let owner = Address::repeat_byte(3);
        let mut registry = Registry::default();
        for n in 0..MAX_POSITIONS_PER_ACCOUNT as u64 {
            registry.insert(owner, id(n)).expect("insert under cap should succeed");
        }
        assert!(matches!(
            registry.insert(owner, id(1_000)),
            Err(VaultError::CapacityExceeded { .. })
        ));
        registry
            .insert(Address::repeat_byte(4), id(1_000))
            .expect("other owners are unaffected");
    }

    #[test]
    fn swap_remove_keeps_back_pointers_consistent() {
        let owner = Address::repeat_byte(5);
        let mut registry = Registry::default();
        for n in 1..=4 {
            registry.insert(owner, id(n)).expect("insert should succeed");
        }
        registry.remove(id(1)).expect("remove should succeed");
        assert_eq!(registry.positions_of(owner), &[id(4), id(2), id(3)]);

        // The moved position must still be removable through its slot.
        registry.remove(id(4)).expect("moved entry should be removable");
        let mut left = registry.positions_of(owner).to_vec();
        left.sort();
        assert_eq!(left, vec![id(2), id(3)]);
        assert_eq!(registry.remove(id(4)), Err(VaultError::NotFound(id(4))));
    }
}
