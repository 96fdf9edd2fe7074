use std::collections::HashSet;

use alloy_primitives::{Address, U256};

pub const MAX_APPROVE_AMOUNT: U256 = U256::MAX;

/// `(token, spender)` grants still missing for the given tokens.
///
/// Each token is granted to both spenders the first time it is seen;
/// `is_approved` reports tokens granted by an earlier call.
pub fn missing_approval_pairs<F>(
    tokens: &[Address],
    is_approved: F,
    position_manager: Address,
    router: Address,
) -> Vec<(Address, Address)>
where
    F: Fn(Address) -> bool,
{
    let mut out = Vec::new();
    let mut seen = HashSet::new();
    for token in tokens {
        if is_approved(*token) {
            continue;
        }
        for spender in [position_manager, router] {
            push_pair(&mut out, &mut seen, *token, spender);
        }
    }
    out
}

fn push_pair(
    out: &mut Vec<(Address, Address)>,
    seen: &mut HashSet<(Address, Address)>,
    token: Address,
    spender: Address,
) {
    if seen.insert((token, spender)) {
        out.push((token, spender));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_approved_tokens_are_skipped() {
        let (t0, t1) = (Address::repeat_byte(1), Address::repeat_byte(2));
        let (manager, router) = (Address::repeat_byte(0xaa), Address::repeat_byte(0xbb));
        let pairs = missing_approval_pairs(&[t0, t1], |token| token == t0, manager, router);
        assert_eq!(pairs, vec![(t1, manager), (t1, router)]);
    }

    #[test]
    fn repeated_tokens_yield_one_grant_per_spender() {
        let token = Address::repeat_byte(3);
        let (manager, router) = (Address::repeat_byte(0xaa), Address::repeat_byte(0xbb));
        let pairs = missing_approval_pairs(&[token, token], |_| false, manager, router);
        assert_eq!(pairs.len(), 2);
    }
}
