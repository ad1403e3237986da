//! Find the authorization placeholder that belongs to a signer

use crate::types::{Address, AuthorizationEntry, Credential};
use crate::{HandshakeError, Result};

/// Index of the first address credential whose signer is `address`.
///
/// Implicit source entries are skipped without looking at them. When two
/// entries share a signer the earlier one wins.
pub fn locate_index(entries: &[AuthorizationEntry], address: &Address) -> Result<usize> {
    entries
        .iter()
        .position(|entry| match &entry.credential {
            Credential::Address(cred) => cred.address == *address,
            Credential::ImplicitSource => false,
        })
        .ok_or(HandshakeError::NotFound { address: *address })
}

/// The first address credential whose signer is `address`
pub fn locate<'a>(
    entries: &'a [AuthorizationEntry],
    address: &Address,
) -> Result<&'a AuthorizationEntry> {
    locate_index(entries, address).map(|index| &entries[index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ScValue;

    fn stub(address: Address) -> AuthorizationEntry {
        AuthorizationEntry::stub(address, "start_game", vec![ScValue::U32(1)])
    }

    #[test]
    fn test_locate_finds_matching_address() {
        let target = Address::new_unique();
        let entries = vec![
            AuthorizationEntry::implicit("start_game", vec![]),
            stub(Address::new_unique()),
            stub(target),
        ];

        let found = locate(&entries, &target).unwrap();
        assert_eq!(found.signer_address(), Some(&target));
        assert_eq!(locate_index(&entries, &target).unwrap(), 2);
    }

    #[test]
    fn test_locate_not_found() {
        let entries = vec![
            AuthorizationEntry::implicit("start_game", vec![]),
            stub(Address::new_unique()),
        ];
        let missing = Address::new_unique();

        match locate(&entries, &missing) {
            Err(HandshakeError::NotFound { address }) => assert_eq!(address, missing),
            other => panic!("Expected NotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_locate_empty_list() {
        assert!(locate(&[], &Address::new_unique()).is_err());
    }

    #[test]
    fn test_first_match_wins() {
        let target = Address::new_unique();
        let mut second = stub(target);
        second.invocation_args = vec![ScValue::U32(2)];
        let entries = vec![stub(target), second];

        let found = locate(&entries, &target).unwrap();
        assert_eq!(found.invocation_args, vec![ScValue::U32(1)]);
    }
}
