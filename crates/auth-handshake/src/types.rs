//! Ledger data model shared by every handshake step

use crate::encoding::{write_address, write_str, write_values};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use solana_sdk::{pubkey::Pubkey, signature::Signature};
use std::fmt;

/// Account address: a 32-byte ed25519 public key
pub type Address = Pubkey;

/// Identifier of the target network, bound into every signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkId(pub [u8; 32]);

impl NetworkId {
    pub fn from_passphrase(passphrase: &str) -> Self {
        Self(Sha256::digest(passphrase.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ================================
// Values and Invocations
// ================================

/// Typed invocation argument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScValue {
    U32(u32),
    I128(i128),
    Bool(bool),
    Address(Address),
    Symbol(String),
    Bytes(Vec<u8>),
}

impl ScValue {
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            ScValue::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i128(&self) -> Option<i128> {
        match self {
            ScValue::I128(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<&Address> {
        match self {
            ScValue::Address(v) => Some(v),
            _ => None,
        }
    }

    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            ScValue::U32(_) => "u32",
            ScValue::I128(_) => "i128",
            ScValue::Bool(_) => "bool",
            ScValue::Address(_) => "address",
            ScValue::Symbol(_) => "symbol",
            ScValue::Bytes(_) => "bytes",
        }
    }
}

/// A contract call: the operation both parties authorize
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub contract: Address,
    pub function: String,
    pub args: Vec<ScValue>,
}

impl Invocation {
    pub fn new(contract: Address, function: impl Into<String>, args: Vec<ScValue>) -> Self {
        Self {
            contract,
            function: function.into(),
            args,
        }
    }
}

// ================================
// Authorization Entries
// ================================

/// Credential kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialKind {
    ImplicitSource,
    Address,
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialKind::ImplicitSource => write!(f, "ImplicitSource"),
            CredentialKind::Address => write!(f, "Address"),
        }
    }
}

/// Credential of an address that signs for itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressCredential {
    pub address: Address,
    pub expiry_ledger: Option<u32>,
    pub signature: Option<Signature>,
}

/// How an authorization entry is satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Authorized by whoever submits the transaction
    ImplicitSource,
    /// Authorized by an explicit signature from `address`
    Address(AddressCredential),
}

/// One signer's permission for one invocation, either a stub or signed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationEntry {
    pub credential: Credential,
    pub invocation_name: String,
    pub invocation_args: Vec<ScValue>,
}

impl AuthorizationEntry {
    /// Unsigned placeholder for `address`
    pub fn stub(address: Address, invocation_name: impl Into<String>, args: Vec<ScValue>) -> Self {
        Self {
            credential: Credential::Address(AddressCredential {
                address,
                expiry_ledger: None,
                signature: None,
            }),
            invocation_name: invocation_name.into(),
            invocation_args: args,
        }
    }

    /// Entry satisfied by the transaction source
    pub fn implicit(invocation_name: impl Into<String>, args: Vec<ScValue>) -> Self {
        Self {
            credential: Credential::ImplicitSource,
            invocation_name: invocation_name.into(),
            invocation_args: args,
        }
    }

    pub fn kind(&self) -> CredentialKind {
        match self.credential {
            Credential::ImplicitSource => CredentialKind::ImplicitSource,
            Credential::Address(_) => CredentialKind::Address,
        }
    }

    pub fn signer_address(&self) -> Option<&Address> {
        match &self.credential {
            Credential::Address(cred) => Some(&cred.address),
            Credential::ImplicitSource => None,
        }
    }

    pub fn expiry_ledger(&self) -> Option<u32> {
        match &self.credential {
            Credential::Address(cred) => cred.expiry_ledger,
            Credential::ImplicitSource => None,
        }
    }

    pub fn signature(&self) -> Option<&Signature> {
        match &self.credential {
            Credential::Address(cred) => cred.signature.as_ref(),
            Credential::ImplicitSource => None,
        }
    }

    /// Address credential still awaiting a signature
    pub fn is_stub(&self) -> bool {
        matches!(&self.credential, Credential::Address(cred) if cred.signature.is_none())
    }

    pub fn is_signed(&self) -> bool {
        self.signature().is_some()
    }
}

// ================================
// Bundles
// ================================

/// Resource estimate recorded by the last simulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub latest_ledger: u32,
    pub min_resource_fee: u64,
}

/// A not-yet-submitted operation with its authorization entries.
///
/// Owned by whichever party built or merged it last; it moves by value
/// through the pipeline and is never shared between parties.
#[derive(Debug)]
pub struct Bundle {
    pub fee_payer: Address,
    pub invocation: Invocation,
    pub auth_entries: Vec<AuthorizationEntry>,
    pub simulation: Option<SimulationReport>,
    pub envelope_signature: Option<Signature>,
}

impl Bundle {
    pub fn new(invocation: Invocation, fee_payer: Address) -> Self {
        Self {
            fee_payer,
            invocation,
            auth_entries: Vec::new(),
            simulation: None,
            envelope_signature: None,
        }
    }

    /// Bytes the fee payer signs to authorize the envelope
    pub fn envelope_preimage(&self, network_id: &NetworkId) -> Vec<u8> {
        let mut data = Vec::with_capacity(256);
        data.extend_from_slice(b"envelope");
        data.extend_from_slice(network_id.as_bytes());
        write_address(&mut data, &self.fee_payer);
        write_address(&mut data, &self.invocation.contract);
        write_str(&mut data, &self.invocation.function);
        write_values(&mut data, &self.invocation.args);

        data.extend_from_slice(&(self.auth_entries.len() as u32).to_le_bytes());
        for entry in &self.auth_entries {
            match &entry.credential {
                Credential::ImplicitSource => data.push(0),
                Credential::Address(cred) => {
                    data.push(1);
                    write_address(&mut data, &cred.address);
                    data.extend_from_slice(&cred.expiry_ledger.unwrap_or(0).to_le_bytes());
                    match &cred.signature {
                        Some(signature) => data.extend_from_slice(signature.as_ref()),
                        None => data.extend_from_slice(&[0u8; 64]),
                    }
                }
            }
        }
        data
    }

    /// Transaction hash reported once the bundle lands
    pub fn envelope_hash(&self, network_id: &NetworkId) -> [u8; 32] {
        Sha256::digest(self.envelope_preimage(network_id)).into()
    }

    /// Earliest expiry across signed entries; the bundle is dead after it
    pub fn earliest_expiry(&self) -> Option<u32> {
        self.auth_entries
            .iter()
            .filter(|entry| entry.is_signed())
            .filter_map(AuthorizationEntry::expiry_ledger)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_and_signed_state() {
        let address = Address::new_unique();
        let mut entry = AuthorizationEntry::stub(address, "start_game", vec![ScValue::U32(1)]);

        assert!(entry.is_stub());
        assert!(!entry.is_signed());
        assert_eq!(entry.signer_address(), Some(&address));
        assert_eq!(entry.kind(), CredentialKind::Address);

        if let Credential::Address(cred) = &mut entry.credential {
            cred.signature = Some(Signature::default());
            cred.expiry_ledger = Some(10);
        }
        assert!(!entry.is_stub());
        assert_eq!(entry.expiry_ledger(), Some(10));
    }

    #[test]
    fn test_implicit_entry_has_no_address() {
        let entry = AuthorizationEntry::implicit("start_game", vec![]);

        assert!(entry.signer_address().is_none());
        assert!(!entry.is_stub());
        assert_eq!(entry.kind(), CredentialKind::ImplicitSource);
    }

    #[test]
    fn test_envelope_hash_changes_with_entries() {
        let network_id = NetworkId::from_passphrase("test");
        let invocation = Invocation::new(Address::new_unique(), "start_game", vec![ScValue::U32(7)]);
        let fee_payer = Address::new_unique();

        let mut bundle = Bundle::new(invocation, fee_payer);
        let before = bundle.envelope_hash(&network_id);

        bundle
            .auth_entries
            .push(AuthorizationEntry::stub(Address::new_unique(), "start_game", vec![]));
        let after = bundle.envelope_hash(&network_id);

        assert_ne!(before, after);
        assert_ne!(
            after,
            bundle.envelope_hash(&NetworkId::from_passphrase("other"))
        );
    }

    #[test]
    fn test_earliest_expiry_ignores_stubs() {
        let invocation = Invocation::new(Address::new_unique(), "start_game", vec![]);
        let mut bundle = Bundle::new(invocation, Address::new_unique());
        assert_eq!(bundle.earliest_expiry(), None);

        let mut signed = AuthorizationEntry::stub(Address::new_unique(), "start_game", vec![]);
        if let Credential::Address(cred) = &mut signed.credential {
            cred.signature = Some(Signature::default());
            cred.expiry_ledger = Some(500);
        }
        let mut stub = AuthorizationEntry::stub(Address::new_unique(), "start_game", vec![]);
        if let Credential::Address(cred) = &mut stub.credential {
            cred.expiry_ledger = Some(100);
        }

        bundle.auth_entries = vec![signed, stub];
        assert_eq!(bundle.earliest_expiry(), Some(500));
    }

    #[test]
    fn test_value_accessors() {
        let address = Address::new_unique();

        assert_eq!(ScValue::U32(4).as_u32(), Some(4));
        assert_eq!(ScValue::I128(-3).as_i128(), Some(-3));
        assert_eq!(ScValue::Address(address).as_address(), Some(&address));
        assert_eq!(ScValue::Bool(true).as_u32(), None);
        assert_eq!(ScValue::Symbol("x".into()).type_name(), "symbol");
    }
}
