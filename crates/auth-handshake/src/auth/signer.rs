//! Turn authorization stubs into signed entries
//!
//! The signing key never leaves the [`AuthSigner`] capability: this module
//! only builds the canonical preimage, asks for a signature over it and
//! attaches the result together with the expiry ledger.

use crate::encoding::{write_address, write_str, write_values};
use crate::ttl::TtlCalculator;
use crate::types::{Address, AuthorizationEntry, Bundle, Credential, NetworkId, ScValue};
use crate::{HandshakeError, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use solana_sdk::signature::{Keypair, Signature, Signer};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Canonical bytes a signature commits to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPreimage(Vec<u8>);

impl AuthPreimage {
    /// Preimage for an address authorization: signer, expiry and the attested arguments
    pub fn for_entry(
        address: &Address,
        expiry_ledger: u32,
        invocation_name: &str,
        invocation_args: &[ScValue],
    ) -> Self {
        let mut data = Vec::with_capacity(128);
        data.extend_from_slice(b"auth-entry");
        write_address(&mut data, address);
        data.extend_from_slice(&expiry_ledger.to_le_bytes());
        write_str(&mut data, invocation_name);
        write_values(&mut data, invocation_args);
        Self(data)
    }

    /// Preimage for the fee payer's envelope signature
    pub fn for_envelope(bundle: &Bundle, network_id: &NetworkId) -> Self {
        Self(bundle.envelope_preimage(network_id))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Digest that is actually signed: the preimage bound to one network
pub fn signature_payload(network_id: &NetworkId, preimage: &AuthPreimage) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(network_id.as_bytes());
    hasher.update(preimage.as_bytes());
    hasher.finalize().into()
}

/// Check a signed address entry against its own arguments and expiry
pub fn verify_entry(entry: &AuthorizationEntry, network_id: &NetworkId) -> bool {
    let Credential::Address(cred) = &entry.credential else {
        return false;
    };
    let (Some(signature), Some(expiry_ledger)) = (&cred.signature, cred.expiry_ledger) else {
        return false;
    };

    let preimage = AuthPreimage::for_entry(
        &cred.address,
        expiry_ledger,
        &entry.invocation_name,
        &entry.invocation_args,
    );
    signature.verify(
        cred.address.as_ref(),
        &signature_payload(network_id, &preimage),
    )
}

/// Answer from a signer capability
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    Signed(Signature),
    Declined { reason: String },
}

/// External signing capability (wallet, HSM, local keypair)
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuthSigner: Send + Sync {
    /// Whether this capability holds the key for `address`
    fn controls(&self, address: &Address) -> bool;

    /// Sign `preimage` for `network_id` as `signer`
    async fn sign(
        &self,
        preimage: &AuthPreimage,
        network_id: &NetworkId,
        signer: &Address,
    ) -> Result<SignOutcome>;
}

/// Signer backed by in-memory ed25519 keypairs
#[derive(Default)]
pub struct KeypairSigner {
    keys: HashMap<Address, Keypair>,
}

impl KeypairSigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keypair(mut self, keypair: Keypair) -> Self {
        self.insert(keypair);
        self
    }

    pub fn insert(&mut self, keypair: Keypair) {
        self.keys.insert(keypair.pubkey(), keypair);
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.keys.keys().copied().collect()
    }
}

#[async_trait]
impl AuthSigner for KeypairSigner {
    fn controls(&self, address: &Address) -> bool {
        self.keys.contains_key(address)
    }

    async fn sign(
        &self,
        preimage: &AuthPreimage,
        network_id: &NetworkId,
        signer: &Address,
    ) -> Result<SignOutcome> {
        let Some(keypair) = self.keys.get(signer) else {
            return Ok(SignOutcome::Declined {
                reason: format!("no key held for {signer}"),
            });
        };
        let payload = signature_payload(network_id, preimage);
        Ok(SignOutcome::Signed(keypair.sign_message(&payload)))
    }
}

/// Signs authorization stubs with an expiry taken from the TTL source
pub struct AuthEntrySigner {
    signer: Arc<dyn AuthSigner>,
    ttl: Arc<dyn TtlCalculator>,
    network_id: NetworkId,
}

impl AuthEntrySigner {
    pub fn new(
        signer: Arc<dyn AuthSigner>,
        ttl: Arc<dyn TtlCalculator>,
        network_id: NetworkId,
    ) -> Self {
        Self {
            signer,
            ttl,
            network_id,
        }
    }

    pub fn controls(&self, address: &Address) -> bool {
        self.signer.controls(address)
    }

    /// Produce a signed copy of `stub`, valid for `duration_minutes`.
    ///
    /// The stub itself is left untouched.
    pub async fn sign_entry(
        &self,
        stub: &AuthorizationEntry,
        duration_minutes: u32,
    ) -> Result<AuthorizationEntry> {
        let cred = match &stub.credential {
            Credential::Address(cred) => cred,
            Credential::ImplicitSource => {
                return Err(HandshakeError::UnsupportedCredential(
                    "implicit source entries are authorized by the submitter".to_string(),
                ))
            }
        };
        if cred.signature.is_some() {
            return Err(HandshakeError::AlreadySigned {
                address: cred.address,
            });
        }

        let expiry_ledger = self.ttl.compute_expiry_ledger(duration_minutes).await?;
        debug!(
            "Signing {} for {} until ledger {}",
            stub.invocation_name, cred.address, expiry_ledger
        );

        let preimage = AuthPreimage::for_entry(
            &cred.address,
            expiry_ledger,
            &stub.invocation_name,
            &stub.invocation_args,
        );
        let signature = self.request_signature(&preimage, &cred.address).await?;

        let mut signed = stub.clone();
        signed.credential = Credential::Address(crate::types::AddressCredential {
            address: cred.address,
            expiry_ledger: Some(expiry_ledger),
            signature: Some(signature),
        });

        info!("Signed authorization for {}", cred.address);
        Ok(signed)
    }

    /// Fee payer signature over the whole bundle
    pub async fn sign_envelope(&self, bundle: &Bundle) -> Result<Signature> {
        let preimage = AuthPreimage::for_envelope(bundle, &self.network_id);
        self.request_signature(&preimage, &bundle.fee_payer).await
    }

    async fn request_signature(&self, preimage: &AuthPreimage, address: &Address) -> Result<Signature> {
        match self.signer.sign(preimage, &self.network_id, address).await {
            Ok(SignOutcome::Signed(signature)) => Ok(signature),
            Ok(SignOutcome::Declined { reason }) => {
                warn!("Signer declined for {}: {}", address, reason);
                Err(HandshakeError::SigningRejected(reason))
            }
            Err(e) => {
                warn!("Signer failed for {}: {}", address, e);
                Err(HandshakeError::SigningRejected(e.to_string()))
            }
        }
    }
}
