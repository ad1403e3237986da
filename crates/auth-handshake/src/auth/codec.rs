//! Portable encoding of a signed authorization entry
//!
//! Record layout (all integers little-endian):
//!
//! ```text
//! u32   record length (bytes that follow)
//! u8    credential kind (0 = implicit source, 1 = address)
//! [32]  signer address
//! u32   expiry ledger
//! u32   invocation name length, then UTF-8 bytes
//! u32   argument count, then per argument: u8 tag, u32 length, payload
//! u32   signature length, then signature bytes
//! ```
//!
//! The record is then base64 encoded (standard alphabet, padded) so it can
//! be pasted or sent as a link parameter.

use crate::encoding::{
    write_address, write_bytes, write_str, write_values, TAG_ADDRESS, TAG_BOOL, TAG_BYTES,
    TAG_I128, TAG_SYMBOL, TAG_U32,
};
use crate::types::{Address, AddressCredential, AuthorizationEntry, Credential, ScValue};
use crate::{HandshakeError, Result};
use base64::Engine;
use solana_sdk::signature::Signature;
use std::fmt;
use std::str::FromStr;

const KIND_IMPLICIT_SOURCE: u8 = 0;
const KIND_ADDRESS: u8 = 1;

/// Upper bounds for attacker-supplied lengths
const MAX_NAME_LEN: usize = 64;
const MAX_ARGS: usize = 32;
const MAX_VALUE_LEN: usize = 16 * 1024;
const MAX_RECORD_LEN: usize = 64 * 1024;
const SIGNATURE_LEN: usize = 64;
/// Longest base64 text that can hold a record of `MAX_RECORD_LEN`
const MAX_ARTIFACT_LEN: usize = 4 * (MAX_RECORD_LEN + 4).div_ceil(3);

/// Text-encoded signed authorization entry exchanged between parties
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortableAuthArtifact(String);

impl PortableAuthArtifact {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for PortableAuthArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PortableAuthArtifact {
    type Err = HandshakeError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(HandshakeError::MalformedArtifact("empty artifact".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// The invocation a decoding party expects to receive an authorization for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationShape {
    pub name: &'static str,
    /// Number of leading invocation arguments the remote signer attests to
    pub signer_args: usize,
}

impl InvocationShape {
    pub const fn new(name: &'static str, signer_args: usize) -> Self {
        Self { name, signer_args }
    }
}

/// A decoded artifact that passed shape validation.
///
/// Its values are only fit for rebuilding an equivalent bundle; the ledger
/// still validates the signature during re-simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedArtifact {
    signer: Address,
    entry: AuthorizationEntry,
}

impl DecodedArtifact {
    pub fn signer_address(&self) -> &Address {
        &self.signer
    }

    pub fn invocation_name(&self) -> &str {
        &self.entry.invocation_name
    }

    pub fn invocation_args(&self) -> &[ScValue] {
        &self.entry.invocation_args
    }

    pub fn expiry_ledger(&self) -> Option<u32> {
        self.entry.expiry_ledger()
    }

    pub fn entry(&self) -> &AuthorizationEntry {
        &self.entry
    }

    pub fn into_entry(self) -> AuthorizationEntry {
        self.entry
    }
}

// ================================
// Encoding
// ================================

/// Encode a signed address authorization into a portable artifact
pub fn encode(entry: &AuthorizationEntry) -> Result<PortableAuthArtifact> {
    let cred = match &entry.credential {
        Credential::Address(cred) => cred,
        Credential::ImplicitSource => {
            return Err(HandshakeError::UnsupportedCredential(
                "implicit source credentials cannot be exported".to_string(),
            ))
        }
    };
    let (Some(signature), Some(expiry_ledger)) = (&cred.signature, cred.expiry_ledger) else {
        return Err(HandshakeError::UnsignedEntry {
            address: cred.address,
        });
    };

    check_bounds(entry)?;

    let mut body = Vec::with_capacity(128);
    body.push(KIND_ADDRESS);
    write_address(&mut body, &cred.address);
    body.extend_from_slice(&expiry_ledger.to_le_bytes());
    write_str(&mut body, &entry.invocation_name);
    write_values(&mut body, &entry.invocation_args);
    write_bytes(&mut body, signature.as_ref());
    if body.len() > MAX_RECORD_LEN {
        return Err(HandshakeError::MalformedArtifact(format!(
            "record length {} exceeds {MAX_RECORD_LEN}",
            body.len()
        )));
    }

    let mut record = Vec::with_capacity(body.len() + 4);
    record.extend_from_slice(&(body.len() as u32).to_le_bytes());
    record.extend_from_slice(&body);

    Ok(PortableAuthArtifact(
        base64::engine::general_purpose::STANDARD.encode(record),
    ))
}

/// Check the bounds the decoder enforces so an exported artifact is always
/// importable
fn check_bounds(entry: &AuthorizationEntry) -> Result<()> {
    let name_len = entry.invocation_name.len();
    if name_len > MAX_NAME_LEN {
        return Err(HandshakeError::MalformedArtifact(format!(
            "invocation name length {name_len} exceeds {MAX_NAME_LEN}"
        )));
    }
    let arg_count = entry.invocation_args.len();
    if arg_count > MAX_ARGS {
        return Err(HandshakeError::ArgumentShapeMismatch(format!(
            "argument count {arg_count} exceeds {MAX_ARGS}"
        )));
    }
    for (index, value) in entry.invocation_args.iter().enumerate() {
        let len = match value {
            ScValue::Symbol(v) => v.len(),
            ScValue::Bytes(v) => v.len(),
            _ => continue,
        };
        if len > MAX_VALUE_LEN {
            return Err(HandshakeError::MalformedArtifact(format!(
                "argument {index} length {len} exceeds {MAX_VALUE_LEN}"
            )));
        }
    }
    Ok(())
}

// ================================
// Decoding
// ================================

/// Decode an artifact and check it against the expected invocation shape
pub fn decode(artifact: &PortableAuthArtifact, expected: &InvocationShape) -> Result<DecodedArtifact> {
    if artifact.as_str().len() > MAX_ARTIFACT_LEN {
        return Err(HandshakeError::MalformedArtifact(format!(
            "artifact length {} exceeds {MAX_ARTIFACT_LEN}",
            artifact.as_str().len()
        )));
    }
    let record = base64::engine::general_purpose::STANDARD.decode(artifact.as_str())?;
    let (signer, entry) = parse_record(&record)?;

    if entry.invocation_name != expected.name {
        return Err(HandshakeError::FunctionMismatch {
            expected: expected.name.to_string(),
            found: entry.invocation_name,
        });
    }
    if entry.invocation_args.len() != expected.signer_args {
        return Err(HandshakeError::ArgumentShapeMismatch(format!(
            "{} expects {} signer arguments, artifact carries {}",
            expected.name,
            expected.signer_args,
            entry.invocation_args.len()
        )));
    }

    Ok(DecodedArtifact { signer, entry })
}

fn parse_record(record: &[u8]) -> Result<(Address, AuthorizationEntry)> {
    let mut reader = Reader::new(record);

    let body_len = reader.read_u32()? as usize;
    if body_len > MAX_RECORD_LEN || body_len != reader.remaining() {
        return Err(HandshakeError::MalformedArtifact(format!(
            "record length {body_len} does not match {} available bytes",
            reader.remaining()
        )));
    }

    match reader.read_u8()? {
        KIND_ADDRESS => {}
        KIND_IMPLICIT_SOURCE => {
            return Err(HandshakeError::UnsupportedCredential(
                "artifact carries an implicit source credential".to_string(),
            ))
        }
        other => {
            return Err(HandshakeError::MalformedArtifact(format!(
                "unknown credential kind {other}"
            )))
        }
    }

    let address = reader.read_address()?;
    let expiry_ledger = reader.read_u32()?;
    let invocation_name = reader.read_string(MAX_NAME_LEN)?;

    let arg_count = reader.read_u32()? as usize;
    if arg_count > MAX_ARGS {
        return Err(HandshakeError::MalformedArtifact(format!(
            "argument count {arg_count} exceeds {MAX_ARGS}"
        )));
    }
    let mut invocation_args = Vec::with_capacity(arg_count);
    for _ in 0..arg_count {
        invocation_args.push(reader.read_value()?);
    }

    let signature_bytes = reader.read_bytes(SIGNATURE_LEN)?;
    let signature = <[u8; SIGNATURE_LEN]>::try_from(signature_bytes)
        .map(Signature::from)
        .map_err(|_| {
            HandshakeError::MalformedArtifact(format!(
                "signature must be {SIGNATURE_LEN} bytes, got {}",
                signature_bytes.len()
            ))
        })?;

    if reader.remaining() != 0 {
        return Err(HandshakeError::MalformedArtifact(format!(
            "{} trailing bytes",
            reader.remaining()
        )));
    }

    let entry = AuthorizationEntry {
        credential: Credential::Address(AddressCredential {
            address,
            expiry_ledger: Some(expiry_ledger),
            signature: Some(signature),
        }),
        invocation_name,
        invocation_args,
    };
    Ok((address, entry))
}

struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(HandshakeError::MalformedArtifact(format!(
                "truncated record: need {len} bytes at offset {}, {} left",
                self.offset,
                self.remaining()
            )));
        }
        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    fn read_address(&mut self) -> Result<Address> {
        Ok(Address::new_from_array(self.read_array()?))
    }

    fn read_bytes(&mut self, max_len: usize) -> Result<&'a [u8]> {
        let len = self.read_u32()? as usize;
        if len > max_len {
            return Err(HandshakeError::MalformedArtifact(format!(
                "field length {len} exceeds {max_len}"
            )));
        }
        self.take(len)
    }

    fn read_string(&mut self, max_len: usize) -> Result<String> {
        let bytes = self.read_bytes(max_len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| HandshakeError::MalformedArtifact(format!("invalid UTF-8: {e}")))
    }

    fn read_fixed<const N: usize>(&mut self, tag: u8) -> Result<[u8; N]> {
        let len = self.read_u32()? as usize;
        if len != N {
            return Err(HandshakeError::MalformedArtifact(format!(
                "value tag {tag} expects {N} bytes, got {len}"
            )));
        }
        self.read_array()
    }

    fn read_value(&mut self) -> Result<ScValue> {
        let tag = self.read_u8()?;
        let value = match tag {
            TAG_U32 => ScValue::U32(u32::from_le_bytes(self.read_fixed(tag)?)),
            TAG_I128 => ScValue::I128(i128::from_le_bytes(self.read_fixed(tag)?)),
            TAG_BOOL => match self.read_fixed::<1>(tag)? {
                [0] => ScValue::Bool(false),
                [1] => ScValue::Bool(true),
                [other] => {
                    return Err(HandshakeError::MalformedArtifact(format!(
                        "invalid bool byte {other}"
                    )))
                }
            },
            TAG_ADDRESS => ScValue::Address(Address::new_from_array(self.read_fixed(tag)?)),
            TAG_SYMBOL => ScValue::Symbol(self.read_string(MAX_VALUE_LEN)?),
            TAG_BYTES => ScValue::Bytes(self.read_bytes(MAX_VALUE_LEN)?.to_vec()),
            other => {
                return Err(HandshakeError::MalformedArtifact(format!(
                    "unknown value tag {other}"
                )))
            }
        };
        Ok(value)
    }
}
