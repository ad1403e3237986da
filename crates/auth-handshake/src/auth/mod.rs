//! Authorization entry handling: locate, sign, encode and decode

pub mod codec;
pub mod locator;
pub mod signer;

pub use codec::{decode, encode, DecodedArtifact, InvocationShape, PortableAuthArtifact};
pub use locator::{locate, locate_index};
pub use signer::{
    signature_payload, verify_entry, AuthEntrySigner, AuthPreimage, AuthSigner, KeypairSigner,
    SignOutcome,
};
