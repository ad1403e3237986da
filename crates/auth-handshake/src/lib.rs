//! Two-Party Authorization Handshake
//!
//! Lets two independent key holders jointly authorize one ledger operation.
//! The initiating party builds the operation, signs its own authorization
//! entry and exports it as a portable artifact. The counterparty imports
//! the artifact, rebuilds an equivalent bundle, merges the signed entry,
//! adds its own signatures and submits. Neither party ever sees the other's
//! key.

// ================================
// Module Declarations
// ================================

pub mod core;
mod encoding;
pub mod types;

// Authorization entries: locate, sign, encode, decode
pub mod auth;

// Ledger boundary and the in-process ledger
pub mod ledger;
pub mod ttl;

// The start_game invocation
pub mod game;

// Handshake state machine and the service around it
pub mod assembler;
pub mod registry;
pub mod service;

// Event streaming
pub mod monitoring;

// ================================
// Public API Re-exports
// ================================

// Configuration and errors
pub use crate::core::{HandshakeConfig, HandshakeError, Result};

// Data model
pub use types::{
    Address, AddressCredential, AuthorizationEntry, Bundle, Credential, CredentialKind,
    Invocation, NetworkId, ScValue, SimulationReport,
};

// Authorization entries
pub use auth::{
    decode, encode, locate, locate_index, AuthEntrySigner, AuthPreimage, AuthSigner,
    DecodedArtifact, InvocationShape, KeypairSigner, PortableAuthArtifact, SignOutcome,
};

// Ledger and TTL
pub use ledger::{
    LedgerClient, LocalLedger, SubmissionFailure, SubmissionOutcome, SubmissionReceipt,
};
pub use ttl::{LatestLedger, LedgerTtlCalculator, RpcLedgerHeight, TtlCalculator};

// Game invocation
pub use game::{
    session_id_of, GameSession, PartialStart, StartGame, START_GAME, START_GAME_SHAPE,
};

// Handshakes
pub use assembler::{
    FailureRecord, Handshake, HandshakeReport, HandshakeState, TransactionAssembler, Transition,
};
pub use registry::{SessionClaim, SessionRegistry};
pub use service::HandshakeService;

// Monitoring and events
pub use monitoring::{EventFilter, EventStream, FilteredEventStream, HandshakeEvent};
