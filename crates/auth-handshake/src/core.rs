//! Core handshake types: configuration and error handling

use crate::ledger::SubmissionFailure;
use crate::types::{Address, NetworkId};
use std::time::Duration;
use thiserror::Error;

// ================================
// Configuration Types
// ================================

/// Handshake configuration
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// RPC endpoint used to read the current ledger height
    pub rpc_url: String,

    /// Network passphrase; its SHA-256 is the network id bound into every signature
    pub network_passphrase: String,

    /// Validity window for exported authorizations (minutes)
    pub auth_ttl_minutes: u32,

    /// How long to wait for the ledger to accept a submission
    pub submit_timeout: Duration,

    /// Average ledger close time used to turn minutes into ledgers
    pub ledger_close_secs: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8899".to_string(),
            network_passphrase: "Standalone Network ; February 2017".to_string(),
            auth_ttl_minutes: 60,
            submit_timeout: Duration::from_secs(30),
            ledger_close_secs: 5,
        }
    }
}

impl HandshakeConfig {
    /// Load configuration from the environment, falling back to defaults
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            rpc_url: std::env::var("RPC_URL").unwrap_or(defaults.rpc_url),
            network_passphrase: std::env::var("NETWORK_PASSPHRASE")
                .unwrap_or(defaults.network_passphrase),
            auth_ttl_minutes: parse_env("AUTH_TTL_MINUTES", defaults.auth_ttl_minutes)?,
            submit_timeout: Duration::from_secs(parse_env(
                "SUBMIT_TIMEOUT_SECS",
                defaults.submit_timeout.as_secs(),
            )?),
            ledger_close_secs: parse_env("LEDGER_CLOSE_SECS", defaults.ledger_close_secs)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make every handshake fail
    pub fn validate(&self) -> Result<()> {
        if self.network_passphrase.is_empty() {
            return Err(HandshakeError::InvalidConfiguration(
                "network passphrase must not be empty".to_string(),
            ));
        }
        if self.auth_ttl_minutes == 0 {
            return Err(HandshakeError::InvalidConfiguration(
                "auth TTL must be at least one minute".to_string(),
            ));
        }
        if self.ledger_close_secs == 0 {
            return Err(HandshakeError::InvalidConfiguration(
                "ledger close time must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Network id derived from the passphrase
    pub fn network_id(&self) -> NetworkId {
        NetworkId::from_passphrase(&self.network_passphrase)
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| HandshakeError::InvalidConfiguration(format!("invalid {key}: {e}"))),
        Err(_) => Ok(default),
    }
}

// ================================
// Error Types
// ================================

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("No address authorization found for signer {address}")]
    NotFound { address: Address },

    #[error("Unsupported credential: {0}")]
    UnsupportedCredential(String),

    #[error("Function mismatch: expected {expected}, found {found}")]
    FunctionMismatch { expected: String, found: String },

    #[error("Argument shape mismatch: {0}")]
    ArgumentShapeMismatch(String),

    #[error("Signing rejected: {0}")]
    SigningRejected(String),

    #[error("Simulation failed: {0}")]
    Simulation(String),

    #[error("No local authorization stub for remote signer {address}")]
    AddressMismatch { address: Address },

    #[error("Submission rejected: {0}")]
    Submission(SubmissionFailure),

    #[error("Authorization for {address} is already signed")]
    AlreadySigned { address: Address },

    #[error("Authorization for {address} is not signed")]
    UnsignedEntry { address: Address },

    #[error("Malformed artifact: {0}")]
    MalformedArtifact(String),

    #[error("Invalid handshake transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Session {0} already has a handshake in progress")]
    SessionBusy(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("RPC error: {0}")]
    Rpc(Box<solana_client::client_error::ClientError>),
}

impl From<solana_client::client_error::ClientError> for HandshakeError {
    fn from(err: solana_client::client_error::ClientError) -> Self {
        Self::Rpc(Box::new(err))
    }
}

impl From<base64::DecodeError> for HandshakeError {
    fn from(err: base64::DecodeError) -> Self {
        Self::MalformedArtifact(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HandshakeError>;
