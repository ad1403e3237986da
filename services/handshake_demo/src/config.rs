//! Demo configuration

use anyhow::{Context, Result};
use auth_handshake::HandshakeConfig;
use solana_sdk::signature::{read_keypair_file, Keypair};

#[derive(Clone, Debug)]
pub struct DemoConfig {
    /// Shared handshake settings (network, TTL, timeouts)
    pub handshake: HandshakeConfig,

    /// Game session both players join
    pub session_id: u32,

    pub player1_points: i128,
    pub player2_points: i128,

    /// Points credited to each player before the game
    pub starting_balance: i128,

    /// First ledger sequence of the in-process ledger
    pub start_ledger: u32,

    /// Keypair files; a fresh key is generated when unset
    pub player1_keypair: Option<String>,
    pub player2_keypair: Option<String>,

    /// Log the RPC node's ledger height before running
    pub probe_rpc: bool,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            session_id: 42,
            player1_points: 10,
            player2_points: 15,
            starting_balance: 100,
            start_ledger: 1,
            player1_keypair: None,
            player2_keypair: None,
            probe_rpc: false,
        }
    }
}

impl DemoConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            handshake: HandshakeConfig::from_env()?,
            session_id: env_or("SESSION_ID", defaults.session_id)?,
            player1_points: env_or("PLAYER1_POINTS", defaults.player1_points)?,
            player2_points: env_or("PLAYER2_POINTS", defaults.player2_points)?,
            starting_balance: env_or("STARTING_BALANCE", defaults.starting_balance)?,
            start_ledger: env_or("START_LEDGER", defaults.start_ledger)?,
            player1_keypair: keypair_path("PLAYER1_KEYPAIR"),
            player2_keypair: keypair_path("PLAYER2_KEYPAIR"),
            probe_rpc: env_or("PROBE_RPC", defaults.probe_rpc)?,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().with_context(|| format!("Invalid {key}")),
        Err(_) => Ok(default),
    }
}

fn keypair_path(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|path| shellexpand::tilde(&path).to_string())
}

/// Load a keypair file, or generate a throwaway key
pub fn load_keypair(path: Option<&str>) -> Result<Keypair> {
    match path {
        Some(path) => read_keypair_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load keypair {path}: {e}")),
        None => Ok(Keypair::new()),
    }
}
