//! Deterministic in-process ledger hosting the game contract

use super::{LedgerClient, SubmissionFailure, SubmissionOutcome, SubmissionReceipt};
use crate::auth::{signature_payload, verify_entry, AuthPreimage};
use crate::game::{GameSession, StartGame, START_GAME};
use crate::ttl::LatestLedger;
use crate::types::{
    Address, AuthorizationEntry, Bundle, Credential, Invocation, NetworkId, ScValue,
    SimulationReport,
};
use crate::{HandshakeError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const DEFAULT_MIN_RESOURCE_FEE: u64 = 100;

#[derive(Debug, Default)]
struct LedgerState {
    sequence: u32,
    balances: HashMap<Address, i128>,
    sessions: HashMap<u32, GameSession>,
}

/// Single-contract ledger kept in memory.
///
/// Every submission closes one ledger. Rejected submissions leave balances,
/// sessions and the sequence untouched.
pub struct LocalLedger {
    network_id: NetworkId,
    contract: Address,
    min_resource_fee: u64,
    submit_delay: Duration,
    state: RwLock<LedgerState>,
}

impl LocalLedger {
    pub fn new(network_id: NetworkId, contract: Address, start_sequence: u32) -> Self {
        Self {
            network_id,
            contract,
            min_resource_fee: DEFAULT_MIN_RESOURCE_FEE,
            submit_delay: Duration::ZERO,
            state: RwLock::new(LedgerState {
                sequence: start_sequence,
                ..LedgerState::default()
            }),
        }
    }

    /// Delay every submission, to exercise caller timeouts
    pub fn with_submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn contract(&self) -> Address {
        self.contract
    }

    pub async fn current_ledger(&self) -> u32 {
        self.state.read().await.sequence
    }

    /// Close `count` empty ledgers
    pub async fn advance_ledger(&self, count: u32) -> u32 {
        let mut state = self.state.write().await;
        state.sequence = state.sequence.saturating_add(count);
        debug!("Ledger advanced to {}", state.sequence);
        state.sequence
    }

    pub async fn set_balance(&self, address: Address, points: i128) {
        self.state.write().await.balances.insert(address, points);
    }

    pub async fn balance_of(&self, address: &Address) -> i128 {
        self.state
            .read()
            .await
            .balances
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    pub async fn session(&self, session_id: u32) -> Option<GameSession> {
        self.state.read().await.sessions.get(&session_id).cloned()
    }

    fn parse_game(&self, invocation: &Invocation) -> Result<StartGame> {
        if invocation.contract != self.contract {
            return Err(HandshakeError::Simulation(format!(
                "no contract deployed at {}",
                invocation.contract
            )));
        }
        let game = StartGame::from_invocation(invocation)?;
        if game.player1 == game.player2 {
            return Err(HandshakeError::Simulation(
                "player1 and player2 must be different accounts".to_string(),
            ));
        }
        Ok(game)
    }

    /// Check the bundle's entries against what the contract requires.
    ///
    /// Stubs pass only when `allow_stubs` is set.
    fn check_entries(
        &self,
        bundle: &Bundle,
        game: &StartGame,
        current_ledger: u32,
        allow_stubs: bool,
    ) -> std::result::Result<(), SubmissionFailure> {
        let required: HashMap<Address, Vec<ScValue>> =
            game.required_authorizations().into_iter().collect();

        if bundle.auth_entries.len() != required.len() {
            return Err(SubmissionFailure::InvalidAuthorization(format!(
                "expected {} authorization entries, found {}",
                required.len(),
                bundle.auth_entries.len()
            )));
        }

        let mut covered = HashSet::new();
        for entry in &bundle.auth_entries {
            let address = match &entry.credential {
                Credential::ImplicitSource => bundle.fee_payer,
                Credential::Address(cred) => cred.address,
            };

            let Some(expected_args) = required.get(&address) else {
                return Err(SubmissionFailure::InvalidAuthorization(format!(
                    "{address} is not a required signer"
                )));
            };
            if !covered.insert(address) {
                return Err(SubmissionFailure::InvalidAuthorization(format!(
                    "{address} is authorized more than once"
                )));
            }
            if entry.invocation_name != START_GAME || entry.invocation_args != *expected_args {
                return Err(SubmissionFailure::InvalidAuthorization(format!(
                    "authorization for {address} does not match the invocation"
                )));
            }

            self.check_credential(entry, &address, current_ledger, allow_stubs)?;
        }

        Ok(())
    }

    fn check_credential(
        &self,
        entry: &AuthorizationEntry,
        address: &Address,
        current_ledger: u32,
        allow_stubs: bool,
    ) -> std::result::Result<(), SubmissionFailure> {
        let Credential::Address(cred) = &entry.credential else {
            return Ok(());
        };

        if cred.signature.is_none() {
            return if allow_stubs {
                Ok(())
            } else {
                Err(SubmissionFailure::InvalidAuthorization(format!(
                    "authorization for {address} is not signed"
                )))
            };
        }

        let Some(expiry_ledger) = cred.expiry_ledger else {
            return Err(SubmissionFailure::InvalidAuthorization(format!(
                "authorization for {address} has no expiry"
            )));
        };
        if current_ledger > expiry_ledger {
            return Err(SubmissionFailure::EntryExpired {
                address: *address,
                expiry_ledger,
                current_ledger,
            });
        }
        if !verify_entry(entry, &self.network_id) {
            return Err(SubmissionFailure::InvalidAuthorization(format!(
                "signature for {address} does not verify"
            )));
        }
        Ok(())
    }

    fn check_envelope(&self, bundle: &Bundle) -> std::result::Result<(), SubmissionFailure> {
        let Some(signature) = &bundle.envelope_signature else {
            return Err(SubmissionFailure::MissingEnvelopeSignature);
        };
        let preimage = AuthPreimage::for_envelope(bundle, &self.network_id);
        if signature.verify(
            bundle.fee_payer.as_ref(),
            &signature_payload(&self.network_id, &preimage),
        ) {
            Ok(())
        } else {
            Err(SubmissionFailure::InvalidAuthorization(
                "envelope signature does not verify".to_string(),
            ))
        }
    }

    fn check_stakes(
        state: &LedgerState,
        game: &StartGame,
    ) -> std::result::Result<(), SubmissionFailure> {
        if state.sessions.contains_key(&game.session_id) {
            return Err(SubmissionFailure::ContractRejected(format!(
                "session {} already exists",
                game.session_id
            )));
        }
        for (address, points) in [
            (game.player1, game.player1_points),
            (game.player2, game.player2_points),
        ] {
            if points < 0 {
                return Err(SubmissionFailure::ContractRejected(format!(
                    "stake for {address} is negative"
                )));
            }
            let available = state.balances.get(&address).copied().unwrap_or(0);
            if available < points {
                return Err(SubmissionFailure::InsufficientBalance {
                    address,
                    required: points,
                    available,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for LocalLedger {
    fn network_id(&self) -> NetworkId {
        self.network_id
    }

    async fn build(&self, invocation: Invocation, fee_payer: Address) -> Result<Bundle> {
        self.parse_game(&invocation)?;
        debug!("Built {} bundle paid by {}", invocation.function, fee_payer);
        Ok(Bundle::new(invocation, fee_payer))
    }

    async fn simulate(&self, mut bundle: Bundle) -> Result<Bundle> {
        let game = self.parse_game(&bundle.invocation)?;
        let current_ledger = self.current_ledger().await;

        if bundle.auth_entries.is_empty() {
            bundle.auth_entries = game
                .required_authorizations()
                .into_iter()
                .map(|(address, args)| {
                    if address == bundle.fee_payer {
                        AuthorizationEntry::implicit(START_GAME, args)
                    } else {
                        AuthorizationEntry::stub(address, START_GAME, args)
                    }
                })
                .collect();
            debug!(
                "Simulation of session {} reported {} authorization entries",
                game.session_id,
                bundle.auth_entries.len()
            );
        } else {
            self.check_entries(&bundle, &game, current_ledger, true)
                .map_err(|failure| HandshakeError::Simulation(failure.to_string()))?;
        }

        bundle.simulation = Some(SimulationReport {
            latest_ledger: current_ledger,
            min_resource_fee: self.min_resource_fee,
        });
        Ok(bundle)
    }

    async fn submit(
        &self,
        bundle: Bundle,
        _timeout: Duration,
        valid_until_ledger: u32,
    ) -> Result<SubmissionOutcome> {
        if !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }

        let game = match self.parse_game(&bundle.invocation) {
            Ok(game) => game,
            Err(e) => {
                return Ok(SubmissionOutcome::Rejected(
                    SubmissionFailure::ContractRejected(e.to_string()),
                ))
            }
        };

        let mut state = self.state.write().await;
        let current_ledger = state.sequence;

        let checked = if current_ledger > valid_until_ledger {
            Err(SubmissionFailure::TransactionExpired {
                valid_until: valid_until_ledger,
                current: current_ledger,
            })
        } else {
            self.check_envelope(&bundle)
                .and_then(|()| self.check_entries(&bundle, &game, current_ledger, false))
                .and_then(|()| Self::check_stakes(&state, &game))
        };
        if let Err(failure) = checked {
            warn!("Rejected session {}: {}", game.session_id, failure);
            return Ok(SubmissionOutcome::Rejected(failure));
        }

        // All checks passed; apply both debits and the session together
        for (address, points) in [
            (game.player1, game.player1_points),
            (game.player2, game.player2_points),
        ] {
            *state.balances.entry(address).or_insert(0) -= points;
        }
        state.sequence = current_ledger.saturating_add(1);
        let ledger = state.sequence;
        state.sessions.insert(
            game.session_id,
            GameSession {
                session_id: game.session_id,
                player1: game.player1,
                player2: game.player2,
                player1_points: game.player1_points,
                player2_points: game.player2_points,
                started_ledger: ledger,
                started_at: Utc::now(),
            },
        );

        let tx_hash = hex::encode(bundle.envelope_hash(&self.network_id));
        info!(
            "Session {} started in ledger {} (tx {})",
            game.session_id, ledger, tx_hash
        );

        Ok(SubmissionOutcome::Confirmed(SubmissionReceipt {
            tx_hash,
            ledger,
            return_value: None,
        }))
    }
}

#[async_trait]
impl LatestLedger for LocalLedger {
    async fn latest_ledger(&self) -> Result<u32> {
        Ok(self.current_ledger().await)
    }
}
