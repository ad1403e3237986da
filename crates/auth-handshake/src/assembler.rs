//! Merge a counterparty authorization, finish local signing and submit
//!
//! A [`Handshake`] walks
//! `Idle -> LocalBuilt -> RemoteImported -> LocallySigned -> Submitted -> Confirmed`.
//! Any error moves it to `Failed`, records the stage that failed and drops
//! the bundle. Terminal handshakes are never retried; start a new one.

use crate::auth::{locate_index, AuthEntrySigner, DecodedArtifact};
use crate::ledger::{LedgerClient, SubmissionFailure, SubmissionOutcome, SubmissionReceipt};
use crate::monitoring::{EventStream, HandshakeEvent};
use crate::registry::SessionClaim;
use crate::types::{Address, Bundle, Credential, Invocation};
use crate::{HandshakeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

// ================================
// State Machine
// ================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandshakeState {
    Idle,
    LocalBuilt,
    RemoteImported,
    LocallySigned,
    Submitted,
    Confirmed,
    Failed,
}

impl HandshakeState {
    pub fn can_transition_to(self, next: HandshakeState) -> bool {
        use HandshakeState::*;

        match (self, next) {
            (Idle, LocalBuilt)
            | (LocalBuilt, RemoteImported)
            | (RemoteImported, LocallySigned)
            | (LocallySigned, Submitted)
            | (Submitted, Confirmed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Confirmed | HandshakeState::Failed)
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: HandshakeState,
    pub to: HandshakeState,
    pub at: DateTime<Utc>,
}

/// Where and why a handshake failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: HandshakeState,
    pub reason: String,
}

/// Summary of a handshake, suitable for logs and JSON output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeReport {
    pub handshake_id: Uuid,
    pub session_id: u32,
    pub state: HandshakeState,
    pub tx_hash: Option<String>,
    pub ledger: Option<u32>,
    pub failure: Option<FailureRecord>,
    pub transitions: Vec<Transition>,
}

/// One party's attempt to get a jointly authorized bundle on the ledger
#[derive(Debug)]
pub struct Handshake {
    id: Uuid,
    session_id: u32,
    state: HandshakeState,
    bundle: Option<Bundle>,
    transitions: Vec<Transition>,
    failure: Option<FailureRecord>,
    receipt: Option<SubmissionReceipt>,
    claim: Option<SessionClaim>,
}

impl Handshake {
    pub fn new(session_id: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            state: HandshakeState::Idle,
            bundle: None,
            transitions: Vec::new(),
            failure: None,
            receipt: None,
            claim: None,
        }
    }

    /// Handshake holding `claim` until it reaches a terminal state
    pub fn with_claim(claim: SessionClaim) -> Self {
        Self {
            id: claim.owner(),
            session_id: claim.session_id(),
            state: HandshakeState::Idle,
            bundle: None,
            transitions: Vec::new(),
            failure: None,
            receipt: None,
            claim: Some(claim),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn bundle(&self) -> Option<&Bundle> {
        self.bundle.as_ref()
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        self.failure.as_ref()
    }

    pub fn receipt(&self) -> Option<&SubmissionReceipt> {
        self.receipt.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn report(&self) -> HandshakeReport {
        HandshakeReport {
            handshake_id: self.id,
            session_id: self.session_id,
            state: self.state,
            tx_hash: self.receipt.as_ref().map(|r| r.tx_hash.clone()),
            ledger: self.receipt.as_ref().map(|r| r.ledger),
            failure: self.failure.clone(),
            transitions: self.transitions.clone(),
        }
    }

    fn ensure_can_advance(&self, to: HandshakeState) -> Result<()> {
        if self.state.can_transition_to(to) {
            Ok(())
        } else {
            Err(HandshakeError::InvalidTransition {
                from: self.state.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// The bundle the step towards `to` works on
    fn take_bundle(&mut self, to: HandshakeState) -> Result<Bundle> {
        self.bundle.take().ok_or_else(|| HandshakeError::InvalidTransition {
            from: format!("{} without a bundle", self.state),
            to: to.to_string(),
        })
    }
}

// ================================
// Assembler
// ================================

/// Drives handshakes through the ledger and the local signer
pub struct TransactionAssembler {
    ledger: Arc<dyn LedgerClient>,
    signer: Arc<AuthEntrySigner>,
    events: Arc<EventStream>,
    auth_ttl_minutes: u32,
    submit_timeout: Duration,
}

impl TransactionAssembler {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<AuthEntrySigner>,
        events: Arc<EventStream>,
        auth_ttl_minutes: u32,
        submit_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            signer,
            events,
            auth_ttl_minutes,
            submit_timeout,
        }
    }

    /// Build and simulate a fresh bundle paid for by `fee_payer`
    pub async fn build_bundle(&self, invocation: Invocation, fee_payer: Address) -> Result<Bundle> {
        let bundle = self.ledger.build(invocation, fee_payer).await?;
        self.ledger.simulate(bundle).await
    }

    /// `Idle -> LocalBuilt`
    pub async fn build_local(
        &self,
        hs: &mut Handshake,
        invocation: Invocation,
        fee_payer: Address,
    ) -> Result<()> {
        hs.ensure_can_advance(HandshakeState::LocalBuilt)?;
        debug!("Session {}: building bundle paid by {}", hs.session_id, fee_payer);

        match self.build_bundle(invocation, fee_payer).await {
            Ok(bundle) => {
                hs.bundle = Some(bundle);
                self.advance(hs, HandshakeState::LocalBuilt).await;
                Ok(())
            }
            Err(e) => Err(self.fail(hs, e).await),
        }
    }

    /// `LocalBuilt -> RemoteImported`: swap the remote signer's stub for its
    /// signed entry and re-simulate.
    pub async fn import_remote(&self, hs: &mut Handshake, decoded: DecodedArtifact) -> Result<()> {
        hs.ensure_can_advance(HandshakeState::RemoteImported)?;

        match self.merge_remote(hs, decoded).await {
            Ok((bundle, signer, expiry_ledger)) => {
                hs.bundle = Some(bundle);
                self.advance(hs, HandshakeState::RemoteImported).await;
                self.events
                    .emit(HandshakeEvent::ArtifactImported {
                        handshake_id: hs.id,
                        session_id: hs.session_id,
                        signer,
                        expiry_ledger,
                    })
                    .await;
                Ok(())
            }
            Err(e) => Err(self.fail(hs, e).await),
        }
    }

    async fn merge_remote(
        &self,
        hs: &mut Handshake,
        decoded: DecodedArtifact,
    ) -> Result<(Bundle, Address, u32)> {
        let mut bundle = hs.take_bundle(HandshakeState::RemoteImported)?;
        let address = *decoded.signer_address();
        let entry = decoded.into_entry();

        let Some(expiry_ledger) = entry.expiry_ledger().filter(|_| entry.is_signed()) else {
            return Err(HandshakeError::UnsignedEntry { address });
        };

        let index = locate_index(&bundle.auth_entries, &address)
            .map_err(|_| HandshakeError::AddressMismatch { address })?;
        if !bundle.auth_entries[index].is_stub() {
            return Err(HandshakeError::AlreadySigned { address });
        }

        bundle.auth_entries[index] = entry;
        let bundle = self.ledger.simulate(bundle).await?;

        info!(
            "Session {}: merged authorization from {} (expires at ledger {})",
            hs.session_id, address, expiry_ledger
        );
        Ok((bundle, address, expiry_ledger))
    }

    /// `RemoteImported -> LocallySigned`: sign every stub a local key
    /// controls, then the envelope as fee payer.
    pub async fn sign_local(&self, hs: &mut Handshake) -> Result<()> {
        hs.ensure_can_advance(HandshakeState::LocallySigned)?;

        match self.sign_remaining(hs).await {
            Ok(bundle) => {
                hs.bundle = Some(bundle);
                self.advance(hs, HandshakeState::LocallySigned).await;
                Ok(())
            }
            Err(e) => Err(self.fail(hs, e).await),
        }
    }

    async fn sign_remaining(&self, hs: &mut Handshake) -> Result<Bundle> {
        let mut bundle = hs.take_bundle(HandshakeState::LocallySigned)?;

        for index in 0..bundle.auth_entries.len() {
            let entry = &bundle.auth_entries[index];
            let Credential::Address(cred) = &entry.credential else {
                continue;
            };
            if cred.signature.is_some() {
                continue;
            }
            if !self.signer.controls(&cred.address) {
                return Err(HandshakeError::UnsignedEntry {
                    address: cred.address,
                });
            }

            let signed = self.signer.sign_entry(entry, self.auth_ttl_minutes).await?;
            bundle.auth_entries[index] = signed;
        }

        bundle.envelope_signature = Some(self.signer.sign_envelope(&bundle).await?);
        debug!("Session {}: bundle fully signed", hs.session_id);
        Ok(bundle)
    }

    /// `LocallySigned -> Submitted -> Confirmed | Failed`
    pub async fn submit(&self, hs: &mut Handshake) -> Result<SubmissionReceipt> {
        hs.ensure_can_advance(HandshakeState::Submitted)?;
        let bundle = match hs.take_bundle(HandshakeState::Submitted) {
            Ok(bundle) => bundle,
            Err(e) => return Err(self.fail(hs, e).await),
        };

        // Nothing in the bundle is valid past its earliest entry expiry
        let valid_until = bundle.earliest_expiry().unwrap_or(u32::MAX);
        self.advance(hs, HandshakeState::Submitted).await;
        info!(
            "Session {}: submitting (valid until ledger {})",
            hs.session_id, valid_until
        );

        let submission = self.ledger.submit(bundle, self.submit_timeout, valid_until);
        let outcome = match tokio::time::timeout(self.submit_timeout, submission).await {
            Ok(result) => result,
            Err(_) => Ok(SubmissionOutcome::Rejected(SubmissionFailure::Timeout)),
        };

        match outcome {
            Ok(SubmissionOutcome::Confirmed(receipt)) => {
                hs.receipt = Some(receipt.clone());
                self.advance(hs, HandshakeState::Confirmed).await;
                self.events
                    .emit(HandshakeEvent::Submitted {
                        handshake_id: hs.id,
                        session_id: hs.session_id,
                        tx_hash: receipt.tx_hash.clone(),
                        ledger: receipt.ledger,
                    })
                    .await;
                info!(
                    "Session {}: confirmed in ledger {} (tx {})",
                    hs.session_id, receipt.ledger, receipt.tx_hash
                );
                Ok(receipt)
            }
            Ok(SubmissionOutcome::Rejected(failure)) => {
                Err(self.fail(hs, HandshakeError::Submission(failure)).await)
            }
            Err(e) => Err(self.fail(hs, e).await),
        }
    }

    async fn advance(&self, hs: &mut Handshake, to: HandshakeState) {
        let from = hs.state;
        hs.state = to;
        hs.transitions.push(Transition {
            from,
            to,
            at: Utc::now(),
        });
        if to.is_terminal() {
            hs.claim = None;
        }

        debug!("Handshake {} ({}): {} -> {}", hs.id, hs.session_id, from, to);
        self.events
            .emit(HandshakeEvent::Transitioned {
                handshake_id: hs.id,
                session_id: hs.session_id,
                from,
                to,
            })
            .await;
    }

    /// Move `hs` to Failed and hand the error back to the caller
    async fn fail(&self, hs: &mut Handshake, error: HandshakeError) -> HandshakeError {
        if hs.state.is_terminal() {
            return error;
        }

        let stage = hs.state;
        let reason = error.to_string();
        warn!(
            "Handshake {} for session {} failed at {}: {}",
            hs.id, hs.session_id, stage, reason
        );

        hs.bundle = None;
        hs.failure = Some(FailureRecord {
            stage,
            reason: reason.clone(),
        });
        self.advance(hs, HandshakeState::Failed).await;
        self.events
            .emit(HandshakeEvent::Failed {
                handshake_id: hs.id,
                session_id: hs.session_id,
                stage,
                reason,
            })
            .await;
        error
    }
}
