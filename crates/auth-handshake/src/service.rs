//! Handshake service: the two party paths over injected collaborators

use crate::assembler::{Handshake, HandshakeReport, TransactionAssembler};
use crate::auth::{
    decode, encode, locate, AuthEntrySigner, AuthSigner, DecodedArtifact, InvocationShape,
    PortableAuthArtifact,
};
use crate::core::HandshakeConfig;
use crate::game::session_id_of;
use crate::ledger::{LedgerClient, SubmissionReceipt};
use crate::monitoring::{EventStream, HandshakeEvent};
use crate::registry::SessionRegistry;
use crate::ttl::TtlCalculator;
use crate::types::{Address, Invocation, NetworkId};
use crate::{HandshakeError, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

pub struct HandshakeService {
    config: HandshakeConfig,
    network_id: NetworkId,
    signer: Arc<AuthEntrySigner>,
    assembler: TransactionAssembler,
    events: Arc<EventStream>,
    sessions: SessionRegistry,
}

impl HandshakeService {
    /// Wire a service from its collaborators.
    ///
    /// Fails if the configuration is invalid or names a different network
    /// than the ledger.
    pub fn new(
        config: HandshakeConfig,
        ledger: Arc<dyn LedgerClient>,
        signer: Arc<dyn AuthSigner>,
        ttl: Arc<dyn TtlCalculator>,
        events: Arc<EventStream>,
    ) -> Result<Self> {
        config.validate()?;

        let network_id = ledger.network_id();
        if network_id != config.network_id() {
            return Err(HandshakeError::InvalidConfiguration(format!(
                "ledger network {} does not match passphrase network {}",
                network_id,
                config.network_id()
            )));
        }

        let signer = Arc::new(AuthEntrySigner::new(signer, ttl, network_id));
        let assembler = TransactionAssembler::new(
            ledger,
            signer.clone(),
            events.clone(),
            config.auth_ttl_minutes,
            config.submit_timeout,
        );

        info!("Handshake service ready on network {}", network_id);
        Ok(Self {
            config,
            network_id,
            signer,
            assembler,
            events,
            sessions: SessionRegistry::new(),
        })
    }

    pub fn config(&self) -> &HandshakeConfig {
        &self.config
    }

    pub fn network_id(&self) -> NetworkId {
        self.network_id
    }

    pub fn assembler(&self) -> &TransactionAssembler {
        &self.assembler
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HandshakeEvent> {
        self.events.subscribe()
    }

    /// Start a handshake that owns `session_id` until it terminates
    pub fn begin(&self, session_id: u32) -> Result<Handshake> {
        let claim = self.sessions.claim(session_id, Uuid::new_v4())?;
        Ok(Handshake::with_claim(claim))
    }

    /// Initiating party: build and simulate the invocation with the
    /// counterparty as fee payer, sign the local placeholder and export it.
    ///
    /// The bundle itself is discarded; only the artifact leaves this call.
    pub async fn export_authorization(
        &self,
        invocation: Invocation,
        fee_payer: Address,
        local: Address,
    ) -> Result<PortableAuthArtifact> {
        let function = invocation.function.clone();
        let bundle = self.assembler.build_bundle(invocation, fee_payer).await?;

        let stub = locate(&bundle.auth_entries, &local)?;
        let signed = self
            .signer
            .sign_entry(stub, self.config.auth_ttl_minutes)
            .await?;
        let artifact = encode(&signed)?;

        let expiry_ledger = signed.expiry_ledger().unwrap_or_default();
        info!(
            "Exported {} authorization for {} (expires at ledger {})",
            function, local, expiry_ledger
        );
        self.events
            .emit(HandshakeEvent::ArtifactExported {
                invocation: function,
                signer: local,
                expiry_ledger,
            })
            .await;

        Ok(artifact)
    }

    /// Decode an artifact received from the counterparty
    pub fn decode_artifact(
        &self,
        artifact: &PortableAuthArtifact,
        shape: &InvocationShape,
    ) -> Result<DecodedArtifact> {
        let decoded = decode(artifact, shape)?;
        debug!(
            "Decoded {} authorization from {}",
            decoded.invocation_name(),
            decoded.signer_address()
        );
        Ok(decoded)
    }

    /// Importing party: run `hs` from `Idle` to `Confirmed`
    pub async fn complete_handshake(
        &self,
        hs: &mut Handshake,
        decoded: DecodedArtifact,
        invocation: Invocation,
        fee_payer: Address,
    ) -> Result<SubmissionReceipt> {
        self.assembler.build_local(hs, invocation, fee_payer).await?;
        self.assembler.import_remote(hs, decoded).await?;
        self.assembler.sign_local(hs).await?;
        self.assembler.submit(hs).await
    }

    /// Importing party end to end.
    ///
    /// `rebuild` turns the decoded artifact into the local invocation. The
    /// session claimed is the one that invocation carries. Errors before a handshake exists (bad artifact, rebuild failure,
    /// busy session) are returned as `Err`. Once the handshake starts, the
    /// report carries the outcome, including failures.
    pub async fn import_and_submit<F>(
        &self,
        artifact: &PortableAuthArtifact,
        shape: &InvocationShape,
        fee_payer: Address,
        rebuild: F,
    ) -> Result<HandshakeReport>
    where
        F: FnOnce(&DecodedArtifact) -> Result<Invocation>,
    {
        let decoded = self.decode_artifact(artifact, shape)?;
        let invocation = rebuild(&decoded)?;
        let session_id = session_id_of(&invocation)?;

        let mut hs = self.begin(session_id)?;
        if let Err(e) = self
            .complete_handshake(&mut hs, decoded, invocation, fee_payer)
            .await
        {
            debug!("Session {} handshake ended with: {}", session_id, e);
        }
        Ok(hs.report())
    }
}
