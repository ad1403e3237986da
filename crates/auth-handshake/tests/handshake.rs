use auth_handshake::{
    Address, EventStream, HandshakeConfig, HandshakeError, HandshakeEvent, HandshakeService,
    HandshakeState, Invocation, KeypairSigner, LedgerClient, LedgerTtlCalculator, LocalLedger,
    PartialStart, PortableAuthArtifact, ScValue, StartGame, SubmissionFailure, START_GAME_SHAPE,
};
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;

const START_LEDGER: u32 = 1_000;

struct Party {
    address: Address,
    service: HandshakeService,
}

fn party(ledger: &Arc<LocalLedger>, keypair: Option<Keypair>) -> Party {
    let address = keypair
        .as_ref()
        .map_or_else(Address::new_unique, |keypair| keypair.pubkey());
    let signer = match keypair {
        Some(keypair) => KeypairSigner::new().with_keypair(keypair),
        None => KeypairSigner::new(),
    };

    let service = HandshakeService::new(
        HandshakeConfig::default(),
        ledger.clone(),
        Arc::new(signer),
        Arc::new(LedgerTtlCalculator::new(ledger.clone(), 5)),
        Arc::new(EventStream::new()),
    )
    .unwrap();

    Party { address, service }
}

async fn setup() -> (Arc<LocalLedger>, Party, Party) {
    let network_id = HandshakeConfig::default().network_id();
    let ledger = Arc::new(LocalLedger::new(network_id, Address::new_unique(), START_LEDGER));
    let a = party(&ledger, Some(Keypair::new()));
    let b = party(&ledger, Some(Keypair::new()));
    ledger.set_balance(a.address, 100).await;
    ledger.set_balance(b.address, 100).await;
    (ledger, a, b)
}

fn game(session_id: u32, a: &Party, b: &Party) -> StartGame {
    StartGame {
        session_id,
        player1: a.address,
        player2: b.address,
        player1_points: 10,
        player2_points: 15,
    }
}

/// Party B's rebuild: recover player one's half and add its own stake
fn rebuild_as(
    player2: Address,
    points: i128,
    contract: Address,
) -> impl FnOnce(&auth_handshake::DecodedArtifact) -> auth_handshake::Result<Invocation> {
    move |decoded| {
        let game = PartialStart::from_player1_entry(decoded)?.complete(player2, points);
        Ok(game.to_invocation(contract))
    }
}

#[tokio::test]
async fn test_end_to_end_handshake_confirms() {
    let (ledger, a, b) = setup().await;
    let contract = ledger.contract();
    let mut b_events = b.service.subscribe();

    // Party A signs its half with B as fee payer
    let artifact = a
        .service
        .export_authorization(game(42, &a, &b).to_invocation(contract), b.address, a.address)
        .await
        .unwrap();

    // Copy/paste transport
    let received: PortableAuthArtifact = format!("  {artifact}\n").parse().unwrap();

    let decoded = b.service.decode_artifact(&received, &START_GAME_SHAPE).unwrap();
    assert_eq!(
        PartialStart::from_player1_entry(&decoded).unwrap(),
        PartialStart {
            session_id: 42,
            player1: a.address,
            player1_points: 10,
        }
    );
    assert_eq!(decoded.expiry_ledger(), Some(START_LEDGER + 720));

    let report = b
        .service
        .import_and_submit(
            &received,
            &START_GAME_SHAPE,
            b.address,
            rebuild_as(b.address, 15, contract),
        )
        .await
        .unwrap();

    assert_eq!(report.state, HandshakeState::Confirmed);
    assert!(report.failure.is_none());
    assert_eq!(report.ledger, Some(START_LEDGER + 1));
    assert_eq!(report.tx_hash.as_ref().map(String::len), Some(64));
    let states: Vec<_> = report.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![
            HandshakeState::LocalBuilt,
            HandshakeState::RemoteImported,
            HandshakeState::LocallySigned,
            HandshakeState::Submitted,
            HandshakeState::Confirmed,
        ]
    );

    let session = ledger.session(42).await.unwrap();
    assert_eq!(session.player1, a.address);
    assert_eq!(session.player2_points, 15);
    assert_eq!(ledger.balance_of(&a.address).await, 90);
    assert_eq!(ledger.balance_of(&b.address).await, 85);
    assert!(!b.service.sessions().is_active(42));

    let mut saw_import = false;
    let mut saw_submit = false;
    while let Ok(event) = b_events.try_recv() {
        match event {
            HandshakeEvent::ArtifactImported { signer, .. } => saw_import = signer == a.address,
            HandshakeEvent::Submitted { session_id, .. } => saw_submit = session_id == 42,
            _ => {}
        }
    }
    assert!(saw_import && saw_submit);
}

#[tokio::test]
async fn test_expired_artifact_fails_at_submission() {
    let (ledger, a, b) = setup().await;
    let contract = ledger.contract();

    let artifact = a
        .service
        .export_authorization(game(42, &a, &b).to_invocation(contract), b.address, a.address)
        .await
        .unwrap();
    let decoded = b.service.decode_artifact(&artifact, &START_GAME_SHAPE).unwrap();
    let rebuilt = PartialStart::from_player1_entry(&decoded)
        .unwrap()
        .complete(b.address, 15);

    let assembler = b.service.assembler();
    let mut hs = b.service.begin(42).unwrap();
    assembler
        .build_local(&mut hs, rebuilt.to_invocation(contract), b.address)
        .await
        .unwrap();
    assembler.import_remote(&mut hs, decoded).await.unwrap();
    assembler.sign_local(&mut hs).await.unwrap();

    // The network moves past the artifact's expiry before B submits
    ledger.advance_ledger(721).await;

    let result = assembler.submit(&mut hs).await;
    assert!(
        matches!(result, Err(HandshakeError::Submission(_))),
        "expected submission error, got {result:?}"
    );
    assert_eq!(hs.state(), HandshakeState::Failed);
    assert_eq!(hs.failure().unwrap().stage, HandshakeState::Submitted);

    assert!(ledger.session(42).await.is_none());
    assert_eq!(ledger.balance_of(&a.address).await, 100);
    assert_eq!(ledger.balance_of(&b.address).await, 100);

    // Failed handshakes are not resumable
    assert!(matches!(
        assembler.submit(&mut hs).await,
        Err(HandshakeError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_artifact_expired_before_import_fails_resimulation() {
    let (ledger, a, b) = setup().await;
    let contract = ledger.contract();

    let artifact = a
        .service
        .export_authorization(game(7, &a, &b).to_invocation(contract), b.address, a.address)
        .await
        .unwrap();
    ledger.advance_ledger(10_000).await;

    let report = b
        .service
        .import_and_submit(
            &artifact,
            &START_GAME_SHAPE,
            b.address,
            rebuild_as(b.address, 15, contract),
        )
        .await
        .unwrap();

    assert_eq!(report.state, HandshakeState::Failed);
    let failure = report.failure.unwrap();
    assert_eq!(failure.stage, HandshakeState::LocalBuilt);
    assert!(failure.reason.contains("expired"), "{}", failure.reason);
}

#[tokio::test]
async fn test_remote_signer_without_stub_is_address_mismatch() {
    let (ledger, a, b) = setup().await;
    let contract = ledger.contract();

    let artifact = a
        .service
        .export_authorization(game(5, &a, &b).to_invocation(contract), b.address, a.address)
        .await
        .unwrap();

    // B rebuilds a game against someone else entirely
    let stranger = Address::new_unique();
    let report = b
        .service
        .import_and_submit(&artifact, &START_GAME_SHAPE, b.address, |decoded| {
            let mut game = PartialStart::from_player1_entry(decoded)?.complete(b.address, 15);
            game.player1 = stranger;
            Ok(game.to_invocation(contract))
        })
        .await
        .unwrap();

    assert_eq!(report.state, HandshakeState::Failed);
    let failure = report.failure.unwrap();
    assert_eq!(failure.stage, HandshakeState::LocalBuilt);
    assert!(failure.reason.contains(&a.address.to_string()));
    assert_eq!(ledger.balance_of(&b.address).await, 100);
}

#[tokio::test]
async fn test_rebuilt_stake_change_fails_resimulation() {
    let (ledger, a, b) = setup().await;
    let contract = ledger.contract();

    let artifact = a
        .service
        .export_authorization(game(6, &a, &b).to_invocation(contract), b.address, a.address)
        .await
        .unwrap();

    let report = b
        .service
        .import_and_submit(&artifact, &START_GAME_SHAPE, b.address, |decoded| {
            let mut game = PartialStart::from_player1_entry(decoded)?.complete(b.address, 15);
            game.player1_points = 50;
            Ok(game.to_invocation(contract))
        })
        .await
        .unwrap();

    assert_eq!(report.state, HandshakeState::Failed);
    assert!(report.failure.unwrap().reason.starts_with("Simulation failed"));
    assert!(ledger.session(6).await.is_none());
}

#[tokio::test]
async fn test_fee_payer_cannot_export() {
    let (ledger, a, b) = setup().await;

    // With A paying, A's authorization is implicit and there is nothing to export
    let result = a
        .service
        .export_authorization(
            game(8, &a, &b).to_invocation(ledger.contract()),
            a.address,
            a.address,
        )
        .await;
    assert!(matches!(result, Err(HandshakeError::NotFound { .. })));
}

#[tokio::test]
async fn test_missing_local_key_rejects_signing() {
    let (ledger, a, b) = setup().await;
    let contract = ledger.contract();
    let keyless_b = party(&ledger, None);

    let artifact = a
        .service
        .export_authorization(game(9, &a, &b).to_invocation(contract), b.address, a.address)
        .await
        .unwrap();

    let report = keyless_b
        .service
        .import_and_submit(
            &artifact,
            &START_GAME_SHAPE,
            b.address,
            rebuild_as(b.address, 15, contract),
        )
        .await
        .unwrap();

    assert_eq!(report.state, HandshakeState::Failed);
    let failure = report.failure.unwrap();
    assert_eq!(failure.stage, HandshakeState::RemoteImported);
    assert!(failure.reason.starts_with("Signing rejected"));
}

#[tokio::test]
async fn test_insufficient_balance_is_submission_failure() {
    let (ledger, a, b) = setup().await;
    let contract = ledger.contract();
    ledger.set_balance(b.address, 3).await;

    let artifact = a
        .service
        .export_authorization(game(11, &a, &b).to_invocation(contract), b.address, a.address)
        .await
        .unwrap();
    let decoded = b.service.decode_artifact(&artifact, &START_GAME_SHAPE).unwrap();
    let rebuilt = PartialStart::from_player1_entry(&decoded)
        .unwrap()
        .complete(b.address, 15);

    let mut hs = b.service.begin(11).unwrap();
    let result = b
        .service
        .complete_handshake(&mut hs, decoded, rebuilt.to_invocation(contract), b.address)
        .await;

    assert!(matches!(
        result,
        Err(HandshakeError::Submission(SubmissionFailure::InsufficientBalance { .. }))
    ));
    assert_eq!(hs.state(), HandshakeState::Failed);
    assert_eq!(ledger.balance_of(&a.address).await, 100);
}

#[tokio::test]
async fn test_same_session_cannot_run_twice_concurrently() {
    let (ledger, a, b) = setup().await;
    let contract = ledger.contract();

    let artifact = a
        .service
        .export_authorization(game(42, &a, &b).to_invocation(contract), b.address, a.address)
        .await
        .unwrap();

    let _in_progress = b.service.begin(42).unwrap();
    let result = b
        .service
        .import_and_submit(
            &artifact,
            &START_GAME_SHAPE,
            b.address,
            rebuild_as(b.address, 15, contract),
        )
        .await;

    assert!(matches!(result, Err(HandshakeError::SessionBusy(42))));
}

#[tokio::test]
async fn test_session_claim_follows_rebuilt_invocation() {
    let (ledger, a, b) = setup().await;
    let contract = ledger.contract();

    let artifact = a
        .service
        .export_authorization(game(42, &a, &b).to_invocation(contract), b.address, a.address)
        .await
        .unwrap();

    // The rebuilt call targets session 43, which is already being driven
    let _in_progress = b.service.begin(43).unwrap();
    let result = b
        .service
        .import_and_submit(&artifact, &START_GAME_SHAPE, b.address, |decoded| {
            let mut game = PartialStart::from_player1_entry(decoded)?.complete(b.address, 15);
            game.session_id = 43;
            Ok(game.to_invocation(contract))
        })
        .await;
    assert!(matches!(result, Err(HandshakeError::SessionBusy(43))));

    // A rebuilt call with no session id cannot claim anything
    let result = b
        .service
        .import_and_submit(&artifact, &START_GAME_SHAPE, b.address, |_| {
            Ok(Invocation::new(contract, "start_game", vec![ScValue::Bool(true)]))
        })
        .await;
    assert!(matches!(
        result,
        Err(HandshakeError::ArgumentShapeMismatch(_))
    ));
    assert!(!b.service.sessions().is_active(42));
}

#[tokio::test]
async fn test_independent_sessions_run_concurrently() {
    let network_id = HandshakeConfig::default().network_id();
    let ledger = Arc::new(LocalLedger::new(network_id, Address::new_unique(), START_LEDGER));
    let contract = ledger.contract();

    let mut pairs = Vec::new();
    for _ in 0..4 {
        let a = party(&ledger, Some(Keypair::new()));
        let b = party(&ledger, Some(Keypair::new()));
        ledger.set_balance(a.address, 50).await;
        ledger.set_balance(b.address, 50).await;
        pairs.push((a, b));
    }

    let runs = pairs.iter().zip(100u32..).map(|((a, b), session_id)| {
        let ledger = ledger.clone();
        async move {
            let artifact = a
                .service
                .export_authorization(
                    game(session_id, a, b).to_invocation(ledger.contract()),
                    b.address,
                    a.address,
                )
                .await?;
            b.service
                .import_and_submit(
                    &artifact,
                    &START_GAME_SHAPE,
                    b.address,
                    rebuild_as(b.address, 15, contract),
                )
                .await
        }
    });

    let reports = futures::future::join_all(runs).await;
    for (report, session_id) in reports.into_iter().zip(100u32..) {
        let report = report.unwrap();
        assert_eq!(report.state, HandshakeState::Confirmed);
        assert_eq!(report.session_id, session_id);
        assert!(ledger.session(session_id).await.is_some());
    }
    assert_eq!(ledger.network_id(), network_id);
}
