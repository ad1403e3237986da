//! Two-party handshake demo
//!
//! Runs both players against one in-process ledger: player one exports a
//! signed authorization, player two imports it, signs and submits.

mod config;

use anyhow::{bail, Result};
use auth_handshake::{
    EventStream, GameSession, HandshakeReport, HandshakeService, HandshakeState, KeypairSigner,
    LatestLedger, LedgerTtlCalculator, LocalLedger, PartialStart, PortableAuthArtifact,
    RpcLedgerHeight, StartGame, START_GAME_SHAPE,
};
use config::{load_keypair, DemoConfig};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Final output printed as JSON
#[derive(Serialize)]
struct Summary<'a> {
    report: &'a HandshakeReport,
    player1_balance: i128,
    player2_balance: i128,
    session: Option<GameSession>,
}

fn player_service(
    config: &DemoConfig,
    ledger: &Arc<LocalLedger>,
    keypair: Keypair,
) -> Result<HandshakeService> {
    Ok(HandshakeService::new(
        config.handshake.clone(),
        ledger.clone(),
        Arc::new(KeypairSigner::new().with_keypair(keypair)),
        Arc::new(LedgerTtlCalculator::new(
            ledger.clone(),
            config.handshake.ledger_close_secs,
        )),
        Arc::new(EventStream::new()),
    )?)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DemoConfig::from_env()?;
    info!(
        "Starting handshake demo for session {} on network {}",
        config.session_id,
        config.handshake.network_id()
    );

    if config.probe_rpc {
        let rpc = RpcLedgerHeight::new(&config.handshake.rpc_url);
        match rpc.latest_ledger().await {
            Ok(height) => info!("RPC node at {} is at ledger {}", config.handshake.rpc_url, height),
            Err(e) => warn!("RPC node at {} unreachable: {}", config.handshake.rpc_url, e),
        }
    }

    let ledger = Arc::new(LocalLedger::new(
        config.handshake.network_id(),
        Pubkey::new_unique(),
        config.start_ledger,
    ));
    let contract = ledger.contract();

    let player1_key = load_keypair(config.player1_keypair.as_deref())?;
    let player2_key = load_keypair(config.player2_keypair.as_deref())?;
    let (player1, player2) = (player1_key.pubkey(), player2_key.pubkey());
    ledger.set_balance(player1, config.starting_balance).await;
    ledger.set_balance(player2, config.starting_balance).await;

    let party_a = player_service(&config, &ledger, player1_key)?;
    let party_b = player_service(&config, &ledger, player2_key)?;

    let mut events = party_b.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let Ok(line) = serde_json::to_string(&event) {
                info!("event {}", line);
            }
        }
    });

    // Player one: sign its half with player two paying the fee
    let proposal = StartGame {
        session_id: config.session_id,
        player1,
        player2,
        player1_points: config.player1_points,
        player2_points: config.player2_points,
    };
    let artifact = party_a
        .export_authorization(proposal.to_invocation(contract), player2, player1)
        .await?;
    println!("Player 1 authorization:\n{artifact}\n");

    // Player two: the artifact arrives as plain text
    let received: PortableAuthArtifact = artifact.to_string().parse()?;
    let player2_points = config.player2_points;
    let report = party_b
        .import_and_submit(&received, &START_GAME_SHAPE, player2, |decoded| {
            let game = PartialStart::from_player1_entry(decoded)?.complete(player2, player2_points);
            Ok(game.to_invocation(contract))
        })
        .await?;

    let summary = Summary {
        report: &report,
        player1_balance: ledger.balance_of(&player1).await,
        player2_balance: ledger.balance_of(&player2).await,
        session: ledger.session(config.session_id).await,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if report.state != HandshakeState::Confirmed {
        bail!(
            "Handshake for session {} ended in {}",
            report.session_id,
            report.state
        );
    }
    Ok(())
}
