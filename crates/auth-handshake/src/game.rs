//! The two-player `start_game` invocation
//!
//! Both players stake points on a new session. Player one authorizes
//! `[session_id, player1_points]`, player two authorizes
//! `[session_id, player2_points]`, and the contract debits both stakes
//! atomically when the session is created.

use crate::auth::{DecodedArtifact, InvocationShape};
use crate::types::{Address, AuthorizationEntry, Invocation, ScValue};
use crate::{HandshakeError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const START_GAME: &str = "start_game";

/// What a player's authorization for `start_game` attests to
pub const START_GAME_SHAPE: InvocationShape = InvocationShape::new(START_GAME, 2);

/// Session a session-scoped invocation belongs to.
///
/// Every game entry point takes the session id as its first argument.
pub fn session_id_of(invocation: &Invocation) -> Result<u32> {
    invocation
        .args
        .first()
        .and_then(ScValue::as_u32)
        .ok_or_else(|| {
            HandshakeError::ArgumentShapeMismatch(format!(
                "{} does not lead with a u32 session id",
                invocation.function
            ))
        })
}

/// Arguments of a `start_game` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartGame {
    pub session_id: u32,
    pub player1: Address,
    pub player2: Address,
    pub player1_points: i128,
    pub player2_points: i128,
}

impl StartGame {
    pub fn to_invocation(&self, contract: Address) -> Invocation {
        Invocation::new(
            contract,
            START_GAME,
            vec![
                ScValue::U32(self.session_id),
                ScValue::Address(self.player1),
                ScValue::Address(self.player2),
                ScValue::I128(self.player1_points),
                ScValue::I128(self.player2_points),
            ],
        )
    }

    pub fn from_invocation(invocation: &Invocation) -> Result<Self> {
        if invocation.function != START_GAME {
            return Err(HandshakeError::FunctionMismatch {
                expected: START_GAME.to_string(),
                found: invocation.function.clone(),
            });
        }

        let [session_id, player1, player2, p1_points, p2_points] = invocation.args.as_slice() else {
            return Err(HandshakeError::ArgumentShapeMismatch(format!(
                "{START_GAME} takes 5 arguments, got {}",
                invocation.args.len()
            )));
        };

        Ok(Self {
            session_id: expect_arg(session_id, "session_id", ScValue::as_u32)?,
            player1: expect_arg(player1, "player1", |v| v.as_address().copied())?,
            player2: expect_arg(player2, "player2", |v| v.as_address().copied())?,
            player1_points: expect_arg(p1_points, "player1_points", ScValue::as_i128)?,
            player2_points: expect_arg(p2_points, "player2_points", ScValue::as_i128)?,
        })
    }

    /// Authorizations the contract requires, in call order: `(signer, attested args)`
    pub fn required_authorizations(&self) -> Vec<(Address, Vec<ScValue>)> {
        vec![
            (
                self.player1,
                vec![
                    ScValue::U32(self.session_id),
                    ScValue::I128(self.player1_points),
                ],
            ),
            (
                self.player2,
                vec![
                    ScValue::U32(self.session_id),
                    ScValue::I128(self.player2_points),
                ],
            ),
        ]
    }

    /// Placeholder entries a fresh simulation reports
    pub fn authorization_stubs(&self) -> Vec<AuthorizationEntry> {
        self.required_authorizations()
            .into_iter()
            .map(|(address, args)| AuthorizationEntry::stub(address, START_GAME, args))
            .collect()
    }
}

fn expect_arg<T>(value: &ScValue, name: &str, extract: impl Fn(&ScValue) -> Option<T>) -> Result<T> {
    extract(value).ok_or_else(|| {
        HandshakeError::ArgumentShapeMismatch(format!(
            "{name} has unexpected type {}",
            value.type_name()
        ))
    })
}

/// Player one's half of a game, recovered from their exported authorization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialStart {
    pub session_id: u32,
    pub player1: Address,
    pub player1_points: i128,
}

impl PartialStart {
    pub fn from_player1_entry(decoded: &DecodedArtifact) -> Result<Self> {
        let [session_id, points] = decoded.invocation_args() else {
            return Err(HandshakeError::ArgumentShapeMismatch(format!(
                "{START_GAME} authorization attests 2 arguments, got {}",
                decoded.invocation_args().len()
            )));
        };

        Ok(Self {
            session_id: expect_arg(session_id, "session_id", ScValue::as_u32)?,
            player1: *decoded.signer_address(),
            player1_points: expect_arg(points, "player1_points", ScValue::as_i128)?,
        })
    }

    /// Full call once player two picks their stake
    pub fn complete(&self, player2: Address, player2_points: i128) -> StartGame {
        StartGame {
            session_id: self.session_id,
            player1: self.player1,
            player2,
            player1_points: self.player1_points,
            player2_points,
        }
    }
}

/// Session record the contract stores once a game starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSession {
    pub session_id: u32,
    pub player1: Address,
    pub player2: Address,
    pub player1_points: i128,
    pub player2_points: i128,
    pub started_ledger: u32,
    pub started_at: DateTime<Utc>,
}
