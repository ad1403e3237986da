//! Handshake event streaming

use crate::assembler::HandshakeState;
use crate::types::Address;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error};
use uuid::Uuid;

/// Handshake event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandshakeEvent {
    /// State machine moved
    Transitioned {
        handshake_id: Uuid,
        session_id: u32,
        from: HandshakeState,
        to: HandshakeState,
    },

    /// Local authorization signed and handed out as an artifact
    ArtifactExported {
        invocation: String,
        signer: Address,
        expiry_ledger: u32,
    },

    /// Counterparty authorization merged into a local bundle
    ArtifactImported {
        handshake_id: Uuid,
        session_id: u32,
        signer: Address,
        expiry_ledger: u32,
    },

    /// Ledger accepted the bundle
    Submitted {
        handshake_id: Uuid,
        session_id: u32,
        tx_hash: String,
        ledger: u32,
    },

    /// Handshake ended in Failed
    Failed {
        handshake_id: Uuid,
        session_id: u32,
        stage: HandshakeState,
        reason: String,
    },
}

impl HandshakeEvent {
    /// Session the event belongs to; exports happen outside any session
    pub fn session_id(&self) -> Option<u32> {
        match self {
            HandshakeEvent::Transitioned { session_id, .. }
            | HandshakeEvent::ArtifactImported { session_id, .. }
            | HandshakeEvent::Submitted { session_id, .. }
            | HandshakeEvent::Failed { session_id, .. } => Some(*session_id),
            HandshakeEvent::ArtifactExported { .. } => None,
        }
    }
}

/// Event stream for broadcasting handshake events
pub struct EventStream {
    sender: broadcast::Sender<HandshakeEvent>,
}

impl EventStream {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(256);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HandshakeEvent> {
        self.sender.subscribe()
    }

    pub async fn emit(&self, event: HandshakeEvent) {
        debug!("Emitting event: {:?}", event);

        match self.sender.send(event) {
            Ok(count) => debug!("Event sent to {} receivers", count),
            // No receivers, event is dropped
            Err(e) => debug!("No receivers for event: {:?}", e),
        }
    }

    /// Number of live receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Event filter for selective subscription
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub include_transitions: bool,
    pub include_artifacts: bool,
    pub include_outcomes: bool,
    pub session_filter: Option<Vec<u32>>,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            include_transitions: true,
            include_artifacts: true,
            include_outcomes: true,
            session_filter: None,
        }
    }
}

impl EventFilter {
    pub fn matches(&self, event: &HandshakeEvent) -> bool {
        if let Some(sessions) = &self.session_filter {
            match event.session_id() {
                Some(id) if sessions.contains(&id) => {}
                _ => return false,
            }
        }

        match event {
            HandshakeEvent::Transitioned { .. } => self.include_transitions,
            HandshakeEvent::ArtifactExported { .. } | HandshakeEvent::ArtifactImported { .. } => {
                self.include_artifacts
            }
            HandshakeEvent::Submitted { .. } | HandshakeEvent::Failed { .. } => {
                self.include_outcomes
            }
        }
    }
}

/// Filtered event stream wrapper
pub struct FilteredEventStream {
    receiver: broadcast::Receiver<HandshakeEvent>,
    filter: EventFilter,
}

impl FilteredEventStream {
    pub fn new(receiver: broadcast::Receiver<HandshakeEvent>, filter: EventFilter) -> Self {
        Self { receiver, filter }
    }

    /// Next event passing the filter, `None` once the stream closes
    pub async fn recv(&mut self) -> Option<HandshakeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    error!("Event stream lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
