//! One driver per session id

use crate::{HandshakeError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Tracks which handshake currently owns each session id
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: Arc<DashMap<u32, Uuid>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `session_id` for handshake `owner`.
    ///
    /// Fails with `SessionBusy` while another claim on the same id is alive.
    pub fn claim(&self, session_id: u32, owner: Uuid) -> Result<SessionClaim> {
        match self.active.entry(session_id) {
            Entry::Occupied(_) => Err(HandshakeError::SessionBusy(session_id)),
            Entry::Vacant(slot) => {
                slot.insert(owner);
                debug!("Session {} claimed by {}", session_id, owner);
                Ok(SessionClaim {
                    session_id,
                    owner,
                    active: self.active.clone(),
                })
            }
        }
    }

    pub fn is_active(&self, session_id: u32) -> bool {
        self.active.contains_key(&session_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Exclusive hold on a session id, released on drop
#[derive(Debug)]
pub struct SessionClaim {
    session_id: u32,
    owner: Uuid,
    active: Arc<DashMap<u32, Uuid>>,
}

impl SessionClaim {
    pub fn session_id(&self) -> u32 {
        self.session_id
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.active
            .remove_if(&self.session_id, |_, owner| *owner == self.owner);
        debug!("Session {} released by {}", self.session_id, self.owner);
    }
}
