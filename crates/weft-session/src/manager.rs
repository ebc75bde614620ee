//! Session manager
//!
//! Registry of active secure unicast sessions keyed by (peer, fabric). At
//! most one live session exists per key; establishment reuses an existing
//! session rather than inserting a duplicate. Fabric removal evicts every
//! matching session immediately.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use weft_core::{FabricIndex, NodeId, WeftError, WeftResult};

use crate::session::SecureSession;

/// Registry of active secure sessions
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<(NodeId, FabricIndex), Arc<SecureSession>>>,
}

impl SessionManager {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the live session for `(peer, fabric_index)`, if any
    pub fn find(&self, peer: NodeId, fabric_index: FabricIndex) -> Option<Arc<SecureSession>> {
        self.sessions.read().get(&(peer, fabric_index)).cloned()
    }

    /// Insert a newly established session.
    ///
    /// Fails with `IncorrectState` if a live session already exists for the
    /// same (peer, fabric) key; the registry is left untouched in that case.
    pub fn insert(&self, session: Arc<SecureSession>) -> WeftResult<()> {
        let key = (session.peer, session.fabric_index);
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&key) {
            return Err(WeftError::incorrect_state(format!(
                "session to {} on fabric {} already live",
                session.peer, session.fabric_index
            )));
        }
        debug!(peer = %session.peer, fabric = %session.fabric_index, "session inserted");
        sessions.insert(key, session);
        Ok(())
    }

    /// Close and drop the session for `(peer, fabric_index)`, if present
    pub fn remove(&self, peer: NodeId, fabric_index: FabricIndex) -> Option<Arc<SecureSession>> {
        self.sessions.write().remove(&(peer, fabric_index))
    }

    /// Evict every session scoped to a removed fabric. Returns the number
    /// of sessions purged.
    pub fn fabric_removed(&self, fabric_index: FabricIndex) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|(_, fabric), _| *fabric != fabric_index);
        let purged = before - sessions.len();
        if purged > 0 {
            info!(%fabric_index, purged, "purged sessions for removed fabric");
        }
        purged
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}
