//! Transport manager
//!
//! Dispatches encrypted datagrams over the injected raw transport and owns
//! multicast membership per (fabric, group). Membership tracking makes
//! join/leave idempotent at this layer regardless of how the raw transport
//! behaves: a second leave for the same pair is a no-op, never a
//! double-decrement.

use std::collections::HashSet;
use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, warn};

use weft_core::{FabricIndex, GroupId, WeftResult};

use crate::multicast::group_multicast_address;

/// Raw media driver (UDP, BLE framing) injected at server construction.
///
/// Implementations own sockets and framing; the control plane never touches
/// raw media directly.
#[async_trait]
pub trait RawTransport: Send + Sync {
    /// Send one encrypted datagram to a peer address
    async fn send(&self, dest: SocketAddr, payload: &[u8]) -> WeftResult<()>;

    /// Join an IPv6 multicast group on the underlying interface
    fn join_multicast(&self, address: Ipv6Addr) -> WeftResult<()>;

    /// Leave an IPv6 multicast group on the underlying interface
    fn leave_multicast(&self, address: Ipv6Addr) -> WeftResult<()>;
}

/// Transport manager: datagram dispatch plus multicast membership tracking
pub struct TransportManager {
    raw: Arc<dyn RawTransport>,
    memberships: RwLock<HashSet<(FabricIndex, GroupId)>>,
}

impl TransportManager {
    /// Wrap an injected raw transport
    pub fn new(raw: Arc<dyn RawTransport>) -> Self {
        Self {
            raw,
            memberships: RwLock::new(HashSet::new()),
        }
    }

    /// Send one encrypted datagram to a peer
    pub async fn send_datagram(&self, dest: SocketAddr, payload: &[u8]) -> WeftResult<()> {
        self.raw.send(dest, payload).await
    }

    /// Join the multicast group for `(fabric_index, group_id)`.
    ///
    /// Idempotent: joining a pair already held succeeds without touching the
    /// raw transport again.
    pub fn multicast_join(&self, fabric_index: FabricIndex, group_id: GroupId) -> WeftResult<()> {
        {
            let memberships = self.memberships.read();
            if memberships.contains(&(fabric_index, group_id)) {
                debug!(%fabric_index, %group_id, "multicast membership already held");
                return Ok(());
            }
        }

        let address = group_multicast_address(fabric_index, group_id);
        self.raw.join_multicast(address)?;
        self.memberships.write().insert((fabric_index, group_id));
        debug!(%fabric_index, %group_id, %address, "joined multicast group");
        Ok(())
    }

    /// Leave the multicast group for `(fabric_index, group_id)`.
    ///
    /// Idempotent: leaving a pair not held is a no-op.
    pub fn multicast_leave(&self, fabric_index: FabricIndex, group_id: GroupId) -> WeftResult<()> {
        if !self.memberships.write().remove(&(fabric_index, group_id)) {
            debug!(%fabric_index, %group_id, "multicast membership not held, leave is a no-op");
            return Ok(());
        }

        let address = group_multicast_address(fabric_index, group_id);
        if let Err(err) = self.raw.leave_multicast(address) {
            // Stale socket membership is tolerable; the tracking entry is
            // already gone so a later join re-issues cleanly.
            warn!(%fabric_index, %group_id, %err, "multicast leave failed");
        }
        debug!(%fabric_index, %group_id, %address, "left multicast group");
        Ok(())
    }

    /// Whether a membership is currently held for `(fabric_index, group_id)`
    pub fn is_member(&self, fabric_index: FabricIndex, group_id: GroupId) -> bool {
        self.memberships.read().contains(&(fabric_index, group_id))
    }

    /// Number of multicast memberships currently held
    pub fn membership_count(&self) -> usize {
        self.memberships.read().len()
    }
}
