//! Transport-backed group listener
//!
//! Keeps transport multicast membership synchronized with the group data
//! provider: join on add, leave on remove, both before the provider call
//! returns. A failed join does not roll back the group entry — membership
//! is best-effort and heals on the next init-time rejoin pass.

use std::sync::Arc;

use tracing::warn;

use weft_groups::{GroupInfo, GroupListener};
use weft_transport::TransportManager;

/// Listener binding the group data provider to the transport manager
pub struct MulticastGroupListener {
    transport: Arc<TransportManager>,
}

impl MulticastGroupListener {
    /// Bind to the transport manager that owns multicast membership
    pub fn new(transport: Arc<TransportManager>) -> Self {
        Self { transport }
    }
}

impl GroupListener for MulticastGroupListener {
    fn on_group_added(&self, group: &GroupInfo) {
        if let Err(err) = self
            .transport
            .multicast_join(group.fabric_index, group.group_id)
        {
            warn!(
                fabric = %group.fabric_index,
                group = %group.group_id,
                %err,
                "unable to listen to group"
            );
        }
    }

    fn on_group_removed(&self, group: &GroupInfo) {
        if let Err(err) = self
            .transport
            .multicast_leave(group.fabric_index, group.group_id)
        {
            warn!(
                fabric = %group.fabric_index,
                group = %group.group_id,
                %err,
                "multicast leave failed"
            );
        }
    }
}
