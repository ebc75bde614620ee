//! Fabric removal cascade steps
//!
//! The ordered cleanup the server registers on the fabric table: first
//! sessions (including in-flight establishment and pending invocations),
//! then groups (which drives multicast leave through the group listener),
//! then access rules. The order guarantees no session or multicast
//! membership can reference a fabric index after `remove_fabric` returns.

use std::sync::Arc;

use weft_access::AccessControl;
use weft_core::{FabricIndex, WeftResult};
use weft_fabric::FabricRemovalStep;
use weft_groups::GroupDataProvider;
use weft_interaction::CommandDispatcher;
use weft_session::{EstablishmentPool, SessionManager};

/// Step 1: purge sessions, cancel establishment and invocations
pub struct SessionCleanup {
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) pool: Arc<EstablishmentPool>,
    pub(crate) dispatcher: Arc<CommandDispatcher>,
}

impl FabricRemovalStep for SessionCleanup {
    fn name(&self) -> &'static str {
        "sessions"
    }

    fn fabric_removed(&self, index: FabricIndex) -> WeftResult<()> {
        // Invocations first so their cancellation status reflects fabric
        // removal rather than a session eviction side effect.
        self.dispatcher.fabric_removed(index);
        self.pool.fabric_removed(index);
        self.sessions.fabric_removed(index);
        Ok(())
    }
}

/// Step 2: drop group entries; each removal notifies the group listener,
/// which leaves the corresponding multicast group before this step returns
pub struct GroupCleanup {
    pub(crate) groups: Arc<GroupDataProvider>,
}

impl FabricRemovalStep for GroupCleanup {
    fn name(&self) -> &'static str {
        "groups"
    }

    fn fabric_removed(&self, index: FabricIndex) -> WeftResult<()> {
        self.groups.remove_fabric(index)
    }
}

/// Step 3: purge fabric-scoped access rules
pub struct AccessCleanup {
    pub(crate) access: Arc<AccessControl>,
}

impl FabricRemovalStep for AccessCleanup {
    fn name(&self) -> &'static str {
        "access"
    }

    fn fabric_removed(&self, index: FabricIndex) -> WeftResult<()> {
        self.access.remove_fabric(index);
        Ok(())
    }
}
