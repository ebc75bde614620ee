//! Weft group data provider
//!
//! Owns per-fabric multicast group-key assignments. Every add/remove
//! synchronously notifies the registered listener before the mutating call
//! returns, which is what keeps transport multicast membership in lockstep
//! with the group table. Entries persist through the storage boundary and
//! reload on restart.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use weft_core::{FabricIndex, GroupId, KeysetId, StorageDelegate, WeftError, WeftResult};

const GROUP_KEY_PREFIX: &str = "weft/grp/";

fn group_key(fabric_index: FabricIndex, group_id: GroupId) -> String {
    format!("{GROUP_KEY_PREFIX}{}/{}", fabric_index.raw(), group_id.0)
}

/// A fabric-scoped multicast group with its key-set reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    /// Fabric the group belongs to
    pub fabric_index: FabricIndex,
    /// Group identifier, scoped to the fabric
    pub group_id: GroupId,
    /// Key set the group encrypts with
    pub keyset_id: KeysetId,
}

/// Observer notified synchronously on every group mutation.
///
/// The provider outlives the listener registration; the server registers
/// its transport-backed listener during init and the contract is that
/// notifications complete before the mutating provider call returns.
pub trait GroupListener: Send + Sync {
    /// A group entry was added or replaced
    fn on_group_added(&self, group: &GroupInfo);

    /// A group entry was removed
    fn on_group_removed(&self, group: &GroupInfo);
}

/// Table of fabric-scoped multicast groups
pub struct GroupDataProvider {
    storage: Arc<dyn StorageDelegate>,
    groups: RwLock<BTreeMap<(FabricIndex, GroupId), GroupInfo>>,
    listener: RwLock<Option<Arc<dyn GroupListener>>>,
}

impl GroupDataProvider {
    /// Create a provider backed by `storage`, reloading committed groups.
    ///
    /// Reload does not notify the listener (none is registered yet at init
    /// time); the server re-issues multicast joins for reloaded groups
    /// explicitly.
    pub fn new(storage: Arc<dyn StorageDelegate>) -> WeftResult<Self> {
        let provider = Self {
            storage,
            groups: RwLock::new(BTreeMap::new()),
            listener: RwLock::new(None),
        };
        provider.reload()?;
        Ok(provider)
    }

    fn reload(&self) -> WeftResult<()> {
        let keys = self.storage.keys_with_prefix(GROUP_KEY_PREFIX)?;
        let mut groups = self.groups.write();
        for key in keys {
            let Some(bytes) = self.storage.get(&key)? else {
                continue;
            };
            let info: GroupInfo = postcard::from_bytes(&bytes)
                .map_err(|err| WeftError::storage(format!("corrupt group record {key}: {err}")))?;
            debug!(fabric = %info.fabric_index, group = %info.group_id, "reloaded group");
            groups.insert((info.fabric_index, info.group_id), info);
        }
        Ok(())
    }

    /// Register the group listener
    pub fn set_listener(&self, listener: Arc<dyn GroupListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Add (or replace) a group entry. The listener's `on_group_added` runs
    /// before this returns.
    pub fn add_group(&self, group: GroupInfo) -> WeftResult<()> {
        let bytes = postcard::to_allocvec(&group)
            .map_err(|err| WeftError::storage(format!("serialize group record: {err}")))?;
        self.storage
            .set(&group_key(group.fabric_index, group.group_id), &bytes)?;
        self.groups
            .write()
            .insert((group.fabric_index, group.group_id), group.clone());

        if let Some(listener) = self.listener.read().as_ref() {
            listener.on_group_added(&group);
        }
        info!(fabric = %group.fabric_index, group = %group.group_id, "group added");
        Ok(())
    }

    /// Remove a group entry. The listener's `on_group_removed` runs before
    /// this returns, even when the storage delete fails: once the entry is
    /// gone from the table, multicast membership must not outlive it, so a
    /// stale storage record is logged rather than propagated.
    pub fn remove_group(&self, fabric_index: FabricIndex, group_id: GroupId) -> WeftResult<()> {
        let removed = self
            .groups
            .write()
            .remove(&(fabric_index, group_id))
            .ok_or_else(|| {
                WeftError::not_found(format!("group {group_id} in fabric {fabric_index}"))
            })?;
        if let Err(err) = self.storage.delete(&group_key(fabric_index, group_id)) {
            warn!(fabric = %fabric_index, group = %group_id, %err, "failed to delete group record from storage");
        }

        if let Some(listener) = self.listener.read().as_ref() {
            listener.on_group_removed(&removed);
        }
        info!(fabric = %fabric_index, group = %group_id, "group removed");
        Ok(())
    }

    /// Remove every group scoped to `fabric_index`, notifying the listener
    /// for each removal before returning. Cascading removal never leaves a
    /// partial table behind: a failure on one group is logged and the rest
    /// are still removed.
    pub fn remove_fabric(&self, fabric_index: FabricIndex) -> WeftResult<()> {
        let doomed: Vec<GroupId> = self
            .groups
            .read()
            .keys()
            .filter(|(fabric, _)| *fabric == fabric_index)
            .map(|(_, group)| *group)
            .collect();

        for group_id in doomed {
            if let Err(err) = self.remove_group(fabric_index, group_id) {
                warn!(fabric = %fabric_index, group = %group_id, %err, "group removal failed during fabric cleanup");
            }
        }
        Ok(())
    }

    /// Groups currently committed under `fabric_index`
    pub fn groups_for_fabric(&self, fabric_index: FabricIndex) -> Vec<GroupInfo> {
        self.groups
            .read()
            .values()
            .filter(|g| g.fabric_index == fabric_index)
            .cloned()
            .collect()
    }

    /// Every committed group, across all fabrics
    pub fn all_groups(&self) -> Vec<GroupInfo> {
        self.groups.read().values().cloned().collect()
    }

    /// Total number of committed groups
    pub fn group_count(&self) -> usize {
        self.groups.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use weft_core::MemoryStorage;

    fn fabric(raw: u8) -> FabricIndex {
        FabricIndex::new(raw).unwrap()
    }

    fn group(fabric_index: FabricIndex, id: u16) -> GroupInfo {
        GroupInfo {
            fabric_index,
            group_id: GroupId(id),
            keyset_id: KeysetId(1),
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<(String, GroupId)>>,
    }

    impl GroupListener for RecordingListener {
        fn on_group_added(&self, group: &GroupInfo) {
            self.events.lock().push(("added".into(), group.group_id));
        }

        fn on_group_removed(&self, group: &GroupInfo) {
            self.events.lock().push(("removed".into(), group.group_id));
        }
    }

    #[test]
    fn add_and_remove_notify_listener_synchronously() {
        let provider = GroupDataProvider::new(Arc::new(MemoryStorage::new())).unwrap();
        let listener = Arc::new(RecordingListener::default());
        provider.set_listener(listener.clone());

        provider.add_group(group(fabric(1), 0x0001)).unwrap();
        provider.remove_group(fabric(1), GroupId(0x0001)).unwrap();

        assert_eq!(
            *listener.events.lock(),
            vec![
                ("added".to_string(), GroupId(0x0001)),
                ("removed".to_string(), GroupId(0x0001)),
            ]
        );
    }

    #[test]
    fn remove_unknown_group_is_not_found() {
        let provider = GroupDataProvider::new(Arc::new(MemoryStorage::new())).unwrap();
        let err = provider.remove_group(fabric(1), GroupId(9)).unwrap_err();
        assert!(matches!(err, WeftError::NotFound { .. }));
    }

    #[test]
    fn fabric_removal_drops_only_that_fabric() {
        let provider = GroupDataProvider::new(Arc::new(MemoryStorage::new())).unwrap();
        let listener = Arc::new(RecordingListener::default());
        provider.set_listener(listener.clone());

        provider.add_group(group(fabric(1), 1)).unwrap();
        provider.add_group(group(fabric(1), 2)).unwrap();
        provider.add_group(group(fabric(2), 1)).unwrap();

        provider.remove_fabric(fabric(1)).unwrap();

        assert!(provider.groups_for_fabric(fabric(1)).is_empty());
        assert_eq!(provider.groups_for_fabric(fabric(2)).len(), 1);
        let removals = listener
            .events
            .lock()
            .iter()
            .filter(|(kind, _)| kind == "removed")
            .count();
        assert_eq!(removals, 2);
    }

    /// Storage double whose deletes always fail once armed
    struct BrittleStorage {
        inner: MemoryStorage,
        fail_deletes: std::sync::atomic::AtomicBool,
    }

    impl BrittleStorage {
        fn new() -> Self {
            Self {
                inner: MemoryStorage::new(),
                fail_deletes: std::sync::atomic::AtomicBool::new(false),
            }
        }

        fn fail_deletes(&self) {
            self.fail_deletes
                .store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    impl StorageDelegate for BrittleStorage {
        fn get(&self, key: &str) -> WeftResult<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> WeftResult<()> {
            self.inner.set(key, value)
        }

        fn delete(&self, key: &str) -> WeftResult<()> {
            if self.fail_deletes.load(std::sync::atomic::Ordering::SeqCst) {
                return Err(WeftError::storage(format!("flash write failed for {key}")));
            }
            self.inner.delete(key)
        }

        fn keys_with_prefix(&self, prefix: &str) -> WeftResult<Vec<String>> {
            self.inner.keys_with_prefix(prefix)
        }
    }

    #[test]
    fn storage_delete_failure_still_notifies_and_drops_the_entry() {
        let storage = Arc::new(BrittleStorage::new());
        let provider = GroupDataProvider::new(storage.clone()).unwrap();
        let listener = Arc::new(RecordingListener::default());
        provider.set_listener(listener.clone());

        provider.add_group(group(fabric(1), 0x0001)).unwrap();
        storage.fail_deletes();

        provider.remove_group(fabric(1), GroupId(0x0001)).unwrap();

        // The entry is gone and the listener heard about it, so multicast
        // membership cannot outlive the group entry.
        assert!(provider.groups_for_fabric(fabric(1)).is_empty());
        assert_eq!(
            *listener.events.lock(),
            vec![
                ("added".to_string(), GroupId(0x0001)),
                ("removed".to_string(), GroupId(0x0001)),
            ]
        );
    }

    #[test]
    fn fabric_removal_completes_despite_storage_delete_failures() {
        let storage = Arc::new(BrittleStorage::new());
        let provider = GroupDataProvider::new(storage.clone()).unwrap();
        let listener = Arc::new(RecordingListener::default());
        provider.set_listener(listener.clone());

        provider.add_group(group(fabric(1), 1)).unwrap();
        provider.add_group(group(fabric(1), 2)).unwrap();
        provider.add_group(group(fabric(1), 3)).unwrap();
        storage.fail_deletes();

        provider.remove_fabric(fabric(1)).unwrap();

        assert!(provider.groups_for_fabric(fabric(1)).is_empty());
        let removals = listener
            .events
            .lock()
            .iter()
            .filter(|(kind, _)| kind == "removed")
            .count();
        assert_eq!(removals, 3);
    }

    #[test]
    fn committed_groups_reload_after_restart() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let provider = GroupDataProvider::new(storage.clone()).unwrap();
            provider.add_group(group(fabric(1), 0x0042)).unwrap();
        }

        let reloaded = GroupDataProvider::new(storage).unwrap();
        let groups = reloaded.groups_for_fabric(fabric(1));
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_id, GroupId(0x0042));
    }
}
