//! Fabric table
//!
//! Owns the set of cryptographic fabric identities this node participates
//! in, persists them through the storage delegate, and drives the ordered
//! removal cascade. Cleanup is an explicit list of registered steps run by
//! `remove_fabric` itself, in registration order, before the call returns —
//! the cascade order is a visible contract, not a side effect of observer
//! registration.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use weft_core::{FabricIndex, StorageDelegate, WeftError, WeftResult};

/// Default capacity of the fabric table
pub const DEFAULT_MAX_FABRICS: u8 = 16;

const FABRIC_KEY_PREFIX: &str = "weft/fbr/";

fn fabric_key(index: FabricIndex) -> String {
    format!("{FABRIC_KEY_PREFIX}{}", index.raw())
}

/// Identity material presented when a fabric is committed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricIdentity {
    /// Compressed fabric identifier, globally unique per fabric
    pub compressed_id: u64,
    /// Root public key of the fabric's certificate authority
    pub root_public_key: [u8; 32],
    /// Human-readable fabric label
    pub label: String,
}

/// One committed fabric membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FabricInfo {
    /// Local table index, unique among active fabrics
    pub index: FabricIndex,
    /// Identity material the fabric was committed with
    pub identity: FabricIdentity,
}

/// One step of the fabric-removal cascade.
///
/// Steps run synchronously inside `remove_fabric`, in registration order. A
/// failing step is logged and the remaining steps still run; cascade steps
/// are never rolled back.
pub trait FabricRemovalStep: Send + Sync {
    /// Short name used in cascade failure logs
    fn name(&self) -> &'static str;

    /// Release all state scoped to the removed fabric index
    fn fabric_removed(&self, index: FabricIndex) -> WeftResult<()>;
}

/// Informational persistence hooks. No cascading effect.
pub trait FabricTableDelegate: Send + Sync {
    /// A fabric was written to persistent storage
    fn on_fabric_persisted(&self, _info: &FabricInfo) {}

    /// A fabric was reloaded from persistent storage
    fn on_fabric_retrieved(&self, _info: &FabricInfo) {}
}

/// Table of active fabric memberships with persistence and removal cascade
pub struct FabricTable {
    storage: Arc<dyn StorageDelegate>,
    fabrics: RwLock<BTreeMap<FabricIndex, FabricInfo>>,
    removal_steps: RwLock<Vec<Arc<dyn FabricRemovalStep>>>,
    delegate: RwLock<Option<Arc<dyn FabricTableDelegate>>>,
    max_fabrics: u8,
}

impl FabricTable {
    /// Create a table backed by `storage`, reloading any committed fabrics.
    ///
    /// The key scheme is stable across restarts, so a node that committed
    /// fabrics before shutdown reloads them identically.
    pub fn new(storage: Arc<dyn StorageDelegate>, max_fabrics: u8) -> WeftResult<Self> {
        let table = Self {
            storage,
            fabrics: RwLock::new(BTreeMap::new()),
            removal_steps: RwLock::new(Vec::new()),
            delegate: RwLock::new(None),
            max_fabrics,
        };
        table.reload()?;
        Ok(table)
    }

    fn reload(&self) -> WeftResult<()> {
        let keys = self.storage.keys_with_prefix(FABRIC_KEY_PREFIX)?;
        let mut fabrics = self.fabrics.write();
        for key in keys {
            let Some(bytes) = self.storage.get(&key)? else {
                continue;
            };
            let info: FabricInfo = postcard::from_bytes(&bytes)
                .map_err(|err| WeftError::storage(format!("corrupt fabric record {key}: {err}")))?;
            debug!(index = %info.index, label = %info.identity.label, "reloaded fabric");
            if let Some(delegate) = self.delegate.read().as_ref() {
                delegate.on_fabric_retrieved(&info);
            }
            fabrics.insert(info.index, info);
        }
        Ok(())
    }

    /// Register a cascade step. Order of registration is the order of
    /// execution during `remove_fabric`.
    pub fn register_removal_step(&self, step: Arc<dyn FabricRemovalStep>) {
        self.removal_steps.write().push(step);
    }

    /// Install the informational persistence delegate
    pub fn set_delegate(&self, delegate: Arc<dyn FabricTableDelegate>) {
        *self.delegate.write() = Some(delegate);
    }

    /// Commit a new fabric membership and return its allocated index.
    ///
    /// Fails with `ResourceExhausted` when the table is full and with
    /// `InvalidArgument` for malformed or duplicate identities. Precondition
    /// failures leave the table untouched.
    pub fn add_fabric(&self, identity: FabricIdentity) -> WeftResult<FabricIndex> {
        if identity.compressed_id == 0 {
            return Err(WeftError::invalid_argument("compressed fabric id 0 is reserved"));
        }

        let mut fabrics = self.fabrics.write();
        if fabrics
            .values()
            .any(|f| f.identity.compressed_id == identity.compressed_id)
        {
            return Err(WeftError::invalid_argument(format!(
                "fabric with compressed id {:#018x} already committed",
                identity.compressed_id
            )));
        }

        let index = (1..=self.max_fabrics)
            .filter_map(|raw| FabricIndex::new(raw).ok())
            .find(|candidate| !fabrics.contains_key(candidate))
            .ok_or_else(|| WeftError::resource_exhausted("fabric table full"))?;

        let info = FabricInfo { index, identity };
        let bytes = postcard::to_allocvec(&info)
            .map_err(|err| WeftError::storage(format!("serialize fabric record: {err}")))?;
        self.storage.set(&fabric_key(index), &bytes)?;
        fabrics.insert(index, info.clone());
        drop(fabrics);

        if let Some(delegate) = self.delegate.read().as_ref() {
            delegate.on_fabric_persisted(&info);
        }
        info!(%index, label = %info.identity.label, "fabric committed");
        Ok(index)
    }

    /// Remove a fabric and run the full cleanup cascade before returning.
    ///
    /// After this returns `Ok`, no session, group entry, multicast
    /// membership, or access rule referencing `index` remains. A failure in
    /// one cascade step is logged and cleanup continues for the rest.
    pub fn remove_fabric(&self, index: FabricIndex) -> WeftResult<()> {
        {
            let mut fabrics = self.fabrics.write();
            if fabrics.remove(&index).is_none() {
                return Err(WeftError::not_found(format!("fabric {index} not in table")));
            }
        }

        if let Err(err) = self.storage.delete(&fabric_key(index)) {
            warn!(%index, %err, "failed to delete fabric record from storage");
        }

        let steps: Vec<Arc<dyn FabricRemovalStep>> = self.removal_steps.read().clone();
        for step in steps {
            if let Err(err) = step.fabric_removed(index) {
                warn!(%index, step = step.name(), %err, "fabric removal cascade step failed");
            }
        }

        info!(%index, "fabric removed, cascade complete");
        Ok(())
    }

    /// Look up a committed fabric by index
    pub fn fabric(&self, index: FabricIndex) -> Option<FabricInfo> {
        self.fabrics.read().get(&index).cloned()
    }

    /// Indices of all committed fabrics, ascending
    pub fn fabric_indices(&self) -> Vec<FabricIndex> {
        self.fabrics.read().keys().copied().collect()
    }

    /// Number of committed fabrics
    pub fn fabric_count(&self) -> usize {
        self.fabrics.read().len()
    }

    /// Remove every committed fabric, cascading each removal. Used by
    /// factory reset.
    pub fn wipe(&self) -> WeftResult<()> {
        for index in self.fabric_indices() {
            self.remove_fabric(index)?;
        }
        Ok(())
    }
}
