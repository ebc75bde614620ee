//! Core identifier newtypes
//!
//! Every subsystem keys its state by some subset of these identifiers, so
//! they live here rather than in any one subsystem crate.

use std::fmt;
use std::num::NonZeroU8;

use serde::{Deserialize, Serialize};

use crate::error::{WeftError, WeftResult};

/// Index of a fabric in the local fabric table.
///
/// Unique among active fabrics at all times; valid values are 1 through the
/// configured table capacity. Zero is reserved as "no fabric" on the wire,
/// hence the non-zero representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FabricIndex(NonZeroU8);

impl FabricIndex {
    /// Construct from a raw index, rejecting zero
    pub fn new(raw: u8) -> WeftResult<Self> {
        NonZeroU8::new(raw)
            .map(Self)
            .ok_or_else(|| WeftError::invalid_argument("fabric index 0 is reserved"))
    }

    /// Raw wire value
    pub fn raw(&self) -> u8 {
        self.0.get()
    }
}

impl fmt::Display for FabricIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operational node identifier, unique within one fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Multicast group identifier, scoped to one fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u16);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Reference to a group key set held by the group data provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeysetId(pub u16);

/// Endpoint addressing unit on a remote node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointId(pub u16);

/// Cluster addressing unit identifying a functional unit on an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterId(pub u32);

/// Command identifier within a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommandId(pub u32);

/// Identifier of one logical request/response exchange over a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExchangeId(pub u32);

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fabric_index_rejects_zero() {
        assert!(FabricIndex::new(0).is_err());
        assert_eq!(FabricIndex::new(1).map(|f| f.raw()), Ok(1));
        assert_eq!(FabricIndex::new(254).map(|f| f.raw()), Ok(254));
    }
}
