//! Weft fabric table
//!
//! Management of the cryptographic fabric identities a node belongs to,
//! with persistence through the storage boundary and an explicit ordered
//! cleanup cascade on removal.

#![forbid(unsafe_code)]

pub mod table;

pub use table::{
    FabricIdentity, FabricInfo, FabricRemovalStep, FabricTable, FabricTableDelegate,
    DEFAULT_MAX_FABRICS,
};
