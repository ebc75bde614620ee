//! Weft core types
//!
//! Shared foundation for the Weft control plane: identifier newtypes, the
//! unified `WeftError` type, the persistent key-value storage boundary, and
//! the context-tagged TLV wire codec. Every other crate in the workspace
//! builds on these; nothing here depends on a subsystem.

#![forbid(unsafe_code)]

pub mod error;
pub mod ids;
pub mod storage;
pub mod tlv;

pub use error::{WeftError, WeftResult};
pub use ids::{
    ClusterId, CommandId, EndpointId, ExchangeId, FabricIndex, GroupId, KeysetId, NodeId,
};
pub use storage::{MemoryStorage, StorageDelegate};
pub use tlv::{TlvDecode, TlvEncode, TlvReader, TlvWriter};
