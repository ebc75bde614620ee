//! Weft server
//!
//! Top-level orchestrator for the node-local control plane: wires the
//! transport manager, session manager, fabric table, group data provider,
//! access control, commissioning window, and command dispatcher together
//! from externally injected resources, and owns init/shutdown/factory-reset
//! lifecycle. It does not own the injected delegates' storage.

#![forbid(unsafe_code)]

pub mod cleanup;
pub mod config;
pub mod listener;
pub mod server;

pub use config::{
    AppDelegate, ServerConfig, DEFAULT_COMMISSIONING_PORT, DEFAULT_ESTABLISHMENT_SLOTS,
    DEFAULT_OPERATIONAL_PORT,
};
pub use listener::MulticastGroupListener;
pub use server::Server;
