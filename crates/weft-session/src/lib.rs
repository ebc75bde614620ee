//! Weft secure sessions
//!
//! Active secure-channel state and its lifecycle: the session registry
//! keyed by (peer, fabric), replay-protected message counters, and the
//! bounded establishment pool that turns a (peer, fabric) target into a
//! live session via injected address resolution and handshake drivers.

#![forbid(unsafe_code)]

pub mod establish;
pub mod manager;
pub mod session;

pub use establish::{AddressResolver, EstablishmentPool, HandshakeDriver};
pub use manager::SessionManager;
pub use session::{MessageCounters, SecureSession, SessionKeys, SessionMode};
