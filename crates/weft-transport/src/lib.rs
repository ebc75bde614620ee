//! Weft transport layer
//!
//! Dispatch of encrypted datagrams over an injected raw media driver, and
//! multicast membership management for fabric-scoped groups. Raw framing
//! (UDP sockets, BLE) lives behind the [`RawTransport`] trait and is out of
//! scope for the control plane.

#![forbid(unsafe_code)]

pub mod manager;
pub mod multicast;

pub use manager::{RawTransport, TransportManager};
pub use multicast::group_multicast_address;
