//! Multicast address derivation
//!
//! Group traffic uses scoped IPv6 multicast addresses derived from the
//! (fabric index, group id) pair. The derivation is a pure function, so the
//! same pair always maps to the same address, and distinct active fabrics
//! (distinct indices) can never collide.

use std::net::Ipv6Addr;

use weft_core::{FabricIndex, GroupId};

/// Derive the scoped multicast address for a fabric-scoped group.
///
/// Layout: `ff35:0040:fd00::<fabric-index>:00<group-id>` — flags nibble 3
/// (transient, prefix-based), site-local scope, with the fabric index and
/// group id occupying the low bytes.
pub fn group_multicast_address(fabric_index: FabricIndex, group_id: GroupId) -> Ipv6Addr {
    let group = group_id.0.to_be_bytes();
    Ipv6Addr::from([
        0xff,
        0x35,
        0x00,
        0x40,
        0xfd,
        0x00,
        0x00,
        0x00,
        0x00,
        0x00,
        0x00,
        0x00,
        fabric_index.raw(),
        0x00,
        group[0],
        group[1],
    ])
}
