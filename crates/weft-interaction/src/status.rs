//! Interaction status codes
//!
//! Wire-level status values a peer returns for a command invocation, and
//! their translation into the local error taxonomy.

use weft_core::WeftError;

/// Status of a command invocation as reported by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// Command executed
    Success,
    /// Unspecified failure
    Failure,
    /// Subject lacks privilege for the target
    UnsupportedAccess,
    /// Command id unknown to the cluster
    InvalidCommand,
    /// Cluster not present on the endpoint
    UnsupportedCluster,
    /// Endpoint not present on the node
    UnsupportedEndpoint,
    /// Peer is temporarily unable to service the request
    Busy,
    /// Peer ran out of resources servicing the request
    ResourceExhausted,
}

impl StatusCode {
    /// Wire value
    pub fn to_wire(self) -> u8 {
        match self {
            Self::Success => 0x00,
            Self::Failure => 0x01,
            Self::UnsupportedAccess => 0x02,
            Self::InvalidCommand => 0x03,
            Self::UnsupportedCluster => 0x04,
            Self::UnsupportedEndpoint => 0x05,
            Self::Busy => 0x06,
            Self::ResourceExhausted => 0x07,
        }
    }

    /// Parse a wire value; unknown values collapse to `Failure`
    pub fn from_wire(raw: u8) -> Self {
        match raw {
            0x00 => Self::Success,
            0x02 => Self::UnsupportedAccess,
            0x03 => Self::InvalidCommand,
            0x04 => Self::UnsupportedCluster,
            0x05 => Self::UnsupportedEndpoint,
            0x06 => Self::Busy,
            0x07 => Self::ResourceExhausted,
            _ => Self::Failure,
        }
    }

    /// Translate into the local error taxonomy
    pub fn to_error(self) -> WeftError {
        match self {
            Self::Success => WeftError::incorrect_state("success status is not an error"),
            Self::Busy | Self::ResourceExhausted => {
                WeftError::resource_exhausted(format!("peer status {self:?}"))
            }
            Self::UnsupportedCluster | Self::UnsupportedEndpoint | Self::InvalidCommand => {
                WeftError::not_found(format!("peer status {self:?}"))
            }
            Self::UnsupportedAccess | Self::Failure => {
                WeftError::invalid_argument(format!("peer status {self:?}"))
            }
        }
    }
}
