//! Weft command interaction
//!
//! The generic secure command-invocation mechanism: command path
//! addressing, peer status codes, and the dispatcher that serializes a
//! typed request, drives it over an exchange on a secure session, and
//! resolves a single typed outcome per invocation.

#![forbid(unsafe_code)]

pub mod dispatcher;
pub mod path;
pub mod status;

pub use dispatcher::{
    CommandDispatcher, CommandError, InvocationTransport, DEFAULT_INVOKE_TIMEOUT,
};
pub use path::CommandPath;
pub use status::StatusCode;
