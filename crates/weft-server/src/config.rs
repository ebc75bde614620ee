//! Server configuration
//!
//! Injected resources and recognized options for server initialization.
//! The server does not own the injected delegates' storage; each must be
//! initialized before `Server::init` and remain valid until after
//! `Server::shutdown`. Missing a required delegate is a fatal
//! initialization error.

use std::sync::Arc;
use std::time::Duration;

use weft_access::AccessControl;
use weft_commissioning::WindowState;
use weft_core::StorageDelegate;
use weft_fabric::DEFAULT_MAX_FABRICS;
use weft_groups::GroupDataProvider;
use weft_interaction::DEFAULT_INVOKE_TIMEOUT;
use weft_session::{AddressResolver, HandshakeDriver};
use weft_transport::RawTransport;

/// Default port for operational service traffic
pub const DEFAULT_OPERATIONAL_PORT: u16 = 5540;
/// Default port for commissioning traffic
pub const DEFAULT_COMMISSIONING_PORT: u16 = 5550;
/// Default number of concurrent session-establishment slots
pub const DEFAULT_ESTABLISHMENT_SLOTS: usize = 4;

/// Optional application lifecycle hooks
pub trait AppDelegate: Send + Sync {
    /// Server initialization completed
    fn on_server_initialized(&self) {}

    /// Shutdown was dispatched; the event loop stops after this returns
    fn on_shutdown_dispatched(&self) {}

    /// The commissioning window changed state
    fn on_commissioning_window_changed(&self, _state: WindowState) {}
}

/// Initialization parameters for [`crate::Server`]
#[derive(Default)]
pub struct ServerConfig {
    /// Port for operational service traffic
    pub operational_port: Option<u16>,
    /// Port for commissioning traffic
    pub commissioning_port: Option<u16>,
    /// Network interface to bind, or the default when `None`
    pub interface: Option<String>,
    /// Fabric table capacity
    pub max_fabrics: Option<u8>,
    /// Session establishment pool capacity
    pub establishment_slots: Option<usize>,
    /// Interaction deadline for command invocations
    pub invoke_timeout: Option<Duration>,

    /// Persistent storage delegate (required)
    pub storage: Option<Arc<dyn StorageDelegate>>,
    /// Group data provider (required)
    pub group_data: Option<Arc<GroupDataProvider>>,
    /// Access control delegate (required)
    pub access: Option<Arc<AccessControl>>,
    /// Raw media transport (required)
    pub raw_transport: Option<Arc<dyn RawTransport>>,
    /// Operational address resolution (required)
    pub resolver: Option<Arc<dyn AddressResolver>>,
    /// Session establishment handshake driver (required)
    pub handshake: Option<Arc<dyn HandshakeDriver>>,
    /// Application delegate (optional lifecycle hooks)
    pub app_delegate: Option<Arc<dyn AppDelegate>>,
}

impl ServerConfig {
    /// Start from defaults; required delegates still need to be injected
    pub fn new() -> Self {
        Self::default()
    }

    /// Effective operational port
    pub fn operational_port(&self) -> u16 {
        self.operational_port.unwrap_or(DEFAULT_OPERATIONAL_PORT)
    }

    /// Effective commissioning port
    pub fn commissioning_port(&self) -> u16 {
        self.commissioning_port.unwrap_or(DEFAULT_COMMISSIONING_PORT)
    }

    /// Effective fabric table capacity
    pub fn max_fabrics(&self) -> u8 {
        self.max_fabrics.unwrap_or(DEFAULT_MAX_FABRICS)
    }

    /// Effective establishment pool capacity
    pub fn establishment_slots(&self) -> usize {
        self.establishment_slots
            .unwrap_or(DEFAULT_ESTABLISHMENT_SLOTS)
    }

    /// Effective invocation deadline
    pub fn invoke_timeout(&self) -> Duration {
        self.invoke_timeout.unwrap_or(DEFAULT_INVOKE_TIMEOUT)
    }
}
