//! Server orchestrator
//!
//! Aggregates every control-plane subsystem from externally injected
//! resources and owns their wiring and lifecycle. Construction order:
//! transport, sessions, fabric table, group data provider, listeners,
//! commissioning window. The server is an explicit object constructed once
//! at startup and passed by handle; there is no global instance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use weft_access::{AccessControl, Privilege};
use weft_commissioning::{
    AdvertisementSink, CommissioningWindowManager, WindowState, WindowVariant,
};
use weft_core::{
    ExchangeId, FabricIndex, NodeId, StorageDelegate, TlvDecode, TlvEncode, WeftError, WeftResult,
};
use weft_fabric::FabricTable;
use weft_groups::GroupDataProvider;
use weft_interaction::{
    CommandDispatcher, CommandError, CommandPath, InvocationTransport, StatusCode,
};
use weft_session::{EstablishmentPool, SecureSession, SessionManager};
use weft_transport::TransportManager;

use crate::cleanup::{AccessCleanup, GroupCleanup, SessionCleanup};
use crate::config::{AppDelegate, ServerConfig};
use crate::listener::MulticastGroupListener;

/// Sends command frames over the transport manager to the session's peer
struct SessionCommandTransport {
    transport: Arc<TransportManager>,
}

#[async_trait]
impl InvocationTransport for SessionCommandTransport {
    async fn send_command(
        &self,
        session: &SecureSession,
        _exchange_id: ExchangeId,
        frame: &[u8],
    ) -> WeftResult<()> {
        self.transport
            .send_datagram(session.peer_address, frame)
            .await
    }
}

/// Forwards window transitions to the optional application delegate
struct WindowDelegateBridge {
    app_delegate: Option<Arc<dyn AppDelegate>>,
}

impl AdvertisementSink for WindowDelegateBridge {
    fn window_changed(&self, state: WindowState) {
        info!(?state, "advertising commissioning window state");
        if let Some(delegate) = self.app_delegate.as_ref() {
            delegate.on_commissioning_window_changed(state);
        }
    }
}

/// Top-level aggregate of the node-local control plane
pub struct Server {
    operational_port: u16,
    commissioning_port: u16,
    interface: Option<String>,

    storage: Arc<dyn StorageDelegate>,
    transport: Arc<TransportManager>,
    sessions: Arc<SessionManager>,
    pool: Arc<EstablishmentPool>,
    fabrics: Arc<FabricTable>,
    groups: Arc<GroupDataProvider>,
    access: Arc<AccessControl>,
    commissioning: Arc<CommissioningWindowManager>,
    dispatcher: Arc<CommandDispatcher>,
    app_delegate: Option<Arc<dyn AppDelegate>>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("operational_port", &self.operational_port)
            .field("commissioning_port", &self.commissioning_port)
            .field("interface", &self.interface)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Initialize the control plane from injected resources.
    ///
    /// Fails fast with `InvalidArgument` when a required delegate is
    /// missing; nothing is partially constructed in that case. Previously
    /// committed fabrics and groups reload from storage, and multicast
    /// membership is re-established for every reloaded group.
    pub fn init(config: ServerConfig) -> WeftResult<Self> {
        let storage = config
            .storage
            .clone()
            .ok_or_else(|| WeftError::invalid_argument("persistent storage delegate is required"))?;
        let groups = config
            .group_data
            .clone()
            .ok_or_else(|| WeftError::invalid_argument("group data provider is required"))?;
        let access = config
            .access
            .clone()
            .ok_or_else(|| WeftError::invalid_argument("access control delegate is required"))?;
        let raw_transport = config
            .raw_transport
            .clone()
            .ok_or_else(|| WeftError::invalid_argument("raw transport is required"))?;
        let resolver = config
            .resolver
            .clone()
            .ok_or_else(|| WeftError::invalid_argument("address resolver is required"))?;
        let handshake = config
            .handshake
            .clone()
            .ok_or_else(|| WeftError::invalid_argument("handshake driver is required"))?;

        let transport = Arc::new(TransportManager::new(raw_transport));
        let sessions = Arc::new(SessionManager::new());
        let pool = Arc::new(EstablishmentPool::new(
            config.establishment_slots(),
            sessions.clone(),
            resolver,
            handshake,
        ));
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(SessionCommandTransport {
                transport: transport.clone(),
            }),
            config.invoke_timeout(),
        ));

        let fabrics = Arc::new(FabricTable::new(storage.clone(), config.max_fabrics())?);
        fabrics.register_removal_step(Arc::new(SessionCleanup {
            sessions: sessions.clone(),
            pool: pool.clone(),
            dispatcher: dispatcher.clone(),
        }));
        fabrics.register_removal_step(Arc::new(GroupCleanup {
            groups: groups.clone(),
        }));
        fabrics.register_removal_step(Arc::new(AccessCleanup {
            access: access.clone(),
        }));

        groups.set_listener(Arc::new(MulticastGroupListener::new(transport.clone())));

        let commissioning = Arc::new(CommissioningWindowManager::new());
        commissioning.set_advertisement_sink(Arc::new(WindowDelegateBridge {
            app_delegate: config.app_delegate.clone(),
        }));

        let server = Self {
            operational_port: config.operational_port(),
            commissioning_port: config.commissioning_port(),
            interface: config.interface.clone(),
            storage,
            transport,
            sessions,
            pool,
            fabrics,
            groups,
            access,
            commissioning,
            dispatcher,
            app_delegate: config.app_delegate,
        };

        server.rejoin_existing_multicast_groups();

        info!(
            operational_port = server.operational_port,
            commissioning_port = server.commissioning_port,
            interface = server.interface.as_deref().unwrap_or("default"),
            fabrics = server.fabrics.fabric_count(),
            "server initialized"
        );
        if let Some(delegate) = server.app_delegate.as_ref() {
            delegate.on_server_initialized();
        }
        Ok(server)
    }

    /// Re-issue multicast joins for every group found in the provider.
    ///
    /// Run at init so groups committed before a restart regain socket
    /// membership; join failures are logged and retried on the next init.
    pub fn rejoin_existing_multicast_groups(&self) {
        for group in self.groups.all_groups() {
            if let Err(err) = self
                .transport
                .multicast_join(group.fabric_index, group.group_id)
            {
                warn!(
                    fabric = %group.fabric_index,
                    group = %group.group_id,
                    %err,
                    "unable to rejoin multicast group"
                );
            }
        }
    }

    /// Obtain a live session to `(peer, fabric_index)`, establishing one if
    /// necessary
    pub async fn establish_session(
        &self,
        peer: NodeId,
        fabric_index: FabricIndex,
    ) -> WeftResult<Arc<SecureSession>> {
        self.pool.establish(peer, fabric_index).await
    }

    /// Invoke a typed command on a peer over an established (or newly
    /// established) secure session
    pub async fn invoke_command<Req, Resp>(
        &self,
        peer: NodeId,
        fabric_index: FabricIndex,
        path: CommandPath,
        request: &Req,
    ) -> Result<Resp, CommandError>
    where
        Req: TlvEncode,
        Resp: TlvDecode,
    {
        let session = self
            .establish_session(peer, fabric_index)
            .await
            .map_err(CommandError::Transport)?;
        self.dispatcher.invoke(&session, path, request).await
    }

    /// Whether `subject` may invoke `path` under `fabric_index`
    pub fn authorize_invoke(
        &self,
        fabric_index: FabricIndex,
        subject: NodeId,
        path: &CommandPath,
    ) -> bool {
        self.access.check(
            fabric_index,
            subject,
            path.cluster_id,
            path.endpoint_id,
            Privilege::Operate,
        )
    }

    /// Deliver a response payload for a pending invocation
    pub fn handle_command_response(&self, exchange_id: ExchangeId, payload: Vec<u8>) -> bool {
        self.dispatcher.on_response(exchange_id, payload)
    }

    /// Deliver an error status for a pending invocation
    pub fn handle_command_status(&self, exchange_id: ExchangeId, status: StatusCode) -> bool {
        self.dispatcher.on_status(exchange_id, status)
    }

    /// An exchange closed with its invocation unresolved
    pub fn handle_exchange_closed(&self, exchange_id: ExchangeId) -> bool {
        self.dispatcher.on_exchange_closed(exchange_id)
    }

    /// Open the commissioning window for `duration`
    pub fn open_commissioning_window(
        &self,
        duration: Duration,
        variant: WindowVariant,
    ) -> WeftResult<()> {
        self.commissioning.open_window(duration, variant)
    }

    /// Close the commissioning window
    pub fn close_commissioning_window(&self) {
        self.commissioning.close_window();
    }

    /// A commissioner completed establishment; the window is single-use
    pub fn commissioning_complete(&self) -> WeftResult<()> {
        self.commissioning.commissioning_succeeded()
    }

    /// A commissioner's handshake failed; the window stays open
    pub fn commissioning_failed(&self) {
        self.commissioning.commissioning_failed();
    }

    /// Fabric table handle
    pub fn fabric_table(&self) -> &Arc<FabricTable> {
        &self.fabrics
    }

    /// Session manager handle
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Group data provider handle
    pub fn group_data_provider(&self) -> &Arc<GroupDataProvider> {
        &self.groups
    }

    /// Access control handle
    pub fn access_control(&self) -> &Arc<AccessControl> {
        &self.access
    }

    /// Transport manager handle
    pub fn transport_manager(&self) -> &Arc<TransportManager> {
        &self.transport
    }

    /// Commissioning window manager handle
    pub fn commissioning_window(&self) -> &Arc<CommissioningWindowManager> {
        &self.commissioning
    }

    /// Command dispatcher handle
    pub fn command_dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    /// Persistent storage handle
    pub fn persistent_storage(&self) -> &Arc<dyn StorageDelegate> {
        &self.storage
    }

    /// Dispatch the shutdown event and tear down runtime state.
    ///
    /// Injected delegates remain owned by the caller and are finalized
    /// after this returns.
    pub fn shutdown(&self) {
        info!("server shutting down");
        self.commissioning.close_window();
        if let Some(delegate) = self.app_delegate.as_ref() {
            delegate.on_shutdown_dispatched();
        }
        let purged = self.sessions.session_count();
        for index in self.fabrics.fabric_indices() {
            self.sessions.fabric_removed(index);
        }
        info!(purged, "server shutdown complete");
    }

    /// Wipe all commissioned state: close the window, remove every fabric
    /// (cascading sessions, groups, multicast membership, and access
    /// rules), then dispatch the shutdown event.
    pub fn factory_reset(&self) -> WeftResult<()> {
        warn!("factory reset scheduled");
        self.commissioning.factory_reset();
        self.fabrics.wipe()?;
        if let Some(delegate) = self.app_delegate.as_ref() {
            delegate.on_shutdown_dispatched();
        }
        Ok(())
    }
}
