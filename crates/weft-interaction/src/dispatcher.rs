//! Command invocation dispatcher
//!
//! Generic request/response invocation over an established secure session:
//! serialize the typed request, open an exchange, send, and resolve a
//! single tagged outcome. The pending record is *removed* before any
//! outcome is delivered, so exactly-once resolution is structural — a
//! response racing a timeout can fire at most one of the two.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use weft_core::{
    ExchangeId, FabricIndex, TlvDecode, TlvEncode, TlvReader, TlvWriter, WeftError, WeftResult,
};
use weft_session::SecureSession;

use crate::path::CommandPath;
use crate::status::StatusCode;

/// Default interaction deadline for one invocation
pub const DEFAULT_INVOKE_TIMEOUT: Duration = Duration::from_secs(10);

// Frame tags appended after the path header (tags 0..=4). The exchange id
// rides in the frame so the peer can echo it on the response path.
const TAG_COUNTER: u8 = 5;
const TAG_PAYLOAD: u8 = 6;
const TAG_EXCHANGE: u8 = 7;

/// Failure outcome of one command invocation
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// The peer answered with an error status
    #[error("peer returned status {0:?}")]
    Status(StatusCode),
    /// No response within the interaction deadline
    #[error("invocation timed out")]
    Timeout,
    /// The exchange closed (or its fabric was removed) before a response
    #[error("invocation cancelled")]
    Cancelled,
    /// The request could not be sent
    #[error("transport failure: {0}")]
    Transport(WeftError),
    /// Request encoding or response decoding failed
    #[error("codec failure: {0}")]
    Codec(WeftError),
}

impl CommandError {
    /// Translate into the unified error taxonomy
    pub fn to_weft_error(&self) -> WeftError {
        match self {
            Self::Status(status) => status.to_error(),
            Self::Timeout => WeftError::timeout("command invocation"),
            Self::Cancelled => WeftError::cancelled("command invocation"),
            Self::Transport(err) | Self::Codec(err) => err.clone(),
        }
    }
}

/// Sends a framed command over a secure session.
///
/// The server wires this to the transport manager; tests substitute a
/// recording implementation.
#[async_trait]
pub trait InvocationTransport: Send + Sync {
    /// Dispatch one encrypted command frame on an exchange
    async fn send_command(
        &self,
        session: &SecureSession,
        exchange_id: ExchangeId,
        frame: &[u8],
    ) -> WeftResult<()>;
}

type Outcome = Result<Vec<u8>, CommandError>;

struct PendingInvocation {
    fabric_index: FabricIndex,
    resolver: oneshot::Sender<Outcome>,
}

/// Tracks in-flight invocations and resolves each exactly once
pub struct CommandDispatcher {
    transport: Arc<dyn InvocationTransport>,
    pending: Mutex<HashMap<ExchangeId, PendingInvocation>>,
    next_exchange: AtomicU32,
    timeout: Duration,
}

impl CommandDispatcher {
    /// Create a dispatcher over the given command transport
    pub fn new(transport: Arc<dyn InvocationTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            pending: Mutex::new(HashMap::new()),
            next_exchange: AtomicU32::new(1),
            timeout,
        }
    }

    /// Invoke a typed command on `session` and await its typed response.
    ///
    /// The request's fields are serialized with sequential context tags
    /// starting at zero, in declaration order. Exactly one outcome is
    /// produced: a decoded response or a single `CommandError`.
    pub async fn invoke<Req, Resp>(
        &self,
        session: &Arc<SecureSession>,
        path: CommandPath,
        request: &Req,
    ) -> Result<Resp, CommandError>
    where
        Req: TlvEncode,
        Resp: TlvDecode,
    {
        let mut body = TlvWriter::new();
        request.encode(&mut body).map_err(CommandError::Codec)?;

        let exchange_id = ExchangeId(self.next_exchange.fetch_add(1, Ordering::Relaxed));
        let mut frame = TlvWriter::new();
        path.encode(&mut frame);
        frame.put_u32(TAG_COUNTER, session.counters.next_send());
        frame
            .put_octets(TAG_PAYLOAD, &body.into_bytes())
            .map_err(CommandError::Codec)?;
        frame.put_u32(TAG_EXCHANGE, exchange_id.0);
        let (tx, mut rx) = oneshot::channel();
        self.pending.lock().insert(
            exchange_id,
            PendingInvocation {
                fabric_index: session.fabric_index,
                resolver: tx,
            },
        );
        debug!(
            %exchange_id,
            peer = %session.peer,
            cluster = ?path.cluster_id,
            command = ?path.command_id,
            "command invocation opened"
        );

        if let Err(err) = self
            .transport
            .send_command(session, exchange_id, &frame.into_bytes())
            .await
        {
            self.retire(exchange_id);
            return Err(CommandError::Transport(err));
        }

        let outcome = tokio::select! {
            received = &mut rx => match received {
                Ok(outcome) => outcome,
                Err(_) => Err(CommandError::Cancelled),
            },
            () = tokio::time::sleep(self.timeout) => {
                if self.retire(exchange_id).is_some() {
                    Err(CommandError::Timeout)
                } else {
                    // A resolver won the race right at the deadline; its
                    // outcome is already in the channel.
                    match rx.try_recv() {
                        Ok(outcome) => outcome,
                        Err(_) => Err(CommandError::Cancelled),
                    }
                }
            }
        };

        let bytes = outcome?;
        let mut reader = TlvReader::new(&bytes);
        Resp::decode(&mut reader).map_err(CommandError::Codec)
    }

    fn retire(&self, exchange_id: ExchangeId) -> Option<PendingInvocation> {
        self.pending.lock().remove(&exchange_id)
    }

    fn resolve(&self, exchange_id: ExchangeId, outcome: Outcome) -> bool {
        match self.retire(exchange_id) {
            Some(invocation) => {
                let _ = invocation.resolver.send(outcome);
                true
            }
            None => {
                debug!(%exchange_id, "outcome for already-resolved invocation dropped");
                false
            }
        }
    }

    /// A well-formed response payload arrived for `exchange_id`.
    ///
    /// Returns whether the invocation was still pending; a late response
    /// after timeout or closure is dropped.
    pub fn on_response(&self, exchange_id: ExchangeId, payload: Vec<u8>) -> bool {
        self.resolve(exchange_id, Ok(payload))
    }

    /// An error status arrived for `exchange_id`
    pub fn on_status(&self, exchange_id: ExchangeId, status: StatusCode) -> bool {
        self.resolve(exchange_id, Err(CommandError::Status(status)))
    }

    /// The exchange closed before any response arrived
    pub fn on_exchange_closed(&self, exchange_id: ExchangeId) -> bool {
        self.resolve(exchange_id, Err(CommandError::Cancelled))
    }

    /// Cancel every pending invocation scoped to a removed fabric
    pub fn fabric_removed(&self, fabric_index: FabricIndex) {
        let doomed: Vec<(ExchangeId, PendingInvocation)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<ExchangeId> = pending
                .iter()
                .filter(|(_, inv)| inv.fabric_index == fabric_index)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|inv| (id, inv)))
                .collect()
        };

        for (exchange_id, invocation) in doomed {
            warn!(%exchange_id, %fabric_index, "invocation cancelled by fabric removal");
            let _ = invocation.resolver.send(Err(CommandError::Cancelled));
        }
    }

    /// Number of in-flight invocations
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::{ClusterId, CommandId, EndpointId, NodeId};
    use weft_session::{SessionKeys, SessionMode};

    fn fabric(raw: u8) -> FabricIndex {
        FabricIndex::new(raw).unwrap()
    }

    fn session() -> Arc<SecureSession> {
        Arc::new(SecureSession::new(
            NodeId(0x1122),
            fabric(1),
            SessionMode::Operational,
            SessionKeys {
                i2r: [3; 16],
                r2i: [4; 16],
            },
            "[::1]:5540".parse().unwrap(),
        ))
    }

    fn test_path() -> CommandPath {
        CommandPath::unicast(EndpointId(1), ClusterId(6), CommandId(2))
    }

    #[derive(Debug, PartialEq)]
    struct MoveToLevel {
        level: u16,
        transition: Vec<u8>,
    }

    impl TlvEncode for MoveToLevel {
        fn encode(&self, writer: &mut TlvWriter) -> WeftResult<()> {
            writer.put_u16(0, self.level);
            writer.put_octets(1, &self.transition)
        }
    }

    #[derive(Debug, PartialEq)]
    struct MoveToLevelResponse {
        status: u8,
        remaining: u16,
    }

    impl TlvDecode for MoveToLevelResponse {
        fn decode(reader: &mut TlvReader<'_>) -> WeftResult<Self> {
            Ok(Self {
                status: reader.read_u8(0)?,
                remaining: reader.read_u16(1)?,
            })
        }
    }

    /// Records sent frames so tests can resolve exchanges by hand
    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<(ExchangeId, Vec<u8>)>>,
    }

    impl RecordingTransport {
        fn last_exchange(&self) -> ExchangeId {
            self.sent.lock().last().expect("a frame was sent").0
        }
    }

    #[async_trait]
    impl InvocationTransport for RecordingTransport {
        async fn send_command(
            &self,
            _session: &SecureSession,
            exchange_id: ExchangeId,
            frame: &[u8],
        ) -> WeftResult<()> {
            self.sent.lock().push((exchange_id, frame.to_vec()));
            Ok(())
        }
    }

    struct BrokenTransport;

    #[async_trait]
    impl InvocationTransport for BrokenTransport {
        async fn send_command(
            &self,
            _session: &SecureSession,
            _exchange_id: ExchangeId,
            _frame: &[u8],
        ) -> WeftResult<()> {
            Err(WeftError::transport("link down"))
        }
    }

    fn encoded_response(status: u8, remaining: u16) -> Vec<u8> {
        let mut writer = TlvWriter::new();
        writer.put_u8(0, status);
        writer.put_u16(1, remaining);
        writer.into_bytes()
    }

    #[tokio::test]
    async fn response_resolves_the_typed_invocation() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(CommandDispatcher::new(
            transport.clone(),
            DEFAULT_INVOKE_TIMEOUT,
        ));
        let session = session();

        let task = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let session = session.clone();
            async move {
                dispatcher
                    .invoke::<_, MoveToLevelResponse>(
                        &session,
                        test_path(),
                        &MoveToLevel {
                            level: 7,
                            transition: b"xy".to_vec(),
                        },
                    )
                    .await
            }
        });
        tokio::task::yield_now().await;

        let exchange_id = transport.last_exchange();
        assert!(dispatcher.on_response(exchange_id, encoded_response(0, 120)));

        let response = task.await.unwrap().unwrap();
        assert_eq!(
            response,
            MoveToLevelResponse {
                status: 0,
                remaining: 120
            }
        );
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn request_frame_carries_path_counter_and_payload() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(CommandDispatcher::new(
            transport.clone(),
            DEFAULT_INVOKE_TIMEOUT,
        ));
        let session = session();

        let task = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let session = session.clone();
            async move {
                dispatcher
                    .invoke::<_, MoveToLevelResponse>(
                        &session,
                        test_path(),
                        &MoveToLevel {
                            level: 7,
                            transition: b"xy".to_vec(),
                        },
                    )
                    .await
            }
        });
        tokio::task::yield_now().await;

        let (exchange_id, frame) = transport.sent.lock().last().cloned().unwrap();
        let mut reader = TlvReader::new(&frame);
        let path = CommandPath::decode(&mut reader).unwrap();
        assert_eq!(path, test_path());
        assert_eq!(reader.read_u32(TAG_COUNTER).unwrap(), 0);

        // The payload embeds the request fields at tags 0 and 1.
        let payload = reader.read_octets(TAG_PAYLOAD).unwrap();
        let mut body = TlvReader::new(&payload);
        assert_eq!(body.read_u16(0).unwrap(), 7);
        assert_eq!(body.read_octets(1).unwrap(), b"xy".to_vec());
        assert_eq!(reader.read_u32(TAG_EXCHANGE).unwrap(), exchange_id.0);

        dispatcher.on_response(exchange_id, encoded_response(0, 0));
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn second_outcome_is_dropped() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(CommandDispatcher::new(
            transport.clone(),
            DEFAULT_INVOKE_TIMEOUT,
        ));
        let session = session();

        let task = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let session = session.clone();
            async move {
                dispatcher
                    .invoke::<_, MoveToLevelResponse>(
                        &session,
                        test_path(),
                        &MoveToLevel {
                            level: 1,
                            transition: Vec::new(),
                        },
                    )
                    .await
            }
        });
        tokio::task::yield_now().await;

        let exchange_id = transport.last_exchange();
        assert!(dispatcher.on_status(exchange_id, StatusCode::Busy));
        assert!(!dispatcher.on_response(exchange_id, encoded_response(0, 0)));
        assert!(!dispatcher.on_exchange_closed(exchange_id));

        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CommandError::Status(StatusCode::Busy)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_once_and_late_response_is_dropped() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(CommandDispatcher::new(
            transport.clone(),
            Duration::from_secs(5),
        ));
        let session = session();

        let task = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let session = session.clone();
            async move {
                dispatcher
                    .invoke::<_, MoveToLevelResponse>(
                        &session,
                        test_path(),
                        &MoveToLevel {
                            level: 1,
                            transition: Vec::new(),
                        },
                    )
                    .await
            }
        });
        tokio::task::yield_now().await;
        let exchange_id = transport.last_exchange();

        tokio::time::sleep(Duration::from_secs(6)).await;
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CommandError::Timeout));

        assert!(!dispatcher.on_response(exchange_id, encoded_response(0, 0)));
    }

    #[tokio::test]
    async fn exchange_closure_cancels_the_invocation() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(CommandDispatcher::new(
            transport.clone(),
            DEFAULT_INVOKE_TIMEOUT,
        ));
        let session = session();

        let task = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let session = session.clone();
            async move {
                dispatcher
                    .invoke::<_, MoveToLevelResponse>(
                        &session,
                        test_path(),
                        &MoveToLevel {
                            level: 1,
                            transition: Vec::new(),
                        },
                    )
                    .await
            }
        });
        tokio::task::yield_now().await;

        assert!(dispatcher.on_exchange_closed(transport.last_exchange()));
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CommandError::Cancelled));
    }

    #[tokio::test]
    async fn fabric_removal_cancels_scoped_invocations() {
        let transport = Arc::new(RecordingTransport::default());
        let dispatcher = Arc::new(CommandDispatcher::new(
            transport.clone(),
            DEFAULT_INVOKE_TIMEOUT,
        ));
        let session = session();

        let task = tokio::spawn({
            let dispatcher = dispatcher.clone();
            let session = session.clone();
            async move {
                dispatcher
                    .invoke::<_, MoveToLevelResponse>(
                        &session,
                        test_path(),
                        &MoveToLevel {
                            level: 1,
                            transition: Vec::new(),
                        },
                    )
                    .await
            }
        });
        tokio::task::yield_now().await;
        assert_eq!(dispatcher.pending_count(), 1);

        dispatcher.fabric_removed(fabric(1));
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, CommandError::Cancelled));
        assert_eq!(dispatcher.pending_count(), 0);
    }

    #[tokio::test]
    async fn send_failure_surfaces_transport_error_and_retires() {
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(BrokenTransport),
            DEFAULT_INVOKE_TIMEOUT,
        ));
        let session = session();

        let err = dispatcher
            .invoke::<_, MoveToLevelResponse>(
                &session,
                test_path(),
                &MoveToLevel {
                    level: 1,
                    transition: Vec::new(),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::Transport(_)));
        assert_eq!(dispatcher.pending_count(), 0);
    }
}
