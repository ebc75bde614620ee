//! Session establishment pool
//!
//! A bounded set of establishment slots that drive mutual-authenticated
//! session setup: resolve the peer's operational address, run the opaque
//! handshake, insert the resulting session. Concurrent requests for the
//! same (peer, fabric) coalesce onto one in-flight attempt; every exit
//! path releases the acquired slot. Retry policy belongs to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use weft_core::{FabricIndex, NodeId, WeftError, WeftResult};

use crate::manager::SessionManager;
use crate::session::{SecureSession, SessionKeys, SessionMode};

/// Resolves a peer's operational network address within a fabric.
///
/// Backed by operational discovery (mDNS or similar) outside this crate.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Resolve `(peer, fabric_index)` to a reachable address
    async fn resolve(&self, peer: NodeId, fabric_index: FabricIndex) -> WeftResult<SocketAddr>;
}

/// Runs the mutual-authenticated establishment handshake.
///
/// The handshake cryptography is an opaque sub-protocol; this layer only
/// consumes the derived key material.
#[async_trait]
pub trait HandshakeDriver: Send + Sync {
    /// Perform the handshake with `peer` at `address` under `fabric_index`
    async fn establish(
        &self,
        peer: NodeId,
        fabric_index: FabricIndex,
        address: SocketAddr,
    ) -> WeftResult<SessionKeys>;
}

type SessionKey = (NodeId, FabricIndex);
type EstablishOutcome = WeftResult<Arc<SecureSession>>;

#[derive(Default)]
struct PoolState {
    slots_in_use: usize,
    // Presence of a key marks an in-flight attempt; the value holds the
    // coalesced waiters. A removed entry means the attempt was invalidated.
    pending: HashMap<SessionKey, Vec<oneshot::Sender<EstablishOutcome>>>,
}

/// Bounded pool of reusable establishment contexts
pub struct EstablishmentPool {
    capacity: usize,
    state: Mutex<PoolState>,
    sessions: Arc<SessionManager>,
    resolver: Arc<dyn AddressResolver>,
    handshake: Arc<dyn HandshakeDriver>,
}

impl EstablishmentPool {
    /// Create a pool with a fixed slot capacity
    pub fn new(
        capacity: usize,
        sessions: Arc<SessionManager>,
        resolver: Arc<dyn AddressResolver>,
        handshake: Arc<dyn HandshakeDriver>,
    ) -> Self {
        Self {
            capacity,
            state: Mutex::new(PoolState::default()),
            sessions,
            resolver,
            handshake,
        }
    }

    /// Obtain a live session to `(peer, fabric_index)`.
    ///
    /// Reuses an existing session when one is live; otherwise joins the
    /// in-flight attempt for the same key, or acquires a slot and drives a
    /// new attempt. Fails with `ResourceExhausted` when every slot is busy,
    /// and with `Cancelled` when the fabric is removed mid-attempt.
    pub async fn establish(
        self: &Arc<Self>,
        peer: NodeId,
        fabric_index: FabricIndex,
    ) -> EstablishOutcome {
        if let Some(existing) = self.sessions.find(peer, fabric_index) {
            debug!(%peer, fabric = %fabric_index, "reusing live session");
            return Ok(existing);
        }

        let key = (peer, fabric_index);
        let waiter = {
            let mut state = self.state.lock();
            if let Some(waiters) = state.pending.get_mut(&key) {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Some(rx)
            } else {
                if state.slots_in_use >= self.capacity {
                    return Err(WeftError::resource_exhausted(
                        "no free session establishment slots",
                    ));
                }
                state.slots_in_use += 1;
                state.pending.insert(key, Vec::new());
                None
            }
        };

        if let Some(rx) = waiter {
            debug!(%peer, fabric = %fabric_index, "coalescing onto in-flight establishment");
            return rx
                .await
                .map_err(|_| WeftError::cancelled("establishment attempt abandoned"))?;
        }

        let attempt = self.run_attempt(peer, fabric_index).await;
        self.resolve_attempt(key, attempt)
    }

    async fn run_attempt(
        &self,
        peer: NodeId,
        fabric_index: FabricIndex,
    ) -> WeftResult<Arc<SecureSession>> {
        let address = self.resolver.resolve(peer, fabric_index).await?;
        debug!(%peer, fabric = %fabric_index, %address, "peer address resolved");

        let keys = self.handshake.establish(peer, fabric_index, address).await?;
        Ok(Arc::new(SecureSession::new(
            peer,
            fabric_index,
            SessionMode::Operational,
            keys,
            address,
        )))
    }

    /// Release the slot, publish the outcome to coalesced waiters, and
    /// commit the session to the manager — unless the attempt was
    /// invalidated by fabric removal, in which case the session is dropped.
    fn resolve_attempt(&self, key: SessionKey, attempt: EstablishOutcome) -> EstablishOutcome {
        let (peer, fabric_index) = key;
        let waiters = {
            let mut state = self.state.lock();
            state.slots_in_use -= 1;
            state.pending.remove(&key)
        };

        let Some(waiters) = waiters else {
            info!(%peer, fabric = %fabric_index, "establishment invalidated by fabric removal");
            return Err(WeftError::cancelled(format!(
                "fabric {fabric_index} removed during establishment"
            )));
        };

        let outcome = match attempt {
            Ok(session) => match self.sessions.insert(session.clone()) {
                Ok(()) => {
                    info!(%peer, fabric = %fabric_index, "session established");
                    Ok(session)
                }
                // A session for this key landed through another path while
                // the handshake ran; honor the at-most-one invariant.
                Err(_) => self.sessions.find(peer, fabric_index).ok_or_else(|| {
                    WeftError::incorrect_state("racing session vanished before reuse")
                }),
            },
            Err(err) => {
                warn!(%peer, fabric = %fabric_index, %err, "session establishment failed");
                Err(err)
            }
        };

        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }
        outcome
    }

    /// Invalidate every in-flight attempt scoped to a removed fabric.
    ///
    /// Coalesced waiters resolve immediately with `Cancelled`; the driving
    /// task observes the invalidation when its handshake completes and
    /// discards the result without inserting a session.
    pub fn fabric_removed(&self, fabric_index: FabricIndex) {
        let mut state = self.state.lock();
        let doomed: Vec<SessionKey> = state
            .pending
            .keys()
            .filter(|(_, fabric)| *fabric == fabric_index)
            .copied()
            .collect();

        for key in doomed {
            if let Some(waiters) = state.pending.remove(&key) {
                for tx in waiters {
                    let _ = tx.send(Err(WeftError::cancelled(format!(
                        "fabric {fabric_index} removed during establishment"
                    ))));
                }
            }
        }
    }

    /// Number of establishment slots currently in use
    pub fn slots_in_use(&self) -> usize {
        self.state.lock().slots_in_use
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn fabric(raw: u8) -> FabricIndex {
        FabricIndex::new(raw).unwrap()
    }

    struct FixedResolver;

    #[async_trait]
    impl AddressResolver for FixedResolver {
        async fn resolve(&self, peer: NodeId, _fabric: FabricIndex) -> WeftResult<SocketAddr> {
            Ok(format!("[::1]:{}", 5540 + (peer.0 % 100) as u16)
                .parse()
                .map_err(|_| WeftError::transport("bad address"))?)
        }
    }

    struct FailingResolver;

    #[async_trait]
    impl AddressResolver for FailingResolver {
        async fn resolve(&self, peer: NodeId, _fabric: FabricIndex) -> WeftResult<SocketAddr> {
            Err(WeftError::not_found(format!("peer {peer} not discoverable")))
        }
    }

    /// Handshake driver that blocks until released, counting attempts
    struct GatedHandshake {
        attempts: AtomicUsize,
        gate: Notify,
        gated: bool,
    }

    impl GatedHandshake {
        fn new(gated: bool) -> Self {
            Self {
                attempts: AtomicUsize::new(0),
                gate: Notify::new(),
                gated,
            }
        }
    }

    #[async_trait]
    impl HandshakeDriver for GatedHandshake {
        async fn establish(
            &self,
            _peer: NodeId,
            _fabric: FabricIndex,
            _address: SocketAddr,
        ) -> WeftResult<SessionKeys> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.gated {
                self.gate.notified().await;
            }
            Ok(SessionKeys {
                i2r: [7; 16],
                r2i: [8; 16],
            })
        }
    }

    fn pool_with(
        capacity: usize,
        handshake: Arc<GatedHandshake>,
    ) -> (Arc<EstablishmentPool>, Arc<SessionManager>) {
        let sessions = Arc::new(SessionManager::new());
        let pool = Arc::new(EstablishmentPool::new(
            capacity,
            sessions.clone(),
            Arc::new(FixedResolver),
            handshake,
        ));
        (pool, sessions)
    }

    #[tokio::test]
    async fn live_session_is_reused_without_handshake() {
        let handshake = Arc::new(GatedHandshake::new(false));
        let (pool, _) = pool_with(2, handshake.clone());

        let first = pool.establish(NodeId(1), fabric(1)).await.unwrap();
        let second = pool.establish(NodeId(1), fabric(1)).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(handshake.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_requests_coalesce_onto_one_handshake() {
        let handshake = Arc::new(GatedHandshake::new(true));
        let (pool, _) = pool_with(2, handshake.clone());

        let a = tokio::spawn({
            let pool = pool.clone();
            async move { pool.establish(NodeId(1), fabric(1)).await }
        });
        let b = tokio::spawn({
            let pool = pool.clone();
            async move { pool.establish(NodeId(1), fabric(1)).await }
        });

        // Let both requests reach the pool before releasing the handshake.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        handshake.gate.notify_one();

        let first = a.await.unwrap().unwrap();
        let second = b.await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(handshake.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_pool_rejects_until_a_slot_frees() {
        let handshake = Arc::new(GatedHandshake::new(true));
        let (pool, _) = pool_with(1, handshake.clone());

        let first = tokio::spawn({
            let pool = pool.clone();
            async move { pool.establish(NodeId(1), fabric(1)).await }
        });
        tokio::task::yield_now().await;

        // Different peer, so no coalescing: the only slot is busy.
        let err = pool.establish(NodeId(2), fabric(1)).await.unwrap_err();
        assert!(matches!(err, WeftError::ResourceExhausted { .. }));

        handshake.gate.notify_one();
        first.await.unwrap().unwrap();

        // Slot released; the second peer can now establish.
        handshake.gate.notify_one();
        pool.establish(NodeId(2), fabric(1)).await.unwrap();
    }

    #[tokio::test]
    async fn resolution_failure_releases_the_slot() {
        let sessions = Arc::new(SessionManager::new());
        let pool = Arc::new(EstablishmentPool::new(
            1,
            sessions,
            Arc::new(FailingResolver),
            Arc::new(GatedHandshake::new(false)),
        ));

        let err = pool.establish(NodeId(1), fabric(1)).await.unwrap_err();
        assert!(matches!(err, WeftError::NotFound { .. }));
        assert_eq!(pool.slots_in_use(), 0);
    }

    #[tokio::test]
    async fn fabric_removal_cancels_in_flight_establishment() {
        let handshake = Arc::new(GatedHandshake::new(true));
        let (pool, sessions) = pool_with(1, handshake.clone());

        let driver = tokio::spawn({
            let pool = pool.clone();
            async move { pool.establish(NodeId(1), fabric(1)).await }
        });
        tokio::task::yield_now().await;

        pool.fabric_removed(fabric(1));
        handshake.gate.notify_one();

        let err = driver.await.unwrap().unwrap_err();
        assert!(matches!(err, WeftError::Cancelled { .. }));
        assert_eq!(sessions.session_count(), 0);
        assert_eq!(pool.slots_in_use(), 0);
    }
}
