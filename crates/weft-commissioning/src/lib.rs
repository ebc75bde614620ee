//! Weft commissioning window
//!
//! State machine gating whether this node admits new commissioners. A
//! window opens in basic or enhanced mode for a bounded duration and closes
//! on explicit request, timer expiry, successful commissioning (single use
//! per open), or factory reset. Every transition fires the advertisement
//! hook so nearby commissioners can observe discoverability; advertisement
//! is a side effect, never a gating condition.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use weft_core::{WeftError, WeftResult};

/// Longest duration a window may stay open
pub const MAX_WINDOW_DURATION: Duration = Duration::from_secs(15 * 60);

/// Which establishment mode an open window admits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowVariant {
    /// Setup-code verified establishment with the published discriminator
    Basic,
    /// Establishment against caller-provided verifier material
    Enhanced,
}

/// Admission state for new node enrollment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    /// Not accepting commissioners
    Closed,
    /// Open for basic commissioning
    OpenBasic,
    /// Open for enhanced commissioning
    OpenEnhanced,
}

/// Side-effect hook fired on every window transition
pub trait AdvertisementSink: Send + Sync {
    /// The window moved to `state`; update discoverability broadcasts
    fn window_changed(&self, state: WindowState);
}

struct WindowData {
    state: WindowState,
    // Monotonic open-generation; a timer from an older open must not close
    // a newer window.
    generation: u64,
}

struct Inner {
    data: Mutex<WindowData>,
    sink: Mutex<Option<Arc<dyn AdvertisementSink>>>,
}

impl Inner {
    fn advertise(&self, state: WindowState) {
        if let Some(sink) = self.sink.lock().as_ref() {
            sink.window_changed(state);
        }
    }
}

/// Commissioning window state machine
pub struct CommissioningWindowManager {
    inner: Arc<Inner>,
}

impl Default for CommissioningWindowManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CommissioningWindowManager {
    /// Create a manager with the window closed
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                data: Mutex::new(WindowData {
                    state: WindowState::Closed,
                    generation: 0,
                }),
                sink: Mutex::new(None),
            }),
        }
    }

    /// Install the advertisement hook
    pub fn set_advertisement_sink(&self, sink: Arc<dyn AdvertisementSink>) {
        *self.inner.sink.lock() = Some(sink);
    }

    /// Current window state
    pub fn state(&self) -> WindowState {
        self.inner.data.lock().state
    }

    /// Whether a window is currently open in either variant
    pub fn is_open(&self) -> bool {
        self.state() != WindowState::Closed
    }

    fn advertise(&self, state: WindowState) {
        self.inner.advertise(state);
    }

    /// Open a commissioning window for `duration`.
    ///
    /// Fails with `IncorrectState` while any window is already open and
    /// with `InvalidArgument` for a zero or over-long duration; both leave
    /// the state untouched. The expiry timer runs on the ambient runtime.
    pub fn open_window(&self, duration: Duration, variant: WindowVariant) -> WeftResult<()> {
        if duration.is_zero() {
            return Err(WeftError::invalid_argument("window duration must be non-zero"));
        }
        if duration > MAX_WINDOW_DURATION {
            return Err(WeftError::invalid_argument(format!(
                "window duration exceeds maximum of {}s",
                MAX_WINDOW_DURATION.as_secs()
            )));
        }

        let (state, generation) = {
            let mut data = self.inner.data.lock();
            if data.state != WindowState::Closed {
                return Err(WeftError::incorrect_state(
                    "commissioning window already open",
                ));
            }
            data.state = match variant {
                WindowVariant::Basic => WindowState::OpenBasic,
                WindowVariant::Enhanced => WindowState::OpenEnhanced,
            };
            data.generation += 1;
            (data.state, data.generation)
        };

        info!(?variant, secs = duration.as_secs(), "commissioning window opened");
        self.advertise(state);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let expired = {
                let mut data = inner.data.lock();
                if data.generation == generation && data.state != WindowState::Closed {
                    data.state = WindowState::Closed;
                    true
                } else {
                    false
                }
            };
            if expired {
                info!("commissioning window expired");
                inner.advertise(WindowState::Closed);
            }
        });
        Ok(())
    }

    /// Close the window. Closing an already-closed window is a no-op.
    pub fn close_window(&self) {
        let mut data = self.inner.data.lock();
        if data.state == WindowState::Closed {
            debug!("commissioning window already closed");
            return;
        }
        data.state = WindowState::Closed;
        data.generation += 1;
        drop(data);

        info!("commissioning window closed");
        self.advertise(WindowState::Closed);
    }

    /// A commissioner completed establishment: the window is single-use per
    /// open and closes immediately.
    pub fn commissioning_succeeded(&self) -> WeftResult<()> {
        if !self.is_open() {
            return Err(WeftError::incorrect_state(
                "commissioning completed with no open window",
            ));
        }
        info!("commissioning complete, closing window");
        self.close_window();
        Ok(())
    }

    /// A commissioner's handshake failed: the window stays open until its
    /// own expiry so another attempt can be made.
    pub fn commissioning_failed(&self) {
        warn!(state = ?self.state(), "commissioning handshake failed, window stays open");
    }

    /// Factory-reset signal: unconditionally close
    pub fn factory_reset(&self) {
        self.close_window();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct RecordingSink {
        transitions: PlMutex<Vec<WindowState>>,
    }

    impl AdvertisementSink for RecordingSink {
        fn window_changed(&self, state: WindowState) {
            self.transitions.lock().push(state);
        }
    }

    #[tokio::test]
    async fn open_while_open_fails() {
        let manager = CommissioningWindowManager::new();
        manager
            .open_window(Duration::from_secs(60), WindowVariant::Enhanced)
            .unwrap();

        let err = manager
            .open_window(Duration::from_secs(60), WindowVariant::Basic)
            .unwrap_err();
        assert!(matches!(err, WeftError::IncorrectState { .. }));
        assert_eq!(manager.state(), WindowState::OpenEnhanced);
    }

    #[tokio::test]
    async fn zero_and_overlong_durations_are_rejected() {
        let manager = CommissioningWindowManager::new();
        assert!(manager
            .open_window(Duration::ZERO, WindowVariant::Basic)
            .is_err());
        assert!(manager
            .open_window(MAX_WINDOW_DURATION + Duration::from_secs(1), WindowVariant::Basic)
            .is_err());
        assert_eq!(manager.state(), WindowState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn window_expires_at_its_duration() {
        let manager = CommissioningWindowManager::new();
        manager
            .open_window(Duration::from_secs(180), WindowVariant::Basic)
            .unwrap();
        assert_eq!(manager.state(), WindowState::OpenBasic);

        tokio::time::sleep(Duration::from_secs(181)).await;
        assert_eq!(manager.state(), WindowState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_does_not_close_a_newer_window() {
        let manager = CommissioningWindowManager::new();
        manager
            .open_window(Duration::from_secs(60), WindowVariant::Basic)
            .unwrap();
        manager.close_window();

        // Reopen before the first timer fires.
        manager
            .open_window(Duration::from_secs(600), WindowVariant::Enhanced)
            .unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(manager.state(), WindowState::OpenEnhanced);
    }

    #[tokio::test]
    async fn successful_commissioning_closes_the_window_once() {
        let manager = CommissioningWindowManager::new();
        manager
            .open_window(Duration::from_secs(60), WindowVariant::Basic)
            .unwrap();

        manager.commissioning_succeeded().unwrap();
        assert_eq!(manager.state(), WindowState::Closed);

        let err = manager.commissioning_succeeded().unwrap_err();
        assert!(matches!(err, WeftError::IncorrectState { .. }));
    }

    #[tokio::test]
    async fn failed_commissioning_leaves_the_window_open() {
        let manager = CommissioningWindowManager::new();
        manager
            .open_window(Duration::from_secs(60), WindowVariant::Basic)
            .unwrap();

        manager.commissioning_failed();
        assert_eq!(manager.state(), WindowState::OpenBasic);
    }

    #[tokio::test]
    async fn every_transition_is_advertised() {
        let manager = CommissioningWindowManager::new();
        let sink = Arc::new(RecordingSink::default());
        manager.set_advertisement_sink(sink.clone());

        manager
            .open_window(Duration::from_secs(60), WindowVariant::Basic)
            .unwrap();
        manager.close_window();
        manager.close_window(); // no-op, no extra advertisement

        assert_eq!(
            *sink.transitions.lock(),
            vec![WindowState::OpenBasic, WindowState::Closed]
        );
    }
}
