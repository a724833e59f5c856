//! Viewer presence tracking.
//!
//! Tracks connected viewers and read-API activity to decide when the GPU
//! should start and stop. Debouncing is what keeps brief disconnects from
//! cycling the GPU: the shutdown timer is cancelled on reconnect, start
//! requests are gated on "already active or starting", and the timer
//! re-checks both viewer count and API activity at expiry.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Start/stop gate the presence tracker drives.
///
/// Implementations must be non-blocking; any external call runs on a
/// spawned task, never on the caller's stack.
pub trait PodLifecycle: Send + Sync {
    /// Whether the GPU is running or already on its way up.
    fn is_active_or_starting(&self) -> bool;

    /// Requests a GPU start.
    fn request_start(&self);

    /// Requests a GPU stop.
    fn request_stop(&self);
}

/// Presence status exposed on the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceSnapshot {
    pub viewer_count: usize,
    pub has_viewers: bool,
    pub has_recent_api_activity: bool,
    pub producer_connected: bool,
    pub shutdown_pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seconds_since_api_access: Option<f64>,
}

struct PresenceInner {
    viewers: HashSet<u64>,
    last_api_access: Option<Instant>,
    /// Cancellation handle for the armed shutdown timer, if any.
    shutdown: Option<CancellationToken>,
}

/// Tracks viewer presence and arms the debounced GPU shutdown timer.
pub struct PresenceTracker {
    shutdown_delay: Duration,
    api_timeout: Duration,
    lifecycle: Arc<dyn PodLifecycle>,
    /// Fast path for the start gate: a connected producer socket means the
    /// GPU is definitely up, whatever the controller last heard.
    producer_connected: AtomicBool,
    inner: Mutex<PresenceInner>,
}

impl PresenceTracker {
    pub fn new(
        shutdown_delay: Duration,
        api_timeout: Duration,
        lifecycle: Arc<dyn PodLifecycle>,
    ) -> Self {
        Self {
            shutdown_delay,
            api_timeout,
            lifecycle,
            producer_connected: AtomicBool::new(false),
            inner: Mutex::new(PresenceInner {
                viewers: HashSet::new(),
                last_api_access: None,
                shutdown: None,
            }),
        }
    }

    /// Current number of connected viewers.
    pub fn viewer_count(&self) -> usize {
        self.inner.lock().viewers.len()
    }

    pub fn has_viewers(&self) -> bool {
        self.viewer_count() > 0
    }

    /// Whether the read API was hit inside the activity window.
    pub fn has_recent_api_activity(&self) -> bool {
        self.inner
            .lock()
            .last_api_access
            .is_some_and(|t| t.elapsed() < self.api_timeout)
    }

    /// Updated by the hub when the producer socket connects or drops.
    pub fn set_producer_connected(&self, connected: bool) {
        self.producer_connected.store(connected, Ordering::SeqCst);
    }

    fn gpu_active_or_starting(&self) -> bool {
        self.producer_connected.load(Ordering::SeqCst) || self.lifecycle.is_active_or_starting()
    }

    /// Called when a viewer socket connects.
    pub fn on_viewer_connect(self: &Arc<Self>, viewer: u64) {
        let count = {
            let mut inner = self.inner.lock();
            inner.viewers.insert(viewer);
            inner.viewers.len()
        };
        log::info!("[Presence] viewer connected (total: {})", count);

        self.cancel_armed_shutdown();

        if self.gpu_active_or_starting() {
            log::debug!("[Presence] GPU already active or starting, skipping start request");
        } else {
            log::info!("[Presence] starting GPU due to viewer connection");
            self.lifecycle.request_start();
        }
    }

    /// Called when a viewer socket disconnects or is evicted.
    pub fn on_viewer_disconnect(self: &Arc<Self>, viewer: u64) {
        let remaining = {
            let mut inner = self.inner.lock();
            inner.viewers.remove(&viewer);
            inner.viewers.len()
        };
        log::info!("[Presence] viewer disconnected (remaining: {})", remaining);

        if remaining == 0 {
            self.arm_shutdown();
        }
    }

    /// Called on every successful read-API hit.
    ///
    /// `trigger_start` is false for admin/monitoring surfaces that should
    /// keep the GPU alive without waking it.
    pub fn on_api_access(self: &Arc<Self>, trigger_start: bool) {
        self.inner.lock().last_api_access = Some(Instant::now());
        self.cancel_armed_shutdown();

        if trigger_start {
            if self.gpu_active_or_starting() {
                log::debug!("[Presence] GPU already active or starting, skipping start from API");
            } else {
                log::info!("[Presence] starting GPU due to API access");
                self.lifecycle.request_start();
            }
        }
    }

    /// Returns presence status.
    pub fn snapshot(&self) -> PresenceSnapshot {
        let inner = self.inner.lock();
        PresenceSnapshot {
            viewer_count: inner.viewers.len(),
            has_viewers: !inner.viewers.is_empty(),
            has_recent_api_activity: inner
                .last_api_access
                .is_some_and(|t| t.elapsed() < self.api_timeout),
            producer_connected: self.producer_connected.load(Ordering::SeqCst),
            shutdown_pending: inner.shutdown.is_some(),
            seconds_since_api_access: inner
                .last_api_access
                .map(|t| (t.elapsed().as_secs_f64() * 10.0).round() / 10.0),
        }
    }

    fn cancel_armed_shutdown(&self) {
        if let Some(token) = self.inner.lock().shutdown.take() {
            token.cancel();
            log::debug!("[Presence] cancelled pending shutdown");
        }
    }

    /// Arms the shutdown timer. At most one timer is armed at any time.
    fn arm_shutdown(self: &Arc<Self>) {
        let cancel = CancellationToken::new();
        {
            let mut inner = self.inner.lock();
            if inner.shutdown.is_some() {
                return;
            }
            inner.shutdown = Some(cancel.clone());
        }
        log::debug!(
            "[Presence] scheduled GPU shutdown in {}s",
            self.shutdown_delay.as_secs()
        );

        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("[Presence] shutdown timer cancelled");
                }
                _ = tokio::time::sleep(tracker.shutdown_delay) => {
                    tracker.on_shutdown_timer_expired();
                }
            }
        });
    }

    fn on_shutdown_timer_expired(&self) {
        {
            let mut inner = self.inner.lock();
            inner.shutdown = None;

            if !inner.viewers.is_empty() {
                log::debug!("[Presence] shutdown cancelled: viewers reconnected");
                return;
            }
            if inner
                .last_api_access
                .is_some_and(|t| t.elapsed() < self.api_timeout)
            {
                log::debug!("[Presence] shutdown cancelled: recent API activity");
                return;
            }
        }
        log::info!("[Presence] grace period expired, initiating GPU shutdown");
        self.lifecycle.request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use tokio::time::{self, Duration};

    const DELAY: Duration = Duration::from_secs(30);
    const API_TIMEOUT: Duration = Duration::from_secs(300);

    /// Mock gate that becomes "active" once started, like a real pod.
    #[derive(Default)]
    struct MockLifecycle {
        active: AtomicBool,
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    impl PodLifecycle for MockLifecycle {
        fn is_active_or_starting(&self) -> bool {
            self.active.load(Ordering::SeqCst)
        }

        fn request_start(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.active.store(true, Ordering::SeqCst);
        }

        fn request_stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.active.store(false, Ordering::SeqCst);
        }
    }

    fn tracker() -> (Arc<MockLifecycle>, Arc<PresenceTracker>) {
        let lifecycle = Arc::new(MockLifecycle::default());
        let tracker = Arc::new(PresenceTracker::new(
            DELAY,
            API_TIMEOUT,
            Arc::clone(&lifecycle) as Arc<dyn PodLifecycle>,
        ));
        (lifecycle, tracker)
    }

    #[tokio::test(start_paused = true)]
    async fn first_viewer_starts_gpu_exactly_once() {
        let (lifecycle, tracker) = tracker();

        tracker.on_viewer_connect(1);
        assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 1);

        // Second viewer arrives while starting: gated, no extra call
        tracker.on_viewer_connect(2);
        assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.viewer_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_connect_is_idempotent() {
        let (lifecycle, tracker) = tracker();

        tracker.on_viewer_connect(7);
        tracker.on_viewer_connect(7);

        assert_eq!(tracker.viewer_count(), 1);
        assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_fires_after_grace_period() {
        let (lifecycle, tracker) = tracker();

        tracker.on_viewer_connect(1);
        tracker.on_viewer_disconnect(1);
        assert!(tracker.snapshot().shutdown_pending);

        time::sleep(DELAY + Duration::from_secs(1)).await;

        assert_eq!(lifecycle.stops.load(Ordering::SeqCst), 1);
        assert!(!tracker.snapshot().shutdown_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_cancels_armed_shutdown() {
        let (lifecycle, tracker) = tracker();

        tracker.on_viewer_connect(1);
        tracker.on_viewer_disconnect(1);

        time::sleep(DELAY / 2).await;
        tracker.on_viewer_connect(2);
        assert!(!tracker.snapshot().shutdown_pending);

        time::sleep(DELAY * 2).await;
        assert_eq!(lifecycle.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_recheck_honors_recent_api_activity() {
        let (lifecycle, tracker) = tracker();

        // API activity recorded before the timer arms, without cancelling it
        tracker.on_api_access(false);
        tracker.on_viewer_connect(1);
        tracker.on_viewer_disconnect(1);

        time::sleep(DELAY + Duration::from_secs(1)).await;

        // Still inside the API window at expiry: no stop, timer disarmed
        assert_eq!(lifecycle.stops.load(Ordering::SeqCst), 0);
        assert!(!tracker.snapshot().shutdown_pending);
    }

    #[tokio::test(start_paused = true)]
    async fn api_access_cancels_shutdown_and_can_start() {
        let (lifecycle, tracker) = tracker();

        tracker.on_api_access(true);
        assert_eq!(lifecycle.starts.load(Ordering::SeqCst), 1);

        tracker.on_viewer_connect(1);
        tracker.on_viewer_disconnect(1);
        assert!(tracker.snapshot().shutdown_pending);

        tracker.on_api_access(false);
        assert!(!tracker.snapshot().shutdown_pending);

        time::sleep(DELAY * 2).await;
        assert_eq!(lifecycle.stops.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_timer_arms_across_disconnect_churn() {
        let (lifecycle, tracker) = tracker();

        tracker.on_viewer_connect(1);
        tracker.on_viewer_connect(2);
        tracker.on_viewer_disconnect(1);
        assert!(!tracker.snapshot().shutdown_pending, "viewers remain");

        tracker.on_viewer_disconnect(2);
        assert!(tracker.snapshot().shutdown_pending);

        // A duplicate disconnect while armed must not arm a second timer
        tracker.on_viewer_disconnect(2);

        time::sleep(DELAY + Duration::from_secs(1)).await;
        assert_eq!(lifecycle.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn producer_connection_gates_start_requests() {
        let (lifecycle, tracker) = tracker();

        tracker.set_producer_connected(true);
        tracker.on_viewer_connect(1);

        assert_eq!(
            lifecycle.starts.load(Ordering::SeqCst),
            0,
            "a live producer socket means the GPU is already up"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reports_api_age() {
        let (_lifecycle, tracker) = tracker();

        tracker.on_api_access(false);
        time::advance(Duration::from_secs(5)).await;

        let snapshot = tracker.snapshot();
        assert!(snapshot.has_recent_api_activity);
        assert_eq!(snapshot.seconds_since_api_access, Some(5.0));
    }
}
