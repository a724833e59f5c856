//! GPU pod lifecycle controller.
//!
//! A small state machine wrapping the external orchestrator:
//!
//! ```text
//! Idle ──start()──► Starting ──(producer connects)──► Running
//!  ▲                   │                                  │
//!  │                   └── orchestrator failure ──► Error │
//!  └────────────── stop() / Stopping ◄────────────────────┘
//! ```
//!
//! `request_start`/`request_stop` are non-blocking: the state transition
//! happens immediately and the orchestrator call runs on a spawned task.
//! Transition notifications go out over a broadcast channel after the state
//! lock is released, so subscribers can never deadlock against the
//! controller.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::protocol_constants::{POD_ACTION_DEBOUNCE_SECS, POD_EVENT_CHANNEL_CAPACITY};
use crate::services::orchestrator::{Orchestrator, OrchestratorError, OrchestratorStatus};
use crate::services::presence::PodLifecycle;

/// Pod lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PodState {
    Idle,
    Starting,
    Running,
    Stopping,
    Error,
}

impl PodState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

/// A state-change notification.
#[derive(Debug, Clone)]
pub struct PodTransition {
    pub state: PodState,
    pub error: Option<String>,
}

/// Pod status as reported on the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PodStatusReport {
    pub state: PodState,
    pub configured: bool,
    pub start_attempts: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<OrchestratorStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orchestrator_error: Option<String>,
}

struct PodInner {
    state: PodState,
    error: Option<String>,
    last_action: Option<Instant>,
    start_attempts: u64,
    running_since: Option<Instant>,
}

/// State machine wrapping the external orchestrator.
pub struct PodController {
    orchestrator: Arc<dyn Orchestrator>,
    configured: bool,
    inner: Arc<Mutex<PodInner>>,
    transitions: broadcast::Sender<PodTransition>,
}

impl PodController {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, configured: bool) -> Self {
        let (transitions, _) = broadcast::channel(POD_EVENT_CHANNEL_CAPACITY);
        Self {
            orchestrator,
            configured,
            inner: Arc::new(Mutex::new(PodInner {
                state: PodState::Idle,
                error: None,
                last_action: None,
                start_attempts: 0,
                running_since: None,
            })),
            transitions,
        }
    }

    /// Subscribes to state-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PodTransition> {
        self.transitions.subscribe()
    }

    /// Current state.
    pub fn state(&self) -> PodState {
        self.inner.lock().state
    }

    /// Last error message, if the controller is in the error state.
    pub fn error_message(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    /// Whether the pod is running or on its way up. Gates duplicate start
    /// requests from the presence tracker.
    pub fn active_or_starting(&self) -> bool {
        matches!(self.state(), PodState::Starting | PodState::Running)
    }

    /// Requests a pod start. Idempotent while already starting or running;
    /// a stuck `Starting` older than the debounce window is retried.
    pub fn start(&self) {
        let debounce = Duration::from_secs(POD_ACTION_DEBOUNCE_SECS);
        {
            let mut inner = self.inner.lock();
            match inner.state {
                PodState::Running => {
                    log::debug!("[Pod] already running, skipping start");
                    return;
                }
                PodState::Starting
                    if inner.last_action.is_some_and(|t| t.elapsed() < debounce) =>
                {
                    log::debug!("[Pod] start debounced (already starting)");
                    return;
                }
                _ => {}
            }
            inner.start_attempts += 1;
            inner.last_action = Some(Instant::now());
        }
        self.transition(PodState::Starting, None);

        let orchestrator = Arc::clone(&self.orchestrator);
        let inner = Arc::clone(&self.inner);
        let transitions = self.transitions.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.start().await {
                log::error!("[Pod] start failed: {}", e);
                apply_transition(&inner, &transitions, PodState::Error, Some(e.to_string()));
            }
            // Success leaves us in Starting; the hub promotes to Running
            // when the producer socket actually connects.
        });
    }

    /// Requests a pod stop. Best-effort: the state always lands on Idle,
    /// even when the orchestrator call fails.
    pub fn stop(&self) {
        let debounce = Duration::from_secs(POD_ACTION_DEBOUNCE_SECS);
        {
            let mut inner = self.inner.lock();
            match inner.state {
                PodState::Idle => {
                    log::debug!("[Pod] already idle, skipping stop");
                    return;
                }
                PodState::Stopping
                    if inner.last_action.is_some_and(|t| t.elapsed() < debounce) =>
                {
                    log::debug!("[Pod] stop debounced (already stopping)");
                    return;
                }
                _ => {}
            }
            inner.last_action = Some(Instant::now());
            inner.running_since = None;
        }
        self.transition(PodState::Stopping, None);

        let orchestrator = Arc::clone(&self.orchestrator);
        let inner = Arc::clone(&self.inner);
        let transitions = self.transitions.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator.stop().await {
                log::warn!("[Pod] stop failed (forcing idle): {}", e);
            }
            apply_transition(&inner, &transitions, PodState::Idle, None);
        });
    }

    /// Called by the hub when the producer socket connects: the pod is
    /// demonstrably up regardless of what the orchestrator last reported.
    pub fn on_producer_connected(&self) {
        self.inner.lock().running_since = Some(Instant::now());
        self.transition(PodState::Running, None);
    }

    /// Called by the hub when the producer socket drops. The pod may well
    /// still be running; whether to stop it is the presence tracker's call.
    pub fn on_producer_disconnected(&self) {
        log::debug!("[Pod] producer disconnected, state stays {}", self.state().as_str());
    }

    /// Pull-through status refresh, reconciling the orchestrator's view into
    /// local state.
    pub async fn refresh_status(&self) -> PodStatusReport {
        let (resources, orchestrator_error) = if self.configured {
            match self.orchestrator.status().await {
                Ok(status) => {
                    self.reconcile(&status);
                    (Some(status), None)
                }
                Err(e) => {
                    log::warn!("[Pod] status refresh failed: {}", e);
                    (None, Some(e.to_string()))
                }
            }
        } else {
            (None, Some(OrchestratorError::NotConfigured.to_string()))
        };

        let inner = self.inner.lock();
        PodStatusReport {
            state: inner.state,
            configured: self.configured,
            start_attempts: inner.start_attempts,
            uptime_seconds: inner
                .running_since
                .filter(|_| inner.state == PodState::Running)
                .map(|t| (t.elapsed().as_secs_f64() * 10.0).round() / 10.0),
            error_message: inner.error.clone(),
            resources,
            orchestrator_error,
        }
    }

    /// Builds a status report from local state only, without touching the
    /// orchestrator.
    pub fn report(&self) -> PodStatusReport {
        let inner = self.inner.lock();
        PodStatusReport {
            state: inner.state,
            configured: self.configured,
            start_attempts: inner.start_attempts,
            uptime_seconds: inner
                .running_since
                .filter(|_| inner.state == PodState::Running)
                .map(|t| (t.elapsed().as_secs_f64() * 10.0).round() / 10.0),
            error_message: inner.error.clone(),
            resources: None,
            orchestrator_error: None,
        }
    }

    fn reconcile(&self, status: &OrchestratorStatus) {
        let local = self.state();
        if status.all_running() && local != PodState::Running {
            self.inner.lock().running_since = Some(Instant::now());
            self.transition(PodState::Running, None);
        } else if status.any_pending() && local == PodState::Idle {
            self.transition(PodState::Starting, None);
        }
    }

    fn transition(&self, next: PodState, error: Option<String>) {
        apply_transition(&self.inner, &self.transitions, next, error);
    }
}

/// Updates the state under the lock, then notifies subscribers after the
/// lock is released. No-op when nothing changed.
fn apply_transition(
    inner: &Mutex<PodInner>,
    transitions: &broadcast::Sender<PodTransition>,
    next: PodState,
    error: Option<String>,
) {
    let changed = {
        let mut inner = inner.lock();
        let changed = inner.state != next || inner.error != error;
        if changed {
            log::info!(
                "[Pod] state: {} -> {}{}",
                inner.state.as_str(),
                next.as_str(),
                error.as_deref().map(|e| format!(" ({e})")).unwrap_or_default()
            );
            inner.state = next;
            inner.error = error.clone();
        }
        changed
    };
    if changed {
        let _ = transitions.send(PodTransition { state: next, error });
    }
}

impl PodLifecycle for PodController {
    fn is_active_or_starting(&self) -> bool {
        self.active_or_starting()
    }

    fn request_start(&self) {
        self.start();
    }

    fn request_stop(&self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::time::{self, Duration};

    #[derive(Default)]
    struct MockOrchestrator {
        start_calls: AtomicUsize,
        stop_calls: AtomicUsize,
        fail_start: AtomicBool,
        fail_stop: AtomicBool,
        status: Mutex<OrchestratorStatus>,
    }

    #[async_trait]
    impl Orchestrator for MockOrchestrator {
        async fn start(&self) -> Result<(), OrchestratorError> {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_start.load(Ordering::SeqCst) {
                Err(OrchestratorError::Api {
                    status: 500,
                    body: "boom".into(),
                })
            } else {
                Ok(())
            }
        }

        async fn stop(&self) -> Result<(), OrchestratorError> {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop.load(Ordering::SeqCst) {
                Err(OrchestratorError::Api {
                    status: 500,
                    body: "boom".into(),
                })
            } else {
                Ok(())
            }
        }

        async fn status(&self) -> Result<OrchestratorStatus, OrchestratorError> {
            Ok(self.status.lock().clone())
        }
    }

    fn controller() -> (Arc<MockOrchestrator>, PodController) {
        let mock = Arc::new(MockOrchestrator::default());
        let pod = PodController::new(Arc::clone(&mock) as Arc<dyn Orchestrator>, true);
        (mock, pod)
    }

    async fn settle() {
        // Let spawned orchestrator calls run
        time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_enters_starting_and_calls_orchestrator_once() {
        let (mock, pod) = controller();

        pod.start();
        assert_eq!(pod.state(), PodState::Starting);

        settle().await;
        assert_eq!(mock.start_calls.load(Ordering::SeqCst), 1);

        // Repeated start while starting short-circuits
        pod.start();
        settle().await;
        assert_eq!(mock.start_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_start_retries_after_debounce_window() {
        let (mock, pod) = controller();

        pod.start();
        settle().await;
        assert_eq!(mock.start_calls.load(Ordering::SeqCst), 1);

        time::advance(Duration::from_secs(POD_ACTION_DEBOUNCE_SECS + 1)).await;
        pod.start();
        settle().await;
        assert_eq!(mock.start_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn start_failure_lands_in_error_with_message() {
        let (mock, pod) = controller();
        mock.fail_start.store(true, Ordering::SeqCst);

        pod.start();
        settle().await;

        assert_eq!(pod.state(), PodState::Error);
        assert!(pod
            .error_message()
            .expect("error message set")
            .contains("500"));

        // Error is recoverable: the next start attempt goes through
        mock.fail_start.store(false, Ordering::SeqCst);
        time::advance(Duration::from_secs(POD_ACTION_DEBOUNCE_SECS + 1)).await;
        pod.start();
        settle().await;
        assert_eq!(pod.state(), PodState::Starting);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_best_effort_and_lands_idle() {
        let (mock, pod) = controller();
        mock.fail_stop.store(true, Ordering::SeqCst);

        pod.start();
        pod.on_producer_connected();
        assert_eq!(pod.state(), PodState::Running);

        pod.stop();
        assert_eq!(pod.state(), PodState::Stopping);
        settle().await;
        assert_eq!(pod.state(), PodState::Idle);
        assert_eq!(mock.stop_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_while_idle_is_a_noop() {
        let (mock, pod) = controller();
        pod.stop();
        settle().await;
        assert_eq!(mock.stop_calls.load(Ordering::SeqCst), 0);
        assert_eq!(pod.state(), PodState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn producer_connect_promotes_starting_to_running() {
        let (_mock, pod) = controller();
        let mut rx = pod.subscribe();

        pod.start();
        pod.on_producer_connected();

        assert_eq!(pod.state(), PodState::Running);
        assert!(pod.active_or_starting());

        // Transitions arrive in order, after each state change
        assert_eq!(rx.recv().await.unwrap().state, PodState::Starting);
        assert_eq!(rx.recv().await.unwrap().state, PodState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn producer_disconnect_does_not_change_state() {
        let (_mock, pod) = controller();
        pod.start();
        pod.on_producer_connected();

        pod.on_producer_disconnected();
        assert_eq!(pod.state(), PodState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_reconciles_running_resources() {
        let (mock, pod) = controller();
        *mock.status.lock() = serde_json::from_str(
            r#"{"renderer":{"status":"RUNNING"},"generator":{"status":"RUNNING"}}"#,
        )
        .unwrap();

        let report = pod.refresh_status().await;
        assert_eq!(report.state, PodState::Running);
        assert!(report.resources.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_promotes_idle_to_starting_on_pending_resources() {
        let (mock, pod) = controller();
        *mock.status.lock() =
            serde_json::from_str(r#"{"renderer":{"status":"STARTING"},"generator":{}}"#).unwrap();

        let report = pod.refresh_status().await;
        assert_eq!(report.state, PodState::Starting);
    }
}
