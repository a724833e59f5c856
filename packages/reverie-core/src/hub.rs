//! Streaming hub for the dream window.
//!
//! Owns the viewer set and the single producer slot, decodes producer
//! messages, feeds frames into the playback queue, and fans paced frames out
//! to every viewer. Socket I/O stays in the API layer; the hub talks to
//! connections through bounded per-peer channels, which is where the
//! per-viewer send deadline is enforced.
//!
//! Frame protocol uses binary messages: a type byte followed by the payload.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::protocol_constants::{
    CTRL_SAVE_STATE, CTRL_SHUTDOWN, MSG_FRAME, MSG_HEARTBEAT, MSG_STATE, MSG_STATUS,
    PRODUCER_SEND_TIMEOUT_SECS, VIEWER_SEND_TIMEOUT_SECS,
};
use crate::services::pod::{PodController, PodState};
use crate::services::presence::{PresenceSnapshot, PresenceTracker};
use crate::services::state_store::StateStore;
use crate::stream::frame_cache::{CacheStats, FrameCache};
use crate::stream::playback::{FrameSink, PlaybackQueue, PlaybackStats};

/// User-facing stream status labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Idle,
    Starting,
    Ready,
    Stopping,
    Error,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }

    /// Maps a pod state to the label viewers see.
    pub fn from_pod_state(state: PodState) -> Self {
        match state {
            PodState::Idle => Self::Idle,
            PodState::Starting => Self::Starting,
            PodState::Running => Self::Ready,
            PodState::Stopping => Self::Stopping,
            PodState::Error => Self::Error,
        }
    }

    /// Default status text shown when no more specific message applies.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::Idle => "Dream machine sleeping...",
            Self::Starting => "Waking the dream machine...",
            Self::Ready => "Dreams flowing...",
            Self::Stopping => "Dream machine winding down...",
            Self::Error => "Dream machine hit a snag",
        }
    }
}

/// Message delivered to a viewer connection task.
#[derive(Debug, Clone)]
pub enum ViewerMessage {
    /// JSON control message (status, config, pong).
    Text(String),
    /// Type-byte framed binary message (frames).
    Binary(Bytes),
}

/// A second producer tried to connect while one is present.
#[derive(Debug, Error)]
#[error("producer already connected")]
pub struct ProducerAlreadyConnected;

struct ViewerHandle {
    tx: mpsc::Sender<ViewerMessage>,
    cancel: CancellationToken,
}

struct ProducerHandle {
    tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    worker: JoinHandle<()>,
    worker_cancel: CancellationToken,
    session_id: Uuid,
}

struct StatusInner {
    status: StreamStatus,
    message: String,
}

/// Consolidated hub state for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HubSnapshot {
    pub status: StreamStatus,
    pub status_message: String,
    pub viewer_count: usize,
    pub producer_connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_frame_age_seconds: Option<f64>,
    pub cache: CacheStats,
    pub playback: PlaybackStats,
    pub presence: PresenceSnapshot,
}

/// Central hub for dream window connections.
pub struct StreamingHub {
    frame_cache: Arc<FrameCache>,
    playback: Arc<PlaybackQueue>,
    presence: Arc<PresenceTracker>,
    pod: Arc<PodController>,
    state_store: Arc<StateStore>,

    viewers: Mutex<HashMap<u64, ViewerHandle>>,
    next_viewer_id: AtomicU64,
    producer: Mutex<Option<ProducerHandle>>,

    /// Frame numbering counter, reset to 1 on each producer session.
    /// Assigned at receive time so numbers stay dense even when frames
    /// queue before caching.
    next_frame_number: AtomicU64,
    last_producer_contact: Mutex<Option<Instant>>,
    status: Mutex<StatusInner>,
}

impl StreamingHub {
    pub fn new(
        frame_cache: Arc<FrameCache>,
        playback: Arc<PlaybackQueue>,
        presence: Arc<PresenceTracker>,
        pod: Arc<PodController>,
        state_store: Arc<StateStore>,
    ) -> Self {
        Self {
            frame_cache,
            playback,
            presence,
            pod,
            state_store,
            viewers: Mutex::new(HashMap::new()),
            next_viewer_id: AtomicU64::new(1),
            producer: Mutex::new(None),
            next_frame_number: AtomicU64::new(1),
            last_producer_contact: Mutex::new(None),
            status: Mutex::new(StatusInner {
                status: StreamStatus::Idle,
                message: "Waiting for connection...".to_string(),
            }),
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.lock().len()
    }

    pub fn producer_connected(&self) -> bool {
        self.producer.lock().is_some()
    }

    /// Seconds since the producer last sent a frame or heartbeat.
    pub fn last_frame_age_seconds(&self) -> Option<f64> {
        self.last_producer_contact
            .lock()
            .map(|t| (t.elapsed().as_secs_f64() * 10.0).round() / 10.0)
    }

    // ==================== Viewer connections ====================

    /// Registers a new viewer and returns its id.
    ///
    /// The first message the viewer sees is the current status; if a frame
    /// is cached it follows immediately so the window isn't blank while the
    /// stream spins up.
    pub async fn connect_viewer(
        &self,
        tx: mpsc::Sender<ViewerMessage>,
        cancel: CancellationToken,
    ) -> u64 {
        let id = self.next_viewer_id.fetch_add(1, Ordering::Relaxed);
        self.viewers.lock().insert(
            id,
            ViewerHandle {
                tx: tx.clone(),
                cancel,
            },
        );
        log::info!("[Hub] viewer {} connected", id);

        self.presence.on_viewer_connect(id);

        let status = ViewerMessage::Text(self.status_payload().to_string());
        if !send_with_deadline(&tx, status).await {
            log::warn!("[Hub] failed to send initial status to viewer {}", id);
        }

        if let Some(frame) = self.frame_cache.current() {
            let msg = ViewerMessage::Binary(frame_message(&frame.payload));
            if !send_with_deadline(&tx, msg).await {
                log::warn!("[Hub] failed to send initial frame to viewer {}", id);
            }
        }

        id
    }

    /// Removes a viewer. Idempotent; presence is only notified when the
    /// viewer was actually present.
    pub fn disconnect_viewer(&self, id: u64) {
        let removed = self.viewers.lock().remove(&id);
        if removed.is_some() {
            log::info!("[Hub] viewer {} disconnected", id);
            self.presence.on_viewer_disconnect(id);
        }
    }

    // ==================== Producer connection ====================

    /// Installs the producer connection. Only one producer is allowed at a
    /// time; a new session resets frame numbering, session stats, and the
    /// playback queue, then starts the playback worker.
    pub async fn connect_producer(
        self: &Arc<Self>,
        tx: mpsc::Sender<Bytes>,
        cancel: CancellationToken,
    ) -> Result<(), ProducerAlreadyConnected> {
        let session_id = {
            let mut slot = self.producer.lock();
            if slot.is_some() {
                log::warn!("[Hub] producer already connected, rejecting new connection");
                return Err(ProducerAlreadyConnected);
            }

            self.next_frame_number.store(1, Ordering::SeqCst);
            self.frame_cache.reset_session();
            self.playback.reset();

            let worker_cancel = CancellationToken::new();
            let worker = tokio::spawn(Arc::clone(&self.playback).run(
                Arc::clone(self) as Arc<dyn FrameSink>,
                worker_cancel.clone(),
            ));

            let session_id = Uuid::new_v4();
            *slot = Some(ProducerHandle {
                tx,
                cancel,
                worker,
                worker_cancel,
                session_id,
            });
            session_id
        };

        self.presence.set_producer_connected(true);
        self.pod.on_producer_connected();

        log::info!("[Hub] producer connected (session {})", session_id);
        self.broadcast_status(StreamStatus::Ready, StreamStatus::Ready.default_message())
            .await;
        Ok(())
    }

    /// Tears down the producer session: stops and joins the playback worker,
    /// clears the slot, and tells viewers the stream went idle.
    pub async fn disconnect_producer(&self) {
        let handle = self.producer.lock().take();
        let Some(handle) = handle else { return };

        handle.worker_cancel.cancel();
        handle.cancel.cancel();
        if let Err(e) = handle.worker.await {
            log::warn!("[Hub] playback worker join failed: {}", e);
        }

        self.presence.set_producer_connected(false);
        self.pod.on_producer_disconnected();

        log::info!("[Hub] producer disconnected (session {})", handle.session_id);
        self.broadcast_status(StreamStatus::Idle, StreamStatus::Idle.default_message())
            .await;
    }

    /// Dispatches one binary message from the producer.
    pub async fn handle_producer_message(&self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        let msg_type = data[0];
        let payload = data.slice(1..);

        match msg_type {
            MSG_FRAME => {
                *self.last_producer_contact.lock() = Some(Instant::now());
                let n = self.next_frame_number.fetch_add(1, Ordering::SeqCst);
                self.playback.enqueue(payload, n);
            }
            MSG_STATE => {
                let store = Arc::clone(&self.state_store);
                tokio::spawn(async move {
                    if let Err(e) = store.save(payload).await {
                        log::error!("[Hub] failed to persist state snapshot: {}", e);
                    }
                });
            }
            MSG_HEARTBEAT => {
                *self.last_producer_contact.lock() = Some(Instant::now());
            }
            MSG_STATUS => self.handle_producer_status(&payload).await,
            other => {
                log::debug!("[Hub] ignoring unknown producer message type {:#04x}", other);
            }
        }
    }

    async fn handle_producer_status(&self, payload: &Bytes) {
        #[derive(Deserialize)]
        struct ProducerStatus {
            #[serde(default)]
            target_fps: Option<f64>,
        }

        let status: ProducerStatus = match serde_json::from_slice(payload) {
            Ok(status) => status,
            Err(e) => {
                log::warn!("[Hub] failed to parse producer status: {}", e);
                return;
            }
        };

        if let Some(target_fps) = status.target_fps {
            self.playback.set_target_fps(target_fps);
            log::info!("[Hub] producer configured target FPS: {}", target_fps);

            // Forward to viewers for client-side pacing
            let config = json!({ "type": "config", "target_fps": target_fps });
            self.broadcast(ViewerMessage::Text(config.to_string())).await;
        }
    }

    // ==================== Broadcasting ====================

    /// Updates the local status and pushes it to every viewer.
    pub async fn broadcast_status(&self, status: StreamStatus, message: &str) {
        {
            let mut inner = self.status.lock();
            inner.status = status;
            inner.message = message.to_string();
        }
        log::info!("[Hub] status changed: {} - {}", status.as_str(), message);

        let payload = self.status_payload().to_string();
        self.broadcast(ViewerMessage::Text(payload)).await;
    }

    /// Current status label and message.
    pub fn current_status(&self) -> (StreamStatus, String) {
        let inner = self.status.lock();
        (inner.status, inner.message.clone())
    }

    fn status_payload(&self) -> serde_json::Value {
        let (status, message) = self.current_status();
        json!({
            "type": "status",
            "status": status.as_str(),
            "message": message,
            "frame_count": self.frame_cache.total_frames_received(),
            "viewer_count": self.viewer_count(),
        })
    }

    /// Sends a message to every viewer, evicting peers that cannot accept
    /// it within the send deadline. The viewer set is snapshotted inside the
    /// lock; the sends happen outside it.
    async fn broadcast(&self, message: ViewerMessage) {
        let targets: Vec<(u64, mpsc::Sender<ViewerMessage>)> = self
            .viewers
            .lock()
            .iter()
            .map(|(id, handle)| (*id, handle.tx.clone()))
            .collect();
        if targets.is_empty() {
            return;
        }

        let mut dead = Vec::new();
        for (id, tx) in targets {
            if !send_with_deadline(&tx, message.clone()).await {
                dead.push(id);
            }
        }

        for id in dead {
            let removed = self.viewers.lock().remove(&id);
            if let Some(handle) = removed {
                handle.cancel.cancel();
                log::warn!("[Hub] viewer {} evicted: send timed out or failed", id);
                self.presence.on_viewer_disconnect(id);
            }
        }
    }

    // ==================== Producer control ====================

    /// Sends a control message to the producer. Best-effort: returns whether
    /// the message was accepted within the deadline.
    pub async fn send_to_producer(&self, msg_type: u8, payload: Bytes) -> bool {
        let tx = self.producer.lock().as_ref().map(|h| h.tx.clone());
        let Some(tx) = tx else {
            return false;
        };

        let mut buf = BytesMut::with_capacity(1 + payload.len());
        buf.put_u8(msg_type);
        buf.extend_from_slice(&payload);

        let deadline = Duration::from_secs(PRODUCER_SEND_TIMEOUT_SECS);
        match timeout(deadline, tx.send(buf.freeze())).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                log::error!("[Hub] failed to send control message to producer");
                false
            }
            Err(_) => {
                log::error!("[Hub] timeout sending control message to producer");
                false
            }
        }
    }

    /// Asks the producer to persist its current state.
    pub async fn request_save_state(&self) -> bool {
        self.send_to_producer(CTRL_SAVE_STATE, Bytes::new()).await
    }

    /// Asks the producer to save state and shut down.
    pub async fn request_producer_shutdown(&self) -> bool {
        self.send_to_producer(CTRL_SHUTDOWN, Bytes::new()).await
    }

    // ==================== Statistics / shutdown ====================

    /// Consolidated hub state for the status endpoint.
    pub fn snapshot(&self) -> HubSnapshot {
        let (status, status_message) = self.current_status();
        HubSnapshot {
            status,
            status_message,
            viewer_count: self.viewer_count(),
            producer_connected: self.producer_connected(),
            last_frame_age_seconds: self.last_frame_age_seconds(),
            cache: self.frame_cache.stats(),
            playback: self.playback.stats(),
            presence: self.presence.snapshot(),
        }
    }

    /// Tears down every connection. Used on graceful shutdown.
    pub async fn shutdown(&self) {
        self.disconnect_producer().await;

        let handles: Vec<ViewerHandle> = {
            let mut viewers = self.viewers.lock();
            viewers.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            handle.cancel.cancel();
        }
        if !handles.is_empty() {
            log::info!("[Hub] closed {} viewer connection(s)", handles.len());
        }
    }
}

#[async_trait]
impl FrameSink for StreamingHub {
    async fn broadcast_frame(&self, payload: Bytes) {
        self.broadcast(ViewerMessage::Binary(frame_message(&payload)))
            .await;
    }

    async fn frame_displayed(&self, payload: Bytes, frame_number: u64) {
        self.frame_cache.add(payload, frame_number, 0, 0);
    }
}

/// Builds a `type byte || payload` binary frame message.
fn frame_message(payload: &Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(MSG_FRAME);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Sends to a viewer channel under the per-peer deadline.
async fn send_with_deadline(tx: &mpsc::Sender<ViewerMessage>, message: ViewerMessage) -> bool {
    let deadline = Duration::from_secs(VIEWER_SEND_TIMEOUT_SECS);
    matches!(timeout(deadline, tx.send(message)).await, Ok(Ok(())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::orchestrator::DisabledOrchestrator;
    use crate::services::presence::PodLifecycle;

    use tempfile::TempDir;
    use tokio::time::{self, Duration};

    struct Fixture {
        hub: Arc<StreamingHub>,
        playback: Arc<PlaybackQueue>,
        frame_cache: Arc<FrameCache>,
        presence: Arc<PresenceTracker>,
        pod: Arc<PodController>,
        state_store: Arc<StateStore>,
        _state_dir: TempDir,
    }

    fn fixture() -> Fixture {
        let pod = Arc::new(PodController::new(Arc::new(DisabledOrchestrator), false));
        let presence = Arc::new(PresenceTracker::new(
            Duration::from_secs(300),
            Duration::from_secs(300),
            Arc::clone(&pod) as Arc<dyn PodLifecycle>,
        ));
        let frame_cache = Arc::new(FrameCache::new(30));
        let playback = Arc::new(PlaybackQueue::new());
        let state_dir = TempDir::new().expect("tempdir");
        let state_store = Arc::new(StateStore::new(state_dir.path()));
        let hub = Arc::new(StreamingHub::new(
            Arc::clone(&frame_cache),
            Arc::clone(&playback),
            Arc::clone(&presence),
            Arc::clone(&pod),
            Arc::clone(&state_store),
        ));
        Fixture {
            hub,
            playback,
            frame_cache,
            presence,
            pod,
            state_store,
            _state_dir: state_dir,
        }
    }

    fn viewer_channel() -> (mpsc::Sender<ViewerMessage>, mpsc::Receiver<ViewerMessage>) {
        mpsc::channel(16)
    }

    fn producer_channel() -> (mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
        mpsc::channel(8)
    }

    fn frame_msg(payload: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + payload.len());
        buf.put_u8(MSG_FRAME);
        buf.extend_from_slice(payload);
        buf.freeze()
    }

    fn as_json(msg: &ViewerMessage) -> Option<serde_json::Value> {
        match msg {
            ViewerMessage::Text(text) => serde_json::from_str(text).ok(),
            ViewerMessage::Binary(_) => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn viewer_gets_status_then_cached_frame() {
        let f = fixture();
        f.frame_cache.add(Bytes::from_static(b"img"), 7, 2, 0);

        let (tx, mut rx) = viewer_channel();
        f.hub.connect_viewer(tx, CancellationToken::new()).await;

        let first = rx.recv().await.expect("status message");
        let status = as_json(&first).expect("status is JSON");
        assert_eq!(status["type"], "status");

        let second = rx.recv().await.expect("initial frame");
        match second {
            ViewerMessage::Binary(data) => {
                assert_eq!(data[0], MSG_FRAME);
                assert_eq!(&data[1..], b"img");
            }
            other => panic!("expected binary frame, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn viewer_without_cached_frame_gets_only_status() {
        let f = fixture();
        let (tx, mut rx) = viewer_channel();
        f.hub.connect_viewer(tx, CancellationToken::new()).await;

        let first = rx.recv().await.expect("status message");
        assert!(as_json(&first).is_some());
        assert!(rx.try_recv().is_err(), "no binary until frames arrive");
    }

    #[tokio::test(start_paused = true)]
    async fn dead_viewer_is_evicted_on_broadcast() {
        let f = fixture();

        let (dead_tx, dead_rx) = viewer_channel();
        drop(dead_rx);
        f.hub.connect_viewer(dead_tx, CancellationToken::new()).await;

        let (live_tx, mut live_rx) = viewer_channel();
        f.hub.connect_viewer(live_tx, CancellationToken::new()).await;
        let _ = live_rx.recv().await; // initial status

        assert_eq!(f.hub.viewer_count(), 2);
        assert_eq!(f.presence.viewer_count(), 2);

        f.hub.broadcast_frame(Bytes::from_static(b"frame")).await;

        assert_eq!(f.hub.viewer_count(), 1, "dead viewer swept");
        assert_eq!(f.presence.viewer_count(), 1, "presence notified");

        // The healthy viewer still got the frame
        let msg = live_rx.recv().await.expect("frame for live viewer");
        assert!(matches!(msg, ViewerMessage::Binary(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_producer_is_rejected() {
        let f = fixture();

        let (tx1, _rx1) = producer_channel();
        assert!(f
            .hub
            .connect_producer(tx1, CancellationToken::new())
            .await
            .is_ok());

        let (tx2, _rx2) = producer_channel();
        assert!(f
            .hub
            .connect_producer(tx2, CancellationToken::new())
            .await
            .is_err());

        assert!(f.hub.producer_connected());
        assert_eq!(f.pod.state(), PodState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn frame_numbering_restarts_each_session() {
        let f = fixture();

        // Session 1: three frames stay buffered (below playback threshold)
        let (tx, _rx) = producer_channel();
        f.hub
            .connect_producer(tx, CancellationToken::new())
            .await
            .unwrap();
        for i in 0..3u8 {
            f.hub.handle_producer_message(frame_msg(&[i])).await;
        }
        assert_eq!(f.playback.stats().frames_received, 3);
        f.hub.disconnect_producer().await;

        // Session 2: counters reset, numbering restarts at 1
        let (tx, _rx) = producer_channel();
        f.hub
            .connect_producer(tx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(f.playback.stats().frames_received, 0);

        for i in 0..5u8 {
            f.hub.handle_producer_message(frame_msg(&[i])).await;
        }
        time::sleep(Duration::from_secs(3)).await;

        // All five displayed; the newest carries number 5, not 8
        assert_eq!(f.frame_cache.stats().total_frames_received, 5);
        assert_eq!(f.frame_cache.current().unwrap().frame_number, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn producer_status_updates_fps_and_notifies_viewers() {
        let f = fixture();

        let (vtx, mut vrx) = viewer_channel();
        f.hub.connect_viewer(vtx, CancellationToken::new()).await;

        let (ptx, _prx) = producer_channel();
        f.hub
            .connect_producer(ptx, CancellationToken::new())
            .await
            .unwrap();

        let mut status = BytesMut::new();
        status.put_u8(MSG_STATUS);
        status.extend_from_slice(br#"{"target_fps": 8.0, "step": 1234}"#);
        f.hub.handle_producer_message(status.freeze()).await;

        assert_eq!(f.playback.target_fps(), 8.0);

        let mut config_seen = false;
        while let Ok(msg) = vrx.try_recv() {
            if let Some(v) = as_json(&msg) {
                if v["type"] == "config" {
                    assert_eq!(v["target_fps"], 8.0);
                    config_seen = true;
                }
            }
        }
        assert!(config_seen, "viewers are told about the new pacing");
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_producer_status_is_ignored() {
        let f = fixture();
        let mut status = BytesMut::new();
        status.put_u8(MSG_STATUS);
        status.extend_from_slice(b"not json");
        f.hub.handle_producer_message(status.freeze()).await;

        assert_eq!(f.playback.target_fps(), 5.0, "default fps untouched");
    }

    #[tokio::test]
    async fn state_snapshot_is_persisted() {
        let f = fixture();

        let mut msg = BytesMut::new();
        msg.put_u8(MSG_STATE);
        msg.extend_from_slice(b"generation state blob");
        f.hub.handle_producer_message(msg.freeze()).await;

        // The save runs on a spawned task over the blocking pool
        tokio::time::sleep(Duration::from_millis(200)).await;

        let loaded = f.state_store.load().await.expect("load ok");
        assert_eq!(loaded.as_deref(), Some(b"generation state blob".as_slice()));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_and_empty_messages_are_ignored() {
        let f = fixture();
        f.hub
            .handle_producer_message(Bytes::from_static(&[0xFF, 1, 2]))
            .await;
        f.hub.handle_producer_message(Bytes::new()).await;

        assert_eq!(f.playback.stats().frames_received, 0);
        assert!(f.hub.last_frame_age_seconds().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_refreshes_producer_contact() {
        let f = fixture();
        assert!(f.hub.last_frame_age_seconds().is_none());

        f.hub
            .handle_producer_message(Bytes::from_static(&[MSG_HEARTBEAT]))
            .await;
        time::advance(Duration::from_secs(2)).await;

        assert_eq!(f.hub.last_frame_age_seconds(), Some(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn control_messages_reach_the_producer() {
        let f = fixture();
        assert!(!f.hub.request_save_state().await, "no producer yet");

        let (ptx, mut prx) = producer_channel();
        f.hub
            .connect_producer(ptx, CancellationToken::new())
            .await
            .unwrap();

        assert!(f.hub.request_save_state().await);
        assert_eq!(
            prx.recv().await.unwrap(),
            Bytes::from_static(&[CTRL_SAVE_STATE])
        );

        assert!(f.hub.request_producer_shutdown().await);
        assert_eq!(
            prx.recv().await.unwrap(),
            Bytes::from_static(&[CTRL_SHUTDOWN])
        );
    }

    #[tokio::test(start_paused = true)]
    async fn producer_disconnect_goes_idle_and_tells_viewers() {
        let f = fixture();

        let (vtx, mut vrx) = viewer_channel();
        f.hub.connect_viewer(vtx, CancellationToken::new()).await;

        let (ptx, _prx) = producer_channel();
        f.hub
            .connect_producer(ptx, CancellationToken::new())
            .await
            .unwrap();
        f.hub.disconnect_producer().await;

        let (status, _) = f.hub.current_status();
        assert_eq!(status, StreamStatus::Idle);
        assert!(!f.hub.producer_connected());

        let mut labels = Vec::new();
        while let Ok(msg) = vrx.try_recv() {
            if let Some(v) = as_json(&msg) {
                if v["type"] == "status" {
                    labels.push(v["status"].as_str().unwrap().to_string());
                }
            }
        }
        assert_eq!(labels.last().map(String::as_str), Some("idle"));
        assert!(labels.contains(&"ready".to_string()));
    }
}
