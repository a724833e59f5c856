//! Frame playback queue - smooth frame pacing for viewers.
//!
//! Frames arrive from the GPU at variable intervals (network jitter, batch
//! generation) and are released to viewers at a steady rate:
//!
//! - producer frames are queued (bounded, oldest dropped on overrun)
//! - the playback loop runs at `target_fps - cushion` so a buffer accumulates
//! - playback waits for a minimum backlog before the first frame goes out
//! - on underrun the queue emits nothing, so viewers hold the last frame
//!   (a freeze, never a stutter)

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::protocol_constants::{
    BUFFER_POLL_INTERVAL_MS, DEFAULT_TARGET_FPS, FPS_CUSHION, MAX_QUEUE_SIZE, MIN_BUFFER_FRAMES,
    OVERRUN_TRIM_TO,
};

/// Destination for paced frames.
///
/// The playback loop calls `broadcast_frame` on every tick that has a frame,
/// then `frame_displayed` so the displayed frame can be cached. Implementations
/// must not re-enter the queue from these callbacks.
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Fans the frame out to all connected viewers.
    async fn broadcast_frame(&self, payload: Bytes);

    /// Called after a frame has been broadcast.
    async fn frame_displayed(&self, payload: Bytes, frame_number: u64);
}

/// A frame waiting in the playback queue.
struct QueuedFrame {
    payload: Bytes,
    frame_number: u64,
}

struct QueueInner {
    queue: VecDeque<QueuedFrame>,
    target_fps: f64,
    playback_started: bool,
    frames_received: u64,
    frames_displayed: u64,
    frames_dropped: u64,
    underruns: u64,
    playback_start: Option<Instant>,
}

/// Playback statistics exposed on the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct PlaybackStats {
    pub queue_depth: usize,
    pub buffer_seconds: f64,
    pub target_fps: f64,
    pub effective_fps: f64,
    /// Displayed frames per second since playback started.
    pub actual_fps: f64,
    pub frames_received: u64,
    pub frames_displayed: u64,
    pub frames_dropped: u64,
    pub underruns: u64,
    pub playback_started: bool,
}

/// Bounded FIFO absorbing bursty producer arrivals, drained at steady FPS.
pub struct PlaybackQueue {
    inner: Mutex<QueueInner>,
}

impl PlaybackQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                queue: VecDeque::new(),
                target_fps: DEFAULT_TARGET_FPS,
                playback_started: false,
                frames_received: 0,
                frames_displayed: 0,
                frames_dropped: 0,
                underruns: 0,
                playback_start: None,
            }),
        }
    }

    /// Adds a frame to the playback queue.
    ///
    /// On overrun the oldest frames are dropped down to the trim level so
    /// playback stays live rather than falling behind.
    pub fn enqueue(&self, payload: Bytes, frame_number: u64) {
        let mut inner = self.inner.lock();
        inner.queue.push_back(QueuedFrame {
            payload,
            frame_number,
        });
        inner.frames_received += 1;

        if inner.queue.len() > MAX_QUEUE_SIZE {
            let dropped = inner.queue.len() - OVERRUN_TRIM_TO;
            for _ in 0..dropped {
                inner.queue.pop_front();
            }
            inner.frames_dropped += dropped as u64;
            log::warn!(
                "[Playback] overrun: dropped {} frames, queue now {} frames",
                dropped,
                inner.queue.len()
            );
        }

        if inner.frames_received % 50 == 0 {
            log::info!(
                "[Playback] queue: {} frames ({:.1}s buffer), received: {}, displayed: {}",
                inner.queue.len(),
                buffer_seconds(&inner),
                inner.frames_received,
                inner.frames_displayed
            );
        }
    }

    /// Sets the target FPS (from producer configuration). Non-positive
    /// values are ignored.
    pub fn set_target_fps(&self, fps: f64) {
        if fps > 0.0 {
            let mut inner = self.inner.lock();
            let old = inner.target_fps;
            inner.target_fps = fps;
            log::info!("[Playback] target FPS updated: {} -> {}", old, fps);
        }
    }

    /// Producer's desired cadence.
    pub fn target_fps(&self) -> f64 {
        self.inner.lock().target_fps
    }

    /// Actual playback rate: slightly below target so a buffer accumulates.
    pub fn effective_fps(&self) -> f64 {
        effective_fps(self.inner.lock().target_fps)
    }

    /// Number of frames currently queued.
    pub fn queue_depth(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Full reset, used on producer reconnect.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.queue.clear();
        inner.playback_started = false;
        inner.frames_received = 0;
        inner.frames_displayed = 0;
        inner.frames_dropped = 0;
        inner.underruns = 0;
        inner.playback_start = None;
        log::info!("[Playback] queue reset");
    }

    /// Returns playback statistics.
    pub fn stats(&self) -> PlaybackStats {
        let inner = self.inner.lock();

        let actual_fps = match inner.playback_start {
            Some(start) if inner.frames_displayed > 0 => {
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    inner.frames_displayed as f64 / elapsed
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        PlaybackStats {
            queue_depth: inner.queue.len(),
            buffer_seconds: round2(buffer_seconds(&inner)),
            target_fps: inner.target_fps,
            effective_fps: round2(effective_fps(inner.target_fps)),
            actual_fps: round2(actual_fps),
            frames_received: inner.frames_received,
            frames_displayed: inner.frames_displayed,
            frames_dropped: inner.frames_dropped,
            underruns: inner.underruns,
            playback_started: inner.playback_started,
        }
    }

    /// Main playback loop. Runs until `cancel` fires; one logical worker per
    /// producer session.
    ///
    /// The loop holds frames until [`MIN_BUFFER_FRAMES`] have accumulated,
    /// then releases one frame per tick at the effective rate. Empty ticks
    /// count as underruns and emit nothing.
    pub async fn run(self: Arc<Self>, sink: Arc<dyn FrameSink>, cancel: CancellationToken) {
        {
            let inner = self.inner.lock();
            log::info!(
                "[Playback] loop started: target {} FPS, effective {:.1} FPS",
                inner.target_fps,
                effective_fps(inner.target_fps)
            );
        }

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // Wait for the minimum buffer before the first frame goes out
            let buffering = {
                let mut inner = self.inner.lock();
                if inner.playback_started {
                    false
                } else if inner.queue.len() >= MIN_BUFFER_FRAMES {
                    inner.playback_started = true;
                    inner.playback_start = Some(Instant::now());
                    log::info!(
                        "[Playback] starting: {} frames buffered ({:.1}s)",
                        inner.queue.len(),
                        buffer_seconds(&inner)
                    );
                    false
                } else {
                    true
                }
            };
            if buffering {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(Duration::from_millis(BUFFER_POLL_INTERVAL_MS)) => {}
                }
                continue;
            }

            let tick_start = Instant::now();
            let interval = Duration::from_secs_f64(1.0 / self.effective_fps());

            let next = self.inner.lock().queue.pop_front();
            match next {
                Some(frame) => {
                    sink.broadcast_frame(frame.payload.clone()).await;
                    sink.frame_displayed(frame.payload, frame.frame_number).await;
                    self.inner.lock().frames_displayed += 1;
                }
                None => {
                    // Underrun: emit nothing so viewers hold the last frame
                    let underruns = {
                        let mut inner = self.inner.lock();
                        inner.underruns += 1;
                        inner.underruns
                    };
                    if underruns == 1 || underruns % 10 == 0 {
                        log::warn!(
                            "[Playback] underrun #{}: queue empty, holding last frame",
                            underruns
                        );
                    }
                }
            }

            let sleep_for = interval.saturating_sub(tick_start.elapsed());
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }

        log::info!("[Playback] loop stopped");
    }
}

impl Default for PlaybackQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn effective_fps(target_fps: f64) -> f64 {
    (target_fps - FPS_CUSHION).max(1.0)
}

fn buffer_seconds(inner: &QueueInner) -> f64 {
    if inner.target_fps <= 0.0 {
        return 0.0;
    }
    inner.queue.len() as f64 / inner.target_fps
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{self, Duration};

    /// Test sink that records displayed frame numbers.
    struct RecordingSink {
        displayed: Mutex<Vec<u64>>,
        broadcasts: Mutex<Vec<usize>>,
    }

    impl RecordingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                displayed: Mutex::new(Vec::new()),
                broadcasts: Mutex::new(Vec::new()),
            })
        }

        fn displayed(&self) -> Vec<u64> {
            self.displayed.lock().clone()
        }

        fn broadcast_count(&self) -> usize {
            self.broadcasts.lock().len()
        }
    }

    #[async_trait]
    impl FrameSink for RecordingSink {
        async fn broadcast_frame(&self, payload: Bytes) {
            self.broadcasts.lock().push(payload.len());
        }

        async fn frame_displayed(&self, _payload: Bytes, frame_number: u64) {
            self.displayed.lock().push(frame_number);
        }
    }

    fn payload(n: u64) -> Bytes {
        Bytes::from(vec![n as u8; 16])
    }

    fn spawn_queue(
        queue: &Arc<PlaybackQueue>,
        sink: &Arc<RecordingSink>,
    ) -> CancellationToken {
        let cancel = CancellationToken::new();
        tokio::spawn(Arc::clone(queue).run(
            Arc::clone(sink) as Arc<dyn FrameSink>,
            cancel.clone(),
        ));
        cancel
    }

    #[tokio::test(start_paused = true)]
    async fn holds_frames_until_min_buffer() {
        let queue = Arc::new(PlaybackQueue::new());
        let sink = RecordingSink::new();
        let cancel = spawn_queue(&queue, &sink);

        for n in 1..MIN_BUFFER_FRAMES as u64 {
            queue.enqueue(payload(n), n);
        }
        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            sink.broadcast_count(),
            0,
            "nothing plays below the buffer threshold"
        );
        assert!(!queue.stats().playback_started);

        // The threshold frame releases playback; the first tick emits frame #1
        queue.enqueue(payload(5), 5);
        time::sleep(Duration::from_millis(300)).await;
        assert!(queue.stats().playback_started);
        assert_eq!(sink.displayed().first(), Some(&1));

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn drains_in_fifo_order_at_effective_rate() {
        let queue = Arc::new(PlaybackQueue::new());
        let sink = RecordingSink::new();
        let cancel = spawn_queue(&queue, &sink);

        for n in 1..=10u64 {
            queue.enqueue(payload(n), n);
        }

        // 10 frames at ~4.7 effective fps drain within ~2.2s
        time::sleep(Duration::from_secs(4)).await;
        assert_eq!(sink.displayed(), (1..=10).collect::<Vec<_>>());
        assert_eq!(queue.stats().frames_displayed, 10);

        cancel.cancel();
    }

    #[tokio::test]
    async fn overrun_trims_to_watermark() {
        let queue = PlaybackQueue::new();
        for n in 1..=(MAX_QUEUE_SIZE as u64 + 1) {
            queue.enqueue(payload(n), n);
        }

        let stats = queue.stats();
        assert_eq!(stats.queue_depth, OVERRUN_TRIM_TO);
        assert_eq!(
            stats.frames_dropped,
            (MAX_QUEUE_SIZE + 1 - OVERRUN_TRIM_TO) as u64
        );
        assert_eq!(stats.frames_received, MAX_QUEUE_SIZE as u64 + 1);
    }

    #[tokio::test]
    async fn queue_never_exceeds_max_size() {
        let queue = PlaybackQueue::new();
        for n in 1..=200u64 {
            queue.enqueue(payload(n), n);
            assert!(queue.queue_depth() <= MAX_QUEUE_SIZE);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn underruns_emit_nothing() {
        let queue = Arc::new(PlaybackQueue::new());
        let sink = RecordingSink::new();
        let cancel = spawn_queue(&queue, &sink);

        for n in 1..=5u64 {
            queue.enqueue(payload(n), n);
        }

        // Drain the buffer, then let several empty ticks pass
        time::sleep(Duration::from_secs(5)).await;

        let stats = queue.stats();
        assert_eq!(stats.frames_displayed, 5);
        assert!(stats.underruns > 0, "empty ticks count as underruns");
        assert_eq!(
            sink.broadcast_count(),
            5,
            "no re-broadcast of the last frame on underrun"
        );

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn reset_clears_queue_and_counters() {
        let queue = Arc::new(PlaybackQueue::new());
        let sink = RecordingSink::new();
        let cancel = spawn_queue(&queue, &sink);

        for n in 1..=4u64 {
            queue.enqueue(payload(n), n);
        }
        time::sleep(Duration::from_secs(1)).await;

        // 4 buffered frames never started playback; reset drops them
        assert_eq!(sink.broadcast_count(), 0);
        cancel.cancel();
        queue.reset();

        let stats = queue.stats();
        assert_eq!(stats.queue_depth, 0);
        assert_eq!(stats.frames_received, 0);
        assert_eq!(stats.frames_displayed, 0);
        assert!(!stats.playback_started);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_the_loop() {
        let queue = Arc::new(PlaybackQueue::new());
        let sink = RecordingSink::new();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&queue).run(
            Arc::clone(&sink) as Arc<dyn FrameSink>,
            cancel.clone(),
        ));

        time::sleep(Duration::from_millis(250)).await;
        cancel.cancel();
        time::sleep(Duration::from_millis(250)).await;
        assert!(handle.is_finished(), "loop exits within one tick of stop");
    }

    #[tokio::test]
    async fn effective_fps_applies_cushion_and_floor() {
        let queue = PlaybackQueue::new();
        assert!((queue.effective_fps() - (DEFAULT_TARGET_FPS - FPS_CUSHION)).abs() < 1e-9);

        queue.set_target_fps(1.0);
        assert_eq!(queue.effective_fps(), 1.0, "floor at 1.0 fps");

        queue.set_target_fps(0.0);
        assert_eq!(queue.target_fps(), 1.0, "non-positive fps is ignored");
    }
}
