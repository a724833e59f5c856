//! Storage and serving of recent dream frames.
//!
//! Maintains a rolling buffer of recently displayed frames for immediate
//! display to newly connected viewers, API access to the current frame, and
//! fallback during brief GPU disconnections. Also tracks rolling-window and
//! per-session FPS statistics.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::protocol_constants::FPS_WINDOW_SECS;

/// A single cached frame with metadata.
#[derive(Debug, Clone)]
pub struct CachedFrame {
    /// Opaque compressed image bytes (WebP in practice).
    pub payload: Bytes,
    /// Sequential frame number, assigned by the hub at receive time.
    pub frame_number: u64,
    /// Producer-defined keyframe this frame belongs to (passed through opaquely).
    pub keyframe_number: u64,
    /// When the frame entered the cache.
    pub received_at: Instant,
    /// How long generation took, as reported by the producer.
    pub gen_time_ms: u32,
}

/// Cache statistics exposed on the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub frames_cached: usize,
    pub max_frames: usize,
    pub total_frames_received: u64,
    pub total_bytes_received: u64,
    /// Frames per second over the rolling window.
    pub average_fps: f64,
    /// Frames per second since the current producer session began.
    pub session_fps: f64,
    pub uptime_seconds: f64,
    pub current_frame_number: u64,
    pub current_keyframe_number: u64,
}

struct CacheInner {
    frames: VecDeque<CachedFrame>,
    current: Option<CachedFrame>,
    total_frames_received: u64,
    total_bytes_received: u64,
    started_at: Instant,
    /// Timestamps of frames received inside the rolling FPS window.
    frame_timestamps: VecDeque<Instant>,
    session_start: Option<Instant>,
    session_frames: u64,
}

/// Thread-safe cache of recent frames.
///
/// Stores the last N frames in memory and serves the most recent one to API
/// requests and newly connected viewers.
pub struct FrameCache {
    max_frames: usize,
    inner: Mutex<CacheInner>,
}

impl FrameCache {
    /// Creates a cache holding at most `max_frames` frames.
    pub fn new(max_frames: usize) -> Self {
        Self {
            max_frames,
            inner: Mutex::new(CacheInner {
                frames: VecDeque::with_capacity(max_frames),
                current: None,
                total_frames_received: 0,
                total_bytes_received: 0,
                started_at: Instant::now(),
                frame_timestamps: VecDeque::new(),
                session_start: None,
                session_frames: 0,
            }),
        }
    }

    /// Adds a new frame to the cache and makes it the current frame.
    pub fn add(&self, payload: Bytes, frame_number: u64, keyframe_number: u64, gen_time_ms: u32) {
        let now = Instant::now();
        let frame = CachedFrame {
            payload,
            frame_number,
            keyframe_number,
            received_at: now,
            gen_time_ms,
        };

        let mut inner = self.inner.lock();
        if inner.frames.len() >= self.max_frames {
            inner.frames.pop_front();
        }
        inner.total_frames_received += 1;
        inner.total_bytes_received += frame.payload.len() as u64;
        inner.frames.push_back(frame.clone());
        inner.current = Some(frame);

        inner.frame_timestamps.push_back(now);
        inner.session_frames += 1;
        if inner.session_start.is_none() {
            inner.session_start = Some(now);
        }

        // Prune timestamps that fell out of the rolling window
        if let Some(cutoff) = now.checked_sub(Duration::from_secs_f64(FPS_WINDOW_SECS)) {
            while inner
                .frame_timestamps
                .front()
                .is_some_and(|t| *t < cutoff)
            {
                inner.frame_timestamps.pop_front();
            }
        }
    }

    /// Returns the most recent frame, if any.
    pub fn current(&self) -> Option<CachedFrame> {
        self.inner.lock().current.clone()
    }

    /// Returns the total number of frames ever received.
    pub fn total_frames_received(&self) -> u64 {
        self.inner.lock().total_frames_received
    }

    /// Returns cache statistics.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let inner = self.inner.lock();

        // Rolling FPS: span between oldest and newest retained timestamps
        let average_fps = match (
            inner.frame_timestamps.front(),
            inner.frame_timestamps.back(),
        ) {
            (Some(oldest), Some(newest)) if inner.frame_timestamps.len() >= 2 => {
                let span = newest.duration_since(*oldest).as_secs_f64();
                if span > 0.0 {
                    (inner.frame_timestamps.len() - 1) as f64 / span
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        let session_fps = match inner.session_start {
            Some(start) if inner.session_frames > 0 => {
                let elapsed = now.duration_since(start).as_secs_f64();
                if elapsed > 0.0 {
                    inner.session_frames as f64 / elapsed
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        CacheStats {
            frames_cached: inner.frames.len(),
            max_frames: self.max_frames,
            total_frames_received: inner.total_frames_received,
            total_bytes_received: inner.total_bytes_received,
            average_fps: round2(average_fps),
            session_fps: round2(session_fps),
            uptime_seconds: round1(now.duration_since(inner.started_at).as_secs_f64()),
            current_frame_number: inner.current.as_ref().map_or(0, |f| f.frame_number),
            current_keyframe_number: inner.current.as_ref().map_or(0, |f| f.keyframe_number),
        }
    }

    /// Resets session stats. Called when a producer connects.
    ///
    /// Deliberately keeps the frame ring and current frame so viewers keep
    /// seeing the last image across a GPU bounce.
    pub fn reset_session(&self) {
        let mut inner = self.inner.lock();
        inner.session_start = None;
        inner.session_frames = 0;
        inner.frame_timestamps.clear();
    }

    /// Clears all cached frames.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.frames.clear();
        inner.current = None;
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
