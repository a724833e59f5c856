//! Fixed wire-protocol and pacing constants.
//!
//! The binary framing bytes and close codes are part of the producer/viewer
//! wire contract; changing them breaks deployed GPU workers and embedded
//! viewer pages.

// ─────────────────────────────────────────────────────────────────────────────
// Binary message framing (type byte || payload)
// ─────────────────────────────────────────────────────────────────────────────

/// Producer → hub: one compressed image frame (opaque bytes, WebP in practice).
pub const MSG_FRAME: u8 = 0x01;

/// Producer → hub: opaque generation-state snapshot to persist.
pub const MSG_STATE: u8 = 0x02;

/// Producer → hub: heartbeat, empty payload.
pub const MSG_HEARTBEAT: u8 = 0x03;

/// Producer → hub: status JSON (UTF-8 object, recognized key: `target_fps`).
pub const MSG_STATUS: u8 = 0x04;

/// Hub → producer: save a state snapshot now.
pub const CTRL_SAVE_STATE: u8 = 0x12;

/// Hub → producer: save state and shut down.
pub const CTRL_SHUTDOWN: u8 = 0x13;

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket close codes
// ─────────────────────────────────────────────────────────────────────────────

/// Close code sent to a second producer while one is already connected.
pub const CLOSE_DUPLICATE_PRODUCER: u16 = 4000;

/// Close code for a missing, malformed, or mismatching producer bearer token.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;

// ─────────────────────────────────────────────────────────────────────────────
// Send deadlines
// ─────────────────────────────────────────────────────────────────────────────

/// Per-viewer send deadline (seconds). A peer that cannot accept a message
/// within this window is treated as dead and evicted; this is what prevents
/// one half-open socket from head-of-line blocking every other viewer.
pub const VIEWER_SEND_TIMEOUT_SECS: u64 = 5;

/// Hub → producer control-message send deadline (seconds).
pub const PRODUCER_SEND_TIMEOUT_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Playback pacing
// ─────────────────────────────────────────────────────────────────────────────

/// Producer cadence assumed until the producer reports its own `target_fps`.
pub const DEFAULT_TARGET_FPS: f64 = 5.0;

/// Playback runs this much below `target_fps` so a buffer accumulates.
pub const FPS_CUSHION: f64 = 0.3;

/// Minimum backlog before playback starts (~1 s at 5 fps).
pub const MIN_BUFFER_FRAMES: usize = 5;

/// Hard cap on the playback queue (~10 s at 5 fps).
pub const MAX_QUEUE_SIZE: usize = 50;

/// When `MAX_QUEUE_SIZE` is exceeded, oldest frames are trimmed to this depth.
pub const OVERRUN_TRIM_TO: usize = 30;

/// Sleep quantum while waiting for the initial buffer to fill (milliseconds).
pub const BUFFER_POLL_INTERVAL_MS: u64 = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Frame cache
// ─────────────────────────────────────────────────────────────────────────────

/// Default ring-buffer capacity for recently displayed frames.
pub const DEFAULT_FRAME_CACHE_SIZE: usize = 30;

/// Rolling window for the `average_fps` statistic (seconds).
pub const FPS_WINDOW_SECS: f64 = 30.0;

// ─────────────────────────────────────────────────────────────────────────────
// Presence / lifecycle
// ─────────────────────────────────────────────────────────────────────────────

/// Grace period after the last viewer leaves before the GPU is stopped (seconds).
pub const DEFAULT_SHUTDOWN_DELAY_SECS: u64 = 300;

/// Window in which read-API activity counts as "recent" (seconds).
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 300;

/// Minimum interval between identical orchestrator actions while the pod is
/// already in the matching transitional state (seconds).
pub const POD_ACTION_DEBOUNCE_SECS: u64 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Edge API
// ─────────────────────────────────────────────────────────────────────────────

/// Default read-API rate limit: requests per window, per client IP.
pub const DEFAULT_RATE_LIMIT_REQUESTS: usize = 60;

/// Default read-API rate-limit window (seconds).
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Nominal resolution reported by the embed endpoint.
pub const EMBED_WIDTH: u32 = 1024;
pub const EMBED_HEIGHT: u32 = 512;

// ─────────────────────────────────────────────────────────────────────────────
// Channel capacities
// ─────────────────────────────────────────────────────────────────────────────

/// Per-viewer outbound channel depth. Small on purpose: a stalled socket
/// fills it quickly, which converts into a send timeout and eviction.
pub const VIEWER_CHANNEL_CAPACITY: usize = 16;

/// Hub → producer control channel depth.
pub const PRODUCER_CHANNEL_CAPACITY: usize = 8;

/// Capacity of the pod-transition broadcast channel.
pub const POD_EVENT_CHANNEL_CAPACITY: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// Application identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in user-facing status text.
pub const APP_NAME: &str = "Reverie";

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "reverie";
