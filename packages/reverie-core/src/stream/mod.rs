//! Frame storage and pacing.
//!
//! This module contains the two frame-path data structures: the ring buffer
//! of recently displayed frames ([`frame_cache::FrameCache`]) and the bounded
//! playback queue that smooths bursty producer arrivals into a steady
//! broadcast cadence ([`playback::PlaybackQueue`]).

pub mod frame_cache;
pub mod playback;

pub use frame_cache::{CacheStats, CachedFrame, FrameCache};
pub use playback::{FrameSink, PlaybackQueue, PlaybackStats};
