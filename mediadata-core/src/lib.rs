//! # MediaData Core
//!
//! Typed media samples between a demuxer, a decoder and a renderer:
//! encoded payloads, interleaved PCM with trimming, and planar video with
//! 8-bit down-conversion and pooled plane storage.
//!
//! ```text
//! ┌─────────┐ RawSample ┌─────────┐ AudioFrame / VideoFrame ┌──────────┐
//! │ Demuxer │──────────►│ Decoder │────────────────────────►│ Renderer │
//! └─────────┘           └────┬────┘                         └──────────┘
//!                            │ acquire / release
//!                      ┌─────┴───────┐
//!                      │ RecyclePool │
//!                      └─────────────┘
//! ```

// ============================================================================
// Foundations
// ============================================================================
pub mod error;
pub mod time;
pub mod config;

// ============================================================================
// Storage
// ============================================================================
pub mod buffer;
pub mod pool;

// ============================================================================
// Samples
// ============================================================================
pub mod sample;
pub mod audio;
pub mod format;
pub mod video;
pub mod convert;
pub mod raw;

pub use audio::{AudioDataValue, AudioFrame, ChannelMap};
pub use buffer::{SampleBuffer, BUFFER_ALIGNMENT};
pub use config::{MediaConfig, PoolConfig, VideoLimits};
pub use convert::{QuantizableBuffer, QuantizeState};
pub use error::{MediaError, Result};
pub use format::{
    ChromaSubsampling, ColorDepth, ColorPrimaries, ColorRange, Rect, Size, TransferFunction,
    YuvColorSpace,
};
pub use pool::{PoolStats, PooledBuffer, RecyclePool};
pub use raw::{CryptoSample, CryptoScheme, CryptoSchemeSet, RawSample, RawSampleWriter, TrackInfo};
pub use sample::{MediaSample, SampleInfo, SampleKind};
pub use time::{TimeInterval, TimeUnit};
pub use video::{Image, ImageContainer, Plane, VideoFrame, VideoInfo, YCbCrBuffer};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a `tracing` subscriber for tests; safe to call repeatedly.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
