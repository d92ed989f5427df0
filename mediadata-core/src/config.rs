//! Tunables for the recycle pool and for video plane validation.
//!
//! Both structs deserialize from partial JSON; missing fields fall back to
//! their defaults.

use serde::{Deserialize, Serialize};

use crate::buffer::BUFFER_ALIGNMENT;
use crate::error::{MediaError, Result};

/// Recycle pool retention policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on bytes kept in free lists across all size classes
    pub max_retained_bytes: usize,
    /// Free buffers kept per size class before the oldest is dropped
    pub max_buffers_per_class: usize,
    /// Requested sizes are rounded up to this many bytes to form a size class
    pub size_class_granularity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_retained_bytes: 64 * 1024 * 1024, // ~10 1080p 10-bit frames
            max_buffers_per_class: 8,
            size_class_granularity: 64,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> Result<()> {
        if self.size_class_granularity == 0 || self.size_class_granularity % BUFFER_ALIGNMENT != 0 {
            return Err(MediaError::invalid(format!(
                "size_class_granularity must be a non-zero multiple of {}",
                BUFFER_ALIGNMENT
            )));
        }
        Ok(())
    }

    /// Size class a request of `size` bytes falls into.
    pub fn size_class(&self, size: usize) -> Option<usize> {
        let g = self.size_class_granularity;
        size.checked_add(g - 1).map(|v| v / g * g)
    }

    /// Largest size class a buffer of `capacity` bytes can serve; 0 if none.
    pub fn class_for_capacity(&self, capacity: usize) -> usize {
        let g = self.size_class_granularity;
        capacity / g * g
    }
}

/// Plane size limits applied when a decoder hands over picture data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoLimits {
    /// Largest width or height of any single plane
    pub max_dimension: u32,
    pub max_video_width: u32,
    pub max_video_height: u32,
}

impl Default for VideoLimits {
    fn default() -> Self {
        Self {
            max_dimension: 16384,
            max_video_width: 8192,
            max_video_height: 4608,
        }
    }
}

impl VideoLimits {
    /// Pixel budget a single plane must stay strictly below.
    pub fn max_pixels(&self) -> u64 {
        self.max_video_width as u64 * self.max_video_height as u64
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_dimension == 0 || self.max_video_width == 0 || self.max_video_height == 0 {
            return Err(MediaError::invalid("video limits must be non-zero"));
        }
        Ok(())
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub pool: PoolConfig,
    pub video: VideoLimits,
}

impl MediaConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MediaConfig = serde_json::from_str(json)
            .map_err(|e| MediaError::invalid(format!("config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> String {
        // Plain integer fields always serialize.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        self.pool.validate()?;
        self.video.validate()
    }
}
