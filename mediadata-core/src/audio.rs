//! # Audio Frames
//!
//! Decoded, channel-interleaved PCM with exact timing.
//!
//! Trimming never touches the samples: it narrows a window (`data_offset`,
//! `frames`) over the original buffer. [`AudioFrame::move_data`] is the only
//! operation that materialises the trimmed range, and it consumes the frame's
//! storage in the process.

use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

use bitflags::bitflags;
use once_cell::sync::OnceCell;

use crate::buffer::SampleBuffer;
use crate::error::{MediaError, Result};
use crate::sample::{MediaSample, SampleInfo, SampleKind};
use crate::time::{TimeInterval, TimeUnit};

/// Sample type produced by audio decoders.
pub type AudioDataValue = f32;

bitflags! {
    /// Speaker positions present in the interleaved data.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelMap: u32 {
        const FRONT_LEFT = 1 << 0;
        const FRONT_RIGHT = 1 << 1;
        const FRONT_CENTER = 1 << 2;
        const LOW_FREQUENCY = 1 << 3;
        const BACK_LEFT = 1 << 4;
        const BACK_RIGHT = 1 << 5;
        const SIDE_LEFT = 1 << 9;
        const SIDE_RIGHT = 1 << 10;

        const MONO = Self::FRONT_CENTER.bits();
        const STEREO = Self::FRONT_LEFT.bits() | Self::FRONT_RIGHT.bits();
        const SURROUND_5_1 = Self::STEREO.bits()
            | Self::FRONT_CENTER.bits()
            | Self::LOW_FREQUENCY.bits()
            | Self::BACK_LEFT.bits()
            | Self::BACK_RIGHT.bits();
    }
}

/// A block of decoded audio.
#[derive(Debug)]
pub struct AudioFrame {
    info: SampleInfo,
    channels: u32,
    rate: u32,
    channel_map: ChannelMap,
    original_time: TimeUnit,
    /// Duration of the untrimmed buffer
    original_duration: TimeUnit,
    trim_window: Option<TimeInterval>,
    /// `None` once the samples were moved out
    data: Option<SampleBuffer<AudioDataValue>>,
    /// Start of the trimmed window, in samples
    data_offset: usize,
    /// Frames in the trimmed window
    frames: usize,
    /// Lazily built channel-planar copy of the trimmed window
    planar: OnceCell<Arc<[AudioDataValue]>>,
}

impl AudioFrame {
    /// Wrap decoded samples. Duration is derived from the sample count.
    pub fn new(
        offset: i64,
        time: TimeUnit,
        samples: SampleBuffer<AudioDataValue>,
        channels: u32,
        rate: u32,
        channel_map: ChannelMap,
    ) -> Result<Self> {
        if channels == 0 {
            return Err(MediaError::invalid("Can't create an AudioFrame with 0 channels"));
        }
        if rate == 0 {
            return Err(MediaError::invalid("Can't create an AudioFrame with a sample-rate of 0"));
        }
        let frames = samples.len() / channels as usize;
        let duration = TimeUnit::new(frames as i64, rate as i64);
        Ok(Self {
            info: SampleInfo::new(offset, time, duration).with_keyframe(true),
            channels,
            rate,
            channel_map,
            original_time: time,
            original_duration: duration,
            trim_window: None,
            data: Some(samples),
            data_offset: 0,
            frames,
            planar: OnceCell::new(),
        })
    }

    /// Interleaved channel count.
    pub fn channels(&self) -> u32 {
        self.channels
    }

    /// Sample rate in Hz.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Speaker positions, or empty when unknown.
    pub fn channel_map(&self) -> ChannelMap {
        self.channel_map
    }

    /// Frames (samples per channel) in the current window.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Offset of the current window into the original buffer, in samples.
    pub fn data_offset(&self) -> usize {
        self.data_offset
    }

    /// Presentation time before any trimming.
    pub fn original_time(&self) -> TimeUnit {
        self.original_time
    }

    /// Active trim window, if one was set.
    pub fn trim_window(&self) -> Option<TimeInterval> {
        self.trim_window
    }

    /// True once [`move_data`](Self::move_data) took the samples.
    pub fn is_consumed(&self) -> bool {
        self.data.is_none()
    }

    /// Interleaved samples of the current window.
    pub fn data(&self) -> &[AudioDataValue] {
        match &self.data {
            Some(buffer) => {
                let end = self.data_offset + self.frames * self.channels as usize;
                &buffer[self.data_offset..end]
            }
            None => &[],
        }
    }

    /// Current window as native-endian bytes.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(self.data())
    }

    /// Restrict the frame to `trim`, expressed in absolute time.
    ///
    /// Returns false without changing anything when the window falls outside
    /// the original range, when the time arithmetic overflows, or when the
    /// samples were already moved out.
    pub fn set_trim_window(&mut self, trim: &TimeInterval) -> bool {
        let Some(buffer) = &self.data else {
            return false;
        };
        if trim.start > trim.end {
            return false;
        }
        let Ok(original_end) = self.original_time.checked_add(&self.original_duration) else {
            return false;
        };
        if trim.start < self.original_time || trim.end > original_end {
            return false;
        }

        let (Ok(trim_before), Ok(trim_after)) = (
            trim.start.checked_sub(&self.original_time),
            trim.end.checked_sub(&self.original_time),
        ) else {
            return false;
        };
        if self.trim_window.is_none() && trim_before.is_zero() && trim_after == self.original_duration
        {
            // Nothing to change; recomputing would only add rounding drift.
            return true;
        }

        let rate = self.rate as i64;
        let channels = self.channels as usize;
        let Ok(frame_offset) = trim_before.to_ticks_at_rate(rate) else {
            return false;
        };
        let Some(frame_count) = trim_after
            .checked_sub(&trim_before)
            .and_then(|len| len.to_ticks_at_rate(rate))
            .ok()
        else {
            return false;
        };
        let Ok(time) = self.original_time.checked_add(&trim_before) else {
            return false;
        };

        let total_frames = buffer.len() / channels;
        let frame_offset = frame_offset as usize;
        if frame_offset > total_frames {
            return false;
        }
        let available = total_frames - frame_offset;
        let frames = if frame_count as usize > available {
            // Imprecise container time bases can round past the end.
            tracing::warn!(
                "Trimmed audio frame count {} exceeds the {} available frames",
                frame_count,
                available
            );
            0
        } else {
            frame_count as usize
        };

        self.trim_window = Some(*trim);
        self.data_offset = frame_offset * channels;
        self.frames = frames;
        self.info.time = time;
        self.info.duration = TimeUnit::new(frames as i64, rate);
        self.planar = OnceCell::new();
        true
    }

    /// Rebase every timestamp on `start`. Returns false only on overflow, in
    /// which case nothing is changed.
    pub fn adjust_for_start_time(&mut self, start: &TimeUnit) -> bool {
        let Ok(original_time) = self.original_time.checked_sub(start) else {
            return false;
        };
        let Ok(time) = self.info.time.checked_sub(start) else {
            return false;
        };
        let trim_window = match self.trim_window.map(|w| w.shifted_back(start)) {
            Some(Ok(w)) => Some(w),
            Some(Err(_)) => return false,
            None => None,
        };

        self.original_time = original_time;
        self.info.time = time;
        self.trim_window = trim_window;
        if time.is_negative() {
            tracing::warn!("Negative audio start time after time-adjustment: {}", time);
        }
        true
    }

    /// Replace the start time of an untrimmed frame.
    pub fn set_original_start_time(&mut self, start: TimeUnit) -> Result<()> {
        debug_assert!(self.trim_window.is_none(), "Do not call this if data has been trimmed!");
        if self.trim_window.is_some() {
            return Err(MediaError::PreconditionViolation(
                "original start time changed on trimmed audio".into(),
            ));
        }
        self.info.time = start;
        self.original_time = start;
        Ok(())
    }

    /// Take the trimmed samples out of the frame. The frame is left empty;
    /// later calls return an empty buffer.
    pub fn move_data(&mut self) -> SampleBuffer<AudioDataValue> {
        let Some(mut buffer) = self.data.take() else {
            return SampleBuffer::new();
        };
        buffer.pop_front(self.data_offset);
        buffer.truncate(self.frames * self.channels as usize);
        self.data_offset = 0;
        self.frames = 0;
        self.trim_window = None;
        self.planar = OnceCell::new();
        buffer
    }

    /// Channel-planar copy of the current window (`[ch0 frames.., ch1 frames..]`),
    /// built on first use and shared afterwards.
    pub fn to_planar(&self) -> Result<Arc<[AudioDataValue]>> {
        if self.data.is_none() {
            return Ok(Arc::from(Vec::new()));
        }
        self.planar
            .get_or_try_init(|| {
                let src = self.data();
                let channels = self.channels as usize;
                let frames = self.frames;
                let mut planar = Vec::new();
                planar.try_reserve_exact(src.len()).map_err(|_| MediaError::OutOfMemory {
                    bytes: src.len() * size_of::<AudioDataValue>(),
                })?;
                planar.resize(src.len(), 0.0);
                for (i, frame) in src.chunks_exact(channels).enumerate() {
                    for (ch, sample) in frame.iter().enumerate() {
                        planar[ch * frames + i] = *sample;
                    }
                }
                Ok(Arc::from(planar))
            })
            .cloned()
    }

    /// One channel of the planar copy.
    pub fn planar_channel(&self, channel: u32) -> Result<Option<Vec<AudioDataValue>>> {
        if channel >= self.channels {
            return Ok(None);
        }
        let planar = self.to_planar()?;
        let start = channel as usize * self.frames;
        Ok(planar.get(start..start + self.frames).map(|s| s.to_vec()))
    }
}

impl MediaSample for AudioFrame {
    fn kind(&self) -> SampleKind {
        SampleKind::Audio
    }

    fn info(&self) -> &SampleInfo {
        &self.info
    }

    fn size_of_including_this(&self) -> usize {
        let mut size = size_of::<Self>();
        if let Some(buffer) = &self.data {
            size += buffer.size_of_excluding_this();
        }
        if let Some(planar) = self.planar.get() {
            size += planar.len() * size_of::<AudioDataValue>();
        }
        size
    }
}

impl fmt::Display for AudioFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioFrame: {} {} {} frames {}Hz, {}ch",
            self.info.time, self.info.duration, self.frames, self.rate, self.channels
        )
    }
}
