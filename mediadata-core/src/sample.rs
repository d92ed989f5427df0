//! Common timing metadata shared by every media sample.

use std::fmt;

use crate::time::TimeUnit;

/// What a sample carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleKind {
    Audio,
    Video,
    Raw,
}

impl SampleKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Raw => "raw",
        }
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

/// Position and timing of a sample within its source stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleInfo {
    /// Byte offset of the sample in the source stream
    pub offset: i64,
    /// Presentation timestamp
    pub time: TimeUnit,
    /// Always non-negative
    pub duration: TimeUnit,
    /// Decode timestamp
    pub timecode: TimeUnit,
    pub keyframe: bool,
}

impl SampleInfo {
    pub fn new(offset: i64, time: TimeUnit, duration: TimeUnit) -> Self {
        debug_assert!(!duration.is_negative(), "sample duration must be non-negative");
        Self {
            offset,
            time,
            duration,
            timecode: time,
            keyframe: false,
        }
    }

    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    pub fn with_timecode(mut self, timecode: TimeUnit) -> Self {
        self.timecode = timecode;
        self
    }

    /// `time + duration`, or `None` if the sum overflows.
    pub fn end_time(&self) -> Option<TimeUnit> {
        self.time.checked_add(&self.duration).ok()
    }
}

/// Accessors common to audio, video and raw samples.
pub trait MediaSample {
    fn kind(&self) -> SampleKind;

    fn info(&self) -> &SampleInfo;

    fn offset(&self) -> i64 {
        self.info().offset
    }

    fn time(&self) -> TimeUnit {
        self.info().time
    }

    fn duration(&self) -> TimeUnit {
        self.info().duration
    }

    fn timecode(&self) -> TimeUnit {
        self.info().timecode
    }

    fn is_keyframe(&self) -> bool {
        self.info().keyframe
    }

    fn end_time(&self) -> Option<TimeUnit> {
        self.info().end_time()
    }

    /// Approximate heap footprint, for memory reporting.
    fn size_of_including_this(&self) -> usize;
}
