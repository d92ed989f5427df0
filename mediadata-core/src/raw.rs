//! Demuxed, still-encoded samples.

use std::fmt;
use std::mem::size_of;
use std::str::FromStr;
use std::sync::Arc;

use bitflags::bitflags;
use bytes::Bytes;

use crate::buffer::SampleBuffer;
use crate::error::Result;
use crate::sample::{MediaSample, SampleInfo, SampleKind};
use crate::time::TimeInterval;
use crate::video::VideoInfo;

// ============================================================================
// Encryption
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CryptoScheme {
    #[default]
    None,
    Cenc,
    Cbcs,
    Cbcs1_9,
}

impl CryptoScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Cenc => "cenc",
            Self::Cbcs => "cbcs",
            Self::Cbcs1_9 => "cbcs-1-9",
        }
    }
}

/// Unknown names map to [`CryptoScheme::None`].
impl FromStr for CryptoScheme {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "cenc" => Self::Cenc,
            "cbcs" => Self::Cbcs,
            "cbcs-1-9" => Self::Cbcs1_9,
            _ => Self::None,
        })
    }
}

bitflags! {
    /// Schemes a key system supports.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CryptoSchemeSet: u8 {
        const CENC = 1 << 0;
        const CBCS = 1 << 1;
        const CBCS_1_9 = 1 << 2;
    }
}

impl CryptoSchemeSet {
    pub fn contains_scheme(&self, scheme: CryptoScheme) -> bool {
        match scheme {
            CryptoScheme::None => false,
            CryptoScheme::Cenc => self.contains(Self::CENC),
            CryptoScheme::Cbcs => self.contains(Self::CBCS),
            CryptoScheme::Cbcs1_9 => self.contains(Self::CBCS_1_9),
        }
    }
}

impl From<CryptoScheme> for CryptoSchemeSet {
    fn from(scheme: CryptoScheme) -> Self {
        match scheme {
            CryptoScheme::None => Self::empty(),
            CryptoScheme::Cenc => Self::CENC,
            CryptoScheme::Cbcs => Self::CBCS,
            CryptoScheme::Cbcs1_9 => Self::CBCS_1_9,
        }
    }
}

impl fmt::Display for CryptoSchemeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = [CryptoScheme::Cenc, CryptoScheme::Cbcs, CryptoScheme::Cbcs1_9]
            .into_iter()
            .filter(|s| self.contains_scheme(*s))
            .map(|s| s.as_str())
            .collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("/"))
        }
    }
}

/// Per-sample decryption parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CryptoSample {
    pub scheme: CryptoScheme,
    pub key_id: Vec<u8>,
    pub iv: Vec<u8>,
    /// Clear bytes before each encrypted range
    pub plain_sizes: Vec<u32>,
    pub encrypted_sizes: Vec<u32>,
    /// cbcs pattern: encrypted blocks, then skipped blocks
    pub crypt_byte_block: u8,
    pub skip_byte_block: u8,
}

impl CryptoSample {
    /// True unless the scheme is `None`.
    pub fn is_encrypted(&self) -> bool {
        self.scheme != CryptoScheme::None
    }
}

// ============================================================================
// Track Info
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum TrackKind {
    Audio { rate: u32, channels: u32 },
    Video(VideoInfo),
}

/// Immutable description of the track a sample came from.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub id: u32,
    pub mime_type: String,
    pub kind: TrackKind,
}

impl TrackInfo {
    /// Video properties for a video track.
    pub fn video(&self) -> Option<&VideoInfo> {
        match &self.kind {
            TrackKind::Video(info) => Some(info),
            TrackKind::Audio { .. } => None,
        }
    }
}

// ============================================================================
// Raw Sample
// ============================================================================

#[derive(Debug, Default)]
pub struct RawSample {
    info: SampleInfo,
    buffer: SampleBuffer<u8>,
    alpha_buffer: SampleBuffer<u8>,
    crypto: Arc<CryptoSample>,
    track_info: Option<Arc<TrackInfo>>,
    /// Codec configuration (avcC, esds, ...)
    extra_data: Bytes,
    eos: bool,
    original_presentation_window: Option<TimeInterval>,
}

impl RawSample {
    /// Copy `data` into a new sample.
    pub fn new(data: &[u8]) -> Result<Self> {
        Ok(Self::from_buffer(SampleBuffer::from_slice(data)?))
    }

    /// Copy a payload together with its alpha plane payload.
    pub fn with_alpha(data: &[u8], alpha: &[u8]) -> Result<Self> {
        let mut sample = Self::new(data)?;
        sample.alpha_buffer = SampleBuffer::from_slice(alpha)?;
        Ok(sample)
    }

    /// Adopt an existing buffer without copying.
    pub fn from_buffer(buffer: SampleBuffer<u8>) -> Self {
        Self { buffer, ..Default::default() }
    }

    pub fn info_mut(&mut self) -> &mut SampleInfo {
        &mut self.info
    }

    /// Encoded payload.
    pub fn data(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Payload length in bytes.
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Alpha plane payload; empty for most codecs.
    pub fn alpha_data(&self) -> &[u8] {
        self.alpha_buffer.as_slice()
    }

    /// Encryption metadata.
    pub fn crypto(&self) -> &CryptoSample {
        &self.crypto
    }

    /// Track the sample was demuxed from.
    pub fn track_info(&self) -> Option<&Arc<TrackInfo>> {
        self.track_info.as_ref()
    }

    pub fn set_track_info(&mut self, info: Arc<TrackInfo>) {
        self.track_info = Some(info);
    }

    /// Codec configuration shared with other samples of the track.
    pub fn extra_data(&self) -> &Bytes {
        &self.extra_data
    }

    pub fn set_extra_data(&mut self, data: Bytes) {
        self.extra_data = data;
    }

    /// True for the end-of-stream marker.
    pub fn is_eos(&self) -> bool {
        self.eos
    }

    pub fn set_eos(&mut self, eos: bool) {
        self.eos = eos;
    }

    /// Presentation window before edit-list trimming.
    pub fn original_presentation_window(&self) -> Option<TimeInterval> {
        self.original_presentation_window
    }

    pub fn set_original_presentation_window(&mut self, window: TimeInterval) {
        self.original_presentation_window = Some(window);
    }

    /// Copy both payloads; track info, crypto and extra data are shared.
    ///
    /// Either everything is copied or an error is returned.
    pub fn try_clone(&self) -> Result<Self> {
        let height = self.track_info.as_ref().and_then(|t| t.video()).map_or(0, |v| v.image.height);
        let _span = tracing::trace_span!("copy_demuxed_data", height).entered();
        Ok(Self {
            info: self.info,
            buffer: self.buffer.try_clone()?,
            alpha_buffer: self.alpha_buffer.try_clone()?,
            crypto: Arc::clone(&self.crypto),
            track_info: self.track_info.clone(),
            extra_data: self.extra_data.clone(),
            eos: self.eos,
            original_presentation_window: self.original_presentation_window,
        })
    }

    /// Borrow the payload and crypto metadata for writing.
    pub fn writer(&mut self) -> RawSampleWriter<'_> {
        RawSampleWriter { target: self }
    }
}

impl MediaSample for RawSample {
    fn kind(&self) -> SampleKind {
        SampleKind::Raw
    }

    fn info(&self) -> &SampleInfo {
        &self.info
    }

    fn size_of_including_this(&self) -> usize {
        size_of::<Self>() + self.buffer.size_of_excluding_this()
    }
}

/// Mutable access to a sample's payload and encryption metadata.
pub struct RawSampleWriter<'a> {
    target: &'a mut RawSample,
}

impl RawSampleWriter<'_> {
    /// Resize the payload, zero-filling any new bytes.
    pub fn set_size(&mut self, size: usize) -> Result<()> {
        self.target.buffer.set_length(size)
    }

    pub fn prepend(&mut self, data: &[u8]) -> Result<()> {
        self.target.buffer.prepend(data)
    }

    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        self.target.buffer.append(data)
    }

    pub fn replace(&mut self, data: &[u8]) -> Result<()> {
        self.target.buffer.replace(data)
    }

    pub fn clear(&mut self) {
        self.target.buffer.clear();
    }

    pub fn pop_front(&mut self, size: usize) {
        self.target.buffer.pop_front(size);
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        self.target.buffer.as_mut_slice()
    }

    pub fn size(&self) -> usize {
        self.target.buffer.len()
    }

    /// Clones the crypto metadata first if a copy of the sample shares it.
    pub fn crypto_mut(&mut self) -> &mut CryptoSample {
        Arc::make_mut(&mut self.target.crypto)
    }
}
