//! # Video Frames
//!
//! Decoded pictures and the images they point at.
//!
//! A decoder hands over borrowed planes ([`YCbCrBuffer`]); the frame either
//! copies them into pooled storage or adopts a [`QuantizableBuffer`] that was
//! already copied (and possibly reduced to 8 bits). Images are shared with the
//! compositor through `Arc`, which only ever keeps a weak handle.
//!
//! ```text
//! ┌─────────┐ planes ┌────────────┐ Arc<Image> ┌────────────┐
//! │ Decoder │───────►│ VideoFrame │───────────►│ Compositor │
//! └─────────┘        └─────┬──────┘   (Weak)   └────────────┘
//!                          │ storage
//!                    ┌─────┴───────┐
//!                    │ RecyclePool │
//!                    └─────────────┘
//! ```

use std::fmt;
use std::mem::size_of;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::buffer::SampleBuffer;
use crate::config::{MediaConfig, VideoLimits};
use crate::convert::{i420_alpha_to_bgra, QuantizableBuffer};
use crate::error::{MediaError, Result};
use crate::format::{
    ChromaSubsampling, ColorDepth, ColorPrimaries, ColorRange, Rect, Size, TransferFunction,
    YuvColorSpace,
};
use crate::pool::{PooledBuffer, RecyclePool};
use crate::sample::{MediaSample, SampleInfo, SampleKind};
use crate::time::TimeUnit;

// ============================================================================
// Decoder Planes
// ============================================================================

/// One borrowed plane. `stride` is in bytes; `skip` is the number of samples
/// to step over after each sample (interleaved chroma).
#[derive(Debug, Clone, Copy)]
pub struct Plane<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub skip: u32,
}

impl<'a> Plane<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32, stride: u32) -> Self {
        Self { data, width, height, stride, skip: 0 }
    }

    pub fn with_skip(mut self, skip: u32) -> Self {
        self.skip = skip;
        self
    }

    /// Bytes the plane must span to hold `width` x `height` samples.
    pub fn required_len(&self, bytes_per_sample: usize) -> Option<usize> {
        if self.width == 0 || self.height == 0 {
            return Some(0);
        }
        let step = (self.skip as usize).checked_add(1)?;
        let last_row = (self.width as usize - 1)
            .checked_mul(step)?
            .checked_add(1)?
            .checked_mul(bytes_per_sample)?;
        (self.stride as usize)
            .checked_mul(self.height as usize - 1)?
            .checked_add(last_row)
    }
}

/// Y, Cb and Cr planes plus the color tags the decoder attached.
#[derive(Debug, Clone, Copy)]
pub struct YCbCrBuffer<'a> {
    pub planes: [Plane<'a>; 3],
    pub color_depth: ColorDepth,
    pub yuv_color_space: YuvColorSpace,
    pub color_primaries: ColorPrimaries,
    pub color_range: ColorRange,
    pub chroma_subsampling: ChromaSubsampling,
}

impl<'a> YCbCrBuffer<'a> {
    pub fn new(
        planes: [Plane<'a>; 3],
        color_depth: ColorDepth,
        chroma_subsampling: ChromaSubsampling,
    ) -> Self {
        Self {
            planes,
            color_depth,
            yuv_color_space: YuvColorSpace::default(),
            color_primaries: ColorPrimaries::default(),
            color_range: ColorRange::default(),
            chroma_subsampling,
        }
    }

    pub fn with_color(
        mut self,
        space: YuvColorSpace,
        primaries: ColorPrimaries,
        range: ColorRange,
    ) -> Self {
        self.yuv_color_space = space;
        self.color_primaries = primaries;
        self.color_range = range;
        self
    }
}

// ============================================================================
// Validation
// ============================================================================

/// Plane dimensions are sane for `limits` and the stride can hold a row.
pub fn validate_plane(plane: &Plane<'_>, limits: &VideoLimits) -> bool {
    plane.width <= limits.max_dimension
        && plane.height <= limits.max_dimension
        && (plane.width as u64) * (plane.height as u64) < limits.max_pixels()
        && plane.stride > 0
        && plane.width <= plane.stride
}

fn check_chroma_planes(buffer: &YCbCrBuffer<'_>) -> Result<()> {
    let [_, cb, cr] = &buffer.planes;
    if cb.width != cr.width || cb.height != cr.height {
        return Err(MediaError::invalid("Chroma planes with different sizes"));
    }
    Ok(())
}

fn check_plane_sizes(buffer: &YCbCrBuffer<'_>, limits: &VideoLimits) -> Result<()> {
    let bps = buffer.color_depth.bytes_per_sample();
    let fits = |p: &Plane<'_>| {
        validate_plane(p, limits) && p.required_len(bps).is_some_and(|len| len <= p.data.len())
    };
    if !buffer.planes.iter().all(fits) {
        return Err(MediaError::invalid("Invalid plane size"));
    }
    Ok(())
}

/// Plane checks without a picture rectangle.
pub fn validate_planes(buffer: &YCbCrBuffer<'_>, limits: &VideoLimits) -> Result<()> {
    check_chroma_planes(buffer)?;
    check_plane_sizes(buffer, limits)
}

/// Check that `picture` can be cut out of `buffer` without reading out of
/// bounds.
///
/// A picture whose right or bottom edge cannot be computed (negative origin,
/// `u32` overflow) is an [`MediaError::Overflow`]; one that computes but lies
/// outside the luma plane is an [`MediaError::InvalidArgument`].
pub fn validate_buffer_and_picture(
    buffer: &YCbCrBuffer<'_>,
    picture: &Rect,
    limits: &VideoLimits,
) -> Result<()> {
    // Only a broken decoder produces this.
    check_chroma_planes(buffer)?;

    if picture.is_empty() {
        return Err(MediaError::invalid("Empty picture rect"));
    }
    check_plane_sizes(buffer, limits)?;

    let limit = |origin: i32, extent: i32| {
        u32::try_from(origin)
            .ok()
            .and_then(|o| o.checked_add(extent as u32))
    };
    let y = &buffer.planes[0];
    match (limit(picture.x, picture.width), limit(picture.y, picture.height)) {
        (Some(x_limit), Some(y_limit)) if x_limit <= y.stride && y_limit <= y.height => Ok(()),
        (Some(_), Some(_)) => Err(MediaError::invalid("Overflowing picture rect")),
        _ => Err(MediaError::overflow("Overflowing picture rect")),
    }
}

// ============================================================================
// Plane Storage
// ============================================================================

/// Where a plane lives inside an image's storage. `stride` is in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    pub offset: usize,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

impl PlaneLayout {
    pub fn len(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn slice<'a>(&self, bytes: &'a [u8]) -> &'a [u8] {
        bytes.get(self.offset..self.offset + self.len()).unwrap_or(&[])
    }
}

/// Tight layouts for the planes of `buffer`, and the total byte count.
pub(crate) fn packed_layouts(buffer: &YCbCrBuffer<'_>) -> Result<([PlaneLayout; 3], usize)> {
    let bps = buffer.color_depth.bytes_per_sample();
    let too_big = || MediaError::overflow("Plane layout exceeds address space");
    let mut layouts = [PlaneLayout { offset: 0, width: 0, height: 0, stride: 0 }; 3];
    let mut offset = 0usize;
    for (layout, plane) in layouts.iter_mut().zip(&buffer.planes) {
        let stride = u32::try_from(plane.width as usize * bps).map_err(|_| too_big())?;
        *layout = PlaneLayout { offset, width: plane.width, height: plane.height, stride };
        offset = offset.checked_add(layout.len()).ok_or_else(too_big)?;
    }
    Ok((layouts, offset))
}

/// Copy validated planes into `dst`, dropping stride padding and skipped
/// samples.
pub(crate) fn copy_planes(buffer: &YCbCrBuffer<'_>, layouts: &[PlaneLayout; 3], dst: &mut [u8]) {
    let bps = buffer.color_depth.bytes_per_sample();
    for (plane, layout) in buffer.planes.iter().zip(layouts) {
        let row_bytes = plane.width as usize * bps;
        let step = (plane.skip as usize + 1) * bps;
        for row in 0..plane.height as usize {
            let src = &plane.data[row * plane.stride as usize..];
            let out = &mut dst[layout.offset + row * layout.stride as usize..][..row_bytes];
            if plane.skip == 0 {
                out.copy_from_slice(&src[..row_bytes]);
            } else {
                for (px, chunk) in out.chunks_exact_mut(bps).enumerate() {
                    chunk.copy_from_slice(&src[px * step..px * step + bps]);
                }
            }
        }
    }
}

// ============================================================================
// Images
// ============================================================================

/// Pixel data living in memory we own, as Y/Cb/Cr planes.
#[derive(Debug)]
pub struct PlanarYCbCrImage {
    planes: [PlaneLayout; 3],
    storage: PooledBuffer,
    picture: Rect,
    color_depth: ColorDepth,
    chroma_subsampling: ChromaSubsampling,
    yuv_color_space: YuvColorSpace,
    color_primaries: ColorPrimaries,
    color_range: ColorRange,
    transfer_function: Option<TransferFunction>,
}

impl PlanarYCbCrImage {
    /// Bytes of plane `index`; empty when out of range.
    pub fn plane(&self, index: usize) -> &[u8] {
        match self.planes.get(index) {
            Some(layout) => layout.slice(&self.storage),
            None => &[],
        }
    }

    /// Offset, size and stride of plane `index`.
    pub fn layout(&self, index: usize) -> Option<&PlaneLayout> {
        self.planes.get(index)
    }

    /// Visible region inside the luma plane.
    pub fn picture(&self) -> Rect {
        self.picture
    }

    /// Bits per sample of the stored planes.
    pub fn color_depth(&self) -> ColorDepth {
        self.color_depth
    }

    pub fn chroma_subsampling(&self) -> ChromaSubsampling {
        self.chroma_subsampling
    }

    pub fn yuv_color_space(&self) -> YuvColorSpace {
        self.yuv_color_space
    }

    pub fn color_primaries(&self) -> ColorPrimaries {
        self.color_primaries
    }

    pub fn color_range(&self) -> ColorRange {
        self.color_range
    }

    pub fn transfer_function(&self) -> Option<TransferFunction> {
        self.transfer_function
    }

    /// Bytes held by the plane storage.
    pub fn size_of_excluding_this(&self) -> usize {
        self.storage.capacity()
    }
}

/// Software BGRA surface
#[derive(Debug)]
pub struct SharedRgbImage {
    size: Size,
    stride: usize,
    data: SampleBuffer<u8>,
}

impl SharedRgbImage {
    /// Pixel dimensions.
    pub fn size(&self) -> Size {
        self.size
    }

    /// Bytes per row.
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Pixels in B, G, R, A byte order.
    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceKind {
    IoSurface,
    D3D11Texture,
    DmaBuf,
    SurfaceTexture,
}

/// Handle to a GPU or OS surface we never map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformSurface {
    pub kind: SurfaceKind,
    pub size: Size,
    pub handle: u64,
    pub color_depth: ColorDepth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    PlanarYCbCr,
    SharedRgb,
    MacIoSurface,
    D3D11Texture,
    DmaBuf,
    SurfaceTexture,
}

impl ImageFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::PlanarYCbCr => "PLANAR_YCBCR",
            Self::SharedRgb => "SHARED_RGB",
            Self::MacIoSurface => "MAC_IOSURFACE",
            Self::D3D11Texture => "D3D11_TEXTURE_ZERO_COPY",
            Self::DmaBuf => "DMABUF",
            Self::SurfaceTexture => "SURFACE_TEXTURE",
        }
    }
}

#[derive(Debug)]
pub enum Image {
    PlanarYCbCr(PlanarYCbCrImage),
    SharedRgb(SharedRgbImage),
    PlatformOpaque(PlatformSurface),
}

impl Image {
    pub fn format(&self) -> ImageFormat {
        match self {
            Self::PlanarYCbCr(_) => ImageFormat::PlanarYCbCr,
            Self::SharedRgb(_) => ImageFormat::SharedRgb,
            Self::PlatformOpaque(surface) => match surface.kind {
                SurfaceKind::IoSurface => ImageFormat::MacIoSurface,
                SurfaceKind::D3D11Texture => ImageFormat::D3D11Texture,
                SurfaceKind::DmaBuf => ImageFormat::DmaBuf,
                SurfaceKind::SurfaceTexture => ImageFormat::SurfaceTexture,
            },
        }
    }

    /// Visible size; the picture rectangle for planar images.
    pub fn size(&self) -> Size {
        match self {
            Self::PlanarYCbCr(img) => {
                Size::new(img.picture.width.max(0) as u32, img.picture.height.max(0) as u32)
            }
            Self::SharedRgb(img) => img.size,
            Self::PlatformOpaque(surface) => surface.size,
        }
    }

    pub fn color_depth(&self) -> ColorDepth {
        match self {
            Self::PlanarYCbCr(img) => img.color_depth,
            Self::SharedRgb(_) => ColorDepth::Color8,
            Self::PlatformOpaque(surface) => surface.color_depth,
        }
    }

    /// The planar image, if this is one.
    pub fn as_planar_ycbcr(&self) -> Option<&PlanarYCbCrImage> {
        match self {
            Self::PlanarYCbCr(img) => Some(img),
            _ => None,
        }
    }

    /// The BGRA image, if this is one.
    pub fn as_shared_rgb(&self) -> Option<&SharedRgbImage> {
        match self {
            Self::SharedRgb(img) => Some(img),
            _ => None,
        }
    }
}

/// Hands out frame ids and pooled storage for the images of one stream.
#[derive(Debug)]
pub struct ImageContainer {
    pool: Arc<RecyclePool>,
    limits: VideoLimits,
    next_frame_id: AtomicU64,
}

impl ImageContainer {
    pub fn new(pool: Arc<RecyclePool>, limits: VideoLimits) -> Self {
        Self { pool, limits, next_frame_id: AtomicU64::new(1) }
    }

    pub fn from_config(config: &MediaConfig) -> Result<Self> {
        config.validate()?;
        let pool = Arc::new(RecyclePool::new(config.pool.clone())?);
        Ok(Self::new(pool, config.video.clone()))
    }

    /// Pool the container's images borrow plane storage from.
    pub fn pool(&self) -> &Arc<RecyclePool> {
        &self.pool
    }

    /// Size caps applied when validating decoder planes.
    pub fn limits(&self) -> &VideoLimits {
        &self.limits
    }

    fn next_frame_id(&self) -> u64 {
        self.next_frame_id.fetch_add(1, Ordering::Relaxed)
    }
}

// ============================================================================
// Video Frame
// ============================================================================

/// Stream-level video properties
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoInfo {
    /// Size to present at
    pub display: Size,
    /// Coded picture size
    pub image: Size,
    pub transfer_function: Option<TransferFunction>,
}

/// Non-owning reference a compositor keeps to a frame's image.
#[derive(Debug, Clone)]
pub struct CompositorHandle(Weak<Image>);

impl CompositorHandle {
    pub fn upgrade(&self) -> Option<Arc<Image>> {
        self.0.upgrade()
    }
}

#[derive(Debug)]
pub struct VideoFrame {
    info: SampleInfo,
    display: Size,
    frame_id: u64,
    image: Option<Arc<Image>>,
    sent_to_compositor: AtomicBool,
    next_keyframe_time: Option<TimeUnit>,
}

impl VideoFrame {
    fn with_metadata(display: Size, info: SampleInfo, frame_id: u64) -> Self {
        debug_assert!(!info.duration.is_negative(), "Frame must have non-negative duration.");
        Self {
            info,
            display,
            frame_id,
            image: None,
            sent_to_compositor: AtomicBool::new(false),
            next_keyframe_time: None,
        }
    }

    /// Copy decoder planes into a new planar image.
    ///
    /// Without a container the frame carries timing only.
    pub fn create_and_copy_data(
        info: &VideoInfo,
        container: Option<&ImageContainer>,
        sample: SampleInfo,
        buffer: &YCbCrBuffer<'_>,
        picture: Rect,
    ) -> Result<Self> {
        let Some(container) = container else {
            return Ok(Self::with_metadata(info.display, sample, 0));
        };
        validate_buffer_and_picture(buffer, &picture, container.limits())?;

        let _span = tracing::trace_span!("copy_decoded_video", height = info.image.height).entered();
        let (planes, len) = packed_layouts(buffer)?;
        let mut storage = container.pool().acquire_pooled(len)?;
        copy_planes(buffer, &planes, &mut storage);

        let image = PlanarYCbCrImage {
            planes,
            storage,
            picture,
            color_depth: buffer.color_depth,
            chroma_subsampling: buffer.chroma_subsampling,
            yuv_color_space: buffer.yuv_color_space,
            color_primaries: buffer.color_primaries,
            color_range: buffer.color_range,
            transfer_function: info.transfer_function,
        };
        let mut frame = Self::with_metadata(info.display, sample, container.next_frame_id());
        frame.image = Some(Arc::new(Image::PlanarYCbCr(image)));
        Ok(frame)
    }

    /// Take over planes that were already copied, e.g. after an 8-bit
    /// conversion.
    pub fn create_and_adopt_data(
        info: &VideoInfo,
        container: Option<&ImageContainer>,
        sample: SampleInfo,
        buffer: QuantizableBuffer,
        picture: Rect,
    ) -> Result<Self> {
        let Some(container) = container else {
            return Ok(Self::with_metadata(info.display, sample, 0));
        };
        let view = buffer.as_ycbcr();
        validate_buffer_and_picture(&view, &picture, container.limits())?;
        let (color_depth, chroma_subsampling) = (view.color_depth, view.chroma_subsampling);
        let (yuv_color_space, color_primaries, color_range) =
            (view.yuv_color_space, view.color_primaries, view.color_range);

        let (planes, storage) = buffer.into_parts();
        let image = PlanarYCbCrImage {
            planes,
            storage,
            picture,
            color_depth,
            chroma_subsampling,
            yuv_color_space,
            color_primaries,
            color_range,
            transfer_function: info.transfer_function,
        };
        let mut frame = Self::with_metadata(info.display, sample, container.next_frame_id());
        frame.image = Some(Arc::new(Image::PlanarYCbCr(image)));
        Ok(frame)
    }

    /// Flatten 8-bit 4:2:0 planes plus `alpha` into a BGRA image.
    pub fn create_and_copy_data_with_alpha(
        info: &VideoInfo,
        container: Option<&ImageContainer>,
        sample: SampleInfo,
        buffer: &YCbCrBuffer<'_>,
        alpha: &Plane<'_>,
        picture: Rect,
    ) -> Result<Self> {
        let Some(container) = container else {
            return Ok(Self::with_metadata(info.display, sample, 0));
        };
        validate_buffer_and_picture(buffer, &picture, container.limits())?;

        if buffer.color_depth != ColorDepth::Color8
            || buffer.chroma_subsampling != ChromaSubsampling::HalfWidthAndHeight
        {
            return Err(MediaError::UnsupportedFormat {
                depth: buffer.color_depth.bit_depth(),
                subsampling: buffer.chroma_subsampling.to_string(),
            });
        }
        let y = &buffer.planes[0];
        let chroma = y.width.div_ceil(2);
        let chroma_rows = y.height.div_ceil(2);
        if buffer.planes[1].width < chroma || buffer.planes[1].height < chroma_rows {
            return Err(MediaError::invalid("Invalid plane size"));
        }
        if buffer.planes.iter().any(|p| p.skip != 0) || alpha.skip != 0 {
            return Err(MediaError::invalid("Interleaved planes are not supported with alpha"));
        }
        let alpha_fits = alpha.width == y.width
            && alpha.height == y.height
            && validate_plane(alpha, container.limits())
            && alpha.required_len(1).is_some_and(|len| len <= alpha.data.len());
        if !alpha_fits {
            return Err(MediaError::invalid("Invalid alpha plane size"));
        }

        let (width, height) = (y.width as usize, y.height as usize);
        let stride = width * 4;
        let mut data = SampleBuffer::with_length(stride * height)?;
        i420_alpha_to_bgra(buffer, alpha, data.as_mut_slice(), stride, width, height);

        let image = SharedRgbImage { size: Size::new(y.width, y.height), stride, data };
        let mut frame = Self::with_metadata(info.display, sample, container.next_frame_id());
        frame.image = Some(Arc::new(Image::SharedRgb(image)));
        Ok(frame)
    }

    /// Wrap an image owned elsewhere; no pixels are copied.
    pub fn create_from_image(display: Size, sample: SampleInfo, image: Arc<Image>) -> Self {
        let mut frame = Self::with_metadata(display, sample, 0);
        frame.image = Some(image);
        frame
    }

    /// Size to present the frame at.
    pub fn display(&self) -> Size {
        self.display
    }

    /// Id assigned by the container; 0 when there is none.
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn set_frame_id(&mut self, id: u64) {
        self.frame_id = id;
    }

    /// The decoded picture, if any.
    pub fn image(&self) -> Option<&Arc<Image>> {
        self.image.as_ref()
    }

    /// Weak handle that does not keep the image alive.
    pub fn compositor_handle(&self) -> Option<CompositorHandle> {
        self.image.as_ref().map(|img| CompositorHandle(Arc::downgrade(img)))
    }

    /// Returns whether the frame had already been sent.
    pub fn mark_sent_to_compositor(&self) -> bool {
        self.sent_to_compositor.swap(true, Ordering::AcqRel)
    }

    /// True once a compositor has taken the frame.
    pub fn is_sent_to_compositor(&self) -> bool {
        self.sent_to_compositor.load(Ordering::Acquire)
    }

    /// Time of the next keyframe, if known.
    pub fn next_keyframe_time(&self) -> Option<TimeUnit> {
        self.next_keyframe_time
    }

    pub fn set_next_keyframe_time(&mut self, time: TimeUnit) {
        self.next_keyframe_time = Some(time);
    }

    /// 8-bit when there is no image.
    pub fn color_depth(&self) -> ColorDepth {
        self.image.as_ref().map_or(ColorDepth::Color8, |img| img.color_depth())
    }

    /// Replace the duration; negative values are rejected.
    pub fn update_duration(&mut self, duration: TimeUnit) -> Result<()> {
        if duration.is_negative() {
            return Err(MediaError::invalid("Negative video frame duration"));
        }
        self.info.duration = duration;
        Ok(())
    }

    /// Move the start while keeping the end time fixed.
    pub fn update_timestamp(&mut self, timestamp: TimeUnit) -> Result<()> {
        if timestamp.is_negative() {
            return Err(MediaError::invalid("Negative video frame timestamp"));
        }
        let end = self
            .info
            .end_time()
            .ok_or_else(|| MediaError::overflow("Video frame end time"))?;
        let duration = end.checked_sub(&timestamp)?;
        if duration.is_negative() {
            return Err(MediaError::invalid("Timestamp past the end of the frame"));
        }
        self.info.time = timestamp;
        self.info.duration = duration;
        Ok(())
    }

    /// Shift the timestamp back by `start`. Returns false on overflow.
    pub fn adjust_for_start_time(&mut self, start: &TimeUnit) -> bool {
        match self.info.time.checked_sub(start) {
            Ok(time) => {
                if time.is_negative() {
                    tracing::warn!("Negative video start time after time-adjustment: {}", time);
                }
                self.info.time = time;
                true
            }
            Err(_) => false,
        }
    }
}

impl MediaSample for VideoFrame {
    fn kind(&self) -> SampleKind {
        SampleKind::Video
    }

    fn info(&self) -> &SampleInfo {
        &self.info
    }

    /// Only planar images own memory we can measure.
    fn size_of_including_this(&self) -> usize {
        let image = self
            .image
            .as_deref()
            .and_then(Image::as_planar_ycbcr)
            .map_or(0, |img| size_of::<Image>() + img.size_of_excluding_this());
        size_of::<Self>() + image
    }
}

impl fmt::Display for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VideoFrame [{},{}] [{}x{}] format: {}",
            self.info.time,
            self.info.duration,
            self.display.width,
            self.display.height,
            self.image.as_ref().map_or("null", |img| img.format().name())
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn container() -> ImageContainer {
        let pool = Arc::new(RecyclePool::new(PoolConfig::default()).unwrap());
        ImageContainer::new(pool, VideoLimits::default())
    }

    fn info() -> VideoInfo {
        VideoInfo { display: Size::new(4, 4), image: Size::new(4, 4), transfer_function: None }
    }

    fn sample() -> SampleInfo {
        SampleInfo::new(0, TimeUnit::from_millis(40), TimeUnit::from_millis(40)).with_keyframe(true)
    }

    /// 4x4 I420 with a 6-byte luma stride.
    struct Planes {
        y: Vec<u8>,
        u: Vec<u8>,
        v: Vec<u8>,
    }

    impl Planes {
        fn new() -> Self {
            Self { y: (0..24).collect(), u: vec![100, 101, 0, 102, 103, 0], v: vec![200; 6] }
        }

        fn buffer(&self) -> YCbCrBuffer<'_> {
            YCbCrBuffer::new(
                [
                    Plane::new(&self.y, 4, 4, 6),
                    Plane::new(&self.u, 2, 2, 3),
                    Plane::new(&self.v, 2, 2, 3),
                ],
                ColorDepth::Color8,
                ChromaSubsampling::HalfWidthAndHeight,
            )
        }
    }

    #[test]
    fn test_validate_plane() {
        let limits = VideoLimits::default();
        let data = [0u8; 16];
        assert!(validate_plane(&Plane::new(&data, 4, 4, 4), &limits));
        assert!(validate_plane(&Plane::new(&data, 4, 4, 8), &limits));
        assert!(!validate_plane(&Plane::new(&data, 4, 4, 3), &limits));
        assert!(!validate_plane(&Plane::new(&data, 4, 4, 0), &limits));
        assert!(!validate_plane(&Plane::new(&data, 16385, 1, 16385), &limits));
        assert!(!validate_plane(&Plane::new(&data, 8192, 4608, 8192), &limits));
        assert!(validate_plane(&Plane::new(&data, 8192, 4607, 8192), &limits));
    }

    #[test]
    fn test_validation_reasons() {
        let limits = VideoLimits::default();
        let planes = Planes::new();
        let picture = Rect::new(0, 0, 4, 4);

        let mut buffer = planes.buffer();
        buffer.planes[2].width = 1;
        let err = validate_buffer_and_picture(&buffer, &picture, &limits).unwrap_err();
        assert_eq!(err, MediaError::invalid("Chroma planes with different sizes"));

        let buffer = planes.buffer();
        let err = validate_buffer_and_picture(&buffer, &Rect::new(0, 0, 0, 4), &limits);
        assert_eq!(err.unwrap_err().reason(), "Empty picture rect");

        let mut short = planes.buffer();
        short.planes[0].data = &planes.y[..10];
        let err = validate_buffer_and_picture(&short, &picture, &limits).unwrap_err();
        assert_eq!(err.reason(), "Invalid plane size");

        let err = validate_buffer_and_picture(&buffer, &Rect::new(3, 0, 4, 4), &limits);
        assert_eq!(err.unwrap_err(), MediaError::invalid("Overflowing picture rect"));

        let err = validate_buffer_and_picture(&buffer, &Rect::new(-1, 0, 4, 4), &limits);
        assert_eq!(err.unwrap_err(), MediaError::overflow("Overflowing picture rect"));

        // The picture may extend into stride padding.
        assert!(validate_buffer_and_picture(&buffer, &Rect::new(2, 0, 4, 4), &limits).is_ok());
    }

    #[test]
    fn test_copy_data_packs_planes() {
        let container = container();
        let planes = Planes::new();
        let frame = VideoFrame::create_and_copy_data(
            &info(),
            Some(&container),
            sample(),
            &planes.buffer(),
            Rect::new(0, 0, 4, 4),
        )
        .unwrap();

        let image = frame.image().unwrap().as_planar_ycbcr().unwrap();
        assert_eq!(image.plane(0), &[0, 1, 2, 3, 6, 7, 8, 9, 12, 13, 14, 15, 18, 19, 20, 21]);
        assert_eq!(image.plane(1), &[100, 101, 102, 103]);
        assert_eq!(image.plane(2), &[200; 4]);
        assert_eq!(image.layout(0).unwrap().stride, 4);
        assert_eq!(frame.frame_id(), 1);
        assert!(frame.is_keyframe());
        assert_eq!(frame.to_string(), "VideoFrame [0.040000s,0.040000s] [4x4] format: PLANAR_YCBCR");
    }

    #[test]
    fn test_copy_data_with_skip() {
        let container = container();
        let y = [7u8; 4];
        let uv = [1u8, 2, 3, 4];
        let buffer = YCbCrBuffer::new(
            [
                Plane::new(&y, 2, 2, 2),
                Plane::new(&uv, 1, 1, 2).with_skip(1),
                Plane::new(&uv[1..], 1, 1, 2).with_skip(1),
            ],
            ColorDepth::Color8,
            ChromaSubsampling::HalfWidthAndHeight,
        );
        let frame = VideoFrame::create_and_copy_data(
            &info(),
            Some(&container),
            sample(),
            &buffer,
            Rect::new(0, 0, 2, 2),
        )
        .unwrap();
        let image = frame.image().unwrap().as_planar_ycbcr().unwrap();
        assert_eq!(image.plane(1), &[1]);
        assert_eq!(image.plane(2), &[2]);
    }

    #[test]
    fn test_overflowing_picture_copies_nothing() {
        let container = container();
        let planes = Planes::new();
        let result = VideoFrame::create_and_copy_data(
            &info(),
            Some(&container),
            sample(),
            &planes.buffer(),
            Rect::new(i32::MAX, 0, i32::MAX, 4),
        );
        assert_eq!(result.unwrap_err().reason(), "Overflowing picture rect");
        assert_eq!(container.pool().stats().total_allocated, 0);
    }

    #[test]
    fn test_no_container_gives_dummy_frame() {
        let planes = Planes::new();
        let frame = VideoFrame::create_and_copy_data(
            &info(),
            None,
            sample(),
            &planes.buffer(),
            Rect::new(0, 0, 0, 0),
        )
        .unwrap();
        assert!(frame.image().is_none());
        assert_eq!(frame.color_depth(), ColorDepth::Color8);
        assert!(frame.to_string().ends_with("format: null"));
    }

    #[test]
    fn test_frame_storage_returns_to_pool() {
        let container = container();
        let planes = Planes::new();
        let frame = VideoFrame::create_and_copy_data(
            &info(),
            Some(&container),
            sample(),
            &planes.buffer(),
            Rect::new(0, 0, 4, 4),
        )
        .unwrap();
        assert!(frame.size_of_including_this() > size_of::<VideoFrame>());
        let handle = frame.compositor_handle().unwrap();
        assert!(handle.upgrade().is_some());

        drop(frame);
        assert!(handle.upgrade().is_none());
        assert_eq!(container.pool().stats().available, 1);
    }

    #[test]
    fn test_adopt_converted_buffer() {
        let container = container();
        let y: Vec<u16> = vec![1023; 16];
        let c: Vec<u16> = vec![512; 4];
        let mut buffer = QuantizableBuffer::from_u16_planes(
            container.pool(),
            &y,
            &c,
            &c,
            4,
            4,
            ColorDepth::Color10,
            ChromaSubsampling::HalfWidthAndHeight,
        )
        .unwrap();
        buffer.to_8bit_per_channel(container.pool()).unwrap();
        assert_eq!(container.pool().stats().available, 1);

        let frame = VideoFrame::create_and_adopt_data(
            &info(),
            Some(&container),
            sample(),
            buffer,
            Rect::new(0, 0, 4, 4),
        )
        .unwrap();
        assert_eq!(frame.color_depth(), ColorDepth::Color8);
        let image = frame.image().unwrap().as_planar_ycbcr().unwrap();
        assert_eq!(image.plane(0), &[255; 16]);
        assert_eq!(image.plane(1), &[128; 4]);

        drop(frame);
        assert_eq!(container.pool().stats().available, 2);
    }

    #[test]
    fn test_high_depth_frame_reports_depth() {
        let container = container();
        let y: Vec<u16> = vec![0; 4];
        let c: Vec<u16> = vec![0; 1];
        let buffer = QuantizableBuffer::from_u16_planes(
            container.pool(),
            &y,
            &c,
            &c,
            2,
            2,
            ColorDepth::Color12,
            ChromaSubsampling::HalfWidthAndHeight,
        )
        .unwrap();
        let frame = VideoFrame::create_and_adopt_data(
            &info(),
            Some(&container),
            sample(),
            buffer,
            Rect::new(0, 0, 2, 2),
        )
        .unwrap();
        assert_eq!(frame.color_depth(), ColorDepth::Color12);
    }

    #[test]
    fn test_alpha_to_bgra() {
        let container = container();
        let y = [235u8, 16, 235, 16];
        let u = [128u8];
        let v = [128u8];
        let a = [255u8, 255, 0, 128];
        let buffer = YCbCrBuffer::new(
            [Plane::new(&y, 2, 2, 2), Plane::new(&u, 1, 1, 1), Plane::new(&v, 1, 1, 1)],
            ColorDepth::Color8,
            ChromaSubsampling::HalfWidthAndHeight,
        );
        let frame = VideoFrame::create_and_copy_data_with_alpha(
            &info(),
            Some(&container),
            sample(),
            &buffer,
            &Plane::new(&a, 2, 2, 2),
            Rect::new(0, 0, 2, 2),
        )
        .unwrap();

        let image = frame.image().unwrap();
        assert_eq!(image.format(), ImageFormat::SharedRgb);
        let rgb = image.as_shared_rgb().unwrap();
        assert_eq!(rgb.stride(), 8);
        assert_eq!(
            rgb.data(),
            &[255, 255, 255, 255, 0, 0, 0, 255, 255, 255, 255, 0, 0, 0, 0, 128]
        );
    }

    #[test]
    fn test_alpha_requires_8bit_420() {
        let container = container();
        let y = [0u8; 8];
        let c = [0u8; 8];
        let buffer = YCbCrBuffer::new(
            [Plane::new(&y, 2, 2, 4), Plane::new(&c, 1, 1, 2), Plane::new(&c, 1, 1, 2)],
            ColorDepth::Color10,
            ChromaSubsampling::HalfWidthAndHeight,
        );
        let alpha = [0u8; 4];
        let result = VideoFrame::create_and_copy_data_with_alpha(
            &info(),
            Some(&container),
            sample(),
            &buffer,
            &Plane::new(&alpha, 2, 2, 2),
            Rect::new(0, 0, 2, 2),
        );
        assert!(matches!(result, Err(MediaError::UnsupportedFormat { depth: 10, .. })));
    }

    #[test]
    fn test_update_timestamp_keeps_end() {
        let mut frame = VideoFrame::create_from_image(
            Size::new(16, 16),
            SampleInfo::new(0, TimeUnit::from_millis(100), TimeUnit::from_millis(40)),
            Arc::new(Image::PlatformOpaque(PlatformSurface {
                kind: SurfaceKind::DmaBuf,
                size: Size::new(16, 16),
                handle: 7,
                color_depth: ColorDepth::Color10,
            })),
        );
        frame.update_timestamp(TimeUnit::from_millis(120)).unwrap();
        assert_eq!(frame.duration(), TimeUnit::from_millis(20));
        assert_eq!(frame.end_time(), Some(TimeUnit::from_millis(140)));

        assert!(frame.update_timestamp(TimeUnit::from_millis(150)).is_err());
        assert!(frame.update_timestamp(TimeUnit::from_millis(-1)).is_err());
        assert!(frame.update_duration(TimeUnit::from_millis(-1)).is_err());
        assert_eq!(frame.time(), TimeUnit::from_millis(120));

        frame.update_duration(TimeUnit::from_millis(50)).unwrap();
        assert_eq!(frame.end_time(), Some(TimeUnit::from_millis(170)));
        assert_eq!(frame.color_depth(), ColorDepth::Color10);
        assert_eq!(frame.size_of_including_this(), size_of::<VideoFrame>());
        assert!(frame.to_string().ends_with("format: DMABUF"));
    }

    #[test]
    fn test_adjust_for_start_time_allows_negative() {
        crate::init_test_logging();
        let mut frame = VideoFrame::create_and_copy_data(
            &info(),
            None,
            SampleInfo::new(0, TimeUnit::from_millis(10), TimeUnit::from_millis(40)),
            &Planes::new().buffer(),
            Rect::default(),
        )
        .unwrap();
        assert!(frame.adjust_for_start_time(&TimeUnit::from_millis(30)));
        assert_eq!(frame.time(), TimeUnit::from_millis(-20));
        assert!(!frame.adjust_for_start_time(&TimeUnit::new(i64::MAX, 1)));
    }

    #[test]
    fn test_sent_to_compositor_flag() {
        let frame = VideoFrame::create_from_image(
            Size::new(1, 1),
            sample(),
            Arc::new(Image::PlatformOpaque(PlatformSurface {
                kind: SurfaceKind::IoSurface,
                size: Size::new(1, 1),
                handle: 1,
                color_depth: ColorDepth::Color8,
            })),
        );
        assert!(!frame.mark_sent_to_compositor());
        assert!(frame.mark_sent_to_compositor());
        assert!(frame.is_sent_to_compositor());
    }
}
