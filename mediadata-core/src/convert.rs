// PIXEL CONVERT - Bit depth reduction and YUVA to BGRA
//
// High bit depth decoders (10/12-bit AV1, VP9, HEVC) hand us 16-bit
// containers. Compositors that only take 8-bit planes get a down-converted
// copy built in a buffer borrowed from the recycle pool.
//
// Alpha video (VP8/VP9 with an alpha plane) is flattened to BGRA on the CPU
// using integer lookup tables.

use std::fmt;
use std::sync::Arc;

use crate::config::VideoLimits;
use crate::error::{MediaError, Result};
use crate::format::{ChromaSubsampling, ColorDepth, ColorPrimaries, ColorRange, YuvColorSpace};
use crate::pool::{PooledBuffer, RecyclePool};
use crate::video::{
    copy_planes, packed_layouts, validate_planes, Plane, PlaneLayout, YCbCrBuffer,
};

// ============================================================================
// 16-bit to 8-bit
// ============================================================================

/// Source planes, 16 bits per sample; strides counted in samples.
struct Planes16<'a> {
    y: &'a [u8],
    u: &'a [u8],
    v: &'a [u8],
    y_stride: usize,
    uv_stride: usize,
}

/// Destination planes, 8 bits per sample.
struct Planes8<'a> {
    y: &'a mut [u8],
    u: &'a mut [u8],
    v: &'a mut [u8],
    y_stride: usize,
    uv_stride: usize,
}

type Convert16To8 = fn(&Planes16<'_>, &mut Planes8<'_>, u32, u32);

fn convert_plane_16_to_8(
    src: &[u8],
    src_stride: usize,
    dst: &mut [u8],
    dst_stride: usize,
    width: usize,
    height: usize,
    depth: u8,
) {
    let shift = depth - 8;
    for row in 0..height {
        let s = &src[row * src_stride * 2..][..width * 2];
        let d = &mut dst[row * dst_stride..][..width];
        for (out, px) in d.iter_mut().zip(s.chunks_exact(2)) {
            let v: u16 = bytemuck::pod_read_unaligned(px);
            *out = (v >> shift).min(255) as u8;
        }
    }
}

fn convert_yuv_16_to_8(
    src: &Planes16<'_>,
    dst: &mut Planes8<'_>,
    width: u32,
    height: u32,
    depth: u8,
    subsampling: ChromaSubsampling,
) {
    let (cw, ch) = subsampling.chroma_size(width, height);
    let (w, h, cw, ch) = (width as usize, height as usize, cw as usize, ch as usize);
    convert_plane_16_to_8(src.y, src.y_stride, dst.y, dst.y_stride, w, h, depth);
    convert_plane_16_to_8(src.u, src.uv_stride, dst.u, dst.uv_stride, cw, ch, depth);
    convert_plane_16_to_8(src.v, src.uv_stride, dst.v, dst.uv_stride, cw, ch, depth);
}

macro_rules! convert_routine {
    ($name:ident, $depth:expr, $subsampling:expr) => {
        fn $name(src: &Planes16<'_>, dst: &mut Planes8<'_>, width: u32, height: u32) {
            convert_yuv_16_to_8(src, dst, width, height, $depth, $subsampling)
        }
    };
}

convert_routine!(i010_to_i420, 10, ChromaSubsampling::HalfWidthAndHeight);
convert_routine!(i012_to_i420, 12, ChromaSubsampling::HalfWidthAndHeight);
convert_routine!(i210_to_i422, 10, ChromaSubsampling::HalfWidth);
convert_routine!(i212_to_i422, 12, ChromaSubsampling::HalfWidth);
convert_routine!(i410_to_i444, 10, ChromaSubsampling::Full);
convert_routine!(i412_to_i444, 12, ChromaSubsampling::Full);

fn conversion_routine(depth: ColorDepth, subsampling: ChromaSubsampling) -> Option<Convert16To8> {
    use ChromaSubsampling::*;
    use ColorDepth::*;
    match (depth, subsampling) {
        (Color10, HalfWidthAndHeight) => Some(i010_to_i420),
        (Color12, HalfWidthAndHeight) => Some(i012_to_i420),
        (Color10, HalfWidth) => Some(i210_to_i422),
        (Color12, HalfWidth) => Some(i212_to_i422),
        (Color10, Full) => Some(i410_to_i444),
        (Color12, Full) => Some(i412_to_i444),
        _ => None,
    }
}

/// Conversion progress of a [`QuantizableBuffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantizeState {
    /// Holds the decoder's planes at their native depth
    Populated,
    /// Planes were rewritten to 8 bits per channel
    Converted,
}

/// Planar YCbCr picture that can be reduced to 8 bits per channel once.
pub struct QuantizableBuffer {
    planes: [PlaneLayout; 3],
    storage: PooledBuffer,
    color_depth: ColorDepth,
    chroma_subsampling: ChromaSubsampling,
    yuv_color_space: YuvColorSpace,
    color_primaries: ColorPrimaries,
    color_range: ColorRange,
    state: QuantizeState,
}

impl QuantizableBuffer {
    /// Copy decoder planes into a buffer borrowed from `pool`.
    pub fn copy_from(
        buffer: &YCbCrBuffer<'_>,
        pool: &Arc<RecyclePool>,
        limits: &VideoLimits,
    ) -> Result<Self> {
        validate_planes(buffer, limits)?;
        let y = &buffer.planes[0];
        let expected = buffer.chroma_subsampling.chroma_size(y.width, y.height);
        let cb = &buffer.planes[1];
        if (cb.width, cb.height) != expected {
            return Err(MediaError::invalid("Chroma plane size does not match subsampling"));
        }

        let (planes, len) = packed_layouts(buffer)?;
        let mut storage = pool.acquire_pooled(len)?;
        copy_planes(buffer, &planes, &mut storage);
        Ok(Self {
            planes,
            storage,
            color_depth: buffer.color_depth,
            chroma_subsampling: buffer.chroma_subsampling,
            yuv_color_space: buffer.yuv_color_space,
            color_primaries: buffer.color_primaries,
            color_range: buffer.color_range,
            state: QuantizeState::Populated,
        })
    }

    /// Build from tightly packed 16-bit planes, staged in `pool`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_u16_planes(
        pool: &Arc<RecyclePool>,
        y: &[u16],
        cb: &[u16],
        cr: &[u16],
        width: u32,
        height: u32,
        depth: ColorDepth,
        subsampling: ChromaSubsampling,
    ) -> Result<Self> {
        let (cw, ch) = subsampling.chroma_size(width, height);
        let buffer = YCbCrBuffer::new(
            [
                Plane::new(bytemuck::cast_slice(y), width, height, width * 2),
                Plane::new(bytemuck::cast_slice(cb), cw, ch, cw * 2),
                Plane::new(bytemuck::cast_slice(cr), cw, ch, cw * 2),
            ],
            depth,
            subsampling,
        );
        Self::copy_from(&buffer, pool, &VideoLimits::default())
    }

    /// Whether the planes were already reduced to 8 bits.
    pub fn state(&self) -> QuantizeState {
        self.state
    }

    /// Bits per sample of the stored planes.
    pub fn color_depth(&self) -> ColorDepth {
        self.color_depth
    }

    pub fn chroma_subsampling(&self) -> ChromaSubsampling {
        self.chroma_subsampling
    }

    pub fn layout(&self, index: usize) -> Option<&PlaneLayout> {
        self.planes.get(index)
    }

    /// Bytes of plane `index`; empty when out of range.
    pub fn plane(&self, index: usize) -> &[u8] {
        match self.planes.get(index) {
            Some(layout) => layout.slice(&self.storage),
            None => &[],
        }
    }

    /// Borrow the planes in the decoder-facing layout.
    pub fn as_ycbcr(&self) -> YCbCrBuffer<'_> {
        let plane = |i: usize| {
            let l = &self.planes[i];
            Plane::new(self.plane(i), l.width, l.height, l.stride)
        };
        YCbCrBuffer {
            planes: [plane(0), plane(1), plane(2)],
            color_depth: self.color_depth,
            yuv_color_space: self.yuv_color_space,
            color_primaries: self.color_primaries,
            color_range: self.color_range,
            chroma_subsampling: self.chroma_subsampling,
        }
    }

    pub(crate) fn into_parts(self) -> ([PlaneLayout; 3], PooledBuffer) {
        (self.planes, self.storage)
    }

    /// Rewrite 10/12-bit planes as 8-bit planes in a buffer from `pool`.
    ///
    /// The converted planes keep the sample strides of the source. The pooled
    /// buffer goes back to `pool` when this buffer (or the image that adopted
    /// it) is dropped.
    pub fn to_8bit_per_channel(&mut self, pool: &Arc<RecyclePool>) -> Result<()> {
        debug_assert!(
            self.state != QuantizeState::Converted,
            "Should not be called more than once."
        );
        if self.state == QuantizeState::Converted {
            return Err(MediaError::PreconditionViolation(
                "8-bit conversion already applied".into(),
            ));
        }
        let convert = conversion_routine(self.color_depth, self.chroma_subsampling).ok_or_else(|| {
            MediaError::UnsupportedFormat {
                depth: self.color_depth.bit_depth(),
                subsampling: self.chroma_subsampling.to_string(),
            }
        })?;

        let y_stride = self.planes[0].stride as usize / 2;
        let uv_stride = self.planes[1].stride as usize / 2;
        let y_len = y_stride * self.planes[0].height as usize;
        let uv_len = uv_stride * self.planes[1].height as usize;
        let total = y_len + uv_len * 2;

        let mut dest = pool.acquire_pooled(total).inspect_err(|e| {
            tracing::warn!("Cannot allocate {} bytes for 8-bit conversion: {}", total, e);
        })?;
        {
            let src = Planes16 {
                y: self.plane(0),
                u: self.plane(1),
                v: self.plane(2),
                y_stride,
                uv_stride,
            };
            let (y, rest) = dest.split_at_mut(y_len);
            let (u, v) = rest.split_at_mut(uv_len);
            let mut dst = Planes8 { y, u, v, y_stride, uv_stride };
            convert(&src, &mut dst, self.planes[0].width, self.planes[0].height);
        }

        self.planes[0].offset = 0;
        self.planes[0].stride = y_stride as u32;
        self.planes[1].offset = y_len;
        self.planes[2].offset = y_len + uv_len;
        self.planes[1].stride = uv_stride as u32;
        self.planes[2].stride = uv_stride as u32;
        // The 16-bit staging buffer goes back to its pool here.
        self.storage = dest;
        self.color_depth = ColorDepth::Color8;
        self.state = QuantizeState::Converted;
        Ok(())
    }
}

impl fmt::Debug for QuantizableBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuantizableBuffer")
            .field("planes", &self.planes)
            .field("color_depth", &self.color_depth)
            .field("chroma_subsampling", &self.chroma_subsampling)
            .field("state", &self.state)
            .finish()
    }
}

// ============================================================================
// YUVA to BGRA
// ============================================================================

/// Fixed-point (x256) YCbCr to RGB lookup tables.
pub struct YuvToRgbTables {
    y: [i32; 256],
    u_g: [i32; 256],
    u_b: [i32; 256],
    v_r: [i32; 256],
    v_g: [i32; 256],
}

impl YuvToRgbTables {
    pub fn new(color_space: YuvColorSpace, range: ColorRange) -> Self {
        let m = color_space.yuv_to_rgb_matrix();
        let (y_offset, y_scale, c_scale) = match range {
            ColorRange::Limited => (16.0, 255.0 / 219.0, 255.0 / 224.0),
            ColorRange::Full => (0.0, 1.0, 1.0),
        };
        let fixed = |v: f32| (v * 256.0).round() as i32;

        let mut tables = Self {
            y: [0; 256],
            u_g: [0; 256],
            u_b: [0; 256],
            v_r: [0; 256],
            v_g: [0; 256],
        };
        for i in 0..256 {
            let y = (i as f32 - y_offset) * y_scale;
            let c = (i as f32 - 128.0) * c_scale;
            tables.y[i] = fixed(y);
            tables.u_g[i] = fixed(c * m[1][1]);
            tables.u_b[i] = fixed(c * m[2][1]);
            tables.v_r[i] = fixed(c * m[0][2]);
            tables.v_g[i] = fixed(c * m[1][2]);
        }
        tables
    }

    /// `[r, g, b]` for one sample triple.
    #[inline]
    pub fn rgb(&self, y: u8, u: u8, v: u8) -> [u8; 3] {
        let y = self.y[y as usize];
        let clamp = |fx: i32| ((fx + 128) >> 8).clamp(0, 255) as u8;
        [
            clamp(y + self.v_r[v as usize]),
            clamp(y + self.u_g[u as usize] + self.v_g[v as usize]),
            clamp(y + self.u_b[u as usize]),
        ]
    }
}

/// Flatten 8-bit I420 plus an alpha plane into BGRA bytes.
pub(crate) fn i420_alpha_to_bgra(
    buffer: &YCbCrBuffer<'_>,
    alpha: &Plane<'_>,
    dst: &mut [u8],
    dst_stride: usize,
    width: usize,
    height: usize,
) {
    let tables = YuvToRgbTables::new(buffer.yuv_color_space, buffer.color_range);
    let [y_plane, u_plane, v_plane] = &buffer.planes;
    for row in 0..height {
        let y_row = &y_plane.data[row * y_plane.stride as usize..];
        let u_row = &u_plane.data[(row / 2) * u_plane.stride as usize..];
        let v_row = &v_plane.data[(row / 2) * v_plane.stride as usize..];
        let a_row = &alpha.data[row * alpha.stride as usize..];
        let out = &mut dst[row * dst_stride..][..width * 4];
        for (x, px) in out.chunks_exact_mut(4).enumerate() {
            let [r, g, b] = tables.rgb(y_row[x], u_row[x / 2], v_row[x / 2]);
            px.copy_from_slice(&[b, g, r, a_row[x]]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    fn pool() -> Arc<RecyclePool> {
        Arc::new(RecyclePool::new(PoolConfig::default()).unwrap())
    }

    #[test]
    fn test_10bit_420_ramp_is_bit_exact() {
        let y: [u16; 8] = [0, 4, 512, 1023, 1020, 1024, 100, 3];
        let cb: [u16; 2] = [512, 256];
        let cr: [u16; 2] = [0, 1023];
        let pool = pool();
        let mut buffer = QuantizableBuffer::from_u16_planes(
            &pool,
            &y,
            &cb,
            &cr,
            4,
            2,
            ColorDepth::Color10,
            ChromaSubsampling::HalfWidthAndHeight,
        )
        .unwrap();

        buffer.to_8bit_per_channel(&pool).unwrap();
        assert_eq!(buffer.state(), QuantizeState::Converted);
        assert_eq!(buffer.color_depth(), ColorDepth::Color8);
        assert_eq!(buffer.plane(0), &[0, 1, 128, 255, 255, 255, 25, 0]);
        assert_eq!(buffer.plane(1), &[128, 64]);
        assert_eq!(buffer.plane(2), &[0, 255]);
        assert_eq!(buffer.layout(0).unwrap().stride, 4);
        assert_eq!(buffer.layout(1).unwrap().stride, 2);
    }

    #[test]
    fn test_12bit_422_ramp() {
        let y: Vec<u16> = (0..8).map(|i| i * 512).collect();
        let c: Vec<u16> = vec![4095, 16, 2048, 0];
        let pool = pool();
        let mut buffer = QuantizableBuffer::from_u16_planes(
            &pool,
            &y,
            &c,
            &c,
            4,
            2,
            ColorDepth::Color12,
            ChromaSubsampling::HalfWidth,
        )
        .unwrap();
        buffer.to_8bit_per_channel(&pool).unwrap();
        assert_eq!(buffer.plane(0), &[0, 32, 64, 96, 128, 160, 192, 224]);
        assert_eq!(buffer.plane(1), &[255, 1, 128, 0]);
    }

    #[test]
    fn test_converted_buffer_returns_to_pool() {
        let pool = pool();
        let y = [0u16; 16];
        let c = [0u16; 16];
        let mut buffer = QuantizableBuffer::from_u16_planes(
            &pool,
            &y, &c, &c, 4, 4, ColorDepth::Color10, ChromaSubsampling::Full,
        )
        .unwrap();
        assert_eq!(pool.stats().total_allocated, 1);
        assert_eq!(pool.stats().available, 0);

        // 96-byte staging is released, 48-byte result is held
        buffer.to_8bit_per_channel(&pool).unwrap();
        assert_eq!(pool.stats().total_allocated, 2);
        assert_eq!(pool.stats().available, 1);
        assert_eq!(pool.stats().retained_bytes, 128);

        drop(buffer);
        assert_eq!(pool.stats().available, 2);
    }

    #[test]
    fn test_unsupported_depth() {
        let y = [0u16; 4];
        let c = [0u16; 1];
        let pool = pool();
        let mut buffer = QuantizableBuffer::from_u16_planes(
            &pool,
            &y,
            &c,
            &c,
            2,
            2,
            ColorDepth::Color16,
            ChromaSubsampling::HalfWidthAndHeight,
        )
        .unwrap();
        let err = buffer.to_8bit_per_channel(&pool).unwrap_err();
        assert_eq!(
            err,
            MediaError::UnsupportedFormat { depth: 16, subsampling: "4:2:0".into() }
        );
        assert_eq!(buffer.state(), QuantizeState::Populated);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic(expected = "Should not be called more than once."))]
    fn test_double_conversion() {
        let y = [0u16; 4];
        let c = [0u16; 1];
        let pool = pool();
        let mut buffer = QuantizableBuffer::from_u16_planes(
            &pool,
            &y,
            &c,
            &c,
            2,
            2,
            ColorDepth::Color10,
            ChromaSubsampling::HalfWidthAndHeight,
        )
        .unwrap();
        buffer.to_8bit_per_channel(&pool).unwrap();
        let err = buffer.to_8bit_per_channel(&pool).unwrap_err();
        assert!(matches!(err, MediaError::PreconditionViolation(_)));
    }

    #[test]
    fn test_mismatched_chroma_is_rejected() {
        let y = [0u16; 16];
        let c = [0u16; 4];
        let buffer = YCbCrBuffer::new(
            [
                Plane::new(bytemuck::cast_slice(&y), 4, 4, 8),
                Plane::new(bytemuck::cast_slice(&c), 2, 2, 4),
                Plane::new(bytemuck::cast_slice(&c), 2, 2, 4),
            ],
            ColorDepth::Color10,
            ChromaSubsampling::Full,
        );
        let pool = pool();
        assert!(QuantizableBuffer::copy_from(&buffer, &pool, &VideoLimits::default()).is_err());
        assert_eq!(pool.stats().total_allocated, 0);
    }

    #[test]
    fn test_rgb_tables() {
        let limited = YuvToRgbTables::new(YuvColorSpace::Bt709, ColorRange::Limited);
        assert_eq!(limited.rgb(235, 128, 128), [255, 255, 255]);
        assert_eq!(limited.rgb(16, 128, 128), [0, 0, 0]);
        assert_eq!(limited.rgb(0, 128, 128), [0, 0, 0]);

        let full = YuvToRgbTables::new(YuvColorSpace::Bt601, ColorRange::Full);
        assert_eq!(full.rgb(128, 128, 128), [128, 128, 128]);
        let [r, _, b] = full.rgb(128, 128, 255);
        assert_eq!(b, 128);
        assert!(r > 200);
    }
}
