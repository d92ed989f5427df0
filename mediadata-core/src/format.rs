// PIXEL FORMAT - Color metadata and picture geometry
//
// Decoders describe their output with these tags; the frame model carries
// them through unchanged so the compositor can pick the right shader.

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Color Metadata
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColorDepth {
    Color8,
    Color10,
    Color12,
    Color16,
}

impl ColorDepth {
    pub fn bit_depth(&self) -> u8 {
        match self {
            Self::Color8 => 8,
            Self::Color10 => 10,
            Self::Color12 => 12,
            Self::Color16 => 16,
        }
    }

    /// Bytes used to store one sample.
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            Self::Color8 => 1,
            _ => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChromaSubsampling {
    Full,               // 4:4:4
    HalfWidth,          // 4:2:2
    HalfWidthAndHeight, // 4:2:0
}

impl ChromaSubsampling {
    /// Chroma plane size for a luma plane of `width` x `height`.
    pub fn chroma_size(&self, width: u32, height: u32) -> (u32, u32) {
        let half = |v: u32| v.div_ceil(2);
        match self {
            Self::Full => (width, height),
            Self::HalfWidth => (half(width), height),
            Self::HalfWidthAndHeight => (half(width), half(height)),
        }
    }
}

impl fmt::Display for ChromaSubsampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Full => "4:4:4",
            Self::HalfWidth => "4:2:2",
            Self::HalfWidthAndHeight => "4:2:0",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum YuvColorSpace {
    Bt601,
    #[default]
    Bt709,
    Bt2020,
    Identity,
}

impl YuvColorSpace {
    /// YUV to RGB matrix rows (R, G, B) over (Y, Cb, Cr).
    pub fn yuv_to_rgb_matrix(&self) -> [[f32; 3]; 3] {
        let (wr, wb) = self.coefficients();
        let wg = 1.0 - wr - wb;
        [
            [1.0, 0.0, 2.0 * (1.0 - wr)],
            [1.0, -2.0 * wb * (1.0 - wb) / wg, -2.0 * wr * (1.0 - wr) / wg],
            [1.0, 2.0 * (1.0 - wb), 0.0],
        ]
    }

    /// (Wr, Wb) luma weights; Wg = 1 - Wr - Wb
    pub fn coefficients(&self) -> (f32, f32) {
        // Identity (GBR) data never reaches the YUV path; treat it as BT.709.
        match self {
            Self::Bt601 => (0.299, 0.114),
            Self::Bt709 | Self::Identity => (0.2126, 0.0722),
            Self::Bt2020 => (0.2627, 0.0593),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorPrimaries {
    Bt601,
    #[default]
    Bt709,
    Bt2020,
    DisplayP3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ColorRange {
    #[default]
    Limited,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferFunction {
    Bt709,
    Srgb,
    Pq,
    Hlg,
}

// ============================================================================
// Geometry
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Picture rectangle; signed because decoders may report garbage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }
}
