//! 解码帧 (Decoded frame)
//!
//! Owned copy of one decoded picture. Lives for exactly one tick.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Planar Y, U, V with 2x2 chroma subsampling.
    Yuv420p,
    /// Packed 8-bit R, G, B.
    Rgb24,
    /// Packed 8-bit B, G, R.
    Bgr24,
}

impl PixelFormat {
    pub fn plane_count(&self) -> usize {
        match self {
            PixelFormat::Yuv420p => 3,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plane {
    pub data: Vec<u8>,
    pub stride: usize,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub planes: Vec<Plane>,
}

impl Frame {
    pub fn new(width: u32, height: u32, format: PixelFormat, planes: Vec<Plane>) -> Self {
        Self {
            width,
            height,
            format,
            planes,
        }
    }

    /// Packed 3-byte-per-pixel frame with tight stride.
    pub fn packed(width: u32, height: u32, format: PixelFormat, data: Vec<u8>) -> Self {
        let stride = width as usize * 3;
        Self::new(width, height, format, vec![Plane { data, stride }])
    }

    /// Frame filled with one YUV triple. Mostly useful for tests.
    pub fn solid_yuv420p(width: u32, height: u32, y: u8, u: u8, v: u8) -> Self {
        let (cw, ch) = chroma_size(width, height);
        let planes = vec![
            Plane {
                data: vec![y; width as usize * height as usize],
                stride: width as usize,
            },
            Plane {
                data: vec![u; cw * ch],
                stride: cw,
            },
            Plane {
                data: vec![v; cw * ch],
                stride: cw,
            },
        ];
        Self::new(width, height, PixelFormat::Yuv420p, planes)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Chroma plane dimensions for 4:2:0 (rounded up for odd sizes).
pub fn chroma_size(width: u32, height: u32) -> (usize, usize) {
    ((width as usize + 1) / 2, (height as usize + 1) / 2)
}
