//! Display-side frame types and the latest-frame hand-off buffer.

pub mod video_buffer;

pub use video_buffer::{FrameListener, VideoBuffer};

/// Decoded video frame with tightly-packed YUV420p pixel data.
///
/// `data` holds the Y plane (`w*h`) followed by the U and V planes
/// (`w/2 * h/2` each) with stride padding stripped. The backing storage
/// is reused across frames: `clear` keeps the allocation.
#[derive(Debug, Default)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pts: Option<i64>,
}

impl VideoFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop the payload, keeping the allocation for reuse.
    pub fn clear(&mut self) {
        self.data.clear();
        self.width = 0;
        self.height = 0;
        self.pts = None;
    }

    /// Fill from three YUV420p planes given as `(data, line_size)` pairs,
    /// stripping stride padding.
    pub fn fill_yuv420(
        &mut self,
        width: usize,
        height: usize,
        y: (&[u8], usize),
        u: (&[u8], usize),
        v: (&[u8], usize),
    ) {
        let (cw, ch) = (width / 2, height / 2);

        self.data.clear();
        self.data.reserve(width * height + cw * ch * 2);
        extract_plane(&mut self.data, y.0, y.1, width, height);
        extract_plane(&mut self.data, u.0, u.1, cw, ch);
        extract_plane(&mut self.data, v.0, v.1, cw, ch);

        self.width = width as u32;
        self.height = height as u32;
    }
}

/// Append a plane from padded source to the contiguous destination.
///
/// Fast path: no stride padding, single copy. Fallback: row-by-row.
fn extract_plane(dst: &mut Vec<u8>, src: &[u8], stride: usize, width: usize, height: usize) {
    if stride == width && src.len() >= width * height {
        dst.extend_from_slice(&src[..width * height]);
        return;
    }

    for r in 0..height {
        let start = r * stride;
        if start + width > src.len() {
            break;
        }
        dst.extend_from_slice(&src[start..start + width]);
    }
}
