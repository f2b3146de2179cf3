//! Owned video frame value.

use chrono::{DateTime, Local};
use image::RgbImage;

/// One decoded video frame in packed BGR24 layout.
///
/// Frames are owned exclusively by the worker that produced them; sharing
/// with a live viewer goes through a copy in the worker's frame slot.
#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    /// Monotonic capture index within one worker.
    pub index: u64,
    pub captured_at: DateTime<Local>,
}

impl Frame {
    /// Wrap a raw BGR24 buffer. Panics in debug builds if the buffer size
    /// does not match the dimensions.
    pub fn from_bgr(data: Vec<u8>, width: u32, height: u32, index: u64) -> Self {
        debug_assert_eq!(data.len(), (width * height * 3) as usize);
        Self {
            data,
            width,
            height,
            index,
            captured_at: Local::now(),
        }
    }

    /// Solid-colour frame, used by tests and as a decode placeholder.
    pub fn filled(width: u32, height: u32, bgr: [u8; 3], index: u64) -> Self {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for _ in 0..(width * height) {
            data.extend_from_slice(&bgr);
        }
        Self::from_bgr(data, width, height, index)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let off = ((y * self.width + x) * 3) as usize;
        [self.data[off], self.data[off + 1], self.data[off + 2]]
    }

    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, bgr: [u8; 3]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let off = ((y * self.width + x) * 3) as usize;
        self.data[off..off + 3].copy_from_slice(&bgr);
    }

    /// Convert to an RGB image for encoding or model preprocessing.
    pub fn to_rgb_image(&self) -> RgbImage {
        let mut img = RgbImage::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let [b, g, r] = self.pixel(x, y);
                img.put_pixel(x, y, image::Rgb([r, g, b]));
            }
        }
        img
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("index", &self.index)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_roundtrip() {
        let mut frame = Frame::filled(4, 4, [0, 0, 0], 0);
        frame.put_pixel(2, 3, [10, 20, 30]);
        assert_eq!(frame.pixel(2, 3), [10, 20, 30]);
        assert_eq!(frame.pixel(0, 0), [0, 0, 0]);
    }

    #[test]
    fn out_of_bounds_put_is_ignored() {
        let mut frame = Frame::filled(4, 4, [1, 1, 1], 0);
        frame.put_pixel(100, 100, [9, 9, 9]);
        assert_eq!(frame.pixel(3, 3), [1, 1, 1]);
    }

    #[test]
    fn rgb_conversion_swaps_channels() {
        let frame = Frame::filled(2, 2, [255, 0, 0], 0); // blue in BGR
        let img = frame.to_rgb_image();
        assert_eq!(img.get_pixel(0, 0).0, [0, 0, 255]);
    }
}
