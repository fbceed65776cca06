//! Padding two images onto a shared canvas.

use image::RgbaImage;

/// Bytes per RGBA pixel
pub const CHANNELS: usize = 4;

/// Two RGBA buffers with identical geometry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub width: u32,
    pub height: u32,
    pub first: Vec<u8>,
    pub second: Vec<u8>,
}

impl Normalized {
    /// Number of pixels in each buffer
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Pad both images to `(max(w1, w2), max(h1, h2))`.
///
/// Pixels inside an image's original bounds are copied byte-for-byte; the padding
/// region stays zero (transparent black). No scaling happens.
pub fn normalize(first: &RgbaImage, second: &RgbaImage) -> Normalized {
    let width = first.width().max(second.width());
    let height = first.height().max(second.height());

    Normalized {
        width,
        height,
        first: pad(first, width, height),
        second: pad(second, width, height),
    }
}

fn pad(image: &RgbaImage, width: u32, height: u32) -> Vec<u8> {
    if image.width() == width && image.height() == height {
        return image.as_raw().clone();
    }

    let mut buffer = vec![0u8; width as usize * height as usize * CHANNELS];
    let src_row = image.width() as usize * CHANNELS;
    let dst_row = width as usize * CHANNELS;
    for (y, row) in image.as_raw().chunks_exact(src_row.max(1)).enumerate() {
        let start = y * dst_row;
        buffer[start..start + src_row].copy_from_slice(row);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_equal_sizes_are_untouched() {
        let a = RgbaImage::from_fn(3, 2, |x, y| Rgba([x as u8, y as u8, 7, 255]));
        let b = RgbaImage::from_pixel(3, 2, Rgba([1, 2, 3, 4]));
        let n = normalize(&a, &b);
        assert_eq!((n.width, n.height), (3, 2));
        assert_eq!(n.first, a.as_raw().clone());
        assert_eq!(n.second, b.as_raw().clone());
    }

    #[test]
    fn test_pads_to_bounding_box() {
        let wide = RgbaImage::from_pixel(5, 1, Rgba([9, 9, 9, 255]));
        let tall = RgbaImage::from_pixel(2, 3, Rgba([5, 5, 5, 255]));
        let n = normalize(&wide, &tall);
        assert_eq!((n.width, n.height), (5, 3));
        assert_eq!(n.first.len(), 5 * 3 * 4);
        assert_eq!(n.second.len(), 5 * 3 * 4);

        // first row of `wide` copied, rows below are zero
        assert_eq!(&n.first[0..4], &[9, 9, 9, 255]);
        assert!(n.first[5 * 4..].iter().all(|b| *b == 0));

        // `tall` keeps its 2 columns per row, columns 2..5 are zero
        for y in 0..3 {
            let row = &n.second[y * 20..(y + 1) * 20];
            assert_eq!(&row[0..8], &[5, 5, 5, 255, 5, 5, 5, 255]);
            assert!(row[8..].iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn test_empty_image() {
        let empty = RgbaImage::new(0, 0);
        let other = RgbaImage::from_pixel(2, 2, Rgba([1, 1, 1, 1]));
        let n = normalize(&empty, &other);
        assert_eq!((n.width, n.height), (2, 2));
        assert_eq!(n.first, vec![0u8; 16]);
    }
}
