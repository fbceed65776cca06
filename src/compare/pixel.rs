//! Thresholded per-pixel comparison in YIQ space.
//!
//! Two pixels differ when their perceptual distance exceeds `MAX_YIQ_DELTA *
//! threshold^2`. Semi-transparent pixels are blended over white before measuring.
//!
//! Anti-aliasing rule: a differing pixel is treated as anti-aliased when, in either
//! image, it has at most two identical neighbours and its darkest or brightest
//! neighbour lies inside a flat region (three or more identical neighbours) in both
//! images. Such pixels are painted with `aa_color` and are not counted unless
//! `include_aa` is set. The rule is fixed so counts are reproducible across runs.

use image::RgbaImage;

use super::normalize::CHANNELS;
use super::{CompareError, CompareResult};

/// Largest possible YIQ distance between two colors
pub const MAX_YIQ_DELTA: f64 = 35215.0;

/// Comparator settings
#[derive(Debug, Clone, PartialEq)]
pub struct Comparator {
    /// Matching threshold in 0..=1, smaller is more sensitive
    pub threshold: f64,
    /// Count anti-aliased pixels as differences
    pub include_aa: bool,
    /// Opacity of the faded first image drawn under the diff
    pub alpha: f64,
    /// Color of anti-aliased pixels
    pub aa_color: [u8; 3],
    /// Color of differing pixels
    pub diff_color: [u8; 3],
    /// Draw only differing pixels on a transparent canvas
    pub diff_mask: bool,
}

impl Default for Comparator {
    fn default() -> Self {
        Self {
            threshold: crate::config::DEFAULT_THRESHOLD,
            include_aa: false,
            alpha: 0.1,
            aa_color: [255, 255, 0],
            diff_color: [255, 0, 0],
            diff_mask: false,
        }
    }
}

/// Diff image plus the number of differing pixels
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub diff: RgbaImage,
    pub differing_pixels: u64,
}

impl Comparator {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            ..Default::default()
        }
    }

    pub fn include_aa(mut self, include: bool) -> Self {
        self.include_aa = include;
        self
    }

    pub fn diff_mask(mut self, mask: bool) -> Self {
        self.diff_mask = mask;
        self
    }

    /// Compare two equal-sized RGBA buffers.
    ///
    /// Pure: the same inputs always produce the same diff bytes and count.
    pub fn compare(&self, first: &[u8], second: &[u8], width: u32, height: u32) -> CompareResult<Comparison> {
        let expected = width as usize * height as usize * CHANNELS;
        if first.len() != expected || second.len() != expected {
            return Err(CompareError::SizeMismatch {
                expected,
                first: first.len(),
                second: second.len(),
            });
        }

        let mut output = vec![0u8; expected];

        if first == second {
            if !self.diff_mask {
                for pos in (0..expected).step_by(CHANNELS) {
                    draw_gray_pixel(first, pos, self.alpha, &mut output);
                }
            }
            return Ok(Comparison {
                diff: into_image(width, height, output)?,
                differing_pixels: 0,
            });
        }

        let max_delta = MAX_YIQ_DELTA * self.threshold * self.threshold;
        let grid = Grid { width, height };
        let mut differing = 0u64;

        for y in 0..height {
            for x in 0..width {
                let pos = grid.offset(x, y);
                let delta = color_delta(first, second, pos, pos, false);

                if delta.abs() > max_delta {
                    let anti_aliased = !self.include_aa
                        && (grid.anti_aliased(first, x, y, second) || grid.anti_aliased(second, x, y, first));
                    if anti_aliased {
                        if !self.diff_mask {
                            draw_pixel(&mut output, pos, self.aa_color);
                        }
                    } else {
                        draw_pixel(&mut output, pos, self.diff_color);
                        differing += 1;
                    }
                } else if !self.diff_mask {
                    draw_gray_pixel(first, pos, self.alpha, &mut output);
                }
            }
        }

        Ok(Comparison {
            diff: into_image(width, height, output)?,
            differing_pixels: differing,
        })
    }
}

fn into_image(width: u32, height: u32, buffer: Vec<u8>) -> CompareResult<RgbaImage> {
    RgbaImage::from_raw(width, height, buffer).ok_or(CompareError::Buffer { width, height })
}

#[derive(Clone, Copy)]
struct Grid {
    width: u32,
    height: u32,
}

impl Grid {
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * CHANNELS
    }

    /// Clamped 3x3 window around (x, y) and whether (x, y) touches an edge
    fn window(&self, x: u32, y: u32) -> (u32, u32, u32, u32, bool) {
        let x0 = x.saturating_sub(1);
        let y0 = y.saturating_sub(1);
        let x2 = (x + 1).min(self.width - 1);
        let y2 = (y + 1).min(self.height - 1);
        let on_edge = x == x0 || x == x2 || y == y0 || y == y2;
        (x0, y0, x2, y2, on_edge)
    }

    fn anti_aliased(&self, img: &[u8], x1: u32, y1: u32, other: &[u8]) -> bool {
        let (x0, y0, x2, y2, on_edge) = self.window(x1, y1);
        let pos = self.offset(x1, y1);
        let mut zeroes = u32::from(on_edge);
        let mut min = 0.0;
        let mut max = 0.0;
        let mut darkest = (0, 0);
        let mut brightest = (0, 0);

        for x in x0..=x2 {
            for y in y0..=y2 {
                if x == x1 && y == y1 {
                    continue;
                }
                let delta = color_delta(img, img, pos, self.offset(x, y), true);
                if delta == 0.0 {
                    zeroes += 1;
                    if zeroes > 2 {
                        return false;
                    }
                } else if delta < min {
                    min = delta;
                    darkest = (x, y);
                } else if delta > max {
                    max = delta;
                    brightest = (x, y);
                }
            }
        }

        if min == 0.0 || max == 0.0 {
            return false;
        }

        (self.has_many_siblings(img, darkest) && self.has_many_siblings(other, darkest))
            || (self.has_many_siblings(img, brightest) && self.has_many_siblings(other, brightest))
    }

    fn has_many_siblings(&self, img: &[u8], (x1, y1): (u32, u32)) -> bool {
        let (x0, y0, x2, y2, on_edge) = self.window(x1, y1);
        let pos = self.offset(x1, y1);
        let mut zeroes = u32::from(on_edge);

        for x in x0..=x2 {
            for y in y0..=y2 {
                if x == x1 && y == y1 {
                    continue;
                }
                let other = self.offset(x, y);
                if img[pos..pos + CHANNELS] == img[other..other + CHANNELS] {
                    zeroes += 1;
                }
                if zeroes > 2 {
                    return true;
                }
            }
        }
        false
    }
}

/// Signed YIQ distance between pixel `k` of `a` and pixel `m` of `b`.
/// Negative when the first pixel is brighter. With `y_only` returns the luma delta.
fn color_delta(a: &[u8], b: &[u8], k: usize, m: usize, y_only: bool) -> f64 {
    if a[k..k + CHANNELS] == b[m..m + CHANNELS] {
        return 0.0;
    }

    let (r1, g1, b1) = blended(&a[k..k + CHANNELS]);
    let (r2, g2, b2) = blended(&b[m..m + CHANNELS]);

    let y1 = rgb2y(r1, g1, b1);
    let y2 = rgb2y(r2, g2, b2);
    let y = y1 - y2;
    if y_only {
        return y;
    }

    let i = rgb2i(r1, g1, b1) - rgb2i(r2, g2, b2);
    let q = rgb2q(r1, g1, b1) - rgb2q(r2, g2, b2);
    let delta = 0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q;

    if y1 > y2 { -delta } else { delta }
}

/// RGB of a pixel blended over white by its alpha
fn blended(px: &[u8]) -> (f64, f64, f64) {
    let (r, g, b, a) = (f64::from(px[0]), f64::from(px[1]), f64::from(px[2]), px[3]);
    if a < 255 {
        let a = f64::from(a) / 255.0;
        (blend(r, a), blend(g, a), blend(b, a))
    } else {
        (r, g, b)
    }
}

fn rgb2y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.298_895_31 + g * 0.586_622_47 + b * 0.114_482_23
}

fn rgb2i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.595_977_99 - g * 0.274_176_10 - b * 0.321_801_89
}

fn rgb2q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.211_470_17 - g * 0.522_617_11 + b * 0.311_146_94
}

fn blend(c: f64, a: f64) -> f64 {
    255.0 + (c - 255.0) * a
}

fn draw_pixel(output: &mut [u8], pos: usize, [r, g, b]: [u8; 3]) {
    output[pos] = r;
    output[pos + 1] = g;
    output[pos + 2] = b;
    output[pos + 3] = 255;
}

fn draw_gray_pixel(img: &[u8], pos: usize, alpha: f64, output: &mut [u8]) {
    let luma = rgb2y(f64::from(img[pos]), f64::from(img[pos + 1]), f64::from(img[pos + 2]));
    let value = blend(luma, alpha * f64::from(img[pos + 3]) / 255.0) as u8;
    draw_pixel(output, pos, [value, value, value]);
}
