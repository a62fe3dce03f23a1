//! Raster operators on `image` buffers
//!
//! Borders are handled by reflection without repeating the edge pixel
//! (`gfedcb|abcdefgh|gfedcba`), so results on the frame match the interior.

use image::{GrayImage, Luma, RgbImage};
use std::collections::VecDeque;

/// Sigma of a 5-wide Gaussian when none is given explicitly
pub const BLUR_SIGMA: f32 = 1.1;
const BLUR_RADIUS: i64 = 2;

pub const CANNY_LOW: f32 = 50.0;
pub const CANNY_HIGH: f32 = 150.0;

/// Grayscale values above this become ink
pub const THRESHOLD_CUTOFF: u8 = 127;
pub const INK: u8 = 255;

/// ITU-R BT.601 luminance
pub fn to_gray(rgb: &RgbImage) -> GrayImage {
    let mut gray = GrayImage::new(rgb.width(), rgb.height());
    for (x, y, p) in rgb.enumerate_pixels() {
        let luma = 0.299 * p.0[0] as f32 + 0.587 * p.0[1] as f32 + 0.114 * p.0[2] as f32;
        gray.put_pixel(x, y, Luma([luma.round().clamp(0.0, 255.0) as u8]));
    }
    gray
}

#[inline]
fn reflect(i: i64, n: i64) -> usize {
    if n <= 1 {
        return 0;
    }
    let mut i = i;
    while i < 0 || i >= n {
        if i < 0 {
            i = -i;
        }
        if i >= n {
            i = 2 * n - 2 - i;
        }
    }
    i as usize
}

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let sigma = sigma.max(f32::EPSILON);
    let mut kernel: Vec<f32> = (-BLUR_RADIUS..=BLUR_RADIUS)
        .map(|d| (-((d * d) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = kernel.iter().sum();
    for k in kernel.iter_mut() {
        *k /= sum;
    }
    kernel
}

/// Separable 5×5 Gaussian smoothing
pub fn gaussian_blur(img: &GrayImage, sigma: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return img.clone();
    }
    let kernel = gaussian_kernel(sigma);
    let (wi, hi) = (w as i64, h as i64);
    let src = img.as_raw();

    let mut horizontal = vec![0f32; (w * h) as usize];
    for y in 0..hi {
        let row = (y * wi) as usize;
        for x in 0..wi {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sx = reflect(x + k as i64 - BLUR_RADIUS, wi);
                acc += weight * src[row + sx] as f32;
            }
            horizontal[row + x as usize] = acc;
        }
    }

    let mut out = vec![0u8; (w * h) as usize];
    for y in 0..hi {
        for x in 0..wi {
            let mut acc = 0.0;
            for (k, weight) in kernel.iter().enumerate() {
                let sy = reflect(y + k as i64 - BLUR_RADIUS, hi);
                acc += weight * horizontal[sy * w as usize + x as usize];
            }
            out[(y * wi + x) as usize] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }

    GrayImage::from_raw(w, h, out).unwrap_or_else(|| img.clone())
}

/// Binary threshold: strictly above `cutoff` becomes [`INK`], everything else 0
pub fn threshold(img: &GrayImage, cutoff: u8) -> GrayImage {
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p.0[0] = if p.0[0] > cutoff { INK } else { 0 };
    }
    out
}

/// 3×3 Sobel derivatives as (gx, gy) planes
fn sobel(img: &GrayImage) -> (Vec<f32>, Vec<f32>) {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let src = img.as_raw();
    let at = |x: i64, y: i64| src[reflect(y, h) * w as usize + reflect(x, w)] as f32;

    let mut gx = vec![0f32; (w * h) as usize];
    let mut gy = vec![0f32; (w * h) as usize];
    for y in 0..h {
        for x in 0..w {
            let idx = (y * w + x) as usize;
            gx[idx] = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            gy[idx] = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
        }
    }
    (gx, gy)
}

/// Canny edge map (edges are [`INK`]).
///
/// L1 gradient magnitude, non-maximum suppression on four quantized
/// directions, then hysteresis: pixels above `high` seed edges that grow
/// through 8-connected pixels above `low`.
pub fn canny(img: &GrayImage, low: f32, high: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return GrayImage::new(w, h);
    }

    let (gx, gy) = sobel(img);
    let magnitude: Vec<f32> = gx.iter().zip(&gy).map(|(a, b)| a.abs() + b.abs()).collect();
    let (wu, hu) = (w as usize, h as usize);

    let mut suppressed = vec![0f32; wu * hu];
    for y in 1..hu - 1 {
        for x in 1..wu - 1 {
            let idx = y * wu + x;
            let m = magnitude[idx];
            if m <= low {
                continue;
            }
            let mut angle = gy[idx].atan2(gx[idx]).to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }
            // (prev, next) along the gradient direction
            let (prev, next) = if !(22.5..157.5).contains(&angle) {
                (idx - 1, idx + 1)
            } else if angle < 67.5 {
                (idx - wu - 1, idx + wu + 1)
            } else if angle < 112.5 {
                (idx - wu, idx + wu)
            } else {
                (idx - wu + 1, idx + wu - 1)
            };
            if m > magnitude[prev] && m >= magnitude[next] {
                suppressed[idx] = m;
            }
        }
    }

    let mut edges = vec![0u8; wu * hu];
    let mut queue = VecDeque::new();
    for (idx, &m) in suppressed.iter().enumerate() {
        if m > high {
            edges[idx] = INK;
            queue.push_back(idx);
        }
    }
    while let Some(idx) = queue.pop_front() {
        let (x, y) = ((idx % wu) as i64, (idx / wu) as i64);
        for dy in -1..=1i64 {
            for dx in -1..=1i64 {
                let (nx, ny) = (x + dx, y + dy);
                if nx < 0 || ny < 0 || nx >= wu as i64 || ny >= hu as i64 {
                    continue;
                }
                let n = ny as usize * wu + nx as usize;
                if edges[n] == 0 && suppressed[n] > low {
                    edges[n] = INK;
                    queue.push_back(n);
                }
            }
        }
    }

    GrayImage::from_raw(w, h, edges).unwrap_or_else(|| GrayImage::new(w, h))
}
