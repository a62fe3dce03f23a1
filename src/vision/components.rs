//! Connected components of non-zero pixels
//!
//! Foreground is 8-connected, background 4-connected, so a closed outline of
//! foreground always separates its inside from the outside.

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// Inclusive pixel bounds of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    pub fn right(&self) -> u32 {
        self.x + self.width - 1
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height - 1
    }
}

#[derive(Debug, Clone)]
pub struct Component {
    pub bbox: BoundingBox,
    pub pixels: Vec<(u32, u32)>,
}

impl Component {
    /// Pixel count of the component plus every hole it closes off
    pub fn enclosed_area(&self) -> usize {
        // bbox padded by one so the outside is connected all the way round
        let w = self.bbox.width as usize + 2;
        let h = self.bbox.height as usize + 2;
        let mut blocked = vec![false; w * h];
        for &(x, y) in &self.pixels {
            let lx = (x - self.bbox.x) as usize + 1;
            let ly = (y - self.bbox.y) as usize + 1;
            blocked[ly * w + lx] = true;
        }

        let mut outside = 0usize;
        let mut stack = vec![0usize];
        blocked[0] = true;
        while let Some(idx) = stack.pop() {
            outside += 1;
            let (x, y) = (idx % w, idx / w);
            let mut visit = |n: usize| {
                if !blocked[n] {
                    blocked[n] = true;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < w {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - w);
            }
            if y + 1 < h {
                visit(idx + w);
            }
        }

        w * h - outside
    }

    pub fn touches_left(&self, x: u32) -> bool {
        self.bbox.x <= x
    }

    pub fn touches_right(&self, x: u32) -> bool {
        self.bbox.right() >= x
    }
}

/// Label 8-connected non-zero pixels, in raster order of each component's
/// first pixel
pub fn label_components(img: &GrayImage) -> Vec<Component> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    let src = img.as_raw();
    let mut seen = vec![false; w * h];
    let mut components = Vec::new();

    for start in 0..w * h {
        if src[start] == 0 || seen[start] {
            continue;
        }
        seen[start] = true;
        let mut stack = vec![start];
        let mut pixels = Vec::new();
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (usize::MAX, usize::MAX, 0, 0);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            pixels.push((x as u32, y as u32));
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if src[n] != 0 && !seen[n] {
                        seen[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        components.push(Component {
            bbox: BoundingBox {
                x: min_x as u32,
                y: min_y as u32,
                width: (max_x - min_x + 1) as u32,
                height: (max_y - min_y + 1) as u32,
            },
            pixels,
        });
    }

    components
}

/// Components not nested inside another component's hole
pub fn external_components(img: &GrayImage) -> Vec<Component> {
    let (w, h) = (img.width() as usize, img.height() as usize);
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let src = img.as_raw();

    // background reachable from the image frame
    let mut outside = vec![false; w * h];
    let mut stack = Vec::new();
    for idx in 0..w * h {
        let (x, y) = (idx % w, idx / w);
        let on_frame = x == 0 || y == 0 || x == w - 1 || y == h - 1;
        if on_frame && src[idx] == 0 {
            outside[idx] = true;
            stack.push(idx);
        }
    }
    while let Some(idx) = stack.pop() {
        let (x, y) = (idx % w, idx / w);
        let neighbours = [
            (x > 0).then(|| idx - 1),
            (x + 1 < w).then(|| idx + 1),
            (y > 0).then(|| idx - w),
            (y + 1 < h).then(|| idx + w),
        ];
        for n in neighbours.into_iter().flatten() {
            if src[n] == 0 && !outside[n] {
                outside[n] = true;
                stack.push(n);
            }
        }
    }

    label_components(img)
        .into_iter()
        .filter(|component| {
            component.pixels.iter().any(|&(x, y)| {
                let (x, y) = (x as usize, y as usize);
                x == 0
                    || y == 0
                    || x == w - 1
                    || y == h - 1
                    || outside[y * w + x - 1]
                    || outside[y * w + x + 1]
                    || outside[(y - 1) * w + x]
                    || outside[(y + 1) * w + x]
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn draw_rect_outline(img: &mut GrayImage, x0: u32, y0: u32, x1: u32, y1: u32) {
        for x in x0..=x1 {
            img.put_pixel(x, y0, Luma([255]));
            img.put_pixel(x, y1, Luma([255]));
        }
        for y in y0..=y1 {
            img.put_pixel(x0, y, Luma([255]));
            img.put_pixel(x1, y, Luma([255]));
        }
    }

    #[test]
    fn test_diagonal_pixels_are_connected() {
        let mut img = GrayImage::new(5, 5);
        img.put_pixel(1, 1, Luma([255]));
        img.put_pixel(2, 2, Luma([255]));
        img.put_pixel(4, 0, Luma([255]));

        let components = label_components(&img);
        assert_eq!(components.len(), 2);
        // (4, 0) comes first in raster order
        assert_eq!(components[0].pixels, vec![(4, 0)]);
        assert_eq!(components[1].bbox, BoundingBox { x: 1, y: 1, width: 2, height: 2 });
    }

    #[test]
    fn test_enclosed_area_counts_hole() {
        let mut img = GrayImage::new(12, 12);
        draw_rect_outline(&mut img, 2, 2, 9, 7);

        let components = label_components(&img);
        assert_eq!(components.len(), 1);
        // 8 x 6 outline encloses the whole rectangle
        assert_eq!(components[0].enclosed_area(), 48);
    }

    #[test]
    fn test_nested_components_are_not_external() {
        let mut img = GrayImage::new(20, 20);
        draw_rect_outline(&mut img, 1, 1, 18, 18);
        img.put_pixel(9, 9, Luma([255]));
        img.put_pixel(10, 9, Luma([255]));

        assert_eq!(label_components(&img).len(), 2);
        let external = external_components(&img);
        assert_eq!(external.len(), 1);
        assert_eq!(external[0].bbox.width, 18);
    }

    #[test]
    fn test_open_outline_exposes_inner_component() {
        let mut img = GrayImage::new(20, 20);
        draw_rect_outline(&mut img, 1, 1, 18, 18);
        // break the outline so the inside joins the background
        img.put_pixel(10, 1, Luma([0]));
        img.put_pixel(9, 9, Luma([255]));

        assert_eq!(external_components(&img).len(), 2);
    }
}
