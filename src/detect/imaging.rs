//! Small image-processing primitives used by the detectors.
//!
//! HSV values follow the 8-bit convention most vision tooling uses:
//! H in [0, 180), S and V in [0, 255].

use image::{imageops, GrayImage, Luma, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::region_labelling::{connected_components, Connectivity};

use super::object::Rect;

pub fn rgb_to_hsv(pixel: Rgb<u8>) -> [u8; 3] {
    let [r, g, b] = pixel.0.map(i32::from);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let v = max;
    let s = if max == 0 { 0 } else { (255 * delta + max / 2) / max };
    if delta == 0 {
        return [0, s as u8, v as u8];
    }

    // Hue in degrees, then halved.
    let degrees = if max == r {
        60.0 * (g - b) as f64 / delta as f64
    } else if max == g {
        120.0 + 60.0 * (b - r) as f64 / delta as f64
    } else {
        240.0 + 60.0 * (r - g) as f64 / delta as f64
    };
    let degrees = if degrees < 0.0 { degrees + 360.0 } else { degrees };
    let h = ((degrees / 2.0).round() as i32) % 180;
    [h as u8, s as u8, v as u8]
}

/// Binary image, stored as 0/255 luma so imageproc can work on it directly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    image: GrayImage,
}

const ON: Luma<u8> = Luma([255]);
const OFF: Luma<u8> = Luma([0]);

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            image: GrayImage::new(width, height),
        }
    }

    /// Pixels whose HSV value lies within `[min, max]` on every channel.
    pub fn in_range(image: &RgbImage, min: [u8; 3], max: [u8; 3]) -> Self {
        let mut mask = Self::new(image.width(), image.height());
        for (x, y, pixel) in image.enumerate_pixels() {
            let hsv = rgb_to_hsv(*pixel);
            let inside = (0..3).all(|c| hsv[c] >= min[c] && hsv[c] <= max[c]);
            mask.set(x, y, inside);
        }
        mask
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        self.image.get_pixel_checked(x, y).is_some_and(|p| *p == ON)
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if let Some(pixel) = self.image.get_pixel_mut_checked(x, y) {
            *pixel = if value { ON } else { OFF };
        }
    }

    /// Set every pixel of `rect` (clipped to the mask).
    pub fn fill(&mut self, rect: Rect) {
        for y in rect.y..rect.y.saturating_add(rect.height) {
            for x in rect.x..rect.x.saturating_add(rect.width) {
                self.set(x, y, true);
            }
        }
    }

    pub fn count(&self) -> usize {
        self.image.pixels().filter(|p| **p == ON).count()
    }
}

/// Bounding rectangles of the 8-connected regions of `mask`, ordered by the first
/// pixel of each region in row-major order.
pub fn blobs(mask: &Mask) -> Vec<Rect> {
    let labels = connected_components(&mask.image, Connectivity::Eight, OFF);

    // Bounds per label, plus the raster index of the label's first pixel.
    let mut regions: Vec<Option<Region>> = Vec::new();
    for (x, y, label) in labels.enumerate_pixels() {
        let Some(index) = (label.0[0] as usize).checked_sub(1) else {
            continue;
        };
        if index >= regions.len() {
            regions.resize(index + 1, None);
        }
        let region = regions[index].get_or_insert(Region {
            first: u64::from(y) * u64::from(mask.width()) + u64::from(x),
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        });
        region.min_x = region.min_x.min(x);
        region.min_y = region.min_y.min(y);
        region.max_x = region.max_x.max(x);
        region.max_y = region.max_y.max(y);
    }

    let mut regions: Vec<Region> = regions.into_iter().flatten().collect();
    regions.sort_by_key(|r| r.first);
    regions
        .into_iter()
        .map(|r| Rect::new(r.min_x, r.min_y, r.max_x - r.min_x + 1, r.max_y - r.min_y + 1))
        .collect()
}

#[derive(Clone, Copy)]
struct Region {
    first: u64,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

/// Gaussian blur. A non-positive sigma returns an unmodified copy.
pub fn blur(image: &RgbImage, sigma: f32) -> RgbImage {
    if sigma > 0.0 {
        imageops::blur(image, sigma)
    } else {
        image.clone()
    }
}

pub fn luma(image: &RgbImage) -> GrayImage {
    imageops::grayscale(image)
}

/// Outline `rect` on `canvas`, clipped to its bounds. Thicker outlines grow inwards.
pub fn draw_rect(canvas: &mut RgbImage, rect: Rect, color: Rgb<u8>, thickness: u32) {
    for t in 0..thickness.max(1) {
        let (Some(width), Some(height)) = (
            rect.width.checked_sub(2 * t).filter(|w| *w > 0),
            rect.height.checked_sub(2 * t).filter(|h| *h > 0),
        ) else {
            break;
        };
        let outline = imageproc::rect::Rect::at(
            i32::try_from(rect.x.saturating_add(t)).unwrap_or(i32::MAX),
            i32::try_from(rect.y.saturating_add(t)).unwrap_or(i32::MAX),
        )
        .of_size(width, height);
        draw_hollow_rect_mut(canvas, outline, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_colours_map_to_expected_hues() {
        assert_eq!(rgb_to_hsv(Rgb([255, 0, 0])), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(Rgb([0, 255, 0])), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 255])), [120, 255, 255]);
        assert_eq!(rgb_to_hsv(Rgb([0, 0, 0])), [0, 0, 0]);
        assert_eq!(rgb_to_hsv(Rgb([128, 128, 128])), [0, 0, 128]);
    }

    #[test]
    fn diagonal_neighbours_join_one_blob() {
        let mut mask = Mask::new(10, 10);
        mask.set(1, 1, true);
        mask.set(2, 2, true);
        mask.set(3, 3, true);
        mask.fill(Rect::new(6, 0, 3, 2));

        let rects = blobs(&mask);
        assert_eq!(rects, vec![Rect::new(6, 0, 3, 2), Rect::new(1, 1, 3, 3)]);
    }

    #[test]
    fn in_range_selects_green_pixels() {
        let mut image = RgbImage::from_pixel(8, 8, Rgb([20, 20, 24]));
        for x in 2..6 {
            image.put_pixel(x, 3, Rgb([40, 220, 60]));
        }
        let mask = Mask::in_range(&image, [50, 100, 100], [70, 255, 255]);
        assert_eq!(mask.count(), 4);
        assert_eq!(blobs(&mask), vec![Rect::new(2, 3, 4, 1)]);
    }

    #[test]
    fn rect_outline_is_clipped() {
        let mut canvas = RgbImage::new(5, 5);
        draw_rect(&mut canvas, Rect::new(3, 3, 4, 4), Rgb([255, 0, 0]), 1);
        assert_eq!(*canvas.get_pixel(3, 3), Rgb([255, 0, 0]));
        assert_eq!(*canvas.get_pixel(4, 3), Rgb([255, 0, 0]));
        assert_eq!(*canvas.get_pixel(4, 4), Rgb([0, 0, 0]));
    }

    #[test]
    fn thick_outline_grows_inwards() {
        let mut canvas = RgbImage::new(8, 8);
        draw_rect(&mut canvas, Rect::new(1, 1, 6, 6), Rgb([0, 255, 0]), 2);
        assert_eq!(*canvas.get_pixel(1, 1), Rgb([0, 255, 0]));
        assert_eq!(*canvas.get_pixel(2, 2), Rgb([0, 255, 0]));
        assert_eq!(*canvas.get_pixel(3, 3), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn empty_mask_has_no_blobs() {
        let mask = Mask::new(6, 4);
        assert!(blobs(&mask).is_empty());
        assert!(!mask.get(10, 10));
    }
}
