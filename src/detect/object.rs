//! Object detection on top of instanced processing.
//!
//! A concrete detector only finds candidate rectangles (`ObjectDetector`).
//! `ObjectProcessor` turns them into `DetectedObject`s with angle and distance from
//! the camera's optics, stores them as the camera's state and publishes/draws them.
//!
//! Geometry is the pinhole model. With `W` the sensor width and `fov` the horizontal
//! field of view, the focal length in pixels is `f = (W / 2) / tan(fov / 2)`. A point
//! `dx` pixels right of the optical centre sits at `atan(dx / f)`, and an object of
//! real width `Wr` spanning `w` pixels is `Wr * f / w` away. Vertical angles use the
//! vertical field of view and grow upwards.

use anyhow::Result;
use image::Rgb;
use serde::Deserialize;

use super::imaging::draw_rect;
use super::instanced::InstancedProcessor;
use super::processor::Dependencies;
use crate::camera::CameraInfo;
use crate::frame::{Canvas, Frame};
use crate::pipeline::TableWriter;

const BOX_COLOR: Rgb<u8> = Rgb([255, 200, 0]);
const NEAREST_COLOR: Rgb<u8> = Rgb([255, 40, 40]);

/// Axis-aligned rectangle in frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    /// Width over height.
    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

/// Real-world size of a target, in metres.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct TargetSize {
    pub width: f64,
    pub height: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DetectedObject {
    pub rect: Rect,
    /// Degrees right of the optical axis.
    pub horizontal_angle: f64,
    /// Degrees above the optical axis.
    pub vertical_angle: f64,
    /// Metres, same unit as the target size.
    pub distance: f64,
}

pub trait ObjectDetector: Send + Sync + 'static {
    /// Candidate rectangles in frame coordinates.
    fn detect_objects(
        &self,
        frame: &Frame,
        camera: &CameraInfo,
        deps: &Dependencies<'_>,
    ) -> Result<Vec<Rect>>;

    fn target(&self) -> TargetSize;
}

pub fn focal_length_px(extent: u32, fov_degrees: f64) -> f64 {
    (extent as f64 / 2.0) / (fov_degrees.to_radians() / 2.0).tan()
}

/// Project `rect` (frame coordinates) through the camera's optics.
pub fn locate(rect: Rect, camera: &CameraInfo, target: TargetSize) -> DetectedObject {
    let fx = focal_length_px(camera.width, camera.horizontal_fov);
    let fy = focal_length_px(camera.height, camera.vertical_fov);
    let (cx, cy) = rect.center();
    let dx = cx + camera.crop_x as f64 - camera.width as f64 / 2.0;
    let dy = camera.height as f64 / 2.0 - (cy + camera.crop_y as f64);

    let distance = if rect.width == 0 {
        f64::INFINITY
    } else {
        target.width * fx / rect.width as f64
    };

    DetectedObject {
        rect,
        horizontal_angle: (dx / fx).atan().to_degrees(),
        vertical_angle: (dy / fy).atan().to_degrees(),
        distance,
    }
}

/// Index of the closest object.
pub fn nearest(objects: &[DetectedObject]) -> Option<usize> {
    objects
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.distance.total_cmp(&b.distance))
        .map(|(index, _)| index)
}

pub struct ObjectProcessor<D> {
    detector: D,
}

impl<D: ObjectDetector> ObjectProcessor<D> {
    pub fn new(detector: D) -> Self {
        Self { detector }
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }
}

impl<D: ObjectDetector> InstancedProcessor for ObjectProcessor<D> {
    type State = Vec<DetectedObject>;

    fn process(
        &self,
        frame: &Frame,
        camera: &CameraInfo,
        deps: &Dependencies<'_>,
        _previous: Option<&Self::State>,
    ) -> Result<Self::State> {
        let target = self.detector.target();
        let rects = self.detector.detect_objects(frame, camera, deps)?;
        Ok(rects
            .into_iter()
            .map(|rect| locate(rect, camera, target))
            .collect())
    }

    fn publish(
        &self,
        table: &TableWriter<'_>,
        _camera: &CameraInfo,
        objects: &Self::State,
    ) -> Result<()> {
        let column = |f: fn(&DetectedObject) -> f64| objects.iter().map(f).collect::<Vec<_>>();

        table.put("count", objects.len());
        table.put("nearest", nearest(objects).map_or(-1, |i| i as i64));
        table.put("distances", column(|o| o.distance));
        table.put("horizontal_angles", column(|o| o.horizontal_angle));
        table.put("vertical_angles", column(|o| o.vertical_angle));
        table.put("xs", column(|o| o.rect.x as f64));
        table.put("ys", column(|o| o.rect.y as f64));
        table.put("widths", column(|o| o.rect.width as f64));
        table.put("heights", column(|o| o.rect.height as f64));
        Ok(())
    }

    fn draw(&self, canvas: &mut Canvas, _camera: &CameraInfo, objects: &Self::State) -> Result<()> {
        let closest = nearest(objects);
        for (index, object) in objects.iter().enumerate() {
            if Some(index) == closest {
                draw_rect(canvas, object.rect, NEAREST_COLOR, 2);
            } else {
                draw_rect(canvas, object.rect, BOX_COLOR, 1);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> CameraInfo {
        CameraInfo::new("front", 640, 480, 60.0, 45.0)
    }

    const TARGET: TargetSize = TargetSize {
        width: 0.5,
        height: 0.25,
    };

    #[test]
    fn centred_rect_has_zero_angles() {
        let object = locate(Rect::new(300, 220, 40, 40), &camera(), TARGET);
        assert_eq!(object.horizontal_angle, 0.0);
        assert_eq!(object.vertical_angle, 0.0);
    }

    #[test]
    fn distance_follows_similar_triangles() {
        let f = 320.0 / (30.0f64).to_radians().tan();
        // Footprint of the target at 2 m, then half of it: twice as far.
        let at_two_metres = TARGET.width * f / 2.0;
        let half = (at_two_metres / 2.0).round() as u32;

        let object = locate(Rect::new(0, 0, half, 10), &camera(), TARGET);
        let expected = TARGET.width * f / half as f64;
        assert!(((object.distance - expected) / expected).abs() < 1e-6);
        assert!((object.distance - 4.0).abs() < 0.05);
    }

    #[test]
    fn edge_of_frame_is_half_the_fov() {
        // A 2px rect straddling the right edge is centred on it.
        let object = locate(Rect::new(639, 239, 2, 2), &camera(), TARGET);
        assert!((object.horizontal_angle - 30.0).abs() < 0.2);
        assert!(object.vertical_angle.abs() < 1e-9);

        let above = locate(Rect::new(300, 0, 40, 2), &camera(), TARGET);
        assert!(above.vertical_angle > 22.0);
    }

    #[test]
    fn crop_offset_is_taken_into_account() {
        let mut cropped = camera();
        cropped.crop_x = 300;
        cropped.crop_y = 220;
        let object = locate(Rect::new(0, 0, 40, 40), &cropped, TARGET);
        assert_eq!(object.horizontal_angle, 0.0);
        assert_eq!(object.vertical_angle, 0.0);
    }

    #[test]
    fn nearest_picks_smallest_distance() {
        let objects: Vec<_> = [40, 120, 80]
            .into_iter()
            .map(|w| locate(Rect::new(0, 0, w, 10), &camera(), TARGET))
            .collect();
        assert_eq!(nearest(&objects), Some(1));
        assert_eq!(nearest(&[]), None);
    }
}
