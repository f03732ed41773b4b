//! Frames and the bounded frame history.
//!
//! - `Frame`: immutable, reference-counted RGB image plus sequence number and capture time.
//! - `Crop`: region applied by a camera session before a frame is handed out.
//! - `FrameRingBuffer`: fixed-capacity circular history that overwrites its oldest slot.
//!
//! Frames are never mutated once published. Drawing happens on a `Canvas`, an owned
//! copy obtained through `Frame::to_canvas()`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use image::RgbImage;
use serde::Deserialize;

use crate::error::ConfigurationError;

/// Owned, mutable copy of a frame used for overlays.
pub type Canvas = RgbImage;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Frame {
    image: Arc<RgbImage>,
    sequence: u64,
    captured_at: SystemTime,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64, captured_at: SystemTime) -> Self {
        Self {
            image: Arc::new(image),
            sequence,
            captured_at,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Position of this frame in its camera's read order, starting at 1.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    /// Copy the pixels into a canvas that can be drawn on without touching this frame.
    pub fn to_canvas(&self) -> Canvas {
        self.image.as_ref().clone()
    }

    /// True when both handles point at the same published pixel buffer.
    pub fn same_pixels(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

// ----------------------------------------------------------------------------
// Crop
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub struct Crop {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Crop {
    /// Intersect the crop with a `width`x`height` image. `None` when nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Crop> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let clamped = Crop {
            x: self.x,
            y: self.y,
            width: self.width.min(width - self.x),
            height: self.height.min(height - self.y),
        };
        if clamped.width == 0 || clamped.height == 0 {
            return None;
        }
        Some(clamped)
    }

    /// Apply the crop. An image the crop does not intersect is returned unchanged.
    pub fn apply(&self, image: RgbImage) -> RgbImage {
        match self.clamp_to(image.width(), image.height()) {
            Some(c) if c.width != image.width() || c.height != image.height() => {
                image::imageops::crop_imm(&image, c.x, c.y, c.width, c.height).to_image()
            }
            _ => image,
        }
    }
}

// ----------------------------------------------------------------------------
// FrameRingBuffer
// ----------------------------------------------------------------------------

/// Bounded circular frame history.
///
/// `push` never blocks on consumers and never grows: once full, the oldest slot is
/// overwritten. Slots are only read or written under the ring's lock, so a reader
/// always gets a whole `Frame` handle.
pub struct FrameRingBuffer {
    ring: Mutex<Ring>,
    capacity: usize,
}

struct Ring {
    slots: Vec<Option<Frame>>,
    /// Index of the oldest occupied slot.
    head: usize,
    len: usize,
    overwritten: u64,
}

impl Ring {
    fn slot_index(&self, offset: usize) -> usize {
        (self.head + offset) % self.slots.len()
    }
}

impl FrameRingBuffer {
    pub fn new(capacity: usize) -> Result<Self, ConfigurationError> {
        if capacity == 0 {
            return Err(ConfigurationError::invalid(
                "ring_capacity",
                "must be at least 1",
            ));
        }
        Ok(Self {
            ring: Mutex::new(Ring {
                slots: vec![None; capacity],
                head: 0,
                len: 0,
                overwritten: 0,
            }),
            capacity,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, frame: Frame) {
        let mut ring = self.lock();
        if ring.len == self.capacity {
            let head = ring.head;
            ring.slots[head] = Some(frame);
            ring.head = (head + 1) % self.capacity;
            ring.overwritten += 1;
        } else {
            let tail = ring.slot_index(ring.len);
            ring.slots[tail] = Some(frame);
            ring.len += 1;
        }
    }

    /// Remove and return the newest frame.
    pub fn pop_latest(&self) -> Option<Frame> {
        let mut ring = self.lock();
        if ring.len == 0 {
            return None;
        }
        let tail = ring.slot_index(ring.len - 1);
        ring.len -= 1;
        ring.slots[tail].take()
    }

    /// Remove and return the oldest frame.
    pub fn pop_oldest(&self) -> Option<Frame> {
        let mut ring = self.lock();
        if ring.len == 0 {
            return None;
        }
        let head = ring.head;
        let frame = ring.slots[head].take();
        ring.head = (head + 1) % self.capacity;
        ring.len -= 1;
        frame
    }

    /// Newest frame without removing it.
    pub fn latest(&self) -> Option<Frame> {
        let ring = self.lock();
        if ring.len == 0 {
            return None;
        }
        ring.slots[ring.slot_index(ring.len - 1)].clone()
    }

    /// All buffered frames, oldest first.
    pub fn snapshot(&self) -> Vec<Frame> {
        let ring = self.lock();
        (0..ring.len)
            .filter_map(|offset| ring.slots[ring.slot_index(offset)].clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of frames evicted by overwrite since construction.
    pub fn overwritten(&self) -> u64 {
        self.lock().overwritten
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
