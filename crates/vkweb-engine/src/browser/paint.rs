use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::device::GpuError;
use crate::texture::{byte_len, PixelBuffer};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaintError {
    #[error("paint of {len} bytes does not match {width}x{height} BGRA")]
    SizeMismatch { width: u32, height: u32, len: usize },

    #[error("view size {width}x{height} is empty")]
    EmptyView { width: u32, height: u32 },
}

/// Owned copy of a browser paint, BGRA, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaintFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl PaintFrame {
    pub fn pixels(&self) -> Result<PixelBuffer<'_>, GpuError> {
        PixelBuffer::bgra(self.width, self.height, &self.data)
    }
}

#[derive(Debug)]
struct Shared {
    width: u32,
    height: u32,
    buffer: Vec<u8>,
    dirty: bool,
}

/// Hand-off point between the browser's paint callback and the frame loop.
///
/// Cloning shares the same slot. The paint side holds the lock for one copy
/// of the buffer; the frame side for one move out of it.
#[derive(Debug, Clone)]
pub struct PaintSlot {
    shared: Arc<Mutex<Shared>>,
}

impl PaintSlot {
    pub fn new(width: u32, height: u32) -> Result<Self, PaintError> {
        let len = byte_len(width, height)
            .filter(|&len| len > 0)
            .ok_or(PaintError::EmptyView { width, height })?;

        Ok(Self {
            shared: Arc::new(Mutex::new(Shared {
                width,
                height,
                buffer: vec![0; len],
                dirty: false,
            })),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        // A panicking producer leaves plain bytes behind; keep using them.
        self.shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The size the browser should lay out and paint at.
    pub fn view_size(&self) -> (u32, u32) {
        let shared = self.lock();
        (shared.width, shared.height)
    }

    /// Changes the view size. The buffer is resized and zeroed; it becomes
    /// visible only after the next paint.
    pub fn resize(&self, width: u32, height: u32) -> Result<(), PaintError> {
        let len = byte_len(width, height)
            .filter(|&len| len > 0)
            .ok_or(PaintError::EmptyView { width, height })?;

        let mut shared = self.lock();
        shared.width = width;
        shared.height = height;
        shared.buffer.clear();
        shared.buffer.resize(len, 0);
        // A paint taken now would be the blank buffer at the new size.
        shared.dirty = false;
        Ok(())
    }

    /// Stores a full BGRA frame and marks the slot dirty.
    ///
    /// A paint at a different size replaces the stored dimensions.
    pub fn on_paint(&self, bgra: &[u8], width: u32, height: u32) -> Result<(), PaintError> {
        let expected = byte_len(width, height).filter(|&len| len > 0);
        if expected != Some(bgra.len()) {
            return Err(PaintError::SizeMismatch {
                width,
                height,
                len: bgra.len(),
            });
        }

        let mut shared = self.lock();
        shared.width = width;
        shared.height = height;
        shared.buffer.clear();
        shared.buffer.extend_from_slice(bgra);
        shared.dirty = true;
        Ok(())
    }

    pub fn is_dirty(&self) -> bool {
        self.lock().dirty
    }

    /// Moves the latest paint out once, clearing the dirty flag.
    pub fn take_dirty(&self) -> Option<PaintFrame> {
        let mut shared = self.lock();
        if !shared.dirty {
            return None;
        }
        shared.dirty = false;

        Some(PaintFrame {
            width: shared.width,
            height: shared.height,
            data: std::mem::take(&mut shared.buffer),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nothing_to_take_before_a_paint() {
        let slot = PaintSlot::new(4, 4).unwrap();
        assert_eq!(slot.view_size(), (4, 4));
        assert!(!slot.is_dirty());
        assert_eq!(slot.take_dirty(), None);
    }

    #[test]
    fn paint_is_taken_exactly_once() {
        let slot = PaintSlot::new(2, 1).unwrap();
        let bgra = [1, 2, 3, 4, 5, 6, 7, 8];
        slot.on_paint(&bgra, 2, 1).unwrap();

        let frame = slot.take_dirty().unwrap();
        assert_eq!(frame.data, bgra);
        assert_eq!((frame.width, frame.height), (2, 1));
        assert_eq!(slot.take_dirty(), None);
    }

    #[test]
    fn paint_at_new_size_replaces_dimensions() {
        let slot = PaintSlot::new(2, 2).unwrap();
        slot.on_paint(&[9; 12], 3, 1).unwrap();

        assert_eq!(slot.view_size(), (3, 1));
        let frame = slot.take_dirty().unwrap();
        assert_eq!(frame.data.len(), 12);
    }

    #[test]
    fn short_paint_is_rejected_and_not_marked_dirty() {
        let slot = PaintSlot::new(2, 2).unwrap();
        let err = slot.on_paint(&[0; 15], 2, 2).unwrap_err();

        assert_eq!(
            err,
            PaintError::SizeMismatch {
                width: 2,
                height: 2,
                len: 15
            }
        );
        assert!(!slot.is_dirty());
    }

    #[test]
    fn clones_share_the_slot_across_threads() {
        let slot = PaintSlot::new(1, 1).unwrap();
        let producer = slot.clone();

        std::thread::spawn(move || producer.on_paint(&[10, 20, 30, 255], 1, 1).unwrap())
            .join()
            .unwrap();

        let frame = slot.take_dirty().unwrap();
        let pixels = frame.pixels().unwrap();
        let mut rgba = [0u8; 4];
        pixels.write_rgba_into(&mut rgba);
        assert_eq!(rgba, [30, 20, 10, 255]);
    }

    #[test]
    fn resize_rejects_empty_views() {
        let slot = PaintSlot::new(1, 1).unwrap();
        assert!(slot.resize(0, 10).is_err());
        slot.resize(640, 480).unwrap();
        assert_eq!(slot.view_size(), (640, 480));
        assert!(PaintSlot::new(0, 0).is_err());
    }

    #[test]
    fn resize_drops_the_pending_paint() {
        let slot = PaintSlot::new(2, 2).unwrap();
        slot.on_paint(&[9; 16], 2, 2).unwrap();
        slot.resize(4, 4).unwrap();

        assert!(!slot.is_dirty());
        assert_eq!(slot.take_dirty(), None);

        slot.on_paint(&[7; 64], 4, 4).unwrap();
        let frame = slot.take_dirty().unwrap();
        assert_eq!((frame.width, frame.height), (4, 4));
        assert!(frame.data.iter().all(|&b| b == 7));
    }
}
