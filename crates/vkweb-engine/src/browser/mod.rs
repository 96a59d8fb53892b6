//! Boundary with the embedded browser.
//!
//! The browser paints off-screen on its own thread and hands complete BGRA
//! frames to a [`PaintSlot`]; the frame loop takes them out when dirty.

mod paint;

pub use paint::{PaintError, PaintFrame, PaintSlot};
