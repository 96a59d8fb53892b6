//! Color model for the cleared background pass.

pub mod color;

pub use color::ClearColor;
