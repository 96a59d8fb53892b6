//! Pixel buffers and their GPU-side textures.
//!
//! `pixels` validates and reorders CPU pixel data, `upload` moves it into
//! device-local images through a staging buffer, and `slot` decides between
//! creating, updating and replacing the single live texture.

mod pixels;
mod slot;
mod upload;

pub use pixels::{byte_len, ChannelOrder, PixelBuffer};
pub use slot::{TextureSlot, UploadOutcome};
pub use upload::{GpuTexture, TextureUploader, TEXTURE_FORMAT};
