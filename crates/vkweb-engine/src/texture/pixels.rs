use ash::vk;

use crate::device::GpuError;

/// Byte order of each 4-byte pixel.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ChannelOrder {
    /// Blue, green, red, alpha. What the browser hands out.
    Bgra,
    Rgba,
}

/// Borrowed, dense, row-major pixel data.
///
/// Construction validates that `data` is exactly `width * height * 4` bytes
/// and that neither dimension is zero.
#[derive(Debug, Copy, Clone)]
pub struct PixelBuffer<'a> {
    width: u32,
    height: u32,
    order: ChannelOrder,
    data: &'a [u8],
}

impl<'a> PixelBuffer<'a> {
    pub fn new(width: u32, height: u32, order: ChannelOrder, data: &'a [u8]) -> Result<Self, GpuError> {
        let valid = width > 0 && height > 0 && byte_len(width, height) == Some(data.len());
        if !valid {
            return Err(GpuError::InvalidPixelBuffer {
                width,
                height,
                len: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            order,
            data,
        })
    }

    pub fn bgra(width: u32, height: u32, data: &'a [u8]) -> Result<Self, GpuError> {
        Self::new(width, height, ChannelOrder::Bgra, data)
    }

    pub fn rgba(width: u32, height: u32, data: &'a [u8]) -> Result<Self, GpuError> {
        Self::new(width, height, ChannelOrder::Rgba, data)
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    /// Size in bytes; also the size of the staging buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false for a validated buffer.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Writes the pixels into `dst` as RGBA, swapping red and blue if needed.
    ///
    /// `dst` must be at least [`len`](Self::len) bytes.
    pub fn write_rgba_into(&self, dst: &mut [u8]) {
        let dst = &mut dst[..self.data.len()];
        match self.order {
            ChannelOrder::Rgba => dst.copy_from_slice(self.data),
            ChannelOrder::Bgra => {
                let src: &[[u8; 4]] = bytemuck::cast_slice(self.data);
                let out: &mut [[u8; 4]] = bytemuck::cast_slice_mut(dst);
                for (o, &[b, g, r, a]) in out.iter_mut().zip(src) {
                    *o = [r, g, b, a];
                }
            }
        }
    }
}

/// `width * height * 4`, or `None` on overflow.
pub fn byte_len(width: u32, height: u32) -> Option<usize> {
    (width as usize).checked_mul(height as usize)?.checked_mul(4)
}
