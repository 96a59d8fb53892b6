use ash::vk;
use bytemuck::{Pod, Zeroable};

/// Straight-alpha RGBA color the render pass clears to.
///
/// The swapchain uses an sRGB format, so components are linear; the hardware
/// encodes them on store.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct ClearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ClearColor {
    pub const BLACK: Self = Self::new(0.0, 0.0, 0.0, 1.0);

    #[inline]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Creates a linear color from sRGB bytes (`0`–`255`).
    ///
    /// Alpha is passed through unchanged.
    #[inline]
    pub fn from_srgb_u8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self {
            r: srgb_to_linear(r as f32 / 255.0),
            g: srgb_to_linear(g as f32 / 255.0),
            b: srgb_to_linear(b as f32 / 255.0),
            a: a as f32 / 255.0,
        }
    }

    /// Clamps all channels to [0, 1].
    #[inline]
    pub fn clamped(self) -> Self {
        Self {
            r: self.r.clamp(0.0, 1.0),
            g: self.g.clamp(0.0, 1.0),
            b: self.b.clamp(0.0, 1.0),
            a: self.a.clamp(0.0, 1.0),
        }
    }

    #[inline]
    pub fn to_clear_value(self) -> vk::ClearValue {
        let c = self.clamped();
        vk::ClearValue {
            color: vk::ClearColorValue {
                float32: bytemuck::cast(c),
            },
        }
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn black_and_white_survive_srgb_decode() {
        assert_eq!(ClearColor::from_srgb_u8(0, 0, 0, 255), ClearColor::BLACK);
        let white = ClearColor::from_srgb_u8(255, 255, 255, 255);
        assert!((white.r - 1.0).abs() < 1e-6);
        assert!((white.b - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mid_grey_is_darker_in_linear_space() {
        let grey = ClearColor::from_srgb_u8(128, 128, 128, 255);
        assert!(grey.r > 0.2 && grey.r < 0.23);
    }

    #[test]
    fn clear_value_is_clamped_rgba() {
        let value = ClearColor::new(2.0, -1.0, 0.5, 1.0).to_clear_value();
        // SAFETY: the union was written through `float32`.
        let rgba = unsafe { value.color.float32 };
        assert_eq!(rgba, [1.0, 0.0, 0.5, 1.0]);
    }
}
