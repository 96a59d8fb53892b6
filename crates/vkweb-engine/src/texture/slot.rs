use ash::vk;

use crate::device::GpuError;
use crate::render::GpuBackend;

use super::pixels::PixelBuffer;

/// What an upload did to the slot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum UploadOutcome {
    /// The slot was empty; a texture was created.
    Created,
    /// Same dimensions; contents overwritten in place.
    Updated,
    /// Dimensions changed; the old texture was released and a new one created.
    Recreated,
}

/// Holds at most one texture and the extent it was created with.
pub struct TextureSlot<T> {
    current: Option<(T, vk::Extent2D)>,
}

impl<T> Default for TextureSlot<T> {
    fn default() -> Self {
        Self { current: None }
    }
}

impl<T> TextureSlot<T> {
    /// Uploads `pixels`, creating, updating or replacing the texture.
    ///
    /// Replacement waits for device idle before the old texture goes, since
    /// the last submitted frame may still sample it. If creating the new
    /// texture fails, the slot is left empty.
    pub fn upload<B>(&mut self, backend: &mut B, pixels: &PixelBuffer<'_>) -> Result<UploadOutcome, GpuError>
    where
        B: GpuBackend<Texture = T>,
    {
        let extent = pixels.extent();

        if let Some((texture, current)) = &self.current {
            if *current == extent {
                backend.update_texture(texture, pixels)?;
                return Ok(UploadOutcome::Updated);
            }
        }

        let replaced = match self.current.take() {
            Some((old, old_extent)) => {
                log::debug!(
                    "texture size {}x{} -> {}x{}",
                    old_extent.width,
                    old_extent.height,
                    extent.width,
                    extent.height
                );
                if let Err(err) = backend.wait_idle() {
                    self.current = Some((old, old_extent));
                    return Err(err);
                }
                backend.destroy_texture(old);
                true
            }
            None => false,
        };

        let texture = backend.create_texture(pixels)?;
        self.current = Some((texture, extent));

        Ok(if replaced {
            UploadOutcome::Recreated
        } else {
            UploadOutcome::Created
        })
    }

    pub fn get(&self) -> Option<&T> {
        self.current.as_ref().map(|(t, _)| t)
    }

    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.current.as_ref().map(|&(_, e)| e)
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none()
    }

    /// Releases the texture, if any. The GPU must be idle.
    pub fn clear<B>(&mut self, backend: &mut B)
    where
        B: GpuBackend<Texture = T>,
    {
        if let Some((texture, _)) = self.current.take() {
            backend.destroy_texture(texture);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingBackend};

    fn solid(width: u32, height: u32, bgra: [u8; 4]) -> Vec<u8> {
        bgra.repeat((width * height) as usize)
    }

    #[test]
    fn first_upload_creates() {
        let mut backend = RecordingBackend::default();
        let mut slot = TextureSlot::default();
        let data = solid(4, 4, [0, 0, 0, 0]);

        let outcome = slot.upload(&mut backend, &PixelBuffer::bgra(4, 4, &data).unwrap()).unwrap();

        assert_eq!(outcome, UploadOutcome::Created);
        assert_eq!(slot.extent(), Some(vk::Extent2D { width: 4, height: 4 }));
    }

    #[test]
    fn same_size_updates_in_place() {
        let mut backend = RecordingBackend::default();
        let mut slot = TextureSlot::default();
        let data = solid(4, 4, [1, 2, 3, 4]);
        let pixels = PixelBuffer::bgra(4, 4, &data).unwrap();

        slot.upload(&mut backend, &pixels).unwrap();
        let id = *slot.get().unwrap();
        assert_eq!(slot.upload(&mut backend, &pixels).unwrap(), UploadOutcome::Updated);

        assert_eq!(*slot.get().unwrap(), id);
        assert_eq!(backend.live_textures(), 1);
    }

    #[test]
    fn size_change_releases_before_creating() {
        let mut backend = RecordingBackend::default();
        let mut slot = TextureSlot::default();
        let big = solid(8, 6, [0; 4]);
        let small = solid(4, 3, [0; 4]);

        slot.upload(&mut backend, &PixelBuffer::bgra(8, 6, &big).unwrap()).unwrap();
        let old = *slot.get().unwrap();
        backend.clear_calls();

        let outcome = slot.upload(&mut backend, &PixelBuffer::bgra(4, 3, &small).unwrap()).unwrap();
        let new = *slot.get().unwrap();

        assert_eq!(outcome, UploadOutcome::Recreated);
        assert_eq!(
            backend.calls(),
            &[
                Call::WaitIdle,
                Call::DestroyView(old),
                Call::DestroyImage(old),
                Call::FreeMemory(old),
                Call::CreateTexture(new),
            ]
        );
        assert_eq!(slot.extent(), Some(vk::Extent2D { width: 4, height: 3 }));
    }

    #[test]
    fn failed_create_leaves_slot_empty() {
        let mut backend = RecordingBackend::default();
        let mut slot = TextureSlot::default();
        let a = solid(2, 2, [0; 4]);
        let b = solid(3, 3, [0; 4]);

        slot.upload(&mut backend, &PixelBuffer::bgra(2, 2, &a).unwrap()).unwrap();
        backend.fail_next_create();

        let err = slot.upload(&mut backend, &PixelBuffer::bgra(3, 3, &b).unwrap());

        assert!(matches!(err, Err(GpuError::NoCompatibleMemory)));
        assert!(slot.is_empty());
        assert_eq!(backend.live_textures(), 0);
    }

    #[test]
    fn clear_on_empty_slot_is_a_no_op() {
        let mut backend = RecordingBackend::default();
        let mut slot: TextureSlot<u32> = TextureSlot::default();
        slot.clear(&mut backend);
        assert!(backend.calls().is_empty());
    }
}
