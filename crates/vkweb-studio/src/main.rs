mod pattern;

use anyhow::{Context, Result};
use winit::event::WindowEvent;
use winit::window::WindowId;

use vkweb_engine::browser::PaintSlot;
use vkweb_engine::core::{App, AppControl, FrameCtx};
use vkweb_engine::device::GpuInit;
use vkweb_engine::logging::{LoggingConfig, init_logging};
use vkweb_engine::paint::ClearColor;
use vkweb_engine::render::VulkanRenderer;
use vkweb_engine::texture::UploadOutcome;
use vkweb_engine::window::{Runtime, RuntimeConfig};

use pattern::{PatternConfig, Producer};

struct Studio {
    slot: PaintSlot,
    producer: Producer,
    uploads: u64,
}

impl App for Studio {
    fn on_window_event(&mut self, _window_id: WindowId, event: &WindowEvent) -> AppControl {
        if let WindowEvent::CloseRequested = event {
            // Stop painting before the renderer goes away.
            self.producer.stop();
            log::info!("closing after {} texture uploads", self.uploads);
        }
        AppControl::Continue
    }

    fn on_renderer_ready(&mut self, renderer: &mut VulkanRenderer) -> AppControl {
        let info = renderer.backend().ui_init_info();
        log::info!(
            "UI backend can bind: queue family {}, {} swapchain images (min {})",
            info.queue_family,
            info.image_count,
            info.min_image_count
        );
        AppControl::Continue
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl {
        match ctx.upload_paint(&self.slot) {
            Ok(Some(outcome)) => {
                self.uploads += 1;
                if outcome != UploadOutcome::Updated {
                    log::info!("browser texture {outcome:?}");
                }
            }
            Ok(None) => {}
            Err(err) if err.is_recoverable() => log::warn!("upload skipped: {err}"),
            // No texture this frame; the UI draws without it.
            Err(err) => log::warn!("upload failed: {err}"),
        }

        ctx.render(|frame, binding| {
            // UI draw calls are recorded into `frame.recording` here.
            if let Some(binding) = binding {
                log::trace!(
                    "frame on image {}: texture {}x{} in {:?}",
                    frame.image_index,
                    binding.extent.width,
                    binding.extent.height,
                    binding.layout
                );
            }
        })
    }
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let config = PatternConfig::default();
    let (width, height) = config.sizes[0];
    let slot = PaintSlot::new(width, height).context("invalid initial view size")?;
    let producer = Producer::spawn(slot.clone(), config)?;

    let studio = Studio {
        slot,
        producer,
        uploads: 0,
    };

    let gpu_init = GpuInit {
        app_name: "vkweb-studio".into(),
        clear_color: ClearColor::from_srgb_u8(0x1e, 0x1e, 0x24, 0xff),
        ..GpuInit::default()
    };

    let runtime = RuntimeConfig {
        title: "vkweb studio".into(),
        ..RuntimeConfig::default()
    };

    Runtime::run(runtime, gpu_init, studio)
}
