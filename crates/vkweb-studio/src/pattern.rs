//! Stand-in for the browser: a thread painting an animated BGRA test pattern.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use vkweb_engine::browser::PaintSlot;

#[derive(Debug, Clone)]
pub struct PatternConfig {
    /// Delay between paints.
    pub interval: Duration,
    /// View sizes the producer alternates between.
    pub sizes: [(u32, u32); 2],
    /// How long each size is kept.
    pub switch_every: Duration,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(33),
            sizes: [(800, 600), (640, 480)],
            switch_every: Duration::from_secs(3),
        }
    }
}

/// Background painter; stops and joins on drop.
pub struct Producer {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Producer {
    pub fn spawn(slot: PaintSlot, config: PatternConfig) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("paint-producer".into())
            .spawn(move || run(slot, config, flag))
            .context("failed to spawn paint producer")?;

        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("paint producer panicked");
            }
        }
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(slot: PaintSlot, config: PatternConfig, stop: Arc<AtomicBool>) {
    let started = Instant::now();
    let mut buffer = Vec::new();
    let mut tick: u32 = 0;
    let mut size_index = 0;

    log::debug!("paint producer started");

    while !stop.load(Ordering::Relaxed) {
        let wanted = size_for(&config, started.elapsed());
        if wanted != size_index {
            size_index = wanted;
            let (w, h) = config.sizes[size_index];
            if let Err(err) = slot.resize(w, h) {
                log::warn!("view resize rejected: {err}");
            }
        }

        let (width, height) = slot.view_size();
        paint_pattern(width, height, tick, &mut buffer);
        if let Err(err) = slot.on_paint(&buffer, width, height) {
            log::warn!("paint dropped: {err}");
        }

        tick = tick.wrapping_add(1);
        thread::sleep(config.interval);
    }

    log::debug!("paint producer stopped after {tick} paints");
}

/// Index into `config.sizes` for the given elapsed time.
fn size_for(config: &PatternConfig, elapsed: Duration) -> usize {
    let period = config.switch_every.as_millis().max(1);
    ((elapsed.as_millis() / period) % 2) as usize
}

/// Fills `out` with a `width`×`height` BGRA frame: a diagonal gradient that
/// scrolls with `tick`, opaque.
pub fn paint_pattern(width: u32, height: u32, tick: u32, out: &mut Vec<u8>) {
    out.clear();
    out.reserve((width as usize) * (height as usize) * 4);

    for y in 0..height {
        for x in 0..width {
            let r = (x.wrapping_add(tick) & 0xff) as u8;
            let g = (y.wrapping_add(tick / 2) & 0xff) as u8;
            let b = ((x ^ y) & 0xff) as u8;
            out.extend_from_slice(&[b, g, r, 0xff]);
        }
    }
}
