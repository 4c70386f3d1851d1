//! Window: one surface, two shared-memory buffers and a frame pacer
//!
//! The window turns redraw requests, configure events, frame completions and
//! buffer releases into render passes. A render pass picks a free buffer,
//! attaches it if it is not the one already attached, lets the [`Painter`]
//! fill it, and commits it together with a new frame callback and full
//! damage.
//!
//! Everything the window asks of the server goes through
//! [`SurfaceProtocol`], implemented over wayland objects in
//! [`crate::client`].

use crate::frame_pacing::{FrameDone, FramePacer, FrameState, FrameStats};
use crate::shm::{BufferFactory, BufferGeometry, PixelFormat, ShmBufferPool};
use log::{debug, info};

/// Surface requests issued by a window
pub trait SurfaceProtocol: BufferFactory {
    fn attach(&mut self, buffer: &Self::Buffer);

    /// Mark `width`x`height` from the origin as damaged.
    fn damage(&mut self, width: u32, height: u32);

    /// Register for the next frame-completion event.
    fn request_frame(&mut self);

    fn commit(&mut self);

    /// Destroy the surface and its shell role.
    fn destroy(&mut self);
}

/// Pixel memory of the buffer being painted
pub struct Frame<'a> {
    pixels: &'a mut [u8],
    geometry: BufferGeometry,
    sequence: u64,
}

impl<'a> Frame<'a> {
    pub fn width(&self) -> u32 {
        self.geometry.width
    }

    pub fn height(&self) -> u32 {
        self.geometry.height
    }

    /// Bytes per row
    pub fn stride(&self) -> u32 {
        self.geometry.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.geometry.format
    }

    /// Number of this paint call for the window, starting at 1
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.pixels
    }

    /// Pixels as native-endian 32-bit words, which is the little-endian
    /// layout `wl_shm` expects on the usual hosts.
    pub fn pixels_mut(&mut self) -> &mut [u32] {
        bytemuck::cast_slice_mut(self.pixels)
    }

    pub fn fill(&mut self, pixel: u32) {
        self.pixels_mut().fill(pixel);
    }
}

/// Fills a buffer with the window's content.
pub trait Painter {
    fn paint(&mut self, frame: &mut Frame<'_>);
}

impl<F> Painter for F
where
    F: FnMut(&mut Frame<'_>),
{
    fn paint(&mut self, frame: &mut Frame<'_>) {
        self(frame)
    }
}

pub struct Window<P: SurfaceProtocol> {
    protocol: P,
    width: u32,
    height: u32,
    pool: ShmBufferPool<P::Buffer>,
    pacer: FramePacer,
    /// Slot and allocation generation of the last attached buffer
    attached: Option<(usize, u64)>,
    painter: Box<dyn Painter>,
    configured: bool,
    painted: u64,
}

impl<P: SurfaceProtocol> Window<P> {
    pub fn new(
        protocol: P,
        width: u32,
        height: u32,
        pool: ShmBufferPool<P::Buffer>,
        painter: Box<dyn Painter>,
    ) -> Self {
        Self {
            protocol,
            width,
            height,
            pool,
            pacer: FramePacer::new(),
            attached: None,
            painter,
            configured: true,
            painted: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn frame_state(&self) -> FrameState {
        self.pacer.state()
    }

    pub fn stats(&self) -> FrameStats {
        self.pacer.stats()
    }

    pub fn pool(&self) -> &ShmBufferPool<P::Buffer> {
        &self.pool
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn protocol_mut(&mut self) -> &mut P {
        &mut self.protocol
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Hold back rendering until the first configure arrives.
    pub fn await_configure(&mut self) {
        self.configured = false;
    }

    /// Content changed; render now or once the frame in flight completes.
    pub fn schedule_redraw(&mut self) {
        if !self.configured {
            debug!("redraw before first configure ignored");
            return;
        }
        if self.pacer.schedule_redraw() {
            self.render();
        }
    }

    /// Server-suggested size. Non-positive dimensions keep the current one.
    pub fn configure(&mut self, width: i32, height: i32) {
        let width = u32::try_from(width)
            .ok()
            .filter(|&w| w > 0)
            .unwrap_or(self.width);
        let height = u32::try_from(height)
            .ok()
            .filter(|&h| h > 0)
            .unwrap_or(self.height);

        if (width, height) != (self.width, self.height) {
            info!(
                "window resized {}x{} -> {}x{}",
                self.width, self.height, width, height
            );
            self.width = width;
            self.height = height;
        }

        self.configured = true;
        self.schedule_redraw();
    }

    /// The frame committed last has been presented.
    pub fn frame_done(&mut self) {
        match self.pacer.frame_done() {
            FrameDone::Render => self.render(),
            FrameDone::Idle | FrameDone::Spurious => {}
        }
    }

    /// The server no longer reads `slot`.
    pub fn buffer_released(&mut self, slot: usize) {
        self.pool.release(slot);
        if self.pacer.take_starved() {
            debug!("retrying render after buffer {} release", slot);
            self.render();
        }
    }

    fn render(&mut self) {
        let Some(slot) = self.pool.acquire(&mut self.protocol, self.width, self.height) else {
            self.pacer.render_abandoned();
            return;
        };

        let generation = self.pool.slot(slot).generation();
        if self.attached != Some((slot, generation)) {
            if let Some(handle) = self.pool.slot(slot).handle() {
                self.protocol.attach(handle);
            }
            self.attached = Some((slot, generation));
        }

        let buffer = self.pool.slot_mut(slot);
        let (Some(geometry), Some(pixels)) = (buffer.geometry(), buffer.pixels_mut()) else {
            self.pacer.render_abandoned();
            return;
        };

        self.painted += 1;
        let mut frame = Frame {
            pixels,
            geometry,
            sequence: self.painted,
        };
        self.painter.paint(&mut frame);

        self.pool.mark_busy(slot);
        self.protocol.request_frame();
        self.protocol.damage(self.width, self.height);
        self.protocol.commit();
        self.pacer.render_committed();

        debug!(
            "frame {} committed from buffer {} ({}x{})",
            self.painted, slot, self.width, self.height
        );
    }
}

impl<P: SurfaceProtocol> Drop for Window<P> {
    fn drop(&mut self) {
        self.pool.destroy(&mut self.protocol);
        self.protocol.destroy();
    }
}

#[cfg(test)]
mod tests;
