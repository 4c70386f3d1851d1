//! Shared-memory buffer pool
//!
//! Every window owns exactly two buffer slots (double buffering). A slot is
//! backed by an unlinked file under `XDG_RUNTIME_DIR`, mapped read-write into
//! this process and wrapped into a server-side buffer object by a
//! [`BufferFactory`].
//!
//! Ownership of a slot's memory moves to the server between commit and the
//! matching release event. While a slot is busy the pool never hands out its
//! pixels.

use crate::error::{RegistryError, ShmError};
use log::{debug, warn};
use memmap2::MmapMut;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::{Path, PathBuf};

/// Number of buffers per window. Fixed by the double-buffering scheme.
pub const SLOT_COUNT: usize = 2;

/// Both supported formats store one pixel in a 32-bit word.
pub const BYTES_PER_PIXEL: u32 = 4;

/// Environment variable naming the directory that holds backing files.
pub const RUNTIME_DIR_ENV: &str = "XDG_RUNTIME_DIR";

/// 32-bit pixel formats the rendering path can fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 32-bit ARGB with a real alpha channel
    #[default]
    Argb8888,
    /// 32-bit RGB, the top byte is ignored by the server
    Xrgb8888,
}

impl PixelFormat {
    /// Wire code announced by `wl_shm.format`
    pub fn code(self) -> u32 {
        match self {
            PixelFormat::Argb8888 => 0,
            PixelFormat::Xrgb8888 => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PixelFormat::Argb8888 => "ARGB8888",
            PixelFormat::Xrgb8888 => "XRGB8888",
        }
    }
}

/// Row length in bytes for a buffer of the given width
pub fn stride(width: u32) -> u32 {
    width * BYTES_PER_PIXEL
}

/// Layout of one buffer's pixel memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferGeometry {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
}

impl BufferGeometry {
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            stride: stride(width),
            format,
        }
    }

    /// Size of the backing memory in bytes
    pub fn size(&self) -> usize {
        self.stride as usize * self.height as usize
    }

    fn validate(&self) -> Result<(), ShmError> {
        let fits = (self.width as u64 * BYTES_PER_PIXEL as u64)
            .checked_mul(self.height as u64)
            .is_some_and(|size| size <= i32::MAX as u64);
        if self.width == 0 || self.height == 0 || !fits {
            return Err(ShmError::InvalidSize {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// Creates and destroys the server-side objects wrapping shared memory.
///
/// The wayland implementation creates a `wl_shm_pool` from the descriptor,
/// carves one `wl_buffer` out of it and destroys the pool again. Tests plug
/// in a recorder instead.
pub trait BufferFactory {
    type Buffer;

    /// Wrap `memory` (already sized to `geometry.size()`) into a server
    /// buffer. The descriptor is closed by the pool once this returns.
    fn create_buffer(
        &mut self,
        memory: BorrowedFd<'_>,
        geometry: &BufferGeometry,
        slot: usize,
    ) -> Self::Buffer;

    fn destroy_buffer(&mut self, buffer: Self::Buffer);
}

/// Resolve the directory used for backing files from the environment.
pub fn runtime_dir() -> Result<PathBuf, RegistryError> {
    match std::env::var_os(RUNTIME_DIR_ENV) {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => Err(RegistryError::MissingRuntimeDir),
    }
}

/// Create a file in `dir` that has no name on the filesystem and is
/// `size` bytes long.
pub fn create_anonymous_file(dir: &Path, size: usize) -> Result<File, ShmError> {
    let file =
        tempfile::tempfile_in(dir).map_err(|source| ShmError::BackingFile { size, source })?;
    file.set_len(size as u64)
        .map_err(|source| ShmError::BackingFile { size, source })?;
    Ok(file)
}

/// One slot of the pool
pub struct ShmBuffer<B> {
    handle: Option<B>,
    memory: Option<MmapMut>,
    geometry: Option<BufferGeometry>,
    generation: u64,
    busy: bool,
}

impl<B> Default for ShmBuffer<B> {
    fn default() -> Self {
        Self {
            handle: None,
            memory: None,
            geometry: None,
            generation: 0,
            busy: false,
        }
    }
}

impl<B> ShmBuffer<B> {
    /// Server-side buffer object, if the slot has been allocated
    pub fn handle(&self) -> Option<&B> {
        self.handle.as_ref()
    }

    pub fn geometry(&self) -> Option<BufferGeometry> {
        self.geometry
    }

    /// Allocation counter; changes every time the slot is reinitialised
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_allocated(&self) -> bool {
        self.handle.is_some() && self.memory.is_some()
    }

    /// Writable pixel memory. `None` while the server owns the buffer.
    pub fn pixels_mut(&mut self) -> Option<&mut [u8]> {
        if self.busy {
            return None;
        }
        self.memory.as_deref_mut()
    }

    fn matches(&self, geometry: &BufferGeometry) -> bool {
        self.is_allocated() && self.geometry.as_ref() == Some(geometry)
    }

    /// Unmap the memory and destroy the server buffer.
    fn reset<F>(&mut self, factory: &mut F)
    where
        F: BufferFactory<Buffer = B>,
    {
        self.memory = None;
        if let Some(handle) = self.handle.take() {
            factory.destroy_buffer(handle);
        }
        self.geometry = None;
        self.busy = false;
    }
}

/// Two shared-memory buffers and their busy state
pub struct ShmBufferPool<B> {
    slots: [ShmBuffer<B>; SLOT_COUNT],
    runtime_dir: PathBuf,
    format: PixelFormat,
    generations: u64,
}

impl<B> ShmBufferPool<B> {
    pub fn new(runtime_dir: impl Into<PathBuf>, format: PixelFormat) -> Self {
        Self {
            slots: [ShmBuffer::default(), ShmBuffer::default()],
            runtime_dir: runtime_dir.into(),
            format,
            generations: 0,
        }
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Return the first free slot, (re)allocated for `width`x`height`.
    ///
    /// `None` means no buffer is available for this redraw: either both
    /// slots are owned by the server or the backing memory could not be
    /// created. Neither is fatal; the caller retries later.
    pub fn acquire<F>(&mut self, factory: &mut F, width: u32, height: u32) -> Option<usize>
    where
        F: BufferFactory<Buffer = B>,
    {
        let Some(slot) = self.slots.iter().position(|buffer| !buffer.busy) else {
            debug!("both shm buffers are busy");
            return None;
        };

        let geometry = BufferGeometry::new(width, height, self.format);
        if !self.slots[slot].matches(&geometry) {
            if let Err(e) = self.allocate(factory, slot, geometry) {
                warn!("shm buffer {} unavailable: {}", slot, e);
                return None;
            }
        }

        Some(slot)
    }

    fn allocate<F>(
        &mut self,
        factory: &mut F,
        slot: usize,
        geometry: BufferGeometry,
    ) -> Result<(), ShmError>
    where
        F: BufferFactory<Buffer = B>,
    {
        geometry.validate()?;
        self.slots[slot].reset(factory);

        let size = geometry.size();
        let file = create_anonymous_file(&self.runtime_dir, size)?;
        // SAFETY: the file is unlinked and private to this process; the only
        // other mapping is the server's, which reads it only while the slot is
        // busy, and busy slots never hand out their memory.
        let mut memory = unsafe { MmapMut::map_mut(&file) }.map_err(ShmError::Map)?;
        memory.fill(0xff);

        let handle = factory.create_buffer(file.as_fd(), &geometry, slot);
        drop(file);

        self.generations += 1;
        let buffer = &mut self.slots[slot];
        buffer.handle = Some(handle);
        buffer.memory = Some(memory);
        buffer.geometry = Some(geometry);
        buffer.generation = self.generations;
        buffer.busy = false;

        debug!(
            "shm buffer {} allocated: {}x{} stride {} ({} B, {})",
            slot,
            geometry.width,
            geometry.height,
            geometry.stride,
            size,
            geometry.format.name()
        );
        Ok(())
    }

    pub fn slot(&self, slot: usize) -> &ShmBuffer<B> {
        &self.slots[slot]
    }

    pub fn slot_mut(&mut self, slot: usize) -> &mut ShmBuffer<B> {
        &mut self.slots[slot]
    }

    /// Hand the slot to the server.
    pub fn mark_busy(&mut self, slot: usize) {
        self.slots[slot].busy = true;
    }

    /// Server released the slot; it may be painted again.
    pub fn release(&mut self, slot: usize) {
        if let Some(buffer) = self.slots.get_mut(slot) {
            buffer.busy = false;
        }
    }

    pub fn busy_count(&self) -> usize {
        self.slots.iter().filter(|buffer| buffer.busy).count()
    }

    /// Release every slot's memory and server buffer.
    pub fn destroy<F>(&mut self, factory: &mut F)
    where
        F: BufferFactory<Buffer = B>,
    {
        for buffer in &mut self.slots {
            buffer.reset(factory);
        }
    }
}
