//! Error types shared across the client runtime
//!
//! Fatal start-up conditions live in [`RegistryError`]. Buffer and keymap
//! failures are recoverable: callers log them and skip the affected
//! operation.

use std::io;
use thiserror::Error;

/// Conditions that prevent the client from running at all.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to connect to the Wayland display: {0}")]
    Connect(#[from] wayland_client::ConnectError),

    #[error("no wl_shm global")]
    MissingShm,

    #[error("no wl_compositor global")]
    MissingCompositor,

    #[error("shm pixel format {0} not available")]
    MissingFormat(&'static str),

    #[error("XDG_RUNTIME_DIR is not set")]
    MissingRuntimeDir,

    #[error("roundtrip with the display failed: {0}")]
    Dispatch(#[from] wayland_client::DispatchError),
}

/// Failures while preparing the shared memory behind one buffer slot.
#[derive(Debug, Error)]
pub enum ShmError {
    #[error("creating a buffer file for {size} B failed: {source}")]
    BackingFile {
        size: usize,
        #[source]
        source: io::Error,
    },

    #[error("mmap failed: {0}")]
    Map(#[source] io::Error),

    #[error("invalid buffer dimensions {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
}

/// Failures while loading a server-supplied keymap.
#[derive(Debug, Error)]
pub enum KeymapError {
    #[error("unsupported keymap format {0}")]
    UnsupportedFormat(u32),

    #[error("failed to map keymap: {0}")]
    Map(#[source] io::Error),

    #[error("keymap is not valid UTF-8")]
    InvalidUtf8,

    #[error("failed to compile keymap")]
    Compile,
}
