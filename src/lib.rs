//! # shmwin
//!
//! A minimal Wayland client: one toplevel window drawn into double-buffered
//! shared memory, paced by frame callbacks, with keyboard input decoded
//! through xkbcommon.
//!
//! ## Architecture
//!
//! - `registry`: Connection and global discovery
//! - `shm`: Shared-memory buffer pool
//! - `frame_pacing`: Frame callback state machine
//! - `window`: Render passes over one surface
//! - `input`: Keymap loading and key translation
//! - `client`: Wayland event dispatch
//! - `config`: Configuration parsing and management
//!
//! ## Usage
//!
//! ```rust,no_run
//! use shmwin::{Client, ClientConfig};
//! use shmwin::input::KeyEvent;
//! use shmwin::window::Frame;
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut client = Client::connect(ClientConfig::default(), Box::new(|_: &KeyEvent| {}))?;
//!     client.create_window(Box::new(|frame: &mut Frame<'_>| frame.fill(0xff20_2020)))?;
//!     client.schedule_redraw();
//!     client.run()?;
//!     client.shutdown()?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod frame_pacing;
pub mod input;
pub mod logging;
pub mod registry;
pub mod shm;
pub mod window;

// Re-export main types for easy access
pub use client::Client;
pub use config::ClientConfig;
pub use frame_pacing::{FramePacer, FrameState, FrameStats};
pub use input::{KeyEvent, KeyHandler, KeyboardDecoder};
pub use shm::{PixelFormat, ShmBufferPool};
pub use window::{Frame, Painter, Window};

// Re-export common error types
pub use anyhow::{Context, Error, Result};

/// Version information for shmwin
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
