//! # shmwin - shared-memory Wayland demo client
//!
//! Opens one toplevel window, paints an animated gradient into it at the
//! compositor's frame rate and logs key presses. Escape or closing the
//! window exits.

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use shmwin::input::KeyEvent;
use shmwin::window::Frame;
use shmwin::{logging, Client, ClientConfig};
use std::cell::Cell;
use std::rc::Rc;
use xkbcommon::xkb::keysyms;

#[derive(Parser)]
#[command(name = "shmwin")]
#[command(about = "A shared-memory Wayland client with frame-paced rendering")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "~/.config/shmwin/shmwin.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Initial window width
    #[arg(long)]
    width: Option<u32>,

    /// Initial window height
    #[arg(long)]
    height: Option<u32>,

    /// Window title
    #[arg(long)]
    title: Option<String>,
}

/// Diagonal gradient whose hue drifts with the frame sequence
fn paint_gradient(frame: &mut Frame<'_>) {
    let width = frame.width();
    let height = frame.height().max(1);
    let phase = (frame.sequence() % 256) as u32;
    let pixels_per_row = (frame.stride() / 4) as usize;

    for (y, row) in frame.pixels_mut().chunks_exact_mut(pixels_per_row).enumerate() {
        let y = y as u32;
        for (x, pixel) in row.iter_mut().take(width as usize).enumerate() {
            let x = x as u32;
            let r = (x * 255 / width.max(1) + phase) & 0xff;
            let g = (y * 255 / height + phase / 2) & 0xff;
            let b = 255 - ((x + y + phase) & 0xff);
            *pixel = 0xff00_0000 | (r << 16) | (g << 8) | b;
        }
    }
}

/// Connect, animate until Escape or close, then tear down.
fn run(config: ClientConfig) -> Result<()> {
    let quit = Rc::new(Cell::new(false));
    let key_quit = Rc::clone(&quit);
    let on_key = move |key: &KeyEvent| {
        if !key.is_press() {
            return;
        }
        match &key.utf8 {
            Some(text) => info!("⌨️ {} {:?}", key.keysym_name(), text),
            None => info!("⌨️ {}", key.keysym_name()),
        }
        if u32::from(key.keysym) == keysyms::KEY_Escape {
            key_quit.set(true);
        }
    };

    let mut client = Client::connect(config, Box::new(on_key))?;
    client.create_window(Box::new(paint_gradient))?;
    client.schedule_redraw();

    while !client.is_closed() && !quit.get() {
        client.dispatch()?;
        client.schedule_redraw();
    }

    if let Some(stats) = client.shutdown()? {
        info!(
            "📊 {} frames committed, {} redraws coalesced, {} renders abandoned",
            stats.frames_committed, stats.redraws_coalesced, stats.renders_abandoned
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = ClientConfig::load_or_default(&cli.config);
    let mut config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => ClientConfig::default(),
    };
    logging::init(&config.general.log_level, cli.debug);
    if let Err(e) = loaded {
        error!("❌ Failed to load configuration: {:#}", e);
        info!("📝 Using default configuration");
    }

    info!("🚀 Starting shmwin");
    info!(
        "📄 Version: {} ({} built {})",
        shmwin::VERSION,
        option_env!("GIT_COMMIT").unwrap_or("unknown"),
        option_env!("BUILD_DATE").unwrap_or("unknown")
    );

    if let Some(width) = cli.width {
        config.window.width = width;
    }
    if let Some(height) = cli.height {
        config.window.height = height;
    }
    if let Some(title) = cli.title {
        config.window.title = title;
    }
    config.validate()?;

    if let Err(e) = run(config) {
        error!("❌ {:#}", e);
        return Err(e);
    }
    info!("👋 shmwin exited");
    Ok(())
}
