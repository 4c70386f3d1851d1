//! Wayland client: connection, window and event dispatch
//!
//! [`ClientState`] is the dispatch context. Every protocol object is created
//! with user data naming the component that owns its events: buffer
//! releases carry their slot index, the frame callback and shell objects
//! belong to the single window, keyboard events go to the decoder.
//!
//! ```no_run
//! use shmwin::{Client, ClientConfig};
//! use shmwin::input::KeyEvent;
//! use shmwin::window::Frame;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::default();
//!     let mut client = Client::connect(config, Box::new(|key: &KeyEvent| {
//!         println!("{}", key.keysym_name());
//!     }))?;
//!     client.create_window(Box::new(|frame: &mut Frame<'_>| frame.fill(0xff00_0000)))?;
//!     client.schedule_redraw();
//!     client.run()?;
//!     client.shutdown()?;
//!     Ok(())
//! }
//! ```

use crate::config::ClientConfig;
use crate::error::RegistryError;
use crate::frame_pacing::FrameStats;
use crate::input::{KeyHandler, KeyState, KeyboardDecoder, ModifierState, RepeatInfo};
use crate::registry::{self, Globals, ShellKind};
use crate::shm::{self, BufferFactory, BufferGeometry, PixelFormat, ShmBufferPool};
use crate::window::{Painter, SurfaceProtocol, Window};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::os::fd::BorrowedFd;
use std::path::PathBuf;
use wayland_client::protocol::{
    wl_buffer::{self, WlBuffer},
    wl_callback::{self, WlCallback},
    wl_compositor::WlCompositor,
    wl_keyboard::{self, WlKeyboard},
    wl_seat::{self, WlSeat},
    wl_shell::WlShell,
    wl_shell_surface::{self, WlShellSurface},
    wl_shm::{self, WlShm},
    wl_shm_pool::WlShmPool,
    wl_surface::WlSurface,
};
use wayland_client::{delegate_noop, Connection, Dispatch, EventQueue, Proxy, QueueHandle, WEnum};
use wayland_protocols::xdg::shell::client::{
    xdg_surface::{self, XdgSurface},
    xdg_toplevel::{self, XdgToplevel},
    xdg_wm_base::{self, XdgWmBase},
};

fn shm_format(format: PixelFormat) -> wl_shm::Format {
    match format {
        PixelFormat::Argb8888 => wl_shm::Format::Argb8888,
        PixelFormat::Xrgb8888 => wl_shm::Format::Xrgb8888,
    }
}

/// Toplevel role given to the surface
enum ShellRole {
    Xdg {
        surface: XdgSurface,
        toplevel: XdgToplevel,
    },
    Legacy(WlShellSurface),
    None,
}

impl ShellRole {
    fn destroy(&mut self) {
        match std::mem::replace(self, ShellRole::None) {
            ShellRole::Xdg { surface, toplevel } => {
                toplevel.destroy();
                surface.destroy();
            }
            // wl_shell_surface has no destructor request
            ShellRole::Legacy(_) | ShellRole::None => {}
        }
    }
}

/// A `wl_surface` together with the shm global used for its buffers
pub struct WaylandSurface {
    surface: WlSurface,
    shm: WlShm,
    qh: QueueHandle<ClientState>,
    role: ShellRole,
    frame_callback: Option<WlCallback>,
}

impl BufferFactory for WaylandSurface {
    type Buffer = WlBuffer;

    fn create_buffer(
        &mut self,
        memory: BorrowedFd<'_>,
        geometry: &BufferGeometry,
        slot: usize,
    ) -> WlBuffer {
        let pool: WlShmPool = self
            .shm
            .create_pool(memory, geometry.size() as i32, &self.qh, ());
        let buffer = pool.create_buffer(
            0,
            geometry.width as i32,
            geometry.height as i32,
            geometry.stride as i32,
            shm_format(geometry.format),
            &self.qh,
            slot,
        );
        // The buffer keeps the memory alive on the server side
        pool.destroy();
        buffer
    }

    fn destroy_buffer(&mut self, buffer: WlBuffer) {
        buffer.destroy();
    }
}

impl SurfaceProtocol for WaylandSurface {
    fn attach(&mut self, buffer: &WlBuffer) {
        self.surface.attach(Some(buffer), 0, 0);
    }

    fn damage(&mut self, width: u32, height: u32) {
        self.surface.damage(0, 0, width as i32, height as i32);
    }

    fn request_frame(&mut self) {
        self.frame_callback = Some(self.surface.frame(&self.qh, ()));
    }

    fn commit(&mut self) {
        self.surface.commit();
    }

    fn destroy(&mut self) {
        self.frame_callback = None;
        self.role.destroy();
        self.surface.destroy();
    }
}

/// State reachable from every event handler
pub struct ClientState {
    pub(crate) globals: Globals,
    window: Option<Window<WaylandSurface>>,
    keyboard: Option<WlKeyboard>,
    decoder: KeyboardDecoder,
    key_handler: Box<dyn KeyHandler>,
    /// Size from the last xdg_toplevel.configure, applied on xdg_surface.configure
    pending_size: (i32, i32),
    closed: bool,
}

/// Connection, event queue and the state driven by it
pub struct Client {
    connection: Connection,
    event_queue: EventQueue<ClientState>,
    state: ClientState,
    config: ClientConfig,
    runtime_dir: PathBuf,
}

impl Client {
    /// Connect, bind the globals and check the required capabilities.
    pub fn connect(config: ClientConfig, key_handler: Box<dyn KeyHandler>) -> Result<Self> {
        let runtime_dir = match &config.shm.runtime_dir {
            Some(dir) => dir.clone(),
            None => shm::runtime_dir()?,
        };

        let connection = registry::connect()?;
        let mut event_queue = connection.new_event_queue();
        let qh = event_queue.handle();
        let wl_registry = connection.display().get_registry(&qh, ());

        let mut state = ClientState {
            globals: Globals::new(wl_registry),
            window: None,
            keyboard: None,
            decoder: KeyboardDecoder::new(),
            key_handler,
            pending_size: (0, 0),
            closed: false,
        };
        registry::enumerate(&mut event_queue, &mut state, config.shm.pixel_format)?;

        Ok(Self {
            connection,
            event_queue,
            state,
            config,
            runtime_dir,
        })
    }

    /// Create the surface, give it a toplevel role and attach the painter.
    pub fn create_window(&mut self, painter: Box<dyn Painter>) -> Result<()> {
        if self.state.window.is_some() {
            anyhow::bail!("window already created");
        }

        let globals = &self.state.globals;
        let compositor = globals
            .compositor
            .as_ref()
            .ok_or(RegistryError::MissingCompositor)?;
        let shm = globals.shm.clone().ok_or(RegistryError::MissingShm)?;
        let qh = self.event_queue.handle();
        let surface = compositor.create_surface(&qh, ());

        let window_config = &self.config.window;
        let role = match globals
            .capabilities
            .select_shell(self.config.shell.preference)
        {
            Some(ShellKind::Xdg) => globals.xdg_wm_base.as_ref().map(|wm_base| {
                let xdg_surface = wm_base.get_xdg_surface(&surface, &qh, ());
                let toplevel = xdg_surface.get_toplevel(&qh, ());
                toplevel.set_title(window_config.title.clone());
                toplevel.set_app_id(window_config.app_id.clone());
                ShellRole::Xdg {
                    surface: xdg_surface,
                    toplevel,
                }
            }),
            Some(ShellKind::WlShell) => globals.wl_shell.as_ref().map(|shell| {
                let shell_surface = shell.get_shell_surface(&surface, &qh, ());
                shell_surface.set_title(window_config.title.clone());
                shell_surface.set_toplevel();
                ShellRole::Legacy(shell_surface)
            }),
            None => None,
        }
        .unwrap_or_else(|| {
            warn!("no usable shell global, surface has no role");
            ShellRole::None
        });
        let awaits_configure = matches!(role, ShellRole::Xdg { .. });

        let protocol = WaylandSurface {
            surface,
            shm,
            qh,
            role,
            frame_callback: None,
        };
        let pool = ShmBufferPool::new(self.runtime_dir.clone(), self.config.shm.pixel_format);
        let mut window = Window::new(
            protocol,
            window_config.width,
            window_config.height,
            pool,
            painter,
        );
        if awaits_configure {
            window.await_configure();
            window.protocol_mut().commit();
        }

        info!(
            "window created {}x{} \"{}\"",
            window_config.width, window_config.height, window_config.title
        );
        self.state.window = Some(window);
        self.connection.flush().context("Failed to flush window creation")?;
        Ok(())
    }

    /// Request a redraw of the window's content.
    pub fn schedule_redraw(&mut self) {
        if let Some(window) = self.state.window.as_mut() {
            window.schedule_redraw();
        }
    }

    /// Block until events arrive and dispatch them.
    pub fn dispatch(&mut self) -> Result<usize> {
        self.event_queue
            .blocking_dispatch(&mut self.state)
            .context("Failed to dispatch Wayland events")
    }

    /// Dispatch until the window is closed.
    pub fn run(&mut self) -> Result<()> {
        while !self.state.closed {
            self.dispatch()?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed
    }

    pub fn close(&mut self) {
        self.state.closed = true;
    }

    pub fn window(&self) -> Option<&Window<WaylandSurface>> {
        self.state.window.as_ref()
    }

    pub fn keyboard(&self) -> &KeyboardDecoder {
        &self.state.decoder
    }

    /// Destroy the window, release the globals and disconnect.
    ///
    /// Returns the window's pacing counters, if a window existed.
    pub fn shutdown(self) -> Result<Option<FrameStats>> {
        let Client {
            connection,
            event_queue,
            state,
            ..
        } = self;
        let ClientState {
            globals,
            window,
            keyboard,
            ..
        } = state;

        let stats = window.as_ref().map(|window| window.stats());
        drop(window);

        if let Some(keyboard) = keyboard {
            if keyboard.version() >= 3 {
                keyboard.release();
            }
        }
        globals.release();

        connection
            .flush()
            .context("Failed to flush final requests")?;
        drop(event_queue);
        drop(connection);
        info!("disconnected");
        Ok(stats)
    }
}

impl Dispatch<WlBuffer, usize> for ClientState {
    fn event(
        state: &mut Self,
        _buffer: &WlBuffer,
        event: wl_buffer::Event,
        slot: &usize,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            if let Some(window) = state.window.as_mut() {
                window.buffer_released(*slot);
            }
        }
    }
}

impl Dispatch<WlCallback, ()> for ClientState {
    fn event(
        state: &mut Self,
        _callback: &WlCallback,
        event: wl_callback::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { .. } = event {
            if let Some(window) = state.window.as_mut() {
                window.protocol_mut().frame_callback = None;
                window.frame_done();
            }
        }
    }
}

impl Dispatch<WlShellSurface, ()> for ClientState {
    fn event(
        state: &mut Self,
        shell_surface: &WlShellSurface,
        event: wl_shell_surface::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_shell_surface::Event::Ping { serial } => shell_surface.pong(serial),
            wl_shell_surface::Event::Configure { width, height, .. } => {
                if let Some(window) = state.window.as_mut() {
                    window.configure(width, height);
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<XdgWmBase, ()> for ClientState {
    fn event(
        _state: &mut Self,
        wm_base: &XdgWmBase,
        event: xdg_wm_base::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            wm_base.pong(serial);
        }
    }
}

impl Dispatch<XdgSurface, ()> for ClientState {
    fn event(
        state: &mut Self,
        xdg_surface: &XdgSurface,
        event: xdg_surface::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            xdg_surface.ack_configure(serial);
            let (width, height) = std::mem::take(&mut state.pending_size);
            if let Some(window) = state.window.as_mut() {
                window.configure(width, height);
            }
        }
    }
}

impl Dispatch<XdgToplevel, ()> for ClientState {
    fn event(
        state: &mut Self,
        _toplevel: &XdgToplevel,
        event: xdg_toplevel::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            xdg_toplevel::Event::Configure { width, height, .. } => {
                state.pending_size = (width, height);
            }
            xdg_toplevel::Event::Close => {
                info!("toplevel closed by the compositor");
                state.closed = true;
            }
            _ => {}
        }
    }
}

impl Dispatch<WlSeat, ()> for ClientState {
    fn event(
        state: &mut Self,
        seat: &WlSeat,
        event: wl_seat::Event,
        _data: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_seat::Event::Capabilities {
                capabilities: WEnum::Value(capabilities),
            } => {
                let has_keyboard = capabilities.contains(wl_seat::Capability::Keyboard);
                if has_keyboard && state.keyboard.is_none() {
                    info!("seat has a keyboard");
                    state.keyboard = Some(seat.get_keyboard(qh, ()));
                } else if !has_keyboard {
                    if let Some(keyboard) = state.keyboard.take() {
                        info!("seat lost its keyboard");
                        if keyboard.version() >= 3 {
                            keyboard.release();
                        }
                    }
                }
            }
            wl_seat::Event::Name { name } => debug!("seat name: {}", name),
            _ => {}
        }
    }
}

impl Dispatch<WlKeyboard, ()> for ClientState {
    fn event(
        state: &mut Self,
        _keyboard: &WlKeyboard,
        event: wl_keyboard::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_keyboard::Event::Keymap { format, fd, size } => {
                let format = match format {
                    WEnum::Value(format) => u32::from(format),
                    WEnum::Unknown(code) => code,
                };
                if let Err(e) = state.decoder.load_keymap_fd(format, fd, size) {
                    warn!("keymap ignored: {}", e);
                }
            }
            wl_keyboard::Event::Enter { .. } => {
                state.decoder.set_focus(true, state.key_handler.as_mut());
            }
            wl_keyboard::Event::Leave { .. } => {
                state.decoder.set_focus(false, state.key_handler.as_mut());
            }
            wl_keyboard::Event::Key {
                time,
                key,
                state: key_state,
                ..
            } => {
                let key_state = match key_state {
                    WEnum::Value(wl_keyboard::KeyState::Pressed) => KeyState::Pressed,
                    WEnum::Value(wl_keyboard::KeyState::Released) => KeyState::Released,
                    _ => return,
                };
                state
                    .decoder
                    .handle_key(time, key, key_state, state.key_handler.as_mut());
            }
            wl_keyboard::Event::Modifiers {
                mods_depressed,
                mods_latched,
                mods_locked,
                group,
                ..
            } => state.decoder.update_modifiers(ModifierState {
                depressed: mods_depressed,
                latched: mods_latched,
                locked: mods_locked,
                group,
            }),
            wl_keyboard::Event::RepeatInfo { rate, delay } => {
                state.decoder.set_repeat_info(RepeatInfo { rate, delay });
            }
            _ => {}
        }
    }
}

delegate_noop!(ClientState: ignore WlCompositor);
delegate_noop!(ClientState: ignore WlShmPool);
delegate_noop!(ClientState: ignore WlSurface);
delegate_noop!(ClientState: ignore WlShell);
