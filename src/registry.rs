//! Server connection and global capability discovery
//!
//! Enumeration takes two roundtrips. The first delivers the globals and binds
//! the ones this client uses; the second lets `wl_shm` announce its pixel
//! formats. A missing `wl_shm`, `wl_compositor` or required pixel format
//! stops the client.

use crate::client::ClientState;
use crate::config::ShellPreference;
use crate::error::RegistryError;
use crate::shm::PixelFormat;
use log::{debug, info};
use std::collections::{BTreeSet, HashMap};
use wayland_client::protocol::{
    wl_compositor::WlCompositor, wl_registry, wl_seat::WlSeat, wl_shell::WlShell, wl_shm,
    wl_shm::WlShm,
};
use wayland_client::{Connection, Dispatch, EventQueue, Proxy, QueueHandle, WEnum};
use wayland_protocols::xdg::shell::client::xdg_wm_base::XdgWmBase;

/// Globals this client binds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum GlobalInterface {
    Compositor,
    Shm,
    Seat,
    WlShell,
    XdgWmBase,
}

impl GlobalInterface {
    pub fn from_name(interface: &str) -> Option<Self> {
        match interface {
            "wl_compositor" => Some(GlobalInterface::Compositor),
            "wl_shm" => Some(GlobalInterface::Shm),
            "wl_seat" => Some(GlobalInterface::Seat),
            "wl_shell" => Some(GlobalInterface::WlShell),
            "xdg_wm_base" => Some(GlobalInterface::XdgWmBase),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            GlobalInterface::Compositor => "wl_compositor",
            GlobalInterface::Shm => "wl_shm",
            GlobalInterface::Seat => "wl_seat",
            GlobalInterface::WlShell => "wl_shell",
            GlobalInterface::XdgWmBase => "xdg_wm_base",
        }
    }

    /// Highest version whose requests and events this client handles
    pub fn max_version(self) -> u32 {
        match self {
            GlobalInterface::Compositor => 4,
            GlobalInterface::Shm => 1,
            GlobalInterface::Seat => 5,
            GlobalInterface::WlShell => 1,
            GlobalInterface::XdgWmBase => 2,
        }
    }

    pub fn negotiate(self, server_version: u32) -> u32 {
        server_version.min(self.max_version())
    }
}

/// The shell used to give the surface a toplevel role
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    Xdg,
    WlShell,
}

/// Raw `wl_shm` format codes announced by the server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatSet {
    formats: BTreeSet<u32>,
}

impl FormatSet {
    pub fn insert(&mut self, code: u32) {
        self.formats.insert(code);
    }

    pub fn contains(&self, format: PixelFormat) -> bool {
        self.formats.contains(&format.code())
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }
}

/// What the server announced, independent of the bound proxies
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    versions: HashMap<GlobalInterface, u32>,
    pub formats: FormatSet,
}

impl Capabilities {
    pub fn record(&mut self, interface: GlobalInterface, version: u32) {
        self.versions.insert(interface, version);
    }

    pub fn has(&self, interface: GlobalInterface) -> bool {
        self.versions.contains_key(&interface)
    }

    pub fn version(&self, interface: GlobalInterface) -> Option<u32> {
        self.versions.get(&interface).copied()
    }

    /// Globals that must exist after the first roundtrip
    pub fn check_globals(&self) -> Result<(), RegistryError> {
        if !self.has(GlobalInterface::Shm) {
            return Err(RegistryError::MissingShm);
        }
        if !self.has(GlobalInterface::Compositor) {
            return Err(RegistryError::MissingCompositor);
        }
        Ok(())
    }

    /// The rendering format must be announced after the second roundtrip
    pub fn check_format(&self, format: PixelFormat) -> Result<(), RegistryError> {
        if self.formats.contains(format) {
            Ok(())
        } else {
            Err(RegistryError::MissingFormat(format.name()))
        }
    }

    pub fn select_shell(&self, preference: ShellPreference) -> Option<ShellKind> {
        let xdg = self.has(GlobalInterface::XdgWmBase).then_some(ShellKind::Xdg);
        let legacy = self.has(GlobalInterface::WlShell).then_some(ShellKind::WlShell);
        match preference {
            ShellPreference::Auto => xdg.or(legacy),
            ShellPreference::Xdg => xdg,
            ShellPreference::WlShell => legacy,
        }
    }
}

/// Bound global objects
pub struct Globals {
    registry: wl_registry::WlRegistry,
    pub compositor: Option<WlCompositor>,
    pub shm: Option<WlShm>,
    pub seat: Option<WlSeat>,
    pub wl_shell: Option<WlShell>,
    pub xdg_wm_base: Option<XdgWmBase>,
    pub capabilities: Capabilities,
}

impl Globals {
    pub fn new(registry: wl_registry::WlRegistry) -> Self {
        Self {
            registry,
            compositor: None,
            shm: None,
            seat: None,
            wl_shell: None,
            xdg_wm_base: None,
            capabilities: Capabilities::default(),
        }
    }

    fn bind(&mut self, name: u32, interface: &str, version: u32, qh: &QueueHandle<ClientState>) {
        let Some(global) = GlobalInterface::from_name(interface) else {
            return;
        };
        if self.capabilities.has(global) {
            debug!("ignoring additional {} global {}", interface, name);
            return;
        }

        let version = global.negotiate(version);
        let registry = &self.registry;
        match global {
            GlobalInterface::Compositor => {
                self.compositor = Some(registry.bind(name, version, qh, ()));
            }
            GlobalInterface::Shm => {
                self.shm = Some(registry.bind(name, version, qh, ()));
            }
            GlobalInterface::Seat => {
                self.seat = Some(registry.bind(name, version, qh, ()));
            }
            GlobalInterface::WlShell => {
                self.wl_shell = Some(registry.bind(name, version, qh, ()));
            }
            GlobalInterface::XdgWmBase => {
                self.xdg_wm_base = Some(registry.bind(name, version, qh, ()));
            }
        }

        self.capabilities.record(global, version);
        info!("bound {} v{}", interface, version);
    }

    /// Release bound globals: shm, shell, compositor, then the registry.
    pub fn release(mut self) {
        if let Some(seat) = self.seat.take() {
            if seat.version() >= 5 {
                seat.release();
            }
        }
        // wl_shm v1 and wl_shell have no destructor request; dropping the
        // proxy forgets them on the client side.
        self.shm.take();
        if let Some(wm_base) = self.xdg_wm_base.take() {
            wm_base.destroy();
        }
        self.wl_shell.take();
        self.compositor.take();
        debug!("released globals");
    }
}

/// Open the display named by `WAYLAND_DISPLAY` (or the default socket).
pub fn connect() -> Result<Connection, RegistryError> {
    let connection = Connection::connect_to_env()?;
    info!("connected to Wayland display");
    Ok(connection)
}

/// Discover and bind globals, then verify the required capabilities.
pub fn enumerate(
    event_queue: &mut EventQueue<ClientState>,
    state: &mut ClientState,
    format: PixelFormat,
) -> Result<(), RegistryError> {
    event_queue.roundtrip(state)?;
    state.globals.capabilities.check_globals()?;

    event_queue.roundtrip(state)?;
    state.globals.capabilities.check_format(format)?;

    info!(
        "server offers {} shm formats, using {}",
        state.globals.capabilities.formats.len(),
        format.name()
    );
    Ok(())
}

impl Dispatch<wl_registry::WlRegistry, ()> for ClientState {
    fn event(
        state: &mut Self,
        _registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _data: &(),
        _conn: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => state.globals.bind(name, &interface, version, qh),
            wl_registry::Event::GlobalRemove { name } => {
                debug!("global {} removed", name);
            }
            _ => {}
        }
    }
}

impl Dispatch<WlShm, ()> for ClientState {
    fn event(
        state: &mut Self,
        _shm: &WlShm,
        event: wl_shm::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_shm::Event::Format { format } = event {
            let code = match format {
                WEnum::Value(format) => u32::from(format),
                WEnum::Unknown(code) => code,
            };
            debug!("shm format 0x{:08x}", code);
            state.globals.capabilities.formats.insert(code);
        }
    }
}
