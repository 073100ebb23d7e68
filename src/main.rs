//! area
//!
//! Window manager core for the area desktop. Takes over window management
//! on the default X screen and routes input through the key binding, grab
//! and stacking core until SIGINT or SIGTERM.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use x11rb::protocol::xproto::*;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use area_core::config::Config;
use area_core::wm::client::WindowId;
use area_core::wm::client_flags::{ClientFlags, WindowType};
use area_core::wm::ewmh::{self, Atoms};
use area_core::wm::x11::{self, X11Backend, X11Compositor};
use area_core::wm::{settings::Preferences, Display};
use area_core::x11_async::{EventQueue, EventSource};

/// Main application state
struct AreaApp {
    conn: Arc<RustConnection>,
    events: EventSource,
    root: Window,
    atoms: Atoms,
    display: Display,
}

impl AreaApp {
    /// Connect, take over the screen and manage the windows already on it
    fn new(replace: bool) -> Result<Self> {
        let (conn, screen_num) = x11rb::connect(None).context("Failed to connect to X server")?;
        let conn = Arc::new(conn);
        info!("Connected to X server, screen {}", screen_num);

        let config = Config::load().context("Failed to load configuration")?;

        let deferred: EventQueue = Rc::new(RefCell::new(VecDeque::new()));
        let backend = X11Backend::new(conn.clone(), screen_num, deferred.clone(), replace)?;
        let root = backend.root();
        let atoms = *backend.atoms();

        let mut display = Display::new(
            Box::new(backend),
            Box::new(X11Compositor::new(conn.clone())),
            Preferences::from_config(&config),
        )?;
        let repeat = display.prefs.keyboard_repeat();
        if let Err(e) = display.backend.set_keyboard_repeat(repeat) {
            warn!("Failed to apply keyboard repeat: {:#}", e);
        }

        let events = EventSource::new(conn.clone(), deferred)?;

        let mut app = Self {
            conn,
            events,
            root,
            atoms,
            display,
        };
        app.manage_existing_windows()?;
        Ok(app)
    }

    fn manage_existing_windows(&mut self) -> Result<()> {
        let tree = self
            .conn
            .query_tree(self.root)?
            .reply()
            .context("Failed to query existing windows")?;

        for window in tree.children {
            let attrs = match self.conn.get_window_attributes(window)?.reply() {
                Ok(attrs) => attrs,
                Err(e) => {
                    debug!("Skipping window 0x{:x}: {:?}", window, e);
                    continue;
                }
            };
            if attrs.override_redirect || attrs.map_state != MapState::VIEWABLE {
                continue;
            }
            self.manage(window);
        }

        info!("Managing {} existing windows", self.display.windows.len());
        Ok(())
    }

    fn manage(&mut self, window: Window) {
        if self.display.windows.contains(WindowId(window)) {
            return;
        }
        let mut client = match ewmh::read_client(self.conn.as_ref(), &self.atoms, window) {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to read window 0x{:x}: {:#}", window, e);
                return;
            }
        };
        if client.is_override_redirect() {
            return;
        }
        client.flags.insert(ClientFlags::MAPPED);

        let focusable = !matches!(client.window_type, WindowType::Dock | WindowType::Desktop);
        if let Err(e) = self
            .conn
            .change_window_attributes(window, &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE))
        {
            warn!("Failed to select events on 0x{:x}: {:?}", window, e);
        }

        let id = self.display.manage_window(client);
        if let Err(e) = self.conn.map_window(window) {
            warn!("Failed to map 0x{:x}: {:?}", window, e);
        }
        info!("Managing window {}", id);

        if focusable {
            self.display.set_focus(Some(id), x11rb::CURRENT_TIME);
        }
    }

    fn handle_configure_request(&mut self, ev: &ConfigureRequestEvent) -> Result<()> {
        let id = WindowId(ev.window);
        let mut aux = ConfigureWindowAux::from_configure_request(ev);
        let stack_mode = aux.stack_mode.take();
        aux.sibling = None;
        self.conn.configure_window(ev.window, &aux)?;

        if let Some(client) = self.display.windows.get_mut(id) {
            if let Some(x) = aux.x {
                client.geometry.x = x;
            }
            if let Some(y) = aux.y {
                client.geometry.y = y;
            }
            if let Some(width) = aux.width {
                client.geometry.width = width;
            }
            if let Some(height) = aux.height {
                client.geometry.height = height;
            }

            if stack_mode == Some(StackMode::ABOVE) {
                self.display.raise_window(id);
            } else if stack_mode == Some(StackMode::BELOW) {
                self.display.lower_window(id);
            }
        }
        Ok(())
    }

    fn handle_property_notify(&mut self, ev: &PropertyNotifyEvent) -> Result<()> {
        let id = WindowId(ev.window);
        if ev.atom != u32::from(AtomEnum::WM_TRANSIENT_FOR) || !self.display.windows.contains(id) {
            return Ok(());
        }

        let parent = ewmh::read_transient_for(self.conn.as_ref(), ev.window)?;
        debug!("Window {} is now transient for {:?}", id, parent);
        if self.display.windows.set_transient_for(id, parent) {
            self.display.stack.update_transient(&mut self.display.windows, id);
            self.display.sync_stack();
        }
        Ok(())
    }

    fn handle_event(&mut self, event: Event) -> Result<()> {
        if let Some(input) = x11::translate_event(&event, self.root, &self.display.resolver) {
            let result = self.display.handle_event(&input);
            trace!("{:?} -> {:?}", input.kind, result);
            return Ok(());
        }

        match event {
            Event::MapRequest(ev) => self.manage(ev.window),
            Event::UnmapNotify(ev) => {
                if ev.event == self.root && self.display.windows.contains(WindowId(ev.window)) {
                    self.display.unmanage_window(WindowId(ev.window));
                }
            }
            Event::DestroyNotify(ev) => {
                if self.display.windows.contains(WindowId(ev.window)) {
                    self.display.unmanage_window(WindowId(ev.window));
                }
            }
            Event::ConfigureRequest(ev) => self.handle_configure_request(&ev)?,
            Event::PropertyNotify(ev) => self.handle_property_notify(&ev)?,
            Event::MappingNotify(ev) => {
                if ev.request == Mapping::KEYBOARD || ev.request == Mapping::MODIFIER {
                    self.display.keymap_changed()?;
                }
            }
            Event::Error(e) => debug!("X11 error: {:?}", e),
            other => trace!("Ignoring event {:?}", other),
        }
        Ok(())
    }

    /// Main event loop
    async fn run(mut self) -> Result<()> {
        info!("Starting main event loop");

        loop {
            while let Some(event) = self.events.next_event().context("Lost connection to X server")? {
                if let Err(e) = self.handle_event(event) {
                    warn!("Failed to handle event: {:#}", e);
                }
            }
            self.events.flush_and_wait().await?;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "area=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting area window manager core");

    let args: Vec<String> = std::env::args().collect();
    let replace = args.iter().any(|arg| arg == "--replace" || arg == "-r");
    if replace {
        info!("--replace flag detected: will replace the running window manager");
    }

    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let app = AreaApp::new(replace)?;

    tokio::select! {
        result = app.run() => {
            if let Err(e) = result {
                error!("Application error: {:#}", e);
                return Err(e);
            }
        }
        _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("Received SIGINT, shutting down"),
    }

    Ok(())
}
