//! Display Module
//!
//! The context every subsystem hangs off: the backend and compositor
//! collaborators, managed windows, the stack, preferences, the keyboard
//! resolver, the binding table, grab state and routing state.
//!
//! Behaviour lives in `impl Display` blocks spread over the modules that
//! own each concern (events, key events, key grabs, grab ops, focus).

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::wm::backend::Backend;
use crate::wm::client::{Client, WindowArena, WindowId};
use crate::wm::compositor::Compositor;
use crate::wm::device::{DeviceId, DeviceManager};
use crate::wm::events::{InputEvent, RouterState, CURRENT_TIME};
use crate::wm::grab::{GrabOp, GrabState};
use crate::wm::handlers;
use crate::wm::keybindings::{KeyBindingAction, KeyBindingFlags, KeyBindingTable, KeyHandler, KeyHandlerFn};
use crate::wm::keyboard::{KeyboardLayoutResolver, ResolvedKeyCombo};
use crate::wm::keygrabs::PassiveGrabs;
use crate::wm::keymap::{Keycode, Modifiers};
use crate::wm::settings::{PreferenceChange, Preferences};
use crate::wm::signals::Signal;
use crate::wm::stacking::Stack;

/// Payload of the accelerator signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcceleratorActivation {
    pub action: KeyBindingAction,
    pub device: DeviceId,
    pub time: u32,
}

/// Payload of the grab op signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrabOpNotify {
    pub window: WindowId,
    pub op: GrabOp,
}

/// Window manager display context
pub struct Display {
    pub backend: Box<dyn Backend>,
    pub compositor: Box<dyn Compositor>,

    pub windows: WindowArena,
    pub stack: Stack,
    pub prefs: Preferences,
    pub resolver: KeyboardLayoutResolver,
    pub keys: KeyBindingTable,
    pub grab: GrabState,
    pub router: RouterState,
    pub devices: DeviceManager,

    /// Window with input focus
    pub focus_window: Option<WindowId>,

    pub(crate) passive_grabs: PassiveGrabs,

    /// Stack generation last pushed to the backend
    restacked_generation: u64,

    /// Overlay key tapped alone
    pub overlay_key: Signal<()>,
    pub accelerator_activated: Signal<AcceleratorActivation>,
    pub accelerator_deactivated: Signal<AcceleratorActivation>,
    pub grab_op_begin: Signal<GrabOpNotify>,
    pub grab_op_end: Signal<GrabOpNotify>,
    pub workspace_switched: Signal<u32>,
}

impl Display {
    /// Create a new display over `backend`, loading the keymap and
    /// building the binding table from `prefs`
    pub fn new(mut backend: Box<dyn Backend>, compositor: Box<dyn Compositor>, prefs: Preferences) -> Result<Self> {
        let keymap = backend.keymap().context("Failed to load keymap")?;
        let layout_group = backend.keymap_layout_group();
        info!("Keymap has {} layouts, group {} active", keymap.num_layouts(), layout_group);

        let mut display = Self {
            backend,
            compositor,
            windows: WindowArena::new(),
            stack: Stack::new(),
            prefs,
            resolver: KeyboardLayoutResolver::new(keymap, layout_group),
            keys: KeyBindingTable::new(),
            grab: GrabState::new(),
            router: RouterState::new(),
            devices: DeviceManager::new(),
            focus_window: None,
            passive_grabs: PassiveGrabs::new(),
            restacked_generation: 0,
            overlay_key: Signal::new(),
            accelerator_activated: Signal::new(),
            accelerator_deactivated: Signal::new(),
            grab_op_begin: Signal::new(),
            grab_op_end: Signal::new(),
            workspace_switched: Signal::new(),
        };

        handlers::register_builtin_handlers(&mut display.keys);
        display.prefs.take_changes();
        display.rebuild_keybindings();

        Ok(display)
    }

    /// Start managing a window: stack it and install its passive grabs
    pub fn manage_window(&mut self, client: Client) -> WindowId {
        let id = client.id;
        self.windows.insert(client);
        self.stack.add(&mut self.windows, id);
        self.grab_window_keys(id);
        self.grab_focus_window_button(id);
        self.sync_stack();
        id
    }

    /// Stop managing a window. Ends a grab op running on it and drops
    /// every back-reference to it.
    pub fn unmanage_window(&mut self, id: WindowId) {
        if !self.windows.contains(id) {
            warn!("Unmanaging unknown window {}", id);
            return;
        }
        debug!("Unmanaging window {}", id);

        if self.grab.window() == Some(id) {
            self.end_grab_op(CURRENT_TIME);
        }
        if self.router.pad_osd == Some(id) {
            self.router.pad_osd = None;
        }

        self.passive_grabs.forget_window(id);
        self.stack.remove(&mut self.windows, id);
        self.windows.remove(id);

        if self.focus_window == Some(id) {
            self.focus_window = None;
            let time = self.current_time_roundtrip();
            self.focus_default_window(Some(id), time);
        }

        self.sync_stack();
    }

    pub fn raise_window(&mut self, id: WindowId) {
        self.stack.raise(&mut self.windows, id);
        self.sync_stack();
    }

    pub fn lower_window(&mut self, id: WindowId) {
        self.stack.lower(&mut self.windows, id);
        self.sync_stack();
    }

    /// Push a changed stacking order to the backend and forward a pending
    /// fullscreen recheck to the compositor
    pub fn sync_stack(&mut self) {
        if self.stack.is_frozen() {
            return;
        }

        let windows = self.stack.list_windows(&mut self.windows, None);
        if self.stack.generation() != self.restacked_generation {
            self.restacked_generation = self.stack.generation();
            if let Err(e) = self.backend.restack(&windows) {
                warn!("Failed to restack windows: {:#}", e);
            }
        }

        if self.stack.take_fullscreen_check() {
            self.compositor.queue_check_fullscreen();
        }
    }

    /// Event time if inside event processing, else a fresh server time
    pub fn current_time_roundtrip(&mut self) -> u32 {
        if self.router.current_time != CURRENT_TIME {
            return self.router.current_time;
        }
        match self.backend.current_time_roundtrip() {
            Ok(time) => time,
            Err(e) => {
                warn!("Failed to get a server timestamp: {:#}", e);
                CURRENT_TIME
            }
        }
    }

    /// The backend reported a new keymap
    pub fn keymap_changed(&mut self) -> Result<()> {
        let keymap = self.backend.keymap().context("Failed to reload keymap")?;
        let layout_group = self.backend.keymap_layout_group();
        debug!("Keymap changed, reloading keybindings");
        self.resolver.set_keymap(keymap, layout_group);
        self.reload_keybindings();
        Ok(())
    }

    /// The backend switched the active layout group
    pub fn keymap_layout_group_changed(&mut self, layout_group: usize) {
        if layout_group == self.resolver.layout_group() {
            return;
        }
        debug!("Layout group changed to {}, reloading keybindings", layout_group);
        self.resolver.set_layout_group(layout_group);
        self.reload_keybindings();
    }

    /// Re-resolve every combo under the current keymap
    pub fn reload_keybindings(&mut self) {
        self.ungrab_key_bindings();
        let special = self.prefs.special_keys();
        self.keys.reload_combos(&self.resolver, &special);
        self.grab_key_bindings();
    }

    /// Recreate the binding table from preferences
    pub fn rebuild_keybindings(&mut self) {
        self.ungrab_key_bindings();
        self.keys.rebuild(self.prefs.keybindings());
        let special = self.prefs.special_keys();
        self.keys.reload_combos(&self.resolver, &special);
        self.grab_key_bindings();
    }

    /// Take over a reloaded configuration
    pub fn apply_config(&mut self, config: &Config) {
        self.prefs.apply_config(config);
        self.process_preference_changes();
    }

    /// Rebuild only the subsystems whose preferences changed
    pub fn process_preference_changes(&mut self) {
        for change in self.prefs.take_changes() {
            debug!("Processing preference change {:?}", change);
            match change {
                PreferenceChange::Keybindings => self.rebuild_keybindings(),
                PreferenceChange::MouseButtonMods => self.regrab_window_buttons(),
                PreferenceChange::KeyboardRepeat => {
                    let repeat = self.prefs.keyboard_repeat();
                    if let Err(e) = self.backend.set_keyboard_repeat(repeat) {
                        warn!("Failed to apply keyboard repeat settings: {:#}", e);
                    }
                }
                PreferenceChange::Cursor => {
                    let (theme, size) = self.prefs.cursor();
                    self.compositor.reload_cursor(theme, size);
                }
                PreferenceChange::Workspaces => self.clamp_workspaces(),
            }
        }
    }

    fn clamp_workspaces(&mut self) {
        let last = self.prefs.num_workspaces().saturating_sub(1);
        let moved: Vec<WindowId> = self
            .windows
            .iter()
            .filter(|c| c.workspace.is_some_and(|w| w > last))
            .map(|c| c.id)
            .collect();
        for id in moved {
            if let Some(client) = self.windows.get_mut(id) {
                client.workspace = Some(last);
            }
        }
        if self.windows.active_workspace > last {
            let time = self.current_time_roundtrip();
            self.switch_to_workspace(last, time);
        }
    }

    /// Show another workspace and focus its topmost window
    pub fn switch_to_workspace(&mut self, workspace: u32, time: u32) {
        if workspace >= self.prefs.num_workspaces() || workspace == self.windows.active_workspace {
            return;
        }
        debug!("Switching to workspace {}", workspace);
        self.windows.active_workspace = workspace;
        self.focus_default_window(None, time);
        self.workspace_switched.emit(&workspace);
    }

    /// Add a binding with its own handler. Returns the action assigned to
    /// it, or `None` if the name is taken.
    pub fn add_keybinding(
        &mut self,
        name: &str,
        accelerators: &[String],
        flags: KeyBindingFlags,
        func: KeyHandlerFn,
    ) -> Option<KeyBindingAction> {
        if self.prefs.keybinding(name).is_some() || self.keys.handler(name).is_some() {
            warn!("Trying to re-add keybinding \"{}\"", name);
            return None;
        }

        let action = self.keys.next_dynamic_action();
        self.keys.register_handler(KeyHandler::new(name, action, flags, 0, func));
        if !self.prefs.add_keybinding(name, accelerators, action, flags) {
            self.keys.unregister_handler(name);
            return None;
        }

        self.process_preference_changes();
        Some(action)
    }

    pub fn remove_keybinding(&mut self, name: &str) -> bool {
        if !self.prefs.remove_keybinding(name) {
            return false;
        }
        self.keys.unregister_handler(name);
        self.process_preference_changes();
        true
    }

    /// Grab an accelerator on behalf of an external party
    pub fn grab_accelerator(&mut self, accelerator: &str, flags: KeyBindingFlags) -> Option<KeyBindingAction> {
        let (action, id) = self.keys.grab_accelerator(&self.resolver, accelerator, flags)?;
        if let Some(resolved) = self.keys.get(id).map(|b| b.resolved.clone()) {
            self.grab_root_combo(&resolved);
        }
        Some(action)
    }

    pub fn ungrab_accelerator(&mut self, action: KeyBindingAction) -> bool {
        match self.keys.ungrab_accelerator(&self.resolver, action) {
            Some(Some(binding)) => {
                self.ungrab_root_combo(&binding.resolved);
                true
            }
            Some(None) => true,
            None => false,
        }
    }

    /// Action bound to a keycode and raw modifier state
    pub fn get_keybinding_action(&self, keycode: Keycode, state: Modifiers) -> KeyBindingAction {
        let mask = self.resolver.mask_from_event(state);
        self.keys.binding_action(&ResolvedKeyCombo::single(keycode, mask))
    }

    pub(crate) fn accelerator_activate(&mut self, action: KeyBindingAction, event: &InputEvent) {
        debug!("Accelerator {} activated", action);
        self.accelerator_activated.emit(&AcceleratorActivation {
            action,
            device: event.source_device,
            time: event.time,
        });
    }

    pub(crate) fn accelerator_deactivate(&mut self, action: KeyBindingAction, event: &InputEvent) {
        self.accelerator_deactivated.emit(&AcceleratorActivation {
            action,
            device: event.source_device,
            time: event.time,
        });
    }

    pub(crate) fn overlay_key_activate(&mut self) {
        debug!("Overlay key tapped");
        self.overlay_key.emit(&());
    }
}
