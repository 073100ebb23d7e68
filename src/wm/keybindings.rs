//! Keybindings Module
//!
//! The binding table: named handlers, the bindings built from preferences
//! and external accelerator grabs, and the `(keycode, mask)` index used at
//! event time.
//!
//! The table is never patched incrementally. Preference, keymap or layout
//! changes throw every binding away and rebuild from scratch.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use tracing::{debug, warn};

use crate::wm::accelerator;
use crate::wm::client::WindowId;
use crate::wm::display::Display;
use crate::wm::events::InputEvent;
use crate::wm::keyboard::{KeyCombo, KeyboardLayoutResolver, ResolvedKeyCombo};
use crate::wm::settings::KeyPref;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KeyBindingFlags: u32 {
        /// Handler gets the focused window and only runs when there is one
        const PER_WINDOW = 1 << 0;
        const BUILTIN = 1 << 1;
        /// Reverse direction of a shift-modified cycling binding
        const IS_REVERSED = 1 << 2;
        /// Runs even when the focus window inhibits shortcuts
        const NON_MASKABLE = 1 << 3;
        const IGNORE_AUTOREPEAT = 1 << 4;
        /// Not grabbed passively on client windows
        const NO_AUTO_GRAB = 1 << 5;
        /// Only triggered by its owner, never by dispatch
        const CUSTOM_TRIGGER = 1 << 6;
        /// Handler runs again on key release
        const TRIGGER_RELEASE = 1 << 7;
    }
}

/// Numeric action of a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct KeyBindingAction(pub u32);

impl KeyBindingAction {
    pub const NONE: KeyBindingAction = KeyBindingAction(0);
    pub const WORKSPACE_SWITCH: KeyBindingAction = KeyBindingAction(1);
    pub const MOVE_TO_WORKSPACE: KeyBindingAction = KeyBindingAction(2);
    pub const RAISE: KeyBindingAction = KeyBindingAction(3);
    pub const LOWER: KeyBindingAction = KeyBindingAction(4);
    pub const RAISE_OR_LOWER: KeyBindingAction = KeyBindingAction(5);
    pub const TOGGLE_ABOVE: KeyBindingAction = KeyBindingAction(6);
    pub const BEGIN_MOVE: KeyBindingAction = KeyBindingAction(7);
    pub const BEGIN_RESIZE: KeyBindingAction = KeyBindingAction(8);
    /// Dynamic actions are numbered after this one
    pub const LAST: KeyBindingAction = KeyBindingAction(9);
}

impl fmt::Display for KeyBindingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of the handler shared by all external accelerator grabs
pub const EXTERNAL_GRAB_HANDLER: &str = "external-grab";

/// Binding name used for an external grab's action
pub fn external_binding_name(action: KeyBindingAction) -> String {
    format!("{}-{}", EXTERNAL_GRAB_HANDLER, action.0)
}

pub type KeyHandlerFn = Rc<dyn Fn(&mut Display, Option<WindowId>, &InputEvent, &KeyBinding)>;

/// Named handler a binding dispatches to
#[derive(Clone)]
pub struct KeyHandler {
    pub name: String,
    pub action: KeyBindingAction,
    pub flags: KeyBindingFlags,
    /// Argument for handlers shared by several bindings (workspace index)
    pub data: i32,
    pub func: KeyHandlerFn,
}

impl KeyHandler {
    pub fn new(
        name: impl Into<String>,
        action: KeyBindingAction,
        flags: KeyBindingFlags,
        data: i32,
        func: KeyHandlerFn,
    ) -> Self {
        Self {
            name: name.into(),
            action,
            flags,
            data,
            func,
        }
    }
}

impl fmt::Debug for KeyHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyHandler")
            .field("name", &self.name)
            .field("action", &self.action)
            .field("flags", &self.flags)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

/// Identity of a binding inside the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u32);

/// One combo bound to a handler
#[derive(Debug, Clone)]
pub struct KeyBinding {
    pub id: BindingId,
    pub name: String,
    pub combo: KeyCombo,
    pub resolved: ResolvedKeyCombo,
    pub flags: KeyBindingFlags,
    pub action: KeyBindingAction,
    pub handler: Rc<KeyHandler>,
    /// Press ran the handler and its release should too
    pub release_pending: bool,
}

impl KeyBinding {
    pub fn is_builtin(&self) -> bool {
        self.handler.flags.contains(KeyBindingFlags::BUILTIN)
    }

    pub fn is_reversed(&self) -> bool {
        self.handler.flags.contains(KeyBindingFlags::IS_REVERSED)
    }
}

/// Accelerator grabbed by an external party
#[derive(Debug, Clone)]
struct ExternalGrab {
    action: KeyBindingAction,
    combo: KeyCombo,
    flags: KeyBindingFlags,
}

/// Overlay key, locate-pointer key and layout switch combos
#[derive(Debug, Clone, Default)]
pub struct SpecialKeys {
    pub overlay: Vec<KeyCombo>,
    pub locate_pointer: Vec<KeyCombo>,
    pub iso_next_group: Option<String>,
}

/// Key binding table
#[derive(Debug, Default)]
pub struct KeyBindingTable {
    handlers: HashMap<String, Rc<KeyHandler>>,

    /// Bindings in creation order
    bindings: BTreeMap<BindingId, KeyBinding>,
    next_binding: u32,

    /// `ResolvedKeyCombo::index_key` to binding
    index: HashMap<u32, BindingId>,

    external_grabs: BTreeMap<String, ExternalGrab>,
    num_dynamic_actions: u32,

    pub(crate) overlay_combo: ResolvedKeyCombo,
    pub(crate) locate_pointer_combo: ResolvedKeyCombo,
    pub(crate) iso_next_group_combos: Vec<ResolvedKeyCombo>,

    /// Overlay key is down and nothing else happened yet
    pub(crate) overlay_key_only_pressed: bool,
    pub(crate) locate_pointer_key_only_pressed: bool,
}

impl KeyBindingTable {
    /// Create a new, empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named handler. Fails if the name is taken.
    pub fn register_handler(&mut self, handler: KeyHandler) -> bool {
        if self.handlers.contains_key(&handler.name) {
            warn!("Trying to re-add keybinding handler \"{}\"", handler.name);
            return false;
        }
        self.handlers.insert(handler.name.clone(), Rc::new(handler));
        true
    }

    pub fn unregister_handler(&mut self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn handler(&self, name: &str) -> Option<&Rc<KeyHandler>> {
        self.handlers.get(name)
    }

    /// Fresh action number for a dynamic binding or external grab
    pub fn next_dynamic_action(&mut self) -> KeyBindingAction {
        self.num_dynamic_actions += 1;
        KeyBindingAction(KeyBindingAction::LAST.0 + self.num_dynamic_actions)
    }

    fn insert_binding(
        &mut self,
        name: &str,
        combo: KeyCombo,
        flags: KeyBindingFlags,
        action: KeyBindingAction,
        handler: Rc<KeyHandler>,
    ) -> BindingId {
        let id = BindingId(self.next_binding);
        self.next_binding += 1;
        self.bindings.insert(
            id,
            KeyBinding {
                id,
                name: name.to_string(),
                combo,
                resolved: ResolvedKeyCombo::default(),
                flags,
                action,
                handler,
                release_pending: false,
            },
        );
        id
    }

    /// Recreate every binding from the preference list and the external
    /// grabs. Combos stay unresolved until [`Self::reload_combos`].
    pub fn rebuild<'a>(&mut self, prefs: impl IntoIterator<Item = &'a KeyPref>) {
        self.bindings.clear();
        self.index.clear();

        for pref in prefs {
            let Some(handler) = self.handlers.get(&pref.name).cloned() else {
                warn!("No handler for keybinding \"{}\"", pref.name);
                continue;
            };
            for combo in pref.combos.iter().filter(|c| !c.is_empty()) {
                let flags = handler.flags;
                self.insert_binding(&pref.name, *combo, flags, pref.action, handler.clone());
            }
        }

        if let Some(handler) = self.handlers.get(EXTERNAL_GRAB_HANDLER).cloned() {
            let grabs: Vec<(String, ExternalGrab)> = self
                .external_grabs
                .iter()
                .map(|(name, grab)| (name.clone(), grab.clone()))
                .collect();
            for (name, grab) in grabs.into_iter().filter(|(_, g)| !g.combo.is_empty()) {
                self.insert_binding(&name, grab.combo, grab.flags, grab.action, handler.clone());
            }
        }

        debug!("{} bindings in table", self.bindings.len());
    }

    /// Resolve every combo under the current layouts and rebuild the index
    pub fn reload_combos(&mut self, resolver: &KeyboardLayoutResolver, special: &SpecialKeys) {
        self.index.clear();

        self.overlay_combo = resolver.resolve_special_key_combo(&special.overlay);
        self.locate_pointer_combo = resolver.resolve_special_key_combo(&special.locate_pointer);
        self.iso_next_group_combos = resolver.resolve_iso_next_group(special.iso_next_group.as_deref());

        let ids: Vec<BindingId> = self.bindings.keys().copied().collect();
        for id in ids {
            if let Some(binding) = self.bindings.get_mut(&id) {
                binding.resolved = resolver.resolve_key_combo(&binding.combo);
                binding.release_pending = false;
            }
            self.index_binding(id);
        }
    }

    /// Index every keycode of a binding.
    ///
    /// A binding's first keycode replaces whatever was indexed before it;
    /// later keycodes never replace an existing entry.
    fn index_binding(&mut self, id: BindingId) {
        let Some(binding) = self.bindings.get(&id) else {
            return;
        };

        for i in 0..binding.resolved.keycodes.len() {
            let Some(key) = binding.resolved.index_key(i) else {
                continue;
            };

            if let Some(existing) = self.index.get(&key).and_then(|e| self.bindings.get(e)) {
                if i > 0 {
                    continue;
                }
                warn!(
                    "Overwriting existing binding \"{}\" (keysym {:#x}) with \"{}\" (keysym {:#x}, keycode {:#x})",
                    existing.name,
                    existing.combo.keysym,
                    binding.name,
                    binding.combo.keysym,
                    binding.resolved.keycodes[i]
                );
            }

            self.index.insert(key, id);
        }
    }

    /// Find the binding for an event combo, trying each keycode in turn
    pub fn lookup(&self, resolved: &ResolvedKeyCombo) -> Option<BindingId> {
        (0..resolved.keycodes.len())
            .filter_map(|i| resolved.index_key(i))
            .find_map(|key| self.index.get(&key).copied())
            .filter(|id| self.bindings.contains_key(id))
    }

    pub fn get(&self, id: BindingId) -> Option<&KeyBinding> {
        self.bindings.get(&id)
    }

    pub fn get_mut(&mut self, id: BindingId) -> Option<&mut KeyBinding> {
        self.bindings.get_mut(&id)
    }

    pub fn bindings(&self) -> impl Iterator<Item = &KeyBinding> {
        self.bindings.values()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Action bound to an event combo, `NONE` when unbound
    pub fn binding_action(&self, resolved: &ResolvedKeyCombo) -> KeyBindingAction {
        self.lookup(resolved)
            .and_then(|id| self.get(id))
            .map(|binding| match self.external_grabs.get(&binding.name) {
                Some(grab) => grab.action,
                None => binding.action,
            })
            .unwrap_or(KeyBindingAction::NONE)
    }

    /// Grab an accelerator for an external party.
    ///
    /// Returns `None` when the accelerator does not parse, resolves to no
    /// keycode, or is already bound.
    pub fn grab_accelerator(
        &mut self,
        resolver: &KeyboardLayoutResolver,
        accelerator: &str,
        flags: KeyBindingFlags,
    ) -> Option<(KeyBindingAction, BindingId)> {
        let combo = match accelerator::parse_accelerator(accelerator) {
            Ok(combo) => combo,
            Err(e) => {
                warn!("Failed to parse accelerator: {}", e);
                return None;
            }
        };

        let resolved = resolver.resolve_key_combo(&combo);
        if resolved.is_empty() {
            debug!("Accelerator {:?} resolves to no keycode", accelerator);
            return None;
        }
        if self.lookup(&resolved).is_some() {
            debug!("Accelerator {:?} is already bound", accelerator);
            return None;
        }

        let handler = self.handlers.get(EXTERNAL_GRAB_HANDLER).cloned()?;
        let action = self.next_dynamic_action();
        let name = external_binding_name(action);
        self.external_grabs.insert(name.clone(), ExternalGrab { action, combo, flags });

        let id = self.insert_binding(&name, combo, flags, action, handler);
        if let Some(binding) = self.bindings.get_mut(&id) {
            binding.resolved = resolved;
        }
        self.index_binding(id);

        debug!("Grabbed accelerator {:?} as action {}", accelerator, action);
        Some((action, id))
    }

    /// Release an external grab. Returns the removed binding, if it was
    /// still in the table, or `None` when `action` was never grabbed.
    pub fn ungrab_accelerator(
        &mut self,
        resolver: &KeyboardLayoutResolver,
        action: KeyBindingAction,
    ) -> Option<Option<KeyBinding>> {
        if action == KeyBindingAction::NONE {
            return None;
        }

        let name = external_binding_name(action);
        let grab = self.external_grabs.remove(&name)?;

        let resolved = resolver.resolve_key_combo(&grab.combo);
        let removed = self.lookup(&resolved).and_then(|id| {
            let binding = self.bindings.remove(&id)?;
            for i in 0..binding.resolved.keycodes.len() {
                if let Some(key) = binding.resolved.index_key(i) {
                    if self.index.get(&key) == Some(&id) {
                        self.index.remove(&key);
                    }
                }
            }
            Some(binding)
        });

        Some(removed)
    }
}
