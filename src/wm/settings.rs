//! Settings Module
//!
//! The preferences the core consumes: named key bindings with their
//! combos, the mouse button modifier, keyboard repeat, cursor and
//! workspace settings. Changes are queued as [`PreferenceChange`]s and the
//! display rebuilds only the subsystem each one affects.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::wm::accelerator;
use crate::wm::keybindings::{KeyBindingAction, KeyBindingFlags, SpecialKeys};
use crate::wm::keyboard::KeyCombo;
use crate::wm::keymap::Modifiers;
use crate::wm::keysyms::{self, Keysym};

/// Most workspaces with their own bindings
pub const MAX_WORKSPACES: u32 = 12;

/// A named key binding preference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPref {
    pub name: String,
    pub action: KeyBindingAction,
    pub flags: KeyBindingFlags,
    pub combos: Vec<KeyCombo>,
}

/// Which preference changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceChange {
    Keybindings,
    MouseButtonMods,
    KeyboardRepeat,
    Cursor,
    Workspaces,
}

/// Keyboard autorepeat settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyboardRepeat {
    pub enabled: bool,
    pub delay: u32,
    pub interval: u32,
}

/// Built-in bindings with their default accelerators
fn builtin_keybindings(num_workspaces: u32) -> Vec<(String, KeyBindingAction, Vec<String>)> {
    let mut builtins = vec![
        ("raise".to_string(), KeyBindingAction::RAISE, vec![]),
        ("lower".to_string(), KeyBindingAction::LOWER, vec![]),
        ("raise-or-lower".to_string(), KeyBindingAction::RAISE_OR_LOWER, vec![]),
        ("toggle-above".to_string(), KeyBindingAction::TOGGLE_ABOVE, vec![]),
        ("begin-move".to_string(), KeyBindingAction::BEGIN_MOVE, vec!["<Alt>F7".to_string()]),
        ("begin-resize".to_string(), KeyBindingAction::BEGIN_RESIZE, vec!["<Alt>F8".to_string()]),
    ];

    for n in 1..=num_workspaces.min(MAX_WORKSPACES) {
        let (switch, shift) = if n <= 4 {
            (vec![format!("<Super>{}", n)], vec![format!("<Super><Shift>{}", n)])
        } else {
            (vec![], vec![])
        };
        builtins.push((format!("switch-to-workspace-{}", n), KeyBindingAction::WORKSPACE_SWITCH, switch));
        builtins.push((format!("move-to-workspace-{}", n), KeyBindingAction::MOVE_TO_WORKSPACE, shift));
    }

    builtins
}

fn parse_combos(name: &str, accelerators: &[String]) -> Vec<KeyCombo> {
    accelerators
        .iter()
        .filter_map(|accelerator| match accelerator::parse_accelerator(accelerator) {
            Ok(combo) => Some(combo),
            Err(e) => {
                warn!("Ignoring accelerator for \"{}\": {}", name, e);
                None
            }
        })
        .collect()
}

/// Left-hand modifier keysyms whose right-hand twin is one higher
fn right_hand_twin(keysym: Keysym) -> Option<Keysym> {
    match keysym {
        keysyms::KEY_SHIFT_L
        | keysyms::KEY_CONTROL_L
        | keysyms::KEY_META_L
        | keysyms::KEY_ALT_L
        | keysyms::KEY_SUPER_L
        | keysyms::KEY_HYPER_L => Some(keysym + 1),
        _ => None,
    }
}

/// Preferences collaborator
#[derive(Debug)]
pub struct Preferences {
    pub raise_on_click: bool,
    num_workspaces: u32,
    mouse_button_mods: Modifiers,
    keyboard_repeat: KeyboardRepeat,
    cursor_theme: String,
    cursor_size: u32,

    overlay_key: Vec<KeyCombo>,
    locate_pointer_enabled: bool,
    locate_pointer_key: Vec<KeyCombo>,
    iso_next_group: Option<String>,

    /// In registration order, which is binding-table order
    keybindings: Vec<KeyPref>,

    pending: VecDeque<PreferenceChange>,
}

impl Preferences {
    /// Create preferences from a loaded configuration
    pub fn from_config(config: &Config) -> Self {
        let mut prefs = Self {
            raise_on_click: true,
            num_workspaces: 1,
            mouse_button_mods: Modifiers::SUPER,
            keyboard_repeat: KeyboardRepeat {
                enabled: true,
                delay: 500,
                interval: 30,
            },
            cursor_theme: String::new(),
            cursor_size: 0,
            overlay_key: Vec::new(),
            locate_pointer_enabled: false,
            locate_pointer_key: Vec::new(),
            iso_next_group: None,
            keybindings: Vec::new(),
            pending: VecDeque::new(),
        };
        prefs.apply_config(config);
        prefs.pending.clear();
        prefs
    }

    /// Take over a new configuration, queueing a change for every
    /// subsystem whose settings differ
    pub fn apply_config(&mut self, config: &Config) {
        let behavior = &config.behavior;
        self.raise_on_click = behavior.raise_on_click;

        let num_workspaces = behavior.num_workspaces.clamp(1, MAX_WORKSPACES);
        let workspaces_changed = num_workspaces != self.num_workspaces;
        if workspaces_changed {
            self.num_workspaces = num_workspaces;
            self.queue(PreferenceChange::Workspaces);
        }

        let mouse_button_mods = match accelerator::parse_modifier(&behavior.mouse_button_modifier) {
            Ok(mods) => mods,
            Err(e) => {
                warn!("Invalid mouse button modifier: {}", e);
                Modifiers::empty()
            }
        };
        if mouse_button_mods != self.mouse_button_mods {
            self.mouse_button_mods = mouse_button_mods;
            self.queue(PreferenceChange::MouseButtonMods);
        }

        let repeat = KeyboardRepeat {
            enabled: config.keyboard.repeat,
            delay: config.keyboard.repeat_delay,
            interval: config.keyboard.repeat_interval,
        };
        if repeat != self.keyboard_repeat {
            self.keyboard_repeat = repeat;
            self.queue(PreferenceChange::KeyboardRepeat);
        }

        if config.cursor.theme != self.cursor_theme || config.cursor.size != self.cursor_size {
            self.cursor_theme = config.cursor.theme.clone();
            self.cursor_size = config.cursor.size;
            self.queue(PreferenceChange::Cursor);
        }

        let overlay_key = Self::overlay_combos(&config.keyboard.overlay_key);
        let locate_pointer_key = parse_combos("locate-pointer-key", &[config.keyboard.locate_pointer_key.clone()]);

        // Dynamic bindings survive a config reload; built-ins are rebuilt
        let dynamic: Vec<KeyPref> = self
            .keybindings
            .iter()
            .filter(|pref| pref.action > KeyBindingAction::LAST)
            .cloned()
            .collect();
        let mut keybindings: Vec<KeyPref> = builtin_keybindings(num_workspaces)
            .into_iter()
            .map(|(name, action, defaults)| {
                let accelerators = config.keybindings.get(&name).unwrap_or(&defaults);
                KeyPref {
                    combos: parse_combos(&name, accelerators),
                    name,
                    action,
                    flags: KeyBindingFlags::BUILTIN,
                }
            })
            .collect();
        keybindings.extend(dynamic);

        if keybindings != self.keybindings
            || overlay_key != self.overlay_key
            || locate_pointer_key != self.locate_pointer_key
            || behavior.locate_pointer != self.locate_pointer_enabled
            || behavior.iso_next_group != self.iso_next_group
        {
            self.keybindings = keybindings;
            self.overlay_key = overlay_key;
            self.locate_pointer_key = locate_pointer_key;
            self.locate_pointer_enabled = behavior.locate_pointer;
            self.iso_next_group = behavior.iso_next_group.clone();
            self.queue(PreferenceChange::Keybindings);
        }

        info!(
            "Preferences: {} bindings, {} workspaces, mouse modifier {:?}",
            self.keybindings.len(),
            self.num_workspaces,
            self.mouse_button_mods
        );
    }

    /// The overlay key and, for a left-hand modifier, its right-hand twin
    fn overlay_combos(name: &str) -> Vec<KeyCombo> {
        let mut combos = parse_combos("overlay-key", &[name.to_string()]);
        if let [combo] = combos.as_slice() {
            if let Some(twin) = right_hand_twin(combo.keysym) {
                combos.push(KeyCombo::from_keysym(twin, combo.modifiers));
            }
        }
        combos
    }

    fn queue(&mut self, change: PreferenceChange) {
        if !self.pending.contains(&change) {
            debug!("Queueing preference change {:?}", change);
            self.pending.push_back(change);
        }
    }

    /// Drain queued changes in the order they happened
    pub fn take_changes(&mut self) -> Vec<PreferenceChange> {
        self.pending.drain(..).collect()
    }

    pub fn keybindings(&self) -> &[KeyPref] {
        &self.keybindings
    }

    pub fn keybinding(&self, name: &str) -> Option<&KeyPref> {
        self.keybindings.iter().find(|pref| pref.name == name)
    }

    /// Add a dynamic binding preference. Fails if the name is taken.
    pub fn add_keybinding(
        &mut self,
        name: &str,
        accelerators: &[String],
        action: KeyBindingAction,
        flags: KeyBindingFlags,
    ) -> bool {
        if self.keybinding(name).is_some() {
            warn!("Trying to re-add keybinding \"{}\"", name);
            return false;
        }
        self.keybindings.push(KeyPref {
            name: name.to_string(),
            action,
            flags,
            combos: parse_combos(name, accelerators),
        });
        self.queue(PreferenceChange::Keybindings);
        true
    }

    /// Remove a dynamic binding preference; built-ins cannot be removed
    pub fn remove_keybinding(&mut self, name: &str) -> bool {
        let Some(index) = self.keybindings.iter().position(|pref| pref.name == name) else {
            return false;
        };
        if self.keybindings[index].flags.contains(KeyBindingFlags::BUILTIN) {
            warn!("Trying to remove non-removable keybinding \"{}\"", name);
            return false;
        }
        self.keybindings.remove(index);
        self.queue(PreferenceChange::Keybindings);
        true
    }

    /// Overlay, locate-pointer and layout switch combos
    pub fn special_keys(&self) -> SpecialKeys {
        SpecialKeys {
            overlay: self.overlay_key.clone(),
            locate_pointer: if self.locate_pointer_enabled {
                self.locate_pointer_key.clone()
            } else {
                Vec::new()
            },
            iso_next_group: self.iso_next_group.clone(),
        }
    }

    pub fn locate_pointer_enabled(&self) -> bool {
        self.locate_pointer_enabled
    }

    pub fn num_workspaces(&self) -> u32 {
        self.num_workspaces
    }

    /// Modifier for mouse window operations, possibly virtual
    pub fn mouse_button_mods(&self) -> Modifiers {
        self.mouse_button_mods
    }

    pub fn keyboard_repeat(&self) -> KeyboardRepeat {
        self.keyboard_repeat
    }

    pub fn cursor(&self) -> (&str, u32) {
        (&self.cursor_theme, self.cursor_size)
    }
}

impl Default for Preferences {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
