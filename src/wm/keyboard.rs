//! Keyboard Module
//!
//! Turns keysyms and virtual modifiers into physical keycodes and real
//! modifier masks under the active keyboard layouts.
//!
//! Up to two layouts are active: the backend's current layout group, plus
//! the built-in "us" layout when the current one cannot type every
//! lowercase Latin letter without shift. Latin accelerators such as
//! `<Control>c` then keep working on Cyrillic or Greek layouts.

use tracing::debug;

use crate::wm::keymap::{Keycode, Keymap, Layout, Modifiers};
use crate::wm::keysyms::{self, Keysym};

/// Keycode the "key above Tab" sentinel always resolves to (evdev grave)
pub const KEYCODE_ABOVE_TAB: Keycode = 41 + 8;

/// Logical key combination as written in an accelerator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyCombo {
    /// Keysym, 0 when the combo names a raw keycode
    pub keysym: Keysym,
    /// Raw keycode, only used when `keysym` is 0
    pub keycode: Keycode,
    /// Virtual modifiers
    pub modifiers: Modifiers,
}

impl KeyCombo {
    pub fn from_keysym(keysym: Keysym, modifiers: Modifiers) -> Self {
        Self {
            keysym,
            keycode: 0,
            modifiers,
        }
    }

    pub fn from_keycode(keycode: Keycode, modifiers: Modifiers) -> Self {
        Self {
            keysym: 0,
            keycode,
            modifiers,
        }
    }

    /// Names neither a keysym nor a keycode
    pub fn is_empty(&self) -> bool {
        self.keysym == 0 && self.keycode == 0
    }
}

/// Keycodes plus a real modifier mask, independent of the active layout
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedKeyCombo {
    pub keycodes: Vec<Keycode>,
    pub mask: Modifiers,
}

impl ResolvedKeyCombo {
    pub fn new(keycodes: Vec<Keycode>, mask: Modifiers) -> Self {
        Self { keycodes, mask }
    }

    /// Combo for a single event keycode
    pub fn single(keycode: Keycode, mask: Modifiers) -> Self {
        Self::new(vec![keycode], mask)
    }

    pub fn is_empty(&self) -> bool {
        self.keycodes.is_empty()
    }

    pub fn has_keycode(&self, keycode: Keycode) -> bool {
        self.keycodes.contains(&keycode)
    }

    /// Shares at least one keycode with `other`
    pub fn intersects(&self, other: &ResolvedKeyCombo) -> bool {
        self.keycodes.iter().any(|k| other.has_keycode(*k))
    }

    /// Binding index key of the `i`th keycode: keycode in the high half,
    /// mask in the low half
    pub fn index_key(&self, i: usize) -> Option<u32> {
        self.keycodes
            .get(i)
            .map(|&keycode| ((keycode & 0xffff) << 16) | (self.mask.bits() & 0xffff))
    }
}

/// Modifier masks used by `ISO_Next_Group` for an XKB group-switch option.
///
/// `None` when the option is not a group toggle we know about.
pub fn iso_next_group_masks(option: &str) -> Option<Vec<Modifiers>> {
    let masks = match option {
        "toggle" | "lalt_toggle" | "lwin_toggle" | "rwin_toggle" | "lshift_toggle"
        | "rshift_toggle" | "lctrl_toggle" | "rctrl_toggle" | "sclk_toggle" | "menu_toggle"
        | "caps_toggle" => vec![Modifiers::empty()],
        "shift_caps_toggle" | "shifts_toggle" => vec![Modifiers::SHIFT],
        "alt_caps_toggle" | "alt_space_toggle" => vec![Modifiers::MOD1],
        "ctrl_shift_toggle" | "lctrl_lshift_toggle" | "rctrl_rshift_toggle" => {
            vec![Modifiers::SHIFT, Modifiers::CONTROL]
        }
        "ctrl_alt_toggle" => vec![Modifiers::MOD1, Modifiers::CONTROL],
        "alt_shift_toggle" | "lalt_lshift_toggle" => vec![Modifiers::MOD1, Modifiers::SHIFT],
        _ => return None,
    };
    Some(masks)
}

/// Keyboard layout resolver
#[derive(Debug, Clone)]
pub struct KeyboardLayoutResolver {
    keymap: Keymap,

    layout_group: usize,

    /// Primary layout, then the "us" fallback when needed
    active_layouts: Vec<Layout>,

    ignored_modifier_mask: Modifiers,
    meta_mask: Modifiers,
    hyper_mask: Modifiers,
    super_mask: Modifiers,
}

impl KeyboardLayoutResolver {
    /// Create a new resolver for `keymap` with `layout_group` active
    pub fn new(keymap: Keymap, layout_group: usize) -> Self {
        let mut resolver = Self {
            keymap,
            layout_group,
            active_layouts: Vec::new(),
            ignored_modifier_mask: Modifiers::empty(),
            meta_mask: Modifiers::empty(),
            hyper_mask: Modifiers::empty(),
            super_mask: Modifiers::empty(),
        };
        resolver.reload_modmap();
        resolver.reload_layouts();
        resolver
    }

    /// Replace the keymap; modifier assignment and layouts are recomputed
    pub fn set_keymap(&mut self, keymap: Keymap, layout_group: usize) {
        self.keymap = keymap;
        self.layout_group = layout_group;
        self.reload_modmap();
        self.reload_layouts();
    }

    pub fn set_layout_group(&mut self, layout_group: usize) {
        self.layout_group = layout_group;
        self.reload_layouts();
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    pub fn layout_group(&self) -> usize {
        self.layout_group
    }

    pub fn active_layouts(&self) -> &[Layout] {
        &self.active_layouts
    }

    /// Scroll lock, NumLock (Mod2) and Caps Lock
    pub fn ignored_modifier_mask(&self) -> Modifiers {
        self.ignored_modifier_mask
    }

    pub fn meta_mask(&self) -> Modifiers {
        self.meta_mask
    }

    pub fn hyper_mask(&self) -> Modifiers {
        self.hyper_mask
    }

    pub fn super_mask(&self) -> Modifiers {
        self.super_mask
    }

    fn reload_modmap(&mut self) {
        let scroll_lock_mask = self.keymap.modifier_mask("ScrollLock").unwrap_or_default();
        self.meta_mask = self.keymap.modifier_mask("Meta").unwrap_or_default();
        self.hyper_mask = self.keymap.modifier_mask("Hyper").unwrap_or_default();
        self.super_mask = self.keymap.modifier_mask("Super").unwrap_or_default();

        self.ignored_modifier_mask = scroll_lock_mask | Modifiers::MOD2 | Modifiers::LOCK;

        debug!(
            "Ignoring modmask {:?} scroll lock {:?} hyper {:?} super {:?} meta {:?}",
            self.ignored_modifier_mask, scroll_lock_mask, self.hyper_mask, self.super_mask, self.meta_mask
        );
    }

    fn reload_layouts(&mut self) {
        self.active_layouts.clear();

        let group = if self.layout_group < self.keymap.num_layouts() {
            self.layout_group
        } else {
            0
        };
        let Some(primary) = self.keymap.layout(group).cloned() else {
            debug!("Keymap has no layouts, using the us layout");
            self.active_layouts.push(Layout::us());
            return;
        };

        let needs_fallback = !primary.has_latin_letters();
        self.active_layouts.push(primary);
        if needs_fallback {
            debug!("Active layout lacks Latin letters, adding us fallback layout");
            self.active_layouts.push(Layout::us());
        }
    }

    /// Map virtual modifiers onto the real modifiers they occupy
    pub fn devirtualize_modifiers(&self, modifiers: Modifiers) -> Modifiers {
        let mut mask = Modifiers::empty();

        for plain in [
            Modifiers::SHIFT,
            Modifiers::CONTROL,
            Modifiers::MOD1,
            Modifiers::MOD2,
            Modifiers::MOD3,
            Modifiers::MOD4,
            Modifiers::MOD5,
        ] {
            if modifiers.contains(plain) {
                mask |= plain;
            }
        }
        if modifiers.contains(Modifiers::META) {
            mask |= self.meta_mask;
        }
        if modifiers.contains(Modifiers::HYPER) {
            mask |= self.hyper_mask;
        }
        if modifiers.contains(Modifiers::SUPER) {
            mask |= self.super_mask;
        }

        mask
    }

    /// Event modifier state reduced to what distinguishes bindings
    pub fn mask_from_event(&self, state: Modifiers) -> Modifiers {
        state.real() - self.ignored_modifier_mask
    }

    /// Keycodes that produce `keysym` under the active layouts
    pub fn get_keycodes_for_keysym(&self, keysym: Keysym) -> Vec<Keycode> {
        let mut keycodes = Vec::new();
        self.add_keycodes_for_keysym(keysym, &mut keycodes);
        keycodes
    }

    fn add_keycodes_for_keysym(&self, keysym: Keysym, keycodes: &mut Vec<Keycode>) {
        if keysym == keysyms::KEY_ABOVE_TAB {
            keycodes.push(KEYCODE_ABOVE_TAB);
            return;
        }

        for layout in &self.active_layouts {
            let initial_len = keycodes.len();
            let mut level = 0;
            // The first level with a match wins for this layout
            while level < layout.num_levels() && keycodes.len() == initial_len {
                for keycode in layout.keycodes_at_level(keysym, level) {
                    if !keycodes.contains(&keycode) {
                        keycodes.push(keycode);
                    }
                }
                level += 1;
            }
        }
    }

    fn keycodes_for_combos(&self, combos: &[KeyCombo]) -> Vec<Keycode> {
        let mut keycodes = Vec::new();
        for combo in combos {
            if combo.keysym != 0 {
                self.add_keycodes_for_keysym(combo.keysym, &mut keycodes);
            } else if combo.keycode != 0 {
                keycodes.push(combo.keycode);
            }
        }
        keycodes
    }

    pub fn resolve_key_combo(&self, combo: &KeyCombo) -> ResolvedKeyCombo {
        ResolvedKeyCombo::new(
            self.keycodes_for_combos(std::slice::from_ref(combo)),
            self.devirtualize_modifiers(combo.modifiers),
        )
    }

    /// Resolve the combos of a special modifier key (overlay, locate
    /// pointer) into one combo with an empty mask
    pub fn resolve_special_key_combo(&self, combos: &[KeyCombo]) -> ResolvedKeyCombo {
        ResolvedKeyCombo::new(self.keycodes_for_combos(combos), Modifiers::empty())
    }

    /// Combos that trigger the layout group switch for an XKB option
    pub fn resolve_iso_next_group(&self, option: Option<&str>) -> Vec<ResolvedKeyCombo> {
        let Some(option) = option else {
            return Vec::new();
        };

        let keycodes = self.get_keycodes_for_keysym(keysyms::KEY_ISO_NEXT_GROUP);
        if keycodes.is_empty() {
            return Vec::new();
        }

        match iso_next_group_masks(option) {
            Some(masks) => masks
                .into_iter()
                .map(|mask| ResolvedKeyCombo::new(keycodes.clone(), mask))
                .collect(),
            None => {
                debug!("Unhandled ISO_Next_Group option {:?}", option);
                Vec::new()
            }
        }
    }

    /// Level 0 keysym of `keycode` in the first active layout that has one
    pub fn keysym_for_keycode(&self, keycode: Keycode) -> Option<Keysym> {
        self.active_layouts
            .iter()
            .find_map(|layout| layout.keysym(keycode, 0))
    }
}

impl Default for KeyboardLayoutResolver {
    fn default() -> Self {
        Self::new(Keymap::us(), 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::keysyms::*;

    /// Russian-like layout: Cyrillic letters where the Latin ones would be
    fn cyrillic_keymap() -> Keymap {
        let mut layout = Layout::new("ru");
        layout.set_key(38, &[KEY_CYRILLIC_EF]);
        layout.set_key(39, &[KEY_CYRILLIC_I]);
        layout.set_key(54, &[KEY_CYRILLIC_ES]);
        layout.set_key(55, &[KEY_CYRILLIC_VE]);
        layout.set_key(133, &[KEY_SUPER_L]);
        let mut keymap = Keymap::new(vec![layout]);
        keymap.set_modifier("Super", Modifiers::MOD4);
        keymap
    }

    #[test]
    fn test_us_layout_needs_no_fallback() {
        let resolver = KeyboardLayoutResolver::default();
        assert_eq!(resolver.active_layouts().len(), 1);
        assert_eq!(resolver.get_keycodes_for_keysym(KEY_LOWER_A), vec![38]);
    }

    #[test]
    fn test_latin_fallback_for_cyrillic_layout() {
        let resolver = KeyboardLayoutResolver::new(cyrillic_keymap(), 0);
        assert_eq!(resolver.active_layouts().len(), 2);
        assert_eq!(resolver.active_layouts()[1].name, "us");

        // 'c' only exists in the fallback; Cyrillic es only in the primary
        assert_eq!(resolver.get_keycodes_for_keysym('c' as Keysym), vec![54]);
        assert_eq!(resolver.get_keycodes_for_keysym(KEY_CYRILLIC_ES), vec![54]);
        // Found in both layouts, deduplicated
        assert_eq!(resolver.get_keycodes_for_keysym(KEY_SUPER_L), vec![133]);
    }

    #[test]
    fn test_lowest_matching_level_wins() {
        let mut layout = Layout::us();
        // A second key producing 'A' at level 0
        layout.set_key(200, &[KEY_UPPER_A]);
        let resolver = KeyboardLayoutResolver::new(Keymap::new(vec![layout]), 0);

        assert_eq!(resolver.get_keycodes_for_keysym(KEY_UPPER_A), vec![200]);
        assert_eq!(resolver.get_keycodes_for_keysym(KEY_LOWER_A), vec![38]);
    }

    #[test]
    fn test_above_tab_is_position_based() {
        let resolver = KeyboardLayoutResolver::new(cyrillic_keymap(), 0);
        assert_eq!(resolver.get_keycodes_for_keysym(KEY_ABOVE_TAB), vec![KEYCODE_ABOVE_TAB]);
    }

    #[test]
    fn test_devirtualize_and_ignored_mask() {
        let mut keymap = Keymap::us();
        keymap.set_modifier("ScrollLock", Modifiers::MOD3);
        let resolver = KeyboardLayoutResolver::new(keymap, 0);

        assert_eq!(
            resolver.ignored_modifier_mask(),
            Modifiers::MOD3 | Modifiers::MOD2 | Modifiers::LOCK
        );
        assert_eq!(
            resolver.devirtualize_modifiers(Modifiers::SUPER | Modifiers::CONTROL | Modifiers::LOCK),
            Modifiers::MOD4 | Modifiers::CONTROL
        );

        let event_state = Modifiers::CONTROL | Modifiers::MOD2 | Modifiers::LOCK | Modifiers::BUTTON1;
        assert_eq!(resolver.mask_from_event(event_state), Modifiers::CONTROL);
    }

    #[test]
    fn test_out_of_range_group_uses_first_layout() {
        let resolver = KeyboardLayoutResolver::new(Keymap::us(), 3);
        assert_eq!(resolver.active_layouts()[0].name, "us");
    }

    #[test]
    fn test_resolved_combo_queries() {
        let a = ResolvedKeyCombo::new(vec![133, 134], Modifiers::empty());
        let b = ResolvedKeyCombo::single(134, Modifiers::MOD4);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&ResolvedKeyCombo::single(38, Modifiers::empty())));
        assert_eq!(b.index_key(0), Some((134 << 16) | 0x40));
        assert_eq!(b.index_key(1), None);
    }

    #[test]
    fn test_iso_next_group_combos() {
        let mut us = Layout::us();
        us.set_key(92, &[KEY_ISO_NEXT_GROUP]);
        let resolver = KeyboardLayoutResolver::new(Keymap::new(vec![us]), 0);

        let combos = resolver.resolve_iso_next_group(Some("ctrl_shift_toggle"));
        assert_eq!(combos.len(), 2);
        assert_eq!(combos[0].mask, Modifiers::SHIFT);
        assert_eq!(combos[1].mask, Modifiers::CONTROL);
        assert!(combos.iter().all(|c| c.keycodes == vec![92]));

        assert!(resolver.resolve_iso_next_group(Some("bogus")).is_empty());
        assert!(resolver.resolve_iso_next_group(None).is_empty());
        assert!(KeyboardLayoutResolver::default()
            .resolve_iso_next_group(Some("toggle"))
            .is_empty());
    }
}
