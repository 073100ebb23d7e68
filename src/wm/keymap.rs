//! Keymap Module
//!
//! Keyboard layouts (keycode → shift level → keysym) and the modifier
//! mapping, as reported by the windowing backend.

use std::collections::BTreeMap;

use bitflags::bitflags;
use tracing::debug;

use crate::wm::keysyms::{self, Keysym, NO_SYMBOL};

/// Physical key code, in the windowing system's numbering (evdev + 8)
pub type Keycode = u32;

bitflags! {
    /// Modifier state
    ///
    /// Bits 0-7 are the real modifiers, 8-12 the pointer buttons as they
    /// appear in event state. `SUPER`, `HYPER` and `META` are virtual and
    /// only show up in accelerators until devirtualized.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Modifiers: u32 {
        const SHIFT = 1 << 0;
        const LOCK = 1 << 1;
        const CONTROL = 1 << 2;
        const MOD1 = 1 << 3;
        const MOD2 = 1 << 4;
        const MOD3 = 1 << 5;
        const MOD4 = 1 << 6;
        const MOD5 = 1 << 7;
        const BUTTON1 = 1 << 8;
        const BUTTON2 = 1 << 9;
        const BUTTON3 = 1 << 10;
        const BUTTON4 = 1 << 11;
        const BUTTON5 = 1 << 12;
        const SUPER = 1 << 26;
        const HYPER = 1 << 27;
        const META = 1 << 28;
    }
}

impl Modifiers {
    /// Real keyboard modifiers (`SHIFT` through `MOD5`)
    pub const REAL: Modifiers = Modifiers::from_bits_truncate(0xff);

    /// The mask with only the real keyboard modifiers left
    pub fn real(self) -> Modifiers {
        self & Self::REAL
    }
}

/// One keyboard layout (XKB group)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub name: String,
    keys: BTreeMap<Keycode, Vec<Keysym>>,
}

impl Layout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: BTreeMap::new(),
        }
    }

    /// Set the keysyms of `keycode`, one per shift level
    pub fn set_key(&mut self, keycode: Keycode, levels: &[Keysym]) {
        let mut levels = levels.to_vec();
        while levels.last() == Some(&NO_SYMBOL) {
            levels.pop();
        }
        if levels.is_empty() {
            self.keys.remove(&keycode);
        } else {
            self.keys.insert(keycode, levels);
        }
    }

    pub fn keysym(&self, keycode: Keycode, level: usize) -> Option<Keysym> {
        self.keys
            .get(&keycode)
            .and_then(|levels| levels.get(level))
            .copied()
            .filter(|&sym| sym != NO_SYMBOL)
    }

    /// Highest number of levels of any key
    pub fn num_levels(&self) -> usize {
        self.keys.values().map(Vec::len).max().unwrap_or(0)
    }

    /// Keycodes producing `keysym` at `level`, ascending
    pub fn keycodes_at_level(&self, keysym: Keysym, level: usize) -> impl Iterator<Item = Keycode> + '_ {
        self.keys
            .iter()
            .filter(move |(_, levels)| levels.get(level) == Some(&keysym))
            .map(|(&keycode, _)| keycode)
    }

    pub fn keycodes(&self) -> impl Iterator<Item = Keycode> + '_ {
        self.keys.keys().copied()
    }

    /// Every lowercase Latin letter is reachable without shift
    pub fn has_latin_letters(&self) -> bool {
        (keysyms::KEY_LOWER_A..=keysyms::KEY_LOWER_Z)
            .all(|sym| self.keycodes_at_level(sym, 0).next().is_some())
    }

    /// The evdev "us" layout
    pub fn us() -> Self {
        use keysyms::*;

        let mut layout = Self::new("us");
        let rows: [(Keycode, &str, &str); 4] = [
            (10, "1234567890-=", "!@#$%^&*()_+"),
            (24, "qwertyuiop[]", "QWERTYUIOP{}"),
            (38, "asdfghjkl;'`", "ASDFGHJKL:\"~"),
            (52, "zxcvbnm,./", "ZXCVBNM<>?"),
        ];
        for (first, lower, upper) in rows {
            for (offset, (l, u)) in lower.chars().zip(upper.chars()).enumerate() {
                layout.set_key(first + offset as Keycode, &[l as Keysym, u as Keysym]);
            }
        }

        let specials: &[(Keycode, &[Keysym])] = &[
            (9, &[KEY_ESCAPE]),
            (22, &[KEY_BACKSPACE]),
            (23, &[KEY_TAB, KEY_ISO_LEFT_TAB]),
            (36, &[KEY_RETURN]),
            (37, &[KEY_CONTROL_L]),
            (50, &[KEY_SHIFT_L]),
            (51, &['\\' as Keysym, '|' as Keysym]),
            (62, &[KEY_SHIFT_R]),
            (63, &[KEY_KP_MULTIPLY]),
            (64, &[KEY_ALT_L, KEY_META_L]),
            (65, &[KEY_SPACE]),
            (66, &[KEY_CAPS_LOCK]),
            (77, &[KEY_NUM_LOCK]),
            (78, &[KEY_SCROLL_LOCK]),
            (95, &[KEY_F1 + 10]),
            (96, &[KEY_F1 + 11]),
            (104, &[KEY_KP_ENTER]),
            (105, &[KEY_CONTROL_R]),
            (107, &[KEY_PRINT]),
            (108, &[KEY_ALT_R, KEY_META_R]),
            (110, &[KEY_HOME]),
            (111, &[KEY_UP]),
            (112, &[KEY_PAGE_UP]),
            (113, &[KEY_LEFT]),
            (114, &[KEY_RIGHT]),
            (115, &[KEY_END]),
            (116, &[KEY_DOWN]),
            (117, &[KEY_PAGE_DOWN]),
            (118, &[KEY_INSERT]),
            (119, &[KEY_DELETE]),
            (127, &[KEY_PAUSE]),
            (133, &[KEY_SUPER_L]),
            (134, &[KEY_SUPER_R]),
            (135, &[KEY_MENU]),
        ];
        for &(keycode, levels) in specials {
            layout.set_key(keycode, levels);
        }
        for n in 0..10 {
            layout.set_key(67 + n, &[KEY_F1 + n]);
        }

        layout
    }
}

/// Layouts plus the modifier mapping
#[derive(Debug, Clone, Default)]
pub struct Keymap {
    layouts: Vec<Layout>,

    /// Named modifiers and the real modifier bits they occupy
    modifiers: Vec<(String, Modifiers)>,
}

impl Keymap {
    pub fn new(layouts: Vec<Layout>) -> Self {
        let mut keymap = Self {
            layouts,
            modifiers: Vec::new(),
        };
        for (name, mask) in [
            ("Shift", Modifiers::SHIFT),
            ("Lock", Modifiers::LOCK),
            ("Control", Modifiers::CONTROL),
            ("Mod1", Modifiers::MOD1),
            ("Mod2", Modifiers::MOD2),
            ("Mod3", Modifiers::MOD3),
            ("Mod4", Modifiers::MOD4),
            ("Mod5", Modifiers::MOD5),
        ] {
            keymap.set_modifier(name, mask);
        }
        keymap
    }

    /// Keymap with the "us" layout and the usual modifier assignment
    pub fn us() -> Self {
        let mut keymap = Self::new(vec![Layout::us()]);
        keymap.set_modifier("Alt", Modifiers::MOD1);
        keymap.set_modifier("Meta", Modifiers::MOD1);
        keymap.set_modifier("NumLock", Modifiers::MOD2);
        keymap.set_modifier("Super", Modifiers::MOD4);
        keymap.set_modifier("Hyper", Modifiers::MOD4);
        keymap
    }

    /// Build a keymap from a core protocol keyboard and modifier mapping.
    ///
    /// `keysyms` holds `keysyms_per_keycode` entries for each keycode from
    /// `min_keycode` on. Columns 0-1 (and 4-5) are the first group, columns
    /// 2-3 the second. The second group is only kept when it differs from
    /// the first. `modifier_map` holds `keycodes_per_modifier` keycodes for
    /// each of the eight real modifiers.
    pub fn from_core_mapping(
        min_keycode: Keycode,
        keysyms_per_keycode: usize,
        keysyms: &[Keysym],
        keycodes_per_modifier: usize,
        modifier_map: &[Keycode],
    ) -> Self {
        let mut primary = Layout::new("core");
        let mut secondary = Layout::new("core-2");

        if keysyms_per_keycode > 0 {
            for (index, row) in keysyms.chunks(keysyms_per_keycode).enumerate() {
                let keycode = min_keycode + index as Keycode;
                let col = |i: usize| row.get(i).copied().unwrap_or(NO_SYMBOL);

                let mut first = vec![col(0), col(1), col(4), col(5)];
                // A lone cased keysym stands for both cases
                if first[1] == NO_SYMBOL {
                    let (lower, upper) = (keysyms::to_lower(first[0]), keysyms::to_upper(first[0]));
                    if lower != upper {
                        first[0] = lower;
                        first[1] = upper;
                    }
                }
                primary.set_key(keycode, &first);
                secondary.set_key(keycode, &[col(2), col(3)]);
            }
        }

        let mut layouts = vec![primary];
        let distinct = secondary
            .keycodes()
            .any(|keycode| (0..2).any(|level| secondary.keysym(keycode, level) != layouts[0].keysym(keycode, level)));
        if distinct {
            layouts.push(secondary);
        }

        let mut keymap = Self::new(layouts);
        if keycodes_per_modifier == 0 {
            return keymap;
        }

        for (bit, keycodes) in modifier_map.chunks(keycodes_per_modifier).take(8).enumerate() {
            let mask = Modifiers::from_bits_truncate(1 << bit);
            for &keycode in keycodes.iter().filter(|&&k| k != 0) {
                for level in 0..2 {
                    let Some(sym) = keymap.layouts[0].keysym(keycode, level) else {
                        continue;
                    };
                    let name = match sym {
                        keysyms::KEY_META_L | keysyms::KEY_META_R => "Meta",
                        keysyms::KEY_SUPER_L | keysyms::KEY_SUPER_R => "Super",
                        keysyms::KEY_HYPER_L | keysyms::KEY_HYPER_R => "Hyper",
                        keysyms::KEY_ALT_L | keysyms::KEY_ALT_R => "Alt",
                        keysyms::KEY_NUM_LOCK => "NumLock",
                        keysyms::KEY_SCROLL_LOCK => "ScrollLock",
                        keysyms::KEY_ISO_LEVEL3_SHIFT | keysyms::KEY_MODE_SWITCH => "LevelThree",
                        _ => continue,
                    };
                    let current = keymap.modifier_mask(name).unwrap_or_default();
                    keymap.set_modifier(name, current | mask);
                }
            }
        }

        debug!(
            "Keymap from core mapping: {} layout(s), modifiers {:?}",
            keymap.layouts.len(),
            keymap.modifiers
        );
        keymap
    }

    pub fn set_modifier(&mut self, name: &str, mask: Modifiers) {
        match self.modifiers.iter_mut().find(|(n, _)| n == name) {
            Some(entry) => entry.1 = mask,
            None => self.modifiers.push((name.to_string(), mask)),
        }
    }

    /// Real mask of the named modifier, `None` if the keymap has no such
    /// modifier
    pub fn modifier_mask(&self, name: &str) -> Option<Modifiers> {
        self.modifiers
            .iter()
            .find(|(n, _)| n == name)
            .map(|&(_, mask)| mask)
    }

    pub fn layouts(&self) -> &[Layout] {
        &self.layouts
    }

    pub fn layout(&self, index: usize) -> Option<&Layout> {
        self.layouts.get(index)
    }

    pub fn num_layouts(&self) -> usize {
        self.layouts.len()
    }

    pub fn keysym(&self, layout: usize, keycode: Keycode, level: usize) -> Option<Keysym> {
        self.layout(layout).and_then(|l| l.keysym(keycode, level))
    }
}
