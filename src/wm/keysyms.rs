//! Keysyms
//!
//! X keysym values used by the binding machinery and a name table for
//! parsing accelerator strings.

pub type Keysym = u32;

pub const NO_SYMBOL: Keysym = 0;

/// Virtual keysym for "the key above Tab", whatever it produces
pub const KEY_ABOVE_TAB: Keysym = 0x2f72_59c9;

pub const KEY_SPACE: Keysym = 0x0020;
pub const KEY_GRAVE: Keysym = 0x0060;
pub const KEY_LOWER_A: Keysym = 0x0061;
pub const KEY_LOWER_Z: Keysym = 0x007a;
pub const KEY_UPPER_A: Keysym = 0x0041;
pub const KEY_UPPER_Z: Keysym = 0x005a;

pub const KEY_ISO_LEVEL3_SHIFT: Keysym = 0xfe03;
pub const KEY_ISO_NEXT_GROUP: Keysym = 0xfe08;
pub const KEY_ISO_LEFT_TAB: Keysym = 0xfe20;

pub const KEY_BACKSPACE: Keysym = 0xff08;
pub const KEY_TAB: Keysym = 0xff09;
pub const KEY_RETURN: Keysym = 0xff0d;
pub const KEY_PAUSE: Keysym = 0xff13;
pub const KEY_SCROLL_LOCK: Keysym = 0xff14;
pub const KEY_ESCAPE: Keysym = 0xff1b;
pub const KEY_HOME: Keysym = 0xff50;
pub const KEY_LEFT: Keysym = 0xff51;
pub const KEY_UP: Keysym = 0xff52;
pub const KEY_RIGHT: Keysym = 0xff53;
pub const KEY_DOWN: Keysym = 0xff54;
pub const KEY_PAGE_UP: Keysym = 0xff55;
pub const KEY_PAGE_DOWN: Keysym = 0xff56;
pub const KEY_END: Keysym = 0xff57;
pub const KEY_PRINT: Keysym = 0xff61;
pub const KEY_INSERT: Keysym = 0xff63;
pub const KEY_MENU: Keysym = 0xff67;
pub const KEY_MODE_SWITCH: Keysym = 0xff7e;
pub const KEY_NUM_LOCK: Keysym = 0xff7f;
pub const KEY_KP_ENTER: Keysym = 0xff8d;
pub const KEY_KP_MULTIPLY: Keysym = 0xffaa;
pub const KEY_F1: Keysym = 0xffbe;
pub const KEY_SHIFT_L: Keysym = 0xffe1;
pub const KEY_SHIFT_R: Keysym = 0xffe2;
pub const KEY_CONTROL_L: Keysym = 0xffe3;
pub const KEY_CONTROL_R: Keysym = 0xffe4;
pub const KEY_CAPS_LOCK: Keysym = 0xffe5;
pub const KEY_META_L: Keysym = 0xffe7;
pub const KEY_META_R: Keysym = 0xffe8;
pub const KEY_ALT_L: Keysym = 0xffe9;
pub const KEY_ALT_R: Keysym = 0xffea;
pub const KEY_SUPER_L: Keysym = 0xffeb;
pub const KEY_SUPER_R: Keysym = 0xffec;
pub const KEY_HYPER_L: Keysym = 0xffed;
pub const KEY_HYPER_R: Keysym = 0xffee;
pub const KEY_DELETE: Keysym = 0xffff;

pub const KEY_CYRILLIC_A: Keysym = 0x06c1;
pub const KEY_CYRILLIC_EF: Keysym = 0x06c6;
pub const KEY_CYRILLIC_I: Keysym = 0x06c9;
pub const KEY_CYRILLIC_ES: Keysym = 0x06d3;
pub const KEY_CYRILLIC_VE: Keysym = 0x06d7;

const NAMED_KEYSYMS: &[(&str, Keysym)] = &[
    ("space", 0x0020),
    ("exclam", 0x0021),
    ("quotedbl", 0x0022),
    ("numbersign", 0x0023),
    ("dollar", 0x0024),
    ("percent", 0x0025),
    ("ampersand", 0x0026),
    ("apostrophe", 0x0027),
    ("parenleft", 0x0028),
    ("parenright", 0x0029),
    ("asterisk", 0x002a),
    ("plus", 0x002b),
    ("comma", 0x002c),
    ("minus", 0x002d),
    ("period", 0x002e),
    ("slash", 0x002f),
    ("colon", 0x003a),
    ("semicolon", 0x003b),
    ("less", 0x003c),
    ("equal", 0x003d),
    ("greater", 0x003e),
    ("question", 0x003f),
    ("at", 0x0040),
    ("bracketleft", 0x005b),
    ("backslash", 0x005c),
    ("bracketright", 0x005d),
    ("asciicircum", 0x005e),
    ("underscore", 0x005f),
    ("grave", 0x0060),
    ("braceleft", 0x007b),
    ("bar", 0x007c),
    ("braceright", 0x007d),
    ("asciitilde", 0x007e),
    ("Above_Tab", KEY_ABOVE_TAB),
    ("ISO_Level3_Shift", KEY_ISO_LEVEL3_SHIFT),
    ("ISO_Next_Group", KEY_ISO_NEXT_GROUP),
    ("ISO_Left_Tab", KEY_ISO_LEFT_TAB),
    ("BackSpace", KEY_BACKSPACE),
    ("Tab", KEY_TAB),
    ("Return", KEY_RETURN),
    ("Pause", KEY_PAUSE),
    ("Scroll_Lock", KEY_SCROLL_LOCK),
    ("Escape", KEY_ESCAPE),
    ("Home", KEY_HOME),
    ("Left", KEY_LEFT),
    ("Up", KEY_UP),
    ("Right", KEY_RIGHT),
    ("Down", KEY_DOWN),
    ("Page_Up", KEY_PAGE_UP),
    ("Prior", KEY_PAGE_UP),
    ("Page_Down", KEY_PAGE_DOWN),
    ("Next", KEY_PAGE_DOWN),
    ("End", KEY_END),
    ("Print", KEY_PRINT),
    ("Insert", KEY_INSERT),
    ("Menu", KEY_MENU),
    ("Mode_switch", KEY_MODE_SWITCH),
    ("Num_Lock", KEY_NUM_LOCK),
    ("KP_Enter", KEY_KP_ENTER),
    ("KP_Multiply", KEY_KP_MULTIPLY),
    ("Shift_L", KEY_SHIFT_L),
    ("Shift_R", KEY_SHIFT_R),
    ("Control_L", KEY_CONTROL_L),
    ("Control_R", KEY_CONTROL_R),
    ("Caps_Lock", KEY_CAPS_LOCK),
    ("Meta_L", KEY_META_L),
    ("Meta_R", KEY_META_R),
    ("Alt_L", KEY_ALT_L),
    ("Alt_R", KEY_ALT_R),
    ("Super_L", KEY_SUPER_L),
    ("Super_R", KEY_SUPER_R),
    ("Hyper_L", KEY_HYPER_L),
    ("Hyper_R", KEY_HYPER_R),
    ("Delete", KEY_DELETE),
    ("Cyrillic_a", KEY_CYRILLIC_A),
    ("Cyrillic_ef", KEY_CYRILLIC_EF),
    ("Cyrillic_i", KEY_CYRILLIC_I),
    ("Cyrillic_es", KEY_CYRILLIC_ES),
    ("Cyrillic_ve", KEY_CYRILLIC_VE),
];

/// Look up a keysym by its X name (`a`, `Return`, `F4`, `Above_Tab`, ...)
pub fn keysym_from_name(name: &str) -> Option<Keysym> {
    let mut chars = name.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if c.is_ascii_alphanumeric() {
            return Some(c as Keysym);
        }
    }

    if let Some(number) = name.strip_prefix('F').and_then(|n| n.parse::<u32>().ok()) {
        if (1..=35).contains(&number) {
            return Some(KEY_F1 + number - 1);
        }
    }

    NAMED_KEYSYMS
        .iter()
        .find(|(n, _)| *n == name)
        .or_else(|| NAMED_KEYSYMS.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)))
        .map(|&(_, keysym)| keysym)
}

/// X name of a keysym, if it is in the table
pub fn keysym_name(keysym: Keysym) -> Option<String> {
    match keysym {
        0x30..=0x39 | 0x41..=0x5a | 0x61..=0x7a => char::from_u32(keysym).map(String::from),
        k if (KEY_F1..KEY_F1 + 35).contains(&k) => Some(format!("F{}", k - KEY_F1 + 1)),
        k => NAMED_KEYSYMS
            .iter()
            .find(|&&(_, v)| v == k)
            .map(|&(name, _)| name.to_string()),
    }
}

/// Lowercase Latin-1 letters, leave everything else alone
pub fn to_lower(keysym: Keysym) -> Keysym {
    if (KEY_UPPER_A..=KEY_UPPER_Z).contains(&keysym) {
        keysym + (KEY_LOWER_A - KEY_UPPER_A)
    } else {
        keysym
    }
}

pub fn to_upper(keysym: Keysym) -> Keysym {
    if (KEY_LOWER_A..=KEY_LOWER_Z).contains(&keysym) {
        keysym - (KEY_LOWER_A - KEY_UPPER_A)
    } else {
        keysym
    }
}

pub fn is_modifier_key(keysym: Keysym) -> bool {
    (KEY_SHIFT_L..=KEY_HYPER_R).contains(&keysym)
        || keysym == KEY_ISO_LEVEL3_SHIFT
        || keysym == KEY_MODE_SWITCH
        || keysym == KEY_NUM_LOCK
}
