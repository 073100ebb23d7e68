//! Accelerator Module
//!
//! Parsing and formatting of accelerator strings such as
//! `<Control><Alt>Delete`, `<Super>Above_Tab` or `<Shift>0x26`.

use thiserror::Error;
use tracing::debug;

use crate::wm::keyboard::KeyCombo;
use crate::wm::keymap::Modifiers;
use crate::wm::keysyms::{self, KEY_ABOVE_TAB};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AcceleratorError {
    #[error("unknown key name \"{0}\"")]
    UnknownKey(String),

    #[error("unterminated modifier in \"{0}\"")]
    UnterminatedModifier(String),

    #[error("invalid keycode \"{0}\"")]
    InvalidKeycode(String),

    #[error("\"{0}\" is not a modifier")]
    NotAModifier(String),
}

fn modifier_from_name(name: &str) -> Option<Modifiers> {
    let modifier = match name.to_ascii_lowercase().as_str() {
        "primary" | "control" | "ctrl" | "ctl" => Modifiers::CONTROL,
        "shift" | "shft" => Modifiers::SHIFT,
        "alt" | "mod1" => Modifiers::MOD1,
        "mod2" => Modifiers::MOD2,
        "mod3" => Modifiers::MOD3,
        "mod4" => Modifiers::MOD4,
        "mod5" => Modifiers::MOD5,
        "meta" => Modifiers::META,
        "hyper" => Modifiers::HYPER,
        "super" => Modifiers::SUPER,
        _ => return None,
    };
    Some(modifier)
}

/// Parse an accelerator. Empty strings and `disabled` give an empty combo.
pub fn parse_accelerator(accelerator: &str) -> Result<KeyCombo, AcceleratorError> {
    if accelerator.is_empty() || accelerator == "disabled" {
        return Ok(KeyCombo::default());
    }

    let mut modifiers = Modifiers::empty();
    let mut rest = accelerator;

    while let Some(tail) = rest.strip_prefix('<') {
        let Some(end) = tail.find('>') else {
            return Err(AcceleratorError::UnterminatedModifier(accelerator.to_string()));
        };
        match modifier_from_name(&tail[..end]) {
            Some(modifier) => modifiers |= modifier,
            None => debug!("Ignoring unknown modifier <{}> in {:?}", &tail[..end], accelerator),
        }
        rest = &tail[end + 1..];
    }

    if rest.is_empty() {
        return Ok(KeyCombo::from_keysym(0, modifiers));
    }

    if let Some(hex) = rest.strip_prefix("0x") {
        if hex.len() >= 2 && hex.chars().take(2).all(|c| c.is_ascii_hexdigit()) {
            let keycode = u32::from_str_radix(hex, 16)
                .map_err(|_| AcceleratorError::InvalidKeycode(rest.to_string()))?;
            return Ok(KeyCombo::from_keycode(keycode, modifiers));
        }
    }

    if rest == "Above_Tab" {
        return Ok(KeyCombo::from_keysym(KEY_ABOVE_TAB, modifiers));
    }

    let keysym = keysyms::keysym_from_name(rest)
        .ok_or_else(|| AcceleratorError::UnknownKey(rest.to_string()))?;
    Ok(KeyCombo::from_keysym(keysyms::to_lower(keysym), modifiers))
}

/// Parse a modifier-only accelerator such as `<Super>`
pub fn parse_modifier(accelerator: &str) -> Result<Modifiers, AcceleratorError> {
    let combo = parse_accelerator(accelerator)?;
    if !combo.is_empty() {
        return Err(AcceleratorError::NotAModifier(accelerator.to_string()));
    }
    Ok(combo.modifiers)
}

/// Format a combo back into accelerator syntax
pub fn accelerator_name(combo: &KeyCombo) -> String {
    const MASK_TEXT: [(Modifiers, &str); 6] = [
        (Modifiers::SHIFT, "<Shift>"),
        (Modifiers::CONTROL, "<Control>"),
        (Modifiers::MOD1, "<Alt>"),
        (Modifiers::META, "<Meta>"),
        (Modifiers::SUPER, "<Super>"),
        (Modifiers::HYPER, "<Hyper>"),
    ];

    let mut name: String = MASK_TEXT
        .iter()
        .filter(|(mask, _)| combo.modifiers.contains(*mask))
        .map(|(_, text)| *text)
        .collect();

    if combo.keysym == KEY_ABOVE_TAB {
        name.push_str("Above_Tab");
    } else if combo.keysym != 0 {
        if let Some(key) = keysyms::keysym_name(keysyms::to_lower(combo.keysym)) {
            name.push_str(&key);
        }
    } else if combo.keycode != 0 {
        name.push_str(&format!("0x{:02x}", combo.keycode));
    }

    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wm::keysyms::*;

    #[test]
    fn test_parse_modifiers_and_key() {
        let combo = parse_accelerator("<Control><Alt>Delete").unwrap();
        assert_eq!(combo.keysym, KEY_DELETE);
        assert_eq!(combo.modifiers, Modifiers::CONTROL | Modifiers::MOD1);

        let combo = parse_accelerator("<Primary><shift>a").unwrap();
        assert_eq!(combo.modifiers, Modifiers::CONTROL | Modifiers::SHIFT);
        assert_eq!(combo.keysym, KEY_LOWER_A);

        let combo = parse_accelerator("<Super>A").unwrap();
        assert_eq!(combo.modifiers, Modifiers::SUPER);
        assert_eq!(combo.keysym, KEY_LOWER_A);

        let combo = parse_accelerator("<Mod4><Hyper><Meta>F1").unwrap();
        assert_eq!(combo.modifiers, Modifiers::MOD4 | Modifiers::HYPER | Modifiers::META);
        assert_eq!(combo.keysym, KEY_F1);
    }

    #[test]
    fn test_parse_special_forms() {
        assert_eq!(parse_accelerator("").unwrap(), KeyCombo::default());
        assert!(parse_accelerator("disabled").unwrap().is_empty());

        let combo = parse_accelerator("<Super>Above_Tab").unwrap();
        assert_eq!(combo.keysym, KEY_ABOVE_TAB);

        let combo = parse_accelerator("<Shift>0x26").unwrap();
        assert_eq!(combo.keycode, 0x26);
        assert_eq!(combo.keysym, 0);

        // Unknown modifiers are skipped
        let combo = parse_accelerator("<Fancy>Return").unwrap();
        assert_eq!(combo.modifiers, Modifiers::empty());
        assert_eq!(combo.keysym, KEY_RETURN);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_accelerator("<Super>NoSuchKey"),
            Err(AcceleratorError::UnknownKey("NoSuchKey".to_string()))
        );
        assert!(matches!(
            parse_accelerator("<Super"),
            Err(AcceleratorError::UnterminatedModifier(_))
        ));
        assert_eq!(parse_modifier("<Super>").unwrap(), Modifiers::SUPER);
        assert_eq!(parse_modifier("disabled").unwrap(), Modifiers::empty());
        assert!(parse_modifier("<Super>a").is_err());
    }

    #[test]
    fn test_accelerator_name() {
        let combo = KeyCombo::from_keysym(KEY_UPPER_A, Modifiers::CONTROL | Modifiers::SUPER);
        assert_eq!(accelerator_name(&combo), "<Control><Super>a");
        assert_eq!(
            accelerator_name(&parse_accelerator("<Alt>Above_Tab").unwrap()),
            "<Alt>Above_Tab"
        );
        assert_eq!(accelerator_name(&KeyCombo::from_keycode(0x26, Modifiers::empty())), "0x26");
    }
}
