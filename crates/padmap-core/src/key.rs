// Padmap Key Type
// Identifier for every source and destination control

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

include!(concat!(env!("OUT_DIR"), "/key_codes.rs"));

/// Alternative spellings accepted when parsing control names
const ALIASES: &[(&str, Key)] = &[
    ("Esc", Key::ESCAPE),
    ("Return", Key::ENTER),
    ("Control", Key::CTRL),
    ("LControl", Key::L_CTRL),
    ("RControl", Key::R_CTRL),
    ("Menu", Key::ALT),
    ("Super", Key::WIN),
    ("Caps", Key::CAPS_LOCK),
    ("Del", Key::DELETE),
    ("Ins", Key::INSERT),
    ("PgUp", Key::PAGE_UP),
    ("PgDn", Key::PAGE_DOWN),
    ("LMB", Key::L_BUTTON),
    ("RMB", Key::R_BUTTON),
    ("MMB", Key::M_BUTTON),
    ("PadLeftTrigger", Key::PAD_LT),
    ("PadRightTrigger", Key::PAD_RT),
    ("PadSelect", Key::PAD_BACK),
    ("PadHome", Key::PAD_GUIDE),
];

fn lowercase_index() -> &'static HashMap<String, Key> {
    static INDEX: OnceLock<HashMap<String, Key>> = OnceLock::new();
    INDEX.get_or_init(|| {
        let mut index = HashMap::with_capacity(BUILTIN_CONTROLS.len() + ALIASES.len());
        for &(name, code) in BUILTIN_CONTROLS {
            index.insert(name.to_ascii_lowercase(), Key(code));
        }
        for &(alias, key) in ALIASES {
            index.insert(alias.to_ascii_lowercase(), key);
        }
        index
    })
}

/// Display name for a built-in control code
pub fn key_name(code: u16) -> Option<&'static str> {
    BUILTIN_CONTROLS
        .binary_search_by_key(&code, |&(_, c)| c)
        .ok()
        .map(|i| BUILTIN_CONTROLS[i].0)
}

/// Look up a built-in control by name or alias (case-insensitive)
pub fn key_from_name(name: &str) -> Option<Key> {
    lowercase_index().get(&name.to_ascii_lowercase()).copied()
}

impl Key {
    /// Get the name of this key, if it is a built-in control
    pub fn name(self) -> Option<&'static str> {
        key_name(self.0)
    }

    /// True for the inert sentinel produced by unresolvable names
    pub fn is_unknown(self) -> bool {
        self == Key::UNKNOWN
    }

    /// True for codes in the custom control range
    pub fn is_custom(self) -> bool {
        self.0 >= Key::FIRST_CUSTOM
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None if self.is_custom() => write!(f, "Custom#{}", self.0 - Key::FIRST_CUSTOM),
            None => write!(f, "Key({:#x})", self.0),
        }
    }
}

impl FromStr for Key {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        key_from_name(s).ok_or_else(|| format!("Unknown control: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table_sorted_and_unique() {
        for pair in BUILTIN_CONTROLS.windows(2) {
            assert!(pair[0].1 < pair[1].1, "{:?} / {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_key_name_roundtrip() {
        assert_eq!(Key::A.name(), Some("A"));
        assert_eq!(Key::PAD_A.name(), Some("PadA"));
        assert_eq!(Key::L_STICK_RIGHT.name(), Some("LStickRight"));
        assert_eq!("LStickRight".parse::<Key>().unwrap(), Key::L_STICK_RIGHT);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(key_from_name("padlt"), Some(Key::PAD_LT));
        assert_eq!(key_from_name("ESCAPE"), Some(Key::ESCAPE));
    }

    #[test]
    fn test_aliases() {
        assert_eq!(key_from_name("Esc"), Some(Key::ESCAPE));
        assert_eq!(key_from_name("lmb"), Some(Key::L_BUTTON));
    }

    #[test]
    fn test_unknown_name() {
        assert!("NoSuchControl".parse::<Key>().is_err());
        assert!(Key::UNKNOWN.is_unknown());
    }

    #[test]
    fn test_display() {
        assert_eq!(Key::F12.to_string(), "F12");
        assert_eq!(Key(Key::FIRST_CUSTOM + 2).to_string(), "Custom#2");
        assert_eq!(Key(0x7).to_string(), "Key(0x7)");
    }

    #[test]
    fn test_codes() {
        assert_eq!(Key::A.code(), 0x41);
        assert_eq!(Key::KEY_0.code(), 0x30);
        assert_eq!(Key::F1.code(), 0x70);
        assert_eq!(Key::F24.code(), 0x87);
        assert_eq!(Key::PAD_D_RIGHT.code(), 0x20E);
        assert_eq!(Key::R_STICK_DOWN_RIGHT.code(), 0x22F);
    }
}
