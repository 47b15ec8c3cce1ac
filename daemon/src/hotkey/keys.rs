//! Key code definitions and the trigger binding
//!
//! Provides the fixed table of macOS ANSI virtual key codes, the
//! `KeycodeIndex` built from it, modifier state, and the `Hotkey` that
//! activates expansion.

use std::collections::HashMap;
use std::fmt;

use super::listener::HotkeyError;

/// macOS virtual key codes (kVK_ANSI_* and a few named keys): key name and
/// the character the key types on a US layout without modifiers. Keys that
/// type no character carry `None`.
pub const ANSI_KEYCODES: &[(u16, &str, Option<char>)] = &[
    (0x00, "A", Some('a')),
    (0x01, "S", Some('s')),
    (0x02, "D", Some('d')),
    (0x03, "F", Some('f')),
    (0x04, "H", Some('h')),
    (0x05, "G", Some('g')),
    (0x06, "Z", Some('z')),
    (0x07, "X", Some('x')),
    (0x08, "C", Some('c')),
    (0x09, "V", Some('v')),
    (0x0B, "B", Some('b')),
    (0x0C, "Q", Some('q')),
    (0x0D, "W", Some('w')),
    (0x0E, "E", Some('e')),
    (0x0F, "R", Some('r')),
    (0x10, "Y", Some('y')),
    (0x11, "T", Some('t')),
    (0x12, "1", Some('1')),
    (0x13, "2", Some('2')),
    (0x14, "3", Some('3')),
    (0x15, "4", Some('4')),
    (0x16, "6", Some('6')),
    (0x17, "5", Some('5')),
    (0x18, "Equal", Some('=')),
    (0x19, "9", Some('9')),
    (0x1A, "7", Some('7')),
    (0x1B, "Minus", Some('-')),
    (0x1C, "8", Some('8')),
    (0x1D, "0", Some('0')),
    (0x1E, "BracketRight", Some(']')),
    (0x1F, "O", Some('o')),
    (0x20, "U", Some('u')),
    (0x21, "BracketLeft", Some('[')),
    (0x22, "I", Some('i')),
    (0x23, "P", Some('p')),
    (0x24, "Enter", None),
    (0x25, "L", Some('l')),
    (0x26, "J", Some('j')),
    (0x27, "Quote", Some('\'')),
    (0x28, "K", Some('k')),
    (0x29, "Semicolon", Some(';')),
    (0x2A, "Backslash", Some('\\')),
    (0x2B, "Comma", Some(',')),
    (0x2C, "Slash", Some('/')),
    (0x2D, "N", Some('n')),
    (0x2E, "M", Some('m')),
    (0x2F, "Period", Some('.')),
    (0x30, "Tab", None),
    (0x31, "Space", Some(' ')),
    (0x32, "Backquote", Some('`')),
    (0x33, "Backspace", None),
    (0x35, "Escape", None),
];

/// Shifted symbols on the US layout digit row
const SHIFTED_DIGITS: &[(char, &str)] = &[
    ('!', "1"),
    ('@', "2"),
    ('#', "3"),
    ('$', "4"),
    ('%', "5"),
    ('^', "6"),
    ('&', "7"),
    ('*', "8"),
    ('(', "9"),
    (')', "0"),
];

fn ansi_name(code: u16) -> Option<&'static str> {
    ANSI_KEYCODES
        .iter()
        .find(|(c, _, _)| *c == code)
        .map(|(_, name, _)| *name)
}

/// One entry of the key code index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub name: String,
    /// Character typed by the key, `None` for keys like Enter or Tab
    pub text: Option<char>,
}

/// Read-only mapping from raw key code to key
#[derive(Debug, Clone, Default)]
pub struct KeycodeIndex {
    keys: HashMap<u16, Key>,
}

impl KeycodeIndex {
    /// Build the index from `ANSI_KEYCODES`
    pub fn ansi() -> Self {
        Self::from_keys(ANSI_KEYCODES.iter().copied())
    }

    /// Build an index from arbitrary (code, name, text) entries
    pub fn from_keys<'a>(keys: impl IntoIterator<Item = (u16, &'a str, Option<char>)>) -> Self {
        let keys = keys
            .into_iter()
            .map(|(code, name, text)| {
                (
                    code,
                    Key {
                        name: name.to_string(),
                        text,
                    },
                )
            })
            .collect();
        Self { keys }
    }

    /// Key for a raw key code, if known
    pub fn key(&self, code: u16) -> Option<&Key> {
        self.keys.get(&code)
    }

    /// Name for a raw key code, if known
    pub fn name(&self, code: u16) -> Option<&str> {
        self.key(code).map(|k| k.name.as_str())
    }

    /// Reverse lookup, case-insensitive
    pub fn code(&self, name: &str) -> Option<u16> {
        self.keys
            .iter()
            .find(|(_, k)| k.name.eq_ignore_ascii_case(name))
            .map(|(code, _)| *code)
    }

    /// True when every character of `text` is typed by a single key
    pub fn can_type(&self, text: &str) -> bool {
        text.chars()
            .all(|ch| self.keys.values().any(|k| k.text == Some(ch)))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Modifier keys held during a keydown
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub control: bool,
    pub option: bool,
    pub command: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        shift: false,
        control: false,
        option: false,
        command: false,
    };

    pub const SHIFT: Modifiers = Modifiers {
        shift: true,
        ..Modifiers::NONE
    };

    /// Control, Option or Command is held, so the key is a shortcut and
    /// not text
    pub fn is_chord(&self) -> bool {
        self.control || self.option || self.command
    }
}

impl fmt::Display for Modifiers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (held, name) in [
            (self.command, "cmd+"),
            (self.control, "ctrl+"),
            (self.option, "option+"),
            (self.shift, "shift+"),
        ] {
            if held {
                f.write_str(name)?;
            }
        }
        Ok(())
    }
}

/// A single-key global hotkey with an exact modifier set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hotkey {
    /// Raw key code
    pub keycode: u16,
    /// Modifiers that must be held, and no others
    pub modifiers: Modifiers,
}

impl Hotkey {
    /// `$` on a US layout: Shift + 4
    pub const DOLLAR: Hotkey = Hotkey {
        keycode: 0x15,
        modifiers: Modifiers::SHIFT,
    };

    /// Parse a binding such as `$`, `shift+f`, `cmd+option+k` or `tab`
    pub fn parse(text: &str, index: &KeycodeIndex) -> Result<Self, HotkeyError> {
        let text = text.trim();
        let invalid = || HotkeyError::InvalidBinding(text.to_string());

        let mut chars = text.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if let Some((_, digit)) = SHIFTED_DIGITS.iter().find(|(s, _)| *s == c) {
                let keycode = index.code(digit).ok_or_else(invalid)?;
                return Ok(Self {
                    keycode,
                    modifiers: Modifiers::SHIFT,
                });
            }
        }

        let lower = text.to_ascii_lowercase();
        let mut parts: Vec<&str> = lower.split('+').collect();
        let key = parts.pop().ok_or_else(invalid)?;
        if key.is_empty() {
            return Err(invalid());
        }

        let mut modifiers = Modifiers::NONE;
        for part in parts {
            match part {
                "shift" => modifiers.shift = true,
                "ctrl" | "control" => modifiers.control = true,
                "option" | "alt" => modifiers.option = true,
                "cmd" | "command" => modifiers.command = true,
                _ => return Err(invalid()),
            }
        }

        let keycode = index.code(key).ok_or_else(invalid)?;
        Ok(Self { keycode, modifiers })
    }

    /// Check a keydown against this binding. Extra modifiers do not match.
    pub fn matches(&self, keycode: u16, modifiers: Modifiers) -> bool {
        self.keycode == keycode && self.modifiers == modifiers
    }
}

impl Default for Hotkey {
    fn default() -> Self {
        Self::DOLLAR
    }
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.modifiers)?;
        match ansi_name(self.keycode) {
            Some(name) => write!(f, "{}", name.to_ascii_lowercase()),
            None => write!(f, "{:#04x}", self.keycode),
        }
    }
}
