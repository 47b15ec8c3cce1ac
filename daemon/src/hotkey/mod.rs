//! Hotkey module for global keyboard event listening
//!
//! Uses macOS CGEventTap to watch keydown events: the trigger hotkey that
//! activates expansion, and the keystrokes typed while it is active.

mod keys;
mod listener;

pub use keys::{Hotkey, KeycodeIndex};
pub use listener::{HookEvent, HotkeyListener, KeyboardHook};
