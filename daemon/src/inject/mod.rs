//! Synthetic keystroke injection
//!
//! Delivers backspaces and text to whichever application holds keyboard
//! focus. Only macOS has a real backend; elsewhere injection reports
//! `InjectError::Unsupported`.

#[cfg(target_os = "macos")]
mod macos;

/// Tag stored in `EVENT_SOURCE_USER_DATA` of every injected event so the
/// keyboard tap can skip them.
pub const INJECTED_MARKER: i64 = 0x5357_4b59;

/// A single synthetic keyboard action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keystroke {
    /// Press and release Backspace
    Backspace,
    /// Type the text one character at a time
    Text(String),
}

/// Consumer of synthetic keystrokes
pub trait KeystrokeSink {
    /// Inject the keystrokes in order. Blocks until they are posted.
    fn send(&mut self, keys: &[Keystroke]) -> Result<(), InjectError>;
}

/// Errors that can occur while injecting keystrokes
#[derive(Debug, thiserror::Error)]
pub enum InjectError {
    #[error("failed to create event source")]
    EventSource,

    #[error("failed to create keyboard event")]
    EventCreation,

    #[error("keystroke injection is not supported on this platform")]
    Unsupported,
}

#[cfg(target_os = "macos")]
pub use macos::CgKeystrokeSink as PlatformSink;

#[cfg(not(target_os = "macos"))]
pub use unsupported::UnsupportedSink as PlatformSink;

#[cfg(not(target_os = "macos"))]
mod unsupported {
    use super::{InjectError, Keystroke, KeystrokeSink};

    #[derive(Debug, Default)]
    pub struct UnsupportedSink;

    impl UnsupportedSink {
        pub fn new() -> Self {
            Self
        }
    }

    impl KeystrokeSink for UnsupportedSink {
        fn send(&mut self, _keys: &[Keystroke]) -> Result<(), InjectError> {
            Err(InjectError::Unsupported)
        }
    }
}
