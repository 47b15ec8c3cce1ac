//! Keystroke injection through Quartz event services

use core_graphics::event::{CGEvent, CGEventTapLocation, CGKeyCode, EventField};
use core_graphics::event_source::{CGEventSource, CGEventSourceStateID};
use tracing::trace;

use super::{InjectError, Keystroke, KeystrokeSink, INJECTED_MARKER};

/// kVK_Delete, the key labelled Backspace
const BACKSPACE: CGKeyCode = 0x33;

/// Posts keyboard events at the HID tap
#[derive(Debug, Default)]
pub struct CgKeystrokeSink;

impl CgKeystrokeSink {
    pub fn new() -> Self {
        Self
    }

    fn post_key(
        source: &CGEventSource,
        keycode: CGKeyCode,
        text: Option<&str>,
    ) -> Result<(), InjectError> {
        for keydown in [true, false] {
            let event = CGEvent::new_keyboard_event(source.clone(), keycode, keydown)
                .map_err(|_| InjectError::EventCreation)?;
            if let Some(text) = text {
                event.set_string(text);
            }
            event.set_integer_value_field(EventField::EVENT_SOURCE_USER_DATA, INJECTED_MARKER);
            event.post(CGEventTapLocation::HID);
        }
        Ok(())
    }
}

impl KeystrokeSink for CgKeystrokeSink {
    fn send(&mut self, keys: &[Keystroke]) -> Result<(), InjectError> {
        // Sources are not Send; build one per batch.
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|_| InjectError::EventSource)?;

        for key in keys {
            match key {
                Keystroke::Backspace => Self::post_key(&source, BACKSPACE, None)?,
                Keystroke::Text(text) => {
                    let mut buf = [0u8; 4];
                    for ch in text.chars() {
                        Self::post_key(&source, 0, Some(ch.encode_utf8(&mut buf)))?;
                    }
                }
            }
        }

        trace!(count = keys.len(), "keystrokes posted");
        Ok(())
    }
}
