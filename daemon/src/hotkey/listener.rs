//! Global keyboard listener using macOS CGEventTap
//!
//! Watches system-wide keydown events. The trigger hotkey is always
//! reported and swallowed; other keys are forwarded only while the capture
//! gate is open. Runs on a dedicated thread with its own CFRunLoop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tracing::{error, info};

use super::keys::{Hotkey, Modifiers};

/// Events sent from the keyboard listener to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    /// The trigger hotkey was pressed
    Trigger,
    /// A key was pressed while capture was on
    KeyDown(u16),
    /// A Control, Option or Command shortcut was pressed while capture was on
    Chord,
    /// Event tap was disabled by macOS and re-enabled
    TapDisabled,
}

/// Start/stop control over keydown capture
pub trait KeyboardHook {
    /// Begin forwarding keydowns. Calling it while started has no effect.
    fn start(&mut self);
    /// Stop forwarding keydowns
    fn stop(&mut self);
    fn is_capturing(&self) -> bool;
}

/// Shared flag deciding whether the tap forwards ordinary keydowns.
///
/// Closed at construction, so nothing is intercepted until the first
/// activation.
#[derive(Debug, Clone, Default)]
pub struct CaptureGate {
    open: Arc<AtomicBool>,
}

impl CaptureGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

impl KeyboardHook for CaptureGate {
    fn start(&mut self) {
        self.open.store(true, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn is_capturing(&self) -> bool {
        self.is_open()
    }
}

/// Global keyboard listener feeding the substitution state machine
pub struct HotkeyListener {
    event_tx: mpsc::Sender<HookEvent>,
    trigger: Hotkey,
    gate: CaptureGate,
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    /// Create a new listener for the given trigger
    pub fn new(event_tx: mpsc::Sender<HookEvent>, trigger: Hotkey) -> Self {
        Self {
            event_tx,
            trigger,
            gate: CaptureGate::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle to the capture gate, for the state machine to toggle
    pub fn gate(&self) -> CaptureGate {
        self.gate.clone()
    }

    /// Start the listener
    ///
    /// Spawns a dedicated thread that runs a CFRunLoop to receive
    /// CGEventTap callbacks. The listener runs until `stop()` is called
    /// or the program exits.
    pub fn start(&self) -> Result<(), HotkeyError> {
        if !cfg!(target_os = "macos") {
            return Err(HotkeyError::Unsupported);
        }

        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        let event_tx = self.event_tx.clone();
        let trigger = self.trigger;
        let gate = self.gate.clone();
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");

                if let Err(e) = platform::run_event_loop(event_tx, trigger, gate, running.clone())
                {
                    error!(?e, "hotkey listener error");
                }

                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                HotkeyError::ThreadSpawn(e.to_string())
            })?;

        Ok(())
    }

    /// Stop the listener
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        platform::wake();
    }

    /// Check if the listener is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Errors that can occur in the keyboard listener
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("invalid hotkey binding: {0:?}")]
    InvalidBinding(String),

    #[error("global keyboard capture is not supported on this platform")]
    Unsupported,
}

/// Decide what a raw keydown from the tap means to the state machine
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn classify(
    keycode: u16,
    modifiers: Modifiers,
    injected: bool,
    trigger: &Hotkey,
    gate: &CaptureGate,
) -> Option<HookEvent> {
    if injected {
        None
    } else if trigger.matches(keycode, modifiers) {
        Some(HookEvent::Trigger)
    } else if !gate.is_open() {
        None
    } else if modifiers.is_chord() {
        Some(HookEvent::Chord)
    } else {
        Some(HookEvent::KeyDown(keycode))
    }
}

/// The trigger keystroke is consumed by the tap and never reaches the
/// focused application.
#[cfg_attr(not(target_os = "macos"), allow(dead_code))]
fn swallows(keycode: u16, modifiers: Modifiers, injected: bool, trigger: &Hotkey) -> bool {
    !injected && trigger.matches(keycode, modifiers)
}

#[cfg(target_os = "macos")]
mod platform {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
    use core_graphics::event::{
        CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
        CGEventTapPlacement, CGEventTapProxy, CGEventType, EventField,
    };
    use tokio::sync::mpsc;
    use tracing::{debug, error, info, warn};

    use super::{classify, swallows, CaptureGate, HookEvent, HotkeyError};
    use crate::hotkey::keys::{Hotkey, Modifiers};
    use crate::inject::INJECTED_MARKER;

    /// Raw data copied out of the tap callback
    enum TapEvent {
        Key {
            keycode: u16,
            modifiers: Modifiers,
            injected: bool,
        },
        Disabled,
    }

    fn modifiers_from(flags: CGEventFlags) -> Modifiers {
        Modifiers {
            shift: flags.contains(CGEventFlags::CGEventFlagShift),
            control: flags.contains(CGEventFlags::CGEventFlagControl),
            option: flags.contains(CGEventFlags::CGEventFlagAlternate),
            command: flags.contains(CGEventFlags::CGEventFlagCommand),
        }
    }

    pub(super) fn wake() {
        CFRunLoop::get_main().stop();
    }

    /// Run the CFRunLoop with the event tap
    pub(super) fn run_event_loop(
        event_tx: mpsc::Sender<HookEvent>,
        trigger: Hotkey,
        gate: CaptureGate,
        running: Arc<AtomicBool>,
    ) -> Result<(), HotkeyError> {
        let (callback_tx, callback_rx) = std::sync::mpsc::channel::<TapEvent>();

        // CGEventTap callback - must be fast and non-blocking
        let callback = move |_proxy: CGEventTapProxy,
                             event_type: CGEventType,
                             event: &CGEvent|
              -> Option<CGEvent> {
            match event_type {
                CGEventType::KeyDown => {
                    let keycode =
                        event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16;
                    let modifiers = modifiers_from(event.get_flags());
                    let injected = event
                        .get_integer_value_field(EventField::EVENT_SOURCE_USER_DATA)
                        == INJECTED_MARKER;
                    let _ = callback_tx.send(TapEvent::Key {
                        keycode,
                        modifiers,
                        injected,
                    });
                    if swallows(keycode, modifiers, injected, &trigger) {
                        return None;
                    }
                }
                CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                    let _ = callback_tx.send(TapEvent::Disabled);
                }
                _ => {}
            }
            Some(event.clone())
        };

        let tap = CGEventTap::new(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::Default,
            vec![CGEventType::KeyDown],
            callback,
        )
        .map_err(|_| {
            error!("failed to create event tap - is Accessibility permission granted?");
            HotkeyError::EventTapCreation
        })?;

        tap.enable();

        let run_loop_source = tap
            .mach_port
            .create_runloop_source(0)
            .map_err(|_| HotkeyError::EventTapCreation)?;
        let run_loop = CFRunLoop::get_current();

        unsafe {
            run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
        }

        info!(%trigger, "event tap created and enabled");

        while running.load(Ordering::SeqCst) {
            unsafe {
                CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
            }

            while let Ok(raw) = callback_rx.try_recv() {
                let event = match raw {
                    TapEvent::Key {
                        keycode,
                        modifiers,
                        injected,
                    } => match classify(keycode, modifiers, injected, &trigger, &gate) {
                        Some(event) => event,
                        None => continue,
                    },
                    TapEvent::Disabled => {
                        warn!("event tap disabled, re-enabling");
                        tap.enable();
                        HookEvent::TapDisabled
                    }
                };

                debug!(?event, "forwarding key event");
                if event_tx.blocking_send(event).is_err() {
                    warn!("failed to send key event - channel closed?");
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

#[cfg(not(target_os = "macos"))]
mod platform {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use tokio::sync::mpsc;

    use super::{CaptureGate, HookEvent, HotkeyError};
    use crate::hotkey::keys::Hotkey;

    pub(super) fn wake() {}

    pub(super) fn run_event_loop(
        _event_tx: mpsc::Sender<HookEvent>,
        _trigger: Hotkey,
        _gate: CaptureGate,
        _running: Arc<AtomicBool>,
    ) -> Result<(), HotkeyError> {
        Err(HotkeyError::Unsupported)
    }
}
