//! Substitution state machine
//!
//! Idle until the trigger hotkey fires, then Listening: each keydown is
//! turned into the character it types, appended to the buffer and checked
//! against the keyword table. An exact keyword is erased with backspaces and replaced;
//! anything that stops being a keyword prefix sends the machine back to Idle.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::events::{ExpansionEvent, StopReason};
use crate::hotkey::{HookEvent, KeyboardHook, KeycodeIndex};
use crate::inject::{Keystroke, KeystrokeSink};

use super::table::KeywordTable;

/// The two states of the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerState {
    /// Waiting for the trigger hotkey
    #[default]
    Idle,
    /// Capturing keystrokes
    Listening,
}

impl std::fmt::Display for ListenerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ListenerState::Idle => write!(f, "Idle"),
            ListenerState::Listening => write!(f, "Listening"),
        }
    }
}

/// Bounds that force a listening cycle to end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum buffered characters
    pub max_buffer_len: usize,
    /// Maximum time between activation and a match
    pub timeout: Duration,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_buffer_len: 32,
            timeout: Duration::from_millis(5000),
        }
    }
}

/// Keystrokes that erase `typed` characters and type `replacement` in their place
pub fn keystrokes_for(typed: usize, replacement: &str) -> Vec<Keystroke> {
    let mut keys = vec![Keystroke::Backspace; typed];
    keys.push(Keystroke::Text(replacement.to_string()));
    keys
}

/// Hotkey-triggered keyword listener
pub struct SubstitutionListener<H, S> {
    state: ListenerState,
    buffer: String,
    /// Keystrokes appended to the buffer this cycle
    typed: usize,
    table: KeywordTable,
    index: KeycodeIndex,
    limits: Limits,
    hook: H,
    sink: S,
    /// Time when the current listening cycle began
    activated_at: Option<Instant>,
    event_tx: broadcast::Sender<ExpansionEvent>,
}

impl<H: KeyboardHook, S: KeystrokeSink> SubstitutionListener<H, S> {
    /// Create a new listener in the Idle state
    pub fn new(
        table: KeywordTable,
        index: KeycodeIndex,
        limits: Limits,
        hook: H,
        sink: S,
        event_tx: broadcast::Sender<ExpansionEvent>,
    ) -> Self {
        Self {
            state: ListenerState::Idle,
            buffer: String::new(),
            typed: 0,
            table,
            index,
            limits,
            hook,
            sink,
            activated_at: None,
            event_tx,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Run the listener, processing key events until the channel closes
    pub async fn run(&mut self, mut hook_rx: mpsc::Receiver<HookEvent>) {
        info!(keywords = self.table.len(), "substitution listener started in Idle state");

        loop {
            let deadline = self.deadline();
            let event = tokio::select! {
                event = hook_rx.recv() => event,
                _ = wait_until(deadline) => {
                    self.expire();
                    continue;
                }
            };

            match event {
                Some(HookEvent::Trigger) => self.activate(),
                Some(HookEvent::KeyDown(keycode)) => self.on_key_down(keycode),
                Some(HookEvent::Chord) => self.on_chord(),
                Some(HookEvent::TapDisabled) => {
                    warn!("keyboard tap was disabled, keystrokes may have been missed");
                }
                None => break,
            }
        }

        if self.state == ListenerState::Listening {
            self.hook.stop();
        }
        info!("substitution listener stopped");
    }

    /// Start a listening cycle. While already listening only the buffer and
    /// the deadline are reset; the hook is not started twice.
    pub fn activate(&mut self) {
        self.buffer.clear();
        self.typed = 0;
        self.activated_at = Some(Instant::now());

        if self.state == ListenerState::Listening {
            debug!("trigger pressed while listening, buffer reset");
            return;
        }

        self.hook.start();
        self.state = ListenerState::Listening;
        info!(from = %ListenerState::Idle, to = %self.state, "listener activated");
        self.emit(ExpansionEvent::Activated);
    }

    /// Handle one captured keydown
    pub fn on_key_down(&mut self, keycode: u16) {
        if self.state == ListenerState::Idle {
            trace!(keycode, "key ignored while idle");
            return;
        }

        if self.deadline().is_some_and(|d| Instant::now() >= d) {
            self.deactivate(StopReason::Timeout);
            return;
        }

        let Some(key) = self.index.key(keycode) else {
            debug!(keycode, "unmapped key code ignored");
            return;
        };
        let Some(ch) = key.text else {
            debug!(key = %key.name, "non-text key ends capture");
            self.deactivate(StopReason::NoMatch);
            return;
        };
        self.buffer.extend(ch.to_lowercase());
        self.typed += 1;
        debug!(keycode, buffer = %self.buffer, "key appended");

        if self.buffer.chars().count() > self.limits.max_buffer_len {
            self.deactivate(StopReason::Overflow);
            return;
        }

        self.evaluate();
    }

    /// Check the buffer against the keyword table.
    ///
    /// Returns true while the buffer is still a prefix of some keyword. An
    /// exact keyword is substituted and ends the cycle; a dead prefix ends
    /// it without injecting anything.
    pub fn evaluate(&mut self) -> bool {
        if let Some(replacement) = self.table.get(&self.buffer).map(str::to_owned) {
            let keyword = std::mem::take(&mut self.buffer);
            self.substitute(&keyword, &replacement);
            return false;
        }

        if self.table.is_live_prefix(&self.buffer) {
            return true;
        }

        self.deactivate(StopReason::NoMatch);
        false
    }

    /// A Control/Option/Command shortcut is never part of a keyword
    pub fn on_chord(&mut self) {
        if self.state == ListenerState::Listening {
            debug!("shortcut pressed while listening");
            self.deactivate(StopReason::NoMatch);
        }
    }

    /// End the cycle when the deadline passes with no keystrokes
    pub fn expire(&mut self) {
        self.deactivate(StopReason::Timeout);
    }

    /// Stop capturing and return to Idle
    pub fn deactivate(&mut self, reason: StopReason) {
        if self.state == ListenerState::Idle {
            return;
        }

        self.hook.stop();
        let duration_ms = self
            .activated_at
            .take()
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.buffer.clear();
        self.typed = 0;
        self.state = ListenerState::Idle;

        info!(%reason, duration_ms, "listener deactivated");
        self.emit(ExpansionEvent::Deactivated {
            reason,
            duration_ms,
        });
    }

    fn substitute(&mut self, keyword: &str, replacement: &str) {
        // Capture must be off before injecting, or the tap would feed our
        // own backspaces back in.
        self.hook.stop();

        let keys = keystrokes_for(self.typed, replacement);
        match self.sink.send(&keys) {
            Ok(()) => info!(keyword, replacement, "keyword expanded"),
            Err(e) => warn!(?e, keyword, "keystroke injection failed"),
        }

        self.emit(ExpansionEvent::Expanded {
            keyword: keyword.to_string(),
            replacement: replacement.to_string(),
        });
        self.deactivate(StopReason::Expanded);
    }

    fn deadline(&self) -> Option<Instant> {
        match self.state {
            ListenerState::Listening => self.activated_at.map(|t| t + self.limits.timeout),
            ListenerState::Idle => None,
        }
    }

    fn emit(&self, event: ExpansionEvent) {
        debug!(%event, "emitting event");
        let _ = self.event_tx.send(event);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inject::InjectError;

    const B: u16 = 0x0B;
    const L: u16 = 0x25;
    const A: u16 = 0x00;
    const C: u16 = 0x08;
    const K: u16 = 0x28;
    const X: u16 = 0x07;
    const Y: u16 = 0x10;
    const Z: u16 = 0x06;

    #[derive(Default)]
    struct FakeHook {
        starts: usize,
        capturing: bool,
    }

    impl KeyboardHook for FakeHook {
        fn start(&mut self) {
            self.starts += 1;
            self.capturing = true;
        }

        fn stop(&mut self) {
            self.capturing = false;
        }

        fn is_capturing(&self) -> bool {
            self.capturing
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        batches: Vec<Vec<Keystroke>>,
        fail: bool,
    }

    impl KeystrokeSink for RecordingSink {
        fn send(&mut self, keys: &[Keystroke]) -> Result<(), InjectError> {
            self.batches.push(keys.to_vec());
            if self.fail {
                Err(InjectError::EventCreation)
            } else {
                Ok(())
            }
        }
    }

    type TestListener = SubstitutionListener<FakeHook, RecordingSink>;

    fn create_listener_with(
        limits: Limits,
    ) -> (TestListener, broadcast::Receiver<ExpansionEvent>) {
        let (tx, rx) = broadcast::channel(16);
        let listener = SubstitutionListener::new(
            KeywordTable::with_defaults(),
            KeycodeIndex::ansi(),
            limits,
            FakeHook::default(),
            RecordingSink::default(),
            tx,
        );
        (listener, rx)
    }

    fn create_listener() -> (TestListener, broadcast::Receiver<ExpansionEvent>) {
        create_listener_with(Limits::default())
    }

    fn drain(rx: &mut broadcast::Receiver<ExpansionEvent>) -> Vec<ExpansionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn stop_reasons(events: &[ExpansionEvent]) -> Vec<StopReason> {
        events
            .iter()
            .filter_map(|e| match e {
                ExpansionEvent::Deactivated { reason, .. } => Some(*reason),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_initial_state_is_idle() {
        let (listener, _) = create_listener();
        assert_eq!(listener.state(), ListenerState::Idle);
        assert!(!listener.hook.is_capturing());
    }

    #[test]
    fn test_keys_ignored_without_trigger() {
        let (mut listener, mut rx) = create_listener();

        for code in [B, L, A, C, K] {
            listener.on_key_down(code);
        }

        assert_eq!(listener.state(), ListenerState::Idle);
        assert_eq!(listener.buffer(), "");
        assert_eq!(listener.hook.starts, 0);
        assert!(listener.sink.batches.is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_black_is_expanded() {
        let (mut listener, mut rx) = create_listener();

        listener.activate();
        for code in [B, L, A, C] {
            listener.on_key_down(code);
            assert_eq!(listener.state(), ListenerState::Listening);
        }
        assert_eq!(listener.buffer(), "blac");
        listener.on_key_down(K);

        assert_eq!(listener.state(), ListenerState::Idle);
        assert!(!listener.hook.is_capturing());
        assert_eq!(listener.sink.batches.len(), 1);

        let batch = &listener.sink.batches[0];
        assert_eq!(batch.len(), 6);
        assert!(batch[..5].iter().all(|k| *k == Keystroke::Backspace));
        assert_eq!(batch[5], Keystroke::Text("#000000".into()));

        let events = drain(&mut rx);
        assert_eq!(events[0], ExpansionEvent::Activated);
        assert_eq!(
            events[1],
            ExpansionEvent::Expanded {
                keyword: "black".into(),
                replacement: "#000000".into(),
            }
        );
        assert_eq!(stop_reasons(&events), vec![StopReason::Expanded]);
    }

    #[test]
    fn test_non_prefix_deactivates_on_first_key() {
        let (mut listener, mut rx) = create_listener();

        listener.activate();
        listener.on_key_down(X);
        assert_eq!(listener.state(), ListenerState::Idle);
        assert!(!listener.hook.is_capturing());

        // later keys are not observed
        listener.on_key_down(Y);
        listener.on_key_down(Z);
        assert_eq!(listener.buffer(), "");
        assert!(listener.sink.batches.is_empty());

        let events = drain(&mut rx);
        assert_eq!(stop_reasons(&events), vec![StopReason::NoMatch]);
    }

    #[test]
    fn test_substring_that_is_not_prefix_is_dead() {
        let (mut listener, _) = create_listener();

        listener.activate();
        listener.on_key_down(L);
        assert_eq!(listener.state(), ListenerState::Idle);
        assert!(listener.sink.batches.is_empty());
    }

    #[test]
    fn test_unknown_keycode_leaves_buffer_unchanged() {
        let (mut listener, _) = create_listener();

        listener.activate();
        listener.on_key_down(B);
        listener.on_key_down(0x7F);
        listener.on_key_down(0xFFFF);

        assert_eq!(listener.buffer(), "b");
        assert_eq!(listener.state(), ListenerState::Listening);
        assert!(!listener.buffer().contains("undefined"));
    }

    #[test]
    fn test_activate_twice_starts_hook_once() {
        let (mut listener, mut rx) = create_listener();

        listener.activate();
        listener.on_key_down(B);
        listener.activate();

        assert_eq!(listener.hook.starts, 1);
        assert_eq!(listener.buffer(), "");
        assert_eq!(listener.state(), ListenerState::Listening);

        let activations = drain(&mut rx)
            .into_iter()
            .filter(|e| *e == ExpansionEvent::Activated)
            .count();
        assert_eq!(activations, 1);

        for code in [B, L, A, C, K] {
            listener.on_key_down(code);
        }
        assert_eq!(listener.sink.batches.len(), 1);
    }

    #[test]
    fn test_reactivate_after_idle_restarts_hook() {
        let (mut listener, _) = create_listener();

        listener.activate();
        listener.on_key_down(X);
        listener.activate();

        assert_eq!(listener.hook.starts, 2);
        assert!(listener.hook.is_capturing());
    }

    #[test]
    fn test_overflow_deactivates() {
        let mut table = KeywordTable::new();
        table.insert("blackberry", "#3b2f4a").unwrap();
        let (tx, mut rx) = broadcast::channel(16);
        let mut listener = SubstitutionListener::new(
            table,
            KeycodeIndex::ansi(),
            Limits {
                max_buffer_len: 3,
                ..Limits::default()
            },
            FakeHook::default(),
            RecordingSink::default(),
            tx,
        );

        listener.activate();
        for code in [B, L, A, C] {
            listener.on_key_down(code);
        }

        assert_eq!(listener.state(), ListenerState::Idle);
        assert_eq!(stop_reasons(&drain(&mut rx)), vec![StopReason::Overflow]);
    }

    #[test]
    fn test_timeout_checked_on_keydown() {
        let (mut listener, mut rx) = create_listener_with(Limits {
            timeout: Duration::ZERO,
            ..Limits::default()
        });

        listener.activate();
        listener.on_key_down(B);

        assert_eq!(listener.state(), ListenerState::Idle);
        assert_eq!(listener.buffer(), "");
        assert_eq!(stop_reasons(&drain(&mut rx)), vec![StopReason::Timeout]);
    }

    #[test]
    fn test_injection_failure_still_returns_to_idle() {
        let (mut listener, mut rx) = create_listener();
        listener.sink.fail = true;

        listener.activate();
        for code in [B, L, A, C, K] {
            listener.on_key_down(code);
        }

        assert_eq!(listener.state(), ListenerState::Idle);
        assert_eq!(listener.sink.batches.len(), 1);
        assert_eq!(stop_reasons(&drain(&mut rx)), vec![StopReason::Expanded]);
    }

    #[test]
    fn test_evaluate_reports_liveness() {
        let (mut listener, _) = create_listener();

        listener.activate();
        listener.buffer.push_str("bla");
        assert!(listener.evaluate());

        listener.buffer.push_str("z");
        assert!(!listener.evaluate());
        assert_eq!(listener.state(), ListenerState::Idle);
    }

    #[test]
    fn test_deactivate_when_idle_is_noop() {
        let (mut listener, mut rx) = create_listener();
        listener.deactivate(StopReason::NoMatch);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_keystrokes_for() {
        let keys = keystrokes_for(4, "#00ff00");
        assert_eq!(keys.len(), 5);
        assert!(keys[..4].iter().all(|k| *k == Keystroke::Backspace));
        assert_eq!(keys[4], Keystroke::Text("#00ff00".into()));
    }

    fn listener_for(keyword: &str, replacement: &str) -> TestListener {
        let mut table = KeywordTable::new();
        table.insert(keyword, replacement).unwrap();
        let (tx, _) = broadcast::channel(16);
        SubstitutionListener::new(
            table,
            KeycodeIndex::ansi(),
            Limits::default(),
            FakeHook::default(),
            RecordingSink::default(),
            tx,
        )
    }

    #[test]
    fn test_backspaces_match_keystrokes_typed() {
        const SPACE: u16 = 0x31;
        const G: u16 = 0x05;
        const R: u16 = 0x0F;
        let mut listener = listener_for("space gray", "#717378");

        listener.activate();
        for code in [0x01, 0x23, A, C, 0x0E, SPACE, G, R, A, Y] {
            listener.on_key_down(code);
        }

        assert_eq!(listener.sink.batches.len(), 1);
        let batch = &listener.sink.batches[0];
        let backspaces = batch.iter().filter(|k| **k == Keystroke::Backspace).count();
        assert_eq!(backspaces, 10);
        assert_eq!(batch.last(), Some(&Keystroke::Text("#717378".into())));
    }

    #[test]
    fn test_named_key_cannot_spell_keyword() {
        // Space types " ", never the letters of its name
        let mut listener = listener_for("spacegray", "#717378");

        listener.activate();
        listener.on_key_down(0x31);

        assert_eq!(listener.state(), ListenerState::Idle);
        assert!(listener.sink.batches.is_empty());
    }

    #[test]
    fn test_non_text_key_ends_capture() {
        let (mut listener, mut rx) = create_listener();

        listener.activate();
        listener.on_key_down(B);
        listener.on_key_down(0x30);

        assert_eq!(listener.state(), ListenerState::Idle);
        assert_eq!(stop_reasons(&drain(&mut rx)), vec![StopReason::NoMatch]);
    }

    #[test]
    fn test_chord_ends_capture_without_injecting() {
        let (mut listener, mut rx) = create_listener();

        listener.activate();
        for code in [B, L, A, C] {
            listener.on_key_down(code);
        }
        // Cmd+K arrives as a chord, not as the final letter
        listener.on_chord();
        listener.on_key_down(K);

        assert_eq!(listener.state(), ListenerState::Idle);
        assert!(listener.sink.batches.is_empty());
        assert_eq!(stop_reasons(&drain(&mut rx)), vec![StopReason::NoMatch]);
    }

    #[test]
    fn test_chord_while_idle_is_ignored() {
        let (mut listener, mut rx) = create_listener();
        listener.on_chord();
        assert_eq!(listener.state(), ListenerState::Idle);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_run_processes_channel_events() {
        let (mut listener, mut rx) = create_listener();
        let (tx, hook_rx) = mpsc::channel(16);

        tokio_test::block_on(async {
            tx.send(HookEvent::Trigger).await.unwrap();
            for code in [B, L, A, C, K] {
                tx.send(HookEvent::KeyDown(code)).await.unwrap();
            }
            drop(tx);
            listener.run(hook_rx).await;
        });

        assert_eq!(listener.state(), ListenerState::Idle);
        assert_eq!(listener.sink.batches.len(), 1);
        assert_eq!(stop_reasons(&drain(&mut rx)), vec![StopReason::Expanded]);
    }

    #[test]
    fn test_run_expires_idle_cycle() {
        let (mut listener, mut rx) = create_listener_with(Limits {
            timeout: Duration::from_millis(10),
            ..Limits::default()
        });
        let (tx, hook_rx) = mpsc::channel(16);

        tokio_test::block_on(async {
            tx.send(HookEvent::Trigger).await.unwrap();
            let close = async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                drop(tx);
            };
            tokio::join!(listener.run(hook_rx), close);
        });

        assert_eq!(listener.state(), ListenerState::Idle);
        assert!(!listener.hook.is_capturing());
        assert!(listener.sink.batches.is_empty());
        assert_eq!(stop_reasons(&drain(&mut rx)), vec![StopReason::Timeout]);
    }
}
