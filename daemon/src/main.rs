//! swatchkey-daemon: expands typed color names into hex codes
//!
//! Press the trigger hotkey (`$` by default), type a color name such as
//! `black`, and the daemon erases the name and types `#000000` into the
//! focused application.
//!
//! Components:
//! - Global keyboard tap via CGEventTap (trigger detection and capture)
//! - Idle/Listening substitution state machine
//! - Keystroke injection through Quartz events

mod config;
mod events;
mod expansion;
mod hotkey;
mod inject;
mod lifecycle;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::ExpansionEvent;
use crate::expansion::SubstitutionListener;
use crate::hotkey::{HotkeyListener, KeycodeIndex};
use crate::inject::PlatformSink;
use crate::lifecycle::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "swatchkey-daemon starting"
    );

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        trigger = %config.trigger,
        keywords = config.keywords.len(),
        max_buffer_len = config.limits.max_buffer_len,
        timeout_ms = config.limits.timeout.as_millis() as u64,
        "configuration loaded"
    );

    if config.keywords.is_empty() {
        warn!("keyword table is empty, nothing will be expanded");
    }
    for (keyword, replacement) in config.keywords.iter() {
        debug!(keyword, replacement, "keyword registered");
    }

    let shutdown = ShutdownSignal::new();

    // Keyboard tap -> state machine
    let (hook_tx, hook_rx) = mpsc::channel(64);
    // State machine -> event log
    let (event_tx, mut event_rx) = broadcast::channel::<ExpansionEvent>(64);

    let hotkey_listener = HotkeyListener::new(hook_tx, config.trigger);

    let mut substitution = SubstitutionListener::new(
        config.keywords.clone(),
        KeycodeIndex::ansi(),
        config.limits,
        hotkey_listener.gate(),
        PlatformSink::new(),
        event_tx,
    );

    // Start the keyboard tap (runs on dedicated thread)
    match hotkey_listener.start() {
        Ok(()) => {
            info!("hotkey listener started");
        }
        Err(e) => {
            error!(?e, "failed to start hotkey listener");
            warn!("continuing without hotkey support - check Accessibility permissions");
        }
    }

    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = substitution.run(hook_rx) => {
            info!("substitution listener exited");
        }

        _ = async {
            loop {
                match event_rx.recv().await {
                    Ok(event) => info!(%event, "expansion event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "expansion event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("event logger exited");
        }

        result = shutdown.wait() => {
            match result {
                Ok(signal) => info!(?signal, "shutdown signal received"),
                Err(e) => error!(?e, "signal handling failed"),
            }
        }
    }

    info!("shutting down...");
    hotkey_listener.stop();
    info!("swatchkey-daemon stopped");

    Ok(())
}
