//! Events module for expansion state transitions
//!
//! Structured events emitted by the substitution state machine when it is
//! activated, expands a keyword, or goes back to idle.

use serde::{Deserialize, Serialize};

/// Why the listener went back to idle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Buffer stopped being a prefix of any keyword
    NoMatch,
    /// A keyword was replaced
    Expanded,
    /// Buffer grew past the configured limit
    Overflow,
    /// No keyword completed before the activation timeout
    Timeout,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::NoMatch => write!(f, "no_match"),
            StopReason::Expanded => write!(f, "expanded"),
            StopReason::Overflow => write!(f, "overflow"),
            StopReason::Timeout => write!(f, "timeout"),
        }
    }
}

/// Events emitted by the state machine during transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpansionEvent {
    /// Trigger hotkey pressed, capture started
    Activated,

    /// A keyword was typed and replaced
    Expanded {
        keyword: String,
        replacement: String,
    },

    /// Capture stopped
    Deactivated {
        reason: StopReason,
        /// Duration in milliseconds that capture was active
        duration_ms: u64,
    },
}

impl std::fmt::Display for ExpansionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExpansionEvent::Activated => write!(f, "ACTIVATED"),
            ExpansionEvent::Expanded {
                keyword,
                replacement,
            } => write!(f, "EXPANDED ({} -> {})", keyword, replacement),
            ExpansionEvent::Deactivated {
                reason,
                duration_ms,
            } => write!(f, "DEACTIVATED ({}, {}ms)", reason, duration_ms),
        }
    }
}
