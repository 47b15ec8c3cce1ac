//! Keyword expansion
//!
//! The keyword table and the Idle/Listening state machine that replaces
//! typed keywords with their expansion.

mod machine;
mod table;

pub use machine::{Limits, SubstitutionListener};
pub use table::KeywordTable;
