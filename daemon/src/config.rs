//! Configuration loading and management

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::expansion::{KeywordTable, Limits};
use crate::hotkey::{Hotkey, KeycodeIndex};

const TRIGGER_VAR: &str = "SWATCHKEY_TRIGGER";
const MAX_BUFFER_VAR: &str = "SWATCHKEY_MAX_BUFFER";
const TIMEOUT_VAR: &str = "SWATCHKEY_TIMEOUT_MS";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory for user data
    pub data_dir: PathBuf,

    /// Optional JSON file extending the built-in keywords
    pub keywords_path: PathBuf,

    /// Hotkey that starts a listening cycle
    pub trigger: Hotkey,

    /// Buffer and timeout bounds for a listening cycle
    pub limits: Limits,

    /// Keyword to replacement mapping
    pub keywords: KeywordTable,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let home = std::env::var("HOME").context("HOME is not set")?;
        Self::load_from(Path::new(&home), |name| std::env::var(name).ok())
    }

    /// Load configuration rooted at `home`, reading overrides through `var`
    pub fn load_from(home: &Path, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = home.join(".local").join("share").join("swatchkey");
        let keywords_path = data_dir.join("keywords.json");

        let index = KeycodeIndex::ansi();
        let trigger = match var(TRIGGER_VAR) {
            Some(binding) => Hotkey::parse(&binding, &index)
                .with_context(|| format!("invalid {TRIGGER_VAR}"))?,
            None => Hotkey::default(),
        };

        let defaults = Limits::default();
        let max_buffer_len = match var(MAX_BUFFER_VAR) {
            Some(v) => v
                .parse::<usize>()
                .with_context(|| format!("invalid {MAX_BUFFER_VAR}: {v:?}"))?,
            None => defaults.max_buffer_len,
        };
        let timeout = match var(TIMEOUT_VAR) {
            Some(v) => Duration::from_millis(
                v.parse::<u64>()
                    .with_context(|| format!("invalid {TIMEOUT_VAR}: {v:?}"))?,
            ),
            None => defaults.timeout,
        };

        let mut keywords = KeywordTable::with_defaults();
        if keywords_path.exists() {
            keywords
                .extend_from_file(&keywords_path)
                .with_context(|| format!("failed to load {}", keywords_path.display()))?;
        }
        if let Some((keyword, _)) = keywords.iter().find(|(k, _)| !index.can_type(k)) {
            bail!(
                "keyword {keyword:?} in {} cannot be typed one key per character",
                keywords_path.display()
            );
        }

        Ok(Self {
            data_dir,
            keywords_path,
            trigger,
            limits: Limits {
                max_buffer_len,
                timeout,
            },
            keywords,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}
