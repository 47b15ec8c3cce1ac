//! Keyword table: lowercase keyword to replacement text

use std::collections::BTreeMap;
use std::path::Path;

/// Errors raised while building the keyword table
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("keyword must not be empty")]
    EmptyKeyword,

    #[error("replacement for {0:?} must not be empty")]
    EmptyReplacement(String),

    #[error("failed to read keywords file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid keywords file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Static mapping from keyword to replacement, fixed once the daemon starts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordTable {
    entries: BTreeMap<String, String>,
}

impl KeywordTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Table with the built-in color names
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table.entries.insert("black".to_string(), "#000000".to_string());
        table
    }

    /// Add or replace an entry. The keyword is stored lowercase.
    pub fn insert(&mut self, keyword: &str, replacement: &str) -> Result<(), TableError> {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            return Err(TableError::EmptyKeyword);
        }
        if replacement.is_empty() {
            return Err(TableError::EmptyReplacement(keyword));
        }
        self.entries.insert(keyword, replacement.to_string());
        Ok(())
    }

    /// Merge a JSON object of `keyword -> replacement` into the table
    pub fn extend_from_file(&mut self, path: &Path) -> Result<usize, TableError> {
        let text = std::fs::read_to_string(path)?;
        self.extend_from_json(&text)
    }

    /// Merge entries from JSON text, returning how many were read
    pub fn extend_from_json(&mut self, text: &str) -> Result<usize, TableError> {
        let parsed: BTreeMap<String, String> = serde_json::from_str(text)?;
        for (keyword, replacement) in &parsed {
            self.insert(keyword, replacement)?;
        }
        Ok(parsed.len())
    }

    /// Replacement for an exact keyword
    pub fn get(&self, keyword: &str) -> Option<&str> {
        self.entries.get(keyword).map(String::as_str)
    }

    /// True when some keyword starts with `buffer`
    pub fn is_live_prefix(&self, buffer: &str) -> bool {
        // BTreeMap keys are sorted, so the first key >= buffer is the only
        // candidate that can start with it.
        self.entries
            .range(buffer.to_string()..)
            .next()
            .is_some_and(|(key, _)| key.starts_with(buffer))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let table = KeywordTable::with_defaults();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("black"), Some("#000000"));
    }

    #[test]
    fn test_prefix_liveness() {
        let table = KeywordTable::with_defaults();
        assert!(table.is_live_prefix(""));
        assert!(table.is_live_prefix("b"));
        assert!(table.is_live_prefix("blac"));
        assert!(table.is_live_prefix("black"));
        assert!(!table.is_live_prefix("blacks"));
        // a substring that is not a prefix is dead
        assert!(!table.is_live_prefix("lack"));
        assert!(!table.is_live_prefix("x"));
    }

    #[test]
    fn test_prefix_liveness_with_neighbours() {
        let mut table = KeywordTable::new();
        table.insert("blue", "#0000ff").unwrap();
        table.insert("black", "#000000").unwrap();
        table.insert("brown", "#a52a2a").unwrap();

        assert!(table.is_live_prefix("bl"));
        assert!(table.is_live_prefix("blu"));
        assert!(table.is_live_prefix("br"));
        assert!(!table.is_live_prefix("bla1"));
        assert!(!table.is_live_prefix("c"));
    }

    #[test]
    fn test_insert_lowercases_and_validates() {
        let mut table = KeywordTable::new();
        table.insert("  White ", "#ffffff").unwrap();
        assert_eq!(table.get("white"), Some("#ffffff"));

        assert!(matches!(table.insert(" ", "#fff"), Err(TableError::EmptyKeyword)));
        assert!(matches!(
            table.insert("red", ""),
            Err(TableError::EmptyReplacement(k)) if k == "red"
        ));
    }

    #[test]
    fn test_extend_from_json() {
        let mut table = KeywordTable::with_defaults();
        let read = table
            .extend_from_json(r##"{"White": "#ffffff", "black": "#111111"}"##)
            .unwrap();
        assert_eq!(read, 2);
        assert_eq!(table.get("white"), Some("#ffffff"));
        assert_eq!(table.get("black"), Some("#111111"));
    }

    #[test]
    fn test_extend_rejects_bad_json() {
        let mut table = KeywordTable::with_defaults();
        assert!(matches!(
            table.extend_from_json("[1, 2]"),
            Err(TableError::Parse(_))
        ));
        assert!(matches!(
            table.extend_from_file(Path::new("/nonexistent/keywords.json")),
            Err(TableError::Io(_))
        ));
    }
}
