//! Per-user message index with best-effort persistence
//!
//! Each logged-in user owns an append-only index of the chat lines routed
//! through them. The index is queried by substring and serialized to a JSON
//! blob on logout so the history survives a reconnect. Persistence is
//! best-effort: a failed write is logged by the caller and never blocks the
//! logout path.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;

/// Append-only message index for one display name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageIndex {
    name: String,
    entries: Vec<String>,
}

impl MessageIndex {
    /// Create an empty index
    pub fn new<T: Into<String>>(name: T) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Load a previously persisted index, or start fresh
    pub fn load_or_new(dir: &Path, name: &str) -> Self {
        let path = index_path(dir, name);
        match std::fs::read(&path) {
            Ok(data) => match serde_json::from_slice::<MessageIndex>(&data) {
                Ok(index) => {
                    debug!("loaded {} indexed entries for {}", index.entries.len(), name);
                    index
                }
                Err(e) => {
                    debug!("ignoring unreadable index at {}: {}", path.display(), e);
                    Self::new(name)
                }
            },
            Err(_) => Self::new(name),
        }
    }

    /// Append a message to the index
    pub fn add(&mut self, text: &str) {
        self.entries.push(text.to_string());
    }

    /// Entries containing the term, oldest first (most recent last)
    pub fn search(&self, term: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.contains(term))
            .map(String::as_str)
            .collect()
    }

    /// Search result as a newline-joined string for the wire
    pub fn search_joined(&self, term: &str) -> String {
        self.search(term).join("\n")
    }

    /// Serialize to `<dir>/<name>.idx`
    pub fn persist(&self, dir: &Path) -> Result<()> {
        let data = serde_json::to_vec(self)?;
        std::fs::write(index_path(dir, &self.name), data)?;
        Ok(())
    }

    /// Number of indexed entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing has been indexed yet
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Index file path for a display name
///
/// Names come from the wire, so anything outside a conservative character
/// set is replaced before it can become part of a path.
fn index_path(dir: &Path, name: &str) -> PathBuf {
    let safe: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    dir.join(format!("{}.idx", safe))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_order_most_recent_last() {
        let mut index = MessageIndex::new("alice");
        index.add("good morning");
        index.add("lunch plans?");
        index.add("good night");

        let hits = index.search("good");
        assert_eq!(hits, vec!["good morning", "good night"]);
        assert_eq!(index.search_joined("good"), "good morning\ngood night");
    }

    #[test]
    fn test_search_no_matches_is_empty() {
        let mut index = MessageIndex::new("bob");
        index.add("hello");
        assert!(index.search("absent").is_empty());
        assert_eq!(index.search_joined("absent"), "");
    }

    #[test]
    fn test_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = MessageIndex::new("carol");
        index.add("the quick brown fox");
        index.add("jumped over");
        index.persist(dir.path()).unwrap();

        let reloaded = MessageIndex::load_or_new(dir.path(), "carol");
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.search("fox"), vec!["the quick brown fox"]);
    }

    #[test]
    fn test_load_missing_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let index = MessageIndex::load_or_new(dir.path(), "nobody");
        assert!(index.is_empty());
    }

    #[test]
    fn test_hostile_name_stays_in_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut index = MessageIndex::new("../../etc/passwd");
        index.add("x");
        index.persist(dir.path()).unwrap();

        // The blob landed inside the index dir, not outside it
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }
}
