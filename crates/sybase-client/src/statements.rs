//! Prepared-statement registry.
//!
//! Maps a statement identifier to the parameter format token the server
//! returned at prepare time. The format is replayed verbatim ahead of
//! the parameter data on every execute that supplies arguments.
//!
//! Entries are never evicted; the registry lives and dies with the
//! session and is cleared on reconnect, which invalidates the server
//! side of every statement anyway.

use std::collections::HashMap;

use tds5_protocol::token::ParamsFormat;

/// Registry of prepared statements for one connection.
#[derive(Debug, Default)]
pub struct StatementRegistry {
    statements: HashMap<String, ParamsFormat>,
}

impl StatementRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a prepared statement's parameter format.
    pub fn insert(&mut self, id: String, format: ParamsFormat) {
        tracing::debug!(
            statement = %id,
            params = format.params.len(),
            "registered prepared statement"
        );
        self.statements.insert(id, format);
    }

    /// Look up a statement's parameter format.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ParamsFormat> {
        self.statements.get(id)
    }

    /// Check whether a statement is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.statements.contains_key(id)
    }

    /// Drop all entries. Called when the session is re-established.
    pub fn clear(&mut self) {
        if !self.statements.is_empty() {
            tracing::debug!(count = self.statements.len(), "clearing prepared statements");
        }
        self.statements.clear();
    }

    /// Number of registered statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Check if the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let mut registry = StatementRegistry::new();
        registry.insert("stmt1".to_string(), ParamsFormat::default());

        assert!(registry.contains("stmt1"));
        assert!(registry.get("stmt1").is_some());
        assert!(registry.get("stmt2").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn insert_overwrites_previous_format() {
        let mut registry = StatementRegistry::new();
        registry.insert("stmt1".to_string(), ParamsFormat::default());
        registry.insert("stmt1".to_string(), ParamsFormat::default());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn clear_empties_the_registry() {
        let mut registry = StatementRegistry::new();
        registry.insert("stmt1".to_string(), ParamsFormat::default());
        registry.clear();
        assert!(registry.is_empty());
    }
}
