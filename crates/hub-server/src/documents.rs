//! Hub-side registry of documents exposed by connected peers.

use cksync_protocol::DocumentRef;
use cksync_protocol::constants::MISSING_DOCUMENT;

/// One document a peer has open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEntry {
    /// Display key shown in the pipeline's document selector.
    pub key: String,
    pub document_id: String,
    /// Session that reported the document.
    pub session_id: String,
}

/// Builds the display key for a document: `"{name} ({id prefix})"`.
///
/// The prefix is the id's first dash-separated group.
pub fn combo_key(doc: &DocumentRef) -> String {
    let short = doc.id().split('-').next().unwrap_or_default();
    format!("{} ({short})", doc.name())
}

/// Display key → (document id, owning session).
#[derive(Debug, Default)]
pub struct DocumentRegistry {
    entries: Vec<DocumentEntry>,
    extra_combo: Vec<String>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces everything `session_id` previously reported with `documents`.
    ///
    /// Entries owned by other sessions are kept unless one of the new
    /// documents produces the same key, in which case the newer report
    /// wins. Pending extra combo entries are dropped.
    pub fn sync(&mut self, session_id: &str, documents: &[DocumentRef]) {
        let fresh: Vec<DocumentEntry> = documents
            .iter()
            .map(|doc| DocumentEntry {
                key: combo_key(doc),
                document_id: doc.id().to_string(),
                session_id: session_id.to_string(),
            })
            .collect();

        self.entries.retain(|e| {
            e.session_id != session_id && !fresh.iter().any(|f| f.key == e.key)
        });
        for entry in fresh {
            if let Some(existing) = self.entries.iter_mut().find(|e| e.key == entry.key) {
                *existing = entry;
            } else {
                self.entries.push(entry);
            }
        }
        self.extra_combo.clear();
    }

    /// Drops entries whose session is no longer live.
    pub fn prune(&mut self, is_live: impl Fn(&str) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| is_live(&e.session_id));
        before - self.entries.len()
    }

    /// Drops every entry owned by `session_id`.
    pub fn remove_session(&mut self, session_id: &str) -> usize {
        self.prune(|s| s != session_id)
    }

    pub fn resolve(&self, key: &str) -> Option<&DocumentEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub fn entries(&self) -> &[DocumentEntry] {
        &self.entries
    }

    /// Keys for the document selector.
    ///
    /// Never empty: with no documents and no extras it is
    /// `["Missing Document"]`.
    pub fn combo(&self) -> Vec<String> {
        let mut combo: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.key.clone())
            .chain(self.extra_combo.iter().cloned())
            .collect();
        if combo.is_empty() {
            combo.push(MISSING_DOCUMENT.to_string());
        }
        combo
    }

    /// Keeps `key` selectable even if no peer currently reports it.
    ///
    /// Returns `true` if the combo list changed.
    pub fn ensure_combo_entry(&mut self, key: &str) -> bool {
        if key == MISSING_DOCUMENT
            || self.resolve(key).is_some()
            || self.extra_combo.iter().any(|k| k == key)
        {
            return false;
        }
        self.extra_combo.push(key.to_string());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, name: &str) -> DocumentRef {
        DocumentRef::new(id, name)
    }

    #[test]
    fn combo_key_uses_first_id_group() {
        assert_eq!(
            combo_key(&doc("1a2b3c-4d5e-6f", "Untitled")),
            "Untitled (1a2b3c)"
        );
        assert_eq!(combo_key(&doc("plain", "x.kra")), "x.kra (plain)");
        assert_eq!(combo_key(&doc("", "empty")), "empty ()");
    }

    #[test]
    fn empty_registry_shows_missing_document() {
        let registry = DocumentRegistry::new();
        assert_eq!(registry.combo(), vec![MISSING_DOCUMENT.to_string()]);
    }

    #[test]
    fn sync_replaces_only_own_entries() {
        let mut registry = DocumentRegistry::new();
        registry.sync("s1", &[doc("a-1", "A"), doc("b-1", "B")]);
        registry.sync("s2", &[doc("c-1", "C")]);
        registry.sync("s1", &[doc("d-1", "D")]);

        let keys = registry.combo();
        assert_eq!(keys, vec!["C (c)".to_string(), "D (d)".to_string()]);
        assert_eq!(registry.resolve("C (c)").unwrap().session_id, "s2");
        assert!(registry.resolve("A (a)").is_none());
    }

    #[test]
    fn same_key_from_new_session_wins() {
        let mut registry = DocumentRegistry::new();
        registry.sync("old", &[doc("a-1", "A")]);
        registry.sync("new", &[doc("a-2", "A")]);

        assert_eq!(registry.entries().len(), 1);
        let entry = registry.resolve("A (a)").unwrap();
        assert_eq!(entry.session_id, "new");
        assert_eq!(entry.document_id, "a-2");
    }

    #[test]
    fn prune_drops_dead_sessions() {
        let mut registry = DocumentRegistry::new();
        registry.sync("live", &[doc("a-1", "A")]);
        registry.sync("dead", &[doc("b-1", "B")]);

        assert_eq!(registry.prune(|s| s == "live"), 1);
        assert_eq!(registry.combo(), vec!["A (a)".to_string()]);
        assert_eq!(registry.remove_session("live"), 1);
        assert_eq!(registry.combo(), vec![MISSING_DOCUMENT.to_string()]);
    }

    #[test]
    fn extra_combo_entries_until_next_sync() {
        let mut registry = DocumentRegistry::new();
        registry.sync("s1", &[doc("a-1", "A")]);

        assert!(registry.ensure_combo_entry("Old (9f)"));
        assert!(!registry.ensure_combo_entry("Old (9f)"));
        assert!(!registry.ensure_combo_entry("A (a)"));
        assert!(!registry.ensure_combo_entry(MISSING_DOCUMENT));
        assert_eq!(registry.combo(), vec!["A (a)".to_string(), "Old (9f)".to_string()]);

        registry.sync("s1", &[doc("a-1", "A")]);
        assert_eq!(registry.combo(), vec!["A (a)".to_string()]);
    }
}
