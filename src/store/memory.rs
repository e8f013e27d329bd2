//! In-memory credential store.
//!
//! A test double for [`CredentialStore`]: entries are inserted up front and
//! resolved from a map.  Also usable by embedders writing their own pipeline
//! tests.  Nothing here persists or encrypts; do not put real keys in it.

use std::collections::HashMap;

use async_trait::async_trait;

use super::{CredentialStore, CredentialSummary, KeyMaterial, ResolveError, SecurityContext};

#[derive(Debug)]
enum Entry {
    Key(KeyMaterial),
    WrongKind,
    Denied,
}

/// Map-backed [`CredentialStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: HashMap<String, Entry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register resolvable private-key material under `id`.
    pub fn insert(&mut self, id: impl Into<String>, material: KeyMaterial) {
        self.entries.insert(id.into(), Entry::Key(material));
    }

    /// Register an id that exists but is not a private-key credential.
    pub fn insert_wrong_kind(&mut self, id: impl Into<String>) {
        self.entries.insert(id.into(), Entry::WrongKind);
    }

    /// Register an id whose lookup is always denied.
    pub fn insert_denied(&mut self, id: impl Into<String>) {
        self.entries.insert(id.into(), Entry::Denied);
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn resolve(
        &self,
        id: &str,
        _context: &SecurityContext,
    ) -> Result<KeyMaterial, ResolveError> {
        match self.entries.get(id) {
            Some(Entry::Key(material)) => Ok(material.clone()),
            Some(Entry::WrongKind) => Err(ResolveError::WrongKind),
            Some(Entry::Denied) => Err(ResolveError::AccessDenied),
            None => Err(ResolveError::NotFound),
        }
    }

    async fn list_private_key_ids(
        &self,
        _context: &SecurityContext,
    ) -> Result<Vec<CredentialSummary>, ResolveError> {
        let mut summaries: Vec<CredentialSummary> = self
            .entries
            .iter()
            .filter_map(|(id, entry)| match entry {
                Entry::Key(material) => Some(CredentialSummary {
                    id: id.clone(),
                    label: material.label().to_string(),
                }),
                _ => None,
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_each_entry_kind() {
        let mut store = MemoryStore::new();
        store.insert("good", KeyMaterial::new("good-key", b"pem".to_vec()));
        store.insert_wrong_kind("text");
        store.insert_denied("locked");

        let ctx = SecurityContext::system();
        assert_eq!(store.resolve("good", &ctx).await.unwrap().label(), "good-key");
        assert!(matches!(
            store.resolve("text", &ctx).await,
            Err(ResolveError::WrongKind)
        ));
        assert!(matches!(
            store.resolve("locked", &ctx).await,
            Err(ResolveError::AccessDenied)
        ));
        assert!(matches!(
            store.resolve("absent", &ctx).await,
            Err(ResolveError::NotFound)
        ));
    }

    #[tokio::test]
    async fn listing_only_covers_private_keys() {
        let mut store = MemoryStore::new();
        store.insert("b", KeyMaterial::new("beta", b"pem".to_vec()));
        store.insert("a", KeyMaterial::new("alpha", b"pem".to_vec()));
        store.insert_wrong_kind("c");

        let listed = store
            .list_private_key_ids(&SecurityContext::system())
            .await
            .unwrap();
        let ids: Vec<&str> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }
}
