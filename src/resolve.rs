//! Batch credential resolution.
//!
//! Translates the ordered credential id list of a session into key material,
//! one independent store lookup per id.  A failed lookup never aborts the
//! rest of the batch; the caller decides afterwards whether the collected
//! failures are fatal.

use std::fmt;

use tracing::debug;

use crate::store::{CredentialStore, KeyMaterial, ResolveError, SecurityContext};

/// Outcome of resolving a single credential reference.
#[derive(Debug)]
pub struct Resolution {
    pub id: String,
    pub outcome: Result<KeyMaterial, ResolveError>,
}

/// One credential reference that did not resolve, with the reason.
#[derive(Debug)]
pub struct ResolutionFailure {
    pub id: String,
    pub error: ResolveError,
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.error)
    }
}

/// Resolve every id in `ids` against `store`, preserving input order.
pub async fn resolve_all(
    store: &dyn CredentialStore,
    context: &SecurityContext,
    ids: &[String],
) -> Vec<Resolution> {
    let mut resolutions = Vec::with_capacity(ids.len());
    for id in ids {
        let outcome = store.resolve(id, context).await;
        match &outcome {
            Ok(material) => {
                debug!(credential = %id, label = %material.label(), "credential resolved");
            }
            Err(error) => {
                debug!(credential = %id, error = %error, "credential failed to resolve");
            }
        }
        resolutions.push(Resolution {
            id: id.clone(),
            outcome,
        });
    }
    resolutions
}

/// Split a batch into usable key material and the complete failure list,
/// both in input order.
pub fn partition(resolutions: Vec<Resolution>) -> (Vec<KeyMaterial>, Vec<ResolutionFailure>) {
    let mut materials = Vec::new();
    let mut failures = Vec::new();
    for resolution in resolutions {
        match resolution.outcome {
            Ok(material) => materials.push(material),
            Err(error) => failures.push(ResolutionFailure {
                id: resolution.id,
                error,
            }),
        }
    }
    (materials, failures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn preserves_order_and_collects_every_failure() {
        let mut store = MemoryStore::new();
        store.insert("b", KeyMaterial::new("beta", b"pem".to_vec()));
        store.insert_denied("c");

        let context = SecurityContext::system();
        let resolutions =
            resolve_all(&store, &context, &ids(&["a", "b", "c", "d"])).await;

        let resolved_ids: Vec<&str> = resolutions.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(resolved_ids, ["a", "b", "c", "d"]);

        let (materials, failures) = partition(resolutions);
        assert_eq!(materials.len(), 1);
        assert_eq!(materials[0].label(), "beta");

        let failed_ids: Vec<&str> = failures.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(failed_ids, ["a", "c", "d"]);
        assert!(matches!(failures[0].error, ResolveError::NotFound));
        assert!(matches!(failures[1].error, ResolveError::AccessDenied));
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_rest() {
        let mut store = MemoryStore::new();
        store.insert("after", KeyMaterial::new("after-key", b"pem".to_vec()));

        let context = SecurityContext::system();
        let resolutions = resolve_all(&store, &context, &ids(&["missing", "after"])).await;
        let (materials, failures) = partition(resolutions);

        assert_eq!(materials.len(), 1);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].id, "missing");
    }

    #[test]
    fn failure_display_names_the_credential() {
        let failure = ResolutionFailure {
            id: "cred-missing".into(),
            error: ResolveError::NotFound,
        };
        assert_eq!(failure.to_string(), "cred-missing: credential not found");
    }
}
