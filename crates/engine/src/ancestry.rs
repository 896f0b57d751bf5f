//! Memoised object-type ancestry checks.
//!
//! Answers are computed by the domain-object collaborator once and then
//! reused by every resolution in the process. The cache only grows.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use tracing::trace;

use crate::collaborators::DomainObjectService;
use crate::query::TypeHierarchy;

static SHARED_CACHE: Lazy<Arc<AncestryCache>> = Lazy::new(|| Arc::new(AncestryCache::default()));

/// Thread-safe map from `(candidate, ancestor)` to the collaborator's answer.
#[derive(Debug, Default)]
pub struct AncestryCache {
    entries: RwLock<HashMap<(String, String), bool>>,
}

impl AncestryCache {
    /// The process-wide cache.
    pub fn shared() -> Arc<AncestryCache> {
        Arc::clone(&SHARED_CACHE)
    }

    /// Returns the cached answer, or computes it with `lookup` and stores it.
    pub fn is_a(&self, candidate: &str, ancestor: &str, lookup: impl FnOnce() -> bool) -> bool {
        if candidate == ancestor {
            return true;
        }
        let key = (candidate.to_string(), ancestor.to_string());
        if let Some(answer) = self.entries.read().unwrap_or_else(PoisonError::into_inner).get(&key) {
            return *answer;
        }

        let answer = lookup();
        trace!(candidate, ancestor, answer, "type ancestry computed");
        self.entries.write().unwrap_or_else(PoisonError::into_inner).entry(key).or_insert(answer);
        answer
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Adapts the cache and collaborator to the filter evaluator.
pub struct TypeAncestry<'a> {
    cache: &'a AncestryCache,
    objects: &'a dyn DomainObjectService,
}

impl<'a> TypeAncestry<'a> {
    pub fn new(cache: &'a AncestryCache, objects: &'a dyn DomainObjectService) -> Self {
        Self { cache, objects }
    }
}

impl TypeHierarchy for TypeAncestry<'_> {
    fn is_a(&self, candidate: &str, ancestor: &str) -> bool {
        self.cache.is_a(candidate, ancestor, || self.objects.is_subtype(candidate, ancestor))
    }
}
