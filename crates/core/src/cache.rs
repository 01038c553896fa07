use std::collections::BTreeSet;

/// Prefix of the cache context each override reference field contributes.
pub const OVERRIDE_CACHE_CONTEXT_PREFIX: &str = "overridden_reference_field";

/// Cache tags and contexts bubbled from an entity to whatever renders it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheableMetadata {
    tags: BTreeSet<String>,
    contexts: BTreeSet<String>,
}

impl CacheableMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn contexts(&self) -> &BTreeSet<String> {
        &self.contexts
    }

    pub fn add_cache_tag(&mut self, tag: impl Into<String>) {
        self.tags.insert(tag.into());
    }

    pub fn add_cache_context(&mut self, context: impl Into<String>) {
        self.contexts.insert(context.into());
    }

    pub fn has_cache_context(&self, context: &str) -> bool {
        self.contexts.contains(context)
    }

    /// Union another object's metadata into this one.
    pub fn add_cacheable_dependency(&mut self, other: &CacheableMetadata) {
        self.tags.extend(other.tags.iter().cloned());
        self.contexts.extend(other.contexts.iter().cloned());
    }
}

/// Cache context string for one override reference field.
pub fn override_cache_context(field_unique_id: &impl std::fmt::Display) -> String {
    format!("{OVERRIDE_CACHE_CONTEXT_PREFIX}:{field_unique_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_unions_tags_and_contexts() {
        let mut a = CacheableMetadata::new();
        a.add_cache_tag("node:1");
        let mut b = CacheableMetadata::new();
        b.add_cache_tag("node:2");
        b.add_cache_context("languages");

        a.add_cacheable_dependency(&b);
        assert_eq!(a.tags().len(), 2);
        assert!(a.has_cache_context("languages"));
    }

    #[test]
    fn context_string_format() {
        assert_eq!(override_cache_context(&"abc"), "overridden_reference_field:abc");
    }
}
