use serde::{Deserialize, Serialize};

use crate::cache::{override_cache_context, CacheableMetadata};
use crate::entity::ContentEntity;
use crate::ids::{EntityId, FieldId};
use crate::merge::{apply_overrides, MergedEntityView, OverrideSource};
use crate::override_map::{OverrideMap, EMPTY_OVERRIDE_MAP};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Limited(usize),
    Unlimited,
}

impl Cardinality {
    pub fn allows(&self, count: usize) -> bool {
        match self {
            Self::Limited(max) => count <= *max,
            Self::Unlimited => true,
        }
    }
}

/// Definition of an override reference field attached to a host bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceFieldDefinition {
    pub unique_id: FieldId,
    pub field_name: String,
    pub label: String,
    pub host_entity_type: String,
    pub host_bundle: String,
    pub target_type: String,
    pub cardinality: Cardinality,
}

impl ReferenceFieldDefinition {
    pub fn new(
        host_entity_type: &str,
        host_bundle: &str,
        field_name: &str,
        target_type: &str,
        cardinality: Cardinality,
    ) -> Self {
        Self {
            unique_id: FieldId::new(),
            field_name: field_name.to_string(),
            label: field_name.to_string(),
            host_entity_type: host_entity_type.to_string(),
            host_bundle: host_bundle.to_string(),
            target_type: target_type.to_string(),
            cardinality,
        }
    }

    /// Cache context distinguishing renders through this field.
    pub fn cache_context(&self) -> String {
        override_cache_context(&self.unique_id)
    }
}

/// One stored value of an override reference field: the target plus the
/// encoded override map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideReferenceItem {
    pub target_id: Option<EntityId>,
    pub overwritten_property_map: String,
}

impl Default for OverrideReferenceItem {
    fn default() -> Self {
        Self {
            target_id: None,
            overwritten_property_map: EMPTY_OVERRIDE_MAP.to_string(),
        }
    }
}

impl OverrideReferenceItem {
    pub fn new(target_id: EntityId) -> Self {
        Self {
            target_id: Some(target_id),
            ..Self::default()
        }
    }

    pub fn with_overrides(target_id: EntityId, map: &OverrideMap) -> Self {
        Self {
            target_id: Some(target_id),
            overwritten_property_map: map.encode(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.target_id.is_none()
    }

    pub fn override_map(&self) -> OverrideMap {
        OverrideMap::decode(Some(&self.overwritten_property_map))
    }

    pub fn set_override_map(&mut self, map: &OverrideMap) {
        self.overwritten_property_map = map.encode();
    }
}

/// Entity lookup the field list resolves targets through.
pub trait EntityLoader {
    type Error;

    fn load_entity(
        &self,
        entity_type: &str,
        entity_id: EntityId,
    ) -> Result<Option<ContentEntity>, Self::Error>;
}

/// The values of one override reference field on one host entity.
#[derive(Debug, Clone)]
pub struct OverrideReferenceList {
    definition: ReferenceFieldDefinition,
    host_langcode: String,
    host_cache: CacheableMetadata,
    items: Vec<OverrideReferenceItem>,
}

impl OverrideReferenceList {
    pub fn new(
        definition: ReferenceFieldDefinition,
        host: &ContentEntity,
        items: Vec<OverrideReferenceItem>,
    ) -> Self {
        Self {
            definition,
            host_langcode: host.langcode().to_string(),
            host_cache: host.cache_metadata().clone(),
            items,
        }
    }

    pub fn definition(&self) -> &ReferenceFieldDefinition {
        &self.definition
    }

    pub fn field_name(&self) -> &str {
        &self.definition.field_name
    }

    pub fn langcode(&self) -> &str {
        &self.host_langcode
    }

    pub fn items(&self) -> &[OverrideReferenceItem] {
        &self.items
    }

    pub fn get(&self, delta: usize) -> Option<&OverrideReferenceItem> {
        self.items.get(delta)
    }

    pub fn get_mut(&mut self, delta: usize) -> Option<&mut OverrideReferenceItem> {
        self.items.get_mut(delta)
    }

    pub fn set_items(&mut self, items: Vec<OverrideReferenceItem>) {
        self.items = items;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.iter().all(OverrideReferenceItem::is_empty)
    }

    /// Drop empty slots and renumber.
    pub fn filter_empty_items(&mut self) {
        self.items.retain(|item| !item.is_empty());
    }

    /// The target exactly as stored, without overrides.
    pub fn raw_entity<L: EntityLoader + ?Sized>(
        &self,
        delta: usize,
        loader: &L,
    ) -> Result<Option<ContentEntity>, L::Error> {
        match self.items.get(delta).and_then(|item| item.target_id) {
            Some(target_id) => loader.load_entity(&self.definition.target_type, target_id),
            None => Ok(None),
        }
    }

    /// The target as seen through this reference, overrides applied.
    ///
    /// The result always carries this field's cache context so two fields
    /// rendering the same target cache separately.
    pub fn resolved_entity<L: EntityLoader + ?Sized>(
        &self,
        delta: usize,
        loader: &L,
    ) -> Result<Option<MergedEntityView>, L::Error> {
        let Some(target) = self.raw_entity(delta, loader)? else {
            return Ok(None);
        };
        let map = self.items[delta].override_map();
        let source = OverrideSource {
            host_entity_type: self.definition.host_entity_type.clone(),
            host_bundle: self.definition.host_bundle.clone(),
            property_path: format!("{}.{delta}", self.definition.field_name),
            host_cache: self.host_cache.clone(),
        };
        let mut view = apply_overrides(&target, &map, &self.host_langcode, &source);
        view.cache_metadata_mut()
            .add_cache_context(self.definition.cache_context());
        Ok(Some(view))
    }

    /// Loadable targets keyed by delta; deltas whose target is gone are
    /// left out.
    pub fn referenced_entities<L: EntityLoader + ?Sized>(
        &self,
        loader: &L,
    ) -> Result<Vec<(usize, ContentEntity)>, L::Error> {
        let mut entities = Vec::new();
        for delta in 0..self.items.len() {
            if let Some(entity) = self.raw_entity(delta, loader)? {
                entities.push((delta, entity));
            }
        }
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::convert::Infallible;

    #[derive(Default)]
    struct MemoryLoader(BTreeMap<EntityId, ContentEntity>);

    impl EntityLoader for MemoryLoader {
        type Error = Infallible;

        fn load_entity(
            &self,
            entity_type: &str,
            entity_id: EntityId,
        ) -> Result<Option<ContentEntity>, Infallible> {
            Ok(self
                .0
                .get(&entity_id)
                .filter(|e| e.entity_type() == entity_type)
                .cloned())
        }
    }

    fn fixture() -> (MemoryLoader, ContentEntity, ReferenceFieldDefinition) {
        let mut target = ContentEntity::new("entity_test_mul", "entity_test_mul", "en");
        target.set("name", "Referenced entity".into());
        target.set("field_description", "Description".into());
        let mut loader = MemoryLoader::default();
        loader.0.insert(target.id(), target.clone());
        let definition = ReferenceFieldDefinition::new(
            "entity_test",
            "entity_test",
            "field_reference_override",
            "entity_test_mul",
            Cardinality::Unlimited,
        );
        (loader, target, definition)
    }

    #[test]
    fn resolved_entity_applies_overrides_and_context() {
        let (loader, target, definition) = fixture();
        let host = ContentEntity::new("entity_test", "entity_test", "en");
        let mut map = OverrideMap::new();
        map.insert("field_description", "Overridden description".into());
        let list = OverrideReferenceList::new(
            definition.clone(),
            &host,
            vec![OverrideReferenceItem::with_overrides(target.id(), &map)],
        );

        let view = list.resolved_entity(0, &loader).unwrap().unwrap();
        assert_eq!(
            view.main_value("field_description").and_then(|v| v.as_text()),
            Some("Overridden description")
        );
        assert!(view.cache_metadata().has_cache_context(&definition.cache_context()));
        let host_tag = format!("entity_test:{}", host.id());
        assert!(view.cache_metadata().tags().contains(&host_tag));

        let raw = list.raw_entity(0, &loader).unwrap().unwrap();
        assert_eq!(raw.main_value("field_description").and_then(|v| v.as_text()), Some("Description"));
    }

    #[test]
    fn missing_targets_are_skipped() {
        let (loader, target, definition) = fixture();
        let host = ContentEntity::new("entity_test", "entity_test", "en");
        let list = OverrideReferenceList::new(
            definition,
            &host,
            vec![
                OverrideReferenceItem::new(EntityId::new()),
                OverrideReferenceItem::new(target.id()),
            ],
        );

        let referenced = list.referenced_entities(&loader).unwrap();
        assert_eq!(referenced.len(), 1);
        assert_eq!(referenced[0].0, 1);
        assert!(list.resolved_entity(0, &loader).unwrap().is_none());
    }

    #[test]
    fn empty_item_defaults_to_empty_map_token() {
        let item = OverrideReferenceItem::default();
        assert!(item.is_empty());
        assert_eq!(item.overwritten_property_map, "{}");
    }

    #[test]
    fn limited_cardinality() {
        assert!(Cardinality::Limited(2).allows(2));
        assert!(!Cardinality::Limited(2).allows(3));
        assert!(Cardinality::Unlimited.allows(1000));
    }
}
