use entity_override_core::{ContentEntity, EntityId, OverrideReferenceItem};

use crate::error::StorageError;

/// One stored reference pointing at a target, as seen from the target side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRecord {
    pub host_entity_id: EntityId,
    pub field_name: String,
    pub delta: usize,
    pub overwritten_property_map: String,
}

pub trait Storage {
    /// Insert or update an entity with all of its translations.
    fn save_entity(&mut self, entity: &ContentEntity) -> Result<(), StorageError>;

    fn get_entity(&self, entity_id: EntityId) -> Result<Option<ContentEntity>, StorageError>;

    /// Delete an entity together with the reference items it hosts.
    /// Returns false when there was nothing to delete.
    fn delete_entity(&mut self, entity_id: EntityId) -> Result<bool, StorageError>;

    fn entity_count(&self) -> Result<u64, StorageError>;

    /// Replace every stored delta of one field on one host.
    fn save_reference_items(
        &mut self,
        host_entity_id: EntityId,
        field_name: &str,
        items: &[OverrideReferenceItem],
    ) -> Result<(), StorageError>;

    fn load_reference_items(
        &self,
        host_entity_id: EntityId,
        field_name: &str,
    ) -> Result<Vec<OverrideReferenceItem>, StorageError>;

    fn get_references_to(&self, target_id: EntityId) -> Result<Vec<ReferenceRecord>, StorageError>;
}
