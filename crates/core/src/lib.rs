pub mod cache;
pub mod entity;
pub mod error;
pub mod field_value;
pub mod ids;
pub mod merge;
pub mod override_map;
pub mod reference;

pub use cache::CacheableMetadata;
pub use entity::ContentEntity;
pub use error::CoreError;
pub use field_value::FieldValue;
pub use ids::*;
pub use merge::{apply_overrides, MergedEntityView, OverrideSource};
pub use override_map::{OverrideMap, EMPTY_OVERRIDE_MAP};
pub use reference::{
    Cardinality, EntityLoader, OverrideReferenceItem, OverrideReferenceList,
    ReferenceFieldDefinition,
};
