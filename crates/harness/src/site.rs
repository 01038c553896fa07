use std::sync::Once;

use entity_override_core::{
    Cardinality, ContentEntity, EntityId, FieldValue, OverrideReferenceItem,
    ReferenceFieldDefinition,
};
use entity_override_engine::{
    BaseFieldDefinition, BundleDefinition, Engine, EngineError, EntityTypeRegistry, FieldKind,
    MediaLibraryWithOverrideWidget, WidgetSettings,
};
use entity_override_storage::SqliteStorage;
use tempfile::TempDir;

pub const HOST_TYPE: &str = "entity_test";
pub const TARGET_TYPE: &str = "entity_test_mul";

/// Single-value override reference on the host bundle.
pub const FIELD_SINGLE: &str = "field_reference_override";
/// Unlimited override reference on the host bundle.
pub const FIELD_MULTI: &str = "field_reference_override_multi";
/// Override reference edited through the media library widget.
pub const FIELD_MEDIA: &str = "field_media_override";

static TRACING: Once = Once::new();

/// Install a test-friendly subscriber once per process. Filtered through
/// `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A long-text field value with a single delta.
pub fn text_long(value: &str) -> FieldValue {
    FieldValue::List(vec![FieldValue::map([
        ("value", value),
        ("format", "plain_text"),
    ])])
}

fn registry() -> Result<EntityTypeRegistry, EngineError> {
    let mut registry = EntityTypeRegistry::new();
    registry.register_bundle(
        BundleDefinition::new(HOST_TYPE, HOST_TYPE, "Test entity")
            .with_field(BaseFieldDefinition::new("name", FieldKind::String).with_label("Name")),
    );
    registry.register_bundle(
        BundleDefinition::new(TARGET_TYPE, TARGET_TYPE, "Test entity - data table")
            .with_field(
                BaseFieldDefinition::new("name", FieldKind::String)
                    .with_label("Name")
                    .translatable(),
            )
            .with_field(
                BaseFieldDefinition::new("field_description", FieldKind::TextLong)
                    .with_label("Description")
                    .required()
                    .translatable(),
            ),
    );

    for (field_name, cardinality) in [
        (FIELD_SINGLE, Cardinality::Limited(1)),
        (FIELD_MULTI, Cardinality::Unlimited),
        (FIELD_MEDIA, Cardinality::Limited(3)),
    ] {
        let mut definition =
            ReferenceFieldDefinition::new(HOST_TYPE, HOST_TYPE, field_name, TARGET_TYPE, cardinality);
        definition.label = field_name.replace('_', " ");
        registry.add_reference_field(definition)?;
    }
    Ok(registry)
}

/// A site with a host bundle carrying three override reference fields and
/// a target bundle with a required description.
pub struct TestSite {
    pub engine: Engine,
    _dir: Option<TempDir>,
}

impl TestSite {
    pub fn new() -> Result<Self, EngineError> {
        init_tracing();
        Self::with_storage(SqliteStorage::open_in_memory()?, None)
    }

    /// Same site backed by a database file in a temporary directory.
    pub fn on_disk() -> Result<Self, Box<dyn std::error::Error>> {
        init_tracing();
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("site.db");
        let storage = SqliteStorage::open(&path.to_string_lossy())?;
        Ok(Self::with_storage(storage, Some(dir))?)
    }

    fn with_storage(storage: SqliteStorage, dir: Option<TempDir>) -> Result<Self, EngineError> {
        let mut engine = Engine::new(storage, registry()?);
        engine.configure_widget(
            HOST_TYPE,
            HOST_TYPE,
            FIELD_MEDIA,
            Box::new(MediaLibraryWithOverrideWidget::new(WidgetSettings::default())),
        )?;
        Ok(Self { engine, _dir: dir })
    }

    pub fn create_target(&mut self, name: &str, description: &str) -> Result<EntityId, EngineError> {
        let mut target = ContentEntity::new(TARGET_TYPE, TARGET_TYPE, "en");
        target.set("name", name.into());
        target.set("field_description", text_long(description));
        self.engine.save_entity(&target)?;
        Ok(target.id())
    }

    pub fn create_host(&mut self, name: &str) -> Result<EntityId, EngineError> {
        self.create_host_in(name, "en")
    }

    pub fn create_host_in(&mut self, name: &str, langcode: &str) -> Result<EntityId, EngineError> {
        let mut host = ContentEntity::new(HOST_TYPE, HOST_TYPE, langcode);
        host.set("name", name.into());
        self.engine.save_entity(&host)?;
        Ok(host.id())
    }

    pub fn reference(
        &mut self,
        host_id: EntityId,
        field_name: &str,
        items: Vec<OverrideReferenceItem>,
    ) -> Result<(), EngineError> {
        self.engine.set_reference_items(host_id, field_name, items)
    }

    /// Main text of a field of the entity one delta resolves to.
    pub fn resolved_text(
        &self,
        host_id: EntityId,
        field_name: &str,
        delta: usize,
        property: &str,
    ) -> Result<Option<String>, EngineError> {
        let view = self.engine.resolved_entity(host_id, field_name, delta)?;
        Ok(view.and_then(|view| {
            view.main_value(property)
                .and_then(FieldValue::as_text)
                .map(str::to_string)
        }))
    }
}
