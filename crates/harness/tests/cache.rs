use entity_override_core::{FieldValue, OverrideMap, OverrideReferenceItem};
use entity_override_harness::{text_long, TestSite, FIELD_MULTI, FIELD_SINGLE, HOST_TYPE};

#[test]
fn every_resolved_view_carries_the_field_context() -> Result<(), Box<dyn std::error::Error>> {
    let mut site = TestSite::new()?;
    let target = site.create_target("Target", "Description")?;
    let host = site.create_host("Host")?;
    site.reference(host, FIELD_SINGLE, vec![OverrideReferenceItem::new(target)])?;

    let definition = site
        .engine
        .registry()
        .reference_field(HOST_TYPE, HOST_TYPE, FIELD_SINGLE)
        .ok_or("field not registered")?
        .clone();
    let view = site.engine.resolved_entity(host, FIELD_SINGLE, 0)?.ok_or("no view")?;

    // No overrides: no marker, but the context is still there.
    assert!(view.override_marker().is_none());
    let expected = format!("overridden_reference_field:{}", definition.unique_id);
    assert!(view.cache_metadata().has_cache_context(&expected));
    assert!(view.cache_metadata().tags().contains(&format!("entity_test_mul:{target}")));
    Ok(())
}

#[test]
fn same_target_through_two_fields_renders_apart() -> Result<(), Box<dyn std::error::Error>> {
    let mut site = TestSite::new()?;
    let target = site.create_target("Shared", "Shared description")?;
    let host = site.create_host("Host")?;

    let mut single = OverrideMap::new();
    single.insert("field_description", text_long("Seen through the single field"));
    let mut multi = OverrideMap::new();
    multi.insert("field_description", text_long("Seen through the multi field"));
    site.reference(host, FIELD_SINGLE, vec![OverrideReferenceItem::with_overrides(target, &single)])?;
    site.reference(host, FIELD_MULTI, vec![OverrideReferenceItem::with_overrides(target, &multi)])?;

    let through_single = site.engine.view_reference_field(host, FIELD_SINGLE)?;
    let through_multi = site.engine.view_reference_field(host, FIELD_MULTI)?;
    assert_eq!(through_single.len(), 1);
    assert_eq!(through_multi.len(), 1);

    let a = &through_single[0].entity;
    let b = &through_multi[0].entity;
    assert_eq!(a.id(), b.id());
    assert_eq!(
        a.main_value("field_description").and_then(FieldValue::as_text),
        Some("Seen through the single field")
    );
    assert_eq!(
        b.main_value("field_description").and_then(FieldValue::as_text),
        Some("Seen through the multi field")
    );
    assert_ne!(a.cache_metadata().contexts(), b.cache_metadata().contexts());

    assert_eq!(
        a.override_marker(),
        Some("entity_test:entity_test.field_reference_override.0")
    );
    assert_eq!(
        b.override_marker(),
        Some("entity_test:entity_test.field_reference_override_multi.0")
    );
    Ok(())
}

#[test]
fn overridden_view_depends_on_host() -> Result<(), Box<dyn std::error::Error>> {
    let mut site = TestSite::new()?;
    let target = site.create_target("Target", "Description")?;
    let host = site.create_host("Host")?;
    let mut map = OverrideMap::new();
    map.insert("name", "Renamed".into());
    site.reference(host, FIELD_SINGLE, vec![OverrideReferenceItem::with_overrides(target, &map)])?;

    let view = site.engine.resolved_entity(host, FIELD_SINGLE, 0)?.ok_or("no view")?;
    assert!(view.is_overridden());
    assert_eq!(view.label(), Some("Renamed"));
    let tags = view.cache_metadata().tags();
    assert!(tags.contains(&format!("entity_test:{host}")));
    assert!(tags.contains(&format!("entity_test_mul:{target}")));
    Ok(())
}

#[test]
fn repeated_views_of_the_same_delta_agree() -> Result<(), Box<dyn std::error::Error>> {
    let mut site = TestSite::new()?;
    let target = site.create_target("Target", "Description")?;
    let host = site.create_host("Host")?;
    let mut map = OverrideMap::new();
    map.insert("field_description", text_long("Once"));
    site.reference(host, FIELD_SINGLE, vec![OverrideReferenceItem::with_overrides(target, &map)])?;

    let first = site.engine.resolved_entity(host, FIELD_SINGLE, 0)?.ok_or("no view")?;
    let second = site.engine.resolved_entity(host, FIELD_SINGLE, 0)?.ok_or("no view")?;
    assert_eq!(first.entity(), second.entity());
    assert_eq!(first.cache_metadata(), second.cache_metadata());
    Ok(())
}
