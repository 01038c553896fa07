use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension};

use entity_override_core::{
    ContentEntity, EntityId, EntityLoader, FieldValue, OverrideReferenceItem, EMPTY_OVERRIDE_MAP,
};

use crate::error::StorageError;
use crate::traits::{ReferenceRecord, Storage};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

fn to_entity_id(bytes: Vec<u8>, label: &str) -> Result<EntityId, StorageError> {
    Ok(EntityId::from_bytes(to_array::<16>(bytes, label)?))
}

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn load_field_rows(
        &self,
        entity_id: EntityId,
    ) -> Result<Vec<(String, String, FieldValue)>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT langcode, field_name, value FROM entity_fields WHERE entity_id = ?1 ORDER BY langcode, field_name",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![entity_id.as_bytes().as_slice()],
            |row| {
                let langcode: String = row.get(0)?;
                let field_name: String = row.get(1)?;
                let val_bytes: Vec<u8> = row.get(2)?;
                Ok((langcode, field_name, val_bytes))
            },
        )?;

        let mut result = Vec::new();
        for row in rows {
            let (langcode, field_name, val_bytes) = row?;
            let value = FieldValue::from_msgpack(&val_bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            result.push((langcode, field_name, value));
        }
        Ok(result)
    }
}

fn insert_field(
    tx: &rusqlite::Transaction,
    entity_id: EntityId,
    langcode: &str,
    field_name: &str,
    value: &FieldValue,
) -> Result<(), StorageError> {
    let bytes = value
        .to_msgpack()
        .map_err(|e| StorageError::Serialization(e.to_string()))?;
    tx.execute(
        "INSERT INTO entity_fields (entity_id, langcode, field_name, value) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![entity_id.as_bytes().as_slice(), langcode, field_name, bytes],
    )?;
    Ok(())
}

impl Storage for SqliteStorage {
    fn save_entity(&mut self, entity: &ContentEntity) -> Result<(), StorageError> {
        let entity_id = entity.id();
        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO entities (entity_id, entity_type, bundle, langcode) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (entity_id) DO UPDATE SET
                entity_type = excluded.entity_type,
                bundle = excluded.bundle,
                langcode = excluded.langcode,
                changed_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)",
            rusqlite::params![
                entity_id.as_bytes().as_slice(),
                entity.entity_type(),
                entity.bundle(),
                entity.langcode(),
            ],
        )?;

        tx.execute(
            "DELETE FROM entity_fields WHERE entity_id = ?1",
            rusqlite::params![entity_id.as_bytes().as_slice()],
        )?;
        for (field_name, value) in entity.fields() {
            insert_field(&tx, entity_id, entity.langcode(), field_name, value)?;
        }
        for (langcode, fields) in entity.translations() {
            for (field_name, value) in fields {
                insert_field(&tx, entity_id, langcode, field_name, value)?;
            }
        }

        tx.commit()?;
        tracing::debug!(%entity_id, entity_type = entity.entity_type(), "saved entity");
        Ok(())
    }

    fn get_entity(&self, entity_id: EntityId) -> Result<Option<ContentEntity>, StorageError> {
        let header = self
            .conn
            .query_row(
                "SELECT entity_type, bundle, langcode FROM entities WHERE entity_id = ?1",
                rusqlite::params![entity_id.as_bytes().as_slice()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((entity_type, bundle, langcode)) = header else {
            return Ok(None);
        };

        let mut entity = ContentEntity::with_id(entity_id, &entity_type, &bundle, &langcode);
        let mut translations: BTreeMap<String, BTreeMap<String, FieldValue>> = BTreeMap::new();
        for (row_langcode, field_name, value) in self.load_field_rows(entity_id)? {
            if row_langcode == langcode {
                entity.set(&field_name, value);
            } else {
                translations
                    .entry(row_langcode)
                    .or_default()
                    .insert(field_name, value);
            }
        }
        for (translation_langcode, fields) in translations {
            entity.add_translation(&translation_langcode, fields);
        }
        Ok(Some(entity))
    }

    fn delete_entity(&mut self, entity_id: EntityId) -> Result<bool, StorageError> {
        let deleted = self.conn.execute(
            "DELETE FROM entities WHERE entity_id = ?1",
            rusqlite::params![entity_id.as_bytes().as_slice()],
        )?;
        tracing::debug!(%entity_id, deleted, "deleted entity");
        Ok(deleted > 0)
    }

    fn entity_count(&self) -> Result<u64, StorageError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn save_reference_items(
        &mut self,
        host_entity_id: EntityId,
        field_name: &str,
        items: &[OverrideReferenceItem],
    ) -> Result<(), StorageError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM reference_override_items WHERE host_entity_id = ?1 AND field_name = ?2",
            rusqlite::params![host_entity_id.as_bytes().as_slice(), field_name],
        )?;
        for (delta, item) in items.iter().enumerate() {
            let result = tx.execute(
                "INSERT INTO reference_override_items (host_entity_id, field_name, delta, target_id, overwritten_property_map) VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    host_entity_id.as_bytes().as_slice(),
                    field_name,
                    delta as i64,
                    item.target_id.as_ref().map(|id| id.as_bytes().to_vec()),
                    item.overwritten_property_map,
                ],
            );
            match result {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    return Err(StorageError::ConstraintViolation(format!(
                        "reference items for unknown host {host_entity_id}"
                    )));
                }
                Err(e) => return Err(StorageError::Sqlite(e)),
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn load_reference_items(
        &self,
        host_entity_id: EntityId,
        field_name: &str,
    ) -> Result<Vec<OverrideReferenceItem>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT target_id, overwritten_property_map FROM reference_override_items WHERE host_entity_id = ?1 AND field_name = ?2 ORDER BY delta",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![host_entity_id.as_bytes().as_slice(), field_name],
            |row| {
                let target: Option<Vec<u8>> = row.get(0)?;
                let map: Option<String> = row.get(1)?;
                Ok((target, map))
            },
        )?;

        let mut items = Vec::new();
        for row in rows {
            let (target, map) = row?;
            let target_id = target
                .map(|bytes| to_entity_id(bytes, "target_id"))
                .transpose()?;
            items.push(OverrideReferenceItem {
                target_id,
                overwritten_property_map: map.unwrap_or_else(|| EMPTY_OVERRIDE_MAP.to_string()),
            });
        }
        Ok(items)
    }

    fn get_references_to(&self, target_id: EntityId) -> Result<Vec<ReferenceRecord>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT host_entity_id, field_name, delta, overwritten_property_map FROM reference_override_items WHERE target_id = ?1 ORDER BY host_entity_id, field_name, delta",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![target_id.as_bytes().as_slice()],
            |row| {
                let host: Vec<u8> = row.get(0)?;
                let field_name: String = row.get(1)?;
                let delta: i64 = row.get(2)?;
                let map: String = row.get(3)?;
                Ok((host, field_name, delta, map))
            },
        )?;

        let mut records = Vec::new();
        for row in rows {
            let (host, field_name, delta, overwritten_property_map) = row?;
            records.push(ReferenceRecord {
                host_entity_id: to_entity_id(host, "host_entity_id")?,
                field_name,
                delta: delta as usize,
                overwritten_property_map,
            });
        }
        Ok(records)
    }
}

impl EntityLoader for SqliteStorage {
    type Error = StorageError;

    fn load_entity(
        &self,
        entity_type: &str,
        entity_id: EntityId,
    ) -> Result<Option<ContentEntity>, StorageError> {
        Ok(self.get_entity(entity_id)?
            .filter(|entity| entity.entity_type() == entity_type))
    }
}
