//! Content records and access to their asset slots.

use crate::asset::{AssetKey, PublicUrlResolver};
use crate::entity::{AssetField, EntityType, FieldShape};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// Maximum record identifier length.
pub const MAX_RECORD_ID_LEN: usize = 128;

/// A content record of some [`EntityType`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: String,
    /// Schemaless record body.
    pub fields: Map<String, Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    /// Write counter used for optimistic concurrency. `0` means the record
    /// has never been stored; every successful write bumps it by one.
    #[serde(default)]
    pub version: i64,
}

/// Position of one reference inside an asset field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "index", rename_all = "snake_case")]
pub enum AssetSlot {
    Single,
    /// Item index for list fields. `index == len` appends.
    Item(usize),
}

impl ContentRecord {
    /// Create an empty record.
    pub fn new(id: impl Into<String>, now: OffsetDateTime) -> crate::Result<Self> {
        let id = id.into();
        validate_record_id(&id)?;
        Ok(Self {
            id,
            fields: Map::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        })
    }

    /// Create a record from a JSON object body.
    pub fn from_fields(
        id: impl Into<String>,
        fields: Map<String, Value>,
        now: OffsetDateTime,
    ) -> crate::Result<Self> {
        let mut record = Self::new(id, now)?;
        record.fields = fields;
        Ok(record)
    }

    /// Raw reference strings held by `field`, in slot order.
    ///
    /// Empty strings and non-string values are skipped.
    pub fn asset_refs(&self, field: &AssetField) -> Vec<&str> {
        field_refs(&self.fields, field)
    }

    /// Every asset key this record references, normalized through `resolver`.
    ///
    /// External URLs and values that do not resolve to a key are dropped.
    pub fn referenced_keys(
        &self,
        entity: EntityType,
        resolver: &PublicUrlResolver,
    ) -> Vec<AssetKey> {
        referenced_keys_in(&self.fields, entity, resolver)
    }

    /// Reference currently stored in a slot, if any.
    pub fn slot_value(&self, field: &AssetField, slot: AssetSlot) -> crate::Result<Option<&str>> {
        check_slot(field, slot)?;
        let Some(value) = lookup(&self.fields, field) else {
            return Ok(None);
        };
        let value = match (field.shape, slot) {
            (FieldShape::List { item_key }, AssetSlot::Item(index)) => value
                .as_array()
                .and_then(|items| items.get(index))
                .and_then(|item| item.get(item_key)),
            _ => Some(value),
        };
        Ok(value
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty()))
    }

    /// Write `value` into a slot (or clear it with `None`), returning the
    /// previous reference.
    ///
    /// Clearing a single field stores `null`; clearing a list item stores
    /// `null` under the item key and keeps the rest of the item.
    pub fn set_slot(
        &mut self,
        field: &AssetField,
        slot: AssetSlot,
        value: Option<String>,
    ) -> crate::Result<Option<String>> {
        check_slot(field, slot)?;
        let previous = self.slot_value(field, slot)?.map(str::to_string);
        let new_value = value.map(Value::String).unwrap_or(Value::Null);
        let target = lookup_mut(&mut self.fields, field)?;

        match (field.shape, slot) {
            (FieldShape::Single, _) => *target = new_value,
            (FieldShape::List { item_key }, AssetSlot::Item(index)) => {
                if target.is_null() {
                    *target = Value::Array(Vec::new());
                }
                let items = target.as_array_mut().ok_or_else(|| {
                    crate::Error::InvalidRecord(format!("field {} is not a list", field.path))
                })?;
                if index < items.len() {
                    match items[index].as_object_mut() {
                        Some(item) => {
                            item.insert(item_key.to_string(), new_value);
                        }
                        None => {
                            return Err(crate::Error::InvalidRecord(format!(
                                "{}[{index}] is not an object",
                                field.path
                            )));
                        }
                    }
                } else if index == items.len() {
                    if !new_value.is_null() {
                        let mut item = Map::new();
                        item.insert(item_key.to_string(), new_value);
                        items.push(Value::Object(item));
                    }
                } else {
                    return Err(crate::Error::InvalidSlot(format!(
                        "{}[{index}] is past the end of a list of {}",
                        field.path,
                        items.len()
                    )));
                }
            }
            (FieldShape::List { .. }, AssetSlot::Single) => {
                return Err(crate::Error::InvalidSlot(format!(
                    "{} is a list and needs an item index",
                    field.path
                )));
            }
        }
        Ok(previous)
    }
}

/// Raw reference strings held by `field` within a record body.
pub fn field_refs<'a>(fields: &'a Map<String, Value>, field: &AssetField) -> Vec<&'a str> {
    let Some(value) = lookup(fields, field) else {
        return Vec::new();
    };
    match field.shape {
        FieldShape::Single => value
            .as_str()
            .filter(|s| !s.trim().is_empty())
            .into_iter()
            .collect(),
        FieldShape::List { item_key } => value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.get(item_key).and_then(Value::as_str))
                    .filter(|s| !s.trim().is_empty())
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Sorted, deduplicated asset keys referenced by a record body of `entity`.
pub fn referenced_keys_in(
    fields: &Map<String, Value>,
    entity: EntityType,
    resolver: &PublicUrlResolver,
) -> Vec<AssetKey> {
    let mut keys: Vec<AssetKey> = entity
        .asset_fields()
        .iter()
        .flat_map(|field| field_refs(fields, field))
        .filter_map(|raw| resolver.key_from_ref(raw))
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

/// Validate a record identifier.
pub fn validate_record_id(id: &str) -> crate::Result<()> {
    if id.is_empty() || id.len() > MAX_RECORD_ID_LEN {
        return Err(crate::Error::InvalidRecord(format!(
            "record id must be 1-{MAX_RECORD_ID_LEN} chars, got {}",
            id.len()
        )));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !matches!(c, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_'))
    {
        return Err(crate::Error::InvalidRecord(format!(
            "invalid character in record id: {c:?}"
        )));
    }
    Ok(())
}

fn check_slot(field: &AssetField, slot: AssetSlot) -> crate::Result<()> {
    match (field.shape, slot) {
        (FieldShape::Single, AssetSlot::Single) | (FieldShape::List { .. }, AssetSlot::Item(_)) => {
            Ok(())
        }
        (FieldShape::Single, AssetSlot::Item(_)) => Err(crate::Error::InvalidSlot(format!(
            "{} holds a single reference",
            field.path
        ))),
        (FieldShape::List { .. }, AssetSlot::Single) => Err(crate::Error::InvalidSlot(format!(
            "{} is a list and needs an item index",
            field.path
        ))),
    }
}

fn lookup<'a>(fields: &'a Map<String, Value>, field: &AssetField) -> Option<&'a Value> {
    let mut segments = field.segments();
    let first = segments.next()?;
    let mut current = fields.get(first)?;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current)
}

fn lookup_mut<'a>(
    fields: &'a mut Map<String, Value>,
    field: &AssetField,
) -> crate::Result<&'a mut Value> {
    let segments: Vec<&str> = field.segments().collect();
    let Some((last, parents)) = segments.split_last() else {
        return Err(crate::Error::InvalidRecord("empty field path".to_string()));
    };

    let mut current = fields;
    for segment in parents {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if entry.is_null() {
            *entry = Value::Object(Map::new());
        }
        current = entry.as_object_mut().ok_or_else(|| {
            crate::Error::InvalidRecord(format!("{segment} in {} is not an object", field.path))
        })?;
    }
    Ok(current.entry(last.to_string()).or_insert(Value::Null))
}
