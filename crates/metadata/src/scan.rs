//! Shared reference-scan logic for the SQL stores.

use crate::error::MetadataResult;
use crate::models::{RecordBodyRow, parse_fields};
use curator_core::{AssetKey, EntityType, PublicUrlResolver, referenced_keys_in};
use std::collections::BTreeSet;

/// Rows fetched per keyset page while scanning an entity table.
pub(crate) const SCAN_PAGE_SIZE: i64 = 500;

/// Entity types a scan covers.
pub(crate) fn scan_targets(entity: Option<EntityType>) -> Vec<EntityType> {
    match entity {
        Some(entity) => vec![entity],
        None => EntityType::ALL.to_vec(),
    }
}

/// Add the keys referenced by `rows` to `out`. Returns the last row id, the
/// cursor for the next page.
pub(crate) fn collect_keys(
    entity: EntityType,
    rows: &[RecordBodyRow],
    resolver: &PublicUrlResolver,
    out: &mut BTreeSet<AssetKey>,
) -> MetadataResult<Option<String>> {
    for row in rows {
        let fields = parse_fields(&row.id, &row.fields_json)?;
        out.extend(referenced_keys_in(&fields, entity, resolver));
    }
    Ok(rows.last().map(|row| row.id.clone()))
}
