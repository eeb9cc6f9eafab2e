use std::path::Path;

use log::{info, warn};
use serde_json::Value;

use crate::error::Result;
use crate::layer::Layer;
use crate::normalize::decode::SourceEncoding;
use crate::normalize::mojibake::looks_like_mojibake;

/// (encode with, decode with) pairs tried on a corrupted value, in order
const ROUND_TRIPS: [(SourceEncoding, SourceEncoding); 4] = [
    (SourceEncoding::Cp1251, SourceEncoding::Utf8),
    (SourceEncoding::Latin1, SourceEncoding::Utf8),
    (SourceEncoding::Utf8, SourceEncoding::Cp1251),
    (SourceEncoding::Utf8, SourceEncoding::Latin1),
];

/// Undo a double mis-encoding of one value, `None` if no round trip helps
pub fn repair_text(text: &str) -> Option<String> {
    ROUND_TRIPS.iter().find_map(|&(encode, decode)| {
        let bytes = encode.encode_strict(text)?;
        let candidate = decode.decode_strict(&bytes).ok()?;
        (!candidate.is_empty() && !looks_like_mojibake(&candidate)).then(|| candidate.into_owned())
    })
}

/// Columns whose first non-missing value is corrupted text
pub fn corrupted_columns(layer: &Layer) -> Vec<String> {
    layer
        .columns
        .iter()
        .filter(|column| {
            let first = layer
                .records
                .iter()
                .filter_map(|r| r.properties.get(column.as_str()))
                .find(|v| !v.is_null());
            matches!(first, Some(Value::String(s)) if looks_like_mojibake(s))
        })
        .cloned()
        .collect()
}

/// Repair every corrupted string in the flagged columns; returns the number of fixed values.
///
/// Values that are already clean, missing or not strings are left as they are,
/// and a value no round trip can fix keeps its original text.
pub fn repair_layer(layer: &mut Layer) -> usize {
    let columns = corrupted_columns(layer);
    let mut fixed = 0;
    for column in &columns {
        for record in &mut layer.records {
            let Some(Value::String(text)) = record.properties.get_mut(column.as_str()) else {
                continue;
            };
            if !looks_like_mojibake(text) {
                continue;
            }
            if let Some(repaired) = repair_text(text) {
                *text = repaired;
                fixed += 1;
            }
        }
    }
    fixed
}

/// Re-read a written layer, repair double-encoded Cyrillic and overwrite it.
///
/// A missing file is skipped with a warning. Returns whether the file was
/// rewritten.
pub fn hard_fix_cyrillic(path: &Path) -> Result<bool> {
    if !path.exists() {
        warn!("hard fix skipped, {} does not exist", path.display());
        return Ok(false);
    }
    let mut layer = Layer::read_geojson(path)?;
    let fixed = repair_layer(&mut layer);
    layer.write_geojson(path)?;
    info!("hard fix on {}: {} values repaired", path.display(), fixed);
    Ok(true)
}
