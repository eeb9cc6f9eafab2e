//! Encoding/CRS normalizer: raw cadastral sources to merged UTF-8 WGS84 layers.

pub mod classify;
pub mod decode;
pub mod mojibake;
pub mod repair;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use geo::Centroid;
use log::{info, warn};

use crate::commons::basic_functions::{find_files, has_extension};
use crate::config::LayerKind;
use crate::error::{PipelineError, Result};
use crate::geo_core::{BGS2005, WGS84};
use crate::layer::Layer;

use classify::classify_layer;
use decode::{read_with_fallback, LayerReader, SourceReader};
use repair::hard_fix_cyrillic;

/// Sub-directory of the ETL dir receiving one converted copy per source file
pub const DEBUG_DIR: &str = "geojson";

/// Source extensions picked up by the normalizer
const SOURCE_EXTENSIONS: [&str; 2] = ["shp", "geojson"];

/// BGS2005 easting/northing envelope covering Sofia
fn looks_like_bgs2005(x: f64, y: f64) -> bool {
    x > 250_000.0 && x < 450_000.0 && y > 4_700_000.0 && y < 4_900_000.0
}

/// Make sure a layer carries a CRS and bring it to WGS84.
///
/// Layers without a declared CRS are assumed to be BGS2005 when the centroid
/// of their first geometry falls inside the Sofia metric envelope.
pub fn resolve_crs(mut layer: Layer) -> Result<Layer> {
    if layer.crs.is_none() {
        let centroid = layer.geometries().next().and_then(|g| g.centroid());
        match centroid {
            Some(c) if looks_like_bgs2005(c.x(), c.y()) => {
                info!(
                    "{}: no CRS declared, assuming EPSG:{}",
                    layer.origin_label(),
                    BGS2005
                );
                layer.crs = Some(BGS2005);
            }
            _ => {
                return Err(PipelineError::UnknownCrs {
                    origin: layer.origin_label(),
                })
            }
        }
    }
    layer.reprojected(WGS84)
}

/// Sorted list of every source file under `root`
pub fn find_source_files(root: &Path) -> Result<Vec<PathBuf>> {
    find_files(root, |path| has_extension(path, &SOURCE_EXTENSIONS))
}

/// Debug file name: relative path components joined with `_`, extension replaced
pub fn debug_file_name(raw_dir: &Path, source: &Path) -> String {
    let relative = source.strip_prefix(raw_dir).unwrap_or(source);
    let mut parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if let Some(stem) = relative.file_stem() {
        if let Some(last) = parts.last_mut() {
            *last = stem.to_string_lossy().into_owned();
        }
    }
    format!("{}.geojson", parts.join("_"))
}

/// What a normalizer run produced
#[derive(Debug, Default)]
pub struct NormalizeReport {
    /// Number of source files converted
    pub converted: usize,
    /// Merged files written, per kind
    pub merged: BTreeMap<LayerKind, PathBuf>,
    /// Merged files rewritten by the Cyrillic repair pass
    pub hard_fixed: Vec<PathBuf>,
}

/// Convert every raw source under `raw_dir` and write one merged layer per kind into `etl_dir`.
pub fn convert_and_merge(raw_dir: &Path, etl_dir: &Path) -> Result<NormalizeReport> {
    convert_and_merge_with(&SourceReader, raw_dir, etl_dir)
}

/// [`convert_and_merge`] with an explicit reader
pub fn convert_and_merge_with(
    reader: &dyn LayerReader,
    raw_dir: &Path,
    etl_dir: &Path,
) -> Result<NormalizeReport> {
    let mut report = NormalizeReport::default();
    let sources = find_source_files(raw_dir)?;
    if sources.is_empty() {
        warn!("no source files found under {}", raw_dir.display());
        return Ok(report);
    }

    let debug_dir = etl_dir.join(DEBUG_DIR);
    let mut buckets: BTreeMap<LayerKind, Layer> = LayerKind::ALL
        .into_iter()
        .map(|kind| (kind, Layer::new(Some(WGS84))))
        .collect();

    for source in &sources {
        info!("converting {}", source.display());
        let (layer, encoding) = read_with_fallback(reader, source)?;
        let layer = resolve_crs(layer)?;

        let debug_path = debug_dir.join(debug_file_name(raw_dir, source));
        layer.write_geojson(&debug_path)?;

        let kind = classify_layer(source)?;
        info!(
            "  {} features, {}, layer {}",
            layer.len(),
            encoding.label(),
            kind
        );
        if let Some(bucket) = buckets.get_mut(&kind) {
            bucket.append(layer);
        }
        report.converted += 1;
    }

    for (kind, merged) in buckets {
        let config = kind.config();
        if merged.is_empty() {
            warn!("no {} features found, {} not written", kind, config.raw_file);
            continue;
        }
        let path = etl_dir.join(config.raw_file);
        merged.write_geojson(&path)?;
        info!("merged {} {} features into {}", merged.len(), kind, path.display());
        report.merged.insert(kind, path.clone());

        if config.hard_fix && hard_fix_cyrillic(&path)? {
            report.hard_fixed.push(path);
        }
    }
    Ok(report)
}
