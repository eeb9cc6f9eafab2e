use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use geos::{Geom, Geometry as GeosGeometry};
use log::info;
use serde_json::{Map, Value};

use crate::collect::global_variables::BOUNDARY_FILE;
use crate::commons::basic_functions::find_files;
use crate::config::{LayerConfig, LayerKind};
use crate::error::{PipelineError, Result};
use crate::geo_core::{from_geos, to_geos, union_all, WGS84};
use crate::layer::{Layer, Record};

/// `root/name` if present, else the first file called `name` further down in sorted order
pub fn find_file(root: &Path, name: &str) -> Result<Option<PathBuf>> {
    let direct = root.join(name);
    if direct.is_file() {
        return Ok(Some(direct));
    }
    let found = find_files(root, |path| {
        path.file_name().is_some_and(|n| n == name)
    })?;
    Ok(found.into_iter().next())
}

fn require_file(root: &Path, name: &str) -> Result<PathBuf> {
    find_file(root, name)?.ok_or_else(|| PipelineError::MissingRequiredFile {
        name: name.to_string(),
        root: root.to_path_buf(),
    })
}

/// Locate the boundary file anywhere under the ETL directory
pub fn find_boundary(etl_dir: &Path) -> Result<PathBuf> {
    require_file(etl_dir, BOUNDARY_FILE)
}

/// Boundary polygon in WGS84
pub fn load_boundary(etl_dir: &Path) -> Result<Layer> {
    let path = find_boundary(etl_dir)?;
    info!("boundary found: {}", path.display());
    let boundary = Layer::read_geojson(&path)?;
    if boundary.crs.is_none() {
        // GeoJSON without a crs member is WGS84
        return Ok(Layer {
            crs: Some(WGS84),
            ..boundary
        });
    }
    boundary.reprojected(WGS84)
}

/// `etl_dir/{kind}_raw.geojson`, or the first match further down
pub fn locate_raw_layer(etl_dir: &Path, config: &LayerConfig) -> Result<PathBuf> {
    let direct = etl_dir.join(config.raw_file);
    if direct.is_file() {
        return Ok(direct);
    }
    require_file(etl_dir, config.raw_file)
}

/// Single GEOS mask from every boundary geometry
pub fn boundary_mask(boundary: &Layer) -> Result<GeosGeometry> {
    let parts = boundary
        .geometries()
        .map(to_geos)
        .collect::<Result<Vec<_>>>()?;
    union_all(parts)?.ok_or_else(|| PipelineError::BoundaryNotFound(boundary.origin_label()))
}

/// Cut every feature to the mask, dropping those left empty
pub fn clip_layer(layer: &Layer, mask: &GeosGeometry) -> Result<Layer> {
    let mut clipped = Layer {
        crs: layer.crs,
        columns: layer.columns.clone(),
        records: Vec::new(),
        origin: layer.origin.clone(),
    };
    for record in &layer.records {
        let Some(geometry) = record.geometry.as_ref() else {
            continue;
        };
        let geos_geom = to_geos(geometry)?;
        if !geos_geom.intersects(mask)? {
            continue;
        }
        if let Some(cut) = from_geos(geos_geom.intersection(mask)?)? {
            clipped
                .records
                .push(Record::new(Some(cut), record.properties.clone()));
        }
    }
    Ok(clipped)
}

/// Keep and rename the configured columns.
///
/// Column presence is the union of attribute names over the layer; every
/// absent source column is reported at once.
pub fn select_columns(layer: &Layer, config: &LayerConfig) -> Result<Layer> {
    let present: BTreeSet<&str> = layer
        .columns
        .iter()
        .map(String::as_str)
        .chain(
            layer
                .records
                .iter()
                .flat_map(|r| r.properties.keys().map(String::as_str)),
        )
        .collect();
    let missing: BTreeSet<String> = config
        .source_columns()
        .filter(|c| !present.contains(c))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::MissingColumn {
            kind: config.kind,
            missing,
        });
    }

    let mut selected = Layer::new(layer.crs);
    selected.origin = layer.origin.clone();
    for (_, target) in config.columns {
        selected.add_column(target);
    }
    for record in &layer.records {
        let properties: Map<String, Value> = config
            .columns
            .iter()
            .map(|(source, target)| {
                let value = record.properties.get(*source).cloned().unwrap_or(Value::Null);
                (target.to_string(), value)
            })
            .collect();
        selected
            .records
            .push(Record::new(record.geometry.clone(), properties));
    }
    Ok(selected)
}

/// Clip and clean one kind; returns the written path
pub fn clip_and_clean_layer(
    kind: LayerKind,
    mask: &GeosGeometry,
    mask_crs: i32,
    etl_dir: &Path,
    out_dir: &Path,
) -> Result<PathBuf> {
    let config = kind.config();
    let raw_path = locate_raw_layer(etl_dir, config)?;
    let mut raw = Layer::read_geojson(&raw_path)?;
    if raw.crs.is_none() {
        raw.crs = Some(WGS84);
    }
    if raw.crs != Some(mask_crs) {
        raw = raw.reprojected(mask_crs)?;
    }

    let cleaned = select_columns(&clip_layer(&raw, mask)?, config)?;
    let out_path = out_dir.join(config.cleaned_file);
    cleaned.write_geojson(&out_path)?;
    info!("{:<12} -> {} ({} features)", kind, out_path.display(), cleaned.len());
    Ok(out_path)
}

/// Clip all three merged layers to the boundary
pub fn clip_and_clean(etl_dir: &Path, out_dir: &Path) -> Result<Vec<PathBuf>> {
    let boundary = load_boundary(etl_dir)?;
    let mask = boundary_mask(&boundary)?;
    LayerKind::ALL
        .into_iter()
        .map(|kind| clip_and_clean_layer(kind, &mask, WGS84, etl_dir, out_dir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_core::BoundingBox;
    use geo::{Area, Geometry as GeoGeometry};
    use serde_json::json;

    fn square(min: f64, max: f64) -> GeoGeometry<f64> {
        BoundingBox::new(min, min, max, max).to_polygon().into()
    }

    fn building(cadnum: &str, geometry: GeoGeometry<f64>) -> Record {
        let mut props = Map::new();
        for (key, value) in [
            ("cadnum", json!(cadnum)),
            ("appcount", json!(4)),
            ("flrcount", json!(5)),
            ("functype", json!("Жилищна сграда")),
            ("strename", json!("ул. Тест")),
            ("strnum", json!("1")),
            ("extra", json!("dropped")),
        ] {
            props.insert(key.to_string(), value);
        }
        Record::new(Some(geometry), props)
    }

    fn raw_buildings() -> Layer {
        let mut layer = Layer::new(Some(WGS84));
        layer.push(building("1.2.3.1", square(0.0, 1.0)));
        layer.push(building("1.2.4.1", square(1.5, 3.0)));
        layer.push(building("1.2.5.1", square(5.0, 6.0)));
        layer
    }

    #[test]
    fn test_clip_cuts_and_drops() {
        let mask = to_geos(&square(0.0, 2.0)).unwrap();
        let clipped = clip_layer(&raw_buildings(), &mask).unwrap();
        assert_eq!(clipped.len(), 2);
        let cut = clipped.records[1].geometry.as_ref().unwrap();
        assert!((cut.unsigned_area() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_select_columns_renames_in_order() {
        let selected = select_columns(&raw_buildings(), LayerKind::Building.config()).unwrap();
        let keys: Vec<&str> = selected.records[0].properties.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["cadnum", "appcount", "flrcount", "functype", "strename", "strnum"]);
        assert_eq!(selected.columns.len(), 6);
    }

    #[test]
    fn test_select_columns_reports_all_missing() {
        let err = select_columns(&raw_buildings(), LayerKind::Unit.config()).unwrap_err();
        match err {
            PipelineError::MissingColumn { kind, missing } => {
                assert_eq!(kind, LayerKind::Unit);
                let missing: Vec<&str> = missing.iter().map(String::as_str).collect();
                assert_eq!(missing, vec!["AREA", "apparea", "apptype"]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_clip_and_clean_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let etl = dir.path().join("etl");
        let out = dir.path().join("out");

        let mut boundary = Layer::new(Some(WGS84));
        boundary.push(Record::new(Some(square(0.0, 2.0)), Map::new()));
        boundary.write_geojson(&etl.join("nested").join(BOUNDARY_FILE)).unwrap();
        raw_buildings().write_geojson(&etl.join("buildings_raw.geojson")).unwrap();

        let mask = boundary_mask(&load_boundary(&etl).unwrap()).unwrap();
        let first = clip_and_clean_layer(LayerKind::Building, &mask, WGS84, &etl, &out).unwrap();
        let a = Layer::read_geojson(&first).unwrap();
        clip_and_clean_layer(LayerKind::Building, &mask, WGS84, &etl, &out).unwrap();
        let b = Layer::read_geojson(&first).unwrap();

        let props = |l: &Layer| l.records.iter().map(|r| r.properties.clone()).collect::<Vec<_>>();
        assert_eq!(props(&a), props(&b));
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_missing_boundary_names_file_and_root() {
        let dir = tempfile::tempdir().unwrap();
        match find_boundary(dir.path()).unwrap_err() {
            PipelineError::MissingRequiredFile { name, root } => {
                assert_eq!(name, BOUNDARY_FILE);
                assert_eq!(root, dir.path());
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
