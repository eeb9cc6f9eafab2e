use std::fs;
use std::path::{Path, PathBuf};

use geo::Geometry as GeoGeometry;
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, Value};
use serde_json::{json, Map, Value as JsonValue};

use crate::error::{PipelineError, ReadError, Result};
use crate::geo_core::{BoundingBox, Reprojector};

/// One geometry + attribute row
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    pub geometry: Option<GeoGeometry<f64>>,
    pub properties: Map<String, JsonValue>,
}

impl Record {
    pub fn new(geometry: Option<GeoGeometry<f64>>, properties: Map<String, JsonValue>) -> Self {
        Record {
            geometry,
            properties,
        }
    }

    /// String attribute, `None` when absent, null or not a string
    pub fn str_prop(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(JsonValue::as_str)
    }

    /// Numeric attribute; numeric strings are parsed
    pub fn num_prop(&self, name: &str) -> Option<f64> {
        self.properties.get(name).and_then(numeric)
    }
}

/// Ordered collection of records sharing one CRS.
///
/// `columns` keeps attribute names in the order they were first seen, which
/// for decoded sources is the schema order of the file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Layer {
    /// EPSG code, `None` when the source declared nothing
    pub crs: Option<i32>,
    pub columns: Vec<String>,
    pub records: Vec<Record>,
    /// File the layer was read from
    pub origin: Option<PathBuf>,
}

impl Layer {
    pub fn new(crs: Option<i32>) -> Self {
        Layer {
            crs,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Human readable origin for error messages
    pub fn origin_label(&self) -> String {
        match &self.origin {
            Some(path) => path.display().to_string(),
            None => "<in-memory layer>".to_string(),
        }
    }

    /// Register a column name if it is new
    pub fn add_column(&mut self, name: &str) {
        if !self.columns.iter().any(|c| c == name) {
            self.columns.push(name.to_string());
        }
    }

    /// Append a record, registering its attribute names
    pub fn push(&mut self, record: Record) {
        for key in record.properties.keys() {
            if !self.columns.iter().any(|c| c == key) {
                self.columns.push(key.clone());
            }
        }
        self.records.push(record);
    }

    /// Move every record of `other` into this layer
    pub fn append(&mut self, other: Layer) {
        for column in &other.columns {
            self.add_column(column);
        }
        self.records.extend(other.records);
    }

    pub fn geometries(&self) -> impl Iterator<Item = &GeoGeometry<f64>> {
        self.records.iter().filter_map(|r| r.geometry.as_ref())
    }

    pub fn bounds(&self) -> Option<BoundingBox> {
        BoundingBox::of(self.geometries())
    }

    /// First non-missing string value of the first column holding one
    pub fn text_sample(&self) -> Option<&str> {
        self.columns.iter().find_map(|column| {
            self.records
                .iter()
                .find_map(|record| record.str_prop(column))
        })
    }

    /// Reproject every geometry to `to`. The layer must carry a CRS.
    pub fn reprojected(mut self, to: i32) -> Result<Layer> {
        let from = self.crs.ok_or_else(|| PipelineError::UnknownCrs {
            origin: self.origin_label(),
        })?;
        let reprojector = Reprojector::new(from, to)?;
        if !reprojector.is_identity() {
            for record in &mut self.records {
                if let Some(geometry) = record.geometry.as_ref() {
                    record.geometry = Some(reprojector.geometry(geometry)?);
                }
            }
        }
        self.crs = Some(to);
        Ok(self)
    }

    /// Parse GeoJSON text (FeatureCollection or single Feature)
    pub fn from_geojson_str(text: &str) -> std::result::Result<Layer, ReadError> {
        let geojson: GeoJson = text.parse()?;
        let (features, foreign_members) = match geojson {
            GeoJson::FeatureCollection(fc) => (fc.features, fc.foreign_members),
            GeoJson::Feature(feature) => (vec![feature], None),
            GeoJson::Geometry(geometry) => (vec![Feature::from(geometry)], None),
        };

        let mut layer = Layer::new(foreign_members.as_ref().and_then(parse_crs_member));
        for feature in features {
            let geometry = match feature.geometry.as_ref() {
                Some(g) => Some(GeoGeometry::<f64>::try_from(g)?),
                None => None,
            };
            layer.push(Record::new(geometry, feature.properties.unwrap_or_default()));
        }
        Ok(layer)
    }

    /// Read a UTF-8 GeoJSON artifact
    pub fn read_geojson(path: &Path) -> Result<Layer> {
        let read = |source: ReadError| PipelineError::Read {
            path: path.to_path_buf(),
            source,
        };
        let bytes = fs::read(path).map_err(|e| read(e.into()))?;
        let text = String::from_utf8(bytes).map_err(|_| read(ReadError::InvalidText { encoding: "utf-8" }))?;
        let mut layer = Layer::from_geojson_str(&text).map_err(read)?;
        layer.origin = Some(path.to_path_buf());
        Ok(layer)
    }

    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .records
            .iter()
            .map(|record| Feature {
                bbox: None,
                geometry: record
                    .geometry
                    .as_ref()
                    .map(|g| Geometry::new(Value::from(g))),
                id: None,
                properties: Some(record.properties.clone()),
                foreign_members: None,
            })
            .collect();

        let foreign_members = self.crs.map(|epsg| {
            let mut members = Map::new();
            members.insert(
                "crs".to_string(),
                json!({
                    "type": "name",
                    "properties": { "name": format!("urn:ogc:def:crs:EPSG::{}", epsg) }
                }),
            );
            members
        });

        FeatureCollection {
            bbox: None,
            foreign_members,
            features,
        }
    }

    /// Write as a GeoJSON FeatureCollection, creating parent directories
    pub fn write_geojson(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
        let geojson = GeoJson::from(self.to_feature_collection());
        fs::write(path, geojson.to_string()).map_err(|e| PipelineError::io(path, e))?;
        Ok(())
    }
}

/// EPSG code from a legacy `crs` member
fn parse_crs_member(members: &Map<String, JsonValue>) -> Option<i32> {
    let name = members
        .get("crs")?
        .get("properties")?
        .get("name")?
        .as_str()?;
    if name.ends_with("CRS84") {
        return Some(4326);
    }
    name.rsplit(':').next()?.trim().parse().ok()
}

/// Numeric view of an attribute value
pub fn numeric(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;

    const SAMPLE: &str = r#"{
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::7801"}},
        "features": [
            {"type": "Feature", "geometry": {"type": "Point", "coordinates": [1.0, 2.0]},
             "properties": {"cadnum": null, "AREA": 12.5, "apptype": "Жилище"}},
            {"type": "Feature", "geometry": null,
             "properties": {"cadnum": "68134.905.1006.1.3", "extra": 1}}
        ]
    }"#;

    #[test]
    fn test_parse_keeps_schema_order_and_crs() {
        let layer = Layer::from_geojson_str(SAMPLE).unwrap();
        assert_eq!(layer.crs, Some(7801));
        assert_eq!(layer.columns, vec!["cadnum", "AREA", "apptype", "extra"]);
        assert_eq!(layer.len(), 2);
        assert!(layer.records[1].geometry.is_none());
    }

    #[test]
    fn test_text_sample_uses_first_text_column() {
        let layer = Layer::from_geojson_str(SAMPLE).unwrap();
        assert_eq!(layer.text_sample(), Some("68134.905.1006.1.3"));
        assert_eq!(Layer::new(None).text_sample(), None);
    }

    #[test]
    fn test_crs84_member() {
        let text = r#"{"type":"FeatureCollection",
            "crs":{"type":"name","properties":{"name":"urn:ogc:def:crs:OGC:1.3:CRS84"}},
            "features":[]}"#;
        assert_eq!(Layer::from_geojson_str(text).unwrap().crs, Some(4326));
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.geojson");
        let mut layer = Layer::new(Some(4326));
        let mut props = Map::new();
        props.insert("name".to_string(), json!("Витоша"));
        layer.push(Record::new(Some(Point::new(23.3, 42.66).into()), props));
        layer.write_geojson(&path).unwrap();

        let back = Layer::read_geojson(&path).unwrap();
        assert_eq!(back.crs, Some(4326));
        assert_eq!(back.records[0].str_prop("name"), Some("Витоша"));
        assert_eq!(back.origin.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_numeric_accepts_strings() {
        assert_eq!(numeric(&json!(89.9)), Some(89.9));
        assert_eq!(numeric(&json!(" 120 ")), Some(120.0));
        assert_eq!(numeric(&json!("n/a")), None);
        assert_eq!(numeric(&JsonValue::Null), None);
    }

    #[test]
    fn test_reproject_without_crs_fails() {
        let layer = Layer::new(None);
        assert!(matches!(
            layer.reprojected(4326),
            Err(PipelineError::UnknownCrs { .. })
        ));
    }

    #[test]
    fn test_append_merges_columns() {
        let mut a = Layer::from_geojson_str(SAMPLE).unwrap();
        let mut b = Layer::new(Some(7801));
        let mut props = Map::new();
        props.insert("flrcount".to_string(), json!(4));
        b.push(Record::new(None, props));
        a.append(b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.columns.last().map(String::as_str), Some("flrcount"));
    }
}
