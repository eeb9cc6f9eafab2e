use std::path::{Path, PathBuf};

use geo::{
    EuclideanLength, Geometry as GeoGeometry, LineInterpolatePoint, LineString, MultiLineString,
};
use geos::{Geom, Geometry as GeosGeometry};
use log::{info, warn};
use serde_json::{json, Map, Value};

use crate::collect::global_variables::{PARKED_CARS_FILE, STREET_CAPACITY_FILE};
use crate::error::Result;
use crate::geo_core::{from_geos, to_geos, union_all, WEB_MERCATOR, WGS84};
use crate::layer::{Layer, Record};

/// On-street parking model
#[derive(Debug, Clone, PartialEq)]
pub struct StreetParams {
    /// Kerb length reserved per car, metres
    pub slot_length: f64,
    pub car_length: f64,
    /// Space left between two parked cars
    pub gap: f64,
    /// Radius around crossings and bus stops
    pub crossing_buffer: f64,
    /// Radius around driveways
    pub driveway_buffer: f64,
    pub max_segment_length: f64,
    pub min_capacity: u32,
    pub max_capacity: u32,
    /// Road classes never used for parking
    pub denied_highways: Vec<String>,
    /// `highway` values of point blockers
    pub blocking_highways: Vec<String>,
}

impl Default for StreetParams {
    fn default() -> Self {
        StreetParams {
            slot_length: 5.0,
            car_length: 4.5,
            gap: 0.5,
            crossing_buffer: 25.0,
            driveway_buffer: 10.0,
            max_segment_length: 100.0,
            min_capacity: 1,
            max_capacity: 14,
            denied_highways: ["primary", "secondary", "tertiary", "trunk", "motorway", "unclassified"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            blocking_highways: vec!["crossing".to_string(), "bus_stop".to_string()],
        }
    }
}

impl StreetParams {
    /// Edge class check; a list-valued `highway` is rejected if any entry is denied
    pub fn is_eligible(&self, highway: Option<&Value>) -> bool {
        let denied = |class: &str| self.denied_highways.iter().any(|d| d == class);
        match highway {
            Some(Value::String(class)) => !denied(class),
            Some(Value::Array(classes)) => !classes.iter().filter_map(Value::as_str).any(denied),
            _ => true,
        }
    }

    /// Whole slots that fit on a segment
    pub fn segment_capacity(&self, length: f64) -> u32 {
        (length / self.slot_length).floor().max(0.0) as u32
    }

    pub fn keeps_segment(&self, length: f64, capacity: u32) -> bool {
        length <= self.max_segment_length
            && capacity >= self.min_capacity
            && capacity <= self.max_capacity
    }

    /// One short line per car along `part`
    pub fn slot_lines(&self, part: &LineString<f64>) -> Vec<LineString<f64>> {
        let length = part.euclidean_length();
        if length <= 0.0 {
            return Vec::new();
        }
        let slots = self.segment_capacity(length);
        (0..slots)
            .filter_map(|i| {
                let start = i as f64 * self.slot_length + self.gap / 2.0;
                let end = start + self.car_length - self.gap;
                if end > length {
                    return None;
                }
                let a = part.line_interpolate_point(start / length)?;
                let b = part.line_interpolate_point(end / length)?;
                Some(LineString::from(vec![a.0, b.0]))
            })
            .collect()
    }
}

/// Line parts of a difference result
fn line_parts(geometry: GeoGeometry<f64>) -> Vec<LineString<f64>> {
    match geometry {
        GeoGeometry::LineString(line) => vec![line],
        GeoGeometry::MultiLineString(lines) => lines.0,
        GeoGeometry::GeometryCollection(collection) => {
            collection.0.into_iter().flat_map(line_parts).collect()
        }
        _ => Vec::new(),
    }
}

fn is_line(geometry: &GeoGeometry<f64>) -> bool {
    matches!(
        geometry,
        GeoGeometry::LineString(_) | GeoGeometry::MultiLineString(_)
    )
}

/// Union of buffered crossings, bus stops and driveways, in metres
pub fn blocking_zone(blockers: &Layer, params: &StreetParams) -> Result<Option<GeosGeometry>> {
    let mut buffers = Vec::new();
    for record in &blockers.records {
        let Some(geometry) = record.geometry.as_ref() else {
            continue;
        };
        let is_stop = record
            .str_prop("highway")
            .is_some_and(|h| params.blocking_highways.iter().any(|b| b == h));
        let is_driveway = record.str_prop("service") == Some("driveway") && is_line(geometry);
        let radius = if is_stop {
            params.crossing_buffer
        } else if is_driveway {
            params.driveway_buffer
        } else {
            continue;
        };
        buffers.push(to_geos(geometry)?.buffer(radius, 8)?);
    }
    union_all(buffers)
}

/// Usable kerb segments and the car slots laid on them, both in the input CRS
#[derive(Debug, Default)]
pub struct StreetCapacity {
    pub segments: Layer,
    pub cars: Layer,
}

impl StreetCapacity {
    pub fn total_capacity(&self) -> u64 {
        self.segments
            .records
            .iter()
            .filter_map(|r| r.properties.get("capacity").and_then(Value::as_u64))
            .sum()
    }
}

/// Remove blocked stretches from eligible edges and discretize them into slots.
///
/// Both layers must be in a metric CRS.
pub fn synthesize(edges: &Layer, blockers: &Layer, params: &StreetParams) -> Result<StreetCapacity> {
    let zone = blocking_zone(blockers, params)?;
    let mut segments = Layer::new(edges.crs);
    let mut cars = Layer::new(edges.crs);

    for (index, record) in edges.records.iter().enumerate() {
        if !params.is_eligible(record.properties.get("highway")) {
            continue;
        }
        let Some(geometry) = record.geometry.as_ref().filter(|g| is_line(g)) else {
            continue;
        };
        let remaining = match zone.as_ref() {
            Some(zone) => from_geos(to_geos(geometry)?.difference(zone)?)?,
            None => Some(geometry.clone()),
        };
        let parts = remaining.map(line_parts).unwrap_or_default();
        if parts.is_empty() {
            continue;
        }

        let length: f64 = parts.iter().map(|p| p.euclidean_length()).sum();
        let capacity = params.segment_capacity(length);
        if !params.keeps_segment(length, capacity) {
            continue;
        }

        let mut properties = record.properties.clone();
        properties.insert("length_m".to_string(), json!(length));
        properties.insert("capacity".to_string(), json!(capacity));
        let geometry = if parts.len() == 1 {
            GeoGeometry::LineString(parts[0].clone())
        } else {
            GeoGeometry::MultiLineString(MultiLineString::new(parts.clone()))
        };
        segments.push(Record::new(Some(geometry), properties));

        for slot in parts.iter().flat_map(|p| params.slot_lines(p)) {
            let mut properties = Map::new();
            properties.insert("segment".to_string(), json!(index));
            cars.push(Record::new(Some(slot.into()), properties));
        }
    }
    Ok(StreetCapacity { segments, cars })
}

/// Street capacity stage: WGS84 inputs, metric work, WGS84 outputs.
///
/// A missing blockers file means nothing is subtracted from the edges.
pub fn run_street_capacity(
    edges_path: &Path,
    blockers_path: &Path,
    out_dir: &Path,
    params: &StreetParams,
) -> Result<(PathBuf, PathBuf)> {
    info!("loading street edges from {}", edges_path.display());
    let edges = with_default_crs(Layer::read_geojson(edges_path)?).reprojected(WEB_MERCATOR)?;
    let blockers = if blockers_path.is_file() {
        with_default_crs(Layer::read_geojson(blockers_path)?).reprojected(WEB_MERCATOR)?
    } else {
        warn!(
            "{} not found, no parking blockers applied",
            blockers_path.display()
        );
        Layer::new(Some(WEB_MERCATOR))
    };

    let capacity = synthesize(&edges, &blockers, params)?;
    let segments_out = out_dir.join(STREET_CAPACITY_FILE);
    let cars_out = out_dir.join(PARKED_CARS_FILE);
    let segment_count = capacity.segments.len();
    capacity.segments.reprojected(WGS84)?.write_geojson(&segments_out)?;
    info!("total segments: {}", segment_count);
    info!("total parking spaces: {}", capacity.cars.len());
    capacity.cars.reprojected(WGS84)?.write_geojson(&cars_out)?;
    Ok((segments_out, cars_out))
}

fn with_default_crs(mut layer: Layer) -> Layer {
    if layer.crs.is_none() {
        layer.crs = Some(WGS84);
    }
    layer
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{line_string, point};

    fn edge(highway: Value, line: LineString<f64>) -> Record {
        let mut props = Map::new();
        props.insert("highway".to_string(), highway);
        Record::new(Some(line.into()), props)
    }

    #[test]
    fn test_capacity_and_filtering() {
        let params = StreetParams::default();
        assert_eq!(params.segment_capacity(12.0), 2);
        assert_eq!(params.segment_capacity(4.9), 0);
        assert!(!params.keeps_segment(4.9, 0));
        assert!(params.keeps_segment(12.0, 2));
        assert!(!params.keeps_segment(100.5, 14));
        assert!(!params.keeps_segment(75.0, 15));
    }

    #[test]
    fn test_list_highway_denied_if_any_entry_denied() {
        let params = StreetParams::default();
        assert!(params.is_eligible(Some(&json!("residential"))));
        assert!(!params.is_eligible(Some(&json!("tertiary"))));
        assert!(!params.is_eligible(Some(&json!(["residential", "primary"]))));
        assert!(params.is_eligible(Some(&json!(["residential", "living_street"]))));
    }

    #[test]
    fn test_slot_positions() {
        let params = StreetParams::default();
        let line = line_string![(x: 0.0, y: 0.0), (x: 12.0, y: 0.0)];
        let slots = params.slot_lines(&line);
        assert_eq!(slots.len(), 2);
        let first = &slots[0].0;
        assert!((first[0].x - 0.25).abs() < 1e-9);
        assert!((first[1].x - 4.25).abs() < 1e-9);
        assert!((slots[1].0[0].x - 5.25).abs() < 1e-9);
    }

    #[test]
    fn test_synthesize_subtracts_crossing() {
        let params = StreetParams::default();
        let mut edges = Layer::new(Some(WEB_MERCATOR));
        edges.push(edge(json!("residential"), line_string![(x: 0.0, y: 0.0), (x: 90.0, y: 0.0)]));
        edges.push(edge(json!("primary"), line_string![(x: 0.0, y: 10.0), (x: 50.0, y: 10.0)]));
        edges.push(edge(json!("residential"), line_string![(x: 0.0, y: 20.0), (x: 3.0, y: 20.0)]));

        let mut blockers = Layer::new(Some(WEB_MERCATOR));
        let mut props = Map::new();
        props.insert("highway".to_string(), json!("crossing"));
        blockers.push(Record::new(Some(point!(x: 90.0, y: 0.0).into()), props));

        let result = synthesize(&edges, &blockers, &params).unwrap();
        assert_eq!(result.segments.len(), 1);
        let length = result.segments.records[0].num_prop("length_m").unwrap();
        assert!((length - 65.0).abs() < 0.01);
        assert_eq!(result.total_capacity(), 13);
        assert_eq!(result.cars.len(), 13);
        assert_eq!(result.cars.records[0].properties["segment"], json!(0));
    }

    #[test]
    fn test_driveway_points_are_ignored() {
        let params = StreetParams::default();
        let mut blockers = Layer::new(Some(WEB_MERCATOR));
        let mut props = Map::new();
        props.insert("service".to_string(), json!("driveway"));
        blockers.push(Record::new(Some(point!(x: 0.0, y: 0.0).into()), props));
        assert!(blocking_zone(&blockers, &params).unwrap().is_none());
    }
}
