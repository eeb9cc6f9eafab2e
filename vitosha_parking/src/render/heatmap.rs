use std::fs;
use std::path::{Path, PathBuf};

use geo::{BoundingRect, Centroid, Geometry as GeoGeometry, GeometryCollection, LineString};
use geos::Geom;
use log::info;
use rstar::{RTree, RTreeObject, AABB};
use serde_json::{json, Map, Value};

use crate::collect::global_variables::{
    HEATMAP_FILE, MUNICIPAL_PARKING_FILE, PARKED_CARS_FILE, PARKING_NUM_FILE,
};
use crate::error::{PipelineError, Result};
use crate::geo_core::{to_geos, BoundingBox, Reprojector, WEB_MERCATOR, WGS84};
use crate::geometric::grid::Grid;
use crate::layer::{Layer, Record};

const MISSING: &str = "н/д";
/// Smallest upper end of the colour ramp
const COLOR_MAX_FLOOR: f64 = 100.0;

/// Map styling and supply model
#[derive(Debug, Clone, PartialEq)]
pub struct HeatmapParams {
    /// Walking radius around a building, metres
    pub buffer_radius: f64,
    pub grid_cells: usize,
    pub zoom: u8,
}

impl Default for HeatmapParams {
    fn default() -> Self {
        HeatmapParams {
            buffer_radius: 50.0,
            grid_cells: 800,
            zoom: 15,
        }
    }
}

/// Yellow to red ramp; values at or above `max(vmax, 100)` are pure red
pub fn deficit_color(value: f64, vmin: f64, vmax: f64) -> String {
    let adjusted_max = vmax.max(COLOR_MAX_FLOOR);
    let span = adjusted_max - vmin;
    let ratio = if span > 0.0 {
        ((value - vmin) / span).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let green = (255.0 * (1.0 - ratio)).floor() as u8;
    format!("#ff{:02x}00", green)
}

/// Car slot in the R-tree
struct CarSlot {
    line: LineString<f64>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for CarSlot {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

fn car_index(cars: &Layer) -> RTree<CarSlot> {
    let slots = cars
        .records
        .iter()
        .filter_map(|r| match r.geometry.as_ref() {
            Some(GeoGeometry::LineString(line)) => Some(line.clone()),
            _ => None,
        })
        .filter_map(|line| {
            let rect = line.bounding_rect()?;
            Some(CarSlot {
                envelope: AABB::from_corners(
                    [rect.min().x, rect.min().y],
                    [rect.max().x, rect.max().y],
                ),
                line,
            })
        })
        .collect();
    RTree::bulk_load(slots)
}

/// Car slots lying entirely within `radius` of `geometry`
fn cars_within(geometry: &GeoGeometry<f64>, radius: f64, index: &RTree<CarSlot>) -> Result<u32> {
    let Some(rect) = geometry.bounding_rect() else {
        return Ok(0);
    };
    let query = AABB::from_corners(
        [rect.min().x - radius, rect.min().y - radius],
        [rect.max().x + radius, rect.max().y + radius],
    );
    let buffer = to_geos(geometry)?.buffer(radius, 8)?;
    let mut count = 0;
    for slot in index.locate_in_envelope_intersecting(&query) {
        let car = to_geos(&GeoGeometry::LineString(slot.line.clone()))?;
        if buffer.contains(&car)? {
            count += 1;
        }
    }
    Ok(count)
}

fn num_or_zero(record: &Record, name: &str) -> f64 {
    record.num_prop(name).unwrap_or_default()
}

/// Adds `cars_in_buffer`, `total_supply` and `parking_deficit` to metric buildings
pub fn score_buildings(buildings: &mut Layer, cars: &Layer, params: &HeatmapParams) -> Result<()> {
    let index = car_index(cars);
    for building in &mut buildings.records {
        let cars_in_buffer = match building.geometry.as_ref() {
            Some(g) => cars_within(g, params.buffer_radius, &index)?,
            None => 0,
        };
        let supply = num_or_zero(building, "num_garages") + f64::from(cars_in_buffer);
        let deficit = (num_or_zero(building, "sum_needed_place") - supply).max(0.0);
        let props = &mut building.properties;
        props.insert("cars_in_buffer".to_string(), json!(cars_in_buffer));
        props.insert("total_supply".to_string(), json!(supply as i64));
        props.insert("parking_deficit".to_string(), json!(deficit as i64));
    }
    for column in ["cars_in_buffer", "total_supply", "parking_deficit"] {
        buildings.add_column(column);
    }
    Ok(())
}

/// Grid cells with their summed building deficit, metric CRS
pub fn deficit_grid(buildings: &Layer, grid_cells: usize) -> Option<(Grid, Vec<f64>)> {
    let bounds: BoundingBox = buildings.bounds()?;
    let grid = Grid::covering(&bounds, grid_cells);
    let totals = grid.aggregate(buildings.records.iter().filter_map(|r| {
        r.geometry
            .as_ref()
            .map(|g| (g, r.num_prop("parking_deficit").unwrap_or_default()))
    }));
    Some((grid, totals))
}

fn display_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => MISSING.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 => format!("{}", f as i64),
            _ => n.to_string(),
        },
        Some(other) => other.to_string(),
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            '\n' => out.push_str("<br>"),
            _ => out.push(c),
        }
    }
    out
}

pub fn building_tooltip(building: &Record) -> String {
    let p = &building.properties;
    format!(
        "Сграда\nТип: {}\nНалични места (гаражи+улица): {}\nНужни места: {}\nНедостиг: {}",
        display_value(p.get("functype")),
        display_value(p.get("total_supply")),
        display_value(p.get("sum_needed_place")),
        display_value(p.get("parking_deficit")),
    )
}

pub fn municipal_tooltip(parcel: &Record) -> String {
    let p = &parcel.properties;
    format!(
        "Общински имот\n1 етаж: {} места\n2 етажа: {}\n3 етажа: {}\n4 етажа: {}",
        display_value(p.get("1_floor_parking_spaces")),
        display_value(p.get("2_floor_parking_spaces")),
        display_value(p.get("3_floor_parking_spaces")),
        display_value(p.get("4_floor_parking_spaces")),
    )
}

/// Styled WGS84 feature collection ready for Leaflet
fn styled(
    geometries: impl IntoIterator<Item = (GeoGeometry<f64>, String, String)>,
    weight: f64,
    opacity: f64,
) -> Layer {
    let mut layer = Layer::new(Some(WGS84));
    for (geometry, fill, tooltip) in geometries {
        let mut props = Map::new();
        props.insert("fill".to_string(), json!(fill));
        props.insert("weight".to_string(), json!(weight));
        props.insert("opacity".to_string(), json!(opacity));
        props.insert("tooltip".to_string(), json!(escape_html(&tooltip)));
        layer.push(Record::new(Some(geometry), props));
    }
    layer
}

/// JSON safe to inline in a `<script>` block
fn script_json(layer: &Layer) -> Result<String> {
    let text = serde_json::to_string(&layer.to_feature_collection())?;
    Ok(text.replace("</", "<\\/"))
}

fn render_html(center: (f64, f64), zoom: u8, layers: &[Layer]) -> Result<String> {
    let mut data = Vec::with_capacity(layers.len());
    for layer in layers {
        data.push(script_json(layer)?);
    }
    Ok(format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Vitosha parking heatmap</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css">
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<style>html, body, #map {{ height: 100%; margin: 0; }}</style>
</head>
<body>
<div id="map"></div>
<script>
var map = L.map("map").setView([{lat}, {lon}], {zoom});
L.tileLayer("https://{{s}}.basemaps.cartocdn.com/light_all/{{z}}/{{x}}/{{y}}{{r}}.png", {{
    attribution: "&copy; OpenStreetMap contributors &copy; CARTO",
    subdomains: "abcd",
    maxZoom: 20
}}).addTo(map);
function addLayer(data) {{
    L.geoJSON(data, {{
        style: function (f) {{
            return {{ fillColor: f.properties.fill, color: "black", weight: f.properties.weight, fillOpacity: f.properties.opacity }};
        }},
        onEachFeature: function (f, layer) {{ layer.bindTooltip(f.properties.tooltip); }}
    }}).addTo(map);
}}
addLayer({grid});
addLayer({municipal});
addLayer({buildings});
</script>
</body>
</html>
"#,
        lat = center.1,
        lon = center.0,
        zoom = zoom,
        grid = data[0],
        municipal = data[1],
        buildings = data[2],
    ))
}

/// Visualizer stage: reads the analytics outputs and writes the HTML map
pub fn run_heatmap(out_dir: &Path, params: &HeatmapParams) -> Result<PathBuf> {
    info!("loading input layers");
    let to_metric = |name: &str| -> Result<Layer> {
        let mut layer = Layer::read_geojson(&out_dir.join(name))?;
        if layer.crs.is_none() {
            layer.crs = Some(WGS84);
        }
        layer.reprojected(WEB_MERCATOR)
    };
    let mut buildings = to_metric(PARKING_NUM_FILE)?;
    let cars = to_metric(PARKED_CARS_FILE)?;
    let municipal = to_metric(MUNICIPAL_PARKING_FILE)?;

    score_buildings(&mut buildings, &cars, params)?;

    info!("building a grid of about {} cells", params.grid_cells);
    let (grid, totals) = deficit_grid(&buildings, params.grid_cells).ok_or_else(|| {
        PipelineError::MissingRequiredFile {
            name: format!("{} (with geometries)", PARKING_NUM_FILE),
            root: out_dir.to_path_buf(),
        }
    })?;
    let vmin = totals.iter().copied().fold(f64::INFINITY, f64::min);
    let vmax = totals.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let back = Reprojector::new(WEB_MERCATOR, WGS84)?;
    let mut cells = Vec::new();
    for (cell, &deficit) in grid.cells().into_iter().zip(&totals) {
        if deficit > 0.0 {
            let geometry = back.geometry(&GeoGeometry::Polygon(cell))?;
            cells.push((
                geometry,
                deficit_color(deficit, vmin, vmax),
                format!("Нужда: {}", deficit as i64),
            ));
        }
    }

    let municipal = municipal.reprojected(WGS84)?;
    let buildings = buildings.reprojected(WGS84)?;
    let parcels = municipal.records.iter().filter_map(|r| {
        r.geometry
            .clone()
            .map(|g| (g, "green".to_string(), municipal_tooltip(r)))
    });
    let footprints = buildings.records.iter().filter_map(|r| {
        r.geometry
            .clone()
            .map(|g| (g, "blue".to_string(), building_tooltip(r)))
    });
    let layers = [
        styled(cells, 0.2, 0.5),
        styled(parcels, 0.5, 0.6),
        styled(footprints, 0.3, 0.5),
    ];

    let collection = GeometryCollection::new_from(buildings.geometries().cloned().collect());
    let center = collection
        .centroid()
        .map(|c| (c.x(), c.y()))
        .unwrap_or_default();
    let html = render_html(center, params.zoom, &layers)?;

    let output = out_dir.join(HEATMAP_FILE);
    fs::write(&output, html).map_err(|e| PipelineError::io(&output, e))?;
    info!("map saved to {}", output.display());
    Ok(output)
}
