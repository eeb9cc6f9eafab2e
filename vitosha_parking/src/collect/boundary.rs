use std::path::Path;

use geo::Geometry as GeoGeometry;
use log::info;
use reqwest::blocking::Client;
use serde_json::{json, Map};

use crate::error::{PipelineError, Result};
use crate::geo_core::WGS84;
use crate::layer::{Layer, Record};

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";

/// Geocoder query for a named area
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryQuery {
    /// Free-form place query
    pub query: String,
    /// Value of the `name` property on the saved feature
    pub name: String,
}

impl Default for BoundaryQuery {
    fn default() -> Self {
        BoundaryQuery {
            query: "kv. Vitosha, Sofia, Bulgaria".to_string(),
            name: "Vitosha".to_string(),
        }
    }
}

/// Pick the first areal result of a Nominatim GeoJSON answer
pub fn boundary_from_response(body: &str, query: &BoundaryQuery) -> Result<Layer> {
    let results = Layer::from_geojson_str(body).map_err(|source| PipelineError::Read {
        path: NOMINATIM_URL.into(),
        source,
    })?;
    let polygon = results
        .records
        .into_iter()
        .filter_map(|r| r.geometry)
        .find(|g| matches!(g, GeoGeometry::Polygon(_) | GeoGeometry::MultiPolygon(_)))
        .ok_or_else(|| PipelineError::BoundaryNotFound(query.query.clone()))?;

    let mut properties = Map::new();
    properties.insert("name".to_string(), json!(query.name));
    let mut boundary = Layer::new(Some(WGS84));
    boundary.push(Record::new(Some(polygon), properties));
    Ok(boundary)
}

/// Ask Nominatim for the outline of `query` and save it as a one-feature layer
pub fn fetch_boundary(query: &BoundaryQuery, out_path: &Path) -> Result<Layer> {
    info!("querying OpenStreetMap for \"{}\"", query.query);
    let client = Client::builder()
        .user_agent(concat!("vitosha_parking/", env!("CARGO_PKG_VERSION")))
        .build()?;
    let response = client
        .get(NOMINATIM_URL)
        .query(&[
            ("q", query.query.as_str()),
            ("format", "geojson"),
            ("polygon_geojson", "1"),
            ("limit", "5"),
        ])
        .send()?
        .error_for_status()?;
    let body = response.text()?;

    let boundary = boundary_from_response(&body, query)?;
    boundary.write_geojson(out_path)?;
    info!("boundary saved to {}", out_path.display());
    Ok(boundary)
}
