use std::path::{Path, PathBuf};

use log::info;
use serde_json::json;

use crate::collect::global_variables::MUNICIPAL_PARKING_FILE;
use crate::config::LayerKind;
use crate::error::Result;
use crate::layer::{Layer, Record};

/// Which parcels can host a municipal car park and how many floors are estimated
#[derive(Debug, Clone, PartialEq)]
pub struct MunicipalParams {
    pub ownership: Vec<String>,
    pub usetype: String,
    /// Square metres
    pub min_area: f64,
    /// Square metres per parking space on one floor
    pub area_per_space: f64,
    pub floors: u32,
}

impl Default for MunicipalParams {
    fn default() -> Self {
        MunicipalParams {
            ownership: vec!["Общинска публична".to_string(), "Общинска частна".to_string()],
            usetype: "За друг вид застрояване".to_string(),
            min_area: 300.0,
            area_per_space: 30.0,
            floors: 4,
        }
    }
}

impl MunicipalParams {
    pub fn qualifies(&self, parcel: &Record) -> bool {
        let owned = parcel
            .str_prop("proptype")
            .is_some_and(|p| self.ownership.iter().any(|o| o == p));
        let usable = parcel.str_prop("usetype") == Some(self.usetype.as_str());
        let large = parcel.num_prop("area").is_some_and(|a| a >= self.min_area);
        owned && usable && large
    }

    /// Spaces per floor count, `[floor_1, 2 * floor_1, ...]`
    pub fn floor_capacity(&self, area: f64) -> Vec<u64> {
        let first = (area / self.area_per_space).floor().max(0.0) as u64;
        (1..=u64::from(self.floors)).map(|n| first * n).collect()
    }
}

/// Property name for the n-floor estimate
pub fn floor_property(floors: usize) -> String {
    format!("{}_floor_parking_spaces", floors)
}

/// Keep qualifying parcels and append the per-floor estimates
pub fn filter_municipal(parcels: &Layer, params: &MunicipalParams) -> Layer {
    let mut selected = Layer::new(parcels.crs);
    selected.columns = parcels.columns.clone();
    for parcel in parcels.records.iter().filter(|p| params.qualifies(p)) {
        let mut record = parcel.clone();
        let area = parcel.num_prop("area").unwrap_or_default();
        for (i, spaces) in params.floor_capacity(area).into_iter().enumerate() {
            record.properties.insert(floor_property(i + 1), json!(spaces));
        }
        selected.push(record);
    }
    selected
}

/// Municipal land stage over the cleaned land parcels
pub fn run_municipal_filter(out_dir: &Path, params: &MunicipalParams) -> Result<PathBuf> {
    let input = out_dir.join(LayerKind::LandParcel.config().cleaned_file);
    info!("loading land parcels from {}", input.display());
    let parcels = Layer::read_geojson(&input)?;
    let selected = filter_municipal(&parcels, params);
    let output = out_dir.join(MUNICIPAL_PARKING_FILE);
    selected.write_geojson(&output)?;
    info!("saved {} municipal parcels to {}", selected.len(), output.display());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, Value};

    fn parcel(proptype: &str, usetype: &str, area: Value) -> Record {
        let mut props = Map::new();
        props.insert("proptype".to_string(), json!(proptype));
        props.insert("usetype".to_string(), json!(usetype));
        props.insert("area".to_string(), area);
        Record::new(None, props)
    }

    #[test]
    fn test_filter_and_floors() {
        let params = MunicipalParams::default();
        let mut layer = Layer::new(Some(4326));
        layer.push(parcel("Общинска частна", "За друг вид застрояване", json!(959.0)));
        layer.push(parcel("Общинска публична", "За друг вид застрояване", json!(299.9)));
        layer.push(parcel("Частна", "За друг вид застрояване", json!(5000)));
        layer.push(parcel("Общинска публична", "Ниско застрояване", json!(5000)));
        layer.push(parcel("Общинска публична", "За друг вид застрояване", json!("300")));

        let selected = filter_municipal(&layer, &params);
        assert_eq!(selected.len(), 2);
        let first = &selected.records[0].properties;
        assert_eq!(first["1_floor_parking_spaces"], json!(31));
        assert_eq!(first["2_floor_parking_spaces"], json!(62));
        assert_eq!(first["4_floor_parking_spaces"], json!(124));
        assert_eq!(selected.records[1].properties["3_floor_parking_spaces"], json!(30));
    }

    #[test]
    fn test_floor_capacity() {
        let params = MunicipalParams::default();
        assert_eq!(params.floor_capacity(300.0), vec![10, 20, 30, 40]);
        assert_eq!(params.floor_capacity(329.0), vec![10, 20, 30, 40]);
    }
}
