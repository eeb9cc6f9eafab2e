use std::collections::BTreeMap;
use std::path::Path;

use log::info;
use serde_json::json;

use crate::error::Result;
use crate::layer::Layer;

/// Demand rules for residential units
#[derive(Debug, Clone, PartialEq)]
pub struct ParkingRules {
    /// `apptype` substring marking an apartment
    pub apartment_marker: String,
    /// `apptype` substring marking a garage
    pub garage_marker: String,
    /// Apartments at or above this floor area need the larger allowance
    pub large_area: f64,
    pub small_need: u32,
    pub large_need: u32,
}

impl Default for ParkingRules {
    fn default() -> Self {
        ParkingRules {
            apartment_marker: "Жилище".to_string(),
            garage_marker: "Гараж".to_string(),
            large_area: 90.0,
            small_need: 1,
            large_need: 2,
        }
    }
}

impl ParkingRules {
    /// Required spaces for one apartment; unknown area counts as small
    pub fn needed_places(&self, area: Option<f64>) -> u32 {
        match area {
            Some(a) if a >= self.large_area => self.large_need,
            _ => self.small_need,
        }
    }

    pub fn is_apartment(&self, apptype: &str) -> bool {
        contains_ignore_case(apptype, &self.apartment_marker)
    }

    pub fn is_garage(&self, apptype: &str) -> bool {
        contains_ignore_case(apptype, &self.garage_marker)
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// First three dot-separated components of a cadastral number
pub fn base_cadnum(cadnum: Option<&str>) -> String {
    match cadnum {
        Some(c) if !c.is_empty() => c.split('.').take(3).collect::<Vec<_>>().join("."),
        _ => String::new(),
    }
}

/// [`ParkingRules::needed_places`] with the default rules
pub fn needed_places(area: Option<f64>) -> u32 {
    ParkingRules::default().needed_places(area)
}

/// Supply and demand for one base parcel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParcelStats {
    pub num_apartments: u32,
    pub num_garages: u32,
    pub sum_needed_place: u32,
}

impl ParcelStats {
    /// Available places: the larger of the two unit counts
    pub fn sum_parking_place(&self) -> u32 {
        self.num_apartments.max(self.num_garages)
    }
}

/// Aggregate units per base parcel
pub fn compute_parcel_stats(units: &Layer, rules: &ParkingRules) -> BTreeMap<String, ParcelStats> {
    let mut stats: BTreeMap<String, ParcelStats> = BTreeMap::new();
    for unit in &units.records {
        let Some(apptype) = unit.str_prop("apptype") else {
            continue;
        };
        let apartment = rules.is_apartment(apptype);
        let garage = rules.is_garage(apptype);
        if !apartment && !garage {
            continue;
        }
        let entry = stats.entry(base_cadnum(unit.str_prop("cadnum"))).or_default();
        if apartment {
            entry.num_apartments += 1;
            entry.sum_needed_place += rules.needed_places(unit.num_prop("area"));
        }
        if garage {
            entry.num_garages += 1;
        }
    }
    stats
}

/// Left-join parcel statistics onto every building
pub fn enrich_buildings(buildings: &Layer, stats: &BTreeMap<String, ParcelStats>) -> Layer {
    let mut enriched = buildings.clone();
    for column in ["num_apartments", "num_garages", "sum_needed_place", "sum_parking_place"] {
        enriched.add_column(column);
    }
    for building in &mut enriched.records {
        let parcel = base_cadnum(building.str_prop("cadnum"));
        let s = stats.get(&parcel).copied().unwrap_or_default();
        let props = &mut building.properties;
        props.insert("num_apartments".to_string(), json!(s.num_apartments));
        props.insert("num_garages".to_string(), json!(s.num_garages));
        props.insert("sum_needed_place".to_string(), json!(s.sum_needed_place));
        props.insert("sum_parking_place".to_string(), json!(s.sum_parking_place()));
    }
    enriched
}

/// Analytics stage: buildings + units -> enriched buildings
pub fn run_parking_analytics(
    buildings_path: &Path,
    units_path: &Path,
    output_path: &Path,
    rules: &ParkingRules,
) -> Result<usize> {
    info!("loading input data");
    let buildings = Layer::read_geojson(buildings_path)?;
    let units = Layer::read_geojson(units_path)?;

    info!("calculating parcel statistics");
    let stats = compute_parcel_stats(&units, rules);

    info!("merging statistics with {} buildings", buildings.len());
    let enriched = enrich_buildings(&buildings, &stats);
    enriched.write_geojson(output_path)?;
    info!("wrote {} features to {}", enriched.len(), output_path.display());
    Ok(enriched.len())
}
