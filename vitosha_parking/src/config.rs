use std::collections::HashSet;
use std::fmt;

use crate::error::{PipelineError, Result};

/// Thematic cadastral layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LayerKind {
    /// Поземлени имоти
    LandParcel,
    /// Самостоятелни обекти (apartments, garages, shops...)
    Unit,
    /// Сгради
    Building,
}

impl LayerKind {
    /// Every kind, in keyword-matching order
    pub const ALL: [LayerKind; 3] = [LayerKind::LandParcel, LayerKind::Unit, LayerKind::Building];

    /// Static configuration record for this kind
    pub fn config(self) -> &'static LayerConfig {
        match self {
            LayerKind::LandParcel => &LAND_PARCELS,
            LayerKind::Unit => &UNITS,
            LayerKind::Building => &BUILDINGS,
        }
    }

    /// English suffix used in file names
    pub fn slug(self) -> &'static str {
        self.config().slug
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Per-kind configuration: where the layer lives on disk and which attributes survive cleaning.
#[derive(Debug)]
pub struct LayerConfig {
    pub kind: LayerKind,
    /// English suffix (`landparcels`, `units`, `buildings`)
    pub slug: &'static str,
    /// Bulgarian transliterated keyword found in source directory or file names
    pub keyword: &'static str,
    /// Merged output of the normalizer, e.g. `units_raw.geojson`
    pub raw_file: &'static str,
    /// Output of the clip stage, e.g. `vitosha_units.geojson`
    pub cleaned_file: &'static str,
    /// Source column -> cleaned column, in output order
    pub columns: &'static [(&'static str, &'static str)],
    /// Run the double-encoding repair pass on the merged file
    pub hard_fix: bool,
}

impl LayerConfig {
    /// Source columns the clip stage requires
    pub fn source_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|(source, _)| *source)
    }

    fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(PipelineError::InvalidConfig(format!(
                "{}: empty column map",
                self.slug
            )));
        }
        let mut sources = HashSet::new();
        let mut targets = HashSet::new();
        for (source, target) in self.columns {
            if !sources.insert(*source) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{}: source column '{}' listed twice",
                    self.slug, source
                )));
            }
            if !targets.insert(*target) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{}: target column '{}' listed twice",
                    self.slug, target
                )));
            }
        }
        if self.raw_file == self.cleaned_file {
            return Err(PipelineError::InvalidConfig(format!(
                "{}: raw and cleaned file names collide",
                self.slug
            )));
        }
        Ok(())
    }
}

pub static LAND_PARCELS: LayerConfig = LayerConfig {
    kind: LayerKind::LandParcel,
    slug: "landparcels",
    keyword: "pozemleni_imoti",
    raw_file: "landparcels_raw.geojson",
    cleaned_file: "vitosha_landparcels.geojson",
    columns: &[
        ("cadnum", "cadnum"),
        ("AREA", "area"),
        ("proptype", "proptype"),
        ("purpcode", "purpcode"),
        ("purptype", "purptype"),
        ("quarname", "quarname"),
        ("strename", "strename"),
        ("strnum", "strnum"),
        ("usetype", "usetype"),
        ("ekattefn", "city"),
    ],
    hard_fix: false,
};

pub static UNITS: LayerConfig = LayerConfig {
    kind: LayerKind::Unit,
    slug: "units",
    keyword: "samostoyatelni_obekti",
    raw_file: "units_raw.geojson",
    cleaned_file: "vitosha_units.geojson",
    columns: &[
        ("cadnum", "cadnum"),
        ("AREA", "area"),
        ("apparea", "apparea"),
        ("apptype", "apptype"),
        ("strename", "strename"),
        ("strnum", "strnum"),
    ],
    hard_fix: true,
};

pub static BUILDINGS: LayerConfig = LayerConfig {
    kind: LayerKind::Building,
    slug: "buildings",
    keyword: "sgradi",
    raw_file: "buildings_raw.geojson",
    cleaned_file: "vitosha_buildings.geojson",
    columns: &[
        ("cadnum", "cadnum"),
        ("appcount", "appcount"),
        ("flrcount", "flrcount"),
        ("functype", "functype"),
        ("strename", "strename"),
        ("strnum", "strnum"),
    ],
    hard_fix: false,
};

/// Check every layer configuration once at startup.
pub fn validate_layer_configs() -> Result<()> {
    let mut keywords = HashSet::new();
    let mut files = HashSet::new();
    for kind in LayerKind::ALL {
        let config = kind.config();
        if config.kind != kind {
            return Err(PipelineError::InvalidConfig(format!(
                "{} is registered under {:?}",
                config.slug, kind
            )));
        }
        config.validate()?;
        if !keywords.insert(config.keyword) {
            return Err(PipelineError::InvalidConfig(format!(
                "keyword '{}' used by more than one layer",
                config.keyword
            )));
        }
        for file in [config.raw_file, config.cleaned_file] {
            if !files.insert(file) {
                return Err(PipelineError::InvalidConfig(format!(
                    "file name '{}' used by more than one layer",
                    file
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_configs_are_valid() {
        validate_layer_configs().unwrap();
    }

    #[test]
    fn test_land_parcel_renames_ekatte() {
        let config = LayerKind::LandParcel.config();
        assert!(config.columns.contains(&("ekattefn", "city")));
        assert_eq!(config.raw_file, "landparcels_raw.geojson");
    }

    #[test]
    fn test_duplicate_target_rejected() {
        let bad = LayerConfig {
            kind: LayerKind::Unit,
            slug: "units",
            keyword: "x",
            raw_file: "a.geojson",
            cleaned_file: "b.geojson",
            columns: &[("AREA", "area"), ("apparea", "area")],
            hard_fix: false,
        };
        assert!(matches!(bad.validate(), Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_only_units_are_hard_fixed() {
        let fixed: Vec<_> = LayerKind::ALL
            .iter()
            .filter(|k| k.config().hard_fix)
            .collect();
        assert_eq!(fixed, vec![&LayerKind::Unit]);
    }
}
