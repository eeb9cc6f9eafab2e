use geo::{coord, BoundingRect, Coord, Geometry as GeoGeometry, MapCoords, Polygon, Rect};
use geos::{Geom, Geometry as GeosGeometry};
use proj::Proj;

use crate::error::Result;

/// WGS 84 longitude/latitude, the CRS of every finished artifact
pub const WGS84: i32 = 4326;
/// Web Mercator, used wherever distances are measured in metres
pub const WEB_MERCATOR: i32 = 3857;
/// BGS2005 / CCS2005, the Bulgarian cadastral system assumed for files without a `.prj`
pub const BGS2005: i32 = 7801;

/// `EPSG:xxxx` authority string for PROJ
pub fn authority(epsg: i32) -> String {
    format!("EPSG:{}", epsg)
}

/// Reprojects geometries between two EPSG systems.
///
/// Source and target being equal yields an identity transform that never
/// touches PROJ, so coordinates come back bit-for-bit unchanged.
pub struct Reprojector {
    proj: Option<Proj>,
}

impl Reprojector {
    pub fn new(from: i32, to: i32) -> Result<Self> {
        let proj = if from == to {
            None
        } else {
            Some(Proj::new_known_crs(&authority(from), &authority(to), None)?)
        };
        Ok(Reprojector { proj })
    }

    pub fn is_identity(&self) -> bool {
        self.proj.is_none()
    }

    pub fn geometry(&self, geometry: &GeoGeometry<f64>) -> Result<GeoGeometry<f64>> {
        let Some(proj) = self.proj.as_ref() else {
            return Ok(geometry.clone());
        };
        let projected = geometry.try_map_coords(|c: Coord<f64>| {
            proj.convert((c.x, c.y)).map(|(x, y)| coord! { x: x, y: y })
        })?;
        Ok(projected)
    }
}

/// Bounding box structure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        BoundingBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    /// Total bounds of a set of geometries, `None` when there is nothing to measure
    pub fn of<'a>(geometries: impl IntoIterator<Item = &'a GeoGeometry<f64>>) -> Option<Self> {
        geometries
            .into_iter()
            .filter_map(|g| g.bounding_rect())
            .map(|r| BoundingBox::new(r.min().x, r.min().y, r.max().x, r.max().y))
            .reduce(|a, b| {
                BoundingBox::new(
                    a.min_x.min(b.min_x),
                    a.min_y.min(b.min_y),
                    a.max_x.max(b.max_x),
                    a.max_y.max(b.max_y),
                )
            })
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Rect::new(
            coord! { x: self.min_x, y: self.min_y },
            coord! { x: self.max_x, y: self.max_y },
        )
        .to_polygon()
    }
}

/// Convert a geo geometry to GEOS for overlay operations
pub fn to_geos(geometry: &GeoGeometry<f64>) -> Result<GeosGeometry> {
    let geos_geom: GeosGeometry = geometry.clone().try_into()?;
    Ok(geos_geom)
}

/// Convert a GEOS result back to geo, `None` for empty results
pub fn from_geos(geometry: GeosGeometry) -> Result<Option<GeoGeometry<f64>>> {
    if geometry.is_empty()? {
        return Ok(None);
    }
    let geo_geom: GeoGeometry<f64> = geometry.try_into()?;
    Ok(Some(geo_geom))
}

/// Union of several GEOS geometries, `None` when the input is empty
pub fn union_all(geometries: Vec<GeosGeometry>) -> Result<Option<GeosGeometry>> {
    if geometries.is_empty() {
        return Ok(None);
    }
    let collection = GeosGeometry::create_geometry_collection(geometries)?;
    Ok(Some(collection.unary_union()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Point};

    #[test]
    fn test_authority() {
        assert_eq!(authority(WGS84), "EPSG:4326");
        assert_eq!(authority(BGS2005), "EPSG:7801");
    }

    #[test]
    fn test_bounding_box_of_geometries() {
        let a: GeoGeometry<f64> = Point::new(1.0, 5.0).into();
        let b: GeoGeometry<f64> = polygon![
            (x: -2.0, y: 0.0),
            (x: 3.0, y: 0.0),
            (x: 3.0, y: 2.0),
            (x: -2.0, y: 0.0),
        ]
        .into();
        let bbox = BoundingBox::of([&a, &b]).unwrap();
        assert_eq!(bbox, BoundingBox::new(-2.0, 0.0, 3.0, 5.0));
        assert_eq!(bbox.width(), 5.0);
        assert!(BoundingBox::of(std::iter::empty()).is_none());
    }

    #[test]
    fn test_same_crs_is_identity() {
        let reprojector = Reprojector::new(BGS2005, BGS2005).unwrap();
        assert!(reprojector.is_identity());
        let g: GeoGeometry<f64> = Point::new(321_456.789, 4_725_111.123).into();
        assert_eq!(reprojector.geometry(&g).unwrap(), g);
    }

    #[test]
    fn test_reproject_to_web_mercator() {
        // Needs the PROJ database; Sofia in Web Mercator is roughly x=2.59e6, y=5.27e6
        let Ok(reprojector) = Reprojector::new(WGS84, WEB_MERCATOR) else {
            return;
        };
        assert!(!reprojector.is_identity());
        let g: GeoGeometry<f64> = Point::new(23.32, 42.66).into();
        if let Ok(GeoGeometry::Point(p)) = reprojector.geometry(&g) {
            assert!((p.x() - 2_596_000.0).abs() < 5_000.0);
            assert!((p.y() - 5_262_000.0).abs() < 20_000.0);
        }
    }

    #[test]
    fn test_geos_round_trip_drops_empty() {
        let square: GeoGeometry<f64> = BoundingBox::new(0.0, 0.0, 1.0, 1.0).to_polygon().into();
        let far: GeoGeometry<f64> = BoundingBox::new(5.0, 5.0, 6.0, 6.0).to_polygon().into();
        let empty = to_geos(&square)
            .unwrap()
            .intersection(&to_geos(&far).unwrap())
            .unwrap();
        assert!(from_geos(empty).unwrap().is_none());
    }
}
