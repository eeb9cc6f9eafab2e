use std::borrow::Cow;
use std::fs;
use std::path::Path;

use encoding_rs::{Encoding, UTF_8, WINDOWS_1250, WINDOWS_1251};
use geo::Centroid;
use log::debug;

use crate::error::{PipelineError, ReadError, Result};
use crate::geo_core::WGS84;
use crate::layer::Layer;
use crate::normalize::mojibake::sample_is_corrupted;

/// Legacy text encodings tried on cadastral sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceEncoding {
    Utf8,
    Cp1251,
    Cp1250,
    Latin1,
}

impl SourceEncoding {
    /// Trial order
    pub const CANDIDATES: [SourceEncoding; 4] = [
        SourceEncoding::Utf8,
        SourceEncoding::Cp1251,
        SourceEncoding::Cp1250,
        SourceEncoding::Latin1,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SourceEncoding::Utf8 => "utf-8",
            SourceEncoding::Cp1251 => "cp1251",
            SourceEncoding::Cp1250 => "cp1250",
            SourceEncoding::Latin1 => "latin1",
        }
    }

    /// Name understood by GDAL's `ENCODING` open option
    pub fn gdal_name(self) -> &'static str {
        match self {
            SourceEncoding::Utf8 => "UTF-8",
            SourceEncoding::Cp1251 => "CP1251",
            SourceEncoding::Cp1250 => "CP1250",
            SourceEncoding::Latin1 => "ISO-8859-1",
        }
    }

    fn codec(self) -> Option<&'static Encoding> {
        match self {
            SourceEncoding::Utf8 => Some(UTF_8),
            SourceEncoding::Cp1251 => Some(WINDOWS_1251),
            SourceEncoding::Cp1250 => Some(WINDOWS_1250),
            // encoding_rs maps the latin1 label to windows-1252, so true
            // ISO-8859-1 goes through the mem helpers instead
            SourceEncoding::Latin1 => None,
        }
    }

    /// Decode bytes, failing on any malformed sequence
    pub fn decode_strict<'a>(self, bytes: &'a [u8]) -> std::result::Result<Cow<'a, str>, ReadError> {
        match self.codec() {
            Some(codec) => codec
                .decode_without_bom_handling_and_without_replacement(bytes)
                .ok_or(ReadError::InvalidText {
                    encoding: self.label(),
                }),
            None => Ok(encoding_rs::mem::decode_latin1(bytes)),
        }
    }

    /// Encode text, `None` when a character is not representable
    pub fn encode_strict(self, text: &str) -> Option<Vec<u8>> {
        match self.codec() {
            Some(codec) => {
                let (bytes, _, had_errors) = codec.encode(text);
                (!had_errors).then(|| bytes.into_owned())
            }
            None => text
                .chars()
                .all(|c| (c as u32) <= 0xFF)
                .then(|| encoding_rs::mem::encode_latin1_lossy(text).into_owned()),
        }
    }
}

/// Reads one source file assuming a given text encoding
pub trait LayerReader {
    fn read(&self, path: &Path, encoding: SourceEncoding) -> std::result::Result<Layer, ReadError>;
}

/// GeoJSON files in an unknown legacy encoding
#[derive(Debug, Default, Clone, Copy)]
pub struct GeoJsonReader;

impl LayerReader for GeoJsonReader {
    fn read(&self, path: &Path, encoding: SourceEncoding) -> std::result::Result<Layer, ReadError> {
        let bytes = fs::read(path)?;
        let text = encoding.decode_strict(&bytes)?;
        let mut layer = Layer::from_geojson_str(&text)?;
        // RFC 7946: no crs member means WGS84, unless the numbers are clearly metric
        if layer.crs.is_none() && first_centroid_is_lon_lat(&layer) {
            layer.crs = Some(WGS84);
        }
        Ok(layer)
    }
}

fn first_centroid_is_lon_lat(layer: &Layer) -> bool {
    layer
        .geometries()
        .next()
        .and_then(|g| g.centroid())
        .is_some_and(|c| c.x().abs() <= 180.0 && c.y().abs() <= 90.0)
}

/// ESRI shapefiles through GDAL, re-encoded with the `ENCODING` open option
#[cfg(feature = "gdal")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ShapefileReader;

#[cfg(feature = "gdal")]
impl LayerReader for ShapefileReader {
    fn read(&self, path: &Path, encoding: SourceEncoding) -> std::result::Result<Layer, ReadError> {
        use gdal::vector::LayerAccess;
        use gdal::{Dataset, DatasetOptions, GdalOpenFlags};

        let open_option = format!("ENCODING={}", encoding.gdal_name());
        let open_options = [open_option.as_str()];
        let dataset = Dataset::open_ex(
            path,
            DatasetOptions {
                open_flags: GdalOpenFlags::GDAL_OF_VECTOR,
                open_options: Some(&open_options),
                ..Default::default()
            },
        )?;
        let mut source = dataset.layer(0)?;

        let crs = source.spatial_ref().and_then(|mut srs| {
            let _ = srs.auto_identify_epsg();
            srs.auth_code().ok()
        });
        let mut layer = Layer::new(crs);
        for field in source.defn().fields() {
            layer.add_column(&field.name());
        }

        for feature in source.features() {
            let geometry = match feature.geometry() {
                Some(g) => Some(g.to_geo()?),
                None => None,
            };
            let mut properties = serde_json::Map::new();
            for (name, value) in feature.fields() {
                properties.insert(name, field_to_json(value));
            }
            layer.push(crate::layer::Record::new(geometry, properties));
        }
        Ok(layer)
    }
}

#[cfg(feature = "gdal")]
fn field_to_json(value: Option<gdal::vector::FieldValue>) -> serde_json::Value {
    use gdal::vector::FieldValue;
    use serde_json::{json, Value};

    match value {
        None => Value::Null,
        Some(FieldValue::StringValue(s)) => Value::String(s),
        Some(FieldValue::IntegerValue(i)) => json!(i),
        Some(FieldValue::Integer64Value(i)) => json!(i),
        Some(FieldValue::RealValue(r)) => json!(r),
        // dates and list types keep GDAL's string rendering
        Some(other) => other.into_string().map(Value::String).unwrap_or(Value::Null),
    }
}

/// Picks a reader from the file extension
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceReader;

impl LayerReader for SourceReader {
    fn read(&self, path: &Path, encoding: SourceEncoding) -> std::result::Result<Layer, ReadError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            #[cfg(feature = "gdal")]
            Some("shp") => ShapefileReader.read(path, encoding),
            Some("geojson") | Some("json") => GeoJsonReader.read(path, encoding),
            _ => Err(ReadError::UnsupportedFormat(path.to_path_buf())),
        }
    }
}

/// Result of the encoding trial loop
#[derive(Debug)]
pub enum DecodeOutcome {
    Decoded {
        layer: Layer,
        encoding: SourceEncoding,
    },
    Exhausted {
        /// Last parse failure; `None` when every candidate parsed but looked corrupted
        last_error: Option<ReadError>,
    },
}

/// Try every candidate encoding in order and keep the first clean parse.
///
/// A parse that succeeds but whose text sample trips the mojibake heuristic
/// counts as a miss and the loop moves on.
pub fn decode_with_fallback(reader: &dyn LayerReader, path: &Path) -> DecodeOutcome {
    let mut last_error = None;
    for encoding in SourceEncoding::CANDIDATES {
        match reader.read(path, encoding) {
            Ok(layer) => {
                if sample_is_corrupted(layer.text_sample()) {
                    debug!(
                        "{}: {} parsed but text looks corrupted",
                        path.display(),
                        encoding.label()
                    );
                    continue;
                }
                debug!("{}: decoded as {}", path.display(), encoding.label());
                return DecodeOutcome::Decoded { layer, encoding };
            }
            Err(err) => {
                debug!("{}: {} failed: {}", path.display(), encoding.label(), err);
                last_error = Some(err);
            }
        }
    }
    DecodeOutcome::Exhausted { last_error }
}

/// [`decode_with_fallback`] with the exhausted case turned into an error
pub fn read_with_fallback(reader: &dyn LayerReader, path: &Path) -> Result<(Layer, SourceEncoding)> {
    match decode_with_fallback(reader, path) {
        DecodeOutcome::Decoded { mut layer, encoding } => {
            layer.origin = Some(path.to_path_buf());
            Ok((layer, encoding))
        }
        DecodeOutcome::Exhausted { last_error } => Err(PipelineError::DecodeExhausted {
            path: path.to_path_buf(),
            last_error,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Replays canned results and records which encodings were asked for
    struct FakeReader {
        results: RefCell<Vec<std::result::Result<Layer, ReadError>>>,
        seen: RefCell<Vec<SourceEncoding>>,
    }

    impl FakeReader {
        fn new(results: Vec<std::result::Result<Layer, ReadError>>) -> Self {
            FakeReader {
                results: RefCell::new(results),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl LayerReader for FakeReader {
        fn read(&self, _path: &Path, encoding: SourceEncoding) -> std::result::Result<Layer, ReadError> {
            self.seen.borrow_mut().push(encoding);
            self.results.borrow_mut().remove(0)
        }
    }

    fn layer_with_text(text: &str) -> Layer {
        let json = format!(
            r#"{{"type":"FeatureCollection","features":[{{"type":"Feature","geometry":null,"properties":{{"apptype":"{}"}}}}]}}"#,
            text
        );
        Layer::from_geojson_str(&json).unwrap()
    }

    #[test]
    fn test_corrupted_parse_moves_to_next_candidate() {
        let reader = FakeReader::new(vec![
            Ok(layer_with_text("ÐÐÑÑ")),
            Ok(layer_with_text("Жилище")),
        ]);
        match decode_with_fallback(&reader, Path::new("x.shp")) {
            DecodeOutcome::Decoded { encoding, layer } => {
                assert_eq!(encoding, SourceEncoding::Cp1251);
                assert_eq!(layer.text_sample(), Some("Жилище"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            *reader.seen.borrow(),
            vec![SourceEncoding::Utf8, SourceEncoding::Cp1251]
        );
    }

    #[test]
    fn test_exhausted_keeps_last_parse_error() {
        let reader = FakeReader::new(vec![
            Err(ReadError::InvalidText { encoding: "utf-8" }),
            Ok(layer_with_text("ÐÐÑÑ")),
            Err(ReadError::InvalidText { encoding: "cp1250" }),
            Ok(layer_with_text("ÐÐÑÑ")),
        ]);
        let err = read_with_fallback(&reader, Path::new("x.shp")).unwrap_err();
        match err {
            PipelineError::DecodeExhausted {
                last_error: Some(ReadError::InvalidText { encoding }),
                ..
            } => assert_eq!(encoding, "cp1250"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(reader.seen.borrow().len(), 4);
    }

    #[test]
    fn test_all_corrupted_has_no_parse_error() {
        let reader = FakeReader::new((0..4).map(|_| Ok(layer_with_text("ÐÐÑÑ"))).collect());
        assert!(matches!(
            decode_with_fallback(&reader, Path::new("x.shp")),
            DecodeOutcome::Exhausted { last_error: None }
        ));
    }

    #[test]
    fn test_empty_sample_is_accepted_first() {
        let reader = FakeReader::new(vec![Ok(Layer::new(None))]);
        assert!(matches!(
            decode_with_fallback(&reader, Path::new("x.geojson")),
            DecodeOutcome::Decoded {
                encoding: SourceEncoding::Utf8,
                ..
            }
        ));
    }

    #[test]
    fn test_cp1251_geojson_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samostoyatelni_obekti.geojson");
        let text = r#"{"type":"FeatureCollection","features":[{"type":"Feature","geometry":null,"properties":{"apptype":"Жилище"}}]}"#;
        let (bytes, _, had_errors) = WINDOWS_1251.encode(text);
        assert!(!had_errors);
        fs::write(&path, &bytes).unwrap();

        let (layer, encoding) = read_with_fallback(&GeoJsonReader, &path).unwrap();
        assert_eq!(encoding, SourceEncoding::Cp1251);
        assert_eq!(layer.records[0].str_prop("apptype"), Some("Жилище"));
        assert_eq!(layer.origin.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_strict_codecs() {
        assert!(SourceEncoding::Utf8.decode_strict(&[0xC6, 0xE8]).is_err());
        assert_eq!(SourceEncoding::Latin1.decode_strict(&[0xD0]).unwrap(), "Ð");
        assert_eq!(SourceEncoding::Latin1.encode_strict("Ж"), None);
        assert_eq!(SourceEncoding::Cp1251.encode_strict("Ж"), Some(vec![0xC6]));
    }

    #[test]
    fn test_geojson_without_crs_member() {
        let dir = tempfile::tempdir().unwrap();
        let feature = |x: f64, y: f64| {
            format!(
                r#"{{"type":"FeatureCollection","features":[{{"type":"Feature","geometry":{{"type":"Point","coordinates":[{},{}]}},"properties":{{}}}}]}}"#,
                x, y
            )
        };

        let lon_lat = dir.path().join("lon_lat.geojson");
        fs::write(&lon_lat, feature(23.32, 42.69)).unwrap();
        let layer = GeoJsonReader.read(&lon_lat, SourceEncoding::Utf8).unwrap();
        assert_eq!(layer.crs, Some(WGS84));

        let metric = dir.path().join("metric.geojson");
        fs::write(&metric, feature(321_000.0, 4_729_000.0)).unwrap();
        let layer = GeoJsonReader.read(&metric, SourceEncoding::Utf8).unwrap();
        assert_eq!(layer.crs, None);
    }

    #[cfg(feature = "gdal")]
    #[test]
    fn test_cp1251_shapefile() {
        use gdal::spatial_ref::SpatialRef;
        use gdal::vector::{FieldValue, Geometry, LayerAccess, LayerOptions, OGRFieldType};
        use gdal::DriverManager;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samostoyatelni_obekti.shp");
        {
            let driver = DriverManager::get_driver_by_name("ESRI Shapefile").unwrap();
            let mut dataset = driver.create_vector_only(&path).unwrap();
            let srs = SpatialRef::from_epsg(4326).unwrap();
            let mut units = dataset
                .create_layer(LayerOptions {
                    name: "samostoyatelni_obekti",
                    srs: Some(&srs),
                    options: Some(&["ENCODING=CP1251"]),
                    ..Default::default()
                })
                .unwrap();
            units
                .create_defn_fields(&[("apptype", OGRFieldType::OFTString)])
                .unwrap();
            units
                .create_feature_fields(
                    Geometry::from_wkt("POINT (23.32 42.69)").unwrap(),
                    &["apptype"],
                    &[FieldValue::StringValue("Жилище".to_string())],
                )
                .unwrap();
        }
        assert!(dir.path().join("samostoyatelni_obekti.prj").exists());

        let (layer, encoding) = read_with_fallback(&SourceReader, &path).unwrap();
        assert_eq!(encoding, SourceEncoding::Cp1251);
        assert_eq!(layer.records[0].str_prop("apptype"), Some("Жилище"));
        assert_eq!(layer.crs, Some(4326));
        assert_eq!(layer.columns, vec!["apptype".to_string()]);
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        assert!(matches!(
            SourceReader.read(Path::new("layer.csv"), SourceEncoding::Utf8),
            Err(ReadError::UnsupportedFormat(_))
        ));
    }
}
