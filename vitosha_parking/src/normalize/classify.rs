use std::path::Path;

use crate::config::LayerKind;
use crate::error::{PipelineError, Result};

fn match_keyword(name: &str) -> Option<LayerKind> {
    LayerKind::ALL
        .into_iter()
        .find(|kind| name.contains(kind.config().keyword))
}

/// Infer the layer kind from the directory names around a source file.
///
/// Ancestors are checked nearest first, then the file stem. Extracted
/// archives are named `<district>_<keyword>`, so the keyword normally sits
/// on a parent directory.
pub fn classify_layer(path: &Path) -> Result<LayerKind> {
    let from_dirs = path
        .ancestors()
        .skip(1)
        .filter_map(|dir| dir.file_name().and_then(|n| n.to_str()))
        .find_map(match_keyword);
    if let Some(kind) = from_dirs {
        return Ok(kind);
    }

    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(match_keyword)
        .ok_or_else(|| PipelineError::UnclassifiedLayer {
            path: path.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_directory_wins() {
        let path = Path::new("raw/lozenets_sgradi/sub/pozemleni_imoti_export.shp");
        assert_eq!(classify_layer(path).unwrap(), LayerKind::Building);
    }

    #[test]
    fn test_nearest_directory_first() {
        let path = Path::new("raw/pozemleni_imoti/studentski_samostoyatelni_obekti/data.shp");
        assert_eq!(classify_layer(path).unwrap(), LayerKind::Unit);
    }

    #[test]
    fn test_file_stem_fallback() {
        let path = Path::new("raw/misc/samostoyatelni_obekti.geojson");
        assert_eq!(classify_layer(path).unwrap(), LayerKind::Unit);
    }

    #[test]
    fn test_unknown_is_an_error() {
        let err = classify_layer(Path::new("raw/misc/roads.shp")).unwrap_err();
        assert!(matches!(err, PipelineError::UnclassifiedLayer { .. }));
    }
}
