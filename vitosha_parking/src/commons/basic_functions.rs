use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};

/// Every file under `root` accepted by `keep`, recursively, in sorted order.
///
/// A missing root yields an empty list; any other directory error is returned.
pub fn find_files(root: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if root.is_dir() {
        walk(root, &keep, &mut files)?;
    }
    files.sort();
    Ok(files)
}

fn walk(dir: &Path, keep: &impl Fn(&Path) -> bool, files: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))? {
        let path = entry.map_err(|e| PipelineError::io(dir, e))?.path();
        if path.is_dir() {
            walk(&path, keep, files)?;
        } else if keep(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// Lowercased extension check
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.contains(&e.to_ascii_lowercase().as_str()))
}
