use std::fs::{self, File};
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use log::{info, warn};
use reqwest::blocking::Client;
use url::Url;
use zip::ZipArchive;

use crate::error::{PipelineError, Result};

/// Open data endpoint of the Bulgarian cadastral agency
const DOWNLOAD_URL: &str = "https://kais.cadastre.bg/bg/OpenData/Download";

/// Archive per thematic layer; the key ends up in the extraction directory name
pub const CADASTRE_ARCHIVES: [(&str, &str); 3] = [
    ("pozemleni_imoti", "поземлени имоти.zip"),
    ("sgradi", "сгради.zip"),
    ("samostoyatelni_obekti", "самостоятелни обекти.zip"),
];

/// Known Sofia districts: slug -> Bulgarian name used in the download path
const DISTRICTS: [(&str, &str); 2] = [("lozenets", "Лозенец"), ("studentski", "Студентски")];

/// A Sofia district whose cadastre can be downloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CadastreDistrict {
    pub slug: String,
    pub name: &'static str,
}

impl CadastreDistrict {
    /// Look up a district slug, case-insensitively
    pub fn from_slug(slug: &str) -> Result<Self> {
        let slug = slug.to_lowercase();
        DISTRICTS
            .iter()
            .find(|(known, _)| *known == slug)
            .map(|(_, name)| CadastreDistrict {
                slug: slug.clone(),
                name: *name,
            })
            .ok_or_else(|| PipelineError::UnknownDistrict(slug.clone()))
    }

    /// Every known district
    pub fn all() -> Vec<Self> {
        DISTRICTS
            .iter()
            .map(|(slug, name)| CadastreDistrict {
                slug: slug.to_string(),
                name: *name,
            })
            .collect()
    }

    /// Path prefix of the district inside the open data tree
    pub fn path_prefix(&self) -> String {
        format!(
            "област София (столица)/община Столична/гр. София (68134) - район {}/",
            self.name
        )
    }

    pub fn download_url(&self, archive: &str) -> Result<Url> {
        let path = format!("{}{}", self.path_prefix(), archive);
        Ok(Url::parse_with_params(DOWNLOAD_URL, &[("path", path)])?)
    }
}

/// First path component shared by every entry, from the character-wise common prefix
fn common_top_level(names: &[String]) -> Option<String> {
    let first = names.first()?;
    let mut prefix_len = first.len();
    for name in &names[1..] {
        prefix_len = first
            .char_indices()
            .zip(name.chars())
            .take_while(|((_, a), b)| a == b)
            .last()
            .map(|((i, c), _)| i + c.len_utf8())
            .unwrap_or(0)
            .min(prefix_len);
    }
    let top = first[..prefix_len].split('/').next()?;
    (!top.is_empty()).then(|| top.to_string())
}

/// Extract an archive into `dest`, dropping the top-level directory shared by all entries.
///
/// Returns the number of files written.
pub fn extract_flattened<R: Read + Seek>(archive: &mut ZipArchive<R>, dest: &Path) -> Result<usize> {
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    let top_level = common_top_level(&names);

    let mut written = 0;
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let Some(enclosed) = file.enclosed_name().map(Path::to_path_buf) else {
            warn!("skipping unsafe archive entry {}", file.name());
            continue;
        };
        let mut components = enclosed.components();
        let relative: PathBuf = match (&top_level, components.next()) {
            (Some(top), Some(first)) if first.as_os_str() == top.as_str() => {
                let rest = components.as_path().to_path_buf();
                if rest.as_os_str().is_empty() {
                    enclosed.clone()
                } else {
                    rest
                }
            }
            _ => enclosed.clone(),
        };

        let outpath = dest.join(relative);
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
        let mut outfile = File::create(&outpath).map_err(|e| PipelineError::io(&outpath, e))?;
        std::io::copy(&mut file, &mut outfile).map_err(|e| PipelineError::io(&outpath, e))?;
        written += 1;
    }
    Ok(written)
}

/// Downloads and unpacks the cadastral archives of one district
pub struct CadastreDownloader {
    pub district: CadastreDistrict,
    /// Root of the raw data tree
    raw_dir: PathBuf,
    client: Client,
}

impl CadastreDownloader {
    pub fn new(district: CadastreDistrict, raw_dir: &Path) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(600))
            .build()?;
        Ok(CadastreDownloader {
            district,
            raw_dir: raw_dir.to_path_buf(),
            client,
        })
    }

    /// Working directory of the district, `<raw>/<slug>/`
    pub fn district_dir(&self) -> PathBuf {
        self.raw_dir.join(&self.district.slug)
    }

    /// Download one archive and extract it to `<raw>/<slug>/<slug>_<key>/`.
    ///
    /// A non-success HTTP status is logged and skipped. Returns the extraction
    /// directory when something was extracted.
    pub fn download(&self, key: &str, archive: &str) -> Result<Option<PathBuf>> {
        let url = self.district.download_url(archive)?;
        let name = format!("{}_{}", self.district.slug, key);
        let folder = self.district_dir();
        fs::create_dir_all(&folder).map_err(|e| PipelineError::io(&folder, e))?;

        info!("downloading {}", url);
        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            warn!("failed to download {} ({})", archive, response.status());
            return Ok(None);
        }
        let bytes = response.bytes()?;
        let zip_path = folder.join(format!("{}.zip", name));
        fs::write(&zip_path, &bytes).map_err(|e| PipelineError::io(&zip_path, e))?;
        info!("downloaded {}", zip_path.display());

        let extract_path = folder.join(&name);
        if extract_path.exists() {
            fs::remove_dir_all(&extract_path).map_err(|e| PipelineError::io(&extract_path, e))?;
        }
        fs::create_dir_all(&extract_path).map_err(|e| PipelineError::io(&extract_path, e))?;

        let file = File::open(&zip_path).map_err(|e| PipelineError::io(&zip_path, e))?;
        let mut zip = ZipArchive::new(file)?;
        let count = extract_flattened(&mut zip, &extract_path)?;
        info!("unzipped {} files into {}", count, extract_path.display());

        fs::remove_file(&zip_path).map_err(|e| PipelineError::io(&zip_path, e))?;
        Ok(Some(extract_path))
    }

    /// Fetch every layer archive of the district
    pub fn collect_all(&self) -> Result<Vec<PathBuf>> {
        let mut extracted = Vec::new();
        for (key, archive) in CADASTRE_ARCHIVES {
            if let Some(path) = self.download(key, archive)? {
                extracted.push(path);
            }
        }
        Ok(extracted)
    }
}
