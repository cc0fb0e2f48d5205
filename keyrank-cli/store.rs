//! Everything that touches the filesystem: weights, images, persisted
//! detections, per-pair match records and ranking reports.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use keyrank_core::{DetectionResult, GrayImage, Keypoint, MatchSet, ParamStore};
use keyrank_detect::{CANONICAL_HEIGHT, CANONICAL_WIDTH};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::ranking::RankingTable;
use crate::{PipelineError, PipelineResult};

pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
pub const RANKING_FILE: &str = "ranking_score.csv";
const MATCHES_SUFFIX: &str = "_matches";

/// Detection result together with the stem of the image it came from
#[derive(Debug, Clone, PartialEq)]
pub struct NamedDetection {
    pub name: String,
    pub detection: DetectionResult,
}

/// Persisted outcome of matching one pair, indexed by the first image's keypoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub keypoints0: Vec<Keypoint>,
    pub keypoints1: Vec<Keypoint>,
    pub matches: Vec<i32>,
    pub match_confidence: Vec<f32>,
}

impl MatchRecord {
    pub fn new(first: &DetectionResult, second: &DetectionResult, matches: &MatchSet) -> Self {
        Self {
            keypoints0: first.features.keypoints.clone(),
            keypoints1: second.features.keypoints.clone(),
            matches: matches.matches0.clone(),
            match_confidence: matches.confidence0.clone(),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PipelineError + '_ {
    move |source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Stem of a file name, used to name everything derived from it
pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Parameter file `<name>.bin` of a weights directory
pub fn load_weights(dir: &Path, name: &str) -> PipelineResult<ParamStore> {
    Ok(ParamStore::load(dir.join(format!("{name}.bin")))?)
}

/// Decode to luma, resize bilinearly to the canonical size and scale to [0, 1]
pub fn load_image(path: &Path) -> PipelineResult<GrayImage> {
    let decoded = image::open(path).map_err(|source| PipelineError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    let luma = image::imageops::resize(
        &decoded.to_luma8(),
        CANONICAL_WIDTH as u32,
        CANONICAL_HEIGHT as u32,
        FilterType::Triangle,
    );
    Ok(GrayImage::from_luma8(CANONICAL_WIDTH, CANONICAL_HEIGHT, luma.as_raw()))
}

/// Files directly in `dir` with one of `extensions` (case-insensitive), sorted
pub fn list_files(dir: &Path, extensions: &[&str]) -> PipelineResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let path = entry.map_err(io_error(dir))?.path();
        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)));
        if path.is_file() && matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn list_images(dir: &Path) -> PipelineResult<Vec<PathBuf>> {
    list_files(dir, &IMAGE_EXTENSIONS)
}

/// Persisted detections in `dir`, leaving out match records
pub fn list_detections(dir: &Path) -> PipelineResult<Vec<PathBuf>> {
    let mut files = list_files(dir, &["json"])?;
    files.retain(|p| !file_stem(p).ends_with(MATCHES_SUFFIX));
    Ok(files)
}

/// Refuse an output directory that resolves to the input directory, since
/// preparing it clears its contents
pub fn ensure_distinct_dirs(input: &Path, output: &Path) -> PipelineResult<()> {
    let input = fs::canonicalize(input).map_err(io_error(input))?;
    let Ok(output) = fs::canonicalize(output) else {
        return Ok(());
    };
    if input == output {
        return Err(PipelineError::InvalidConfig(format!(
            "output directory {} is the input directory",
            output.display()
        )));
    }
    Ok(())
}

/// Create `dir` if needed; with `clear`, remove whatever it already holds
pub fn prepare_output_dir(dir: &Path, clear: bool) -> PipelineResult<()> {
    fs::create_dir_all(dir).map_err(io_error(dir))?;
    if !clear {
        return Ok(());
    }
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let path = entry.map_err(io_error(dir))?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path).map_err(io_error(&path))?;
        } else {
            fs::remove_file(&path).map_err(io_error(&path))?;
        }
    }
    debug!("Cleared {}", dir.display());
    Ok(())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> PipelineResult<()> {
    let json = serde_json::to_string(value).map_err(|source| PipelineError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, json).map_err(io_error(path))
}

/// Write `<stem>.json` into `dir`
pub fn save_detection(dir: &Path, stem: &str, detection: &DetectionResult) -> PipelineResult<PathBuf> {
    let path = dir.join(format!("{stem}.json"));
    write_json(&path, detection)?;
    Ok(path)
}

pub fn load_detection(path: &Path) -> PipelineResult<NamedDetection> {
    let json = fs::read_to_string(path).map_err(io_error(path))?;
    let detection: DetectionResult = serde_json::from_str(&json).map_err(|source| PipelineError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(NamedDetection {
        name: file_stem(path),
        detection,
    })
}

/// Write `<stem0>_<stem1>_matches.json` into `dir`
pub fn save_match_record(dir: &Path, stem0: &str, stem1: &str, record: &MatchRecord) -> PipelineResult<PathBuf> {
    let path = dir.join(format!("{stem0}_{stem1}{MATCHES_SUFFIX}.json"));
    write_json(&path, record)?;
    Ok(path)
}

pub fn save_ranking(dir: &Path, table: &RankingTable) -> PipelineResult<PathBuf> {
    let path = dir.join(RANKING_FILE);
    fs::write(&path, table.to_csv()).map_err(io_error(&path))?;
    Ok(path)
}
