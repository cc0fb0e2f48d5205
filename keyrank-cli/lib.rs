//! Batch orchestration around the detector and matcher: image and weight
//! loading, persistence of detections and matches, and the per-reference
//! ranking report.

use std::path::{Path, PathBuf};

use keyrank_core::{DetectionResult, MatchSet, ParamError, ParamStore};
use keyrank_detect::{DetectError, Detector, DetectorBuilder};
use keyrank_match::{MatchError, Matcher, MatcherBuilder};
use log::{debug, info, warn};
use thiserror::Error;

pub mod config;
pub mod ranking;
pub mod store;

pub use config::PipelineConfig;
pub use keyrank_core::{self, init_thread_pool};
pub use ranking::{RankingEntry, RankingTable, ranking_score};
pub use store::{MatchRecord, NamedDetection};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Detection failed: {0}")]
    Detect(#[from] DetectError),

    #[error("Matching failed: {0}")]
    Match(#[from] MatchError),

    #[error("Weights: {0}")]
    Params(#[from] ParamError),

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Malformed record {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid pipeline configuration: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    #[error("No self-match score for reference '{0}'")]
    MissingSelfScore(String),

    #[error("Self-match score {score} of reference '{reference}' cannot normalize a ranking")]
    InvalidSelfScore { reference: String, score: f32 },

    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl PipelineError {
    /// Fatal errors stop the run; the rest only cost the image, pair or
    /// reference ranking at hand
    pub fn is_fatal(&self) -> bool {
        match self {
            PipelineError::Detect(e) => e.is_fatal(),
            PipelineError::Match(e) => e.is_fatal(),
            PipelineError::Io { .. } | PipelineError::Image { .. } | PipelineError::Json { .. } => false,
            PipelineError::MissingSelfScore(_) | PipelineError::InvalidSelfScore { .. } => false,
            _ => true,
        }
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Detector and matcher loaded once and shared by every image and pair of a run
pub struct Pipeline {
    config: PipelineConfig,
    detector: Detector,
    matcher: Matcher,
}

impl Pipeline {
    /// Read both parameter files from the configured weights directory
    pub fn load(config: PipelineConfig) -> PipelineResult<Self> {
        config.validate()?;
        let detector_params = store::load_weights(&config.weights_dir, keyrank_detect::WEIGHTS_NAME)?;
        let variant = config.matcher.weights_variant()?;
        let matcher_params = store::load_weights(&config.weights_dir, variant.file_stem())?;
        Self::from_params(config, &detector_params, &matcher_params)
    }

    pub fn from_params(
        config: PipelineConfig,
        detector_params: &ParamStore,
        matcher_params: &ParamStore,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let detector = DetectorBuilder::from_config(config.detector.clone()).build(detector_params)?;
        let matcher = MatcherBuilder::from_config(config.matcher.clone()).build(matcher_params)?;
        debug!("Pipeline ready: {}", config.summary());
        Ok(Self {
            config,
            detector,
            matcher,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Decode, resize and run the detector on one image file
    pub fn detect_image(&self, path: &Path) -> PipelineResult<DetectionResult> {
        let image = store::load_image(path)?;
        let detection = self.detector.detect(&image)?;
        debug!("{}: {} keypoints", path.display(), detection.len());
        Ok(detection)
    }

    pub fn match_pair(&self, first: &DetectionResult, second: &DetectionResult) -> PipelineResult<MatchSet> {
        Ok(self.matcher.match_pair(first, second)?)
    }

    /// Match `reference` against every candidate, persist each pair's record
    /// and the ranking report in `out_dir`, and return the ranking.
    ///
    /// The reference is matched against itself even when it is not among the
    /// candidates; its score normalizes the percentages.
    pub fn rank_reference(
        &self,
        reference: &NamedDetection,
        candidates: &[NamedDetection],
        out_dir: &Path,
    ) -> PipelineResult<RankingTable> {
        store::prepare_output_dir(out_dir, false)?;

        let self_pair = (!candidates.iter().any(|c| c.name == reference.name)).then_some(reference);
        let mut scores = Vec::with_capacity(candidates.len() + 1);

        for candidate in self_pair.into_iter().chain(candidates) {
            let matches = match self.match_pair(&reference.detection, &candidate.detection) {
                Ok(matches) => matches,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Skipping pair {} / {}: {}", reference.name, candidate.name, e);
                    continue;
                }
            };

            let record = MatchRecord::new(&reference.detection, &candidate.detection, &matches);
            if let Err(e) = store::save_match_record(out_dir, &reference.name, &candidate.name, &record) {
                warn!("{}", e);
            }
            scores.push((candidate.name.clone(), ranking_score(&matches)));
        }

        let table = RankingTable::build(&reference.name, &scores)?;
        let report = store::save_ranking(out_dir, &table)?;
        info!(
            "Ranked {} images against '{}' -> {}",
            table.entries.len(),
            reference.name,
            report.display()
        );
        Ok(table)
    }

    /// Rank every detection against all of them, each reference writing into
    /// `out_dir/<name>`. A reference whose ranking fails without a fatal error
    /// is skipped. Returns the number of references ranked.
    pub fn rank_all(&self, detections: &[NamedDetection], out_dir: &Path) -> PipelineResult<usize> {
        let mut ranked = 0;
        for reference in detections {
            match self.rank_reference(reference, detections, &out_dir.join(&reference.name)) {
                Ok(_) => ranked += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("Skipping reference {}: {}", reference.name, e),
            }
        }
        Ok(ranked)
    }
}
