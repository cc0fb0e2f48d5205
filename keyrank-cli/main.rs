use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use keyrank_cli::store::{self, NamedDetection};
use keyrank_cli::{Pipeline, PipelineConfig, PipelineResult, init_thread_pool};
use keyrank_match::{MatcherConfig, WeightsVariant};
use log::{error, info, warn};

#[derive(Parser)]
#[command(name = "keyrank")]
#[command(about = "Detect keypoints, match them between images and rank images by similarity")]
struct Args {
    /// Pipeline configuration (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory with the parameter files, overrides the configuration
    #[arg(short, long, global = true)]
    weights: Option<PathBuf>,

    /// Worker threads, overrides the configuration
    #[arg(short = 'j', long, global = true)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect keypoints in every image of a directory; the output directory is cleared first
    Detect { images: PathBuf, output: PathBuf },

    /// Rank all persisted detections against each other, one sub-directory per reference
    Rank { detections: PathBuf, output: PathBuf },

    /// Rank candidate detections against a single reference
    Match {
        reference: PathBuf,
        #[arg(required = true)]
        candidates: Vec<PathBuf>,
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Write freshly initialized parameter files, for trying the pipeline without pretrained weights
    InitWeights {
        output: PathBuf,
        #[arg(long, default_value = "0")]
        seed: u64,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> PipelineResult<()> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load_toml(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(weights) = args.weights {
        config.weights_dir = weights;
    }
    if let Some(threads) = args.threads {
        config.n_threads = threads;
    }
    config.validate()?;

    match args.command {
        Command::Detect { images, output } => detect(&load_pipeline(config)?, &images, &output),
        Command::Rank { detections, output } => rank(&load_pipeline(config)?, &detections, &output),
        Command::Match {
            reference,
            candidates,
            output,
        } => match_reference(&load_pipeline(config)?, &reference, &candidates, &output),
        Command::InitWeights { output, seed } => init_weights(&config, &output, seed),
    }
}

fn load_pipeline(config: PipelineConfig) -> PipelineResult<Pipeline> {
    init_thread_pool(config.n_threads)?;
    let pipeline = Pipeline::load(config)?;
    info!("{}", pipeline.config().summary());
    Ok(pipeline)
}

/// Log and drop per-unit failures; fatal ones end the run
fn skip_unit<T>(result: PipelineResult<T>, unit: &Path) -> PipelineResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            warn!("Skipping {}: {}", unit.display(), e);
            Ok(None)
        }
    }
}

fn detect(pipeline: &Pipeline, images: &Path, output: &Path) -> PipelineResult<()> {
    let paths = store::list_images(images)?;
    store::ensure_distinct_dirs(images, output)?;
    store::prepare_output_dir(output, true)?;
    info!("Detecting keypoints in {} images from {}", paths.len(), images.display());

    let t0 = Instant::now();
    let mut written = 0;
    for (i, path) in paths.iter().enumerate() {
        let Some(detection) = skip_unit(pipeline.detect_image(path), path)? else {
            continue;
        };
        let stem = store::file_stem(path);
        if skip_unit(store::save_detection(output, &stem, &detection), path)?.is_some() {
            written += 1;
            info!("[{}/{}] {}: {} keypoints", i + 1, paths.len(), stem, detection.len());
        }
    }

    info!("Wrote {} detections to {} in {:.2?}", written, output.display(), t0.elapsed());
    Ok(())
}

fn load_detections(paths: &[PathBuf]) -> PipelineResult<Vec<NamedDetection>> {
    let mut detections = Vec::with_capacity(paths.len());
    for path in paths {
        if let Some(detection) = skip_unit(store::load_detection(path), path)? {
            detections.push(detection);
        }
    }
    Ok(detections)
}

fn rank(pipeline: &Pipeline, dir: &Path, output: &Path) -> PipelineResult<()> {
    let detections = load_detections(&store::list_detections(dir)?)?;
    info!("Ranking {} detections from {}", detections.len(), dir.display());

    let t0 = Instant::now();
    let ranked = pipeline.rank_all(&detections, output)?;
    info!("Ranked {} of {} references in {:.2?}", ranked, detections.len(), t0.elapsed());
    Ok(())
}

fn match_reference(pipeline: &Pipeline, reference: &Path, candidates: &[PathBuf], output: &Path) -> PipelineResult<()> {
    let reference = store::load_detection(reference)?;
    let candidates = load_detections(candidates)?;
    let table = pipeline.rank_reference(&reference, &candidates, output)?;

    for (row, entry) in table.entries.iter().enumerate() {
        println!("{:>4}  {:<32} {:>10}  ({:.3})", row, entry.image, entry.percentage, entry.score);
    }
    Ok(())
}

fn init_weights(config: &PipelineConfig, output: &Path, seed: u64) -> PipelineResult<()> {
    store::prepare_output_dir(output, false)?;

    let detector = keyrank_detect::init::initial_params(config.detector.descriptor_dim, seed);
    let path = output.join(format!("{}.bin", keyrank_detect::WEIGHTS_NAME));
    detector.save(&path)?;
    info!("Wrote {} tensors to {}", detector.len(), path.display());

    for variant in [WeightsVariant::Indoor, WeightsVariant::Outdoor] {
        let matcher_config = MatcherConfig {
            weights: variant.to_string(),
            ..config.matcher.clone()
        };
        let matcher = keyrank_match::init::initial_params(&matcher_config, seed)?;
        let path = output.join(format!("{}.bin", variant.file_stem()));
        matcher.save(&path)?;
        info!("Wrote {} tensors to {}", matcher.len(), path.display());
    }
    Ok(())
}
