use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::Context;
use charsample::{
    classifier::{CharClassifierBuilder, Evaluation},
    extract::BalancedExtraction,
    icdar::Icdar2013Source,
    labels::Label,
    loader::{record_rng, BatchLoader},
    source::SampleSource,
    synth::{JsonArchive, SynthTextSource},
    util::to_rgb_image,
    PipelineOptions, SamplePipelineBuilder,
};
use clap::{Parser, ValueEnum};
use ndarray::Axis;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

#[derive(Debug, Parser)]
/// Character crops from scene-text datasets, for training and evaluating a
/// single-character classifier.
#[command(name = "charsample", version)]
enum Args {
    /// Save a class-balanced set of rectified character images from the
    /// synthetic corpus.
    #[command(name = "extract")]
    Extract {
        /// JSON ground truth archive.
        #[arg(long)]
        gt: PathBuf,
        /// Directory holding the corpus images.
        #[arg(long)]
        images: PathBuf,
        /// Output directory, one sub-folder per class.
        #[arg(long)]
        out: PathBuf,
        /// Samples to collect per class.
        #[arg(long, default_value_t = 1000)]
        max: usize,
        /// Classes to collect, defaults to the classifier alphabet.
        #[arg(long)]
        classes: Option<String>,
        /// Rewrite files that already exist instead of counting them.
        #[arg(long)]
        overwrite: bool,
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Write the crops one record turns into, for checking filtering and
    /// augmentation.
    #[command(name = "preview")]
    Preview {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long, default_value_t = 0)]
        index: usize,
        #[arg(long)]
        out: PathBuf,
        /// JSON pipeline options.
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Run an ONNX character classifier over a dataset.
    #[command(name = "evaluate")]
    Evaluate {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        model: PathBuf,
        /// Name of the model's image input.
        #[arg(long, default_value = "input")]
        input_name: String,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Evaluate only the first N records.
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long, default_value_t = 8)]
        records_per_step: usize,
        #[arg(long, default_value_t = 4)]
        threads: usize,
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[derive(Debug, clap::Args)]
struct SourceArgs {
    #[arg(long, value_enum, default_value_t = SourceKind::Synth)]
    kind: SourceKind,
    /// JSON archive (synth) or annotation directory (icdar).
    #[arg(long)]
    gt: PathBuf,
    #[arg(long)]
    images: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceKind {
    Synth,
    Icdar,
}

fn open_source(args: &SourceArgs) -> anyhow::Result<Box<dyn SampleSource>> {
    Ok(match args.kind {
        SourceKind::Synth => {
            let archive = JsonArchive::open(&args.gt)
                .with_context(|| format!("loading {}", args.gt.display()))?;
            Box::new(SynthTextSource::new(archive, &args.images))
        }
        SourceKind::Icdar => Box::new(
            Icdar2013Source::new(&args.gt, &args.images)
                .with_context(|| format!("indexing {}", args.images.display()))?,
        ),
    })
}

fn load_options(config: Option<&Path>) -> anyhow::Result<PipelineOptions> {
    let Some(path) = config else {
        return Ok(PipelineOptions::default());
    };
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn seed_or_random(seed: Option<u64>) -> u64 {
    let seed = seed.unwrap_or_else(rand::random);
    log::info!("Using seed {seed}");
    seed
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::CLOSE)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Args::parse() {
        Args::Extract {
            gt,
            images,
            out,
            max,
            classes,
            overwrite,
            seed,
        } => {
            let archive =
                JsonArchive::open(&gt).with_context(|| format!("loading {}", gt.display()))?;
            let mut extraction = BalancedExtraction::new(max, out).skip_existing(!overwrite);
            if let Some(classes) = classes {
                extraction = extraction.classes(classes.chars());
            }
            let mut rng = record_rng(seed_or_random(seed), 0);
            let start = Instant::now();
            let distribution = extraction.run(&archive, &images, &mut rng)?;
            log::debug!("Extraction took {:?}", start.elapsed());
            println!("{distribution:?}");
        }

        Args::Preview {
            source,
            index,
            out,
            config,
            seed,
        } => {
            let options = load_options(config.as_deref())?;
            let pipeline = SamplePipelineBuilder::new()
                .options(options)
                .build(open_source(&source)?)?;
            let mut rng = record_rng(seed_or_random(seed), index);
            let batch = pipeline.sample(index, &mut rng)?;

            fs::create_dir_all(&out)?;
            for (i, (image, &label)) in batch
                .images
                .axis_iter(Axis(0))
                .zip(batch.labels.iter())
                .enumerate()
            {
                let name = match pipeline.alphabet().decode(label as usize) {
                    Some(Label::Char(c)) => c.to_string(),
                    _ => "nonchar".to_string(),
                };
                let path = out.join(format!("{index}_{i}_{name}.png"));
                to_rgb_image(image).save(&path)?;
            }
            println!("Wrote {} crops to {}", batch.len(), out.display());
        }

        Args::Evaluate {
            source,
            model,
            input_name,
            config,
            limit,
            records_per_step,
            threads,
            seed,
        } => {
            let options = load_options(config.as_deref())?;
            let pipeline = SamplePipelineBuilder::new()
                .options(options)
                .build(open_source(&source)?)?;
            let classifier = CharClassifierBuilder::new(model)
                .threads(threads)
                .input_name(input_name)
                .build()?;

            let records = limit.unwrap_or(pipeline.len()).min(pipeline.len());
            let loader = BatchLoader::new(&pipeline, (0..records).collect(), seed_or_random(seed))
                .records_per_step(records_per_step);
            let steps = loader.steps();
            let mut evaluation = Evaluation::default();
            for (step, batch) in loader.enumerate() {
                let batch = batch?;
                if batch.is_empty() {
                    continue;
                }
                let log_probs = classifier.log_probs(&batch.images)?;
                evaluation.update(log_probs.view(), batch.labels.view());
                log::debug!("Step {}/{steps}: accuracy {:.4}", step + 1, evaluation.accuracy());
            }
            println!(
                "accuracy: {:.4} ({}/{}), mean loss: {:.4}",
                evaluation.accuracy(),
                evaluation.correct,
                evaluation.total,
                evaluation.mean_loss()
            );
        }
    }
    Ok(())
}
