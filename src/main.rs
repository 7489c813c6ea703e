#![recursion_limit = "256"]

use burn::{backend::Autodiff, data::dataset::Dataset, optim::AdamConfig};
use clap::{Parser, Subcommand};
use mnist_fnn::{
    Error,
    export::LatestExporter,
    inference::Predictor,
    loader::load_data,
    model::ClassifierConfig,
    training::{self, EXPORTER_NAME, RunArgs, TrainingConfig, prepare_split},
};
use std::path::PathBuf;
use tracing_core::{Level, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter::filter_fn, registry};

#[cfg(feature = "wgpu")]
mod backend {
    pub type Backend = burn::backend::Wgpu;
}

#[cfg(all(feature = "tch-cpu", not(feature = "wgpu")))]
mod backend {
    pub type Backend = burn::backend::LibTorch;
}

#[cfg(all(feature = "ndarray", not(any(feature = "wgpu", feature = "tch-cpu"))))]
mod backend {
    pub type Backend = burn::backend::NdArray;
}

type Device = burn::tensor::Device<backend::Backend>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train the classifier, evaluate it and export it for serving
    Train(TrainArgs),
    /// Classify test images with an exported model
    Infer(InferArgs),
}

#[derive(clap::Args)]
struct TrainArgs {
    #[command(flatten)]
    run: RunArgs,
    #[arg(long, default_value_t = 128)]
    batch_size: usize,
    #[arg(long, default_value_t = 5)]
    epochs: usize,
    #[arg(long, default_value_t = 1e-3)]
    learning_rate: f64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(clap::Args)]
struct InferArgs {
    /// Export to load; defaults to the latest export under `--output-dir`
    #[arg(long)]
    export_dir: Option<PathBuf>,
    #[arg(long, default_value = "/tmp/mnist-fnn")]
    output_dir: PathBuf,
    #[arg(long)]
    data_path: Option<PathBuf>,
    /// Number of test images to classify
    #[arg(long, default_value_t = 10)]
    count: usize,
}

fn init_logging() {
    let layer = tracing_subscriber::fmt::layer()
        .with_filter(LevelFilter::INFO)
        .with_filter(filter_fn(|m| {
            if let Some(path) = m.module_path() {
                // The wgpu crate is logging too much, so we skip `info` level.
                if path.starts_with("wgpu") && *m.level() >= Level::INFO {
                    return false;
                }
            }
            true
        }));
    registry().with(layer).init();
}

fn train(args: TrainArgs, device: Device) -> Result<(), Error> {
    let config = TrainingConfig::new(ClassifierConfig::new(), AdamConfig::new())
        .with_batch_size(args.batch_size)
        .with_num_epochs(args.epochs)
        .with_learning_rate(args.learning_rate)
        .with_seed(args.seed);

    let artifacts =
        training::train_and_evaluate::<Autodiff<backend::Backend>>(&args.run, config, device)?;
    log::info!(
        "Trained for {} epoch(s), serving model exported to {}",
        artifacts.num_epochs,
        artifacts.export_dir.display()
    );

    Ok(())
}

fn infer(args: InferArgs, device: Device) -> Result<(), Error> {
    let export_dir = match args.export_dir {
        Some(dir) => dir,
        None => LatestExporter::new(EXPORTER_NAME)
            .latest(&args.output_dir)?
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no export under {}", args.output_dir.display()),
                )
            })?,
    };
    let predictor = Predictor::<backend::Backend>::load(&export_dir, &device)?;
    let n_pixels = predictor
        .serving_spec()
        .shape
        .last()
        .copied()
        .flatten()
        .unwrap_or(mnist_fnn::data::N_PIXEL);

    let (_, test) = load_data(args.data_path.as_deref())?;
    let dataset = prepare_split(&test, n_pixels)?;
    let items: Vec<_> = dataset.iter().take(args.count).collect();
    let inputs: Vec<_> = items.iter().map(|item| item.pixels.clone()).collect();

    let predictions = predictor.predict(&inputs)?;
    let mut correct = 0;
    for (item, prediction) in items.iter().zip(predictions) {
        if prediction.class == item.label {
            correct += 1;
        }
        log::info!("Predicted {} Expected {}", prediction.class, item.label);
    }
    log::info!("{correct}/{} correct", items.len());

    Ok(())
}

fn main() -> Result<(), Error> {
    init_logging();

    let cli = Cli::parse();
    let device = Device::default();

    match cli.command {
        Command::Train(args) => train(args, device),
        Command::Infer(args) => infer(args, device),
    }
}
