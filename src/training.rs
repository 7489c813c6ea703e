use crate::{
    data::{ImageDataset, parse_images, parse_labels},
    error::DataError,
    export::{CONFIG_FILE, LatestExporter, ThrottledCheckpointing, serving_input_spec},
    input::{InputSpec, Mode, input_fn},
    loader::{RawSplit, load_data},
    model::ClassifierConfig,
    renderer::LogRenderer,
};
use burn::{
    config::Config,
    data::dataset::Dataset,
    optim::AdamConfig,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{
        LearnerBuilder,
        metric::{AccuracyMetric, LossMetric},
    },
};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

/// Name of the exporter writing the serving model.
pub const EXPORTER_NAME: &str = "exporter";

#[derive(Config)]
pub struct TrainingConfig {
    pub model: ClassifierConfig,
    pub optimizer: AdamConfig,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 5)]
    pub num_epochs: usize,
    #[config(default = 1e-3)]
    pub learning_rate: f64,
    #[config(default = 42)]
    pub seed: u64,
}

impl TrainingConfig {
    /// Train and evaluation specs for a run.
    pub fn specs(&self, args: &RunArgs) -> (TrainSpec, EvalSpec) {
        let train = TrainSpec {
            input: InputSpec::for_mode(Mode::Train, self.batch_size, self.num_epochs),
            max_steps: args.train_steps,
        };
        let eval = EvalSpec {
            input: InputSpec::for_mode(Mode::Eval, self.batch_size, self.num_epochs),
            start_delay: Duration::from_secs(args.eval_delay_secs),
            throttle: Duration::from_secs(args.min_eval_frequency),
        };

        (train, eval)
    }
}

/// Arguments of a training run, supplied by the caller.
#[derive(clap::Args, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunArgs {
    /// Directory holding the MNIST IDX files; downloads the dataset when omitted.
    #[arg(long)]
    pub data_path: Option<PathBuf>,
    /// Directory receiving checkpoints, metric logs and exports.
    #[arg(long, default_value = "/tmp/mnist-fnn")]
    pub output_dir: PathBuf,
    /// Maximum number of training steps (batches).
    #[arg(long)]
    pub train_steps: Option<usize>,
    /// Seconds to wait after the start of training before the first checkpoint.
    #[arg(long, default_value_t = 10)]
    pub eval_delay_secs: u64,
    /// Minimum number of seconds between two checkpoints.
    #[arg(long, default_value_t = 1)]
    pub min_eval_frequency: u64,
}

impl RunArgs {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_path: None,
            output_dir: output_dir.into(),
            train_steps: None,
            eval_delay_secs: 10,
            min_eval_frequency: 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrainSpec {
    pub input: InputSpec,
    pub max_steps: Option<usize>,
}

impl TrainSpec {
    /// Number of epochs to run over `num_items` training examples.
    ///
    /// Training stops after the input epochs or after `max_steps` batches, whichever comes
    /// first. Epochs are never split, so a step budget is rounded up to a whole epoch.
    pub fn num_epochs(&self, num_items: usize) -> usize {
        let epochs = self.input.num_epochs.max(1);

        match self.max_steps {
            None => epochs,
            Some(max_steps) => {
                let steps_per_epoch = self.input.steps_per_epoch(num_items).max(1);
                max_steps.div_ceil(steps_per_epoch).clamp(1, epochs)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvalSpec {
    pub input: InputSpec,
    pub start_delay: Duration,
    pub throttle: Duration,
}

/// Where a run left its outputs.
#[derive(Clone, Debug)]
pub struct TrainingArtifacts {
    pub output_dir: PathBuf,
    pub export_dir: PathBuf,
    pub num_epochs: usize,
}

/// Parse a raw split into a dataset of flattened images.
pub fn prepare_split(split: &RawSplit, n_pixels: usize) -> crate::Result<ImageDataset> {
    let images = parse_images(&split.images)?;
    let labels = parse_labels(&split.labels);
    let dataset = ImageDataset::new(images, labels)?;

    if !dataset.is_empty() && dataset.num_pixels() != n_pixels {
        return Err(DataError::PixelCount {
            expected: n_pixels,
            found: dataset.num_pixels(),
        }
        .into());
    }

    Ok(dataset)
}

/// Load the data, train the classifier with periodic evaluation and export it for serving.
pub fn train_and_evaluate<B: AutodiffBackend>(
    args: &RunArgs,
    config: TrainingConfig,
    device: B::Device,
) -> crate::Result<TrainingArtifacts> {
    fs::create_dir_all(&args.output_dir)?;
    config.save(args.output_dir.join(CONFIG_FILE))?;

    B::seed(config.seed);

    log::info!("Loading data");
    let (train, test) = load_data(args.data_path.as_deref())?;
    let dataset_train = prepare_split(&train, config.model.n_pixels)?;
    let dataset_test = prepare_split(&test, config.model.n_pixels)?;
    log::info!(
        "{} training and {} evaluation examples",
        dataset_train.len(),
        dataset_test.len()
    );

    let (train_spec, eval_spec) = config.specs(args);
    let num_epochs = train_spec.num_epochs(dataset_train.len());

    let dataloader_train = input_fn::<B>(dataset_train, &train_spec.input, config.seed, &device);
    let dataloader_test =
        input_fn::<B::InnerBackend>(dataset_test, &eval_spec.input, config.seed, &device);

    let artifact_dir = args.output_dir.to_string_lossy().to_string();
    let learner = LearnerBuilder::new(&artifact_dir)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .with_file_checkpointer(CompactRecorder::new())
        .with_checkpointing_strategy(ThrottledCheckpointing::new(
            eval_spec.start_delay,
            eval_spec.throttle,
        ))
        .with_application_logger(None)
        .renderer(LogRenderer::default())
        .devices(vec![device.clone()])
        .num_epochs(num_epochs)
        .summary()
        .build(
            config.model.init::<B>(&device),
            config.optimizer.init(),
            config.learning_rate,
        );

    log::info!("Starting training and evaluation for {num_epochs} epoch(s)");
    let model_trained = learner.fit(dataloader_train, dataloader_test);

    let exporter = LatestExporter::new(EXPORTER_NAME);
    let export_dir = exporter.export(
        &args.output_dir,
        model_trained,
        &config,
        &serving_input_spec(),
    )?;

    Ok(TrainingArtifacts {
        output_dir: args.output_dir.clone(),
        export_dir,
        num_epochs,
    })
}
