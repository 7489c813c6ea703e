use crate::{
    data::N_PIXEL,
    error::{Error, Result},
    model::Classifier,
};
use burn::{
    config::Config,
    module::Module,
    record::CompactRecorder,
    tensor::backend::Backend,
    train::{
        checkpoint::{CheckpointingAction, CheckpointingStrategy},
        metric::store::EventStoreClient,
    },
};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

/// File name of the serving spec inside an export.
pub const SERVING_FILE: &str = "serving.json";
/// File name of the training configuration inside an export.
pub const CONFIG_FILE: &str = "config.json";
/// File name (without extension) of the model record inside an export.
pub const MODEL_FILE: &str = "model";

/// Describes the requests accepted by an exported model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServingSpec {
    /// Name of the input feature.
    pub feature_key: String,
    /// Element type of the input feature.
    pub dtype: String,
    /// Input shape, `None` marks a dimension of any size.
    pub shape: Vec<Option<usize>>,
}

/// Requests are batches of flattened images: `x: f32[?, 784]`.
pub fn serving_input_spec() -> ServingSpec {
    ServingSpec {
        feature_key: "x".to_string(),
        dtype: "f32".to_string(),
        shape: vec![None, Some(N_PIXEL)],
    }
}

impl ServingSpec {
    /// Check that a batch of rows fits the input shape.
    pub fn validate(&self, inputs: &[Vec<f32>]) -> Result<()> {
        let [batch, width] = self.shape[..] else {
            return Err(Error::Serving(format!(
                "only rank 2 inputs are supported, got shape {:?}",
                self.shape
            )));
        };

        match batch {
            Some(batch) if batch != inputs.len() => {
                return Err(Error::Serving(format!(
                    "expected a batch of {batch} rows, got {}",
                    inputs.len()
                )));
            }
            _ => {}
        }

        let Some(width) = width else {
            return Ok(());
        };

        if let Some((index, row)) = inputs
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != width)
        {
            return Err(Error::Serving(format!(
                "row {index} of `{}` has {} values, expected {width}",
                self.feature_key,
                row.len()
            )));
        }

        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Save a checkpoint once `start_delay` has elapsed since training started, then at most
/// once per `throttle` window. Only the latest checkpoint is kept.
pub struct ThrottledCheckpointing {
    start_delay: Duration,
    throttle: Duration,
    started: Instant,
    last: Option<(usize, Instant)>,
}

impl ThrottledCheckpointing {
    pub fn new(start_delay: Duration, throttle: Duration) -> Self {
        Self::starting_at(start_delay, throttle, Instant::now())
    }

    fn starting_at(start_delay: Duration, throttle: Duration, started: Instant) -> Self {
        Self {
            start_delay,
            throttle,
            started,
            last: None,
        }
    }

    fn decide(&mut self, epoch: usize, now: Instant) -> Vec<CheckpointingAction> {
        if now.saturating_duration_since(self.started) < self.start_delay {
            return Vec::new();
        }

        if self
            .last
            .is_some_and(|(_, at)| now.saturating_duration_since(at) < self.throttle)
        {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if let Some((previous, _)) = self.last {
            actions.push(CheckpointingAction::Delete(previous));
        }
        actions.push(CheckpointingAction::Save);
        self.last = Some((epoch, now));

        actions
    }
}

impl CheckpointingStrategy for ThrottledCheckpointing {
    fn checkpointing(
        &mut self,
        epoch: usize,
        _store: &EventStoreClient,
    ) -> Vec<CheckpointingAction> {
        let actions = self.decide(epoch, Instant::now());
        if actions.is_empty() {
            log::debug!("Skipping checkpoint for epoch {epoch}");
        }
        actions
    }
}

/// Exports the model under `<output_dir>/export/<name>/<version>/`, keeping only the most
/// recent exports.
#[derive(Clone, Debug)]
pub struct LatestExporter {
    name: String,
    exports_to_keep: usize,
}

impl LatestExporter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            exports_to_keep: 5,
        }
    }

    pub fn with_exports_to_keep(mut self, exports_to_keep: usize) -> Self {
        self.exports_to_keep = exports_to_keep.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory holding every version of this export.
    pub fn base_dir(&self, output_dir: &Path) -> PathBuf {
        output_dir.join("export").join(&self.name)
    }

    /// Write the model, its training config and the serving spec as a new version.
    pub fn export<B: Backend, C: Config>(
        &self,
        output_dir: &Path,
        model: Classifier<B>,
        config: &C,
        serving: &ServingSpec,
    ) -> Result<PathBuf> {
        let base = self.base_dir(output_dir);
        fs::create_dir_all(&base)?;

        let dir = next_version_dir(&base)?;
        fs::create_dir_all(&dir)?;

        model.save_file(dir.join(MODEL_FILE), &CompactRecorder::new())?;
        config.save(dir.join(CONFIG_FILE))?;
        serving.save(dir.join(SERVING_FILE))?;
        log::info!("Exported model to {}", dir.display());

        for removed in self.garbage_collect(&base)? {
            log::info!("Removed old export {}", removed.display());
        }

        Ok(dir)
    }

    /// Most recent export, if any.
    pub fn latest(&self, output_dir: &Path) -> Result<Option<PathBuf>> {
        Ok(versions(&self.base_dir(output_dir))?.pop().map(|(_, dir)| dir))
    }

    fn garbage_collect(&self, base: &Path) -> Result<Vec<PathBuf>> {
        let versions = versions(base)?;
        let excess = versions.len().saturating_sub(self.exports_to_keep);

        versions
            .into_iter()
            .take(excess)
            .map(|(_, dir)| -> Result<PathBuf> {
                fs::remove_dir_all(&dir)?;
                Ok(dir)
            })
            .collect()
    }
}

/// Versions are milliseconds since the epoch, always greater than every existing version.
fn next_version_dir(base: &Path) -> Result<PathBuf> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    let after_newest = versions(base)?
        .last()
        .map(|(version, _)| version + 1)
        .unwrap_or_default();

    Ok(base.join(now.max(after_newest).to_string()))
}

/// Export versions sorted from oldest to newest.
fn versions(base: &Path) -> Result<Vec<(u128, PathBuf)>> {
    if !base.exists() {
        return Ok(Vec::new());
    }

    let mut versions = Vec::new();
    for entry in fs::read_dir(base)? {
        let path = entry?.path();
        let version = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.parse::<u128>().ok());

        if let Some(version) = version.filter(|_| path.is_dir()) {
            versions.push((version, path));
        }
    }
    versions.sort();

    Ok(versions)
}
