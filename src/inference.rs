use crate::{
    error::{Error, Result},
    export::{CONFIG_FILE, MODEL_FILE, SERVING_FILE, ServingSpec},
    model::Classifier,
    training::TrainingConfig,
};
use burn::{
    config::Config,
    module::Module,
    record::{CompactRecorder, Recorder},
    tensor::{Tensor, TensorData, activation::softmax, backend::Backend},
};
use std::path::Path;

/// Class predicted for one input row.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub class: i32,
    pub probabilities: Vec<f32>,
}

/// Serves an exported classifier.
pub struct Predictor<B: Backend> {
    model: Classifier<B>,
    serving: ServingSpec,
    n_pixels: usize,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    /// Load the model, its configuration and serving spec from an export directory.
    pub fn load(export_dir: &Path, device: &B::Device) -> Result<Self> {
        let config = TrainingConfig::load(export_dir.join(CONFIG_FILE))?;
        let serving = ServingSpec::load(export_dir.join(SERVING_FILE))?;
        let record = CompactRecorder::new().load(export_dir.join(MODEL_FILE), device)?;
        let model = config.model.init::<B>(device).load_record(record);

        log::info!("Loaded model from {}", export_dir.display());

        Ok(Self {
            model,
            serving,
            n_pixels: config.model.n_pixels,
            device: device.clone(),
        })
    }

    pub fn serving_spec(&self) -> &ServingSpec {
        &self.serving
    }

    /// Classify every row of `inputs`.
    pub fn predict(&self, inputs: &[Vec<f32>]) -> Result<Vec<Prediction>> {
        self.serving.validate(inputs)?;
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        if let Some((index, row)) = inputs
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != self.n_pixels)
        {
            return Err(Error::Serving(format!(
                "row {index} has {} values, the model expects {}",
                row.len(),
                self.n_pixels
            )));
        }

        let batch_size = inputs.len();
        let pixels: Vec<f32> = inputs.iter().flatten().copied().collect();
        let images = Tensor::<B, 2>::from_data(
            TensorData::new(pixels, [batch_size, self.n_pixels]),
            &self.device,
        );

        let output = self.model.forward(images);
        let num_classes = output.dims()[1];
        let probabilities = softmax(output.clone(), 1)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|err| Error::Tensor(format!("{err:?}")))?;
        let classes = output
            .argmax(1)
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .map_err(|err| Error::Tensor(format!("{err:?}")))?;

        Ok(classes
            .into_iter()
            .zip(probabilities.chunks(num_classes))
            .map(|(class, probabilities)| Prediction {
                class: class as i32,
                probabilities: probabilities.to_vec(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        TestBackend,
        data::{N_PIXEL, NUM_LABELS},
        export::{LatestExporter, serving_input_spec},
        model::ClassifierConfig,
    };
    use burn::optim::AdamConfig;

    fn exported_model(output: &Path) -> std::path::PathBuf {
        export_with(output, &serving_input_spec())
    }

    fn export_with(output: &Path, serving: &ServingSpec) -> std::path::PathBuf {
        let device = Default::default();
        let config = TrainingConfig::new(
            ClassifierConfig::new().with_hidden_units(vec![8]),
            AdamConfig::new(),
        );
        let model = config.model.init::<TestBackend>(&device);

        LatestExporter::new("exporter")
            .export(output, model, &config, serving)
            .unwrap()
    }

    #[test]
    fn predicts_one_class_per_row() {
        let output = tempfile::tempdir().unwrap();
        let export_dir = exported_model(output.path());
        let predictor = Predictor::<TestBackend>::load(&export_dir, &Default::default()).unwrap();

        let predictions = predictor
            .predict(&[vec![0.0; N_PIXEL], vec![255.0; N_PIXEL]])
            .unwrap();

        assert_eq!(predictions.len(), 2);
        for prediction in predictions {
            assert!((0..NUM_LABELS as i32).contains(&prediction.class));
            assert_eq!(prediction.probabilities.len(), NUM_LABELS);
            let total: f32 = prediction.probabilities.iter().sum();
            assert!((total - 1.0).abs() < 1e-3);
            let best = prediction.probabilities[prediction.class as usize];
            assert!(prediction.probabilities.iter().all(|&p| p <= best));
        }
    }

    #[test]
    fn rejects_requests_outside_the_serving_spec() {
        let output = tempfile::tempdir().unwrap();
        let export_dir = exported_model(output.path());
        let predictor = Predictor::<TestBackend>::load(&export_dir, &Default::default()).unwrap();

        let err = predictor.predict(&[vec![0.0; 10]]).unwrap_err();

        assert!(matches!(err, Error::Serving(_)));
        assert!(predictor.predict(&[]).unwrap().is_empty());
    }

    #[test]
    fn rows_must_match_the_model_input_width() {
        let output = tempfile::tempdir().unwrap();
        let serving = ServingSpec {
            shape: vec![None, None],
            ..serving_input_spec()
        };
        let export_dir = export_with(output.path(), &serving);
        let predictor = Predictor::<TestBackend>::load(&export_dir, &Default::default()).unwrap();

        let ragged = predictor.predict(&[vec![0.0; N_PIXEL], vec![0.0; 10]]);
        let narrow = predictor.predict(&[vec![0.0; 10]]);

        assert!(matches!(ragged, Err(Error::Serving(_))));
        assert!(matches!(narrow, Err(Error::Serving(_))));
        assert_eq!(predictor.predict(&[vec![0.0; N_PIXEL]]).unwrap().len(), 1);
    }

    #[test]
    fn missing_export_is_an_error() {
        let output = tempfile::tempdir().unwrap();

        let result = Predictor::<TestBackend>::load(output.path(), &Default::default());

        assert!(matches!(result, Err(Error::Config(_))));
    }
}
