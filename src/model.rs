use crate::data::{ImageBatch, N_PIXEL, NUM_LABELS};
use burn::{
    config::Config,
    module::{Ignored, Module},
    nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu, loss::CrossEntropyLossConfig},
    tensor::{
        Int, Tensor,
        backend::{AutodiffBackend, Backend},
    },
    train::{ClassificationOutput, TrainOutput, TrainStep, ValidStep},
};
use serde::{Deserialize, Serialize};

/// How per-example losses are combined into the batch loss.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LossReduction {
    /// Average over the batch.
    Mean,
    /// Sum over the batch, every example weighted 1.
    WeightedSum,
}

#[derive(Config, Debug)]
pub struct ClassifierConfig {
    #[config(default = "N_PIXEL")]
    pub n_pixels: usize,
    #[config(default = "NUM_LABELS")]
    pub n_classes: usize,
    #[config(default = "vec![256, 128, 64]")]
    pub hidden_units: Vec<usize>,
    #[config(default = 0.2)]
    pub dropout: f64,
    #[config(default = "LossReduction::WeightedSum")]
    pub loss_reduction: LossReduction,
}

/// Fully connected classifier: `Linear -> ReLU -> Dropout` for every hidden layer, then a
/// linear projection to the class logits.
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
    dropout: Dropout,
    activation: Relu,
    loss_reduction: Ignored<LossReduction>,
}

impl ClassifierConfig {
    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier<B> {
        let mut d_input = self.n_pixels;
        let hidden = self
            .hidden_units
            .iter()
            .map(|&units| {
                let linear = LinearConfig::new(d_input, units).init(device);
                d_input = units;
                linear
            })
            .collect();

        Classifier {
            hidden,
            output: LinearConfig::new(d_input, self.n_classes).init(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            activation: Relu::new(),
            loss_reduction: Ignored(self.loss_reduction),
        }
    }
}

impl<B: Backend> Classifier<B> {
    /// # Shapes
    ///   - Images [batch_size, n_pixels]
    ///   - Output [batch_size, n_classes]
    pub fn forward(&self, images: Tensor<B, 2>) -> Tensor<B, 2> {
        let mut x = images;

        for linear in self.hidden.iter() {
            x = linear.forward(x);
            x = self.activation.forward(x);
            x = self.dropout.forward(x);
        }

        self.output.forward(x)
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 2>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        let loss = match *self.loss_reduction {
            LossReduction::Mean => loss,
            LossReduction::WeightedSum => loss.mul_scalar(targets.dims()[0] as f32),
        };

        ClassificationOutput::new(loss, output, targets)
    }
}

impl<B: AutodiffBackend> TrainStep<ImageBatch<B>, ClassificationOutput<B>> for Classifier<B> {
    fn step(&self, batch: ImageBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);

        TrainOutput::new(self, item.loss.backward(), item)
    }
}

impl<B: Backend> ValidStep<ImageBatch<B>, ClassificationOutput<B>> for Classifier<B> {
    fn step(&self, batch: ImageBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}
