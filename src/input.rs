use crate::data::{ImageBatch, ImageBatcher, ImageDataset, ImageItem};
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Execution mode an input pipeline is built for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Shuffled, multi-epoch, parallel loading.
    Train,
    /// Single ordered pass.
    Eval,
}

/// How a split is fed to the model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    /// Number of examples per batch.
    pub batch_size: usize,
    /// Number of passes over the split.
    pub num_epochs: usize,
    /// Whether items are shuffled before batching.
    pub shuffle: bool,
    /// Number of loading threads.
    pub num_workers: usize,
}

impl InputSpec {
    /// Spec for the given mode.
    ///
    /// Evaluation is always a single, unshuffled pass with one worker so that batches come
    /// out in dataset order.
    pub fn for_mode(mode: Mode, batch_size: usize, epochs: usize) -> Self {
        match mode {
            Mode::Train => Self {
                batch_size,
                num_epochs: epochs,
                shuffle: true,
                num_workers: 2,
            },
            Mode::Eval => Self {
                batch_size,
                num_epochs: 1,
                shuffle: false,
                num_workers: 1,
            },
        }
    }

    /// Number of batches needed for one pass over `num_items` examples.
    pub fn steps_per_epoch(&self, num_items: usize) -> usize {
        num_items.div_ceil(self.batch_size.max(1))
    }
}

/// Build the data loader feeding `dataset` according to `spec`.
pub fn input_fn<B: Backend>(
    dataset: ImageDataset,
    spec: &InputSpec,
    seed: u64,
    device: &B::Device,
) -> Arc<dyn DataLoader<B, ImageBatch<B>>> {
    let builder = DataLoaderBuilder::<B, ImageItem, ImageBatch<B>>::new(ImageBatcher)
        .batch_size(spec.batch_size)
        .num_workers(spec.num_workers)
        .set_device(device.clone());

    let builder = if spec.shuffle {
        builder.shuffle(seed)
    } else {
        builder
    };

    builder.build(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TestBackend;

    fn dataset(len: usize) -> ImageDataset {
        let images = (0..len).map(|i| vec![i as f32; 4]).collect();
        let labels = (0..len).map(|i| (i % 10) as i32).collect();
        ImageDataset::new(images, labels).unwrap()
    }

    #[test]
    fn train_spec_shuffles_over_several_epochs() {
        let spec = InputSpec::for_mode(Mode::Train, 128, 5);

        assert_eq!(
            spec,
            InputSpec {
                batch_size: 128,
                num_epochs: 5,
                shuffle: true,
                num_workers: 2,
            }
        );
    }

    #[test]
    fn eval_spec_is_a_single_ordered_pass() {
        let spec = InputSpec::for_mode(Mode::Eval, 128, 5);

        assert_eq!(
            spec,
            InputSpec {
                batch_size: 128,
                num_epochs: 1,
                shuffle: false,
                num_workers: 1,
            }
        );
    }

    #[test]
    fn steps_per_epoch_counts_the_last_partial_batch() {
        let spec = InputSpec::for_mode(Mode::Train, 128, 5);

        assert_eq!(spec.steps_per_epoch(0), 0);
        assert_eq!(spec.steps_per_epoch(128), 1);
        assert_eq!(spec.steps_per_epoch(129), 2);
        assert_eq!(spec.steps_per_epoch(60_000), 469);
    }

    #[test]
    fn eval_loader_keeps_dataset_order() {
        let device = Default::default();
        let spec = InputSpec::for_mode(Mode::Eval, 2, 1);

        let loader = input_fn::<TestBackend>(dataset(5), &spec, 42, &device);

        let batches: Vec<_> = loader.iter().collect();
        let sizes: Vec<_> = batches.iter().map(|batch| batch.images.dims()[0]).collect();
        let targets: Vec<i64> = batches
            .into_iter()
            .flat_map(|batch| {
                batch
                    .targets
                    .into_data()
                    .convert::<i64>()
                    .to_vec::<i64>()
                    .unwrap()
            })
            .collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(targets, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn train_loader_yields_every_item() {
        let device = Default::default();
        let spec = InputSpec::for_mode(Mode::Train, 3, 1);

        let loader = input_fn::<TestBackend>(dataset(10), &spec, 42, &device);

        let total: usize = loader.iter().map(|batch| batch.images.dims()[0]).sum();
        assert_eq!(total, 10);
        assert_eq!(loader.num_items(), 10);
    }

    #[test]
    fn train_loader_shuffles_with_the_seed() {
        let device = Default::default();
        let spec = InputSpec {
            num_workers: 1,
            ..InputSpec::for_mode(Mode::Train, 5, 1)
        };

        let loader = input_fn::<TestBackend>(dataset(50), &spec, 42, &device);

        let order: Vec<usize> = loader
            .iter()
            .flat_map(|batch| batch.images.into_data().to_vec::<f32>().unwrap())
            .step_by(4)
            .map(|pixel| pixel as usize)
            .collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(sorted, (0..50).collect::<Vec<_>>());
        assert_ne!(order, sorted);
    }
}
