use crate::error::DataError;
use burn::{
    data::{
        dataloader::batcher::Batcher,
        dataset::{Dataset, InMemDataset},
    },
    tensor::{Int, Tensor, TensorData, backend::Backend},
};
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};

/// Height and width of an MNIST image.
pub const IMAGE_SHAPE: (usize, usize) = (28, 28);
/// Number of pixels of a flattened MNIST image.
pub const N_PIXEL: usize = IMAGE_SHAPE.0 * IMAGE_SHAPE.1;
/// Number of digit classes.
pub const NUM_LABELS: usize = 10;

/// Flatten every 2D image of the collection into a row-major vector of `f32`.
///
/// All images must be rectangular and share the shape of the first image.
pub fn parse_images<I, R, T>(images: &[I]) -> Result<Vec<Vec<f32>>, DataError>
where
    I: AsRef<[R]>,
    R: AsRef<[T]>,
    T: AsPrimitive<f32>,
{
    let mut shape: Option<(usize, usize)> = None;

    images
        .iter()
        .enumerate()
        .map(|(index, image)| {
            let rows = image.as_ref();
            let width = rows.first().map(|row| row.as_ref().len()).unwrap_or(0);
            let mut pixels = Vec::with_capacity(rows.len() * width);

            for (row, values) in rows.iter().enumerate() {
                let values = values.as_ref();
                if values.len() != width {
                    return Err(DataError::RaggedImage {
                        index,
                        row,
                        expected: width,
                        found: values.len(),
                    });
                }
                pixels.extend(values.iter().map(|&value| value.as_()));
            }

            let found = (rows.len(), width);
            match shape {
                None => shape = Some(found),
                Some(expected) if expected != found => {
                    return Err(DataError::ShapeMismatch {
                        index,
                        expected,
                        found,
                    });
                }
                Some(_) => {}
            }

            Ok(pixels)
        })
        .collect()
}

/// Coerce labels to `i32`, truncating floating point values.
pub fn parse_labels<T: AsPrimitive<i32>>(labels: &[T]) -> Vec<i32> {
    labels.iter().map(|&label| label.as_()).collect()
}

/// A flattened image with its class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageItem {
    /// Pixel intensities, row-major.
    pub pixels: Vec<f32>,
    /// Class identifier.
    pub label: i32,
}

/// In-memory dataset of flattened images.
pub struct ImageDataset {
    dataset: InMemDataset<ImageItem>,
    num_pixels: usize,
}

impl ImageDataset {
    /// Pair parsed images with parsed labels.
    pub fn new(images: Vec<Vec<f32>>, labels: Vec<i32>) -> Result<Self, DataError> {
        if images.len() != labels.len() {
            return Err(DataError::LengthMismatch {
                images: images.len(),
                labels: labels.len(),
            });
        }

        if let Some((index, &label)) = labels
            .iter()
            .enumerate()
            .find(|(_, label)| !(0..NUM_LABELS as i32).contains(*label))
        {
            return Err(DataError::LabelOutOfRange {
                index,
                label,
                num_classes: NUM_LABELS,
            });
        }

        let num_pixels = images.first().map(Vec::len).unwrap_or(N_PIXEL);
        if let Some((index, pixels)) = images
            .iter()
            .enumerate()
            .find(|(_, pixels)| pixels.len() != num_pixels)
        {
            return Err(DataError::RowLength {
                index,
                expected: num_pixels,
                found: pixels.len(),
            });
        }

        let items = images
            .into_iter()
            .zip(labels)
            .map(|(pixels, label)| ImageItem { pixels, label })
            .collect();

        Ok(Self {
            dataset: InMemDataset::new(items),
            num_pixels,
        })
    }

    /// Length of every flattened image.
    pub fn num_pixels(&self) -> usize {
        self.num_pixels
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 2>,
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks flattened images into a `[batch_size, num_pixels]` tensor.
#[derive(Clone, Debug, Default)]
pub struct ImageBatcher;

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let num_pixels = items
            .first()
            .map(|item| item.pixels.len())
            .unwrap_or(N_PIXEL);

        let mut pixels = Vec::with_capacity(batch_size * num_pixels);
        let mut labels = Vec::with_capacity(batch_size);
        for item in items {
            pixels.extend(item.pixels);
            labels.push(item.label as i64);
        }

        let images =
            Tensor::<B, 2>::from_data(TensorData::new(pixels, [batch_size, num_pixels]), device);
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch_size]), device);

        ImageBatch { images, targets }
    }
}
