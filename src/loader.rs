use crate::error::{DataError, Result};
use burn::data::dataset::{
    Dataset,
    vision::{MnistDataset, MnistItem},
};
use flate2::read::GzDecoder;
use std::{
    fs,
    io::Read,
    path::{Path, PathBuf},
};

const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

const IMAGES_MAGIC: u32 = 0x0000_0803;
const LABELS_MAGIC: u32 = 0x0000_0801;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Images and labels of one split, as stored on disk.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawSplit {
    /// Images as `height` rows of `width` intensities.
    pub images: Vec<Vec<Vec<u8>>>,
    /// Class of every image.
    pub labels: Vec<u8>,
}

impl RawSplit {
    /// Number of images in the split.
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether the split has no image.
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

/// Load the train and test splits.
///
/// When `path` is given, the IDX files (optionally gzipped) are read from that directory.
/// Otherwise the dataset is downloaded to the Burn dataset cache.
pub fn load_data(path: Option<&Path>) -> Result<(RawSplit, RawSplit)> {
    match path {
        Some(root) => {
            log::info!("Reading MNIST IDX files from {}", root.display());
            let train = read_split(root, TRAIN_IMAGES, TRAIN_LABELS)?;
            let test = read_split(root, TEST_IMAGES, TEST_LABELS)?;
            Ok((train, test))
        }
        None => {
            log::info!("No data path given, using the cached MNIST download");
            Ok((from_dataset(MnistDataset::train()), from_dataset(MnistDataset::test())))
        }
    }
}

fn read_split(root: &Path, images: &str, labels: &str) -> Result<RawSplit> {
    let images = decode_images(images, &read_idx_file(root, images)?)?;
    let labels = decode_labels(labels, &read_idx_file(root, labels)?)?;

    Ok(RawSplit { images, labels })
}

fn from_dataset(dataset: MnistDataset) -> RawSplit {
    let (images, labels) = dataset
        .iter()
        .map(|MnistItem { image, label }| {
            let image: Vec<Vec<u8>> = image
                .iter()
                .map(|row| row.iter().map(|&pixel| pixel as u8).collect())
                .collect();
            (image, label)
        })
        .unzip();

    RawSplit { images, labels }
}

/// Read an IDX file, with or without the `.gz` extension, decompressing it when needed.
fn read_idx_file(root: &Path, name: &str) -> Result<Vec<u8>> {
    let plain = root.join(name);
    let path = if plain.exists() {
        plain
    } else {
        let mut gz = plain.into_os_string();
        gz.push(".gz");
        PathBuf::from(gz)
    };

    let bytes = fs::read(&path)?;
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(bytes);
    }

    let mut decoded = Vec::new();
    GzDecoder::new(&bytes[..]).read_to_end(&mut decoded)?;
    Ok(decoded)
}

fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let word = bytes.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([word[0], word[1], word[2], word[3]]))
}

fn invalid(file: &str, reason: impl Into<String>) -> DataError {
    DataError::InvalidIdx {
        file: file.to_string(),
        reason: reason.into(),
    }
}

fn check_magic(file: &str, bytes: &[u8], expected: u32) -> core::result::Result<(), DataError> {
    match read_u32(bytes, 0) {
        Some(magic) if magic == expected => Ok(()),
        Some(magic) => Err(invalid(
            file,
            format!("magic number {magic:#010x}, expected {expected:#010x}"),
        )),
        None => Err(invalid(file, "missing header")),
    }
}

/// Decode an `idx3-ubyte` payload: 16-byte header then `count * rows * cols` pixels.
pub(crate) fn decode_images(
    file: &str,
    bytes: &[u8],
) -> core::result::Result<Vec<Vec<Vec<u8>>>, DataError> {
    check_magic(file, bytes, IMAGES_MAGIC)?;

    let header = (read_u32(bytes, 4), read_u32(bytes, 8), read_u32(bytes, 12));
    let (Some(count), Some(rows), Some(cols)) = header else {
        return Err(invalid(file, "truncated header"));
    };
    let (count, rows, cols) = (count as usize, rows as usize, cols as usize);

    let payload = &bytes[16..];
    let expected = count
        .checked_mul(rows)
        .and_then(|pixels| pixels.checked_mul(cols))
        .ok_or_else(|| invalid(file, "image dimensions overflow"))?;
    if payload.len() < expected {
        return Err(invalid(
            file,
            format!(
                "{} pixel bytes for {count} images of {rows}x{cols}",
                payload.len()
            ),
        ));
    }

    if rows * cols == 0 {
        return Ok(vec![vec![Vec::new(); rows]; count]);
    }

    Ok(payload
        .chunks_exact(rows * cols)
        .take(count)
        .map(|image| image.chunks_exact(cols).map(<[u8]>::to_vec).collect())
        .collect())
}

/// Decode an `idx1-ubyte` payload: 8-byte header then `count` labels.
pub(crate) fn decode_labels(file: &str, bytes: &[u8]) -> core::result::Result<Vec<u8>, DataError> {
    check_magic(file, bytes, LABELS_MAGIC)?;

    let Some(count) = read_u32(bytes, 4) else {
        return Err(invalid(file, "truncated header"));
    };
    let count = count as usize;

    let payload = &bytes[8..];
    if payload.len() < count {
        return Err(invalid(
            file,
            format!("{} label bytes for {count} labels", payload.len()),
        ));
    }

    Ok(payload[..count].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use flate2::{Compression, write::GzEncoder};
    use std::io::Write;

    fn images_idx(images: &[Vec<Vec<u8>>]) -> Vec<u8> {
        let rows = images.first().map(Vec::len).unwrap_or(0);
        let cols = images
            .first()
            .and_then(|image| image.first())
            .map(Vec::len)
            .unwrap_or(0);

        let mut bytes = Vec::new();
        bytes.extend(IMAGES_MAGIC.to_be_bytes());
        bytes.extend((images.len() as u32).to_be_bytes());
        bytes.extend((rows as u32).to_be_bytes());
        bytes.extend((cols as u32).to_be_bytes());
        for image in images {
            for row in image {
                bytes.extend(row);
            }
        }
        bytes
    }

    fn labels_idx(labels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(LABELS_MAGIC.to_be_bytes());
        bytes.extend((labels.len() as u32).to_be_bytes());
        bytes.extend(labels);
        bytes
    }

    fn gzip(bytes: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(bytes).unwrap();
        encoder.finish().unwrap()
    }

    fn sample_images() -> Vec<Vec<Vec<u8>>> {
        vec![
            vec![vec![0, 1, 2], vec![3, 4, 5]],
            vec![vec![6, 7, 8], vec![9, 10, 11]],
        ]
    }

    #[test]
    fn decode_images_reads_every_image() {
        let images = sample_images();

        let decoded = decode_images("images", &images_idx(&images)).unwrap();

        assert_eq!(decoded, images);
    }

    #[test]
    fn decode_images_rejects_label_file() {
        let err = decode_images("labels", &labels_idx(&[1, 2])).unwrap_err();

        assert!(matches!(err, DataError::InvalidIdx { .. }));
    }

    #[test]
    fn decode_images_rejects_truncated_payload() {
        let mut bytes = images_idx(&sample_images());
        bytes.truncate(bytes.len() - 1);

        let err = decode_images("images", &bytes).unwrap_err();

        assert!(matches!(err, DataError::InvalidIdx { .. }));
    }

    #[test]
    fn decode_labels_reads_every_label() {
        let decoded = decode_labels("labels", &labels_idx(&[3, 7, 9])).unwrap();

        assert_eq!(decoded, vec![3, 7, 9]);
    }

    #[test]
    fn decode_labels_rejects_empty_file() {
        let err = decode_labels("labels", &[]).unwrap_err();

        assert!(matches!(err, DataError::InvalidIdx { .. }));
    }

    #[test]
    fn load_data_reads_plain_and_gzipped_files() {
        let dir = tempfile::tempdir().unwrap();
        let images = sample_images();

        fs::write(dir.path().join(TRAIN_IMAGES), images_idx(&images)).unwrap();
        fs::write(dir.path().join(TRAIN_LABELS), labels_idx(&[3, 7])).unwrap();
        fs::write(
            dir.path().join(format!("{TEST_IMAGES}.gz")),
            gzip(&images_idx(&images[..1])),
        )
        .unwrap();
        fs::write(
            dir.path().join(format!("{TEST_LABELS}.gz")),
            gzip(&labels_idx(&[5])),
        )
        .unwrap();

        let (train, test) = load_data(Some(dir.path())).unwrap();

        assert_eq!(train.len(), 2);
        assert_eq!(train.images, images);
        assert_eq!(train.labels, vec![3, 7]);
        assert_eq!(test.len(), 1);
        assert_eq!(test.images[0], images[0]);
        assert_eq!(test.labels, vec![5]);
    }

    #[test]
    fn load_data_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();

        let err = load_data(Some(dir.path())).unwrap_err();

        assert!(matches!(err, Error::Io(_)));
    }
}
