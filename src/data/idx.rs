//! IDX binary loader (MNIST, Fashion-MNIST, …).
//!
//! # IDX3 image file layout
//! ```text
//! bytes  0-1:   0x00 0x00   (reserved, must be zero)
//! byte   2:     0x08        (dtype = uint8)
//! byte   3:     0x03        (number of dimensions = 3)
//! bytes  4-7:   N           (number of images, big-endian u32)
//! bytes  8-11:  rows        (big-endian u32)
//! bytes 12-15:  cols        (big-endian u32)
//! bytes 16..:   N * rows * cols bytes, row-major, uint8
//! ```
//!
//! # IDX1 label file layout
//! ```text
//! bytes  0-3:   0x00 0x00 0x08 0x01
//! bytes  4-7:   N           (big-endian u32)
//! bytes  8..:   N bytes, each a class index
//! ```

use std::path::Path;

use tracing::info;

use crate::data::dataset::{DatasetSource, LabeledDataset};
use crate::error::{Result, TrainError};

pub const MNIST_TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const MNIST_TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const MNIST_TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const MNIST_TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

fn be_u32(bytes: &[u8], at: usize) -> usize {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as usize
}

fn check_header(bytes: &[u8], min_len: usize, dims: u8, what: &str) -> Result<()> {
    if bytes.len() < min_len {
        return Err(TrainError::Dataset(format!(
            "IDX {} file too short: expected at least {} header bytes, got {}",
            what, min_len, bytes.len()
        )));
    }
    if bytes[0] != 0x00 || bytes[1] != 0x00 {
        return Err(TrainError::Dataset(format!(
            "IDX {} file: bytes 0-1 must be 0x00 0x00, got 0x{:02X} 0x{:02X}",
            what, bytes[0], bytes[1]
        )));
    }
    if bytes[2] != 0x08 {
        return Err(TrainError::Dataset(format!(
            "IDX {} file: dtype must be 0x08 (uint8), got 0x{:02X}", what, bytes[2]
        )));
    }
    if bytes[3] != dims {
        return Err(TrainError::Dataset(format!(
            "IDX {} file: expected {} dimensions, got {}", what, dims, bytes[3]
        )));
    }
    Ok(())
}

/// Parses an image + label IDX pair into a dataset. Pixels are scaled to
/// `[0, 1]`; labels must lie in `0..n_classes`.
pub fn parse_idx_pair(
    name: &str,
    image_bytes: &[u8],
    label_bytes: &[u8],
    n_classes: usize,
) -> Result<LabeledDataset> {
    check_header(image_bytes, 16, 0x03, "image")?;
    check_header(label_bytes, 8, 0x01, "label")?;

    let n_items = be_u32(image_bytes, 4);
    let rows = be_u32(image_bytes, 8);
    let cols = be_u32(image_bytes, 12);

    let n_pixels = rows.checked_mul(cols).ok_or_else(|| {
        TrainError::Dataset(format!("IDX image file: rows * cols overflows (rows={}, cols={})", rows, cols))
    })?;
    let data_len = n_items.checked_mul(n_pixels).ok_or_else(|| {
        TrainError::Dataset(format!("IDX image file: {} items of {} pixels overflows", n_items, n_pixels))
    })?;
    if image_bytes.len() - 16 < data_len {
        return Err(TrainError::Dataset(format!(
            "IDX image file too short: header declares {} items of {}×{} pixels, file has {} data bytes",
            n_items, rows, cols, image_bytes.len() - 16
        )));
    }

    let label_count = be_u32(label_bytes, 4);
    if label_count != n_items {
        return Err(TrainError::Dataset(format!(
            "IDX file mismatch: {} images but {} labels", n_items, label_count
        )));
    }
    if label_bytes.len() - 8 < n_items {
        return Err(TrainError::Dataset(format!(
            "IDX label file too short: header declares {} labels, file has {} data bytes",
            n_items, label_bytes.len() - 8
        )));
    }

    let inputs: Vec<Vec<f64>> = image_bytes[16..16 + data_len]
        .chunks_exact(n_pixels.max(1))
        .map(|chunk| chunk.iter().map(|&px| px as f64 / 255.0).collect())
        .collect();
    let labels: Vec<usize> = label_bytes[8..8 + n_items].iter().map(|&b| b as usize).collect();

    Ok(LabeledDataset::new(name, inputs, labels, n_classes)?
        .with_image_shape(cols as u32, rows as u32))
}

/// Loads the four MNIST IDX files from `dir`: the training files become the
/// partition source, the `t10k` files the held-out test pool.
pub fn load_mnist(dir: &Path) -> Result<DatasetSource> {
    let read = |file: &str| std::fs::read(dir.join(file));

    let train = parse_idx_pair("mnist-train", &read(MNIST_TRAIN_IMAGES)?, &read(MNIST_TRAIN_LABELS)?, 10)?;
    let test = parse_idx_pair("mnist-t10k", &read(MNIST_TEST_IMAGES)?, &read(MNIST_TEST_LABELS)?, 10)?;
    info!(dir = %dir.display(), train = train.len(), held_out = test.len(), "Loaded MNIST");

    DatasetSource::new(train, Some(test))
}

/// True when all four MNIST files exist in `dir`.
pub fn mnist_available(dir: &Path) -> bool {
    [MNIST_TRAIN_IMAGES, MNIST_TRAIN_LABELS, MNIST_TEST_IMAGES, MNIST_TEST_LABELS]
        .iter()
        .all(|f| dir.join(f).is_file())
}
