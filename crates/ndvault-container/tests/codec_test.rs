//! Container codec behaviour over real files: round trips, empty-cell
//! bookkeeping and data block elision.

use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::TempDir;

use ndvault_config::ContainerConfig;
use ndvault_container::{
    Block, Bounds, Chunks, Compression, ContainerCodec, ContainerError, DType, Scalar,
    StorageOptions,
};

const SHAPE: [usize; 2] = [6, 5];
const TOTAL: u64 = 30;

fn setup(name: &str) -> (TempDir, PathBuf, ContainerCodec) {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join(format!("{}.ndv", name));
    let codec = ContainerCodec::new(&ContainerConfig {
        sync_on_write: false,
    });
    codec
        .create(&path, &SHAPE, &json!({"id": name, "custom_attributes": {}}))
        .unwrap();
    (temp, path, codec)
}

fn chunked(compression: Compression) -> StorageOptions {
    StorageOptions {
        chunks: Chunks::Explicit { size: vec![4, 2] },
        compression,
    }
}

fn write_f32(codec: &ContainerCodec, path: &Path, bounds: Bounds, values: Vec<f32>, opts: &StorageOptions) {
    let data = Block::from_vec(&bounds.shape(), values).unwrap();
    codec
        .write_range(path, &bounds, &data, DType::Float32, &SHAPE, Scalar::Float(f64::NAN), opts)
        .unwrap();
}

fn read_f32(codec: &ContainerCodec, path: &Path, bounds: Bounds) -> Vec<f32> {
    codec
        .read_range(path, &SHAPE, &bounds, Scalar::Float(f64::NAN), DType::Float32)
        .unwrap()
        .to_vec::<f32>()
        .unwrap()
}

#[test]
fn test_fresh_container_reads_fill() {
    let (_temp, path, codec) = setup("fresh");
    let block = codec
        .read_range(&path, &SHAPE, &Bounds::full(&SHAPE), Scalar::Int(-1), DType::Int16)
        .unwrap();
    assert_eq!(block.shape(), &SHAPE);
    assert_eq!(block.to_vec::<i16>().unwrap(), vec![-1; 30]);
    assert_eq!(codec.empty_cells(&path).unwrap(), TOTAL);
    assert!(!codec.has_data(&path).unwrap());
}

#[test]
fn test_write_then_read_roundtrip() {
    for compression in [Compression::default(), Compression::zstd(5), Compression::lz4()] {
        let (_temp, path, codec) = setup("roundtrip");
        let opts = chunked(compression);
        let bounds = Bounds::new(vec![1..5, 1..4]);
        let values: Vec<f32> = (0..12).map(|v| v as f32 * 0.5).collect();

        write_f32(&codec, &path, bounds.clone(), values.clone(), &opts);

        assert_eq!(read_f32(&codec, &path, bounds), values);
        // Cells outside the write keep the fill value
        assert!(read_f32(&codec, &path, Bounds::new(vec![0..1, 0..5]))
            .iter()
            .all(|v| v.is_nan()));
        // A sub-selection straddling chunk edges
        assert_eq!(read_f32(&codec, &path, Bounds::new(vec![3..5, 2..4])), vec![3.5, 4.0, 5.0, 5.5]);
    }
}

#[test]
fn test_counter_tracks_non_fill_cells() {
    let (_temp, path, codec) = setup("counter");
    let opts = chunked(Compression::default());

    // Three separate non-fill cells
    for (i, j) in [(0, 0), (2, 3), (5, 4)] {
        write_f32(&codec, &path, Bounds::cell(&[i, j]), vec![1.0], &opts);
    }
    assert_eq!(codec.empty_cells(&path).unwrap(), TOTAL - 3);

    // Writing fill values into an untouched region leaves the count alone
    write_f32(&codec, &path, Bounds::new(vec![4..5, 0..2]), vec![f32::NAN, f32::NAN], &opts);
    assert_eq!(codec.empty_cells(&path).unwrap(), TOTAL - 3);
}

#[test]
fn test_clear_is_idempotent() {
    let (_temp, path, codec) = setup("idempotent");
    let opts = chunked(Compression::default());
    write_f32(&codec, &path, Bounds::new(vec![0..2, 0..2]), vec![1.0, 2.0, 3.0, 4.0], &opts);
    assert_eq!(codec.empty_cells(&path).unwrap(), TOTAL - 4);

    let region = Bounds::new(vec![0..1, 0..5]);
    codec.clear_range(&path, &SHAPE, &region, Scalar::Float(f64::NAN)).unwrap();
    let after_first = codec.empty_cells(&path).unwrap();
    assert_eq!(after_first, TOTAL - 2);

    codec.clear_range(&path, &SHAPE, &region, Scalar::Float(f64::NAN)).unwrap();
    assert_eq!(codec.empty_cells(&path).unwrap(), after_first);
    assert_eq!(read_f32(&codec, &path, Bounds::new(vec![1..2, 0..2])), vec![3.0, 4.0]);
}

#[test]
fn test_full_clear_drops_block() {
    let (_temp, path, codec) = setup("collapse");
    let opts = chunked(Compression::zstd(3));
    write_f32(&codec, &path, Bounds::full(&SHAPE), (0..30).map(|v| v as f32).collect(), &opts);
    assert!(codec.has_data(&path).unwrap());
    assert_eq!(codec.empty_cells(&path).unwrap(), 0);

    codec
        .clear_range(&path, &SHAPE, &Bounds::full(&SHAPE), Scalar::Float(f64::NAN))
        .unwrap();

    assert!(!codec.has_data(&path).unwrap());
    assert_eq!(codec.empty_cells(&path).unwrap(), TOTAL);
    assert!(read_f32(&codec, &path, Bounds::full(&SHAPE)).iter().all(|v| v.is_nan()));
}

#[test]
fn test_piecewise_clear_drops_block() {
    let (_temp, path, codec) = setup("piecewise");
    let opts = chunked(Compression::default());
    write_f32(&codec, &path, Bounds::new(vec![0..2, 0..5]), vec![9.0; 10], &opts);

    codec
        .clear_range(&path, &SHAPE, &Bounds::new(vec![0..1, 0..5]), Scalar::Float(f64::NAN))
        .unwrap();
    assert!(codec.has_data(&path).unwrap());
    codec
        .clear_range(&path, &SHAPE, &Bounds::new(vec![1..2, 0..5]), Scalar::Float(f64::NAN))
        .unwrap();

    assert!(!codec.has_data(&path).unwrap());
    assert_eq!(codec.empty_cells(&path).unwrap(), TOTAL);
}

#[test]
fn test_write_of_only_fill_keeps_block_absent() {
    let (_temp, path, codec) = setup("fill-only");
    write_f32(&codec, &path, Bounds::full(&SHAPE), vec![f32::NAN; 30], &StorageOptions::default());
    assert!(!codec.has_data(&path).unwrap());
    assert_eq!(codec.empty_cells(&path).unwrap(), TOTAL);
}

#[test]
fn test_clear_without_block_is_noop() {
    let (_temp, path, codec) = setup("noop");
    codec
        .clear_range(&path, &SHAPE, &Bounds::new(vec![0..3, 0..3]), Scalar::Float(f64::NAN))
        .unwrap();
    assert_eq!(codec.empty_cells(&path).unwrap(), TOTAL);
}

#[test]
fn test_delete_block_resets_counter() {
    let (_temp, path, codec) = setup("delete-block");
    write_f32(&codec, &path, Bounds::cell(&[1, 1]), vec![4.0], &StorageOptions::default());
    codec.delete_block(&path, &SHAPE).unwrap();
    assert!(!codec.has_data(&path).unwrap());
    assert_eq!(codec.empty_cells(&path).unwrap(), TOTAL);
}

#[test]
fn test_selection_and_payload_validation() {
    let (_temp, path, codec) = setup("validation");
    let out_of_range = codec.read_range(
        &path,
        &SHAPE,
        &Bounds::new(vec![0..7, 0..1]),
        Scalar::Float(0.0),
        DType::Float32,
    );
    assert!(matches!(out_of_range, Err(ContainerError::OutOfBounds(_))));

    let wrong_dtype = Block::from_vec(&[1, 1], vec![1i64]).unwrap();
    let result = codec.write_range(
        &path,
        &Bounds::cell(&[0, 0]),
        &wrong_dtype,
        DType::Float32,
        &SHAPE,
        Scalar::Float(f64::NAN),
        &StorageOptions::default(),
    );
    assert!(matches!(result, Err(ContainerError::Validation(_))));

    let bad_options = StorageOptions {
        chunks: Chunks::Explicit { size: vec![2] },
        compression: Compression::default(),
    };
    let data = Block::from_vec(&[1, 1], vec![1.0f32]).unwrap();
    let result = codec.write_range(
        &path,
        &Bounds::cell(&[0, 0]),
        &data,
        DType::Float32,
        &SHAPE,
        Scalar::Float(f64::NAN),
        &bad_options,
    );
    assert!(matches!(result, Err(ContainerError::Validation(_))));
    // Nothing was allocated by the failed write
    assert!(!codec.has_data(&path).unwrap());
}

#[test]
fn test_auto_chunking_is_applied() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("auto.ndv");
    let codec = ContainerCodec::default();
    let shape = [1024, 512];
    codec.create(&path, &shape, &json!({})).unwrap();

    let opts = StorageOptions {
        chunks: Chunks::Auto,
        compression: Compression::default(),
    };
    let data = Block::from_vec(&[1, 1], vec![3.0f64]).unwrap();
    codec
        .write_range(&path, &Bounds::cell(&[0, 0]), &data, DType::Float64, &shape, Scalar::Float(0.0), &opts)
        .unwrap();

    let stat = codec.stat(&path).unwrap();
    let chunk = stat.chunk_shape.unwrap();
    assert!(chunk.iter().product::<usize>() * 8 <= 1024 * 1024);
    assert_eq!(stat.stored_chunks, 1);
    // Only one small chunk is materialised on disk
    assert!(stat.file_size < 2 * 1024 * 1024);
}

#[test]
fn test_update_metadata_of_missing_container() {
    let (_temp, path, codec) = setup("meta");
    let meta: serde_json::Value = codec.read_metadata(&path).unwrap();
    assert_eq!(meta["id"], "meta");

    let err = codec.update_metadata(&path.with_file_name("absent.ndv"), json!({}));
    assert!(matches!(err, Err(ContainerError::NotFound { .. })));
}
