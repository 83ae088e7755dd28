use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serde_json::json;
use tempfile::TempDir;

use ndvault_config::ContainerConfig;
use ndvault_container::{Block, Bounds, Chunks, Compression, ContainerCodec, DType, Scalar, StorageOptions};

const SHAPE: [usize; 2] = [256, 256];

fn codec() -> ContainerCodec {
    ContainerCodec::new(&ContainerConfig {
        sync_on_write: false,
    })
}

fn options(compression: Compression) -> StorageOptions {
    StorageOptions {
        chunks: Chunks::Explicit { size: vec![64, 64] },
        compression,
    }
}

fn bench_write_tile(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("bench.ndv");
    let codec = codec();
    codec.create(&path, &SHAPE, &json!({})).unwrap();

    let tile = Block::from_vec(&[64, 64], (0..64 * 64).map(|v| v as f64).collect()).unwrap();
    let bounds = Bounds::new(vec![64..128, 64..128]);
    let opts = options(Compression::default());

    c.bench_function("write_tile_64x64_f64", |b| {
        b.iter(|| {
            codec
                .write_range(&path, black_box(&bounds), &tile, DType::Float64, &SHAPE, Scalar::Float(f64::NAN), &opts)
                .unwrap()
        })
    });
}

fn bench_read_full(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let codec = codec();
    let full = Block::from_vec(&SHAPE, (0..256 * 256).map(|v| (v % 97) as f64).collect()).unwrap();

    for (name, compression) in [
        ("read_full_256x256_none", Compression::default()),
        ("read_full_256x256_zstd", Compression::zstd(3)),
        ("read_full_256x256_lz4", Compression::lz4()),
    ] {
        let path = temp.path().join(format!("{}.ndv", name));
        codec.create(&path, &SHAPE, &json!({})).unwrap();
        codec
            .write_range(&path, &Bounds::full(&SHAPE), &full, DType::Float64, &SHAPE, Scalar::Float(f64::NAN), &options(compression))
            .unwrap();

        c.bench_function(name, |b| {
            b.iter(|| {
                codec
                    .read_range(&path, &SHAPE, black_box(&Bounds::full(&SHAPE)), Scalar::Float(f64::NAN), DType::Float64)
                    .unwrap()
            })
        });
    }
}

fn bench_read_unallocated(c: &mut Criterion) {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("empty.ndv");
    let codec = codec();
    codec.create(&path, &SHAPE, &json!({})).unwrap();

    c.bench_function("read_unallocated_256x256", |b| {
        b.iter(|| {
            codec
                .read_range(&path, &SHAPE, black_box(&Bounds::full(&SHAPE)), Scalar::Float(0.0), DType::Float64)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_write_tile, bench_read_full, bench_read_unallocated);
criterion_main!(benches);
