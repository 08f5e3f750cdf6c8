use std::hint::black_box;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use dtcop_core::chunk_codec::{decode_chunk, EncodedChunk};
use dtcop_core::index::MultiIndex;
use dtcop_core::{Chunk, CoordinateOrder, DataType, Histogram, NdArray, QuantCatalog, ShardReader, ShardWriter};

const EDGE: usize = 32;

fn smooth_chunk(seed: u64) -> Chunk {
    let shape = [EDGE; 3];
    let mut rng = seed;
    let mut chunk = Chunk::zeros(&shape);
    for coords in MultiIndex::new(&shape) {
        rng = rng
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let noise = ((rng >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * 30.0;
        let (t, y, x) = (coords[0] as f32, coords[1] as f32, coords[2] as f32);
        chunk.set(&coords, 18000.0 + 2500.0 * (x / 7.0).sin() * (y / 11.0).cos() + 60.0 * t + noise);
    }
    chunk
}

fn bench_chunk_pipeline(c: &mut Criterion) {
    let shape = [EDGE; 3];
    let chunk = smooth_chunk(1);
    let catalog = QuantCatalog::standard(&shape).unwrap();
    let order = CoordinateOrder::zigzag(&shape);

    let mut histogram = Histogram::new();
    let encoded = EncodedChunk::encode(&chunk, &catalog, 100.0, &order, &mut histogram).unwrap();
    let huffman = histogram.build_huffman().unwrap();
    let bytes = encoded.to_bytes(&huffman).unwrap();

    let mut group = c.benchmark_group("chunk 32^3");
    group.throughput(Throughput::Bytes((chunk.len() * 4) as u64));
    group.sample_size(20);

    group.bench_function("forward dct", |b| {
        b.iter(|| {
            let mut c = chunk.clone();
            c.forward_dct().unwrap();
            black_box(c)
        })
    });
    group.bench_function("encode", |b| {
        b.iter(|| {
            let mut h = Histogram::new();
            black_box(EncodedChunk::encode(&chunk, &catalog, 100.0, &order, &mut h).unwrap())
        })
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(decode_chunk(black_box(&bytes), &huffman, &order).unwrap()))
    });
    group.finish();
}

fn bench_random_access(c: &mut Criterion) {
    let shape = [64, 64, 64];
    let mut array = NdArray::zeros(&shape, DataType::F32);
    for (i, v) in array.data_mut().iter_mut().enumerate() {
        *v = 18000.0 + 2500.0 * ((i % 64) as f64 / 7.0).sin() + (i / 4096) as f64 * 60.0;
    }
    let writer = ShardWriter::with_standard_catalog(EDGE, 100.0, 4).unwrap();
    let reader = ShardReader::from_bytes(writer.compress(&array).unwrap()).unwrap();

    c.bench_function("get_chunk [1,1,1] of 2x2x2", |b| {
        b.iter(|| black_box(reader.get_chunk(&[1, 1, 1]).unwrap()))
    });
}

criterion_group!(benches, bench_chunk_pipeline, bench_random_access);
criterion_main!(benches);
