/// Round trips through every bundled codec on the same grid: byte codecs
/// must return the identical array, the dtcop codec must stay within its
/// error bound.
use dtcop_codecs::{codec_by_id, CodecConfig, DtcopCodec, Lz4Codec, NullCodec, QuantCodec, ZlibCodec, ZstdCodec};
use dtcop_core::{Codec, DataType, NdArray};

/// Packed-integer temperature cube with LCG noise.
fn packed_cube(shape: [usize; 3], seed: u64) -> NdArray {
    let mut rng = seed;
    let n = shape.iter().product::<usize>();
    let data = (0..n)
        .map(|i| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            let x = (i % shape[2]) as f64;
            let t = (i / (shape[1] * shape[2])) as f64;
            let noise = (rng >> 59) as f64;
            (15000.0 + 2000.0 * (x / 9.0).sin() + 50.0 * t + noise).round()
        })
        .collect();
    NdArray::new(&shape, DataType::I32, data).unwrap()
}

fn max_abs_diff(a: &NdArray, b: &NdArray) -> f64 {
    a.data()
        .iter()
        .zip(b.data())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

fn assert_lossless(codec: &dyn Codec) {
    let array = packed_cube([16, 24, 20], 1);
    let compressed = codec.compress(&array).unwrap();
    let restored = codec.decompress(&compressed).unwrap();
    assert_eq!(restored, array, "{} round trip", codec.id());
}

#[test]
fn test_roundtrip_null() {
    assert_lossless(&NullCodec);
    let array = packed_cube([4, 4, 4], 2);
    assert_eq!(NullCodec.compress(&array).unwrap(), array.to_bytes().unwrap());
}

#[test]
fn test_roundtrip_zlib() {
    assert_lossless(&ZlibCodec::default());
    assert_lossless(&ZlibCodec::new(9).unwrap());
    assert!(ZlibCodec::new(10).is_err());
}

#[test]
fn test_roundtrip_lz4() {
    assert_lossless(&Lz4Codec);
}

#[test]
fn test_roundtrip_zstd() {
    assert_lossless(&ZstdCodec::default());
    assert_lossless(&ZstdCodec::new(19));
}

#[test]
fn test_roundtrip_dtcop_within_bound() {
    let array = packed_cube([32, 32, 32], 3);
    let max_error = 100.0;
    let codec = DtcopCodec::new([16, 16, 16], max_error, 2).unwrap();
    let compressed = codec.compress(&array).unwrap();
    let restored = codec.decompress(&compressed).unwrap();
    assert_eq!(restored.shape(), array.shape());
    assert_eq!(restored.dtype(), DataType::F32);
    let err = max_abs_diff(&restored, &array);
    assert!(err < max_error, "error {err} >= {max_error}");

    let zstd = ZstdCodec::default().compress(&array).unwrap();
    assert!(
        compressed.len() < zstd.len(),
        "dtcop {} bytes vs zstd {} bytes",
        compressed.len(),
        zstd.len()
    );
}

#[test]
fn test_roundtrip_quant_within_half_step() {
    let array = packed_cube([16, 24, 20], 5);
    let codec = QuantCodec::new(40.0).unwrap();
    let compressed = codec.compress(&array).unwrap();
    let restored = codec.decompress(&compressed).unwrap();
    assert_eq!(restored.shape(), array.shape());
    assert_eq!(restored.dtype(), DataType::I32);
    let err = max_abs_diff(&restored, &array);
    assert!(err <= 20.0, "error {err} > 20");

    let zstd = ZstdCodec::default().compress(&array).unwrap();
    assert!(compressed.len() < zstd.len(), "quant {} bytes vs zstd {} bytes", compressed.len(), zstd.len());
}

#[test]
fn test_config_builds_working_codec() {
    let config = CodecConfig::from_json(r#"{"id":"dtcop","max_error":150.0,"chunk_shape":[8,8,8],"threads":2}"#)
        .unwrap();
    let codec = config.build().unwrap();
    let array = packed_cube([8, 16, 8], 4);
    let restored = codec.decompress(&codec.compress(&array).unwrap()).unwrap();
    assert!(max_abs_diff(&restored, &array) < 150.0);
}

#[test]
fn test_garbage_is_rejected() {
    for id in ["null", "zlib", "lz4", "zstd", "quant", "dtcop"] {
        let codec = codec_by_id(id).unwrap();
        assert!(codec.decompress(b"\x05\x00\x00\x00garbage!!").is_err(), "{id}");
    }
}
