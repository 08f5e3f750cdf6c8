use dtcop_core::{Codec, DataType, NdArray};

use crate::ZstdCodec;

/// Uniform scalar quantizer in front of zstd.
///
/// Every sample is snapped to the nearest multiple of `quant` (rounded again
/// to an integer for integer types), then the record goes through
/// [`ZstdCodec`]. The error is at most `quant / 2`, plus half a unit for
/// integer types. Decompression returns the snapped array unchanged.
///
/// No transform and no random access: a baseline to measure dtcop against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantCodec {
    quant: f64,
    zstd: ZstdCodec,
}

impl QuantCodec {
    /// Step used when none is configured.
    pub const DEFAULT_QUANT: f64 = 10.0;

    pub fn new(quant: f64) -> anyhow::Result<Self> {
        if !(quant.is_finite() && quant > 0.0) {
            anyhow::bail!("quantization step must be positive, got {}", quant);
        }
        Ok(Self {
            quant,
            zstd: ZstdCodec::default(),
        })
    }

    pub fn quant(&self) -> f64 {
        self.quant
    }

    fn snap(&self, v: f64, dtype: DataType) -> f64 {
        let q = (v / self.quant).round() * self.quant;
        match dtype {
            DataType::F32 | DataType::F64 => q,
            _ => q.round(),
        }
    }
}

impl Codec for QuantCodec {
    fn id(&self) -> &'static str {
        "quant"
    }

    fn compress(&self, array: &NdArray) -> anyhow::Result<Vec<u8>> {
        let dtype = array.dtype();
        let snapped = array.data().iter().map(|&v| self.snap(v, dtype)).collect();
        self.zstd.compress(&NdArray::new(array.shape(), dtype, snapped)?)
    }

    fn decompress(&self, bytes: &[u8]) -> anyhow::Result<NdArray> {
        self.zstd.decompress(bytes)
    }
}
