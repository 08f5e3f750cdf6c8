use anyhow::Context;
use dtcop_core::{Codec, NdArray};

/// Zstandard codec over the array record.
///
/// Lossless; the whole record is one zstd frame, so decoding any sample
/// means decoding the whole array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZstdCodec {
    /// Compression level (1 = fast / larger, 22 = slow / smallest).
    pub level: i32,
}

impl Default for ZstdCodec {
    fn default() -> Self {
        Self { level: 3 }
    }
}

impl ZstdCodec {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Codec for ZstdCodec {
    fn id(&self) -> &'static str {
        "zstd"
    }

    fn compress(&self, array: &NdArray) -> anyhow::Result<Vec<u8>> {
        let compressed = zstd::bulk::compress(&array.to_bytes()?, self.level)?;
        Ok(compressed)
    }

    fn decompress(&self, bytes: &[u8]) -> anyhow::Result<NdArray> {
        let record = zstd::decode_all(bytes)?;
        NdArray::from_bytes(&record).context("zstd payload is not an array record")
    }
}
