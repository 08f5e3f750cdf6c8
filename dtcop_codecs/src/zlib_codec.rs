use std::io::{Read, Write};

use anyhow::Context;
use dtcop_core::{Codec, NdArray};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

/// Deflate codec with a zlib header over the array record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZlibCodec {
    /// Compression level, 0 (store) to 9 (smallest).
    pub level: u32,
}

impl Default for ZlibCodec {
    fn default() -> Self {
        Self { level: 1 }
    }
}

impl ZlibCodec {
    pub fn new(level: u32) -> anyhow::Result<Self> {
        if level > 9 {
            anyhow::bail!("invalid zlib compression level {} (expected 0..=9)", level);
        }
        Ok(Self { level })
    }
}

impl Codec for ZlibCodec {
    fn id(&self) -> &'static str {
        "zlib"
    }

    fn compress(&self, array: &NdArray) -> anyhow::Result<Vec<u8>> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(self.level));
        encoder.write_all(&array.to_bytes()?)?;
        Ok(encoder.finish()?)
    }

    fn decompress(&self, bytes: &[u8]) -> anyhow::Result<NdArray> {
        let mut record = Vec::new();
        ZlibDecoder::new(bytes)
            .read_to_end(&mut record)
            .context("zlib inflate failed")?;
        NdArray::from_bytes(&record).context("zlib payload is not an array record")
    }
}
