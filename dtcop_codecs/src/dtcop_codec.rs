use anyhow::Context;
use dtcop_core::{Codec, NdArray, QuantCatalog, ShardReader, ShardWriter, DEFAULT_CHUNK_EDGE};

/// Lossy, error-bounded transform codec: the array becomes one DTCOP shard.
///
/// Every decoded sample differs from the input by less than `max_error`.
/// Decompression always yields an `f32` array whatever the input type.
#[derive(Debug)]
pub struct DtcopCodec {
    writer: ShardWriter,
}

impl DtcopCodec {
    pub fn new(chunk_shape: [usize; 3], max_error: f64, threads: usize) -> anyhow::Result<Self> {
        let catalog = QuantCatalog::standard(&chunk_shape)?;
        let writer = ShardWriter::new(&chunk_shape, catalog, max_error, threads)
            .with_context(|| format!("invalid dtcop parameters (chunk {chunk_shape:?}, max_error {max_error})"))?;
        Ok(Self { writer })
    }

    /// 32³ chunks on every available core.
    pub fn with_max_error(max_error: f64) -> anyhow::Result<Self> {
        Self::new([DEFAULT_CHUNK_EDGE; 3], max_error, default_threads())
    }

    pub fn max_error(&self) -> f64 {
        self.writer.max_error()
    }

    pub fn chunk_shape(&self) -> &[usize] {
        self.writer.chunk_shape()
    }
}

pub(crate) fn default_threads() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

impl Codec for DtcopCodec {
    fn id(&self) -> &'static str {
        "dtcop"
    }

    fn compress(&self, array: &NdArray) -> anyhow::Result<Vec<u8>> {
        Ok(self.writer.compress(array)?)
    }

    fn decompress(&self, bytes: &[u8]) -> anyhow::Result<NdArray> {
        let reader = ShardReader::from_bytes(bytes.to_vec()).context("not a DTCOP shard")?;
        Ok(reader.read_array()?)
    }
}
