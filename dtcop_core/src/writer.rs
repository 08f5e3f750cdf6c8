use std::io::Write;
use std::time::Instant;

use log::{debug, info};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::array::NdArray;
use crate::chunk_codec::EncodedChunk;
use crate::error::{Error, Result};
use crate::format::{
    encode_directory, encode_entropy, write_block, write_block_header, write_preamble,
    ShardHeader, BLOCK_HEADER_LEN, PREAMBLE_LEN, TAG_CHUNKS, TAG_DIRECTORY, TAG_ENTROPY,
    TAG_HEADER,
};
use crate::huffman::Histogram;
use crate::order::CoordinateOrder;
use crate::quant::QuantCatalog;
use crate::shard::Shard;

/// Largest extent the header can record.
pub const MAX_EXTENT: usize = u16::MAX as usize;
/// Largest chunk edge a chunk stream can record.
pub const MAX_CHUNK_EDGE: usize = u8::MAX as usize;
/// Largest number of chunks the directory can list.
pub const MAX_CHUNKS: usize = u16::MAX as usize;

/// What a [`ShardWriter::write`] call produced.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteStats {
    pub grid: Vec<usize>,
    pub chunk_count: usize,
    /// Bytes of samples fed in, at 4 bytes per sample.
    pub raw_bytes: u64,
    /// Bytes written, preamble and block headers included.
    pub compressed_bytes: u64,
    /// Distinct symbols in the shared entropy table.
    pub symbol_count: usize,
    /// How many chunks picked each catalog table.
    pub table_counts: Vec<usize>,
    /// Worst max-abs error over all chunks.
    pub max_error: f64,
}

impl WriteStats {
    pub fn ratio(&self) -> f64 {
        if self.compressed_bytes == 0 {
            return 1.0;
        }
        self.raw_bytes as f64 / self.compressed_bytes as f64
    }
}

/// Two-pass parallel shard encoder.
///
/// # Pass one
/// Every chunk is extracted, transformed, matched to a catalog table and
/// tokenized on a dedicated rayon pool. Each task fills its own
/// [`Histogram`]; the partials are merged once the pass is done, then one
/// Huffman table is built for the whole shard.
///
/// # Pass two
/// Every chunk's tokens are packed with the shared table, again in parallel,
/// and the blocks are written in order:
/// ```text
/// "DTCOP" 0x00
/// [0x21 header] [0x22 entropy table] [0x24 directory] [0x28 chunk data]
/// ```
/// The first failing chunk aborts the whole shard; nothing is written until
/// both passes succeed.
#[derive(Debug)]
pub struct ShardWriter {
    chunk_shape: Vec<usize>,
    catalog: QuantCatalog,
    max_error: f64,
    order: CoordinateOrder,
    pool: ThreadPool,
}

impl ShardWriter {
    pub fn new(chunk_shape: &[usize], catalog: QuantCatalog, max_error: f64, threads: usize) -> Result<Self> {
        if chunk_shape.len() != 3 {
            return Err(Error::config(format!(
                "shards hold rank-3 chunks, got chunk shape {chunk_shape:?}"
            )));
        }
        if chunk_shape.iter().any(|&e| e == 0 || e > MAX_CHUNK_EDGE) {
            return Err(Error::config(format!(
                "chunk edges must be 1..={MAX_CHUNK_EDGE}, got {chunk_shape:?}"
            )));
        }
        if catalog.shape() != chunk_shape {
            return Err(Error::config(format!(
                "catalog built for {:?}, chunks are {chunk_shape:?}",
                catalog.shape()
            )));
        }
        if !(max_error.is_finite() && max_error > 0.0) {
            return Err(Error::config(format!("error bound must be positive, got {max_error}")));
        }
        if threads == 0 {
            return Err(Error::config("thread count must be at least 1"));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("dtcop-encode-{i}"))
            .build()
            .map_err(|e| Error::config(format!("cannot start {threads} encoder threads: {e}")))?;
        Ok(Self {
            chunk_shape: chunk_shape.to_vec(),
            order: CoordinateOrder::zigzag(chunk_shape),
            catalog,
            max_error,
            pool,
        })
    }

    /// Writer with cubic chunks of `edge` and the standard catalog.
    pub fn with_standard_catalog(edge: usize, max_error: f64, threads: usize) -> Result<Self> {
        let chunk_shape = [edge; 3];
        Self::new(&chunk_shape, QuantCatalog::standard(&chunk_shape)?, max_error, threads)
    }

    pub fn chunk_shape(&self) -> &[usize] {
        &self.chunk_shape
    }

    pub fn max_error(&self) -> f64 {
        self.max_error
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    fn check_array(&self, array: &NdArray) -> Result<()> {
        if array.rank() != 3 {
            return Err(Error::config(format!("shards hold rank-3 grids, got shape {:?}", array.shape())));
        }
        if array.shape().iter().any(|&e| e > MAX_EXTENT) {
            return Err(Error::config(format!(
                "grid extents must not exceed {MAX_EXTENT}, got {:?}",
                array.shape()
            )));
        }
        Ok(())
    }

    /// Pass one: encode every chunk, returning them in linear order with the
    /// merged histogram.
    fn encode_chunks(&self, shard: &Shard<'_>) -> Result<(Vec<EncodedChunk>, Histogram)> {
        let (mut indexed, histogram) = self.pool.install(|| {
            (0..shard.chunk_count())
                .into_par_iter()
                .try_fold(
                    || (Vec::new(), Histogram::new()),
                    |(mut chunks, mut histogram), i| {
                        let index = shard.chunk_index(i)?;
                        let chunk = shard.extract(&index)?;
                        let encoded =
                            EncodedChunk::encode(&chunk, &self.catalog, self.max_error, &self.order, &mut histogram)?;
                        chunks.push((i, encoded));
                        Ok::<_, Error>((chunks, histogram))
                    },
                )
                .try_reduce(
                    || (Vec::new(), Histogram::new()),
                    |(mut chunks, mut histogram), (more, partial)| {
                        chunks.extend(more);
                        histogram.merge(&partial);
                        Ok((chunks, histogram))
                    },
                )
        })?;
        indexed.sort_unstable_by_key(|&(i, _)| i);
        Ok((indexed.into_iter().map(|(_, c)| c).collect(), histogram))
    }

    /// Compress `array` into `out`.
    pub fn write<W: Write>(&self, array: &NdArray, mut out: W) -> Result<WriteStats> {
        let started = Instant::now();
        self.check_array(array)?;
        let shard = Shard::new(array, &self.chunk_shape)?;
        let chunk_count = shard.chunk_count();
        if chunk_count > MAX_CHUNKS {
            return Err(Error::config(format!(
                "grid {:?} has {chunk_count} chunks, at most {MAX_CHUNKS} fit a shard",
                shard.grid()
            )));
        }
        debug!(
            "encoding {:?} as {chunk_count} chunks of {:?} on {} threads",
            array.shape(),
            self.chunk_shape,
            self.threads()
        );

        let (encoded, histogram) = self.encode_chunks(&shard)?;
        let huffman = histogram.build_huffman()?;
        debug!(
            "pass one done: {} symbols, {} tokens",
            histogram.symbol_count(),
            histogram.total_count()
        );

        let payloads = self.pool.install(|| {
            encoded
                .par_iter()
                .map(|c| c.to_bytes(&huffman))
                .collect::<Result<Vec<_>>>()
        })?;

        let lengths = payloads
            .iter()
            .map(|p| {
                u32::try_from(p.len()).map_err(|_| Error::config("chunk stream exceeds u32 length"))
            })
            .collect::<Result<Vec<u32>>>()?;
        let data_len: usize = payloads.iter().map(Vec::len).sum();
        if data_len > u32::MAX as usize {
            return Err(Error::config(format!(
                "{data_len} bytes of chunk data exceed the u32 block length"
            )));
        }

        let header = ShardHeader {
            shape: array.shape().to_vec(),
            chunk_shape: self.chunk_shape.clone(),
        }
        .to_bytes()?;
        let entropy = encode_entropy(&huffman)?;
        let directory = encode_directory(&lengths)?;

        write_preamble(&mut out)?;
        write_block(&mut out, TAG_HEADER, &header)?;
        write_block(&mut out, TAG_ENTROPY, &entropy)?;
        write_block(&mut out, TAG_DIRECTORY, &directory)?;
        write_block_header(&mut out, TAG_CHUNKS, data_len)?;
        for payload in &payloads {
            out.write_all(payload)?;
        }
        out.flush()?;

        let mut table_counts = vec![0usize; self.catalog.len()];
        for c in &encoded {
            table_counts[c.table_index()] += 1;
        }
        let stats = WriteStats {
            grid: shard.grid().to_vec(),
            chunk_count,
            raw_bytes: array.len() as u64 * 4,
            compressed_bytes: PREAMBLE_LEN
                + 4 * BLOCK_HEADER_LEN
                + (header.len() + entropy.len() + directory.len() + data_len) as u64,
            symbol_count: huffman.symbol_count(),
            table_counts,
            max_error: encoded.iter().map(EncodedChunk::error).fold(0.0, f64::max),
        };
        info!(
            "wrote {chunk_count} chunks: {} -> {} bytes ({:.2}x), worst error {:.6} in {:.2?}",
            stats.raw_bytes,
            stats.compressed_bytes,
            stats.ratio(),
            stats.max_error,
            started.elapsed()
        );
        Ok(stats)
    }

    /// Compress `array` into a byte vector.
    pub fn compress(&self, array: &NdArray) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write(array, &mut buf)?;
        Ok(buf)
    }
}
