pub mod array;
pub mod bits;
pub mod cache;
pub mod chunk;
pub mod chunk_codec;
pub mod codec;
pub mod error;
pub mod format;
pub mod huffman;
pub mod index;
pub mod order;
pub mod quant;
pub mod reader;
pub mod shard;
pub mod writer;

pub use array::{DataType, NdArray};
pub use cache::ShardCache;
pub use chunk::Chunk;
pub use chunk_codec::{decode_chunk, ChunkInfo, EncodedChunk, Token};
pub use codec::Codec;
pub use error::{Error, Result};
pub use format::{ShardHeader, MAGIC, VERSION};
pub use huffman::{Histogram, Huffman};
pub use order::CoordinateOrder;
pub use quant::{QuantCatalog, QuantTable, Selection};
pub use reader::ShardReader;
pub use shard::Shard;
pub use writer::{ShardWriter, WriteStats};

/// Chunk edge used by [`compress`].
pub const DEFAULT_CHUNK_EDGE: usize = 32;

/// Compress a rank-3 array in 32³ chunks with the standard catalog.
pub fn compress(array: &NdArray, max_error: f64, threads: usize) -> Result<Vec<u8>> {
    ShardWriter::with_standard_catalog(DEFAULT_CHUNK_EDGE, max_error, threads)?.compress(array)
}
