use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, OnceLock};

use log::debug;
use rayon::prelude::*;

use crate::array::{DataType, NdArray};
use crate::chunk::Chunk;
use crate::chunk_codec::{decode_chunk, read_chunk_info, ChunkInfo};
use crate::error::{Error, Result};
use crate::format::{
    check_preamble, decode_directory, decode_entropy, read_block, scan_blocks, BlockLayout,
    ShardHeader, PREAMBLE_LEN,
};
use crate::huffman::Huffman;
use crate::index::{element_count, row_major_offset, strides, MultiIndex};
use crate::order::CoordinateOrder;
use crate::shard::{chunk_grid, valid_extent};

/// Random-access reader for DTCOP shards.
///
/// # Open sequence
/// 1. Check the 6-byte preamble (magic and version).
/// 2. Walk the block headers, seeking past every payload.
/// 3. Load the header, entropy-table and directory blocks; derive each
///    chunk's absolute offset from the start of the chunk-data block.
///
/// Chunk payloads stay on disk until asked for, and the coefficient order
/// is built on the first decode.
///
/// # Access pattern
/// [`ShardReader::get_chunk`] seeks to one chunk, reads exactly its bytes and
/// decodes them. The source is behind a mutex held only for the seek and
/// read, so many threads can decode from one reader at once.
#[derive(Debug)]
pub struct ShardReader<R> {
    source: Mutex<R>,
    header: ShardHeader,
    layout: BlockLayout,
    grid: Vec<usize>,
    huffman: Huffman,
    order: OnceLock<CoordinateOrder>,
    lengths: Vec<u32>,
    offsets: Vec<u64>,
}

impl ShardReader<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("opening shard {}", path.display());
        Self::new(File::open(path)?)
    }
}

impl ShardReader<Cursor<Vec<u8>>> {
    /// Read a shard held in memory.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> ShardReader<R> {
    pub fn new(mut source: R) -> Result<Self> {
        let total_len = source.seek(SeekFrom::End(0))?;
        if total_len < PREAMBLE_LEN {
            return Err(Error::format(format!("{total_len} bytes is too short for a shard")));
        }
        source.seek(SeekFrom::Start(0))?;
        let mut preamble = [0u8; PREAMBLE_LEN as usize];
        source.read_exact(&mut preamble)?;
        check_preamble(&preamble)?;

        let entries = scan_blocks(&mut source, total_len)?;
        let layout = BlockLayout::from_entries(&entries)?;

        let header = ShardHeader::from_bytes(&read_block(&mut source, &layout.header)?)?;
        if header.rank() != 3 {
            return Err(Error::format(format!("shards hold rank-3 grids, header says rank {}", header.rank())));
        }
        if let Some(&edge) = header.chunk_shape.iter().find(|&&e| e > u8::MAX as usize) {
            return Err(Error::format(format!("chunk edge {edge} exceeds 255")));
        }
        let huffman = decode_entropy(&read_block(&mut source, &layout.entropy)?)?;
        let lengths = decode_directory(&read_block(&mut source, &layout.directory)?)?;

        let grid = chunk_grid(&header.shape, &header.chunk_shape);
        let expected = element_count(&grid);
        if lengths.len() != expected {
            return Err(Error::format(format!(
                "directory lists {} chunks, grid {grid:?} needs {expected}",
                lengths.len()
            )));
        }
        let mut offsets = Vec::with_capacity(lengths.len());
        let mut pos = layout.chunks.offset;
        for &len in &lengths {
            offsets.push(pos);
            pos += len as u64;
        }
        let data_len = pos - layout.chunks.offset;
        if data_len != layout.chunks.len as u64 {
            return Err(Error::format(format!(
                "chunk sizes sum to {data_len} bytes, chunk-data block holds {}",
                layout.chunks.len
            )));
        }

        debug!(
            "shard {:?} in chunks of {:?}: {} chunks, {} entropy symbols",
            header.shape,
            header.chunk_shape,
            lengths.len(),
            huffman.symbol_count()
        );

        Ok(Self {
            source: Mutex::new(source),
            header,
            layout,
            grid,
            huffman,
            order: OnceLock::new(),
            lengths,
            offsets,
        })
    }

    fn lock(&self) -> MutexGuard<'_, R> {
        self.source.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn header(&self) -> &ShardHeader {
        &self.header
    }

    /// Byte positions of the four blocks (for inspection).
    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn grid(&self) -> &[usize] {
        &self.grid
    }

    pub fn huffman(&self) -> &Huffman {
        &self.huffman
    }

    #[inline]
    pub fn chunk_count(&self) -> usize {
        self.lengths.len()
    }

    fn check_linear(&self, i: usize) -> Result<()> {
        if i >= self.chunk_count() {
            return Err(Error::config(format!(
                "chunk {i} out of range (total {})",
                self.chunk_count()
            )));
        }
        Ok(())
    }

    /// Compressed length of chunk `i`.
    pub fn chunk_len(&self, i: usize) -> Result<u32> {
        self.check_linear(i)?;
        Ok(self.lengths[i])
    }

    /// Absolute byte offset of chunk `i` in the source.
    pub fn chunk_offset(&self, i: usize) -> Result<u64> {
        self.check_linear(i)?;
        Ok(self.offsets[i])
    }

    /// Total compressed bytes of all chunk streams.
    pub fn compressed_size(&self) -> u64 {
        self.lengths.iter().map(|&l| l as u64).sum()
    }

    pub fn linear_index(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.grid.len() || index.iter().zip(&self.grid).any(|(&i, &g)| i >= g) {
            return Err(Error::config(format!(
                "chunk index {index:?} outside grid {:?}",
                self.grid
            )));
        }
        Ok(row_major_offset(&self.grid, index))
    }

    pub fn chunk_index(&self, i: usize) -> Result<Vec<usize>> {
        self.check_linear(i)?;
        Ok(strides(&self.grid)
            .iter()
            .zip(&self.grid)
            .map(|(&s, &g)| (i / s) % g)
            .collect())
    }

    /// In-bounds extent of the chunk at `index`; smaller than the chunk
    /// shape only for trailing chunks.
    pub fn valid_extent(&self, index: &[usize]) -> Result<Vec<usize>> {
        self.linear_index(index)?;
        Ok(valid_extent(&self.header.shape, &self.header.chunk_shape, index))
    }

    /// The compressed stream of chunk `i`, exactly as stored.
    pub fn read_chunk_bytes(&self, i: usize) -> Result<Vec<u8>> {
        self.check_linear(i)?;
        let mut buf = vec![0u8; self.lengths[i] as usize];
        let mut source = self.lock();
        source.seek(SeekFrom::Start(self.offsets[i]))?;
        source.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Shape, polynomial and DC of chunk `i` without decoding its AC data.
    pub fn chunk_info(&self, i: usize) -> Result<ChunkInfo> {
        read_chunk_info(&self.read_chunk_bytes(i)?)
    }

    /// Decode chunk `i` in row-major grid order.
    pub fn get_chunk_linear(&self, i: usize) -> Result<Chunk> {
        let bytes = self.read_chunk_bytes(i)?;
        let order = self
            .order
            .get_or_init(|| CoordinateOrder::zigzag(&self.header.chunk_shape));
        decode_chunk(&bytes, &self.huffman, order)
    }

    /// Decode the chunk at grid position `index`, at the full chunk shape.
    pub fn get_chunk(&self, index: &[usize]) -> Result<Chunk> {
        let i = self.linear_index(index)?;
        self.get_chunk_linear(i)
    }
}

impl<R: Read + Seek + Send> ShardReader<R> {
    /// Decode every chunk and assemble the grid, dropping edge padding.
    pub fn read_array(&self) -> Result<NdArray> {
        let chunks = (0..self.chunk_count())
            .into_par_iter()
            .map(|i| self.get_chunk_linear(i))
            .collect::<Result<Vec<_>>>()?;

        let mut array = NdArray::zeros(&self.header.shape, DataType::F32);
        let mut dst = vec![0usize; self.grid.len()];
        for (i, chunk) in chunks.iter().enumerate() {
            let index = self.chunk_index(i)?;
            let valid = valid_extent(&self.header.shape, &self.header.chunk_shape, &index);
            for coords in MultiIndex::new(&valid) {
                for d in 0..coords.len() {
                    dst[d] = index[d] * self.header.chunk_shape[d] + coords[d];
                }
                array.set(&dst, chunk.get(&coords) as f64);
            }
        }
        Ok(array)
    }
}

impl<R> ShardReader<R> {
    /// Release the reader and hand back its source.
    pub fn close(self) -> R {
        self.source
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
