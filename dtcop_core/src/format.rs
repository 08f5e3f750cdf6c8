//! The shard container: preamble, tagged blocks and their payload codecs.
//!
//! ```text
//! "DTCOP" version:u8
//! [tag:u8 len:u32 payload[len]] × 4        (all integers big-endian)
//!
//! 0x21 header      rank:u8 shape[rank]:u16 chunk_shape[rank]:u16
//! 0x22 entropy     symbol_bits:u8 symbol_count:u32 tree bits (byte padded)
//! 0x24 directory   count:u16 len[count]:u32
//! 0x28 chunk data  concatenated chunk streams, in directory order
//! ```
//!
//! Only the three small blocks are ever loaded whole; the chunk-data block
//! is located by offset and read one chunk at a time.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::bits::{BitReader, BitWriter};
use crate::error::{Error, Result};
use crate::huffman::{Huffman, SYMBOL_BITS};

pub const MAGIC: &[u8; 5] = b"DTCOP";
pub const VERSION: u8 = 0x00;
/// Magic plus version byte.
pub const PREAMBLE_LEN: u64 = 6;
/// Tag byte plus big-endian `u32` length.
pub const BLOCK_HEADER_LEN: u64 = 5;

// ── Block tags ─────────────────────────────────────────────────────────────

pub const TAG_HEADER: u8 = 0x21;
pub const TAG_ENTROPY: u8 = 0x22;
pub const TAG_DIRECTORY: u8 = 0x24;
pub const TAG_CHUNKS: u8 = 0x28;

fn is_known_tag(tag: u8) -> bool {
    matches!(tag, TAG_HEADER | TAG_ENTROPY | TAG_DIRECTORY | TAG_CHUNKS)
}

pub fn tag_name(tag: u8) -> &'static str {
    match tag {
        TAG_HEADER => "header",
        TAG_ENTROPY => "entropy",
        TAG_DIRECTORY => "directory",
        TAG_CHUNKS => "chunk-data",
        _ => "unknown",
    }
}

pub fn write_preamble(w: &mut impl Write) -> Result<()> {
    w.write_all(MAGIC)?;
    w.write_all(&[VERSION])?;
    Ok(())
}

pub fn check_preamble(buf: &[u8; PREAMBLE_LEN as usize]) -> Result<()> {
    if &buf[..5] != MAGIC {
        return Err(Error::format("invalid magic bytes, not a DTCOP shard"));
    }
    if buf[5] != VERSION {
        return Err(Error::format(format!(
            "unsupported shard version {} (only {VERSION} is supported)",
            buf[5]
        )));
    }
    Ok(())
}

/// Write the tag and length of a block whose payload follows.
pub fn write_block_header(w: &mut impl Write, tag: u8, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| {
        Error::config(format!("{} block of {len} bytes exceeds the u32 length field", tag_name(tag)))
    })?;
    w.write_all(&[tag])?;
    w.write_all(&len.to_be_bytes())?;
    Ok(())
}

pub fn write_block(w: &mut impl Write, tag: u8, payload: &[u8]) -> Result<()> {
    write_block_header(w, tag, payload.len())?;
    w.write_all(payload)?;
    Ok(())
}

// ── Header ─────────────────────────────────────────────────────────────────

/// Full grid shape and nominal chunk shape of a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardHeader {
    pub shape: Vec<usize>,
    pub chunk_shape: Vec<usize>,
}

impl ShardHeader {
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.shape.len() != self.chunk_shape.len() || self.shape.is_empty() || self.rank() > u8::MAX as usize {
            return Err(Error::config(format!(
                "cannot store header for shape {:?} with chunk shape {:?}",
                self.shape, self.chunk_shape
            )));
        }
        let mut buf = Vec::with_capacity(1 + 4 * self.rank());
        buf.push(self.rank() as u8);
        for &extent in self.shape.iter().chain(&self.chunk_shape) {
            let extent = u16::try_from(extent)
                .ok()
                .filter(|&e| e > 0)
                .ok_or_else(|| Error::config(format!("extent {extent} outside 1..=65535")))?;
            buf.extend_from_slice(&extent.to_be_bytes());
        }
        Ok(buf)
    }

    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let (&rank, rest) = buf
            .split_first()
            .ok_or_else(|| Error::format("empty header block"))?;
        let rank = rank as usize;
        if rank == 0 || rest.len() != 4 * rank {
            return Err(Error::format(format!(
                "header block of {} bytes does not describe rank {rank}",
                buf.len()
            )));
        }
        let extents: Vec<usize> = rest
            .chunks_exact(2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
            .collect();
        if extents.contains(&0) {
            return Err(Error::format("header block holds a zero extent"));
        }
        Ok(Self {
            shape: extents[..rank].to_vec(),
            chunk_shape: extents[rank..].to_vec(),
        })
    }
}

// ── Entropy table ──────────────────────────────────────────────────────────

pub fn encode_entropy(huffman: &Huffman) -> Result<Vec<u8>> {
    let mut w = BitWriter::new();
    w.write_bits(SYMBOL_BITS as u64, 8);
    w.write_bits(huffman.symbol_count() as u64, 32);
    huffman.write_table(&mut w, SYMBOL_BITS)?;
    Ok(w.finish())
}

pub fn decode_entropy(payload: &[u8]) -> Result<Huffman> {
    let mut r = BitReader::new(payload);
    let symbol_bits = r.read_u8()? as u32;
    let symbol_count = r.read_u32()? as usize;
    Huffman::read_table(&mut r, symbol_bits, symbol_count)
}

// ── Chunk directory ────────────────────────────────────────────────────────

pub fn encode_directory(lengths: &[u32]) -> Result<Vec<u8>> {
    let count = u16::try_from(lengths.len())
        .map_err(|_| Error::config(format!("{} chunks exceed the u16 directory count", lengths.len())))?;
    let mut buf = Vec::with_capacity(2 + 4 * lengths.len());
    buf.extend_from_slice(&count.to_be_bytes());
    for len in lengths {
        buf.extend_from_slice(&len.to_be_bytes());
    }
    Ok(buf)
}

pub fn decode_directory(payload: &[u8]) -> Result<Vec<u32>> {
    if payload.len() < 2 {
        return Err(Error::format("directory block shorter than its count field"));
    }
    let count = u16::from_be_bytes([payload[0], payload[1]]) as usize;
    let entries = &payload[2..];
    if entries.len() != 4 * count {
        return Err(Error::format(format!(
            "directory declares {count} chunks but holds {} bytes of entries",
            entries.len()
        )));
    }
    Ok(entries
        .chunks_exact(4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

// ── Block scanning ─────────────────────────────────────────────────────────

/// Where one block's payload sits in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    pub tag: u8,
    /// Absolute offset of the first payload byte.
    pub offset: u64,
    pub len: u32,
}

/// The four required blocks of a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    pub header: BlockEntry,
    pub entropy: BlockEntry,
    pub directory: BlockEntry,
    pub chunks: BlockEntry,
}

impl BlockLayout {
    /// Pick out each required block, which must appear exactly once.
    pub fn from_entries(entries: &[BlockEntry]) -> Result<Self> {
        let find = |tag: u8| -> Result<BlockEntry> {
            let mut matching = entries.iter().filter(|e| e.tag == tag);
            match (matching.next(), matching.next()) {
                (Some(&entry), None) => Ok(entry),
                (None, _) => Err(Error::format(format!("missing {} block", tag_name(tag)))),
                (Some(_), Some(_)) => Err(Error::format(format!("duplicate {} block", tag_name(tag)))),
            }
        };
        Ok(Self {
            header: find(TAG_HEADER)?,
            entropy: find(TAG_ENTROPY)?,
            directory: find(TAG_DIRECTORY)?,
            chunks: find(TAG_CHUNKS)?,
        })
    }

    pub fn entries(&self) -> [BlockEntry; 4] {
        [self.header, self.entropy, self.directory, self.chunks]
    }
}

/// Walk the block sequence after the preamble, seeking past every payload.
///
/// `total_len` is the byte length of the whole source.
pub fn scan_blocks<R: Read + Seek>(source: &mut R, total_len: u64) -> Result<Vec<BlockEntry>> {
    let mut entries = Vec::new();
    let mut pos = PREAMBLE_LEN;
    source.seek(SeekFrom::Start(pos))?;
    while pos < total_len {
        if total_len - pos < BLOCK_HEADER_LEN {
            return Err(Error::format(format!("truncated block header at offset {pos}")));
        }
        let mut head = [0u8; BLOCK_HEADER_LEN as usize];
        source.read_exact(&mut head)?;
        let tag = head[0];
        if !is_known_tag(tag) {
            return Err(Error::format(format!("unknown block tag 0x{tag:02x} at offset {pos}")));
        }
        let len = u32::from_be_bytes([head[1], head[2], head[3], head[4]]);
        let offset = pos + BLOCK_HEADER_LEN;
        let end = offset + len as u64;
        if end > total_len {
            return Err(Error::format(format!(
                "{} block claims {len} bytes but only {} remain",
                tag_name(tag),
                total_len - offset
            )));
        }
        entries.push(BlockEntry { tag, offset, len });
        pos = source.seek(SeekFrom::Start(end))?;
    }
    Ok(entries)
}

/// Read a whole block payload.
pub fn read_block<R: Read + Seek>(source: &mut R, entry: &BlockEntry) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; entry.len as usize];
    source.seek(SeekFrom::Start(entry.offset))?;
    source.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn header_round_trip_all_ranks() {
        for (shape, chunk_shape) in [
            (vec![65535], vec![255]),
            (vec![1, 65535], vec![1, 32]),
            (vec![64, 64, 64], vec![32, 32, 32]),
            (vec![65535, 3, 1000], vec![16, 1, 255]),
        ] {
            let header = ShardHeader { shape, chunk_shape };
            let bytes = header.to_bytes().unwrap();
            assert_eq!(bytes.len(), 1 + 4 * header.rank());
            assert_eq!(ShardHeader::from_bytes(&bytes).unwrap(), header);
        }
    }

    #[test]
    fn header_layout_is_big_endian() {
        let header = ShardHeader {
            shape: vec![64, 300, 2],
            chunk_shape: vec![32, 32, 2],
        };
        assert_eq!(
            header.to_bytes().unwrap(),
            vec![3, 0, 64, 1, 44, 0, 2, 0, 32, 0, 32, 0, 2]
        );
    }

    #[test]
    fn header_rejects_oversized_extent() {
        let header = ShardHeader {
            shape: vec![65536, 1, 1],
            chunk_shape: vec![32, 1, 1],
        };
        assert!(matches!(header.to_bytes(), Err(Error::Config(_))));
        assert!(matches!(ShardHeader::from_bytes(&[3, 0, 1]), Err(Error::Format(_))));
    }

    #[test]
    fn directory_count_must_match_entries() {
        let bytes = encode_directory(&[10, 20, 30]).unwrap();
        assert_eq!(decode_directory(&bytes).unwrap(), vec![10, 20, 30]);

        // declares three chunks, carries two
        let mut short = vec![0, 3];
        short.extend_from_slice(&10u32.to_be_bytes());
        short.extend_from_slice(&20u32.to_be_bytes());
        assert!(matches!(decode_directory(&short), Err(Error::Format(_))));
    }

    #[test]
    fn entropy_block_round_trip() {
        let huffman = Huffman::from_frequencies([(0, 50), (1, 20), (-1, 20), (-32768, 3)]).unwrap();
        let bytes = encode_entropy(&huffman).unwrap();
        assert_eq!(bytes[0], 16);
        assert_eq!(&bytes[1..5], &4u32.to_be_bytes());
        let parsed = decode_entropy(&bytes).unwrap();
        assert_eq!(parsed.codes(), huffman.codes());

        let empty = encode_entropy(&Huffman::default()).unwrap();
        assert_eq!(empty, vec![16, 0, 0, 0, 0]);
        assert!(decode_entropy(&empty).unwrap().is_empty());
    }

    fn assemble(blocks: &[(u8, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        write_preamble(&mut buf).unwrap();
        for &(tag, payload) in blocks {
            write_block(&mut buf, tag, payload).unwrap();
        }
        buf
    }

    #[test]
    fn scan_finds_every_block() {
        let buf = assemble(&[
            (TAG_HEADER, &[1, 2, 3][..]),
            (TAG_ENTROPY, &[][..]),
            (TAG_DIRECTORY, &[9; 6][..]),
            (TAG_CHUNKS, &[7; 4][..]),
        ]);
        let mut preamble = [0u8; 6];
        preamble.copy_from_slice(&buf[..6]);
        check_preamble(&preamble).unwrap();

        let total = buf.len() as u64;
        let mut cursor = Cursor::new(buf);
        let entries = scan_blocks(&mut cursor, total).unwrap();
        let layout = BlockLayout::from_entries(&entries).unwrap();
        assert_eq!(layout.header, BlockEntry { tag: TAG_HEADER, offset: 11, len: 3 });
        assert_eq!(layout.chunks.offset, total - 4);
        assert_eq!(read_block(&mut cursor, &layout.directory).unwrap(), vec![9; 6]);
    }

    #[test]
    fn scan_rejects_truncation_and_bad_tags() {
        let mut buf = assemble(&[(TAG_HEADER, &[1, 2, 3][..])]);
        buf.truncate(buf.len() - 1);
        let total = buf.len() as u64;
        assert!(matches!(scan_blocks(&mut Cursor::new(buf), total), Err(Error::Format(_))));

        let buf = assemble(&[(0x30, &[1][..])]);
        let total = buf.len() as u64;
        assert!(matches!(scan_blocks(&mut Cursor::new(buf), total), Err(Error::Format(_))));
    }

    #[test]
    fn layout_requires_each_block_once() {
        let entry = |tag| BlockEntry { tag, offset: 0, len: 0 };
        let missing = [entry(TAG_HEADER), entry(TAG_ENTROPY), entry(TAG_CHUNKS)];
        assert!(matches!(BlockLayout::from_entries(&missing), Err(Error::Format(_))));
        let doubled = [
            entry(TAG_HEADER),
            entry(TAG_ENTROPY),
            entry(TAG_DIRECTORY),
            entry(TAG_CHUNKS),
            entry(TAG_ENTROPY),
        ];
        assert!(matches!(BlockLayout::from_entries(&doubled), Err(Error::Format(_))));
    }

    #[test]
    fn wrong_magic_or_version() {
        assert!(check_preamble(b"DTCOQ\x00").is_err());
        assert!(check_preamble(b"DTCOP\x01").is_err());
    }
}
