//! Symbol histogram and the Huffman coder shared by every chunk of a shard.
//!
//! The tree is built deterministically from the frequencies (ties broken by
//! symbol value) and serialized as a pre-order bit stream: `0` marks an
//! internal node followed by its left and right subtrees, `1` marks a leaf
//! followed by its symbol in two's complement.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};

use crate::bits::{BitReader, BitWriter, OutOfBits};
use crate::error::{Error, Result};

/// Width of serialized symbols in the entropy-table block.
pub const SYMBOL_BITS: u32 = 16;

/// Longest code the coder will emit.
pub const MAX_CODE_LEN: u32 = 64;

const DENSE_OFFSET: i32 = 32768;
const DENSE_SIZE: usize = 65536;

/// Frequency table over signed symbols.
///
/// Symbols in the 16-bit range live in a dense array (allocated on first
/// use); anything else goes to an overflow map.
#[derive(Debug, Clone, Default)]
pub struct Histogram {
    dense: Vec<u64>,
    overflow: BTreeMap<i32, u64>,
    symbol_count: usize,
    total: u64,
}

impl Histogram {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn update(&mut self, symbol: i32) {
        self.update_by(symbol, 1);
    }

    /// Record `count` occurrences of `symbol`.
    pub fn update_by(&mut self, symbol: i32, count: u64) {
        if count == 0 {
            return;
        }
        let idx = symbol as i64 + DENSE_OFFSET as i64;
        let slot = if (0..DENSE_SIZE as i64).contains(&idx) {
            if self.dense.is_empty() {
                self.dense = vec![0; DENSE_SIZE];
            }
            &mut self.dense[idx as usize]
        } else {
            self.overflow.entry(symbol).or_insert(0)
        };
        if *slot == 0 {
            self.symbol_count += 1;
        }
        *slot += count;
        self.total += count;
    }

    /// Add every count of `other` into `self`.
    pub fn merge(&mut self, other: &Histogram) {
        for (symbol, count) in other.iter() {
            self.update_by(symbol, count);
        }
    }

    pub fn frequency(&self, symbol: i32) -> u64 {
        let idx = symbol as i64 + DENSE_OFFSET as i64;
        if (0..DENSE_SIZE as i64).contains(&idx) {
            self.dense.get(idx as usize).copied().unwrap_or(0)
        } else {
            self.overflow.get(&symbol).copied().unwrap_or(0)
        }
    }

    /// Number of distinct symbols seen.
    pub fn symbol_count(&self) -> usize {
        self.symbol_count
    }

    /// Total number of samples recorded.
    pub fn total_count(&self) -> u64 {
        self.total
    }

    /// Non-zero `(symbol, count)` pairs in ascending symbol order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, u64)> + '_ {
        let dense = self
            .dense
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c > 0)
            .map(|(i, &c)| (i as i32 - DENSE_OFFSET, c));
        let below = self.overflow.range(..-DENSE_OFFSET).map(|(&s, &c)| (s, c));
        let above = self.overflow.range(DENSE_OFFSET..).map(|(&s, &c)| (s, c));
        below.chain(dense).chain(above)
    }

    pub fn build_huffman(&self) -> Result<Huffman> {
        Huffman::from_frequencies(self.iter())
    }
}

/// A prefix code word: the low `len` bits of `bits`, MSB first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Code {
    pub bits: u64,
    pub len: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Leaf(i32),
    Internal { left: usize, right: usize },
}

/// Huffman coder: an arena-allocated binary tree plus a symbol → code map.
#[derive(Debug, Clone, Default)]
pub struct Huffman {
    nodes: Vec<Node>,
    root: Option<usize>,
    codes: HashMap<i32, Code>,
}

impl Huffman {
    /// Build the tree from `(symbol, weight)` pairs.
    ///
    /// The two lightest nodes are merged repeatedly; equal weights are
    /// ordered by symbol value, and merged nodes take keys counting down from
    /// the top of the key space, so the tree only depends on the input set.
    pub fn from_frequencies(frequencies: impl IntoIterator<Item = (i32, u64)>) -> Result<Self> {
        let mut nodes = Vec::new();
        let mut heap = BinaryHeap::new();
        let mut seen = HashSet::new();
        for (symbol, weight) in frequencies {
            if weight == 0 {
                continue;
            }
            if !seen.insert(symbol) {
                return Err(Error::config(format!("symbol {symbol} listed twice")));
            }
            heap.push(Reverse((weight, symbol as i64, nodes.len())));
            nodes.push(Node::Leaf(symbol));
        }

        let mut next_key = i64::MAX;
        let mut root = None;
        while let Some(Reverse((w1, _, left))) = heap.pop() {
            let Some(Reverse((w2, _, right))) = heap.pop() else {
                root = Some(left);
                break;
            };
            heap.push(Reverse((w1 + w2, next_key, nodes.len())));
            nodes.push(Node::Internal { left, right });
            next_key -= 1;
        }

        let mut huffman = Self {
            nodes,
            root,
            codes: HashMap::new(),
        };
        huffman.assign_codes()?;
        Ok(huffman)
    }

    fn assign_codes(&mut self) -> Result<()> {
        let Some(root) = self.root else {
            return Ok(());
        };
        let mut stack = vec![(root, 0u64, 0u32)];
        while let Some((idx, bits, len)) = stack.pop() {
            match self.nodes[idx] {
                Node::Leaf(symbol) => {
                    self.codes.insert(symbol, Code { bits, len });
                }
                Node::Internal { left, right } => {
                    if len >= MAX_CODE_LEN {
                        return Err(Error::format(format!(
                            "Huffman code longer than {MAX_CODE_LEN} bits"
                        )));
                    }
                    stack.push((right, (bits << 1) | 1, len + 1));
                    stack.push((left, bits << 1, len + 1));
                }
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn symbol_count(&self) -> usize {
        self.codes.len()
    }

    pub fn code(&self, symbol: i32) -> Option<Code> {
        self.codes.get(&symbol).copied()
    }

    /// `(symbol, code)` pairs in ascending symbol order.
    pub fn codes(&self) -> Vec<(i32, Code)> {
        let mut out: Vec<(i32, Code)> = self.codes.iter().map(|(&s, &c)| (s, c)).collect();
        out.sort_unstable_by_key(|&(s, _)| s);
        out
    }

    pub fn write_symbol(&self, w: &mut BitWriter, symbol: i32) -> Result<()> {
        let code = self
            .code(symbol)
            .ok_or_else(|| Error::config(format!("symbol {symbol} not in alphabet")))?;
        w.write_bits(code.bits, code.len);
        Ok(())
    }

    /// Write `symbol` `count` times in a row.
    pub fn write_repeated(&self, w: &mut BitWriter, symbol: i32, count: usize) -> Result<()> {
        let code = self
            .code(symbol)
            .ok_or_else(|| Error::config(format!("symbol {symbol} not in alphabet")))?;
        for _ in 0..count {
            w.write_bits(code.bits, code.len);
        }
        Ok(())
    }

    /// Decode one symbol. An empty table has nothing to decode and reports
    /// [`OutOfBits`].
    pub fn read_symbol(&self, r: &mut BitReader<'_>) -> std::result::Result<i32, OutOfBits> {
        let mut idx = self.root.ok_or(OutOfBits)?;
        loop {
            match self.nodes[idx] {
                Node::Leaf(symbol) => return Ok(symbol),
                Node::Internal { left, right } => {
                    idx = if r.read_bit()? { right } else { left };
                }
            }
        }
    }

    /// Serialize the tree with `symbol_bits`-wide leaves.
    pub fn write_table(&self, w: &mut BitWriter, symbol_bits: u32) -> Result<()> {
        let Some(root) = self.root else {
            return Ok(());
        };
        let min = -(1i64 << (symbol_bits - 1));
        let max = (1i64 << (symbol_bits - 1)) - 1;
        let mut stack = vec![root];
        while let Some(idx) = stack.pop() {
            match self.nodes[idx] {
                Node::Leaf(symbol) => {
                    if !(min..=max).contains(&(symbol as i64)) {
                        return Err(Error::Range {
                            value: symbol as i64,
                            min: min as i32,
                            max: max as i32,
                        });
                    }
                    w.write_bit(true);
                    w.write_bits(symbol as i64 as u64, symbol_bits);
                }
                Node::Internal { left, right } => {
                    w.write_bit(false);
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
        Ok(())
    }

    /// Parse a tree written by [`Huffman::write_table`].
    pub fn read_table(r: &mut BitReader<'_>, symbol_bits: u32, symbol_count: usize) -> Result<Self> {
        if !(1..=32).contains(&symbol_bits) {
            return Err(Error::format(format!("unsupported symbol width {symbol_bits}")));
        }
        let mut huffman = Self::default();
        if symbol_count == 0 {
            return Ok(huffman);
        }

        // Pre-order parse with an explicit stack of parents still missing a
        // right child.
        enum Slot {
            Left(usize),
            Right(usize),
        }
        let mut pending: Vec<(usize, u32)> = Vec::new();
        let mut attach: Option<Slot> = None;
        let mut depth = 0u32;
        let mut leaves = 0usize;
        loop {
            let idx = huffman.nodes.len();
            let is_leaf = r.read_bit()?;
            if is_leaf {
                let raw = r.read_bits(symbol_bits)?;
                let shift = 64 - symbol_bits;
                let symbol = ((raw << shift) as i64 >> shift) as i32;
                huffman.nodes.push(Node::Leaf(symbol));
                leaves += 1;
                if leaves > symbol_count {
                    return Err(Error::format(format!(
                        "entropy table holds more than the declared {symbol_count} symbols"
                    )));
                }
            } else {
                if depth >= MAX_CODE_LEN {
                    return Err(Error::format("entropy table tree too deep"));
                }
                huffman.nodes.push(Node::Internal {
                    left: usize::MAX,
                    right: usize::MAX,
                });
            }

            match attach.take() {
                None => huffman.root = Some(idx),
                Some(Slot::Left(parent)) => {
                    if let Node::Internal { left, .. } = &mut huffman.nodes[parent] {
                        *left = idx;
                    }
                }
                Some(Slot::Right(parent)) => {
                    if let Node::Internal { right, .. } = &mut huffman.nodes[parent] {
                        *right = idx;
                    }
                }
            }

            if is_leaf {
                match pending.pop() {
                    Some((parent, parent_depth)) => {
                        attach = Some(Slot::Right(parent));
                        depth = parent_depth + 1;
                    }
                    None => break,
                }
            } else {
                pending.push((idx, depth));
                attach = Some(Slot::Left(idx));
                depth += 1;
            }
        }

        if leaves != symbol_count {
            return Err(Error::format(format!(
                "entropy table declares {symbol_count} symbols but holds {leaves}"
            )));
        }
        huffman.assign_codes()?;
        if huffman.codes.len() != leaves {
            return Err(Error::format("entropy table repeats a symbol"));
        }
        Ok(huffman)
    }
}
