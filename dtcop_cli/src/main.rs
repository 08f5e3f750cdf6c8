use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{debug, LevelFilter};
use xxhash_rust::xxh3::xxh3_64;

use dtcop_codecs::CodecConfig;
use dtcop_core::format::tag_name;
use dtcop_core::{DataType, NdArray, QuantCatalog, ShardReader, ShardWriter, MAGIC};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "dtcop",
    about = "Error-bounded transform compression for 3-D grids, with random access to every chunk",
    version
)]
struct Cli {
    /// More logging (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress a raw grid into a DTCOP shard (or another codec's payload)
    Compress {
        /// Raw little-endian samples, or an NDA1 record with --record
        input: PathBuf,
        /// Destination file
        output: PathBuf,
        /// Grid shape as Z,Y,X (not needed with --record)
        #[arg(short, long, value_delimiter = ',')]
        shape: Vec<usize>,
        /// Sample type of the raw input: i8 u8 i16 u16 i32 u32 i64 f32 f64
        #[arg(long, default_value = "f32")]
        dtype: String,
        /// Input is an NDA1 array record
        #[arg(long)]
        record: bool,
        /// Chunk shape as Z,Y,X
        #[arg(long, value_delimiter = ',', default_value = "32,32,32")]
        chunk: Vec<usize>,
        /// Largest absolute error allowed on any sample
        #[arg(short = 'e', long, default_value_t = 1.0)]
        max_error: f64,
        /// Encoder threads (default: all cores)
        #[arg(short, long)]
        threads: Option<usize>,
        /// Codec to use: dtcop | quant | zlib | zstd | lz4 | null
        #[arg(short, long, default_value = "dtcop")]
        codec: String,
        /// Compression level for zlib (0–9) or zstd (1–22)
        #[arg(long)]
        level: Option<i32>,
    },
    /// Decode a whole file back to raw little-endian f32 samples
    Decompress {
        /// Source file
        input: PathBuf,
        /// Destination file ("-" writes to stdout)
        output: PathBuf,
        /// Codec of a non-shard payload: quant | zlib | zstd | lz4 | null
        #[arg(short, long)]
        codec: Option<String>,
        /// Write an NDA1 record instead of raw samples
        #[arg(long)]
        record: bool,
    },
    /// Print header, block layout and chunk directory of a shard
    Inspect {
        /// Shard to inspect
        file: PathBuf,
        /// Print per-chunk details
        #[arg(long)]
        chunks: bool,
    },
    /// Decode a single chunk by grid index
    ///
    /// Only the requested chunk's bytes are read; no other chunk is touched.
    ReadChunk {
        /// Shard file
        file: PathBuf,
        /// Chunk grid index as Z,Y,X
        #[arg(short, long, value_delimiter = ',', required = true)]
        index: Vec<usize>,
        /// Write the in-bounds samples as raw little-endian f32
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Benchmark random chunk decodes
    Bench {
        /// Shard file
        file: PathBuf,
        /// Number of random chunks to decode
        #[arg(short, long, default_value_t = 200)]
        count: u64,
        /// Fixed random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Threads decoding from the same reader at once
        #[arg(short, long, default_value_t = 1)]
        threads: usize,
    },
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()));
    builder.parse_default_env();
    let _ = builder.try_init();
}

fn default_threads() -> usize {
    std::thread::available_parallelism().map_or(1, |n| n.get())
}

fn codec_config(name: &str, level: Option<i32>, max_error: f64, chunk: &[usize], threads: usize) -> anyhow::Result<CodecConfig> {
    let config = match name {
        "dtcop" | "d" => {
            let chunk_shape: [usize; 3] = chunk
                .try_into()
                .map_err(|_| anyhow::anyhow!("--chunk needs three extents, got {:?}", chunk))?;
            CodecConfig::Dtcop {
                max_error,
                chunk_shape,
                threads,
            }
        }
        "zlib" => CodecConfig::Zlib {
            level: u32::try_from(level.unwrap_or(1)).context("zlib level must not be negative")?,
        },
        "zstd" | "z" => CodecConfig::Zstd {
            level: level.unwrap_or(3),
        },
        "lz4" | "l" => CodecConfig::Lz4,
        // steps of twice the bound keep every sample within it
        "quant" | "q" => CodecConfig::Quant { quant: 2.0 * max_error },
        "null" | "none" => CodecConfig::Null,
        other => anyhow::bail!(
            "unknown codec '{}'. Valid options: dtcop, quant, zlib, zstd, lz4, null",
            other
        ),
    };
    Ok(config)
}

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn is_shard(path: &Path) -> anyhow::Result<bool> {
    use std::io::Read;
    let mut head = [0u8; 5];
    let mut f = File::open(path).with_context(|| format!("opening {:?}", path))?;
    Ok(f.read_exact(&mut head).is_ok() && &head == MAGIC)
}

fn load_array(input: &Path, record: bool, shape: &[usize], dtype: &str) -> anyhow::Result<NdArray> {
    let bytes = std::fs::read(input).with_context(|| format!("reading input file {:?}", input))?;
    if record {
        return NdArray::from_bytes(&bytes).with_context(|| format!("{:?} is not an NDA1 record", input));
    }
    if shape.is_empty() {
        anyhow::bail!("--shape is required for raw input (or pass --record)");
    }
    let dtype: DataType = dtype.parse()?;
    Ok(NdArray::from_le_bytes(shape, dtype, &bytes)?)
}

fn f32_le_bytes(samples: impl Iterator<Item = f32>) -> Vec<u8> {
    samples.flat_map(f32::to_le_bytes).collect()
}

fn open_output(output: &Path) -> anyhow::Result<Box<dyn Write>> {
    if output.to_str() == Some("-") {
        Ok(Box::new(io::stdout()))
    } else {
        Ok(Box::new(BufWriter::new(
            File::create(output).with_context(|| format!("creating output file {:?}", output))?,
        )))
    }
}

/// Write `bytes` to a sibling temporary file, then rename it over `output`.
/// Nothing appears at `output` unless every byte made it to disk.
fn persist_output(output: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".dtcop-")
        .tempfile_in(dir)
        .with_context(|| format!("creating temporary file in {:?}", dir))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(output)
        .map_err(|e| e.error)
        .with_context(|| format!("writing output file {:?}", output))?;
    Ok(())
}

// ── Subcommand implementations ─────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn run_compress(
    input: PathBuf,
    output: PathBuf,
    shape: Vec<usize>,
    dtype: &str,
    record: bool,
    chunk: Vec<usize>,
    max_error: f64,
    threads: usize,
    codec_name: &str,
    level: Option<i32>,
) -> anyhow::Result<()> {
    let config = codec_config(codec_name, level, max_error, &chunk, threads)?;
    let array = load_array(&input, record, &shape, dtype)?;
    let raw_size = (array.len() * array.dtype().size()) as u64;
    debug!("loaded {:?} {} from {:?}", array.shape(), array.dtype(), input);

    let t0 = Instant::now();
    eprintln!("  codec       : {}", config.to_json()?);
    let payload = if let CodecConfig::Dtcop { .. } = config {
        // go through the shard writer directly to get per-table stats
        let chunk_shape = &chunk[..];
        let writer = ShardWriter::new(chunk_shape, QuantCatalog::standard(chunk_shape)?, max_error, threads)?;
        let mut buf = Vec::new();
        let stats = writer
            .write(&array, &mut buf)
            .with_context(|| format!("compressing {:?}", input))?;
        eprintln!("  grid        : {:?} ({} chunks of {:?})", stats.grid, stats.chunk_count, chunk);
        eprintln!("  symbols     : {}", stats.symbol_count);
        eprintln!("  worst error : {:.6} (bound {})", stats.max_error, max_error);
        let used: Vec<String> = stats
            .table_counts
            .iter()
            .enumerate()
            .filter(|&(_, &n)| n > 0)
            .map(|(i, n)| format!("#{}×{}", i, n))
            .collect();
        eprintln!("  tables      : {}", used.join(" "));
        buf
    } else {
        config.build()?.compress(&array)?
    };
    persist_output(&output, &payload)?;

    let elapsed = t0.elapsed();
    let compressed_size = std::fs::metadata(&output)?.len();
    let ratio = raw_size as f64 / compressed_size as f64;
    eprintln!("  raw size    : {}", human_bytes(raw_size));
    eprintln!("  compressed  : {}", human_bytes(compressed_size));
    eprintln!("  ratio       : {:.2}x", ratio);
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((raw_size as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_decompress(input: PathBuf, output: PathBuf, codec_name: Option<String>, record: bool) -> anyhow::Result<()> {
    let t0 = Instant::now();
    let array = if is_shard(&input)? {
        ShardReader::open(&input)
            .with_context(|| format!("opening shard {:?}", input))?
            .read_array()?
    } else {
        let name = codec_name.context("input is not a DTCOP shard; pass --codec to name its codec")?;
        let codec = CodecConfig::default_for(&name)?.build()?;
        let bytes = std::fs::read(&input).with_context(|| format!("reading {:?}", input))?;
        codec.decompress(&bytes)?
    };

    let mut dst = open_output(&output)?;
    let bytes = if record {
        array.to_bytes()?
    } else {
        f32_le_bytes(array.data().iter().map(|&v| v as f32))
    };
    dst.write_all(&bytes)?;
    dst.flush()?;

    let elapsed = t0.elapsed();
    eprintln!("  shape       : {:?}", array.shape());
    eprintln!("  raw size    : {}", human_bytes(bytes.len() as u64));
    eprintln!(
        "  throughput  : {}/s",
        human_bytes((bytes.len() as f64 / elapsed.as_secs_f64()) as u64)
    );
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_inspect(file: PathBuf, show_chunks: bool) -> anyhow::Result<()> {
    let reader = ShardReader::open(&file).with_context(|| format!("opening shard {:?}", file))?;
    let file_size = std::fs::metadata(&file)?.len();
    let header = reader.header();
    let raw_size = header.shape.iter().product::<usize>() as u64 * 4;

    println!("=== DTCOP shard: {:?} ===", file);
    println!();
    println!("  shape          : {:?}", header.shape);
    println!("  chunk shape    : {:?}", header.chunk_shape);
    println!("  grid           : {:?} ({} chunks)", reader.grid(), reader.chunk_count());
    println!("  entropy table  : {} symbols", reader.huffman().symbol_count());
    println!("  raw size (f32) : {}", human_bytes(raw_size));
    println!("  chunk data     : {}", human_bytes(reader.compressed_size()));
    println!("  file on disk   : {}", human_bytes(file_size));
    println!("  ratio          : {:.2}x", raw_size as f64 / file_size as f64);
    println!();
    println!("  {:>10}  {:>12}  {:>12}", "block", "offset", "length");
    for block in reader.layout().entries() {
        println!(
            "  {:>10}  {:>12}  {:>12}",
            tag_name(block.tag),
            block.offset,
            human_bytes(block.len as u64)
        );
    }

    if show_chunks {
        println!();
        println!(
            "  {:>6}  {:>14}  {:>12}  {:>12}  {:>16}  {:>14}  polynomial",
            "chunk", "index", "file offset", "length", "xxh3", "dc"
        );
        println!("  {}", "-".repeat(100));
        for i in 0..reader.chunk_count() {
            let bytes = reader.read_chunk_bytes(i)?;
            let info = dtcop_core::chunk_codec::read_chunk_info(&bytes)?;
            println!(
                "  {:>6}  {:>14}  {:>12}  {:>12}  {:016x}  {:>14.3}  {:?}",
                i,
                format!("{:?}", reader.chunk_index(i)?),
                reader.chunk_offset(i)?,
                human_bytes(bytes.len() as u64),
                xxh3_64(&bytes),
                info.dc,
                info.polynomial
            );
        }
    }

    Ok(())
}

fn run_read_chunk(file: PathBuf, index: Vec<usize>, output: Option<PathBuf>) -> anyhow::Result<()> {
    let reader = ShardReader::open(&file).with_context(|| format!("opening shard {:?}", file))?;
    let linear = reader.linear_index(&index)?;

    eprintln!(
        "seeking to chunk {:?} (#{}, offset {} bytes from file start)...",
        index,
        linear,
        reader.chunk_offset(linear)?
    );

    let t0 = Instant::now();
    let chunk = reader.get_chunk(&index)?;
    let elapsed = t0.elapsed();
    let valid = reader.valid_extent(&index)?;

    eprintln!(
        "  decoded {:?} (valid {:?}) in {:.3}ms",
        chunk.shape(),
        valid,
        elapsed.as_secs_f64() * 1000.0
    );

    let samples: Vec<f32> = dtcop_core::index::MultiIndex::new(&valid)
        .map(|coords| chunk.get(&coords))
        .collect();

    match output {
        Some(path) => {
            std::fs::write(&path, f32_le_bytes(samples.iter().copied()))?;
            eprintln!("  written to {:?}", path);
        }
        None => {
            let min = samples.iter().copied().fold(f32::INFINITY, f32::min);
            let max = samples.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mean = samples.iter().map(|&v| v as f64).sum::<f64>() / samples.len() as f64;
            println!("--- chunk {:?} ({} samples) ---", index, samples.len());
            println!("  min  : {}", min);
            println!("  max  : {}", max);
            println!("  mean : {:.4}", mean);
            println!("  first row:");
            let row = valid[2].min(16);
            for v in &samples[..row] {
                print!(" {:.3}", v);
            }
            println!();
        }
    }

    Ok(())
}

fn run_bench(file: PathBuf, count: u64, seed: u64, threads: usize) -> anyhow::Result<()> {
    let reader = ShardReader::open(&file).with_context(|| format!("opening shard {:?}", file))?;
    let chunk_count = reader.chunk_count() as u64;
    if threads == 0 {
        anyhow::bail!("--threads must be at least 1");
    }

    // Simple LCG for reproducible random chunk indices
    let indices: Vec<usize> = {
        let mut rng = seed;
        (0..count)
            .map(|_| {
                rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((rng >> 33) % chunk_count) as usize
            })
            .collect()
    };

    eprintln!(
        "benchmarking {} random chunk decodes across {} chunks on {} thread(s)...",
        count, chunk_count, threads
    );

    let t0 = Instant::now();
    let per_thread = indices.len().div_ceil(threads).max(1);
    let results: Vec<anyhow::Result<(u64, Vec<u64>)>> = std::thread::scope(|s| {
        let handles: Vec<_> = indices
            .chunks(per_thread)
            .map(|slice| {
                let reader = &reader;
                s.spawn(move || -> anyhow::Result<(u64, Vec<u64>)> {
                    let mut bytes = 0u64;
                    let mut latencies = Vec::with_capacity(slice.len());
                    for &i in slice {
                        let t = Instant::now();
                        let chunk = reader.get_chunk_linear(i)?;
                        latencies.push(t.elapsed().as_micros() as u64);
                        bytes += chunk.len() as u64 * 4;
                    }
                    Ok((bytes, latencies))
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| anyhow::anyhow!("bench thread panicked"))?)
            .collect()
    });

    let mut total_raw = 0u64;
    let mut latencies_us = Vec::with_capacity(indices.len());
    for r in results {
        let (bytes, lat) = r?;
        total_raw += bytes;
        latencies_us.extend(lat);
    }
    let elapsed = t0.elapsed();
    if latencies_us.is_empty() {
        anyhow::bail!("nothing to benchmark");
    }
    latencies_us.sort_unstable();

    let pct = |p: f64| latencies_us[((latencies_us.len() as f64 * p) as usize).min(latencies_us.len() - 1)];

    println!();
    println!("=== Random Chunk Access Benchmark ===");
    println!("  chunks read : {}", count);
    println!("  threads     : {}", threads);
    println!("  total raw   : {}", human_bytes(total_raw));
    println!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    println!(
        "  throughput  : {}/s",
        human_bytes((total_raw as f64 / elapsed.as_secs_f64()) as u64)
    );
    println!("  latency:");
    println!("    min  : {} µs", latencies_us[0]);
    println!("    p50  : {} µs", pct(0.50));
    println!("    p95  : {} µs", pct(0.95));
    println!("    p99  : {} µs", pct(0.99));
    println!("    max  : {} µs", latencies_us[latencies_us.len() - 1]);

    Ok(())
}

// ── Entry point ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.command {
        Commands::Compress {
            input,
            output,
            shape,
            dtype,
            record,
            chunk,
            max_error,
            threads,
            codec,
            level,
        } => run_compress(
            input,
            output,
            shape,
            &dtype,
            record,
            chunk,
            max_error,
            threads.unwrap_or_else(default_threads),
            &codec,
            level,
        ),
        Commands::Decompress {
            input,
            output,
            codec,
            record,
        } => run_decompress(input, output, codec, record),
        Commands::Inspect { file, chunks } => run_inspect(file, chunks),
        Commands::ReadChunk {
            file,
            index,
            output,
        } => run_read_chunk(file, index, output),
        Commands::Bench {
            file,
            count,
            seed,
            threads,
        } => run_bench(file, count, seed, threads),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPE: [usize; 3] = [32, 32, 32];

    fn write_raw(path: &Path, f: impl Fn(usize, u64) -> f32) {
        let mut rng = 7u64;
        let samples = (0..SHAPE.iter().product::<usize>()).map(|i| {
            rng = rng
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            f(i, rng)
        });
        std::fs::write(path, f32_le_bytes(samples)).unwrap();
    }

    fn compress(input: &Path, output: &Path, max_error: f64) -> anyhow::Result<()> {
        run_compress(
            input.to_path_buf(),
            output.to_path_buf(),
            SHAPE.to_vec(),
            "f32",
            false,
            vec![16, 16, 16],
            max_error,
            2,
            "dtcop",
            None,
        )
    }

    #[test]
    fn failed_compress_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("noise.bin");
        let output = dir.path().join("out.dtcop");
        write_raw(&input, |_, r| ((r >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * 2000.0);

        let err = compress(&input, &output, 0.01).unwrap_err();
        assert!(
            matches!(
                err.downcast_ref::<dtcop_core::Error>(),
                Some(dtcop_core::Error::ErrorBoundUnreachable { .. })
            ),
            "{err:#}"
        );
        assert!(!output.exists());
        // only the input is left behind, no stray temporary file
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_compress_keeps_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("noise.bin");
        let output = dir.path().join("out.dtcop");
        write_raw(&input, |_, r| ((r >> 40) as f32 / (1u64 << 24) as f32 - 0.5) * 2000.0);
        std::fs::write(&output, b"previous").unwrap();

        assert!(compress(&input, &output, 0.01).is_err());
        assert_eq!(std::fs::read(&output).unwrap(), b"previous");
    }

    #[test]
    fn compress_writes_readable_shard() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("smooth.bin");
        let output = dir.path().join("out.dtcop");
        write_raw(&input, |i, _| {
            let (t, y, x) = ((i / 1024) as f32, ((i / 32) % 32) as f32, (i % 32) as f32);
            18000.0 + 2500.0 * (x / 7.0).sin() * (y / 11.0).cos() + 60.0 * t
        });

        compress(&input, &output, 100.0).unwrap();
        assert!(is_shard(&output).unwrap());
        let restored = ShardReader::open(&output).unwrap().read_array().unwrap();
        assert_eq!(restored.shape(), &SHAPE[..]);
    }
}
