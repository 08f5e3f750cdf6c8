//! DTCOP Demo
//!
//! Generates a smooth synthetic climate cube (temperature-like field in packed
//! integer units), compresses it with DTCOP at several error bounds and with
//! traditional byte-stream codecs, then shows the point of the format: one
//! chunk decodes from a few kilobytes of the shard while a stream codec has to
//! inflate everything in front of it.

use std::fs::File;
use std::hint::black_box;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use flate2::write::GzEncoder;
use flate2::Compression as GzCompression;

use dtcop_codecs::{Lz4Codec, QuantCodec, ZlibCodec};
use dtcop_core::index::{row_major_offset, MultiIndex};
use dtcop_core::{Codec, DataType, NdArray, ShardReader, ShardWriter};

// ── constants ──────────────────────────────────────────────────────────────

const SHAPE: [usize; 3] = [128, 128, 128];
const CHUNK: usize = 32;
const BOUNDS: &[f64] = &[50.0, 100.0, 200.0, 400.0];

// ── data generator ──────────────────────────────────────────────────────────

/// Deterministic time × lat × lon cube. The same seed always gives the same samples.
fn climate_cube(seed: u64) -> NdArray {
    let mut rng = seed;
    let mut array = NdArray::zeros(&SHAPE, DataType::F32);
    for coords in MultiIndex::new(&SHAPE) {
        rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        let noise = ((rng >> 40) as f64 / (1u64 << 24) as f64 - 0.5) * 30.0;
        let (t, y, x) = (coords[0] as f64, coords[1] as f64, coords[2] as f64);
        let v = 18000.0 + 2500.0 * (x / 9.0).sin() * (y / 13.0).cos() + 40.0 * t + noise;
        array.set(&coords, v as f32 as f64);
    }
    array
}

fn f32_bytes(array: &NdArray) -> Vec<u8> {
    array.data().iter().flat_map(|&v| (v as f32).to_le_bytes()).collect()
}

// ── timing ──────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const U: &[&str] = &["B", "KB", "MB", "GB"];
    let mut v = n as f64;
    let mut u = 0;
    while v >= 1024.0 && u < U.len() - 1 { v /= 1024.0; u += 1; }
    if u == 0 { format!("{n} B") } else { format!("{v:.2} {}", U[u]) }
}

fn fmt_duration(d: Duration) -> String {
    let ms = d.as_secs_f64() * 1000.0;
    if ms < 1.0 {
        format!("{:.1} µs", ms * 1000.0)
    } else if ms < 1000.0 {
        format!("{ms:.1} ms")
    } else {
        format!("{:.2} s", d.as_secs_f64())
    }
}

fn speedup(slow: Duration, fast: Duration) -> f64 {
    slow.as_secs_f64() / fast.as_secs_f64().max(1e-9)
}

// ── write helpers ───────────────────────────────────────────────────────────

fn write_shard(path: &Path, array: &NdArray, max_error: f64) -> Result<f64> {
    let threads = std::thread::available_parallelism().map_or(1, |n| n.get());
    let writer = ShardWriter::with_standard_catalog(CHUNK, max_error, threads)?;
    let stats = writer.write(array, BufWriter::new(File::create(path)?))?;
    Ok(stats.max_error)
}

/// Traditional zstd over the raw f32 stream (no chunk directory, no random access).
fn write_raw_zstd(path: &Path, raw: &[u8]) -> Result<()> {
    let mut enc = zstd::stream::write::Encoder::new(BufWriter::new(File::create(path)?), 3)?;
    enc.write_all(raw)?;
    enc.finish()?.flush()?;
    Ok(())
}

fn write_raw_gzip(path: &Path, raw: &[u8]) -> Result<()> {
    let mut enc = GzEncoder::new(BufWriter::new(File::create(path)?), GzCompression::default());
    enc.write_all(raw)?;
    enc.finish()?.flush()?;
    Ok(())
}

fn write_codec(path: &Path, codec: &dyn Codec, array: &NdArray) -> Result<()> {
    std::fs::write(path, codec.compress(array)?)?;
    Ok(())
}

/// Plain uniform quantization plus zstd, with steps sized to `max_error`.
/// Returns the worst error after a full decode.
fn write_quant(path: &Path, array: &NdArray, max_error: f64) -> Result<f64> {
    let codec = QuantCodec::new(2.0 * max_error)?;
    let bytes = codec.compress(array)?;
    std::fs::write(path, &bytes)?;
    let decoded = codec.decompress(&bytes)?;
    Ok(array
        .data()
        .iter()
        .zip(decoded.data())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f64, f64::max))
}

// ── traditional random-access simulation ────────────────────────────────────

/// Stream-decode a raw zstd file until `target` samples have been produced.
/// Returns the time taken and the sample at that position.
fn zstd_sample_at(path: &Path, target: usize) -> Result<(Duration, f32)> {
    let t0 = Instant::now();
    let mut dec = zstd::stream::read::Decoder::new(File::open(path)?)?;
    let mut skip = vec![0u8; target * 4];
    dec.read_exact(&mut skip)?;
    let mut sample = [0u8; 4];
    dec.read_exact(&mut sample)?;
    Ok((t0.elapsed(), f32::from_le_bytes(sample)))
}

// ── demo runner ─────────────────────────────────────────────────────────────

fn run() -> Result<()> {
    let out_dir = std::env::temp_dir().join("dtcop_demo");
    std::fs::create_dir_all(&out_dir)?;

    let raw_zstd_path = out_dir.join("cube.f32.zst");
    let raw_gzip_path = out_dir.join("cube.f32.gz");
    let zlib_path = out_dir.join("cube.zlib");
    let lz4_path = out_dir.join("cube.lz4");
    let quant_path = out_dir.join("cube.quant");
    let shard_path = |bound: f64| out_dir.join(format!("cube.e{bound}.dtcop"));

    // ── banner ───────────────────────────────────────────────────────────────
    println!();
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║     DTCOP · error-bounded transform compression  ·  Demo        ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    // ── Phase 0: Data Generation ─────────────────────────────────────────────
    section("0 · DATA GENERATION");
    let array = climate_cube(0xC11_3A7E);
    let raw = f32_bytes(&array);
    let raw_bytes = raw.len() as u64;
    println!("  shape          : {:?} (time × lat × lon)", SHAPE);
    println!("  samples        : {}", format_number(array.len() as u64));
    println!("  raw f32 size   : {}", human_bytes(raw_bytes));
    println!("  value at [0,0,0..4] : {:?}", &array.data()[..4]);
    println!();

    // ── Phase 1: Compression ─────────────────────────────────────────────────
    section("1 · COMPRESSION");
    println!("  {:<24} {:>12}  {:>12}  {:>8}  {:>12}  Note",
             "Format", "Raw", "Compressed", "Ratio", "Worst error");
    println!("  {}", "─".repeat(84));

    for &bound in BOUNDS {
        let worst = timed_step(&format!("dtcop ±{bound}"), || write_shard(&shard_path(bound), &array, bound))?;
        print_compression_row(&format!("dtcop  (±{bound})"), raw_bytes, &shard_path(bound),
            &format!("{worst:>12.3}"), "", false)?;
    }

    let quant_bound = BOUNDS[BOUNDS.len() - 1];
    let worst = timed_step(&format!("quant ±{quant_bound}"), || write_quant(&quant_path, &array, quant_bound))?;
    print_compression_row(&format!("quant  (±{quant_bound})"), raw_bytes, &quant_path,
        &format!("{worst:>12.3}"), "← lossy baseline, no random access", true)?;

    timed_step("raw zstd", || write_raw_zstd(&raw_zstd_path, &raw))?;
    print_compression_row("raw zstd", raw_bytes, &raw_zstd_path, &format!("{:>12}", 0), "← lossless, no random access", true)?;

    timed_step("raw gzip", || write_raw_gzip(&raw_gzip_path, &raw))?;
    print_compression_row("raw gzip", raw_bytes, &raw_gzip_path, &format!("{:>12}", 0), "← lossless, no random access", true)?;

    timed_step("zlib record", || write_codec(&zlib_path, &ZlibCodec::default(), &array))?;
    print_compression_row("zlib   (level 1)", raw_bytes, &zlib_path, &format!("{:>12}", 0), "← lossless", true)?;

    timed_step("lz4 record", || write_codec(&lz4_path, &Lz4Codec, &array))?;
    print_compression_row("lz4", raw_bytes, &lz4_path, &format!("{:>12}", 0), "← lossless", true)?;

    // ── Phase 2: Bound verification ──────────────────────────────────────────
    section("2 · ERROR BOUND VERIFICATION");
    for &bound in BOUNDS {
        let reader = ShardReader::open(shard_path(bound))?;
        let t0 = Instant::now();
        let decoded = reader.read_array()?;
        let dur = t0.elapsed();
        let worst = array
            .data()
            .iter()
            .zip(decoded.data())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f64, f64::max);
        println!("  ±{:<8} worst {:>10.3}  {}  full decode {}",
            bound, worst,
            if worst <= bound { "✓ within bound" } else { "⚠ BOUND EXCEEDED" },
            fmt_duration(dur));
    }

    // ── Phase 3: THE CORE CLAIM ───────────────────────────────────────────────
    section("3 · RANDOM ACCESS: one chunk without decoding the rest");

    let bound = 100.0;
    let reader = ShardReader::open(shard_path(bound))?;
    let grid = reader.grid().to_vec();
    // deep seek: the last chunk in the grid, sample in its middle
    let index: Vec<usize> = grid.iter().map(|&g| g - 1).collect();
    let linear = reader.linear_index(&index)?;
    let local = [CHUNK / 2; 3];
    let global: Vec<usize> = index.iter().zip(&local).map(|(&i, &l)| i * CHUNK + l).collect();
    let target = row_major_offset(&SHAPE, &global);

    let t0 = Instant::now();
    let chunk = reader.get_chunk(&index)?;
    let dtcop_dur = t0.elapsed();
    let dtcop_value = chunk.get(&local);
    let dtcop_io = reader.chunk_len(linear)? as u64;

    let (zstd_dur, zstd_value) = zstd_sample_at(&raw_zstd_path, target)?;
    let zstd_io = file_size(&raw_zstd_path)?;

    println!("  Reading sample {:?}  =  chunk {:?} of grid {:?}", global, index, grid);
    println!();
    println!("  {:<40}  {:>12}  {:>12}  {:>12}", "Method", "Latency", "I/O read", "Value");
    println!("  {}", "─".repeat(82));
    println!("  {:<40}  {:>12}  {:>12}  {:>12.3}",
        format!("dtcop ±{bound} (chunk #{linear})"), fmt_duration(dtcop_dur), human_bytes(dtcop_io), dtcop_value);
    println!("  {:<40}  {:>12}  {:>12}  {:>12.3}",
        "raw zstd (stream decode to target)", fmt_duration(zstd_dur), human_bytes(zstd_io), zstd_value);
    println!();
    let diff = (dtcop_value as f64 - zstd_value as f64).abs();
    println!("  |difference| = {:.3}  {}", diff,
        if diff <= bound { "✓ within bound" } else { "⚠ BOUND EXCEEDED" });
    println!("  latency speedup : {:.1}×   I/O reduction : {:.0}×",
        speedup(zstd_dur, dtcop_dur), zstd_io as f64 / dtcop_io as f64);

    // ── Phase 4: Random access bulk benchmark ────────────────────────────────
    section("4 · RANDOM ACCESS BENCHMARK: 200 random chunk reads");

    let mut latencies_us: Vec<u64> = {
        let count = reader.chunk_count() as u64;
        let mut rng = 0xDEAD_BEEF_CAFE_BABEu64;
        let mut lats = Vec::with_capacity(200);
        for _ in 0..200 {
            rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let t = Instant::now();
            black_box(reader.get_chunk_linear(((rng >> 33) % count) as usize)?);
            lats.push(t.elapsed().as_micros() as u64);
        }
        lats
    };
    latencies_us.sort_unstable();

    let p50 = latencies_us[100];
    let p95 = latencies_us[190];
    let p99 = latencies_us[198];
    let min = latencies_us[0];
    let max = latencies_us[latencies_us.len() - 1];

    println!("  {:>8}  {:>8}  {:>8}  {:>8}  {:>8}", "min", "p50", "p95", "p99", "max");
    println!("  {:>8}  {:>8}  {:>8}  {:>8}  {:>8}",
             format!("{min}µs"), format!("{p50}µs"), format!("{p95}µs"),
             format!("{p99}µs"), format!("{max}µs"));
    println!();
    println!("  Each read = 1 × seek + 1 × read + Huffman decode + inverse DCT of {CHUNK}³");

    // ── Summary ───────────────────────────────────────────────────────────────
    section("SUMMARY");
    let shard_size = file_size(&shard_path(bound))?;
    println!("  {:<40}  {}", "Shard ratio at ±100:", format!("{:.1}×", raw_bytes as f64 / shard_size as f64));
    println!("  {:<40}  {}", "raw zstd ratio (lossless):",
        format!("{:.1}×", raw_bytes as f64 / file_size(&raw_zstd_path)? as f64));
    println!("  {:<40}  {}", "Random chunk read (p50 / p99):", format!("{p50} µs / {p99} µs"));
    println!("  {:<40}  {}", "I/O per chunk read:", human_bytes(dtcop_io));
    println!();
    drop(reader);

    for &bound in BOUNDS {
        let _ = std::fs::remove_file(shard_path(bound));
    }
    for p in [&raw_zstd_path, &raw_gzip_path, &zlib_path, &lz4_path, &quant_path] {
        let _ = std::fs::remove_file(p);
    }

    Ok(())
}

// ── small helpers ──────────────────────────────────────────────────────────

fn section(title: &str) {
    println!();
    println!("━━━ {title} {}", "━".repeat(70usize.saturating_sub(title.len() + 5)));
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut out = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 { out.push(','); }
        out.push(c);
    }
    out.chars().rev().collect()
}

fn file_size(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

fn print_compression_row(label: &str, raw: u64, path: &Path, error: &str, note: &str, dim: bool) -> Result<()> {
    let compressed = file_size(path)?;
    let ratio = raw as f64 / compressed as f64;
    let dim_s = if dim { "\x1b[2m" } else { "" };
    let rst   = if dim { "\x1b[0m" } else { "" };
    println!("  {dim_s}{:<24} {:>12}  {:>12}  {:>7.1}x  {error}  {note}{rst}",
        label,
        human_bytes(raw),
        human_bytes(compressed),
        ratio,
    );
    Ok(())
}

fn timed_step<T, F: FnOnce() -> Result<T>>(label: &str, f: F) -> Result<T> {
    eprint!("  writing {label:<24} ");
    let t0 = Instant::now();
    let r = f()?;
    eprintln!("done  ({:.2}s)", t0.elapsed().as_secs_f64());
    Ok(r)
}

fn main() {
    if let Err(e) = run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
