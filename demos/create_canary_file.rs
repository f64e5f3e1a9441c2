// Creates a file filled with the repeating 0..=255 byte pattern, for feeding the probe
// something whose misplaced chunks are easy to spot.
//
//   cargo run --example create_canary_file -- bigfile.bin 512

use std::io::{BufWriter, Write};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

#[derive(Parser)]
struct Args {
    /// Where to write. Must not exist yet.
    path: PathBuf,
    /// Size in megabytes.
    size_mb: u64,
    /// Extra bytes on top, to get sizes that are not a multiple of the chunk size.
    #[arg(long, default_value_t = 0)]
    extra_bytes: u64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let size = args.size_mb * 1024 * 1024 + args.extra_bytes;
    let file = std::fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&args.path)
        .with_context(|| format!("cannot create {:?}", args.path))?;

    let mut content = [0u8; 256];
    for (idx, byte) in (0..=u8::MAX).enumerate() {
        content[idx] = byte;
    }

    let mut file = BufWriter::new(file);
    let mut remaining = size;
    while remaining > 0 {
        let len = remaining.min(content.len() as u64);
        file.write_all(&content[..len as usize])
            .context("error writing")?;
        remaining -= len;
    }
    file.flush().context("error flushing")?;
    Ok(())
}
