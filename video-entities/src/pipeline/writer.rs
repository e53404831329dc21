//! Gzipped JSON Lines page files.

use super::VideoEntity;
use crate::Result;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// `<%Y-%m-%d_%H-%M-%S>.<5 hex digits>.jsonl.gz`
pub fn file_name(now: DateTime<Utc>) -> String {
    let suffix = rand::random::<u32>() & 0xf_ffff;
    format!("{}.{:05x}.jsonl.gz", now.format("%Y-%m-%d_%H-%M-%S"), suffix)
}

/// Write one record per line, gzip compressed.
pub fn write_page(path: &Path, records: &[VideoEntity]) -> Result<()> {
    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    for record in records {
        serde_json::to_writer(&mut encoder, record)?;
        encoder.write_all(b"\n")?;
    }
    encoder.finish()?.flush()?;
    Ok(())
}

/// [`write_page`] on the blocking pool. Returns the number of records written.
pub async fn save_page(path: PathBuf, records: Vec<VideoEntity>) -> Result<usize> {
    tokio::task::spawn_blocking(move || -> Result<usize> {
        write_page(&path, &records)?;
        Ok(records.len())
    })
    .await
    .map_err(|e| std::io::Error::other(format!("page writer task failed: {}", e)))?
}

/// Read back a page written by [`write_page`].
pub fn read_page(path: &Path) -> Result<Vec<VideoEntity>> {
    let reader = BufReader::new(GzDecoder::new(File::open(path)?));
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
