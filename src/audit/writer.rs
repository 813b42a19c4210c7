//! Time-partitioned, append-only audit sink
//!
//! Records are appended as JSON lines to `<prefix>-<partition>.log`.
//! When the partition changes (or the active file outgrows the size cap)
//! the file is gzip-compressed and removed; retention keeps a bounded
//! number of archives, oldest deleted first.

use crate::config::{AuditConfig, Rotation};
use chrono::{DateTime, Utc};
use flate2::{write::GzEncoder, Compression};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

struct OpenPartition {
    partition: String,
    file: File,
    size: u64,
}

/// Rotating file writer for audit records.
pub struct PartitionedWriter {
    dir: PathBuf,
    prefix: String,
    rotation: Rotation,
    max_size_bytes: u64,
    max_files: usize,
    current: Option<OpenPartition>,
}

impl PartitionedWriter {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            prefix: config.prefix.clone(),
            rotation: config.rotation,
            max_size_bytes: config.max_size_bytes,
            max_files: config.max_files,
            current: None,
        }
    }

    /// Append one record line, rotating first if needed.
    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.write_line_at(Utc::now(), line)
    }

    pub fn write_line_at(&mut self, now: DateTime<Utc>, line: &str) -> io::Result<()> {
        let partition = self.rotation.partition(now);

        let rotate_needed = match &self.current {
            Some(open) => {
                open.partition != partition
                    || open.size + line.len() as u64 + 1 > self.max_size_bytes
            }
            None => false,
        };
        if rotate_needed {
            if let Some(open) = self.current.take() {
                // A failed rotation must not stall the stream; report and move on.
                if let Err(e) = self.rotate(open) {
                    tracing::error!(error = %e, "audit rotation failed");
                }
            }
        }

        if self.current.is_none() {
            fs::create_dir_all(&self.dir)?;
            let path = self.live_path(&partition);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            let size = file.metadata().map(|m| m.len()).unwrap_or(0);
            self.current = Some(OpenPartition {
                partition,
                file,
                size,
            });
        }

        if let Some(open) = self.current.as_mut() {
            open.file.write_all(line.as_bytes())?;
            open.file.write_all(b"\n")?;
            open.size += line.len() as u64 + 1;
        }
        Ok(())
    }

    fn live_path(&self, partition: &str) -> PathBuf {
        self.dir.join(format!("{}-{}.log", self.prefix, partition))
    }

    /// First free archive name for a partition: `<live>.gz`, then
    /// `<live>.1.gz`, `<live>.2.gz`, ... for repeated size rotations
    /// within one partition.
    fn archive_path(&self, partition: &str) -> PathBuf {
        let live = self.live_path(partition);
        let base = live.with_extension("log.gz");
        if !base.exists() {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = live.with_extension(format!("log.{n}.gz"));
            if !candidate.exists() {
                return candidate;
            }
            n += 1;
        }
    }

    fn rotate(&self, open: OpenPartition) -> io::Result<()> {
        drop(open.file);
        let live = self.live_path(&open.partition);
        compress_file(&live, &self.archive_path(&open.partition))?;
        fs::remove_file(&live)?;
        self.prune_archives()?;
        Ok(())
    }

    /// Delete the oldest archives beyond `max_files`. Partition stamps
    /// sort lexicographically in chronological order.
    fn prune_archives(&self) -> io::Result<()> {
        let file_prefix = format!("{}-", self.prefix);
        let mut archives: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&file_prefix) && n.ends_with(".gz"))
                    .unwrap_or(false)
            })
            .collect();
        archives.sort();

        while archives.len() > self.max_files {
            let oldest = archives.remove(0);
            fs::remove_file(&oldest)?;
        }
        Ok(())
    }
}

fn compress_file(src: &Path, dst: &Path) -> io::Result<()> {
    let mut input = File::open(src)?;
    let output = File::create(dst)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    Ok(())
}
