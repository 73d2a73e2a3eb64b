//! Rotating traffic log file
//!
//! Channels push entries through a bounded queue (`TrafficLog::record`);
//! a dedicated thread formats them, writes through a `BufWriter`,
//! flushes periodically and rotates by size.

use super::{Direction, TrafficEntry, TrafficKind, TrafficLog};
use crate::config::TrafficLogConfig;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::warn;

/// Smallest rotation size accepted; smaller values are clamped
const MIN_ROTATE_BYTES: u64 = 1024;

#[derive(Debug, Clone)]
pub struct FileLoggerConfig {
    pub path: PathBuf,
    pub max_bytes: u64,
    pub max_files: usize,
    pub flush_interval: Duration,
    pub channel_capacity: usize,
}

impl From<&TrafficLogConfig> for FileLoggerConfig {
    fn from(cfg: &TrafficLogConfig) -> Self {
        Self {
            path: cfg.path.clone(),
            max_bytes: cfg.max_bytes,
            max_files: cfg.max_files,
            flush_interval: Duration::from_millis(cfg.flush_interval_ms),
            channel_capacity: cfg.channel_capacity,
        }
    }
}

/// Start the writer thread and return the sink channels log into
pub fn spawn_file_logger(cfg: FileLoggerConfig) -> io::Result<TrafficLog> {
    if let Some(parent) = cfg.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let writer = RotatingWriter::open(&cfg)?;
    let (log, rx) = TrafficLog::channel(cfg.channel_capacity);
    let flush_interval = if cfg.flush_interval.is_zero() {
        Duration::from_millis(250)
    } else {
        cfg.flush_interval
    };

    thread::Builder::new()
        .name("atc-traffic-log".to_string())
        .spawn(move || run_logger(rx, writer, flush_interval))?;

    Ok(log)
}

fn run_logger(rx: Receiver<TrafficEntry>, mut writer: RotatingWriter, flush_interval: Duration) {
    let mut last_flush = Instant::now();

    loop {
        match rx.recv_timeout(flush_interval) {
            Ok(entry) => {
                if let Err(e) = writer.write_line(&format_entry(&entry)) {
                    warn!("Traffic log stopped: {}", e);
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                let _ = writer.flush();
                break;
            }
        }

        if last_flush.elapsed() >= flush_interval {
            let _ = writer.flush();
            last_flush = Instant::now();
        }
    }
}

/// Size-bounded log file with numbered backups
struct RotatingWriter {
    path: PathBuf,
    max_bytes: u64,
    max_files: usize,
    out: BufWriter<File>,
    size: u64,
    dirty: bool,
}

impl RotatingWriter {
    fn open(cfg: &FileLoggerConfig) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.path)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            path: cfg.path.clone(),
            max_bytes: cfg.max_bytes.max(MIN_ROTATE_BYTES),
            max_files: cfg.max_files.max(1),
            out: BufWriter::new(file),
            size,
            dirty: false,
        })
    }

    fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.size = self.size.saturating_add(line.len() as u64 + 1);
        self.dirty = true;

        if self.size >= self.max_bytes {
            self.out.flush()?;
            rotate_files(&self.path, self.max_files)?;
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.path)?;
            self.out = BufWriter::new(file);
            self.size = 0;
            self.dirty = false;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.dirty {
            self.out.flush()?;
            self.dirty = false;
        }
        Ok(())
    }
}

fn format_entry(entry: &TrafficEntry) -> String {
    match &entry.kind {
        TrafficKind::Line { direction, text } => {
            let arrow = match direction {
                Direction::In => "<",
                Direction::Out => ">",
            };
            format!("{} [{}] {} {}", entry.timestamp, entry.channel, arrow, text)
        }
        TrafficKind::Payload { size } => {
            format!("{} [{}] > <payload {} B>^Z", entry.timestamp, entry.channel, size)
        }
        TrafficKind::System { message } => {
            format!("{} [{}] [SYS] {}", entry.timestamp, entry.channel, message)
        }
    }
}

/// Shift `<name>.N-1 -> <name>.N`, ..., `<name> -> <name>.1`
fn rotate_files(path: &Path, max_files: usize) -> io::Result<()> {
    let name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "atc-traffic.log".to_string());
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let numbered = |i: usize| dir.join(format!("{}.{}", name, i));

    let _ = fs::remove_file(numbered(max_files));
    for i in (1..max_files).rev() {
        let src = numbered(i);
        if src.exists() {
            fs::rename(&src, numbered(i + 1))?;
        }
    }
    if path.exists() {
        fs::rename(path, numbered(1))?;
    }
    Ok(())
}
