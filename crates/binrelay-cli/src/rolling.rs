//! Size-capped rotating log file.
//!
//! Keeps the active log under a byte budget: when a write would exceed it,
//! existing backups shift (`binrelay.log.1` -> `binrelay.log.2`, ...), the
//! active file becomes backup 1, and a fresh file is started. The oldest
//! backup beyond the configured count falls off the end.
//!
//! Used behind a `Mutex` as the `tracing_subscriber` writer.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

pub struct RollingWriter {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    file: File,
    written: u64,
}

impl RollingWriter {
    /// Opens (or continues) the log at `path`, rotating once `max_size_mb`
    /// megabytes accumulate and keeping `backups` rotated files.
    pub fn open(path: impl Into<PathBuf>, max_size_mb: u64, backups: usize) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes: max_size_mb * 1024 * 1024,
            backups,
            file,
            written,
        })
    }

    fn backup_path(&self, index: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        if self.backups == 0 {
            fs::remove_file(&self.path).ok();
        } else {
            for index in (1..self.backups).rev() {
                // Missing backups are fine.
                let _ = fs::rename(self.backup_path(index), self.backup_path(index + 1));
            }
            let _ = fs::rename(&self.path, self.backup_path(1));
        }

        self.file = File::create(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > self.max_bytes && self.written > 0 {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}
