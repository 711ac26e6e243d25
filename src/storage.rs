use crate::error::CaptureError;
use crate::schema::{header_line, CaptureTimestamp};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Identity of a capture session: what the operator called it, which port
/// it came from and when it started.
#[derive(Debug, Clone)]
pub struct SessionId {
    pub name: String,
    pub source: String,
    pub created: CaptureTimestamp,
}

impl SessionId {
    pub fn file_name(&self) -> String {
        format!("{}{}_{}.csv", self.name, self.source, self.created)
    }
}

/// Append-only CSV file for one capture session.
///
/// Each record is the capture timestamp written directly against the raw
/// device line, with no comma between them. The repair pass depends on that
/// layout, so it must not change here without changing
/// [`RepairEngine`](crate::repair::RepairEngine) too.
pub struct SessionFile {
    path: PathBuf,
    file: Option<File>,
    sync_each_record: bool,
    records: u64,
}

impl SessionFile {
    /// Create the session file under `dir` and write the header. Fails if a
    /// file with the same name already exists.
    pub fn start(dir: &Path, id: &SessionId, sync_each_record: bool) -> Result<Self, CaptureError> {
        let path = dir.join(id.file_name());
        let write_failure = |source| CaptureError::WriteFailure {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(dir).map_err(write_failure)?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(write_failure)?;

        let header = format!("{}\n", header_line());
        file.write_all(header.as_bytes()).map_err(write_failure)?;
        file.sync_all().map_err(write_failure)?;

        tracing::info!("started session file {}", path.display());
        Ok(SessionFile {
            path,
            file: Some(file),
            sync_each_record,
            records: 0,
        })
    }

    /// Append one captured line. The record is flushed before returning so a
    /// crash never leaves a half-written row behind a complete one.
    pub fn append_line(
        &mut self,
        line: &str,
        captured_at: CaptureTimestamp,
    ) -> Result<(), CaptureError> {
        let record = format!("{captured_at}{line}\n");
        let Some(file) = self.file.as_mut() else {
            return Err(CaptureError::WriteFailure {
                path: self.path.clone(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "session already ended"),
            });
        };

        write_record(file, record.as_bytes(), self.sync_each_record).map_err(|source| {
            CaptureError::WriteFailure {
                path: self.path.clone(),
                source,
            }
        })?;

        self.records += 1;
        Ok(())
    }

    /// Flush and release the file handle. Calling it again is a no-op.
    pub fn end(&mut self) -> Result<(), CaptureError> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|source| CaptureError::WriteFailure {
                path: self.path.clone(),
                source,
            })?;
            tracing::info!(
                "ended session file {} ({} records)",
                self.path.display(),
                self.records
            );
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> u64 {
        self.records
    }
}

fn write_record(file: &mut File, record: &[u8], sync: bool) -> std::io::Result<()> {
    file.write_all(record)?;
    file.flush()?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}
