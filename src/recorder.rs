use crate::config::AppConfig;
use crate::error::CaptureError;
use crate::frame::{self, Frame, FrameReader};
use crate::schema::CaptureTimestamp;
use crate::storage::{SessionFile, SessionId};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Counters for a running capture, shareable with whoever wants to report
/// progress.
#[derive(Clone, Default)]
pub struct RecorderState {
    pub lines_recorded: Arc<AtomicU64>,
    pub timeouts: Arc<AtomicU64>,
    pub blank_lines: Arc<AtomicU64>,
    pub frames_discarded: Arc<AtomicU64>,
}

impl RecorderState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self, session: &SessionFile) -> CaptureSummary {
        CaptureSummary {
            path: session.path().to_path_buf(),
            records_written: session.records(),
            lines_recorded: self.lines_recorded.load(Ordering::Acquire),
            timeouts: self.timeouts.load(Ordering::Acquire),
            blank_lines: self.blank_lines.load(Ordering::Acquire),
            frames_discarded: self.frames_discarded.load(Ordering::Acquire),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CaptureSummary {
    pub path: PathBuf,
    pub records_written: u64,
    pub lines_recorded: u64,
    pub timeouts: u64,
    pub blank_lines: u64,
    pub frames_discarded: u64,
}

/// Read lines until the stream closes, the token is cancelled, or a fatal
/// error occurs. The reader and session are always released before this
/// returns.
pub fn record_session<R: Read>(
    reader: &mut FrameReader<R>,
    session: &mut SessionFile,
    state: &RecorderState,
    shutdown: &CancellationToken,
    mut clock: impl FnMut() -> CaptureTimestamp,
) -> Result<(), CaptureError> {
    let result = capture_loop(reader, session, state, shutdown, &mut clock);
    reader.close();
    let ended = session.end();
    result.and(ended)
}

fn capture_loop<R: Read>(
    reader: &mut FrameReader<R>,
    session: &mut SessionFile,
    state: &RecorderState,
    shutdown: &CancellationToken,
    clock: &mut impl FnMut() -> CaptureTimestamp,
) -> Result<(), CaptureError> {
    while !shutdown.is_cancelled() {
        match reader.read_line() {
            Ok(Frame::Line(line)) if line.is_empty() => {
                state.blank_lines.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Frame::Line(line)) => {
                session.append_line(&line, clock())?;
                let total = state.lines_recorded.fetch_add(1, Ordering::Relaxed) + 1;
                if total % 1000 == 0 {
                    tracing::debug!("recorder: {} lines recorded", total);
                }
            }
            Ok(Frame::Timeout) => {
                state.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Frame::Closed) => {
                tracing::info!("serial stream closed");
                return Ok(());
            }
            Err(e) if e.is_recoverable() => {
                state.frames_discarded.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("{}", e);
            }
            Err(e) => return Err(e),
        }
    }
    tracing::info!("capture cancelled");
    Ok(())
}

/// Open the configured port, start a session file named `name`, and record on
/// a blocking worker until `shutdown` fires or the stream ends.
pub fn start_capture(
    cfg: AppConfig,
    name: String,
    shutdown: CancellationToken,
) -> JoinHandle<Result<CaptureSummary, CaptureError>> {
    tokio::task::spawn_blocking(move || {
        let serial = &cfg.serial;
        let mut reader = frame::open(
            &serial.port,
            serial.baud_rate,
            serial.timeout(),
            serial.max_line_bytes,
        )?;

        let id = SessionId {
            name,
            source: cfg.source_label(),
            created: CaptureTimestamp::now(),
        };
        let session_dir = &cfg.session.output_dir;
        let mut session = match SessionFile::start(session_dir, &id, cfg.session.sync_each_record) {
            Ok(session) => session,
            Err(e) => {
                reader.close();
                return Err(e);
            }
        };

        tracing::info!("recording from {} into {}", serial.port, session.path().display());
        let state = RecorderState::new();
        record_session(&mut reader, &mut session, &state, &shutdown, CaptureTimestamp::now)?;

        let summary = state.summary(&session);
        tracing::info!(
            "session complete: {} records written, {} timeouts, {} blank, {} discarded",
            summary.records_written,
            summary.timeouts,
            summary.blank_lines,
            summary.frames_discarded
        );
        Ok(summary)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::tests::ScriptedPort;
    use std::fs;
    use std::io;
    use std::time::Duration;
    use tempfile::TempDir;

    fn fixed_clock() -> impl FnMut() -> CaptureTimestamp {
        let mut micros = 123_456u32;
        move || {
            let ts = CaptureTimestamp::from_unix(Duration::new(1_714_790_400, micros * 1000));
            micros += 1;
            ts
        }
    }

    fn new_session(dir: &TempDir) -> anyhow::Result<SessionFile> {
        let id = SessionId {
            name: "test".into(),
            source: "ttyUSB0".into(),
            created: CaptureTimestamp::from_unix(Duration::from_secs(1_714_790_399)),
        };
        Ok(SessionFile::start(dir.path(), &id, false)?)
    }

    #[test]
    fn test_records_until_stream_closes() -> anyhow::Result<()> {
        let tmpdir = TempDir::new()?;
        let mut session = new_session(&tmpdir)?;
        let port = ScriptedPort::lines(&[
            "512,700,300,150,200,0.10,0.20,0.30,0.90",
            "",
            "513,701,301,151,201,0.11,0.21,0.31,0.91",
        ]);
        let mut reader = FrameReader::new(port, Duration::from_secs(1), 4096);
        let state = RecorderState::new();

        let shutdown = CancellationToken::new();
        record_session(&mut reader, &mut session, &state, &shutdown, fixed_clock())?;

        assert!(!reader.is_open());
        let summary = state.summary(&session);
        assert_eq!(summary.lines_recorded, 2);
        assert_eq!(summary.records_written, 2);
        assert_eq!(summary.blank_lines, 1);

        let contents = fs::read_to_string(session.path())?;
        let rows: Vec<&str> = contents.lines().collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], "1714790400.123456512,700,300,150,200,0.10,0.20,0.30,0.90");
        assert_eq!(rows[2], "1714790400.123457513,701,301,151,201,0.11,0.21,0.31,0.91");
        // Every recorded row is one token short of the canonical width.
        assert!(rows[1..].iter().all(|r| r.split(',').count() == 9));
        Ok(())
    }

    #[test]
    fn test_cancelled_before_first_read() -> anyhow::Result<()> {
        let tmpdir = TempDir::new()?;
        let mut session = new_session(&tmpdir)?;
        let port = ScriptedPort::lines(&["1,2,3"]);
        let mut reader = FrameReader::new(port, Duration::from_secs(1), 4096);
        let state = RecorderState::new();
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        record_session(&mut reader, &mut session, &state, &shutdown, fixed_clock())?;

        assert!(!reader.is_open());
        assert_eq!(state.lines_recorded.load(Ordering::Acquire), 0);
        assert_eq!(fs::read_to_string(session.path())?.lines().count(), 1);
        Ok(())
    }

    #[test]
    fn test_decode_errors_and_timeouts_do_not_stop_capture() -> anyhow::Result<()> {
        let tmpdir = TempDir::new()?;
        let mut session = new_session(&tmpdir)?;
        let port = ScriptedPort::new(vec![
            Err(io::Error::new(io::ErrorKind::TimedOut, "timed out")),
            Ok(b"\xff\xff\n".to_vec()),
            Ok(b"512,700\n".to_vec()),
        ]);
        let mut reader = FrameReader::new(port, Duration::ZERO, 4096);
        let state = RecorderState::new();

        let shutdown = CancellationToken::new();
        record_session(&mut reader, &mut session, &state, &shutdown, fixed_clock())?;

        let summary = state.summary(&session);
        assert_eq!(summary.timeouts, 1);
        assert_eq!(summary.frames_discarded, 1);
        assert_eq!(summary.lines_recorded, 1);
        Ok(())
    }

    #[test]
    fn test_fatal_read_error_releases_port() -> anyhow::Result<()> {
        let tmpdir = TempDir::new()?;
        let mut session = new_session(&tmpdir)?;
        let port = ScriptedPort::new(vec![
            Ok(b"512,700\n".to_vec()),
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")),
        ]);
        let mut reader = FrameReader::new(port, Duration::from_secs(1), 4096);
        let state = RecorderState::new();

        let shutdown = CancellationToken::new();
        let err = record_session(&mut reader, &mut session, &state, &shutdown, fixed_clock())
            .unwrap_err();

        assert!(matches!(err, CaptureError::Read(_)));
        assert!(!reader.is_open());
        // The record read before the failure is intact.
        let contents = fs::read_to_string(session.path())?;
        assert!(contents.ends_with("1714790400.123456512,700\n"));
        Ok(())
    }

    #[tokio::test]
    async fn test_start_capture_without_port_aborts() -> anyhow::Result<()> {
        let tmpdir = TempDir::new()?;
        let mut cfg = AppConfig::load_default()?;
        cfg.serial.port = "/dev/glove-recorder-no-such-port".into();
        cfg.session.output_dir = tmpdir.path().join("captures");

        let result = start_capture(cfg, "nobody".into(), CancellationToken::new()).await?;

        assert!(matches!(result, Err(CaptureError::PortUnavailable { .. })));
        assert!(!tmpdir.path().join("captures").exists());
        Ok(())
    }
}
