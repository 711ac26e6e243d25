//! Line framing over a serial byte stream.
//!
//! The glove prints one sample per line. [`FrameReader`] buffers whatever the
//! port hands back and splits it on `\n`, giving up on a single call once the
//! configured timeout has elapsed without a complete line. Bytes that arrive
//! before a timeout stay buffered for the next call.

use std::io::{self, Read};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::{debug, trace};

use crate::error::CaptureError;

const READ_CHUNK: usize = 1024;

/// Outcome of a single [`FrameReader::read_line`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A complete line with its terminator and trailing whitespace removed.
    Line(String),
    /// No terminator arrived within the timeout. Try again.
    Timeout,
    /// The stream ended or the reader was closed.
    Closed,
}

pub struct FrameReader<R> {
    source: Option<R>,
    pending: Vec<u8>,
    timeout: Duration,
    max_line_bytes: usize,
}

/// Open a serial port for line reading. No retry is attempted: the device is
/// expected to be plugged in already.
pub fn open(
    port: &str,
    baud_rate: u32,
    timeout: Duration,
    max_line_bytes: usize,
) -> Result<FrameReader<Box<dyn SerialPort>>, CaptureError> {
    let serial = serialport::new(port, baud_rate)
        .timeout(timeout)
        .open()
        .map_err(|source| CaptureError::PortUnavailable {
            port: port.to_string(),
            source,
        })?;
    debug!("opened serial port {} at {} baud", port, baud_rate);
    Ok(FrameReader::new(serial, timeout, max_line_bytes))
}

impl<R: Read> FrameReader<R> {
    pub fn new(source: R, timeout: Duration, max_line_bytes: usize) -> Self {
        FrameReader {
            source: Some(source),
            pending: Vec::new(),
            timeout,
            max_line_bytes,
        }
    }

    /// Block until a full line is available, the timeout elapses, or the
    /// stream ends.
    ///
    /// A line that is not valid UTF-8 is dropped and reported as
    /// [`CaptureError::Decode`]; the reader remains usable afterwards.
    pub fn read_line(&mut self) -> Result<Frame, CaptureError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(line) = self.take_line()? {
                return Ok(Frame::Line(line));
            }
            if !self.fill()? {
                return Ok(Frame::Closed);
            }
            if Instant::now() >= deadline && !self.has_terminator() {
                trace!("no line within {:?} ({} bytes pending)", self.timeout, self.pending.len());
                return Ok(Frame::Timeout);
            }
        }
    }

    /// Release the underlying connection. Safe to call more than once.
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            debug!("serial connection closed ({} bytes discarded)", self.pending.len());
        }
        self.pending.clear();
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    /// Read one chunk from the source. Returns `false` on end of stream.
    fn fill(&mut self) -> Result<bool, CaptureError> {
        let Some(source) = self.source.as_mut() else {
            return Ok(false);
        };

        let mut chunk = [0u8; READ_CHUNK];
        match source.read(&mut chunk) {
            Ok(0) => Ok(false),
            Ok(n) => {
                self.pending.extend_from_slice(&chunk[..n]);
                if !self.has_terminator() && self.pending.len() > self.max_line_bytes {
                    let len = self.pending.len();
                    self.pending.clear();
                    return Err(CaptureError::Overflow { len });
                }
                Ok(true)
            }
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(true)
            }
            Err(e) => Err(CaptureError::Read(e)),
        }
    }

    fn has_terminator(&self) -> bool {
        self.pending.contains(&b'\n')
    }

    fn take_line(&mut self) -> Result<Option<String>, CaptureError> {
        let Some(end) = self.pending.iter().position(|&b| b == b'\n') else {
            return Ok(None);
        };

        let mut raw: Vec<u8> = self.pending.drain(..=end).collect();
        raw.pop();
        let len = raw.len();
        let text = String::from_utf8(raw).map_err(|source| CaptureError::Decode { len, source })?;
        Ok(Some(text.trim_end().to_string()))
    }
}
