use std::io;
use std::path::PathBuf;
use std::string::FromUtf8Error;

/// Failures raised while capturing from the glove.
///
/// Read timeouts and end-of-stream are not errors; they are reported as
/// [`Frame`](crate::frame::Frame) outcomes.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("serial port {port} unavailable: {source}")]
    PortUnavailable {
        port: String,
        #[source]
        source: serialport::Error,
    },

    #[error("discarded {len} byte frame that is not valid UTF-8")]
    Decode {
        len: usize,
        #[source]
        source: FromUtf8Error,
    },

    #[error("discarded {len} bytes received without a line terminator")]
    Overflow { len: usize },

    #[error("serial read failed: {0}")]
    Read(#[source] io::Error),

    #[error("failed to write session file {}: {source}", path.display())]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CaptureError {
    /// Whether the capture loop may keep reading after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::Decode { .. } | CaptureError::Overflow { .. })
    }
}
