use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Canonical column order of a cleaned telemetry row. The first column is the
/// capture time added by the recorder, the rest come from the glove: five
/// flexion channels followed by the orientation quaternion.
pub const CANONICAL_FIELDS: [&str; 10] = [
    "timestamp",
    "thumb",
    "index",
    "middle",
    "ring",
    "pinky",
    "quaternionX",
    "quaternionY",
    "quaternionZ",
    "quaternionW",
];

pub const CANONICAL_WIDTH: usize = CANONICAL_FIELDS.len();

/// Header row written at the top of every session file, without terminator.
pub fn header_line() -> String {
    CANONICAL_FIELDS.join(",")
}

/// Wall-clock capture time, rendered as epoch seconds with a microsecond
/// fraction (`1714790400.123456`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct CaptureTimestamp(Duration);

impl CaptureTimestamp {
    pub fn now() -> Self {
        CaptureTimestamp(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
        )
    }

    pub fn from_unix(since_epoch: Duration) -> Self {
        CaptureTimestamp(since_epoch)
    }
}

impl fmt::Display for CaptureTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.0.as_secs(), self.0.subsec_micros())
    }
}

/// A repaired row that passed column validation. Only the validator builds
/// these, so the field count always equals the width it was validated
/// against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord<'a> {
    fields: Vec<&'a str>,
}

impl<'a> TelemetryRecord<'a> {
    pub(crate) fn from_validated(fields: Vec<&'a str>) -> Self {
        TelemetryRecord { fields }
    }

    pub fn fields(&self) -> &[&'a str] {
        &self.fields
    }
}

impl fmt::Display for TelemetryRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fields.join(","))
    }
}
