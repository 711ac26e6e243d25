use crate::schema::{TelemetryRecord, CANONICAL_WIDTH};

/// Result of checking a rebuilt row against the canonical width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict<'a> {
    Accept(TelemetryRecord<'a>),
    /// Dropped from the output. The cause is not distinguished.
    Reject { found: usize },
}

/// Keeps a row only when it has exactly the expected number of fields.
#[derive(Debug, Clone, Copy)]
pub struct ColumnValidator {
    width: usize,
}

impl Default for ColumnValidator {
    fn default() -> Self {
        ColumnValidator::new(CANONICAL_WIDTH)
    }
}

impl ColumnValidator {
    pub fn new(width: usize) -> Self {
        ColumnValidator { width }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn validate<'a>(&self, row: Vec<&'a str>) -> Verdict<'a> {
        if row.len() == self.width {
            Verdict::Accept(TelemetryRecord::from_validated(row))
        } else {
            Verdict::Reject { found: row.len() }
        }
    }
}
