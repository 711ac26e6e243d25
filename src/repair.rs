//! Offline repair of recorded session files.
//!
//! The recorder writes the capture timestamp straight against the device
//! line, so the first column on disk is the timestamp glued to the thumb
//! reading. Repair splits that token back apart by assuming the thumb field
//! is always [`DEVICE_FIELD_WIDTH`] characters long. Nothing checks that
//! assumption: a thumb reading of a different width still yields ten fields,
//! just with the wrong values in the first two.
//!
//! A repaired file already has ten columns. Running the engine over its own
//! output splits the real timestamp and the rows stop validating, so each
//! session file must be repaired at most once.

use crate::validator::{ColumnValidator, Verdict};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Rendered width, in characters, of the device's first field.
pub const DEVICE_FIELD_WIDTH: usize = 3;

/// How to split the merged first token of a recorded row into
/// `(timestamp, first device field)`.
pub trait SplitPolicy {
    fn split<'a>(&self, merged: &'a str) -> (&'a str, &'a str);
}

/// Take the last `width` characters as the device field and everything
/// before them as the timestamp. Tokens no longer than `width` become
/// `("", token)`. A width of zero leaves the whole token as the timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWidthSplit {
    width: usize,
}

impl FixedWidthSplit {
    pub fn new(width: usize) -> Self {
        FixedWidthSplit { width }
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

impl Default for FixedWidthSplit {
    fn default() -> Self {
        FixedWidthSplit::new(DEVICE_FIELD_WIDTH)
    }
}

impl SplitPolicy for FixedWidthSplit {
    fn split<'a>(&self, merged: &'a str) -> (&'a str, &'a str) {
        let chars = merged.chars().count();
        if chars <= self.width {
            return ("", merged);
        }
        // Split on a char boundary, not a byte offset.
        let at = merged
            .char_indices()
            .nth(chars - self.width)
            .map(|(i, _)| i)
            .unwrap_or(merged.len());
        merged.split_at(at)
    }
}

/// Per-file row accounting. Rejected rows never reach the output; the
/// counts are only reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairReport {
    pub rows_read: u64,
    pub rows_accepted: u64,
    pub rows_rejected: u64,
}

impl RepairReport {
    pub fn merge(&mut self, other: &RepairReport) {
        self.rows_read += other.rows_read;
        self.rows_accepted += other.rows_accepted;
        self.rows_rejected += other.rows_rejected;
    }
}

pub struct RepairEngine<P = FixedWidthSplit> {
    policy: P,
    validator: ColumnValidator,
}

impl RepairEngine<FixedWidthSplit> {
    /// Engine splitting at [`DEVICE_FIELD_WIDTH`] characters.
    pub fn standard() -> Self {
        RepairEngine::new(FixedWidthSplit::default())
    }
}

impl<P: SplitPolicy> RepairEngine<P> {
    pub fn new(policy: P) -> Self {
        RepairEngine {
            policy,
            validator: ColumnValidator::default(),
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Split a recorded row on commas and re-split its merged first token.
    /// Returns an empty row for input with no tokens.
    pub fn rebuild_row<'a>(&self, row: &'a str) -> Vec<&'a str> {
        let mut tokens = row.split(',');
        let Some(merged) = tokens.next() else {
            return Vec::new();
        };
        let (timestamp, first_field) = self.policy.split(merged);

        let mut rebuilt = Vec::with_capacity(self.validator.width());
        rebuilt.push(timestamp);
        rebuilt.push(first_field);
        rebuilt.extend(tokens);
        rebuilt
    }

    pub fn repair_row<'a>(&self, row: &'a str) -> Verdict<'a> {
        self.validator.validate(self.rebuild_row(row))
    }

    /// Repair the full text of a session file. The first line is copied
    /// unchanged as the header; every other line is repaired on its own.
    pub fn repair_text(&self, input: &str) -> (String, RepairReport) {
        let mut out = String::with_capacity(input.len() + input.len() / 16);
        let mut report = RepairReport::default();
        let mut lines = input.lines();

        if let Some(header) = lines.next() {
            out.push_str(header);
            out.push('\n');
        }

        for (idx, line) in lines.enumerate() {
            report.rows_read += 1;
            match self.repair_row(line) {
                Verdict::Accept(record) => {
                    out.push_str(&record.to_string());
                    out.push('\n');
                    report.rows_accepted += 1;
                }
                Verdict::Reject { found } => {
                    tracing::trace!("dropping data row {}: {} fields after repair", idx + 1, found);
                    report.rows_rejected += 1;
                }
            }
        }

        (out, report)
    }

    /// Repair `input` into a fresh file at `output`, replacing anything
    /// already there.
    pub async fn repair_file(&self, input: &Path, output: &Path) -> Result<RepairReport> {
        let text = tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("reading session file {}", input.display()))?;

        let (cleaned, report) = self.repair_text(&text);

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        tokio::fs::write(output, cleaned)
            .await
            .with_context(|| format!("writing cleaned file {}", output.display()))?;

        tracing::info!(
            "repaired {} -> {}: {} of {} rows kept",
            input.display(),
            output.display(),
            report.rows_accepted,
            report.rows_read
        );
        Ok(report)
    }
}
