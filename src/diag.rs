//! Diagnostics for tolerated anomalies.
//!
//! Real-world compound documents are frequently malformed in ways that do
//! not prevent extraction: header geometry fields with absurd values,
//! truncated allocation tables, declared short-sector tables with an empty
//! container. Each tolerated anomaly has a fixed [`Severity`] so the
//! recovery policy is auditable in one place; genuinely fatal conditions
//! are [`crate::CompDocError`] values instead and never appear here.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// What the engine did about a tolerated anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// A safe conventional value was substituted for the bad one
    Substitute,
    /// The anomaly was recorded and decoding continued unchanged
    Flag,
}

/// A tolerated anomaly observed while decoding a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Sector-size exponent above 20; 512-byte sectors assumed
    PreposterousSectorSize { shift: u16 },
    /// Short-sector exponent above the sector exponent; 64 bytes assumed
    PreposterousShortSectorSize { shift: u16 },
    /// File size is not the header plus a whole number of sectors
    PartialTrailingSector { file_size: usize, sector_size: usize },
    /// An MSAT entry referenced a sector past the end of the file
    TruncatedAllocation { sid: i32, total_sectors: usize },
    /// A non-zero short-sector table was declared but the container is empty
    ShortTableWithoutContainer,
    /// A stream chain yielded a different byte count than its entry declared
    SizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
    /// A directory entry carried an unrecognized type byte
    UnknownEntryType { did: usize, raw: u8 },
}

impl Diagnostic {
    /// The recovery policy applied for this anomaly kind.
    pub fn severity(&self) -> Severity {
        match self {
            Diagnostic::PreposterousSectorSize { .. }
            | Diagnostic::PreposterousShortSectorSize { .. }
            | Diagnostic::TruncatedAllocation { .. } => Severity::Substitute,
            Diagnostic::PartialTrailingSector { .. }
            | Diagnostic::ShortTableWithoutContainer
            | Diagnostic::SizeMismatch { .. }
            | Diagnostic::UnknownEntryType { .. } => Severity::Flag,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::PreposterousSectorSize { shift } => {
                write!(
                    f,
                    "sector size (2**{}) is preposterous; assuming 512",
                    shift
                )
            },
            Diagnostic::PreposterousShortSectorSize { shift } => {
                write!(
                    f,
                    "short sector size (2**{}) is preposterous; assuming 64",
                    shift
                )
            },
            Diagnostic::PartialTrailingSector {
                file_size,
                sector_size,
            } => {
                write!(
                    f,
                    "file size ({}) is not 512 + a multiple of the sector size ({})",
                    file_size, sector_size
                )
            },
            Diagnostic::TruncatedAllocation { sid, total_sectors } => {
                write!(
                    f,
                    "file is truncated or the MSAT is corrupt: sector {} referenced but only {} in file",
                    sid, total_sectors
                )
            },
            Diagnostic::ShortTableWithoutContainer => {
                write!(
                    f,
                    "inconsistency: short-stream container is empty but the SSAT sector count is non-zero"
                )
            },
            Diagnostic::SizeMismatch {
                name,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "stream {}: expected size {}, actual size {}",
                    name, expected, actual
                )
            },
            Diagnostic::UnknownEntryType { did, raw } => {
                write!(f, "directory entry {}: unknown entry type {}", did, raw)
            },
        }
    }
}

/// Thread-safe collector of [`Diagnostic`] values.
///
/// The engine only ever appends; it never prints. Callers that care
/// inspect [`DiagnosticSink::snapshot`] after construction or extraction.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    entries: Mutex<Vec<Diagnostic>>,
}

impl DiagnosticSink {
    /// Create an empty sink behind an [`Arc`], ready to share with a document.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn record(&self, diagnostic: Diagnostic) {
        self.entries.lock().push(diagnostic);
    }

    /// All diagnostics recorded so far, oldest first.
    pub fn snapshot(&self) -> Vec<Diagnostic> {
        self.entries.lock().clone()
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutions_and_flags_are_classified() {
        assert_eq!(
            Diagnostic::PreposterousSectorSize { shift: 99 }.severity(),
            Severity::Substitute
        );
        assert_eq!(
            Diagnostic::ShortTableWithoutContainer.severity(),
            Severity::Flag
        );
    }

    #[test]
    fn sink_accumulates_in_order() {
        let sink = DiagnosticSink::default();
        sink.record(Diagnostic::ShortTableWithoutContainer);
        sink.record(Diagnostic::PreposterousSectorSize { shift: 30 });
        let seen = sink.snapshot();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], Diagnostic::ShortTableWithoutContainer);
    }
}
