//! Compdoc - a reader for OLE2/CFBF "Compound Document" containers
//!
//! This library decodes the container format used by legacy Microsoft Office
//! files (.doc, .xls, .ppt): the sector allocation tables, the directory of
//! storages and streams, and the short-stream subsystem. Its job ends where
//! the record layer begins: it hands the caller the raw bytes of a named
//! stream (e.g. the `Workbook` stream of a .xls file) and nothing more.
//!
//! # Features
//!
//! - **Tolerant decoding**: common real-world corruption (truncated files,
//!   preposterous header geometry, `-1` first sectors on empty mini streams)
//!   is substituted or flagged as a diagnostic rather than rejected
//! - **Zero-copy extraction**: streams stored contiguously are returned as a
//!   view into the original buffer, without copying
//! - **Pure queries**: extraction never mutates the document, so repeated
//!   and concurrent lookups are safe
//!
//! # Example
//!
//! ```no_run
//! use compdoc::CompDoc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = std::fs::read("spreadsheet.xls")?;
//! let doc = CompDoc::new(data)?;
//!
//! // Fully materialized copy of the stream bytes
//! if let Some(workbook) = doc.get_named_stream("Workbook")? {
//!     println!("Workbook stream: {} bytes", workbook.len());
//! }
//!
//! // Zero-copy view when the stream happens to be contiguous
//! if let Some(stream) = doc.locate_named_stream("Workbook")? {
//!     let bytes = stream.as_slice();
//!     println!("first record header: {:02X?}", &bytes[..4]);
//! }
//! # Ok(())
//! # }
//! ```

/// Bounds-checked little-endian integer decoding
pub mod binary;

/// Constants for the compound document format
pub mod consts;

/// Diagnostics collected for tolerated anomalies
pub mod diag;

/// Directory entries and the storage family tree
pub mod dir;

/// Error types
pub mod error;

mod alloc;
mod document;
mod header;

// Re-export public types for convenient access
pub use diag::{Diagnostic, DiagnosticSink, Severity};
pub use dir::{DirNode, EntryType};
pub use document::{is_compound_document, CompDoc, OpenOptions, StreamRef};
pub use error::{CompDocError, Result};
pub use header::Header;
