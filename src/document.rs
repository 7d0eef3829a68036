//! The compound document engine.
//!
//! Construction is a strict pipeline over an immutable in-memory file
//! image: header, MSAT, SAT, directory, family tree, short-stream
//! container, SSAT. After that the document answers name queries: resolve
//! a slash-separated path to a directory entry and hand back the stream
//! bytes, either fully materialized or as a zero-copy view when the
//! stream happens to be contiguous.
//!
//! Extraction takes `&self` and never mutates the document. The sector
//! ownership map built during construction is cloned as per-call scratch,
//! so repeated and concurrent extraction of the same stream is safe.

use crate::alloc::{self, Owner, OwnerMap};
use crate::binary;
use crate::consts::*;
use crate::diag::{Diagnostic, DiagnosticSink};
use crate::dir::{DirNode, EntryType, build_family_tree};
use crate::error::{CompDocError, Result};
use crate::header::Header;
use bytes::Bytes;
use std::sync::Arc;

/// Check whether `data` starts like a compound document.
pub fn is_compound_document(data: &[u8]) -> bool {
    data.len() >= HEADER_SIZE && &data[0..8] == SIGNATURE
}

/// Options for opening a document.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    /// Tolerate sector-ownership collisions on the directory stream and on
    /// extracted streams instead of failing. Some writers emit documents
    /// whose workbook chain overlaps other structures.
    pub tolerate_stream_corruption: bool,
    /// Sink that receives diagnostics; a private one is created when absent.
    pub sink: Option<Arc<DiagnosticSink>>,
}

/// An extracted stream, preferring a view over a copy.
///
/// When the stream was stored contiguously, `data` is the document's own
/// backing buffer and `offset` points at the stream inside it. When it was
/// fragmented, `data` is a freshly built buffer and `offset` is zero.
#[derive(Debug, Clone)]
pub struct StreamRef {
    /// Backing buffer, shared or rebuilt
    pub data: Bytes,
    /// Start of the stream within `data`
    pub offset: usize,
    /// Stream length in bytes
    pub len: usize,
}

impl StreamRef {
    /// The stream bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.len]
    }

    /// Copy the stream bytes into an owned vector.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

/// A decoded OLE2/CFBF compound document.
#[derive(Debug)]
pub struct CompDoc {
    mem: Bytes,
    header: Header,
    sat: Vec<i32>,
    ssat: Vec<i32>,
    sscs: Bytes,
    dir: Vec<DirNode>,
    /// Sectors claimed by the allocation tables, the directory and the
    /// short-stream container; cloned per extraction call
    owners: OwnerMap,
    tolerant: bool,
    sink: Arc<DiagnosticSink>,
}

impl CompDoc {
    /// Decode a compound document from its complete file image.
    pub fn new(mem: impl Into<Bytes>) -> Result<CompDoc> {
        Self::with_options(mem, OpenOptions::default())
    }

    /// Decode with explicit [`OpenOptions`].
    pub fn with_options(mem: impl Into<Bytes>, options: OpenOptions) -> Result<CompDoc> {
        let mem: Bytes = mem.into();
        let sink = options.sink.unwrap_or_else(DiagnosticSink::shared);
        let tolerant = options.tolerate_stream_corruption;

        let header = Header::parse(&mem, &sink)?;
        let mut owners = OwnerMap::new(header.total_sectors);

        let mut msat = alloc::build_msat(&mem, &header, &mut owners)?;
        let sat = alloc::build_sat(&mem, &header, &mut msat, &mut owners, &sink)?;

        let dir_bytes = read_chain(
            &mem,
            HEADER_SIZE,
            &sat,
            header.sector_size,
            header.dir_first_sid,
            None,
            "directory",
            Some((&mut owners, Owner::Directory, tolerant)),
            &sink,
        )?;
        let mut dir = Vec::with_capacity(dir_bytes.len() / DIRENTRY_SIZE);
        for (did, dent) in dir_bytes.chunks_exact(DIRENTRY_SIZE).enumerate() {
            dir.push(DirNode::parse(did, dent, &sink)?);
        }
        build_family_tree(&mut dir)?;

        // Some writers put -1 instead of end-of-chain in the root entry of
        // a document with no short streams; an empty container is fine.
        let root = &dir[0];
        let sscs: Bytes = if root.first_sid < 0 || root.total_size == 0 {
            Bytes::new()
        } else {
            read_chain(
                &mem,
                HEADER_SIZE,
                &sat,
                header.sector_size,
                root.first_sid,
                Some(root.total_size as usize),
                "short-stream container",
                Some((&mut owners, Owner::ShortContainer, tolerant)),
                &sink,
            )?
            .into()
        };
        let ssat = alloc::build_ssat(&mem, &header, &sat, sscs.len(), &mut owners, &sink)?;

        Ok(CompDoc {
            mem,
            header,
            sat,
            ssat,
            sscs,
            dir,
            owners,
            tolerant,
            sink,
        })
    }

    /// The decoded header geometry.
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The root storage entry.
    pub fn root(&self) -> &DirNode {
        &self.dir[0]
    }

    /// All directory entries in flat array order.
    pub fn entries(&self) -> &[DirNode] {
        &self.dir
    }

    /// Diagnostics recorded so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.sink.snapshot()
    }

    /// True if a storage or stream exists at `qname`.
    pub fn exists(&self, qname: &str) -> bool {
        match self.dir_search(qname) {
            Ok(Some(_)) => true,
            Err(CompDocError::Storage(_)) => true,
            _ => false,
        }
    }

    /// Paths of all streams, as name components, in directory tree order.
    pub fn list_streams(&self) -> Vec<Vec<String>> {
        let mut streams = Vec::new();
        self.collect_streams(0, &mut Vec::new(), &mut streams);
        streams
    }

    fn collect_streams(&self, did: usize, path: &mut Vec<String>, streams: &mut Vec<Vec<String>>) {
        for &child in &self.dir[did].children {
            let node = &self.dir[child];
            match node.entry_type {
                EntryType::UserStream => {
                    let mut full = path.clone();
                    full.push(node.name.clone());
                    streams.push(full);
                },
                EntryType::UserStorage => {
                    path.push(node.name.clone());
                    self.collect_streams(child, path, streams);
                    path.pop();
                },
                _ => {},
            }
        }
    }

    /// Resolve `qname` and return the fully materialized stream bytes, or
    /// `None` if no such stream exists.
    ///
    /// A chain shorter than the declared stream size is flagged on the
    /// diagnostic sink and whatever was collected is returned.
    pub fn get_named_stream(&self, qname: &str) -> Result<Option<Vec<u8>>> {
        let Some(did) = self.dir_search(qname)? else {
            return Ok(None);
        };
        let node = &self.dir[did];
        let expected = node.total_size.max(0) as usize;
        let data = if node.total_size >= self.header.min_std_stream_size {
            let mut scratch = self.owners.clone();
            read_chain(
                &self.mem,
                HEADER_SIZE,
                &self.sat,
                self.header.sector_size,
                node.first_sid,
                Some(expected),
                qname,
                Some((&mut scratch, Owner::Stream(did as u32), self.tolerant)),
                &self.sink,
            )?
        } else {
            self.read_short_chain(node, qname, expected)?
        };
        Ok(Some(data))
    }

    /// Resolve `qname` and return the stream with a zero-copy preference,
    /// or `None` if no such stream exists.
    ///
    /// A contiguously stored stream comes back as a view into the original
    /// buffer; a fragmented one as a rebuilt buffer. Short streams always
    /// copy, since the short-stream container itself is a rebuilt stream.
    pub fn locate_named_stream(&self, qname: &str) -> Result<Option<StreamRef>> {
        let Some(did) = self.dir_search(qname)? else {
            return Ok(None);
        };
        let node = &self.dir[did];
        let expected = node.total_size.max(0) as usize;
        if expected > self.header.data_len {
            return Err(CompDocError::Corrupt(format!(
                "{} stream length ({} bytes) > file data size ({} bytes)",
                qname, expected, self.header.data_len
            )));
        }
        if node.total_size >= self.header.min_std_stream_size {
            self.locate_chain(node, qname, expected).map(Some)
        } else {
            let data = self.read_short_chain(node, qname, expected)?;
            let len = data.len();
            Ok(Some(StreamRef {
                data: data.into(),
                offset: 0,
                len,
            }))
        }
    }

    /// Materialize a short stream out of the short-stream container.
    ///
    /// Short sectors live inside the container, not in the file image, so
    /// no sector claims apply here.
    fn read_short_chain(&self, node: &DirNode, qname: &str, expected: usize) -> Result<Vec<u8>> {
        read_chain(
            &self.sscs,
            0,
            &self.ssat,
            self.header.short_sector_size,
            node.first_sid,
            Some(expected),
            &format!("{} (from SSCS)", qname),
            None,
            &self.sink,
        )
    }

    /// Walk a main-SAT chain recording contiguous runs instead of copying.
    fn locate_chain(&self, node: &DirNode, qname: &str, expected: usize) -> Result<StreamRef> {
        if expected == 0 {
            return Ok(StreamRef {
                data: Bytes::new(),
                offset: 0,
                len: 0,
            });
        }
        if node.first_sid < 0 {
            return Err(CompDocError::Corrupt(format!(
                "{}: first sector id ({}) is negative",
                qname, node.first_sid
            )));
        }

        let sector_size = self.header.sector_size;
        let found_limit = expected.div_ceil(sector_size);
        let mut scratch = self.owners.clone();
        let mut found = 0usize;
        let mut prev: Option<i32> = None;
        let mut runs: Vec<(usize, usize)> = Vec::new();
        let mut run_start = 0usize;
        let mut run_end = 0usize;
        let mut s = node.first_sid;

        while s >= 0 {
            scratch.claim_lenient(s, Owner::Stream(node.did as u32), self.tolerant, qname)?;
            found += 1;
            if found > found_limit {
                // catches cyclic and runaway chains
                return Err(CompDocError::Corrupt(format!(
                    "{}: size exceeds expected {} bytes; corrupt?",
                    qname,
                    found_limit * sector_size
                )));
            }
            let pos = self.header.sector_offset(s as usize);
            if pos + sector_size > self.mem.len() {
                return Err(CompDocError::Corrupt(format!(
                    "{}: sector {} extends past end of data",
                    qname, s
                )));
            }
            match prev {
                Some(p) if s == p + 1 => run_end += sector_size,
                _ => {
                    if prev.is_some() {
                        runs.push((run_start, run_end));
                    }
                    run_start = pos;
                    run_end = pos + sector_size;
                },
            }
            prev = Some(s);
            let cur = s;
            s = *self.sat.get(cur as usize).ok_or_else(|| {
                CompDocError::Corrupt(format!(
                    "{}: sector allocation table has no entry for sector {}",
                    qname, cur
                ))
            })?;
        }
        if s != END_OF_CHAIN_SID {
            return Err(CompDocError::Corrupt(format!(
                "{}: chain ended at {} instead of end-of-chain",
                qname, s
            )));
        }
        if found < found_limit {
            self.sink.record(Diagnostic::SizeMismatch {
                name: qname.to_string(),
                expected,
                actual: found * sector_size,
            });
        }
        let len = expected.min(found * sector_size);

        if runs.is_empty() {
            // the stream is contiguous, just what we like
            return Ok(StreamRef {
                data: self.mem.clone(),
                offset: run_start,
                len,
            });
        }
        runs.push((run_start, run_end));
        let mut data = Vec::with_capacity(len);
        for (a, b) in runs {
            data.extend_from_slice(&self.mem[a..b]);
        }
        data.truncate(len);
        Ok(StreamRef {
            data: data.into(),
            offset: 0,
            len,
        })
    }

    /// Resolve a slash-separated path to a stream's directory entry id.
    ///
    /// Siblings are matched case-insensitively, first match wins (children
    /// are in tree order, not sorted). An unknown name, or a name bound to
    /// an entry with no stream content, is `Ok(None)`; a path shape
    /// mismatch is an error.
    fn dir_search(&self, qname: &str) -> Result<Option<usize>> {
        let mut storage = 0usize;
        let mut segments = qname.split('/').peekable();
        while let Some(segment) = segments.next() {
            let wanted = segment.to_lowercase();
            let Some(child) = self.dir[storage]
                .children
                .iter()
                .copied()
                .find(|&c| self.dir[c].name.to_lowercase() == wanted)
            else {
                return Ok(None);
            };
            match self.dir[child].entry_type {
                EntryType::UserStream => {
                    if segments.peek().is_some() {
                        return Err(CompDocError::NotStorage(segment.to_string()));
                    }
                    return Ok(Some(child));
                },
                EntryType::UserStorage => {
                    if segments.peek().is_none() {
                        return Err(CompDocError::Storage(segment.to_string()));
                    }
                    storage = child;
                },
                // LockBytes/Property entries are addressable by name but
                // carry nothing extractable
                _ => {
                    if segments.peek().is_some() {
                        return Err(CompDocError::NotStorage(segment.to_string()));
                    }
                    return Ok(None);
                },
            }
        }
        Ok(None)
    }
}

/// Walk a sector chain and concatenate its bytes.
///
/// With a known expected size each sector contributes at most the bytes
/// still owed, and the number of visited sectors is bounded so that a
/// cyclic chain cannot loop forever. With no expected size (the directory
/// stream) whole sectors are appended until end-of-chain; there the visit
/// count is bounded by the allocation table itself, since a valid chain
/// cannot visit more sectors than the table has entries.
#[allow(clippy::too_many_arguments)]
fn read_chain(
    mem: &[u8],
    base: usize,
    sat: &[i32],
    sector_size: usize,
    start_sid: i32,
    expected: Option<usize>,
    name: &str,
    mut claims: Option<(&mut OwnerMap, Owner, bool)>,
    sink: &DiagnosticSink,
) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(expected.unwrap_or(0));
    let mut todo = expected;
    let found_limit = match expected {
        Some(e) => e.div_ceil(sector_size).max(1),
        None => sat.len().max(1),
    };
    let mut found = 0usize;
    let mut s = start_sid;

    while s >= 0 {
        if let Some((owners, owner, tolerate)) = claims.as_mut() {
            owners.claim_lenient(s, *owner, *tolerate, name)?;
        }
        found += 1;
        if found > found_limit {
            return Err(CompDocError::Corrupt(match expected {
                Some(_) => format!(
                    "{}: size exceeds expected {} bytes; corrupt?",
                    name,
                    found_limit * sector_size
                ),
                None => format!(
                    "{}: chain visits more sectors than the {} in the allocation table",
                    name, found_limit
                ),
            }));
        }
        let start = base + s as usize * sector_size;
        let grab = match todo {
            Some(t) => sector_size.min(t),
            None => sector_size,
        };
        let chunk = binary::slice(mem, start, grab).map_err(|_| {
            CompDocError::Corrupt(format!(
                "{}: sector {} extends past end of data",
                name, s
            ))
        })?;
        out.extend_from_slice(chunk);
        if let Some(t) = todo.as_mut() {
            *t -= grab;
        }
        s = *sat.get(s as usize).ok_or_else(|| {
            CompDocError::Corrupt(format!(
                "{}: sector allocation table has no entry for sector {}",
                name, s
            ))
        })?;
    }
    if s != END_OF_CHAIN_SID {
        return Err(CompDocError::Corrupt(format!(
            "{}: chain ended at {} instead of end-of-chain",
            name, s
        )));
    }
    if let (Some(exp), Some(t)) = (expected, todo)
        && t != 0
    {
        sink.record(Diagnostic::SizeMismatch {
            name: name.to_string(),
            expected: exp,
            actual: exp - t,
        });
    }
    Ok(out)
}
