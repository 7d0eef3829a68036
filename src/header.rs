//! The fixed 512-byte file header.
//!
//! The header pins down the sector geometry and the entry points of the
//! three allocation structures. Two of its fields are routinely garbage in
//! the wild (the sector-size exponents); those are substituted with the
//! conventional values rather than rejected.

use crate::binary::{read_i32_le, read_u16_le};
use crate::consts::*;
use crate::diag::{Diagnostic, DiagnosticSink};
use crate::error::{CompDocError, Result};

/// Decoded header geometry.
#[derive(Debug, Clone)]
pub struct Header {
    /// Format revision word
    pub revision: u16,
    /// Format version word
    pub version: u16,
    /// Size of a main sector in bytes
    pub sector_size: usize,
    /// Size of a short sector in bytes
    pub short_sector_size: usize,
    /// Declared number of sectors holding the SAT
    pub sat_sector_count: i32,
    /// First sector of the directory chain
    pub dir_first_sid: i32,
    /// Streams at least this large live in main sectors; smaller ones in
    /// the short-stream container
    pub min_std_stream_size: i32,
    /// First sector of the SSAT chain
    pub ssat_first_sid: i32,
    /// Declared number of sectors holding the SSAT
    pub ssat_sector_count: i32,
    /// First sector of the MSAT extension chain
    pub msat_ext_first_sid: i32,
    /// Declared number of MSAT extension sectors
    pub msat_ext_sector_count: i32,
    /// Bytes of sector data after the header
    pub data_len: usize,
    /// Number of sectors after the header, rounding a partial one up
    pub total_sectors: usize,
}

impl Header {
    /// Decode and validate the header at the start of `mem`.
    pub fn parse(mem: &[u8], sink: &DiagnosticSink) -> Result<Header> {
        if mem.len() < HEADER_SIZE {
            return Err(CompDocError::Format(format!(
                "file is only {} bytes; the header alone is {}",
                mem.len(),
                HEADER_SIZE
            )));
        }
        if &mem[0..8] != SIGNATURE {
            return Err(CompDocError::Format(
                "signature mismatch".to_string(),
            ));
        }
        if mem[28..30] != LE_MARKER {
            return Err(CompDocError::Format(format!(
                "expected little-endian marker, found {:02X?}",
                &mem[28..30]
            )));
        }

        let revision = read_u16_le(mem, 24)?;
        let version = read_u16_le(mem, 26)?;

        let mut sector_shift = read_u16_le(mem, 30)?;
        let mut short_sector_shift = read_u16_le(mem, 32)?;
        if sector_shift > 20 {
            // allows for 2**20 bytes i.e. 1MB
            sink.record(Diagnostic::PreposterousSectorSize {
                shift: sector_shift,
            });
            sector_shift = 9;
        }
        if short_sector_shift > sector_shift {
            sink.record(Diagnostic::PreposterousShortSectorSize {
                shift: short_sector_shift,
            });
            short_sector_shift = 6;
        }
        let sector_size = 1usize << sector_shift;
        let short_sector_size = 1usize << short_sector_shift;

        let sat_sector_count = read_i32_le(mem, 44)?;
        let dir_first_sid = read_i32_le(mem, 48)?;
        // the field at offset 52 is unused
        let min_std_stream_size = read_i32_le(mem, 56)?;
        let ssat_first_sid = read_i32_le(mem, 60)?;
        let ssat_sector_count = read_i32_le(mem, 64)?;
        let msat_ext_first_sid = read_i32_le(mem, 68)?;
        let msat_ext_sector_count = read_i32_le(mem, 72)?;

        let data_len = mem.len() - HEADER_SIZE;
        let mut total_sectors = data_len / sector_size;
        if data_len % sector_size != 0 {
            total_sectors += 1;
            sink.record(Diagnostic::PartialTrailingSector {
                file_size: mem.len(),
                sector_size,
            });
        }

        Ok(Header {
            revision,
            version,
            sector_size,
            short_sector_size,
            sat_sector_count,
            dir_first_sid,
            min_std_stream_size,
            ssat_first_sid,
            ssat_sector_count,
            msat_ext_first_sid,
            msat_ext_sector_count,
            data_len,
            total_sectors,
        })
    }

    /// Byte offset of main sector `sid` within the file image.
    #[inline]
    pub fn sector_offset(&self, sid: usize) -> usize {
        HEADER_SIZE + sid * self.sector_size
    }

    /// Number of sector-id entries held by one sector.
    #[inline]
    pub fn ids_per_sector(&self) -> usize {
        self.sector_size / 4
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_header() -> Vec<u8> {
        let mut h = vec![0u8; HEADER_SIZE];
        h[0..8].copy_from_slice(SIGNATURE);
        h[28..30].copy_from_slice(&LE_MARKER);
        h[30..32].copy_from_slice(&9u16.to_le_bytes());
        h[32..34].copy_from_slice(&6u16.to_le_bytes());
        h
    }

    #[test]
    fn rejects_bad_signature() {
        let sink = DiagnosticSink::default();
        let mut h = blank_header();
        h[0] = 0x00;
        assert!(matches!(
            Header::parse(&h, &sink),
            Err(CompDocError::Format(_))
        ));
    }

    #[test]
    fn rejects_bad_byte_order_marker() {
        let sink = DiagnosticSink::default();
        let mut h = blank_header();
        h[28] = 0xFF;
        h[29] = 0xFE;
        assert!(matches!(
            Header::parse(&h, &sink),
            Err(CompDocError::Format(_))
        ));
    }

    #[test]
    fn substitutes_preposterous_geometry() {
        let sink = DiagnosticSink::default();
        let mut h = blank_header();
        h[30..32].copy_from_slice(&30u16.to_le_bytes());
        h[32..34].copy_from_slice(&25u16.to_le_bytes());
        let header = Header::parse(&h, &sink).unwrap();
        assert_eq!(header.sector_size, 512);
        assert_eq!(header.short_sector_size, 64);
        assert_eq!(sink.snapshot().len(), 2);
    }

    #[test]
    fn rounds_a_partial_trailing_sector_up() {
        let sink = DiagnosticSink::default();
        let mut h = blank_header();
        h.extend_from_slice(&vec![0u8; 512 + 100]);
        let header = Header::parse(&h, &sink).unwrap();
        assert_eq!(header.total_sectors, 2);
        assert!(!sink.is_empty());
    }
}
