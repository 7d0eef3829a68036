//! The three sector allocation structures and sector ownership tracking.
//!
//! The MSAT says which sectors hold the SAT; the SAT chains main sectors
//! together; the SSAT chains short sectors inside the short-stream
//! container. All three are arrays of signed 32-bit sector ids. Ownership
//! tracking is purely a corruption check: no sector may belong to two
//! structures at once.

use crate::binary::read_i32_array;
use crate::consts::*;
use crate::diag::{Diagnostic, DiagnosticSink};
use crate::error::{CompDocError, Result};
use crate::header::Header;
use std::fmt;

/// Which structure claimed a sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Owner {
    MasterTable,
    AllocTable,
    Directory,
    ShortContainer,
    ShortTable,
    /// A user stream, keyed by its directory entry id
    Stream(u32),
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::MasterTable => write!(f, "MSAT"),
            Owner::AllocTable => write!(f, "SAT"),
            Owner::Directory => write!(f, "directory"),
            Owner::ShortContainer => write!(f, "short-stream container"),
            Owner::ShortTable => write!(f, "SSAT"),
            Owner::Stream(did) => write!(f, "stream (DID {})", did),
        }
    }
}

/// One claim slot per sector in the file.
///
/// Built once during construction; extraction calls clone it as scratch so
/// that queries stay pure (see the crate docs on repeated extraction).
#[derive(Debug, Clone)]
pub(crate) struct OwnerMap {
    slots: Vec<Option<Owner>>,
}

impl OwnerMap {
    pub(crate) fn new(total_sectors: usize) -> Self {
        OwnerMap {
            slots: vec![None; total_sectors],
        }
    }

    fn index_of(&self, sid: i32, what: &str) -> Result<usize> {
        let idx = sid as usize;
        if sid < 0 || idx >= self.slots.len() {
            return Err(CompDocError::Corrupt(format!(
                "{}: accessing sector {} but only {} in file",
                what,
                sid,
                self.slots.len()
            )));
        }
        Ok(idx)
    }

    /// Claim `sid` for `owner`, failing on out-of-range ids and on
    /// collisions with a previous claim.
    pub(crate) fn claim(&mut self, sid: i32, owner: Owner, what: &str) -> Result<()> {
        let idx = self.index_of(sid, what)?;
        if let Some(prior) = self.slots[idx] {
            return Err(CompDocError::Corrupt(format!(
                "{} corruption: sector {} already claimed by {}",
                what, sid, prior
            )));
        }
        self.slots[idx] = Some(owner);
        Ok(())
    }

    /// Claim variant for chain walks: in tolerant mode a collision is
    /// overwritten instead of fatal. Out-of-range ids stay fatal.
    pub(crate) fn claim_lenient(
        &mut self,
        sid: i32,
        owner: Owner,
        tolerate: bool,
        what: &str,
    ) -> Result<()> {
        let idx = self.index_of(sid, what)?;
        if let Some(prior) = self.slots[idx]
            && !tolerate
        {
            return Err(CompDocError::Corrupt(format!(
                "{} corruption: sector {} already claimed by {}",
                what, sid, prior
            )));
        }
        self.slots[idx] = Some(owner);
        Ok(())
    }
}

/// Assemble the Master Sector Allocation Table: 109 inline entries plus any
/// extension sectors chained behind the header.
///
/// A missing extension is tolerated when the declared extension count is
/// zero and the head id is 0, end-of-chain, or free; all three occur in the
/// wild. A followed chain also terminates at the MSAT sentinel.
pub(crate) fn build_msat(mem: &[u8], header: &Header, owners: &mut OwnerMap) -> Result<Vec<i32>> {
    let mut msat = read_i32_array(mem, 76, MSAT_INLINE_ENTRIES)?;

    let head = header.msat_ext_first_sid;
    if header.msat_ext_sector_count == 0
        && (head == 0 || head == END_OF_CHAIN_SID || head == FREE_SID)
    {
        return Ok(msat);
    }

    let mut sid = head;
    while sid != END_OF_CHAIN_SID && sid != FREE_SID && sid != MSAT_SID {
        if sid < 0 {
            return Err(CompDocError::Corrupt(format!(
                "MSAT extension: invalid sector id: {}",
                sid
            )));
        }
        owners.claim(sid, Owner::MasterTable, "MSAT extension")?;
        let offset = header.sector_offset(sid as usize);
        let mut entries = read_i32_array(mem, offset, header.ids_per_sector())?;
        // the last slot is the id of the next extension sector
        sid = entries.pop().unwrap_or(END_OF_CHAIN_SID);
        msat.extend(entries);
    }
    Ok(msat)
}

/// Assemble the full Sector Allocation Table from the sectors the MSAT
/// names.
///
/// Free and end-of-chain entries anywhere in the MSAT are trailing padding
/// and skipped. An entry past the end of the file means a truncated
/// document: it is replaced with the internal evil sentinel and flagged
/// once, and assembly continues.
pub(crate) fn build_sat(
    mem: &[u8],
    header: &Header,
    msat: &mut [i32],
    owners: &mut OwnerMap,
    sink: &DiagnosticSink,
) -> Result<Vec<i32>> {
    let mut sat = Vec::new();
    let mut trunc_warned = false;

    for slot in msat.iter_mut() {
        let msid = *slot;
        if msid == FREE_SID || msid == END_OF_CHAIN_SID {
            continue;
        }
        if msid >= header.total_sectors as i32 {
            if !trunc_warned {
                sink.record(Diagnostic::TruncatedAllocation {
                    sid: msid,
                    total_sectors: header.total_sectors,
                });
                trunc_warned = true;
            }
            *slot = EVIL_SID;
            continue;
        }
        if msid < -2 {
            return Err(CompDocError::Corrupt(format!(
                "MSAT: invalid sector id: {}",
                msid
            )));
        }
        owners.claim(msid, Owner::AllocTable, "MSAT")?;
        let offset = header.sector_offset(msid as usize);
        sat.extend(read_i32_array(mem, offset, header.ids_per_sector())?);
    }
    Ok(sat)
}

/// Assemble the Short Sector Allocation Table by walking the main SAT chain
/// declared in the header.
///
/// With an empty short-stream container there is nothing to address: a
/// declared non-zero SSAT is flagged as inconsistent and ignored.
pub(crate) fn build_ssat(
    mem: &[u8],
    header: &Header,
    sat: &[i32],
    sscs_len: usize,
    owners: &mut OwnerMap,
    sink: &DiagnosticSink,
) -> Result<Vec<i32>> {
    if sscs_len == 0 {
        if header.ssat_sector_count > 0 {
            sink.record(Diagnostic::ShortTableWithoutContainer);
        }
        return Ok(Vec::new());
    }

    let mut ssat = Vec::new();
    let mut sid = header.ssat_first_sid;
    let mut remaining = header.ssat_sector_count;
    while sid >= 0 && remaining > 0 {
        owners.claim(sid, Owner::ShortTable, "SSAT")?;
        remaining -= 1;
        let offset = header.sector_offset(sid as usize);
        ssat.extend(read_i32_array(mem, offset, header.ids_per_sector())?);
        sid = *sat.get(sid as usize).ok_or_else(|| {
            CompDocError::Corrupt(format!(
                "SSAT: sector allocation table has no entry for sector {}",
                sid
            ))
        })?;
    }
    if remaining != 0 || sid != END_OF_CHAIN_SID {
        return Err(CompDocError::Corrupt(format!(
            "SSAT chain ended at sid {} with {} declared sectors unread",
            sid, remaining
        )));
    }
    Ok(ssat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_for(total_sectors: usize) -> Header {
        Header {
            revision: 0x3E,
            version: 3,
            sector_size: 512,
            short_sector_size: 64,
            sat_sector_count: 1,
            dir_first_sid: 1,
            min_std_stream_size: 4096,
            ssat_first_sid: END_OF_CHAIN_SID,
            ssat_sector_count: 0,
            msat_ext_first_sid: END_OF_CHAIN_SID,
            msat_ext_sector_count: 0,
            data_len: total_sectors * 512,
            total_sectors,
        }
    }

    #[test]
    fn double_claim_is_corruption() {
        let mut owners = OwnerMap::new(4);
        owners.claim(2, Owner::AllocTable, "SAT").unwrap();
        let err = owners.claim(2, Owner::Directory, "directory").unwrap_err();
        assert!(matches!(err, CompDocError::Corrupt(_)));
    }

    #[test]
    fn out_of_range_claim_is_corruption() {
        let mut owners = OwnerMap::new(4);
        assert!(owners.claim(4, Owner::AllocTable, "SAT").is_err());
        assert!(owners.claim(-7, Owner::AllocTable, "SAT").is_err());
    }

    #[test]
    fn tolerant_claim_overwrites() {
        let mut owners = OwnerMap::new(4);
        owners.claim(1, Owner::Directory, "directory").unwrap();
        assert!(
            owners
                .claim_lenient(1, Owner::Stream(3), false, "stream")
                .is_err()
        );
        owners
            .claim_lenient(1, Owner::Stream(3), true, "stream")
            .unwrap();
    }

    #[test]
    fn truncated_msat_entry_is_substituted_not_fatal() {
        let header = header_for(1);
        let mem = vec![0u8; 512 + 512];
        let mut msat = vec![7i32, FREE_SID];
        let mut owners = OwnerMap::new(header.total_sectors);
        let sink = DiagnosticSink::default();
        let sat = build_sat(&mem, &header, &mut msat, &mut owners, &sink).unwrap();
        assert!(sat.is_empty());
        assert_eq!(msat[0], EVIL_SID);
        assert_eq!(sink.snapshot().len(), 1);
    }

    #[test]
    fn declared_ssat_with_empty_container_is_flagged() {
        let mut header = header_for(1);
        header.ssat_sector_count = 1;
        header.ssat_first_sid = 0;
        let mem = vec![0u8; 1024];
        let mut owners = OwnerMap::new(1);
        let sink = DiagnosticSink::default();
        let ssat = build_ssat(&mem, &header, &[], 0, &mut owners, &sink).unwrap();
        assert!(ssat.is_empty());
        assert_eq!(sink.snapshot(), vec![Diagnostic::ShortTableWithoutContainer]);
    }
}
