//! Constants for the OLE2/CFBF compound document format

/// Magic bytes that open every compound document file
pub const SIGNATURE: &[u8; 8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

/// Little-endian byte-order marker expected at offset 28
pub const LE_MARKER: [u8; 2] = [0xFE, 0xFF];

/// Size of the fixed file header in bytes
pub const HEADER_SIZE: usize = 512;

/// Size of a directory entry in bytes
pub const DIRENTRY_SIZE: usize = 128;

/// Number of MSAT entries stored inline in the header
pub const MSAT_INLINE_ENTRIES: usize = 109;

/// Minimal size of an empty compound document with 512-byte sectors
pub const MINIMAL_FILE_SIZE: usize = 1536;

// Sector ids are signed; negative values are sentinels.

/// End of a sector chain
pub const END_OF_CHAIN_SID: i32 = -2;
/// Unallocated sector
pub const FREE_SID: i32 = -1;
/// Sector holds part of the SAT itself
pub const SAT_SID: i32 = -3;
/// Sector holds part of the MSAT extension
pub const MSAT_SID: i32 = -4;
/// Engine-internal marker for an out-of-range MSAT entry in a truncated file
pub const EVIL_SID: i32 = -5;

/// Directory entry id meaning "no entry"
pub const NO_DID: i32 = -1;
