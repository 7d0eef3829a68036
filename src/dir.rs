//! Directory entries and the storage family tree.
//!
//! The directory stream is a flat array of 128-byte entries. Each entry
//! carries raw left/right/root indices forming one binary tree per storage;
//! the flat array plus those indices is all the file gives us. The family
//! tree builder turns that into parent links and ordered children lists,
//! treating every index as untrusted until bounds-checked.

use crate::consts::DIRENTRY_SIZE;
use crate::diag::{Diagnostic, DiagnosticSink};
use crate::error::{CompDocError, Result};
use fixedbitset::FixedBitSet;
use smallvec::SmallVec;
use zerocopy::{FromBytes, I32, LE, U16, U32, U64};
use zerocopy_derive::FromBytes as DeriveFromBytes;

/// Raw on-disk directory entry (128 bytes).
#[derive(Debug, Clone, DeriveFromBytes)]
#[repr(C)]
struct RawDirEntry {
    /// Entry name in UTF-16LE (64 bytes, null-padded)
    name: [u8; 64],
    /// Length of name in bytes, including the trailing terminator
    name_len: U16<LE>,
    /// Entry type byte
    entry_type: u8,
    /// Node color (0 = red, 1 = black)
    color: u8,
    /// Left sibling DID
    left_did: I32<LE>,
    /// Right sibling DID
    right_did: I32<LE>,
    /// Root DID of this storage's own tree
    root_did: I32<LE>,
    /// CLSID (16 bytes)
    clsid: [u8; 16],
    /// State bits
    state_bits: U32<LE>,
    /// Creation time (FILETIME)
    created: U64<LE>,
    /// Modified time (FILETIME)
    modified: U64<LE>,
    /// First sector of the entry's stream
    first_sid: I32<LE>,
    /// Stream size in bytes (low dword; the high dword is ignored)
    total_size: I32<LE>,
    _reserved: [u8; 4],
}

/// The kind of object a directory entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Unused entry
    Empty,
    /// A folder-like container of other entries
    UserStorage,
    /// Raw byte content
    UserStream,
    /// An ILockBytes object
    LockBytes,
    /// An IPropertyStorage object
    Property,
    /// The root storage (always entry 0)
    RootStorage,
}

impl EntryType {
    fn from_raw(raw: u8) -> Option<EntryType> {
        match raw {
            0 => Some(EntryType::Empty),
            1 => Some(EntryType::UserStorage),
            2 => Some(EntryType::UserStream),
            3 => Some(EntryType::LockBytes),
            4 => Some(EntryType::Property),
            5 => Some(EntryType::RootStorage),
            _ => None,
        }
    }
}

/// A decoded directory entry plus the tree links computed post hoc.
#[derive(Debug, Clone)]
pub struct DirNode {
    /// Position in the flattened directory array
    pub did: usize,
    /// Entry name, decoded from UTF-16LE with the terminator stripped
    pub name: String,
    /// What this entry is
    pub entry_type: EntryType,
    /// CLSID, formatted, or empty when all zero
    pub clsid: String,
    /// Raw left sibling index, negative when absent
    pub left_did: i32,
    /// Raw right sibling index, negative when absent
    pub right_did: i32,
    /// Raw index of this storage's own subtree root, negative when absent
    pub root_did: i32,
    /// First sector of the entry's stream
    pub first_sid: i32,
    /// Declared stream size in bytes
    pub total_size: i32,
    /// Creation FILETIME
    pub created: u64,
    /// Modification FILETIME
    pub modified: u64,
    /// Containing storage, filled in by the family tree builder
    pub parent: Option<usize>,
    /// Entries inside this storage, in binary-tree in-order (not sorted)
    pub children: SmallVec<[usize; 8]>,
}

impl DirNode {
    /// Decode one 128-byte directory entry.
    pub(crate) fn parse(did: usize, dent: &[u8], sink: &DiagnosticSink) -> Result<DirNode> {
        let raw = RawDirEntry::read_from_bytes(dent).map_err(|_| {
            CompDocError::Corrupt(format!("directory entry {} is not {} bytes", did, DIRENTRY_SIZE))
        })?;

        let name_len = raw.name_len.get() as usize;
        let name = if name_len == 0 {
            String::new()
        } else {
            // omit the trailing U+0000
            let end = name_len.saturating_sub(2).min(64);
            let (decoded, _) =
                encoding_rs::UTF_16LE.decode_without_bom_handling(&raw.name[..end]);
            decoded.trim_end_matches('\0').to_string()
        };

        let entry_type = match EntryType::from_raw(raw.entry_type) {
            Some(t) => t,
            None => {
                sink.record(Diagnostic::UnknownEntryType {
                    did,
                    raw: raw.entry_type,
                });
                EntryType::Empty
            },
        };

        Ok(DirNode {
            did,
            name,
            entry_type,
            clsid: format_clsid(&raw.clsid),
            left_did: raw.left_did.get(),
            right_did: raw.right_did.get(),
            root_did: raw.root_did.get(),
            first_sid: raw.first_sid.get(),
            total_size: raw.total_size.get(),
            created: raw.created.get(),
            modified: raw.modified.get(),
            parent: None,
            children: SmallVec::new(),
        })
    }

    /// True for storages, including the root.
    pub fn is_storage(&self) -> bool {
        matches!(
            self.entry_type,
            EntryType::UserStorage | EntryType::RootStorage
        )
    }

    /// True for user streams.
    pub fn is_stream(&self) -> bool {
        self.entry_type == EntryType::UserStream
    }
}

/// Reconstruct parent links and ordered children lists from the raw
/// left/right/root indices.
///
/// The walk runs on an explicit work stack with a visited set, since the
/// links are attacker-controlled and may be arbitrarily deep or cyclic. Children end up in binary-tree
/// in-order: left subtree, node, right subtree, then the node's own
/// storage contents under that node.
pub(crate) fn build_family_tree(nodes: &mut [DirNode]) -> Result<()> {
    let root = nodes.first().ok_or_else(|| {
        CompDocError::Corrupt("directory has no entries".to_string())
    })?;
    if root.entry_type != EntryType::RootStorage {
        return Err(CompDocError::Corrupt(format!(
            "directory entry 0 has type {:?}, expected the root storage",
            root.entry_type
        )));
    }

    enum Step {
        Enter { parent: usize, did: i32 },
        Attach { parent: usize, did: usize },
    }

    let mut visited = FixedBitSet::with_capacity(nodes.len());
    let mut stack = vec![Step::Enter {
        parent: 0,
        did: root.root_did,
    }];

    while let Some(step) = stack.pop() {
        match step {
            Step::Enter { parent, did } => {
                if did < 0 {
                    continue;
                }
                let idx = did as usize;
                if idx >= nodes.len() {
                    return Err(CompDocError::Corrupt(format!(
                        "directory entry {} links to entry {} but only {} exist",
                        parent,
                        did,
                        nodes.len()
                    )));
                }
                if visited.contains(idx) {
                    return Err(CompDocError::Corrupt(format!(
                        "directory tree cycles through entry {}",
                        idx
                    )));
                }
                visited.insert(idx);
                let node = &nodes[idx];
                // Popped in reverse push order: left subtree, attach the
                // node itself, right subtree, then descend into a storage.
                if node.entry_type == EntryType::UserStorage {
                    stack.push(Step::Enter {
                        parent: idx,
                        did: node.root_did,
                    });
                }
                stack.push(Step::Enter {
                    parent,
                    did: node.right_did,
                });
                stack.push(Step::Attach { parent, did: idx });
                stack.push(Step::Enter {
                    parent,
                    did: node.left_did,
                });
            },
            Step::Attach { parent, did } => {
                nodes[parent].children.push(did);
                nodes[did].parent = Some(parent);
            },
        }
    }
    Ok(())
}

/// Format a CLSID as `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`, or return an
/// empty string for the null CLSID.
fn format_clsid(bytes: &[u8; 16]) -> String {
    if bytes.iter().all(|&b| b == 0) {
        return String::new();
    }
    format!(
        "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
        crate::binary::read_u32_le(bytes, 0).unwrap_or(0),
        crate::binary::read_u16_le(bytes, 4).unwrap_or(0),
        crate::binary::read_u16_le(bytes, 6).unwrap_or(0),
        bytes[8],
        bytes[9],
        bytes[10],
        bytes[11],
        bytes[12],
        bytes[13],
        bytes[14],
        bytes[15],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_entry(
        name: &str,
        entry_type: u8,
        left: i32,
        right: i32,
        root: i32,
        first_sid: i32,
        size: i32,
    ) -> [u8; 128] {
        let mut e = [0u8; 128];
        let utf16: Vec<u16> = name.encode_utf16().collect();
        for (i, cu) in utf16.iter().enumerate() {
            e[i * 2..i * 2 + 2].copy_from_slice(&cu.to_le_bytes());
        }
        let name_len = (utf16.len() as u16 + 1) * 2;
        e[64..66].copy_from_slice(&name_len.to_le_bytes());
        e[66] = entry_type;
        e[68..72].copy_from_slice(&left.to_le_bytes());
        e[72..76].copy_from_slice(&right.to_le_bytes());
        e[76..80].copy_from_slice(&root.to_le_bytes());
        e[116..120].copy_from_slice(&first_sid.to_le_bytes());
        e[120..124].copy_from_slice(&size.to_le_bytes());
        e
    }

    fn parse(did: usize, raw: &[u8; 128]) -> DirNode {
        DirNode::parse(did, raw, &DiagnosticSink::default()).unwrap()
    }

    #[test]
    fn decodes_name_and_links() {
        let raw = raw_entry("Workbook", 2, -1, 3, -1, 7, 9000);
        let node = parse(1, &raw);
        assert_eq!(node.name, "Workbook");
        assert_eq!(node.entry_type, EntryType::UserStream);
        assert_eq!(node.left_did, -1);
        assert_eq!(node.right_did, 3);
        assert_eq!(node.first_sid, 7);
        assert_eq!(node.total_size, 9000);
        assert!(node.clsid.is_empty());
    }

    #[test]
    fn zero_length_name_is_empty() {
        let raw = raw_entry("", 0, -1, -1, -1, -2, 0);
        let node = parse(3, &raw);
        assert_eq!(node.name, "");
        assert_eq!(node.entry_type, EntryType::Empty);
    }

    #[test]
    fn unknown_entry_type_is_flagged_and_treated_empty() {
        let mut raw = raw_entry("X", 9, -1, -1, -1, -2, 0);
        raw[66] = 9;
        let sink = DiagnosticSink::default();
        let node = DirNode::parse(0, &raw, &sink).unwrap();
        assert_eq!(node.entry_type, EntryType::Empty);
        assert!(!sink.is_empty());
    }

    #[test]
    fn family_tree_is_in_order() {
        // Root's tree: 2 is the subtree root, 1 to its left, 3 to its right.
        let mut nodes = vec![
            parse(0, &raw_entry("Root Entry", 5, -1, -1, 2, -2, 0)),
            parse(1, &raw_entry("A", 2, -1, -1, -1, -2, 0)),
            parse(2, &raw_entry("B", 2, 1, 3, -1, -2, 0)),
            parse(3, &raw_entry("C", 2, -1, -1, -1, -2, 0)),
        ];
        build_family_tree(&mut nodes).unwrap();
        assert_eq!(nodes[0].children.as_slice(), &[1, 2, 3]);
        assert_eq!(nodes[1].parent, Some(0));
        assert_eq!(nodes[3].parent, Some(0));
    }

    #[test]
    fn storage_contents_attach_under_the_storage() {
        let mut nodes = vec![
            parse(0, &raw_entry("Root Entry", 5, -1, -1, 1, -2, 0)),
            parse(1, &raw_entry("Stor", 1, -1, -1, 2, -2, 0)),
            parse(2, &raw_entry("Inner", 2, -1, -1, -1, -2, 0)),
        ];
        build_family_tree(&mut nodes).unwrap();
        assert_eq!(nodes[0].children.as_slice(), &[1]);
        assert_eq!(nodes[1].children.as_slice(), &[2]);
        assert_eq!(nodes[2].parent, Some(1));
    }

    #[test]
    fn cyclic_links_are_corruption() {
        let mut nodes = vec![
            parse(0, &raw_entry("Root Entry", 5, -1, -1, 1, -2, 0)),
            parse(1, &raw_entry("A", 2, 2, -1, -1, -2, 0)),
            parse(2, &raw_entry("B", 2, 1, -1, -1, -2, 0)),
        ];
        let err = build_family_tree(&mut nodes).unwrap_err();
        assert!(matches!(err, CompDocError::Corrupt(_)));
    }

    #[test]
    fn out_of_range_link_is_corruption() {
        let mut nodes = vec![parse(0, &raw_entry("Root Entry", 5, -1, -1, 40, -2, 0))];
        assert!(build_family_tree(&mut nodes).is_err());
    }

    #[test]
    fn entry_zero_must_be_the_root_storage() {
        let mut nodes = vec![parse(0, &raw_entry("NotRoot", 2, -1, -1, -1, -2, 0))];
        assert!(build_family_tree(&mut nodes).is_err());
    }

    #[test]
    fn clsid_formats_when_non_zero() {
        let mut raw = raw_entry("R", 5, -1, -1, -1, -2, 0);
        raw[80..96].copy_from_slice(&[
            0x00, 0x09, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x46,
        ]);
        let node = parse(0, &raw);
        assert_eq!(node.clsid, "00020900-0000-0000-C000-000000000046");
    }
}
