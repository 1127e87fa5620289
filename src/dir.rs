//! Directory content: a flat array of fixed-size 32-byte entries stored in
//! a directory inode's data blocks.
//!
//! Grounded on the teacher's `foreach_directory_entry`/`get_directory_entry`/
//! `add_dirent` (`src/file/filesystem/ext2/mod.rs`), simplified from ext2's
//! variable-length, splittable entries (its `add_dirent` is itself an
//! unfinished TODO in the source) to this design's fixed-size slots (§3):
//! a free slot is just one whose `inode` field is 0, so add/remove never
//! need to shift or coalesce neighboring entries.

use crate::blockmap;
use crate::buffer::SharedBuffer;
use crate::error::{Error, Result};
use crate::inode::InodeRef;
use crate::layout::{Geometry, BLOCK_SIZE, DIRENT_SIZE, MAX_NAME_LEN};

const ENTRIES_PER_BLOCK: u32 = (BLOCK_SIZE / DIRENT_SIZE) as u32;

// Byte offsets within one 32-byte entry.
const OFF_INODE: usize = 0;
const OFF_DTYPE: usize = 4;
const OFF_NAMELEN: usize = 5;
// bytes 6..8 reserved
const OFF_NAME: usize = 8;

const _: () = assert!(OFF_NAME + MAX_NAME_LEN == DIRENT_SIZE);

/// One decoded directory entry.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub name: String,
    pub inode: u32,
    pub d_type: u16,
}

fn slot_offset(buf: &SharedBuffer, geometry: &Geometry, dir: &InodeRef, slot: u32) -> Option<usize> {
    let block_idx = slot / ENTRIES_PER_BLOCK;
    let in_block = slot % ENTRIES_PER_BLOCK;
    let block = blockmap::get(buf, geometry, dir, block_idx)?;
    Some(geometry.block_offset(block) + in_block as usize * DIRENT_SIZE)
}

fn capacity_slots(dir: &InodeRef) -> u32 {
    (dir.read().size / DIRENT_SIZE as u64) as u32
}

fn read_slot(buf: &SharedBuffer, off: usize) -> (u32, u16, String) {
    let inode = buf.read_u32(off + OFF_INODE);
    let d_type = buf.read_bytes_u16(off + OFF_DTYPE);
    let name_len = buf.read_bytes_u8(off + OFF_NAMELEN) as usize;
    let mut name_bytes = vec![0u8; name_len.min(MAX_NAME_LEN)];
    buf.read_bytes(off + OFF_NAME, &mut name_bytes);
    let name = String::from_utf8_lossy(&name_bytes).into_owned();
    (inode, d_type, name)
}

fn write_slot(buf: &SharedBuffer, off: usize, inode: u32, d_type: u16, name: &str) {
    buf.write_u32(off + OFF_INODE, inode);
    buf.write_bytes_u16(off + OFF_DTYPE, d_type);
    buf.write_bytes_u8(off + OFF_NAMELEN, name.len() as u8);
    let mut name_field = [0u8; MAX_NAME_LEN];
    name_field[..name.len()].copy_from_slice(name.as_bytes());
    buf.write_bytes(off + OFF_NAME, &name_field);
}

fn clear_slot(buf: &SharedBuffer, off: usize) {
    buf.zero(off, DIRENT_SIZE);
}

/// Initializes an empty directory's content: allocates its first block and
/// seeds `.` and `..` pointing at `self_inode` and `parent_inode`.
pub(crate) fn init_empty(
    buf: &SharedBuffer,
    geometry: &Geometry,
    dir: &InodeRef,
    self_inode: u32,
    parent_inode: u32,
) -> Result<()> {
    blockmap::get_or_allocate(buf, geometry, dir, 0)?;
    dir.set_size(BLOCK_SIZE as u64);
    dir.set_blocks(1);
    let off0 = slot_offset(buf, geometry, dir, 0).expect("just allocated");
    write_slot(buf, off0, self_inode, crate::inode::DT_DIR, ".");
    let off1 = slot_offset(buf, geometry, dir, 1).expect("same block as slot 0");
    write_slot(buf, off1, parent_inode, crate::inode::DT_DIR, "..");
    Ok(())
}

/// Looks up `name` in `dir`'s entries. Returns the matching entry, if any.
pub(crate) fn lookup(buf: &SharedBuffer, geometry: &Geometry, dir: &InodeRef, name: &str) -> Option<DirEntry> {
    let capacity = capacity_slots(dir);
    for slot in 0..capacity {
        let off = slot_offset(buf, geometry, dir, slot)?;
        let (inode, d_type, entry_name) = read_slot(buf, off);
        if inode != 0 && entry_name == name {
            return Some(DirEntry {
                name: entry_name,
                inode,
                d_type,
            });
        }
    }
    None
}

/// Returns every live entry in `dir`, in on-disk slot order (so `.` and
/// `..` come first, matching §4.9's readdir ordering note).
pub(crate) fn iter(buf: &SharedBuffer, geometry: &Geometry, dir: &InodeRef) -> Vec<DirEntry> {
    let capacity = capacity_slots(dir);
    let mut entries = Vec::new();
    for slot in 0..capacity {
        let Some(off) = slot_offset(buf, geometry, dir, slot) else {
            continue;
        };
        let (inode, d_type, name) = read_slot(buf, off);
        if inode != 0 {
            entries.push(DirEntry { name, inode, d_type });
        }
    }
    entries
}

/// Adds `name -> inode_no` to `dir`, reusing a tombstoned slot if one
/// exists, else growing the directory by one block. Fails with
/// [`Error::Exists`] if the name is already present.
pub(crate) fn add_entry(
    buf: &SharedBuffer,
    geometry: &Geometry,
    dir: &InodeRef,
    name: &str,
    inode_no: u32,
    d_type: u16,
) -> Result<()> {
    if name.len() > MAX_NAME_LEN {
        return Err(Error::Inval("name too long"));
    }
    let capacity = capacity_slots(dir);
    let mut free_slot = None;
    for slot in 0..capacity {
        let off = slot_offset(buf, geometry, dir, slot).expect("slot within existing capacity");
        let (slot_inode, _, slot_name) = read_slot(buf, off);
        if slot_inode != 0 {
            if slot_name == name {
                return Err(Error::exists(name));
            }
        } else if free_slot.is_none() {
            free_slot = Some(off);
        }
    }

    let off = match free_slot {
        Some(off) => off,
        None => {
            let new_slot = capacity;
            let new_block_idx = new_slot / ENTRIES_PER_BLOCK;
            blockmap::get_or_allocate(buf, geometry, dir, new_block_idx)?;
            let new_size = dir.read().size + BLOCK_SIZE as u64;
            dir.set_size(new_size);
            dir.set_blocks(dir.read().blocks + 1);
            slot_offset(buf, geometry, dir, new_slot).expect("just grown")
        }
    };
    write_slot(buf, off, inode_no, d_type, name);
    Ok(())
}

/// Removes the entry named `name` from `dir`. Fails with
/// [`Error::NotFound`] if it isn't present.
pub(crate) fn remove_entry(buf: &SharedBuffer, geometry: &Geometry, dir: &InodeRef, name: &str) -> Result<()> {
    let capacity = capacity_slots(dir);
    for slot in 0..capacity {
        let off = slot_offset(buf, geometry, dir, slot).expect("slot within existing capacity");
        let (inode, _, slot_name) = read_slot(buf, off);
        if inode != 0 && slot_name == name {
            clear_slot(buf, off);
            return Ok(());
        }
    }
    Err(Error::not_found(name))
}

/// True if `dir` has no entries besides `.` and `..` (§8 invariant: an
/// rmdir target must be empty of everything else).
pub(crate) fn is_empty(buf: &SharedBuffer, geometry: &Geometry, dir: &InodeRef) -> bool {
    iter(buf, geometry, dir)
        .iter()
        .all(|e| e.name == "." || e.name == "..")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{self, InitOptions};

    fn setup() -> (SharedBuffer, Geometry) {
        let buf = SharedBuffer::new_zeroed(64 * layout::BLOCK_SIZE);
        let geometry = layout::initialize(&buf, InitOptions::default()).unwrap();
        (buf, geometry)
    }

    #[test]
    fn init_then_lookup_dot_and_dotdot() {
        let (buf, geometry) = setup();
        let dir = InodeRef::at(&buf, &geometry, 0);
        init_empty(&buf, &geometry, &dir, 0, 0).unwrap();
        assert_eq!(lookup(&buf, &geometry, &dir, ".").unwrap().inode, 0);
        assert_eq!(lookup(&buf, &geometry, &dir, "..").unwrap().inode, 0);
        assert!(is_empty(&buf, &geometry, &dir));
    }

    #[test]
    fn add_lookup_remove_round_trip() {
        let (buf, geometry) = setup();
        let dir = InodeRef::at(&buf, &geometry, 0);
        init_empty(&buf, &geometry, &dir, 0, 0).unwrap();

        add_entry(&buf, &geometry, &dir, "a.txt", 5, crate::inode::DT_REG).unwrap();
        assert!(!is_empty(&buf, &geometry, &dir));
        assert_eq!(lookup(&buf, &geometry, &dir, "a.txt").unwrap().inode, 5);
        assert!(matches!(
            add_entry(&buf, &geometry, &dir, "a.txt", 6, crate::inode::DT_REG),
            Err(Error::Exists(_))
        ));

        remove_entry(&buf, &geometry, &dir, "a.txt").unwrap();
        assert!(lookup(&buf, &geometry, &dir, "a.txt").is_none());
        assert!(is_empty(&buf, &geometry, &dir));
    }

    #[test]
    fn grows_past_one_block_of_entries() {
        let (buf, geometry) = setup();
        let dir = InodeRef::at(&buf, &geometry, 0);
        init_empty(&buf, &geometry, &dir, 0, 0).unwrap();

        // Two slots are taken by "." and "..": fill the rest of block 0 and
        // spill into block 1.
        for i in 0..(ENTRIES_PER_BLOCK) {
            let name = format!("f{i}");
            add_entry(&buf, &geometry, &dir, &name, i + 1, crate::inode::DT_REG).unwrap();
        }
        assert_eq!(dir.read().blocks, 2);
        assert_eq!(lookup(&buf, &geometry, &dir, "f0").unwrap().inode, 1);
    }
}
