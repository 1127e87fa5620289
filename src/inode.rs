//! Fixed-layout encode/decode of 128-byte inode records.
//!
//! Grounded on the teacher's `Ext2INode` (`src/file/filesystem/ext2/mod.rs`):
//! same idea (a `#[repr(C)]`-shaped record read/written at a computed disk
//! offset, `mode`/`uid`/`gid`/timestamps/direct+indirect+double-indirect
//! pointers), generalized from ext2's 12 direct blocks + triple-indirect to
//! this design's 8 direct blocks + double-indirect (§3), and from a
//! bitmap-based inode table to the bump allocator in `alloc::inode`.

use crate::buffer::SharedBuffer;
use crate::layout::{Geometry, DIRECT_BLOCKS, INODE_SIZE};

/// POSIX file-type bits, stored in the high nibble of `mode`.
pub const S_IFMT: u32 = 0o170000;
pub const S_IFREG: u32 = 0o100000;
pub const S_IFDIR: u32 = 0o040000;
pub const S_IFLNK: u32 = 0o120000;
/// Mask of the permission bits within `mode`.
pub const PERM_MASK: u32 = 0o7777;

/// POSIX `d_type` values, used both in directory entries and as the return
/// type of [`FileKind::d_type`]. Stored byte-exact; never remapped to a
/// local enum discriminant (§9).
pub const DT_UNKNOWN: u16 = 0;
pub const DT_DIR: u16 = 4;
pub const DT_REG: u16 = 8;
pub const DT_LNK: u16 = 10;

/// The type of file an inode describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
}

impl FileKind {
    pub(crate) fn from_mode(mode: u32) -> Option<Self> {
        match mode & S_IFMT {
            S_IFREG => Some(Self::Regular),
            S_IFDIR => Some(Self::Directory),
            S_IFLNK => Some(Self::Symlink),
            _ => None,
        }
    }

    pub(crate) fn type_bits(self) -> u32 {
        match self {
            Self::Regular => S_IFREG,
            Self::Directory => S_IFDIR,
            Self::Symlink => S_IFLNK,
        }
    }

    pub fn d_type(self) -> u16 {
        match self {
            Self::Regular => DT_REG,
            Self::Directory => DT_DIR,
            Self::Symlink => DT_LNK,
        }
    }
}

// Field byte offsets within a 128-byte inode record.
const OFF_MODE: usize = 0;
const OFF_NLINK: usize = 4;
const OFF_UID: usize = 8;
const OFF_GID: usize = 12;
const OFF_SIZE: usize = 16; // u64
const OFF_ATIME: usize = 24;
const OFF_MTIME: usize = 28;
const OFF_CTIME: usize = 32;
const OFF_BLOCKS: usize = 36;
const OFF_DIRECT: usize = 40; // DIRECT_BLOCKS * 4 bytes
const OFF_INDIRECT: usize = OFF_DIRECT + DIRECT_BLOCKS * 4;
const OFF_DOUBLE_INDIRECT: usize = OFF_INDIRECT + 4;
const OFF_FLAGS: usize = OFF_DOUBLE_INDIRECT + 4;
const OFF_GENERATION: usize = OFF_FLAGS + 4;
// Remaining bytes up to INODE_SIZE are reserved and left zeroed.

const _: () = assert!(OFF_GENERATION + 4 <= INODE_SIZE);

/// A decoded snapshot of an inode record.
///
/// This is a plain copy, not a live view: callers re-read through
/// [`InodeRef`] for anything that needs to observe concurrent mutation.
#[derive(Debug, Clone, Copy)]
pub struct InodeRecord {
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: u32,
    pub mtime: u32,
    pub ctime: u32,
    pub blocks: u32,
    pub direct: [u32; DIRECT_BLOCKS],
    pub indirect: u32,
    pub double_indirect: u32,
    pub flags: u32,
    pub generation: u32,
}

impl InodeRecord {
    pub fn is_free(&self) -> bool {
        self.mode == 0
    }

    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_mode(self.mode)
    }

    pub fn perm(&self) -> u32 {
        self.mode & PERM_MASK
    }
}

/// A handle to inode `index`'s record within the buffer, used to read and
/// mutate individual fields without re-deriving the byte offset each time.
#[derive(Clone, Copy)]
pub(crate) struct InodeRef<'a> {
    buf: &'a SharedBuffer,
    offset: usize,
    pub(crate) index: u32,
}

impl<'a> InodeRef<'a> {
    pub(crate) fn at(buf: &'a SharedBuffer, geometry: &Geometry, index: u32) -> Self {
        Self {
            buf,
            offset: geometry.inode_offset(index),
            index,
        }
    }

    pub(crate) fn read(&self) -> InodeRecord {
        let mut direct = [0u32; DIRECT_BLOCKS];
        for (i, slot) in direct.iter_mut().enumerate() {
            *slot = self.buf.read_u32(self.offset + OFF_DIRECT + i * 4);
        }
        InodeRecord {
            mode: self.buf.read_u32(self.offset + OFF_MODE),
            nlink: self.buf.read_u32(self.offset + OFF_NLINK),
            uid: self.buf.read_u32(self.offset + OFF_UID),
            gid: self.buf.read_u32(self.offset + OFF_GID),
            size: self.buf.read_u64(self.offset + OFF_SIZE),
            atime: self.buf.read_u32(self.offset + OFF_ATIME),
            mtime: self.buf.read_u32(self.offset + OFF_MTIME),
            ctime: self.buf.read_u32(self.offset + OFF_CTIME),
            blocks: self.buf.read_u32(self.offset + OFF_BLOCKS),
            direct,
            indirect: self.buf.read_u32(self.offset + OFF_INDIRECT),
            double_indirect: self.buf.read_u32(self.offset + OFF_DOUBLE_INDIRECT),
            flags: self.buf.read_u32(self.offset + OFF_FLAGS),
            generation: self.buf.read_u32(self.offset + OFF_GENERATION),
        }
    }

    pub(crate) fn write(&self, rec: &InodeRecord) {
        self.buf.write_u32(self.offset + OFF_MODE, rec.mode);
        self.buf.write_u32(self.offset + OFF_NLINK, rec.nlink);
        self.buf.write_u32(self.offset + OFF_UID, rec.uid);
        self.buf.write_u32(self.offset + OFF_GID, rec.gid);
        self.buf.write_u64(self.offset + OFF_SIZE, rec.size);
        self.buf.write_u32(self.offset + OFF_ATIME, rec.atime);
        self.buf.write_u32(self.offset + OFF_MTIME, rec.mtime);
        self.buf.write_u32(self.offset + OFF_CTIME, rec.ctime);
        self.buf.write_u32(self.offset + OFF_BLOCKS, rec.blocks);
        for (i, slot) in rec.direct.iter().enumerate() {
            self.buf.write_u32(self.offset + OFF_DIRECT + i * 4, *slot);
        }
        self.buf.write_u32(self.offset + OFF_INDIRECT, rec.indirect);
        self.buf
            .write_u32(self.offset + OFF_DOUBLE_INDIRECT, rec.double_indirect);
        self.buf.write_u32(self.offset + OFF_FLAGS, rec.flags);
        self.buf.write_u32(self.offset + OFF_GENERATION, rec.generation);
    }

    pub(crate) fn set_mode(&self, mode: u32) {
        self.buf.write_u32(self.offset + OFF_MODE, mode);
    }

    pub(crate) fn set_nlink(&self, nlink: u32) {
        self.buf.write_u32(self.offset + OFF_NLINK, nlink);
    }

    pub(crate) fn set_uid(&self, uid: u32) {
        self.buf.write_u32(self.offset + OFF_UID, uid);
    }

    pub(crate) fn set_gid(&self, gid: u32) {
        self.buf.write_u32(self.offset + OFF_GID, gid);
    }

    pub(crate) fn set_size(&self, size: u64) {
        self.buf.write_u64(self.offset + OFF_SIZE, size);
    }

    pub(crate) fn set_atime(&self, t: u32) {
        self.buf.write_u32(self.offset + OFF_ATIME, t);
    }

    pub(crate) fn set_mtime(&self, t: u32) {
        self.buf.write_u32(self.offset + OFF_MTIME, t);
    }

    pub(crate) fn set_ctime(&self, t: u32) {
        self.buf.write_u32(self.offset + OFF_CTIME, t);
    }

    pub(crate) fn set_blocks(&self, n: u32) {
        self.buf.write_u32(self.offset + OFF_BLOCKS, n);
    }

    pub(crate) fn direct(&self, i: usize) -> u32 {
        self.buf.read_u32(self.offset + OFF_DIRECT + i * 4)
    }

    pub(crate) fn set_direct(&self, i: usize, block: u32) {
        self.buf.write_u32(self.offset + OFF_DIRECT + i * 4, block);
    }

    pub(crate) fn indirect(&self) -> u32 {
        self.buf.read_u32(self.offset + OFF_INDIRECT)
    }

    pub(crate) fn set_indirect(&self, block: u32) {
        self.buf.write_u32(self.offset + OFF_INDIRECT, block);
    }

    pub(crate) fn double_indirect(&self) -> u32 {
        self.buf.read_u32(self.offset + OFF_DOUBLE_INDIRECT)
    }

    pub(crate) fn set_double_indirect(&self, block: u32) {
        self.buf.write_u32(self.offset + OFF_DOUBLE_INDIRECT, block);
    }

    /// Marks the inode as a tombstone: `mode = 0, nlink = 0`, and bumps its
    /// generation counter (§4.14). Does not touch block pointers; callers
    /// are expected to have already freed the inode's blocks.
    pub(crate) fn tombstone(&self) {
        let gen = self.buf.read_u32(self.offset + OFF_GENERATION);
        self.set_mode(0);
        self.set_nlink(0);
        self.buf.write_u32(self.offset + OFF_GENERATION, gen.wrapping_add(1));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{self, InitOptions};

    #[test]
    fn round_trips_a_record() {
        let buf = SharedBuffer::new_zeroed(16 * layout::BLOCK_SIZE);
        let geometry = layout::initialize(&buf, InitOptions::default()).unwrap();
        let iref = InodeRef::at(&buf, &geometry, 3);

        let mut rec = InodeRecord {
            mode: S_IFREG | 0o644,
            nlink: 1,
            uid: 1000,
            gid: 1000,
            size: 42,
            atime: 1,
            mtime: 2,
            ctime: 3,
            blocks: 1,
            direct: [7, 0, 0, 0, 0, 0, 0, 0],
            indirect: 0,
            double_indirect: 0,
            flags: 0,
            generation: 0,
        };
        iref.write(&rec);
        let read_back = iref.read();
        assert_eq!(read_back.mode, rec.mode);
        assert_eq!(read_back.size, rec.size);
        assert_eq!(read_back.direct, rec.direct);

        rec.generation += 1;
        iref.tombstone();
        let tomb = iref.read();
        assert!(tomb.is_free());
        assert_eq!(tomb.nlink, 0);
        assert_eq!(tomb.generation, rec.generation);
    }
}
