//! Buffer layout and superblock.
//!
//! Computes the three regions the shared buffer is divided into (superblock,
//! inode table, data blocks) and reads/writes the superblock's fields.
//! Grounded on the teacher's ext2 `Superblock`/`BlockGroupDescriptor`
//! read/write helpers (`src/file/filesystem/ext2/mod.rs`), generalized from
//! a single up-front `read::<Superblock>()` struct copy to per-field
//! accessors because two of these fields (`free_block_head`,
//! `next_free_inode`) are concurrently CAS'd and cannot be read through a
//! plain struct copy without tearing.

use crate::buffer::SharedBuffer;
use crate::error::{Error, Result};

/// Size in bytes of one block, and of the superblock (they coincide).
pub const BLOCK_SIZE: usize = 4096;
/// Size in bytes of one on-buffer inode record.
pub const INODE_SIZE: usize = 128;
/// Size in bytes of one directory entry.
pub const DIRENT_SIZE: usize = 32;
/// Number of direct block pointers stored inline in an inode.
pub const DIRECT_BLOCKS: usize = 8;
/// Number of block-number pointers that fit in one indirect block.
pub const POINTERS_PER_BLOCK: usize = BLOCK_SIZE / 4;
/// Maximum length, in bytes, of a single path component / directory entry name.
pub const MAX_NAME_LEN: usize = 24;
/// Sentinel marking the end of the free-block list.
pub const FREE_LIST_TERMINATOR: u32 = 0xFFFF_FFFF;
/// The inode number of the filesystem root. Always a directory.
pub const ROOT_INODE: u32 = 0;
/// Default cap on symlink resolution depth (see the path resolver).
pub const DEFAULT_SYMLINK_DEPTH: u32 = 40;
/// Magic value identifying a valid SFS buffer.
pub const MAGIC: u32 = 0x5346_5301; // "SFS" + version nibble

const CURRENT_VERSION: u32 = 1;

// Superblock field byte offsets (all within block 0).
const OFF_MAGIC: usize = 0;
const OFF_VERSION: usize = 4;
const OFF_BLOCK_SIZE: usize = 8;
const OFF_TOTAL_BLOCKS: usize = 12;
const OFF_INODE_COUNT: usize = 16;
const OFF_FREE_BLOCK_HEAD: usize = 20;
const OFF_NEXT_FREE_INODE: usize = 24;
const OFF_ROOT_INODE: usize = 28;
const OFF_DATA_BLOCK_COUNT: usize = 32;

/// Options accepted by [`crate::Sfs::initialize`].
///
/// This is the crate's entire "configuration layer": there is no file to
/// parse, just the handful of knobs a caller can override at creation time.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Overrides the automatically computed inode count. `None` uses the
    /// default policy from §4.1: `min(total_blocks / 4, 65536)`.
    pub inode_count: Option<u32>,
}

/// Read/write view over the superblock living in block 0 of the buffer.
pub(crate) struct Superblock<'a> {
    buf: &'a SharedBuffer,
}

impl<'a> Superblock<'a> {
    pub(crate) fn new(buf: &'a SharedBuffer) -> Self {
        Self { buf }
    }

    pub(crate) fn magic(&self) -> u32 {
        self.buf.read_u32(OFF_MAGIC)
    }

    pub(crate) fn version(&self) -> u32 {
        self.buf.read_u32(OFF_VERSION)
    }

    pub(crate) fn block_size(&self) -> u32 {
        self.buf.read_u32(OFF_BLOCK_SIZE)
    }

    pub(crate) fn total_blocks(&self) -> u32 {
        self.buf.read_u32(OFF_TOTAL_BLOCKS)
    }

    pub(crate) fn inode_count(&self) -> u32 {
        self.buf.read_u32(OFF_INODE_COUNT)
    }

    pub(crate) fn root_inode(&self) -> u32 {
        self.buf.read_u32(OFF_ROOT_INODE)
    }

    pub(crate) fn data_block_count(&self) -> u32 {
        self.buf.read_u32(OFF_DATA_BLOCK_COUNT)
    }

    /// Atomic view of the free-block list head, for CAS loops.
    pub(crate) fn free_block_head(&self) -> &'a std::sync::atomic::AtomicU32 {
        self.buf.atomic_u32(OFF_FREE_BLOCK_HEAD)
    }

    /// Atomic view of the inode bump counter, for CAS loops.
    pub(crate) fn next_free_inode(&self) -> &'a std::sync::atomic::AtomicU32 {
        self.buf.atomic_u32(OFF_NEXT_FREE_INODE)
    }

    fn write_header(
        &self,
        total_blocks: u32,
        inode_count: u32,
        data_block_count: u32,
        free_block_head: u32,
        next_free_inode: u32,
    ) {
        self.buf.write_u32(OFF_MAGIC, MAGIC);
        self.buf.write_u32(OFF_VERSION, CURRENT_VERSION);
        self.buf.write_u32(OFF_BLOCK_SIZE, BLOCK_SIZE as u32);
        self.buf.write_u32(OFF_TOTAL_BLOCKS, total_blocks);
        self.buf.write_u32(OFF_INODE_COUNT, inode_count);
        self.buf.write_u32(OFF_FREE_BLOCK_HEAD, free_block_head);
        self.buf.write_u32(OFF_NEXT_FREE_INODE, next_free_inode);
        self.buf.write_u32(OFF_ROOT_INODE, ROOT_INODE);
        self.buf.write_u32(OFF_DATA_BLOCK_COUNT, data_block_count);
    }
}

/// The geometry derived from a buffer's size: where each region starts and
/// how many blocks/inodes it holds.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Geometry {
    pub(crate) total_blocks: u32,
    pub(crate) inode_count: u32,
    pub(crate) inode_table_blocks: u32,
    pub(crate) data_block_count: u32,
}

impl Geometry {
    /// Byte offset of inode table block 0.
    pub(crate) fn inode_table_offset(&self) -> usize {
        BLOCK_SIZE
    }

    /// Byte offset of data block 0.
    pub(crate) fn data_offset(&self) -> usize {
        BLOCK_SIZE + self.inode_table_blocks as usize * BLOCK_SIZE
    }

    /// Byte offset of the `i`th inode record.
    pub(crate) fn inode_offset(&self, i: u32) -> usize {
        self.inode_table_offset() + i as usize * INODE_SIZE
    }

    /// Byte offset of data block number `b` (0-based, local to the data region).
    pub(crate) fn block_offset(&self, b: u32) -> usize {
        self.data_offset() + b as usize * BLOCK_SIZE
    }
}

fn ceil_div(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

/// Computes geometry from a buffer size in bytes, per §4.1's policy.
pub(crate) fn compute_geometry(buffer_len: usize, options: InitOptions) -> Result<Geometry> {
    let total_blocks = (buffer_len / BLOCK_SIZE) as u32;
    if total_blocks < 3 {
        return Err(Error::Inval("buffer too small to hold a filesystem"));
    }
    let inode_count = options
        .inode_count
        .unwrap_or_else(|| (total_blocks / 4).min(65536))
        .max(1);
    let inode_table_blocks = ceil_div(inode_count * INODE_SIZE as u32, BLOCK_SIZE as u32);
    if 1 + inode_table_blocks >= total_blocks {
        return Err(Error::Inval("buffer too small for requested inode count"));
    }
    let data_block_count = total_blocks - 1 - inode_table_blocks;
    Ok(Geometry {
        total_blocks,
        inode_count,
        inode_table_blocks,
        data_block_count,
    })
}

/// Initializes a fresh filesystem over `buf`, threading the free-block list
/// and writing the superblock header.
pub(crate) fn initialize(buf: &SharedBuffer, options: InitOptions) -> Result<Geometry> {
    let geometry = compute_geometry(buf.len(), options)?;

    // Block 0 of the data region is a reserved sentinel and is left out of
    // the initial free list (§4.1).
    let free_block_head = if geometry.data_block_count > 1 { 1 } else { FREE_LIST_TERMINATOR };

    let sb = Superblock::new(buf);
    sb.write_header(
        geometry.total_blocks,
        geometry.inode_count,
        geometry.data_block_count,
        free_block_head,
        1,
    );

    // Thread the free list through data blocks [1, data_block_count).
    for b in 1..geometry.data_block_count {
        let next = if b + 1 < geometry.data_block_count {
            b + 1
        } else {
            FREE_LIST_TERMINATOR
        };
        buf.write_u32(geometry.block_offset(b), next);
    }

    Ok(geometry)
}

/// Validates the magic on `attach` and recomputes geometry from the stored
/// `inode_count`. Fatal (leaves the buffer unchanged) if the magic mismatches.
pub(crate) fn attach(buf: &SharedBuffer) -> Result<Geometry> {
    let sb = Superblock::new(buf);
    if sb.magic() != MAGIC {
        return Err(Error::Inval("bad magic: not an SFS buffer"));
    }
    let total_blocks = sb.total_blocks();
    let inode_count = sb.inode_count();
    let inode_table_blocks = ceil_div(inode_count * INODE_SIZE as u32, BLOCK_SIZE as u32);
    let data_block_count = sb.data_block_count();
    Ok(Geometry {
        total_blocks,
        inode_count,
        inode_table_blocks,
        data_block_count,
    })
}
