//! The inode allocator: a monotonic bump counter CAS'd in the superblock.
//!
//! Freed inodes are tombstoned in place and never returned to this counter
//! (§9 "Inode reuse" — a deliberate choice, see DESIGN.md).

use std::sync::atomic::Ordering;

use crate::buffer::SharedBuffer;
use crate::error::{Error, Result};
use crate::layout::{Geometry, Superblock, INODE_SIZE};

/// Bumps `next_free_inode`, zeroes the new slot's record, and returns its
/// index. Fails with [`Error::NoSpace`] once `inode_count` is reached.
pub(crate) fn alloc_inode(buf: &SharedBuffer, geometry: &Geometry) -> Result<u32> {
    let sb = Superblock::new(buf);
    loop {
        let n = sb.next_free_inode().load(Ordering::Acquire);
        if n >= geometry.inode_count {
            log::warn!("sfs: inode allocation failed, filesystem full");
            return Err(Error::NoSpace);
        }
        if sb
            .next_free_inode()
            .compare_exchange(n, n + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            buf.zero(geometry.inode_offset(n), INODE_SIZE);
            log::trace!("sfs: allocated inode {n}");
            return Ok(n);
        }
    }
}
