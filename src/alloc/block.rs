//! The data-block allocator: a lock-free singly-linked free list anchored
//! in the superblock's `free_block_head`.
//!
//! ABA note (§9): this is ABA-tolerant only under the assumption that a
//! freed-and-reallocated block cannot reappear at the head between a
//! reader's load and its CAS. This design does not add tagged pointers or a
//! hazard scheme to close that window; it documents the risk, as the spec
//! permits, rather than solving it (a candidate REDESIGN FLAG, not acted on
//! here — see DESIGN.md).

use std::sync::atomic::Ordering;

use crate::buffer::SharedBuffer;
use crate::error::{Error, Result};
use crate::layout::{Geometry, FREE_LIST_TERMINATOR};

/// Pops a block off the free list, zeroes it, and returns its number.
///
/// Local block numbers are 0-based within the data region. Fails with
/// [`Error::NoSpace`] when the list is exhausted.
pub(crate) fn alloc_block(buf: &SharedBuffer, geometry: &Geometry) -> Result<u32> {
    let sb = crate::layout::Superblock::new(buf);
    loop {
        let head = sb.free_block_head().load(Ordering::Acquire);
        if head == FREE_LIST_TERMINATOR {
            log::warn!("sfs: data block allocation failed, filesystem full");
            return Err(Error::NoSpace);
        }
        let next_offset = geometry.block_offset(head);
        let next = buf.read_u32(next_offset);
        // The "next" pointer is already in place before we try to publish
        // the new head, so any successful pop observes a consistent chain.
        if sb
            .free_block_head()
            .compare_exchange(head, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            buf.zero(geometry.block_offset(head), crate::layout::BLOCK_SIZE);
            log::trace!("sfs: allocated data block {head}");
            return Ok(head);
        }
        // Lost the race; retry from the top. Not observed by the caller.
    }
}

/// Pushes `block_no` back onto the head of the free list.
pub(crate) fn free_block(buf: &SharedBuffer, geometry: &Geometry, block_no: u32) {
    let sb = crate::layout::Superblock::new(buf);
    loop {
        let head = sb.free_block_head().load(Ordering::Acquire);
        buf.write_u32(geometry.block_offset(block_no), head);
        if sb
            .free_block_head()
            .compare_exchange(head, block_no, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            log::trace!("sfs: freed data block {block_no}");
            return;
        }
    }
}

/// Counts blocks reachable from `free_block_head`, for `statfs`. Capped at
/// `data_block_count` iterations so a corrupted chain can't loop forever;
/// this is an observational walk, not synchronized with concurrent
/// allocators, so it may be stale the instant it returns.
pub(crate) fn count_free_blocks(buf: &SharedBuffer, geometry: &Geometry) -> u32 {
    let sb = crate::layout::Superblock::new(buf);
    let mut current = sb.free_block_head().load(Ordering::Acquire);
    let mut count = 0;
    while current != FREE_LIST_TERMINATOR && count < geometry.data_block_count {
        count += 1;
        current = buf.read_u32(geometry.block_offset(current));
    }
    count
}
