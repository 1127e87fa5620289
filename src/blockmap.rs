//! Translates a file-relative block index to a data block number, walking
//! the inode's direct/indirect/double-indirect pointers.
//!
//! Grounded on the teacher's `get_content_block_off`/`resolve_indirections`
//! (`src/file/filesystem/ext2/mod.rs`): same direct-then-indirect-then-
//! double-indirect ladder, narrowed from ext2's 12 direct + triple-indirect
//! to this design's 8 direct + double-indirect (§3), and extended with an
//! allocating variant (`get_or_allocate`) and a `free_all` walk since this
//! design has no separate block-bitmap pass to reclaim an inode's blocks on
//! truncate/unlink (§4.13).

use crate::alloc::block::{alloc_block, free_block};
use crate::buffer::SharedBuffer;
use crate::error::Result;
use crate::inode::InodeRef;
use crate::layout::{Geometry, DIRECT_BLOCKS, POINTERS_PER_BLOCK};

const SINGLY_CAPACITY: u32 = POINTERS_PER_BLOCK as u32;
const DOUBLY_CAPACITY: u32 = (POINTERS_PER_BLOCK * POINTERS_PER_BLOCK) as u32;

/// Which pointer a file-relative block index `i` falls under.
enum Locator {
    Direct(usize),
    Singly { inner: u32 },
    Doubly { outer: u32, inner: u32 },
}

fn locate(i: u32) -> Locator {
    if (i as usize) < DIRECT_BLOCKS {
        Locator::Direct(i as usize)
    } else {
        let i = i - DIRECT_BLOCKS as u32;
        if i < SINGLY_CAPACITY {
            Locator::Singly { inner: i }
        } else {
            let i = i - SINGLY_CAPACITY;
            Locator::Doubly {
                outer: i / SINGLY_CAPACITY,
                inner: i % SINGLY_CAPACITY,
            }
        }
    }
}

fn read_pointer(buf: &SharedBuffer, geometry: &Geometry, block: u32, slot: u32) -> u32 {
    buf.read_u32(geometry.block_offset(block) + slot as usize * 4)
}

fn write_pointer(buf: &SharedBuffer, geometry: &Geometry, block: u32, slot: u32, value: u32) {
    buf.write_u32(geometry.block_offset(block) + slot as usize * 4, value);
}

/// Returns the data block backing file-relative block index `i`, or `None`
/// if no block has been allocated there yet (a hole).
pub(crate) fn get(buf: &SharedBuffer, geometry: &Geometry, inode: &InodeRef, i: u32) -> Option<u32> {
    match locate(i) {
        Locator::Direct(d) => non_zero(inode.direct(d)),
        Locator::Singly { inner } => {
            let l1 = non_zero(inode.indirect())?;
            non_zero(read_pointer(buf, geometry, l1, inner))
        }
        Locator::Doubly { outer, inner } => {
            let l1 = non_zero(inode.double_indirect())?;
            let l2 = non_zero(read_pointer(buf, geometry, l1, outer))?;
            non_zero(read_pointer(buf, geometry, l2, inner))
        }
    }
}

fn non_zero(b: u32) -> Option<u32> {
    if b == 0 {
        None
    } else {
        Some(b)
    }
}

/// Returns the data block backing file-relative block index `i`, allocating
/// it (and any intermediate pointer blocks) if it doesn't exist yet. On
/// allocation failure partway through, any pointer blocks already allocated
/// in this call are freed before returning the error, so a failed write
/// never leaves an orphaned block unreachable from both the inode and the
/// free list.
pub(crate) fn get_or_allocate(
    buf: &SharedBuffer,
    geometry: &Geometry,
    inode: &InodeRef,
    i: u32,
) -> Result<u32> {
    match locate(i) {
        Locator::Direct(d) => {
            if let Some(b) = non_zero(inode.direct(d)) {
                return Ok(b);
            }
            let b = alloc_block(buf, geometry)?;
            inode.set_direct(d, b);
            inode.set_blocks(inode.read().blocks + 1);
            Ok(b)
        }
        Locator::Singly { inner } => {
            let mut allocated_l1 = false;
            let l1 = match non_zero(inode.indirect()) {
                Some(b) => b,
                None => {
                    let b = alloc_block(buf, geometry)?;
                    inode.set_indirect(b);
                    allocated_l1 = true;
                    b
                }
            };
            if let Some(b) = non_zero(read_pointer(buf, geometry, l1, inner)) {
                return Ok(b);
            }
            match alloc_block(buf, geometry) {
                Ok(b) => {
                    write_pointer(buf, geometry, l1, inner, b);
                    inode.set_blocks(inode.read().blocks + 1);
                    Ok(b)
                }
                Err(e) => {
                    // The indirect block this call just allocated has no
                    // data block in it yet; free it rather than leaving it
                    // dangling off the inode with nothing to show for it
                    // (§4.4: a failed allocation must not leak a pointer
                    // block).
                    if allocated_l1 {
                        inode.set_indirect(0);
                        free_block(buf, geometry, l1);
                    }
                    Err(e)
                }
            }
        }
        Locator::Doubly { outer, inner } => {
            let mut allocated_l1 = false;
            let l1 = match non_zero(inode.double_indirect()) {
                Some(b) => b,
                None => {
                    let b = alloc_block(buf, geometry)?;
                    inode.set_double_indirect(b);
                    allocated_l1 = true;
                    b
                }
            };
            let mut allocated_l2 = false;
            let l2 = match non_zero(read_pointer(buf, geometry, l1, outer)) {
                Some(b) => b,
                None => match alloc_block(buf, geometry) {
                    Ok(b) => {
                        write_pointer(buf, geometry, l1, outer, b);
                        allocated_l2 = true;
                        b
                    }
                    Err(e) => {
                        if allocated_l1 {
                            inode.set_double_indirect(0);
                            free_block(buf, geometry, l1);
                        }
                        return Err(e);
                    }
                },
            };
            if let Some(b) = non_zero(read_pointer(buf, geometry, l2, inner)) {
                return Ok(b);
            }
            match alloc_block(buf, geometry) {
                Ok(b) => {
                    write_pointer(buf, geometry, l2, inner, b);
                    inode.set_blocks(inode.read().blocks + 1);
                    Ok(b)
                }
                Err(e) => {
                    // Unwind in reverse allocation order: the L2 (outer)
                    // pointer block before the L1 (double_indirect) block,
                    // so neither is left reachable from the inode with no
                    // data block underneath it.
                    if allocated_l2 {
                        write_pointer(buf, geometry, l1, outer, 0);
                        free_block(buf, geometry, l2);
                    }
                    if allocated_l1 {
                        inode.set_double_indirect(0);
                        free_block(buf, geometry, l1);
                    }
                    Err(e)
                }
            }
        }
    }
}

/// Copies `out.len()` bytes of file content starting at byte `offset` into
/// `out`. A block with no mapping (a hole) reads back as zeroes, matching
/// the teacher's `read_content` except that holes don't error here: this
/// design never punches holes itself, but `get` can still return `None`
/// for an index past every allocated pointer within a not-yet-written
/// tail block.
pub(crate) fn read_range(buf: &SharedBuffer, geometry: &Geometry, inode: &InodeRef, offset: u64, out: &mut [u8]) {
    use crate::layout::BLOCK_SIZE;
    let mut done = 0usize;
    while done < out.len() {
        let pos = offset + done as u64;
        let block_idx = (pos / BLOCK_SIZE as u64) as u32;
        let in_block = (pos % BLOCK_SIZE as u64) as usize;
        let chunk = (BLOCK_SIZE - in_block).min(out.len() - done);
        match get(buf, geometry, inode, block_idx) {
            Some(b) => buf.read_bytes(geometry.block_offset(b) + in_block, &mut out[done..done + chunk]),
            None => out[done..done + chunk].fill(0),
        }
        done += chunk;
    }
}

/// Copies `data` into file content starting at byte `offset`, allocating
/// any blocks (direct, indirect, or double-indirect) needed to hold it.
pub(crate) fn write_range(
    buf: &SharedBuffer,
    geometry: &Geometry,
    inode: &InodeRef,
    offset: u64,
    data: &[u8],
) -> Result<()> {
    use crate::layout::BLOCK_SIZE;
    let mut done = 0usize;
    while done < data.len() {
        let pos = offset + done as u64;
        let block_idx = (pos / BLOCK_SIZE as u64) as u32;
        let in_block = (pos % BLOCK_SIZE as u64) as usize;
        let chunk = (BLOCK_SIZE - in_block).min(data.len() - done);
        let b = get_or_allocate(buf, geometry, inode, block_idx)?;
        buf.write_bytes(geometry.block_offset(b) + in_block, &data[done..done + chunk]);
        done += chunk;
    }
    Ok(())
}

fn clear_at(buf: &SharedBuffer, geometry: &Geometry, inode: &InodeRef, i: u32) -> bool {
    match locate(i) {
        Locator::Direct(d) => match non_zero(inode.direct(d)) {
            Some(b) => {
                free_block(buf, geometry, b);
                inode.set_direct(d, 0);
                true
            }
            None => false,
        },
        Locator::Singly { inner } => match non_zero(inode.indirect()) {
            Some(l1) => match non_zero(read_pointer(buf, geometry, l1, inner)) {
                Some(b) => {
                    free_block(buf, geometry, b);
                    write_pointer(buf, geometry, l1, inner, 0);
                    true
                }
                None => false,
            },
            None => false,
        },
        Locator::Doubly { outer, inner } => match non_zero(inode.double_indirect()) {
            Some(l1) => match non_zero(read_pointer(buf, geometry, l1, outer)) {
                Some(l2) => match non_zero(read_pointer(buf, geometry, l2, inner)) {
                    Some(b) => {
                        free_block(buf, geometry, b);
                        write_pointer(buf, geometry, l2, inner, 0);
                        true
                    }
                    None => false,
                },
                None => false,
            },
            None => false,
        },
    }
}

fn ceil_div_u64(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Shrinks `inode` to `new_size` bytes, freeing every data block beyond
/// the new last block and decrementing `blocks` accordingly (§4.13
/// Supplement: `truncate` to a shorter non-zero length frees exactly the
/// blocks past the new size, not the whole file). Pointer blocks
/// (indirect/double-indirect) that end up holding only zero entries are
/// left allocated — they're still reachable from the inode, so I3 holds,
/// and a full reclaim happens anyway if the file is later truncated to
/// zero or unlinked.
pub(crate) fn shrink_to(buf: &SharedBuffer, geometry: &Geometry, inode: &InodeRef, new_size: u64) {
    use crate::layout::BLOCK_SIZE;
    let rec = inode.read();
    if new_size >= rec.size {
        inode.set_size(new_size);
        return;
    }
    let old_last_block = ceil_div_u64(rec.size, BLOCK_SIZE as u64) as u32;
    let new_last_block = ceil_div_u64(new_size, BLOCK_SIZE as u64) as u32;
    let mut freed = 0u32;
    for idx in new_last_block..old_last_block {
        if clear_at(buf, geometry, inode, idx) {
            freed += 1;
        }
    }
    inode.set_size(new_size);
    let blocks = inode.read().blocks;
    inode.set_blocks(blocks.saturating_sub(freed));
}

/// Frees every data block and pointer block reachable from `inode`, then
/// clears its pointers. Used by both `truncate(0)` and `unlink`'s final
/// reclaim, so neither leaks blocks (§4.13, resolving the source's open
/// "TRUNC leak" note).
pub(crate) fn free_all(buf: &SharedBuffer, geometry: &Geometry, inode: &InodeRef) {
    for d in 0..DIRECT_BLOCKS {
        if let Some(b) = non_zero(inode.direct(d)) {
            free_block(buf, geometry, b);
            inode.set_direct(d, 0);
        }
    }
    if let Some(l1) = non_zero(inode.indirect()) {
        free_pointer_block(buf, geometry, l1);
        inode.set_indirect(0);
    }
    if let Some(l1) = non_zero(inode.double_indirect()) {
        for outer in 0..POINTERS_PER_BLOCK as u32 {
            if let Some(l2) = non_zero(read_pointer(buf, geometry, l1, outer)) {
                free_pointer_block(buf, geometry, l2);
            }
        }
        free_block(buf, geometry, l1);
        inode.set_double_indirect(0);
    }
}

/// Frees every data block an indirect block points to, then the indirect
/// block itself.
fn free_pointer_block(buf: &SharedBuffer, geometry: &Geometry, indirect: u32) {
    for slot in 0..POINTERS_PER_BLOCK as u32 {
        if let Some(b) = non_zero(read_pointer(buf, geometry, indirect, slot)) {
            free_block(buf, geometry, b);
        }
    }
    free_block(buf, geometry, indirect);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{self, InitOptions};

    #[test]
    fn direct_blocks_allocate_lazily() {
        let buf = SharedBuffer::new_zeroed(64 * layout::BLOCK_SIZE);
        let geometry = layout::initialize(&buf, InitOptions::default()).unwrap();
        let inode = InodeRef::at(&buf, &geometry, 1);

        assert!(get(&buf, &geometry, &inode, 0).is_none());
        let b0 = get_or_allocate(&buf, &geometry, &inode, 0).unwrap();
        let b0_again = get_or_allocate(&buf, &geometry, &inode, 0).unwrap();
        assert_eq!(b0, b0_again);
        assert_eq!(get(&buf, &geometry, &inode, 0), Some(b0));
    }

    #[test]
    fn singly_indirect_blocks_round_trip() {
        let buf = SharedBuffer::new_zeroed(4096 * layout::BLOCK_SIZE);
        let geometry = layout::initialize(&buf, InitOptions::default()).unwrap();
        let inode = InodeRef::at(&buf, &geometry, 1);

        let idx = DIRECT_BLOCKS as u32 + 5;
        let b = get_or_allocate(&buf, &geometry, &inode, idx).unwrap();
        assert_eq!(get(&buf, &geometry, &inode, idx), Some(b));
        assert!(inode.indirect() != 0);
    }

    #[test]
    fn get_or_allocate_rolls_back_the_indirect_pointer_block_on_partial_failure() {
        use crate::alloc::block::count_free_blocks;

        let buf = SharedBuffer::new_zeroed(16 * layout::BLOCK_SIZE);
        let geometry = layout::initialize(&buf, InitOptions::default()).unwrap();
        let inode = InodeRef::at(&buf, &geometry, 1);

        // Drain the free list down to exactly one block, so allocating an
        // indirect-mapped block (which needs both the L1 pointer block and
        // the data block it points to) can get the pointer block but not
        // the data block underneath it.
        let mut taken = Vec::new();
        while let Ok(b) = alloc_block(&buf, &geometry) {
            taken.push(b);
        }
        for b in taken.drain(1..) {
            free_block(&buf, &geometry, b);
        }
        assert_eq!(count_free_blocks(&buf, &geometry), 1);

        let idx = DIRECT_BLOCKS as u32 + 1;
        assert!(get_or_allocate(&buf, &geometry, &inode, idx).is_err());

        // The one free block must still be free: the pointer block this
        // call allocated (and then couldn't fill) must have been freed
        // again, not left dangling off the inode with nothing in it.
        assert_eq!(count_free_blocks(&buf, &geometry), 1);
        assert_eq!(inode.indirect(), 0);
    }

    #[test]
    fn free_all_reclaims_direct_and_indirect_blocks() {
        let buf = SharedBuffer::new_zeroed(4096 * layout::BLOCK_SIZE);
        let geometry = layout::initialize(&buf, InitOptions::default()).unwrap();
        let inode = InodeRef::at(&buf, &geometry, 1);

        get_or_allocate(&buf, &geometry, &inode, 0).unwrap();
        get_or_allocate(&buf, &geometry, &inode, DIRECT_BLOCKS as u32 + 2).unwrap();

        let mut before = Vec::new();
        for _ in 0..geometry.data_block_count - 1 {
            if let Ok(b) = alloc_block(&buf, &geometry) {
                before.push(b);
            }
        }
        for b in before {
            free_block(&buf, &geometry, b);
        }

        free_all(&buf, &geometry, &inode);
        assert_eq!(inode.direct(0), 0);
        assert_eq!(inode.indirect(), 0);

        // Every data block should now be allocatable again.
        let mut count = 0;
        while alloc_block(&buf, &geometry).is_ok() {
            count += 1;
        }
        assert_eq!(count, geometry.data_block_count - 1);
    }
}
