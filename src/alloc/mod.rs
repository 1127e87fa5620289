//! Lock-free allocators anchored in the superblock.
//!
//! Both allocators follow the same shape: load a counter/head atomically,
//! compute the next state, and CAS it in, retrying on contention. Neither
//! surfaces its retry loop to callers (§4.9: "allocator CAS loops are
//! internal, not observed by callers").

pub(crate) mod block;
pub(crate) mod inode;
