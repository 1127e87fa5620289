//! SFS: an in-memory, thread-shared POSIX-style filesystem living inside a
//! single contiguous shared byte buffer.
//!
//! Multiple execution contexts ("main" and "worker") attach to the same
//! buffer and perform file/directory operations directly against it. There
//! is no message-passing or proxy layer: everything this crate exposes goes
//! straight through [`Sfs`]'s methods onto the shared bytes. Acquiring and
//! sharing that buffer across contexts, syscall interception, and any wire
//! protocol that forwards operation names from a remote caller are all
//! collaborators outside this crate (§1).
//!
//! Call [`Sfs::initialize`] once to format a freshly allocated buffer, or
//! [`Sfs::new_context`] to hand a second (or third, ...) execution context a
//! handle onto the same buffer with its own descriptor table. [`Sfs::attach`]
//! validates and wraps a buffer that was already formatted elsewhere.

mod alloc;
mod blockmap;
mod buffer;
mod clock;
mod descriptor;
mod dir;
mod error;
mod inode;
mod layout;
mod ops;
mod path;
mod path_cache;
mod stat;

pub use buffer::SharedBuffer;
pub use clock::{Clock, SteppingClock, SystemClock};
pub use descriptor::flags;
pub use dir::DirEntry;
pub use error::{Error, Result};
pub use inode::{FileKind, DT_DIR, DT_LNK, DT_REG, DT_UNKNOWN};
pub use layout::{InitOptions, BLOCK_SIZE, DEFAULT_SYMLINK_DEPTH, INODE_SIZE, MAX_NAME_LEN};
pub use ops::Whence;
pub use stat::{Stat, Statfs};

use std::sync::Arc;

use descriptor::DescriptorTable;
use layout::Geometry;
use path_cache::PathCache;

/// State shared by every [`Sfs`] handle attached to the same buffer.
struct Shared {
    buffer: SharedBuffer,
    geometry: Geometry,
    clock: Box<dyn Clock>,
    path_cache: PathCache,
}

/// A handle onto a shared-buffer filesystem.
///
/// Cloning the `Arc` that backs [`Sfs::new_context`] is how two execution
/// contexts end up looking at the same bytes: the [`Shared`] state (buffer,
/// geometry, clock, path cache) is reference-counted and identical across
/// contexts, while the descriptor table (§4.7, §5: "internal to each
/// context; not shared across contexts") is private to each `Sfs` value.
pub struct Sfs {
    shared: Arc<Shared>,
    descriptors: std::sync::Mutex<DescriptorTable>,
}

impl Sfs {
    /// Formats a freshly allocated, zeroed buffer of `buffer_size` bytes and
    /// returns a handle to it (§4.1, §6 `initialize`).
    pub fn initialize(buffer_size: usize, options: InitOptions) -> Result<Self> {
        Self::initialize_with_clock(buffer_size, options, Box::new(SystemClock))
    }

    /// Like [`Self::initialize`], but with an injectable clock (§4.12),
    /// primarily for tests that need deterministic timestamps.
    pub fn initialize_with_clock(buffer_size: usize, options: InitOptions, clock: Box<dyn Clock>) -> Result<Self> {
        let buffer = SharedBuffer::new_zeroed(buffer_size);
        let geometry = layout::initialize(&buffer, options)?;

        let now = clock.now();
        let root = inode::InodeRef::at(&buffer, &geometry, layout::ROOT_INODE);
        root.write(&inode::InodeRecord {
            mode: inode::S_IFDIR | 0o755,
            nlink: 2,
            uid: 0,
            gid: 0,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            blocks: 0,
            direct: [0; layout::DIRECT_BLOCKS],
            indirect: 0,
            double_indirect: 0,
            flags: 0,
            generation: 0,
        });
        dir::init_empty(&buffer, &geometry, &root, layout::ROOT_INODE, layout::ROOT_INODE)?;
        log::debug!("sfs: initialized filesystem, {} data blocks, {} inodes", geometry.data_block_count, geometry.inode_count);

        Ok(Self {
            shared: Arc::new(Shared {
                buffer,
                geometry,
                clock,
                path_cache: PathCache::new(),
            }),
            descriptors: std::sync::Mutex::new(DescriptorTable::new()),
        })
    }

    /// Attaches to an already-initialized buffer, validating its magic
    /// (§4.1 `attach`; fatal, buffer left unchanged, on mismatch).
    pub fn attach(buffer: SharedBuffer) -> Result<Self> {
        Self::attach_with_clock(buffer, Box::new(SystemClock))
    }

    /// Like [`Self::attach`], but with an injectable clock.
    pub fn attach_with_clock(buffer: SharedBuffer, clock: Box<dyn Clock>) -> Result<Self> {
        let geometry = layout::attach(&buffer)?;
        Ok(Self {
            shared: Arc::new(Shared {
                buffer,
                geometry,
                clock,
                path_cache: PathCache::new(),
            }),
            descriptors: std::sync::Mutex::new(DescriptorTable::new()),
        })
    }

    /// Returns a second handle onto the same underlying buffer, with its
    /// own private descriptor table — the "a worker context attaches to
    /// the buffer the main context created" scenario from §1/§5.
    pub fn new_context(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            descriptors: std::sync::Mutex::new(DescriptorTable::new()),
        }
    }

    fn buf(&self) -> &SharedBuffer {
        &self.shared.buffer
    }

    fn geometry(&self) -> &Geometry {
        &self.shared.geometry
    }

    fn now(&self) -> u32 {
        self.shared.clock.now()
    }

    fn cache(&self) -> &PathCache {
        &self.shared.path_cache
    }
}
