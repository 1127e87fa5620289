//! The operation surface: `stat`/`lstat`/`statfs`, the open-file calls, the
//! directory calls, links & rename, and the permission/timestamp setters
//! (§4.9, §6). Every method here is an inherent method on [`crate::Sfs`] so
//! that a caller never touches the lower-level modules (`path`, `dir`,
//! `blockmap`, ...) directly.
//!
//! Grounded on the teacher's per-syscall files (`src/syscall/open.rs`,
//! `close.rs`, `mkdir.rs`, `rmdir.rs`, `link.rs`, `symlink.rs`,
//! `readlink.rs`, `chown.rs`, `fchmodat.rs`, `statx.rs`, `statfs64.rs`):
//! same one-operation-per-function shape and the same "resolve, check the
//! failure table, mutate" structure, collapsed from syscall argument
//! marshalling into a plain Rust method per operation.

use crate::alloc::{block, inode as inode_alloc};
use crate::descriptor::flags;
use crate::dir::{self, DirEntry};
use crate::error::{Error, Result};
use crate::inode::{FileKind, InodeRecord, InodeRef, PERM_MASK, S_IFDIR, S_IFLNK, S_IFMT, S_IFREG};
use crate::layout::DIRECT_BLOCKS;
use crate::layout::{BLOCK_SIZE, ROOT_INODE};
use crate::path;
use crate::stat::{Stat, Statfs};
use crate::Sfs;

/// `lseek` origin, mirroring POSIX `SEEK_*` (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Set,
    Cur,
    End,
}

/// Largest byte offset this design's block map can address: 8 direct + 1024
/// indirect + 1024*1024 double-indirect blocks of 4 KiB each (§3, I6).
const MAX_FILE_SIZE: u64 =
    (DIRECT_BLOCKS as u64 + 1024 + 1024 * 1024) * BLOCK_SIZE as u64;

impl Sfs {
    fn read_inode(&self, ino: u32) -> InodeRecord {
        InodeRef::at(self.buf(), self.geometry(), ino).read()
    }

    fn inode_ref(&self, ino: u32) -> InodeRef<'_> {
        InodeRef::at(self.buf(), self.geometry(), ino)
    }

    /// Resolves `path` like [`path::resolve`], but consults and populates
    /// the shared path cache first, so a hot path doesn't re-walk every
    /// component (and every symlink it passes through) on each call.
    fn resolve_cached(&self, path: &str) -> Result<u32> {
        if let Some(ino) = self.cache().get(path) {
            return Ok(ino);
        }
        let ino = path::resolve(self.buf(), self.geometry(), path)?;
        self.cache().insert(path, ino);
        Ok(ino)
    }

    // ---- Metadata -------------------------------------------------------

    /// Resolves `path` following a trailing symlink and returns its metadata.
    pub fn stat(&self, path: &str) -> Result<Stat> {
        let ino = self.resolve_cached(path)?;
        Ok(Stat::from_record(ino, &self.read_inode(ino)))
    }

    /// Like [`Self::stat`], but a symlink in the terminal position is
    /// reported on, not followed.
    pub fn lstat(&self, path: &str) -> Result<Stat> {
        let ino = path::lresolve(self.buf(), self.geometry(), path)?;
        Ok(Stat::from_record(ino, &self.read_inode(ino)))
    }

    /// Filesystem-wide occupancy (§6).
    pub fn statfs(&self) -> Result<Statfs> {
        let geometry = self.geometry();
        let free_blocks = block::count_free_blocks(self.buf(), geometry);
        let sb = crate::layout::Superblock::new(self.buf());
        let used_inodes = sb.next_free_inode().load(std::sync::atomic::Ordering::Acquire);
        Ok(Statfs {
            block_size: BLOCK_SIZE as u32,
            total_blocks: geometry.total_blocks,
            free_blocks,
            total_inodes: geometry.inode_count,
            free_inodes: geometry.inode_count.saturating_sub(used_inodes),
            name_max: crate::layout::MAX_NAME_LEN as u32,
        })
    }

    // ---- Files ------------------------------------------------------------

    /// Opens `path`, honoring `flags` (§4.7). `mode` is only consulted when
    /// `O_CREAT` causes a new regular file to be created.
    pub fn open(&self, path: &str, flags: u32, mode: u32) -> Result<u32> {
        let nofollow = flags & flags::O_NOFOLLOW != 0;
        let resolved = if nofollow {
            path::lresolve(self.buf(), self.geometry(), path)
        } else {
            self.resolve_cached(path)
        };

        let ino = match resolved {
            Ok(ino) => {
                if flags & flags::O_CREAT != 0 && flags & flags::O_EXCL != 0 {
                    return Err(Error::exists(path));
                }
                ino
            }
            Err(Error::NotFound(_)) if flags & flags::O_CREAT != 0 => {
                let (parent, name) = path::resolve_parent(self.buf(), self.geometry(), path)?;
                let child = self.create_regular(parent, name, mode)?;
                self.cache().invalidate_prefix(path);
                child
            }
            Err(e) => return Err(e),
        };

        let rec = self.read_inode(ino);
        match rec.kind() {
            Some(FileKind::Directory) => return Err(Error::is_dir(path)),
            Some(FileKind::Symlink) if nofollow => {
                return Err(Error::Inval("cannot open a symlink directly without following it"));
            }
            _ => {}
        }

        if flags & flags::O_TRUNC != 0 {
            let iref = self.inode_ref(ino);
            crate::blockmap::free_all(self.buf(), self.geometry(), &iref);
            iref.set_size(0);
            iref.set_blocks(0);
        }

        let size = self.read_inode(ino).size;
        let mut descriptors = self.descriptors.lock().unwrap();
        let fd = descriptors.insert(ino, flags, path);
        if flags & flags::O_APPEND != 0 {
            descriptors.get_mut(fd).unwrap().pos = size;
        }
        log::debug!("sfs: open {path:?} -> fd {fd} (ino {ino})");
        Ok(fd)
    }

    fn create_regular(&self, parent: u32, name: &str, mode: u32) -> Result<u32> {
        let parent_ref = self.inode_ref(parent);
        if parent_ref.read().kind() != Some(FileKind::Directory) {
            return Err(Error::not_dir(name));
        }
        let child = inode_alloc::alloc_inode(self.buf(), self.geometry())?;
        let now = self.now();
        let child_ref = self.inode_ref(child);
        child_ref.write(&InodeRecord {
            mode: S_IFREG | (mode & PERM_MASK),
            nlink: 1,
            uid: 0,
            gid: 0,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            blocks: 0,
            direct: [0; DIRECT_BLOCKS],
            indirect: 0,
            double_indirect: 0,
            flags: 0,
            generation: 0,
        });
        if let Err(e) = dir::add_entry(self.buf(), self.geometry(), &parent_ref, name, child, crate::inode::DT_REG) {
            child_ref.tombstone();
            return Err(e);
        }
        parent_ref.set_mtime(now);
        parent_ref.set_ctime(now);
        Ok(child)
    }

    /// Closes `fd`, removing it from this context's descriptor table.
    pub fn close(&self, fd: u32) -> Result<()> {
        let path = self.descriptors.lock().unwrap().close(fd)?;
        log::debug!("sfs: close fd {fd} ({path:?})");
        Ok(())
    }

    /// Reads up to `buf.len()` bytes at the descriptor's current position,
    /// advancing it by the amount actually read.
    pub fn read(&self, fd: u32, buf: &mut [u8]) -> Result<usize> {
        let mut descriptors = self.descriptors.lock().unwrap();
        let open_file = descriptors.get_mut(fd)?;
        if !open_file.readable() {
            return Err(Error::Inval("file not opened for reading"));
        }
        let ino = open_file.inode;
        let pos = open_file.pos;
        let n = self.read_at(ino, pos, buf);
        descriptors.get_mut(fd).unwrap().pos += n as u64;
        Ok(n)
    }

    /// Writes `buf` at the descriptor's current position (re-reading the
    /// file's size first if `O_APPEND` is set, per §6), advancing position
    /// by the amount written.
    pub fn write(&self, fd: u32, buf: &[u8]) -> Result<usize> {
        let mut descriptors = self.descriptors.lock().unwrap();
        let open_file = descriptors.get_mut(fd)?;
        if !open_file.writable() {
            return Err(Error::Inval("file not opened for writing"));
        }
        let ino = open_file.inode;
        let append = open_file.flags & flags::O_APPEND != 0;
        let pos = if append { self.read_inode(ino).size } else { open_file.pos };
        let n = self.write_at(ino, pos, buf)?;
        descriptors.get_mut(fd).unwrap().pos = pos + n as u64;
        Ok(n)
    }

    /// Reads at `offset` without touching the descriptor's position.
    pub fn pread(&self, fd: u32, buf: &mut [u8], offset: u64) -> Result<usize> {
        let descriptors = self.descriptors.lock().unwrap();
        let open_file = descriptors.get(fd)?;
        if !open_file.readable() {
            return Err(Error::Inval("file not opened for reading"));
        }
        Ok(self.read_at(open_file.inode, offset, buf))
    }

    /// Writes at `offset` without touching the descriptor's position.
    pub fn pwrite(&self, fd: u32, buf: &[u8], offset: u64) -> Result<usize> {
        let descriptors = self.descriptors.lock().unwrap();
        let open_file = descriptors.get(fd)?;
        if !open_file.writable() {
            return Err(Error::Inval("file not opened for writing"));
        }
        self.write_at(open_file.inode, offset, buf)
    }

    fn read_at(&self, ino: u32, offset: u64, buf: &mut [u8]) -> usize {
        let size = self.read_inode(ino).size;
        if offset >= size {
            return 0;
        }
        let n = (buf.len() as u64).min(size - offset) as usize;
        let iref = self.inode_ref(ino);
        crate::blockmap::read_range(self.buf(), self.geometry(), &iref, offset, &mut buf[..n]);
        iref.set_atime(self.now());
        n
    }

    fn write_at(&self, ino: u32, offset: u64, data: &[u8]) -> Result<usize> {
        let fits = matches!(offset.checked_add(data.len() as u64), Some(end) if end <= MAX_FILE_SIZE);
        if !fits {
            return Err(Error::Inval("write would exceed maximum file size"));
        }
        let iref = self.inode_ref(ino);
        crate::blockmap::write_range(self.buf(), self.geometry(), &iref, offset, data)?;
        let new_end = offset + data.len() as u64;
        let rec = iref.read();
        if new_end > rec.size {
            iref.set_size(new_end);
        }
        let now = self.now();
        iref.set_mtime(now);
        iref.set_ctime(now);
        Ok(data.len())
    }

    /// Repositions `fd`'s offset; the result is clamped at 0 on the low end
    /// and has no high-end clamp (§4.7).
    pub fn lseek(&self, fd: u32, offset: i64, whence: Whence) -> Result<u64> {
        let mut descriptors = self.descriptors.lock().unwrap();
        let open_file = descriptors.get_mut(fd)?;
        let base: i64 = match whence {
            Whence::Set => 0,
            Whence::Cur => open_file.pos as i64,
            Whence::End => self.read_inode(open_file.inode).size as i64,
        };
        let new_pos = (base + offset).max(0) as u64;
        open_file.pos = new_pos;
        Ok(new_pos)
    }

    /// Resizes the file at `path` to `length` bytes, freeing any blocks
    /// beyond the new size (§4.13: closes the source's TRUNC-leak issue).
    pub fn truncate(&self, path: &str, length: u64) -> Result<()> {
        let ino = self.resolve_cached(path)?;
        let rec = self.read_inode(ino);
        if rec.kind() == Some(FileKind::Directory) {
            return Err(Error::is_dir(path));
        }
        if length > MAX_FILE_SIZE {
            return Err(Error::Inval("truncate length exceeds maximum file size"));
        }
        let iref = self.inode_ref(ino);
        crate::blockmap::shrink_to(self.buf(), self.geometry(), &iref, length);
        let now = self.now();
        iref.set_mtime(now);
        iref.set_ctime(now);
        Ok(())
    }

    // ---- Directories --------------------------------------------------

    /// Creates an empty directory at `path` (§4.9: parent missing ->
    /// `NOT_FOUND`, target exists -> `EXISTS`).
    pub fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        let (parent, name) = path::resolve_parent(self.buf(), self.geometry(), path)?;
        let parent_ref = self.inode_ref(parent);
        if parent_ref.read().kind() != Some(FileKind::Directory) {
            return Err(Error::not_dir(path));
        }
        if dir::lookup(self.buf(), self.geometry(), &parent_ref, name).is_some() {
            return Err(Error::exists(path));
        }

        let child = inode_alloc::alloc_inode(self.buf(), self.geometry())?;
        let now = self.now();
        let child_ref = self.inode_ref(child);
        child_ref.write(&InodeRecord {
            mode: S_IFDIR | (mode & PERM_MASK),
            nlink: 2,
            uid: 0,
            gid: 0,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            blocks: 0,
            direct: [0; DIRECT_BLOCKS],
            indirect: 0,
            double_indirect: 0,
            flags: 0,
            generation: 0,
        });
        if let Err(e) = dir::init_empty(self.buf(), self.geometry(), &child_ref, child, parent) {
            child_ref.tombstone();
            return Err(e);
        }
        if let Err(e) = dir::add_entry(self.buf(), self.geometry(), &parent_ref, name, child, crate::inode::DT_DIR) {
            crate::blockmap::free_all(self.buf(), self.geometry(), &child_ref);
            child_ref.tombstone();
            return Err(e);
        }
        parent_ref.set_nlink(parent_ref.read().nlink + 1);
        parent_ref.set_mtime(now);
        parent_ref.set_ctime(now);
        self.cache().invalidate_prefix(path);
        log::debug!("sfs: mkdir {path:?} -> ino {child}");
        Ok(())
    }

    /// Removes the empty directory at `path` (§4.9: not a directory ->
    /// `NOTDIR`, non-empty or root -> `NOT_EMPTY`/`INVAL`).
    pub fn rmdir(&self, path: &str) -> Result<()> {
        let (parent, name) = path::resolve_parent(self.buf(), self.geometry(), path)?;
        let parent_ref = self.inode_ref(parent);
        let entry = dir::lookup(self.buf(), self.geometry(), &parent_ref, name).ok_or_else(|| Error::not_found(path))?;
        if entry.inode == ROOT_INODE {
            return Err(Error::Inval("cannot remove the root directory"));
        }
        let child_ref = self.inode_ref(entry.inode);
        if child_ref.read().kind() != Some(FileKind::Directory) {
            return Err(Error::not_dir(path));
        }
        if !dir::is_empty(self.buf(), self.geometry(), &child_ref) {
            return Err(Error::not_empty(path));
        }

        dir::remove_entry(self.buf(), self.geometry(), &parent_ref, name)?;
        crate::blockmap::free_all(self.buf(), self.geometry(), &child_ref);
        child_ref.tombstone();
        let now = self.now();
        parent_ref.set_nlink(parent_ref.read().nlink.saturating_sub(1));
        parent_ref.set_mtime(now);
        parent_ref.set_ctime(now);
        self.cache().invalidate_prefix(path);
        Ok(())
    }

    /// Returns every live entry of the directory at `path`, in on-disk slot
    /// order (§6).
    pub fn readdir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let ino = self.resolve_cached(path)?;
        let dir_ref = self.inode_ref(ino);
        if dir_ref.read().kind() != Some(FileKind::Directory) {
            return Err(Error::not_dir(path));
        }
        Ok(dir::iter(self.buf(), self.geometry(), &dir_ref))
    }

    // ---- Links & rename -------------------------------------------------

    /// Removes the directory entry `path` and drops the target's link
    /// count, freeing it once it reaches zero (§4.9: directory target ->
    /// `ISDIR`; use [`Self::rmdir`] instead).
    pub fn unlink(&self, path: &str) -> Result<()> {
        let (parent, name) = path::resolve_parent(self.buf(), self.geometry(), path)?;
        let parent_ref = self.inode_ref(parent);
        let entry = dir::lookup(self.buf(), self.geometry(), &parent_ref, name).ok_or_else(|| Error::not_found(path))?;
        let target_ref = self.inode_ref(entry.inode);
        if target_ref.read().kind() == Some(FileKind::Directory) {
            return Err(Error::is_dir(path));
        }

        dir::remove_entry(self.buf(), self.geometry(), &parent_ref, name)?;
        self.drop_link(&target_ref);
        let now = self.now();
        parent_ref.set_mtime(now);
        parent_ref.set_ctime(now);
        self.cache().invalidate_prefix(path);
        Ok(())
    }

    /// Decrements an inode's `nlink`, freeing its blocks and tombstoning it
    /// once the count reaches zero.
    fn drop_link(&self, target_ref: &InodeRef) {
        let nlink = target_ref.read().nlink.saturating_sub(1);
        target_ref.set_nlink(nlink);
        if nlink == 0 {
            crate::blockmap::free_all(self.buf(), self.geometry(), target_ref);
            target_ref.tombstone();
        }
    }

    /// Creates a symlink at `linkpath` whose stored content is `target`
    /// (§4.9: target path exists -> `EXISTS`, parent missing -> `NOT_FOUND`).
    pub fn symlink(&self, target: &str, linkpath: &str) -> Result<()> {
        let (parent, name) = path::resolve_parent(self.buf(), self.geometry(), linkpath)?;
        let parent_ref = self.inode_ref(parent);
        if dir::lookup(self.buf(), self.geometry(), &parent_ref, name).is_some() {
            return Err(Error::exists(linkpath));
        }

        let child = inode_alloc::alloc_inode(self.buf(), self.geometry())?;
        let now = self.now();
        let child_ref = self.inode_ref(child);
        child_ref.write(&InodeRecord {
            mode: S_IFLNK | 0o777,
            nlink: 1,
            uid: 0,
            gid: 0,
            size: 0,
            atime: now,
            mtime: now,
            ctime: now,
            blocks: 0,
            direct: [0; DIRECT_BLOCKS],
            indirect: 0,
            double_indirect: 0,
            flags: 0,
            generation: 0,
        });
        if let Err(e) = crate::blockmap::write_range(self.buf(), self.geometry(), &child_ref, 0, target.as_bytes()) {
            child_ref.tombstone();
            return Err(e);
        }
        child_ref.set_size(target.len() as u64);
        if let Err(e) = dir::add_entry(self.buf(), self.geometry(), &parent_ref, name, child, crate::inode::DT_LNK) {
            crate::blockmap::free_all(self.buf(), self.geometry(), &child_ref);
            child_ref.tombstone();
            return Err(e);
        }
        parent_ref.set_mtime(now);
        parent_ref.set_ctime(now);
        self.cache().invalidate_prefix(linkpath);
        Ok(())
    }

    /// Returns the stored target of the symlink at `path` (§4.9: not a
    /// symlink -> `INVAL`).
    pub fn readlink(&self, path: &str) -> Result<String> {
        let ino = path::lresolve(self.buf(), self.geometry(), path)?;
        let iref = self.inode_ref(ino);
        if iref.read().kind() != Some(FileKind::Symlink) {
            return Err(Error::Inval("not a symbolic link"));
        }
        Ok(path::read_symlink_target(self.buf(), self.geometry(), &iref))
    }

    /// Creates a new name `dst` for the file `src` already names (§9:
    /// directory hard links stay out of scope, so a directory `src` fails
    /// `ISDIR`).
    pub fn link(&self, src: &str, dst: &str) -> Result<()> {
        let src_ino = self.resolve_cached(src)?;
        let src_ref = self.inode_ref(src_ino);
        if src_ref.read().kind() == Some(FileKind::Directory) {
            return Err(Error::is_dir(src));
        }

        let (parent, name) = path::resolve_parent(self.buf(), self.geometry(), dst)?;
        let parent_ref = self.inode_ref(parent);
        if dir::lookup(self.buf(), self.geometry(), &parent_ref, name).is_some() {
            return Err(Error::exists(dst));
        }
        let d_type = src_ref.read().kind().expect("checked above").d_type();
        dir::add_entry(self.buf(), self.geometry(), &parent_ref, name, src_ino, d_type)?;
        src_ref.set_nlink(src_ref.read().nlink + 1);
        let now = self.now();
        parent_ref.set_mtime(now);
        parent_ref.set_ctime(now);
        self.cache().invalidate_prefix(dst);
        Ok(())
    }

    /// Moves the entry at `src` to `dst`, replacing whatever `dst` named
    /// before (§8 P8: within this thread, `src` then resolves `NOT_FOUND`
    /// and `dst` resolves to the moved inode; cross-thread atomicity is not
    /// claimed, per §9).
    pub fn rename(&self, src: &str, dst: &str) -> Result<()> {
        let (src_parent, src_name) = path::resolve_parent(self.buf(), self.geometry(), src)?;
        let src_parent_ref = self.inode_ref(src_parent);
        let src_entry = dir::lookup(self.buf(), self.geometry(), &src_parent_ref, src_name).ok_or_else(|| Error::not_found(src))?;

        let (dst_parent, dst_name) = path::resolve_parent(self.buf(), self.geometry(), dst)?;
        let dst_parent_ref = self.inode_ref(dst_parent);

        if let Some(dst_entry) = dir::lookup(self.buf(), self.geometry(), &dst_parent_ref, dst_name) {
            if dst_entry.inode == src_entry.inode {
                return Ok(());
            }
            let src_ref = self.inode_ref(src_entry.inode);
            let dst_ref = self.inode_ref(dst_entry.inode);
            let src_is_dir = src_ref.read().kind() == Some(FileKind::Directory);
            let dst_is_dir = dst_ref.read().kind() == Some(FileKind::Directory);
            if dst_is_dir && !src_is_dir {
                return Err(Error::is_dir(dst));
            }
            if src_is_dir && !dst_is_dir {
                return Err(Error::not_dir(dst));
            }
            if dst_is_dir && !dir::is_empty(self.buf(), self.geometry(), &dst_ref) {
                return Err(Error::not_empty(dst));
            }

            dir::remove_entry(self.buf(), self.geometry(), &dst_parent_ref, dst_name)?;
            if dst_is_dir {
                // Mirrors rmdir (§4.9): the replaced directory's own "." /
                // ".." content block(s) are reclaimed and it is tombstoned
                // outright, while the *parent*'s nlink drops by one (the
                // link contributed by the removed child's ".." entry), not
                // the child's own nlink.
                crate::blockmap::free_all(self.buf(), self.geometry(), &dst_ref);
                dst_ref.tombstone();
                dst_parent_ref.set_nlink(dst_parent_ref.read().nlink.saturating_sub(1));
            } else {
                self.drop_link(&dst_ref);
            }
        }

        dir::remove_entry(self.buf(), self.geometry(), &src_parent_ref, src_name)?;
        dir::add_entry(self.buf(), self.geometry(), &dst_parent_ref, dst_name, src_entry.inode, src_entry.d_type)?;

        // A moved directory's ".." must follow it to the new parent, and
        // the nlink contribution it makes (via that ".." entry) moves from
        // the old parent to the new one (§3: "nlink incremented by 1 in the
        // parent when a child directory is added, decremented on removal").
        if src_parent != dst_parent && src_entry.d_type == crate::inode::DT_DIR {
            let src_ino_ref = self.inode_ref(src_entry.inode);
            dir::remove_entry(self.buf(), self.geometry(), &src_ino_ref, "..")?;
            dir::add_entry(self.buf(), self.geometry(), &src_ino_ref, "..", dst_parent, crate::inode::DT_DIR)?;
            src_parent_ref.set_nlink(src_parent_ref.read().nlink.saturating_sub(1));
            dst_parent_ref.set_nlink(dst_parent_ref.read().nlink + 1);
        }

        let now = self.now();
        src_parent_ref.set_mtime(now);
        src_parent_ref.set_ctime(now);
        dst_parent_ref.set_mtime(now);
        dst_parent_ref.set_ctime(now);
        self.cache().invalidate_prefix(src);
        self.cache().invalidate_prefix(dst);
        Ok(())
    }

    // ---- Permissions ----------------------------------------------------

    /// Sets the permission bits of `path` (the type bits in `mode` are
    /// preserved regardless of what's passed in).
    pub fn chmod(&self, path: &str, mode: u32) -> Result<()> {
        let ino = self.resolve_cached(path)?;
        let iref = self.inode_ref(ino);
        let current = iref.read().mode;
        iref.set_mode((current & S_IFMT) | (mode & PERM_MASK));
        iref.set_ctime(self.now());
        Ok(())
    }

    /// Sets `uid`/`gid` of `path`; `None` leaves the corresponding field
    /// unchanged (idiomatic stand-in for the source's `-1` sentinel, §6).
    pub fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> Result<()> {
        let ino = self.resolve_cached(path)?;
        let iref = self.inode_ref(ino);
        if let Some(uid) = uid {
            iref.set_uid(uid);
        }
        if let Some(gid) = gid {
            iref.set_gid(gid);
        }
        iref.set_ctime(self.now());
        Ok(())
    }

    /// Sets `atime`/`mtime` of `path` directly, bypassing the clock (§6).
    pub fn utimes(&self, path: &str, atime: u32, mtime: u32) -> Result<()> {
        let ino = self.resolve_cached(path)?;
        let iref = self.inode_ref(ino);
        iref.set_atime(atime);
        iref.set_mtime(mtime);
        iref.set_ctime(self.now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{flags, InitOptions, Sfs, SteppingClock, Whence, BLOCK_SIZE};

    fn fresh() -> Sfs {
        Sfs::initialize(512 * BLOCK_SIZE, InitOptions::default()).unwrap()
    }

    #[test]
    fn scenario_a_create_write_read_back() {
        let fs = fresh();
        fs.mkdir("/etc", 0o755).unwrap();
        let fd = fs.open("/etc/hostname", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        assert!(fd >= 3);
        assert_eq!(fs.write(fd, b"hello\n").unwrap(), 6);
        fs.close(fd).unwrap();

        let st = fs.stat("/etc/hostname").unwrap();
        assert_eq!(st.size, 6);
        assert_eq!(st.mode & 0o7777, 0o644);

        let fd2 = fs.open("/etc/hostname", flags::O_RDONLY, 0).unwrap();
        let mut buf = [0u8; 16];
        let n = fs.read(fd2, &mut buf).unwrap();
        assert_eq!(n, 6);
        assert_eq!(&buf[..6], b"hello\n");
    }

    #[test]
    fn scenario_b_symlink_follow_and_lresolve() {
        let fs = fresh();
        fs.mkdir("/etc", 0o755).unwrap();
        let fd = fs.open("/etc/hostname", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        fs.write(fd, b"hello\n").unwrap();
        fs.close(fd).unwrap();

        fs.symlink("/etc/hostname", "/hn").unwrap();
        assert_eq!(fs.stat("/hn").unwrap().size, 6);
        assert!(fs.lstat("/hn").unwrap().mode & crate::inode::S_IFMT == crate::inode::S_IFLNK);
        assert_eq!(fs.readlink("/hn").unwrap(), "/etc/hostname");

        assert!(fs.open("/hn", flags::O_NOFOLLOW | flags::O_RDONLY, 0).is_err());
    }

    #[test]
    fn relative_symlink_target_resolves_against_its_own_parent() {
        let fs = fresh();
        fs.mkdir("/etc", 0o755).unwrap();
        let fd = fs.open("/etc/hostname", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        fs.write(fd, b"hello\n").unwrap();
        fs.close(fd).unwrap();

        // A relative target is resolved against the directory the symlink
        // itself lives in, not against root and not against the caller's cwd.
        fs.symlink("hostname", "/etc/hn").unwrap();
        assert_eq!(fs.stat("/etc/hn").unwrap().size, 6);
        assert_eq!(fs.readlink("/etc/hn").unwrap(), "hostname");

        fs.mkdir("/etc/sub", 0o755).unwrap();
        fs.symlink("../hostname", "/etc/sub/hn").unwrap();
        assert_eq!(fs.stat("/etc/sub/hn").unwrap().size, 6);
    }

    #[test]
    fn scenario_c_sparse_hole() {
        let fs = fresh();
        let fd = fs.open("/sparse", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        assert_eq!(fs.lseek(fd, 10 * BLOCK_SIZE as i64, Whence::Set).unwrap(), 10 * BLOCK_SIZE as u64);
        fs.write(fd, b"x").unwrap();
        fs.close(fd).unwrap();

        let st = fs.stat("/sparse").unwrap();
        assert_eq!(st.size, 10 * BLOCK_SIZE as u64 + 1);
        assert_eq!(st.blocks, 1);

        let fd2 = fs.open("/sparse", flags::O_RDONLY, 0).unwrap();
        let mut buf = [0xffu8; BLOCK_SIZE];
        let n = fs.pread(fd2, &mut buf, 0).unwrap();
        assert_eq!(n, BLOCK_SIZE);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn scenario_d_rename_shadows_and_unlink() {
        let fs = fresh();
        let fd_a = fs.open("/a", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        fs.close(fd_a).unwrap();
        let fd_b = fs.open("/b", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        fs.close(fd_b).unwrap();

        fs.rename("/a", "/b").unwrap();
        assert!(fs.stat("/a").is_err());
        assert!(fs.stat("/b").is_ok());
    }

    #[test]
    fn scenario_f_capacity_exhaustion_then_unlink_frees() {
        let fs = Sfs::initialize(16 * BLOCK_SIZE, InitOptions::default()).unwrap();
        let fd = fs.open("/big", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        let chunk = vec![0xabu8; BLOCK_SIZE];
        let mut written_blocks = 0;
        loop {
            match fs.write(fd, &chunk) {
                Ok(_) => written_blocks += 1,
                Err(_) => break,
            }
        }
        fs.close(fd).unwrap();
        assert!(written_blocks > 0);
        let before = fs.statfs().unwrap().free_blocks;
        assert_eq!(before, 0);

        fs.unlink("/big").unwrap();
        let after = fs.statfs().unwrap().free_blocks;
        assert!(after > before);
    }

    #[test]
    fn rmdir_rejects_root_and_non_empty() {
        let fs = fresh();
        assert!(fs.rmdir("/").is_err());
        fs.mkdir("/d", 0o755).unwrap();
        fs.mkdir("/d/child", 0o755).unwrap();
        assert!(fs.rmdir("/d").is_err());
        fs.rmdir("/d/child").unwrap();
        fs.rmdir("/d").unwrap();
    }

    #[test]
    fn truncate_shrinks_and_frees_blocks() {
        let fs = fresh();
        let fd = fs.open("/f", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        let data = vec![1u8; 4 * BLOCK_SIZE];
        fs.write(fd, &data).unwrap();
        fs.close(fd).unwrap();

        let before = fs.statfs().unwrap().free_blocks;
        fs.truncate("/f", 0).unwrap();
        let after = fs.statfs().unwrap().free_blocks;
        assert!(after > before);
        assert_eq!(fs.stat("/f").unwrap().size, 0);
    }

    #[test]
    fn link_increments_nlink_and_shares_content() {
        let fs = fresh();
        let fd = fs.open("/f", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        fs.write(fd, b"shared").unwrap();
        fs.close(fd).unwrap();

        fs.link("/f", "/g").unwrap();
        assert_eq!(fs.stat("/f").unwrap().nlink, 2);
        assert_eq!(fs.stat("/g").unwrap().size, 6);

        fs.unlink("/f").unwrap();
        assert_eq!(fs.stat("/g").unwrap().nlink, 1);
        assert!(fs.stat("/f").is_err());
    }

    #[test]
    fn symlink_and_link_refresh_the_parent_directorys_mtime() {
        let fs = Sfs::initialize_with_clock(512 * BLOCK_SIZE, InitOptions::default(), Box::new(SteppingClock::starting_at(1000))).unwrap();
        fs.mkdir("/d", 0o755).unwrap();
        let fd = fs.open("/d/a", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        fs.close(fd).unwrap();

        let mtime_before = fs.stat("/d").unwrap().mtime;
        fs.symlink("a", "/d/l").unwrap();
        assert!(fs.stat("/d").unwrap().mtime > mtime_before, "symlink must refresh its parent's mtime");

        let mtime_before = fs.stat("/d").unwrap().mtime;
        fs.link("/d/a", "/d/b").unwrap();
        assert!(fs.stat("/d").unwrap().mtime > mtime_before, "link must refresh its destination parent's mtime");
    }

    #[test]
    fn open_creat_excl_rejects_existing() {
        let fs = fresh();
        let fd = fs.open("/f", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        fs.close(fd).unwrap();
        assert!(fs.open("/f", flags::O_CREAT | flags::O_EXCL | flags::O_WRONLY, 0o644).is_err());
    }

    #[test]
    fn readdir_lists_created_entries() {
        let fs = fresh();
        fs.mkdir("/d", 0o755).unwrap();
        let fd = fs.open("/d/a", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        fs.close(fd).unwrap();
        let entries = fs.readdir("/d").unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"."));
        assert!(names.contains(&".."));
        assert!(names.contains(&"a"));
    }

    #[test]
    fn chmod_is_idempotent() {
        let fs = fresh();
        let fd = fs.open("/f", flags::O_CREAT | flags::O_WRONLY, 0o600).unwrap();
        fs.close(fd).unwrap();
        fs.chmod("/f", 0o640).unwrap();
        let once = fs.stat("/f").unwrap().mode;
        fs.chmod("/f", 0o640).unwrap();
        let twice = fs.stat("/f").unwrap().mode;
        assert_eq!(once, twice);
    }

    #[test]
    fn chown_updates_only_the_requested_field() {
        let fs = fresh();
        let fd = fs.open("/f", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        fs.close(fd).unwrap();

        fs.chown("/f", Some(1000), Some(1000)).unwrap();
        let st = fs.stat("/f").unwrap();
        assert_eq!((st.uid, st.gid), (1000, 1000));

        fs.chown("/f", Some(2000), None).unwrap();
        let st = fs.stat("/f").unwrap();
        assert_eq!((st.uid, st.gid), (2000, 1000), "gid must be left untouched when None is passed");
    }

    #[test]
    fn utimes_sets_atime_and_mtime_directly() {
        let fs = fresh();
        let fd = fs.open("/f", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        fs.close(fd).unwrap();

        fs.utimes("/f", 111, 222).unwrap();
        let st = fs.stat("/f").unwrap();
        assert_eq!((st.atime, st.mtime), (111, 222));
    }

    #[test]
    fn rename_onto_an_existing_directory_replaces_it() {
        let fs = fresh();
        fs.mkdir("/a", 0o755).unwrap();
        fs.mkdir("/b", 0o755).unwrap();
        fs.rename("/a", "/b").unwrap();
        assert!(fs.stat("/a").is_err());
        assert!(fs.stat("/b").unwrap().nlink >= 2);
    }

    #[test]
    fn unlink_on_a_directory_is_rejected() {
        let fs = fresh();
        fs.mkdir("/d", 0o755).unwrap();
        assert!(fs.unlink("/d").is_err());
    }

    #[test]
    fn rmdir_frees_the_removed_directorys_own_block() {
        let fs = fresh();
        let before = fs.statfs().unwrap().free_blocks;
        fs.mkdir("/d", 0o755).unwrap();
        assert_eq!(fs.statfs().unwrap().free_blocks, before - 1, "init_empty allocates one block for . and ..");
        fs.rmdir("/d").unwrap();
        assert_eq!(fs.statfs().unwrap().free_blocks, before, "rmdir must reclaim the directory's own content block");
    }

    #[test]
    fn rename_moving_a_directory_across_parents_updates_dotdot_and_nlink() {
        let fs = fresh();
        fs.mkdir("/src", 0o755).unwrap();
        fs.mkdir("/dst", 0o755).unwrap();
        fs.mkdir("/src/child", 0o755).unwrap();

        let src_nlink_before = fs.stat("/src").unwrap().nlink;
        let dst_nlink_before = fs.stat("/dst").unwrap().nlink;

        fs.rename("/src/child", "/dst/child").unwrap();

        assert!(fs.stat("/src/child").is_err());
        assert!(fs.stat("/dst/child").is_ok());
        assert_eq!(fs.stat("/src").unwrap().nlink, src_nlink_before - 1);
        assert_eq!(fs.stat("/dst").unwrap().nlink, dst_nlink_before + 1);

        // ".." inside the moved directory must now resolve to its new parent.
        fs.mkdir("/dst/child/grandchild", 0o755).unwrap();
        let entries = fs.readdir("/dst/child/grandchild").unwrap();
        let dotdot = entries.iter().find(|e| e.name == "..").unwrap();
        assert_eq!(dotdot.inode, fs.stat("/dst/child").unwrap().ino);
    }

    #[test]
    fn rename_onto_nonempty_directory_fails() {
        let fs = fresh();
        fs.mkdir("/a", 0o755).unwrap();
        fs.mkdir("/b", 0o755).unwrap();
        fs.mkdir("/b/occupied", 0o755).unwrap();
        assert!(fs.rename("/a", "/b").is_err());
    }

    #[test]
    fn statfs_reports_decreasing_free_inodes_as_they_are_consumed() {
        let fs = Sfs::initialize(64 * BLOCK_SIZE, InitOptions { inode_count: Some(8) }).unwrap();
        let before = fs.statfs().unwrap().free_inodes;
        let fd = fs.open("/f", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        fs.close(fd).unwrap();
        let after = fs.statfs().unwrap().free_inodes;
        assert_eq!(after, before - 1);
    }
}
