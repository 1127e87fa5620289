//! Path splitting and symlink-following resolution.
//!
//! The component iterator is grounded on the teacher's `Path`/`Components`
//! (`src/file/path.rs`): the same `RootDir`/`CurDir`/`ParentDir`/`Normal`
//! shape, reimplemented over an owned `&str` (this crate's buffer is plain
//! UTF-8 names, not the source's raw-byte `[u8]` path type) since the
//! teacher's own `Components` iterator is, at the retrieved revision,
//! unfinished (`next`/`next_back`/`parent`/`FromIterator` are all `todo!()`
//! there). Resolution itself (walking components through `dir::lookup`,
//! following symlinks with a depth budget) has no teacher counterpart —
//! maestro resolves paths in its VFS layer, outside the retrieved ext2
//! module — and is built from this design's own §4.6 here.

use crate::blockmap;
use crate::buffer::SharedBuffer;
use crate::dir;
use crate::error::{Error, Result};
use crate::inode::{FileKind, InodeRef};
use crate::layout::{Geometry, DEFAULT_SYMLINK_DEPTH, ROOT_INODE};

/// One component of a split path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Component<'a> {
    CurDir,
    ParentDir,
    Normal(&'a str),
}

/// Splits `path` into components. `path` must be absolute (start with
/// `/`); relative paths are rejected with [`Error::Inval`] per §6 ("every
/// path argument is absolute").
pub(crate) fn split(path: &str) -> Result<Vec<Component<'_>>> {
    if !path.starts_with('/') {
        return Err(Error::Inval("path must be absolute"));
    }
    split_components(path)
}

/// Splits `path` into components without requiring a leading `/`. Used for
/// the public, absolute-only [`split`] (after it has checked the leading
/// slash itself) and for a relative symlink target, which §4.6 resolves
/// against the symlink's own parent directory rather than the root.
fn split_components(path: &str) -> Result<Vec<Component<'_>>> {
    let mut out = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => out.push(Component::ParentDir),
            name => {
                if name.len() > crate::layout::MAX_NAME_LEN {
                    return Err(Error::Inval("path component too long"));
                }
                out.push(Component::Normal(name));
            }
        }
    }
    Ok(out)
}

/// Resolves `path` to an inode number, following symlinks encountered at
/// any component including the last one.
pub(crate) fn resolve(buf: &SharedBuffer, geometry: &Geometry, path: &str) -> Result<u32> {
    resolve_inner(buf, geometry, path, true)
}

/// Resolves `path` to an inode number like [`resolve`], but if the final
/// component is itself a symlink, returns it unfollowed (the `lstat`/
/// `unlink`/`readlink`/`rename` behavior, §6).
pub(crate) fn lresolve(buf: &SharedBuffer, geometry: &Geometry, path: &str) -> Result<u32> {
    resolve_inner(buf, geometry, path, false)
}

fn resolve_inner(buf: &SharedBuffer, geometry: &Geometry, path: &str, follow_last: bool) -> Result<u32> {
    let components = split(path)?;
    let mut budget = DEFAULT_SYMLINK_DEPTH;
    let inode = resolve_components(buf, geometry, ROOT_INODE, &components, follow_last, &mut budget, path)?;
    Ok(inode)
}

fn resolve_components(
    buf: &SharedBuffer,
    geometry: &Geometry,
    start: u32,
    components: &[Component],
    follow_last: bool,
    budget: &mut u32,
    original_path: &str,
) -> Result<u32> {
    let mut current = start;
    for (i, component) in components.iter().enumerate() {
        let is_last = i + 1 == components.len();
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let dir_inode = InodeRef::at(buf, geometry, current);
                let rec = dir_inode.read();
                if rec.kind() != Some(FileKind::Directory) {
                    return Err(Error::not_dir(original_path));
                }
                let entry = dir::lookup(buf, geometry, &dir_inode, "..")
                    .ok_or_else(|| Error::not_found(original_path))?;
                current = entry.inode;
            }
            Component::Normal(name) => {
                let dir_inode = InodeRef::at(buf, geometry, current);
                let rec = dir_inode.read();
                if rec.kind() != Some(FileKind::Directory) {
                    return Err(Error::not_dir(original_path));
                }
                // The directory this component was looked up in is the
                // "parent path" a relative symlink target below must be
                // resolved against (§4.6).
                let parent = current;
                let entry = dir::lookup(buf, geometry, &dir_inode, name)
                    .ok_or_else(|| Error::not_found(original_path))?;
                current = entry.inode;

                let should_follow = !is_last || follow_last;
                if should_follow {
                    let target_inode = InodeRef::at(buf, geometry, current);
                    if target_inode.read().kind() == Some(FileKind::Symlink) {
                        if *budget == 0 {
                            return Err(Error::loop_detected(original_path));
                        }
                        *budget -= 1;
                        let target = read_symlink_target(buf, geometry, &target_inode);
                        // An absolute target restarts resolution from root;
                        // a relative one is concatenated onto the symlink's
                        // own parent directory and re-resolved from there
                        // (§4.6), not from root.
                        let (restart, target_components) = match target.strip_prefix('/') {
                            Some(rest) => (ROOT_INODE, split_components(rest)?),
                            None => (parent, split_components(&target)?),
                        };
                        current = resolve_components(
                            buf,
                            geometry,
                            restart,
                            &target_components,
                            true,
                            budget,
                            original_path,
                        )?;
                    }
                }
            }
        }
    }
    Ok(current)
}

/// Resolves `path` to the inode number of its parent directory and the
/// final component's name, without resolving the final component itself.
/// Used by operations that create or remove a name (`mkdir`, `unlink`,
/// `symlink`, `link`, `rename`).
pub(crate) fn resolve_parent<'a>(
    buf: &SharedBuffer,
    geometry: &Geometry,
    path: &'a str,
) -> Result<(u32, &'a str)> {
    let components = split(path)?;
    let Some((last, parent_components)) = components.split_last() else {
        return Err(Error::Inval("path has no final component"));
    };
    let Component::Normal(name) = last else {
        return Err(Error::Inval("final path component must be a name"));
    };
    let mut budget = DEFAULT_SYMLINK_DEPTH;
    let parent = resolve_components(buf, geometry, ROOT_INODE, parent_components, true, &mut budget, path)?;
    Ok((parent, name))
}

/// Reads a symlink's stored target out of its content blocks.
pub(crate) fn read_symlink_target(buf: &SharedBuffer, geometry: &Geometry, inode: &InodeRef) -> String {
    let rec = inode.read();
    let mut bytes = vec![0u8; rec.size as usize];
    blockmap::read_range(buf, geometry, inode, 0, &mut bytes);
    String::from_utf8_lossy(&bytes).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_paths() {
        assert!(split("etc/passwd").is_err());
    }

    #[test]
    fn splits_normal_components() {
        let parts = split("/etc/passwd").unwrap();
        assert_eq!(parts, vec![Component::Normal("etc"), Component::Normal("passwd")]);
    }

    #[test]
    fn collapses_curdir_and_keeps_parentdir() {
        let parts = split("/a/./../a/b").unwrap();
        assert_eq!(
            parts,
            vec![
                Component::Normal("a"),
                Component::ParentDir,
                Component::Normal("a"),
                Component::Normal("b"),
            ]
        );
    }

    #[test]
    fn root_resolves_to_root_inode() {
        let buf = SharedBuffer::new_zeroed(64 * crate::layout::BLOCK_SIZE);
        let geometry = crate::layout::initialize(&buf, crate::layout::InitOptions::default()).unwrap();
        let root = InodeRef::at(&buf, &geometry, ROOT_INODE);
        root.set_mode(crate::inode::S_IFDIR | 0o755);
        dir::init_empty(&buf, &geometry, &root, ROOT_INODE, ROOT_INODE).unwrap();

        assert_eq!(resolve(&buf, &geometry, "/").unwrap(), ROOT_INODE);
        assert_eq!(resolve(&buf, &geometry, "/.").unwrap(), ROOT_INODE);
    }
}
