//! Error taxonomy shared by every operation exposed on [`crate::Sfs`].
//!
//! Every public operation returns either a success value or exactly one of
//! these kinds; there are no partial successes and no implicit retries.
//! Allocator CAS loops are internal and never surface here.

use std::fmt;

/// A path, kept around for error messages only.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PathBuf(pub(crate) String);

impl fmt::Display for PathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The error kinds a filesystem operation can fail with.
///
/// Each variant corresponds to one row of the failure-semantics table; no
/// operation returns more than one of these per call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A path component is absent.
    #[error("no such file or directory: {0}")]
    NotFound(PathBuf),

    /// Target exists when it must not (e.g. `O_EXCL`, `mkdir`, `link`, `symlink`).
    #[error("file exists: {0}")]
    Exists(PathBuf),

    /// A directory was used where a file was expected.
    #[error("is a directory: {0}")]
    IsDir(PathBuf),

    /// A file was used where a directory was expected.
    #[error("not a directory: {0}")]
    NotDir(PathBuf),

    /// No free inode or no free data block remains.
    #[error("no space left on device")]
    NoSpace,

    /// Malformed inputs: name too long, zero-length path, bad descriptor,
    /// bad whence, relative path, opening a symlink without following it.
    #[error("invalid argument: {0}")]
    Inval(&'static str),

    /// Symlink resolution exceeded the depth cap or formed a cycle.
    #[error("too many levels of symbolic links: {0}")]
    Loop(PathBuf),

    /// `rmdir` on a non-empty directory.
    #[error("directory not empty: {0}")]
    NotEmpty(PathBuf),
}

/// Shorthand for `Result<T, Error>`, used by every operation in this crate.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    pub(crate) fn not_found(path: &str) -> Self {
        Self::NotFound(PathBuf(path.to_string()))
    }

    pub(crate) fn exists(path: &str) -> Self {
        Self::Exists(PathBuf(path.to_string()))
    }

    pub(crate) fn is_dir(path: &str) -> Self {
        Self::IsDir(PathBuf(path.to_string()))
    }

    pub(crate) fn not_dir(path: &str) -> Self {
        Self::NotDir(PathBuf(path.to_string()))
    }

    pub(crate) fn loop_detected(path: &str) -> Self {
        Self::Loop(PathBuf(path.to_string()))
    }

    pub(crate) fn not_empty(path: &str) -> Self {
        Self::NotEmpty(PathBuf(path.to_string()))
    }
}
