//! Virtual filesystem boundary
//!
//! The filesystem implementations live elsewhere; what the core kernel
//! needs from them is the handle table and the readiness interface that
//! `select()` multiplexes over: per-kind condition variables plus a
//! non-blocking "would an operation make progress right now" predicate.

pub mod pipe;

pub use pipe::Pipe;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use spin::RwLock;

use crate::sched::CondVar;

/// Size of the per-process file descriptor table.
pub const MAX_HANDLES: usize = 64;

/// The three readiness kinds `select()` distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollKind {
    /// A read would not block.
    Read,
    /// A write would not block.
    Write,
    /// An exceptional condition is pending.
    Except,
}

impl PollKind {
    /// All kinds, in read/write/except order (the `select()` set order).
    pub const ALL: [PollKind; 3] = [PollKind::Read, PollKind::Write, PollKind::Except];
}

/// Filesystem errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsError {
    /// Operation would block on a non-blocking handle
    WouldBlock,
    /// Writing to a stream with no readers
    BrokenPipe,
    /// No free slot in the handle table
    TooManyFiles,
    /// Invalid argument
    InvalidArgument,
    /// Operation not supported by this file type
    NotSupported,
}

bitflags::bitflags! {
    /// Access flags recorded per open handle.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Read access
        const READ = 1 << 0;
        /// Write access
        const WRITE = 1 << 1;
        /// Non-blocking mode
        const NONBLOCK = 1 << 2;
    }
}

/// Operations a file object provides to the core kernel.
///
/// The two `poll_*` methods drive `select()`: `poll_cond` hands out the
/// condition variable signaled when readiness of that kind may have
/// changed (or `None` if the file type has no blocking readiness, in which
/// case it is only ever polled), and `poll_ready` answers whether the
/// operation would make progress right now.
pub trait FileOps: Send + Sync {
    /// Condition variable for `kind`, if the file supports one.
    fn poll_cond(&self, kind: PollKind) -> Option<Arc<CondVar>> {
        let _ = kind;
        None
    }

    /// Whether a non-blocking operation of `kind` would make progress.
    fn poll_ready(&self, kind: PollKind) -> bool {
        let _ = kind;
        false
    }

    /// Read into `buf`, without blocking.
    fn read(&self, buf: &mut [u8]) -> Result<usize, FsError> {
        let _ = buf;
        Err(FsError::NotSupported)
    }

    /// Write `buf`, without blocking.
    fn write(&self, buf: &[u8]) -> Result<usize, FsError> {
        let _ = buf;
        Err(FsError::NotSupported)
    }
}

struct HandleEntry {
    file: Arc<dyn FileOps>,
    flags: OpenFlags,
}

/// A per-process table mapping small integer descriptors to file objects.
pub struct HandleTable {
    entries: RwLock<BTreeMap<u32, HandleEntry>>,
}

impl HandleTable {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    /// Install `file` at the lowest free descriptor.
    pub fn install(&self, file: Arc<dyn FileOps>, flags: OpenFlags) -> Result<u32, FsError> {
        let mut entries = self.entries.write();

        let fd = (0..MAX_HANDLES as u32)
            .find(|fd| !entries.contains_key(fd))
            .ok_or(FsError::TooManyFiles)?;

        entries.insert(fd, HandleEntry { file, flags });
        Ok(fd)
    }

    /// Install `file` at a specific descriptor, replacing any previous one.
    pub fn install_at(
        &self,
        fd: u32,
        file: Arc<dyn FileOps>,
        flags: OpenFlags,
    ) -> Result<(), FsError> {
        if fd as usize >= MAX_HANDLES {
            return Err(FsError::InvalidArgument);
        }

        self.entries.write().insert(fd, HandleEntry { file, flags });
        Ok(())
    }

    /// Resolve a descriptor to its file object.
    pub fn get(&self, fd: u32) -> Option<Arc<dyn FileOps>> {
        self.entries.read().get(&fd).map(|e| e.file.clone())
    }

    /// Access flags recorded for a descriptor.
    pub fn flags(&self, fd: u32) -> Option<OpenFlags> {
        self.entries.read().get(&fd).map(|e| e.flags)
    }

    /// Remove a descriptor.
    pub fn close(&self, fd: u32) -> Result<(), FsError> {
        self.entries
            .write()
            .remove(&fd)
            .map(|_| ())
            .ok_or(FsError::InvalidArgument)
    }

    /// Number of open descriptors.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The handle table of the current process.
///
/// Process management is external to this crate; a single ambient table
/// stands in for "the current process" at the syscall boundary.
static HANDLES: HandleTable = HandleTable::new();

/// The current process's handle table.
pub fn handles() -> &'static HandleTable {
    &HANDLES
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullFile;

    impl FileOps for NullFile {}

    #[test]
    fn test_install_allocates_lowest_fd() {
        let table = HandleTable::new();

        let a = table.install(Arc::new(NullFile), OpenFlags::READ).unwrap();
        let b = table.install(Arc::new(NullFile), OpenFlags::WRITE).unwrap();
        assert_eq!((a, b), (0, 1));

        table.close(0).unwrap();
        let c = table.install(Arc::new(NullFile), OpenFlags::READ).unwrap();
        assert_eq!(c, 0);
    }

    #[test]
    fn test_table_full() {
        let table = HandleTable::new();

        for _ in 0..MAX_HANDLES {
            table.install(Arc::new(NullFile), OpenFlags::READ).unwrap();
        }

        assert_eq!(
            table.install(Arc::new(NullFile), OpenFlags::READ).err(),
            Some(FsError::TooManyFiles)
        );
    }

    #[test]
    fn test_get_and_flags() {
        let table = HandleTable::new();
        let fd = table
            .install(Arc::new(NullFile), OpenFlags::READ | OpenFlags::NONBLOCK)
            .unwrap();

        assert!(table.get(fd).is_some());
        assert_eq!(table.flags(fd), Some(OpenFlags::READ | OpenFlags::NONBLOCK));
        assert!(table.get(99).is_none());
    }

    #[test]
    fn test_close_unknown_fd() {
        let table = HandleTable::new();
        assert_eq!(table.close(3), Err(FsError::InvalidArgument));
    }

    #[test]
    fn test_install_at_bounds() {
        let table = HandleTable::new();

        assert!(table
            .install_at(MAX_HANDLES as u32 - 1, Arc::new(NullFile), OpenFlags::READ)
            .is_ok());
        assert_eq!(
            table
                .install_at(MAX_HANDLES as u32, Arc::new(NullFile), OpenFlags::READ)
                .err(),
            Some(FsError::InvalidArgument)
        );
    }

    #[test]
    fn test_default_fileops_never_ready() {
        let f = NullFile;
        for kind in PollKind::ALL {
            assert!(f.poll_cond(kind).is_none());
            assert!(!f.poll_ready(kind));
        }
    }
}
