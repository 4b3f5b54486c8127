//! Purpose: Advisory whole-file locking for queue files.
//! Exports: `lock_file`, `try_lock_file`, `unlock_file`, `QueueGuard`.
//! Role: Lock Manager; cooperative exclusion between queue instances sharing a path.
//! Invariants: Locks are tied to the open file handle and released when it closes.
//! Invariants: A `QueueGuard` releases its lock on every exit path, unwinding included.
use std::fs::File;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use fs2::FileExt;
use libc::{EACCES, EPERM};

use crate::core::error::{Error, ErrorKind};
use crate::core::queue::Queue;

pub(crate) fn lock_file(file: &File, path: &Path) -> Result<(), Error> {
    file.lock_exclusive().map_err(|err| lock_error(err, path))
}

pub(crate) fn try_lock_file(file: &File, path: &Path) -> Result<(), Error> {
    file.try_lock_exclusive().map_err(|err| lock_error(err, path))
}

pub(crate) fn unlock_file(file: &File, path: &Path) -> Result<(), Error> {
    FileExt::unlock(file).map_err(|err| lock_error(err, path))
}

fn lock_error(err: io::Error, path: &Path) -> Error {
    let kind = lock_error_kind(&err);
    let error = Error::new(kind).with_path(path);
    let error = if kind == ErrorKind::Busy {
        error.with_message("queue is locked by another holder")
    } else {
        error
    };
    error.with_source(err)
}

fn lock_error_kind(err: &io::Error) -> ErrorKind {
    let errno = err.raw_os_error().unwrap_or_default();
    if errno == EACCES || errno == EPERM {
        return ErrorKind::Permission;
    }
    if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() {
        return ErrorKind::Busy;
    }
    match err.kind() {
        io::ErrorKind::WouldBlock => ErrorKind::Busy,
        io::ErrorKind::PermissionDenied => ErrorKind::Permission,
        _ => ErrorKind::Io,
    }
}

/// Exclusive access to a queue for a compound operation.
///
/// Dereferences to the locked [`Queue`]; dropping the guard releases the lock.
pub struct QueueGuard<'a> {
    queue: &'a mut Queue,
}

impl<'a> QueueGuard<'a> {
    pub(crate) fn new(queue: &'a mut Queue) -> Self {
        Self { queue }
    }
}

impl Deref for QueueGuard<'_> {
    type Target = Queue;

    fn deref(&self) -> &Queue {
        &*self.queue
    }
}

impl DerefMut for QueueGuard<'_> {
    fn deref_mut(&mut self) -> &mut Queue {
        &mut *self.queue
    }
}

impl Drop for QueueGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.queue.unlock() {
            tracing::warn!(
                path = %self.queue.path().display(),
                error = %err,
                "failed to release queue lock"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::lock_error_kind;
    use crate::core::error::ErrorKind;

    #[test]
    fn lock_errors_map_to_expected_kinds() {
        let err = std::io::Error::from_raw_os_error(libc::EAGAIN);
        assert_eq!(lock_error_kind(&err), ErrorKind::Busy);

        let err = std::io::Error::from_raw_os_error(libc::EWOULDBLOCK);
        assert_eq!(lock_error_kind(&err), ErrorKind::Busy);

        let err = std::io::Error::from_raw_os_error(libc::EACCES);
        assert_eq!(lock_error_kind(&err), ErrorKind::Permission);

        let err = std::io::Error::from_raw_os_error(libc::EPERM);
        assert_eq!(lock_error_kind(&err), ErrorKind::Permission);

        let err = std::io::Error::from_raw_os_error(libc::EBADF);
        assert_eq!(lock_error_kind(&err), ErrorKind::Io);
    }
}
