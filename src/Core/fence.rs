// Owned fence descriptors (sync_file, eventfd, or anything that polls readable when signalled)

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// A fence descriptor owned by this process, or the explicit "no fence" value.
///
/// A fence is signalled when its descriptor polls readable. GPU drivers hand
/// out sync_file descriptors; software producers can use [`LocalFence::eventfd`].
#[derive(Debug, Default)]
pub struct LocalFence {
    fd: Option<OwnedFd>,
}

impl LocalFence {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd: Some(fd) }
    }

    /// The "no fence" value: nothing to wait on.
    pub fn invalid() -> Self {
        Self { fd: None }
    }

    /// Create an unsignalled software fence backed by an eventfd.
    pub fn eventfd() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: eventfd returned a fresh descriptor that nobody else owns.
        Ok(Self::new(unsafe { OwnedFd::from_raw_fd(fd) }))
    }

    pub fn is_valid(&self) -> bool {
        self.fd.is_some()
    }

    /// Raw descriptor number, or -1 for the "no fence" value.
    pub fn raw(&self) -> RawFd {
        self.fd.as_ref().map_or(-1, |fd| fd.as_raw_fd())
    }

    pub fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd())
    }

    /// Duplicate the descriptor so the copy can outlive this fence.
    pub fn duplicate(&self) -> io::Result<Self> {
        match &self.fd {
            Some(fd) => Ok(Self::new(fd.try_clone()?)),
            None => Ok(Self::invalid()),
        }
    }

    /// Whether both values name the same fence: the same open file
    /// description, however many descriptors point at it. Two invalid
    /// fences are the same.
    pub fn is_same_as(&self, other: &LocalFence) -> bool {
        match (self.as_fd(), other.as_fd()) {
            (None, None) => true,
            (Some(a), Some(b)) => same_open_file(a, b),
            _ => false,
        }
    }

    /// Signal an eventfd-backed fence. Signalling other fence kinds fails
    /// with the OS error.
    pub fn signal(&self) -> io::Result<()> {
        let fd = self.fd.as_ref().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "cannot signal an invalid fence")
        })?;

        let value: u64 = 1;
        let written = unsafe {
            libc::write(
                fd.as_raw_fd(),
                (&value as *const u64).cast::<libc::c_void>(),
                std::mem::size_of::<u64>(),
            )
        };
        if written < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// `kcmp(2)` type comparing two descriptors' open file descriptions.
const KCMP_FILE: libc::c_int = 0;

/// Whether `a` and `b` refer to the same open file description. Descriptor
/// numbers are not enough: the kernel reuses a closed number for the next
/// open, and a `dup` gets a new number for the same file. Answers `false`
/// if the kernel cannot tell.
pub fn same_open_file(a: BorrowedFd<'_>, b: BorrowedFd<'_>) -> bool {
    let pid = unsafe { libc::getpid() };
    let rc = unsafe {
        libc::syscall(
            libc::SYS_kcmp,
            pid,
            pid,
            KCMP_FILE,
            a.as_raw_fd() as libc::c_ulong,
            b.as_raw_fd() as libc::c_ulong,
        )
    };
    if rc < 0 {
        tracing::debug!(
            "same_open_file: kcmp failed, treating descriptors as different: {}",
            io::Error::last_os_error()
        );
    }
    rc == 0
}

impl From<OwnedFd> for LocalFence {
    fn from(fd: OwnedFd) -> Self {
        Self::new(fd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_fence_has_no_descriptor() {
        let fence = LocalFence::invalid();
        assert!(!fence.is_valid());
        assert_eq!(fence.raw(), -1);
        assert!(fence.as_fd().is_none());
        assert!(!fence.duplicate().unwrap().is_valid());
    }

    #[test]
    fn duplicate_is_a_distinct_descriptor() {
        let fence = LocalFence::eventfd().unwrap();
        let copy = fence.duplicate().unwrap();
        assert!(copy.is_valid());
        assert_ne!(fence.raw(), copy.raw());
    }

    #[test]
    fn identity_follows_the_open_file() {
        let fence = LocalFence::eventfd().unwrap();
        let other = LocalFence::eventfd().unwrap();
        assert!(fence.is_same_as(&fence.duplicate().unwrap()));
        assert!(!fence.is_same_as(&other));
        assert!(!fence.is_same_as(&LocalFence::invalid()));
        assert!(LocalFence::invalid().is_same_as(&LocalFence::invalid()));
    }

    #[test]
    fn reused_descriptor_number_is_a_different_fence() {
        let fence = LocalFence::eventfd().unwrap();
        let kept = fence.duplicate().unwrap();
        let other = LocalFence::eventfd().unwrap();
        // Point fence's number at other's file, as a close+open would
        assert!(unsafe { libc::dup2(other.raw(), fence.raw()) } >= 0);
        assert!(!fence.is_same_as(&kept));
        assert!(fence.is_same_as(&other));
    }

    #[test]
    fn signal_requires_a_descriptor() {
        assert!(LocalFence::invalid().signal().is_err());
        assert!(LocalFence::eventfd().unwrap().signal().is_ok());
    }
}
