// Readiness sets: many fence descriptors folded into one waitable descriptor

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

/// A readiness event reported by [`FenceMultiplexer::wait`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadyEvent {
    /// The key the descriptor was registered with.
    pub key: u64,
    /// Raw readiness flags (`EPOLLIN`, `EPOLLERR`, ...).
    pub events: u32,
}

/// Aggregates fence descriptors into a single event source.
///
/// Registered descriptors are watched for readability, which is how
/// sync_file and eventfd fences report completion. Each registration carries
/// a caller-chosen key that is handed back when that descriptor fires.
pub trait FenceMultiplexer {
    /// Watch `fence`, reporting `key` when it signals.
    fn add(&self, fence: BorrowedFd<'_>, key: u64) -> io::Result<()>;

    /// Stop watching `fence`.
    fn remove(&self, fence: BorrowedFd<'_>) -> io::Result<()>;

    /// Wait up to `timeout_ms` (0 = check, negative = forever) and fill
    /// `events` with whatever is ready. Returns the number filled in.
    fn wait(&self, timeout_ms: i32, events: &mut [ReadyEvent]) -> io::Result<usize>;
}

/// Linux epoll instance used as a [`FenceMultiplexer`].
///
/// An epoll descriptor is itself pollable, so a set can be nested inside
/// another set or handed to `poll(2)` as one event source.
#[derive(Debug)]
pub struct EpollSet {
    fd: OwnedFd,
}

impl EpollSet {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // Safety: epoll_create1 returned a fresh descriptor that nobody else owns.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Adopt a descriptor that is already an epoll instance (e.g. one
    /// received from another process).
    pub fn from_owned_fd(fd: OwnedFd) -> Self {
        Self { fd }
    }

    fn ctl(&self, op: libc::c_int, fence: RawFd, event: Option<&mut libc::epoll_event>) -> io::Result<()> {
        let event = event.map_or(std::ptr::null_mut(), |e| e as *mut libc::epoll_event);
        if unsafe { libc::epoll_ctl(self.fd.as_raw_fd(), op, fence, event) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl AsFd for EpollSet {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for EpollSet {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl FenceMultiplexer for EpollSet {
    fn add(&self, fence: BorrowedFd<'_>, key: u64) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: key,
        };
        self.ctl(libc::EPOLL_CTL_ADD, fence.as_raw_fd(), Some(&mut event))
    }

    fn remove(&self, fence: BorrowedFd<'_>) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fence.as_raw_fd(), None)
    }

    fn wait(&self, timeout_ms: i32, events: &mut [ReadyEvent]) -> io::Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut raw = vec![libc::epoll_event { events: 0, u64: 0 }; events.len()];
        let count = unsafe {
            libc::epoll_wait(
                self.fd.as_raw_fd(),
                raw.as_mut_ptr(),
                raw.len() as libc::c_int,
                timeout_ms,
            )
        };
        if count < 0 {
            return Err(io::Error::last_os_error());
        }

        let count = count as usize;
        for (out, ev) in events.iter_mut().zip(&raw[..count]) {
            // Copy out of the (possibly packed) kernel struct before use
            let (flags, key) = (ev.events, ev.u64);
            *out = ReadyEvent { key, events: flags };
        }
        Ok(count)
    }
}

/// Wait for `fd` to become readable. Returns 1 if it is, 0 on timeout.
pub fn poll_readable(fd: BorrowedFd<'_>, timeout_ms: i32) -> io::Result<usize> {
    let mut p = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let ret = unsafe { libc::poll(&mut p, 1, timeout_ms) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret as usize)
}
