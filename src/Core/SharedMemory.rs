// Shared memory backend abstraction for Linux
// Uses memfd_create + mmap; regions travel between processes as file descriptors

use std::fmt::Debug;
use std::io;
#[cfg(target_os = "linux")]
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd};
#[cfg(not(target_os = "linux"))]
use std::os::fd::{BorrowedFd, OwnedFd};
use std::ptr::NonNull;

/// Shared memory backend trait for cross-process memory mappings
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Get a pointer to the mapped memory region
    fn as_ptr(&self) -> *mut u8;

    /// Get the size of the mapped region in bytes
    fn size(&self) -> usize;

    /// Get the file descriptor the mapping was created from
    fn raw_handle(&self) -> RawHandle;
}

/// Platform-specific handle type
#[derive(Debug, Clone, Copy)]
pub enum RawHandle {
    /// Unix file descriptor (Linux)
    Fd(i32),
}

/// Access requested for a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protection {
    ReadOnly,
    ReadWrite,
}

/// Create a new anonymous shared memory region with the specified size.
///
/// The returned descriptor is the only handle to the region; it can be
/// duplicated and sent to other processes, each of which maps it with
/// [`map_shared_memory`].
///
/// # Arguments
/// * `size` - Size of the region in bytes (may be zero)
/// * `name` - Optional debug name (visible in `/proc/<pid>/fd/`)
#[cfg(target_os = "linux")]
pub fn create_shared_memory(size: usize, name: Option<&str>) -> io::Result<OwnedFd> {
    let c_name = std::ffi::CString::new(name.unwrap_or("dmxp_bufferhub"))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let fd = unsafe { libc::memfd_create(c_name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Safety: memfd_create returned a fresh descriptor that nobody else owns.
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    if unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(fd)
}

/// Map an existing shared memory region.
///
/// The descriptor stays owned by the caller; the mapping stays valid after
/// the descriptor is closed and is released when the backend is dropped.
///
/// # Arguments
/// * `fd` - Descriptor of the region (memfd or any mappable file)
/// * `size` - Number of bytes to map, starting at offset 0
/// * `protection` - Requested access
///
/// # Errors
/// `InvalidInput` for a zero-sized request, `InvalidData` if the region is
/// smaller than `size`, or the OS error from `fstat`/`mmap`.
#[cfg(target_os = "linux")]
pub fn map_shared_memory(
    fd: BorrowedFd<'_>,
    size: usize,
    protection: Protection,
) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(LinuxSharedMemory::map(fd, size, protection)?))
}

/// Size in bytes of the object behind `fd`, as reported by `fstat`.
#[cfg(target_os = "linux")]
pub fn region_size(fd: BorrowedFd<'_>) -> io::Result<usize> {
    let mut stat = unsafe { std::mem::zeroed::<libc::stat>() };
    if unsafe { libc::fstat(fd.as_raw_fd(), &mut stat) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(stat.st_size as usize)
}

#[cfg(not(target_os = "linux"))]
pub fn create_shared_memory(_size: usize, _name: Option<&str>) -> io::Result<OwnedFd> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn map_shared_memory(
    _fd: BorrowedFd<'_>,
    _size: usize,
    _protection: Protection,
) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(not(target_os = "linux"))]
pub fn region_size(_fd: BorrowedFd<'_>) -> io::Result<usize> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    ))
}

#[cfg(target_os = "linux")]
#[derive(Debug)]
pub struct LinuxSharedMemory {
    ptr: NonNull<u8>,
    size: usize,
    fd: i32,
}

// The mapping is plain shared memory; synchronisation is the user's concern.
#[cfg(target_os = "linux")]
unsafe impl Send for LinuxSharedMemory {}
#[cfg(target_os = "linux")]
unsafe impl Sync for LinuxSharedMemory {}

#[cfg(target_os = "linux")]
impl LinuxSharedMemory {
    /// Map `size` bytes of the region behind `fd` with `MAP_SHARED`.
    pub fn map(fd: BorrowedFd<'_>, size: usize, protection: Protection) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "cannot map an empty region",
            ));
        }

        // Mapping past the end of a memfd succeeds but faults on access
        let actual_size = region_size(fd)?;
        if actual_size < size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Shared memory too small: expected at least {}, got {}",
                    size, actual_size
                ),
            ));
        }

        let prot = match protection {
            Protection::ReadOnly => libc::PROT_READ,
            Protection::ReadWrite => libc::PROT_READ | libc::PROT_WRITE,
        };

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                prot,
                libc::MAP_SHARED,
                fd.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        let ptr = NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;

        Ok(Self {
            ptr,
            size,
            fd: fd.as_raw_fd(),
        })
    }
}

#[cfg(target_os = "linux")]
impl Drop for LinuxSharedMemory {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr.as_ptr().cast::<libc::c_void>(), self.size);
        }
    }
}

#[cfg(target_os = "linux")]
impl SharedMemoryBackend for LinuxSharedMemory {
    fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    fn size(&self) -> usize {
        self.size
    }

    fn raw_handle(&self) -> RawHandle {
        RawHandle::Fd(self.fd)
    }
}
