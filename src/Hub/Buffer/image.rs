use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::ptr::NonNull;

use parking_lot::Mutex;

use super::layout::usage;
use crate::error::{Error, Result};
use crate::Core::SharedMemory::{map_shared_memory, Protection, SharedMemoryBackend};
use crate::Hub::Structs::{ImageLayout, NativeHandle};

/// A shared-memory image imported from a [`NativeHandle`].
///
/// Importing only takes ownership of the descriptors. Memory is mapped by
/// [`lock`](Self::lock) and unmapped by [`unlock`](Self::unlock); at most one
/// lock may be outstanding per image.
pub struct SharedImage {
    pub(crate) fds: Vec<OwnedFd>,
    pub(crate) layout: ImageLayout,
    pub(crate) mapping: Mutex<Mapping>,
}

#[derive(Default)]
pub(crate) struct Mapping {
    region: Option<Box<dyn SharedMemoryBackend>>,
    /// Set while [`SharedImage::with_mapped`] lends the region out; `unlock`
    /// must not release it then.
    scoped: bool,
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, message.to_string())
}

fn busy() -> Error {
    Error::LockFailed(io::Error::from_raw_os_error(libc::EBUSY))
}

struct ReleaseScoped<'a>(&'a SharedImage);

impl Drop for ReleaseScoped<'_> {
    fn drop(&mut self) {
        let mut mapping = self.0.mapping.lock();
        mapping.scoped = false;
        mapping.region = None;
    }
}

impl SharedImage {
    /// Take ownership of `handle` after checking that it describes a usable
    /// image. `what` names the region in errors.
    pub fn import(handle: NativeHandle, what: &'static str) -> Result<Self> {
        let NativeHandle { fds, layout } = handle;

        let problem = if fds.is_empty() {
            Some("handle carries no descriptors")
        } else if layout.width == 0 || layout.height == 0 || layout.layer_count == 0 {
            Some("image has an empty dimension")
        } else if layout.stride < layout.width {
            Some("stride is smaller than width")
        } else {
            None
        };
        if let Some(problem) = problem {
            return Err(Error::ImportFailed {
                what,
                source: invalid(problem),
            });
        }

        Ok(Self {
            fds,
            layout,
            mapping: Mutex::new(Mapping::default()),
        })
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn is_locked(&self) -> bool {
        self.mapping.lock().region.is_some()
    }

    /// Map the image for CPU access and return the address of pixel
    /// (`x`, `y`) of the first layer.
    ///
    /// Write access is requested when `usage` carries any CPU write bit,
    /// read-only access otherwise. Fails with `LockFailed` if the image is
    /// already locked (`EBUSY`), `usage` asks for no CPU access or the
    /// rectangle leaves the image (`EINVAL`), or mapping fails.
    pub fn lock(&self, usage: u64, x: u32, y: u32, width: u32, height: u32) -> Result<NonNull<u8>> {
        let mut mapping = self.mapping.lock();
        self.map(&mut mapping, usage, x, y, width, height)
    }

    /// Lock like [`lock`](Self::lock), run `f` on the address, and unlock
    /// afterwards, even if `f` panics. [`unlock`](Self::unlock) fails with
    /// `EBUSY` while `f` runs, so the region outlives every use of the
    /// address inside `f`.
    pub fn with_mapped<R>(
        &self,
        usage: u64,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        f: impl FnOnce(NonNull<u8>) -> R,
    ) -> Result<R> {
        let address = {
            let mut mapping = self.mapping.lock();
            let address = self.map(&mut mapping, usage, x, y, width, height)?;
            mapping.scoped = true;
            address
        };
        let _release = ReleaseScoped(self);
        Ok(f(address))
    }

    fn map(
        &self,
        mapping: &mut Mapping,
        usage: u64,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<NonNull<u8>> {
        if mapping.region.is_some() {
            return Err(busy());
        }

        if usage & (usage::CPU_READ_MASK | usage::CPU_WRITE_MASK) == 0 {
            return Err(Error::LockFailed(invalid("usage requests no CPU access")));
        }
        let protection = if usage & usage::CPU_WRITE_MASK != 0 {
            Protection::ReadWrite
        } else {
            Protection::ReadOnly
        };

        let layout = &self.layout;
        let fits = width > 0
            && height > 0
            && u64::from(x) + u64::from(width) <= u64::from(layout.width)
            && u64::from(y) + u64::from(height) <= u64::from(layout.height);
        if !fits {
            return Err(Error::LockFailed(invalid("lock rectangle is outside the image")));
        }

        let region = map_shared_memory(self.fds[0].as_fd(), layout.byte_size(), protection)
            .map_err(Error::LockFailed)?;

        let offset = (y as usize * layout.stride as usize + x as usize)
            * layout.format.bytes_per_pixel();
        // Safety: offset addresses a pixel inside the checked rectangle,
        // which lies inside the mapped layer.
        let address = unsafe { region.as_ptr().add(offset) };
        mapping.region = Some(region);

        NonNull::new(address)
            .ok_or_else(|| Error::LockFailed(io::Error::new(io::ErrorKind::Other, "null mapping")))
    }

    /// Release the mapping created by [`lock`](Self::lock).
    pub fn unlock(&self) -> Result<()> {
        let mut mapping = self.mapping.lock();
        if mapping.scoped {
            return Err(busy());
        }
        match mapping.region.take() {
            Some(_region) => Ok(()),
            None => Err(Error::LockFailed(invalid("image is not locked"))),
        }
    }

    /// Raw descriptors backing the image, at most `max` of them.
    pub fn fds(&self, max: usize) -> Vec<RawFd> {
        self.fds.iter().take(max).map(|fd| fd.as_raw_fd()).collect()
    }
}
