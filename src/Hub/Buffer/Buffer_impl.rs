use std::os::fd::RawFd;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::sync::atomic::Ordering::SeqCst;

use parking_lot::Mutex;
use tracing::{debug, debug_span, error, warn};

use super::image::SharedImage;
use super::layout::{MetadataHeader, METADATA_HEADER_SIZE, METADATA_USAGE};
use super::Buffer::{BufferHandle, ImportedBuffer, PendingFence};
use crate::error::{Error, Result};
use crate::Core::epoll::{poll_readable, EpollSet, FenceMultiplexer};
use crate::Core::fence::LocalFence;
use crate::Hub::channel::{ChannelFactory, ChannelHandle};
use crate::Hub::Structs::BufferDescription;

impl BufferHandle {
    /// Create an unimported handle over an established channel.
    pub fn new(channel: ChannelHandle) -> Self {
        Self {
            channel,
            id: -1,
            cid: -1,
            state_bit: 0,
            imported: None,
            pending_fence: Mutex::new(None),
        }
    }

    /// Dial `endpoint` through `factory` and create an unimported handle
    /// over the resulting channel.
    pub fn from_endpoint(factory: &dyn ChannelFactory, endpoint: impl AsRef<Path>) -> Result<Self> {
        let endpoint = endpoint.as_ref();
        let channel = factory.connect(endpoint).map_err(|e| {
            error!("BufferHandle::from_endpoint: failed to connect to {:?}: {}", endpoint, e);
            Error::from(e)
        })?;
        Ok(Self::new(channel))
    }

    /// Ask the service for a new consumer channel to this buffer.
    pub fn create_consumer(&self) -> Result<ChannelHandle> {
        self.channel.new_consumer().map_err(|e| {
            error!("BufferHandle::create_consumer: failed to create consumer channel: {}", e);
            Error::from(e)
        })
    }

    /// Fetch the buffer description from the service and import it.
    ///
    /// Either every resource is acquired and the handle is updated, or the
    /// handle is left exactly as it was. Importing again replaces a previous
    /// import under the same rule. The shared state words are bound as they
    /// are; their current cross-process values are never overwritten.
    pub fn import(&mut self) -> Result<()> {
        let _span = debug_span!("BufferHandle::import").entered();

        let desc = self.channel.get_buffer().map_err(|e| {
            error!("BufferHandle::import: failed to get buffer: {}", e);
            Error::from(e)
        })?;
        if desc.id < 0 {
            error!("BufferHandle::import: received an invalid id: {}", desc.id);
            return Err(Error::InvalidId(desc.id));
        }

        let BufferDescription {
            id,
            buffer_cid,
            state_bit,
            image,
            metadata,
            acquire_fence,
            release_fence,
        } = desc;
        debug!(id, "BufferHandle::import: importing buffer");

        let image = SharedImage::import(image, "buffer")?;
        let metadata = SharedImage::import(metadata, "metadata").map_err(|e| {
            error!("BufferHandle::import: failed to import metadata buffer: {}", e);
            e
        })?;

        let metadata_size = metadata.layout().width as usize;
        if metadata_size < METADATA_HEADER_SIZE {
            error!("BufferHandle::import: metadata buffer too small: {}", metadata_size);
            return Err(Error::MetadataTooSmall {
                size: metadata_size,
                required: METADATA_HEADER_SIZE,
            });
        }

        let base = metadata
            .lock(METADATA_USAGE, 0, 0, metadata_size as u32, 1)
            .map_err(|e| {
                error!("BufferHandle::import: failed to lock metadata: {}", e);
                e
            })?;

        let (Some(acquire_fence), Some(release_fence)) = (acquire_fence, release_fence) else {
            error!("BufferHandle::import: failed to import shared fences");
            return Err(Error::InvalidFences);
        };

        let imported = ImportedBuffer {
            image,
            metadata,
            metadata_size,
            user_metadata: METADATA_HEADER_SIZE..metadata_size,
            header: base.cast::<MetadataHeader>(),
            acquire_fence: EpollSet::from_owned_fd(acquire_fence),
            release_fence: EpollSet::from_owned_fd(release_fence),
        };

        // Bound in place: the words may already carry other clients' bits.
        let header = imported.header();
        debug!(
            "BufferHandle::import: id={}, buffer_state={:#x}, fence_state={:#x}",
            id,
            header.buffer_state.load(SeqCst),
            header.fence_state.load(SeqCst)
        );

        self.imported = Some(imported);
        self.id = id;
        self.cid = buffer_cid;
        self.state_bit = state_bit;
        Ok(())
    }

    /// Check that `user_metadata_size` bytes of user metadata fit this buffer.
    pub fn check_metadata(&self, user_metadata_size: usize) -> Result<()> {
        let max = self.user_metadata_size();
        if user_metadata_size > 0 && max == 0 {
            error!("BufferHandle::check_metadata: doesn't support custom metadata");
            return Err(Error::UnsupportedMetadata);
        }
        if user_metadata_size > max {
            error!(
                "BufferHandle::check_metadata: too big: {}, maximum: {}",
                user_metadata_size, max
            );
            return Err(Error::MetadataTooLarge {
                requested: user_metadata_size,
                max,
            });
        }
        Ok(())
    }

    /// Copy `data` to the start of the user metadata area.
    pub fn write_user_metadata(&self, data: &[u8]) -> Result<()> {
        self.check_metadata(data.len())?;
        if data.is_empty() {
            return Ok(());
        }
        let dst = self.user_metadata_ptr()?;
        unsafe { ptr::copy_nonoverlapping(data.as_ptr(), dst.as_ptr(), data.len()) };
        Ok(())
    }

    /// Fill `out` from the start of the user metadata area.
    pub fn read_user_metadata(&self, out: &mut [u8]) -> Result<()> {
        self.check_metadata(out.len())?;
        if out.is_empty() {
            return Ok(());
        }
        let src = self.user_metadata_ptr()?;
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), out.as_mut_ptr(), out.len()) };
        Ok(())
    }

    fn user_metadata_ptr(&self) -> Result<NonNull<u8>> {
        self.imported()?
            .user_metadata_ptr()
            .ok_or(Error::UnsupportedMetadata)
    }

    /// Replace this client's pending fence and publish whether it has one.
    ///
    /// A valid `new_fence` is duplicated, registered with `shared_fence`
    /// under this client's participation bit, and then announced by setting
    /// that bit in `fence_state`. An invalid one clears the bit, telling the
    /// other participants there is nothing to wait for. Passing the fence
    /// that is already pending (the same open file, under any descriptor number)
    /// does nothing.
    pub fn update_shared_fence(
        &self,
        new_fence: &LocalFence,
        shared_fence: &dyn FenceMultiplexer,
    ) -> Result<()> {
        let imported = self.imported()?;
        let mut pending = self.pending_fence.lock();

        let current = pending.as_ref().map(|p| &p.fence);
        if current.map_or(!new_fence.is_valid(), |fence| fence.is_same_as(new_fence)) {
            return Ok(());
        }

        if let Some(old) = pending.take() {
            if let Some(fd) = old.fence.as_fd() {
                if let Err(e) = shared_fence.remove(fd) {
                    warn!(
                        "BufferHandle::update_shared_fence: failed to remove old fence fd from epoll set, error: {}",
                        e
                    );
                }
            }
        }

        let fence_state = &imported.header().fence_state;
        if !new_fence.is_valid() {
            fence_state.fetch_and(!self.state_bit, SeqCst);
            return Ok(());
        }

        let fence = new_fence.duplicate()?;
        if let Some(fd) = fence.as_fd() {
            if let Err(e) = shared_fence.add(fd, self.state_bit) {
                error!(
                    "BufferHandle::update_shared_fence: failed to add new fence fd into epoll set, error: {}",
                    e
                );
                return Err(Error::FenceRegistrationFailed(e));
            }
        }
        *pending = Some(PendingFence { fence });
        fence_state.fetch_or(self.state_bit, SeqCst);
        Ok(())
    }

    /// [`update_shared_fence`](Self::update_shared_fence) against this
    /// buffer's shared acquire fence.
    pub fn update_acquire_fence(&self, new_fence: &LocalFence) -> Result<()> {
        self.update_shared_fence(new_fence, self.shared_acquire_fence()?)
    }

    /// [`update_shared_fence`](Self::update_shared_fence) against this
    /// buffer's shared release fence.
    pub fn update_release_fence(&self, new_fence: &LocalFence) -> Result<()> {
        self.update_shared_fence(new_fence, self.shared_release_fence()?)
    }

    /// Wait up to `timeout_ms` for a registered fence to signal (0 checks
    /// without blocking, negative waits forever). Returns the number of ready
    /// event sources, 0 on timeout.
    pub fn poll(&self, timeout_ms: i32) -> Result<usize> {
        let _span = debug_span!("BufferHandle::poll", timeout_ms).entered();
        Ok(poll_readable(self.channel.event_fd(), timeout_ms)?)
    }

    /// Map a rectangle of the image for CPU access. See [`SharedImage::lock`].
    pub fn lock(&self, usage: u64, x: u32, y: u32, width: u32, height: u32) -> Result<NonNull<u8>> {
        self.imported()?.image.lock(usage, x, y, width, height)
    }

    pub fn unlock(&self) -> Result<()> {
        self.imported()?.image.unlock()
    }

    /// Lock the first `size` bytes of a blob buffer, hand them to `f`, and
    /// unlock before returning, so the mapping never escapes the call.
    ///
    /// While `f` runs the image counts as locked: `lock` and `unlock` on
    /// this handle fail with `LockFailed(EBUSY)`.
    pub fn with_blob_read_write<R>(&self, size: usize, f: impl FnOnce(&mut [u8]) -> R) -> Result<R> {
        let image = &self.imported()?.image;
        let width = u32::try_from(size).map_err(|_| {
            Error::LockFailed(std::io::Error::from_raw_os_error(libc::EINVAL))
        })?;

        image.with_mapped(image.layout().usage, 0, 0, width, 1, |address| {
            // Safety: the mapping covers at least `size` bytes from `address`
            // and cannot be released until this closure returns.
            let bytes = unsafe { std::slice::from_raw_parts_mut(address.as_ptr(), size) };
            f(bytes)
        })
    }

    /// Raw descriptors backing the image, at most `max_fds`. Empty before
    /// import.
    pub fn blob_fds(&self, max_fds: usize) -> Vec<RawFd> {
        self.imported
            .as_ref()
            .map_or_else(Vec::new, |imported| imported.image.fds(max_fds))
    }

    pub(crate) fn imported(&self) -> Result<&ImportedBuffer> {
        self.imported.as_ref().ok_or(Error::NotImported)
    }
}
