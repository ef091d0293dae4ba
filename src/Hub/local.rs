// In-process buffer service: plays the remote side for single-process use and tests

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::RemoteError;
use crate::Core::epoll::{EpollSet, FenceMultiplexer};
use crate::Core::SharedMemory::{
    create_shared_memory, map_shared_memory, Protection, SharedMemoryBackend,
};
use crate::Hub::Buffer::layout::{MetadataHeader, METADATA_HEADER_SIZE, METADATA_USAGE};
use crate::Hub::channel::{ChannelFactory, ChannelHandle, ClientChannel};
use crate::Hub::Structs::{BufferDescription, ImageLayout, NativeHandle};

/// Participation bits available per buffer.
pub const MAX_CLIENTS: u32 = u64::BITS;

/// A failure the hub reproduces on every `GetBuffer` until cleared.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HubFault {
    /// Fail the call with this errno.
    RemoteFailure(i32),
    /// Answer with buffer id -1.
    InvalidId,
    /// Hand out an image handle without descriptors.
    BadImageHandle,
    /// Describe the metadata region as one byte shorter than the header.
    UndersizedMetadata,
    /// Hand out a metadata descriptor whose region is empty.
    UnmappableMetadata,
    MissingAcquireFence,
    MissingReleaseFence,
}

/// One buffer owned by the in-process service.
///
/// Holds the image and metadata regions, the two shared fence sets, and the
/// table of participation bits. Cloning yields another reference to the
/// same buffer.
#[derive(Clone)]
pub struct LocalBufferHub {
    shared: Arc<HubShared>,
}

struct HubShared {
    id: i32,
    layout: ImageLayout,
    image: OwnedFd,
    metadata_fd: OwnedFd,
    metadata_size: usize,
    /// The service's own mapping of the metadata region.
    _metadata: Box<dyn SharedMemoryBackend>,
    header: NonNull<MetadataHeader>,
    acquire_fence: EpollSet,
    release_fence: EpollSet,
    clients: Mutex<ClientTable>,
}

// `header` points into `_metadata`, which lives as long as the struct, and is
// only accessed through atomics.
unsafe impl Send for HubShared {}
unsafe impl Sync for HubShared {}

struct ClientTable {
    active_bits: u64,
    next_cid: i32,
    fault: Option<HubFault>,
}

fn remote(e: io::Error, what: &str) -> RemoteError {
    RemoteError::new(e.raw_os_error().unwrap_or(libc::EIO), format!("{what}: {e}"))
}

impl LocalBufferHub {
    /// Allocate a buffer with `layout` and `user_metadata_size` bytes of
    /// user metadata after the header.
    pub fn new(id: i32, name: &str, layout: ImageLayout, user_metadata_size: usize) -> io::Result<Self> {
        let image = create_shared_memory(layout.byte_size(), Some(name))?;

        let metadata_size = METADATA_HEADER_SIZE + user_metadata_size;
        let metadata_fd = create_shared_memory(metadata_size, Some(&format!("{name}-metadata")))?;
        // A fresh memfd is zero-filled, which is the initial header state
        let metadata = map_shared_memory(metadata_fd.as_fd(), metadata_size, Protection::ReadWrite)?;
        let header = NonNull::new(metadata.as_ptr().cast::<MetadataHeader>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;

        Ok(Self {
            shared: Arc::new(HubShared {
                id,
                layout,
                image,
                metadata_fd,
                metadata_size,
                _metadata: metadata,
                header,
                acquire_fence: EpollSet::new()?,
                release_fence: EpollSet::new()?,
                clients: Mutex::new(ClientTable {
                    active_bits: 0,
                    next_cid: 0,
                    fault: None,
                }),
            }),
        })
    }

    pub fn id(&self) -> i32 {
        self.shared.id
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.shared.layout
    }

    pub fn metadata_size(&self) -> usize {
        self.shared.metadata_size
    }

    /// The service's view of the shared header.
    pub fn header(&self) -> &MetadataHeader {
        // Safety: the mapping is page aligned, at least one header long, and
        // lives as long as `self.shared`.
        unsafe { MetadataHeader::bind(self.shared.header.cast::<u8>()) }
    }

    /// Participation bits of every connected channel.
    pub fn active_clients(&self) -> u64 {
        self.shared.clients.lock().active_bits
    }

    /// Make every following `GetBuffer` fail with `fault`; `None` clears it.
    pub fn inject_fault(&self, fault: Option<HubFault>) {
        self.shared.clients.lock().fault = fault;
    }

    pub fn shared_acquire_fence(&self) -> &EpollSet {
        &self.shared.acquire_fence
    }

    pub fn shared_release_fence(&self) -> &EpollSet {
        &self.shared.release_fence
    }

    /// Open a channel with a freshly allocated participation bit.
    pub fn connect(&self) -> Result<LocalChannel, RemoteError> {
        let event = EpollSet::new().map_err(|e| remote(e, "failed to create event set"))?;
        event
            .add(self.shared.acquire_fence.as_fd(), 0)
            .and_then(|_| event.add(self.shared.release_fence.as_fd(), 1))
            .map_err(|e| remote(e, "failed to watch shared fences"))?;

        let mut clients = self.shared.clients.lock();
        let free = !clients.active_bits;
        if free == 0 {
            return Err(RemoteError::new(
                libc::EBUSY,
                format!("all {MAX_CLIENTS} participation bits are taken"),
            ));
        }
        let state_bit = 1u64 << free.trailing_zeros();
        clients.active_bits |= state_bit;
        let cid = clients.next_cid;
        clients.next_cid += 1;
        self.header()
            .active_clients_bit_mask
            .fetch_or(state_bit, Ordering::SeqCst);
        drop(clients);

        debug!(id = self.id(), cid, "LocalBufferHub: client connected, bit={:#x}", state_bit);
        Ok(LocalChannel {
            hub: self.clone(),
            cid,
            state_bit,
            event,
        })
    }

    /// Return `state_bit` to the pool, clearing whatever the departing
    /// client left set so the next owner of the bit starts clean.
    fn release(&self, state_bit: u64) {
        let mut clients = self.shared.clients.lock();
        let header = self.header();
        header.buffer_state.fetch_and(!state_bit, Ordering::SeqCst);
        header.fence_state.fetch_and(!state_bit, Ordering::SeqCst);
        header
            .active_clients_bit_mask
            .fetch_and(!state_bit, Ordering::SeqCst);
        clients.active_bits &= !state_bit;
        drop(clients);
        debug!(id = self.id(), "LocalBufferHub: client released bit={:#x}", state_bit);
    }

    fn describe(&self, cid: i32, state_bit: u64) -> Result<BufferDescription, RemoteError> {
        let fault = self.shared.clients.lock().fault;
        if let Some(HubFault::RemoteFailure(code)) = fault {
            return Err(RemoteError::new(code, "injected failure"));
        }

        let shared = &*self.shared;
        let dup = |fd: BorrowedFd<'_>| {
            fd.try_clone_to_owned()
                .map_err(|e| remote(e, "failed to duplicate descriptor"))
        };

        let image = NativeHandle {
            fds: match fault {
                Some(HubFault::BadImageHandle) => Vec::new(),
                _ => vec![dup(shared.image.as_fd())?],
            },
            layout: shared.layout,
        };

        let metadata_layout = |size| {
            ImageLayout::blob(size, METADATA_USAGE)
                .map_err(|e| remote(e, "failed to describe metadata"))
        };
        let metadata = match fault {
            Some(HubFault::UndersizedMetadata) => NativeHandle {
                fds: vec![dup(shared.metadata_fd.as_fd())?],
                layout: metadata_layout(METADATA_HEADER_SIZE - 1)?,
            },
            Some(HubFault::UnmappableMetadata) => NativeHandle {
                fds: vec![create_shared_memory(0, Some("unmappable"))
                    .map_err(|e| remote(e, "failed to create region"))?],
                layout: metadata_layout(shared.metadata_size)?,
            },
            _ => NativeHandle {
                fds: vec![dup(shared.metadata_fd.as_fd())?],
                layout: metadata_layout(shared.metadata_size)?,
            },
        };

        let acquire_fence = match fault {
            Some(HubFault::MissingAcquireFence) => None,
            _ => Some(dup(shared.acquire_fence.as_fd())?),
        };
        let release_fence = match fault {
            Some(HubFault::MissingReleaseFence) => None,
            _ => Some(dup(shared.release_fence.as_fd())?),
        };

        Ok(BufferDescription {
            id: if fault == Some(HubFault::InvalidId) { -1 } else { shared.id },
            buffer_cid: cid,
            state_bit,
            image,
            metadata,
            acquire_fence,
            release_fence,
        })
    }
}

impl fmt::Debug for LocalBufferHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_local_hub(self, f)
    }
}

/// A client's connection to a [`LocalBufferHub`]. Dropping it returns the
/// participation bit to the hub.
pub struct LocalChannel {
    hub: LocalBufferHub,
    cid: i32,
    state_bit: u64,
    /// Watches both shared fence sets of the hub.
    event: EpollSet,
}

impl LocalChannel {
    pub fn cid(&self) -> i32 {
        self.cid
    }

    pub fn state_bit(&self) -> u64 {
        self.state_bit
    }
}

impl ClientChannel for LocalChannel {
    fn get_buffer(&self) -> Result<BufferDescription, RemoteError> {
        self.hub.describe(self.cid, self.state_bit)
    }

    fn new_consumer(&self) -> Result<ChannelHandle, RemoteError> {
        Ok(Box::new(self.hub.connect()?))
    }

    fn event_fd(&self) -> BorrowedFd<'_> {
        self.event.as_fd()
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.hub.release(self.state_bit);
    }
}

/// Endpoint paths of in-process hubs, dialed by
/// [`BufferHandle::from_endpoint`](crate::Hub::BufferHandle::from_endpoint).
#[derive(Default)]
pub struct LocalEndpoints {
    endpoints: Mutex<HashMap<PathBuf, LocalBufferHub>>,
}

impl LocalEndpoints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `hub` at `path`, replacing whatever was there.
    pub fn register(&self, path: impl Into<PathBuf>, hub: LocalBufferHub) {
        self.endpoints.lock().insert(path.into(), hub);
    }

    pub fn unregister(&self, path: &Path) -> Option<LocalBufferHub> {
        self.endpoints.lock().remove(path)
    }
}

impl ChannelFactory for LocalEndpoints {
    fn connect(&self, endpoint: &Path) -> Result<ChannelHandle, RemoteError> {
        let hub = self.endpoints.lock().get(endpoint).cloned().ok_or_else(|| {
            RemoteError::new(libc::ENOENT, format!("no buffer service at {}", endpoint.display()))
        })?;
        Ok(Box::new(hub.connect()?))
    }
}
