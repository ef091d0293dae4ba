// Client-side view of one shared buffer

use std::ops::Range;
use std::ptr::NonNull;

use parking_lot::Mutex;

use super::image::SharedImage;
use super::layout::MetadataHeader;
use crate::Core::epoll::EpollSet;
use crate::Core::fence::LocalFence;
use crate::Hub::channel::ChannelHandle;

/// One process's handle to a buffer shared through the buffer service.
///
/// A handle starts out unimported (`id() == -1`, `cid() == -1`, no
/// mappings, no fences) and becomes usable after a successful
/// [`import`](Self::import). From then on it takes part in the cross-process
/// protocol only through atomic bit operations on the shared metadata header
/// and through the shared fence sets.
///
/// ### Concurrency Design:
/// - **Shared words**: `buffer_state` and `fence_state` live in memory mapped
///   by every participant. This handle only ever `fetch_or`s or `fetch_and`s
///   its own participation bit, so updates from different processes commute.
/// - **Pixel access**: `lock`/`unlock` on one handle are serialised by the
///   image's internal lock. Serialising access across handles (or processes)
///   is the caller's job, normally through the `buffer_state` protocol.
pub struct BufferHandle {
    pub(crate) channel: ChannelHandle,

    /// Buffer id assigned by the service, -1 until imported.
    pub(crate) id: i32,

    /// Id of this client's session with the buffer, -1 until imported.
    pub(crate) cid: i32,

    /// This client's participation bit. Opaque; only used as a mask.
    pub(crate) state_bit: u64,

    pub(crate) imported: Option<ImportedBuffer>,

    /// The fence most recently registered through `update_shared_fence`.
    pub(crate) pending_fence: Mutex<Option<PendingFence>>,
}

/// Resources acquired by one successful import. Built in full before it is
/// stored in a handle, so a failed import never leaves a partial one behind.
pub(crate) struct ImportedBuffer {
    pub(crate) image: SharedImage,

    /// Locked for read/write for as long as this struct lives.
    pub(crate) metadata: SharedImage,

    pub(crate) metadata_size: usize,

    /// Byte range of the user metadata inside the metadata region. Empty
    /// when the region is exactly one header long.
    pub(crate) user_metadata: Range<usize>,

    /// Start of the metadata mapping, viewed as the header.
    pub(crate) header: NonNull<MetadataHeader>,

    pub(crate) acquire_fence: EpollSet,
    pub(crate) release_fence: EpollSet,
}

/// A duplicate of the caller's fence, registered with a fence multiplexer.
/// Shares the caller's open file description, which is what identifies it.
pub(crate) struct PendingFence {
    pub(crate) fence: LocalFence,
}

// `header` points into the metadata mapping owned by the same struct and is
// only accessed through atomics.
unsafe impl Send for ImportedBuffer {}
unsafe impl Sync for ImportedBuffer {}

impl ImportedBuffer {
    pub(crate) fn header(&self) -> &MetadataHeader {
        // Safety: the metadata region stays locked (mapped) until drop.
        unsafe { self.header.as_ref() }
    }

    pub(crate) fn user_metadata_ptr(&self) -> Option<NonNull<u8>> {
        if self.user_metadata.is_empty() {
            return None;
        }
        // Safety: the range was checked against the mapped size at import.
        let ptr = unsafe { self.header.as_ptr().cast::<u8>().add(self.user_metadata.start) };
        NonNull::new(ptr)
    }
}

impl Drop for ImportedBuffer {
    fn drop(&mut self) {
        if let Err(e) = self.metadata.unlock() {
            tracing::warn!("BufferHandle: failed to unlock metadata: {}", e);
        }
    }
}
