use std::os::fd::BorrowedFd;
use std::sync::atomic::Ordering;

use super::Buffer::BufferHandle;
use crate::error::Result;
use crate::Core::epoll::EpollSet;
use crate::Hub::Structs::ImageLayout;

/// Accessors for the identity and shared state of a BufferHandle
///
/// State words are loaded with sequentially consistent ordering and return
/// `None` before a successful import.
impl BufferHandle {
    /// Buffer id assigned by the service, or -1 before import.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Id of this client's session with the buffer, or -1 before import.
    pub fn cid(&self) -> i32 {
        self.cid
    }

    /// This client's participation bit (0 before import).
    pub fn state_bit(&self) -> u64 {
        self.state_bit
    }

    pub fn is_imported(&self) -> bool {
        self.imported.is_some()
    }

    pub fn buffer_state(&self) -> Option<u64> {
        self.imported
            .as_ref()
            .map(|i| i.header().buffer_state.load(Ordering::SeqCst))
    }

    pub fn fence_state(&self) -> Option<u64> {
        self.imported
            .as_ref()
            .map(|i| i.header().fence_state.load(Ordering::SeqCst))
    }

    pub fn active_clients_bit_mask(&self) -> Option<u64> {
        self.imported
            .as_ref()
            .map(|i| i.header().active_clients_bit_mask.load(Ordering::SeqCst))
    }

    pub fn queue_index(&self) -> Option<u64> {
        self.imported
            .as_ref()
            .map(|i| i.header().queue_index.load(Ordering::SeqCst))
    }

    /// Size of the whole metadata region, header included (0 before import).
    pub fn metadata_size(&self) -> usize {
        self.imported.as_ref().map_or(0, |i| i.metadata_size)
    }

    /// Bytes available for caller-defined metadata (0 before import).
    pub fn user_metadata_size(&self) -> usize {
        self.imported.as_ref().map_or(0, |i| i.user_metadata.len())
    }

    pub fn image_layout(&self) -> Option<&ImageLayout> {
        self.imported.as_ref().map(|i| i.image.layout())
    }

    /// The descriptor [`poll`](Self::poll) waits on.
    pub fn event_fd(&self) -> BorrowedFd<'_> {
        self.channel.event_fd()
    }

    pub fn shared_acquire_fence(&self) -> Result<&EpollSet> {
        Ok(&self.imported()?.acquire_fence)
    }

    pub fn shared_release_fence(&self) -> Result<&EpollSet> {
        Ok(&self.imported()?.release_fence)
    }
}
