use std::fmt;

use crate::Hub::Buffer::{BufferHandle, SharedImage};
use crate::Hub::LocalBufferHub;

/// Debug function for BufferHandle
///
/// Shows identity and the shared state words. The words are read with
/// atomic loads; user metadata and pixels are never touched.
pub fn debug_buffer_handle(handle: &BufferHandle, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BufferHandle")
        .field("id", &handle.id())
        .field("cid", &handle.cid())
        .field("state_bit", &format_args!("{:#x}", handle.state_bit()))
        .field("buffer_state", &handle.buffer_state().map(|s| format!("{:#x}", s)))
        .field("fence_state", &handle.fence_state().map(|s| format!("{:#x}", s)))
        .field("user_metadata_size", &handle.user_metadata_size())
        .field("image", &handle.image_layout())
        .finish_non_exhaustive()
}

/// Debug function for SharedImage
///
/// Safely displays the layout and lock status without dereferencing the mapping
pub fn debug_shared_image(image: &SharedImage, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SharedImage")
        .field("layout", image.layout())
        .field("fds", &image.fds(usize::MAX))
        .field("locked", &image.is_locked())
        .finish()
}

/// Debug function for LocalBufferHub
pub fn debug_local_hub(hub: &LocalBufferHub, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LocalBufferHub")
        .field("id", &hub.id())
        .field("layout", hub.layout())
        .field("metadata_size", &hub.metadata_size())
        .field("active_clients", &format_args!("{:#x}", hub.active_clients()))
        .finish_non_exhaustive()
}
