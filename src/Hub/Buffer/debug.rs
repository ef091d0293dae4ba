use super::image::SharedImage;
use super::Buffer::BufferHandle;
use std::fmt;

// Debug proxy implementations that call the standalone debug functions
impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_buffer_handle(self, f)
    }
}

impl fmt::Debug for SharedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        crate::Debug::StructDebug::debug_shared_image(self, f)
    }
}
