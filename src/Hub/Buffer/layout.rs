use std::mem::size_of;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU64;

/// Gralloc-style usage bits for CPU access.
pub mod usage {
    pub const CPU_READ_RARELY: u64 = 0x2;
    pub const CPU_READ_OFTEN: u64 = 0x3;
    pub const CPU_READ_MASK: u64 = 0xF;
    pub const CPU_WRITE_RARELY: u64 = 0x20;
    pub const CPU_WRITE_OFTEN: u64 = 0x30;
    pub const CPU_WRITE_MASK: u64 = 0xF0;
    pub const GPU_TEXTURE: u64 = 0x100;
    pub const GPU_RENDER_TARGET: u64 = 0x200;
}

/// Usage the metadata region is locked with: shared atomics need read/write.
pub const METADATA_USAGE: u64 = usage::CPU_READ_OFTEN | usage::CPU_WRITE_OFTEN;

/// The fixed header at offset 0 of every metadata region.
///
/// This struct describes memory owned by nobody in particular: every process
/// sharing the buffer maps the same bytes. It is never constructed by a
/// client, only bound over an existing mapping with [`MetadataHeader::bind`],
/// so whatever values other processes left there are preserved.
///
/// The layout is fixed by the buffer service and must not change.
#[repr(C, align(8))]
pub struct MetadataHeader {
    /// One bit per participant with an outstanding producer/consumer step.
    pub buffer_state: AtomicU64,

    /// One bit per participant with an outstanding fence.
    pub fence_state: AtomicU64,

    /// Union of the participation bits of every live client. Written by the
    /// service only.
    pub active_clients_bit_mask: AtomicU64,

    /// Sequence number published by the producer alongside each post.
    pub queue_index: AtomicU64,
}

/// Size of [`MetadataHeader`]; user metadata starts at this offset.
pub const METADATA_HEADER_SIZE: usize = size_of::<MetadataHeader>();

impl MetadataHeader {
    /// View the start of a mapped metadata region as the header, without
    /// writing to it.
    ///
    /// # Safety
    /// `base` must point to at least [`METADATA_HEADER_SIZE`] bytes of
    /// readable and writable memory, aligned to 8, that stays mapped for `'a`.
    pub unsafe fn bind<'a>(base: NonNull<u8>) -> &'a MetadataHeader {
        debug_assert_eq!(base.as_ptr() as usize % std::mem::align_of::<Self>(), 0);
        &*base.as_ptr().cast::<MetadataHeader>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn header_is_32_bytes() {
        assert_eq!(METADATA_HEADER_SIZE, 32);
        assert_eq!(std::mem::align_of::<MetadataHeader>(), 8);
    }

    #[test]
    fn bind_preserves_existing_words() {
        let mut backing = [0u64; 4];
        backing[0] = 0b0010;
        backing[1] = 0b1000;

        let base = NonNull::new(backing.as_mut_ptr().cast::<u8>()).unwrap();
        let header = unsafe { MetadataHeader::bind(base) };
        assert_eq!(header.buffer_state.load(Ordering::SeqCst), 0b0010);
        assert_eq!(header.fence_state.load(Ordering::SeqCst), 0b1000);

        header.fence_state.fetch_or(0b0001, Ordering::SeqCst);
        assert_eq!(header.fence_state.load(Ordering::SeqCst), 0b1001);
    }
}
