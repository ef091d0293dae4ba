pub mod SharedMemory;
pub mod epoll;
pub mod fence;

pub use SharedMemory::{
    create_shared_memory, map_shared_memory, region_size, Protection, RawHandle,
    SharedMemoryBackend,
};
pub use epoll::{poll_readable, EpollSet, FenceMultiplexer, ReadyEvent};
pub use fence::LocalFence;
