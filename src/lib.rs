// Module naming follows project convention (Hub = the buffer service and its clients)
#[allow(non_snake_case)]
pub mod Core;
#[allow(non_snake_case)]
pub mod Hub;
#[allow(non_snake_case)]
pub mod Debug {
    pub mod StructDebug;
}
pub mod error;

pub use error::{Error, RemoteError, Result};
pub use Core::{EpollSet, FenceMultiplexer, LocalFence};
pub use Hub::Buffer::layout::{MetadataHeader, METADATA_HEADER_SIZE};
pub use Hub::{BufferBuilder, BufferHandle, ChannelFactory, ChannelHandle, ClientChannel};
