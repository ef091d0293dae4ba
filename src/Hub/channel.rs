// Client side of the buffer service RPC

use std::os::fd::BorrowedFd;
use std::path::Path;

use crate::error::RemoteError;
use crate::Hub::Structs::BufferDescription;

/// An established connection to the buffer service.
///
/// Calls are synchronous request/response. The wire format is the
/// implementation's business.
pub trait ClientChannel: Send + Sync {
    /// `GetBuffer`: describe the buffer this channel is attached to,
    /// including the participation bit assigned to this client.
    fn get_buffer(&self) -> Result<BufferDescription, RemoteError>;

    /// `NewConsumer`: open another channel to the same buffer.
    fn new_consumer(&self) -> Result<ChannelHandle, RemoteError>;

    /// Descriptor that polls readable when any fence registered in this
    /// buffer's shared fence sets signals.
    fn event_fd(&self) -> BorrowedFd<'_>;
}

/// An owned channel, as passed to [`BufferHandle::new`](crate::Hub::BufferHandle::new).
pub type ChannelHandle = Box<dyn ClientChannel>;

/// Dials buffer service endpoints by path.
pub trait ChannelFactory {
    fn connect(&self, endpoint: &Path) -> Result<ChannelHandle, RemoteError>;
}

impl std::fmt::Debug for dyn ClientChannel + '_ {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientChannel").finish_non_exhaustive()
    }
}
