mod builder;
pub mod channel;
pub mod local;

pub use builder::BufferBuilder;
pub use channel::{ChannelFactory, ChannelHandle, ClientChannel};
pub use local::{HubFault, LocalBufferHub, LocalChannel, LocalEndpoints};

pub mod Buffer {
    pub mod Buffer;
    pub mod Buffer_impl;
    pub mod image;
    pub mod layout;
    mod debug;
    mod getters;
    pub use image::SharedImage;
    pub use Buffer::BufferHandle; // re-export for stable path
}

pub mod Structs {
    pub mod Buffer_Structs;
    pub use Buffer_Structs::{BufferDescription, ImageLayout, NativeHandle, PixelFormat}; // re-export for stable path
}

pub use Buffer::BufferHandle;
