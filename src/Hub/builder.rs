use std::io;

use super::local::LocalBufferHub;
use super::Buffer::layout::usage;
use super::Buffer::BufferHandle;
use super::Structs::{ImageLayout, PixelFormat};
use crate::error::Result;

/// Configuration for a buffer allocated by the in-process service.
pub struct BufferBuilder {
    id: i32,
    name: String,
    /// Kept wide so oversized blobs are reported at build time.
    width: usize,
    height: u32,
    layer_count: u32,
    format: PixelFormat,
    usage: u64,
    user_metadata_size: usize,
}

impl Default for BufferBuilder {
    fn default() -> Self {
        Self {
            id: 0,
            name: "dmxp_buffer".to_string(),
            width: 640,
            height: 480,
            layer_count: 1,
            format: PixelFormat::Rgba8888,
            usage: usage::CPU_READ_OFTEN | usage::CPU_WRITE_OFTEN,
            user_metadata_size: 0,
        }
    }
}

impl BufferBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `size × 1` blob buffer. Sizes beyond a 32-bit width fail at build
    /// time.
    pub fn blob(size: usize) -> Self {
        let mut builder = Self::default().with_format(PixelFormat::Blob);
        builder.width = size;
        builder.height = 1;
        builder
    }

    pub fn with_id(mut self, id: i32) -> Self {
        self.id = id;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width as usize;
        self.height = height;
        self
    }

    pub fn with_layer_count(mut self, layer_count: u32) -> Self {
        self.layer_count = layer_count;
        self
    }

    pub fn with_format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_usage(mut self, usage: u64) -> Self {
        self.usage = usage;
        self
    }

    /// Bytes of caller-defined metadata after the header.
    pub fn with_user_metadata_size(mut self, size: usize) -> Self {
        self.user_metadata_size = size;
        self
    }

    pub fn layout(&self) -> io::Result<ImageLayout> {
        let width = u32::try_from(self.width).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("width {} exceeds the maximum {}", self.width, u32::MAX),
            )
        })?;
        Ok(ImageLayout {
            width,
            height: self.height,
            layer_count: self.layer_count,
            format: self.format,
            usage: self.usage,
            stride: width,
        })
    }

    pub fn build_hub(self) -> io::Result<LocalBufferHub> {
        let layout = self.layout()?;
        LocalBufferHub::new(self.id, &self.name, layout, self.user_metadata_size)
    }

    /// Allocate the buffer and return it with an imported handle on a
    /// fresh channel.
    pub fn build_handle(self) -> Result<(LocalBufferHub, BufferHandle)> {
        let hub = self.build_hub()?;
        let mut handle = BufferHandle::new(Box::new(hub.connect()?));
        handle.import()?;
        Ok((hub, handle))
    }
}
