// Descriptions of buffers as handed out by the buffer service

use std::io;
use std::os::fd::OwnedFd;

/// Pixel formats a shared image can carry. Only the byte size per pixel
/// matters here; contents are never interpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8888,
    Rgbx8888,
    Rgb888,
    Rgb565,
    /// Opaque byte blob laid out as `width × 1`.
    Blob,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgba8888 | PixelFormat::Rgbx8888 => 4,
            PixelFormat::Rgb888 => 3,
            PixelFormat::Rgb565 => 2,
            PixelFormat::Blob => 1,
        }
    }
}

/// Geometry and usage of a shared image. `stride` is in pixels.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImageLayout {
    pub width: u32,
    pub height: u32,
    pub layer_count: u32,
    pub format: PixelFormat,
    pub usage: u64,
    pub stride: u32,
}

impl ImageLayout {
    /// Layout of a one-dimensional blob of `size` bytes. Fails with
    /// `InvalidInput` if `size` does not fit a 32-bit width.
    pub fn blob(size: usize, usage: u64) -> io::Result<Self> {
        let width = u32::try_from(size).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("blob of {size} bytes exceeds the maximum width {}", u32::MAX),
            )
        })?;
        Ok(Self {
            width,
            height: 1,
            layer_count: 1,
            format: PixelFormat::Blob,
            usage,
            stride: width,
        })
    }

    /// Bytes covered by the image across all layers.
    pub fn byte_size(&self) -> usize {
        self.stride as usize
            * self.height as usize
            * self.layer_count as usize
            * self.format.bytes_per_pixel()
    }
}

/// An importable shared image: the descriptors backing it plus its layout.
/// The first descriptor holds the pixel data.
#[derive(Debug)]
pub struct NativeHandle {
    pub fds: Vec<OwnedFd>,
    pub layout: ImageLayout,
}

/// Everything a client needs to import a buffer, as returned by `GetBuffer`.
#[derive(Debug)]
pub struct BufferDescription {
    pub id: i32,
    pub buffer_cid: i32,
    /// The participation bit assigned to the calling client.
    pub state_bit: u64,
    pub image: NativeHandle,
    pub metadata: NativeHandle,
    pub acquire_fence: Option<OwnedFd>,
    pub release_fence: Option<OwnedFd>,
}
