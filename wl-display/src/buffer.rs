// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Display buffers.
//!
//! A [`Buffer`] wraps a `wl_buffer` created either from shared memory or from
//! imported dmabuf planes. The compositor signals through a release event
//! that it no longer reads from the buffer; users observe it by installing a
//! release listener.

use std::{
    fs::File,
    io::Write,
    os::fd::{BorrowedFd, FromRawFd},
    sync::{Arc, Mutex},
};

use tracing::{error, trace};
use wayland_client::protocol::wl_buffer::WlBuffer;

use crate::{Display, Error, Result};

/// Callback invoked on the display thread when the compositor releases a buffer.
pub type ReleaseListener = Box<dyn Fn() + Send + Sync>;

/// Describes a shared memory buffer inside a memory pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmBufferDesc {
    /// Size of the pool backing the file descriptor.
    pub pool_size: usize,
    /// Byte offset of the first pixel.
    pub offset: i32,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    /// `wl_shm.format` value.
    pub format: u32,
}

/// One plane of a dmabuf import.
#[derive(Debug, Clone, Copy)]
pub struct DmabufPlane<'a> {
    pub fd: BorrowedFd<'a>,
    pub offset: u32,
    pub stride: u32,
}

/// Describes a dmabuf import.
#[derive(Debug, Clone)]
pub struct DmabufDesc<'a> {
    pub width: i32,
    pub height: i32,
    /// DRM fourcc code.
    pub fourcc: u32,
    pub modifier: u64,
    /// `zwp_linux_buffer_params_v1.flags` bits.
    pub flags: u32,
    pub planes: Vec<DmabufPlane<'a>>,
}

/// Shared state between a [`Buffer`] and the display thread.
#[derive(Default)]
pub(crate) struct BufferData {
    listener: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl BufferData {
    pub(crate) fn notify_release(&self) {
        // The listener may drop the last reference to the buffer, so it runs
        // without the lock held.
        let listener = match self.listener.lock() {
            Ok(listener) => listener.clone(),
            Err(e) => {
                error!("Buffer release listener lock poisoned: {}", e);
                return;
            }
        };
        if let Some(listener) = listener {
            listener();
        }
    }
}

/// A compositor-side buffer. The `wl_buffer` is destroyed on drop.
pub struct Buffer {
    wl_buffer: WlBuffer,
    data: Arc<BufferData>,
}

impl Buffer {
    pub(crate) fn new(wl_buffer: WlBuffer, data: Arc<BufferData>) -> Self {
        Self { wl_buffer, data }
    }

    /// Installs the callback run each time the compositor releases the buffer.
    ///
    /// The listener runs on the display dispatch thread.
    pub fn set_release_listener(&self, listener: ReleaseListener) {
        match self.data.listener.lock() {
            Ok(mut slot) => *slot = Some(Arc::from(listener)),
            Err(e) => error!("Buffer release listener lock poisoned: {}", e),
        }
    }

    pub(crate) fn wl_buffer(&self) -> &WlBuffer {
        &self.wl_buffer
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer").field("wl_buffer", &self.wl_buffer).finish()
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.data.listener.lock() {
            slot.take();
        }
        trace!("Destroying {:?}", self.wl_buffer);
        self.wl_buffer.destroy();
    }
}

/// Creates a 1x1 opaque black buffer used to paint the window background.
pub(crate) fn black_pixel(display: &Display) -> Result<Buffer> {
    // Safety: the name is a valid C string and the flags are constants.
    let fd = unsafe { libc::memfd_create(c"wl-display-background".as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(Error::Io(std::io::Error::last_os_error()));
    }
    // Safety: `fd` was just returned by memfd_create and is owned by nobody else.
    let mut file = unsafe { File::from_raw_fd(fd) };
    // xrgb8888, little endian.
    file.write_all(&[0x00, 0x00, 0x00, 0xff])?;

    display.create_shm_buffer(
        std::os::fd::AsFd::as_fd(&file),
        &ShmBufferDesc {
            pool_size: 4,
            offset: 0,
            width: 1,
            height: 1,
            stride: 4,
            format: XRGB8888,
        },
    )
}

/// `wl_shm.format` value of xrgb8888, not a DRM fourcc.
pub const XRGB8888: u32 = 1;
/// `wl_shm.format` value of argb8888, not a DRM fourcc.
pub const ARGB8888: u32 = 0;
