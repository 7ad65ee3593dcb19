// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Display seam of the presentation engine.
//!
//! The engine only talks to the compositor through these traits. The
//! production implementation lives in `wayland.rs`; the element tests drive
//! the engine with an in-process fake.

use std::{os::fd::BorrowedFd, time::Duration};

use gst_video::VideoFormat;
use gstreamer_video as gst_video;
use wl_display::{CallbackId, DmabufDesc, Rectangle, ShmBufferDesc, ToplevelOptions, Transform};

/// Formats the compositor accepts, already mapped to GStreamer formats.
///
/// Produced once when the display is connected and never modified.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct DisplayFormats {
    pub shm: Vec<VideoFormat>,
    pub dmabuf: Vec<VideoFormat>,
}

impl DisplayFormats {
    pub fn supports_shm(&self, format: VideoFormat) -> bool {
        self.shm.contains(&format)
    }

    pub fn supports_dmabuf(&self, format: VideoFormat) -> bool {
        self.dmabuf.contains(&format)
    }
}

/// Compositor-side buffer handle.
pub(crate) trait BufferHandle: Send + Sync + 'static {
    /// Installs the callback run when the compositor is done reading.
    fn set_release_listener(&self, listener: Box<dyn Fn() + Send + Sync>);
}

/// Queue on which surface frame callbacks complete.
pub(crate) trait FrameSource: Send + 'static {
    type Handle: Clone + Send + Sync + 'static;

    fn handle(&self) -> Self::Handle;

    /// Completions already received, without blocking.
    fn dispatch_pending(&mut self) -> wl_display::Result<Vec<CallbackId>>;

    /// Waits up to `timeout` for completions. An empty result is not an error.
    fn blocking_dispatch(&mut self, timeout: Duration) -> wl_display::Result<Vec<CallbackId>>;
}

/// A window the video is presented in.
pub(crate) trait WindowHandle: Send + 'static {
    type Buffer: BufferHandle;
    type FrameHandle;

    fn is_toplevel(&self) -> bool;
    fn render_rectangle(&self) -> Rectangle;
    fn set_render_rectangle(&self, rect: Rectangle);
    fn set_transform(&self, transform: Transform);
    fn set_fullscreen(&self, fullscreen: bool);
    fn set_closed_listener(&self, listener: Box<dyn Fn() + Send + Sync>);
    fn request_frame(&self, queue: &Self::FrameHandle) -> CallbackId;
    fn render(&self, buffer: Option<&Self::Buffer>, video_size: Option<(i32, i32)>);
}

/// A connection to the compositor.
pub(crate) trait DisplayBackend: Send + Sync + 'static {
    type Buffer: BufferHandle;
    type FrameQueue: FrameSource;
    type Window: WindowHandle<
            Buffer = Self::Buffer,
            FrameHandle = <Self::FrameQueue as FrameSource>::Handle,
        >;

    /// Process-unique identifier, used to tag cached buffers.
    fn id(&self) -> u64;

    /// `true` when the sink opened the connection itself.
    fn has_own_display(&self) -> bool;

    fn formats(&self) -> &DisplayFormats;

    fn create_frame_queue(&self) -> Self::FrameQueue;

    fn create_shm_buffer(
        &self,
        fd: BorrowedFd<'_>,
        desc: &ShmBufferDesc,
    ) -> wl_display::Result<Self::Buffer>;

    fn create_dmabuf_buffer(&self, desc: &DmabufDesc<'_>) -> wl_display::Result<Self::Buffer>;

    fn create_toplevel(
        &self,
        video_size: (i32, i32),
        options: &ToplevelOptions,
    ) -> wl_display::Result<Self::Window>;

    /// Embeds a window into the application surface behind `handle`.
    fn create_embedded(&self, handle: usize) -> wl_display::Result<Self::Window>;
}
