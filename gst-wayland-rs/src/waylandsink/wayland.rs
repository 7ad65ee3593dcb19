// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! [`DisplayBackend`] implementation on top of `wl-display`.

use std::{ffi::c_void, os::fd::BorrowedFd, time::Duration};

use tracing::debug;
use wl_display::{
    Buffer, CallbackId, Display, DmabufDesc, FrameQueue, FrameQueueHandle, Rectangle,
    ShmBufferDesc, ToplevelOptions, Transform, Window,
};

use crate::waylandsink::display::{
    BufferHandle, DisplayBackend, DisplayFormats, FrameSource, WindowHandle,
};
use crate::waylandsink::video_format;

/// A compositor connection plus its formats in GStreamer terms.
pub(crate) struct WaylandDisplay {
    display: Display,
    formats: DisplayFormats,
}

impl WaylandDisplay {
    /// Opens our own connection, named by `name` or `WAYLAND_DISPLAY`.
    pub fn connect(name: Option<&str>) -> wl_display::Result<Self> {
        Ok(Self::new(Display::connect(name)?))
    }

    /// Wraps a `wl_display` handed over by the application.
    ///
    /// # Safety
    ///
    /// `handle` must be a live `wl_display` that outlives the returned value.
    pub unsafe fn from_external(handle: *mut c_void) -> wl_display::Result<Self> {
        Ok(Self::new(unsafe { Display::from_external(handle) }?))
    }

    fn new(display: Display) -> Self {
        let raw = display.formats();
        let formats = DisplayFormats {
            shm: raw
                .shm
                .iter()
                .filter_map(|code| video_format::from_shm_format(*code))
                .collect(),
            dmabuf: raw
                .dmabuf
                .iter()
                .filter_map(|code| video_format::from_drm_fourcc(*code))
                .collect(),
        };
        debug!(
            "Display {} formats: shm {:?}, dmabuf {:?}",
            display.id(),
            formats.shm,
            formats.dmabuf
        );
        Self { display, formats }
    }
}

impl BufferHandle for Buffer {
    fn set_release_listener(&self, listener: Box<dyn Fn() + Send + Sync>) {
        Buffer::set_release_listener(self, listener)
    }
}

impl FrameSource for FrameQueue {
    type Handle = FrameQueueHandle;

    fn handle(&self) -> FrameQueueHandle {
        FrameQueue::handle(self)
    }

    fn dispatch_pending(&mut self) -> wl_display::Result<Vec<CallbackId>> {
        FrameQueue::dispatch_pending(self)
    }

    fn blocking_dispatch(&mut self, timeout: Duration) -> wl_display::Result<Vec<CallbackId>> {
        FrameQueue::blocking_dispatch(self, timeout)
    }
}

impl WindowHandle for Window {
    type Buffer = Buffer;
    type FrameHandle = FrameQueueHandle;

    fn is_toplevel(&self) -> bool {
        Window::is_toplevel(self)
    }

    fn render_rectangle(&self) -> Rectangle {
        Window::render_rectangle(self)
    }

    fn set_render_rectangle(&self, rect: Rectangle) {
        Window::set_render_rectangle(self, rect)
    }

    fn set_transform(&self, transform: Transform) {
        Window::set_transform(self, transform)
    }

    fn set_fullscreen(&self, fullscreen: bool) {
        Window::set_fullscreen(self, fullscreen)
    }

    fn set_closed_listener(&self, listener: Box<dyn Fn() + Send + Sync>) {
        Window::set_closed_listener(self, listener)
    }

    fn request_frame(&self, queue: &FrameQueueHandle) -> CallbackId {
        Window::request_frame(self, queue)
    }

    fn render(&self, buffer: Option<&Buffer>, video_size: Option<(i32, i32)>) {
        Window::render(self, buffer, video_size)
    }
}

impl DisplayBackend for WaylandDisplay {
    type Buffer = Buffer;
    type FrameQueue = FrameQueue;
    type Window = Window;

    fn id(&self) -> u64 {
        self.display.id()
    }

    fn has_own_display(&self) -> bool {
        self.display.has_own_display()
    }

    fn formats(&self) -> &DisplayFormats {
        &self.formats
    }

    fn create_frame_queue(&self) -> FrameQueue {
        self.display.create_frame_queue()
    }

    fn create_shm_buffer(
        &self,
        fd: BorrowedFd<'_>,
        desc: &ShmBufferDesc,
    ) -> wl_display::Result<Buffer> {
        self.display.create_shm_buffer(fd, desc)
    }

    fn create_dmabuf_buffer(&self, desc: &DmabufDesc<'_>) -> wl_display::Result<Buffer> {
        self.display.create_dmabuf_buffer(desc)
    }

    fn create_toplevel(
        &self,
        video_size: (i32, i32),
        options: &ToplevelOptions,
    ) -> wl_display::Result<Window> {
        Window::new_toplevel(&self.display, video_size, options)
    }

    fn create_embedded(&self, handle: usize) -> wl_display::Result<Window> {
        // Safety: the overlay interface hands us a `wl_surface` pointer that
        // the application keeps alive while the sink uses it.
        let parent = unsafe { self.display.surface_from_handle(handle) }?;
        Window::new_embedded(&self.display, &parent)
    }
}
