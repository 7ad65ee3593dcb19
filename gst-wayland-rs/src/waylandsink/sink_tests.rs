// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Tests for rswaylandsink.
//!
//! The presentation engine is driven with an in-process compositor fake that
//! records what gets committed and hands frame callbacks back on request.
//! Element level tests only cover what works without a compositor.

use std::{
    collections::{HashMap, VecDeque},
    io::Write,
    os::fd::{BorrowedFd, IntoRawFd},
    sync::{
        Arc, Condvar, Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use gst::prelude::*;
use gst_video::{VideoFormat, VideoFrameRef, VideoInfo, VideoOrientationMethod};
use gstreamer as gst;
use gstreamer_allocators as gst_allocators;
use gstreamer_video as gst_video;
use tracing_test::traced_test;
use wl_display::{
    CallbackId, ClosedListener, DmabufDesc, Rectangle, ShmBufferDesc, ToplevelOptions, Transform,
};

use crate::waylandsink::buffer;
use crate::waylandsink::display::{
    BufferHandle, DisplayBackend, DisplayFormats, FrameSource, WindowHandle,
};
use crate::waylandsink::presenter::{Presented, Presenter, RenderError, WindowHooks};
use crate::waylandsink::state::RenderSettings;

static NEXT_DISPLAY_ID: AtomicU64 = AtomicU64::new(1);

/// Log capture is set up by `#[traced_test]`, so only GStreamer needs init.
fn init() {
    gst::init().unwrap();
}

/// One surface commit seen by the fake compositor.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Commit {
    buffer: Option<u64>,
    video_size: Option<(i32, i32)>,
}

/// Compositor side state shared by all objects of a fake display.
#[derive(Default)]
struct Compositor {
    next_id: AtomicU64,
    /// Complete frame callbacks as soon as the surface is committed.
    auto_complete: AtomicBool,
    outstanding: Mutex<Vec<CallbackId>>,
    max_outstanding: AtomicUsize,
    requested: AtomicUsize,
    done: Mutex<VecDeque<CallbackId>>,
    done_cond: Condvar,
    commits: Mutex<Vec<Commit>>,
    shm_buffers: AtomicUsize,
    dmabuf_buffers: AtomicUsize,
    release_listeners: Mutex<HashMap<u64, Arc<dyn Fn() + Send + Sync>>>,
    toplevels: AtomicUsize,
    embedded: AtomicUsize,
    windows_dropped: AtomicUsize,
    transform: Mutex<Transform>,
    closed_listener: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl Compositor {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Signals every outstanding frame callback as done.
    fn complete_all(&self) {
        let ids: Vec<_> = self.outstanding.lock().unwrap().drain(..).collect();
        self.done.lock().unwrap().extend(ids);
        self.done_cond.notify_all();
    }

    fn release(&self, buffer: u64) {
        let listener = self.release_listeners.lock().unwrap().get(&buffer).cloned();
        if let Some(listener) = listener {
            listener();
        }
    }

    fn close_window(&self) {
        let listener = self.closed_listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener();
        }
    }

    fn commits(&self) -> Vec<Commit> {
        self.commits.lock().unwrap().clone()
    }

    fn outstanding(&self) -> usize {
        self.outstanding.lock().unwrap().len()
    }
}

struct FakeBuffer {
    id: u64,
    compositor: Arc<Compositor>,
}

impl BufferHandle for FakeBuffer {
    fn set_release_listener(&self, listener: Box<dyn Fn() + Send + Sync>) {
        self.compositor
            .release_listeners
            .lock()
            .unwrap()
            .insert(self.id, Arc::from(listener));
    }
}

impl Drop for FakeBuffer {
    fn drop(&mut self) {
        self.compositor
            .release_listeners
            .lock()
            .unwrap()
            .remove(&self.id);
    }
}

struct FakeFrameQueue {
    compositor: Arc<Compositor>,
}

impl FrameSource for FakeFrameQueue {
    type Handle = ();

    fn handle(&self) {}

    fn dispatch_pending(&mut self) -> wl_display::Result<Vec<CallbackId>> {
        Ok(self.compositor.done.lock().unwrap().drain(..).collect())
    }

    fn blocking_dispatch(&mut self, timeout: Duration) -> wl_display::Result<Vec<CallbackId>> {
        let done = self.compositor.done.lock().unwrap();
        let (mut done, _) = self
            .compositor
            .done_cond
            .wait_timeout_while(done, timeout, |done| done.is_empty())
            .unwrap();
        Ok(done.drain(..).collect())
    }
}

struct FakeWindow {
    toplevel: bool,
    rect: Mutex<Rectangle>,
    compositor: Arc<Compositor>,
}

impl WindowHandle for FakeWindow {
    type Buffer = FakeBuffer;
    type FrameHandle = ();

    fn is_toplevel(&self) -> bool {
        self.toplevel
    }

    fn render_rectangle(&self) -> Rectangle {
        *self.rect.lock().unwrap()
    }

    fn set_render_rectangle(&self, rect: Rectangle) {
        *self.rect.lock().unwrap() = rect;
    }

    fn set_transform(&self, transform: Transform) {
        *self.compositor.transform.lock().unwrap() = transform;
    }

    fn set_fullscreen(&self, _fullscreen: bool) {}

    fn set_closed_listener(&self, listener: Box<dyn Fn() + Send + Sync>) {
        *self.compositor.closed_listener.lock().unwrap() = Some(Arc::from(listener));
    }

    fn request_frame(&self, _queue: &()) -> CallbackId {
        let id = self.compositor.next_id();
        let mut outstanding = self.compositor.outstanding.lock().unwrap();
        outstanding.push(id);
        self.compositor
            .max_outstanding
            .fetch_max(outstanding.len(), Ordering::SeqCst);
        self.compositor.requested.fetch_add(1, Ordering::SeqCst);
        id
    }

    fn render(&self, buffer: Option<&FakeBuffer>, video_size: Option<(i32, i32)>) {
        self.compositor.commits.lock().unwrap().push(Commit {
            buffer: buffer.map(|b| b.id),
            video_size,
        });
        if self.compositor.auto_complete.load(Ordering::SeqCst) {
            self.compositor.complete_all();
        }
    }
}

impl Drop for FakeWindow {
    fn drop(&mut self) {
        self.compositor.windows_dropped.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeDisplay {
    id: u64,
    own: bool,
    formats: DisplayFormats,
    compositor: Arc<Compositor>,
}

impl FakeDisplay {
    fn new(own: bool) -> (Self, Arc<Compositor>) {
        let compositor = Arc::new(Compositor::default());
        let display = Self {
            id: NEXT_DISPLAY_ID.fetch_add(1, Ordering::SeqCst),
            own,
            formats: DisplayFormats {
                shm: vec![VideoFormat::Bgrx, VideoFormat::Bgra, VideoFormat::I420],
                dmabuf: vec![VideoFormat::Nv12, VideoFormat::Bgrx],
            },
            compositor: compositor.clone(),
        };
        (display, compositor)
    }

    fn buffer(&self) -> FakeBuffer {
        FakeBuffer {
            id: self.compositor.next_id(),
            compositor: self.compositor.clone(),
        }
    }
}

impl DisplayBackend for FakeDisplay {
    type Buffer = FakeBuffer;
    type FrameQueue = FakeFrameQueue;
    type Window = FakeWindow;

    fn id(&self) -> u64 {
        self.id
    }

    fn has_own_display(&self) -> bool {
        self.own
    }

    fn formats(&self) -> &DisplayFormats {
        &self.formats
    }

    fn create_frame_queue(&self) -> FakeFrameQueue {
        FakeFrameQueue {
            compositor: self.compositor.clone(),
        }
    }

    fn create_shm_buffer(
        &self,
        _fd: BorrowedFd<'_>,
        desc: &ShmBufferDesc,
    ) -> wl_display::Result<FakeBuffer> {
        if desc.stride < desc.width {
            return Err(wl_display::Error::Buffer("stride too small".into()));
        }
        self.compositor.shm_buffers.fetch_add(1, Ordering::SeqCst);
        Ok(self.buffer())
    }

    fn create_dmabuf_buffer(&self, desc: &DmabufDesc<'_>) -> wl_display::Result<FakeBuffer> {
        if desc.planes.is_empty() {
            return Err(wl_display::Error::Buffer("no planes".into()));
        }
        self.compositor.dmabuf_buffers.fetch_add(1, Ordering::SeqCst);
        Ok(self.buffer())
    }

    fn create_toplevel(
        &self,
        video_size: (i32, i32),
        options: &ToplevelOptions,
    ) -> wl_display::Result<FakeWindow> {
        self.compositor.toplevels.fetch_add(1, Ordering::SeqCst);
        let size = if options.size.0 > 0 && options.size.1 > 0 {
            options.size
        } else {
            video_size
        };
        Ok(FakeWindow {
            toplevel: true,
            rect: Mutex::new(Rectangle::new(0, 0, size.0, size.1)),
            compositor: self.compositor.clone(),
        })
    }

    fn create_embedded(&self, handle: usize) -> wl_display::Result<FakeWindow> {
        if handle == 0 {
            return Err(wl_display::Error::InvalidHandle);
        }
        self.compositor.embedded.fetch_add(1, Ordering::SeqCst);
        Ok(FakeWindow {
            toplevel: false,
            rect: Mutex::new(Rectangle::default()),
            compositor: self.compositor.clone(),
        })
    }
}

/// Hooks of an application that never provides a surface.
#[derive(Default)]
struct NoSurface {
    prepared: AtomicUsize,
    closed: Arc<AtomicBool>,
}

impl WindowHooks for NoSurface {
    fn prepare_window_handle(&self) {
        self.prepared.fetch_add(1, Ordering::SeqCst);
    }

    fn closed_listener(&self) -> ClosedListener {
        let closed = self.closed.clone();
        Box::new(move || closed.store(true, Ordering::SeqCst))
    }
}

/// Hooks of an application handing over a surface when asked.
struct EmbedOnPrepare<'a> {
    presenter: &'a Presenter<FakeDisplay>,
    handle: usize,
}

impl WindowHooks for EmbedOnPrepare<'_> {
    fn prepare_window_handle(&self) {
        self.presenter.set_window_handle(self.handle).unwrap();
    }

    fn closed_listener(&self) -> ClosedListener {
        Box::new(|| ())
    }
}

fn video_info(format: VideoFormat, width: u32, height: u32) -> VideoInfo {
    VideoInfo::builder(format, width, height)
        .fps(gst::Fraction::new(30, 1))
        .build()
        .unwrap()
}

fn caps_for(info: &VideoInfo, dmabuf: bool) -> gst::Caps {
    let mut caps = info.to_caps().unwrap();
    if dmabuf {
        caps.get_mut()
            .unwrap()
            .set_features_simple(Some(gst::CapsFeatures::new([
                gst_allocators::CAPS_FEATURE_MEMORY_DMABUF,
            ])));
    }
    caps
}

fn presenter_with(
    own: bool,
    info: &VideoInfo,
    dmabuf: bool,
) -> (Presenter<FakeDisplay>, Arc<Compositor>) {
    let (display, compositor) = FakeDisplay::new(own);
    let presenter = Presenter::default();
    assert!(presenter.set_display(display).unwrap());
    presenter.set_caps(&caps_for(info, dmabuf)).unwrap();
    (presenter, compositor)
}

/// A frame in plain system memory, filled with a byte pattern.
fn system_frame(info: &VideoInfo) -> gst::Buffer {
    let data: Vec<u8> = (0..info.size()).map(|i| (i % 251) as u8).collect();
    gst::Buffer::from_mut_slice(data)
}

fn temp_file(size: usize, fill: u8) -> std::fs::File {
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&vec![fill; size]).unwrap();
    file
}

/// A frame made of one fd-backed memory.
fn fd_frame(info: &VideoInfo, fill: u8) -> gst::Buffer {
    let file = temp_file(info.size(), fill);
    let allocator = gst_allocators::FdAllocator::new();
    let mem = unsafe {
        allocator.alloc(
            file.into_raw_fd(),
            info.size(),
            gst_allocators::FdMemoryFlags::empty(),
        )
    }
    .unwrap();
    let mut frame = gst::Buffer::new();
    frame.get_mut().unwrap().append_memory(mem);
    frame
}

/// A frame made of one dmabuf memory.
fn dmabuf_frame(info: &VideoInfo) -> gst::Buffer {
    let file = temp_file(info.size(), 0x80);
    let allocator = gst_allocators::DmaBufAllocator::new();
    let mem = unsafe { allocator.alloc(file, info.size()) }.unwrap();
    let mut frame = gst::Buffer::new();
    frame.get_mut().unwrap().append_memory(mem);
    frame
}

#[test]
fn first_frame_creates_toplevel_with_video_size() {
    init();
    let info = video_info(VideoFormat::Bgrx, 320, 240);
    let (presenter, compositor) = presenter_with(true, &info, false);
    let hooks = NoSurface::default();

    let ret = presenter
        .show_frame(&fd_frame(&info, 1), &RenderSettings::default(), &hooks)
        .unwrap();

    assert_eq!(ret, Presented::Shown);
    assert_eq!(hooks.prepared.load(Ordering::SeqCst), 1);
    assert_eq!(compositor.toplevels.load(Ordering::SeqCst), 1);
    let commits = compositor.commits();
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].video_size, Some((320, 240)));
}

#[test]
#[traced_test]
fn unchanged_frame_is_not_submitted_twice() {
    init();
    let info = video_info(VideoFormat::Bgrx, 320, 240);
    let (presenter, compositor) = presenter_with(true, &info, false);
    compositor.auto_complete.store(true, Ordering::SeqCst);
    let hooks = NoSurface::default();
    let frame = fd_frame(&info, 7);

    let first = presenter
        .show_frame(&frame, &RenderSettings::default(), &hooks)
        .unwrap();
    let second = presenter
        .show_frame(&frame, &RenderSettings::default(), &hooks)
        .unwrap();

    assert_eq!(first, Presented::Shown);
    assert_eq!(second, Presented::Duplicate);
    assert_eq!(compositor.requested.load(Ordering::SeqCst), 1);
    assert_eq!(compositor.commits().len(), 1);
    assert_eq!(compositor.shm_buffers.load(Ordering::SeqCst), 1);
    assert!(logs_contain("already on screen"));
}

#[test]
fn second_frame_waits_for_frame_callback() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(true, &info, false);
    let hooks = NoSurface::default();

    presenter
        .show_frame(&fd_frame(&info, 1), &RenderSettings::default(), &hooks)
        .unwrap();
    assert!(presenter.is_armed());

    let completer = {
        let compositor = compositor.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            assert_eq!(compositor.outstanding(), 1);
            compositor.complete_all();
        })
    };

    let start = Instant::now();
    let ret = presenter
        .show_frame(&fd_frame(&info, 2), &RenderSettings::default(), &hooks)
        .unwrap();
    completer.join().unwrap();

    assert_eq!(ret, Presented::Shown);
    assert!(start.elapsed() >= Duration::from_millis(250));
    assert_eq!(compositor.commits().len(), 2);
    assert_eq!(compositor.max_outstanding.load(Ordering::SeqCst), 1);
}

#[test]
fn at_most_one_callback_outstanding() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(true, &info, false);
    let hooks = NoSurface::default();

    let stop = Arc::new(AtomicBool::new(false));
    let completer = {
        let compositor = compositor.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            while !stop.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
                compositor.complete_all();
            }
        })
    };

    for i in 0..20u8 {
        presenter
            .show_frame(&fd_frame(&info, i), &RenderSettings::default(), &hooks)
            .unwrap();
        presenter.expose().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    completer.join().unwrap();

    assert_eq!(compositor.max_outstanding.load(Ordering::SeqCst), 1);
    assert!(compositor.requested.load(Ordering::SeqCst) >= 20);
}

#[test]
fn expose_while_armed_is_ignored() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(true, &info, false);
    let hooks = NoSurface::default();

    presenter
        .show_frame(&fd_frame(&info, 1), &RenderSettings::default(), &hooks)
        .unwrap();
    presenter.expose().unwrap();

    assert!(presenter.is_armed());
    assert_eq!(compositor.commits().len(), 1);
    assert_eq!(compositor.requested.load(Ordering::SeqCst), 1);

    compositor.complete_all();
    // The completion is only applied by the next pump.
    presenter.expose().unwrap();
    assert_eq!(compositor.commits().len(), 1);
}

#[test]
fn expose_redraws_without_video_info() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(true, &info, false);
    compositor.auto_complete.store(true, Ordering::SeqCst);
    let hooks = NoSurface::default();
    let frame = fd_frame(&info, 1);

    presenter
        .show_frame(&frame, &RenderSettings::default(), &hooks)
        .unwrap();
    // Applies the completion delivered on commit.
    assert_eq!(
        presenter
            .show_frame(&frame, &RenderSettings::default(), &hooks)
            .unwrap(),
        Presented::Duplicate
    );
    presenter.expose().unwrap();

    let commits = compositor.commits();
    assert_eq!(commits.len(), 2);
    assert_eq!(commits[0].buffer, commits[1].buffer);
    assert_eq!(commits[1].video_size, None);
}

#[test]
fn expose_without_frame_does_nothing() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(true, &info, false);
    presenter.expose().unwrap();
    assert!(compositor.commits().is_empty());
}

#[test]
fn dmabuf_frame_is_imported_without_copy() {
    init();
    let info = video_info(VideoFormat::Nv12, 320, 240);
    let (presenter, compositor) = presenter_with(true, &info, true);
    let hooks = NoSurface::default();
    assert!(presenter.uses_dmabuf());

    let frame = dmabuf_frame(&info);
    presenter
        .show_frame(&frame, &RenderSettings::default(), &hooks)
        .unwrap();

    assert_eq!(compositor.dmabuf_buffers.load(Ordering::SeqCst), 1);
    assert_eq!(compositor.shm_buffers.load(Ordering::SeqCst), 0);
    assert_eq!(presenter.pool_acquisitions(), 0);
    let shown = presenter.last_frame().unwrap();
    assert_eq!(shown.as_ptr(), frame.as_ptr());
}

#[test]
fn system_memory_is_copied_into_pool() {
    init();
    // 100 BGRx pixels are 400 bytes, the pool pads rows to 448.
    let info = video_info(VideoFormat::Bgrx, 100, 24);
    let (presenter, compositor) = presenter_with(true, &info, false);
    let hooks = NoSurface::default();

    let frame = system_frame(&info);
    presenter
        .show_frame(&frame, &RenderSettings::default(), &hooks)
        .unwrap();

    assert_eq!(presenter.pool_acquisitions(), 1);
    assert_eq!(compositor.shm_buffers.load(Ordering::SeqCst), 1);
    assert_eq!(compositor.dmabuf_buffers.load(Ordering::SeqCst), 0);

    let shown = presenter.last_frame().unwrap();
    assert_ne!(shown.as_ptr(), frame.as_ptr());

    let src = VideoFrameRef::from_buffer_ref_readable(frame.as_ref(), &info).unwrap();
    let dst = VideoFrameRef::from_buffer_ref_readable(shown.as_ref(), &info).unwrap();
    let src_stride = src.plane_stride()[0] as usize;
    let dst_stride = dst.plane_stride()[0] as usize;
    assert_eq!(src_stride, 400);
    assert_eq!(dst_stride % 64, 0);
    assert!(dst_stride > src_stride);

    let src_data = src.plane_data(0).unwrap();
    let dst_data = dst.plane_data(0).unwrap();
    let row = info.width() as usize * 4;
    for y in 0..info.height() as usize {
        assert_eq!(
            &src_data[y * src_stride..y * src_stride + row],
            &dst_data[y * dst_stride..y * dst_stride + row],
            "row {y} differs"
        );
    }
}

#[test]
fn pool_buffers_keep_their_display_buffer() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 16);
    let (presenter, compositor) = presenter_with(true, &info, false);
    let hooks = NoSurface::default();

    for _ in 0..6 {
        compositor.complete_all();
        presenter
            .show_frame(&system_frame(&info), &RenderSettings::default(), &hooks)
            .unwrap();
        // Let the compositor give the previous buffer back.
        let commits = compositor.commits();
        if commits.len() >= 2
            && let Some(previous) = commits[commits.len() - 2].buffer
        {
            compositor.release(previous);
        }
    }

    assert_eq!(presenter.pool_acquisitions(), 6);
    // Released pool buffers cycle with their wl_buffer attached.
    assert!(compositor.shm_buffers.load(Ordering::SeqCst) < 6);
}

#[test]
fn unsupported_format_without_direct_path_fails() {
    init();
    // NV12 is only a dmabuf format of the fake display.
    let info = video_info(VideoFormat::Nv12, 64, 64);
    let (presenter, _compositor) = presenter_with(true, &info, true);
    let hooks = NoSurface::default();

    let err = presenter
        .show_frame(&system_frame(&info), &RenderSettings::default(), &hooks)
        .unwrap_err();
    assert!(matches!(err, RenderError::NoDisplayBuffer(_)));
    assert_eq!(presenter.pool_acquisitions(), 0);
}

#[test]
fn unconfigured_window_is_an_error_until_sized() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(false, &info, false);
    assert!(presenter.set_window_handle(0x1000).unwrap());
    let hooks = NoSurface::default();
    let frame = fd_frame(&info, 3);

    let err = presenter
        .show_frame(&frame, &RenderSettings::default(), &hooks)
        .unwrap_err();
    assert!(matches!(err, RenderError::NoWindowSize));
    assert!(compositor.commits().is_empty());
    assert_eq!(hooks.prepared.load(Ordering::SeqCst), 0);

    assert!(
        presenter
            .set_render_rectangle(Rectangle::new(0, 0, 640, 480))
            .unwrap()
    );
    assert_eq!(
        presenter
            .show_frame(&frame, &RenderSettings::default(), &hooks)
            .unwrap(),
        Presented::Shown
    );
    assert_eq!(compositor.toplevels.load(Ordering::SeqCst), 0);
}

#[test]
fn render_rectangle_without_window_is_ignored() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, _compositor) = presenter_with(false, &info, false);
    assert!(
        !presenter
            .set_render_rectangle(Rectangle::new(0, 0, 640, 480))
            .unwrap()
    );
}

#[test]
fn application_surface_provided_on_prepare() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(false, &info, false);
    let hooks = EmbedOnPrepare {
        presenter: &presenter,
        handle: 0x2000,
    };

    // The embedded window has no size yet.
    let err = presenter
        .show_frame(&fd_frame(&info, 1), &RenderSettings::default(), &hooks)
        .unwrap_err();
    assert!(matches!(err, RenderError::NoWindowSize));
    assert_eq!(compositor.embedded.load(Ordering::SeqCst), 1);
    assert_eq!(compositor.toplevels.load(Ordering::SeqCst), 0);
}

#[test]
fn second_window_handle_is_ignored() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(false, &info, false);
    assert!(presenter.set_window_handle(0x1000).unwrap());
    assert!(!presenter.set_window_handle(0x3000).unwrap());
    assert_eq!(compositor.embedded.load(Ordering::SeqCst), 1);
}

#[test]
fn external_surface_needs_shared_display() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(true, &info, false);

    let err = presenter.set_window_handle(0x1000).unwrap_err();
    assert!(matches!(err, RenderError::OwnDisplayWithExternalSurface));
    assert!(!presenter.has_window());
    assert_eq!(compositor.embedded.load(Ordering::SeqCst), 0);
}

#[test]
fn auto_rotation_follows_tag() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(false, &info, false);
    presenter.set_window_handle(0x1000).unwrap();

    presenter
        .set_rotation(VideoOrientationMethod::Auto, false)
        .unwrap();
    presenter
        .set_rotation(VideoOrientationMethod::_90r, true)
        .unwrap();
    assert_eq!(*compositor.transform.lock().unwrap(), Transform::Rotate90);
}

#[test]
fn explicit_rotation_wins_over_tag() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(true, &info, false);
    compositor.auto_complete.store(true, Ordering::SeqCst);

    presenter
        .set_rotation(VideoOrientationMethod::_180, false)
        .unwrap();
    presenter
        .set_rotation(VideoOrientationMethod::_90r, true)
        .unwrap();
    // Applied when the toplevel is created.
    presenter
        .show_frame(
            &fd_frame(&info, 1),
            &RenderSettings::default(),
            &NoSurface::default(),
        )
        .unwrap();
    assert_eq!(*compositor.transform.lock().unwrap(), Transform::Rotate180);
}

#[test]
fn closing_toplevel_notifies_element() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(true, &info, false);
    let hooks = NoSurface::default();

    presenter
        .show_frame(&fd_frame(&info, 1), &RenderSettings::default(), &hooks)
        .unwrap();
    compositor.close_window();
    assert!(hooks.closed.load(Ordering::SeqCst));
}

#[test]
fn flushing_interrupts_wait() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, _compositor) = presenter_with(true, &info, false);
    let hooks = NoSurface::default();

    presenter
        .show_frame(&fd_frame(&info, 1), &RenderSettings::default(), &hooks)
        .unwrap();
    presenter.set_flushing(true);

    let err = presenter
        .show_frame(&fd_frame(&info, 2), &RenderSettings::default(), &hooks)
        .unwrap_err();
    assert!(matches!(err, RenderError::Flushing));

    presenter.set_flushing(false);
    assert!(presenter.is_armed());
}

#[test]
fn toplevel_teardown_drops_display() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(true, &info, false);
    let hooks = NoSurface::default();

    presenter
        .show_frame(&fd_frame(&info, 1), &RenderSettings::default(), &hooks)
        .unwrap();

    presenter.stop().unwrap();
    assert!(!presenter.is_armed());
    assert!(presenter.last_frame().is_none());
    assert!(!presenter.has_window());
    assert_eq!(compositor.windows_dropped.load(Ordering::SeqCst), 1);

    assert!(presenter.close().unwrap());
    assert!(!presenter.has_display());
}

#[test]
fn external_surface_teardown_keeps_display() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(false, &info, false);
    presenter.set_window_handle(0x1000).unwrap();
    presenter
        .set_render_rectangle(Rectangle::new(0, 0, 64, 64))
        .unwrap();
    presenter
        .show_frame(
            &fd_frame(&info, 1),
            &RenderSettings::default(),
            &NoSurface::default(),
        )
        .unwrap();

    presenter.stop().unwrap();
    assert!(presenter.has_window());
    assert_eq!(compositor.windows_dropped.load(Ordering::SeqCst), 0);
    // Detached with a null buffer.
    assert_eq!(compositor.commits().last().unwrap().buffer, None);

    assert!(!presenter.close().unwrap());
    assert!(presenter.has_display());
}

#[test]
fn release_drops_hold_and_teardown_releases_all() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(true, &info, false);
    compositor.auto_complete.store(true, Ordering::SeqCst);
    let hooks = NoSurface::default();
    let display_id = presenter.display_id().unwrap();

    let first = fd_frame(&info, 1);
    presenter
        .show_frame(&first, &RenderSettings::default(), &hooks)
        .unwrap();
    let first_entry = buffer::cached::<FakeDisplay>(&first, display_id).unwrap();
    assert!(first_entry.is_held());

    compositor.release(compositor.commits()[0].buffer.unwrap());
    assert!(!first_entry.is_held());

    let second = fd_frame(&info, 2);
    presenter
        .show_frame(&second, &RenderSettings::default(), &hooks)
        .unwrap();
    let second_entry = buffer::cached::<FakeDisplay>(&second, display_id).unwrap();
    assert!(second_entry.is_held());
    assert_eq!(presenter.live_display_buffers(), 2);

    // No release from the compositor: teardown has to force it.
    presenter.stop().unwrap();
    presenter.close().unwrap();
    assert!(!second_entry.is_held());
}

#[test]
fn cached_entry_is_per_display() {
    init();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    let (presenter, compositor) = presenter_with(true, &info, false);
    compositor.auto_complete.store(true, Ordering::SeqCst);
    let display_id = presenter.display_id().unwrap();

    let frame = fd_frame(&info, 1);
    presenter
        .show_frame(&frame, &RenderSettings::default(), &NoSurface::default())
        .unwrap();
    assert!(buffer::cached::<FakeDisplay>(&frame, display_id).is_some());
    assert!(buffer::cached::<FakeDisplay>(&frame, display_id + 1000).is_none());
}

#[test]
fn caps_follow_display_formats() {
    init();
    let presenter = Presenter::<FakeDisplay>::default();
    let template = presenter.caps(None);
    assert_eq!(template.size(), 2);

    let (display, _compositor) = FakeDisplay::new(true);
    presenter.set_display(display).unwrap();
    let caps = presenter.caps(None);
    let shm = caps.structure(0).unwrap().get::<gst::List>("format").unwrap();
    assert_eq!(shm.iter().count(), 3);
    let dmabuf = caps.structure(1).unwrap().get::<gst::List>("format").unwrap();
    assert_eq!(dmabuf.iter().count(), 2);
}

#[test]
fn set_caps_rejects_formats_of_other_memory() {
    init();
    let (display, _compositor) = FakeDisplay::new(true);
    let presenter = Presenter::default();
    presenter.set_display(display).unwrap();

    let info = video_info(VideoFormat::Nv12, 64, 64);
    assert!(presenter.set_caps(&caps_for(&info, false)).is_err());
    assert!(presenter.set_caps(&caps_for(&info, true)).is_ok());
}

#[test]
fn set_caps_needs_display() {
    init();
    let presenter = Presenter::<FakeDisplay>::default();
    let info = video_info(VideoFormat::Bgrx, 64, 64);
    assert!(presenter.set_caps(&caps_for(&info, false)).is_err());
}

#[test]
fn element_properties_have_defaults() {
    init();
    crate::waylandsink::register_static().unwrap();
    let sink = gst::ElementFactory::make("rswaylandsink").build().unwrap();

    assert_eq!(sink.property::<Option<String>>("display"), None);
    assert!(!sink.property::<bool>("fullscreen"));
    assert!(sink.property::<bool>("suppress-interlace"));
    assert_eq!(sink.property::<i32>("position-x"), -1);
    assert_eq!(sink.property::<i32>("out-height"), -1);
    assert_eq!(
        sink.property::<VideoOrientationMethod>("rotate-method"),
        VideoOrientationMethod::Identity
    );

    sink.set_property("rotate-method", VideoOrientationMethod::Auto);
    sink.set_property("out-width", 640i32);
    assert_eq!(
        sink.property::<VideoOrientationMethod>("rotate-method"),
        VideoOrientationMethod::Auto
    );
    assert_eq!(sink.property::<i32>("out-width"), 640);
}

#[test]
fn element_exposes_overlay_interface() {
    init();
    crate::waylandsink::register_static().unwrap();
    let sink = gst::ElementFactory::make("rswaylandsink").build().unwrap();
    assert!(sink.dynamic_cast_ref::<gst_video::VideoOverlay>().is_some());
    let pad = sink.static_pad("sink").unwrap();
    assert_eq!(pad.pad_template_caps().size(), 2);
}
