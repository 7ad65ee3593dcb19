// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Display connection management.
//!
//! This module provides [`Display`], the entry point of the crate. A display
//! owns (or borrows, when the application supplied it) a connection to the
//! compositor, binds the globals the sink needs, records the pixel formats
//! advertised for shared memory and dmabuf buffers, and runs a dispatch
//! thread that services the main event queue (format events, xdg configure
//! and close events, buffer release events).

use std::{
    env,
    ffi::c_void,
    io,
    os::{
        fd::{AsRawFd, BorrowedFd},
        unix::net::UnixStream,
    },
    path::PathBuf,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::JoinHandle,
    time::Duration,
};

use tracing::{debug, error, trace, warn};
use wayland_client::{
    Connection, Dispatch, EventQueue, Proxy, QueueHandle, WEnum,
    backend::{Backend, ObjectId, WaylandError},
    delegate_noop,
    globals::{GlobalList, GlobalListContents, registry_queue_init},
    protocol::{
        wl_buffer::{self, WlBuffer},
        wl_compositor::WlCompositor,
        wl_region::WlRegion,
        wl_registry::{self, WlRegistry},
        wl_shm::{self, WlShm},
        wl_shm_pool::WlShmPool,
        wl_subcompositor::WlSubcompositor,
        wl_subsurface::WlSubsurface,
        wl_surface::WlSurface,
    },
};
use wayland_protocols::{
    wp::{
        linux_dmabuf::zv1::client::{
            zwp_linux_buffer_params_v1::{self, ZwpLinuxBufferParamsV1},
            zwp_linux_dmabuf_v1::{self, ZwpLinuxDmabufV1},
        },
        viewporter::client::{wp_viewport::WpViewport, wp_viewporter::WpViewporter},
    },
    xdg::shell::client::{
        xdg_surface::{self, XdgSurface},
        xdg_toplevel::{self, XdgToplevel},
        xdg_wm_base::{self, XdgWmBase},
    },
};

use crate::{
    Error, FrameQueue, Result,
    buffer::{Buffer, BufferData, DmabufDesc, ShmBufferDesc},
    window::WindowShared,
};

/// How long the dispatch thread waits for the socket before re-checking
/// whether it should stop.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

static NEXT_DISPLAY_ID: AtomicU64 = AtomicU64::new(1);

/// Pixel formats advertised by the compositor.
///
/// Shared memory formats are `wl_shm.format` values, dmabuf formats are DRM
/// fourcc codes. The lists are collected once while the connection is set up
/// and never change afterwards.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Formats {
    pub shm: Vec<u32>,
    pub dmabuf: Vec<u32>,
}

/// Globals bound on the display connection.
pub(crate) struct Globals {
    pub(crate) compositor: WlCompositor,
    pub(crate) subcompositor: WlSubcompositor,
    pub(crate) shm: WlShm,
    pub(crate) wm_base: Option<XdgWmBase>,
    pub(crate) viewporter: Option<WpViewporter>,
    pub(crate) dmabuf: Option<ZwpLinuxDmabufV1>,
}

/// State owned by the dispatch thread.
#[derive(Default)]
pub(crate) struct DisplayState {
    formats: Formats,
}

/// A connection to the compositor.
///
/// The display is `Send + Sync` and is shared between the streaming thread
/// (which creates buffers and windows) and its own dispatch thread.
///
/// # Examples
///
/// ```no_run
/// # fn main() -> Result<(), wl_display::Error> {
/// let display = wl_display::Display::connect(None)?;
/// println!("shm formats: {:?}", display.formats().shm);
/// # Ok(())
/// # }
/// ```
pub struct Display {
    id: u64,
    connection: Connection,
    qh: QueueHandle<DisplayState>,
    globals: Globals,
    formats: Formats,
    own_display: bool,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Display {
    /// Connects to the compositor.
    ///
    /// `name` is either an absolute socket path or a socket name relative to
    /// `XDG_RUNTIME_DIR`. Without a name, `WAYLAND_DISPLAY` is used.
    pub fn connect(name: Option<&str>) -> Result<Self> {
        let connection = match name {
            Some(name) => connect_named(name)?,
            None => Connection::connect_to_env()?,
        };
        Self::init(connection, true)
    }

    /// Wraps a `wl_display` pointer owned by the application.
    ///
    /// # Safety
    ///
    /// `handle` must point to a live `wl_display` that outlives the returned
    /// [`Display`].
    pub unsafe fn from_external(handle: *mut c_void) -> Result<Self> {
        if handle.is_null() {
            return Err(Error::InvalidHandle);
        }
        let backend = unsafe { Backend::from_foreign_display(handle.cast()) };
        Self::init(Connection::from_backend(backend), false)
    }

    fn init(connection: Connection, own_display: bool) -> Result<Self> {
        let (global_list, mut queue) = registry_queue_init::<DisplayState>(&connection)?;
        let qh = queue.handle();
        let globals = bind_globals(&global_list, &qh)?;

        // First round trip delivers the shm/dmabuf format events.
        let mut state = DisplayState::default();
        queue.roundtrip(&mut state)?;

        if state.formats.shm.is_empty() {
            warn!("Compositor did not advertise any wl_shm format");
        }
        debug!(
            "Display formats: shm {:?}, dmabuf {:?}",
            state.formats.shm, state.formats.dmabuf
        );

        let formats = state.formats.clone();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let thread = std::thread::Builder::new()
            .name("wl-display".into())
            .spawn(move || run_event_loop(queue, state, thread_running))?;

        Ok(Self {
            id: NEXT_DISPLAY_ID.fetch_add(1, Ordering::Relaxed),
            connection,
            qh,
            globals,
            formats,
            own_display,
            running,
            thread: Some(thread),
        })
    }

    /// Process-unique identifier of this connection.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `true` when the connection was opened by us rather than supplied by
    /// the application.
    pub fn has_own_display(&self) -> bool {
        self.own_display
    }

    pub fn formats(&self) -> &Formats {
        &self.formats
    }

    pub fn has_viewporter(&self) -> bool {
        self.globals.viewporter.is_some()
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.connection
    }

    pub(crate) fn qh(&self) -> &QueueHandle<DisplayState> {
        &self.qh
    }

    pub(crate) fn globals(&self) -> &Globals {
        &self.globals
    }

    /// Flushes pending requests to the compositor.
    pub fn flush(&self) -> Result<()> {
        self.connection.flush().map_err(Error::from)
    }

    /// Creates a dedicated queue for surface frame callbacks.
    pub fn create_frame_queue(&self) -> FrameQueue {
        FrameQueue::new(&self.connection)
    }

    /// Resolves a `wl_surface` pointer handed over by the application.
    ///
    /// # Safety
    ///
    /// `handle` must point to a live `wl_surface` created on this display.
    pub unsafe fn surface_from_handle(&self, handle: usize) -> Result<WlSurface> {
        if handle == 0 {
            return Err(Error::InvalidHandle);
        }
        let id = unsafe { ObjectId::from_ptr(WlSurface::interface(), handle as *mut _) }?;
        Ok(WlSurface::from_id(&self.connection, id)?)
    }

    /// Wraps a shared memory file descriptor into a display buffer.
    pub fn create_shm_buffer(&self, fd: BorrowedFd<'_>, desc: &ShmBufferDesc) -> Result<Buffer> {
        let format = wl_shm::Format::try_from(desc.format)
            .map_err(|_| Error::Buffer(format!("unknown wl_shm format {:#x}", desc.format)))?;
        let pool_size = i32::try_from(desc.pool_size)
            .map_err(|_| Error::Buffer(format!("pool size {} too large", desc.pool_size)))?;

        let data = Arc::new(BufferData::default());
        let pool = self.globals.shm.create_pool(fd, pool_size, &self.qh, ());
        let wl_buffer = pool.create_buffer(
            desc.offset,
            desc.width,
            desc.height,
            desc.stride,
            format,
            &self.qh,
            data.clone(),
        );
        pool.destroy();

        trace!(
            "Created shm buffer {}x{} stride {} offset {}",
            desc.width, desc.height, desc.stride, desc.offset
        );
        Ok(Buffer::new(wl_buffer, data))
    }

    /// Imports dmabuf planes into a display buffer.
    pub fn create_dmabuf_buffer(&self, desc: &DmabufDesc<'_>) -> Result<Buffer> {
        let dmabuf = self
            .globals
            .dmabuf
            .as_ref()
            .ok_or(Error::MissingGlobal("zwp_linux_dmabuf_v1"))?;

        if desc.planes.is_empty() {
            return Err(Error::Buffer("dmabuf without planes".into()));
        }

        let params = dmabuf.create_params(&self.qh, ());
        let modifier_hi = (desc.modifier >> 32) as u32;
        let modifier_lo = (desc.modifier & 0xffff_ffff) as u32;
        for (index, plane) in desc.planes.iter().enumerate() {
            params.add(
                plane.fd,
                index as u32,
                plane.offset,
                plane.stride,
                modifier_hi,
                modifier_lo,
            );
        }

        let data = Arc::new(BufferData::default());
        let wl_buffer = params.create_immed(
            desc.width,
            desc.height,
            desc.fourcc,
            zwp_linux_buffer_params_v1::Flags::from_bits_truncate(desc.flags),
            &self.qh,
            data.clone(),
        );
        params.destroy();

        trace!(
            "Imported dmabuf {}x{} fourcc {:#010x} with {} plane(s)",
            desc.width,
            desc.height,
            desc.fourcc,
            desc.planes.len()
        );
        Ok(Buffer::new(wl_buffer, data))
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            error!("Display dispatch thread panicked");
        }
        debug!("Display {} closed", self.id);
    }
}

fn connect_named(name: &str) -> Result<Connection> {
    let mut path = PathBuf::from(name);
    if !path.is_absolute() {
        let runtime_dir = env::var_os("XDG_RUNTIME_DIR").ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "XDG_RUNTIME_DIR is not set",
            ))
        })?;
        path = PathBuf::from(runtime_dir).join(name);
    }
    let stream = UnixStream::connect(&path)?;
    Ok(Connection::from_socket(stream)?)
}

fn bind_globals(list: &GlobalList, qh: &QueueHandle<DisplayState>) -> Result<Globals> {
    let compositor = list
        .bind::<WlCompositor, _, _>(qh, 1..=4, ())
        .map_err(|_| Error::MissingGlobal("wl_compositor"))?;
    let subcompositor = list
        .bind::<WlSubcompositor, _, _>(qh, 1..=1, ())
        .map_err(|_| Error::MissingGlobal("wl_subcompositor"))?;
    let shm = list
        .bind::<WlShm, _, _>(qh, 1..=1, ())
        .map_err(|_| Error::MissingGlobal("wl_shm"))?;

    // Optional globals: toplevel windows, scaling and zero-copy import.
    let wm_base = list.bind::<XdgWmBase, _, _>(qh, 1..=1, ()).ok();
    let viewporter = list.bind::<WpViewporter, _, _>(qh, 1..=1, ()).ok();
    let dmabuf = list.bind::<ZwpLinuxDmabufV1, _, _>(qh, 2..=3, ()).ok();

    if viewporter.is_none() {
        warn!("Compositor does not support wp_viewporter, video will not be scaled");
    }

    Ok(Globals {
        compositor,
        subcompositor,
        shm,
        wm_base,
        viewporter,
        dmabuf,
    })
}

/// Services the main queue until the display is dropped.
fn run_event_loop(
    mut queue: EventQueue<DisplayState>,
    mut state: DisplayState,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        if let Err(err) = queue.dispatch_pending(&mut state) {
            error!("Error dispatching display events: {}", err);
            break;
        }
        if let Err(err) = queue.flush() {
            error!("Error flushing display: {}", err);
            break;
        }

        let Some(guard) = queue.prepare_read() else {
            continue;
        };

        match poll_readable(guard.connection_fd(), POLL_TIMEOUT) {
            Ok(true) => match guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => {
                    error!("Error reading display events: {}", err);
                    break;
                }
            },
            Ok(false) => drop(guard),
            Err(err) => {
                error!("Error polling display: {}", err);
                break;
            }
        }
    }
    trace!("Display dispatch thread exits");
}

pub(crate) fn poll_readable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd: fd.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    // Safety: `pfd` is a single valid pollfd for the duration of the call.
    let ret = unsafe { libc::poll(&mut pfd, 1, timeout.as_millis() as libc::c_int) };
    if ret < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(ret > 0)
}

impl Dispatch<WlRegistry, GlobalListContents> for DisplayState {
    fn event(
        _state: &mut Self,
        _proxy: &WlRegistry,
        event: wl_registry::Event,
        _data: &GlobalListContents,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_registry::Event::Global { interface, .. } = event {
            trace!("Late global {} ignored", interface);
        }
    }
}

impl Dispatch<WlShm, ()> for DisplayState {
    fn event(
        state: &mut Self,
        _proxy: &WlShm,
        event: wl_shm::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_shm::Event::Format { format } = event {
            let format = match format {
                WEnum::Value(format) => u32::from(format),
                WEnum::Unknown(raw) => raw,
            };
            if !state.formats.shm.contains(&format) {
                state.formats.shm.push(format);
            }
        }
    }
}

impl Dispatch<ZwpLinuxDmabufV1, ()> for DisplayState {
    fn event(
        state: &mut Self,
        _proxy: &ZwpLinuxDmabufV1,
        event: zwp_linux_dmabuf_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let format = match event {
            zwp_linux_dmabuf_v1::Event::Format { format } => format,
            zwp_linux_dmabuf_v1::Event::Modifier { format, .. } => format,
            _ => return,
        };
        if !state.formats.dmabuf.contains(&format) {
            state.formats.dmabuf.push(format);
        }
    }
}

impl Dispatch<XdgWmBase, ()> for DisplayState {
    fn event(
        _state: &mut Self,
        proxy: &XdgWmBase,
        event: xdg_wm_base::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_wm_base::Event::Ping { serial } = event {
            proxy.pong(serial);
        }
    }
}

impl Dispatch<XdgSurface, Weak<WindowShared>> for DisplayState {
    fn event(
        _state: &mut Self,
        proxy: &XdgSurface,
        event: xdg_surface::Event,
        data: &Weak<WindowShared>,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let xdg_surface::Event::Configure { serial } = event {
            proxy.ack_configure(serial);
            if let Some(window) = data.upgrade() {
                window.handle_configure();
            }
        }
    }
}

impl Dispatch<XdgToplevel, Weak<WindowShared>> for DisplayState {
    fn event(
        _state: &mut Self,
        _proxy: &XdgToplevel,
        event: xdg_toplevel::Event,
        data: &Weak<WindowShared>,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let Some(window) = data.upgrade() else {
            return;
        };
        match event {
            xdg_toplevel::Event::Configure { width, height, .. } => {
                window.handle_toplevel_size(width, height);
            }
            xdg_toplevel::Event::Close => window.notify_closed(),
            _ => {}
        }
    }
}

impl Dispatch<WlBuffer, Arc<BufferData>> for DisplayState {
    fn event(
        _state: &mut Self,
        _proxy: &WlBuffer,
        event: wl_buffer::Event,
        data: &Arc<BufferData>,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            data.notify_release();
        }
    }
}

impl Dispatch<ZwpLinuxBufferParamsV1, ()> for DisplayState {
    fn event(
        _state: &mut Self,
        _proxy: &ZwpLinuxBufferParamsV1,
        event: zwp_linux_buffer_params_v1::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let zwp_linux_buffer_params_v1::Event::Failed = event {
            error!("Compositor failed to import dmabuf");
        }
    }
}

delegate_noop!(DisplayState: WlCompositor);
delegate_noop!(DisplayState: WlSubcompositor);
delegate_noop!(DisplayState: WlSubsurface);
delegate_noop!(DisplayState: WlShmPool);
delegate_noop!(DisplayState: WlRegion);
delegate_noop!(DisplayState: WpViewporter);
delegate_noop!(DisplayState: WpViewport);
delegate_noop!(DisplayState: ignore WlSurface);
