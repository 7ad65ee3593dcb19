// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Buffer wrapper.
//!
//! Associates pipeline buffers with compositor buffers. A compositor buffer
//! ([`DisplayBuffer`]) is created once per pipeline buffer and cached on it
//! as GstMiniObject qdata, tagged with the id of the display it belongs to,
//! so buffers cycling through a pool are imported only once.
//!
//! While the compositor reads from a buffer, the [`DisplayBuffer`] keeps the
//! pipeline buffer alive; the release event drops that reference. Display
//! teardown force-releases everything through the [`BufferRegistry`].

use std::{
    any::type_name,
    os::fd::BorrowedFd,
    sync::{Arc, Mutex, Weak},
};

use glib::translate::IntoGlib;
use gst::glib;
use gst_allocators::{DmaBufMemory, FdMemory};
use gst_video::VideoInfo;
use gstreamer as gst;
use gstreamer_allocators as gst_allocators;
use gstreamer_video as gst_video;
use tracing::{error, trace, warn};
use wl_display::{DmabufDesc, DmabufPlane, ShmBufferDesc};

use crate::waylandsink::display::{BufferHandle, DisplayBackend};
use crate::waylandsink::presenter::RenderError;
use crate::waylandsink::video_format;

/// `DRM_FORMAT_MOD_LINEAR`
const MODIFIER_LINEAR: u64 = 0;
/// `zwp_linux_buffer_params_v1.flags.interlaced`
const FLAG_INTERLACED: u32 = 2;
/// `zwp_linux_buffer_params_v1.flags.bottom_first`
const FLAG_BOTTOM_FIRST: u32 = 4;

/// A compositor buffer bound to the memory of one pipeline buffer.
pub(crate) struct DisplayBuffer<D: DisplayBackend> {
    display_id: u64,
    handle: D::Buffer,
    /// Pipeline buffer kept alive while attached to a surface.
    hold: Mutex<Option<gst::Buffer>>,
}

impl<D: DisplayBackend> DisplayBuffer<D> {
    fn new(display_id: u64, handle: D::Buffer) -> Arc<Self> {
        let entry = Arc::new(Self {
            display_id,
            handle,
            hold: Mutex::new(None),
        });

        let weak = Arc::downgrade(&entry);
        entry.handle.set_release_listener(Box::new(move || {
            if let Some(entry) = weak.upgrade() {
                entry.release();
            }
        }));
        entry
    }

    pub fn handle(&self) -> &D::Buffer {
        &self.handle
    }

    /// Keeps `frame` alive until the compositor releases the buffer.
    pub fn hold(&self, frame: gst::Buffer) {
        match self.hold.lock() {
            Ok(mut hold) => *hold = Some(frame),
            Err(e) => error!("Display buffer lock poisoned: {}", e),
        }
    }

    /// Drops the reference to the pipeline buffer.
    pub fn release(&self) {
        let frame = match self.hold.lock() {
            Ok(mut hold) => hold.take(),
            Err(e) => {
                error!("Display buffer lock poisoned: {}", e);
                None
            }
        };
        if let Some(frame) = frame {
            trace!("Compositor released {:?}", frame);
        }
    }

    pub fn is_held(&self) -> bool {
        self.hold.lock().map(|hold| hold.is_some()).unwrap_or(false)
    }
}

/// All display buffers created on one display.
pub(crate) struct BufferRegistry<D: DisplayBackend> {
    entries: Mutex<Vec<Weak<DisplayBuffer<D>>>>,
}

impl<D: DisplayBackend> Default for BufferRegistry<D> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<D: DisplayBackend> BufferRegistry<D> {
    fn register(&self, entry: &Arc<DisplayBuffer<D>>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|e| e.strong_count() > 0);
            entries.push(Arc::downgrade(entry));
        }
    }

    /// Releases every buffer still held, as if the compositor had released it.
    pub fn release_all(&self) {
        let live: Vec<_> = match self.entries.lock() {
            Ok(mut entries) => entries.drain(..).filter_map(|e| e.upgrade()).collect(),
            Err(e) => {
                error!("Buffer registry lock poisoned: {}", e);
                return;
            }
        };
        trace!("Force-releasing {} display buffer(s)", live.len());
        for entry in live {
            entry.release();
        }
    }

    #[cfg(test)]
    pub fn live_count(&self) -> usize {
        self.entries
            .lock()
            .map(|entries| entries.iter().filter(|e| e.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

fn quark<D: DisplayBackend>() -> glib::Quark {
    glib::Quark::from_str(format!("GstRsWaylandDisplayBuffer-{}", type_name::<D>()))
}

unsafe extern "C" fn free_entry<D: DisplayBackend>(data: glib::ffi::gpointer) {
    // Safety: `data` was produced by `Arc::into_raw` in `attach`.
    drop(unsafe { Arc::from_raw(data as *const DisplayBuffer<D>) });
}

/// Returns the display buffer cached on `frame` for the display `display_id`.
pub(crate) fn cached<D: DisplayBackend>(
    frame: &gst::BufferRef,
    display_id: u64,
) -> Option<Arc<DisplayBuffer<D>>> {
    // Safety: the qdata under this quark is always an `Arc<DisplayBuffer<D>>`
    // set by `attach`; we take a new strong reference before using it.
    let entry = unsafe {
        let data = gst::ffi::gst_mini_object_get_qdata(
            frame.as_ptr() as *mut gst::ffi::GstMiniObject,
            quark::<D>().into_glib(),
        );
        if data.is_null() {
            return None;
        }
        let ptr = data as *const DisplayBuffer<D>;
        Arc::increment_strong_count(ptr);
        Arc::from_raw(ptr)
    };
    (entry.display_id == display_id).then_some(entry)
}

/// Caches `entry` on `frame`, replacing any previous entry.
pub(crate) fn attach<D: DisplayBackend>(frame: &gst::BufferRef, entry: &Arc<DisplayBuffer<D>>) {
    let data = Arc::into_raw(entry.clone()) as glib::ffi::gpointer;
    // Safety: ownership of one strong reference moves into the qdata and is
    // given back by `free_entry` when the buffer is finalized or the qdata
    // replaced.
    unsafe {
        gst::ffi::gst_mini_object_set_qdata(
            frame.as_ptr() as *mut gst::ffi::GstMiniObject,
            quark::<D>().into_glib(),
            data,
            Some(free_entry::<D>),
        );
    }
}

/// Per-plane offsets and strides, from the video meta when there is one.
struct PlaneLayout {
    offsets: Vec<usize>,
    strides: Vec<i32>,
}

impl PlaneLayout {
    fn of(frame: &gst::BufferRef, info: &VideoInfo) -> Self {
        match frame.meta::<gst_video::VideoMeta>() {
            Some(meta) => Self {
                offsets: meta.offset().to_vec(),
                strides: meta.stride().to_vec(),
            },
            None => Self {
                offsets: info.offset().to_vec(),
                strides: info.stride().to_vec(),
            },
        }
    }
}

/// Finds the memory containing byte `offset` of `frame`.
///
/// # Returns
/// The memory index and the offset inside that memory.
fn locate(frame: &gst::BufferRef, offset: usize) -> Option<(usize, usize)> {
    let mut start = 0;
    for (idx, mem) in frame.iter_memories().enumerate() {
        let size = mem.size();
        if offset < start + size {
            return Some((idx, offset - start));
        }
        start += size;
    }
    None
}

fn is_all_dmabuf(frame: &gst::BufferRef) -> bool {
    frame.n_memory() > 0
        && frame
            .iter_memories()
            .all(|mem| mem.downcast_memory_ref::<DmaBufMemory>().is_some())
}

fn import_dmabuf<D: DisplayBackend>(
    display: &D,
    frame: &gst::BufferRef,
    info: &VideoInfo,
    enable_interlace: bool,
) -> Result<D::Buffer, RenderError> {
    let fourcc = video_format::to_drm_fourcc(info.format())
        .ok_or(RenderError::NoDisplayBuffer("format has no fourcc"))?;
    let layout = PlaneLayout::of(frame, info);

    let mut planes = Vec::with_capacity(info.n_planes() as usize);
    for plane in 0..info.n_planes() as usize {
        let offset = layout.offsets[plane];
        let (idx, skip) =
            locate(frame, offset).ok_or(RenderError::NoDisplayBuffer("plane outside buffer"))?;
        let mem = frame.peek_memory(idx);
        let dmabuf = mem
            .downcast_memory_ref::<DmaBufMemory>()
            .ok_or(RenderError::NoDisplayBuffer("plane is not dmabuf"))?;
        planes.push(DmabufPlane {
            // Safety: the fd belongs to memory of `frame`, which outlives the import.
            fd: unsafe { BorrowedFd::borrow_raw(dmabuf.fd()) },
            offset: (mem.offset() + skip) as u32,
            stride: layout.strides[plane] as u32,
        });
    }

    let mut flags = 0;
    if enable_interlace && info.is_interlaced() {
        flags |= FLAG_INTERLACED;
        if info.field_order() == gst_video::VideoFieldOrder::BottomFieldFirst {
            flags |= FLAG_BOTTOM_FIRST;
        }
    }

    display
        .create_dmabuf_buffer(&DmabufDesc {
            width: info.width() as i32,
            height: info.height() as i32,
            fourcc,
            modifier: MODIFIER_LINEAR,
            flags,
            planes,
        })
        .map_err(RenderError::Display)
}

/// Wraps a single fd-backed memory as a shared memory buffer.
pub(crate) fn wrap_shm<D: DisplayBackend>(
    display: &D,
    frame: &gst::BufferRef,
    info: &VideoInfo,
) -> Result<D::Buffer, RenderError> {
    let format = video_format::to_shm_format(info.format())
        .ok_or(RenderError::NoDisplayBuffer("format has no wl_shm equivalent"))?;
    let mem = frame.peek_memory(0);
    let fd_mem = mem
        .downcast_memory_ref::<FdMemory>()
        .ok_or(RenderError::NoDisplayBuffer("memory is not fd-backed"))?;
    let layout = PlaneLayout::of(frame, info);

    // Safety: the fd belongs to memory of `frame`, which outlives the call.
    let fd = unsafe { BorrowedFd::borrow_raw(fd_mem.fd()) };
    display
        .create_shm_buffer(
            fd,
            &ShmBufferDesc {
                pool_size: mem.maxsize(),
                offset: mem.offset() as i32,
                width: info.width() as i32,
                height: info.height() as i32,
                stride: layout.strides[0],
                format,
            },
        )
        .map_err(RenderError::Display)
}

/// Binds a new display buffer to `frame`, caching it on the frame.
pub(crate) fn bind<D: DisplayBackend>(
    display: &D,
    registry: &BufferRegistry<D>,
    frame: &gst::BufferRef,
    handle: D::Buffer,
) -> Arc<DisplayBuffer<D>> {
    let entry = DisplayBuffer::new(display.id(), handle);
    registry.register(&entry);
    attach(frame, &entry);
    entry
}

/// Returns the display buffer for `frame`, importing its memory if possible.
///
/// # Arguments
/// * `display` - Display the buffer is for
/// * `registry` - Registry of that display
/// * `frame` - Pipeline buffer
/// * `info` - Negotiated video info
/// * `enable_interlace` - Mark interlaced dmabufs as such
///
/// # Returns
/// * `Ok(Some(_))` with the cached or newly created display buffer
/// * `Ok(None)` if the memory can't be used directly and must be copied
pub(crate) fn get_or_create<D: DisplayBackend>(
    display: &D,
    registry: &BufferRegistry<D>,
    frame: &gst::BufferRef,
    info: &VideoInfo,
    enable_interlace: bool,
) -> Result<Option<Arc<DisplayBuffer<D>>>, RenderError> {
    if let Some(entry) = cached::<D>(frame, display.id()) {
        trace!("Buffer {:?} has a display buffer, writing directly", frame);
        return Ok(Some(entry));
    }

    let formats = display.formats();
    let format = info.format();

    if formats.supports_dmabuf(format) && is_all_dmabuf(frame) {
        match import_dmabuf(display, frame, info, enable_interlace) {
            Ok(handle) => return Ok(Some(bind(display, registry, frame, handle))),
            Err(e) => warn!("dmabuf import failed: {}", e),
        }
    }

    if formats.supports_shm(format)
        && frame.n_memory() == 1
        && frame
            .peek_memory(0)
            .downcast_memory_ref::<FdMemory>()
            .is_some()
    {
        match wrap_shm(display, frame, info) {
            Ok(handle) => return Ok(Some(bind(display, registry, frame, handle))),
            Err(e) => warn!("Wrapping fd memory failed: {}", e),
        }
    }

    Ok(None)
}
