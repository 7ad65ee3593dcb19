// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Presentation engine.
//!
//! Ties negotiation, the buffer cache, the fallback pool, the window binder
//! and the presentation throttle together. State lives behind four locks:
//!
//! - the display lock, holding the connection once it was found;
//! - the frame queue lock, taken only while pumping frame callbacks;
//! - the render lock, holding everything the streaming thread and the
//!   application share (window, last frame, throttle, pool);
//! - the element's settings lock, always taken before the render lock.
//!
//! The render lock is never held while pumping the frame queue or while the
//! application is asked for a window handle.

use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use gst_video::prelude::*;
use gst_video::{VideoInfo, VideoOrientationMethod};
use gstreamer as gst;
use gstreamer_video as gst_video;
use tracing::{debug, trace, warn};
use wl_display::{CallbackId, ClosedListener, Rectangle};

use crate::waylandsink::binder;
use crate::waylandsink::buffer::{self, BufferRegistry, DisplayBuffer};
use crate::waylandsink::display::{DisplayBackend, DisplayFormats, FrameSource, WindowHandle};
use crate::waylandsink::negotiation::{self, NegotiationError};
use crate::waylandsink::pool::FallbackPool;
use crate::waylandsink::rotation::{Rotation, RotationError};
use crate::waylandsink::state::RenderSettings;
use crate::waylandsink::throttle::PresentationState;

/// How long one blocking pump waits before checking for flushing again.
const PUMP_INTERVAL: Duration = Duration::from_millis(100);

/// Errors presenting a frame or binding a window.
#[derive(Debug, thiserror::Error)]
pub(crate) enum RenderError {
    #[error("Window has no size set")]
    NoWindowSize,

    #[error("No display connection")]
    NoDisplay,

    #[error("No window to present in")]
    NoWindow,

    #[error("Caps were not negotiated")]
    NotNegotiated,

    #[error("Failed to configure buffer pool")]
    PoolConfig,

    #[error("failed to activate bufferpool.")]
    PoolActivation,

    #[error("could not create buffer")]
    NoBuffer(gst::FlowError),

    #[error("{0}")]
    NoDisplayBuffer(&'static str),

    #[error("Video memory can not be {0} userspace.")]
    MapFailed(Access),

    #[error("Display error: {0}")]
    Display(#[from] wl_display::Error),

    #[error("Application did not provide a wayland display handle")]
    OwnDisplayWithExternalSurface,

    #[error("Flushing")]
    Flushing,

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

/// Direction of a failed memory mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Read,
    Write,
}

impl std::fmt::Display for Access {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Access::Read => f.write_str("read from"),
            Access::Write => f.write_str("written from"),
        }
    }
}

/// Outcome of [`Presenter::show_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Presented {
    /// The frame was submitted and a frame callback armed.
    Shown,
    /// The frame resolved to the display buffer already on screen.
    Duplicate,
}

/// Element callbacks the engine needs while presenting.
pub(crate) trait WindowHooks {
    /// Gives the application a chance to hand over a surface.
    ///
    /// Called without the render lock held.
    fn prepare_window_handle(&self);

    /// Listener installed on toplevel windows, run when the user closes them.
    fn closed_listener(&self) -> ClosedListener;
}

/// A display connection with its buffer registry.
pub(crate) struct Connected<D: DisplayBackend> {
    display: Arc<D>,
    registry: BufferRegistry<D>,
    frame_handle: <D::FrameQueue as FrameSource>::Handle,
}

impl<D: DisplayBackend> Drop for Connected<D> {
    fn drop(&mut self) {
        self.registry.release_all();
    }
}

struct RenderState<D: DisplayBackend> {
    window: Option<D::Window>,
    presentation: PresentationState,
    /// Frame currently on screen, with its display buffer.
    last_frame: Option<(gst::Buffer, Arc<DisplayBuffer<D>>)>,
    video_info: Option<VideoInfo>,
    video_info_changed: bool,
    use_dmabuf: bool,
    pool: Option<FallbackPool>,
    rotation: Rotation,
}

impl<D: DisplayBackend> Default for RenderState<D> {
    fn default() -> Self {
        Self {
            window: None,
            presentation: PresentationState::default(),
            last_frame: None,
            video_info: None,
            video_info_changed: false,
            use_dmabuf: false,
            pool: None,
            rotation: Rotation::default(),
        }
    }
}

impl<D: DisplayBackend> RenderState<D> {
    fn apply_completions(&mut self, completed: &[CallbackId]) {
        for id in completed {
            if self.presentation.complete(*id) {
                trace!("Frame callback {} done", id);
            }
        }
    }

    /// Submits the last frame and arms a frame callback.
    ///
    /// Video info is only passed on a non-redraw submission after a change.
    fn render_last(&mut self, frame_handle: &<D::FrameQueue as FrameSource>::Handle, redraw: bool) {
        let (Some(window), Some((frame, entry))) = (self.window.as_ref(), self.last_frame.as_ref())
        else {
            return;
        };

        let video_size = match &self.video_info {
            Some(info) if self.video_info_changed && !redraw => {
                self.video_info_changed = false;
                Some(binder::display_size(info))
            }
            _ => None,
        };

        let id = window.request_frame(frame_handle);
        self.presentation.arm(id);
        entry.hold(frame.clone());
        window.render(Some(entry.handle()), video_size);
        trace!("Submitted {:?} with frame callback {}", frame, id);
    }
}

/// The presentation engine of the sink.
pub(crate) struct Presenter<D: DisplayBackend> {
    display: Mutex<Option<Arc<Connected<D>>>>,
    frames: Mutex<Option<D::FrameQueue>>,
    render: Mutex<RenderState<D>>,
    flushing: AtomicBool,
}

impl<D: DisplayBackend> Default for Presenter<D> {
    fn default() -> Self {
        Self {
            display: Mutex::new(None),
            frames: Mutex::new(None),
            render: Mutex::new(RenderState::default()),
            flushing: AtomicBool::new(false),
        }
    }
}

impl<D: DisplayBackend> Presenter<D> {
    fn lock_render(&self) -> Result<MutexGuard<'_, RenderState<D>>, RenderError> {
        self.render
            .lock()
            .map_err(|_| RenderError::LockPoisoned("render"))
    }

    fn connected(&self) -> Option<Arc<Connected<D>>> {
        self.display.lock().ok().and_then(|display| display.clone())
    }

    /// Installs the display connection.
    ///
    /// # Returns
    /// `false` if a display was already set; the new one is dropped.
    pub fn set_display(&self, display: D) -> Result<bool, RenderError> {
        let mut slot = self
            .display
            .lock()
            .map_err(|_| RenderError::LockPoisoned("display"))?;
        if slot.is_some() {
            return Ok(false);
        }

        let frames = display.create_frame_queue();
        let connected = Arc::new(Connected {
            frame_handle: frames.handle(),
            display: Arc::new(display),
            registry: BufferRegistry::default(),
        });
        *self
            .frames
            .lock()
            .map_err(|_| RenderError::LockPoisoned("frame queue"))? = Some(frames);
        debug!("Using display {}", connected.display.id());
        *slot = Some(connected);
        Ok(true)
    }

    pub fn has_display(&self) -> bool {
        self.connected().is_some()
    }

    pub fn display_formats(&self) -> Option<DisplayFormats> {
        self.connected().map(|c| c.display.formats().clone())
    }

    /// Caps the sink accepts, see [`negotiation::query_caps`].
    pub fn caps(&self, filter: Option<&gst::Caps>) -> gst::Caps {
        let formats = self.display_formats();
        negotiation::query_caps(formats.as_ref(), filter)
    }

    /// Accepts new caps and replaces the fallback pool.
    pub fn set_caps(&self, caps: &gst::Caps) -> Result<(), NegotiationError> {
        let connected = self.connected().ok_or(NegotiationError::NoDisplay)?;
        let negotiated = negotiation::accept_caps(caps, connected.display.formats())?;
        let pool = FallbackPool::new(&negotiated.info, caps).map_err(NegotiationError::Pool)?;

        let mut state = self
            .lock_render()
            .map_err(NegotiationError::Pool)?;
        debug!(
            "Negotiated {} ({})",
            caps,
            if negotiated.use_dmabuf { "dmabuf" } else { "shm" }
        );
        state.video_info = Some(negotiated.info);
        state.video_info_changed = true;
        state.use_dmabuf = negotiated.use_dmabuf;
        state.pool = Some(pool);
        Ok(())
    }

    /// Frame callbacks received so far; blocks up to [`PUMP_INTERVAL`] when
    /// `blocking` is set and nothing is pending.
    fn pump(&self, blocking: bool) -> Result<Vec<CallbackId>, RenderError> {
        let mut frames = self
            .frames
            .lock()
            .map_err(|_| RenderError::LockPoisoned("frame queue"))?;
        let frames = frames.as_mut().ok_or(RenderError::NoDisplay)?;
        let completed = if blocking {
            frames.blocking_dispatch(PUMP_INTERVAL)?
        } else {
            frames.dispatch_pending()?
        };
        Ok(completed)
    }

    /// Waits until no frame callback is outstanding.
    ///
    /// Pending callbacks are always applied. While armed, the render lock is
    /// released and the frame queue pumped until the compositor completes
    /// the callback or the sink starts flushing.
    fn wait_idle<'a>(
        &'a self,
        state: MutexGuard<'a, RenderState<D>>,
    ) -> Result<MutexGuard<'a, RenderState<D>>, RenderError> {
        drop(state);
        let completed = self.pump(false)?;
        let mut state = self.lock_render()?;
        state.apply_completions(&completed);

        while !state.presentation.is_idle() {
            drop(state);
            if self.flushing.load(Ordering::SeqCst) {
                debug!("Flushing while waiting for frame callback");
                return Err(RenderError::Flushing);
            }
            let completed = self.pump(true)?;
            state = self.lock_render()?;
            state.apply_completions(&completed);
        }
        Ok(state)
    }

    /// Presents `frame`.
    ///
    /// Creates a toplevel window if the application provided no surface,
    /// waits for the previous frame to be presented, then submits the frame
    /// through the cheapest path available: its cached display buffer, a
    /// dmabuf import, a shared memory wrap, or a copy into the fallback pool.
    pub fn show_frame(
        &self,
        frame: &gst::Buffer,
        settings: &RenderSettings,
        hooks: &dyn WindowHooks,
    ) -> Result<Presented, RenderError> {
        let connected = self.connected().ok_or(RenderError::NoDisplay)?;
        let display = connected.display.as_ref();

        let mut state = self.lock_render()?;
        if state.window.is_none() {
            drop(state);
            hooks.prepare_window_handle();
            state = self.lock_render()?;

            if state.window.is_none() {
                let info = state.video_info.as_ref().ok_or(RenderError::NotNegotiated)?;
                let window = binder::create_toplevel(
                    display,
                    info,
                    settings,
                    state.rotation.transform(),
                    hooks.closed_listener(),
                )?;
                state.window = Some(window);
            }
        }

        let mut state = self.wait_idle(state)?;

        let window = state.window.as_ref().ok_or(RenderError::NoWindow)?;
        if !window.render_rectangle().is_configured() {
            return Err(RenderError::NoWindowSize);
        }

        let info = state
            .video_info
            .clone()
            .ok_or(RenderError::NotNegotiated)?;
        trace!("Presenting {:?}", frame);

        let to_render = match buffer::get_or_create(
            display,
            &connected.registry,
            frame,
            &info,
            !settings.suppress_interlace,
        )? {
            Some(entry) => Some((frame.clone(), entry)),
            None if display.formats().supports_shm(info.format()) => {
                let pool = state.pool.as_mut().ok_or(RenderError::NotNegotiated)?;
                Some(copy_to_pool(&connected, pool, frame, &info)?)
            }
            None => None,
        };
        let (to_render, entry) =
            to_render.ok_or(RenderError::NoDisplayBuffer("cannot have a wl_buffer"))?;

        if state
            .last_frame
            .as_ref()
            .is_some_and(|(_, last)| Arc::ptr_eq(last, &entry))
        {
            trace!("Buffer {:?} already on screen", frame);
            return Ok(Presented::Duplicate);
        }

        state.last_frame = Some((to_render, entry));
        state.render_last(&connected.frame_handle, false);
        Ok(Presented::Shown)
    }

    /// Redraws the last frame, unless a frame callback is outstanding.
    pub fn expose(&self) -> Result<(), RenderError> {
        let Some(connected) = self.connected() else {
            return Ok(());
        };
        let mut state = self.lock_render()?;
        if state.last_frame.is_some() && state.presentation.is_idle() {
            debug!("Redrawing last frame");
            state.render_last(&connected.frame_handle, true);
        }
        Ok(())
    }

    /// Embeds the video into the application surface behind `handle`.
    ///
    /// # Returns
    /// `false` if a window already exists or `handle` is null.
    pub fn set_window_handle(&self, handle: usize) -> Result<bool, RenderError> {
        let mut state = self.lock_render()?;
        if state.window.is_some() {
            warn!("Changing the window handle is not supported");
            return Ok(false);
        }
        if handle == 0 {
            return Ok(false);
        }

        let connected = self.connected().ok_or(RenderError::NoDisplay)?;
        let window =
            binder::bind_external(connected.display.as_ref(), handle, state.rotation.transform())?;
        state.window = Some(window);
        if state.last_frame.is_some() {
            // Resize the new video surface on the next frame.
            state.video_info_changed = true;
        }
        Ok(true)
    }

    /// # Returns
    /// `false` if there is no window yet.
    pub fn set_render_rectangle(&self, rect: Rectangle) -> Result<bool, RenderError> {
        let state = self.lock_render()?;
        match &state.window {
            Some(window) => {
                window.set_render_rectangle(rect);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Updates the rotation from the property or a tag and applies it to
    /// the window.
    pub fn set_rotation(
        &self,
        method: VideoOrientationMethod,
        from_tag: bool,
    ) -> Result<(), RenderError> {
        let mut state = self.lock_render()?;
        match state.rotation.set(method, from_tag) {
            Ok(true) => {
                let transform = state.rotation.transform();
                debug!("Rotation is now {:?}", state.rotation.current());
                if let Some(window) = &state.window {
                    window.set_transform(transform);
                }
            }
            Ok(false) => (),
            Err(RotationError::Unsupported(method)) => {
                warn!("Unsupported rotation method {:?}", method)
            }
        }
        Ok(())
    }

    pub fn set_fullscreen(&self, fullscreen: bool) -> Result<(), RenderError> {
        let state = self.lock_render()?;
        if let Some(window) = &state.window {
            window.set_fullscreen(fullscreen);
        }
        Ok(())
    }

    /// Interrupts, or allows again, waiting for frame callbacks.
    pub fn set_flushing(&self, flushing: bool) {
        self.flushing.store(flushing, Ordering::SeqCst);
    }

    /// PAUSED to READY: drops the last frame, destroys a toplevel window or
    /// detaches an embedded one, and forgets the outstanding callback.
    pub fn stop(&self) -> Result<(), RenderError> {
        let mut state = self.lock_render()?;
        state.last_frame = None;
        if let Some(window) = state.window.take() {
            state.window = binder::release_window(window);
        }
        state.presentation.reset();
        Ok(())
    }

    /// READY to NULL: drops the pool, and the display unless an embedded
    /// window still uses it.
    ///
    /// # Returns
    /// `true` if the display connection was dropped.
    pub fn close(&self) -> Result<bool, RenderError> {
        let keep_display = {
            let mut state = self.lock_render()?;
            state.pool = None;
            state.window.is_some()
        };

        let mut display = self
            .display
            .lock()
            .map_err(|_| RenderError::LockPoisoned("display"))?;
        if keep_display || display.is_none() {
            return Ok(false);
        }
        self.frames
            .lock()
            .map_err(|_| RenderError::LockPoisoned("frame queue"))?
            .take();
        display.take();
        debug!("Dropped display connection");
        Ok(true)
    }

    #[cfg(test)]
    pub fn display_id(&self) -> Option<u64> {
        self.connected().map(|c| c.display.id())
    }

    #[cfg(test)]
    pub fn last_frame(&self) -> Option<gst::Buffer> {
        self.render
            .lock()
            .ok()
            .and_then(|state| state.last_frame.as_ref().map(|(frame, _)| frame.clone()))
    }

    #[cfg(test)]
    pub fn is_armed(&self) -> bool {
        self.render
            .lock()
            .map(|state| !state.presentation.is_idle())
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn has_window(&self) -> bool {
        self.render
            .lock()
            .map(|state| state.window.is_some())
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn pool_acquisitions(&self) -> usize {
        self.render
            .lock()
            .ok()
            .and_then(|state| state.pool.as_ref().map(FallbackPool::acquisitions))
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn uses_dmabuf(&self) -> bool {
        self.render
            .lock()
            .map(|state| state.use_dmabuf)
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub fn live_display_buffers(&self) -> usize {
        self.connected()
            .map(|c| c.registry.live_count())
            .unwrap_or(0)
    }
}

/// Copies `frame` into a buffer of the fallback pool.
///
/// # Returns
/// The pool buffer and its display buffer, created on first use of the
/// pool buffer and cached on it afterwards.
fn copy_to_pool<D: DisplayBackend>(
    connected: &Connected<D>,
    pool: &mut FallbackPool,
    frame: &gst::BufferRef,
    info: &VideoInfo,
) -> Result<(gst::Buffer, Arc<DisplayBuffer<D>>), RenderError> {
    let display = connected.display.as_ref();
    let mut target = pool.acquire()?;

    let entry = match buffer::cached::<D>(&target, display.id()) {
        Some(entry) => entry,
        None => {
            let handle = buffer::wrap_shm(display, &target, info).map_err(|e| {
                warn!("Wrapping pool buffer failed: {}", e);
                RenderError::NoDisplayBuffer("could not create wl_buffer out of wl_shm memory")
            })?;
            buffer::bind(display, &connected.registry, &target, handle)
        }
    };

    {
        let src = gst_video::VideoFrameRef::from_buffer_ref_readable(frame, info)
            .map_err(|_| RenderError::MapFailed(Access::Read))?;
        let target_mut = target
            .get_mut()
            .ok_or(RenderError::MapFailed(Access::Write))?;
        let mut dst = gst_video::VideoFrameRef::from_buffer_ref_writable(target_mut, info)
            .map_err(|_| RenderError::MapFailed(Access::Write))?;
        src.copy(&mut dst)
            .map_err(|_| RenderError::MapFailed(Access::Write))?;
    }
    trace!("Copied {:?} into {:?}", frame, target);

    Ok((target, entry))
}
