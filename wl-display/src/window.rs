// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Video windows.
//!
//! A [`Window`] is made of two surfaces:
//!
//! * the *area* surface, covering the whole render rectangle and painted
//!   black, which is either an xdg toplevel or a subsurface of a surface
//!   supplied by the application;
//! * the *video* surface, a desynchronized subsurface of the area, scaled with
//!   `wp_viewport` and centered so the video keeps its aspect ratio.

use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::{debug, error, trace, warn};
use wayland_client::{
    Connection, Proxy,
    protocol::{
        wl_output, wl_subsurface::WlSubsurface, wl_surface::WlSurface,
    },
};
use wayland_protocols::{
    wp::viewporter::client::wp_viewport::WpViewport,
    xdg::shell::client::{xdg_surface::XdgSurface, xdg_toplevel::XdgToplevel},
};

use crate::{
    Buffer, CallbackId, Display, Error, FrameQueueHandle, Rectangle, Result, Transform,
    buffer::black_pixel,
    frame::next_callback_id,
    geometry::video_placement,
};

/// Callback invoked on the display thread when the user closes a toplevel.
pub type ClosedListener = Box<dyn Fn() + Send + Sync>;

/// Options for [`Window::new_toplevel`].
#[derive(Debug, Clone, Default)]
pub struct ToplevelOptions {
    pub title: Option<String>,
    pub app_id: Option<String>,
    pub fullscreen: bool,
    /// Position of the video inside the window; negative values mean unset.
    pub position: (i32, i32),
    /// Size of the video area; non-positive values mean "use the video size".
    pub size: (i32, i32),
}

#[derive(Debug, Default)]
struct Geometry {
    render: Rectangle,
    video: (i32, i32),
    transform: Transform,
    configured: bool,
}

/// Surfaces and geometry shared with the display thread.
pub(crate) struct WindowShared {
    connection: Connection,
    area_surface: WlSurface,
    area_subsurface: Option<WlSubsurface>,
    area_viewport: Option<WpViewport>,
    video_surface: WlSurface,
    video_subsurface: WlSubsurface,
    video_viewport: Option<WpViewport>,
    xdg: Mutex<Option<(XdgSurface, XdgToplevel)>>,
    background: Buffer,
    geometry: Mutex<Geometry>,
    configure_cond: Condvar,
    closed: Mutex<Option<ClosedListener>>,
}

impl WindowShared {
    fn geometry(&self) -> MutexGuard<'_, Geometry> {
        // Geometry is plain data, a poisoned lock still holds a usable value.
        self.geometry.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_toplevel(&self) -> bool {
        self.area_subsurface.is_none()
    }

    /// Re-positions both surfaces for the current geometry and commits the
    /// area surface.
    fn apply_layout(&self, geometry: &Geometry) {
        let render = geometry.render;
        if !render.is_configured() || render.height <= 0 {
            return;
        }

        // A toplevel area starts at the window origin, an embedded one at the
        // render rectangle origin inside the parent.
        let (area, video_origin) = if self.is_toplevel() {
            (
                Rectangle::new(0, 0, render.x + render.width, render.y + render.height),
                (render.x, render.y),
            )
        } else {
            (render, (0, 0))
        };

        if let Some(subsurface) = &self.area_subsurface {
            subsurface.set_position(area.x, area.y);
        }
        if let Some(viewport) = &self.area_viewport {
            viewport.set_destination(area.width, area.height);
        }

        let (video_width, video_height) = geometry.video;
        if video_width > 0 && video_height > 0 {
            let placement =
                video_placement(video_width, video_height, geometry.transform, render);
            self.video_subsurface
                .set_position(video_origin.0 + placement.x, video_origin.1 + placement.y);
            if let Some(viewport) = &self.video_viewport
                && placement.width > 0
                && placement.height > 0
            {
                viewport.set_destination(placement.width, placement.height);
            }
            trace!("Video placed at {:?} inside {:?}", placement, render);
        }

        self.area_surface.attach(Some(self.background.wl_buffer()), 0, 0);
        damage_all(&self.area_surface);
        self.area_surface.commit();
    }

    pub(crate) fn handle_configure(&self) {
        let mut geometry = self.geometry();
        geometry.configured = true;
        self.apply_layout(&geometry);
        self.configure_cond.notify_all();
    }

    pub(crate) fn handle_toplevel_size(&self, width: i32, height: i32) {
        if width <= 0 || height <= 0 {
            return;
        }
        debug!("Toplevel configured to {}x{}", width, height);
        self.geometry().render = Rectangle::new(0, 0, width, height);
    }

    pub(crate) fn notify_closed(&self) {
        match self.closed.lock() {
            Ok(listener) => {
                if let Some(listener) = listener.as_ref() {
                    listener();
                }
            }
            Err(e) => error!("Window closed listener lock poisoned: {}", e),
        }
    }
}

fn damage_all(surface: &WlSurface) {
    if surface.version() >= 4 {
        surface.damage_buffer(0, 0, i32::MAX, i32::MAX);
    } else {
        surface.damage(0, 0, i32::MAX, i32::MAX);
    }
}

impl From<Transform> for wl_output::Transform {
    fn from(transform: Transform) -> Self {
        match transform {
            Transform::Normal => wl_output::Transform::Normal,
            Transform::Rotate90 => wl_output::Transform::_90,
            Transform::Rotate180 => wl_output::Transform::_180,
            Transform::Rotate270 => wl_output::Transform::_270,
            Transform::Flipped => wl_output::Transform::Flipped,
            Transform::Flipped90 => wl_output::Transform::Flipped90,
            Transform::Flipped180 => wl_output::Transform::Flipped180,
            Transform::Flipped270 => wl_output::Transform::Flipped270,
        }
    }
}

/// A video window, either a toplevel owned by us or embedded into an
/// application surface.
pub struct Window {
    shared: Arc<WindowShared>,
}

impl Window {
    /// Creates a toplevel window and waits for the compositor to configure it.
    ///
    /// # Arguments
    ///
    /// * `display` - The display the window lives on.
    /// * `video_size` - Display size of the video (pixel aspect ratio applied).
    /// * `options` - Title, fullscreen state and geometry hints.
    ///
    /// # Returns
    ///
    /// The window, already configured and ready to render.
    pub fn new_toplevel(
        display: &Display,
        video_size: (i32, i32),
        options: &ToplevelOptions,
    ) -> Result<Self> {
        let wm_base = display
            .globals()
            .wm_base
            .as_ref()
            .ok_or(Error::MissingGlobal("xdg_wm_base"))?;

        let shared = Arc::new(Self::create_surfaces(display, None, video_size)?);
        {
            let mut geometry = shared.geometry();
            geometry.render = toplevel_rectangle(video_size, options);
        }

        let xdg_surface =
            wm_base.get_xdg_surface(&shared.area_surface, display.qh(), Arc::downgrade(&shared));
        let toplevel = xdg_surface.get_toplevel(display.qh(), Arc::downgrade(&shared));
        toplevel.set_title(options.title.clone().unwrap_or_else(|| "rswaylandsink".into()));
        if let Some(app_id) = &options.app_id {
            toplevel.set_app_id(app_id.clone());
        }
        if options.fullscreen {
            toplevel.set_fullscreen(None);
        }

        if let Ok(mut xdg) = shared.xdg.lock() {
            *xdg = Some((xdg_surface, toplevel));
        }

        // Initial commit without a buffer triggers the first configure.
        shared.area_surface.commit();
        display.flush()?;

        let geometry = shared.geometry();
        let geometry = shared
            .configure_cond
            .wait_while(geometry, |g| !g.configured)
            .unwrap_or_else(|e| e.into_inner());
        debug!("Toplevel window ready, render rectangle {:?}", geometry.render);
        drop(geometry);

        Ok(Self { shared })
    }

    /// Embeds a window into `parent`, a surface owned by the application.
    ///
    /// The render rectangle stays unconfigured until
    /// [`Window::set_render_rectangle`] is called.
    pub fn new_embedded(display: &Display, parent: &WlSurface) -> Result<Self> {
        let shared = Self::create_surfaces(display, Some(parent), (0, 0))?;
        display.flush()?;
        Ok(Self {
            shared: Arc::new(shared),
        })
    }

    fn create_surfaces(
        display: &Display,
        parent: Option<&WlSurface>,
        video_size: (i32, i32),
    ) -> Result<WindowShared> {
        let globals = display.globals();
        let qh = display.qh();

        let area_surface = globals.compositor.create_surface(qh, ());
        let video_surface = globals.compositor.create_surface(qh, ());

        let area_subsurface = parent.map(|parent| {
            let subsurface = globals.subcompositor.get_subsurface(&area_surface, parent, qh, ());
            subsurface.set_desync();
            subsurface
        });
        let video_subsurface =
            globals
                .subcompositor
                .get_subsurface(&video_surface, &area_surface, qh, ());
        video_subsurface.set_desync();

        let area_viewport = globals
            .viewporter
            .as_ref()
            .map(|v| v.get_viewport(&area_surface, qh, ()));
        let video_viewport = globals
            .viewporter
            .as_ref()
            .map(|v| v.get_viewport(&video_surface, qh, ()));

        // Input goes to the parent.
        let region = globals.compositor.create_region(qh, ());
        area_surface.set_input_region(Some(&region));
        video_surface.set_input_region(Some(&region));
        region.destroy();

        Ok(WindowShared {
            connection: display.connection().clone(),
            area_surface,
            area_subsurface,
            area_viewport,
            video_surface,
            video_subsurface,
            video_viewport,
            xdg: Mutex::new(None),
            background: black_pixel(display)?,
            geometry: Mutex::new(Geometry {
                video: video_size,
                ..Default::default()
            }),
            configure_cond: Condvar::new(),
            closed: Mutex::new(None),
        })
    }

    /// `true` for windows created by [`Window::new_toplevel`].
    pub fn is_toplevel(&self) -> bool {
        self.shared.is_toplevel()
    }

    pub fn render_rectangle(&self) -> Rectangle {
        self.shared.geometry().render
    }

    /// Sets where the video is drawn, relative to the parent surface.
    pub fn set_render_rectangle(&self, rect: Rectangle) {
        let mut geometry = self.shared.geometry();
        if geometry.render == rect {
            return;
        }
        debug!("Render rectangle set to {:?}", rect);
        geometry.render = rect;
        self.shared.apply_layout(&geometry);
        self.flush();
    }

    /// Sets the buffer transform of the video surface.
    pub fn set_transform(&self, transform: Transform) {
        let mut geometry = self.shared.geometry();
        geometry.transform = transform;
        self.shared
            .video_surface
            .set_buffer_transform(transform.into());
        self.shared.apply_layout(&geometry);
        self.flush();
    }

    /// Switches a toplevel in or out of fullscreen. Ignored for embedded windows.
    pub fn set_fullscreen(&self, fullscreen: bool) {
        let Ok(xdg) = self.shared.xdg.lock() else {
            return;
        };
        let Some((_, toplevel)) = xdg.as_ref() else {
            warn!("Fullscreen is only supported on toplevel windows");
            return;
        };
        if fullscreen {
            toplevel.set_fullscreen(None);
        } else {
            toplevel.unset_fullscreen();
        }
        self.flush();
    }

    /// Installs the listener run when the user closes a toplevel window.
    pub fn set_closed_listener(&self, listener: ClosedListener) {
        match self.shared.closed.lock() {
            Ok(mut slot) => *slot = Some(listener),
            Err(e) => error!("Window closed listener lock poisoned: {}", e),
        }
    }

    /// Requests a frame callback on the video surface.
    ///
    /// The callback is delivered on the queue behind `queue`; it fires after
    /// the next commit of the video surface.
    pub fn request_frame(&self, queue: &FrameQueueHandle) -> CallbackId {
        let id = next_callback_id();
        self.shared.video_surface.frame(&queue.qh, id);
        id
    }

    /// Attaches `buffer` to the video surface and commits it.
    ///
    /// `video_size` is passed when the video dimensions changed, which
    /// re-runs the layout. A `None` buffer detaches the current one.
    pub fn render(&self, buffer: Option<&Buffer>, video_size: Option<(i32, i32)>) {
        let mut geometry = self.shared.geometry();
        if let Some(size) = video_size {
            geometry.video = size;
            self.shared.apply_layout(&geometry);
        }

        let surface = &self.shared.video_surface;
        match buffer {
            Some(buffer) => {
                surface.attach(Some(buffer.wl_buffer()), 0, 0);
                damage_all(surface);
            }
            None => surface.attach(None, 0, 0),
        }
        surface.commit();
        drop(geometry);
        self.flush();
    }

    fn flush(&self) {
        if let Err(e) = self.shared.connection.flush() {
            error!("Failed to flush window requests: {}", e);
        }
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        if let Ok(mut xdg) = self.shared.xdg.lock()
            && let Some((xdg_surface, toplevel)) = xdg.take()
        {
            toplevel.destroy();
            xdg_surface.destroy();
        }
        if let Some(viewport) = &self.shared.video_viewport {
            viewport.destroy();
        }
        if let Some(viewport) = &self.shared.area_viewport {
            viewport.destroy();
        }
        self.shared.video_subsurface.destroy();
        self.shared.video_surface.destroy();
        if let Some(subsurface) = &self.shared.area_subsurface {
            subsurface.destroy();
        }
        self.shared.area_surface.destroy();
        self.flush();
        debug!("Window destroyed");
    }
}

fn toplevel_rectangle(video_size: (i32, i32), options: &ToplevelOptions) -> Rectangle {
    let (x, y) = (options.position.0.max(0), options.position.1.max(0));
    let (width, height) = if options.size.0 > 0 && options.size.1 > 0 {
        options.size
    } else {
        video_size
    };
    Rectangle::new(x, y, width, height)
}
