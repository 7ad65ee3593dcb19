//! Wayland Sink Implementation
//!
//! This module contains the core implementation of the rswaylandsink GStreamer
//! element. It implements GStreamer's VideoSink and VideoOverlay traits,
//! handling:
//! - Display discovery (GstContext from upstream or the application, or an
//!   own connection)
//! - Property management (display, fullscreen, rotation, geometry hints)
//! - Caps negotiation against the formats of the compositor
//! - Frame presentation through the presentation engine
//!
//! ## Implementation Structure
//! - `WaylandSink`: The struct holding element state (settings, presenter)
//! - `ObjectImpl`: GObject property system integration
//! - `ElementImpl`: Metadata, pad templates, state changes, context
//! - `BaseSinkImpl`: Negotiation, allocation, events, unlocking
//! - `VideoSinkImpl`: Frame presentation
//! - `VideoOverlayImpl`: Embedding into application surfaces

// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

// Copyright (C) 2018 Sebastian Dröge <sebastian@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

use gst::glib;
use gst::prelude::*;
use gst::subclass::prelude::*;
use gst_base::prelude::BaseSinkExt;
use gst_base::subclass::prelude::*;
use gst_video::prelude::*;
use gst_video::subclass::prelude::*;
use gst_video::VideoOrientationMethod;
use gstreamer as gst;
use gstreamer_base as gst_base;
use gstreamer_video as gst_video;

use tracing::trace;
use wl_display::{ClosedListener, Rectangle};

use std::sync::LazyLock;
use std::sync::Mutex;

use crate::waylandsink;
use crate::waylandsink::negotiation;
use crate::waylandsink::pool;
use crate::waylandsink::presenter::{Access, Presented, Presenter, RenderError, WindowHooks};
use crate::waylandsink::rotation;
use crate::waylandsink::state::{
    DEFAULT_FULLSCREEN, DEFAULT_OUT_SIZE, DEFAULT_POSITION, DEFAULT_ROTATE_METHOD,
    DEFAULT_SUPPRESS_INTERLACE, Settings,
};
use crate::waylandsink::wayland::WaylandDisplay;

/// GStreamer debug category for logging rswaylandsink-specific messages.
///
/// Set GST_DEBUG=rswaylandsink:5 to see TRACE-level logs.
pub(crate) static CAT: LazyLock<gst::DebugCategory> = LazyLock::new(|| {
    gst::DebugCategory::new(
        "rswaylandsink",
        gst::DebugColorFlags::empty(),
        Some("Wayland Video Sink"),
    )
});

/// Context type used to share a `wl_display` between the application and
/// Wayland elements.
pub(crate) const WL_DISPLAY_HANDLE_CONTEXT_TYPE: &str = "GstWlDisplayHandleContextType";

/// Wayland Sink element implementation.
///
/// Properties live behind the settings lock. Everything else belongs to the
/// presenter, which has its own locks; the settings lock is always taken
/// first when both are needed.
#[derive(Default)]
pub struct WaylandSink {
    /// User-configurable properties
    settings: Mutex<Settings>,

    /// Display connection, window and presentation state
    presenter: Presenter<WaylandDisplay>,
}

/// Registers this type as a GLib object subclass.
#[glib::object_subclass]
impl ObjectSubclass for WaylandSink {
    /// Internal type name (must be unique across all GStreamer elements)
    const NAME: &'static str = "GstRsWaylandSink";

    /// Public wrapper type
    type Type = waylandsink::WaylandSink;

    /// Parent class (VideoSink provides show_frame)
    type ParentType = gst_video::VideoSink;

    /// Applications embed the video through the overlay interface
    type Interfaces = (gst_video::VideoOverlay,);
}

impl ObjectImpl for WaylandSink {
    /// Returns the list of properties this element exposes.
    fn properties() -> &'static [glib::ParamSpec] {
        static PROPERTIES: LazyLock<Vec<glib::ParamSpec>> = LazyLock::new(|| {
            vec![
                // Only used when no display handle is shared via GstContext
                glib::ParamSpecString::builder("display")
                    .nick("Display")
                    .blurb("Wayland display name to connect to, if not supplied via the GstContext")
                    .mutable_ready()
                    .build(),
                glib::ParamSpecBoolean::builder("fullscreen")
                    .nick("Fullscreen")
                    .blurb("Whether the surface should be made fullscreen ")
                    .default_value(DEFAULT_FULLSCREEN)
                    .mutable_playing()
                    .build(),
                glib::ParamSpecEnum::builder_with_default("rotate-method", DEFAULT_ROTATE_METHOD)
                    .nick("rotate method")
                    .blurb("rotate method")
                    .mutable_playing()
                    .build(),
                glib::ParamSpecInt::builder("position-x")
                    .nick("Position X")
                    .blurb("X position of the video in the toplevel window (-1 = unset)")
                    .minimum(-1)
                    .default_value(DEFAULT_POSITION)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecInt::builder("position-y")
                    .nick("Position Y")
                    .blurb("Y position of the video in the toplevel window (-1 = unset)")
                    .minimum(-1)
                    .default_value(DEFAULT_POSITION)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecInt::builder("out-width")
                    .nick("Output width")
                    .blurb("Width of the video in the toplevel window (-1 = video width)")
                    .minimum(-1)
                    .default_value(DEFAULT_OUT_SIZE)
                    .mutable_ready()
                    .build(),
                glib::ParamSpecInt::builder("out-height")
                    .nick("Output height")
                    .blurb("Height of the video in the toplevel window (-1 = video height)")
                    .minimum(-1)
                    .default_value(DEFAULT_OUT_SIZE)
                    .mutable_ready()
                    .build(),
                // Compositors without interlaced dmabuf support reject the flag
                glib::ParamSpecBoolean::builder("suppress-interlace")
                    .nick("Suppress interlace")
                    .blurb("Create dmabuf buffers without the interlaced flag")
                    .default_value(DEFAULT_SUPPRESS_INTERLACE)
                    .mutable_ready()
                    .build(),
            ]
        });

        PROPERTIES.as_ref()
    }

    /// Called when the element is constructed (after allocation).
    ///
    /// Sets up tracing (if enabled).
    fn constructed(&self) {
        #[cfg(feature = "tracing")]
        {
            use tracing_subscriber::filter::LevelFilter;
            use tracing_subscriber::util::SubscriberInitExt;

            let _ = tracing_subscriber::fmt()
                .compact()
                .with_file(true)
                .with_line_number(true)
                .with_thread_ids(true)
                .with_target(false)
                .with_max_level(LevelFilter::TRACE)
                .with_ansi(true)
                .finish()
                .try_init();
        }

        self.parent_constructed();
    }

    /// Called when a property is set via g_object_set() or gst-launch.
    ///
    /// `fullscreen` and `rotate-method` are also applied to an existing
    /// window, with the settings lock held.
    fn set_property(&self, _id: usize, value: &glib::Value, pspec: &glib::ParamSpec) {
        let Ok(mut settings) = self.settings.lock() else {
            gst::error!(
                CAT,
                imp = self,
                "Settings mutex poisoned, property change ignored"
            );
            return;
        };

        match pspec.name() {
            "display" => match value.get::<Option<String>>() {
                Ok(display) => {
                    gst::info!(CAT, imp = self, "Changing display to {:?}", display);
                    settings.display = display;
                }
                Err(_) => gst::error!(CAT, imp = self, "Invalid type for display property"),
            },
            "fullscreen" => match value.get::<bool>() {
                Ok(fullscreen) => {
                    settings.fullscreen = fullscreen;
                    if let Err(e) = self.presenter.set_fullscreen(fullscreen) {
                        gst::error!(CAT, imp = self, "Failed to apply fullscreen: {}", e);
                    }
                }
                Err(_) => gst::error!(CAT, imp = self, "Invalid type for fullscreen property"),
            },
            "rotate-method" => match value.get::<VideoOrientationMethod>() {
                Ok(method) => {
                    settings.rotate_method = method;
                    if let Err(e) = self.presenter.set_rotation(method, false) {
                        gst::error!(CAT, imp = self, "Failed to apply rotation: {}", e);
                    }
                }
                Err(_) => gst::error!(CAT, imp = self, "Invalid type for rotate-method property"),
            },
            "position-x" | "position-y" | "out-width" | "out-height" => {
                match value.get::<i32>() {
                    Ok(v) => {
                        let slot = match pspec.name() {
                            "position-x" => &mut settings.position_x,
                            "position-y" => &mut settings.position_y,
                            "out-width" => &mut settings.out_width,
                            _ => &mut settings.out_height,
                        };
                        gst::info!(
                            CAT,
                            imp = self,
                            "Changing {} from {} to {}",
                            pspec.name(),
                            slot,
                            v
                        );
                        *slot = v;
                    }
                    Err(_) => {
                        gst::error!(CAT, imp = self, "Invalid type for {} property", pspec.name())
                    }
                }
            }
            "suppress-interlace" => match value.get::<bool>() {
                Ok(suppress) => settings.suppress_interlace = suppress,
                Err(_) => {
                    gst::error!(CAT, imp = self, "Invalid type for suppress-interlace property")
                }
            },
            other => {
                gst::error!(CAT, imp = self, "Unknown property '{}'", other);
            }
        }
    }

    /// Called when a property is retrieved via g_object_get().
    fn property(&self, _id: usize, pspec: &glib::ParamSpec) -> glib::Value {
        let Ok(settings) = self.settings.lock() else {
            gst::error!(CAT, imp = self, "Settings mutex poisoned");
            return pspec.default_value().clone();
        };

        match pspec.name() {
            "display" => settings.display.to_value(),
            "fullscreen" => settings.fullscreen.to_value(),
            "rotate-method" => settings.rotate_method.to_value(),
            "position-x" => settings.position_x.to_value(),
            "position-y" => settings.position_y.to_value(),
            "out-width" => settings.out_width.to_value(),
            "out-height" => settings.out_height.to_value(),
            "suppress-interlace" => settings.suppress_interlace.to_value(),
            _ => {
                gst::error!(CAT, imp = self, "Unknown property {}", pspec.name());
                pspec.default_value().clone()
            }
        }
    }
}

impl GstObjectImpl for WaylandSink {}

impl ElementImpl for WaylandSink {
    /// Returns element metadata displayed by gst-inspect.
    fn metadata() -> Option<&'static gst::subclass::ElementMetadata> {
        static ELEMENT_METADATA: LazyLock<gst::subclass::ElementMetadata> = LazyLock::new(|| {
            gst::subclass::ElementMetadata::new(
                "Wayland video sink",
                "Sink/Video",
                "Output to wayland surface",
                "Contributors to the rswaylandsink project",
            )
        });

        Some(&*ELEMENT_METADATA)
    }

    /// Returns pad templates: raw video in system memory or as dmabuf, in
    /// every format the sink can hand to a compositor.
    fn pad_templates() -> &'static [gst::PadTemplate] {
        static PAD_TEMPLATES: LazyLock<Result<Vec<gst::PadTemplate>, glib::BoolError>> =
            LazyLock::new(|| {
                let sink_pad_template = gst::PadTemplate::new(
                    "sink",
                    gst::PadDirection::Sink,
                    gst::PadPresence::Always,
                    &negotiation::template_caps(),
                )?;

                Ok(vec![sink_pad_template])
            });

        match PAD_TEMPLATES.as_ref() {
            Ok(templates) => templates,
            Err(err) => {
                trace!("Failed to create pad templates: {:?}", err);
                &[]
            }
        }
    }

    /// Handles state transitions.
    ///
    /// - NULL to READY: find or open the display
    /// - PAUSED to READY: drop the last frame and the toplevel window
    /// - READY to NULL: drop the pool, and the display unless an embedded
    ///   window still needs it
    fn change_state(
        &self,
        transition: gst::StateChange,
    ) -> Result<gst::StateChangeSuccess, gst::StateChangeError> {
        if transition == gst::StateChange::NullToReady && !self.find_display() {
            return Err(gst::StateChangeError);
        }

        let ret = self.parent_change_state(transition)?;

        match transition {
            gst::StateChange::PausedToReady => {
                self.presenter.stop().map_err(|e| {
                    gst::error!(CAT, imp = self, "Failed to stop: {}", e);
                    gst::StateChangeError
                })?;
            }
            gst::StateChange::ReadyToNull => {
                let dropped = self.presenter.close().map_err(|e| {
                    gst::error!(CAT, imp = self, "Failed to close: {}", e);
                    gst::StateChangeError
                })?;
                if dropped {
                    gst::debug!(CAT, imp = self, "Disconnected from display");
                }
            }
            _ => (),
        }

        Ok(ret)
    }

    /// Receives the display handle shared by the application or a
    /// neighbouring element.
    fn set_context(&self, context: &gst::Context) {
        if context.context_type() == WL_DISPLAY_HANDLE_CONTEXT_TYPE {
            if self.presenter.has_display() {
                gst::warning!(CAT, imp = self, "changing display handle is not supported");
            } else {
                self.set_display_from_context(context);
            }
        }

        self.parent_set_context(context)
    }
}

impl BaseSinkImpl for WaylandSink {
    /// Returns the caps the display supports, or the template caps before a
    /// display was found.
    fn caps(&self, filter: Option<&gst::Caps>) -> Option<gst::Caps> {
        let caps = self.presenter.caps(filter);
        gst::debug!(CAT, imp = self, "Returning caps {}", caps);
        Some(caps)
    }

    /// Validates the caps against the display formats and creates a new
    /// fallback pool for them.
    fn set_caps(&self, caps: &gst::Caps) -> Result<(), gst::LoggableError> {
        gst::debug!(CAT, imp = self, "Setting caps {}", caps);
        self.presenter
            .set_caps(caps)
            .map_err(|e| gst::loggable_error!(CAT, "Failed to set caps {}: {}", caps, e))
    }

    /// Offers upstream a shared memory pool and video meta support.
    fn propose_allocation(
        &self,
        query: &mut gst::query::Allocation,
    ) -> Result<(), gst::LoggableError> {
        pool::propose_allocation(query)
            .map_err(|e| gst::loggable_error!(CAT, "Failed to propose allocation: {}", e))
    }

    /// Picks up the image-orientation tag for rotation.
    fn event(&self, event: gst::Event) -> bool {
        if let gst::EventView::Tag(tag) = event.view()
            && let Some(method) = rotation::from_tag_list(tag.tag())
        {
            gst::debug!(CAT, imp = self, "Tag orientation {:?}", method);
            if let Err(e) = self.presenter.set_rotation(method, true) {
                gst::error!(CAT, imp = self, "Failed to apply rotation: {}", e);
            }
        }

        self.parent_event(event)
    }

    /// Interrupts a wait for the compositor's frame callback.
    fn unlock(&self) -> Result<(), gst::ErrorMessage> {
        gst::debug!(CAT, imp = self, "Unlocking");
        self.presenter.set_flushing(true);
        Ok(())
    }

    fn unlock_stop(&self) -> Result<(), gst::ErrorMessage> {
        gst::debug!(CAT, imp = self, "Unlock stop");
        self.presenter.set_flushing(false);
        Ok(())
    }
}

impl VideoSinkImpl for WaylandSink {
    /// Presents a frame.
    ///
    /// Settings are snapshotted before the presenter takes its render lock.
    fn show_frame(&self, buffer: &gst::Buffer) -> Result<gst::FlowSuccess, gst::FlowError> {
        let settings = self
            .settings
            .lock()
            .map_err(|_| gst::FlowError::Error)?
            .render_settings();

        match self.presenter.show_frame(buffer, &settings, self) {
            Ok(Presented::Shown) => Ok(gst::FlowSuccess::Ok),
            Ok(Presented::Duplicate) => {
                gst::log!(CAT, imp = self, "Buffer {:?} already on screen", buffer);
                Ok(gst::FlowSuccess::Ok)
            }
            Err(e) => Err(self.flow_error(buffer, e)),
        }
    }
}

impl VideoOverlayImpl for WaylandSink {
    /// Embeds the video into the application's `wl_surface`.
    fn set_window_handle(&self, handle: usize) {
        gst::debug!(CAT, imp = self, "Setting window handle {:#x}", handle);
        if handle != 0 && !self.find_display() {
            gst::error!(CAT, imp = self, "Failed to find display handle, ignoring window handle");
            return;
        }

        match self.presenter.set_window_handle(handle) {
            Ok(_) => (),
            Err(RenderError::OwnDisplayWithExternalSurface) => {
                gst::element_imp_error!(
                    self,
                    gst::ResourceError::OpenReadWrite,
                    ("Application did not provide a wayland display handle"),
                    [
                        "rswaylandsink cannot use an externally-supplied surface without an externally-supplied display handle. Consider providing a display handle from your application with GstContext"
                    ]
                );
            }
            Err(e) => gst::error!(CAT, imp = self, "Failed to use window handle: {}", e),
        }
    }

    fn set_render_rectangle(&self, x: i32, y: i32, width: i32, height: i32) {
        gst::debug!(
            CAT,
            imp = self,
            "window geometry changed to ({}, {}) {} x {}",
            x,
            y,
            width,
            height
        );
        match self
            .presenter
            .set_render_rectangle(Rectangle::new(x, y, width, height))
        {
            Ok(true) => (),
            Ok(false) => gst::warning!(
                CAT,
                imp = self,
                "set_render_rectangle called without window, ignoring"
            ),
            Err(e) => gst::error!(CAT, imp = self, "Failed to set render rectangle: {}", e),
        }
    }

    fn expose(&self) {
        gst::debug!(CAT, imp = self, "expose");
        if let Err(e) = self.presenter.expose() {
            gst::error!(CAT, imp = self, "Failed to expose: {}", e);
        }
    }
}

impl WindowHooks for WaylandSink {
    fn prepare_window_handle(&self) {
        self.obj().prepare_window_handle();
    }

    fn closed_listener(&self) -> ClosedListener {
        let weak = self.obj().downgrade();
        Box::new(move || {
            if let Some(obj) = weak.upgrade() {
                gst::element_error!(obj, gst::ResourceError::NotFound, ["Output window was closed"]);
            }
        })
    }
}

impl WaylandSink {
    /// Makes sure a display is available.
    ///
    /// Asks upstream for a shared display handle, then the application via
    /// a `need-context` message, and finally connects on our own.
    ///
    /// # Returns
    /// `false` if no display could be found or opened.
    fn find_display(&self) -> bool {
        if self.presenter.has_display() {
            return true;
        }

        let mut query = gst::query::Context::new(WL_DISPLAY_HANDLE_CONTEXT_TYPE);
        if self.obj().sink_pad().peer_query(&mut query)
            && let Some(context) = query.context_owned()
        {
            self.set_display_from_context(&context);
        }

        if !self.presenter.has_display() {
            // The application may answer through set_context().
            let msg = gst::message::NeedContext::builder(WL_DISPLAY_HANDLE_CONTEXT_TYPE)
                .src(&*self.obj())
                .build();
            if self.obj().post_message(msg).is_err() {
                gst::debug!(CAT, imp = self, "No bus to ask for a display handle");
            }
        }

        if !self.presenter.has_display() {
            let name = match self.settings.lock() {
                Ok(settings) => settings.display.clone(),
                Err(_) => {
                    gst::error!(CAT, imp = self, "Settings mutex poisoned");
                    return false;
                }
            };

            let display = match WaylandDisplay::connect(name.as_deref()) {
                Ok(display) => display,
                Err(e) => {
                    gst::element_imp_warning!(
                        self,
                        gst::ResourceError::OpenReadWrite,
                        ("Could not initialise Wayland output"),
                        ["Failed to create GstWlDisplay: '{}'", e]
                    );
                    return false;
                }
            };
            if let Err(e) = self.presenter.set_display(display) {
                gst::error!(CAT, imp = self, "Failed to install display: {}", e);
                return false;
            }
        }

        true
    }

    /// Uses the `wl_display` carried by `context`.
    fn set_display_from_context(&self, context: &gst::Context) {
        let handle = match context.structure().get::<glib::Pointer>("handle") {
            Ok(handle) if !handle.is_null() => handle,
            _ => {
                gst::warning!(CAT, imp = self, "Display handle context without a handle");
                return;
            }
        };

        // Safety: the context carries a live `wl_display` which the
        // application keeps alive as long as elements use it.
        match unsafe { WaylandDisplay::from_external(handle) } {
            Ok(display) => match self.presenter.set_display(display) {
                Ok(true) => gst::debug!(CAT, imp = self, "Using shared display {:?}", handle),
                Ok(false) => (),
                Err(e) => gst::error!(CAT, imp = self, "Failed to install display: {}", e),
            },
            Err(e) => {
                gst::element_imp_warning!(
                    self,
                    gst::ResourceError::OpenReadWrite,
                    ("Could not set display handle"),
                    ["Failed to use the external wayland display: '{}'", e]
                );
            }
        }
    }

    /// Turns a presentation failure into a flow error, posting the element
    /// errors applications expect.
    fn flow_error(&self, buffer: &gst::Buffer, err: RenderError) -> gst::FlowError {
        match err {
            RenderError::Flushing => gst::FlowError::Flushing,
            RenderError::NotNegotiated => gst::FlowError::NotNegotiated,
            RenderError::NoBuffer(flow) => {
                gst::warning!(CAT, imp = self, "could not create buffer");
                flow
            }
            RenderError::NoWindowSize => {
                gst::element_imp_error!(
                    self,
                    gst::ResourceError::Write,
                    ("Window has no size set"),
                    ["Make sure you set the size after calling set_window_handle"]
                );
                gst::FlowError::Error
            }
            RenderError::MapFailed(Access::Read) => {
                gst::element_imp_error!(
                    self,
                    gst::ResourceError::Read,
                    ["Video memory can not be read from userspace."]
                );
                gst::FlowError::Error
            }
            RenderError::MapFailed(Access::Write) => {
                gst::element_imp_error!(
                    self,
                    gst::ResourceError::Write,
                    ["Video memory can not be written from userspace."]
                );
                gst::FlowError::Error
            }
            RenderError::PoolActivation => {
                gst::element_imp_error!(
                    self,
                    gst::ResourceError::Settings,
                    ["failed to activate bufferpool."]
                );
                gst::FlowError::Error
            }
            RenderError::NoDisplayBuffer(reason) => {
                gst::error!(CAT, imp = self, "buffer {:?} {}", buffer, reason);
                gst::FlowError::Error
            }
            other => {
                gst::error!(CAT, imp = self, "Failed to present {:?}: {}", buffer, other);
                gst::FlowError::Error
            }
        }
    }
}
