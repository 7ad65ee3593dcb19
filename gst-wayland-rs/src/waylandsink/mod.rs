//! Wayland Sink Element
//!
//! This module implements `rswaylandsink`, a GStreamer video sink that
//! presents frames on a Wayland compositor surface.
//!
//! ## Responsibilities
//! - Finds a display connection (shared by the application through
//!   GstContext, or opened by the sink)
//! - Negotiates formats the compositor accepts, in system memory or dmabuf
//! - Imports frames without copying when their memory allows it, copies
//!   them into a shared memory pool otherwise
//! - Presents at most one frame per compositor frame callback
//! - Embeds into application surfaces through the VideoOverlay interface,
//!   or creates its own toplevel window
//!
//! ## Properties
//! - `display`: Display name when none is shared via GstContext
//! - `fullscreen`: Make the toplevel window fullscreen
//! - `rotate-method`: Rotation of the video (`auto` follows stream tags)
//! - `position-x`, `position-y`, `out-width`, `out-height`: Placement of the
//!   video inside the toplevel window
//! - `suppress-interlace`: Don't flag interlaced dmabufs
//!
//! ## Example Pipeline
//! ```bash
//! gst-launch-1.0 videotestsrc ! rswaylandsink
//! ```

// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

// Copyright (C) 2020 Sebastian Dröge <sebastian@centricular.com>
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
use gstreamer as gst;
use gstreamer_base as gst_base;
use gstreamer_video as gst_video;

/// Window creation, embedding and teardown policy
mod binder;

/// Display buffers cached on pipeline buffers
mod buffer;

/// Display seam the engine is written against
mod display;

/// Core implementation (properties, state changes, GStreamer trait impls)
mod imp;

/// Caps queries and acceptance against the display formats
mod negotiation;

/// Shared memory pool for the copy path
mod pool;

/// Presentation engine
mod presenter;

/// Property and tag driven rotation
mod rotation;

/// Element tests, driven by a fake display
#[cfg(test)]
mod sink_tests;

/// Settings and their defaults
mod state;

/// Frame callback throttle
mod throttle;

/// GStreamer format to DRM fourcc and wl_shm format tables
mod video_format;

/// Display seam implementation on top of wl-display
mod wayland;

/// GLib wrapper type for the WaylandSink element.
///
/// ## Inheritance Chain (GStreamer class hierarchy)
/// - `gst::Object`
/// - `gst::Element`
/// - `gst_base::BaseSink`
/// - `gst_video::VideoSink`
/// - `WaylandSink`, implementing `gst_video::VideoOverlay`
glib::wrapper! {
    pub struct WaylandSink(ObjectSubclass<imp::WaylandSink>)
        @extends gst_video::VideoSink, gst_base::BaseSink, gst::Element, gst::Object,
        @implements gst_video::VideoOverlay;
}

/// Registers the rswaylandsink element with GStreamer.
///
/// # Arguments
/// * `plugin` - The parent plugin instance
///
/// # Returns
/// * `Ok(())` if registration succeeded
/// * `Err(BoolError)` if the element name conflicts or registration fails
///
/// # Rank
/// The rank is NONE, users must request the element by name.
pub fn register(plugin: &gst::Plugin) -> Result<(), glib::BoolError> {
    gst::Element::register(
        Some(plugin),
        "rswaylandsink",
        gst::Rank::NONE,
        WaylandSink::static_type(),
    )
}

/// Registers the element without a plugin, for tests.
#[cfg(test)]
pub(crate) fn register_static() -> Result<(), glib::BoolError> {
    gst::Element::register(
        None,
        "rswaylandsink",
        gst::Rank::NONE,
        WaylandSink::static_type(),
    )
}
