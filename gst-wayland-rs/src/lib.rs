//! GStreamer Plugin for Wayland video output
//!
//! This crate implements a GStreamer plugin providing `rswaylandsink`, a video
//! sink that presents frames on a Wayland compositor surface.
//!
//! ## Presentation Paths
//! - **dmabuf**: frames whose memory is entirely dmabuf are imported into the
//!   compositor without copying
//! - **shm**: frames made of a single fd-backed memory are wrapped as shared
//!   memory buffers
//! - **copy**: any other frame is copied into a buffer of the sink's own
//!   shared memory pool
//!
//! Presentation is throttled to the compositor's frame callbacks: at most one
//! frame is in flight per surface.

// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

// Copyright (C) 2017 Sebastian Dröge <sebastian@centricular.com>
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
//
// SPDX-License-Identifier: MIT OR Apache-2.0

// Allow non-Send fields in Send types (required for GStreamer's threading model)
// and unused doc comments (sometimes present in macro-generated code)
#![allow(clippy::non_send_fields_in_send_ty, unused_doc_comments)]

use gst::glib;
use gstreamer as gst;

/// Wayland video sink element
pub mod waylandsink;

/// Initializes the plugin by registering all elements with GStreamer.
///
/// # Arguments
/// * `plugin` - The GStreamer plugin instance being initialized
///
/// # Returns
/// * `Ok(())` if the element registered successfully
/// * `Err(BoolError)` if registration failed
fn plugin_init(plugin: &gst::Plugin) -> Result<(), glib::BoolError> {
    waylandsink::register(plugin)?;

    Ok(())
}

/// GStreamer plugin metadata and entry point.
///
/// - Plugin name: "rswayland"
/// - Version: From CARGO_PKG_VERSION + git commit ID
/// - License: Apache-2.0
gst::plugin_define!(
    rswayland,
    env!("CARGO_PKG_DESCRIPTION"),
    plugin_init,
    concat!(env!("CARGO_PKG_VERSION"), "-", env!("COMMIT_ID")),
    "Apache-2.0",
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_NAME"),
    env!("CARGO_PKG_REPOSITORY"),
    env!("BUILD_REL_DATE")
);
