// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Window/surface binding.
//!
//! The sink either presents into a surface handed over by the application
//! through the overlay interface, or creates its own toplevel window on the
//! first frame. Toplevel windows belong to the sink and are destroyed when
//! streaming stops; embedded windows are only detached.

use gst::prelude::*;
use gst_video::VideoInfo;
use gstreamer as gst;
use gstreamer_video as gst_video;
use tracing::{debug, info};
use wl_display::{ClosedListener, ToplevelOptions, Transform};

use crate::waylandsink::display::{DisplayBackend, WindowHandle};
use crate::waylandsink::presenter::RenderError;
use crate::waylandsink::state::{RenderSettings, TOPLEVEL_APP_ID};

/// Size of the video on screen: the width is corrected by the pixel aspect
/// ratio, the height is kept.
pub(crate) fn display_size(info: &VideoInfo) -> (i32, i32) {
    let par = info.par();
    let width = (info.width() as u64)
        .mul_div_round(par.numer() as u64, par.denom() as u64)
        .unwrap_or(info.width() as u64);
    (width as i32, info.height() as i32)
}

pub(crate) fn toplevel_options(settings: &RenderSettings) -> ToplevelOptions {
    ToplevelOptions {
        title: None,
        app_id: Some(TOPLEVEL_APP_ID.to_owned()),
        fullscreen: settings.fullscreen,
        position: settings.position,
        size: settings.out_size,
    }
}

/// Creates the sink's own toplevel window for `info`.
pub(crate) fn create_toplevel<D: DisplayBackend>(
    display: &D,
    info: &VideoInfo,
    settings: &RenderSettings,
    transform: Transform,
    closed: ClosedListener,
) -> Result<D::Window, RenderError> {
    let size = display_size(info);
    let window = display
        .create_toplevel(size, &toplevel_options(settings))
        .map_err(RenderError::Display)?;
    window.set_closed_listener(closed);
    window.set_transform(transform);
    info!("Created toplevel window for {}x{} video", size.0, size.1);
    Ok(window)
}

/// Embeds a window into the application surface `handle`.
///
/// Only possible on a display shared by the application: a surface of
/// another connection can't be used from ours.
pub(crate) fn bind_external<D: DisplayBackend>(
    display: &D,
    handle: usize,
    transform: Transform,
) -> Result<D::Window, RenderError> {
    if display.has_own_display() {
        return Err(RenderError::OwnDisplayWithExternalSurface);
    }
    let window = display
        .create_embedded(handle)
        .map_err(RenderError::Display)?;
    window.set_transform(transform);
    debug!("Embedded into application surface {:#x}", handle);
    Ok(window)
}

/// Applies the stop policy to `window`.
///
/// # Returns
/// The window if it has to be kept: embedded windows are detached and
/// kept, toplevel windows are dropped.
pub(crate) fn release_window<W: WindowHandle>(window: W) -> Option<W> {
    if window.is_toplevel() {
        debug!("Destroying toplevel window");
        None
    } else {
        window.render(None, None);
        Some(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_aspect_ratio_scales_width() {
        gst::init().unwrap();
        let info = VideoInfo::builder(gst_video::VideoFormat::I420, 720, 576)
            .par(gst::Fraction::new(16, 15))
            .build()
            .unwrap();
        assert_eq!(display_size(&info), (768, 576));

        let square = VideoInfo::builder(gst_video::VideoFormat::I420, 640, 480)
            .build()
            .unwrap();
        assert_eq!(display_size(&square), (640, 480));
    }

    #[test]
    fn toplevel_options_carry_hints() {
        let settings = RenderSettings {
            fullscreen: true,
            position: (10, 20),
            out_size: (320, 240),
            suppress_interlace: true,
        };
        let options = toplevel_options(&settings);
        assert!(options.fullscreen);
        assert_eq!(options.position, (10, 20));
        assert_eq!(options.size, (320, 240));
        assert_eq!(options.app_id.as_deref(), Some(TOPLEVEL_APP_ID));
    }
}
