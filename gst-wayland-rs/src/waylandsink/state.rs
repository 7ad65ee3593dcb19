//! Settings of the rswaylandsink element.
//!
//! ## Key Types
//! - `Settings`: User-configurable properties, behind the settings lock
//! - `RenderSettings`: Snapshot of the settings the streaming thread needs,
//!   taken before the render lock so the two locks are never nested the
//!   other way round

// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

use gst_video::VideoOrientationMethod;
use gstreamer_video as gst_video;

/// Default value for the display property (use `WAYLAND_DISPLAY`)
pub(crate) const DEFAULT_DISPLAY: Option<&str> = None;

/// Default value for the fullscreen property
pub(crate) const DEFAULT_FULLSCREEN: bool = false;

/// Default for position-x/position-y (unset)
pub(crate) const DEFAULT_POSITION: i32 = -1;

/// Default for out-width/out-height (use the video size)
pub(crate) const DEFAULT_OUT_SIZE: i32 = -1;

/// Default value for the suppress-interlace property
pub(crate) const DEFAULT_SUPPRESS_INTERLACE: bool = true;

/// Default value for the rotate-method property
pub(crate) const DEFAULT_ROTATE_METHOD: VideoOrientationMethod = VideoOrientationMethod::Identity;

/// Application id given to toplevel windows.
pub(crate) const TOPLEVEL_APP_ID: &str = "org.gstreamer.wayland";

/// User-configurable settings for the rswaylandsink element.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    /// Name of the display to connect to when none is shared via context
    pub display: Option<String>,

    /// Make toplevel windows fullscreen
    pub fullscreen: bool,

    pub position_x: i32,
    pub position_y: i32,
    pub out_width: i32,
    pub out_height: i32,

    /// Create dmabuf buffers without the interlaced flag
    pub suppress_interlace: bool,

    /// Explicit rotation, `Auto` follows the image-orientation tag
    pub rotate_method: VideoOrientationMethod,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            display: DEFAULT_DISPLAY.map(str::to_owned),
            fullscreen: DEFAULT_FULLSCREEN,
            position_x: DEFAULT_POSITION,
            position_y: DEFAULT_POSITION,
            out_width: DEFAULT_OUT_SIZE,
            out_height: DEFAULT_OUT_SIZE,
            suppress_interlace: DEFAULT_SUPPRESS_INTERLACE,
            rotate_method: DEFAULT_ROTATE_METHOD,
        }
    }
}

impl Settings {
    pub fn render_settings(&self) -> RenderSettings {
        RenderSettings {
            fullscreen: self.fullscreen,
            position: (self.position_x, self.position_y),
            out_size: (self.out_width, self.out_height),
            suppress_interlace: self.suppress_interlace,
        }
    }
}

/// Settings used while presenting a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RenderSettings {
    pub fullscreen: bool,
    pub position: (i32, i32),
    pub out_size: (i32, i32),
    pub suppress_interlace: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Settings::default().render_settings()
    }
}
