// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Safe wrapper over the Wayland client protocol for video presentation.
//!
//! The crate exposes the handful of objects a video sink needs:
//!
//! * [`Display`]: the compositor connection, its dispatch thread and the
//!   formats the compositor accepts for shm and dmabuf buffers;
//! * [`Buffer`]: a `wl_buffer` with release notifications;
//! * [`Window`]: an area surface plus a scaled video subsurface;
//! * [`FrameQueue`]: the queue frame callbacks are delivered on.

mod buffer;
mod display;
mod error;
mod frame;
mod geometry;
mod window;

pub use buffer::{
    ARGB8888, Buffer, DmabufDesc, DmabufPlane, ReleaseListener, ShmBufferDesc, XRGB8888,
};
pub use display::{Display, Formats};
pub use error::{Error, Result};
pub use frame::{CallbackId, FrameQueue, FrameQueueHandle};
pub use geometry::{Rectangle, Transform, center_rect, video_placement};
pub use window::{ClosedListener, ToplevelOptions, Window};

/// Re-exported so callers can name the application surface type.
pub use wayland_client::protocol::wl_surface::WlSurface;
