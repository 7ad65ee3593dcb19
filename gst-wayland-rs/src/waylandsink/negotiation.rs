// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Caps negotiation against the formats of the display.
//!
//! The sink caps have two structures: system memory caps, restricted to the
//! display's `wl_shm` formats, and `memory:DMABuf` caps, restricted to its
//! dmabuf formats.

use gst_video::{VideoFormat, VideoInfo};
use gstreamer as gst;
use gstreamer_allocators as gst_allocators;
use gstreamer_video as gst_video;
use tracing::debug;

use crate::waylandsink::display::DisplayFormats;
use crate::waylandsink::presenter::RenderError;
use crate::waylandsink::video_format::SINK_FORMATS;

/// Errors rejecting caps.
#[derive(Debug, thiserror::Error)]
pub(crate) enum NegotiationError {
    #[error("Could not locate display")]
    NoDisplay,

    #[error("Could not parse caps {0}")]
    InvalidCaps(gst::Caps),

    #[error("Format {format} is not available on the display ({memory})")]
    UnsupportedFormat {
        format: VideoFormat,
        memory: &'static str,
    },

    #[error("Failed to create buffer pool: {0}")]
    Pool(#[source] RenderError),
}

fn caps_with_formats(formats: &[VideoFormat], dmabuf: bool) -> gst::Caps {
    let builder = gst_video::VideoCapsBuilder::new().format_list(formats.iter().copied());
    if dmabuf {
        builder
            .features([gst_allocators::CAPS_FEATURE_MEMORY_DMABUF])
            .build()
    } else {
        builder.build()
    }
}

/// Pad template caps: every sink format, in system memory and as dmabuf.
pub(crate) fn template_caps() -> gst::Caps {
    let mut caps = caps_with_formats(SINK_FORMATS, false);
    caps.make_mut()
        .append(caps_with_formats(SINK_FORMATS, true));
    caps
}

/// Caps the sink accepts right now.
///
/// Without a display the template caps are returned; with one, the formats
/// are narrowed to what the display advertised. Formats the sink doesn't know
/// are dropped, and a memory kind without any format is left out.
pub(crate) fn query_caps(formats: Option<&DisplayFormats>, filter: Option<&gst::Caps>) -> gst::Caps {
    let caps = match formats {
        None => template_caps(),
        Some(formats) => {
            let known = |list: &[VideoFormat]| -> Vec<VideoFormat> {
                list.iter()
                    .copied()
                    .filter(|f| SINK_FORMATS.contains(f))
                    .collect()
            };
            let shm = known(&formats.shm);
            let dmabuf = known(&formats.dmabuf);

            let mut caps = gst::Caps::new_empty();
            {
                let caps_mut = caps.make_mut();
                if !shm.is_empty() {
                    caps_mut.append(caps_with_formats(&shm, false));
                }
                if !dmabuf.is_empty() {
                    caps_mut.append(caps_with_formats(&dmabuf, true));
                }
            }
            caps
        }
    };

    debug!("display caps: {}", caps);
    match filter {
        Some(filter) => filter.intersect_with_mode(&caps, gst::CapsIntersectMode::First),
        None => caps,
    }
}

/// Result of accepting caps.
#[derive(Debug, Clone)]
pub(crate) struct Negotiated {
    pub info: VideoInfo,
    pub use_dmabuf: bool,
}

/// Checks `caps` against the display formats.
pub(crate) fn accept_caps(
    caps: &gst::Caps,
    formats: &DisplayFormats,
) -> Result<Negotiated, NegotiationError> {
    let info =
        VideoInfo::from_caps(caps).map_err(|_| NegotiationError::InvalidCaps(caps.clone()))?;

    let use_dmabuf = caps
        .features(0)
        .is_some_and(|f| f.contains(gst_allocators::CAPS_FEATURE_MEMORY_DMABUF));

    let supported = if use_dmabuf {
        formats.supports_dmabuf(info.format())
    } else {
        formats.supports_shm(info.format())
    };
    if !supported {
        return Err(NegotiationError::UnsupportedFormat {
            format: info.format(),
            memory: if use_dmabuf { "dmabuf" } else { "shm" },
        });
    }

    Ok(Negotiated { info, use_dmabuf })
}
