// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Mapping between GStreamer video formats and compositor pixel formats.
//!
//! `wl_shm` formats are DRM fourcc codes, except for argb8888 and xrgb8888
//! which have the dedicated values 0 and 1.

use gst_video::VideoFormat;
use gstreamer_video as gst_video;

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24
}

/// Formats accepted on the sink pad, in order of preference.
pub(crate) const SINK_FORMATS: &[VideoFormat] = &[
    VideoFormat::Bgrx,
    VideoFormat::Bgra,
    VideoFormat::Rgbx,
    VideoFormat::Xbgr,
    VideoFormat::Xrgb,
    VideoFormat::Rgba,
    VideoFormat::Abgr,
    VideoFormat::Argb,
    VideoFormat::Rgb,
    VideoFormat::Bgr,
    VideoFormat::Rgb16,
    VideoFormat::Bgr16,
    VideoFormat::Yuy2,
    VideoFormat::Yvyu,
    VideoFormat::Uyvy,
    VideoFormat::Ayuv,
    VideoFormat::Nv12,
    VideoFormat::Nv21,
    VideoFormat::Nv16,
    VideoFormat::Nv61,
    VideoFormat::Yuv9,
    VideoFormat::Yvu9,
    VideoFormat::Y41b,
    VideoFormat::I420,
    VideoFormat::Yv12,
    VideoFormat::Y42b,
    VideoFormat::V308,
];

/// (GStreamer format, DRM fourcc)
const FORMAT_TABLE: &[(VideoFormat, u32)] = &[
    (VideoFormat::Bgrx, fourcc(b"XR24")),
    (VideoFormat::Bgra, fourcc(b"AR24")),
    (VideoFormat::Rgbx, fourcc(b"XB24")),
    (VideoFormat::Xbgr, fourcc(b"RX24")),
    (VideoFormat::Xrgb, fourcc(b"BX24")),
    (VideoFormat::Rgba, fourcc(b"AB24")),
    (VideoFormat::Abgr, fourcc(b"RA24")),
    (VideoFormat::Argb, fourcc(b"BA24")),
    (VideoFormat::Rgb, fourcc(b"BG24")),
    (VideoFormat::Bgr, fourcc(b"RG24")),
    (VideoFormat::Rgb16, fourcc(b"RG16")),
    (VideoFormat::Bgr16, fourcc(b"BG16")),
    (VideoFormat::Yuy2, fourcc(b"YUYV")),
    (VideoFormat::Yvyu, fourcc(b"YVYU")),
    (VideoFormat::Uyvy, fourcc(b"UYVY")),
    (VideoFormat::Ayuv, fourcc(b"AYUV")),
    (VideoFormat::Nv12, fourcc(b"NV12")),
    (VideoFormat::Nv21, fourcc(b"NV21")),
    (VideoFormat::Nv16, fourcc(b"NV16")),
    (VideoFormat::Nv61, fourcc(b"NV61")),
    (VideoFormat::Yuv9, fourcc(b"YUV9")),
    (VideoFormat::Yvu9, fourcc(b"YVU9")),
    (VideoFormat::Y41b, fourcc(b"YU11")),
    (VideoFormat::I420, fourcc(b"YU12")),
    (VideoFormat::Yv12, fourcc(b"YV12")),
    (VideoFormat::Y42b, fourcc(b"YU16")),
    (VideoFormat::V308, fourcc(b"YU24")),
];

const DRM_ARGB8888: u32 = fourcc(b"AR24");
const DRM_XRGB8888: u32 = fourcc(b"XR24");

/// DRM fourcc of a GStreamer format.
pub(crate) fn to_drm_fourcc(format: VideoFormat) -> Option<u32> {
    FORMAT_TABLE
        .iter()
        .find(|(f, _)| *f == format)
        .map(|(_, code)| *code)
}

/// GStreamer format of a DRM fourcc.
pub(crate) fn from_drm_fourcc(code: u32) -> Option<VideoFormat> {
    FORMAT_TABLE
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(format, _)| *format)
}

/// `wl_shm` format of a GStreamer format.
pub(crate) fn to_shm_format(format: VideoFormat) -> Option<u32> {
    to_drm_fourcc(format).map(|code| match code {
        DRM_ARGB8888 => wl_display::ARGB8888,
        DRM_XRGB8888 => wl_display::XRGB8888,
        other => other,
    })
}

/// GStreamer format of a `wl_shm` format.
pub(crate) fn from_shm_format(code: u32) -> Option<VideoFormat> {
    let code = match code {
        wl_display::ARGB8888 => DRM_ARGB8888,
        wl_display::XRGB8888 => DRM_XRGB8888,
        other => other,
    };
    from_drm_fourcc(code)
}

/// Stride alignment in bytes applied to every plane of pool buffers.
pub(crate) fn stride_alignment(format: VideoFormat) -> u32 {
    match format {
        VideoFormat::Nv12
        | VideoFormat::Nv21
        | VideoFormat::Yv12
        | VideoFormat::I420
        | VideoFormat::P01010le => 16,
        _ => 64,
    }
}
