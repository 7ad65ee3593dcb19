// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Video rotation.
//!
//! Two sources decide the orientation: the `rotate-method` property and the
//! `image-orientation` tag of the stream. The property wins unless it is set
//! to `auto`, in which case the tag applies.

use gst_video::VideoOrientationMethod;
use gstreamer as gst;
use gstreamer_video as gst_video;
use wl_display::Transform;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub(crate) enum RotationError {
    #[error("Unsupported rotation method {0:?}")]
    Unsupported(VideoOrientationMethod),
}

/// Rotation requested by the property and by stream tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Rotation {
    sink: VideoOrientationMethod,
    tag: VideoOrientationMethod,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            sink: VideoOrientationMethod::Identity,
            tag: VideoOrientationMethod::Identity,
        }
    }
}

impl Rotation {
    /// Updates one of the two sources.
    ///
    /// # Arguments
    /// * `method` - The new method
    /// * `from_tag` - `true` when the method comes from an `image-orientation` tag
    ///
    /// # Returns
    /// `true` if the effective method changed.
    pub fn set(
        &mut self,
        method: VideoOrientationMethod,
        from_tag: bool,
    ) -> Result<bool, RotationError> {
        if method == VideoOrientationMethod::Custom
            || (from_tag && method == VideoOrientationMethod::Auto)
        {
            return Err(RotationError::Unsupported(method));
        }

        let before = self.current();
        if from_tag {
            self.tag = method;
        } else {
            self.sink = method;
        }
        Ok(before != self.current())
    }

    /// The method in effect.
    pub fn current(&self) -> VideoOrientationMethod {
        if self.sink == VideoOrientationMethod::Auto {
            self.tag
        } else {
            self.sink
        }
    }

    pub fn transform(&self) -> Transform {
        to_transform(self.current())
    }
}

/// Buffer transform for an orientation method.
pub(crate) fn to_transform(method: VideoOrientationMethod) -> Transform {
    match method {
        VideoOrientationMethod::_90r => Transform::Rotate90,
        VideoOrientationMethod::_180 => Transform::Rotate180,
        VideoOrientationMethod::_90l => Transform::Rotate270,
        VideoOrientationMethod::Horiz => Transform::Flipped,
        VideoOrientationMethod::Vert => Transform::Flipped180,
        VideoOrientationMethod::UlLr => Transform::Flipped90,
        VideoOrientationMethod::UrLl => Transform::Flipped270,
        _ => Transform::Normal,
    }
}

/// Reads the orientation from an `image-orientation` tag, if present.
pub(crate) fn from_tag_list(tags: &gst::TagListRef) -> Option<VideoOrientationMethod> {
    let value = tags.get::<gst::tags::ImageOrientation>()?;
    match value.get() {
        "rotate-0" => Some(VideoOrientationMethod::Identity),
        "rotate-90" => Some(VideoOrientationMethod::_90r),
        "rotate-180" => Some(VideoOrientationMethod::_180),
        "rotate-270" => Some(VideoOrientationMethod::_90l),
        "flip-rotate-0" => Some(VideoOrientationMethod::Horiz),
        "flip-rotate-90" => Some(VideoOrientationMethod::UlLr),
        "flip-rotate-180" => Some(VideoOrientationMethod::Vert),
        "flip-rotate-270" => Some(VideoOrientationMethod::UrLl),
        _ => None,
    }
}
