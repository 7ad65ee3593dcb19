// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Rectangle math used to place the video inside the render rectangle.

/// Axis-aligned rectangle in surface-local coordinates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// A zero width rectangle means "not configured yet".
    pub fn is_configured(&self) -> bool {
        self.width > 0
    }
}

/// Buffer transform applied to the video surface.
///
/// Values follow `wl_output.transform`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    #[default]
    Normal,
    Rotate90,
    Rotate180,
    Rotate270,
    Flipped,
    Flipped90,
    Flipped180,
    Flipped270,
}

impl Transform {
    /// Whether the transform swaps the width and height of the buffer.
    pub fn swaps_axes(self) -> bool {
        matches!(
            self,
            Transform::Rotate90 | Transform::Rotate270 | Transform::Flipped90 | Transform::Flipped270
        )
    }
}

/// Centers `src` inside `dst`.
///
/// With `scale` the source is scaled to the largest size that fits while
/// keeping its aspect ratio (letterboxing), otherwise it is only clipped.
pub fn center_rect(src: Rectangle, dst: Rectangle, scale: bool) -> Rectangle {
    if !scale {
        let width = src.width.min(dst.width);
        let height = src.height.min(dst.height);
        return Rectangle::new(
            dst.x + (dst.width - width) / 2,
            dst.y + (dst.height - height) / 2,
            width,
            height,
        );
    }

    if src.width <= 0 || src.height <= 0 || dst.width <= 0 || dst.height <= 0 {
        return dst;
    }

    let src_ratio = src.width as f64 / src.height as f64;
    let dst_ratio = dst.width as f64 / dst.height as f64;

    if src_ratio > dst_ratio {
        let height = (dst.width as f64 / src_ratio) as i32;
        Rectangle::new(dst.x, dst.y + (dst.height - height) / 2, dst.width, height)
    } else if src_ratio < dst_ratio {
        let width = (dst.height as f64 * src_ratio) as i32;
        Rectangle::new(dst.x + (dst.width - width) / 2, dst.y, width, dst.height)
    } else {
        dst
    }
}

/// Computes where the video subsurface goes inside a render rectangle.
///
/// `video_width`/`video_height` are the display size of the video (pixel
/// aspect ratio already applied); the result is relative to the rectangle
/// origin.
pub fn video_placement(
    video_width: i32,
    video_height: i32,
    transform: Transform,
    render: Rectangle,
) -> Rectangle {
    let (width, height) = if transform.swaps_axes() {
        (video_height, video_width)
    } else {
        (video_width, video_height)
    };

    center_rect(
        Rectangle::new(0, 0, width, height),
        Rectangle::new(0, 0, render.width, render.height),
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wide_video_is_letterboxed() {
        let res = center_rect(
            Rectangle::new(0, 0, 1920, 1080),
            Rectangle::new(0, 0, 640, 480),
            true,
        );
        assert_eq!(res, Rectangle::new(0, 60, 640, 360));
    }

    #[test]
    fn tall_video_is_pillarboxed() {
        let res = center_rect(
            Rectangle::new(0, 0, 480, 640),
            Rectangle::new(10, 10, 640, 480),
            true,
        );
        assert_eq!(res, Rectangle::new(150, 10, 360, 480));
    }

    #[test]
    fn unscaled_video_is_clipped_and_centered() {
        let res = center_rect(
            Rectangle::new(0, 0, 320, 240),
            Rectangle::new(0, 0, 640, 480),
            false,
        );
        assert_eq!(res, Rectangle::new(160, 120, 320, 240));
    }

    #[test]
    fn quarter_turn_swaps_axes() {
        let res = video_placement(1920, 1080, Transform::Rotate90, Rectangle::new(0, 0, 1080, 1920));
        assert_eq!(res, Rectangle::new(0, 0, 1080, 1920));

        let res = video_placement(1920, 1080, Transform::Rotate180, Rectangle::new(0, 0, 1080, 1920));
        assert_eq!(res.width, 1080);
        assert_eq!(res.height, 607);
    }
}
