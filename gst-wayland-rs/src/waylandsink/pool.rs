// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Shared memory buffer pool.
//!
//! Frames whose memory the compositor can't use directly are copied into
//! buffers of this pool. The pool is also offered to upstream during
//! allocation so well-behaved producers write straight into shared memory.

use gst::prelude::*;
use gst_video::prelude::*;
use gst_video::{VideoAlignment, VideoInfo};
use gstreamer as gst;
use gstreamer_allocators as gst_allocators;
use gstreamer_video as gst_video;
use tracing::{debug, trace};

use crate::waylandsink::presenter::RenderError;
use crate::waylandsink::video_format;

/// Minimum number of buffers in the pool.
pub(crate) const MIN_BUFFERS: u32 = 2;
/// Maximum number of buffers in the pool, 0 means unlimited.
pub(crate) const MAX_BUFFERS: u32 = 0;

/// The process-wide shared memory allocator.
pub(crate) fn shm_allocator() -> Option<gst::Allocator> {
    gst_allocators::ShmAllocator::init_once();
    gst_allocators::ShmAllocator::get()
}

/// Stride alignment for the negotiated format, applied to every plane.
pub(crate) fn video_alignment(info: &VideoInfo) -> VideoAlignment {
    let align = video_format::stride_alignment(info.format());
    // The alignment is expressed as a mask.
    let mask = [align - 1; gst_video::VIDEO_MAX_PLANES];
    VideoAlignment::new(0, 0, 0, 0, &mask)
}

/// Creates a pool for `info`, configured but not active.
pub(crate) fn create_pool(
    info: &VideoInfo,
    caps: &gst::Caps,
) -> Result<gst::BufferPool, RenderError> {
    let pool = gst_video::VideoBufferPool::new();
    let mut config = pool.config();
    config.set_params(Some(caps), info.size() as u32, MIN_BUFFERS, MAX_BUFFERS);
    if let Some(allocator) = shm_allocator() {
        config.set_allocator(Some(&allocator), None);
    }
    config.add_option(gst_video::BUFFER_POOL_OPTION_VIDEO_META);
    config.add_option(gst_video::BUFFER_POOL_OPTION_VIDEO_ALIGNMENT);
    config.set_video_alignment(&video_alignment(info));

    pool.set_config(config).map_err(|_| RenderError::PoolConfig)?;
    Ok(pool.upcast())
}

/// The pool frames are copied into when they can't be imported.
///
/// Activated on the first copy; the configuration doesn't change while active.
pub(crate) struct FallbackPool {
    pool: gst::BufferPool,
    caps: gst::Caps,
    size: usize,
    acquisitions: usize,
}

impl FallbackPool {
    pub fn new(info: &VideoInfo, caps: &gst::Caps) -> Result<Self, RenderError> {
        Ok(Self {
            pool: create_pool(info, caps)?,
            caps: caps.clone(),
            size: info.size(),
            acquisitions: 0,
        })
    }

    fn activate(&self) -> Result<(), RenderError> {
        // Upstream may have configured different strides, go back to the
        // defaults of the caps.
        let mut config = self.pool.config();
        config.set_params(Some(&self.caps), self.size as u32, MIN_BUFFERS, MAX_BUFFERS);
        self.pool
            .set_config(config)
            .map_err(|_| RenderError::PoolActivation)?;
        self.pool
            .set_active(true)
            .map_err(|_| RenderError::PoolActivation)?;
        debug!("Activated fallback pool for {}", self.caps);
        Ok(())
    }

    /// Acquires a buffer, activating the pool first if needed.
    pub fn acquire(&mut self) -> Result<gst::Buffer, RenderError> {
        if !self.pool.is_active() {
            self.activate()?;
        }
        let buffer = self
            .pool
            .acquire_buffer(None)
            .map_err(RenderError::NoBuffer)?;
        self.acquisitions += 1;
        trace!("Acquired pool buffer {:?}", buffer);
        Ok(buffer)
    }

    /// Number of buffers handed out since the pool was created.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions
    }
}

impl Drop for FallbackPool {
    fn drop(&mut self) {
        if self.pool.is_active() && self.pool.set_active(false).is_err() {
            tracing::error!("Failed to deactivate fallback pool");
        }
    }
}

/// Answers an allocation query from upstream.
///
/// Offers a fresh pool when upstream asks for one, the shared memory
/// allocator and video meta support.
pub(crate) fn propose_allocation(query: &mut gst::query::Allocation) -> Result<(), RenderError> {
    let (caps, need_pool) = query.get_owned();
    let caps = caps.ok_or(RenderError::NotNegotiated)?;
    let info = VideoInfo::from_caps(&caps).map_err(|_| RenderError::NotNegotiated)?;

    let pool = if need_pool {
        Some(create_pool(&info, &caps)?)
    } else {
        None
    };
    query.add_allocation_pool(pool.as_ref(), info.size() as u32, MIN_BUFFERS, MAX_BUFFERS);

    if let Some(allocator) = shm_allocator() {
        query.add_allocation_param(Some(&allocator), gst::AllocationParams::default());
    }
    query.add_allocation_meta::<gst_video::VideoMeta>(None);
    Ok(())
}
