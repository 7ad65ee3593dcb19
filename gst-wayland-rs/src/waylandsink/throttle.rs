// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Presentation throttle.
//!
//! The sink keeps at most one frame callback outstanding per surface. A new
//! frame is only submitted once the compositor signalled that the previous
//! one was presented.

use tracing::trace;
use wl_display::CallbackId;

/// Whether a frame callback is outstanding.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PresentationState {
    #[default]
    Idle,
    Armed(CallbackId),
}

impl PresentationState {
    pub fn is_idle(&self) -> bool {
        matches!(self, PresentationState::Idle)
    }

    /// Records the callback requested for the frame being submitted.
    ///
    /// Must only be called from [`PresentationState::Idle`].
    pub fn arm(&mut self, id: CallbackId) {
        debug_assert!(self.is_idle(), "frame submitted while armed");
        *self = PresentationState::Armed(id);
    }

    /// Applies a completed callback.
    ///
    /// # Returns
    /// `true` if `id` was the tracked callback and the state went back to idle.
    /// Completions of forgotten callbacks are ignored.
    pub fn complete(&mut self, id: CallbackId) -> bool {
        match *self {
            PresentationState::Armed(armed) if armed == id => {
                *self = PresentationState::Idle;
                true
            }
            _ => {
                trace!("Ignoring stale frame callback {}", id);
                false
            }
        }
    }

    /// Forgets the outstanding callback, if any.
    pub fn reset(&mut self) {
        *self = PresentationState::Idle;
    }
}
