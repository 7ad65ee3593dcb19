// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Frame callback queue.
//!
//! Surface frame callbacks are delivered on a dedicated event queue so the
//! streaming thread can block on them without interfering with the display
//! dispatch thread. Every callback carries a [`CallbackId`]; dispatching the
//! queue returns the ids whose `done` event arrived.

use std::{
    io, mem,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use wayland_client::{
    Connection, Dispatch, EventQueue, QueueHandle,
    backend::WaylandError,
    protocol::wl_callback::{self, WlCallback},
};

use crate::{Result, display::poll_readable};

/// Identifies one requested frame callback.
pub type CallbackId = u64;

static NEXT_CALLBACK_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_callback_id() -> CallbackId {
    NEXT_CALLBACK_ID.fetch_add(1, Ordering::Relaxed)
}

/// Completed callbacks collected while dispatching.
#[derive(Debug, Default)]
pub struct FrameEvents {
    done: Vec<CallbackId>,
}

impl Dispatch<WlCallback, CallbackId> for FrameEvents {
    fn event(
        state: &mut Self,
        _proxy: &WlCallback,
        event: wl_callback::Event,
        data: &CallbackId,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { .. } = event {
            state.done.push(*data);
        }
    }
}

/// Handle used to attach new frame callbacks to a [`FrameQueue`].
#[derive(Clone)]
pub struct FrameQueueHandle {
    pub(crate) qh: QueueHandle<FrameEvents>,
}

/// Event queue dedicated to frame callbacks.
pub struct FrameQueue {
    queue: EventQueue<FrameEvents>,
    events: FrameEvents,
}

impl FrameQueue {
    pub(crate) fn new(connection: &Connection) -> Self {
        Self {
            queue: connection.new_event_queue(),
            events: FrameEvents::default(),
        }
    }

    pub fn handle(&self) -> FrameQueueHandle {
        FrameQueueHandle {
            qh: self.queue.handle(),
        }
    }

    /// Dispatches already received events without blocking.
    pub fn dispatch_pending(&mut self) -> Result<Vec<CallbackId>> {
        self.queue.dispatch_pending(&mut self.events)?;
        Ok(mem::take(&mut self.events.done))
    }

    /// Flushes and waits up to `timeout` for events, then dispatches them.
    ///
    /// Returns an empty list when nothing completed in time, so callers can
    /// re-check cancellation between waits.
    pub fn blocking_dispatch(&mut self, timeout: Duration) -> Result<Vec<CallbackId>> {
        let done = self.dispatch_pending()?;
        if !done.is_empty() {
            return Ok(done);
        }

        self.queue.flush()?;
        // `None` means events are already queued, dispatch them below.
        if let Some(guard) = self.queue.prepare_read()
            && poll_readable(guard.connection_fd(), timeout)?
        {
            match guard.read() {
                Ok(_) => {}
                Err(WaylandError::Io(err)) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => return Err(err.into()),
            }
        }
        self.dispatch_pending()
    }
}
