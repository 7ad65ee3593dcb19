// SPDX-FileCopyrightText: 2025 Contributors to the rswaylandsink project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for display operations.
//!
//! This module maps the failures of the Wayland client stack (connection,
//! registry binding, dispatching, foreign handle import) to a single
//! idiomatic Rust error enum.

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur when talking to the display server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The connection to the display server could not be established.
    #[error("Failed to connect to the display: {0}")]
    Connect(#[from] wayland_client::ConnectError),

    /// The initial registry round trip failed.
    #[error("Failed to initialize the registry: {0}")]
    Registry(#[from] wayland_client::globals::GlobalError),

    /// A required global is not advertised by the compositor.
    #[error("Global '{0}' is not available")]
    MissingGlobal(&'static str),

    /// A global was advertised but binding it failed.
    #[error("Failed to bind global: {0}")]
    Bind(#[from] wayland_client::globals::BindError),

    /// Reading or dispatching events failed (the connection is most likely dead).
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] wayland_client::DispatchError),

    /// Low-level backend error while flushing or reading.
    #[error("Backend error: {0}")]
    Backend(#[from] wayland_client::backend::WaylandError),

    /// A raw pointer handed over by the application is not a valid proxy.
    #[error("Invalid foreign handle")]
    InvalidHandle,

    /// The display buffer could not be created from the supplied memory.
    #[error("Buffer creation failed: {0}")]
    Buffer(String),

    /// Operating system error (memfd, poll).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<wayland_client::backend::InvalidId> for Error {
    fn from(_: wayland_client::backend::InvalidId) -> Self {
        Error::InvalidHandle
    }
}
