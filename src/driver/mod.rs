//! Pane driver abstraction.
//!
//! The [`Pane`] trait decouples the scheduler and workers from the terminal
//! backend. Workers never distinguish a local shell from a process reached
//! through a remote forwarding channel; both expose the same surface.

pub mod tmux;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::models::pane::PaneInfo;
use crate::Result;

/// Boxed future returned by driver methods.
pub type DriverFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// One addressable terminal surface bound to a single interactive process.
pub trait Pane: Send + Sync {
    /// Descriptor the pane was created from.
    fn info(&self) -> &PaneInfo;

    /// Unique pane name within the session.
    fn name(&self) -> &str {
        &self.info().name
    }

    /// Snapshot of the currently rendered screen.
    ///
    /// Returns immediately with whatever is on screen; never waits for new
    /// output.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pane`](crate::AppError::Pane) if the backend cannot
    /// be queried.
    fn capture(&self) -> DriverFuture<'_, String>;

    /// Write raw input to the pane's controlling process.
    ///
    /// A `'\n'` in `keys` submits the current line. Does not wait for the
    /// target to consume the input.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pane`](crate::AppError::Pane) if the write fails.
    fn inject<'a>(&'a self, keys: &'a str) -> DriverFuture<'a, ()>;

    /// Whether the pane's process is still running.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pane`](crate::AppError::Pane) only for backend
    /// failures unrelated to the process itself.
    fn is_alive(&self) -> DriverFuture<'_, bool>;

    /// Pane title, used as a free-form metadata channel.
    ///
    /// Defaults to the pane's `app_type`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pane`](crate::AppError::Pane) if the backend cannot
    /// be queried.
    fn title(&self) -> DriverFuture<'_, String> {
        let app_type = self.info().app_type.clone();
        Box::pin(async move { Ok(app_type) })
    }

    /// Terminate the pane's process group.
    ///
    /// Calling this on an already-terminated pane returns `Ok(())`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pane`](crate::AppError::Pane) if termination fails.
    fn terminate(&self) -> DriverFuture<'_, ()>;
}

/// Builds panes from declarative descriptors.
pub trait PaneFactory: Send + Sync {
    /// Create and configure a pane.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pane`](crate::AppError::Pane) for a bad startup
    /// command, an unreachable remote target, or a backend failure.
    fn create<'a>(&'a self, info: &'a PaneInfo) -> DriverFuture<'a, Arc<dyn Pane>>;

    /// Release backend resources shared by every pane (e.g. the multiplexer
    /// session). Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Pane`](crate::AppError::Pane) if the backend refuses.
    fn shutdown(&self) -> DriverFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}
