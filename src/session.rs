//! Remote-management session abstraction.
//!
//! The wire protocol lives outside this crate. These traits describe the
//! slice of it the connector and bootstrapper rely on: opening an addressed
//! session, probing it, running commands, and moving files.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::node::{Credentials, TransportScheme};

/// Future returned by session, process, and metadata operations.
pub type TransportFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Readable byte stream produced by the remote side.
pub type RemoteReader = Box<dyn AsyncRead + Send + Unpin>;

/// Writable byte stream consumed by the remote side.
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Errors raised by transport collaborators.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TransportError {
    /// Raised for local or remote I/O failures.
    #[error("i/o error: {0}")]
    Io(String),
    /// Raised when the remote endpoint cannot be reached.
    #[error("endpoint {endpoint} unreachable: {message}")]
    Unreachable {
        /// Address that was dialled.
        endpoint: String,
        /// Transport specific description.
        message: String,
    },
    /// Raised when the remote side answers with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Raised when an operation is attempted on a closed session.
    #[error("session already closed")]
    Closed,
}

impl From<std::io::Error> for TransportError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

/// Opens addressed, authenticated sessions.
pub trait SessionFactory: Send + Sync {
    /// Session type produced by this factory.
    type Session: Session + 'static;

    /// Creates a session candidate addressed at `ip`.
    ///
    /// Opening does not imply reachability; callers probe before use.
    fn open<'a>(
        &'a self,
        ip: &'a str,
        credentials: &'a Credentials,
        scheme: TransportScheme,
    ) -> TransportFuture<'a, Self::Session>;
}

/// An authenticated remote-management connection to one instance.
pub trait Session: Send + Sync {
    /// Performs a cheap reachability check.
    fn probe(&self) -> TransportFuture<'_, bool>;

    /// Starts `command` remotely. `timeout` bounds the remote execution when
    /// provided.
    fn exec<'a>(
        &'a self,
        command: &'a str,
        timeout: Option<Duration>,
    ) -> TransportFuture<'a, Box<dyn RemoteProcess>>;

    /// Opens a sink that writes a remote file at `path`. The file is
    /// complete once the sink has been shut down.
    fn put_file<'a>(&'a self, path: &'a str) -> TransportFuture<'a, RemoteWriter>;

    /// Reports whether `path` exists remotely.
    fn exists<'a>(&'a self, path: &'a str) -> TransportFuture<'a, bool>;

    /// Closes the session.
    fn close(&self) -> TransportFuture<'_, ()>;
}

/// A process running on the remote host.
///
/// Methods take `&self` so the process can be shared between the channel's
/// close hook and an exit watcher.
pub trait RemoteProcess: Send + Sync {
    /// Takes the process stdout. Returns `None` once taken.
    fn take_stdout(&self) -> Option<RemoteReader>;

    /// Takes the process stdin. Returns `None` once taken.
    fn take_stdin(&self) -> Option<RemoteWriter>;

    /// Waits for the process to exit and returns its exit code.
    fn wait_for_exit(&self) -> TransportFuture<'_, i32>;

    /// Forcibly terminates the process.
    fn terminate(&self) -> TransportFuture<'_, ()>;
}
