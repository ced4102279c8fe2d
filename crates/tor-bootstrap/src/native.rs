//! The seam between this crate and the native Tor client it drives.

use thiserror::Error;

use crate::loader::LoadFailure;
use crate::workdir::WorkingDirectory;

/// A Tor client implementation that we can load and start.
///
/// The client is opaque to us: everything from relay selection to the SOCKS
/// listener happens on the other side of this trait.  We only care that it
/// can be loaded once, and then asked to start.
pub trait NativeClient: Send + Sync + 'static {
    /// Load (or link, or otherwise make available) the client library.
    ///
    /// [`NativeClientLoader`](crate::NativeClientLoader) calls this at most
    /// once per process.
    fn load(&self) -> Result<(), LoadFailure>;

    /// Start the client, blocking until it is ready or has failed.
    ///
    /// `target`, if present, is a host that the client may use to check its
    /// connectivity once it has bootstrapped.  `workdir` has already been
    /// created by the time this is called.
    ///
    /// This is only ever called from a thread made with
    /// [`Blocking::spawn_blocking`](tor_rtcompat::Blocking::spawn_blocking).
    fn start(&self, target: Option<&str>, workdir: &WorkingDirectory) -> NativeOutcome;
}

/// Whatever the native start call handed back to us, before interpretation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum NativeOutcome {
    /// The call returned a status string (possibly empty).
    Returned(String),
    /// The call raised an error.
    Raised(NativeFailure),
}

/// A failure reported by the native client.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message}")]
pub struct NativeFailure {
    /// The message the client reported.
    message: String,
    /// A numeric error code, if the client gave us one.
    code: Option<i32>,
}

impl NativeFailure {
    /// Construct a failure with a message and no code.
    pub fn new(message: impl Into<String>) -> Self {
        NativeFailure {
            message: message.into(),
            code: None,
        }
    }

    /// Construct a failure with a message and a numeric code.
    pub fn with_code(message: impl Into<String>, code: i32) -> Self {
        NativeFailure {
            message: message.into(),
            code: Some(code),
        }
    }

    /// Return the message the client reported.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Return the numeric error code the client reported, if any.
    pub fn code(&self) -> Option<i32> {
        self.code
    }
}
