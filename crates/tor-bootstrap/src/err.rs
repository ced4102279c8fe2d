//! Declare the errors that a bootstrap attempt can end with.

use std::any::Any;
use std::fmt::{self, Display};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tor_error::{ErrorKind, HasKind};

use crate::loader::LoadFailure;
use crate::native::NativeFailure;

/// An error from a bootstrap attempt, or from a malformed bootstrap request.
///
/// Every caller that was waiting on the same attempt receives a clone of the
/// same `Error`; cloning is cheap.
///
/// Use [`failure_kind`](Error::failure_kind) to tell the classes of failure
/// apart, or the [`kind`](tor_error::HasKind::kind) trait method to get the
/// Arti-wide [`ErrorKind`].
#[derive(Error, Clone, Debug)]
pub struct Error {
    /// The actual error.
    #[source]
    detail: Arc<ErrorDetail>,
}

/// The broad classification of an [`Error`].
///
/// This is what the embedding runtime gets to branch on; the rest of the
/// error is for humans.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, derive_more::Display)]
#[non_exhaustive]
pub enum FailureKind {
    /// The native client library could not be loaded.
    ///
    /// Fatal to this process: the load is never retried.
    #[display("library load error")]
    LibraryLoad,
    /// The working directory could not be prepared.
    #[display("provisioning error")]
    Provisioning,
    /// The native client reported a failure while starting.
    #[display("native bootstrap error")]
    NativeBootstrap,
    /// The request was malformed, and was rejected before any work was done.
    #[display("invalid request")]
    InvalidRequest,
    /// Something went wrong inside the bridge itself.
    #[display("internal error")]
    Internal,
}

/// Represents the errors that can occur while bootstrapping.
///
/// This is the inner view of an [`Error`]; it is not exposed.
#[derive(Error, Clone, Debug)]
#[non_exhaustive]
pub(crate) enum ErrorDetail {
    /// The native client library failed to load.
    #[error("Unable to load the native Tor client library")]
    LibraryLoad(#[source] LoadFailure),

    /// We were given a base directory that is not an absolute path.
    #[error("Base directory {} is not an absolute path", path.display())]
    RelativeBaseDir {
        /// The offending path.
        path: PathBuf,
    },

    /// We encountered a problem while inspecting or creating a directory.
    #[error("Unable to prepare working directory {}", path.display())]
    Provisioning {
        /// The directory we were trying to create.
        path: PathBuf,
        /// What went wrong.
        #[source]
        cause: fs_mistrust::Error,
    },

    /// The native client raised an error while starting.
    #[error("Native Tor client failed to bootstrap{}", unexplained(.0))]
    NativeBootstrap(#[source] NativeFailure),

    /// A request was malformed.
    #[error("Invalid bootstrap request: {0}")]
    InvalidRequest(&'static str),

    /// Something panicked during a bootstrap attempt.
    #[error("Bootstrap attempt panicked: {0}")]
    NativePanic(String),

    /// The task driving an attempt was dropped before it could finish.
    ///
    /// Usually this means the runtime is shutting down, or refused to spawn
    /// the task in the first place.
    #[error("Bootstrap attempt was abandoned by the runtime")]
    DriverLost,

    /// A programming problem, either in our code or the code calling it.
    #[error("Programming problem")]
    Bug(#[from] tor_error::Bug),
}

impl Error {
    /// Return the broad classification of this error.
    pub fn failure_kind(&self) -> FailureKind {
        use ErrorDetail as E;
        match &*self.detail {
            E::LibraryLoad(_) => FailureKind::LibraryLoad,
            E::RelativeBaseDir { .. } | E::Provisioning { .. } => FailureKind::Provisioning,
            E::NativeBootstrap(_) => FailureKind::NativeBootstrap,
            E::InvalidRequest(_) => FailureKind::InvalidRequest,
            E::NativePanic(_) | E::DriverLost | E::Bug(_) => FailureKind::Internal,
        }
    }

    /// Return a human-readable description of what went wrong.
    pub fn message(&self) -> String {
        self.detail.to_string()
    }

    /// Return the message of the underlying error, if there was one.
    ///
    /// For a [`FailureKind::NativeBootstrap`] error, this is the message the
    /// native client reported, verbatim.
    pub fn cause(&self) -> Option<String> {
        use ErrorDetail as E;
        match &*self.detail {
            E::LibraryLoad(f) => Some(f.message().to_owned()),
            E::NativeBootstrap(f) => Some(f.message().to_owned()),
            E::Provisioning { cause, .. } => Some(cause.to_string()),
            E::NativePanic(_)
            | E::DriverLost
            | E::RelativeBaseDir { .. }
            | E::InvalidRequest(_)
            | E::Bug(_) => None,
        }
    }

    /// Construct an error for a request that we refuse to act on.
    pub(crate) fn invalid_request(reason: &'static str) -> Self {
        ErrorDetail::InvalidRequest(reason).into()
    }
}

/// Return a suffix explaining a native failure that came with no message.
fn unexplained(f: &NativeFailure) -> &'static str {
    if f.message().is_empty() {
        ": native client reported a failure without explanation"
    } else {
        ""
    }
}

/// Extract a printable message from a panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

impl From<ErrorDetail> for Error {
    fn from(detail: ErrorDetail) -> Error {
        Error {
            detail: Arc::new(detail),
        }
    }
}

impl From<tor_error::Bug> for Error {
    fn from(bug: tor_error::Bug) -> Error {
        ErrorDetail::from(bug).into()
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tor bootstrap: {}: {}", self.failure_kind(), &self.detail)
    }
}

impl HasKind for Error {
    fn kind(&self) -> ErrorKind {
        self.detail.kind()
    }
}

impl HasKind for ErrorDetail {
    fn kind(&self) -> ErrorKind {
        use ErrorDetail as E;
        use ErrorKind as EK;
        match self {
            E::LibraryLoad(_) => EK::Other,
            E::RelativeBaseDir { .. } => EK::BadApiUsage,
            E::Provisioning { cause, .. } => match cause {
                fs_mistrust::Error::CreatingDir(_) => EK::PersistentStateAccessFailed,
                _ => EK::FsPermissions,
            },
            E::NativeBootstrap(_) => EK::TorAccessFailed,
            E::InvalidRequest(_) => EK::BadApiUsage,
            E::NativePanic(_) | E::DriverLost => EK::Internal,
            E::Bug(e) => e.kind(),
        }
    }
}
