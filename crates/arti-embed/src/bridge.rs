//! The object that a host runtime calls to start Tor.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use tor_bootstrap::{
    BootstrapConfig, BootstrapCoordinator, BootstrapState, Error, FailureKind, NativeClient,
};
use tor_error::ErrorReport as _;
use tor_rtcompat::Runtime;
use tracing::debug;

use crate::surface::{ActiveSurface, ConnectToTorNetwork, RequestShape, RunArti, StartTor, Surface};

/// The code with which every failed call is rejected.
pub const REJECTION_CODE: &str = "TOR_ERROR";

/// A failed call, in the form a host's promise rejection wants it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rejection {
    /// Always [`REJECTION_CODE`].
    code: &'static str,
    /// What went wrong, for humans.
    message: String,
    /// What went wrong, for programs.
    kind: FailureKind,
}

impl Rejection {
    /// Return the rejection code.
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Return the rejection message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Return the classification of the underlying error.
    pub fn kind(&self) -> FailureKind {
        self.kind
    }
}

impl From<&Error> for Rejection {
    fn from(err: &Error) -> Self {
        Rejection {
            code: REJECTION_CODE,
            message: err.report().to_string(),
            kind: err.failure_kind(),
        }
    }
}

impl From<Error> for Rejection {
    fn from(err: Error) -> Self {
        Rejection::from(&err)
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// The bridge between a host runtime and an embedded Tor client.
///
/// A `TorBridge` exposes exactly one way to start Tor, determined by its
/// surface `S`: by default, whichever one this crate was built to expose.
/// Every call, in whatever shape, goes to the same [`BootstrapCoordinator`],
/// so concurrent calls share one bootstrap attempt.
///
/// Cloning a `TorBridge` gives another handle to the same coordinator.
pub struct TorBridge<R: Runtime, C: NativeClient, S: Surface = ActiveSurface> {
    /// The coordinator that does the work.
    coordinator: BootstrapCoordinator<R, C>,
    /// The surface we expose.
    surface: PhantomData<fn() -> S>,
}

impl<R: Runtime, C: NativeClient, S: Surface> Clone for TorBridge<R, C, S> {
    fn clone(&self) -> Self {
        TorBridge {
            coordinator: self.coordinator.clone(),
            surface: PhantomData,
        }
    }
}

impl<R: Runtime, C: NativeClient, S: Surface> TorBridge<R, C, S> {
    /// Create a bridge, and the coordinator behind it, for `client`.
    pub fn new(runtime: R, client: Arc<C>, config: &BootstrapConfig) -> Self {
        Self::from_coordinator(BootstrapCoordinator::new(runtime, client, config))
    }

    /// Create a bridge in front of an existing coordinator.
    pub fn from_coordinator(coordinator: BootstrapCoordinator<R, C>) -> Self {
        TorBridge {
            coordinator,
            surface: PhantomData,
        }
    }

    /// Return the name under which the host sees the start call.
    pub fn method_name(&self) -> &'static str {
        S::METHOD
    }

    /// Return the shape of the start call.
    pub fn shape(&self) -> RequestShape {
        S::SHAPE
    }

    /// Return a snapshot of the bootstrap state.
    pub fn status(&self) -> BootstrapState {
        self.coordinator.state()
    }

    /// Return the coordinator behind this bridge.
    pub fn coordinator(&self) -> &BootstrapCoordinator<R, C> {
        &self.coordinator
    }

    /// Handle a start call with arguments `args`.
    ///
    /// Malformed arguments are rejected here, without involving the
    /// coordinator.
    fn invoke(
        &self,
        args: S::Args<'_>,
    ) -> impl Future<Output = Result<String, Error>> + Send + 'static + use<R, C, S> {
        debug!("Host called {}", S::METHOD);
        let pending = S::request(args).map(|request| self.coordinator.start(request));
        async move {
            let status = pending?.await?;
            Ok(status.text().to_owned())
        }
    }
}

impl<R: Runtime, C: NativeClient> TorBridge<R, C, ConnectToTorNetwork> {
    /// Start Tor, using `target` to check connectivity.
    ///
    /// Resolves with the client's status text.
    pub fn connect_to_tor_network(
        &self,
        target: &str,
    ) -> impl Future<Output = Result<String, Error>> + Send + 'static + use<R, C> {
        self.invoke(target)
    }
}

impl<R: Runtime, C: NativeClient> TorBridge<R, C, StartTor> {
    /// Start Tor.
    ///
    /// Resolves with the client's status text.
    pub fn start_tor(
        &self,
    ) -> impl Future<Output = Result<String, Error>> + Send + 'static + use<R, C> {
        self.invoke(())
    }
}

impl<R: Runtime, C: NativeClient> TorBridge<R, C, RunArti> {
    /// Start Tor, using `target` (if any) to check connectivity.
    ///
    /// Resolves with the client's status text.
    pub fn run_arti(
        &self,
        target: Option<&str>,
    ) -> impl Future<Output = Result<String, Error>> + Send + 'static + use<R, C> {
        self.invoke(target)
    }
}

#[cfg(test)]
mod test {
    // @@ begin test lint list maintained by maint/add_warning @@
    #![allow(clippy::bool_assert_comparison)]
    #![allow(clippy::clone_on_copy)]
    #![allow(clippy::dbg_macro)]
    #![allow(clippy::mixed_attributes_style)]
    #![allow(clippy::print_stderr)]
    #![allow(clippy::print_stdout)]
    #![allow(clippy::single_char_pattern)]
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::unchecked_duration_subtraction)]
    #![allow(clippy::useless_vec)]
    #![allow(clippy::needless_pass_by_value)]
    //! <!-- @@ end test lint list maintained by maint/add_warning @@ -->
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;
    use tor_bootstrap::testing::FakeClient;
    use tor_rtcompat::PreferredRuntime;

    /// Build a bridge with surface `S` over `client`, based in `tmp`.
    fn bridge<S: Surface>(
        rt: PreferredRuntime,
        client: &Arc<FakeClient>,
        tmp: &Path,
    ) -> TorBridge<PreferredRuntime, FakeClient, S> {
        let config = BootstrapConfig::builder()
            .base_dir(tmp)
            .disable_permission_checks(true)
            .build()
            .unwrap();
        TorBridge::new(rt, Arc::clone(client), &config)
    }

    #[test]
    fn connect_with_target() {
        tor_rtcompat::test_with_one_runtime!(|rt| async move {
            let tmp = TempDir::new().unwrap();
            let client = Arc::new(FakeClient::new());
            client.respond_with("Tor client initialized successfully. Test response: HTTP/1.1 200 OK");
            let bridge = bridge::<ConnectToTorNetwork>(rt, &client, tmp.path());
            assert_eq!(bridge.method_name(), "connectToTorNetwork");

            let text = bridge.connect_to_tor_network("ifconfig.me").await.unwrap();
            assert_eq!(
                text,
                "Tor client initialized successfully. Test response: HTTP/1.1 200 OK"
            );
            assert_eq!(client.last_target().as_deref(), Some("ifconfig.me"));
            assert_eq!(client.last_workdir().unwrap(), tmp.path().join("arti"));
            assert!(matches!(bridge.status(), BootstrapState::Ready(_)));
        });
    }

    #[test]
    fn empty_target_never_reaches_client() {
        tor_rtcompat::test_with_one_runtime!(|rt| async move {
            let tmp = TempDir::new().unwrap();
            let client = Arc::new(FakeClient::new());
            let bridge = bridge::<ConnectToTorNetwork>(rt, &client, tmp.path());

            let err = bridge.connect_to_tor_network("").await.unwrap_err();
            assert_eq!(err.failure_kind(), FailureKind::InvalidRequest);
            assert_eq!(client.load_calls(), 0);
            assert_eq!(client.start_calls(), 0);
            assert_eq!(bridge.coordinator().native_start_calls(), 0);
            assert!(matches!(bridge.status(), BootstrapState::Idle));
        });
    }

    #[test]
    fn shapes_agree() {
        tor_rtcompat::test_with_one_runtime!(|rt| async move {
            let tmp = TempDir::new().unwrap();
            let client = Arc::new(FakeClient::new());
            client.respond_with("ready");

            let config = BootstrapConfig::builder()
                .base_dir(tmp.path())
                .disable_permission_checks(true)
                .build()
                .unwrap();
            let coord = BootstrapCoordinator::new(rt, Arc::clone(&client), &config);
            let connect = TorBridge::<_, _, ConnectToTorNetwork>::from_coordinator(coord.clone());
            let start = TorBridge::<_, _, StartTor>::from_coordinator(coord.clone());
            let run = TorBridge::<_, _, RunArti>::from_coordinator(coord);

            let a = connect.connect_to_tor_network("ifconfig.me").await.unwrap();
            let b = start.start_tor().await.unwrap();
            let c = run.run_arti(None).await.unwrap();
            assert_eq!(a, "ready");
            assert_eq!(a, b);
            assert_eq!(b, c);
            assert_eq!(client.start_calls(), 1);
        });
    }

    #[test]
    fn load_failure_rejects_every_shape() {
        tor_rtcompat::test_with_one_runtime!(|rt| async move {
            let tmp = TempDir::new().unwrap();
            let client = Arc::new(FakeClient::new());
            client.fail_load("couldn't find \"libtor.so\"");

            let config = BootstrapConfig::builder()
                .base_dir(tmp.path().join("files"))
                .disable_permission_checks(true)
                .build()
                .unwrap();
            let coord = BootstrapCoordinator::new(rt, Arc::clone(&client), &config);
            let connect = TorBridge::<_, _, ConnectToTorNetwork>::from_coordinator(coord.clone());
            let start = TorBridge::<_, _, StartTor>::from_coordinator(coord);

            let a = connect.connect_to_tor_network("ifconfig.me").await.unwrap_err();
            let b = start.start_tor().await.unwrap_err();
            assert_eq!(a.failure_kind(), FailureKind::LibraryLoad);
            assert_eq!(b.failure_kind(), FailureKind::LibraryLoad);
            assert!(!tmp.path().join("files").exists());
        });
    }

    #[test]
    fn rejection() {
        tor_rtcompat::test_with_one_runtime!(|rt| async move {
            let tmp = TempDir::new().unwrap();
            let client = Arc::new(FakeClient::new());
            client.respond_with("Tor Error: Unable to bootstrap a working directory");
            let bridge = bridge::<RunArti>(rt, &client, tmp.path());

            let err = bridge.run_arti(Some("ifconfig.me")).await.unwrap_err();
            let rejection = Rejection::from(&err);
            assert_eq!(rejection.code(), "TOR_ERROR");
            assert_eq!(rejection.kind(), FailureKind::NativeBootstrap);
            assert!(
                rejection
                    .message()
                    .contains("Unable to bootstrap a working directory")
            );
            assert!(rejection.to_string().starts_with("TOR_ERROR: "));
        });
    }
}
