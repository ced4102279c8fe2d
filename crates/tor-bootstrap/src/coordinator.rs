//! The bootstrap state machine.
//!
//! There is one [`BootstrapCoordinator`] per process (per native client,
//! really: the native client supports only one active bootstrap).  It
//! accepts any number of concurrent `start()` calls and makes sure that at
//! most one bootstrap attempt runs at a time:
//!
//!  * If no attempt has been made, the first caller launches one, and
//!    everybody who arrives while it is running waits for the same result.
//!  * Once an attempt has succeeded, every later caller gets the cached
//!    status immediately.
//!  * Once an attempt has failed, later callers get the cached error, unless
//!    the [`FailurePolicy`] says to try again.
//!
//! The native start call blocks, so it runs on a thread from
//! [`spawn_blocking`](tor_rtcompat::Blocking::spawn_blocking); nothing here
//! ever blocks the caller for longer than it takes to look at the state.
//!
//! Every attempt that is launched is also finished, one way or another: a
//! panic anywhere in the attempt, or a driver that the runtime drops before
//! it gets to run, still leaves the coordinator `Failed` with every waiter
//! answered.

use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use futures::task::SpawnExt as _;
use tor_async_utils::oneshot;
use tor_error::{internal, warn_report};
use tor_rtcompat::Runtime;
use tracing::{debug, info};

use crate::config::{BootstrapConfig, FailurePolicy};
use crate::err::{Error, ErrorDetail, FailureKind, panic_message};
use crate::loader::{LoadState, NativeClientLoader};
use crate::native::NativeClient;
use crate::translate::translate;
use crate::workdir::WorkingDirectoryProvisioner;

/// The result of a bootstrap attempt, as seen by every caller that waited
/// on it.
pub type BootstrapOutcome = Result<BootstrapStatus, Error>;

/// A unique identifier for a bootstrap attempt.
///
/// Identifiers increase over the lifetime of the process.
#[derive(Copy, Clone, Debug, derive_more::Display, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[display("{id}")]
pub struct AttemptId {
    /// Which attempt is this?
    id: NonZeroUsize,
}

impl AttemptId {
    /// Return a new identifier, greater than any previous one.
    ///
    /// # Panics
    ///
    /// Panics if we have exhausted the possible space of identifiers.
    pub fn next() -> Self {
        /// The next identifier to hand out.
        static NEXT: AtomicUsize = AtomicUsize::new(1);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        let id = id.try_into().expect("Allocated too many AttemptIds");
        Self { id }
    }
}

/// A request to bootstrap the client.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapRequest {
    /// A host for the client to check its connectivity against, if any.
    target: Option<String>,
    /// When the request was made.
    requested_at: SystemTime,
}

impl BootstrapRequest {
    /// A request with no target.
    pub fn new() -> Self {
        BootstrapRequest {
            target: None,
            requested_at: SystemTime::now(),
        }
    }

    /// A request with a target host.
    ///
    /// Returns an error if `target` is empty or blank.
    pub fn with_target(target: impl Into<String>) -> crate::Result<Self> {
        let target = target.into();
        let trimmed = target.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_request("target must not be empty"));
        }
        if trimmed.len() != target.len() {
            return Err(Error::invalid_request("target must not have surrounding whitespace"));
        }
        Ok(BootstrapRequest {
            target: Some(target),
            requested_at: SystemTime::now(),
        })
    }

    /// Return the target host, if any.
    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Return the time at which this request was made.
    pub fn requested_at(&self) -> SystemTime {
        self.requested_at
    }
}

impl Default for BootstrapRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// The status of a client that has bootstrapped successfully.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BootstrapStatus {
    /// The attempt that bootstrapped the client.
    attempt: AttemptId,
    /// Whatever the native client told us about itself.  May be empty.
    text: String,
}

impl BootstrapStatus {
    /// Construct a new status for `attempt`.
    pub(crate) fn new(attempt: AttemptId, text: String) -> Self {
        BootstrapStatus { attempt, text }
    }

    /// Return the attempt that produced this status.
    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Return the status text reported by the native client.
    pub fn text(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for BootstrapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// A snapshot of where a [`BootstrapCoordinator`] is in its lifecycle.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum BootstrapState {
    /// No attempt has been made yet (or, under [`FailurePolicy::Retry`],
    /// none is in progress).
    Idle,
    /// An attempt is running.
    InFlight {
        /// Which attempt.
        attempt: AttemptId,
        /// When it was launched.
        started_at: SystemTime,
        /// How many callers are waiting for it.
        waiters: usize,
    },
    /// The client bootstrapped.
    Ready(BootstrapStatus),
    /// The last attempt failed.
    Failed(Error),
}

/// The coordinator's internal state.
///
/// This is [`BootstrapState`], plus the list of parties waiting on an
/// in-flight attempt.
enum Phase {
    /// See [`BootstrapState::Idle`].
    Idle,
    /// See [`BootstrapState::InFlight`].
    InFlight {
        /// Which attempt.
        attempt: AttemptId,
        /// When it was launched.
        started_at: SystemTime,
        /// Everybody who is waiting for the outcome, including the caller
        /// that launched the attempt.
        waiters: Vec<oneshot::Sender<BootstrapOutcome>>,
    },
    /// See [`BootstrapState::Ready`].
    Ready(BootstrapStatus),
    /// See [`BootstrapState::Failed`].
    Failed(Error),
}

/// What a `start()` call has to wait for.
enum Waiter {
    /// Nothing: the outcome is already known.
    Done(BootstrapOutcome),
    /// The outcome of an in-flight attempt.
    Pending(oneshot::Receiver<BootstrapOutcome>),
}

/// Guarantees that at most one bootstrap attempt is in flight, and that
/// everybody who asked sees its outcome.
///
/// Cloning a `BootstrapCoordinator` gives another handle to the same
/// coordinator.  Construct one per process and share it.
pub struct BootstrapCoordinator<R: Runtime, C: NativeClient> {
    /// The shared state.
    inner: Arc<Inner<R, C>>,
}

/// The shared part of a [`BootstrapCoordinator`].
struct Inner<R: Runtime, C: NativeClient> {
    /// The runtime on which we spawn the driver task and blocking work.
    runtime: R,
    /// Loader for the native client.
    loader: NativeClientLoader<C>,
    /// Creates the working directory.
    provisioner: WorkingDirectoryProvisioner,
    /// Where to create the working directory.
    base_dir: PathBuf,
    /// What to do after a failed attempt.
    policy: FailurePolicy,
    /// Where we are in the lifecycle.
    phase: Mutex<Phase>,
    /// How many times we have called the native start function.
    native_start_calls: AtomicUsize,
}

impl<R: Runtime, C: NativeClient> Clone for BootstrapCoordinator<R, C> {
    fn clone(&self) -> Self {
        BootstrapCoordinator {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Runtime, C: NativeClient> BootstrapCoordinator<R, C> {
    /// Create a new coordinator for `client`.
    ///
    /// Nothing is loaded or created until the first call to
    /// [`start`](BootstrapCoordinator::start).
    pub fn new(runtime: R, client: Arc<C>, config: &BootstrapConfig) -> Self {
        let provisioner =
            WorkingDirectoryProvisioner::new(config.working_subdir.clone(), config.mistrust());
        BootstrapCoordinator {
            inner: Arc::new(Inner {
                runtime,
                loader: NativeClientLoader::new(client),
                provisioner,
                base_dir: config.base_dir.clone(),
                policy: config.failure_policy,
                phase: Mutex::new(Phase::Idle),
                native_start_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Ask for the client to be bootstrapped, and return a future for the
    /// outcome.
    ///
    /// The request is registered before this function returns, so the
    /// returned future may be dropped without affecting anybody else: an
    /// attempt, once launched, always runs to completion.
    ///
    /// If an attempt is already in flight, `request` joins it, and its
    /// target is ignored in favor of the one the attempt was launched with.
    pub fn start(
        &self,
        request: BootstrapRequest,
    ) -> impl Future<Output = BootstrapOutcome> + Send + 'static + use<R, C> {
        let waiter = self.register(request);
        async move {
            match waiter {
                Waiter::Done(outcome) => outcome,
                Waiter::Pending(rx) => match rx.await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(internal!("bootstrap driver went away without answering").into()),
                },
            }
        }
    }

    /// Return a snapshot of the coordinator's state.
    pub fn state(&self) -> BootstrapState {
        match &*self.inner.phase.lock().expect("Poisoned lock") {
            Phase::Idle => BootstrapState::Idle,
            Phase::InFlight {
                attempt,
                started_at,
                waiters,
            } => BootstrapState::InFlight {
                attempt: *attempt,
                started_at: *started_at,
                waiters: waiters.len(),
            },
            Phase::Ready(status) => BootstrapState::Ready(status.clone()),
            Phase::Failed(e) => BootstrapState::Failed(e.clone()),
        }
    }

    /// Return the state of the native library.
    pub fn load_state(&self) -> LoadState {
        self.inner.loader.state()
    }

    /// Return how many times the native start function has been called.
    pub fn native_start_calls(&self) -> usize {
        self.inner.native_start_calls.load(Ordering::SeqCst)
    }

    /// Look at the state, and either answer `request` from it, join an
    /// in-flight attempt, or launch a new one.
    fn register(&self, request: BootstrapRequest) -> Waiter {
        let mut phase = self.inner.phase.lock().expect("Poisoned lock");
        match &mut *phase {
            Phase::Ready(status) => return Waiter::Done(Ok(status.clone())),
            Phase::Failed(e) if !self.inner.may_retry(e) => return Waiter::Done(Err(e.clone())),
            Phase::InFlight { attempt, waiters, .. } => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                debug!(
                    "Joining bootstrap attempt {} ({} waiting)",
                    attempt,
                    waiters.len()
                );
                return Waiter::Pending(rx);
            }
            Phase::Idle | Phase::Failed(_) => {}
        }

        let attempt = AttemptId::next();
        let (tx, rx) = oneshot::channel();
        *phase = Phase::InFlight {
            attempt,
            started_at: SystemTime::now(),
            waiters: vec![tx],
        };
        drop(phase);

        info!("Launching bootstrap attempt {}", attempt);
        self.launch(attempt, request);
        Waiter::Pending(rx)
    }

    /// Spawn the task that drives attempt `attempt` to completion.
    fn launch(&self, attempt: AttemptId, request: BootstrapRequest) {
        let guard = AttemptGuard::new(Arc::clone(&self.inner), attempt);
        // spawn_blocking may only be called from inside the runtime, so we
        // spawn a task whose only job is to call it.  The thread reports
        // its own outcome; we don't wait on its handle.
        let driver = async move {
            let runtime = guard.inner.runtime.clone();
            let _detached = runtime.spawn_blocking(move || {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    guard.inner.run_attempt(attempt, &request)
                }))
                .unwrap_or_else(|panic| {
                    Err(ErrorDetail::NativePanic(panic_message(&*panic)).into())
                });
                guard.finish(outcome);
            });
        };

        // If this fails, the driver has been dropped, and its guard has
        // already failed the attempt.
        if let Err(e) = self.inner.runtime.spawn(driver) {
            warn_report!(e, "Unable to spawn driver for bootstrap attempt {}", attempt);
        }
    }
}

/// Finishes an attempt when dropped, if nothing else has.
///
/// Whoever holds this is responsible for attempt `attempt`.  If it goes away
/// without calling [`finish`](AttemptGuard::finish) (because the runtime
/// dropped the driver task, or the blocking thread never ran), the attempt
/// fails with [`ErrorDetail::DriverLost`].
struct AttemptGuard<R: Runtime, C: NativeClient> {
    /// The coordinator that launched the attempt.
    inner: Arc<Inner<R, C>>,
    /// The attempt we are responsible for.
    attempt: AttemptId,
    /// True once the attempt has been finished.
    finished: bool,
}

impl<R: Runtime, C: NativeClient> AttemptGuard<R, C> {
    /// Take responsibility for `attempt`.
    fn new(inner: Arc<Inner<R, C>>, attempt: AttemptId) -> Self {
        AttemptGuard {
            inner,
            attempt,
            finished: false,
        }
    }

    /// Finish the attempt with `outcome`.
    fn finish(mut self, outcome: BootstrapOutcome) {
        self.finished = true;
        self.inner.finish(self.attempt, outcome);
    }
}

impl<R: Runtime, C: NativeClient> Drop for AttemptGuard<R, C> {
    fn drop(&mut self) {
        if !self.finished {
            self.inner
                .finish(self.attempt, Err(ErrorDetail::DriverLost.into()));
        }
    }
}

impl<R: Runtime, C: NativeClient> Inner<R, C> {
    /// Return true if, under our policy, a start() after `e` should launch a
    /// new attempt.
    fn may_retry(&self, e: &Error) -> bool {
        self.policy == FailurePolicy::Retry && e.failure_kind() != FailureKind::LibraryLoad
    }

    /// Do the blocking work of a bootstrap attempt.
    ///
    /// Runs on a thread from `spawn_blocking`, inside `catch_unwind`.
    fn run_attempt(&self, attempt: AttemptId, request: &BootstrapRequest) -> BootstrapOutcome {
        match self.loader.ensure_loaded() {
            LoadState::Loaded => {}
            LoadState::LoadFailed(f) => return Err(ErrorDetail::LibraryLoad(f).into()),
            LoadState::NotLoaded => {
                return Err(internal!("library still not loaded after ensure_loaded").into());
            }
        }

        let workdir = self.provisioner.ensure(&self.base_dir)?;

        self.native_start_calls.fetch_add(1, Ordering::SeqCst);
        let client = self.loader.client();
        let raw = client.start(request.target(), &workdir);

        translate(attempt, raw)
    }

    /// Record the outcome of `attempt`, and hand it to everybody waiting.
    fn finish(&self, attempt: AttemptId, outcome: BootstrapOutcome) {
        let mut phase = self.phase.lock().expect("Poisoned lock");
        let waiters = match &mut *phase {
            Phase::InFlight {
                attempt: current,
                waiters,
                ..
            } if *current == attempt => std::mem::take(waiters),
            _ => {
                let bug = internal!("attempt {} finished, but was not in flight", attempt);
                warn_report!(bug, "Discarding bootstrap outcome");
                return;
            }
        };
        *phase = match &outcome {
            Ok(status) => Phase::Ready(status.clone()),
            Err(e) => Phase::Failed(e.clone()),
        };
        drop(phase);

        match &outcome {
            Ok(_) => info!("Bootstrap attempt {} succeeded.", attempt),
            Err(e) => warn_report!(e, "Bootstrap attempt {} failed", attempt),
        }
        for tx in waiters {
            // A waiter that has gone away doesn't need the answer.
            let _ = tx.send(outcome.clone());
        }
    }
}
