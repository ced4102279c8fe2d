//! The shapes of call that a host may use to start Tor.
//!
//! Different hosts have called the same operation in different ways: with a
//! target to check connectivity against, with no arguments at all, or under a
//! different name.  Each of these is a [`Surface`].  Exactly one of them is
//! the [`ActiveSurface`], chosen when this crate is built.
//!
//! Everything below the bridge is shape-agnostic: a surface's only job is to
//! turn its arguments into a [`BootstrapRequest`].

use tor_bootstrap::BootstrapRequest;

/// The kinds of call that a host may make to start Tor.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
#[non_exhaustive]
pub enum RequestShape {
    /// A connect call that requires a target host.
    TargetConnect,
    /// A start call with no arguments.
    NoArgStart,
    /// A start call under another name, with an optional target.
    RenamedStart,
}

/// One way for a host to call into the bridge.
///
/// This trait is sealed: the set of surfaces is fixed.
pub trait Surface: sealed::Sealed + Send + Sync + 'static {
    /// The kind of call this is.
    const SHAPE: RequestShape;

    /// The name under which the host sees this call.
    const METHOD: &'static str;

    /// The arguments that the host passes.
    type Args<'a>;

    /// Turn the host's arguments into a request.
    ///
    /// Fails if the arguments are malformed.
    fn request(args: Self::Args<'_>) -> tor_bootstrap::Result<BootstrapRequest>;
}

/// `connectToTorNetwork(target)`: start Tor, then check a target host.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct ConnectToTorNetwork;

/// `startTor()`: start Tor.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct StartTor;

/// `runArti(target?)`: start Tor, and check a target host if one is given.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct RunArti;

impl Surface for ConnectToTorNetwork {
    const SHAPE: RequestShape = RequestShape::TargetConnect;
    const METHOD: &'static str = "connectToTorNetwork";
    type Args<'a> = &'a str;

    fn request(target: &str) -> tor_bootstrap::Result<BootstrapRequest> {
        BootstrapRequest::with_target(target)
    }
}

impl Surface for StartTor {
    const SHAPE: RequestShape = RequestShape::NoArgStart;
    const METHOD: &'static str = "startTor";
    type Args<'a> = ();

    fn request((): ()) -> tor_bootstrap::Result<BootstrapRequest> {
        Ok(BootstrapRequest::new())
    }
}

impl Surface for RunArti {
    const SHAPE: RequestShape = RequestShape::RenamedStart;
    const METHOD: &'static str = "runArti";
    type Args<'a> = Option<&'a str>;

    fn request(target: Option<&str>) -> tor_bootstrap::Result<BootstrapRequest> {
        match target {
            Some(t) => BootstrapRequest::with_target(t),
            None => Ok(BootstrapRequest::new()),
        }
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "surface-run-arti")] {
        /// The surface that this build of the bridge exposes.
        pub type ActiveSurface = RunArti;
    } else if #[cfg(feature = "surface-start-tor")] {
        /// The surface that this build of the bridge exposes.
        pub type ActiveSurface = StartTor;
    } else {
        /// The surface that this build of the bridge exposes.
        pub type ActiveSurface = ConnectToTorNetwork;
    }
}

/// Module to seal [`Surface`].
mod sealed {
    /// Sealing trait.
    #[allow(unreachable_pub)]
    pub trait Sealed {}
    impl Sealed for super::ConnectToTorNetwork {}
    impl Sealed for super::StartTor {}
    impl Sealed for super::RunArti {}
}
