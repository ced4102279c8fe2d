//! Native Tor clients that a [`TorBridge`](crate::TorBridge) can drive.
//!
//! Each backend is behind a cargo feature.  Hosts with a client of their own
//! can implement [`NativeClient`](tor_bootstrap::NativeClient) directly
//! instead.

#[cfg(feature = "arti")]
pub mod arti;
#[cfg(feature = "dylib")]
pub mod dylib;
