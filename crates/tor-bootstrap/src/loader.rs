//! Load the native client library exactly once per process.
//!
//! Loading a native library is not something that gets better if you try
//! again: if the first attempt fails, we remember that failure and report it
//! to everybody who asks, until the process exits.  A load that panics
//! counts as a failure.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tor_error::warn_report;
use tracing::info;

use crate::err::panic_message;
use crate::native::NativeClient;

/// A reason why the native client library could not be loaded.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message}")]
pub struct LoadFailure {
    /// What the loader told us.
    message: String,
}

impl LoadFailure {
    /// Construct a new `LoadFailure` from a loader message.
    pub fn new(message: impl Into<String>) -> Self {
        LoadFailure {
            message: message.into(),
        }
    }

    /// Return the loader's message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Whether the native client library is available.
///
/// Once this leaves `NotLoaded` it never changes again.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum LoadState {
    /// Nobody has tried to load the library yet.
    NotLoaded,
    /// The library was loaded successfully.
    Loaded,
    /// The library failed to load; it will not be retried.
    LoadFailed(LoadFailure),
}

impl LoadState {
    /// Return true if the library is loaded and usable.
    pub fn is_available(&self) -> bool {
        matches!(self, LoadState::Loaded)
    }
}

/// Process-wide, one-time loader for a [`NativeClient`].
///
/// The first call to [`ensure_loaded`](NativeClientLoader::ensure_loaded)
/// performs the load; concurrent callers wait for it, and every later caller
/// sees the same [`LoadState`].
pub struct NativeClientLoader<C> {
    /// The client whose library we are loading.
    client: Arc<C>,
    /// The result of the load, once there is one.
    state: OnceCell<LoadState>,
}

impl<C: NativeClient> NativeClientLoader<C> {
    /// Create a new loader for `client`.  Does not load anything yet.
    pub fn new(client: Arc<C>) -> Self {
        NativeClientLoader {
            client,
            state: OnceCell::new(),
        }
    }

    /// Load the library if nobody has tried yet, and return the final state.
    ///
    /// Never returns [`LoadState::NotLoaded`].  May block while the library
    /// is being loaded, either by this thread or another.
    pub fn ensure_loaded(&self) -> LoadState {
        self.state
            .get_or_init(|| match self.load_contained() {
                Ok(()) => {
                    info!("Native Tor client library loaded.");
                    LoadState::Loaded
                }
                Err(e) => {
                    warn_report!(e, "Unable to load native Tor client library");
                    LoadState::LoadFailed(e)
                }
            })
            .clone()
    }

    /// Call the client's `load`, turning a panic into a [`LoadFailure`].
    fn load_contained(&self) -> Result<(), LoadFailure> {
        catch_unwind(AssertUnwindSafe(|| self.client.load())).unwrap_or_else(|panic| {
            Err(LoadFailure::new(format!(
                "Library load panicked: {}",
                panic_message(&*panic)
            )))
        })
    }

    /// Return the current state, without trying to load anything.
    pub fn state(&self) -> LoadState {
        self.state.get().cloned().unwrap_or(LoadState::NotLoaded)
    }

    /// Return the client that this loader loads.
    pub fn client(&self) -> &Arc<C> {
        &self.client
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
    use crate::testing::FakeClient;
    use tracing_test::traced_test;

    #[test]
    fn loads_once() {
        let client = Arc::new(FakeClient::new());
        let loader = NativeClientLoader::new(Arc::clone(&client));
        assert_eq!(loader.state(), LoadState::NotLoaded);

        for _ in 0..100 {
            assert_eq!(loader.ensure_loaded(), LoadState::Loaded);
        }
        assert_eq!(client.load_calls(), 1);
        assert!(loader.state().is_available());
    }

    #[test]
    fn loads_once_across_threads() {
        let client = Arc::new(FakeClient::new());
        let loader = Arc::new(NativeClientLoader::new(Arc::clone(&client)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let loader = Arc::clone(&loader);
                std::thread::spawn(move || {
                    (0..25).map(|_| loader.ensure_loaded()).collect::<Vec<_>>()
                })
            })
            .collect();

        for h in handles {
            for state in h.join().unwrap() {
                assert_eq!(state, LoadState::Loaded);
            }
        }
        assert_eq!(client.load_calls(), 1);
    }

    #[test]
    #[traced_test]
    fn failure_is_pinned() {
        let client = Arc::new(FakeClient::new());
        client.fail_load("dlopen failed: library \"libarti.so\" not found");
        let loader = NativeClientLoader::new(Arc::clone(&client));

        let expected = LoadState::LoadFailed(LoadFailure::new(
            "dlopen failed: library \"libarti.so\" not found",
        ));
        assert_eq!(loader.ensure_loaded(), expected);

        // Even if the library would now load, we never try again.
        client.succeed_load();
        assert_eq!(loader.ensure_loaded(), expected);
        assert_eq!(loader.state(), expected);
        assert_eq!(client.load_calls(), 1);
        assert!(logs_contain("Unable to load native Tor client library"));
    }

    #[test]
    fn load_panic_is_pinned() {
        let client = Arc::new(FakeClient::new());
        client.panic_on_load("dlopen aborted");
        let loader = NativeClientLoader::new(Arc::clone(&client));

        let LoadState::LoadFailed(failure) = loader.ensure_loaded() else {
            panic!("panicking load was not a failure");
        };
        assert!(failure.message().contains("dlopen aborted"));

        client.succeed_load();
        for _ in 0..3 {
            assert!(!loader.ensure_loaded().is_available());
        }
        assert_eq!(loader.state(), LoadState::LoadFailed(failure));
        assert_eq!(client.load_calls(), 1);
    }
}
