//! A native Tor client exported from a shared library over a C ABI.
//!
//! The library must export two functions:
//!
//! ```c
//! char *start(const char *target, const char *workdir);
//! void free_result(char *result);
//! ```
//!
//! (under whatever names the [`DylibClientConfig`] says).  `start` blocks
//! until the client is ready or has failed, and returns a status string
//! allocated by the library, which we hand back to `free_result`.  An empty
//! `target` means "no target".  A null return means the call failed without
//! saying why.

use std::ffi::{CStr, CString, c_char};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use derive_builder::Builder;
use libloading::{Library, Symbol};
use serde::Deserialize;
use tor_bootstrap::{LoadFailure, NativeClient, NativeFailure, NativeOutcome, WorkingDirectory};
use tor_config::ConfigBuildError;
use tracing::{debug, info};

/// Type of the exported start function.
type StartFn = unsafe extern "C" fn(*const c_char, *const c_char) -> *mut c_char;
/// Type of the exported function that frees a start result.
type FreeFn = unsafe extern "C" fn(*mut c_char);

/// Configuration for a [`DylibClient`].
#[derive(Debug, Clone, Builder, Deserialize, Eq, PartialEq)]
#[builder(build_fn(error = "ConfigBuildError"))]
#[serde(deny_unknown_fields)]
pub struct DylibClientConfig {
    /// Path of the shared library, or a bare file name to search for in the
    /// platform's usual places.
    #[builder(setter(into))]
    library: PathBuf,

    /// Name of the exported start function.
    #[builder(setter(into), default = "default_start_symbol()")]
    #[serde(default = "default_start_symbol")]
    start_symbol: String,

    /// Name of the exported function that frees a start result.
    #[builder(setter(into), default = "default_free_symbol()")]
    #[serde(default = "default_free_symbol")]
    free_symbol: String,

    /// If set, a returned status beginning with this text is a failure, and
    /// the rest of the status is its message.
    #[builder(setter(into, strip_option), default)]
    #[serde(default)]
    error_prefix: Option<String>,
}

/// Return the default name of the start function.
fn default_start_symbol() -> String {
    "arti_start".to_owned()
}

/// Return the default name of the free function.
fn default_free_symbol() -> String {
    "arti_free_result".to_owned()
}

impl DylibClientConfig {
    /// Return a new builder for this type.
    pub fn builder() -> DylibClientConfigBuilder {
        DylibClientConfigBuilder::default()
    }

    /// Return the path of the shared library.
    pub fn library(&self) -> &Path {
        &self.library
    }
}

/// A [`NativeClient`] that calls into a shared library.
pub struct DylibClient {
    /// Our configuration.
    config: DylibClientConfig,
    /// The library, once loaded.
    library: Mutex<Option<Library>>,
}

impl DylibClient {
    /// Create a client for the library described by `config`.
    ///
    /// Nothing is loaded until [`NativeClient::load`] is called.
    pub fn new(config: DylibClientConfig) -> Self {
        DylibClient {
            config,
            library: Mutex::new(None),
        }
    }

    /// Return the symbol name `name` as a nul-terminated byte string.
    fn symbol_name(name: &str) -> Result<Vec<u8>, String> {
        CString::new(name)
            .map(CString::into_bytes_with_nul)
            .map_err(|_| format!("symbol name {:?} contains a nul byte", name))
    }

    /// Call the library's start function.
    fn call_start(&self, target: &CStr, workdir: &CStr) -> Result<Option<String>, String> {
        let guard = self.library.lock().expect("Poisoned lock");
        let library = guard
            .as_ref()
            .ok_or_else(|| "library is not loaded".to_owned())?;
        let start_name = Self::symbol_name(&self.config.start_symbol)?;
        let free_name = Self::symbol_name(&self.config.free_symbol)?;

        // SAFETY: the library promises that these symbols have the types we
        // give them, and that `start` returns either null or a pointer that
        // stays valid until we pass it to `free`.
        unsafe {
            let start: Symbol<'_, StartFn> = library
                .get(&start_name)
                .map_err(|e| format!("missing {}: {}", self.config.start_symbol, e))?;
            let free: Symbol<'_, FreeFn> = library
                .get(&free_name)
                .map_err(|e| format!("missing {}: {}", self.config.free_symbol, e))?;

            let raw = start(target.as_ptr(), workdir.as_ptr());
            if raw.is_null() {
                return Ok(None);
            }
            let text = CStr::from_ptr(raw).to_string_lossy().into_owned();
            free(raw);
            Ok(Some(text))
        }
    }
}

impl NativeClient for DylibClient {
    fn load(&self) -> Result<(), LoadFailure> {
        let path = &self.config.library;
        // SAFETY: loading a library runs its initializers.  We trust the
        // library that we were configured to use.
        let library = unsafe { Library::new(path) }
            .map_err(|e| LoadFailure::new(format!("Failed to load {}: {}", path.display(), e)))?;
        info!("Loaded Tor client library {}", path.display());
        *self.library.lock().expect("Poisoned lock") = Some(library);
        Ok(())
    }

    fn start(&self, target: Option<&str>, workdir: &WorkingDirectory) -> NativeOutcome {
        let Ok(target) = CString::new(target.unwrap_or_default()) else {
            return NativeOutcome::Raised(NativeFailure::new("target contains a nul byte"));
        };
        let Ok(workdir) = CString::new(workdir.path().to_string_lossy().into_owned()) else {
            return NativeOutcome::Raised(NativeFailure::new(
                "working directory path contains a nul byte",
            ));
        };

        debug!("Calling {} in Tor client library", self.config.start_symbol);
        match self.call_start(&target, &workdir) {
            Ok(Some(text)) => self.interpret(text),
            Ok(None) => NativeOutcome::Raised(NativeFailure::new("")),
            Err(msg) => NativeOutcome::Raised(NativeFailure::new(msg)),
        }
    }
}

impl DylibClient {
    /// Turn a returned status into an outcome, according to our error prefix.
    fn interpret(&self, text: String) -> NativeOutcome {
        match self
            .config
            .error_prefix
            .as_deref()
            .and_then(|prefix| text.strip_prefix(prefix))
        {
            Some(msg) => NativeOutcome::Raised(NativeFailure::new(msg)),
            None => NativeOutcome::Returned(text),
        }
    }
}
