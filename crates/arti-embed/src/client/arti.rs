//! A native Tor client built on `arti-client`, running in this process.

use std::sync::{Arc, OnceLock};

use arti_client::config::TorClientConfigBuilder;
use arti_client::{TorClient, TorClientConfig};
use futures::io::{AsyncReadExt as _, AsyncWriteExt as _};
use thiserror::Error;
use tor_bootstrap::{LoadFailure, NativeClient, NativeFailure, NativeOutcome, WorkingDirectory};
use tor_config::ConfigBuildError;
use tor_error::ErrorReport as _;
use tor_rtcompat::Runtime;
use tracing::{debug, info};

/// Text with which we report a successful start.
const STATUS_PREFIX: &str = "Tor client initialized successfully.";

/// Port on which we check connectivity to a target.
const CHECK_PORT: u16 = 80;

/// An error while starting an [`ArtiClient`].
#[derive(Debug, Error)]
enum StartError {
    /// We could not build a client configuration.
    #[error("Unable to configure Tor client")]
    Config(#[from] ConfigBuildError),
    /// The client failed to bootstrap or connect.
    #[error("Tor client failed")]
    Client(#[from] arti_client::Error),
    /// A stream to the target failed.
    #[error("Unable to talk to target")]
    Io(#[from] std::io::Error),
}

/// A [`NativeClient`] that bootstraps an in-process [`TorClient`].
///
/// The client is kept alive for as long as this object is, so that the host
/// can go on using it after bootstrap.
pub struct ArtiClient<R: Runtime> {
    /// The runtime to run the client on.
    runtime: R,
    /// The client, once bootstrapped.
    client: OnceLock<Arc<TorClient<R>>>,
}

impl<R: Runtime> ArtiClient<R> {
    /// Create a new, not yet bootstrapped, client on `runtime`.
    pub fn new(runtime: R) -> Self {
        ArtiClient {
            runtime,
            client: OnceLock::new(),
        }
    }

    /// Return the bootstrapped client, if there is one.
    pub fn tor_client(&self) -> Option<Arc<TorClient<R>>> {
        self.client.get().cloned()
    }

    /// Bootstrap a client whose storage lives in `workdir`, and check our
    /// connectivity to `target`.  Return the status text.
    async fn bootstrap(
        &self,
        target: Option<&str>,
        workdir: &WorkingDirectory,
    ) -> Result<String, StartError> {
        let client = match self.client.get() {
            Some(client) => Arc::clone(client),
            None => {
                let config = client_config(workdir)?;
                let client = TorClient::with_runtime(self.runtime.clone())
                    .config(config)
                    .create_bootstrapped()
                    .await?;
                info!("Tor client bootstrapped.");
                Arc::clone(self.client.get_or_init(|| Arc::new(client)))
            }
        };

        let Some(target) = target else {
            return Ok(STATUS_PREFIX.to_owned());
        };
        let response = check_target(&client, target).await?;
        Ok(format!("{} Test response: {}", STATUS_PREFIX, response))
    }
}

/// Return a client configuration that keeps its files in `workdir`.
fn client_config(workdir: &WorkingDirectory) -> Result<TorClientConfig, ConfigBuildError> {
    TorClientConfigBuilder::from_directories(workdir.state_dir(), workdir.cache_dir()).build()
}

/// Fetch `/` from `target` over Tor, and return the response's status line.
async fn check_target<R: Runtime>(
    client: &TorClient<R>,
    target: &str,
) -> Result<String, StartError> {
    debug!("Checking connectivity to {}", target);
    let mut stream = client.connect((target, CHECK_PORT)).await?;
    let request = format!(
        "GET / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        target
    );
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await?;
    let response = String::from_utf8_lossy(&response);
    Ok(response.lines().next().unwrap_or_default().to_owned())
}

impl<R: Runtime> NativeClient for ArtiClient<R> {
    fn load(&self) -> Result<(), LoadFailure> {
        // Linked in; nothing to load.
        Ok(())
    }

    fn start(&self, target: Option<&str>, workdir: &WorkingDirectory) -> NativeOutcome {
        let runtime = self.runtime.clone();
        match runtime.reenter_block_on(self.bootstrap(target, workdir)) {
            Ok(text) => NativeOutcome::Returned(text),
            Err(e) => NativeOutcome::Raised(NativeFailure::new(e.report().to_string())),
        }
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

    #[test]
    fn nothing_to_load() {
        tor_rtcompat::test_with_one_runtime!(|rt| async move {
            let client = ArtiClient::new(rt);
            assert!(client.load().is_ok());
            assert!(client.tor_client().is_none());
        });
    }
}
