//! Configuration for bootstrapping an embedded Tor client.

use std::path::{Component, Path, PathBuf};

use derive_builder::Builder;
use fs_mistrust::Mistrust;
use serde::Deserialize;

pub use tor_config::ConfigBuildError;

/// What to do when `start()` is called after a bootstrap attempt has failed.
#[derive(Debug, Clone, Copy, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum FailurePolicy {
    /// Keep reporting the failure; a new process is needed to try again.
    #[default]
    Terminal,
    /// Launch a fresh attempt on the next `start()`.
    ///
    /// A failure to load the native library is terminal even under this
    /// policy.
    Retry,
}

/// Configuration for a [`BootstrapCoordinator`](crate::BootstrapCoordinator).
///
/// This type is immutable once constructed. To create an object of this type,
/// use [`BootstrapConfigBuilder`].
#[derive(Debug, Clone, Builder, Deserialize, Eq, PartialEq)]
#[builder(build_fn(validate = "Self::validate", error = "ConfigBuildError"))]
#[serde(deny_unknown_fields)]
pub struct BootstrapConfig {
    /// The application-writable directory under which the client's working
    /// directory is created.
    ///
    /// This is supplied by the embedding runtime (typically its cache or
    /// files area).  It must be absolute.
    #[builder(setter(into))]
    pub(crate) base_dir: PathBuf,

    /// Name of the client's working directory, inside `base_dir`.
    #[builder(setter(into), default = "default_working_subdir()")]
    #[serde(default = "default_working_subdir")]
    pub(crate) working_subdir: String,

    /// If true, don't check ownership and permissions of the directories we
    /// create or use.
    ///
    /// This is occasionally needed on platforms where the application's own
    /// storage area has unusual permissions.
    #[builder(default)]
    #[serde(default)]
    pub(crate) disable_permission_checks: bool,

    /// What to do on a `start()` that follows a failed attempt.
    #[builder(default)]
    #[serde(default)]
    pub(crate) failure_policy: FailurePolicy,
}

/// Return the default name of the working directory.
fn default_working_subdir() -> String {
    "arti".to_owned()
}

impl BootstrapConfig {
    /// Return a new builder for this type.
    pub fn builder() -> BootstrapConfigBuilder {
        BootstrapConfigBuilder::default()
    }

    /// Return the base directory.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Return the configured failure policy.
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    /// Return the [`Mistrust`] to use for checking our directories.
    pub(crate) fn mistrust(&self) -> Mistrust {
        if self.disable_permission_checks {
            Mistrust::new_dangerously_trust_everyone()
        } else {
            Mistrust::new()
        }
    }
}

impl BootstrapConfigBuilder {
    /// Check that the values in this builder are usable.
    fn validate(&self) -> Result<(), ConfigBuildError> {
        if let Some(base) = &self.base_dir {
            if !base.is_absolute() {
                return Err(ConfigBuildError::Invalid {
                    field: "base_dir".to_owned(),
                    problem: format!("{} is not an absolute path", base.display()),
                });
            }
        }
        if let Some(subdir) = &self.working_subdir {
            let mut components = Path::new(subdir).components();
            let single_normal = matches!(
                (components.next(), components.next()),
                (Some(Component::Normal(_)), None)
            );
            if !single_normal {
                return Err(ConfigBuildError::Invalid {
                    field: "working_subdir".to_owned(),
                    problem: format!("{:?} is not a single directory name", subdir),
                });
            }
        }
        Ok(())
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
    fn defaults() {
        let cfg = BootstrapConfig::builder()
            .base_dir("/data/user/0/org.example/cache")
            .build()
            .unwrap();
        assert_eq!(cfg.base_dir(), Path::new("/data/user/0/org.example/cache"));
        assert_eq!(cfg.working_subdir, "arti");
        assert!(!cfg.disable_permission_checks);
        assert_eq!(cfg.failure_policy(), FailurePolicy::Terminal);
    }

    #[test]
    fn base_dir_required() {
        let err = BootstrapConfig::builder().build().unwrap_err();
        assert!(matches!(err, ConfigBuildError::MissingField { ref field } if field == "base_dir"));
    }

    #[test]
    fn rejects_bad_paths() {
        let err = BootstrapConfig::builder()
            .base_dir("cache")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigBuildError::Invalid { ref field, .. } if field == "base_dir"));

        for subdir in ["", "a/b", "..", "/abs"] {
            let err = BootstrapConfig::builder()
                .base_dir("/tmp")
                .working_subdir(subdir)
                .build()
                .unwrap_err();
            assert!(
                matches!(err, ConfigBuildError::Invalid { ref field, .. } if field == "working_subdir"),
                "accepted {:?}",
                subdir
            );
        }
    }

    #[test]
    fn from_toml() {
        let cfg: BootstrapConfig = toml::from_str(
            r#"
            base_dir = "/var/cache/app"
            failure_policy = "retry"
            disable_permission_checks = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.base_dir(), Path::new("/var/cache/app"));
        assert_eq!(cfg.working_subdir, "arti");
        assert_eq!(cfg.failure_policy(), FailurePolicy::Retry);
        assert!(cfg.disable_permission_checks);

        let bad: Result<BootstrapConfig, _> = toml::from_str(
            r#"
            base_dir = "/var/cache/app"
            socks_port = 9050
            "#,
        );
        assert!(bad.is_err());
    }
}
