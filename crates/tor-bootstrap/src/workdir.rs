//! Prepare the private directory that the native client keeps its files in.
//!
//! The native client owns the contents of this directory: we create it (and
//! the `state` and `cache` directories inside it) with owner-only
//! permissions, and never look inside again.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

use fs_mistrust::Mistrust;
use tracing::debug;

use crate::Result;
use crate::err::ErrorDetail;

/// Name of the directory, inside the working directory, for persistent state.
const STATE_SUBDIR: &str = "state";
/// Name of the directory, inside the working directory, for cached directory
/// material.
const CACHE_SUBDIR: &str = "cache";

/// A working directory that exists and is ready for the native client.
///
/// Immutable once created; clones refer to the same directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkingDirectory {
    /// The base directory this was provisioned under.
    base: PathBuf,
    /// The absolute path of the working directory itself.
    path: PathBuf,
    /// When we finished creating it.
    ready_at: SystemTime,
}

impl WorkingDirectory {
    /// Return the absolute path of the working directory.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return the directory where the client should keep persistent state.
    pub fn state_dir(&self) -> PathBuf {
        self.path.join(STATE_SUBDIR)
    }

    /// Return the directory where the client should keep cached material.
    pub fn cache_dir(&self) -> PathBuf {
        self.path.join(CACHE_SUBDIR)
    }

    /// Return the time at which this directory was made ready.
    pub fn ready_at(&self) -> SystemTime {
        self.ready_at
    }
}

/// Creates the working directory under a base path, idempotently.
///
/// The most recently provisioned directory is remembered: asking again for
/// the same base path hands back the same [`WorkingDirectory`] without
/// touching the filesystem.
pub struct WorkingDirectoryProvisioner {
    /// Name of the working directory, relative to the base path.
    subdir: String,
    /// Rules for which permissions and owners we accept.
    mistrust: Mistrust,
    /// The directory we provisioned last, if any.
    current: Mutex<Option<WorkingDirectory>>,
}

impl WorkingDirectoryProvisioner {
    /// Create a provisioner that puts the working directory at
    /// `<base>/<subdir>`, checking permissions according to `mistrust`.
    pub fn new(subdir: impl Into<String>, mistrust: Mistrust) -> Self {
        WorkingDirectoryProvisioner {
            subdir: subdir.into(),
            mistrust,
            current: Mutex::new(None),
        }
    }

    /// Make sure the working directory under `base` exists, and return it.
    ///
    /// Creates the directory and its parents if they are absent.  Existing
    /// contents are left alone.
    pub fn ensure(&self, base: &Path) -> Result<WorkingDirectory> {
        if !base.is_absolute() {
            return Err(ErrorDetail::RelativeBaseDir {
                path: base.to_owned(),
            }
            .into());
        }

        let mut current = self.current.lock().expect("Poisoned lock");
        if let Some(wd) = current.as_ref().filter(|wd| wd.base == base) {
            return Ok(wd.clone());
        }

        let path = base.join(&self.subdir);
        for dir in [path.clone(), path.join(STATE_SUBDIR), path.join(CACHE_SUBDIR)] {
            self.mistrust
                .make_directory(&dir)
                .map_err(|cause| ErrorDetail::Provisioning { path: dir, cause })?;
        }

        let wd = WorkingDirectory {
            base: base.to_owned(),
            path,
            ready_at: SystemTime::now(),
        };
        debug!("Working directory ready at {}", wd.path.display());
        *current = Some(wd.clone());
        Ok(wd)
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
    use crate::FailureKind;
    use tempfile::TempDir;

    fn provisioner() -> WorkingDirectoryProvisioner {
        WorkingDirectoryProvisioner::new("arti", Mistrust::new_dangerously_trust_everyone())
    }

    #[test]
    fn creates_tree() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("app/cache");
        let wd = provisioner().ensure(&base).unwrap();

        assert_eq!(wd.path(), base.join("arti"));
        assert!(wd.path().is_dir());
        assert!(wd.state_dir().is_dir());
        assert!(wd.cache_dir().is_dir());
        assert_eq!(wd.state_dir(), base.join("arti/state"));
        assert_eq!(wd.cache_dir(), base.join("arti/cache"));

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for dir in [wd.path().to_owned(), wd.state_dir(), wd.cache_dir()] {
                let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
                assert_eq!(mode & 0o077, 0, "{} is accessible to others", dir.display());
            }
        }
    }

    #[test]
    fn idempotent() {
        let tmp = TempDir::new().unwrap();
        let prov = provisioner();
        let first = prov.ensure(tmp.path()).unwrap();

        // Take the directory away behind the provisioner's back: a second
        // call for the same base must not notice, since it does no I/O.
        std::fs::remove_dir_all(first.path()).unwrap();
        let second = prov.ensure(tmp.path()).unwrap();
        assert_eq!(first, second);
        assert!(!second.path().exists());
    }

    #[test]
    fn keeps_contents() {
        let tmp = TempDir::new().unwrap();
        let wd = provisioner().ensure(tmp.path()).unwrap();
        let marker = wd.state_dir().join("state.json");
        std::fs::write(&marker, b"{}").unwrap();

        // A fresh provisioner finds the directory already present.
        let again = provisioner().ensure(tmp.path()).unwrap();
        assert_eq!(again.path(), wd.path());
        assert_eq!(std::fs::read(&marker).unwrap(), b"{}");
    }

    #[test]
    fn new_base_is_provisioned() {
        let tmp = TempDir::new().unwrap();
        let prov = provisioner();
        let a = prov.ensure(&tmp.path().join("a")).unwrap();
        let b = prov.ensure(&tmp.path().join("b")).unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().is_dir());
        assert!(b.path().is_dir());
    }

    #[test]
    fn unusable_base() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("not-a-directory");
        std::fs::write(&file, b"").unwrap();

        let err = provisioner().ensure(&file).unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Provisioning);
        assert!(err.cause().is_some());

        let err = provisioner().ensure(Path::new("relative/cache")).unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::Provisioning);
    }
}
