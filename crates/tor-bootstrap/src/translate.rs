//! Interpret the raw outcome of a native start call.

use crate::coordinator::{AttemptId, BootstrapOutcome, BootstrapStatus};
use crate::err::ErrorDetail;
use crate::native::{NativeFailure, NativeOutcome};

/// Prefix with which some native clients report failure in-band, as an
/// ordinary return value rather than a raised error.
pub const IN_BAND_ERROR_PREFIX: &str = "Tor Error: ";

/// Turn what the native client handed back into a typed outcome.
///
/// `attempt` identifies the bootstrap attempt that produced `raw`.
pub fn translate(attempt: AttemptId, raw: NativeOutcome) -> BootstrapOutcome {
    match raw {
        NativeOutcome::Returned(text) => match text.strip_prefix(IN_BAND_ERROR_PREFIX) {
            Some(cause) => Err(ErrorDetail::NativeBootstrap(NativeFailure::new(cause)).into()),
            None => Ok(BootstrapStatus::new(attempt, text)),
        },
        NativeOutcome::Raised(f) => Err(ErrorDetail::NativeBootstrap(f).into()),
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

    #[test]
    fn returned_text() {
        let id = AttemptId::next();
        let status = translate(
            id,
            NativeOutcome::Returned(
                "Tor client initialized successfully. Test response: HTTP/1.1 200 OK".into(),
            ),
        )
        .unwrap();
        assert_eq!(status.attempt(), id);
        assert_eq!(
            status.text(),
            "Tor client initialized successfully. Test response: HTTP/1.1 200 OK"
        );

        let status = translate(id, NativeOutcome::Returned(String::new())).unwrap();
        assert_eq!(status.text(), "");
    }

    #[test]
    fn raised() {
        let err = translate(
            AttemptId::next(),
            NativeOutcome::Raised(NativeFailure::with_code("no route to guard", 113)),
        )
        .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::NativeBootstrap);
        assert_eq!(err.cause().as_deref(), Some("no route to guard"));

        let err = translate(AttemptId::next(), NativeOutcome::Raised(NativeFailure::new("")))
            .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::NativeBootstrap);
        // The cause stays verbatim; the message explains.
        assert_eq!(err.cause().as_deref(), Some(""));
        assert!(
            err.message()
                .contains("native client reported a failure without explanation")
        );
    }

    #[test]
    fn in_band_error() {
        let err = translate(
            AttemptId::next(),
            NativeOutcome::Returned("Tor Error: Unable to bootstrap a working directory".into()),
        )
        .unwrap_err();
        assert_eq!(err.failure_kind(), FailureKind::NativeBootstrap);
        assert_eq!(
            err.cause().as_deref(),
            Some("Unable to bootstrap a working directory")
        );

        // Only a prefix counts.
        let ok = translate(
            AttemptId::next(),
            NativeOutcome::Returned("Recovered from Tor Error: earlier".into()),
        );
        assert!(ok.is_ok());
    }
}
