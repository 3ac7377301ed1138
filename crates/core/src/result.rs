//! The standard [`Result`] alias and railway-oriented combinators.
//!
//! These combinators exist so the rest of the workspace never reaches for
//! `.unwrap()`/`.expect()` to thread errors through closures and iterator
//! adapters.

use crate::error::Error;

/// The standard result type for dagforge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Combinators specific to [`Result<T>`] (i.e. `Result<T, Error>`).
pub trait ResultExt<T> {
    /// Convert to an `Option`, logging the error at `tracing::error!` if
    /// present.
    fn into_option_logged(self) -> Option<T>;

    /// Get the value or a default, logging the error if present.
    fn or_default_logged(self, default: T) -> T;

    /// Inspect the error without consuming the result.
    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self;
}

impl<T> ResultExt<T> for Result<T> {
    fn into_option_logged(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::error!(error = %err, "operation failed");
                None
            }
        }
    }

    fn or_default_logged(self, default: T) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                tracing::error!(error = %err, "operation failed, using default");
                default
            }
        }
    }

    fn inspect_error<F: FnOnce(&Error)>(self, f: F) -> Self {
        if let Err(ref err) = self {
            f(err);
        }
        self
    }
}

/// Combinators for any `Result<T, E>`, independent of the crate's own error
/// type — used at boundaries where an external `Result` is threaded through
/// before being mapped into [`Error`].
pub trait GenericResultExt<T, E> {
    fn tap_ok<F: FnOnce(&T)>(self, f: F) -> Self;
    fn tap_err<F: FnOnce(&E)>(self, f: F) -> Self;
}

impl<T, E> GenericResultExt<T, E> for std::result::Result<T, E> {
    fn tap_ok<F: FnOnce(&T)>(self, f: F) -> Self {
        if let Ok(ref value) = self {
            f(value);
        }
        self
    }

    fn tap_err<F: FnOnce(&E)>(self, f: F) -> Self {
        if let Err(ref err) = self {
            f(err);
        }
        self
    }
}

/// Combinators for `Option<T>` used to avoid `.unwrap()` at call sites that
/// need to turn absence into a typed error.
pub trait OptionExt<T> {
    fn ok_or_else_lazy<E, F: FnOnce() -> E>(self, err: F) -> std::result::Result<T, E>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_else_lazy<E, F: FnOnce() -> E>(self, err: F) -> std::result::Result<T, E> {
        self.ok_or_else(err)
    }
}
