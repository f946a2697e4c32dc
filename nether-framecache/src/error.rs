//! Fatal error path.
//!
//! Budget overflows and misuse of buffer objects are configuration or
//! programming errors; there is nothing to recover mid-frame. The fallible
//! `try_*` APIs return the error, and the plain APIs end here.

use std::fmt::Display;

/// Log `err` and terminate.
///
/// Release builds abort on panic, so this never unwinds in production.
#[track_caller]
pub fn fatal(err: impl Display) -> ! {
    tracing::error!("fatal: {}", err);
    panic!("{}", err);
}

/// Unwrap a result or terminate through [`fatal`].
pub trait OrFatal<T> {
    fn or_fatal(self) -> T;
}

impl<T, E: Display> OrFatal<T> for Result<T, E> {
    #[track_caller]
    fn or_fatal(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => fatal(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_or_fatal_passes_ok_through() {
        let value: Result<u32, String> = Ok(7);
        assert_eq!(value.or_fatal(), 7);
    }

    #[test]
    #[should_panic(expected = "Out of vertex cache")]
    fn test_or_fatal_panics_with_message() {
        let value: Result<u32, &str> = Err("Out of vertex cache");
        value.or_fatal();
    }
}
