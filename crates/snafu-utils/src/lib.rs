//! Error plumbing shared by the workspace crates and their tools.
//!
//! - [`Location`] records the call site of an error as snafu implicit data.
//! - [`GenericError`] is a string-message error for binaries and examples.
//! - [`Report`] renders an error with its chain of sources.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

use alloc::{boxed::Box, string::String};
use core::{error::Error, fmt};

use snafu::{GenerateImplicitData, Snafu};

/// Source location where an error was created.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location(&'static core::panic::Location<'static>);

impl Default for Location {
    #[track_caller]
    fn default() -> Self {
        Self(core::panic::Location::caller())
    }
}

impl GenerateImplicitData for Location {
    #[track_caller]
    fn generate() -> Self {
        Self::default()
    }
}

impl Location {
    #[must_use]
    pub fn file(&self) -> &'static str {
        self.0.file()
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.0.line()
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Catch-all error carrying a message and an optional boxed source.
#[derive(Debug, Snafu)]
#[snafu(whatever, display("{message}"))]
pub struct GenericError {
    message: String,
    #[snafu(implicit)]
    location: Location,
    #[snafu(source(from(Box<dyn Error>, Some)))]
    source: Option<Box<dyn Error>>,
}

impl GenericError {
    #[must_use]
    pub fn location(&self) -> Location {
        self.location
    }
}

fn location_of(error: &(dyn Error + 'static)) -> Option<Location> {
    error
        .downcast_ref::<GenericError>()
        .map(GenericError::location)
}

/// Human readable rendering of an error and its sources.
///
/// ```text
/// Error: failed to replay script
///   at crates/offset-allocator/examples/replay_allocations.rs:48:10
///
/// Caused by:
///    0: no free region can hold 34 bytes, free space: 32
/// ```
pub struct Report<E> {
    error: E,
}

impl<E> Report<E> {
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E> fmt::Debug for Report<E>
where
    E: Error + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<E> fmt::Display for Report<E>
where
    E: Error + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Error: {}", self.error)?;
        if let Some(loc) = location_of(&self.error) {
            writeln!(f, "  at {loc}")?;
        }
        let mut source = self.error.source();
        if source.is_some() {
            writeln!(f)?;
            writeln!(f, "Caused by:")?;
        }
        let mut index = 0;
        while let Some(s) = source {
            writeln!(f, "{index:4}: {s}")?;
            if let Some(loc) = location_of(s) {
                writeln!(f, "      at {loc}")?;
            }
            source = s.source();
            index += 1;
        }
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use snafu::{ResultExt as _, whatever};

    use super::*;

    fn fails() -> Result<(), GenericError> {
        whatever!("top level failure")
    }

    fn fails_with_source() -> Result<(), GenericError> {
        Err(fmt::Error).whatever_context("outer failure")
    }

    #[test]
    fn test_report_without_source() {
        let err = fails().unwrap_err();
        assert_eq!(err.location().file(), file!());
        let report = Report::new(err).to_string();
        assert!(report.starts_with("Error: top level failure\n  at "));
        assert!(!report.contains("Caused by:"));
    }

    #[test]
    fn test_report_with_source() {
        let report = Report::new(fails_with_source().unwrap_err()).to_string();
        assert!(report.starts_with("Error: outer failure\n"));
        assert!(report.contains(
            "Caused by:\n   0: an error occurred when formatting an argument\n"
        ));
    }
}
