//! This module owns the error types used by the transaction engine.

use snafu::Snafu;
use std::fmt;

/// Any error a stage wants to report, erased so stages from different domains can share one
/// transaction.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The code recorded for a stage failure that didn't pick a more specific one.
pub const GENERIC_FAILURE_CODE: i32 = 1;

pub type Result<T> = std::result::Result<T, Error>;

/// Error returned when a transaction could not be committed.  It only exists to record which
/// stage failed; callers report the cause, see [`Error::into_cause`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Transaction failed at stage {} '{}': {}", index, stage, source))]
    StageCommit {
        stage: String,
        index: usize,
        source: StageError,
    },
}

impl Error {
    /// Name of the stage whose commit failed.
    pub fn stage(&self) -> &str {
        match self {
            Error::StageCommit { stage, .. } => stage,
        }
    }

    /// Unwraps the failure the stage originally reported.
    pub fn into_cause(self) -> StageError {
        match self {
            Error::StageCommit { source, .. } => source,
        }
    }
}

/// The failure reported by a stage's `commit` or `rollback`.
///
/// Displays exactly like the error it wraps, so the message a user sees is the one the stage
/// produced.  The `code` is a stage-defined number recorded alongside the message.
#[derive(Debug)]
pub struct StageError {
    code: i32,
    source: BoxError,
}

impl StageError {
    pub fn new<E>(source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::with_code(GENERIC_FAILURE_CODE, source)
    }

    pub fn with_code<E>(code: i32, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self {
            code,
            source: source.into(),
        }
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    /// Returns the wrapped error if it is of type `E`.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: std::error::Error + 'static,
    {
        self.source.downcast_ref::<E>()
    }

    pub fn into_source(self) -> BoxError {
        self.source
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for StageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}
