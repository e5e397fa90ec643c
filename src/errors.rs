//! Error types for the threading system.
//!
//! Only resource exhaustion is recoverable; contract violations (blocking in
//! interrupt context, double-acquiring a mutex, releasing a mutex that is
//! not held, and the like) are programming errors and panic instead.

use core::fmt;

/// Result type for thread creation.
pub type SpawnResult<T> = Result<T, SpawnError>;

/// Why a thread could not be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// No page is available to back the new thread's stack.
    OutOfPages,
    /// The platform could not create an execution context.
    Platform,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::OutOfPages => write!(f, "out of thread pages"),
            SpawnError::Platform => write!(f, "platform could not back a new thread"),
        }
    }
}
