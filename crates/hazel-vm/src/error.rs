//! VM error types

use thiserror::Error;

/// Errors surfaced by the embedding API.
///
/// Script-level failures (a call that throws) are reported as
/// `Runtime` here; the thrown value itself is retrievable through
/// `Vm::last_error` per the re-raise-error calling convention.
#[derive(Debug, Error)]
pub enum VmError {
    /// Source could not be compiled
    #[error("compile error: {desc} ({source_name}:{line}:{column})")]
    Compile {
        /// Human-readable description
        desc: String,
        /// Source name passed to the compiler
        source_name: String,
        /// 1-based line
        line: i64,
        /// 1-based column
        column: i64,
    },

    /// A call or resume raised a script-level error
    #[error("runtime error: {0}")]
    Runtime(String),

    /// The operation is invalid for the current state or operand kinds
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Stack index outside the current frame window
    #[error("stack index out of range: {0}")]
    StackIndex(i64),

    /// A serialized closure blob failed validation
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),
}

/// Result alias for embedding API calls.
pub type VmResult<T> = Result<T, VmError>;
