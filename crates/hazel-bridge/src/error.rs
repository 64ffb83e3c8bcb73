//! Bridge error types

use thiserror::Error;

/// Errors surfaced by the bridge to host callers.
///
/// Script-level failures never unwind the host automatically: `Script`
/// is returned by call operations when the callee raised, and callers
/// wanting marker-style catching use the `apply_function_catch` path
/// instead. Internal-consistency violations (an interpreter-internal
/// object kind reaching the boundary, an unrecognized special-return
/// marker) are not represented here; they panic.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The owning VM instance has been dropped
    #[error("VM instance is gone")]
    InstanceGone,

    /// An object from another VM instance was passed in
    #[error("object belongs to a different VM instance")]
    ForeignObject,

    /// The wrapper does not support this operation
    #[error("invalid reference: {0}")]
    InvalidRef(String),

    /// The host value has no VM-native conversion
    #[error("unsupported conversion: {0}")]
    Unsupported(String),

    /// A call, resume, or wake raised a script-level error
    #[error("script error: {0}")]
    Script(String),

    /// Source failed to compile
    #[error("compile error: {desc} ({source_name}:{line}:{column})")]
    Compile {
        /// Human-readable description
        desc: String,
        /// Source name
        source_name: String,
        /// 1-based line
        line: i64,
        /// 1-based column
        column: i64,
    },

    /// Composite conversion exceeded the nesting limit
    #[error("conversion depth limit exceeded")]
    TooDeep,

    /// A serialized closure blob was rejected by the VM
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),
}

/// Result alias for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;
