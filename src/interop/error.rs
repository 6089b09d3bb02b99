//! Error taxonomy for the bridge.

use thiserror::Error;

/// Broad class of a [`BridgeError`], deciding how a caller is expected to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The native library does not match the bindings. Not recoverable at runtime.
    Configuration,
    /// A single native resource could not be produced or is no longer usable.
    Resource,
    /// A buffer or field access did not match its layout.
    Marshalling,
    /// One or more release actions failed while an arena was torn down.
    Teardown,
}

/// Failures raised by the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("native symbol `{symbol}` was not found in {source_name}")]
    MissingSymbol { symbol: String, source_name: String },

    #[error("binding for `{symbol}` does not match the native function: {reason}")]
    SignatureMismatch { symbol: String, reason: String },

    #[error("layout `{layout}` is inconsistent: {reason}")]
    InvalidLayout { layout: String, reason: String },

    #[error("layout `{layout}` describes {expected} bytes (align {expected_align}) but the mirrored type has {actual} bytes (align {actual_align})")]
    LayoutMismatch {
        layout: String,
        expected: usize,
        expected_align: usize,
        actual: usize,
        actual_align: usize,
    },

    #[error("failed to load native library {path}: {reason}")]
    LibraryLoad { path: String, reason: String },

    #[error("native call `{symbol}` returned a null address")]
    NullAddress { symbol: String },

    #[error("handle at {address:#x} has already been released")]
    Released { address: usize },

    #[error("arena is closed")]
    ArenaClosed,

    #[error("could not allocate {size} bytes (align {align}) for `{layout}`")]
    AllocationFailed {
        layout: String,
        size: usize,
        align: usize,
    },

    #[error("buffer of {actual} bytes does not match layout `{layout}` ({expected} bytes)")]
    BufferSize {
        layout: String,
        expected: usize,
        actual: usize,
    },

    #[error("field `{field}` of `{layout}` is {actual}, not {requested}")]
    FieldKind {
        layout: String,
        field: String,
        actual: String,
        requested: String,
    },

    #[error("layout `{layout}` has no field named `{field}`")]
    UnknownField { layout: String, field: String },

    #[error("release of {address:#x} failed: {reason}")]
    ReleaseFailed { address: usize, reason: String },

    #[error("{} release action(s) failed during teardown", .0.len())]
    Teardown(Vec<BridgeError>),
}

impl BridgeError {
    /// Classifies the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::MissingSymbol { .. }
            | BridgeError::SignatureMismatch { .. }
            | BridgeError::InvalidLayout { .. }
            | BridgeError::LayoutMismatch { .. }
            | BridgeError::LibraryLoad { .. } => ErrorCategory::Configuration,
            BridgeError::NullAddress { .. }
            | BridgeError::Released { .. }
            | BridgeError::ArenaClosed
            | BridgeError::AllocationFailed { .. } => ErrorCategory::Resource,
            BridgeError::BufferSize { .. }
            | BridgeError::FieldKind { .. }
            | BridgeError::UnknownField { .. } => ErrorCategory::Marshalling,
            BridgeError::ReleaseFailed { .. } | BridgeError::Teardown(_) => {
                ErrorCategory::Teardown
            }
        }
    }

    /// Whether the process should stop driving the native library.
    #[inline]
    pub fn is_fatal(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
