//! Error types for cinder-core operations

use crate::primitive::PrimitiveKind;
use crate::registry::ImplKey;
use cinder_runtime::{DataType, EventFailure, RuntimeError};

/// Result type for cinder-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while selecting, executing or persisting primitive implementations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No implementation registered under the requested key
    #[error("no implementation registered for {key}")]
    ImplementationNotFound { key: ImplKey },

    /// The evaluator rejected its inputs; not retried
    #[error("Couldn't execute {kind} primitive with id {instance}: {reason}")]
    EvaluationFailed {
        kind: &'static str,
        instance: String,
        reason: EvalError,
    },

    /// A producer of this instance did not complete
    #[error("primitive {instance} cannot run: producer {producer} failed")]
    ProducerFailed { instance: String, producer: String },

    /// Implementation constructed or driven against the wrong configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Memory, stream or kernel cache failure
    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    /// Malformed saved implementation record
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Saved record names a type tag nobody registered
    #[error("unknown implementation type tag {0:?}")]
    UnknownTypeTag(String),
}

impl Error {
    /// Create a configuration error, logging it at error level
    pub fn configuration(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "configuration error");
        Self::Configuration(message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Map a failed completion event observed on behalf of `instance`
    ///
    /// A failure owned by `instance` itself is its own evaluation failure;
    /// any other owner is a producer that failed upstream.
    pub fn from_failed_event(kind: PrimitiveKind, instance: &str, failure: EventFailure) -> Self {
        if failure.owner == instance {
            tracing::error!(kind = %kind, instance, reason = %failure.reason, "evaluation failed");
            Self::EvaluationFailed {
                kind: kind.name(),
                instance: instance.to_string(),
                reason: EvalError::Other(failure.reason),
            }
        } else {
            tracing::error!(instance, producer = %failure.owner, reason = %failure.reason, "producer failed");
            Self::ProducerFailed {
                instance: instance.to_string(),
                producer: failure.owner,
            }
        }
    }
}

/// Failure reported by a backend evaluator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    /// Required input absent
    #[error("missing input {0}")]
    MissingInput(&'static str),

    /// Input expected to hold exactly one element
    #[error("input {input} must be a scalar, got {count} elements")]
    NotScalar { input: &'static str, count: usize },

    #[error("step must be non-zero")]
    ZeroStep,

    /// Output length disagrees with the sequence the inputs describe
    #[error("output holds {actual} elements, inputs describe {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Host view does not hold the element type it claims
    #[error("tensor of type {data_type} has {bytes} bytes, not a whole number of elements")]
    MalformedTensor { data_type: DataType, bytes: usize },

    #[error("unsupported output type {0}")]
    UnsupportedType(DataType),

    #[error("expected {expected} output tensor(s), got {actual}")]
    OutputCount { expected: usize, actual: usize },

    /// Free-form failure from an evaluator
    #[error("{0}")]
    Other(String),
}
