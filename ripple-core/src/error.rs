//! Error types for watcher evaluation.
//!
//! Only failures from trusted (internal) evaluators ever surface as
//! `Err(WatchError)`. Failures from sandboxed (user) evaluators are handed
//! to the [`ErrorReporter`](crate::diagnostics::ErrorReporter) instead, as a
//! `WatchError` carrying the same context.

use thiserror::Error;

/// Error type returned by getters and callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while evaluating a watcher or running its callback.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The getter failed during evaluation.
    #[error("error in getter for watcher \"{expression}\": {source}")]
    Getter {
        expression: String,
        #[source]
        source: BoxError,
    },

    /// The callback failed after the watched value changed.
    #[error("error in callback for watcher \"{expression}\": {source}")]
    Callback {
        expression: String,
        #[source]
        source: BoxError,
    },

    /// A memoized read found no value to return.
    #[error("watcher \"{expression}\" has no value")]
    Unavailable { expression: String },
}

impl WatchError {
    /// The expression of the watcher this error belongs to.
    pub fn expression(&self) -> &str {
        match self {
            Self::Getter { expression, .. }
            | Self::Callback { expression, .. }
            | Self::Unavailable { expression } => expression,
        }
    }
}
