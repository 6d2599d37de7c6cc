//! Diagnostics and Error Reporting
//!
//! Two sinks sit at the edge of the core:
//!
//! - a [`DiagnosticSink`] receives non-fatal warnings (an unparsable watch
//!   path, a suspected infinite update loop);
//! - an [`ErrorReporter`] receives errors raised by sandboxed (user)
//!   getters and callbacks, which are never propagated.
//!
//! [`TracingSink`] implements both on top of `tracing`.

use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::error::WatchError;
use crate::reactive::WatcherId;
use crate::scheduler::Owner;

/// Where a runaway update loop was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopSource {
    /// A watcher with a user-supplied expression.
    UserWatcher { expression: String },
    /// A primary (render) watcher.
    RenderFunction,
}

impl fmt::Display for LoopSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserWatcher { expression } => {
                write!(f, "in watcher with expression \"{expression}\"")
            }
            Self::RenderFunction => f.write_str("in a component render function"),
        }
    }
}

/// A non-fatal warning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    /// A watch path could not be parsed; the watcher reads nothing.
    #[error("failed watching path \"{path}\": only simple dot-delimited paths are supported")]
    InvalidExpression { path: String },

    /// A watcher was re-queued too often within one flush.
    #[error("you may have an infinite update loop {origin}")]
    RunawayUpdateLoop { watcher: WatcherId, origin: LoopSource },
}

/// Receives warnings.
pub trait DiagnosticSink {
    fn warn(&self, diagnostic: &Diagnostic, owner: Option<&Rc<Owner>>);
}

/// Receives errors from sandboxed evaluators.
pub trait ErrorReporter {
    fn report(&self, error: &WatchError, owner: Option<&Rc<Owner>>);
}

/// Logs diagnostics and reported errors through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn warn(&self, diagnostic: &Diagnostic, owner: Option<&Rc<Owner>>) {
        let owner = owner.map(|o| o.name()).unwrap_or("<root>");
        tracing::warn!(owner, "{diagnostic}");
    }
}

impl ErrorReporter for TracingSink {
    fn report(&self, error: &WatchError, owner: Option<&Rc<Owner>>) {
        let owner = owner.map(|o| o.name()).unwrap_or("<root>");
        tracing::error!(owner, expression = error.expression(), "{error}");
    }
}
