//! Error types for the reactive core.
//!
//! Errors raised inside user-supplied evaluators and callbacks are routed to
//! the owning component's error sink instead of propagating, so one broken
//! watcher cannot take down a whole flush. Errors from internal evaluators
//! (the primary render watcher, for example) are returned to the caller with
//! `?` since they signal a fault the framework cannot paper over.

use thiserror::Error;

/// Opaque error payload produced by user-supplied closures.
pub type DynError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by the dependency-tracking and scheduling core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A watcher's evaluator failed.
    #[error("getter for watcher \"{expression}\": {source}")]
    Evaluation {
        expression: String,
        #[source]
        source: DynError,
    },

    /// A watcher's reaction callback failed.
    #[error("callback for watcher \"{expression}\": {source}")]
    Callback {
        expression: String,
        #[source]
        source: DynError,
    },

    /// A watcher re-queued itself past the per-flush run limit.
    ///
    /// The scheduler stops running the watcher and keeps flushing the rest of
    /// the queue, so an update cycle is bounded instead of hanging the
    /// process.
    #[error(
        "you may have an infinite update loop in watcher with expression \"{expression}\""
    )]
    CircularUpdate { expression: String },

    /// A deferred callback failed during a tick flush.
    #[error("nextTick: {source}")]
    Tick {
        #[source]
        source: DynError,
    },

    /// A watch path could not be parsed into dot-delimited segments.
    #[error(
        "failed watching path: \"{path}\" — only simple dot-delimited paths are supported; \
         use a getter function for full control"
    )]
    BadPath { path: String },
}

impl CoreError {
    /// Whether the error originated from user-registered code (and was
    /// therefore already reported through an error sink).
    pub fn is_user(&self) -> bool {
        matches!(self, CoreError::Evaluation { .. } | CoreError::Callback { .. })
    }
}

/// Report an error that has no live owner to route it to.
///
/// Used by the tick queue, where deferred callbacks may outlive the component
/// that scheduled them.
pub(crate) fn report_unhandled(err: &CoreError) {
    tracing::error!(error = %err, "unhandled error in reactive core");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluation_error_names_the_expression() {
        let err = CoreError::Evaluation {
            expression: "a.b".to_owned(),
            source: "boom".into(),
        };
        let text = err.to_string();
        assert!(text.contains("getter for watcher \"a.b\""));
        assert!(text.contains("boom"));
        assert!(err.is_user());
    }

    #[test]
    fn circular_update_is_not_a_user_error() {
        let err = CoreError::CircularUpdate {
            expression: "count".to_owned(),
        };
        assert!(!err.is_user());
        assert!(err.to_string().contains("infinite update loop"));
    }
}
