//! Error Types
//!
//! Two families: structural errors (`TreeError`) for malformed input to the
//! tree APIs, and render errors (`RenderError`) recovered through the
//! widget error-hook chain.

use std::sync::Arc;

/// Malformed input to the tree construction or reconciliation APIs.
///
/// These indicate programmer errors in the calling code; callers are not
/// expected to recover beyond reporting them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TreeError {
    /// The children argument to a container was not a sequence.
    #[error("children must be a sequence")]
    InvalidChildren,

    /// A child value that cannot be rendered as a node.
    #[error("invalid child value: {0}")]
    InvalidChild(&'static str),

    /// A props argument that is not a record.
    #[error("props must be a record of scalar attributes")]
    InvalidProps,

    /// The two nodes handed to `patch` cannot be reconciled.
    #[error("invalid patch target: {0}")]
    InvalidPatchTarget(&'static str),

    /// A child operation on a node kind that holds no children.
    #[error("node is not a container")]
    NotAContainer,
}

/// A failure raised while building or rendering a widget subtree.
///
/// Routed through the error-hook chain; if no hook claims it the failure is
/// logged and the subtree degrades to a comment placeholder.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct RenderError {
    message: Arc<str>,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Arc::from(message.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<TreeError> for RenderError {
    fn from(error: TreeError) -> Self {
        Self::new(error.to_string())
    }
}

/// Context handed to error hooks alongside the error itself.
#[derive(Debug, Clone, Default)]
pub struct ErrorInfo {
    /// Name of the widget whose render failed, when known.
    pub widget: Option<Arc<str>>,

    /// The lifecycle phase that raised the error ("render", "setup", ...).
    pub phase: &'static str,
}
