//! Error type shared by every module of the crate.

use std::fmt;

use crate::dom::NodeId;

/// Result alias used throughout liveui.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while rendering.
///
/// `ContractViolation` is raised at setup time. `ShapeMismatch` and
/// `StructuralMismatch` are raised at recompute time and leave the previous
/// output in place. The remaining variants come from the document, selector
/// and markup substrate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("a render function can't change from returning {previous} to returning {next}")]
    ShapeMismatch { previous: Shape, next: Shape },

    #[error("the top-level node type can't change when a node is re-rendered (changed from {previous} to {next})")]
    StructuralMismatch {
        previous: NodeSignature,
        next: NodeSignature,
    },

    #[error("invalid selector {selector:?}: {reason}")]
    Selector { selector: String, reason: String },

    #[error("markup error at byte {offset}: {reason}")]
    Markup { offset: usize, reason: String },

    #[error("hierarchy request error: {0}")]
    Hierarchy(String),

    #[error("{child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("index {index} out of bounds for a container with {len} children")]
    IndexOutOfBounds { index: usize, len: usize },
}

impl Error {
    pub(crate) fn contract(message: impl Into<String>) -> Self {
        Self::ContractViolation(message.into())
    }

    /// True for the errors that signal a render function changed its output shape.
    pub fn is_shape_error(&self) -> bool {
        matches!(
            self,
            Self::ShapeMismatch { .. } | Self::StructuralMismatch { .. }
        )
    }
}

// =============================================================================
// Shape descriptions
// =============================================================================

/// Coarse shape of a render output: one node, or a fixed-length sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Single,
    Sequence(usize),
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => f.write_str("a single node"),
            Self::Sequence(1) => f.write_str("a sequence of 1 node"),
            Self::Sequence(len) => write!(f, "a sequence of {len} nodes"),
        }
    }
}

/// Kind and tag of one node, as compared across re-renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSignature {
    pub kind: crate::dom::NodeKind,
    pub tag: Option<String>,
}

impl fmt::Display for NodeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "<{tag}>"),
            None => write!(f, "{} node", self.kind),
        }
    }
}
