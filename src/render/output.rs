//! Render output - One node or a fixed-length sequence of nodes.

use crate::dom::{Document, NodeId};
use crate::error::{Error, Result, Shape};

/// What a render function produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Output {
    Single(NodeId),
    Sequence(Vec<NodeId>),
}

impl Output {
    pub fn shape(&self) -> Shape {
        match self {
            Self::Single(_) => Shape::Single,
            Self::Sequence(nodes) => Shape::Sequence(nodes.len()),
        }
    }

    /// The output nodes in order.
    pub fn nodes(&self) -> &[NodeId] {
        match self {
            Self::Single(node) => std::slice::from_ref(node),
            Self::Sequence(nodes) => nodes,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes().is_empty()
    }

    /// The node of a `Single` output, or of a one-node sequence.
    pub fn single(&self) -> Option<NodeId> {
        match self.nodes() {
            [node] => Some(*node),
            _ => None,
        }
    }
}

/// Conversion of render function results into an [`Output`].
pub trait IntoOutput {
    fn into_output(self) -> Output;
}

impl IntoOutput for Output {
    fn into_output(self) -> Output {
        self
    }
}

impl IntoOutput for NodeId {
    fn into_output(self) -> Output {
        Output::Single(self)
    }
}

impl IntoOutput for Vec<NodeId> {
    fn into_output(self) -> Output {
        Output::Sequence(self)
    }
}

impl From<NodeId> for Output {
    fn from(node: NodeId) -> Self {
        Output::Single(node)
    }
}

impl From<Vec<NodeId>> for Output {
    fn from(nodes: Vec<NodeId>) -> Self {
        Output::Sequence(nodes)
    }
}

/// Verify that `next` can be patched onto `previous` pair by pair.
///
/// Checks single vs. sequence and length first, then the kind and tag of
/// every pair. Nothing is mutated, so a failure leaves `previous` intact.
pub fn check_shape(doc: &Document, previous: &Output, next: &Output) -> Result<()> {
    if previous.shape() != next.shape() {
        return Err(Error::ShapeMismatch {
            previous: previous.shape(),
            next: next.shape(),
        });
    }
    for (&old, &new) in previous.nodes().iter().zip(next.nodes()) {
        let (old_sig, new_sig) = (doc.signature(old), doc.signature(new));
        if old_sig != new_sig {
            return Err(Error::StructuralMismatch {
                previous: old_sig,
                next: new_sig,
            });
        }
    }
    Ok(())
}
