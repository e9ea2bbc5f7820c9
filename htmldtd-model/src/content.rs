//! Content models.
//!
//! A content model is the restricted-BNF expression describing the legal
//! children of an element. Models are immutable after construction and are
//! stored as an arena of nodes addressed by index; child and sibling
//! relationships are indices, not owning references, so traversal is O(1)
//! and there are no ownership cycles.

use crate::ElementIdx;
use fnv::FnvHashSet;

/// Index of a node within one `ContentModel`'s arena.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Process-unique identity of a content model, assigned when the owning
/// element is defined. Engine memo tables key on it.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub struct ModelId(pub u32);

/// Operator of a content-model node.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ModelOp {
    /// Matches exactly one occurrence of the element.
    Leaf(ElementIdx),
    /// `*` zero or more of the child
    ZeroOrMore,
    /// `?` at most one of the child
    Optional,
    /// `+` one or more of the child
    OneOrMore,
    /// `,` the children in order
    Sequence,
    /// `|` exactly one of the children
    Choice,
    /// `&` all of the children, in any order
    All,
}

impl ModelOp {
    /// The binary format's tag byte for this operator.
    pub fn code(self) -> u8 {
        match self {
            ModelOp::Leaf(_) => 1,
            ModelOp::ZeroOrMore => 2,
            ModelOp::Optional => 3,
            ModelOp::OneOrMore => 4,
            ModelOp::Sequence => 5,
            ModelOp::Choice => 6,
            ModelOp::All => 7,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ModelNode {
    pub op: ModelOp,
    /// First child, for operator nodes.
    pub child: Option<NodeId>,
    /// Next sibling within the enclosing group.
    pub next: Option<NodeId>,
}

#[derive(Clone, Debug)]
pub struct ContentModel {
    id: ModelId,
    nodes: Vec<ModelNode>,
    root: NodeId,
}

impl ContentModel {
    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &ModelNode {
        &self.nodes[id.as_usize()]
    }

    /// The children of a group node, in declaration order.
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            model: self,
            cursor: self.node(id).child,
        }
    }

    /// Every element wrapped by a leaf anywhere in the model, first
    /// occurrence order, deduplicated. Recovery uses this to enumerate
    /// candidate elements for implied insertion.
    pub fn leaf_elements(&self) -> Vec<ElementIdx> {
        let mut seen = FnvHashSet::default();
        let mut out = Vec::new();
        for node in &self.nodes {
            if let ModelOp::Leaf(e) = node.op {
                if seen.insert(e) {
                    out.push(e);
                }
            }
        }
        out
    }

    pub(crate) fn set_id(&mut self, id: ModelId) {
        self.id = id;
    }
}

pub struct Children<'a> {
    model: &'a ContentModel,
    cursor: Option<NodeId>,
}

impl<'a> Iterator for Children<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let id = self.cursor?;
        self.cursor = self.model.node(id).next;
        Some(id)
    }
}

/// Builds one content model bottom-up. Nodes are created unlinked; the
/// group constructors wire sibling links.
#[derive(Default)]
pub struct ContentModelBuilder {
    nodes: Vec<ModelNode>,
}

impl ContentModelBuilder {
    pub fn new() -> ContentModelBuilder {
        ContentModelBuilder::default()
    }

    fn push(&mut self, op: ModelOp, child: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(ModelNode {
            op,
            child,
            next: None,
        });
        id
    }

    pub fn leaf(&mut self, elem: ElementIdx) -> NodeId {
        self.push(ModelOp::Leaf(elem), None)
    }

    pub fn star(&mut self, child: NodeId) -> NodeId {
        self.push(ModelOp::ZeroOrMore, Some(child))
    }

    pub fn opt(&mut self, child: NodeId) -> NodeId {
        self.push(ModelOp::Optional, Some(child))
    }

    pub fn plus(&mut self, child: NodeId) -> NodeId {
        self.push(ModelOp::OneOrMore, Some(child))
    }

    pub fn seq(&mut self, children: &[NodeId]) -> NodeId {
        self.group(ModelOp::Sequence, children)
    }

    pub fn choice(&mut self, children: &[NodeId]) -> NodeId {
        self.group(ModelOp::Choice, children)
    }

    pub fn all(&mut self, children: &[NodeId]) -> NodeId {
        self.group(ModelOp::All, children)
    }

    fn group(&mut self, op: ModelOp, children: &[NodeId]) -> NodeId {
        assert!(!children.is_empty(), "group node needs at least one child");
        for pair in children.windows(2) {
            self.nodes[pair[0].as_usize()].next = Some(pair[1]);
        }
        self.push(op, Some(children[0]))
    }

    /// Finish the model. The model id is stamped by the grammar when the
    /// owning element is defined.
    pub fn build(self, root: NodeId) -> ContentModel {
        ContentModel {
            id: ModelId(0),
            nodes: self.nodes,
            root,
        }
    }
}
