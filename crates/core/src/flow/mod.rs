//! Typed nodes of a compiled conversation graph.
//!
//! A [`Graph`] is produced once per scenario definition by [`compile`] and is
//! immutable afterwards, so it can be shared freely across concurrently
//! interpreted conversations. Nodes carry no behavior; the interpreter reads
//! them and decides what happens next.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub mod compile;
pub mod segment;

pub use compile::{CompileError, Flow, compile};
pub use segment::{Segment, SegmentOption, SegmentState};

/// Path-shaped identifier derived from a node's position in the scenario
/// expression. Stable across recompilations of the same expression.
pub type NodeId = String;

/// Name of a check in the graph's check table.
pub type CheckId = String;

/// The three turn kinds a conversation can sit at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Agent,
    User,
    Feedback,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Agent => write!(f, "agent"),
            NodeKind::User => write!(f, "user"),
            NodeKind::Feedback => write!(f, "feedback"),
        }
    }
}

/// Reference to one node in a compiled graph. This is the only position
/// information persisted between turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub kind: NodeKind,
    pub id: NodeId,
}

impl NodeRef {
    pub fn new(kind: NodeKind, id: impl Into<NodeId>) -> Self {
        Self { kind, id: id.into() }
    }
}

/// One worked example attached to an instruction, handed to the message
/// generator verbatim: the prior turns leading up to the exemplified reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub prior: Vec<String>,
    pub reply: String,
}

/// Opaque directive for the message generator. The engine never interprets
/// the text; it only threads it through to the collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Instruction {
    pub description: String,
    pub examples: Vec<Example>,
}

impl Instruction {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            examples: Vec::new(),
        }
    }

    /// Attach a few-shot example: the turns leading up to it, then the reply.
    pub fn example(mut self, prior: &[&str], reply: &str) -> Self {
        self.examples.push(Example {
            prior: prior.iter().map(|s| s.to_string()).collect(),
            reply: reply.to_string(),
        });
        self
    }
}

/// Scripted turn spoken by the simulated agent. Exactly one outgoing edge;
/// `None` marks the end of the compiled scenario.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentNode {
    pub id: NodeId,
    pub instruction: Instruction,
    pub next: Option<NodeRef>,
}

/// One selectable reply on a user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct UserOption {
    pub instruction: Instruction,
    pub checks: Vec<CheckId>,
    pub next: Option<NodeRef>,
}

/// A turn where the user picks one of several candidate replies.
#[derive(Debug, Clone, PartialEq)]
pub struct UserNode {
    pub id: NodeId,
    pub options: Vec<UserOption>,
    /// Free-typed replies are accepted alongside the offered options.
    pub allow_custom: bool,
    /// The option is drawn uniformly at random by the interpreter instead of
    /// being offered; used for fan-outs where the system picks the branch.
    pub auto_select: bool,
}

/// Scripted corrective-feedback point in the flow. A non-`None` follow-up
/// requires one clarifying user message before `next` is reached.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackNode {
    pub id: NodeId,
    pub prompt: String,
    pub follow_up: Option<Instruction>,
    pub next: Option<NodeRef>,
}

/// Closed set of node variants, matched exhaustively everywhere.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Agent(AgentNode),
    User(UserNode),
    Feedback(FeedbackNode),
}

impl Node {
    pub fn id(&self) -> &NodeId {
        match self {
            Node::Agent(n) => &n.id,
            Node::User(n) => &n.id,
            Node::Feedback(n) => &n.id,
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Node::Agent(_) => NodeKind::Agent,
            Node::User(_) => NodeKind::User,
            Node::Feedback(_) => NodeKind::Feedback,
        }
    }

    pub fn node_ref(&self) -> NodeRef {
        NodeRef::new(self.kind(), self.id().clone())
    }
}

/// Definition of a named check: the criterion handed to the check
/// collaborator, and the prompt/follow-up used when the check fails.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckDef {
    pub criterion: String,
    pub prompt: String,
    pub follow_up: Option<Instruction>,
}

/// A reference that does not resolve in the compiled graph. This is a
/// compiler bug surfacing at runtime and is treated as fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokenReference {
    #[error("no {kind} node with id '{id}' in the compiled graph")]
    Node { kind: NodeKind, id: NodeId },
    #[error("no check with id '{id}' in the compiled graph")]
    Check { id: CheckId },
}

/// Immutable compiled scenario: the node mapping, the check table and the
/// single entry point.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    pub(crate) nodes: BTreeMap<NodeId, Node>,
    pub(crate) checks: BTreeMap<CheckId, CheckDef>,
    pub(crate) entry: Option<NodeRef>,
}

impl Graph {
    /// The node a fresh conversation starts at. `None` only for a scenario
    /// that compiles to nothing (for example `Repeat(_, 0)`).
    pub fn entry(&self) -> Option<&NodeRef> {
        self.entry.as_ref()
    }

    /// Look a reference up, verifying that the node kind matches.
    pub fn resolve(&self, reference: &NodeRef) -> Result<&Node, BrokenReference> {
        match self.nodes.get(&reference.id) {
            Some(node) if node.kind() == reference.kind => Ok(node),
            _ => Err(BrokenReference::Node {
                kind: reference.kind,
                id: reference.id.clone(),
            }),
        }
    }

    /// Look a check id up in the check table.
    pub fn check(&self, id: &str) -> Result<&CheckDef, BrokenReference> {
        self.checks.get(id).ok_or_else(|| BrokenReference::Check { id: id.to_string() })
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_node_graph() -> Graph {
        let node = Node::Agent(AgentNode {
            id: "intro/greet".into(),
            instruction: Instruction::new("I will greet the other person."),
            next: None,
        });
        let mut nodes = BTreeMap::new();
        nodes.insert(node.id().clone(), node.clone());
        Graph {
            nodes,
            checks: BTreeMap::new(),
            entry: Some(node.node_ref()),
        }
    }

    #[test]
    fn resolve_finds_matching_kind() {
        let graph = single_node_graph();
        let reference = NodeRef::new(NodeKind::Agent, "intro/greet");
        let node = graph.resolve(&reference).unwrap();
        assert_eq!(node.id(), "intro/greet");
    }

    #[test]
    fn resolve_rejects_kind_mismatch() {
        let graph = single_node_graph();
        let reference = NodeRef::new(NodeKind::User, "intro/greet");
        let err = graph.resolve(&reference).unwrap_err();
        assert_eq!(
            err,
            BrokenReference::Node {
                kind: NodeKind::User,
                id: "intro/greet".into()
            }
        );
    }

    #[test]
    fn resolve_rejects_unknown_id() {
        let graph = single_node_graph();
        let reference = NodeRef::new(NodeKind::Agent, "missing");
        assert!(graph.resolve(&reference).is_err());
    }

    #[test]
    fn unknown_check_is_a_broken_reference() {
        let graph = single_node_graph();
        assert_eq!(
            graph.check("vague").unwrap_err(),
            BrokenReference::Check { id: "vague".into() }
        );
    }
}
