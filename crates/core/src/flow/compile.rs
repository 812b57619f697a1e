//! Compiles a composable scenario expression into a flat [`Graph`].
//!
//! Compilation is a depth-first expansion with an accumulating id path: each
//! combinator pushes a namespace component (`chain/0/`, `rep/2/`,
//! `union/vague/`), recurses, and pops. Ids and edges are a pure function of
//! the expression tree, so compiling the same expression twice yields
//! byte-identical graphs — required because the ids are what conversations
//! persist as their position.

use super::segment::{Segment, SegmentState, Tag};
use super::{
    AgentNode, CheckDef, CheckId, FeedbackNode, Graph, Instruction, Node, NodeId, NodeKind,
    NodeRef, UserNode, UserOption,
};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// A composable scenario expression. Leaves are hand-authored [`Segment`]s;
/// the combinators splice, unroll, fan out and decorate them.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    Segment(Segment),
    /// Run each part to its `done`, then the next one.
    Chain(Vec<Flow>),
    /// Unroll the inner part a fixed number of times, chained tail-to-head.
    Repeat(Box<Flow>, usize),
    /// Branch between the alternatives and the base; the choice of branch is
    /// made at runtime, never at compile time.
    Union { alternatives: Vec<Flow>, base: Box<Flow> },
    /// Structurally identical to the inner part, with the extra text
    /// appended to every agent instruction it produces.
    WithContext { inner: Box<Flow>, context: String },
}

impl Flow {
    pub fn chain(parts: Vec<Flow>) -> Self {
        Flow::Chain(parts)
    }

    pub fn repeat(inner: Flow, times: usize) -> Self {
        Flow::Repeat(Box::new(inner), times)
    }

    pub fn union(alternatives: Vec<Flow>, base: Flow) -> Self {
        Flow::Union {
            alternatives,
            base: Box::new(base),
        }
    }

    pub fn with_context(inner: Flow, context: impl Into<String>) -> Self {
        Flow::WithContext {
            inner: Box::new(inner),
            context: context.into(),
        }
    }
}

impl From<Segment> for Flow {
    fn from(segment: Segment) -> Self {
        Flow::Segment(segment)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("segment '{segment}' declares tag '{tag}' more than once")]
    DuplicateTag { segment: String, tag: String },
    #[error("segment '{segment}' references unknown tag '{tag}'")]
    UnknownTag { segment: String, tag: String },
    #[error("segment '{segment}' references unknown check '{check}'")]
    UnknownCheck { segment: String, check: String },
    #[error("check id '{0}' is defined more than once")]
    DuplicateCheck(String),
    #[error("node id '{0}' is generated twice; rename a segment or union branch")]
    DuplicateId(NodeId),
    #[error("union branch '{0}' compiles to nothing")]
    EmptyUnionBranch(String),
    #[error("union branches must all open with the same turn kind")]
    MixedUnionEntries,
    #[error("union branches must open with a user or agent turn, not feedback")]
    FeedbackUnionEntry,
    #[error("union branch '{0}' loops back into its own first state")]
    UnionEntryReentered(String),
    #[error("reference from '{from}' to '{to}' does not resolve")]
    Dangling { from: NodeId, to: NodeId },
    #[error("compiled graph contains a cycle through node '{0}'")]
    Cycle(NodeId),
    #[error("internal compiler invariant violated: {0}")]
    Internal(String),
}

/// Compile a scenario expression and its check table into a closed graph.
pub fn compile(flow: &Flow, checks: Vec<(CheckId, CheckDef)>) -> Result<Graph, CompileError> {
    let mut table = BTreeMap::new();
    for (id, def) in checks {
        if table.insert(id.clone(), def).is_some() {
            return Err(CompileError::DuplicateCheck(id));
        }
    }

    let mut emitter = Emitter {
        nodes: BTreeMap::new(),
        check_ids: table.keys().cloned().collect(),
    };
    let mut context = Vec::new();
    let part = emitter.emit(flow, "", &mut context)?;
    // Exits that survive to the top level stay `None` and mark the points
    // where the scenario is structurally exhausted.
    let graph = Graph {
        nodes: emitter.nodes,
        checks: table,
        entry: part.entry,
    };
    validate(&graph)?;
    Ok(graph)
}

/// A dangling `done` exit of an already-emitted node, waiting to be rewired
/// to the entry of whatever comes next.
#[derive(Debug, Clone)]
enum ExitSlot {
    Agent(NodeId),
    Option(NodeId, usize),
    Feedback(NodeId),
}

/// Result of emitting one sub-expression: its entry (if it produced any
/// nodes at all) and its still-open exits.
struct Part {
    entry: Option<NodeRef>,
    exits: Vec<ExitSlot>,
}

struct Emitter {
    nodes: BTreeMap<NodeId, Node>,
    check_ids: BTreeSet<CheckId>,
}

impl Emitter {
    fn emit(
        &mut self,
        flow: &Flow,
        prefix: &str,
        context: &mut Vec<String>,
    ) -> Result<Part, CompileError> {
        match flow {
            Flow::Segment(segment) => self.emit_segment(segment, prefix, context),
            Flow::Chain(parts) => {
                let mut emitted = Vec::with_capacity(parts.len());
                for (index, part) in parts.iter().enumerate() {
                    let child_prefix = format!("{prefix}chain/{index}/");
                    emitted.push(self.emit(part, &child_prefix, context)?);
                }
                self.link(emitted)
            }
            Flow::Repeat(inner, times) => {
                let mut emitted = Vec::with_capacity(*times);
                for index in 0..*times {
                    let child_prefix = format!("{prefix}rep/{index}/");
                    emitted.push(self.emit(inner, &child_prefix, context)?);
                }
                self.link(emitted)
            }
            Flow::Union { alternatives, base } => {
                self.emit_union(alternatives, base, prefix, context)
            }
            Flow::WithContext { inner, context: extra } => {
                context.push(extra.clone());
                let part = self.emit(inner, prefix, context);
                context.pop();
                part
            }
        }
    }

    fn emit_segment(
        &mut self,
        segment: &Segment,
        prefix: &str,
        context: &[String],
    ) -> Result<Part, CompileError> {
        let name = segment.name();
        let mut kinds: BTreeMap<Tag, NodeKind> = BTreeMap::new();
        for (tag, state) in segment.states() {
            let kind = match state {
                SegmentState::Agent { .. } => NodeKind::Agent,
                SegmentState::User { .. } => NodeKind::User,
                SegmentState::Feedback { .. } => NodeKind::Feedback,
            };
            if kinds.insert(*tag, kind).is_some() {
                return Err(CompileError::DuplicateTag {
                    segment: name.to_string(),
                    tag: tag.to_string(),
                });
            }
        }

        let node_id = |tag: Tag| format!("{prefix}{name}/{tag}");
        let resolve = |tag: &Option<Tag>| -> Result<Option<NodeRef>, CompileError> {
            match tag {
                None => Ok(None),
                Some(tag) => kinds
                    .get(tag)
                    .map(|kind| Some(NodeRef::new(*kind, node_id(*tag))))
                    .ok_or_else(|| CompileError::UnknownTag {
                        segment: name.to_string(),
                        tag: tag.to_string(),
                    }),
            }
        };

        let mut exits = Vec::new();
        for (tag, state) in segment.states() {
            let id = node_id(*tag);
            let node = match state {
                SegmentState::Agent { instruction, next } => {
                    let next = resolve(next)?;
                    if next.is_none() {
                        exits.push(ExitSlot::Agent(id.clone()));
                    }
                    Node::Agent(AgentNode {
                        id: id.clone(),
                        instruction: contextualize(instruction, context),
                        next,
                    })
                }
                SegmentState::User { options, allow_custom } => {
                    let mut compiled = Vec::with_capacity(options.len());
                    for (index, option) in options.iter().enumerate() {
                        for check in &option.checks {
                            if !self.check_ids.contains(check) {
                                return Err(CompileError::UnknownCheck {
                                    segment: name.to_string(),
                                    check: check.clone(),
                                });
                            }
                        }
                        let next = resolve(&option.next)?;
                        if next.is_none() {
                            exits.push(ExitSlot::Option(id.clone(), index));
                        }
                        compiled.push(UserOption {
                            instruction: option.instruction.clone(),
                            checks: option.checks.clone(),
                            next,
                        });
                    }
                    Node::User(UserNode {
                        id: id.clone(),
                        options: compiled,
                        allow_custom: *allow_custom,
                        auto_select: false,
                    })
                }
                SegmentState::Feedback { prompt, follow_up, next } => {
                    let next = resolve(next)?;
                    if next.is_none() {
                        exits.push(ExitSlot::Feedback(id.clone()));
                    }
                    Node::Feedback(FeedbackNode {
                        id: id.clone(),
                        prompt: prompt.clone(),
                        follow_up: follow_up.clone(),
                        next,
                    })
                }
            };
            if self.nodes.insert(id.clone(), node).is_some() {
                return Err(CompileError::DuplicateId(id));
            }
        }

        let entry = resolve(&Some(segment.init()))?;
        if entry.is_none() {
            return Err(CompileError::UnknownTag {
                segment: name.to_string(),
                tag: segment.init().to_string(),
            });
        }
        Ok(Part { entry, exits })
    }

    /// Splice a sequence of parts: every open exit of one part is rewired to
    /// the entry of the next part that produced any nodes.
    fn link(&mut self, parts: Vec<Part>) -> Result<Part, CompileError> {
        let mut entry: Option<NodeRef> = None;
        let mut pending: Vec<ExitSlot> = Vec::new();
        for part in parts {
            let Some(part_entry) = part.entry else {
                continue;
            };
            if entry.is_none() {
                entry = Some(part_entry.clone());
            }
            for slot in pending.drain(..) {
                self.patch(slot, &part_entry)?;
            }
            pending = part.exits;
        }
        Ok(Part { entry, exits: pending })
    }

    fn emit_union(
        &mut self,
        alternatives: &[Flow],
        base: &Flow,
        prefix: &str,
        context: &mut Vec<String>,
    ) -> Result<Part, CompileError> {
        let mut branches = Vec::with_capacity(alternatives.len() + 1);
        for (index, alternative) in alternatives.iter().enumerate() {
            let label = branch_label(index, alternative);
            let branch_prefix = format!("{prefix}union/{label}/");
            let part = self.emit(alternative, &branch_prefix, context)?;
            branches.push((label, part));
        }
        let base_prefix = format!("{prefix}union/base/");
        let base_part = self.emit(base, &base_prefix, context)?;
        branches.push(("base".to_string(), base_part));

        let mut entries = Vec::with_capacity(branches.len());
        for (label, part) in &branches {
            match &part.entry {
                Some(entry) => entries.push(entry.clone()),
                None => return Err(CompileError::EmptyUnionBranch(label.clone())),
            }
        }

        let choice_id = format!("{prefix}union/choice");
        if entries.iter().all(|e| e.kind == NodeKind::User) {
            self.merge_user_union(choice_id, branches)
        } else if entries.iter().all(|e| e.kind == NodeKind::Agent) {
            self.fan_out_union(choice_id, branches)
        } else if entries.iter().any(|e| e.kind == NodeKind::Feedback) {
            Err(CompileError::FeedbackUnionEntry)
        } else {
            Err(CompileError::MixedUnionEntries)
        }
    }

    /// All branches open with a user turn: inline each branch's first
    /// option(s) into a single merged choice node at the union's entry.
    fn merge_user_union(
        &mut self,
        choice_id: NodeId,
        branches: Vec<(String, Part)>,
    ) -> Result<Part, CompileError> {
        let mut options = Vec::new();
        let mut allow_custom = false;
        let mut exits = Vec::new();
        for (label, part) in branches {
            let entry = part
                .entry
                .ok_or_else(|| CompileError::Internal("union branch lost its entry".into()))?;
            let removed = self
                .nodes
                .remove(&entry.id)
                .ok_or_else(|| CompileError::Internal(format!("missing union entry '{}'", entry.id)))?;
            let Node::User(user) = removed else {
                return Err(CompileError::Internal(format!(
                    "union entry '{}' is not a user node",
                    entry.id
                )));
            };
            if self.is_referenced(&entry.id) {
                return Err(CompileError::UnionEntryReentered(label));
            }
            let offset = options.len();
            allow_custom |= user.allow_custom;
            options.extend(user.options);
            for slot in part.exits {
                match slot {
                    ExitSlot::Option(id, index) if id == entry.id => {
                        exits.push(ExitSlot::Option(choice_id.clone(), offset + index));
                    }
                    other => exits.push(other),
                }
            }
        }
        let node = Node::User(UserNode {
            id: choice_id.clone(),
            options,
            allow_custom,
            auto_select: false,
        });
        if self.nodes.insert(choice_id.clone(), node).is_some() {
            return Err(CompileError::DuplicateId(choice_id));
        }
        Ok(Part {
            entry: Some(NodeRef::new(NodeKind::User, choice_id)),
            exits,
        })
    }

    /// All branches open with an agent turn: the choice is the system's, so
    /// the entry is an auto-selected node the interpreter resolves with a
    /// uniform draw recorded into the transcript.
    fn fan_out_union(
        &mut self,
        choice_id: NodeId,
        branches: Vec<(String, Part)>,
    ) -> Result<Part, CompileError> {
        let mut options = Vec::new();
        let mut exits = Vec::new();
        for (_, part) in branches {
            let entry = part
                .entry
                .ok_or_else(|| CompileError::Internal("union branch lost its entry".into()))?;
            options.push(UserOption {
                instruction: Instruction::default(),
                checks: Vec::new(),
                next: Some(entry),
            });
            exits.extend(part.exits);
        }
        let node = Node::User(UserNode {
            id: choice_id.clone(),
            options,
            allow_custom: false,
            auto_select: true,
        });
        if self.nodes.insert(choice_id.clone(), node).is_some() {
            return Err(CompileError::DuplicateId(choice_id));
        }
        Ok(Part {
            entry: Some(NodeRef::new(NodeKind::User, choice_id)),
            exits,
        })
    }

    fn patch(&mut self, slot: ExitSlot, target: &NodeRef) -> Result<(), CompileError> {
        let missing = |id: &NodeId| CompileError::Internal(format!("exit slot on missing node '{id}'"));
        match slot {
            ExitSlot::Agent(id) => match self.nodes.get_mut(&id) {
                Some(Node::Agent(node)) => node.next = Some(target.clone()),
                _ => return Err(missing(&id)),
            },
            ExitSlot::Option(id, index) => match self.nodes.get_mut(&id) {
                Some(Node::User(node)) => match node.options.get_mut(index) {
                    Some(option) => option.next = Some(target.clone()),
                    None => return Err(missing(&id)),
                },
                _ => return Err(missing(&id)),
            },
            ExitSlot::Feedback(id) => match self.nodes.get_mut(&id) {
                Some(Node::Feedback(node)) => node.next = Some(target.clone()),
                _ => return Err(missing(&id)),
            },
        }
        Ok(())
    }

    fn is_referenced(&self, id: &NodeId) -> bool {
        self.nodes.values().any(|node| {
            successors(node)
                .into_iter()
                .any(|reference| &reference.id == id)
        })
    }
}

fn branch_label(index: usize, flow: &Flow) -> String {
    match flow {
        Flow::Segment(segment) => segment.name().to_string(),
        Flow::WithContext { inner, .. } => branch_label(index, inner),
        _ => format!("alt{index}"),
    }
}

fn contextualize(instruction: &Instruction, context: &[String]) -> Instruction {
    let mut out = instruction.clone();
    // Innermost overlay first, matching the order the decorators were applied.
    for extra in context.iter().rev() {
        out.description.push(' ');
        out.description.push_str(extra);
    }
    out
}

fn successors(node: &Node) -> Vec<&NodeRef> {
    match node {
        Node::Agent(n) => n.next.iter().collect(),
        Node::User(n) => n.options.iter().filter_map(|o| o.next.as_ref()).collect(),
        Node::Feedback(n) => n.next.iter().collect(),
    }
}

/// Closed-graph and acyclicity validation over the finished node mapping.
fn validate(graph: &Graph) -> Result<(), CompileError> {
    if let Some(entry) = &graph.entry {
        if graph.resolve(entry).is_err() {
            return Err(CompileError::Dangling {
                from: "<entry>".into(),
                to: entry.id.clone(),
            });
        }
    }
    for node in graph.nodes.values() {
        for reference in successors(node) {
            if graph.resolve(reference).is_err() {
                return Err(CompileError::Dangling {
                    from: node.id().clone(),
                    to: reference.id.clone(),
                });
            }
        }
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Open,
        Done,
    }
    fn visit(
        graph: &Graph,
        id: &NodeId,
        marks: &mut BTreeMap<NodeId, Mark>,
    ) -> Result<(), CompileError> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Open) => return Err(CompileError::Cycle(id.clone())),
            None => {}
        }
        marks.insert(id.clone(), Mark::Open);
        if let Some(node) = graph.nodes.get(id) {
            for reference in successors(node) {
                visit(graph, &reference.id, marks)?;
            }
        }
        marks.insert(id.clone(), Mark::Done);
        Ok(())
    }
    let mut marks = BTreeMap::new();
    for id in graph.nodes.keys() {
        visit(graph, id, &mut marks)?;
    }
    Ok(())
}
