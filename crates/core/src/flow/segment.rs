//! The hand-authored unit the combinators compose: a small local state
//! machine with an enumerated set of tags, an init tag, and one agent, user
//! or feedback body per tag. A `None` successor means the segment is done
//! and control passes to whatever follows it in the surrounding expression.

use super::Instruction;

/// Local state tag inside one segment. Tags only need to be unique within
/// their segment; the compiler namespaces them globally.
pub type Tag = &'static str;

/// One selectable reply authored on a user state.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentOption {
    pub instruction: Instruction,
    pub checks: Vec<String>,
    pub next: Option<Tag>,
}

impl SegmentOption {
    pub fn new(instruction: Instruction) -> Self {
        Self {
            instruction,
            checks: Vec::new(),
            next: None,
        }
    }

    /// Evaluate the named check against the reply once it is sent.
    pub fn check(mut self, id: &str) -> Self {
        self.checks.push(id.to_string());
        self
    }

    /// Continue at the given tag instead of ending the segment.
    pub fn then(mut self, tag: Tag) -> Self {
        self.next = Some(tag);
        self
    }
}

/// Body of one local state.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentState {
    Agent {
        instruction: Instruction,
        next: Option<Tag>,
    },
    User {
        options: Vec<SegmentOption>,
        allow_custom: bool,
    },
    Feedback {
        prompt: String,
        follow_up: Option<Instruction>,
        next: Option<Tag>,
    },
}

/// A named local state machine. States are kept in declaration order so
/// compilation is a pure function of the definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    name: &'static str,
    init: Tag,
    states: Vec<(Tag, SegmentState)>,
}

impl Segment {
    pub fn new(name: &'static str, init: Tag) -> Self {
        Self {
            name,
            init,
            states: Vec::new(),
        }
    }

    pub fn agent(mut self, tag: Tag, instruction: Instruction, next: Option<Tag>) -> Self {
        self.states.push((tag, SegmentState::Agent { instruction, next }));
        self
    }

    pub fn user(mut self, tag: Tag, options: Vec<SegmentOption>) -> Self {
        self.states.push((
            tag,
            SegmentState::User {
                options,
                allow_custom: false,
            },
        ));
        self
    }

    /// A user state that also accepts free-typed replies.
    pub fn user_with_custom(mut self, tag: Tag, options: Vec<SegmentOption>) -> Self {
        self.states.push((
            tag,
            SegmentState::User {
                options,
                allow_custom: true,
            },
        ));
        self
    }

    pub fn feedback(
        mut self,
        tag: Tag,
        prompt: impl Into<String>,
        follow_up: Option<Instruction>,
        next: Option<Tag>,
    ) -> Self {
        self.states.push((
            tag,
            SegmentState::Feedback {
                prompt: prompt.into(),
                follow_up,
                next,
            },
        ));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn init(&self) -> Tag {
        self.init
    }

    pub fn states(&self) -> &[(Tag, SegmentState)] {
        &self.states
    }
}
