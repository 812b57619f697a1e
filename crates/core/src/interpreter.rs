//! Turn-by-turn interpreter over a compiled conversation graph.
//!
//! One call to [`Interpreter::step`] performs exactly one transition: it
//! validates the caller's action, runs whatever collaborator calls the
//! current node requires, appends a bounded number of transcript entries and
//! returns exactly one outward turn. The transition is all-or-nothing: if a
//! collaborator call fails, the conversation document and the user's
//! progress are left untouched and the step can be retried as a whole.
//!
//! The graph is read-only and shared; the conversation document belongs to
//! exactly one conversation and the caller is responsible for serializing
//! turns per conversation id.

use crate::checks::{CheckError, CheckEvaluator, CheckSpec};
use crate::flow::{
    BrokenReference, CheckId, Graph, Instruction, Node, NodeRef, UserNode,
};
use crate::generate::{GenerationError, MessageGenerator, Persona};
use crate::progression::{self, SentCounts, Stage};
use crate::scenario::Scenario;
use crate::transcript::{
    CheckFailure, Feedback, Message, OfferedOption, Transcript, TranscriptEntry, check_window,
};
use futures::future::try_join_all;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Where a conversation currently sits; the only flow state persisted
/// between turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Position {
    /// Waiting to produce the content at `at`.
    Active { at: NodeRef },
    /// Options were materialized and shown; waiting for the user's pick.
    AwaitingChoice {
        offered: Vec<OfferedOption>,
        allow_custom: bool,
    },
    /// A check failed; corrective feedback is due before `next`.
    PendingFeedback {
        failed: Vec<CheckFailure>,
        next: Option<NodeRef>,
    },
    /// The scenario is structurally exhausted.
    Completed,
}

/// The caller's action for one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    None,
    SelectIndex(usize),
    CustomText(String),
}

/// The single outward result of one step.
#[derive(Debug, Clone, PartialEq)]
pub enum Turn {
    Agent { text: String },
    Choices { options: Vec<String>, allow_custom: bool },
    Feedback { feedback: Feedback },
    Complete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub turn: Turn,
    pub max_unlocked_stage: Stage,
}

#[derive(Debug, Error)]
pub enum StepError {
    /// Index out of range, custom text where none is allowed, or an action
    /// supplied when none was expected. No state was changed.
    #[error("the supplied action is not valid at the current position")]
    InvalidSelection,
    /// The conversation's stage is beyond what the user has unlocked.
    #[error("stage '{0}' is not unlocked yet")]
    StageNotUnlocked(Stage),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Check(#[from] CheckError),
    /// Graph inconsistency; a compiler bug, not recoverable at runtime.
    #[error(transparent)]
    BrokenReference(#[from] BrokenReference),
}

/// One conversation document, owned by the caller's storage layer and
/// mutated exactly once per completed turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub stage: Stage,
    pub scenario: Scenario,
    pub user: Persona,
    pub agent: Persona,
    pub position: Position,
    pub transcript: Transcript,
}

/// Per-user progression state, shared across the user's conversations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProgress {
    pub sent_counts: SentCounts,
    pub max_unlocked_stage: Stage,
}

impl Default for UserProgress {
    fn default() -> Self {
        Self {
            sent_counts: SentCounts::new(),
            max_unlocked_stage: Stage::Level0,
        }
    }
}

/// Offer at most this many options per user turn.
const MAX_OFFERED_OPTIONS: usize = 3;

pub struct Interpreter {
    generator: Arc<dyn MessageGenerator>,
    checker: Arc<dyn CheckEvaluator>,
    rng: Mutex<StdRng>,
}

impl Interpreter {
    pub fn new(generator: Arc<dyn MessageGenerator>, checker: Arc<dyn CheckEvaluator>) -> Self {
        Self {
            generator,
            checker,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Interpreter with a fixed seed, for reproducible runs and tests.
    pub fn with_seed(
        generator: Arc<dyn MessageGenerator>,
        checker: Arc<dyn CheckEvaluator>,
        seed: u64,
    ) -> Self {
        Self {
            generator,
            checker,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Perform one transition. Exactly one [`Turn`] is produced; on error the
    /// conversation and progress are observably unchanged.
    pub async fn step(
        &self,
        graph: &Graph,
        conversation: &mut Conversation,
        progress: &mut UserProgress,
        action: UserAction,
    ) -> Result<StepOutcome, StepError> {
        if !progress.max_unlocked_stage.unlocks(conversation.stage) {
            return Err(StepError::StageNotUnlocked(conversation.stage));
        }

        let mut position = conversation.position.clone();
        let mut staged: Vec<TranscriptEntry> = Vec::new();
        let mut user_message_sent = false;

        // Resolve the caller's action first. Only a pending choice accepts
        // one; everywhere else the action must be the empty continue signal.
        match (&position, action) {
            (Position::AwaitingChoice { offered, allow_custom }, action) => {
                let picked = resolve_selection(offered, *allow_custom, action)?;
                staged.push(TranscriptEntry::MessageSent {
                    state: None,
                    message: Message {
                        sender: conversation.user.name.clone(),
                        text: picked.text.clone(),
                        user_sent: true,
                    },
                });
                user_message_sent = true;

                let failed = self
                    .evaluate_checks(graph, conversation, &staged, &picked.checks)
                    .await?;
                position = if failed.is_empty() {
                    advance(picked.next)
                } else {
                    debug!(checks = failed.len(), "user message failed checks");
                    Position::PendingFeedback { failed, next: picked.next }
                };
            }
            (_, UserAction::None) => {}
            (_, _) => return Err(StepError::InvalidSelection),
        }

        // Produce exactly one outward turn for the position we landed on.
        let turn = loop {
            match position.clone() {
                Position::Completed => break Turn::Complete,
                Position::AwaitingChoice { .. } => {
                    // A choice is already pending; the caller must select.
                    return Err(StepError::InvalidSelection);
                }
                Position::Active { at } => match graph.resolve(&at)? {
                    Node::Agent(node) => {
                        let history = history(&conversation.transcript, &staged);
                        let text = self
                            .generator
                            .generate(
                                &conversation.agent,
                                &conversation.scenario.agent_perspective,
                                &history,
                                &node.instruction,
                            )
                            .await?;
                        staged.push(TranscriptEntry::MessageSent {
                            state: Some(node.id.clone()),
                            message: Message {
                                sender: conversation.agent.name.clone(),
                                text: text.clone(),
                                user_sent: false,
                            },
                        });
                        position = advance(node.next.clone());
                        break Turn::Agent { text };
                    }
                    Node::User(node) if node.auto_select => {
                        // The system picks the branch: draw uniformly,
                        // record the draw, and keep going — no outward turn.
                        let index = self.rng.lock().await.random_range(0..node.options.len());
                        debug!(node = %node.id, index, "auto-selected union branch");
                        staged.push(TranscriptEntry::BranchChosen {
                            state: node.id.clone(),
                            index,
                        });
                        position = advance(node.options[index].next.clone());
                    }
                    Node::User(node) => {
                        let offered = self.offer_options(conversation, &mut staged, node).await?;
                        let options = offered.iter().map(|o| o.text.clone()).collect();
                        position = Position::AwaitingChoice {
                            offered,
                            allow_custom: node.allow_custom,
                        };
                        break Turn::Choices {
                            options,
                            allow_custom: node.allow_custom,
                        };
                    }
                    Node::Feedback(node) => {
                        let (next_position, turn) = self
                            .deliver_feedback(
                                conversation,
                                &mut staged,
                                Vec::new(),
                                vec![node.prompt.clone()],
                                node.follow_up.as_ref(),
                                node.next.clone(),
                            )
                            .await?;
                        position = next_position;
                        break turn;
                    }
                },
                Position::PendingFeedback { failed, next } => {
                    // The failed checks supply the prompt material and the
                    // follow-up in place of a scripted feedback node.
                    let mut prompts = Vec::with_capacity(failed.len());
                    let mut follow_up: Option<Instruction> = None;
                    for failure in &failed {
                        let def = graph.check(&failure.id)?;
                        prompts.push(format!("{} (observed: {})", def.prompt, failure.reason));
                        if follow_up.is_none() {
                            follow_up = def.follow_up.clone();
                        }
                    }
                    let (next_position, turn) = self
                        .deliver_feedback(
                            conversation,
                            &mut staged,
                            failed,
                            prompts,
                            follow_up.as_ref(),
                            next,
                        )
                        .await?;
                    position = next_position;
                    break turn;
                }
            }
        };

        // Commit: no fallible or suspending work beyond this point.
        conversation.position = position;
        conversation.transcript.extend(staged);
        if user_message_sent {
            let count = progress.sent_counts.entry(conversation.stage).or_insert(0);
            *count += 1;
            let candidate = progression::next_stage(conversation.stage, &progress.sent_counts);
            progress.max_unlocked_stage =
                progression::raise(progress.max_unlocked_stage, candidate);
        }
        Ok(StepOutcome {
            turn,
            max_unlocked_stage: progress.max_unlocked_stage,
        })
    }

    /// Sample up to [`MAX_OFFERED_OPTIONS`] options, materialize them
    /// concurrently (joined by original index, so completion order cannot
    /// affect the binding), log them pre-shuffle and shuffle for display.
    async fn offer_options(
        &self,
        conversation: &Conversation,
        staged: &mut Vec<TranscriptEntry>,
        node: &UserNode,
    ) -> Result<Vec<OfferedOption>, StepError> {
        let sampled: Vec<usize> = if node.options.len() > MAX_OFFERED_OPTIONS {
            let mut rng = self.rng.lock().await;
            rand::seq::index::sample(&mut *rng, node.options.len(), MAX_OFFERED_OPTIONS).into_vec()
        } else {
            (0..node.options.len()).collect()
        };

        let history = history(&conversation.transcript, staged);
        let texts = try_join_all(sampled.iter().map(|&index| {
            self.generator.generate(
                &conversation.user,
                &conversation.scenario.user_perspective,
                &history,
                &node.options[index].instruction,
            )
        }))
        .await?;

        let mut offered: Vec<OfferedOption> = texts
            .into_iter()
            .zip(&sampled)
            .map(|(text, &index)| OfferedOption {
                text,
                checks: node.options[index].checks.clone(),
                next: node.options[index].next.clone(),
            })
            .collect();
        staged.push(TranscriptEntry::OptionsOffered {
            state: node.id.clone(),
            options: offered.clone(),
        });
        offered.shuffle(&mut *self.rng.lock().await);
        Ok(offered)
    }

    /// Generate the feedback body (and, when a follow-up instruction is
    /// present, the suggested clarifying message, concurrently) and decide
    /// where the conversation goes next.
    async fn deliver_feedback(
        &self,
        conversation: &Conversation,
        staged: &mut Vec<TranscriptEntry>,
        failed: Vec<CheckFailure>,
        prompts: Vec<String>,
        follow_up: Option<&Instruction>,
        next: Option<NodeRef>,
    ) -> Result<(Position, Turn), StepError> {
        let messages = history(&conversation.transcript, staged);
        let window = check_window(&messages);
        let body = self
            .generator
            .feedback(&conversation.user, &conversation.agent, window, &prompts);

        let (mut feedback, follow_up_text) = match follow_up {
            Some(instruction) => {
                let clarification = self.generator.generate(
                    &conversation.user,
                    &conversation.scenario.user_perspective,
                    &messages,
                    instruction,
                );
                let (feedback, text) = tokio::try_join!(body, clarification)?;
                (feedback, Some(text))
            }
            None => (body.await?, None),
        };
        feedback.follow_up = follow_up_text.clone();

        staged.push(TranscriptEntry::FeedbackGiven {
            failed_checks: failed,
            feedback: feedback.clone(),
        });

        let position = match follow_up_text {
            Some(text) => Position::AwaitingChoice {
                offered: vec![OfferedOption {
                    text,
                    checks: Vec::new(),
                    next,
                }],
                allow_custom: conversation.stage == Stage::Playground,
            },
            None => advance(next),
        };
        Ok((position, Turn::Feedback { feedback }))
    }

    async fn evaluate_checks(
        &self,
        graph: &Graph,
        conversation: &Conversation,
        staged: &[TranscriptEntry],
        check_ids: &[CheckId],
    ) -> Result<Vec<CheckFailure>, StepError> {
        if check_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut specs = Vec::with_capacity(check_ids.len());
        for id in check_ids {
            let def = graph.check(id)?;
            specs.push(CheckSpec {
                id: id.clone(),
                criterion: def.criterion.clone(),
            });
        }
        let messages = history(&conversation.transcript, staged);
        let window = check_window(&messages);
        let failed = self
            .checker
            .check(&conversation.user, &conversation.agent, window, &specs)
            .await?;
        Ok(failed)
    }
}

/// Match the caller's selection back to the offered options, or wrap a
/// custom reply when the node allows one.
fn resolve_selection(
    offered: &[OfferedOption],
    allow_custom: bool,
    action: UserAction,
) -> Result<OfferedOption, StepError> {
    match action {
        UserAction::SelectIndex(index) => {
            offered.get(index).cloned().ok_or(StepError::InvalidSelection)
        }
        UserAction::CustomText(text) if allow_custom => {
            // A free-typed reply is checked against everything the offered
            // options would have been, and follows the first option's edge.
            let mut checks: Vec<CheckId> = offered
                .iter()
                .flat_map(|option| option.checks.iter().cloned())
                .collect();
            checks.sort();
            checks.dedup();
            let next = offered.first().and_then(|option| option.next.clone());
            Ok(OfferedOption { text, checks, next })
        }
        _ => Err(StepError::InvalidSelection),
    }
}

fn advance(next: Option<NodeRef>) -> Position {
    match next {
        Some(at) => Position::Active { at },
        None => Position::Completed,
    }
}

/// Committed messages plus the ones staged during this transition.
fn history(transcript: &Transcript, staged: &[TranscriptEntry]) -> Vec<Message> {
    let mut messages = transcript.messages();
    for entry in staged {
        if let TranscriptEntry::MessageSent { message, .. } = entry {
            messages.push(message.clone());
        }
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::{CheckDef, Flow, Segment, SegmentOption, compile};
    use async_trait::async_trait;

    /// Echoes `<name>:<instruction>` so every generated text identifies the
    /// instruction that produced it.
    struct EchoGenerator;

    #[async_trait]
    impl MessageGenerator for EchoGenerator {
        async fn generate(
            &self,
            persona: &Persona,
            _scenario: &str,
            _history: &[Message],
            instruction: &Instruction,
        ) -> Result<String, GenerationError> {
            Ok(format!("{}:{}", persona.name, instruction.description))
        }

        async fn feedback(
            &self,
            _user: &Persona,
            _agent: &Persona,
            _window: &[Message],
            prompts: &[String],
        ) -> Result<Feedback, GenerationError> {
            Ok(Feedback {
                title: "Coaching".into(),
                body: prompts.join(" | "),
                follow_up: None,
            })
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl MessageGenerator for FailingGenerator {
        async fn generate(
            &self,
            _persona: &Persona,
            _scenario: &str,
            _history: &[Message],
            _instruction: &Instruction,
        ) -> Result<String, GenerationError> {
            Err(GenerationError::Provider("boom".into()))
        }

        async fn feedback(
            &self,
            _user: &Persona,
            _agent: &Persona,
            _window: &[Message],
            _prompts: &[String],
        ) -> Result<Feedback, GenerationError> {
            Err(GenerationError::Provider("boom".into()))
        }
    }

    /// Reports the configured failures for every evaluated check set.
    struct ScriptedChecker(Vec<CheckFailure>);

    #[async_trait]
    impl CheckEvaluator for ScriptedChecker {
        async fn check(
            &self,
            _user: &Persona,
            _agent: &Persona,
            _window: &[Message],
            checks: &[CheckSpec],
        ) -> Result<Vec<CheckFailure>, CheckError> {
            Ok(self
                .0
                .iter()
                .filter(|failure| checks.iter().any(|check| check.id == failure.id))
                .cloned()
                .collect())
        }
    }

    struct FailingChecker;

    #[async_trait]
    impl CheckEvaluator for FailingChecker {
        async fn check(
            &self,
            _user: &Persona,
            _agent: &Persona,
            _window: &[Message],
            _checks: &[CheckSpec],
        ) -> Result<Vec<CheckFailure>, CheckError> {
            Err(CheckError::Provider("down".into()))
        }
    }

    fn passing_interpreter(seed: u64) -> Interpreter {
        Interpreter::with_seed(Arc::new(EchoGenerator), Arc::new(ScriptedChecker(vec![])), seed)
    }

    fn conversation(stage: Stage, graph: &Graph) -> Conversation {
        Conversation {
            stage,
            scenario: Scenario {
                user_perspective: "You are asked about a client.".into(),
                agent_perspective: "You ask a colleague about a client.".into(),
                user_goal: None,
                is_user_initiated: false,
            },
            user: Persona::new("Sam", "You are Sam."),
            agent: Persona::new("Riley", "You are Riley."),
            position: match graph.entry() {
                Some(entry) => Position::Active { at: entry.clone() },
                None => Position::Completed,
            },
            transcript: Transcript::default(),
        }
    }

    fn two_node_chain() -> Graph {
        let segment = Segment::new("intro", "agent_greet")
            .agent(
                "agent_greet",
                Instruction::new("I will open the conversation."),
                Some("user_greet"),
            )
            .user(
                "user_greet",
                vec![SegmentOption::new(Instruction::new("I will greet them back."))],
            );
        compile(&segment.into(), vec![]).unwrap()
    }

    #[tokio::test]
    async fn walks_a_two_node_chain_to_completion() {
        let graph = two_node_chain();
        let interpreter = passing_interpreter(7);
        let mut conv = conversation(Stage::Level0, &graph);
        let mut progress = UserProgress::default();

        let first = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap();
        assert_eq!(
            first.turn,
            Turn::Agent { text: "Riley:I will open the conversation.".into() }
        );

        let second = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap();
        let Turn::Choices { options, allow_custom } = second.turn else {
            panic!("expected choices");
        };
        assert_eq!(options, vec!["Sam:I will greet them back.".to_string()]);
        assert!(!allow_custom);

        let third = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::SelectIndex(0))
            .await
            .unwrap();
        assert_eq!(third.turn, Turn::Complete);
        assert_eq!(conv.position, Position::Completed);
        assert_eq!(progress.sent_counts.get(&Stage::Level0), Some(&1));

        // Two messages in the transcript: the agent's and the user's.
        assert_eq!(conv.transcript.messages().len(), 2);

        // Stepping a completed conversation stays completed.
        let again = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap();
        assert_eq!(again.turn, Turn::Complete);
    }

    #[tokio::test]
    async fn rejects_actions_outside_a_pending_choice() {
        let graph = two_node_chain();
        let interpreter = passing_interpreter(7);
        let mut conv = conversation(Stage::Level0, &graph);
        let mut progress = UserProgress::default();

        let before = conv.clone();
        let err = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::SelectIndex(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidSelection));
        assert_eq!(conv, before);
    }

    #[tokio::test]
    async fn rejects_out_of_range_and_disallowed_custom_selections() {
        let graph = two_node_chain();
        let interpreter = passing_interpreter(7);
        let mut conv = conversation(Stage::Level0, &graph);
        let mut progress = UserProgress::default();

        interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap();
        interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap();
        let before = conv.clone();

        let err = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::SelectIndex(5))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidSelection));

        let err = interpreter
            .step(
                &graph,
                &mut conv,
                &mut progress,
                UserAction::CustomText("hello".into()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::InvalidSelection));
        assert_eq!(conv, before);
        assert!(progress.sent_counts.is_empty());
    }

    #[tokio::test]
    async fn locked_stages_are_rejected_before_any_collaborator_call() {
        let graph = two_node_chain();
        let interpreter =
            Interpreter::with_seed(Arc::new(FailingGenerator), Arc::new(FailingChecker), 7);
        let mut conv = conversation(Stage::Playground, &graph);
        let mut progress = UserProgress::default();

        let err = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::StageNotUnlocked(Stage::Playground)));
    }

    #[tokio::test]
    async fn failed_generation_leaves_no_trace() {
        let graph = two_node_chain();
        let interpreter =
            Interpreter::with_seed(Arc::new(FailingGenerator), Arc::new(ScriptedChecker(vec![])), 7);
        let mut conv = conversation(Stage::Level0, &graph);
        let mut progress = UserProgress::default();
        let before = conv.clone();

        let err = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Generation(_)));
        assert_eq!(conv, before);
        assert!(conv.transcript.is_empty());
        assert!(progress.sent_counts.is_empty());
    }

    fn checked_option_graph(follow_up: bool) -> Graph {
        let segment = Segment::new("probe", "user_answer")
            .user(
                "user_answer",
                vec![SegmentOption::new(Instruction::new("I will answer."))
                    .check("c1")
                    .then("agent_next")],
            )
            .agent("agent_next", Instruction::new("I will continue."), None);
        let check = CheckDef {
            criterion: "The answer is clear and specific.".into(),
            prompt: "The latest answer was too vague.".into(),
            follow_up: follow_up.then(|| Instruction::new("I will clarify what I meant.")),
        };
        compile(&segment.into(), vec![("c1".into(), check)]).unwrap()
    }

    #[tokio::test]
    async fn failing_check_detours_through_feedback() {
        let graph = checked_option_graph(false);
        let failure = CheckFailure {
            id: "c1".into(),
            reason: "The reply could mean several things.".into(),
        };
        let interpreter = Interpreter::with_seed(
            Arc::new(EchoGenerator),
            Arc::new(ScriptedChecker(vec![failure])),
            7,
        );
        let mut conv = conversation(Stage::Level0, &graph);
        let mut progress = UserProgress::default();

        interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap();
        let outcome = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::SelectIndex(0))
            .await
            .unwrap();
        let Turn::Feedback { feedback } = outcome.turn else {
            panic!("expected a feedback turn before the option's next node");
        };
        assert!(feedback.body.contains("The latest answer was too vague."));
        assert!(feedback.body.contains("The reply could mean several things."));
        assert!(feedback.follow_up.is_none());

        // Without a follow-up the conversation advances straight to `next`.
        assert_eq!(
            conv.position,
            Position::Active {
                at: NodeRef::new(crate::flow::NodeKind::Agent, "probe/agent_next")
            }
        );
    }

    #[tokio::test]
    async fn feedback_follow_up_requires_one_clarifying_message() {
        let graph = checked_option_graph(true);
        let failure = CheckFailure { id: "c1".into(), reason: "vague".into() };
        let interpreter = Interpreter::with_seed(
            Arc::new(EchoGenerator),
            Arc::new(ScriptedChecker(vec![failure])),
            7,
        );
        let mut conv = conversation(Stage::Level0, &graph);
        let mut progress = UserProgress::default();

        interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap();
        let outcome = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::SelectIndex(0))
            .await
            .unwrap();
        let Turn::Feedback { feedback } = outcome.turn else {
            panic!("expected a feedback turn");
        };
        assert_eq!(
            feedback.follow_up.as_deref(),
            Some("Sam:I will clarify what I meant.")
        );
        let Position::AwaitingChoice { offered, allow_custom } = &conv.position else {
            panic!("expected a pending follow-up choice");
        };
        assert_eq!(offered.len(), 1);
        assert!(offered[0].checks.is_empty());
        assert!(!allow_custom);

        // Sending the follow-up reaches the original option's next node.
        let outcome = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::SelectIndex(0))
            .await
            .unwrap();
        assert_eq!(
            outcome.turn,
            Turn::Agent { text: "Riley:I will continue.".into() }
        );
        assert_eq!(progress.sent_counts.get(&Stage::Level0), Some(&2));
    }

    #[tokio::test]
    async fn passing_checks_skip_feedback_entirely() {
        let graph = checked_option_graph(false);
        let interpreter = passing_interpreter(7);
        let mut conv = conversation(Stage::Level0, &graph);
        let mut progress = UserProgress::default();

        interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap();
        let outcome = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::SelectIndex(0))
            .await
            .unwrap();
        assert_eq!(
            outcome.turn,
            Turn::Agent { text: "Riley:I will continue.".into() }
        );
        assert!(!conv
            .transcript
            .entries()
            .iter()
            .any(|entry| matches!(entry, TranscriptEntry::FeedbackGiven { .. })));
    }

    #[tokio::test]
    async fn failed_check_call_rolls_the_whole_turn_back() {
        let graph = checked_option_graph(false);
        let interpreter =
            Interpreter::with_seed(Arc::new(EchoGenerator), Arc::new(FailingChecker), 7);
        let mut conv = conversation(Stage::Level0, &graph);
        let mut progress = UserProgress::default();

        interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap();
        let before = conv.clone();
        let err = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::SelectIndex(0))
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Check(_)));
        assert_eq!(conv, before);
        assert!(progress.sent_counts.is_empty());
    }

    fn five_option_graph() -> Graph {
        let options = vec![
            SegmentOption::new(Instruction::new("reply-0")).check("c0").then("react0"),
            SegmentOption::new(Instruction::new("reply-1")).check("c1").then("react1"),
            SegmentOption::new(Instruction::new("reply-2")).check("c2").then("react2"),
            SegmentOption::new(Instruction::new("reply-3")).check("c3").then("react3"),
            SegmentOption::new(Instruction::new("reply-4")).check("c4").then("react4"),
        ];
        let segment = Segment::new("fanout", "user_answer")
            .user("user_answer", options)
            .agent("react0", Instruction::new("react-0"), None)
            .agent("react1", Instruction::new("react-1"), None)
            .agent("react2", Instruction::new("react-2"), None)
            .agent("react3", Instruction::new("react-3"), None)
            .agent("react4", Instruction::new("react-4"), None);
        let checks = (0..5)
            .map(|index| {
                (
                    format!("c{index}"),
                    CheckDef {
                        criterion: format!("criterion {index}"),
                        prompt: format!("prompt {index}"),
                        follow_up: None,
                    },
                )
            })
            .collect();
        compile(&segment.into(), checks).unwrap()
    }

    #[tokio::test]
    async fn sampling_and_shuffling_preserve_option_bindings() {
        // Run several seeds so different samples and permutations are
        // exercised; the binding must hold for all of them.
        for seed in 0..8 {
            let graph = five_option_graph();
            let interpreter = passing_interpreter(seed);
            let mut conv = conversation(Stage::Level0, &graph);
            let mut progress = UserProgress::default();

            let outcome = interpreter
                .step(&graph, &mut conv, &mut progress, UserAction::None)
                .await
                .unwrap();
            let Turn::Choices { options, .. } = outcome.turn else {
                panic!("expected choices");
            };
            assert_eq!(options.len(), 3);

            let Position::AwaitingChoice { offered, .. } = conv.position.clone() else {
                panic!("expected a pending choice");
            };
            // Every displayed entry still carries the checks and successor
            // of the option that generated its text.
            for entry in &offered {
                let index: usize = entry
                    .text
                    .strip_prefix("Sam:reply-")
                    .expect("echoed text identifies its instruction")
                    .parse()
                    .unwrap();
                assert_eq!(entry.checks, vec![format!("c{index}")]);
                assert_eq!(
                    entry.next.as_ref().unwrap().id,
                    format!("fanout/react{index}")
                );
            }

            // The options-offered log entry holds the pre-shuffle order.
            let logged = conv
                .transcript
                .entries()
                .iter()
                .find_map(|entry| match entry {
                    TranscriptEntry::OptionsOffered { options, .. } => Some(options.clone()),
                    _ => None,
                })
                .unwrap();
            let mut logged_texts: Vec<_> = logged.iter().map(|o| o.text.clone()).collect();
            let mut offered_texts: Vec<_> = offered.iter().map(|o| o.text.clone()).collect();
            logged_texts.sort();
            offered_texts.sort();
            assert_eq!(logged_texts, offered_texts);

            // Selecting a display index must reach that entry's successor.
            let picked = offered[1].clone();
            let outcome = interpreter
                .step(&graph, &mut conv, &mut progress, UserAction::SelectIndex(1))
                .await
                .unwrap();
            let expected_reaction = picked.next.unwrap().id.replace("fanout/react", "react-");
            assert_eq!(
                outcome.turn,
                Turn::Agent { text: format!("Riley:{expected_reaction}") }
            );
        }
    }

    fn custom_text_graph() -> Graph {
        let segment = Segment::new("open", "user_answer")
            .user_with_custom(
                "user_answer",
                vec![
                    SegmentOption::new(Instruction::new("reply-a")).check("c0").then("agent_react"),
                    SegmentOption::new(Instruction::new("reply-b")).check("c1").then("agent_react"),
                ],
            )
            .agent("agent_react", Instruction::new("I will respond."), None);
        let checks = (0..2)
            .map(|index| {
                (
                    format!("c{index}"),
                    CheckDef {
                        criterion: format!("criterion {index}"),
                        prompt: format!("prompt {index}"),
                        follow_up: None,
                    },
                )
            })
            .collect();
        compile(&segment.into(), checks).unwrap()
    }

    #[tokio::test]
    async fn custom_text_takes_all_offered_checks_and_the_first_edge() {
        let graph = custom_text_graph();
        let interpreter = passing_interpreter(3);
        let mut conv = conversation(Stage::Playground, &graph);
        let mut progress = UserProgress {
            sent_counts: SentCounts::new(),
            max_unlocked_stage: Stage::Playground,
        };

        let outcome = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap();
        let Turn::Choices { allow_custom, .. } = outcome.turn else {
            panic!("expected choices");
        };
        assert!(allow_custom);

        let outcome = interpreter
            .step(
                &graph,
                &mut conv,
                &mut progress,
                UserAction::CustomText("My own reply.".into()),
            )
            .await
            .unwrap();
        assert_eq!(
            outcome.turn,
            Turn::Agent { text: "Riley:I will respond.".into() }
        );
        let last_user = conv
            .transcript
            .messages()
            .into_iter()
            .find(|message| message.user_sent)
            .unwrap();
        assert_eq!(last_user.text, "My own reply.");
        assert_eq!(progress.sent_counts.get(&Stage::Playground), Some(&1));
    }

    #[tokio::test]
    async fn auto_selected_unions_record_their_draw() {
        let ask = |name: &'static str, text: &'static str| {
            Segment::new(name, "agent_ask").agent("agent_ask", Instruction::new(text), None)
        };
        let flow = Flow::union(
            vec![ask("curious", "ask-curious").into()],
            ask("plain", "ask-plain").into(),
        );
        let graph = compile(&flow, vec![]).unwrap();
        let interpreter = passing_interpreter(11);
        let mut conv = conversation(Stage::Level0, &graph);
        let mut progress = UserProgress::default();

        let outcome = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap();
        let Turn::Agent { text } = outcome.turn else {
            panic!("expected the drawn branch's agent turn");
        };
        assert!(text == "Riley:ask-curious" || text == "Riley:ask-plain");

        let draw = conv
            .transcript
            .entries()
            .iter()
            .find_map(|entry| match entry {
                TranscriptEntry::BranchChosen { state, index } => Some((state.clone(), *index)),
                _ => None,
            })
            .expect("the draw is recorded for reproducibility");
        assert_eq!(draw.0, "union/choice");
        assert!(draw.1 < 2);
        // The recorded index matches the branch that actually spoke.
        let expected = if draw.1 == 0 { "Riley:ask-curious" } else { "Riley:ask-plain" };
        assert_eq!(text, expected);
    }

    #[tokio::test]
    async fn eighth_sent_message_unlocks_the_next_stage() {
        let graph = two_node_chain();
        let interpreter = passing_interpreter(7);
        let mut conv = conversation(Stage::Level0, &graph);
        let mut progress = UserProgress::default();
        progress.sent_counts.insert(Stage::Level0, 7);

        interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap();
        interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::None)
            .await
            .unwrap();
        let outcome = interpreter
            .step(&graph, &mut conv, &mut progress, UserAction::SelectIndex(0))
            .await
            .unwrap();
        assert_eq!(outcome.max_unlocked_stage, Stage::Level1);
        assert_eq!(progress.sent_counts.get(&Stage::Level0), Some(&8));
    }
}
