//! Append-only record of everything that happened in one conversation.
//!
//! The transcript doubles as the context handed to the message generator and
//! as the audit trail: offered options are logged in their pre-shuffle order
//! and auto-resolved branch draws are recorded, so a persisted conversation
//! can be replayed deterministically.

use crate::flow::{CheckId, NodeId, NodeRef};
use serde::{Deserialize, Serialize};

/// One chat message, attributable to either side of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub text: String,
    pub user_sent: bool,
}

/// A user option whose text has already been materialized by the generator,
/// still bound to the checks and successor of the option it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferedOption {
    pub text: String,
    pub checks: Vec<CheckId>,
    pub next: Option<NodeRef>,
}

/// Coaching feedback shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub title: String,
    pub body: String,
    /// Suggested clarifying message the user sends before moving on.
    pub follow_up: Option<String>,
}

/// A named check the user's latest message failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckFailure {
    pub id: CheckId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    /// A message went out, from either side. `state` is the graph node that
    /// produced it, absent for user selections and custom replies.
    MessageSent {
        state: Option<NodeId>,
        message: Message,
    },
    /// Options were materialized and offered, logged before shuffling.
    OptionsOffered {
        state: NodeId,
        options: Vec<OfferedOption>,
    },
    /// An auto-selected fan-out was resolved by a uniform draw.
    BranchChosen { state: NodeId, index: usize },
    /// Corrective feedback was delivered.
    FeedbackGiven {
        failed_checks: Vec<CheckFailure>,
        feedback: Feedback,
    },
}

/// Ordered log of one conversation; only ever appended to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn push(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = TranscriptEntry>) {
        self.entries.extend(entries);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The chat messages in order, for generation context and display.
    pub fn messages(&self) -> Vec<Message> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                TranscriptEntry::MessageSent { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect()
    }
}

/// The slice of messages a check or feedback call should look at: everything
/// since the agent message that precedes the user's most recent message.
pub fn check_window(messages: &[Message]) -> &[Message] {
    let mut start = 0;
    for index in (0..messages.len().saturating_sub(2)).rev() {
        if !messages[index].user_sent {
            start = index + 1;
            break;
        }
    }
    &messages[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(text: &str) -> Message {
        Message {
            sender: "Riley".into(),
            text: text.into(),
            user_sent: false,
        }
    }

    fn user(text: &str) -> Message {
        Message {
            sender: "Sam".into(),
            text: text.into(),
            user_sent: true,
        }
    }

    #[test]
    fn messages_projects_only_chat_messages() {
        let mut transcript = Transcript::default();
        transcript.push(TranscriptEntry::MessageSent {
            state: Some("intro/agent_greet".into()),
            message: agent("Hi there!"),
        });
        transcript.push(TranscriptEntry::OptionsOffered {
            state: "intro/user_greet".into(),
            options: vec![],
        });
        transcript.push(TranscriptEntry::MessageSent {
            state: None,
            message: user("Hello!"),
        });
        let messages = transcript.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text, "Hello!");
    }

    #[test]
    fn check_window_starts_after_the_previous_agent_message() {
        let messages = vec![
            agent("How is the project going?"),
            user("It's going fine."),
            agent("Anything blocking you?"),
            user("Not that I can think of."),
        ];
        let window = check_window(&messages);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].text, "It's going fine.");
        assert_eq!(window[2].text, "Not that I can think of.");
    }

    #[test]
    fn check_window_keeps_everything_when_no_agent_message_precedes() {
        let messages = vec![user("Hi!"), user("Anyone there?")];
        assert_eq!(check_window(&messages).len(), 2);
    }

    #[test]
    fn check_window_of_a_short_transcript_is_the_whole_transcript() {
        let messages = vec![agent("Hello!")];
        assert_eq!(check_window(&messages).len(), 1);
        assert!(check_window(&[]).is_empty());
    }

    #[test]
    fn entries_round_trip_through_json() {
        let entry = TranscriptEntry::FeedbackGiven {
            failed_checks: vec![CheckFailure {
                id: "figurative".into(),
                reason: "The reply relied on an idiom.".into(),
            }],
            feedback: Feedback {
                title: "Avoid idioms".into(),
                body: "Idioms can be taken literally.".into(),
                follow_up: Some("Sorry, I meant we should start quickly.".into()),
            },
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: TranscriptEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
