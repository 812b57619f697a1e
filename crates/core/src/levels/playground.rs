//! The playground: a free conversation about a topic the user cares about.
//! Every user turn accepts free-typed replies, and every reply runs the full
//! check set, so feedback comes from the checks rather than from scripted
//! branches.

use super::natural::{agent_natural, user_natural_open};
use crate::flow::{CheckDef, Flow, Instruction, Segment, SegmentOption};

const CHECKS: [&str; 4] = ["vague", "figurative", "sarcastic", "blunt"];

/// How many exchanges the playground runs before the conversation wraps up.
const ROUNDS: usize = 20;

fn opening() -> Segment {
    let mut option = SegmentOption::new(Instruction::new(
        "I will open the conversation by greeting the expert and asking a first \
         question about the topic I want to learn about.",
    ));
    for check in CHECKS {
        option = option.check(check);
    }
    Segment::new("opening", "user_open").user_with_custom("user_open", vec![option])
}

pub fn flow() -> Flow {
    Flow::chain(vec![
        opening().into(),
        Flow::repeat(
            Flow::chain(vec![
                agent_natural().into(),
                user_natural_open(&CHECKS).into(),
            ]),
            ROUNDS,
        ),
    ])
}

pub fn checks() -> Vec<(String, CheckDef)> {
    vec![
        (
            "vague".to_string(),
            CheckDef {
                criterion: "The message is specific enough to be understood one way."
                    .into(),
                prompt: "The latest message was vague, making it hard to know what \
                         was meant. Explain how it could have been more specific."
                    .into(),
                follow_up: Some(Instruction::new(
                    "I will clarify what I meant with my previous vague message.",
                )),
            },
        ),
        (
            "figurative".to_string(),
            CheckDef {
                criterion: "The message avoids figurative language that could be \
                            taken literally."
                    .into(),
                prompt: "The latest message used figurative language, which can be \
                         taken literally and cause confusion. Explain how to phrase \
                         it directly."
                    .into(),
                follow_up: Some(Instruction::new(
                    "I will apologize for the figurative language and say plainly \
                     what I meant.",
                )),
            },
        ),
        (
            "sarcastic".to_string(),
            CheckDef {
                criterion: "The message avoids sarcasm and irony.".into(),
                prompt: "The latest message was sarcastic, which can be taken at face \
                         value and cause confusion. Explain how to say it plainly."
                    .into(),
                follow_up: Some(Instruction::new(
                    "I will explain that I was being sarcastic and say what I \
                     actually meant.",
                )),
            },
        ),
        (
            "blunt".to_string(),
            CheckDef {
                criterion: "The message delivers opinions considerately, without \
                            harsh or dismissive phrasing."
                    .into(),
                prompt: "The latest message was blunt, which can discourage others. \
                         Explain how the same point could have been made \
                         considerately."
                    .into(),
                follow_up: Some(Instruction::new(
                    "I will soften my previous message and restate my point \
                     constructively.",
                )),
            },
        ),
    ]
}
