//! Level 0: answering questions without vague, figurative or sarcastic
//! language. A colleague asks about a client; the user's scripted answers
//! branch between unclear styles (each drawing a confused reaction and
//! feedback) and a direct answer that moves on cleanly.

use super::natural::{agent_natural, user_natural};
use crate::flow::{CheckDef, Flow, Instruction, Segment, SegmentOption};
use crate::scenario::ScenarioSeed;

fn intro() -> Segment {
    Segment::new("intro", "agent_greet")
        .agent(
            "agent_greet",
            Instruction::new(
                "I will start the conversation and mention that I have heard the other \
                 person has worked with a client that I would like to discuss. I will \
                 ask if this is true.",
            ),
            Some("user_greet"),
        )
        .user(
            "user_greet",
            vec![SegmentOption::new(Instruction::new(
                "I will greet the person and confirm that I have worked with the \
                 client they mentioned. I will offer to answer any questions they \
                 have about the client.",
            ))],
        )
}

fn ask() -> Segment {
    Segment::new("ask", "agent_ask").agent(
        "agent_ask",
        Instruction::new(
            "I will ask a question about the client. I will focus on general, \
             open-ended questions, avoiding trivial details like dates, times, or \
             locations.",
        ),
        None,
    )
}

fn vague() -> Segment {
    Segment::new("vague", "user_answer")
        .user(
            "user_answer",
            vec![
                SegmentOption::new(
                    Instruction::new(
                        "I will provide a vague answer that can be interpreted in \
                         multiple ways. I know the exact answer, but I will not \
                         mention it.",
                    )
                    .example(
                        &["What should I prepare before meeting the client?"],
                        "Just the usual things, nothing special.",
                    ),
                )
                .then("agent_react"),
            ],
        )
        .agent(
            "agent_react",
            Instruction::new(
                "I will react to the vague answer by expressing confusion and \
                 frustration. I will describe how the vague answer makes it difficult \
                 for me to understand the response.",
            )
            .example(
                &["Just the usual things, nothing special."],
                "I'm not sure what the usual things are here. Could you tell me \
                 specifically what I should prepare?",
            ),
            Some("feedback_vague"),
        )
        .feedback(
            "feedback_vague",
            "The latest answer needs improvement as it is vague or unclear. Vague \
             responses make it difficult for others to understand and follow up. \
             Provide feedback on how the answer could have been clearer and more \
             specific, and explain why it was vague.",
            Some(
                Instruction::new("I will clarify what I meant with the vague answer I \
                                  previously provided.")
                .example(
                    &[
                        "Just the usual things, nothing special.",
                        "I'm not sure what the usual things are here. Could you tell \
                         me specifically what I should prepare?",
                    ],
                    "Sorry, I should have been specific: bring the latest project \
                     plan and last quarter's numbers.",
                ),
            ),
            None,
        )
}

fn figurative() -> Segment {
    Segment::new("figurative", "user_answer")
        .user(
            "user_answer",
            vec![
                SegmentOption::new(
                    Instruction::new(
                        "I will answer the question using figurative language that is \
                         not meant to be taken literally. My answer will be creative \
                         and imaginative.",
                    )
                    .example(
                        &["How is working with this client?"],
                        "Working with them is a rollercoaster, but we always land on \
                         our feet.",
                    ),
                )
                .then("agent_react"),
                SegmentOption::new(
                    Instruction::new(
                        "I will answer the question using a touch of figurative \
                         language. My answer will be mostly literal but will include \
                         a hint of figurative language.",
                    )
                    .example(
                        &["How is working with this client?"],
                        "They keep us on our toes, but they are reliable and pay on \
                         time.",
                    ),
                )
                .then("agent_react"),
            ],
        )
        .agent(
            "agent_react",
            Instruction::new(
                "I will misinterpret the figurative language used in the answer and \
                 respond in a literal and direct manner, as if the answer was meant \
                 to be taken literally.",
            )
            .example(
                &["Working with them is a rollercoaster, but we always land on our feet."],
                "A rollercoaster? I don't see what amusement parks have to do with \
                 the client.",
            ),
            Some("feedback_figurative"),
        )
        .feedback(
            "feedback_figurative",
            "The latest message needs improvement as it contains figurative language, \
             which can be misinterpreted by some individuals. Provide feedback on how \
             the message could have been clearer and more direct, and explain how the \
             figurative language could be confusing.",
            Some(
                Instruction::new("I will clarify the figurative language I used in my \
                                  previous answer.")
                .example(
                    &[
                        "Working with them is a rollercoaster, but we always land on \
                         our feet.",
                        "A rollercoaster? I don't see what amusement parks have to do \
                         with the client.",
                    ],
                    "Sorry, I meant that the work has ups and downs, but the projects \
                     always end well.",
                ),
            ),
            None,
        )
}

fn sarcastic() -> Segment {
    Segment::new("sarcastic", "user_answer")
        .user(
            "user_answer",
            vec![
                SegmentOption::new(
                    Instruction::new(
                        "I will answer the question using sarcasm or irony to be \
                         humorous, saying the opposite of what I mean.",
                    )
                    .example(
                        &["Any advice on how to handle the client?"],
                        "Oh, they love it when you show up late. It shows them you're \
                         in control.",
                    ),
                )
                .then("agent_react"),
            ],
        )
        .agent(
            "agent_react",
            Instruction::new(
                "I will interpret the message literally, ignoring any sarcasm. I will \
                 respond as if the message was meant seriously, without mentioning \
                 that it might be sarcastic.",
            )
            .example(
                &["Oh, they love it when you show up late. It shows them you're in control."],
                "That's strange. Why would they love that? Showing up late seems \
                 unprofessional.",
            ),
            Some("feedback_sarcastic"),
        )
        .feedback(
            "feedback_sarcastic",
            "The latest message needs improvement as it uses sarcasm, which can be \
             misinterpreted by some individuals. Provide feedback on how the message \
             could have been clearer and more direct, and explain how the sarcasm \
             could be confusing.",
            Some(
                Instruction::new("I will clarify the sarcastic language I used in my \
                                  previous answer.")
                .example(
                    &[
                        "Oh, they love it when you show up late. It shows them you're \
                         in control.",
                        "That's strange. Why would they love that? Showing up late \
                         seems unprofessional.",
                    ],
                    "I was being sarcastic, sorry. Punctuality actually matters a lot \
                     to them.",
                ),
            ),
            None,
        )
}

fn direct() -> Segment {
    Segment::new("direct", "user_answer").user(
        "user_answer",
        vec![
            SegmentOption::new(Instruction::new(
                "I will provide a clear answer. My response will be straightforward \
                 and address the question directly.",
            ))
            .check("vague")
            .check("figurative")
            .check("sarcastic"),
        ],
    )
}

fn end() -> Segment {
    Segment::new("end", "agent_goodbye")
        .agent(
            "agent_goodbye",
            Instruction::new(
                "I will say that I have no more questions about the client. I will \
                 thank the person for their time and say goodbye.",
            ),
            Some("user_goodbye"),
        )
        .user(
            "user_goodbye",
            vec![SegmentOption::new(Instruction::new(
                "I will say goodbye and end the conversation.",
            ))],
        )
}

pub fn flow() -> Flow {
    Flow::chain(vec![
        intro().into(),
        Flow::repeat(
            Flow::chain(vec![agent_natural().into(), user_natural(&[]).into()]),
            2,
        ),
        Flow::repeat(
            Flow::chain(vec![
                Flow::with_context(
                    ask().into(),
                    "I want to learn more about the client and receive more information.",
                ),
                Flow::union(
                    vec![vague().into(), figurative().into(), sarcastic().into()],
                    direct().into(),
                ),
                Flow::with_context(
                    Flow::chain(vec![agent_natural().into(), user_natural(&[]).into()]),
                    "I will make a follow-up comment without asking a new question. I \
                     WILL NOT END THE CONVERSATION.",
                ),
            ]),
            5,
        ),
        end().into(),
    ])
}

pub fn checks() -> Vec<(String, CheckDef)> {
    vec![
        (
            "vague".to_string(),
            CheckDef {
                criterion: "The message answers the question with enough specific \
                            detail to be understood one way."
                    .into(),
                prompt: "The latest answer was vague or unclear, making it hard to \
                         understand what was meant. Explain how it could have been \
                         more specific."
                    .into(),
                follow_up: Some(Instruction::new(
                    "I will clarify what I meant with my previous vague answer.",
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
                    "I will clarify the figurative language I used in my previous \
                     message.",
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
                    "I will clarify the sarcastic remark I made in my previous \
                     message.",
                )),
            },
        ),
    ]
}

pub fn seed() -> ScenarioSeed {
    ScenarioSeed {
        user_perspective: "A colleague, {agent}, reaches out to discuss a client you \
                           have worked with before and asks for your advice.",
        agent_perspective: "You reach out to a colleague to discuss a client they \
                            have worked with before and ask for their advice.",
        user_goal: "Discuss the client with {agent} and provide helpful advice.",
        is_user_initiated: false,
    }
}
