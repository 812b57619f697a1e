//! Level 1: giving honest opinions without blunt or dismissive phrasing. A
//! teammate shares their draft work and asks what the user thinks; harsh
//! scripted answers draw a hurt reaction and feedback, while the considerate
//! answer moves on cleanly.

use super::natural::{agent_natural, user_natural};
use crate::flow::{CheckDef, Flow, Instruction, Segment, SegmentOption};
use crate::scenario::ScenarioSeed;

fn intro() -> Segment {
    Segment::new("intro", "agent_greet")
        .agent(
            "agent_greet",
            Instruction::new(
                "I will start the conversation and say that I have been working on a \
                 draft I care about. I will ask the other person if they have time to \
                 give me their honest opinion on it.",
            ),
            Some("user_greet"),
        )
        .user(
            "user_greet",
            vec![SegmentOption::new(Instruction::new(
                "I will greet the person and say that I am happy to look at their \
                 draft and share my thoughts.",
            ))],
        )
}

fn present() -> Segment {
    Segment::new("present", "agent_present").agent(
        "agent_present",
        Instruction::new(
            "I will describe one part of my draft and ask what the other person \
             honestly thinks of it.",
        ),
        None,
    )
}

fn blunt() -> Segment {
    Segment::new("blunt", "user_answer")
        .user(
            "user_answer",
            vec![
                SegmentOption::new(
                    Instruction::new(
                        "I will give my opinion bluntly, stating flaws harshly and \
                         without any softening, even though the criticism is valid.",
                    )
                    .example(
                        &["What do you think of the opening section?"],
                        "Honestly, the opening is bad. Nobody will read past it.",
                    ),
                )
                .then("agent_react"),
            ],
        )
        .agent(
            "agent_react",
            Instruction::new(
                "I will react to the blunt criticism by becoming quiet and \
                 discouraged. I will say that I did not expect it to be that bad and \
                 that I am not sure the work is worth continuing.",
            )
            .example(
                &["Honestly, the opening is bad. Nobody will read past it."],
                "Oh. I didn't realize it was that bad. Maybe I should just start \
                 over from scratch.",
            ),
            Some("feedback_blunt"),
        )
        .feedback(
            "feedback_blunt",
            "The latest message needs improvement as it is overly blunt. Honest \
             criticism delivered harshly can discourage others. Provide feedback on \
             how the same opinion could have been delivered considerately, naming \
             something that works before what needs fixing.",
            Some(
                Instruction::new("I will soften my earlier criticism, acknowledge what \
                                  works in the draft and restate my concern \
                                  constructively.")
                .example(
                    &[
                        "Honestly, the opening is bad. Nobody will read past it.",
                        "Oh. I didn't realize it was that bad. Maybe I should just \
                         start over from scratch.",
                    ],
                    "Sorry, that came out harsher than I meant. The structure is \
                     solid; I just think the first paragraph could hook readers \
                     faster.",
                ),
            ),
            None,
        )
}

fn dismissive() -> Segment {
    Segment::new("dismissive", "user_answer")
        .user(
            "user_answer",
            vec![
                SegmentOption::new(
                    Instruction::new(
                        "I will answer with a short, dismissive remark that gives no \
                         real opinion, as if the question barely deserves attention.",
                    )
                    .example(
                        &["What do you think of the opening section?"],
                        "It's fine, I guess. Whatever works.",
                    ),
                )
                .then("agent_react"),
            ],
        )
        .agent(
            "agent_react",
            Instruction::new(
                "I will react to the dismissive answer with disappointment, saying \
                 that I was hoping for real input and that the brush-off makes me \
                 think they do not care about the work.",
            )
            .example(
                &["It's fine, I guess. Whatever works."],
                "I was hoping for actual thoughts on it. If it's a bother I can ask \
                 someone else.",
            ),
            Some("feedback_dismissive"),
        )
        .feedback(
            "feedback_dismissive",
            "The latest message needs improvement as it is dismissive. Brushing off a \
             request for input signals disinterest and shuts the conversation down. \
             Provide feedback on how to engage with the question genuinely.",
            Some(
                Instruction::new("I will apologize for brushing the question off and \
                                  give a genuine, specific opinion on the draft."),
            ),
            None,
        )
}

fn considerate() -> Segment {
    Segment::new("considerate", "user_answer").user(
        "user_answer",
        vec![
            SegmentOption::new(Instruction::new(
                "I will give my honest opinion considerately: I will name something \
                 that works well, then raise my main concern constructively with a \
                 concrete suggestion.",
            ))
            .check("blunt"),
        ],
    )
}

fn end() -> Segment {
    Segment::new("end", "agent_goodbye")
        .agent(
            "agent_goodbye",
            Instruction::new(
                "I will thank the person for looking at my draft, say the input was \
                 helpful, and say goodbye.",
            ),
            Some("user_goodbye"),
        )
        .user(
            "user_goodbye",
            vec![SegmentOption::new(Instruction::new(
                "I will wish them luck with the draft and say goodbye.",
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
                    present().into(),
                    "I am invested in this draft and a little nervous about the \
                     reaction.",
                ),
                Flow::union(vec![blunt().into(), dismissive().into()], considerate().into()),
                Flow::with_context(
                    Flow::chain(vec![agent_natural().into(), user_natural(&[]).into()]),
                    "I will make a follow-up comment about the draft without \
                     presenting a new section yet. I WILL NOT END THE CONVERSATION.",
                ),
            ]),
            4,
        ),
        end().into(),
    ])
}

pub fn checks() -> Vec<(String, CheckDef)> {
    vec![(
        "blunt".to_string(),
        CheckDef {
            criterion: "The message delivers opinions considerately, without harsh or \
                        dismissive phrasing."
                .into(),
            prompt: "The latest message was blunt or dismissive, which can discourage \
                     others. Explain how the same point could have been made \
                     considerately."
                .into(),
            follow_up: Some(Instruction::new(
                "I will soften my previous message and restate my point \
                 constructively.",
            )),
        },
    )]
}

pub fn seed() -> ScenarioSeed {
    ScenarioSeed {
        user_perspective: "Your teammate {agent} has been working on a draft proposal \
                           and asks you for your honest opinion on it.",
        agent_perspective: "You share the draft proposal you have been working on \
                            with a teammate and ask for their honest opinion.",
        user_goal: "Give {agent} honest, useful feedback on the draft without \
                    discouraging them.",
        is_user_initiated: false,
    }
}
