//! Free-flowing conversation segments shared by every level: an agent turn
//! and a user turn that simply keep the exchange going.

use crate::flow::{Instruction, Segment, SegmentOption};

pub fn agent_natural() -> Segment {
    Segment::new("agent_natural", "talk").agent(
        "talk",
        Instruction::new(
            "I will continue the conversation naturally, responding to what was just \
             said and keeping the exchange going.",
        ),
        None,
    )
}

fn natural_options(checks: &[&str]) -> Vec<SegmentOption> {
    let instructions = [
        "I will respond naturally, directly addressing what was just said.",
        "I will share a relevant thought or experience of my own.",
        "I will ask a related question to keep the conversation going.",
    ];
    instructions
        .iter()
        .map(|description| {
            let mut option = SegmentOption::new(Instruction::new(*description));
            for check in checks {
                option = option.check(check);
            }
            option
        })
        .collect()
}

/// A user turn with a few natural replies to choose from.
pub fn user_natural(checks: &[&str]) -> Segment {
    Segment::new("user_natural", "reply").user("reply", natural_options(checks))
}

/// The open variant used by the playground: free-typed replies are allowed
/// and every reply runs the given checks.
pub fn user_natural_open(checks: &[&str]) -> Segment {
    Segment::new("user_natural", "reply").user_with_custom("reply", natural_options(checks))
}
