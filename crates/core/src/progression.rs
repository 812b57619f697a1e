//! Stage progression: per-stage sent-message counters and monotonic unlocks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The progression tiers, in unlock order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Stage {
    #[serde(rename = "level-0")]
    Level0,
    #[serde(rename = "level-1")]
    Level1,
    #[serde(rename = "playground")]
    Playground,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Level0, Stage::Level1, Stage::Playground];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Level0 => "level-0",
            Stage::Level1 => "level-1",
            Stage::Playground => "playground",
        }
    }

    /// Whether a user whose highest unlocked stage is `self` may act on
    /// `stage`.
    pub fn unlocks(self, stage: Stage) -> bool {
        stage <= self
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("'{0}' is not a stage name")]
pub struct ParseStageError(String);

impl FromStr for Stage {
    type Err = ParseStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "level-0" => Ok(Stage::Level0),
            "level-1" => Ok(Stage::Level1),
            "playground" => Ok(Stage::Playground),
            other => Err(ParseStageError(other.to_string())),
        }
    }
}

/// Messages sent per stage, across all of a user's conversations.
pub type SentCounts = BTreeMap<Stage, u32>;

/// Sent messages on a stage before the next one unlocks.
pub const UNLOCK_THRESHOLD: u32 = 8;

/// The stage the user should be unlocked to after acting on `current`.
/// Identity until the current stage's counter reaches the threshold.
pub fn next_stage(current: Stage, counts: &SentCounts) -> Stage {
    if counts.get(&current).copied().unwrap_or(0) < UNLOCK_THRESHOLD {
        return current;
    }
    match current {
        Stage::Level0 => Stage::Level1,
        Stage::Level1 => Stage::Playground,
        Stage::Playground => Stage::Playground,
    }
}

/// Monotonic unlock: a stage, once reached, is never re-locked.
pub fn raise(unlocked: Stage, candidate: Stage) -> Stage {
    unlocked.max(candidate)
}
