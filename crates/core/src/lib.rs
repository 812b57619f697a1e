//! Core engine for scripted-but-branching practice conversations.
//!
//! The crate is split along the seams of the system: `flow` compiles a
//! composable scenario description into an immutable graph of typed nodes,
//! `interpreter` walks that graph one turn at a time, `progression` tracks
//! stage unlocks, and `generate`/`checks`/`scenario` define the external
//! collaborators (message generation, criteria checking, scenario setup)
//! together with their LLM-backed and mock implementations. `levels` holds
//! the authored practice content.

pub mod checks;
pub mod flow;
pub mod generate;
pub mod interpreter;
pub mod levels;
pub mod progression;
pub mod scenario;
pub mod transcript;
