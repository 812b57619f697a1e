//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources: the database, the compiled level set, the interpreter
//! and the scenario service.

use crate::config::Config;
use parley_core::interpreter::Interpreter;
use parley_core::levels::LevelSet;
use parley_core::scenario::ScenarioService;
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all
/// handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<crate::db::Db>,
    pub levels: Arc<LevelSet>,
    pub interpreter: Arc<Interpreter>,
    pub scenarios: Arc<dyn ScenarioService>,
    pub config: Arc<Config>,
}
