//! Authored practice content, compiled once at startup into an immutable
//! [`LevelSet`] and passed by reference wherever a stage's graph is needed.

pub mod blunt;
pub mod figurative;
pub mod natural;
pub mod playground;

use crate::flow::{CompileError, Graph, compile};
use crate::progression::Stage;
use crate::scenario::ScenarioSeed;

/// One stage's compiled graph plus its scenario seed. The playground builds
/// its scenario from a generated topic instead of a seed.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelDefinition {
    pub stage: Stage,
    pub graph: Graph,
    pub seed: Option<ScenarioSeed>,
}

/// Every stage's definition, built once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSet {
    figurative: LevelDefinition,
    blunt: LevelDefinition,
    playground: LevelDefinition,
}

impl LevelSet {
    pub fn build() -> Result<Self, CompileError> {
        Ok(Self {
            figurative: LevelDefinition {
                stage: Stage::Level0,
                graph: compile(&figurative::flow(), figurative::checks())?,
                seed: Some(figurative::seed()),
            },
            blunt: LevelDefinition {
                stage: Stage::Level1,
                graph: compile(&blunt::flow(), blunt::checks())?,
                seed: Some(blunt::seed()),
            },
            playground: LevelDefinition {
                stage: Stage::Playground,
                graph: compile(&playground::flow(), playground::checks())?,
                seed: None,
            },
        })
    }

    pub fn get(&self, stage: Stage) -> &LevelDefinition {
        match stage {
            Stage::Level0 => &self.figurative,
            Stage::Level1 => &self.blunt,
            Stage::Playground => &self.playground,
        }
    }

    pub fn graph(&self, stage: Stage) -> &Graph {
        &self.get(stage).graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::NodeKind;

    #[test]
    fn every_stage_compiles() {
        let levels = LevelSet::build().unwrap();
        for stage in Stage::ALL {
            let definition = levels.get(stage);
            assert_eq!(definition.stage, stage);
            assert!(definition.graph.node_count() > 0);
            assert!(definition.graph.entry().is_some());
        }
    }

    #[test]
    fn level_builds_are_deterministic() {
        let first = LevelSet::build().unwrap();
        let second = LevelSet::build().unwrap();
        for stage in Stage::ALL {
            assert_eq!(first.graph(stage), second.graph(stage));
        }
    }

    #[test]
    fn levels_open_with_the_agent_and_the_playground_with_the_user() {
        let levels = LevelSet::build().unwrap();
        assert_eq!(levels.graph(Stage::Level0).entry().unwrap().kind, NodeKind::Agent);
        assert_eq!(levels.graph(Stage::Level1).entry().unwrap().kind, NodeKind::Agent);
        assert_eq!(
            levels.graph(Stage::Playground).entry().unwrap().kind,
            NodeKind::User
        );
    }

    #[test]
    fn seeds_exist_exactly_where_scenarios_are_seeded() {
        let levels = LevelSet::build().unwrap();
        assert!(levels.get(Stage::Level0).seed.is_some());
        assert!(levels.get(Stage::Level1).seed.is_some());
        assert!(levels.get(Stage::Playground).seed.is_none());
    }
}
