//! Ordered stage layout of a pipeline run.

use serde::{Deserialize, Serialize};

use crate::core::StageId;
use crate::errors::ConfigError;

/// The ordered stages a run passes through, e.g. `stt -> smart`.
///
/// Executors may name their own next stage; the layout only fills the gap
/// when they do not, and tells restarts where a run begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<StageId>", into = "Vec<StageId>")]
pub struct PipelineLayout {
    stages: Vec<StageId>,
}

impl PipelineLayout {
    /// Creates a layout, rejecting empty or repeating stage lists.
    pub fn new(stages: Vec<StageId>) -> Result<Self, ConfigError> {
        if stages.is_empty() {
            return Err(ConfigError::invalid("layout", "must name at least one stage"));
        }
        for (i, stage) in stages.iter().enumerate() {
            if stages[..i].contains(stage) {
                return Err(ConfigError::invalid(
                    "layout",
                    format!("stage '{stage}' appears more than once"),
                ));
            }
        }
        Ok(Self { stages })
    }

    /// The two-stage speech pipeline: `stt` then `smart`.
    #[must_use]
    pub fn speech() -> Self {
        Self {
            stages: vec![StageId::stt(), StageId::smart()],
        }
    }

    /// Returns the first stage.
    #[must_use]
    pub fn first(&self) -> &StageId {
        // Non-empty by construction.
        &self.stages[0]
    }

    /// Returns the stage after `stage`, if any.
    #[must_use]
    pub fn next_after(&self, stage: &StageId) -> Option<&StageId> {
        let pos = self.stages.iter().position(|s| s == stage)?;
        self.stages.get(pos + 1)
    }

    /// Returns true if `stage` is part of the layout.
    #[must_use]
    pub fn contains(&self, stage: &StageId) -> bool {
        self.stages.contains(stage)
    }

    /// Returns the stages in order.
    #[must_use]
    pub fn stages(&self) -> &[StageId] {
        &self.stages
    }
}

impl TryFrom<Vec<StageId>> for PipelineLayout {
    type Error = ConfigError;

    fn try_from(stages: Vec<StageId>) -> Result<Self, Self::Error> {
        Self::new(stages)
    }
}

impl From<PipelineLayout> for Vec<StageId> {
    fn from(layout: PipelineLayout) -> Self {
        layout.stages
    }
}
