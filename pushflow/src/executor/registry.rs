//! Registry mapping stage identifiers to executors.

use super::StageExecutor;
use crate::core::StageId;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of stage executors.
///
/// Adding a stage means registering an executor here; nothing else in the
/// dispatch path branches on stage identity.
#[derive(Debug, Default, Clone)]
pub struct StageRegistry {
    executors: HashMap<StageId, Arc<dyn StageExecutor>>,
}

impl StageRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an executor under its own stage id.
    ///
    /// Returns the executor previously registered for that stage, if any.
    pub fn register(&mut self, executor: Arc<dyn StageExecutor>) -> Option<Arc<dyn StageExecutor>> {
        let stage = executor.stage().clone();
        let previous = self.executors.insert(stage.clone(), executor);
        if previous.is_some() {
            tracing::warn!(stage = %stage, "Replaced previously registered stage executor");
        }
        previous
    }

    /// Registers an executor, builder style.
    #[must_use]
    pub fn with(mut self, executor: Arc<dyn StageExecutor>) -> Self {
        self.register(executor);
        self
    }

    /// Gets the executor for a stage.
    #[must_use]
    pub fn get(&self, stage: &StageId) -> Option<Arc<dyn StageExecutor>> {
        self.executors.get(stage).cloned()
    }

    /// Checks if a stage has an executor.
    #[must_use]
    pub fn contains(&self, stage: &StageId) -> bool {
        self.executors.contains_key(stage)
    }

    /// Lists registered stages in sorted order.
    #[must_use]
    pub fn stages(&self) -> Vec<StageId> {
        let mut stages: Vec<StageId> = self.executors.keys().cloned().collect();
        stages.sort();
        stages
    }

    /// Returns the number of registered executors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Returns true if no executors are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockExecutor;

    #[test]
    fn test_register_and_lookup() {
        let registry = StageRegistry::new()
            .with(Arc::new(MockExecutor::new(StageId::stt())))
            .with(Arc::new(MockExecutor::new(StageId::smart())));

        assert_eq!(registry.len(), 2);
        assert!(registry.contains(&StageId::stt()));
        assert!(registry.get(&StageId::smart()).is_some());
        assert!(registry.get(&StageId::parse("noteback").unwrap()).is_none());
        assert_eq!(registry.stages(), vec![StageId::smart(), StageId::stt()]);
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = StageRegistry::new();
        assert!(registry.register(Arc::new(MockExecutor::new(StageId::stt()))).is_none());
        assert!(registry.register(Arc::new(MockExecutor::new(StageId::stt()))).is_some());
        assert_eq!(registry.len(), 1);
    }
}
