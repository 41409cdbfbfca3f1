use crate::core::Calculator;
use crate::error::{GraphError, GraphResult};
use crate::nodes::{
    FlowLimiterCalculator, PassThroughCalculator, ScaleCalculator, StringJoinCalculator,
    StringSourceCalculator,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Creates a fresh calculator instance for one node.
pub type CalculatorFactory = Arc<dyn Fn() -> Box<dyn Calculator> + Send + Sync>;

/// Calculator types known to a graph, by name.
///
/// Built explicitly and handed to `Graph::new`; there is no process-wide
/// table.
#[derive(Clone, Default)]
pub struct CalculatorRegistry {
    factories: HashMap<String, CalculatorFactory>,
}

impl CalculatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the calculators shipped in [`crate::nodes`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("PassThroughCalculator", || {
            Box::new(PassThroughCalculator::new()) as Box<dyn Calculator>
        });
        registry.register("FlowLimiterCalculator", || {
            Box::new(FlowLimiterCalculator::new()) as Box<dyn Calculator>
        });
        registry.register("ScaleCalculator", || {
            Box::new(ScaleCalculator::new()) as Box<dyn Calculator>
        });
        registry.register("StringSourceCalculator", || {
            Box::new(StringSourceCalculator::new()) as Box<dyn Calculator>
        });
        registry.register("StringJoinCalculator", || {
            Box::new(StringJoinCalculator::new()) as Box<dyn Calculator>
        });
        registry
    }

    /// Registers `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Calculator> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn create(&self, name: &str) -> GraphResult<Box<dyn Calculator>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| GraphError::config(format!("unknown calculator type `{}`", name)))?;
        Ok(factory())
    }
}
