//! Engine registry -- a named collection of engine constructors.
//!
//! The CLI builds one registry at startup and looks engines up by the
//! name the user selected (e.g. `--engine codex`).

use std::collections::BTreeMap;

use super::claude_code::ClaudeCodeEngine;
use super::codex::CodexEngine;
use super::opencode::OpenCodeEngine;
use super::trait_def::Engine;
use super::types::EngineConfig;

/// Builds an engine from its configuration overrides.
pub type EngineFactory = fn(&EngineConfig) -> Box<dyn Engine>;

/// A collection of registered engine factories, keyed by name.
///
/// # Example
///
/// ```
/// use drover_core::engine::{EngineConfig, EngineRegistry};
///
/// let registry = EngineRegistry::with_defaults();
/// let engine = registry.create("claude", &EngineConfig::default()).unwrap();
/// assert_eq!(engine.name(), "claude");
/// ```
#[derive(Default)]
pub struct EngineRegistry {
    factories: BTreeMap<String, EngineFactory>,
}

impl EngineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in engine.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ClaudeCodeEngine::NAME, |c| {
            Box::new(ClaudeCodeEngine::new(c.clone()))
        });
        registry.register(CodexEngine::NAME, |c| Box::new(CodexEngine::new(c.clone())));
        registry.register(OpenCodeEngine::NAME, |c| {
            Box::new(OpenCodeEngine::new(c.clone()))
        });
        registry
    }

    /// Register a factory under `name`.
    ///
    /// If a factory with the same name is already registered, it is
    /// replaced and the old one is returned.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: EngineFactory,
    ) -> Option<EngineFactory> {
        self.factories.insert(name.into(), factory)
    }

    /// Build the engine registered under `name`.
    pub fn create(&self, name: &str, config: &EngineConfig) -> Option<Box<dyn Engine>> {
        self.factories.get(name).map(|factory| factory(config))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.list())
            .finish()
    }
}
