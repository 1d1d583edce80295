//! Contracts to externally supplied business logic.
//!
//! Calculation handlers reach processors and criteria only by name through
//! [`Processor`] and [`CriteriaChecker`]. The registries here are the
//! in-memory implementations of both.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::entity::Entity;

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("processor '{0}' not found")]
    NotFound(String),

    #[error("processor '{name}' failed: {message}")]
    Failed { name: String, message: String },
}

#[derive(Debug, Error)]
pub enum CriteriaError {
    #[error("criteria '{0}' not found")]
    NotFound(String),

    #[error("criteria '{name}' failed: {message}")]
    Failed { name: String, message: String },
}

/// Name-based processor invocation.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, name: &str, entity: Entity) -> Result<Entity, ProcessorError>;
}

/// Name-based criteria evaluation.
#[async_trait]
pub trait CriteriaChecker: Send + Sync {
    async fn check(&self, name: &str, entity: &Entity) -> Result<bool, CriteriaError>;
}

/// A single named processor.
#[async_trait]
pub trait EntityProcessor: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, entity: Entity) -> anyhow::Result<Entity>;
}

/// A single named criteria.
#[async_trait]
pub trait EntityCriteria: Send + Sync {
    fn name(&self) -> &str;

    async fn check(&self, entity: &Entity) -> anyhow::Result<bool>;
}

/// Registry for processor plugins.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn EntityProcessor>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, processor: Arc<dyn EntityProcessor>) {
        self.processors
            .insert(processor.name().to_string(), processor);
    }

    pub fn has(&self, name: &str) -> bool {
        self.processors.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.processors.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl Processor for ProcessorRegistry {
    async fn process(&self, name: &str, entity: Entity) -> Result<Entity, ProcessorError> {
        let processor = self
            .processors
            .get(name)
            .ok_or_else(|| ProcessorError::NotFound(name.to_string()))?;

        processor
            .process(entity)
            .await
            .map_err(|err| ProcessorError::Failed {
                name: name.to_string(),
                message: format!("{err:#}"),
            })
    }
}

/// Registry for criteria plugins.
#[derive(Default)]
pub struct CriteriaRegistry {
    criteria: HashMap<String, Arc<dyn EntityCriteria>>,
}

impl CriteriaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, criteria: Arc<dyn EntityCriteria>) {
        self.criteria.insert(criteria.name().to_string(), criteria);
    }

    pub fn has(&self, name: &str) -> bool {
        self.criteria.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.criteria.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl CriteriaChecker for CriteriaRegistry {
    async fn check(&self, name: &str, entity: &Entity) -> Result<bool, CriteriaError> {
        let criteria = self
            .criteria
            .get(name)
            .ok_or_else(|| CriteriaError::NotFound(name.to_string()))?;

        criteria
            .check(entity)
            .await
            .map_err(|err| CriteriaError::Failed {
                name: name.to_string(),
                message: format!("{err:#}"),
            })
    }
}

/// Processor backed by a synchronous closure.
pub struct FnProcessor<F> {
    name: String,
    func: F,
}

pub fn processor_fn<F>(name: impl Into<String>, func: F) -> Arc<FnProcessor<F>>
where
    F: Fn(Entity) -> anyhow::Result<Entity> + Send + Sync + 'static,
{
    Arc::new(FnProcessor {
        name: name.into(),
        func,
    })
}

#[async_trait]
impl<F> EntityProcessor for FnProcessor<F>
where
    F: Fn(Entity) -> anyhow::Result<Entity> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, entity: Entity) -> anyhow::Result<Entity> {
        (self.func)(entity)
    }
}

/// Criteria backed by a synchronous closure.
pub struct FnCriteria<F> {
    name: String,
    func: F,
}

pub fn criteria_fn<F>(name: impl Into<String>, func: F) -> Arc<FnCriteria<F>>
where
    F: Fn(&Entity) -> anyhow::Result<bool> + Send + Sync + 'static,
{
    Arc::new(FnCriteria {
        name: name.into(),
        func,
    })
}

#[async_trait]
impl<F> EntityCriteria for FnCriteria<F>
where
    F: Fn(&Entity) -> anyhow::Result<bool> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn check(&self, entity: &Entity) -> anyhow::Result<bool> {
        (self.func)(entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn processor_registry_distinguishes_missing_from_failing() {
        let mut registry = ProcessorRegistry::new();
        registry.register(processor_fn("explode", |_| anyhow::bail!("boom")));

        let missing = registry
            .process("absent", Entity::generic(json!({})))
            .await
            .expect_err("must be missing");
        assert!(matches!(missing, ProcessorError::NotFound(name) if name == "absent"));

        let failed = registry
            .process("explode", Entity::generic(json!({})))
            .await
            .expect_err("must fail");
        assert!(matches!(failed, ProcessorError::Failed { ref message, .. } if message.contains("boom")));
    }

    #[tokio::test]
    async fn criteria_registry_evaluates_by_name() {
        let mut registry = CriteriaRegistry::new();
        registry.register(criteria_fn("has_id", |entity| {
            Ok(entity.data().get("id").is_some())
        }));

        assert!(registry.has("has_id"));
        assert!(registry
            .check("has_id", &Entity::generic(json!({"id": 1})))
            .await
            .unwrap());
        assert!(matches!(
            registry.check("other", &Entity::generic(json!({}))).await,
            Err(CriteriaError::NotFound(_))
        ));
    }
}
