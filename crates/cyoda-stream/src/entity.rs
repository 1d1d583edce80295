//! Entity resolution.
//!
//! Request payloads declare a model name; known models are decoded into their
//! typed representation, anything else degrades to a generic document.
//! Resolution never fails.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, warn};

/// Entity handed to processors and criteria.
#[derive(Clone, Debug, PartialEq)]
pub enum Entity {
    /// Document validated against a registered model.
    Typed { model: String, data: Value },
    /// Untyped document for unknown or undeclared models.
    Generic(Value),
}

impl Entity {
    pub fn generic(data: Value) -> Self {
        Self::Generic(data)
    }

    pub fn model(&self) -> Option<&str> {
        match self {
            Self::Typed { model, .. } => Some(model),
            Self::Generic(_) => None,
        }
    }

    pub fn data(&self) -> &Value {
        match self {
            Self::Typed { data, .. } | Self::Generic(data) => data,
        }
    }

    pub fn into_data(self) -> Value {
        match self {
            Self::Typed { data, .. } | Self::Generic(data) => data,
        }
    }

    /// Same model, new document.
    pub fn with_data(self, data: Value) -> Self {
        match self {
            Self::Typed { model, .. } => Self::Typed { model, data },
            Self::Generic(_) => Self::Generic(data),
        }
    }
}

/// Turns a declared model name and a payload document into an [`Entity`].
pub trait EntityResolver: Send + Sync {
    fn resolve(&self, model: Option<&str>, data: Value) -> Entity;
}

/// A registered entity model.
pub trait EntityModel: Send + Sync {
    fn name(&self) -> &str;

    /// Validate and normalize a document of this model.
    fn normalize(&self, data: Value) -> Result<Value, serde_json::Error>;
}

/// Model backed by a serde type; documents are round-tripped through `T`.
pub struct TypedModel<T> {
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedModel<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _marker: PhantomData,
        }
    }
}

impl<T> EntityModel for TypedModel<T>
where
    T: DeserializeOwned + Serialize,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn normalize(&self, data: Value) -> Result<Value, serde_json::Error> {
        let typed: T = serde_json::from_value(data)?;
        serde_json::to_value(typed)
    }
}

/// In-memory model registry.
#[derive(Default)]
pub struct ModelRegistry {
    models: HashMap<String, Arc<dyn EntityModel>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: Arc<dyn EntityModel>) {
        self.models.insert(model.name().to_string(), model);
    }

    pub fn has(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }
}

impl EntityResolver for ModelRegistry {
    fn resolve(&self, model: Option<&str>, data: Value) -> Entity {
        let Some(name) = model else {
            return Entity::Generic(data);
        };
        let Some(entry) = self.models.get(name) else {
            debug!(model = name, "unknown entity model; using generic entity");
            return Entity::Generic(data);
        };

        match entry.normalize(data.clone()) {
            Ok(normalized) => Entity::Typed {
                model: name.to_string(),
                data: normalized,
            },
            Err(err) => {
                warn!(model = name, error = %err, "entity does not match its model; using generic entity");
                Entity::Generic(data)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct Laureate {
        id: u32,
        #[serde(default)]
        firstname: String,
    }

    fn registry() -> ModelRegistry {
        let mut registry = ModelRegistry::new();
        registry.register(Arc::new(TypedModel::<Laureate>::new("laureate")));
        registry
    }

    #[test]
    fn known_model_resolves_to_typed_entity() {
        let entity = registry().resolve(Some("laureate"), json!({"id": 7}));
        assert_eq!(entity.model(), Some("laureate"));
        assert_eq!(entity.data(), &json!({"id": 7, "firstname": ""}));
    }

    #[test]
    fn unknown_model_degrades_to_generic() {
        let entity = registry().resolve(Some("prize"), json!({"year": 1901}));
        assert_eq!(entity, Entity::Generic(json!({"year": 1901})));
    }

    #[test]
    fn mismatched_document_degrades_to_generic() {
        let entity = registry().resolve(Some("laureate"), json!({"id": "not-a-number"}));
        assert_eq!(entity, Entity::Generic(json!({"id": "not-a-number"})));
    }

    #[test]
    fn with_data_keeps_model() {
        let entity = Entity::Typed {
            model: "laureate".to_string(),
            data: json!({}),
        };
        let updated = entity.with_data(json!({"id": 1}));
        assert_eq!(updated.model(), Some("laureate"));
        assert_eq!(updated.into_data(), json!({"id": 1}));
    }
}
