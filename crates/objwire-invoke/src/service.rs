use std::collections::HashMap;
use std::sync::Arc;

use objwire_types::{ClassSchema, ClassSchemaBuilder, Registry, StateField};
use tracing::info;

use crate::caller::MethodCaller;
use crate::error::{InvokeError, InvokeResult};

/// A class's schema together with the callers of its methods.
#[derive(Debug)]
pub struct ServiceDefinition {
    schema: ClassSchema,
    callers: HashMap<String, MethodCaller>,
}

impl ServiceDefinition {
    pub fn builder(class_id: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder {
            schema: ClassSchema::builder(class_id),
            callers: Vec::new(),
        }
    }

    pub fn class_id(&self) -> &str {
        self.schema.class_id()
    }

    pub fn schema(&self) -> &ClassSchema {
        &self.schema
    }

    pub fn caller(&self, method: &str) -> Option<&MethodCaller> {
        self.callers.get(method)
    }
}

/// Builds a [`ServiceDefinition`]; schema validation runs in `build`.
pub struct ServiceBuilder {
    schema: ClassSchemaBuilder,
    callers: Vec<MethodCaller>,
}

impl ServiceBuilder {
    pub fn field(mut self, field: StateField) -> Self {
        self.schema = self.schema.field(field);
        self
    }

    pub fn method(mut self, caller: MethodCaller) -> Self {
        self.schema = self.schema.method(caller.signature().clone());
        self.callers.push(caller);
        self
    }

    pub fn read_accessor(mut self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.schema = self.schema.read_accessor(name, field);
        self
    }

    pub fn write_accessor(mut self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.schema = self.schema.write_accessor(name, field);
        self
    }

    pub fn build(self) -> InvokeResult<ServiceDefinition> {
        let schema = self.schema.build()?;
        let callers = self
            .callers
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect();
        Ok(ServiceDefinition { schema, callers })
    }
}

/// Every service known to one process, plus the shared schema registry.
///
/// Built once at start-up; immutable afterwards.
#[derive(Debug)]
pub struct ServiceCatalog {
    registry: Arc<Registry>,
    callers: HashMap<String, HashMap<String, MethodCaller>>,
}

impl ServiceCatalog {
    pub fn new(services: impl IntoIterator<Item = ServiceDefinition>) -> InvokeResult<Self> {
        let mut registry = Registry::new();
        let mut callers = HashMap::new();
        for service in services {
            let class_id = service.class_id().to_string();
            if callers.contains_key(&class_id) {
                return Err(InvokeError::DuplicateService(class_id));
            }
            registry.register(service.schema)?;
            info!(class_id = %class_id, methods = service.callers.len(), "service registered");
            callers.insert(class_id, service.callers);
        }
        Ok(Self {
            registry: Arc::new(registry),
            callers,
        })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn schema(&self, class_id: &str) -> InvokeResult<Arc<ClassSchema>> {
        self.registry
            .get(class_id)
            .ok_or_else(|| InvokeError::UnknownService(class_id.to_string()))
    }

    pub fn caller(&self, class_id: &str, method: &str) -> InvokeResult<&MethodCaller> {
        self.callers
            .get(class_id)
            .ok_or_else(|| InvokeError::UnknownService(class_id.to_string()))?
            .get(method)
            .ok_or_else(|| InvokeError::UnknownMethod {
                class: class_id.to_string(),
                method: method.to_string(),
            })
    }

    pub fn len(&self) -> usize {
        self.callers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objwire_types::{ParamSpec, TypeDescriptor};

    fn greeter() -> ServiceDefinition {
        ServiceDefinition::builder("Greeter")
            .field(StateField::new("greetings", 0, TypeDescriptor::int()))
            .method(MethodCaller::unary(
                "greet",
                ParamSpec::new("name", TypeDescriptor::string()),
                TypeDescriptor::string(),
                |_, name: String| Ok(format!("hello {name}")),
            ))
            .read_accessor("get_greetings", "greetings")
            .build()
            .unwrap()
    }

    #[test]
    fn catalog_resolves_callers() {
        let catalog = ServiceCatalog::new([greeter()]).unwrap();
        assert_eq!(catalog.len(), 1);
        assert!(catalog.caller("Greeter", "greet").is_ok());
        assert!(catalog.schema("Greeter").unwrap().method("greet").is_some());
        assert!(matches!(
            catalog.caller("Greeter", "wave").unwrap_err(),
            InvokeError::UnknownMethod { .. }
        ));
        assert!(matches!(
            catalog.caller("Ghost", "greet").unwrap_err(),
            InvokeError::UnknownService(_)
        ));
    }

    #[test]
    fn duplicate_service_rejected() {
        assert!(matches!(
            ServiceCatalog::new([greeter(), greeter()]).unwrap_err(),
            InvokeError::DuplicateService(_)
        ));
    }

    #[test]
    fn schema_errors_surface_at_build() {
        let err = ServiceDefinition::builder("Broken")
            .field(StateField::new("a", 0, TypeDescriptor::int()))
            .read_accessor("get_b", "b")
            .build()
            .unwrap_err();
        assert!(matches!(err, InvokeError::Schema(_)));
    }
}
