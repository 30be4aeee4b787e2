//! Provider-side service definitions.
//!
//! Methods are plain closures registered by name when the service is built;
//! dispatch is a hash lookup on `(directory, method)`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use ferrule_common::protocol::{Address, Directory, RpcArgs};
use ferrule_registry::RegisterMeta;

/// Failure reported by a provider method.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MethodError {
    /// Application error. `expected` marks errors the method declares as
    /// part of its contract.
    #[error("{message}")]
    Business { message: String, expected: bool },

    /// The arguments did not match the method's signature.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
}

impl MethodError {
    pub fn expected(message: impl Into<String>) -> Self {
        MethodError::Business {
            message: message.into(),
            expected: true,
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        MethodError::Business {
            message: message.into(),
            expected: false,
        }
    }
}

pub type MethodResult = Result<Value, MethodError>;

/// A registered method.
pub type MethodHandler = Arc<dyn Fn(RpcArgs) -> MethodResult + Send + Sync>;

/// One service: its directory, weight and method table.
pub struct ServiceDefinition {
    directory: Directory,
    weight: u32,
    warm_up: Duration,
    methods: HashMap<String, MethodHandler>,
}

impl ServiceDefinition {
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn warm_up(&self) -> Duration {
        self.warm_up
    }

    pub fn method(&self, name: &str) -> Option<&MethodHandler> {
        self.methods.get(name)
    }

    pub fn method_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// What to publish to the registry for this service served at `address`.
    pub fn register_meta(&self, address: Address, connection_count: u32) -> RegisterMeta {
        RegisterMeta {
            address,
            directory: self.directory.clone(),
            weight: self.weight,
            warm_up_ms: self.warm_up.as_millis() as u64,
            connection_count,
        }
    }
}

impl std::fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDefinition")
            .field("directory", &self.directory)
            .field("weight", &self.weight)
            .field("methods", &self.method_names())
            .finish()
    }
}

/// Builds a [`ServiceDefinition`].
///
/// # Example
///
/// ```
/// use ferrule_common::protocol::Directory;
/// use ferrule_server::{MethodError, ServiceBuilder};
/// use serde_json::json;
///
/// let calculator = ServiceBuilder::new(Directory::of("Calculator"))
///     .typed_method("add", |(a, b): (i64, i64)| Ok(a + b))
///     .typed_method("div", |(a, b): (i64, i64)| {
///         if b == 0 {
///             return Err(MethodError::expected("division by zero"));
///         }
///         Ok(a / b)
///     })
///     .weight(80)
///     .build();
///
/// let add = calculator.method("add").unwrap();
/// assert_eq!(add(vec![json!(2), json!(3)]), Ok(json!(5)));
/// ```
pub struct ServiceBuilder {
    directory: Directory,
    weight: u32,
    warm_up: Duration,
    methods: HashMap<String, MethodHandler>,
}

impl ServiceBuilder {
    pub fn new(directory: Directory) -> Self {
        Self {
            directory,
            weight: 50,
            warm_up: Duration::ZERO,
            methods: HashMap::new(),
        }
    }

    /// Registers a method taking the raw argument list.
    pub fn method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(RpcArgs) -> MethodResult + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(handler));
        self
    }

    /// Registers a method whose argument list is deserialized as `A`
    /// (usually a tuple, one element per argument).
    pub fn typed_method<A, R, F>(self, name: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned,
        R: Serialize,
        F: Fn(A) -> Result<R, MethodError> + Send + Sync + 'static,
    {
        self.method(name, move |args: RpcArgs| {
            let args: A = serde_json::from_value(Value::Array(args))
                .map_err(|e| MethodError::InvalidArguments(e.to_string()))?;
            let result = handler(args)?;
            serde_json::to_value(result).map_err(|e| MethodError::unexpected(format!("unserializable result: {}", e)))
        })
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn warm_up(mut self, warm_up: Duration) -> Self {
        self.warm_up = warm_up;
        self
    }

    pub fn build(self) -> ServiceDefinition {
        ServiceDefinition {
            directory: self.directory,
            weight: self.weight,
            warm_up: self.warm_up,
            methods: self.methods,
        }
    }
}

/// Services exported by one server.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    services: RwLock<HashMap<Directory, Arc<ServiceDefinition>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a service.
    pub fn register(&self, service: ServiceDefinition) -> Option<Arc<ServiceDefinition>> {
        tracing::info!(directory = %service.directory, methods = service.methods.len(), "service registered");
        self.services
            .write()
            .insert(service.directory.clone(), Arc::new(service))
    }

    pub fn unregister(&self, directory: &Directory) -> Option<Arc<ServiceDefinition>> {
        self.services.write().remove(directory)
    }

    pub fn lookup(&self, directory: &Directory) -> Option<Arc<ServiceDefinition>> {
        self.services.read().get(directory).cloned()
    }

    pub fn services(&self) -> Vec<Arc<ServiceDefinition>> {
        self.services.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.services.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
