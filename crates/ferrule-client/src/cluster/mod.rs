//! Cluster fault-tolerance strategies.
//!
//! A [`ClusterInvoker`] sits between a proxy and a [`Dispatcher`]. It decides
//! what happens when a dispatched call fails:
//!
//! - [`FailFast`]: nothing, the failure goes to the caller.
//! - [`FailOver`]: re-dispatch to a provider not tried yet in this call,
//!   up to `retries` extra attempts.
//! - [`FailSafe`]: log the failure and complete with the return type's
//!   default value.
//!
//! Invokers keep no state between calls.

mod fail_fast;
mod fail_over;
mod fail_safe;

pub use fail_fast::FailFast;
pub use fail_over::FailOver;
pub use fail_safe::FailSafe;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;

use ferrule_common::protocol::{Address, Request, Result, RpcResult};
use ferrule_common::InvokeFuture;

/// A request handed to one provider.
#[derive(Debug)]
pub struct Dispatched {
    /// Address of the provider the request went to.
    pub target: Address,
    pub future: InvokeFuture<RpcResult>,
}

/// Sends one request to one provider of the request's directory.
pub trait Dispatcher: Send + Sync {
    /// Dispatches `request`, avoiding `excluded` providers when any other is
    /// available.
    ///
    /// An `Err` means no provider was chosen or the request could not be
    /// encoded. A write refused by the chosen provider's channel comes back
    /// as a [`Dispatched`] whose future has already failed, so the target
    /// is known.
    fn dispatch(&self, request: &Request, excluded: &HashSet<Address>) -> Result<Dispatched>;
}

pub trait ClusterInvoker: Send + Sync {
    fn strategy(&self) -> ClusterStrategy;

    fn invoke(&self, request: Request, return_type: ReturnType) -> InvokeFuture<RpcResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClusterStrategy {
    #[default]
    FailFast,
    FailOver {
        retries: usize,
    },
    FailSafe,
}

impl ClusterStrategy {
    pub fn invoker(self, dispatcher: Arc<dyn Dispatcher>) -> Arc<dyn ClusterInvoker> {
        match self {
            ClusterStrategy::FailFast => Arc::new(FailFast::new(dispatcher)),
            ClusterStrategy::FailOver { retries } => Arc::new(FailOver::new(dispatcher, retries)),
            ClusterStrategy::FailSafe => Arc::new(FailSafe::new(dispatcher)),
        }
    }
}

/// Strategy per method, with a service-wide default.
#[derive(Debug, Clone, Default)]
pub struct ClusterStrategyConfig {
    pub default: ClusterStrategy,
    pub methods: HashMap<String, ClusterStrategy>,
}

impl ClusterStrategyConfig {
    pub fn new(default: ClusterStrategy) -> Self {
        Self {
            default,
            methods: HashMap::new(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>, strategy: ClusterStrategy) -> Self {
        self.methods.insert(method.into(), strategy);
        self
    }

    pub fn for_method(&self, method: &str) -> ClusterStrategy {
        self.methods.get(method).copied().unwrap_or(self.default)
    }
}

/// Declared result type of a method; decides the fail-safe fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnType {
    #[default]
    Null,
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl ReturnType {
    pub fn default_value(self) -> Value {
        match self {
            ReturnType::Null => Value::Null,
            ReturnType::Bool => Value::Bool(false),
            ReturnType::Integer => Value::from(0),
            ReturnType::Float => Value::from(0.0),
            ReturnType::String => Value::String(String::new()),
            ReturnType::Array => Value::Array(Vec::new()),
            ReturnType::Object => Value::Object(serde_json::Map::new()),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use ferrule_common::protocol::FerruleError;
    use parking_lot::Mutex;

    /// What the scripted dispatcher does on one attempt.
    #[derive(Debug, Clone)]
    pub enum Step {
        /// Dispatch succeeds and the future completes with this value.
        Reply(Value),
        /// Dispatch succeeds and the future fails.
        Fail(FerruleError),
        /// `dispatch` itself returns the error.
        Reject(FerruleError),
    }

    /// Providers `p0..pN`; attempt `k` follows `steps[k]` (the last step
    /// repeats) on the first provider not excluded.
    pub struct ScriptedDispatcher {
        providers: Vec<Address>,
        steps: Vec<Step>,
        pub calls: Mutex<Vec<(u64, Address)>>,
    }

    impl ScriptedDispatcher {
        pub fn new(provider_count: u16, steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                providers: (0..provider_count).map(|i| Address::new("p", i)).collect(),
                steps,
                calls: Mutex::new(Vec::new()),
            })
        }

        pub fn targets(&self) -> Vec<Address> {
            self.calls.lock().iter().map(|(_, a)| a.clone()).collect()
        }

        pub fn request_ids(&self) -> Vec<u64> {
            self.calls.lock().iter().map(|(id, _)| *id).collect()
        }
    }

    impl Dispatcher for ScriptedDispatcher {
        fn dispatch(&self, request: &Request, excluded: &HashSet<Address>) -> Result<Dispatched> {
            let target = self
                .providers
                .iter()
                .find(|a| !excluded.contains(a))
                .or_else(|| self.providers.first())
                .cloned()
                .ok_or_else(|| FerruleError::NoAvailableProvider(request.directory.to_string()))?;

            let attempt = {
                let mut calls = self.calls.lock();
                calls.push((request.id, target.clone()));
                calls.len() - 1
            };
            let step = self.steps[attempt.min(self.steps.len() - 1)].clone();

            let future = match step {
                Step::Reply(value) => InvokeFuture::completed(value),
                Step::Fail(err) => InvokeFuture::failed(err),
                Step::Reject(err) => return Err(err),
            };
            Ok(Dispatched { target, future })
        }
    }

    pub fn request() -> Request {
        Request::new(ferrule_common::protocol::Directory::of("Svc"), "call", vec![])
    }
}
