use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::Value;

use ferrule_common::protocol::{Directory, Request, Result, RpcArgs, RpcResult};
use ferrule_common::{InvokeFuture, Listener};

use crate::balancer::LoadBalancerType;
use crate::client::ClientCore;
use crate::cluster::{ClusterInvoker, ClusterStrategy, ClusterStrategyConfig, ReturnType};
use crate::dispatcher::DefaultDispatcher;

/// Extra time a blocking caller waits past the call timeout, covering the
/// timeout scanner's period.
const WAIT_GRACE: Duration = Duration::from_millis(500);

/// Configures a [`ServiceProxy`].
pub struct ProxyBuilder {
    core: Arc<ClientCore>,
    directory: Directory,
    balancer: LoadBalancerType,
    cluster: ClusterStrategyConfig,
    timeout: Option<Duration>,
    method_timeouts: HashMap<String, Duration>,
    return_types: HashMap<String, ReturnType>,
}

impl ProxyBuilder {
    pub(crate) fn new(core: Arc<ClientCore>, directory: Directory) -> Self {
        Self {
            core,
            directory,
            balancer: LoadBalancerType::default(),
            cluster: ClusterStrategyConfig::default(),
            timeout: None,
            method_timeouts: HashMap::new(),
            return_types: HashMap::new(),
        }
    }

    pub fn load_balancer(mut self, balancer: LoadBalancerType) -> Self {
        self.balancer = balancer;
        self
    }

    pub fn cluster(mut self, cluster: ClusterStrategyConfig) -> Self {
        self.cluster = cluster;
        self
    }

    /// Strategy for methods without an override.
    pub fn strategy(mut self, strategy: ClusterStrategy) -> Self {
        self.cluster.default = strategy;
        self
    }

    pub fn method_strategy(mut self, method: impl Into<String>, strategy: ClusterStrategy) -> Self {
        self.cluster.methods.insert(method.into(), strategy);
        self
    }

    /// Timeout for methods without an override; defaults to the client's.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method_timeout(mut self, method: impl Into<String>, timeout: Duration) -> Self {
        self.method_timeouts.insert(method.into(), timeout);
        self
    }

    /// Declared result type of `method`, used for fail-safe defaults.
    pub fn return_type(mut self, method: impl Into<String>, return_type: ReturnType) -> Self {
        self.return_types.insert(method.into(), return_type);
        self
    }

    pub fn build(self) -> ServiceProxy {
        let groups = self.core.group_list(&self.directory);
        let dispatcher = Arc::new(DefaultDispatcher::new(self.core.clone(), groups, self.balancer));

        let default_invoker = self.cluster.default.invoker(dispatcher.clone());
        let method_invokers = self
            .cluster
            .methods
            .iter()
            .map(|(method, strategy)| (method.clone(), strategy.invoker(dispatcher.clone())))
            .collect();

        ServiceProxy {
            timeout: self.timeout.unwrap_or(self.core.config.default_timeout),
            directory: self.directory,
            dispatcher,
            default_invoker,
            method_invokers,
            method_timeouts: self.method_timeouts,
            return_types: self.return_types,
        }
    }
}

/// Client-side stub of one remote service.
///
/// Four invocation modes:
///
/// - [`call`](Self::call): blocks the calling thread until the result
///   arrives. Do not use from inside an async task.
/// - [`call_async`](Self::call_async): returns an [`InvokeFuture`], which
///   can be awaited or waited on.
/// - [`call_with_listener`](Self::call_with_listener): the listener runs on
///   the thread that completes the call.
/// - [`broadcast`](Self::broadcast): one future per available provider.
pub struct ServiceProxy {
    directory: Directory,
    dispatcher: Arc<DefaultDispatcher>,
    default_invoker: Arc<dyn ClusterInvoker>,
    method_invokers: HashMap<String, Arc<dyn ClusterInvoker>>,
    timeout: Duration,
    method_timeouts: HashMap<String, Duration>,
    return_types: HashMap<String, ReturnType>,
}

impl ServiceProxy {
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn timeout_for(&self, method: &str) -> Duration {
        self.method_timeouts.get(method).copied().unwrap_or(self.timeout)
    }

    pub fn strategy_for(&self, method: &str) -> ClusterStrategy {
        self.invoker_for(method).strategy()
    }

    fn invoker_for(&self, method: &str) -> &Arc<dyn ClusterInvoker> {
        self.method_invokers.get(method).unwrap_or(&self.default_invoker)
    }

    fn request(&self, method: &str, args: RpcArgs) -> Request {
        Request::new(self.directory.clone(), method, args).with_timeout(self.timeout_for(method).as_millis() as u64)
    }

    /// Calls `method` and blocks until it completes.
    pub fn call(&self, method: &str, args: RpcArgs) -> Result<Value> {
        let attempts = match self.strategy_for(method) {
            ClusterStrategy::FailOver { retries } => retries as u32 + 1,
            _ => 1,
        };
        let wait = self.timeout_for(method) * attempts + WAIT_GRACE;
        self.call_async(method, args).get_result(wait)
    }

    pub fn call_async(&self, method: &str, args: RpcArgs) -> InvokeFuture<RpcResult> {
        let return_type = self.return_types.get(method).copied().unwrap_or_default();
        self.invoker_for(method).invoke(self.request(method, args), return_type)
    }

    pub fn call_with_listener(&self, method: &str, args: RpcArgs, listener: impl Listener<RpcResult> + 'static) {
        self.call_async(method, args).add_listener(listener);
    }

    /// Sends the call to every available provider under one correlation id.
    ///
    /// Cluster strategies do not apply to broadcasts.
    pub fn broadcast(&self, method: &str, args: RpcArgs) -> Result<Vec<InvokeFuture<RpcResult>>> {
        let dispatched = self.dispatcher.broadcast(&self.request(method, args))?;
        Ok(dispatched.into_iter().map(|d| d.future).collect())
    }

    /// [`broadcast`](Self::broadcast), then waits for every provider.
    pub async fn broadcast_all(&self, method: &str, args: RpcArgs) -> Result<Vec<Result<RpcResult>>> {
        let futures = self.broadcast(method, args)?;
        Ok(join_all(futures).await)
    }
}
