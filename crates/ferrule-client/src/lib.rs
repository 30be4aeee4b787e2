//! Ferrule consumer runtime.
//!
//! - [`FerruleClient`] owns provider connections, the [`InvocationRegistry`]
//!   and its [`TimeoutScanner`]
//! - [`ServiceProxy`] issues calls for one directory
//! - [`balancer`] picks a provider group, [`cluster`] decides what to do on
//!   failure

pub mod balancer;
pub mod client;
pub mod cluster;
pub mod dispatcher;
pub mod group;
pub mod invocation;
pub mod proxy;
pub mod registry;

pub use balancer::{LoadBalancer, LoadBalancerType, SelectScratch, Weights};
pub use client::{ClientConfig, FerruleClient};
pub use cluster::{ClusterInvoker, ClusterStrategy, ClusterStrategyConfig, Dispatched, Dispatcher, ReturnType};
pub use dispatcher::DefaultDispatcher;
pub use group::{ChannelGroup, GroupList, GroupSnapshot, DEFAULT_WEIGHT};
pub use invocation::{DispatchMode, PendingInvocation};
pub use proxy::{ProxyBuilder, ServiceProxy};
pub use registry::{InvocationRegistry, ScannerConfig, TimeoutScanner};
