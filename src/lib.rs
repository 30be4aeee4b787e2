//! Ferrule RPC
//!
//! Consumers call remote services through [`client::ServiceProxy`] handles;
//! providers export closure-based services through [`server::FerruleServer`];
//! a registry (external) tells consumers which providers serve which
//! directory.
//!
//! This crate only re-exports the workspace members:
//!
//! | module | crate |
//! |---|---|
//! | [`common`] | `ferrule-common`: queue, wire protocol, futures, channels |
//! | [`client`] | `ferrule-client`: load balancing, cluster strategies, proxies |
//! | [`server`] | `ferrule-server`: provider registry, worker pool, acceptor |
//! | [`registry`] | `ferrule-registry`: registry messages and client |
//! | [`metrics`] | `ferrule-metrics`: counters, histograms, snapshots |
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ferrule::prelude::*;
//! use serde_json::json;
//!
//! # async fn run() -> ferrule::common::Result<()> {
//! let services = Arc::new(ProviderRegistry::new());
//! services.register(
//!     ServiceBuilder::new(Directory::of("Calculator"))
//!         .typed_method("add", |(a, b): (i64, i64)| Ok(a + b))
//!         .build(),
//! );
//! let server = FerruleServer::bind("127.0.0.1:0", ServerConfig::default(), services)
//!     .await?
//!     .spawn()?;
//!
//! let client = FerruleClient::new(ClientConfig::default())?;
//! client
//!     .connect_default(Directory::of("Calculator"), Address::from(server.local_addr()))
//!     .await?;
//!
//! let calculator = client.proxy(Directory::of("Calculator")).build();
//! let sum = calculator.call_async("add", vec![json!(1), json!(2)]).await?;
//! assert_eq!(sum, json!(3));
//! # Ok(())
//! # }
//! ```

pub use ferrule_client as client;
pub use ferrule_common as common;
pub use ferrule_metrics as metrics;
pub use ferrule_registry as registry;
pub use ferrule_server as server;

/// The types most programs need.
pub mod prelude {
    pub use ferrule_client::{
        ClientConfig, ClusterStrategy, ClusterStrategyConfig, FerruleClient, LoadBalancerType, ReturnType,
        ServiceProxy,
    };
    pub use ferrule_common::{Address, Directory, FerruleError, InvokeFuture, Status};
    pub use ferrule_registry::{RegisterMeta, RegistryClient, RegistryClientConfig, RegistryEvent};
    pub use ferrule_server::{FerruleServer, MethodError, ProviderRegistry, ServerConfig, ServiceBuilder};
}
