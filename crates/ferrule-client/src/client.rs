use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use ferrule_common::protocol::{
    Address, Directory, FerruleError, MessageCode, Result, SerializerType, Status, WireMessage,
};
use ferrule_common::transport::{Channel, ChannelConfig, Codec, FrameHandler, TcpConnector};
use ferrule_metrics::{MetricsRegistry, MetricsSnapshot};
use ferrule_registry::{NotifyListener, RegistryEvent};

use crate::group::{ChannelGroup, GroupList, DEFAULT_WEIGHT};
use crate::proxy::ProxyBuilder;
use crate::registry::{InvocationRegistry, ScannerConfig, TimeoutScanner};

/// Consumer configuration.
///
/// # Default Configuration
///
/// - `channel`: [`ChannelConfig::client`] (heartbeat every 30 s)
/// - `scanner`: timeout scan every 30 ms
/// - `default_timeout`: 3 s, for calls without a per-method timeout
/// - `connections_per_address`: 1
/// - `serializer`: JSON
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub channel: ChannelConfig,
    pub scanner: ScannerConfig,
    pub default_timeout: Duration,
    pub connections_per_address: usize,
    pub serializer: SerializerType,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::client(),
            scanner: ScannerConfig::default(),
            default_timeout: Duration::from_secs(3),
            connections_per_address: 1,
            serializer: SerializerType::Json,
        }
    }
}

impl ClientConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_connections_per_address(mut self, connections: usize) -> Self {
        self.connections_per_address = connections.max(1);
        self
    }

    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_scanner(mut self, scanner: ScannerConfig) -> Self {
        self.scanner = scanner;
        self
    }
}

/// State shared by the client, its proxies and its channel handlers.
pub(crate) struct ClientCore {
    pub(crate) config: ClientConfig,
    pub(crate) registry: Arc<InvocationRegistry>,
    pub(crate) codec: Codec,
    pub(crate) metrics: Arc<MetricsRegistry>,
    connector: TcpConnector,
    groups: RwLock<HashMap<Address, Arc<ChannelGroup>>>,
    directories: RwLock<HashMap<Directory, Arc<GroupList>>>,
}

impl ClientCore {
    /// The candidate list of `directory`, created empty on first use.
    pub(crate) fn group_list(&self, directory: &Directory) -> Arc<GroupList> {
        if let Some(list) = self.directories.read().get(directory) {
            return list.clone();
        }
        self.directories
            .write()
            .entry(directory.clone())
            .or_insert_with(|| Arc::new(GroupList::new(directory.clone())))
            .clone()
    }

    fn group(&self, address: &Address, warm_up: Duration) -> Arc<ChannelGroup> {
        if let Some(group) = self.groups.read().get(address) {
            return group.clone();
        }
        self.groups
            .write()
            .entry(address.clone())
            .or_insert_with(|| Arc::new(ChannelGroup::new(address.clone(), warm_up)))
            .clone()
    }

    async fn connect(
        self: &Arc<Self>,
        directory: Directory,
        address: Address,
        weight: u32,
        warm_up: Duration,
        connections: usize,
    ) -> Result<()> {
        let group = self.group(&address, warm_up);
        group.set_warm_up(warm_up);
        group.put_weight(directory.clone(), weight);

        let active = group.channels().iter().filter(|c| c.is_active()).count();
        for _ in active..connections.max(1) {
            let handler = Arc::new(ClientHandler {
                core: Arc::downgrade(self),
            });
            let channel = self.connector.connect(&address, handler).await?;
            self.metrics.increment_active_connections();
            group.add_channel(channel);
        }

        let list = self.group_list(&directory);
        if !list.add(group) {
            // Weight or warm-up may have changed.
            list.refresh();
        }
        tracing::info!(directory = %directory, address = %address, weight, "provider connected");
        Ok(())
    }

    fn disconnect(&self, directory: &Directory, address: &Address) {
        let Some(list) = self.directories.read().get(directory).cloned() else {
            return;
        };
        let Some(group) = list.remove(address) else {
            return;
        };
        group.remove_weight(directory);

        let still_used = self
            .directories
            .read()
            .values()
            .any(|list| list.snapshot().groups().iter().any(|g| Arc::ptr_eq(g, &group)));
        if !still_used {
            self.groups.write().remove(address);
            group.close_all();
        }
        tracing::info!(directory = %directory, address = %address, "provider disconnected");
    }

    fn remove_address(&self, address: &Address) {
        let lists: Vec<Arc<GroupList>> = self.directories.read().values().cloned().collect();
        for list in lists {
            list.remove(address);
        }
        let removed = self.groups.write().remove(address);
        if let Some(group) = removed {
            group.close_all();
        }
        tracing::info!(address = %address, "provider offline");
    }

    async fn apply(self: &Arc<Self>, event: RegistryEvent) -> Result<()> {
        match event {
            RegistryEvent::Published(meta) => {
                self.connect(
                    meta.directory,
                    meta.address,
                    meta.weight,
                    Duration::from_millis(meta.warm_up_ms),
                    meta.connection_count as usize,
                )
                .await
            }
            RegistryEvent::Cancelled(meta) => {
                self.disconnect(&meta.directory, &meta.address);
                Ok(())
            }
            RegistryEvent::Offline(address) => {
                self.remove_address(&address);
                Ok(())
            }
        }
    }

    fn on_channel_closed(&self, channel: &Channel) {
        let failed = self.registry.fail_channel(channel.id());
        self.metrics.decrement_active_connections();

        let groups: Vec<Arc<ChannelGroup>> = self.groups.read().values().cloned().collect();
        for group in groups {
            if group.channels().iter().any(|c| c.id() == channel.id()) {
                group.remove_channel(channel.id());
            }
        }
        tracing::info!(channel = channel.id(), remote = %channel.remote_addr(), failed, "provider channel closed");
    }

    fn close_all(&self) {
        let groups: Vec<Arc<ChannelGroup>> = self.groups.write().drain().map(|(_, g)| g).collect();
        for group in groups {
            group.close_all();
        }
    }
}

/// Routes inbound frames of provider channels into the invocation registry.
struct ClientHandler {
    core: Weak<ClientCore>,
}

impl FrameHandler for ClientHandler {
    fn on_frame(&self, channel: &Channel, message: WireMessage) {
        let Some(core) = self.core.upgrade() else {
            return;
        };
        match message.code {
            MessageCode::Response => match Codec::decode_response(&message) {
                Ok(response) => {
                    core.registry.on_response(channel.id(), response);
                }
                Err(err) => {
                    tracing::warn!(id = message.id, channel = channel.id(), "undecodable response: {}", err);
                    core.registry.fail(
                        channel.id(),
                        message.id,
                        Status::DeserializationFail.into_error(err.to_string(), 0),
                    );
                }
            },
            MessageCode::Heartbeat => {}
            other => {
                tracing::debug!(channel = channel.id(), code = ?other, "ignoring frame on consumer channel");
            }
        }
    }

    fn on_closed(&self, channel: &Channel) {
        if let Some(core) = self.core.upgrade() {
            core.on_channel_closed(channel);
        }
    }
}

/// Consumer runtime.
///
/// Owns the connections to providers, the invocation registry and its
/// timeout scanner. Services are called through [`ServiceProxy`](crate::ServiceProxy)s
/// obtained from [`proxy`](Self::proxy).
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use ferrule_client::{ClientConfig, FerruleClient};
/// use ferrule_common::protocol::{Address, Directory};
/// use serde_json::json;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = FerruleClient::new(ClientConfig::default())?;
/// let calculator = Directory::of("Calculator");
/// client
///     .connect(calculator.clone(), Address::new("127.0.0.1", 18090), 50, Duration::ZERO)
///     .await?;
///
/// let proxy = client.proxy(calculator).build();
/// let sum = proxy.call_async("add", vec![json!(1), json!(2)]).await?;
/// assert_eq!(sum, json!(3));
/// # Ok(())
/// # }
/// ```
pub struct FerruleClient {
    core: Arc<ClientCore>,
    scanner: Mutex<Option<TimeoutScanner>>,
}

impl FerruleClient {
    /// Creates a client and starts its timeout scanner thread.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let registry = Arc::new(InvocationRegistry::new());
        let scanner = TimeoutScanner::start(registry.clone(), config.scanner.clone())?;
        let core = Arc::new(ClientCore {
            registry,
            codec: Codec::for_type(config.serializer),
            metrics: Arc::new(MetricsRegistry::consumer()),
            connector: TcpConnector::new(config.channel.clone()),
            groups: RwLock::new(HashMap::new()),
            directories: RwLock::new(HashMap::new()),
            config,
        });
        Ok(Self {
            core,
            scanner: Mutex::new(Some(scanner)),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.core.config
    }

    /// Makes `address` a provider of `directory`.
    ///
    /// Opens `connections_per_address` channels unless the address is
    /// already connected (groups are shared between directories), then
    /// publishes the group in the directory's candidate list.
    ///
    /// # Arguments
    /// * `weight` - balancer weight for this directory
    /// * `warm_up` - window over which the weight ramps up after connecting
    pub async fn connect(&self, directory: Directory, address: Address, weight: u32, warm_up: Duration) -> Result<()> {
        self.core
            .connect(directory, address, weight, warm_up, self.core.config.connections_per_address)
            .await
    }

    /// Connects with [`DEFAULT_WEIGHT`] and no warm-up.
    pub async fn connect_default(&self, directory: Directory, address: Address) -> Result<()> {
        self.connect(directory, address, DEFAULT_WEIGHT, Duration::ZERO).await
    }

    /// Removes `address` from `directory`; closes its channels once no
    /// directory uses them.
    pub fn disconnect(&self, directory: &Directory, address: &Address) {
        self.core.disconnect(directory, address)
    }

    /// Reacts to a registry push: connect on publish, disconnect on cancel,
    /// drop the address everywhere on offline.
    pub async fn apply_registry_event(&self, event: RegistryEvent) -> Result<()> {
        self.core.apply(event).await
    }

    /// Listener for a [`RegistryClient`](ferrule_registry::RegistryClient)
    /// that applies events on the current tokio runtime.
    ///
    /// Events are applied one at a time in delivery order, so a cancel can
    /// never overtake the connect of the publication it withdraws.
    ///
    /// Must be called from within a runtime.
    pub fn registry_listener(&self) -> Arc<dyn NotifyListener> {
        let (events, mut rx) = tokio::sync::mpsc::unbounded_channel::<RegistryEvent>();
        let core = Arc::downgrade(&self.core);
        tokio::runtime::Handle::current().spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(core) = core.upgrade() else {
                    break;
                };
                if let Err(err) = core.apply(event).await {
                    tracing::warn!("failed to apply registry event: {}", err);
                }
            }
            tracing::debug!("registry event applier stopped");
        });
        Arc::new(ClientNotifyListener { events })
    }

    /// Starts building a proxy for `directory`.
    pub fn proxy(&self, directory: Directory) -> ProxyBuilder {
        ProxyBuilder::new(self.core.clone(), directory)
    }

    /// Addresses currently listed for `directory`.
    pub fn providers(&self, directory: &Directory) -> Vec<Address> {
        self.core
            .group_list(directory)
            .snapshot()
            .groups()
            .iter()
            .map(|g| g.address().clone())
            .collect()
    }

    pub fn pending_invocations(&self) -> usize {
        self.core.registry.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.core.metrics.snapshot()
    }

    /// Stops the timeout scanner and closes every channel.
    ///
    /// Invocations still pending fail with [`FerruleError::Closed`].
    pub fn shutdown(&self) {
        if let Some(mut scanner) = self.scanner.lock().take() {
            scanner.stop();
        }
        self.core.close_all();
    }
}

impl Drop for FerruleClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ClientNotifyListener {
    events: tokio::sync::mpsc::UnboundedSender<RegistryEvent>,
}

impl NotifyListener for ClientNotifyListener {
    fn on_event(&self, event: RegistryEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("registry event dropped, client is gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balancer::LoadBalancerType;
    use crate::cluster::{ClusterStrategy, ReturnType};
    use ferrule_common::protocol::{Request, Response, TimeoutKind};
    use ferrule_common::transport::TcpAcceptor;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fake provider: `echo` returns its first argument, `whoami` its name,
    /// `slow` never answers, anything else is SERVICE_NOT_FOUND. A busy
    /// provider answers SERVER_BUSY to everything.
    struct FakeProvider {
        name: &'static str,
        busy: bool,
        requests: AtomicUsize,
    }

    impl FrameHandler for FakeProvider {
        fn on_frame(&self, channel: &Channel, message: WireMessage) {
            if message.code != MessageCode::Request {
                return;
            }
            self.requests.fetch_add(1, Ordering::SeqCst);
            let request: Request = Codec::decode_request(&message).unwrap();
            let response = match request.method.as_str() {
                _ if self.busy => Response::error(request.id, Status::ServerBusy, "busy"),
                "echo" => Response::success(request.id, request.args.first().cloned().unwrap_or(Value::Null)),
                "whoami" => Response::success(request.id, json!(self.name)),
                "slow" => return,
                _ => Response::error(request.id, Status::ServiceNotFound, "unknown"),
            };
            let frame = Codec::new().encode_response(&response).unwrap();
            let _ = channel.write(frame);
        }
    }

    async fn spawn_provider(name: &'static str) -> (Address, Arc<FakeProvider>, tokio::task::JoinHandle<()>) {
        spawn_fake(name, false).await
    }

    async fn spawn_fake(name: &'static str, busy: bool) -> (Address, Arc<FakeProvider>, tokio::task::JoinHandle<()>) {
        let acceptor = TcpAcceptor::bind("127.0.0.1:0", ChannelConfig::server()).await.unwrap();
        let address = Address::from(acceptor.local_addr().unwrap());
        let provider = Arc::new(FakeProvider {
            name,
            busy,
            requests: AtomicUsize::new(0),
        });
        let handler: Arc<dyn FrameHandler> = provider.clone();
        let task = tokio::spawn(async move {
            let _ = acceptor.run(handler).await;
        });
        (address, provider, task)
    }

    fn client() -> FerruleClient {
        FerruleClient::new(ClientConfig::default().with_scanner(ScannerConfig {
            interval: Duration::from_millis(5),
        }))
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_call_round_trip() {
        let (address, _provider, _task) = spawn_provider("a").await;
        let client = client();
        let dir = Directory::of("Echo");
        client.connect_default(dir.clone(), address).await.unwrap();

        let proxy = client.proxy(dir).build();
        let value = proxy.call_async("echo", vec![json!({"x": 1})]).await.unwrap();
        assert_eq!(value, json!({"x": 1}));
        assert_eq!(client.pending_invocations(), 0);

        let metrics = client.metrics();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.successful_requests, 1);
        assert_eq!(metrics.active_connections, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_remote_error_status() {
        let (address, _provider, _task) = spawn_provider("a").await;
        let client = client();
        let dir = Directory::of("Echo");
        client.connect_default(dir.clone(), address).await.unwrap();

        let err = client.proxy(dir).build().call_async("nope", vec![]).await.unwrap_err();
        assert!(matches!(err, FerruleError::Remote { status: Status::ServiceNotFound, .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unanswered_call_times_out_as_server_timeout() {
        let (address, _provider, _task) = spawn_provider("a").await;
        let client = client();
        let dir = Directory::of("Echo");
        client.connect_default(dir.clone(), address).await.unwrap();

        let proxy = client
            .proxy(dir)
            .method_timeout("slow", Duration::from_millis(50))
            .build();
        let err = proxy.call_async("slow", vec![]).await.unwrap_err();
        assert!(matches!(err, FerruleError::Timeout { kind: TimeoutKind::Server, millis: 50 }));
        assert_eq!(client.pending_invocations(), 0);
        assert_eq!(client.metrics().methods["Default-Echo-1.0.0#slow"].timeout_count, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_no_provider() {
        let client = client();
        let proxy = client.proxy(Directory::of("Missing")).build();
        let err = proxy.call_async("echo", vec![]).await.unwrap_err();
        assert!(matches!(err, FerruleError::NoAvailableProvider(_)));

        let safe = client
            .proxy(Directory::of("Missing"))
            .strategy(ClusterStrategy::FailSafe)
            .return_type("count", ReturnType::Integer)
            .build();
        assert_eq!(safe.call_async("count", vec![]).await.unwrap(), json!(0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_provider_close_fails_pending_calls() {
        let (address, _provider, task) = spawn_provider("a").await;
        let client = client();
        let dir = Directory::of("Echo");
        client.connect_default(dir.clone(), address.clone()).await.unwrap();

        let proxy = client.proxy(dir.clone()).timeout(Duration::from_secs(30)).build();
        let pending = proxy.call_async("slow", vec![]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Closing the consumer side fails the pending call with Closed.
        client.disconnect(&dir, &address);
        let err = tokio::time::timeout(Duration::from_secs(5), pending).await.unwrap().unwrap_err();
        assert!(matches!(err, FerruleError::Closed(_)));
        assert!(client.providers(&dir).is_empty());
        task.abort();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fail_over_skips_busy_provider() {
        let (live, _p, _t) = spawn_provider("live").await;
        let client = client();
        let dir = Directory::of("Echo");
        client.connect_default(dir.clone(), live.clone()).await.unwrap();

        let (busy, busy_provider, _bt) = spawn_fake("busy", true).await;
        client.connect_default(dir.clone(), busy).await.unwrap();

        let proxy = client
            .proxy(dir)
            .strategy(ClusterStrategy::FailOver { retries: 2 })
            .load_balancer(LoadBalancerType::RoundRobin)
            .build();
        for _ in 0..10 {
            let who = proxy.call_async("whoami", vec![]).await.unwrap();
            assert_eq!(who, json!("live"));
        }
        assert!(busy_provider.requests.load(Ordering::SeqCst) > 0, "busy provider was never tried");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_broadcast_reaches_every_provider() {
        let (a, pa, _ta) = spawn_provider("a").await;
        let (b, pb, _tb) = spawn_provider("b").await;
        let client = client();
        let dir = Directory::of("Echo");
        client.connect_default(dir.clone(), a).await.unwrap();
        client.connect_default(dir.clone(), b).await.unwrap();

        let proxy = client.proxy(dir).build();
        let mut names: Vec<Value> = proxy
            .broadcast_all("whoami", vec![])
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        names.sort_by_key(|v| v.to_string());
        assert_eq!(names, vec![json!("a"), json!("b")]);
        assert_eq!(pa.requests.load(Ordering::SeqCst), 1);
        assert_eq!(pb.requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_registry_events_drive_connections() {
        use ferrule_registry::RegisterMeta;

        let (address, _provider, _task) = spawn_provider("a").await;
        let client = client();
        let dir = Directory::of("Echo");
        let meta = RegisterMeta {
            address: address.clone(),
            directory: dir.clone(),
            weight: 10,
            warm_up_ms: 0,
            connection_count: 2,
        };

        client.apply_registry_event(RegistryEvent::Published(meta.clone())).await.unwrap();
        assert_eq!(client.providers(&dir), vec![address.clone()]);
        assert_eq!(client.metrics().active_connections, 2);

        client.apply_registry_event(RegistryEvent::Cancelled(meta.clone())).await.unwrap();
        assert!(client.providers(&dir).is_empty());

        client.apply_registry_event(RegistryEvent::Published(meta)).await.unwrap();
        client.apply_registry_event(RegistryEvent::Offline(address)).await.unwrap();
        assert!(client.providers(&dir).is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_listener_applies_events_in_delivery_order() {
        use ferrule_registry::RegisterMeta;

        let (address, _provider, _task) = spawn_provider("a").await;
        let client = client();
        let dir = Directory::of("Echo");
        let meta = RegisterMeta {
            address: address.clone(),
            directory: dir.clone(),
            weight: 10,
            warm_up_ms: 0,
            connection_count: 4,
        };
        let listener = client.registry_listener();

        // The cancel arrives while the publication is still connecting.
        listener.on_event(RegistryEvent::Published(meta.clone()));
        listener.on_event(RegistryEvent::Cancelled(meta.clone()));

        // A later event on another directory marks the earlier two as applied.
        let marker = Directory::of("Marker");
        listener.on_event(RegistryEvent::Published(RegisterMeta {
            directory: marker.clone(),
            connection_count: 1,
            ..meta.clone()
        }));
        tokio::time::timeout(Duration::from_secs(5), async {
            while client.providers(&marker).is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert!(client.providers(&dir).is_empty(), "cancelled provider is still listed");
        assert_eq!(client.metrics().active_connections, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_request_stuck_behind_stalled_socket_is_client_timeout() {
        // Accepts nothing and reads nothing, so a large frame never drains.
        let stalled = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = Address::from(stalled.local_addr().unwrap());
        let client = client();
        let dir = Directory::of("Echo");
        client.connect_default(dir.clone(), address).await.unwrap();

        let proxy = client
            .proxy(dir)
            .method_timeout("echo", Duration::from_millis(200))
            .build();
        let huge = "x".repeat(64 * 1024 * 1024);
        match proxy.call_async("echo", vec![json!(huge)]).await {
            Err(FerruleError::Timeout { kind, .. }) => assert_eq!(kind, TimeoutKind::Client),
            other => panic!("expected client timeout, got {:?}", other.map(|_| ())),
        }
        assert_eq!(client.pending_invocations(), 0);
    }

    #[tokio::test]
    async fn test_refused_write_reports_its_target() {
        use crate::cluster::Dispatcher;
        use crate::dispatcher::DefaultDispatcher;
        use std::collections::HashSet;

        let stalled = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = Address::from(stalled.local_addr().unwrap());
        let channel_config = ChannelConfig::client().with_heartbeat_interval(None).with_queue_capacity(1);
        let client = FerruleClient::new(ClientConfig::default().with_channel(channel_config)).unwrap();
        let dir = Directory::of("Echo");
        client.connect_default(dir.clone(), address.clone()).await.unwrap();

        // Single-threaded runtime: the queued frame stays put until we yield.
        let group = client.core.groups.read().get(&address).cloned().unwrap();
        group.next_channel().unwrap().write(WireMessage::heartbeat()).unwrap();

        let dispatcher = DefaultDispatcher::new(client.core.clone(), client.core.group_list(&dir), LoadBalancerType::Random);
        let dispatched = dispatcher
            .dispatch(&Request::new(dir, "echo", vec![]), &HashSet::new())
            .unwrap();
        assert_eq!(dispatched.target, address);
        assert!(matches!(
            dispatched.future.try_result(),
            Some(Err(FerruleError::ChannelBusy(_)))
        ));
        assert_eq!(client.pending_invocations(), 0);
    }

    #[test]
    fn test_sync_call_from_plain_thread() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let (address, _provider, _task) = runtime.block_on(spawn_provider("a"));
        let client = client();
        let dir = Directory::of("Echo");
        runtime.block_on(client.connect_default(dir.clone(), address)).unwrap();

        let proxy = client.proxy(dir).build();
        assert_eq!(proxy.call("echo", vec![json!(7)]).unwrap(), json!(7));
    }
}
