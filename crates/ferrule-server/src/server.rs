use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;

use ferrule_common::protocol::{Address, FerruleError, MessageCode, Request, Response, Result, Status, WireMessage};
use ferrule_common::transport::{Channel, ChannelConfig, Codec, FrameHandler, TcpAcceptor};
use ferrule_metrics::MetricsRegistry;
use ferrule_registry::RegisterMeta;

use crate::processor::{Permit, RequestProcessor};
use crate::service::ProviderRegistry;
use crate::worker::WorkerPool;

/// Configuration for a provider server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub channel: ChannelConfig,
    /// Worker threads executing provider methods.
    pub workers: usize,
    /// Slots in each worker's queue.
    pub worker_queue_capacity: usize,
    /// Requests admitted at once; beyond this the server answers
    /// `PROVIDER_FLOW_CONTROL`.
    pub max_in_flight: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::server(),
            workers: std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            worker_queue_capacity: 4096,
            max_in_flight: None,
        }
    }
}

impl ServerConfig {
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_worker_queue_capacity(mut self, capacity: usize) -> Self {
        self.worker_queue_capacity = capacity;
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: Option<usize>) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }
}

/// A request waiting for a worker.
struct Job {
    request: Request,
    channel: Channel,
    codec: Codec,
    received_at: Instant,
    _permit: Permit,
}

/// Provider server: accepts connections and serves the registered services.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use ferrule_common::protocol::Directory;
/// use ferrule_server::{FerruleServer, ProviderRegistry, ServerConfig, ServiceBuilder};
///
/// # async fn run() -> ferrule_common::Result<()> {
/// let services = Arc::new(ProviderRegistry::new());
/// services.register(
///     ServiceBuilder::new(Directory::of("Calculator"))
///         .typed_method("add", |(a, b): (i64, i64)| Ok(a + b))
///         .build(),
/// );
///
/// let server = FerruleServer::bind("0.0.0.0:18090", ServerConfig::default(), services).await?;
/// server.run().await
/// # }
/// ```
pub struct FerruleServer {
    acceptor: TcpAcceptor,
    handler: Arc<ServerHandler>,
}

impl FerruleServer {
    /// Binds the listener and starts the worker pool.
    ///
    /// # Arguments
    /// * `bind_addr` - Address to listen on (e.g. "0.0.0.0:18090")
    /// * `config` - Server configuration
    /// * `services` - The services to export
    pub async fn bind(bind_addr: &str, config: ServerConfig, services: Arc<ProviderRegistry>) -> Result<Self> {
        let acceptor = TcpAcceptor::bind(bind_addr, config.channel.clone()).await?;
        let metrics = Arc::new(MetricsRegistry::provider());
        let processor = Arc::new(RequestProcessor::new(services, metrics, config.max_in_flight));

        let worker_processor = processor.clone();
        let pool = WorkerPool::start(
            "ferrule-worker",
            config.workers,
            config.worker_queue_capacity,
            move |job: Job| execute(&worker_processor, job),
        )?;

        tracing::info!(
            addr = %acceptor.local_addr()?,
            workers = pool.len(),
            max_in_flight = ?config.max_in_flight,
            "provider server bound"
        );

        Ok(Self {
            acceptor,
            handler: Arc::new(ServerHandler { processor, pool }),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.acceptor.local_addr()
    }

    pub fn services(&self) -> &Arc<ProviderRegistry> {
        self.handler.processor.services()
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.handler.processor.metrics().clone()
    }

    /// Registry records for every exported service, published as `address`.
    pub fn register_metas(&self, address: &Address, connection_count: u32) -> Vec<RegisterMeta> {
        let mut metas: Vec<RegisterMeta> = self
            .services()
            .services()
            .iter()
            .map(|service| service.register_meta(address.clone(), connection_count))
            .collect();
        metas.sort_by(|a, b| a.directory.to_string().cmp(&b.directory.to_string()));
        metas
    }

    /// Accepts connections until the future is dropped.
    pub async fn run(&self) -> Result<()> {
        self.acceptor.run(self.handler.clone()).await
    }

    /// Runs the server on a background task.
    pub fn spawn(self) -> Result<ServerHandle> {
        let local_addr = self.local_addr()?;
        let handler = self.handler.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = self.run().await {
                tracing::error!("provider server stopped: {}", e);
            }
        });
        Ok(ServerHandle {
            local_addr,
            handler,
            task,
        })
    }
}

/// Handle to a server started with [`FerruleServer::spawn`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    handler: Arc<ServerHandler>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        self.handler.processor.metrics().clone()
    }

    pub fn in_flight(&self) -> usize {
        self.handler.processor.in_flight()
    }

    /// Stops accepting connections and drains the worker pool. Requests
    /// arriving on already open connections are answered `SERVER_BUSY`.
    pub fn shutdown(&self) {
        self.task.abort();
        self.handler.pool.shutdown();
        tracing::info!(addr = %self.local_addr, "provider server shut down");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct ServerHandler {
    processor: Arc<RequestProcessor>,
    pool: WorkerPool<Job>,
}

impl ServerHandler {
    fn on_request(&self, channel: &Channel, message: WireMessage) {
        let codec = Codec::for_type(message.serializer);
        let request = match Codec::decode_request(&message) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(channel = channel.id(), id = message.id, "undecodable request: {}", e);
                reply(
                    channel,
                    &codec,
                    Response::error(message.id, Status::DeserializationFail, e.to_string()),
                );
                return;
            }
        };

        let permit = match self.processor.try_acquire() {
            Some(permit) => permit,
            None => {
                reply(
                    channel,
                    &codec,
                    Response::error(request.id, Status::ProviderFlowControl, "provider in-flight limit reached"),
                );
                return;
            }
        };

        let job = Job {
            request,
            channel: channel.clone(),
            codec,
            received_at: Instant::now(),
            _permit: permit,
        };
        if let Err(job) = self.pool.submit(job) {
            reply(
                &job.channel,
                &job.codec,
                Response::error(job.request.id, Status::ServerBusy, "all provider workers are busy"),
            );
        }
    }
}

impl FrameHandler for ServerHandler {
    fn on_frame(&self, channel: &Channel, message: WireMessage) {
        match message.code {
            MessageCode::Request => self.on_request(channel, message),
            MessageCode::Heartbeat | MessageCode::Ack => {}
            other => {
                tracing::warn!(channel = channel.id(), code = ?other, "unexpected frame on provider channel")
            }
        }
    }
}

fn execute(processor: &RequestProcessor, job: Job) {
    let Job {
        request,
        channel,
        codec,
        received_at,
        _permit,
    } = job;

    // The caller has already given up on a request that sat in the queue
    // past its timeout.
    if let Some(timeout_ms) = request.timeout_ms {
        let waited = received_at.elapsed().as_millis() as u64;
        if waited >= timeout_ms {
            tracing::debug!(id = request.id, waited, timeout_ms, "request expired in queue");
            reply(
                &channel,
                &codec,
                Response::error(request.id, Status::ServerTimeout, "request expired before execution"),
            );
            return;
        }
    }

    let response = processor.process(request);
    reply(&channel, &codec, response);
}

fn reply(channel: &Channel, codec: &Codec, response: Response) {
    let id = response.id;
    let result: Result<()> = codec
        .encode_response(&response)
        .or_else(|e| {
            tracing::warn!(id, "response not serializable: {}", e);
            codec.encode_response(&Response::error(id, Status::ServerError, e.to_string()))
        })
        .and_then(|frame| channel.write(frame));

    match result {
        Ok(()) => tracing::debug!(id, channel = channel.id(), status = ?response.status, "response sent"),
        Err(FerruleError::Closed(_)) => tracing::debug!(id, "channel closed before response"),
        Err(e) => tracing::warn!(id, channel = channel.id(), "failed to send response: {}", e),
    }
}
