//! Ferrule Provider Runtime
//!
//! Serves registered services over TCP:
//!
//! - [`service`] - closure-based method tables ([`ServiceBuilder`]) and the
//!   [`ProviderRegistry`] they are exported through
//! - [`processor`] - resolves, executes and maps results to response statuses
//! - [`worker`] - worker threads fed by lock-free bounded queues
//! - [`server`] - the TCP acceptor wiring it all together
//!
//! Request frames are decoded on the connection's reader task, admitted
//! against the optional in-flight limit, then queued to a worker. A full
//! pool is answered with `SERVER_BUSY`, an exceeded limit with
//! `PROVIDER_FLOW_CONTROL`.

pub mod processor;
pub mod server;
pub mod service;
pub mod worker;

pub use processor::{Permit, RequestProcessor};
pub use server::{FerruleServer, ServerConfig, ServerHandle};
pub use service::{MethodError, MethodHandler, MethodResult, ProviderRegistry, ServiceBuilder, ServiceDefinition};
pub use worker::WorkerPool;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc as std_mpsc;
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::mpsc;

    use ferrule_common::protocol::{Address, Directory, MessageCode, Request, Response, SerializerType, Status, WireMessage};
    use ferrule_common::transport::{Channel, ChannelConfig, Codec, FrameHandler, TcpConnector};

    struct Collect(mpsc::UnboundedSender<WireMessage>);

    impl FrameHandler for Collect {
        fn on_frame(&self, _channel: &Channel, message: WireMessage) {
            let _ = self.0.send(message);
        }
    }

    struct Gate {
        started: mpsc::UnboundedReceiver<()>,
        release: std_mpsc::Sender<()>,
    }

    /// Services with a `hold` method that blocks until released.
    fn services() -> (Arc<ProviderRegistry>, Gate) {
        let (started_tx, started) = mpsc::unbounded_channel();
        let (release, release_rx) = std_mpsc::channel::<()>();
        let release_rx = Mutex::new(release_rx);

        let services = Arc::new(ProviderRegistry::new());
        services.register(
            ServiceBuilder::new(Directory::of("Calculator"))
                .typed_method("add", |(a, b): (i64, i64)| Ok(a + b))
                .method("hold", move |_| {
                    let _ = started_tx.send(());
                    let _ = release_rx.lock().recv_timeout(Duration::from_secs(10));
                    Ok(json!("released"))
                })
                .build(),
        );
        (services, Gate { started, release })
    }

    async fn start(config: ServerConfig, services: Arc<ProviderRegistry>) -> (ServerHandle, Channel, mpsc::UnboundedReceiver<WireMessage>) {
        let server = FerruleServer::bind("127.0.0.1:0", config, services).await.unwrap();
        let handle = server.spawn().unwrap();

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = TcpConnector::new(ChannelConfig::client())
            .connect(&Address::from(handle.local_addr()), Arc::new(Collect(tx)))
            .await
            .unwrap();
        (handle, channel, rx)
    }

    fn send(channel: &Channel, method: &str, args: Vec<serde_json::Value>) -> u64 {
        let request = Request::new(Directory::of("Calculator"), method, args);
        let id = request.id;
        channel.write(Codec::new().encode_request(&request).unwrap()).unwrap();
        id
    }

    async fn next_response(rx: &mut mpsc::UnboundedReceiver<WireMessage>) -> Response {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if frame.code == MessageCode::Response {
                return Codec::decode_response(&frame).unwrap();
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_serves_requests() {
        let (services, _gate) = services();
        let (handle, channel, mut rx) = start(ServerConfig::default().with_workers(2), services).await;

        let id = send(&channel, "add", vec![json!(2), json!(40)]);
        let response = next_response(&mut rx).await;
        assert_eq!(response.id, id);
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.result, Some(json!(42)));

        send(&channel, "missing", vec![]);
        assert_eq!(next_response(&mut rx).await.status, Status::BadRequest);

        assert_eq!(handle.metrics().snapshot().total_requests, 2);
        handle.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_heartbeat_ignored_and_bad_body_rejected() {
        let (services, _gate) = services();
        let (handle, channel, mut rx) = start(ServerConfig::default(), services).await;

        channel.write(WireMessage::heartbeat()).unwrap();
        channel
            .write(WireMessage::new(MessageCode::Request, SerializerType::Json, 77, &b"not json"[..]))
            .unwrap();

        let response = next_response(&mut rx).await;
        assert_eq!(response.id, 77);
        assert_eq!(response.status, Status::DeserializationFail);
        assert!(channel.is_active());
        handle.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_in_flight_limit_answers_flow_control() {
        let (services, mut gate) = services();
        let config = ServerConfig::default().with_workers(2).with_max_in_flight(Some(1));
        let (handle, channel, mut rx) = start(config, services).await;

        let held = send(&channel, "hold", vec![]);
        gate.started.recv().await.unwrap();

        let rejected = send(&channel, "add", vec![json!(1), json!(1)]);
        let response = next_response(&mut rx).await;
        assert_eq!(response.id, rejected);
        assert_eq!(response.status, Status::ProviderFlowControl);

        gate.release.send(()).unwrap();
        let response = next_response(&mut rx).await;
        assert_eq!(response.id, held);
        assert_eq!(response.result, Some(json!("released")));
        handle.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_full_pool_answers_server_busy() {
        let (services, mut gate) = services();
        let config = ServerConfig::default().with_workers(1).with_worker_queue_capacity(1);
        let (handle, channel, mut rx) = start(config, services).await;

        let held = send(&channel, "hold", vec![]);
        gate.started.recv().await.unwrap();

        // One request fits in the queue behind the held one.
        let queued = send(&channel, "add", vec![json!(1), json!(2)]);
        let busy = send(&channel, "add", vec![json!(3), json!(4)]);

        let response = next_response(&mut rx).await;
        assert_eq!(response.id, busy);
        assert_eq!(response.status, Status::ServerBusy);

        gate.release.send(()).unwrap();
        let mut ids = vec![next_response(&mut rx).await.id, next_response(&mut rx).await.id];
        ids.sort_unstable();
        let mut expected = vec![held, queued];
        expected.sort_unstable();
        assert_eq!(ids, expected);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_register_metas() {
        let (services, _gate) = services();
        services.register(ServiceBuilder::new(Directory::of("Echo")).weight(10).build());
        let server = FerruleServer::bind("127.0.0.1:0", ServerConfig::default().with_workers(1), services)
            .await
            .unwrap();

        let metas = server.register_metas(&Address::new("10.0.0.7", 18090), 1);
        assert_eq!(metas.len(), 2);
        assert_eq!(metas[0].directory, Directory::of("Calculator"));
        assert_eq!(metas[1].weight, 10);
        assert!(metas.iter().all(|m| m.address == Address::new("10.0.0.7", 18090)));
    }
}
