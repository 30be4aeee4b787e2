use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ferrule_common::protocol::{Request, Response, Status};
use ferrule_metrics::{CallOutcome, MetricsRegistry};

use crate::service::{MethodError, ProviderRegistry};

/// Turns decoded requests into responses.
///
/// Resolves the target service and method, runs the handler with panics
/// caught, maps the outcome to a response status and records provider-side
/// metrics.
pub struct RequestProcessor {
    services: Arc<ProviderRegistry>,
    metrics: Arc<MetricsRegistry>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Option<usize>,
}

impl RequestProcessor {
    /// Creates a processor.
    ///
    /// # Arguments
    /// * `services` - The exported services
    /// * `metrics` - Provider-side metrics registry
    /// * `max_in_flight` - Upper bound on admitted requests, `None` for unbounded
    pub fn new(services: Arc<ProviderRegistry>, metrics: Arc<MetricsRegistry>, max_in_flight: Option<usize>) -> Self {
        Self {
            services,
            metrics,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight,
        }
    }

    /// Admits one request.
    ///
    /// # Returns
    /// A permit that releases its slot on drop, or `None` when the in-flight
    /// limit is reached.
    pub fn try_acquire(&self) -> Option<Permit> {
        let admitted = self
            .in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match self.max_in_flight {
                Some(max) if n >= max => None,
                _ => Some(n + 1),
            })
            .is_ok();

        if !admitted {
            tracing::debug!(limit = ?self.max_in_flight, "in-flight limit reached");
            return None;
        }
        Some(Permit {
            in_flight: self.in_flight.clone(),
        })
    }

    /// Requests admitted and not yet answered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn services(&self) -> &Arc<ProviderRegistry> {
        &self.services
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Executes `request` and builds its response.
    pub fn process(&self, request: Request) -> Response {
        let started = Instant::now();
        let key = format!("{}#{}", request.directory, request.method);

        let response = self.execute(request);

        let outcome = if response.status.is_ok() {
            CallOutcome::Success
        } else {
            CallOutcome::Failure
        };
        self.metrics
            .record_method_call(&key, started.elapsed().as_micros() as u64, outcome);
        response
    }

    fn execute(&self, request: Request) -> Response {
        let id = request.id;

        let service = match self.services.lookup(&request.directory) {
            Some(service) => service,
            None => {
                tracing::debug!(id, directory = %request.directory, "service not found");
                return Response::error(
                    id,
                    Status::ServiceNotFound,
                    format!("service {} not found", request.directory),
                );
            }
        };

        let handler = match service.method(&request.method) {
            Some(handler) => handler.clone(),
            None => {
                tracing::debug!(id, method = %request.method, "method not found");
                return Response::error(
                    id,
                    Status::BadRequest,
                    format!("method {} not found in {}", request.method, request.directory),
                );
            }
        };

        tracing::debug!(id, directory = %request.directory, method = %request.method, "executing");

        let args = request.args;
        match panic::catch_unwind(AssertUnwindSafe(move || handler(args))) {
            Ok(Ok(result)) => Response::success(id, result),
            Ok(Err(MethodError::InvalidArguments(message))) => Response::error(id, Status::BadRequest, message),
            Ok(Err(MethodError::Business { message, expected: true })) => {
                Response::error(id, Status::ServiceExpectedError, message)
            }
            Ok(Err(MethodError::Business { message, expected: false })) => {
                tracing::warn!(id, method = %request.method, "method failed: {}", message);
                Response::error(id, Status::ServiceUnexpectedError, message)
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                tracing::error!(id, method = %request.method, "method panicked: {}", message);
                Response::error(id, Status::ServerError, format!("method panicked: {}", message))
            }
        }
    }
}

/// One admitted request. Dropping it frees the slot.
#[derive(Debug)]
pub struct Permit {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::ServiceBuilder;
    use ferrule_common::protocol::Directory;
    use serde_json::json;

    fn processor(max_in_flight: Option<usize>) -> RequestProcessor {
        let services = Arc::new(ProviderRegistry::new());
        services.register(
            ServiceBuilder::new(Directory::of("Calculator"))
                .typed_method("add", |(a, b): (i64, i64)| Ok(a + b))
                .typed_method("div", |(a, b): (i64, i64)| {
                    if b == 0 {
                        return Err(MethodError::expected("division by zero"));
                    }
                    Ok(a / b)
                })
                .method("broken", |_| Err(MethodError::unexpected("database down")))
                .method("panics", |_| panic!("boom"))
                .build(),
        );
        RequestProcessor::new(services, Arc::new(MetricsRegistry::provider()), max_in_flight)
    }

    fn call(processor: &RequestProcessor, method: &str, args: Vec<serde_json::Value>) -> Response {
        processor.process(Request::new(Directory::of("Calculator"), method, args))
    }

    #[test]
    fn test_success() {
        let processor = processor(None);
        let request = Request::new(Directory::of("Calculator"), "add", vec![json!(1), json!(2)]);
        let id = request.id;

        let response = processor.process(request);
        assert_eq!(response.id, id);
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.result, Some(json!(3)));
    }

    #[test]
    fn test_status_mapping() {
        let processor = processor(None);

        let missing = processor.process(Request::new(Directory::of("Nope"), "add", vec![]));
        assert_eq!(missing.status, Status::ServiceNotFound);
        assert!(missing.error.unwrap().contains("Nope"));

        assert_eq!(call(&processor, "mul", vec![]).status, Status::BadRequest);
        assert_eq!(call(&processor, "add", vec![json!("a")]).status, Status::BadRequest);
        assert_eq!(
            call(&processor, "div", vec![json!(1), json!(0)]).status,
            Status::ServiceExpectedError
        );
        assert_eq!(call(&processor, "broken", vec![]).status, Status::ServiceUnexpectedError);

        let panicked = call(&processor, "panics", vec![]);
        assert_eq!(panicked.status, Status::ServerError);
        assert!(panicked.error.unwrap().contains("boom"));
    }

    #[test]
    fn test_metrics_recorded() {
        let processor = processor(None);
        call(&processor, "add", vec![json!(1), json!(1)]);
        call(&processor, "div", vec![json!(1), json!(0)]);

        let snapshot = processor.metrics().snapshot();
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.successful_requests, 1);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.methods["Default-Calculator-1.0.0#add"].success_count, 1);
    }

    #[test]
    fn test_in_flight_limit() {
        let processor = processor(Some(2));
        let first = processor.try_acquire().unwrap();
        let _second = processor.try_acquire().unwrap();
        assert!(processor.try_acquire().is_none());
        assert_eq!(processor.in_flight(), 2);

        drop(first);
        assert!(processor.try_acquire().is_some());
    }

    #[test]
    fn test_unbounded_admits_everything() {
        let processor = processor(None);
        let permits: Vec<Permit> = (0..100).filter_map(|_| processor.try_acquire()).collect();
        assert_eq!(permits.len(), 100);
        drop(permits);
        assert_eq!(processor.in_flight(), 0);
    }
}
