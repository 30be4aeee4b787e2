use std::collections::HashSet;
use std::sync::Arc;

use ferrule_common::protocol::{FerruleError, Request, RpcResult};
use ferrule_common::{FnListener, InvokeFuture};

use super::{ClusterInvoker, ClusterStrategy, Dispatcher, ReturnType};

/// One attempt; a failure is logged and replaced by the return type's
/// default value.
pub struct FailSafe {
    dispatcher: Arc<dyn Dispatcher>,
}

impl FailSafe {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl ClusterInvoker for FailSafe {
    fn strategy(&self) -> ClusterStrategy {
        ClusterStrategy::FailSafe
    }

    fn invoke(&self, request: Request, return_type: ReturnType) -> InvokeFuture<RpcResult> {
        let dispatched = match self.dispatcher.dispatch(&request, &HashSet::new()) {
            Ok(dispatched) => dispatched,
            Err(err) => {
                tracing::warn!(method = %request.method, "fail-safe call not sent, returning default: {}", err);
                return InvokeFuture::completed(return_type.default_value());
            }
        };

        let result = InvokeFuture::new();
        let completion = result.clone();
        let method = request.method;
        dispatched
            .future
            .add_listener(FnListener(move |outcome: &Result<RpcResult, FerruleError>| match outcome {
                Ok(value) => {
                    completion.complete(value.clone());
                }
                Err(err) => {
                    tracing::warn!(method = %method, "fail-safe call failed, returning default: {}", err);
                    completion.complete(return_type.default_value());
                }
            }));
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::testing::{request, ScriptedDispatcher, Step};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_failure_yields_default() {
        let dispatcher = ScriptedDispatcher::new(
            2,
            vec![Step::Fail(FerruleError::Connection("reset".into()))],
        );
        let invoker = FailSafe::new(dispatcher.clone());
        for (return_type, expected) in [
            (ReturnType::Integer, json!(0)),
            (ReturnType::String, json!("")),
            (ReturnType::Object, json!({})),
        ] {
            let value = invoker.invoke(request(), return_type).get_result(Duration::from_secs(1));
            assert_eq!(value.unwrap(), expected);
        }
        assert_eq!(dispatcher.targets().len(), 3, "one attempt per call");
    }

    #[test]
    fn test_rejected_dispatch_yields_default() {
        let dispatcher = ScriptedDispatcher::new(
            1,
            vec![Step::Reject(FerruleError::NoAvailableProvider("Svc".into()))],
        );
        let value = FailSafe::new(dispatcher)
            .invoke(request(), ReturnType::Array)
            .get_result(Duration::from_secs(1));
        assert_eq!(value.unwrap(), json!([]));
    }

    #[test]
    fn test_success_passes_through() {
        let dispatcher = ScriptedDispatcher::new(1, vec![Step::Reply(json!(41))]);
        let value = FailSafe::new(dispatcher)
            .invoke(request(), ReturnType::Integer)
            .get_result(Duration::from_secs(1));
        assert_eq!(value.unwrap(), json!(41));
    }
}
