use std::collections::HashSet;
use std::sync::Arc;

use ferrule_common::protocol::{Request, RpcResult};
use ferrule_common::InvokeFuture;

use super::{ClusterInvoker, ClusterStrategy, Dispatcher, ReturnType};

/// One attempt; failures reach the caller unchanged.
pub struct FailFast {
    dispatcher: Arc<dyn Dispatcher>,
}

impl FailFast {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl ClusterInvoker for FailFast {
    fn strategy(&self) -> ClusterStrategy {
        ClusterStrategy::FailFast
    }

    fn invoke(&self, request: Request, _return_type: ReturnType) -> InvokeFuture<RpcResult> {
        match self.dispatcher.dispatch(&request, &HashSet::new()) {
            Ok(dispatched) => dispatched.future,
            Err(err) => InvokeFuture::failed(err),
        }
    }
}
