use std::collections::HashSet;
use std::sync::Arc;

use ferrule_common::protocol::{Address, FerruleError, Request, RpcResult};
use ferrule_common::{FnListener, InvokeFuture};

use super::{ClusterInvoker, ClusterStrategy, Dispatcher, ReturnType};

/// Retries failed calls on providers not yet tried in this call.
///
/// Each retry is a new request (fresh correlation id) so a late reply to an
/// abandoned attempt can never complete the retried one. Retries are chained
/// from the completion listener of the previous attempt; nothing blocks.
///
/// Only [retryable](FerruleError::is_retryable) errors trigger a retry. When
/// every attempt failed the caller gets
/// [`FerruleError::AllTargetsFailed`] carrying the last error.
pub struct FailOver {
    dispatcher: Arc<dyn Dispatcher>,
    retries: usize,
}

impl FailOver {
    pub fn new(dispatcher: Arc<dyn Dispatcher>, retries: usize) -> Self {
        Self { dispatcher, retries }
    }
}

impl ClusterInvoker for FailOver {
    fn strategy(&self) -> ClusterStrategy {
        ClusterStrategy::FailOver {
            retries: self.retries,
        }
    }

    fn invoke(&self, request: Request, _return_type: ReturnType) -> InvokeFuture<RpcResult> {
        let result = InvokeFuture::new();
        let attempt = Attempt {
            dispatcher: self.dispatcher.clone(),
            request,
            tried: HashSet::new(),
            number: 1,
            max_attempts: self.retries + 1,
            result: result.clone(),
        };
        attempt.run();
        result
    }
}

/// State carried from one attempt to the next.
#[derive(Clone)]
struct Attempt {
    dispatcher: Arc<dyn Dispatcher>,
    request: Request,
    tried: HashSet<Address>,
    number: usize,
    max_attempts: usize,
    result: InvokeFuture<RpcResult>,
}

impl Attempt {
    fn run(mut self) {
        match self.dispatcher.dispatch(&self.request, &self.tried) {
            Ok(dispatched) => {
                self.tried.insert(dispatched.target);
                dispatched.future.add_listener(FnListener(move |outcome: &Result<RpcResult, FerruleError>| {
                    match outcome {
                        Ok(value) => {
                            self.result.complete(value.clone());
                        }
                        Err(err) => self.clone().on_failure(err.clone()),
                    }
                }));
            }
            Err(err) => self.on_failure(err),
        }
    }

    fn on_failure(self, err: FerruleError) {
        if !err.is_retryable() {
            tracing::debug!(method = %self.request.method, "not retrying: {}", err);
            self.result.fail(err);
            return;
        }

        if self.number >= self.max_attempts {
            let error = if self.number > 1 {
                FerruleError::AllTargetsFailed {
                    attempts: self.number,
                    last: Box::new(err),
                }
            } else {
                err
            };
            self.result.fail(error);
            return;
        }

        tracing::warn!(
            method = %self.request.method,
            attempt = self.number,
            max_attempts = self.max_attempts,
            "call failed, retrying on another provider: {}",
            err
        );
        Attempt {
            request: self.request.renewed(),
            number: self.number + 1,
            ..self
        }
        .run();
    }
}
