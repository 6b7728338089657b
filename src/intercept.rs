//! The interception point the host's request pipeline calls into.

use std::future::Future;

use crate::cache::{CacheStorage, StrategyExecutor};
use crate::classify::{Policy, RequestClassifier};
use crate::net::{Network, Request, Response};

/// Explicit `{classify, execute}` seam injected into the host's pipeline.
pub trait Interceptor: Send + Sync {
  fn classify(&self, request: &Request) -> Policy;

  fn execute(&self, request: Request, policy: Policy) -> impl Future<Output = Response> + Send;

  /// Classify and execute in one step.
  fn handle(&self, request: Request) -> impl Future<Output = Response> + Send {
    async move {
      let policy = self.classify(&request);
      self.execute(request, policy).await
    }
  }
}

/// Classifier and executor wired together.
pub struct Pipeline<S: CacheStorage, N: Network> {
  classifier: RequestClassifier,
  executor: StrategyExecutor<S, N>,
}

impl<S: CacheStorage, N: Network> Pipeline<S, N> {
  pub fn new(classifier: RequestClassifier, executor: StrategyExecutor<S, N>) -> Self {
    Self {
      classifier,
      executor,
    }
  }

  pub fn executor(&self) -> &StrategyExecutor<S, N> {
    &self.executor
  }
}

impl<S: CacheStorage, N: Network> Interceptor for Pipeline<S, N> {
  fn classify(&self, request: &Request) -> Policy {
    self.classifier.classify(request)
  }

  fn execute(&self, request: Request, policy: Policy) -> impl Future<Output = Response> + Send {
    self.executor.execute(request, policy)
  }
}
