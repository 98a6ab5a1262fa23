//! The three-phase node lifecycle (§4.1): `prep` reads the blackboard and
//! produces a typed input, `exec` does the (possibly retried) unit of work in
//! isolation from the blackboard, and `post` writes results back and returns
//! the [`Action`] that selects the next edge.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::action::Action;
use crate::storage::StorageBackend;
use crate::store::Store;

/// Per-attempt execution context threaded through `exec`/`exec_fallback`.
/// Distinct from the blackboard: this is attempt-local bookkeeping, never
/// shared state, so nodes can read their own retry count without a store
/// round-trip.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub current_retry: usize,
    pub max_retries: usize,
    pub retry_delay: Duration,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            current_retry: 0,
            max_retries: 0,
            retry_delay: Duration::from_millis(0),
            metadata: HashMap::new(),
        }
    }
}

impl ExecutionContext {
    pub fn new(max_retries: usize, retry_delay: Duration) -> Self {
        Self {
            current_retry: 0,
            max_retries,
            retry_delay,
            metadata: HashMap::new(),
        }
    }

    pub fn is_last_attempt(&self) -> bool {
        self.current_retry >= self.max_retries
    }
}

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("prep phase failed: {0}")]
    Prep(String),
    #[error("exec phase failed after {attempts} attempt(s): {message}")]
    Exec { attempts: usize, message: String },
    #[error("post phase failed: {0}")]
    Post(String),
    #[error("blackboard error: {0}")]
    Store(String),
}

impl<E: fmt::Debug + fmt::Display> From<crate::store::StoreError<E>> for NodeError {
    fn from(err: crate::store::StoreError<E>) -> Self {
        NodeError::Store(err.to_string())
    }
}

/// The unit of work a [`crate::flow::Flow`] schedules. `P` is the input
/// `prep` hands to `exec`; `R` is the output `exec` hands to `post`.
///
/// Implementations own no blackboard state: `prep`/`post` are the only
/// phases allowed to touch `S`, so retries of `exec` never risk a partial
/// write becoming visible to the rest of the flow.
#[async_trait]
pub trait NodeBackend<S: StorageBackend>: Send + Sync {
    type Prep: Send + Sync;
    type Exec: Send + Sync;

    fn name(&self) -> &str;

    async fn prep(&self, store: &Store<S>) -> Result<Self::Prep, NodeError>;

    async fn exec(&self, prep: &Self::Prep, ctx: &ExecutionContext) -> Result<Self::Exec, NodeError>;

    /// Called once all retries of `exec` are exhausted, in place of failing
    /// the node outright. The default re-raises the last error.
    async fn exec_fallback(
        &self,
        _prep: &Self::Prep,
        ctx: &ExecutionContext,
        last_error: NodeError,
    ) -> Result<Self::Exec, NodeError> {
        let _ = ctx;
        Err(last_error)
    }

    async fn post(
        &self,
        store: &mut Store<S>,
        prep: Self::Prep,
        exec: Self::Exec,
    ) -> Result<Action, NodeError>;

    fn max_retries(&self) -> usize {
        0
    }

    fn retry_delay(&self) -> Duration {
        Duration::from_millis(0)
    }
}

/// Runs a [`NodeBackend`] through its full lifecycle, including retries.
pub struct Node<B> {
    backend: B,
}

impl<B> Node<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

impl<B> Node<B> {
    pub fn name<S>(&self) -> &str
    where
        S: StorageBackend,
        B: NodeBackend<S>,
    {
        self.backend.name()
    }

    /// Run `prep` → `exec` (with retries and fallback) → `post`, returning the
    /// action that should drive the next routing decision.
    pub async fn run<S>(&self, store: &mut Store<S>) -> Result<Action, NodeError>
    where
        S: StorageBackend,
        B: NodeBackend<S>,
    {
        let prep = self.backend.prep(store).await?;

        let mut ctx = ExecutionContext::new(self.backend.max_retries(), self.backend.retry_delay());
        let mut last_error = None;

        let exec_result = loop {
            match self.backend.exec(&prep, &ctx).await {
                Ok(result) => break Ok(result),
                Err(err) => {
                    if ctx.is_last_attempt() {
                        last_error = Some(err);
                        break Err(());
                    }
                    tracing::warn!(
                        node = self.backend.name(),
                        attempt = ctx.current_retry,
                        max_retries = ctx.max_retries,
                        "node exec failed, retrying"
                    );
                    if !ctx.retry_delay.is_zero() {
                        tokio::time::sleep(ctx.retry_delay).await;
                    }
                    ctx.current_retry += 1;
                }
            }
        };

        let exec = match exec_result {
            Ok(result) => result,
            Err(()) => {
                let err = last_error.expect("last_error set when exec loop breaks with Err(())");
                self.backend.exec_fallback(&prep, &ctx, err).await?
            }
        };

        self.backend.post(store, prep, exec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryStorage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyNode {
        fail_until: usize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl NodeBackend<InMemoryStorage> for FlakyNode {
        type Prep = ();
        type Exec = usize;

        fn name(&self) -> &str {
            "flaky"
        }

        async fn prep(&self, _store: &Store<InMemoryStorage>) -> Result<Self::Prep, NodeError> {
            Ok(())
        }

        async fn exec(&self, _prep: &(), _ctx: &ExecutionContext) -> Result<usize, NodeError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_until {
                Err(NodeError::Exec {
                    attempts: attempt + 1,
                    message: "not yet".into(),
                })
            } else {
                Ok(attempt)
            }
        }

        fn max_retries(&self) -> usize {
            3
        }

        async fn post(
            &self,
            store: &mut Store<InMemoryStorage>,
            _prep: (),
            exec: usize,
        ) -> Result<Action, NodeError> {
            store.put("attempts_used", &exec)?;
            Ok(Action::default_action())
        }
    }

    #[tokio::test]
    async fn retries_until_success() {
        let node = Node::new(FlakyNode {
            fail_until: 2,
            attempts: AtomicUsize::new(0),
        });
        let mut store = Store::default();
        let action = node.run(&mut store).await.unwrap();
        assert!(action.is_default());
        let used: usize = store.require("attempts_used").unwrap();
        assert_eq!(used, 2);
    }

    #[tokio::test]
    async fn exhausts_retries_and_fails() {
        let node = Node::new(FlakyNode {
            fail_until: 100,
            attempts: AtomicUsize::new(0),
        });
        let mut store = Store::default();
        let result = node.run(&mut store).await;
        assert!(result.is_err());
    }
}
