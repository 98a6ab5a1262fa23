//! Batch fan-out over a node (§4.1, §4.4/§4.5's per-file and per-section
//! generation steps): run the same [`NodeBackend`] once per item, either one
//! at a time or with bounded concurrency, always returning results in the
//! input order regardless of completion order.

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::node::{ExecutionContext, Node, NodeBackend, NodeError};
use crate::storage::StorageBackend;
use crate::store::Store;

/// How a [`BatchNode`] schedules its items.
#[derive(Debug, Clone, Copy)]
pub enum BatchMode {
    Sequential,
    /// Runs up to `width` items concurrently via a semaphore-bounded pool.
    Parallel { width: usize },
}

impl BatchMode {
    pub fn parallel_default() -> Self {
        BatchMode::Parallel { width: 8 }
    }
}

/// Per-item work a [`BatchNode`] schedules. Unlike [`NodeBackend`], `exec`
/// runs outside any single node's retry loop; batch items are independent,
/// so each gets its own prep/exec/post against a private clone of the
/// blackboard handle the caller hands back in, merged by the caller after.
#[async_trait]
pub trait BatchItem<S: StorageBackend>: Send + Sync {
    type Item: Send + Sync;
    type Output: Send + Sync;

    async fn run_item(&self, item: &Self::Item, ctx: &ExecutionContext) -> Result<Self::Output, NodeError>;

    fn max_retries(&self) -> usize {
        0
    }
}

/// Runs `worker` once per element of `items`, preserving input order in the
/// returned `Vec`. With `fail_fast`, the first item error short-circuits the
/// remaining work (for [`BatchMode::Parallel`], in-flight items still finish);
/// without it, every item runs and failures are reported per-slot.
pub async fn run_batch<S, W>(
    worker: &W,
    items: Vec<W::Item>,
    mode: BatchMode,
    fail_fast: bool,
) -> Vec<Result<W::Output, NodeError>>
where
    S: StorageBackend,
    W: BatchItem<S>,
{
    match mode {
        BatchMode::Sequential => run_sequential(worker, items, fail_fast).await,
        BatchMode::Parallel { width } => run_parallel(worker, items, width, fail_fast).await,
    }
}

async fn run_sequential<S, W>(
    worker: &W,
    items: Vec<W::Item>,
    fail_fast: bool,
) -> Vec<Result<W::Output, NodeError>>
where
    S: StorageBackend,
    W: BatchItem<S>,
{
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let outcome = run_one(worker, &item).await;
        let failed = outcome.is_err();
        results.push(outcome);
        if failed && fail_fast {
            break;
        }
    }
    results
}

async fn run_parallel<S, W>(
    worker: &W,
    items: Vec<W::Item>,
    width: usize,
    fail_fast: bool,
) -> Vec<Result<W::Output, NodeError>>
where
    S: StorageBackend,
    W: BatchItem<S>,
{
    let semaphore = Arc::new(Semaphore::new(width.max(1)));
    let mut futures = FuturesUnordered::new();

    for (index, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        futures.push(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let outcome = run_one(worker, &item).await;
            (index, outcome)
        });
    }

    let mut slots: Vec<Option<Result<W::Output, NodeError>>> = Vec::new();
    let mut aborted = false;

    while let Some((index, outcome)) = futures.next().await {
        if slots.len() <= index {
            slots.resize_with(index + 1, || None);
        }
        let failed = outcome.is_err();
        slots[index] = Some(outcome);
        if failed && fail_fast {
            aborted = true;
            break;
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| match slot {
            Some(outcome) => outcome,
            None => Err(NodeError::Exec {
                attempts: 0,
                message: if aborted {
                    format!("batch item {index} skipped after fail_fast abort")
                } else {
                    format!("batch item {index} never completed")
                },
            }),
        })
        .collect()
}

async fn run_one<S, W>(worker: &W, item: &W::Item) -> Result<W::Output, NodeError>
where
    S: StorageBackend,
    W: BatchItem<S>,
{
    let mut ctx = ExecutionContext::new(worker.max_retries(), std::time::Duration::from_millis(0));
    loop {
        match worker.run_item(item, &ctx).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if ctx.is_last_attempt() {
                    return Err(err);
                }
                ctx.current_retry += 1;
            }
        }
    }
}

/// A [`NodeBackend`] whose `exec` phase fans a prepared item list out through
/// [`run_batch`], then hands the ordered results to `post` for merging back
/// into the blackboard. Most batch stages (parse files, generate sections,
/// validate charts) are a single impl of this trait.
#[async_trait]
pub trait BatchNodeBackend<S: StorageBackend>: Send + Sync {
    type Item: Send + Sync + Clone;
    type Output: Send + Sync;

    fn name(&self) -> &str;

    async fn prep_items(&self, store: &Store<S>) -> Result<Vec<Self::Item>, NodeError>;

    async fn exec_item(
        &self,
        item: &Self::Item,
        ctx: &ExecutionContext,
    ) -> Result<Self::Output, NodeError>;

    async fn post_batch(
        &self,
        store: &mut Store<S>,
        results: Vec<Result<Self::Output, NodeError>>,
    ) -> Result<crate::action::Action, NodeError>;

    fn mode(&self) -> BatchMode {
        BatchMode::Sequential
    }

    fn fail_fast(&self) -> bool {
        false
    }

    fn item_max_retries(&self) -> usize {
        0
    }
}

struct BatchWorker<'a, S, B> {
    backend: &'a B,
    _marker: std::marker::PhantomData<S>,
}

#[async_trait]
impl<'a, S, B> BatchItem<S> for BatchWorker<'a, S, B>
where
    S: StorageBackend,
    B: BatchNodeBackend<S>,
{
    type Item = B::Item;
    type Output = B::Output;

    async fn run_item(&self, item: &Self::Item, ctx: &ExecutionContext) -> Result<Self::Output, NodeError> {
        self.backend.exec_item(item, ctx).await
    }

    fn max_retries(&self) -> usize {
        self.backend.item_max_retries()
    }
}

/// Adapts a [`BatchNodeBackend`] into the ordinary [`NodeBackend`] lifecycle
/// so it can be dropped into a [`crate::flow::FlowBuilder`] like any other
/// node.
pub struct BatchNode<B> {
    backend: B,
}

impl<B> BatchNode<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl<S, B> NodeBackend<S> for BatchNode<B>
where
    S: StorageBackend,
    B: BatchNodeBackend<S>,
{
    type Prep = Vec<B::Item>;
    type Exec = Vec<Result<B::Output, NodeError>>;

    fn name(&self) -> &str {
        self.backend.name()
    }

    async fn prep(&self, store: &Store<S>) -> Result<Self::Prep, NodeError> {
        self.backend.prep_items(store).await
    }

    async fn exec(&self, prep: &Self::Prep, _ctx: &ExecutionContext) -> Result<Self::Exec, NodeError> {
        let worker = BatchWorker {
            backend: &self.backend,
            _marker: std::marker::PhantomData,
        };
        Ok(run_batch(&worker, clone_items(prep), self.backend.mode(), self.backend.fail_fast()).await)
    }

    async fn post(
        &self,
        store: &mut Store<S>,
        _prep: Self::Prep,
        exec: Self::Exec,
    ) -> Result<crate::action::Action, NodeError> {
        self.backend.post_batch(store, exec).await
    }
}

fn clone_items<T: Clone>(items: &[T]) -> Vec<T> {
    items.to_vec()
}
