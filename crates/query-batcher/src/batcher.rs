//! Request batcher implementation

use crate::config::BatcherConfig;
use parking_lot::Mutex;
use query_core::{QueryError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Reply<R> = oneshot::Sender<Result<R>>;

/// One waiting caller
struct PendingQuery<P, R> {
    params: P,
    reply: Reply<R>,
}

/// Requests collected for one query name, plus the task that will flush them
struct PendingBatch<P, R> {
    id: u64,
    queries: Vec<PendingQuery<P, R>>,
    flush: JoinHandle<()>,
}

struct Shared<P, R> {
    config: BatcherConfig,
    /// At most one open batch per query name
    batches: Mutex<HashMap<String, PendingBatch<P, R>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// Coalesces concurrent requests for the same query into one batched call.
///
/// `P` is the per-request parameter type and `R` the per-request result.
/// Cloning is cheap and yields another handle to the same batcher.
pub struct QueryBatcher<P, R> {
    shared: Arc<Shared<P, R>>,
}

impl<P, R> Clone for QueryBatcher<P, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P, R> QueryBatcher<P, R>
where
    P: Send + 'static,
    R: Send + 'static,
{
    /// Create a batcher with the given configuration
    pub fn new(config: BatcherConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                batches: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a batcher with the default 50ms coalescing window
    pub fn with_defaults() -> Self {
        Self::new(BatcherConfig::default())
    }

    /// Submit one request using the configured coalescing window.
    ///
    /// See [`QueryBatcher::add_with_delay`].
    pub async fn add<F, Fut>(&self, query_name: &str, executor: F, params: P) -> Result<R>
    where
        F: FnOnce(Vec<P>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<R>>> + Send + 'static,
    {
        let delay = self.shared.config.batch_delay;
        self.add_with_delay(query_name, executor, params, delay).await
    }

    /// Submit one request and wait for its share of the batched result.
    ///
    /// The first request for a query name opens a batch that flushes after
    /// `delay`, using that request's executor; requests arriving before the
    /// flush join it and their executors are dropped. The executor receives
    /// every joined parameter in submission order and must return one result
    /// per parameter, in the same order. If it fails, every caller in the
    /// batch receives the same error.
    pub async fn add_with_delay<F, Fut>(
        &self,
        query_name: &str,
        executor: F,
        params: P,
        delay: Duration,
    ) -> Result<R>
    where
        F: FnOnce(Vec<P>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<R>>> + Send + 'static,
    {
        let receiver = self.enqueue(query_name, executor, params, delay)?;
        match receiver.await {
            Ok(result) => result,
            Err(_) => Err(QueryError::BatchCancelled(format!(
                "batch '{}' ended without a result",
                query_name
            ))),
        }
    }

    fn enqueue<F, Fut>(
        &self,
        query_name: &str,
        executor: F,
        params: P,
        delay: Duration,
    ) -> Result<oneshot::Receiver<Result<R>>>
    where
        F: FnOnce(Vec<P>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Vec<R>>> + Send + 'static,
    {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(QueryError::BatchCancelled("batcher is closed".to_string()));
        }
        let (reply, receiver) = oneshot::channel();
        let query = PendingQuery { params, reply };

        let mut batches = self.shared.batches.lock();
        if let Some(batch) = batches.get_mut(query_name) {
            batch.queries.push(query);
            return Ok(receiver);
        }

        let handle = Handle::try_current().map_err(|_| {
            QueryError::BatchCancelled("no Tokio runtime to schedule the batch".to_string())
        })?;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::clone(&self.shared);
        let name = query_name.to_string();
        // The lock is held until the batch is inserted, so the flush task
        // always finds it.
        let flush = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            execute_batch(&shared, &name, id, executor).await;
        });
        debug!("Opened batch '{}' flushing in {:?}", query_name, delay);
        batches.insert(
            query_name.to_string(),
            PendingBatch {
                id,
                queries: vec![query],
                flush,
            },
        );
        Ok(receiver)
    }

    /// Number of open batches
    pub fn pending_batches(&self) -> usize {
        self.shared.batches.lock().len()
    }

    /// Number of requests waiting in the open batch for `query_name`
    pub fn pending_queries(&self, query_name: &str) -> usize {
        self.shared
            .batches
            .lock()
            .get(query_name)
            .map_or(0, |batch| batch.queries.len())
    }

    /// Cancel every scheduled flush. Waiting callers receive
    /// `QueryError::BatchCancelled`, as do later submissions.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let drained: Vec<(String, PendingBatch<P, R>)> =
            self.shared.batches.lock().drain().collect();

        for (name, batch) in drained {
            batch.flush.abort();
            debug!(
                "Cancelled batch '{}' with {} waiting requests",
                name,
                batch.queries.len()
            );
            for query in batch.queries {
                let _ = query.reply.send(Err(QueryError::BatchCancelled(format!(
                    "batcher closed before batch '{}' ran",
                    name
                ))));
            }
        }
    }

    /// Get the batcher configuration
    pub fn config(&self) -> &BatcherConfig {
        &self.shared.config
    }
}

/// Take the batch out of the open table and run it
async fn execute_batch<P, R, F, Fut>(shared: &Shared<P, R>, name: &str, id: u64, executor: F)
where
    F: FnOnce(Vec<P>) -> Fut,
    Fut: Future<Output = Result<Vec<R>>>,
{
    let batch = {
        let mut batches = shared.batches.lock();
        // A closed batcher may have drained this batch already.
        let current = batches.get(name).is_some_and(|batch| batch.id == id);
        if current {
            batches.remove(name)
        } else {
            None
        }
    };
    let Some(batch) = batch else {
        return;
    };

    let (params, replies): (Vec<P>, Vec<Reply<R>>) = batch
        .queries
        .into_iter()
        .map(|query| (query.params, query.reply))
        .unzip();
    let expected = params.len();
    debug!("Executing batch '{}' with {} requests", name, expected);

    let error = match executor(params).await {
        Ok(results) if results.len() == expected => {
            for (reply, result) in replies.into_iter().zip(results) {
                let _ = reply.send(Ok(result));
            }
            return;
        }
        Ok(results) => QueryError::BatchSizeMismatch {
            expected,
            actual: results.len(),
        },
        Err(e) => e,
    };

    warn!("Batch '{}' failed for {} requests: {}", name, expected, error);
    for reply in replies {
        let _ = reply.send(Err(error.clone()));
    }
}

impl<P, R> std::fmt::Debug for QueryBatcher<P, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBatcher")
            .field("batch_delay", &self.shared.config.batch_delay)
            .field("open_batches", &self.shared.batches.lock().len())
            .field("closed", &self.shared.closed.load(Ordering::Relaxed))
            .finish()
    }
}
