//! Bounded work queue consumed by a fixed set of concurrent workers.
//!
//! Every bulk operation (delete, download, upload, segment transfer)
//! runs through one of these pools. Each worker owns its own session
//! value, handed over at spawn time and never shared, so one transport
//! is never used from two tasks at once.
//!
//! Cancellation is advisory and cooperative: raising the abort flag
//! stops workers from *processing* further items, but the pool keeps
//! draining its queue so producers blocked on a full queue always make
//! progress, and items already being processed complete normally.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::error::{Error, Result};

/// Queue capacity of a single pool. Large but finite; producers in
/// bulk phases pace themselves against it.
pub const QUEUE_CAPACITY: usize = 10_000;

/// Worker count used by every bulk phase.
pub const DEFAULT_WIDTH: usize = 10;

/// Cooperative cancellation signal shared by every pool of one command
/// invocation. A fatal handler error raises it so sibling pools drain
/// and the process can exit instead of hanging.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-item work callback. One handler instance is shared by all
/// workers of a pool; the session is exclusive to one worker.
///
/// Recoverable per-item conditions (a 404, a missing local file) are
/// the handler's business: report them and return `Ok`. Returning an
/// `Err` is fatal to the pool and raises the shared abort flag.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    type Item: Send + 'static;
    type Session: Send + 'static;

    async fn run(&self, item: Self::Item, session: &mut Self::Session) -> Result<()>;
}

/// Cloneable producer half of a pool's queue, for submitters that run
/// inside another pool's workers. The pool's queue stays open until the
/// pool itself and every handle have been dropped.
pub struct PoolHandle<T> {
    tx: mpsc::Sender<T>,
    pending: Arc<AtomicUsize>,
    abort: AbortFlag,
}

impl<T> Clone for PoolHandle<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: Arc::clone(&self.pending),
            abort: self.abort.clone(),
        }
    }
}

impl<T: Send + 'static> PoolHandle<T> {
    /// Enqueues an item, waiting while the queue is at capacity.
    pub async fn submit(&self, item: T) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(item).await.is_err() {
            // All workers gone; nothing will dequeue this item.
            self.pending.fetch_sub(1, Ordering::SeqCst);
            self.abort.raise();
        }
    }

    /// Items submitted but not yet fully processed.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Waits until every submitted item has been processed, without
    /// closing the queue. Used by producers that must observe one phase
    /// finish before starting the next (e.g. a container delete waiting
    /// for its objects to be gone).
    pub async fn wait_idle(&self) {
        while self.pending() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub struct WorkerPool<H: JobHandler> {
    handle: PoolHandle<H::Item>,
    workers: JoinSet<()>,
    failure: Arc<Mutex<Option<Error>>>,
}

impl<H: JobHandler> WorkerPool<H> {
    /// Starts one worker per session. Width is `sessions.len()`.
    pub fn spawn(handler: Arc<H>, sessions: Vec<H::Session>, abort: AbortFlag) -> Self {
        let (tx, rx) = mpsc::channel::<H::Item>(QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));
        let pending = Arc::new(AtomicUsize::new(0));
        let failure: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
        let mut workers = JoinSet::new();

        for mut session in sessions {
            let rx = Arc::clone(&rx);
            let handler = Arc::clone(&handler);
            let abort = abort.clone();
            let pending = Arc::clone(&pending);
            let failure = Arc::clone(&failure);
            workers.spawn(async move {
                loop {
                    // The guard is released before the item is handled,
                    // so only idle workers contend for the receiver.
                    let item = { rx.lock().await.recv().await };
                    let Some(item) = item else { break };
                    if !abort.is_raised()
                        && let Err(err) = handler.run(item, &mut session).await
                    {
                        tracing::debug!(%err, "fatal job error, aborting pool");
                        abort.raise();
                        let mut slot = failure.lock().await;
                        if slot.is_none() {
                            *slot = Some(err);
                        }
                    }
                    pending.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }

        Self {
            handle: PoolHandle { tx, pending, abort },
            workers,
            failure,
        }
    }

    /// Enqueues an item, waiting while the queue is at capacity.
    pub async fn submit(&self, item: H::Item) {
        self.handle.submit(item).await;
    }

    /// Items submitted but not yet fully processed.
    pub fn pending(&self) -> usize {
        self.handle.pending()
    }

    /// Waits until every submitted item has been processed, without
    /// closing the queue.
    pub async fn wait_idle(&self) {
        self.handle.wait_idle().await;
    }

    /// A producer handle that keeps the queue open as long as it lives.
    pub fn handle(&self) -> PoolHandle<H::Item> {
        self.handle.clone()
    }

    pub fn abort(&self) {
        self.handle.abort.raise();
    }

    /// Closes the queue, waits for every worker to finish, and
    /// surfaces the first fatal handler error, if any. Outstanding
    /// [`PoolHandle`] clones keep the queue open until they drop.
    pub async fn join(self) -> Result<()> {
        let Self {
            handle,
            mut workers,
            failure,
        } = self;
        drop(handle);
        while workers.join_next().await.is_some() {}
        match failure.lock().await.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct Collect {
        seen: Mutex<Vec<u32>>,
        fail_on: Option<u32>,
    }

    #[async_trait]
    impl JobHandler for Collect {
        type Item = u32;
        type Session = u32; // worker id

        async fn run(&self, item: u32, _session: &mut u32) -> Result<()> {
            if self.fail_on == Some(item) {
                return Err(Error::Transport("boom".to_string()));
            }
            self.seen.lock().await.push(item);
            Ok(())
        }
    }

    #[tokio::test]
    async fn processes_every_item_exactly_once() {
        let handler = Arc::new(Collect {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        });
        let pool = WorkerPool::spawn(Arc::clone(&handler), (0..4).collect(), AbortFlag::new());
        for i in 0..200u32 {
            pool.submit(i).await;
        }
        pool.join().await.unwrap();

        let seen = handler.seen.lock().await;
        assert_eq!(seen.len(), 200);
        let unique: HashSet<_> = seen.iter().collect();
        assert_eq!(unique.len(), 200);
    }

    #[tokio::test]
    async fn fatal_error_aborts_and_surfaces_on_join() {
        let handler = Arc::new(Collect {
            seen: Mutex::new(Vec::new()),
            fail_on: Some(3),
        });
        let abort = AbortFlag::new();
        let pool = WorkerPool::spawn(Arc::clone(&handler), vec![0], abort.clone());
        for i in 0..50u32 {
            pool.submit(i).await;
        }
        let err = pool.join().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert!(abort.is_raised());
        // Items after the failure were drained, not processed.
        assert!(handler.seen.lock().await.len() < 50);
    }

    #[tokio::test]
    async fn abort_drains_without_processing() {
        let handler = Arc::new(Collect {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        });
        let abort = AbortFlag::new();
        abort.raise();
        let pool = WorkerPool::spawn(Arc::clone(&handler), vec![0, 1], abort);
        for i in 0..100u32 {
            pool.submit(i).await;
        }
        pool.join().await.unwrap();
        assert!(handler.seen.lock().await.is_empty());
    }

    #[tokio::test]
    async fn handle_feeds_the_pool_from_another_task() {
        let handler = Arc::new(Collect {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        });
        let pool = WorkerPool::spawn(Arc::clone(&handler), vec![0, 1], AbortFlag::new());
        let handle = pool.handle();
        let producer = tokio::spawn(async move {
            for i in 0..30u32 {
                handle.submit(i).await;
            }
            handle.wait_idle().await;
        });
        producer.await.unwrap();
        pool.join().await.unwrap();
        assert_eq!(handler.seen.lock().await.len(), 30);
    }

    #[tokio::test]
    async fn wait_idle_returns_once_queue_is_empty() {
        let handler = Arc::new(Collect {
            seen: Mutex::new(Vec::new()),
            fail_on: None,
        });
        let pool = WorkerPool::spawn(Arc::clone(&handler), vec![0, 1, 2], AbortFlag::new());
        for i in 0..50u32 {
            pool.submit(i).await;
        }
        pool.wait_idle().await;
        assert_eq!(pool.pending(), 0);
        assert_eq!(handler.seen.lock().await.len(), 50);
        pool.join().await.unwrap();
    }
}
