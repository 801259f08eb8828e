//! Watch-driven event handler
//!
//! Events for one object kind are folded through an `ObjectCache` and
//! sharded by object key across a fixed set of workers. Each key always maps
//! to the same worker, so one object's events are handled in order while
//! different objects proceed in parallel.
//!
//! A failed callback does not hold up its worker. The delta is put back on
//! the worker's queue after a per-key backoff, and a newer event for the same
//! key supersedes the pending retry.

use crate::cache::{Delta, ObjectCache};
use async_trait::async_trait;
use futures::future::join_all;
use futures::{FutureExt, StreamExt};
use kube::{Api, Resource};
use kube_runtime::watcher;
use kube_runtime::WatchStreamExt;
use overlay_core::controller::panic_message;
use overlay_core::{ClusterObject, EventHandler, OverlayError, ResourceHandler, Result};
use serde::de::DeserializeOwned;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, WeakUnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Retry policy for failed add/delete callbacks
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries per key after the first attempt before the key is dropped
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 15,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff before retry number `attempt` (zero based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Unit of work on a shard queue
#[derive(Debug)]
pub(crate) enum WorkItem {
    Event(Delta),
    /// Redelivery of a failed delta; stale unless `generation` is still the
    /// key's pending retry
    Retry { delta: Delta, generation: u64 },
}

/// Event handler backed by a Kubernetes watch over all objects of kind `K`
pub struct WatchEventHandler<K> {
    api: Api<K>,
    handler: Arc<dyn ResourceHandler>,
    retry: RetryPolicy,
}

impl<K> WatchEventHandler<K> {
    pub fn new(api: Api<K>, handler: Arc<dyn ResourceHandler>, retry: RetryPolicy) -> Self {
        Self {
            api,
            handler,
            retry,
        }
    }
}

#[async_trait]
impl<K> EventHandler for WatchEventHandler<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    ClusterObject: From<K>,
{
    async fn run(&self, threadiness: usize, shutdown: CancellationToken) -> Result<()> {
        let kind = self.handler.kind();
        let threadiness = threadiness.max(1);
        info!("Starting {} event handler with {} workers", kind, threadiness);

        let mut queues = Vec::with_capacity(threadiness);
        let mut workers = Vec::with_capacity(threadiness);
        for id in 0..threadiness {
            let (tx, rx) = mpsc::unbounded_channel();
            let worker = ShardWorker::new(
                id,
                self.handler.clone(),
                self.retry.clone(),
                tx.downgrade(),
                shutdown.clone(),
            );
            queues.push(tx);
            workers.push(tokio::spawn(worker.run(rx)));
        }

        let mut cache = ObjectCache::default();
        let mut events = watcher(self.api.clone(), watcher::Config::default())
            .default_backoff()
            .boxed();

        let mut result = Ok(());
        'watch: loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.next() => event,
            };
            match event {
                Some(Ok(event)) => {
                    for delta in cache.apply(event) {
                        let shard = shard_for(&delta.key(), queues.len());
                        if queues[shard].send(WorkItem::Event(delta)).is_err() {
                            error!("{} worker {} stopped, ending {} watch", kind, shard, kind);
                            result = Err(OverlayError::Internal(format!(
                                "{} worker {} stopped",
                                kind, shard
                            )));
                            break 'watch;
                        }
                    }
                }
                Some(Err(e)) => warn!("{} watch error: {}", kind, e),
                None => {
                    warn!("{} watch stream ended", kind);
                    break;
                }
            }
        }

        drop(queues);
        for joined in join_all(workers).await {
            if let Err(e) = joined {
                error!("{} worker did not exit cleanly: {}", kind, e);
            }
        }
        info!("Stopped {} event handler", kind);
        result
    }
}

pub(crate) fn shard_for(key: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() % shards as u64) as usize
}

#[derive(Clone, Copy, Debug)]
struct PendingRetry {
    generation: u64,
    attempts: u32,
}

/// Consumer of one shard queue
pub(crate) struct ShardWorker {
    id: usize,
    handler: Arc<dyn ResourceHandler>,
    retry: RetryPolicy,
    requeue: WeakUnboundedSender<WorkItem>,
    shutdown: CancellationToken,
    // Keys whose last delivery failed
    pending: HashMap<String, PendingRetry>,
    next_generation: u64,
}

impl ShardWorker {
    pub(crate) fn new(
        id: usize,
        handler: Arc<dyn ResourceHandler>,
        retry: RetryPolicy,
        requeue: WeakUnboundedSender<WorkItem>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id,
            handler,
            retry,
            requeue,
            shutdown,
            pending: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Process items until shutdown or until every sender is gone.
    /// Retries still waiting on their backoff are abandoned.
    pub(crate) async fn run(mut self, mut queue: UnboundedReceiver<WorkItem>) {
        loop {
            let item = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                item = queue.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };
            self.process(item).await;
        }
        debug!("{} worker {} exiting", self.handler.kind(), self.id);
    }

    async fn process(&mut self, item: WorkItem) {
        let kind = self.handler.kind();
        let (delta, after_failure) = match item {
            // An event for a failing key replaces the queued retry. Its update
            // filter is bypassed since the previous add never landed.
            WorkItem::Event(delta) => {
                let after_failure = self.pending.contains_key(&delta.key());
                (delta, after_failure)
            }
            WorkItem::Retry { delta, generation } => {
                let current = self.pending.get(&delta.key()).map(|p| p.generation);
                if current != Some(generation) {
                    trace!("Skipping superseded retry of {} {}", kind, delta.key());
                    return;
                }
                (delta, true)
            }
        };

        let key = delta.key();
        let outcome = AssertUnwindSafe(deliver(self.handler.as_ref(), &delta, after_failure))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(())) => {
                self.pending.remove(&key);
            }
            Ok(Err(err)) => self.schedule_retry(key, delta, err),
            Err(panic) => {
                self.pending.remove(&key);
                error!(
                    "Dropping {} {}: callback panicked: {}",
                    kind,
                    key,
                    panic_message(panic.as_ref())
                );
            }
        }
    }

    fn schedule_retry(&mut self, key: String, delta: Delta, err: OverlayError) {
        let kind = self.handler.kind();
        if matches!(err, OverlayError::UnexpectedObjectKind { .. }) {
            self.pending.remove(&key);
            error!("Dropping {} {}: {}", kind, key, err);
            return;
        }

        let attempts = self.pending.get(&key).map_or(0, |p| p.attempts);
        if attempts >= self.retry.max_retries {
            self.pending.remove(&key);
            error!("Dropping {} {} after {} retries: {}", kind, key, attempts, err);
            return;
        }
        if err.is_transient() {
            debug!("Retrying {} {}: {}", kind, key, err);
        } else {
            warn!("Retrying {} {}: {}", kind, key, err);
        }

        let generation = self.next_generation;
        self.next_generation += 1;
        self.pending.insert(
            key,
            PendingRetry {
                generation,
                attempts: attempts + 1,
            },
        );

        let delay = self.retry.delay(attempts);
        let requeue = self.requeue.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    if let Some(queue) = requeue.upgrade() {
                        // A closed queue means the worker is gone.
                        let _ = queue.send(WorkItem::Retry { delta, generation });
                    }
                }
            }
        });
    }
}

async fn deliver(handler: &dyn ResourceHandler, delta: &Delta, after_failure: bool) -> Result<()> {
    match delta {
        Delta::Add(obj) => handler.on_add(obj).await,
        Delta::Update { old, new } => {
            if after_failure || handler.update_filter(old, new) {
                handler.on_add(new).await
            } else {
                Ok(())
            }
        }
        Delta::Delete(obj) => handler.on_delete(obj).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Node;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use overlay_core::ObjectKind;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;
    use tokio::sync::mpsc::UnboundedSender;
    use tokio::task::JoinHandle;

    #[derive(Clone, Copy)]
    enum Outcome {
        Handle,
        Fail,
        FailTransient,
        Panic,
    }

    type Behavior = Box<dyn Fn(&Node) -> Outcome + Send + Sync>;

    /// Records handled nodes as `name@resourceVersion`
    struct TestHandler {
        behavior: Behavior,
        attempts: AtomicUsize,
        handled: Mutex<Vec<String>>,
        filter_result: bool,
    }

    impl TestHandler {
        fn new(behavior: impl Fn(&Node) -> Outcome + Send + Sync + 'static) -> Self {
            Self {
                behavior: Box::new(behavior),
                attempts: AtomicUsize::new(0),
                handled: Mutex::new(Vec::new()),
                filter_result: true,
            }
        }

        fn handled(&self) -> Vec<String> {
            self.handled.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ResourceHandler for TestHandler {
        fn kind(&self) -> ObjectKind {
            ObjectKind::Node
        }

        async fn on_add(&self, obj: &ClusterObject) -> Result<()> {
            let node = obj.as_node()?;
            self.attempts.fetch_add(1, Ordering::SeqCst);
            match (self.behavior)(node) {
                Outcome::Handle => {
                    self.handled.lock().unwrap().push(format!(
                        "{}@{}",
                        obj.key(),
                        node.metadata.resource_version.clone().unwrap_or_default()
                    ));
                    Ok(())
                }
                Outcome::Fail => Err(OverlayError::Backend("datapath unavailable".into())),
                Outcome::FailTransient => Err(OverlayError::MissingAddressInfo(obj.key())),
                Outcome::Panic => panic!("callback blew up on {}", obj.key()),
            }
        }

        async fn on_delete(&self, _obj: &ClusterObject) -> Result<()> {
            Ok(())
        }

        fn update_filter(&self, _old: &ClusterObject, _new: &ClusterObject) -> bool {
            self.filter_result
        }
    }

    fn node(name: &str, version: &str) -> ClusterObject {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                resource_version: Some(version.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
        .into()
    }

    fn named(node: &Node) -> &str {
        node.metadata.name.as_deref().unwrap_or_default()
    }

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn start_worker(
        handler: Arc<TestHandler>,
        retry: RetryPolicy,
    ) -> (UnboundedSender<WorkItem>, JoinHandle<()>, CancellationToken) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let worker = ShardWorker::new(0, handler, retry, tx.downgrade(), shutdown.clone());
        (tx, tokio::spawn(worker.run(rx)), shutdown)
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    #[test]
    fn test_retry_delay_backs_off_and_caps() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay(0), Duration::from_millis(5));
        assert_eq!(retry.delay(3), Duration::from_millis(40));
        assert_eq!(retry.delay(20), Duration::from_secs(10));
        assert_eq!(retry.delay(64), Duration::from_secs(10));
    }

    #[test]
    fn test_shard_is_stable_per_key() {
        for shards in 1..8 {
            let shard = shard_for("default/api-0", shards);
            assert!(shard < shards);
            assert_eq!(shard, shard_for("default/api-0", shards));
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let failures = Arc::new(AtomicUsize::new(2));
        let handler = Arc::new(TestHandler::new({
            let failures = failures.clone();
            move |_| {
                if failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                    Outcome::FailTransient
                } else {
                    Outcome::Handle
                }
            }
        }));
        let (tx, worker, _shutdown) = start_worker(handler.clone(), fast_retry(5));

        tx.send(WorkItem::Event(Delta::Add(node("worker-2", "1")))).unwrap();
        wait_for(|| !handler.handled().is_empty()).await;
        assert_eq!(handler.handled(), vec!["worker-2@1"]);
        assert_eq!(handler.attempts.load(Ordering::SeqCst), 3);

        drop(tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let handler = Arc::new(TestHandler::new(|_| Outcome::Fail));
        let (tx, worker, _shutdown) = start_worker(handler.clone(), fast_retry(3));

        tx.send(WorkItem::Event(Delta::Add(node("worker-2", "1")))).unwrap();
        // One initial attempt plus three retries.
        wait_for(|| handler.attempts.load(Ordering::SeqCst) == 4).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(handler.attempts.load(Ordering::SeqCst), 4);
        assert!(handler.handled().is_empty());

        drop(tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_key_does_not_block_other_keys() {
        let handler = Arc::new(TestHandler::new(|n| {
            if named(n) == "bad" {
                Outcome::FailTransient
            } else {
                Outcome::Handle
            }
        }));
        let (tx, worker, shutdown) = start_worker(handler.clone(), RetryPolicy::default());

        let started = Instant::now();
        tx.send(WorkItem::Event(Delta::Add(node("bad", "1")))).unwrap();
        tx.send(WorkItem::Event(Delta::Add(node("good", "1")))).unwrap();
        wait_for(|| handler.handled() == vec!["good@1"]).await;
        assert!(started.elapsed() < Duration::from_secs(1));

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_newer_event_supersedes_pending_retry() {
        // Version 1 lacks what the callback needs; version 2 has it.
        let mut handler = TestHandler::new(|n| {
            if n.metadata.resource_version.as_deref() == Some("1") {
                Outcome::FailTransient
            } else {
                Outcome::Handle
            }
        });
        // The update alone would be filtered out.
        handler.filter_result = false;
        let handler = Arc::new(handler);
        let retry = RetryPolicy {
            max_retries: 15,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
        };
        let (tx, worker, shutdown) = start_worker(handler.clone(), retry);

        tx.send(WorkItem::Event(Delta::Add(node("api-0", "1")))).unwrap();
        tx.send(WorkItem::Event(Delta::Update {
            old: node("api-0", "1"),
            new: node("api-0", "2"),
        }))
        .unwrap();
        wait_for(|| handler.handled() == vec!["api-0@2"]).await;

        // The stale retry is dropped once it comes back around.
        tx.send(WorkItem::Retry {
            delta: Delta::Add(node("api-0", "1")),
            generation: 0,
        })
        .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(handler.attempts.load(Ordering::SeqCst), 2);

        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_filtered_update_is_skipped() {
        let mut handler = TestHandler::new(|_| Outcome::Handle);
        handler.filter_result = false;
        let handler = Arc::new(handler);
        let (tx, worker, _shutdown) = start_worker(handler.clone(), fast_retry(0));

        tx.send(WorkItem::Event(Delta::Update {
            old: node("worker-2", "1"),
            new: node("worker-2", "2"),
        }))
        .unwrap();
        drop(tx);
        worker.await.unwrap();
        assert!(handler.handled().is_empty());
    }

    #[tokio::test]
    async fn test_panicking_callback_drops_only_that_delta() {
        let handler = Arc::new(TestHandler::new(|n| {
            if named(n) == "cursed" {
                Outcome::Panic
            } else {
                Outcome::Handle
            }
        }));
        let (tx, worker, _shutdown) = start_worker(handler.clone(), fast_retry(3));

        tx.send(WorkItem::Event(Delta::Add(node("cursed", "1")))).unwrap();
        tx.send(WorkItem::Event(Delta::Add(node("worker-3", "1")))).unwrap();
        wait_for(|| handler.handled() == vec!["worker-3@1"]).await;
        // Panics are not retried.
        assert_eq!(handler.attempts.load(Ordering::SeqCst), 2);

        drop(tx);
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_abandons_pending_retries() {
        let handler = Arc::new(TestHandler::new(|_| Outcome::Fail));
        let retry = RetryPolicy {
            max_retries: 100,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
        };
        let (tx, worker, shutdown) = start_worker(handler.clone(), retry);

        tx.send(WorkItem::Event(Delta::Add(node("worker-2", "1")))).unwrap();
        wait_for(|| handler.attempts.load(Ordering::SeqCst) == 1).await;
        shutdown.cancel();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_worker_processes_queue_in_order() {
        let handler = Arc::new(TestHandler::new(|_| Outcome::Handle));
        let (tx, worker, _shutdown) = start_worker(handler.clone(), fast_retry(0));

        for name in ["worker-1", "worker-2", "worker-3"] {
            tx.send(WorkItem::Event(Delta::Add(node(name, "1")))).unwrap();
        }
        drop(tx);
        worker.await.unwrap();

        assert_eq!(handler.handled(), vec!["worker-1@1", "worker-2@1", "worker-3@1"]);
    }
}
