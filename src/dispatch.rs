//! Job queue and worker pool.
//!
//! The queue carries job ids only; all state lives in the job record. A
//! fixed number of worker tasks share one receiver behind an async mutex, so
//! each id is delivered to exactly one worker, in FIFO order.
//!
//! An id already waiting in the queue is not added a second time; once a
//! worker has taken it, it may be enqueued again.
//!
//! ## Shutdown
//!
//! [`Dispatcher::stop`] cancels a [`CancellationToken`] that every worker
//! checks before taking the next id. A job already handed to a worker runs to
//! completion; ids still queued stay unread. `stop` returns once all worker
//! tasks have exited.
//!
//! ## Acknowledgement
//!
//! Every delivered id is acknowledged after its handler returns, whether it
//! succeeded, failed, or panicked. [`Dispatcher::wait_idle`] resolves when
//! the number of enqueued-but-unacknowledged ids reaches zero.

use crate::error::DocJobError;
use futures::FutureExt as _;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

type SharedReceiver = Arc<AsyncMutex<mpsc::UnboundedReceiver<String>>>;
type Waiting = Arc<Mutex<HashSet<String>>>;

/// Count of ids enqueued but not yet acknowledged.
#[derive(Debug, Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

impl Pending {
    fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    fn ack(&self) {
        if self.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn get(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

/// FIFO of job ids drained by a fixed pool of workers.
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<String>,
    rx: SharedReceiver,
    waiting: Waiting,
    pending: Arc<Pending>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pending", &self.pending.get())
            .field("workers", &self.workers.lock().len())
            .field("stopped", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(AsyncMutex::new(rx)),
            waiting: Waiting::default(),
            pending: Arc::new(Pending::default()),
            cancel: CancellationToken::new(),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Append `job_id` to the queue. Never blocks.
    ///
    /// Returns `false` when the id is already waiting in the queue.
    ///
    /// # Errors
    /// [`DocJobError::ShuttingDown`] once [`Dispatcher::stop`] has been called.
    pub fn enqueue(&self, job_id: impl Into<String>) -> Result<bool, DocJobError> {
        if self.cancel.is_cancelled() {
            return Err(DocJobError::ShuttingDown);
        }
        let job_id = job_id.into();
        let mut waiting = self.waiting.lock();
        if !waiting.insert(job_id.clone()) {
            debug!(job_id = %job_id, "Already queued");
            return Ok(false);
        }
        self.pending.add();
        if self.tx.send(job_id.clone()).is_err() {
            waiting.remove(&job_id);
            self.pending.ack();
            return Err(DocJobError::ShuttingDown);
        }
        Ok(true)
    }

    /// Spawn `n` workers (at least one), each running `handler` per job id.
    ///
    /// # Errors
    /// [`DocJobError::ShuttingDown`] after `stop`, [`DocJobError::Internal`]
    /// if workers are already running.
    pub fn start<F, Fut>(&self, n: usize, handler: F) -> Result<(), DocJobError>
    where
        F: Fn(String) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(DocJobError::ShuttingDown);
        }
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return Err(DocJobError::Internal("dispatcher already started".into()));
        }
        let n = n.max(1);
        for i in 0..n {
            let name = format!("worker-{i}");
            workers.push(tokio::spawn(worker_loop(
                name,
                Arc::clone(&self.rx),
                Arc::clone(&self.waiting),
                Arc::clone(&self.pending),
                self.cancel.clone(),
                handler.clone(),
            )));
        }
        info!("Dispatcher started {} workers", n);
        Ok(())
    }

    /// Stop taking new jobs, let in-flight jobs finish, join the workers.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Dispatcher stopped ({} ids left unread)", self.pending.get());
    }

    /// Resolve once every enqueued id has been acknowledged, or the
    /// dispatcher has been stopped.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.pending.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.get() == 0 {
                return;
            }
            tokio::select! {
                _ = notified => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    /// Ids enqueued and not yet acknowledged.
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

async fn worker_loop<F, Fut>(
    name: String,
    rx: SharedReceiver,
    waiting: Waiting,
    pending: Arc<Pending>,
    cancel: CancellationToken,
    handler: F,
) where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    debug!(worker = %name, "Worker started");
    loop {
        let next = {
            let mut queue = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                guard = rx.lock() => guard,
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                id = queue.recv() => id,
            }
        };
        let Some(job_id) = next else {
            break;
        };
        waiting.lock().remove(&job_id);

        debug!(worker = %name, job_id = %job_id, "Picked up job");
        let outcome = AssertUnwindSafe(handler(job_id.clone()))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            error!(
                worker = %name,
                job_id = %job_id,
                "Job handler panicked: {}",
                panic_message(panic.as_ref())
            );
        }
        pending.ack();
    }
    debug!(worker = %name, "Worker stopped");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::oneshot;

    type Seen = Arc<Mutex<Vec<String>>>;

    fn recorder(seen: Seen) -> impl Fn(String) -> futures::future::BoxFuture<'static, ()> + Clone {
        move |id| {
            let seen = Arc::clone(&seen);
            async move {
                tokio::task::yield_now().await;
                seen.lock().push(id);
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn single_worker_preserves_fifo_order() {
        let seen: Seen = Arc::default();
        let d = Dispatcher::new();
        for i in 0..5 {
            d.enqueue(format!("job-{i}")).unwrap();
        }
        d.start(1, recorder(Arc::clone(&seen))).unwrap();
        d.wait_idle().await;
        d.stop().await;
        assert_eq!(
            *seen.lock(),
            vec!["job-0", "job-1", "job-2", "job-3", "job-4"]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_entry_is_delivered_exactly_once() {
        for k in [0usize, 1, 3, 4, 17, 64] {
            let seen: Seen = Arc::default();
            let d = Dispatcher::new();
            d.start(4, recorder(Arc::clone(&seen))).unwrap();
            for i in 0..k {
                d.enqueue(format!("job-{i}")).unwrap();
            }
            d.wait_idle().await;
            d.stop().await;

            let mut counts: HashMap<String, usize> = HashMap::new();
            for id in seen.lock().iter() {
                *counts.entry(id.clone()).or_default() += 1;
            }
            assert_eq!(counts.len(), k, "k={k}");
            assert!(counts.values().all(|&c| c == 1), "k={k}");
        }
    }

    #[tokio::test]
    async fn panicking_handler_does_not_kill_worker() {
        let seen: Seen = Arc::default();
        let d = Dispatcher::new();
        let inner = recorder(Arc::clone(&seen));
        d.start(1, move |id: String| {
            let inner = inner.clone();
            async move {
                if id == "bad" {
                    panic!("converter exploded");
                }
                inner(id).await;
            }
        })
        .unwrap();

        d.enqueue("bad").unwrap();
        d.enqueue("good").unwrap();
        d.wait_idle().await;
        assert_eq!(*seen.lock(), vec!["good"]);
        assert_eq!(d.pending(), 0);
        d.stop().await;
    }

    #[tokio::test]
    async fn stop_finishes_in_flight_job_and_skips_the_rest() {
        let seen: Seen = Arc::default();
        let (started_tx, started_rx) = oneshot::channel::<()>();
        let started_tx = Arc::new(Mutex::new(Some(started_tx)));

        let d = Dispatcher::new();
        let seen_h = Arc::clone(&seen);
        d.start(1, move |id: String| {
            let seen = Arc::clone(&seen_h);
            let started_tx = Arc::clone(&started_tx);
            async move {
                if let Some(tx) = started_tx.lock().take() {
                    let _ = tx.send(());
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                seen.lock().push(id);
            }
        })
        .unwrap();

        for i in 0..3 {
            d.enqueue(format!("job-{i}")).unwrap();
        }
        started_rx.await.unwrap();
        d.stop().await;

        assert_eq!(*seen.lock(), vec!["job-0"]);
        assert!(d.is_stopped());
        assert!(matches!(d.enqueue("late"), Err(DocJobError::ShuttingDown)));
        // Returns immediately once stopped even though ids remain.
        d.wait_idle().await;
    }

    #[tokio::test]
    async fn id_already_waiting_is_not_queued_twice() {
        let seen: Seen = Arc::default();
        let d = Dispatcher::new();
        assert!(d.enqueue("job-a").unwrap());
        assert!(!d.enqueue("job-a").unwrap());
        assert!(d.enqueue("job-b").unwrap());
        assert_eq!(d.pending(), 2);

        d.start(2, recorder(Arc::clone(&seen))).unwrap();
        d.wait_idle().await;
        let mut delivered = seen.lock().clone();
        delivered.sort();
        assert_eq!(delivered, vec!["job-a", "job-b"]);

        // Taken ids can be queued again.
        assert!(d.enqueue("job-a").unwrap());
        d.wait_idle().await;
        assert_eq!(seen.lock().len(), 3);
        d.stop().await;
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let d = Dispatcher::new();
        d.start(2, recorder(Arc::default())).unwrap();
        assert!(d.start(1, recorder(Arc::default())).is_err());
        d.stop().await;
        assert!(matches!(
            d.start(1, recorder(Arc::default())),
            Err(DocJobError::ShuttingDown)
        ));
    }

    #[test]
    fn panic_message_handles_both_payload_kinds() {
        let a: Box<dyn Any + Send> = Box::new("static");
        let b: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let c: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(a.as_ref()), "static");
        assert_eq!(panic_message(b.as_ref()), "owned");
        assert_eq!(panic_message(c.as_ref()), "non-string panic payload");
    }
}
