//! Bounded worker pool.
//!
//! A fixed number of threads block on a shared work queue (the
//! [`BoundedQueue`](crate::queue::BoundedQueue), which gives non-blocking-push,
//! blocking-pop semantics), and each thread does nothing but pop one unit of work and
//! call its `process` method. Socket I/O never happens here: only
//! `Connection::process` (parse, dispatch, response assembly) runs on these threads;
//! `read()`/`write()` stay on the single reactor loop.
//!
//! A connection is handed back to the reactor two ways: a simple interest change (rearm
//! readable or writable) is applied directly with a cloned [`Registry`], since
//! `epoll_ctl` is thread-safe; closing a connection is not, since it also touches the
//! reactor-owned timer list and connection slab, so it's routed back over `close_tx` and
//! the reactor is woken through the shared [`Waker`].

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use mio::{Interest, Registry, Token, Waker};

use crate::accounts::Accounts;
use crate::connection::{Connection, PostProcess};
use crate::logger::Logger;
use crate::queue::BoundedQueue;

/// One unit of work handed from the reactor to a worker thread.
#[derive(Clone)]
pub enum WorkItem {
    Process { token: Token, conn: Arc<Mutex<Connection>> },
    /// Poison pill: sent to each worker exactly once at shutdown so every thread wakes
    /// from its blocking `pop` and exits, rather than relying on a stop flag that a
    /// blocked worker has no way to observe.
    Shutdown,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `thread_count` worker threads pulling from `queue`.
    pub fn spawn(
        thread_count: u32,
        queue: BoundedQueue<WorkItem>,
        registry: Registry,
        close_tx: Sender<Token>,
        waker: Arc<Waker>,
        accounts: Arc<Accounts>,
        doc_root: Arc<PathBuf>,
        logger: Logger,
    ) -> std::io::Result<Self> {
        let mut handles = Vec::with_capacity(thread_count as usize);
        for id in 0..thread_count {
            let queue = queue.clone();
            let registry = registry.try_clone()?;
            let close_tx = close_tx.clone();
            let waker = Arc::clone(&waker);
            let accounts = Arc::clone(&accounts);
            let doc_root = Arc::clone(&doc_root);
            let logger = logger.clone();
            let handle = thread::Builder::new()
                .name(format!("holt-worker-{id}"))
                .spawn(move || worker_loop(queue, registry, close_tx, waker, accounts, doc_root, logger))?;
            handles.push(handle);
        }
        Ok(WorkerPool { handles })
    }

    /// Blocks until every worker thread has exited. Only returns once `Shutdown` has been
    /// broadcast on the queue this pool was spawned with.
    pub fn join(self) {
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    queue: BoundedQueue<WorkItem>,
    registry: Registry,
    close_tx: Sender<Token>,
    waker: Arc<Waker>,
    accounts: Arc<Accounts>,
    doc_root: Arc<PathBuf>,
    logger: Logger,
) {
    while let Some(item) = queue.pop() {
        let (token, conn) = match item {
            WorkItem::Process { token, conn } => (token, conn),
            WorkItem::Shutdown => break,
        };

        let outcome = {
            let mut guard = conn.lock().unwrap();
            guard.process(&accounts, &doc_root, &logger)
        };

        match outcome {
            PostProcess::NeedMoreData => {
                let mut guard = conn.lock().unwrap();
                if let Err(e) = guard.register(&registry, Interest::READABLE) {
                    logger.warn(format!("failed to rearm token {token:?} for read: {e}"));
                }
            }
            PostProcess::ReadyToWrite => {
                let mut guard = conn.lock().unwrap();
                if let Err(e) = guard.register(&registry, Interest::WRITABLE) {
                    logger.warn(format!("failed to rearm token {token:?} for write: {e}"));
                }
            }
            PostProcess::Close => {
                let _ = close_tx.send(token);
                if let Err(e) = waker.wake() {
                    logger.warn(format!("failed to wake reactor for close of {token:?}: {e}"));
                }
            }
        }
    }
}
