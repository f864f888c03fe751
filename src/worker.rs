//! I/O worker threads and the fixed pool that shards connections across
//! them.
//!
//! Each worker owns one reactor and one dedicated thread running its event
//! loop. Handing a connection to a worker is the single cross-thread
//! operation of a connection's life: the accepted pieces travel over the
//! worker's channel, the worker's waker is nudged, and the worker installs
//! the connection on its own reactor. Every callback after that runs on the
//! owning worker's thread.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

use log::{debug, error};
use mio::Waker;

use crate::connection::{self, AcceptedConn};
use crate::error::{Error, Result};
use crate::reactor::{Reactor, ShutdownHandle};

pub(crate) struct IoWorker {
    id: usize,
    tx: mpsc::Sender<AcceptedConn>,
    waker: Arc<Waker>,
    stop: ShutdownHandle,
    thread: Option<JoinHandle<()>>,
}

impl IoWorker {
    /// Spawns the worker thread and waits for its reactor to come up.
    pub(crate) fn spawn(id: usize, buffer_size: usize) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<AcceptedConn>();
        let (ready_tx, ready_rx) = mpsc::channel();

        let thread = Builder::new()
            .name(format!("io-worker-{id}"))
            .spawn(move || {
                let mut reactor = match Reactor::new() {
                    Ok(reactor) => reactor,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok((reactor.shutdown_handle(), reactor.waker())));

                let outcome = reactor.run_with(|handle| {
                    // The acceptor nudged the waker: drain the inbox and pin
                    // each new connection to this reactor.
                    while let Ok(accepted) = rx.try_recv() {
                        let peer = accepted.peer;
                        if let Err(e) = connection::install(handle, accepted, buffer_size) {
                            error!("io-worker-{id}: failed to install {peer}: {e}");
                        }
                    }
                });
                if let Err(e) = outcome {
                    error!("io-worker-{id} exited with error: {e}");
                }
            })
            .map_err(Error::Io)?;

        let (stop, waker) = ready_rx.recv().map_err(|_| Error::WorkerGone)??;

        Ok(IoWorker {
            id,
            tx,
            waker,
            stop,
            thread: Some(thread),
        })
    }

    /// Queues a connection for this worker and wakes its loop.
    pub(crate) fn assign(&self, accepted: AcceptedConn) -> Result<()> {
        self.tx.send(accepted).map_err(|_| Error::WorkerGone)?;
        self.waker.wake()?;
        Ok(())
    }

    pub(crate) fn stop(&self) {
        self.stop.shutdown();
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        self.stop.shutdown();
        if let Some(thread) = self.thread.take() {
            debug!("joining io-worker-{}", self.id);
            let _ = thread.join();
        }
    }
}

/// Deterministic worker slot for a descriptor: `fd mod pool_size`, computed
/// once at accept time and stable for the connection's lifetime.
pub(crate) fn shard_index(fd: i32, pool_size: usize) -> usize {
    fd as usize % pool_size
}

/// Fixed set of workers, created eagerly at startup.
pub(crate) struct IoWorkerPool {
    workers: Vec<IoWorker>,
}

impl IoWorkerPool {
    pub(crate) fn spawn(count: usize, buffer_size: usize) -> Result<Self> {
        let mut workers = Vec::with_capacity(count);
        for id in 0..count {
            workers.push(IoWorker::spawn(id, buffer_size)?);
        }
        Ok(IoWorkerPool { workers })
    }

    pub(crate) fn assign(&self, fd: i32, accepted: AcceptedConn) -> Result<()> {
        let worker = &self.workers[shard_index(fd, self.workers.len())];
        worker.assign(accepted)
    }

    /// Stops every worker's reactor; threads are joined on drop.
    pub(crate) fn stop(&self) {
        for worker in &self.workers {
            worker.stop();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.workers.len()
    }
}
