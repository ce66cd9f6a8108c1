//! Single-writer field actor
//!
//! Each [`FieldWorker`] owns one [`Field`] on a dedicated OS thread. Other
//! threads only ever [`push`](FieldWorker::push) messages into its bounded
//! queue; the thread applies them one at a time, in order.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::message::FieldMessage;
use crate::field::{Field, FieldId};
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Created,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PushError {
    #[error("field queue is full")]
    Full,
    #[error("field worker is stopped")]
    Stopped,
}

enum Mail {
    Message(FieldMessage),
    Shutdown,
}

struct Lifecycle {
    state: WorkerState,
    /// Held until `start` hands it to the thread
    field: Option<Field>,
    handle: Option<JoinHandle<()>>,
}

pub struct FieldWorker {
    id: FieldId,
    sender: Sender<Mail>,
    receiver: Receiver<Mail>,
    /// Held shared by `push` across its send, so closing waits for in-flight pushes
    closed: RwLock<bool>,
    lifecycle: Mutex<Lifecycle>,
    metrics: Arc<Metrics>,
}

impl FieldWorker {
    pub fn new(field: Field, capacity: usize, metrics: Arc<Metrics>) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            id: field.id(),
            sender,
            receiver,
            closed: RwLock::new(false),
            lifecycle: Mutex::new(Lifecycle {
                state: WorkerState::Created,
                field: Some(field),
                handle: None,
            }),
            metrics,
        }
    }

    /// Spawn the field thread. Only the first call on a fresh worker does anything.
    pub fn start(&self) {
        let mut life = self.lifecycle.lock();
        if life.state != WorkerState::Created {
            return;
        }
        let Some(field) = life.field.take() else {
            return;
        };

        let id = self.id;
        let receiver = self.receiver.clone();
        let metrics = self.metrics.clone();
        let spawned = thread::Builder::new()
            .name(format!("field-{}", id))
            .spawn(move || run_loop(id, field, receiver, metrics));

        match spawned {
            Ok(handle) => {
                life.handle = Some(handle);
                life.state = WorkerState::Running;
                self.metrics.fields_active.fetch_add(1, Ordering::Relaxed);
                info!(field_id = id, "Field worker started");
            }
            Err(e) => {
                life.state = WorkerState::Stopped;
                *self.closed.write() = true;
                error!(field_id = id, "Failed to spawn field thread: {}", e);
            }
        }
    }

    /// Stop accepting messages, let the thread drain what is already queued,
    /// then join it.
    pub fn stop(&self) {
        let handle = {
            let mut life = self.lifecycle.lock();
            match life.state {
                WorkerState::Stopping | WorkerState::Stopped => return,
                WorkerState::Created => {
                    life.state = WorkerState::Stopped;
                    life.field = None;
                    *self.closed.write() = true;
                    return;
                }
                WorkerState::Running => {}
            }
            life.state = WorkerState::Stopping;
            *self.closed.write() = true;
            life.handle.take()
        };

        let on_own_thread = handle
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id());

        if on_own_thread {
            // Blocking here would wait on ourselves
            if self.sender.try_send(Mail::Shutdown).is_err() {
                warn!(field_id = self.id, "Queue full while stopping from inside the field");
            }
        } else {
            // Behind every message accepted so far
            let _ = self.sender.send(Mail::Shutdown);
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    error!(field_id = self.id, "Field thread terminated abnormally");
                }
            }
        }

        self.lifecycle.lock().state = WorkerState::Stopped;
        self.metrics.fields_active.fetch_sub(1, Ordering::Relaxed);
        info!(field_id = self.id, "Field worker stopped");
    }

    /// Enqueue a message without blocking
    pub fn push(&self, msg: FieldMessage) -> Result<(), PushError> {
        let closed = self.closed.read();
        if *closed {
            self.metrics.messages_rejected.fetch_add(1, Ordering::Relaxed);
            return Err(PushError::Stopped);
        }
        match self.sender.try_send(Mail::Message(msg)) {
            Ok(()) => {
                self.metrics.messages_pushed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.messages_rejected.fetch_add(1, Ordering::Relaxed);
                Err(PushError::Full)
            }
            Err(TrySendError::Disconnected(_)) => Err(PushError::Stopped),
        }
    }

    #[inline]
    pub fn field_id(&self) -> FieldId {
        self.id
    }

    /// Messages waiting in the queue
    #[inline]
    pub fn pending(&self) -> usize {
        self.sender.len()
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.lock().state
    }
}

impl Drop for FieldWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(id: FieldId, mut field: Field, receiver: Receiver<Mail>, metrics: Arc<Metrics>) {
    debug!(field_id = id, "Field loop running");

    while let Ok(mail) = receiver.recv() {
        let msg = match mail {
            Mail::Message(msg) => msg,
            Mail::Shutdown => break,
        };
        let kind = msg.kind();

        let result = catch_unwind(AssertUnwindSafe(|| field.handle_message(msg)));
        metrics.messages_processed.fetch_add(1, Ordering::Relaxed);
        if let Err(panic) = result {
            metrics.handler_panics.fetch_add(1, Ordering::Relaxed);
            error!(field_id = id, "Handler for {} panicked: {}", kind, panic_message(&*panic));
        }
    }

    debug!(field_id = id, "Field loop exited");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FieldConfig;
    use crate::field::NullNotifier;

    fn worker(capacity: usize) -> (FieldWorker, Arc<Metrics>) {
        let metrics = Arc::new(Metrics::new());
        let field = Field::new(7, FieldConfig::default(), Box::new(NullNotifier), metrics.clone());
        (FieldWorker::new(field, capacity, metrics.clone()), metrics)
    }

    fn record(log: &Arc<Mutex<Vec<u32>>>, value: u32) -> FieldMessage {
        let log = log.clone();
        FieldMessage::exec(move |_| log.lock().push(value))
    }

    #[test]
    fn test_messages_processed_in_order() {
        let (worker, metrics) = worker(256);
        let log = Arc::new(Mutex::new(Vec::new()));

        // Queued before start, then while running
        for i in 0..50 {
            worker.push(record(&log, i)).unwrap();
        }
        worker.start();
        for i in 50..100 {
            worker.push(record(&log, i)).unwrap();
        }
        worker.stop();

        assert_eq!(*log.lock(), (0..100).collect::<Vec<_>>());
        assert_eq!(metrics.messages_processed.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_order_follows_handoff_between_producers() {
        let (worker, _) = worker(256);
        let worker = Arc::new(worker);
        let log = Arc::new(Mutex::new(Vec::new()));
        worker.start();

        let (handoff_tx, handoff_rx) = crossbeam_channel::bounded::<()>(1);
        let first = {
            let (worker, log) = (worker.clone(), log.clone());
            thread::spawn(move || {
                for i in 0..50 {
                    worker.push(record(&log, i)).unwrap();
                }
                handoff_tx.send(()).unwrap();
            })
        };
        let second = {
            let (worker, log) = (worker.clone(), log.clone());
            thread::spawn(move || {
                handoff_rx.recv().unwrap();
                for i in 50..100 {
                    worker.push(record(&log, i)).unwrap();
                }
            })
        };
        first.join().unwrap();
        second.join().unwrap();
        worker.stop();

        assert_eq!(*log.lock(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_accepted_messages_survive_concurrent_stop() {
        let (worker, metrics) = worker(1024);
        let worker = Arc::new(worker);
        worker.start();

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let worker = worker.clone();
                thread::spawn(move || {
                    let mut accepted = 0u64;
                    loop {
                        match worker.push(FieldMessage::exec(|_| {})) {
                            Ok(()) => accepted += 1,
                            Err(PushError::Full) => thread::yield_now(),
                            Err(PushError::Stopped) => return accepted,
                        }
                    }
                })
            })
            .collect();

        while metrics.messages_pushed.load(Ordering::Relaxed) < 1000 {
            thread::yield_now();
        }
        worker.stop();

        let accepted: u64 = producers.into_iter().map(|p| p.join().unwrap()).sum();
        assert_eq!(metrics.messages_processed.load(Ordering::Relaxed), accepted);
        assert_eq!(metrics.messages_pushed.load(Ordering::Relaxed), accepted);
    }

    #[test]
    fn test_panic_in_handler_is_contained() {
        let (worker, metrics) = worker(16);
        let log = Arc::new(Mutex::new(Vec::new()));
        worker.start();

        worker.push(FieldMessage::exec(|_| panic!("boom"))).unwrap();
        worker.push(record(&log, 1)).unwrap();
        worker.stop();

        assert_eq!(*log.lock(), vec![1]);
        assert_eq!(metrics.handler_panics.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_lifecycle_is_idempotent() {
        let (worker, metrics) = worker(16);
        assert_eq!(worker.state(), WorkerState::Created);

        worker.start();
        worker.start();
        assert_eq!(worker.state(), WorkerState::Running);
        assert_eq!(metrics.fields_active.load(Ordering::Relaxed), 1);

        worker.stop();
        worker.stop();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(metrics.fields_active.load(Ordering::Relaxed), 0);

        worker.start();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn test_stop_without_start() {
        let (worker, _) = worker(16);
        worker.stop();
        assert_eq!(worker.state(), WorkerState::Stopped);
        assert_eq!(worker.push(FieldMessage::Tick { dt: 0.05 }), Err(PushError::Stopped));
    }

    #[test]
    fn test_full_queue_rejects() {
        let (worker, metrics) = worker(2);
        worker.push(FieldMessage::Tick { dt: 0.05 }).unwrap();
        worker.push(FieldMessage::Tick { dt: 0.05 }).unwrap();

        assert_eq!(worker.push(FieldMessage::Tick { dt: 0.05 }), Err(PushError::Full));
        assert_eq!(worker.pending(), 2);
        assert_eq!(metrics.messages_rejected.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_push_after_stop_rejected() {
        let (worker, _) = worker(16);
        worker.start();
        worker.stop();
        assert_eq!(worker.push(FieldMessage::SetViewRadius { radius: 3 }), Err(PushError::Stopped));
    }

    #[test]
    fn test_stop_from_own_thread() {
        let (worker, _) = worker(16);
        let worker = Arc::new(worker);
        worker.start();

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let inner = worker.clone();
        worker
            .push(FieldMessage::exec(move |_| {
                inner.stop();
                let _ = done_tx.send(inner.state());
            }))
            .unwrap();

        let state = done_rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(state, WorkerState::Stopped);
        assert_eq!(worker.push(FieldMessage::Tick { dt: 0.05 }), Err(PushError::Stopped));
    }
}
