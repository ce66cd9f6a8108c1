//! Tick drivers
//!
//! A fixed pool of threads wakes every `period` and queues a
//! [`FieldMessage::Tick`] into each field it owns (`field_id % threads`).
//! Drivers never touch field state themselves.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use super::message::FieldMessage;
use super::registry::FieldRegistry;

struct Drivers {
    /// Dropping this wakes every driver for shutdown
    shutdown: Sender<()>,
    handles: Vec<JoinHandle<()>>,
}

pub struct TickScheduler {
    registry: Arc<FieldRegistry>,
    threads: usize,
    period: Duration,
    drivers: Mutex<Option<Drivers>>,
}

impl TickScheduler {
    pub fn new(registry: Arc<FieldRegistry>, threads: usize, period: Duration) -> Self {
        Self {
            registry,
            threads: threads.max(1),
            period,
            drivers: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut drivers = self.drivers.lock();
        if drivers.is_some() {
            return;
        }

        let (shutdown, shutdown_rx) = bounded::<()>(0);
        let mut handles = Vec::with_capacity(self.threads);
        for index in 0..self.threads {
            let registry = self.registry.clone();
            let shutdown_rx = shutdown_rx.clone();
            let (threads, period) = (self.threads, self.period);
            let spawned = thread::Builder::new()
                .name(format!("tick-{}", index))
                .spawn(move || drive(index, threads, period, registry, shutdown_rx));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => error!(driver = index, "Failed to spawn tick driver: {}", e),
            }
        }

        info!(
            threads = handles.len(),
            period_ms = self.period.as_millis() as u64,
            "Tick scheduler started"
        );
        *drivers = Some(Drivers { shutdown, handles });
    }

    /// Signal every driver and wait for it to exit
    pub fn stop(&self) {
        let Some(Drivers { shutdown, handles }) = self.drivers.lock().take() else {
            return;
        };
        drop(shutdown);
        for handle in handles {
            if handle.join().is_err() {
                error!("Tick driver terminated abnormally");
            }
        }
        info!("Tick scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.drivers.lock().is_some()
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drive(index: usize, threads: usize, period: Duration, registry: Arc<FieldRegistry>, shutdown: Receiver<()>) {
    let ticker = tick(period);
    let mut last = Instant::now();

    loop {
        select! {
            recv(shutdown) -> _ => break,
            recv(ticker) -> _ => {
                let now = Instant::now();
                let dt = now.duration_since(last).as_secs_f32();
                last = now;

                registry.for_each(|worker| {
                    if worker.field_id() as usize % threads != index {
                        return;
                    }
                    if let Err(e) = worker.push(FieldMessage::Tick { dt }) {
                        debug!(field_id = worker.field_id(), "Tick dropped: {}", e);
                    }
                });
            }
        }
    }

    debug!(driver = index, "Tick driver exited");
}
