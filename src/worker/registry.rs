//! Field id -> running worker
//!
//! One registry is built at startup and shared as `Arc<FieldRegistry>` by
//! the network side, the tick scheduler and the queue monitor.

use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;
use tracing::{debug, info};

use super::actor::FieldWorker;
use super::message::FieldMessage;
use crate::config::FieldConfig;
use crate::field::npc::SpawnGrid;
use crate::field::{Field, FieldId, Notifier, NullNotifier};
use crate::metrics::Metrics;

/// Builds the downstream notifier of each new field
pub trait NotifierFactory: Send + Sync {
    fn create(&self, field_id: FieldId) -> Box<dyn Notifier>;
}

/// Fields whose events go nowhere
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifierFactory;

impl NotifierFactory for NullNotifierFactory {
    fn create(&self, _field_id: FieldId) -> Box<dyn Notifier> {
        Box::new(NullNotifier)
    }
}

pub struct FieldRegistry {
    workers: Mutex<HashMap<FieldId, Arc<FieldWorker>, FxBuildHasher>>,
    config: FieldConfig,
    npc_field_id: FieldId,
    factory: Arc<dyn NotifierFactory>,
    metrics: Arc<Metrics>,
}

impl FieldRegistry {
    pub fn new(
        config: FieldConfig,
        npc_field_id: FieldId,
        factory: Arc<dyn NotifierFactory>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            workers: Mutex::new(HashMap::default()),
            config,
            npc_field_id,
            factory,
            metrics,
        }
    }

    /// Return the worker for `id`, creating and starting it on first use
    pub fn get_or_create(&self, id: FieldId) -> Arc<FieldWorker> {
        let mut workers = self.workers.lock();
        if let Some(worker) = workers.get(&id) {
            return worker.clone();
        }

        let mut field = Field::new(id, self.config.clone(), self.factory.create(id), self.metrics.clone());
        if id == self.npc_field_id {
            field.spawn_npc_grid(&SpawnGrid::default());
        }

        let worker = Arc::new(FieldWorker::new(field, self.config.queue_capacity, self.metrics.clone()));
        worker.start();
        workers.insert(id, worker.clone());
        info!(field_id = id, "Field created");
        worker
    }

    pub fn get(&self, id: FieldId) -> Option<Arc<FieldWorker>> {
        self.workers.lock().get(&id).cloned()
    }

    /// Best-effort delivery to a field. False if the field is unknown or its
    /// queue rejected the message.
    pub fn route(&self, id: FieldId, msg: FieldMessage) -> bool {
        let kind = msg.kind();
        let Some(worker) = self.get(id) else {
            debug!(field_id = id, kind, "Route to unknown field");
            return false;
        };
        match worker.push(msg) {
            Ok(()) => true,
            Err(e) => {
                debug!(field_id = id, kind, "Route rejected: {}", e);
                false
            }
        }
    }

    /// Visit every worker. The set is snapshotted first, so `f` may call back
    /// into the registry.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<FieldWorker>)) {
        let snapshot: Vec<Arc<FieldWorker>> = self.workers.lock().values().cloned().collect();
        for worker in &snapshot {
            f(worker);
        }
    }

    /// Remove every worker, then stop each one outside the lock
    pub fn stop_all(&self) {
        let drained: Vec<Arc<FieldWorker>> = self.workers.lock().drain().map(|(_, w)| w).collect();
        let count = drained.len();
        for worker in drained {
            worker.stop();
        }
        info!(count, "All fields stopped");
    }

    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.lock().is_empty()
    }

    /// Sorted ids of the live fields
    pub fn field_ids(&self) -> Vec<FieldId> {
        let mut ids: Vec<FieldId> = self.workers.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
