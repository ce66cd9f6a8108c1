//! Field actors, their registry and the tick drivers

pub mod actor;
pub mod codec;
pub mod message;
pub mod registry;
pub mod scheduler;

pub use actor::{FieldWorker, PushError, WorkerState};
pub use message::{FieldJob, FieldMessage};
pub use registry::{FieldRegistry, NotifierFactory, NullNotifierFactory};
pub use scheduler::TickScheduler;
