//! Player sessions and delivery of field events to them

pub mod notifier;
pub mod session;

pub use notifier::{SessionNotifier, SessionNotifierFactory};
pub use session::{DeliveryError, OutboundEvent, SessionDirectory, SessionHandle};
