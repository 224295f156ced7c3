//! Broadcast Primitives
//!
//! The multicast building blocks the pipeline engine consumes and produces:
//!
//! - [`Registry`]: ordered callback slots with fault-isolated notification.
//! - [`Channel`]: fire-and-forget broadcast.
//! - [`ReplayChannel`]: broadcast that replays the last value.
//! - [`Aggregator`] / [`Effect`]: many contributions, one aggregate.

mod aggregator;
mod channel;
mod registry;

pub use aggregator::{Aggregator, Effect};
pub use channel::{Channel, ReplayChannel};
pub use registry::{ListenerId, Registry, Subscription};
