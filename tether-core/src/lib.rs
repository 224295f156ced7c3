//! Tether Core
//!
//! Lifecycle-managed reactive pipelines for single-threaded, event-driven
//! programs. It provides:
//!
//! - An attachment tree that owns every long-lived object and tears subtrees
//!   down synchronously
//! - Broadcast primitives (channels, replay channels, aggregators)
//! - Chainable value pipelines with buffering, completion and asynchronous
//!   mapping policies
//!
//! # Architecture
//!
//! - `lifecycle`: nodes, the implicit root, the hygiene check and runtime
//!   configuration
//! - `broadcast`: callback registries and the channels built on them
//! - `pipeline`: streams, singles and their combinators
//! - `error`: the [`LifecycleError`] taxonomy
//!
//! # Example
//!
//! ```rust
//! use tether_core::{Node, Stream};
//!
//! let scope = Node::new();
//! scope.attach_to_root().unwrap();
//!
//! let (trigger, stream) = Stream::channel();
//! stream
//!     .map(|n: i32| n * 2)
//!     .unwrap()
//!     .read(|n| println!("doubled: {n}"))
//!     .unwrap()
//!     .attach(&scope)
//!     .unwrap();
//!
//! trigger.emit(21);
//!
//! // Tears down the pipeline and everything it owns.
//! scope.destroy();
//! assert!(trigger.is_closed());
//! ```

pub mod broadcast;
pub mod error;
pub mod lifecycle;
pub mod pipeline;

pub use broadcast::{Aggregator, Channel, Effect, ReplayChannel, Subscription};
pub use error::{LifecycleError, Result};
pub use lifecycle::{AttachCheck, Attachable, Node, NodeId, Runtime, RuntimeConfig};
pub use pipeline::{
    combine, merge, when_all_destroyed, AsyncPolicy, Execution, Resolver, Single, Source, Stream,
    Trigger,
};
