//! Attachment Lifecycle
//!
//! Every long-lived object in Tether lives somewhere in a single ownership
//! tree. A node is created unattached, is attached exactly once (to a parent
//! or to the implicit root), and is destroyed exactly once. Destroying a node
//! destroys its whole subtree synchronously.
//!
//! # Rules
//!
//! - A node can be attached once. Attaching it again, attaching it to itself
//!   or to one of its descendants is an error.
//! - Attaching under an already destroyed parent destroys the node at once.
//! - A node that is neither attached nor destroyed by the next
//!   [`Runtime::tick`] is reported as a leak.

mod config;
mod node;
mod runtime;
mod slots;

pub use config::{AttachCheck, RuntimeConfig};
pub use node::{Attachable, Node, NodeId};
pub use runtime::Runtime;
pub(crate) use slots::OrderedSlots;
