//! Pipeline Engine
//!
//! Chains of stages that move values from a source to a terminal stage.
//!
//! - [`Stream`]: any number of values, fed by a [`Trigger`] or a channel.
//! - [`Single`]: at most one value, fed by a [`Resolver`].
//! - [`Stream::async_map`] / `then`: per-value nested sources under an
//!   [`AsyncPolicy`], each with its own [`Execution`] context.
//! - [`merge`], [`combine`], [`when_all_destroyed`]: fan-in.
//!
//! # How It Works
//!
//! Each operator links a new stage behind the current one and returns it.
//! The upstream stage becomes an owned child of the new stage, so attaching
//! the tail keeps the chain alive and destroying any stage destroys the lot.
//! A stage can be linked once; a stage the user attached is a tail and can no
//! longer be extended.

mod async_map;
mod combinators;
mod execution;
mod single;
mod source;
mod stage;
mod stream;

pub use async_map::AsyncPolicy;
pub use combinators::{combine, merge, when_all_destroyed};
pub use execution::Execution;
pub use single::{Resolver, Single};
pub use source::Source;
pub use stream::{Stream, Trigger};
