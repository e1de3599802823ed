//! Fine-Grained Reactivity
//!
//! The reactive core: dependency tracking, change notification, and the
//! cooperative scheduler that batches delivery.
//!
//! # Architecture
//!
//! - [`tracker`] records which `(object, key)` pairs a function reads.
//! - [`observer`] maps `(object, key)` to listener sets and dispatches
//!   change announcements.
//! - [`scheduler`] coalesces batched notifications and re-render work into
//!   explicit drain points (`flush`, `run_frame`, `settle`).
//! - [`object`] and [`cell`] are the reactive data holders; [`derived`]
//!   computes values from them with automatic resubscription.
//! - [`scope`] owns effects and tears them down with their widget.
//!
//! Execution is single-threaded and cooperative; thread-local state carries
//! the ambient tracking and scope context.

pub mod cell;
pub mod derived;
pub mod listener;
pub mod object;
pub mod observer;
pub mod scheduler;
pub mod scope;
pub mod tracker;
pub mod value;

pub use cell::ValueCell;
pub use derived::DerivedValue;
pub use listener::{Listener, ListenerId};
pub use object::{AggregateKind, ReactiveObject};
pub use observer::{Delivery, Subscription};
pub use scheduler::Deferred;
pub use scope::{AmbientSnapshot, OwnedEffect, Scope};
pub use tracker::{collect, DependencyMap};
pub use value::{ObjectId, PropKey, Value};
