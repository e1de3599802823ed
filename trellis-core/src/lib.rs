//! Trellis Core
//!
//! A client-side reactive UI engine: fine-grained dependency tracking
//! decides *when* to re-render, and keyed tree reconciliation with
//! longest-increasing-subsequence move minimization decides *how* to apply
//! a re-render with minimal host mutation.
//!
//! # Layers
//!
//! - [`reactive`]: trackers, value cells, reactive aggregates, derived
//!   values, the observer registry, scopes, and the cooperative scheduler.
//! - [`tree`]: the vnode model, the creation API, and the reconciler.
//! - [`widget`]: the lifecycle controller driving mount, update,
//!   activate/deactivate and unmount, plus render-error routing.
//! - [`host`]: the adapter interface the engine mutates output through,
//!   with an in-memory implementation for headless use.
//!
//! # Execution model
//!
//! Single-threaded and cooperative. Mutations coalesce into batched
//! notifications delivered at [`reactive::scheduler::flush`]; widget
//! re-renders park on the render-frame queue until
//! [`reactive::scheduler::run_frame`]. [`reactive::scheduler::settle`]
//! alternates the two until idle.
//!
//! ```
//! use std::sync::Arc;
//! use trellis_core::host::{HostAdapter, MemoryHost};
//! use trellis_core::reactive::{scheduler, Value, ValueCell};
//! use trellis_core::tree::{Reconciler, VNode};
//! use trellis_core::widget::WidgetDef;
//!
//! let host = Arc::new(MemoryHost::new());
//! let count = ValueCell::new(Value::from(0));
//!
//! let cell = count.clone();
//! let counter = WidgetDef::builder("counter", move |_props| {
//!     Ok(VNode::text(&cell.get().to_string()))
//! })
//! .build();
//!
//! let node = VNode::widget(counter, Default::default(), None);
//! let reconciler = Reconciler::new(host.clone() as Arc<dyn HostAdapter>);
//! reconciler.mount(&node, host.root(), None).unwrap();
//! assert_eq!(host.render_to_string(host.root()), "<root>0</root>");
//!
//! count.set(Value::from(1));
//! scheduler::settle();
//! assert_eq!(host.render_to_string(host.root()), "<root>1</root>");
//! ```

pub mod error;
pub mod host;
pub mod reactive;
pub mod tree;
pub mod widget;

pub use error::{ErrorInfo, RenderError, TreeError};
pub use host::{HostAdapter, HostNode, MemoryHost};
pub use reactive::{
    collect, DerivedValue, Listener, ObjectId, PropKey, ReactiveObject, Scope, Value, ValueCell,
};
pub use tree::{Key, NodeKind, Reconciler, VNode};
pub use widget::{Widget, WidgetDef, WidgetPhase};
