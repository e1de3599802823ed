//! Widget Lifecycle
//!
//! Widget definitions, live instances, and render-error routing.

pub mod error;
pub mod lifecycle;

pub use error::{clear_root_error_hook, set_root_error_hook, ErrorHook};
pub use lifecycle::{UnmountGate, Widget, WidgetDef, WidgetDefBuilder, WidgetPhase};
