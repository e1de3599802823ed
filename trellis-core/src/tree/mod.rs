//! Virtual Tree
//!
//! The vnode data model, the creation API tree producers target, and the
//! reconciler that turns tree differences into minimal host mutations.

pub mod create;
pub mod patch;
pub mod vnode;

pub use create::{
    access, branch, create_view, dynamic, fragment, sequence_children, with_directives, BranchArm,
    ViewChild, ViewType,
};
pub use patch::Reconciler;
pub use vnode::{parent_of, Directive, Key, NodeKind, NodePhase, VNode, VNodeId, WeakVNode};
