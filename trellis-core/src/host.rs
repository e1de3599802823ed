//! Host Adapter
//!
//! The core never mutates real output directly; every mutation goes through
//! a [`HostAdapter`]. Handles are opaque `u64` values owned by the adapter.
//!
//! [`MemoryHost`] is a complete in-memory adapter used for headless
//! rendering and tests. It keeps an operation log so tests can assert that
//! a patch performed exactly the mutations it should have.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Opaque handle to one node in the host output.
pub type HostNode = u64;

/// The mutation surface the reconciler and lifecycle controller depend on.
pub trait HostAdapter: Send + Sync {
    fn create_element(&self, tag: &str) -> HostNode;
    fn create_text(&self, text: &str) -> HostNode;
    fn create_comment(&self, text: &str) -> HostNode;

    fn append_child(&self, parent: HostNode, child: HostNode);
    fn insert_before(&self, parent: HostNode, child: HostNode, anchor: HostNode);
    fn replace(&self, old: HostNode, new: HostNode);
    fn remove(&self, node: HostNode);

    fn set_attribute(&self, node: HostNode, name: &str, value: &str);
    fn remove_attribute(&self, node: HostNode, name: &str);
    fn set_text(&self, node: HostNode, text: &str);

    fn get_parent_element(&self, node: HostNode) -> Option<HostNode>;
}

/// One logged host mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    CreateElement { node: HostNode, tag: String },
    CreateText { node: HostNode, text: String },
    CreateComment { node: HostNode, text: String },
    Append { parent: HostNode, child: HostNode },
    InsertBefore { parent: HostNode, child: HostNode, anchor: HostNode },
    Replace { old: HostNode, new: HostNode },
    Remove { node: HostNode },
    SetAttribute { node: HostNode, name: String, value: String },
    RemoveAttribute { node: HostNode, name: String },
    SetText { node: HostNode, text: String },
}

impl HostOp {
    /// Whether this operation moved or inserted a node.
    pub fn is_insertion(&self) -> bool {
        matches!(self, HostOp::Append { .. } | HostOp::InsertBefore { .. })
    }
}

enum NodeKind {
    Element {
        tag: String,
        attrs: IndexMap<String, String>,
    },
    Text(String),
    Comment(String),
}

struct Node {
    kind: NodeKind,
    parent: Option<HostNode>,
    children: Vec<HostNode>,
}

#[derive(Default)]
struct HostState {
    nodes: IndexMap<HostNode, Node>,
    ops: Vec<HostOp>,
}

/// In-memory host for headless rendering and tests.
///
/// A root element (handle via [`MemoryHost::root`]) exists from creation.
pub struct MemoryHost {
    state: Mutex<HostState>,
    next: AtomicU64,
    root: HostNode,
}

impl MemoryHost {
    pub fn new() -> Self {
        let host = Self {
            state: Mutex::new(HostState::default()),
            next: AtomicU64::new(1),
            root: 0,
        };
        host.state.lock().nodes.insert(
            0,
            Node {
                kind: NodeKind::Element {
                    tag: "root".to_string(),
                    attrs: IndexMap::new(),
                },
                parent: None,
                children: Vec::new(),
            },
        );
        host
    }

    pub fn root(&self) -> HostNode {
        self.root
    }

    fn alloc(&self, kind: NodeKind) -> HostNode {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        self.state.lock().nodes.insert(
            id,
            Node {
                kind,
                parent: None,
                children: Vec::new(),
            },
        );
        id
    }

    fn detach(state: &mut HostState, node: HostNode) {
        let parent = state.nodes.get(&node).and_then(|n| n.parent);
        if let Some(parent) = parent {
            if let Some(parent_node) = state.nodes.get_mut(&parent) {
                parent_node.children.retain(|c| *c != node);
            }
        }
        if let Some(n) = state.nodes.get_mut(&node) {
            n.parent = None;
        }
    }

    /// Every operation performed so far, in order.
    pub fn ops(&self) -> Vec<HostOp> {
        self.state.lock().ops.clone()
    }

    /// Forget the log (typically after an initial mount, before the patch
    /// under test).
    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    /// Child handles of a node, in order.
    pub fn children_of(&self, node: HostNode) -> Vec<HostNode> {
        self.state
            .lock()
            .nodes
            .get(&node)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    /// Text content of a text or comment node.
    pub fn text_of(&self, node: HostNode) -> Option<String> {
        match self.state.lock().nodes.get(&node).map(|n| &n.kind) {
            Some(NodeKind::Text(text)) | Some(NodeKind::Comment(text)) => Some(text.clone()),
            _ => None,
        }
    }

    /// Attribute value on an element.
    pub fn attr(&self, node: HostNode, name: &str) -> Option<String> {
        match self.state.lock().nodes.get(&node).map(|n| &n.kind) {
            Some(NodeKind::Element { attrs, .. }) => attrs.get(name).cloned(),
            _ => None,
        }
    }

    /// Serialize the subtree under `node` as markup.
    pub fn render_to_string(&self, node: HostNode) -> String {
        let state = self.state.lock();
        let mut out = String::new();
        Self::write_node(&state, node, &mut out);
        out
    }

    fn write_node(state: &HostState, node: HostNode, out: &mut String) {
        let Some(n) = state.nodes.get(&node) else {
            return;
        };
        match &n.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Comment(text) => {
                let _ = write!(out, "<!--{text}-->");
            }
            NodeKind::Element { tag, attrs } => {
                let _ = write!(out, "<{tag}");
                for (name, value) in attrs {
                    let _ = write!(out, " {name}=\"{value}\"");
                }
                out.push('>');
                for child in &n.children {
                    Self::write_node(state, *child, out);
                }
                let _ = write!(out, "</{tag}>");
            }
        }
    }
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl HostAdapter for MemoryHost {
    fn create_element(&self, tag: &str) -> HostNode {
        let node = self.alloc(NodeKind::Element {
            tag: tag.to_string(),
            attrs: IndexMap::new(),
        });
        self.state.lock().ops.push(HostOp::CreateElement {
            node,
            tag: tag.to_string(),
        });
        node
    }

    fn create_text(&self, text: &str) -> HostNode {
        let node = self.alloc(NodeKind::Text(text.to_string()));
        self.state.lock().ops.push(HostOp::CreateText {
            node,
            text: text.to_string(),
        });
        node
    }

    fn create_comment(&self, text: &str) -> HostNode {
        let node = self.alloc(NodeKind::Comment(text.to_string()));
        self.state.lock().ops.push(HostOp::CreateComment {
            node,
            text: text.to_string(),
        });
        node
    }

    fn append_child(&self, parent: HostNode, child: HostNode) {
        let mut state = self.state.lock();
        Self::detach(&mut state, child);
        if let Some(parent_node) = state.nodes.get_mut(&parent) {
            parent_node.children.push(child);
        }
        if let Some(child_node) = state.nodes.get_mut(&child) {
            child_node.parent = Some(parent);
        }
        state.ops.push(HostOp::Append { parent, child });
    }

    fn insert_before(&self, parent: HostNode, child: HostNode, anchor: HostNode) {
        let mut state = self.state.lock();
        Self::detach(&mut state, child);
        let position = state
            .nodes
            .get(&parent)
            .and_then(|n| n.children.iter().position(|c| *c == anchor));
        if let Some(parent_node) = state.nodes.get_mut(&parent) {
            match position {
                Some(index) => parent_node.children.insert(index, child),
                None => parent_node.children.push(child),
            }
        }
        if let Some(child_node) = state.nodes.get_mut(&child) {
            child_node.parent = Some(parent);
        }
        state.ops.push(HostOp::InsertBefore {
            parent,
            child,
            anchor,
        });
    }

    fn replace(&self, old: HostNode, new: HostNode) {
        let mut state = self.state.lock();
        Self::detach(&mut state, new);
        let parent = state.nodes.get(&old).and_then(|n| n.parent);
        if let Some(parent) = parent {
            let position = state
                .nodes
                .get(&parent)
                .and_then(|n| n.children.iter().position(|c| *c == old));
            if let (Some(parent_node), Some(index)) = (state.nodes.get_mut(&parent), position) {
                parent_node.children[index] = new;
            }
            if let Some(new_node) = state.nodes.get_mut(&new) {
                new_node.parent = Some(parent);
            }
            if let Some(old_node) = state.nodes.get_mut(&old) {
                old_node.parent = None;
            }
        }
        state.ops.push(HostOp::Replace { old, new });
    }

    fn remove(&self, node: HostNode) {
        let mut state = self.state.lock();
        Self::detach(&mut state, node);
        state.ops.push(HostOp::Remove { node });
    }

    fn set_attribute(&self, node: HostNode, name: &str, value: &str) {
        let mut state = self.state.lock();
        if let Some(Node {
            kind: NodeKind::Element { attrs, .. },
            ..
        }) = state.nodes.get_mut(&node)
        {
            attrs.insert(name.to_string(), value.to_string());
        }
        state.ops.push(HostOp::SetAttribute {
            node,
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    fn remove_attribute(&self, node: HostNode, name: &str) {
        let mut state = self.state.lock();
        if let Some(Node {
            kind: NodeKind::Element { attrs, .. },
            ..
        }) = state.nodes.get_mut(&node)
        {
            attrs.shift_remove(name);
        }
        state.ops.push(HostOp::RemoveAttribute {
            node,
            name: name.to_string(),
        });
    }

    fn set_text(&self, node: HostNode, text: &str) {
        let mut state = self.state.lock();
        if let Some(n) = state.nodes.get_mut(&node) {
            match &mut n.kind {
                NodeKind::Text(current) | NodeKind::Comment(current) => {
                    *current = text.to_string();
                }
                NodeKind::Element { .. } => {}
            }
        }
        state.ops.push(HostOp::SetText {
            node,
            text: text.to_string(),
        });
    }

    fn get_parent_element(&self, node: HostNode) -> Option<HostNode> {
        self.state.lock().nodes.get(&node).and_then(|n| n.parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_serializes_a_tree() {
        let host = MemoryHost::new();
        let div = host.create_element("div");
        host.set_attribute(div, "class", "box");
        let text = host.create_text("hello");
        host.append_child(div, text);
        host.append_child(host.root(), div);

        assert_eq!(
            host.render_to_string(host.root()),
            "<root><div class=\"box\">hello</div></root>"
        );
    }

    #[test]
    fn insert_before_orders_children() {
        let host = MemoryHost::new();
        let a = host.create_text("a");
        let b = host.create_text("b");
        let c = host.create_text("c");
        host.append_child(host.root(), a);
        host.append_child(host.root(), c);
        host.insert_before(host.root(), b, c);

        assert_eq!(host.children_of(host.root()), vec![a, b, c]);
    }

    #[test]
    fn moving_an_attached_child_detaches_it_first() {
        let host = MemoryHost::new();
        let a = host.create_text("a");
        let b = host.create_text("b");
        host.append_child(host.root(), a);
        host.append_child(host.root(), b);
        host.insert_before(host.root(), b, a);

        assert_eq!(host.children_of(host.root()), vec![b, a]);
    }

    #[test]
    fn replace_swaps_in_place() {
        let host = MemoryHost::new();
        let old = host.create_text("old");
        let marker = host.create_comment("m");
        host.append_child(host.root(), old);
        host.append_child(host.root(), marker);

        let new = host.create_text("new");
        host.replace(old, new);
        assert_eq!(host.children_of(host.root()), vec![new, marker]);
        assert_eq!(host.get_parent_element(old), None);
    }

    #[test]
    fn op_log_records_mutations_in_order() {
        let host = MemoryHost::new();
        let div = host.create_element("div");
        host.append_child(host.root(), div);
        host.clear_ops();

        host.set_attribute(div, "id", "x");
        host.remove(div);
        let ops = host.ops();
        assert_eq!(ops.len(), 2);
        assert!(matches!(ops[0], HostOp::SetAttribute { .. }));
        assert!(matches!(ops[1], HostOp::Remove { .. }));
    }
}
