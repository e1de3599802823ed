//! Virtual Node Model
//!
//! A `VNode` is a lightweight description of one renderable unit. Nodes own
//! their children strictly downward; upward lookup goes through a weak
//! side-table so no reference cycles form. The child list is rebuilt
//! wholesale per re-render and only the reconciler replaces it.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock, Weak};

use dashmap::DashMap;
use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::host::HostNode;
use crate::reactive::value::Value;
use crate::widget::{Widget, WidgetDef};

/// Unique identifier for a vnode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VNodeId(u64);

impl VNodeId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for VNodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Sibling identity for keyed reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Str(Arc<str>),
    Int(i64),
}

impl Key {
    /// Extract a key from a prop value. Strings and integers qualify.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Str(s) => Some(Key::Str(s.clone())),
            Value::Int(n) => Some(Key::Int(*n)),
            _ => None,
        }
    }
}

/// Where a node stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Created,
    Rendered,
    Mounted,
    Activated,
    Deactivated,
    Unmounting,
    Unmounted,
}

/// What a node renders as.
#[derive(Clone)]
pub enum NodeKind {
    Element(Arc<str>),
    Text,
    Comment,
    Fragment,
    Widget(WidgetDef),
}

impl NodeKind {
    /// Whether two kinds reconcile against each other.
    pub fn matches(&self, other: &NodeKind) -> bool {
        match (self, other) {
            (NodeKind::Element(a), NodeKind::Element(b)) => a == b,
            (NodeKind::Text, NodeKind::Text) => true,
            (NodeKind::Comment, NodeKind::Comment) => true,
            (NodeKind::Fragment, NodeKind::Fragment) => true,
            (NodeKind::Widget(a), NodeKind::Widget(b)) => a.same_def(b),
            _ => false,
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Element(tag) => write!(f, "Element({tag})"),
            NodeKind::Text => write!(f, "Text"),
            NodeKind::Comment => write!(f, "Comment"),
            NodeKind::Fragment => write!(f, "Fragment"),
            NodeKind::Widget(def) => write!(f, "Widget({})", def.name()),
        }
    }
}

/// A named behavior attached to a node by the tree producer.
#[derive(Debug, Clone)]
pub struct Directive {
    pub name: Arc<str>,
    pub value: Value,
}

struct NodeInner {
    id: VNodeId,
    kind: NodeKind,
    key: Option<Key>,

    is_static: AtomicBool,
    phase: RwLock<NodePhase>,

    props: RwLock<IndexMap<String, Value>>,
    content: RwLock<String>,
    children: RwLock<Vec<VNode>>,
    directives: RwLock<SmallVec<[Directive; 2]>>,

    /// Host handle for element/text/comment nodes.
    host: RwLock<Option<HostNode>>,

    /// Trailing comment marker for fragments; placeholder for widgets.
    anchor: RwLock<Option<HostNode>>,

    /// The live instance behind a widget node.
    widget: parking_lot::Mutex<Option<Widget>>,
}

/// A node in the virtual tree. Cloning shares the node.
#[derive(Clone)]
pub struct VNode {
    inner: Arc<NodeInner>,
}

/// A non-owning node handle, used by the parent side-table.
#[derive(Clone)]
pub struct WeakVNode {
    inner: Weak<NodeInner>,
}

impl WeakVNode {
    pub fn upgrade(&self) -> Option<VNode> {
        self.inner.upgrade().map(|inner| VNode { inner })
    }
}

impl VNode {
    fn with_kind(kind: NodeKind, key: Option<Key>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                id: VNodeId::new(),
                kind,
                key,
                is_static: AtomicBool::new(false),
                phase: RwLock::new(NodePhase::Created),
                props: RwLock::new(IndexMap::new()),
                content: RwLock::new(String::new()),
                children: RwLock::new(Vec::new()),
                directives: RwLock::new(SmallVec::new()),
                host: RwLock::new(None),
                anchor: RwLock::new(None),
                widget: parking_lot::Mutex::new(None),
            }),
        }
    }

    pub fn element(tag: &str, props: IndexMap<String, Value>, key: Option<Key>) -> Self {
        let node = Self::with_kind(NodeKind::Element(Arc::from(tag)), key);
        *node.inner.props.write().expect("node props lock poisoned") = props;
        node
    }

    pub fn text(content: &str) -> Self {
        let node = Self::with_kind(NodeKind::Text, None);
        *node.inner.content.write().expect("node content lock poisoned") = content.to_string();
        node
    }

    pub fn comment(content: &str) -> Self {
        let node = Self::with_kind(NodeKind::Comment, None);
        *node.inner.content.write().expect("node content lock poisoned") = content.to_string();
        node
    }

    pub fn fragment(children: Vec<VNode>, key: Option<Key>) -> Self {
        let node = Self::with_kind(NodeKind::Fragment, key);
        node.set_children(children);
        node
    }

    pub fn widget(def: WidgetDef, props: IndexMap<String, Value>, key: Option<Key>) -> Self {
        let node = Self::with_kind(NodeKind::Widget(def), key);
        *node.inner.props.write().expect("node props lock poisoned") = props;
        node
    }

    pub fn id(&self) -> VNodeId {
        self.inner.id
    }

    pub fn kind(&self) -> &NodeKind {
        &self.inner.kind
    }

    pub fn key(&self) -> Option<&Key> {
        self.inner.key.as_ref()
    }

    /// Same shared node.
    pub fn same_node(&self, other: &VNode) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether `other` reconciles against this node: matching kind and key.
    pub fn same_identity(&self, other: &VNode) -> bool {
        self.inner.kind.matches(&other.inner.kind) && self.inner.key == other.inner.key
    }

    /// Static nodes are never diffed.
    pub fn is_static(&self) -> bool {
        self.inner.is_static.load(Ordering::SeqCst)
    }

    pub fn mark_static(&self) {
        self.inner.is_static.store(true, Ordering::SeqCst);
    }

    pub fn phase(&self) -> NodePhase {
        *self.inner.phase.read().expect("node phase lock poisoned")
    }

    pub fn set_phase(&self, phase: NodePhase) {
        *self.inner.phase.write().expect("node phase lock poisoned") = phase;
    }

    pub fn props(&self) -> IndexMap<String, Value> {
        self.inner.props.read().expect("node props lock poisoned").clone()
    }

    pub fn set_props(&self, props: IndexMap<String, Value>) {
        *self.inner.props.write().expect("node props lock poisoned") = props;
    }

    pub fn content(&self) -> String {
        self.inner.content.read().expect("node content lock poisoned").clone()
    }

    pub fn set_content(&self, content: &str) {
        *self.inner.content.write().expect("node content lock poisoned") = content.to_string();
    }

    pub fn children(&self) -> Vec<VNode> {
        self.inner
            .children
            .read()
            .expect("node children lock poisoned")
            .clone()
    }

    /// Replace the child list wholesale, rewiring the parent side-table.
    pub fn set_children(&self, children: Vec<VNode>) {
        for child in &children {
            set_parent(child, self);
        }
        *self
            .inner
            .children
            .write()
            .expect("node children lock poisoned") = children;
    }

    pub fn directives(&self) -> Vec<Directive> {
        self.inner
            .directives
            .read()
            .expect("node directives lock poisoned")
            .to_vec()
    }

    pub fn set_directives(&self, directives: Vec<Directive>) {
        *self
            .inner
            .directives
            .write()
            .expect("node directives lock poisoned") = SmallVec::from_vec(directives);
    }

    pub fn host(&self) -> Option<HostNode> {
        *self.inner.host.read().expect("node host lock poisoned")
    }

    pub fn set_host(&self, host: Option<HostNode>) {
        *self.inner.host.write().expect("node host lock poisoned") = host;
    }

    pub fn anchor(&self) -> Option<HostNode> {
        *self.inner.anchor.read().expect("node anchor lock poisoned")
    }

    pub fn set_anchor(&self, anchor: Option<HostNode>) {
        *self.inner.anchor.write().expect("node anchor lock poisoned") = anchor;
    }

    pub fn widget_instance(&self) -> Option<Widget> {
        self.inner.widget.lock().clone()
    }

    pub fn set_widget_instance(&self, widget: Option<Widget>) {
        *self.inner.widget.lock() = widget;
    }

    pub fn downgrade(&self) -> WeakVNode {
        WeakVNode {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for VNode {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl fmt::Debug for VNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VNode")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("key", &self.inner.key)
            .field("phase", &self.phase())
            .finish()
    }
}

// Parent links live outside the node so ownership stays strictly downward.
static PARENTS: OnceLock<DashMap<VNodeId, WeakVNode>> = OnceLock::new();

fn parents() -> &'static DashMap<VNodeId, WeakVNode> {
    PARENTS.get_or_init(DashMap::new)
}

/// Record `parent` as the parent of `child`.
pub fn set_parent(child: &VNode, parent: &VNode) {
    parents().insert(child.id(), parent.downgrade());
}

/// Upward lookup. Returns nothing for roots and for dropped parents.
pub fn parent_of(child: &VNode) -> Option<VNode> {
    parents().get(&child.id()).and_then(|weak| weak.upgrade())
}

/// Drop the parent link, typically at unmount.
pub fn clear_parent(child: &VNode) {
    parents().remove(&child.id());
}
