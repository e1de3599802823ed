//! Tree Creation API
//!
//! The small surface tree producers (compiled templates, hand-written
//! builders) use to construct vnode trees. The core accepts any well-formed
//! tree regardless of how it was authored.

use std::sync::Arc;

use indexmap::IndexMap;

use super::vnode::{Directive, Key, VNode};
use crate::error::TreeError;
use crate::reactive::value::{PropKey, Value};
use crate::widget::WidgetDef;

/// What a view node renders as.
#[derive(Clone)]
pub enum ViewType {
    Element(Arc<str>),
    Widget(WidgetDef),
    Fragment,
}

impl ViewType {
    pub fn element(tag: &str) -> Self {
        ViewType::Element(Arc::from(tag))
    }
}

/// One child handed to `create_view`: either an already-built node or a
/// scalar value that becomes a text node.
#[derive(Clone)]
pub enum ViewChild {
    Node(VNode),
    Value(Value),
}

impl From<VNode> for ViewChild {
    fn from(node: VNode) -> Self {
        ViewChild::Node(node)
    }
}

impl From<Value> for ViewChild {
    fn from(value: Value) -> Self {
        ViewChild::Value(value)
    }
}

impl From<&str> for ViewChild {
    fn from(s: &str) -> Self {
        ViewChild::Value(Value::from(s))
    }
}

/// Interpret a value as a children sequence.
///
/// Only sequences qualify; anything else is [`TreeError::InvalidChildren`].
pub fn sequence_children(value: Value) -> Result<Vec<ViewChild>, TreeError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::List(items) => Ok(items.into_iter().map(ViewChild::Value).collect()),
        _ => Err(TreeError::InvalidChildren),
    }
}

fn child_to_node(child: ViewChild) -> Result<VNode, TreeError> {
    match child {
        ViewChild::Node(node) => Ok(node),
        ViewChild::Value(value) => match value {
            Value::Null => Ok(VNode::comment("")),
            Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => {
                Ok(VNode::text(&value.to_string()))
            }
            Value::List(_) | Value::Map(_) | Value::Reactive(_) => {
                Err(TreeError::InvalidChild("aggregate values cannot be children"))
            }
            Value::Cell(_) => Err(TreeError::InvalidChild(
                "reactive cells must be read through dynamic()",
            )),
        },
    }
}

fn split_props(props: Value) -> Result<(IndexMap<String, Value>, Option<Key>), TreeError> {
    let mut map = match props {
        Value::Null => IndexMap::new(),
        Value::Map(entries) => entries,
        _ => return Err(TreeError::InvalidProps),
    };
    let key = map
        .shift_remove("key")
        .as_ref()
        .and_then(Key::from_value);
    Ok((map, key))
}

/// Build a view node.
///
/// Props must be a record (the reserved `key` prop becomes the node's
/// sibling key); children must be a sequence. Scalar children become text
/// nodes.
pub fn create_view(
    view_type: ViewType,
    props: Value,
    children: Vec<ViewChild>,
) -> Result<VNode, TreeError> {
    let (props, key) = split_props(props)?;
    let children = children
        .into_iter()
        .map(child_to_node)
        .collect::<Result<Vec<_>, _>>()?;

    let node = match view_type {
        ViewType::Element(tag) => {
            let node = VNode::element(&tag, props, key);
            node.set_children(children);
            node
        }
        ViewType::Fragment => VNode::fragment(children, key),
        ViewType::Widget(def) => {
            if !children.is_empty() {
                return Err(TreeError::InvalidChild(
                    "widget children are passed through props",
                ));
            }
            VNode::widget(def, props, key)
        }
    };
    Ok(node)
}

/// Build a fragment around prebuilt or scalar children.
pub fn fragment(children: Vec<ViewChild>) -> Result<VNode, TreeError> {
    let children = children
        .into_iter()
        .map(child_to_node)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(VNode::fragment(children, None))
}

/// One arm of a `branch`. An arm without a `when` value is the default.
pub struct BranchArm {
    pub when: Option<Value>,
    pub build: Box<dyn Fn() -> Result<VNode, TreeError>>,
}

impl BranchArm {
    pub fn when(value: Value, build: impl Fn() -> Result<VNode, TreeError> + 'static) -> Self {
        Self {
            when: Some(value),
            build: Box::new(build),
        }
    }

    pub fn default(build: impl Fn() -> Result<VNode, TreeError> + 'static) -> Self {
        Self {
            when: None,
            build: Box::new(build),
        }
    }
}

/// Select the first arm matching `selector`, falling back to the default
/// arm, then to a comment placeholder.
pub fn branch(selector: Value, arms: &[BranchArm]) -> Result<VNode, TreeError> {
    for arm in arms {
        if arm.when.as_ref() == Some(&selector) {
            return (arm.build)();
        }
    }
    for arm in arms {
        if arm.when.is_none() {
            return (arm.build)();
        }
    }
    Ok(VNode::comment("branch"))
}

/// Evaluate a getter under the ambient dependency collection and render the
/// result as a text node.
pub fn dynamic(getter: impl Fn() -> Value) -> VNode {
    let value = getter();
    VNode::text(&value.to_string())
}

/// Tracked read helper: reads `key` from a reactive value, registering the
/// dependency edge. Raw aggregates are read untracked; scalars yield `Null`.
pub fn access(value: &Value, key: &PropKey) -> Value {
    match value {
        Value::Reactive(object) => object.get(key),
        Value::Cell(cell) => cell.get(),
        Value::Map(entries) => match key {
            PropKey::Named(name) => entries.get(name.as_ref()).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        },
        Value::List(items) => match key {
            PropKey::Index(index) => items.get(*index).cloned().unwrap_or(Value::Null),
            PropKey::Length => Value::Int(items.len() as i64),
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

/// Attach directives to a node.
pub fn with_directives(node: VNode, directives: Vec<Directive>) -> VNode {
    node.set_directives(directives);
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{ReactiveObject, ValueCell};
    use crate::tree::vnode::NodeKind;
    use indexmap::indexmap;

    #[test]
    fn scalar_children_become_text_nodes() {
        let node = create_view(
            ViewType::element("div"),
            Value::Null,
            vec![ViewChild::from("hello"), ViewChild::from(Value::from(42))],
        )
        .unwrap();

        let children = node.children();
        assert_eq!(children.len(), 2);
        assert!(matches!(children[0].kind(), NodeKind::Text));
        assert_eq!(children[0].content(), "hello");
        assert_eq!(children[1].content(), "42");
    }

    #[test]
    fn aggregate_children_are_rejected() {
        let result = create_view(
            ViewType::element("div"),
            Value::Null,
            vec![ViewChild::Value(Value::List(vec![]))],
        );
        assert!(matches!(result, Err(TreeError::InvalidChild(_))));
    }

    #[test]
    fn non_sequence_children_are_rejected() {
        assert!(matches!(
            sequence_children(Value::from(5)),
            Err(TreeError::InvalidChildren)
        ));
        assert_eq!(sequence_children(Value::Null).unwrap().len(), 0);
    }

    #[test]
    fn key_prop_becomes_the_node_key() {
        let node = create_view(
            ViewType::element("li"),
            Value::Map(indexmap! {
                "key".to_string() => Value::from("row-1"),
                "class".to_string() => Value::from("row"),
            }),
            vec![],
        )
        .unwrap();

        assert_eq!(node.key(), Some(&Key::Str(Arc::from("row-1"))));
        assert!(!node.props().contains_key("key"));
        assert!(node.props().contains_key("class"));
    }

    #[test]
    fn invalid_props_are_rejected() {
        let result = create_view(ViewType::element("div"), Value::from(1), vec![]);
        assert!(matches!(result, Err(TreeError::InvalidProps)));
    }

    #[test]
    fn branch_picks_first_match_then_default_then_placeholder() {
        let arms = vec![
            BranchArm::when(Value::from("a"), || Ok(VNode::text("A"))),
            BranchArm::when(Value::from("b"), || Ok(VNode::text("B"))),
            BranchArm::default(|| Ok(VNode::text("D"))),
        ];

        assert_eq!(branch(Value::from("b"), &arms).unwrap().content(), "B");
        assert_eq!(branch(Value::from("z"), &arms).unwrap().content(), "D");

        let no_default = vec![BranchArm::when(Value::from("a"), || Ok(VNode::text("A")))];
        let fallback = branch(Value::from("z"), &no_default).unwrap();
        assert!(matches!(fallback.kind(), NodeKind::Comment));
    }

    #[test]
    fn dynamic_tracks_reads_into_the_ambient_collection() {
        let cell = ValueCell::new(Value::from(7));
        let cell_clone = cell.clone();
        let (node, deps) = crate::reactive::collect(move || dynamic(move || cell_clone.get()));
        assert_eq!(node.content(), "7");
        assert!(deps.contains(cell.id(), &PropKey::Value));
    }

    #[test]
    fn access_reads_reactive_and_raw_values() {
        let object = ReactiveObject::record(indexmap! {
            "a".to_string() => Value::from(1),
        });
        let reactive = Value::Reactive(object.clone());

        let (_, deps) = crate::reactive::collect(|| {
            assert_eq!(access(&reactive, &PropKey::named("a")), Value::from(1));
        });
        assert!(deps.contains(object.id(), &PropKey::named("a")));

        let raw = Value::Map(indexmap! { "a".to_string() => Value::from(2) });
        assert_eq!(access(&raw, &PropKey::named("a")), Value::from(2));
        assert_eq!(access(&Value::from(5), &PropKey::named("a")), Value::Null);
    }
}
