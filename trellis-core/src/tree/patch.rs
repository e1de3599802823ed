//! Tree Reconciler
//!
//! `patch(old, new)` turns the difference between two vnode trees into a
//! minimal set of host mutations and returns the authoritative resulting
//! node (the old node absorbs the new one's state wherever identity
//! matches).
//!
//! # Children
//!
//! Keyed children match by key, unkeyed by identical position and type.
//! The longest increasing subsequence over matched old indices (patience
//! sort with predecessor links, O(n log n)) identifies the children that
//! can stay put; everything else moves. Children are processed last to
//! first so every insertion anchor has already reached its final position.

use std::sync::Arc;

use indexmap::IndexMap;

use super::vnode::{self, Key, NodeKind, NodePhase, VNode};
use crate::error::TreeError;
use crate::host::{HostAdapter, HostNode};
use crate::reactive::value::Value;
use crate::widget::Widget;

fn attr_string(value: &Value) -> Option<String> {
    match value {
        Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => {
            Some(value.to_string())
        }
        _ => None,
    }
}

/// Applies tree differences through a host adapter.
#[derive(Clone)]
pub struct Reconciler {
    host: Arc<dyn HostAdapter>,
}

impl Reconciler {
    pub fn new(host: Arc<dyn HostAdapter>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &Arc<dyn HostAdapter> {
        &self.host
    }

    fn insert(&self, handle: HostNode, container: HostNode, anchor: Option<HostNode>) {
        match anchor {
            Some(anchor) => self.host.insert_before(container, handle, anchor),
            None => self.host.append_child(container, handle),
        }
    }

    /// Mount a subtree into `container`, before `anchor` when given.
    pub fn mount(
        &self,
        node: &VNode,
        container: HostNode,
        anchor: Option<HostNode>,
    ) -> Result<(), TreeError> {
        match node.kind() {
            NodeKind::Element(tag) => {
                let handle = self.host.create_element(tag);
                for (name, value) in &node.props() {
                    if let Some(attr) = attr_string(value) {
                        self.host.set_attribute(handle, name, &attr);
                    }
                }
                node.set_host(Some(handle));
                self.insert(handle, container, anchor);
                for child in node.children() {
                    self.mount(&child, handle, None)?;
                }
                node.set_phase(NodePhase::Mounted);
            }
            NodeKind::Text => {
                let handle = self.host.create_text(&node.content());
                node.set_host(Some(handle));
                self.insert(handle, container, anchor);
                node.set_phase(NodePhase::Mounted);
            }
            NodeKind::Comment => {
                let handle = self.host.create_comment(&node.content());
                node.set_host(Some(handle));
                self.insert(handle, container, anchor);
                node.set_phase(NodePhase::Mounted);
            }
            NodeKind::Fragment => {
                for child in node.children() {
                    self.mount(&child, container, anchor)?;
                }
                // Trailing marker gives the fragment a stable anchor even
                // when it is empty.
                let marker = self.host.create_comment("");
                node.set_anchor(Some(marker));
                self.insert(marker, container, anchor);
                node.set_phase(NodePhase::Mounted);
            }
            NodeKind::Widget(def) => {
                Widget::mount(def.clone(), node, self.host.clone(), container, anchor)?;
            }
        }
        Ok(())
    }

    /// Unmount a subtree, removing its host output.
    pub fn unmount(&self, node: &VNode) -> Result<(), TreeError> {
        node.set_phase(NodePhase::Unmounting);
        match node.kind() {
            NodeKind::Element(_) => {
                // Descendants disappear with the element's own handle;
                // they only need lifecycle teardown.
                for child in node.children() {
                    self.teardown(&child);
                }
                if let Some(handle) = node.host() {
                    self.host.remove(handle);
                }
                node.set_host(None);
            }
            NodeKind::Text | NodeKind::Comment => {
                if let Some(handle) = node.host() {
                    self.host.remove(handle);
                }
                node.set_host(None);
            }
            NodeKind::Fragment => {
                for child in node.children() {
                    self.unmount(&child)?;
                }
                if let Some(marker) = node.anchor() {
                    self.host.remove(marker);
                }
                node.set_anchor(None);
            }
            NodeKind::Widget(_) => {
                if let Some(widget) = node.widget_instance() {
                    widget.unmount();
                }
            }
        }
        vnode::clear_parent(node);
        node.set_phase(NodePhase::Unmounted);
        Ok(())
    }

    fn teardown(&self, node: &VNode) {
        if let NodeKind::Widget(_) = node.kind() {
            if let Some(widget) = node.widget_instance() {
                widget.unmount();
            }
            return;
        }
        for child in node.children() {
            self.teardown(&child);
        }
        node.set_host(None);
        node.set_anchor(None);
        vnode::clear_parent(node);
        node.set_phase(NodePhase::Unmounted);
    }

    /// First host handle rendered by a subtree, used as an insertion
    /// anchor.
    pub fn first_host(&self, node: &VNode) -> Option<HostNode> {
        match node.kind() {
            NodeKind::Element(_) | NodeKind::Text | NodeKind::Comment => node.host(),
            NodeKind::Fragment => {
                for child in node.children() {
                    if let Some(handle) = self.first_host(&child) {
                        return Some(handle);
                    }
                }
                node.anchor()
            }
            NodeKind::Widget(_) => {
                let widget = node.widget_instance()?;
                if let Some(placeholder) = widget.placeholder_node() {
                    return placeholder.host();
                }
                widget.subtree().and_then(|subtree| self.first_host(&subtree))
            }
        }
    }

    /// Every host handle a subtree occupies at its container level, in
    /// order. Moving a node means moving all of these.
    pub fn collect_hosts(&self, node: &VNode, out: &mut Vec<HostNode>) {
        match node.kind() {
            NodeKind::Element(_) | NodeKind::Text | NodeKind::Comment => {
                if let Some(handle) = node.host() {
                    out.push(handle);
                }
            }
            NodeKind::Fragment => {
                for child in node.children() {
                    self.collect_hosts(&child, out);
                }
                if let Some(marker) = node.anchor() {
                    out.push(marker);
                }
            }
            NodeKind::Widget(_) => {
                if let Some(widget) = node.widget_instance() {
                    if let Some(placeholder) = widget.placeholder_node() {
                        if let Some(handle) = placeholder.host() {
                            out.push(handle);
                        }
                    } else if let Some(subtree) = widget.subtree() {
                        self.collect_hosts(&subtree, out);
                    }
                }
            }
        }
    }

    fn position_of(&self, node: &VNode) -> Result<(HostNode, Option<HostNode>), TreeError> {
        let first = self.first_host(node);
        let container = first
            .and_then(|handle| self.host.get_parent_element(handle))
            .ok_or(TreeError::InvalidPatchTarget("node is not mounted"))?;
        Ok((container, first))
    }

    fn replace(&self, old: &VNode, new: &VNode) -> Result<VNode, TreeError> {
        let (container, anchor) = self.position_of(old)?;
        self.mount(new, container, anchor)?;
        self.unmount(old)?;
        Ok(new.clone())
    }

    /// Reconcile `new` against `old` and return the authoritative node.
    pub fn patch(&self, old: &VNode, new: &VNode) -> Result<VNode, TreeError> {
        if old.same_node(new) {
            return Ok(old.clone());
        }
        if !old.same_identity(new) {
            return self.replace(old, new);
        }
        if old.is_static() && new.is_static() {
            return Ok(old.clone());
        }

        match old.kind() {
            NodeKind::Text | NodeKind::Comment => {
                let content = new.content();
                if content != old.content() {
                    if let Some(handle) = old.host() {
                        self.host.set_text(handle, &content);
                    }
                    old.set_content(&content);
                }
                Ok(old.clone())
            }
            NodeKind::Element(_) => {
                let handle = old
                    .host()
                    .ok_or(TreeError::InvalidPatchTarget("element is not mounted"))?;
                self.diff_props(handle, &old.props(), &new.props());
                old.set_props(new.props());
                let children =
                    self.patch_children(handle, old.children(), new.children(), None)?;
                old.set_children(children);
                Ok(old.clone())
            }
            NodeKind::Fragment => {
                let marker = old
                    .anchor()
                    .ok_or(TreeError::InvalidPatchTarget("fragment is not mounted"))?;
                let container = self
                    .host
                    .get_parent_element(marker)
                    .ok_or(TreeError::InvalidPatchTarget("fragment marker detached"))?;
                let children = self.patch_children(
                    container,
                    old.children(),
                    new.children(),
                    Some(marker),
                )?;
                old.set_children(children);
                Ok(old.clone())
            }
            NodeKind::Widget(_) => {
                if let Some(widget) = old.widget_instance() {
                    widget.patch_props(new.props())?;
                }
                old.set_props(new.props());
                Ok(old.clone())
            }
        }
    }

    fn diff_props(
        &self,
        handle: HostNode,
        old_props: &IndexMap<String, Value>,
        new_props: &IndexMap<String, Value>,
    ) {
        for (name, value) in new_props {
            if old_props.get(name) != Some(value) {
                match attr_string(value) {
                    Some(attr) => self.host.set_attribute(handle, name, &attr),
                    None => self.host.remove_attribute(handle, name),
                }
            }
        }
        for name in old_props.keys() {
            if !new_props.contains_key(name) {
                self.host.remove_attribute(handle, name);
            }
        }
    }

    /// Reconcile two child lists inside `container`. `end_anchor` is the
    /// host position just past the list (a fragment's marker), if any.
    fn patch_children(
        &self,
        container: HostNode,
        old_list: Vec<VNode>,
        new_list: Vec<VNode>,
        end_anchor: Option<HostNode>,
    ) -> Result<Vec<VNode>, TreeError> {
        if old_list.is_empty() {
            for child in &new_list {
                self.mount(child, container, end_anchor)?;
            }
            return Ok(new_list);
        }
        if new_list.is_empty() {
            for child in &old_list {
                self.unmount(child)?;
            }
            return Ok(Vec::new());
        }

        let mut keyed_new: IndexMap<Key, usize> = IndexMap::new();
        for (index, child) in new_list.iter().enumerate() {
            if let Some(key) = child.key() {
                if keyed_new.insert(key.clone(), index).is_some() {
                    tracing::warn!(key = ?key, "duplicate sibling key; later child wins");
                }
            }
        }

        // matched[new index] = old index
        let mut matched: Vec<Option<usize>> = vec![None; new_list.len()];
        let mut old_matched = vec![false; old_list.len()];
        for (old_index, old) in old_list.iter().enumerate() {
            let candidate = match old.key() {
                Some(key) => keyed_new.get(key).copied(),
                None => (old_index < new_list.len()
                    && new_list[old_index].key().is_none())
                .then_some(old_index),
            };
            if let Some(new_index) = candidate {
                if matched[new_index].is_none() && old.same_identity(&new_list[new_index]) {
                    matched[new_index] = Some(old_index);
                    old_matched[old_index] = true;
                }
            }
        }

        let mut stable = vec![false; new_list.len()];
        for index in lis_indices(&matched) {
            stable[index] = true;
        }

        // Last to first: anchors processed later in document order are
        // already final.
        let mut result: Vec<VNode> = Vec::with_capacity(new_list.len());
        let mut anchor = end_anchor;
        for index in (0..new_list.len()).rev() {
            let node = match matched[index] {
                Some(old_index) => {
                    let patched = self.patch(&old_list[old_index], &new_list[index])?;
                    if !stable[index] {
                        let mut hosts = Vec::new();
                        self.collect_hosts(&patched, &mut hosts);
                        for handle in hosts {
                            self.insert(handle, container, anchor);
                        }
                    }
                    patched
                }
                None => {
                    self.mount(&new_list[index], container, anchor)?;
                    new_list[index].clone()
                }
            };
            anchor = self.first_host(&node).or(anchor);
            result.push(node);
        }
        result.reverse();

        for (old_index, old) in old_list.iter().enumerate() {
            if !old_matched[old_index] {
                self.unmount(old)?;
            }
        }
        Ok(result)
    }
}

/// New-list indices forming a longest increasing subsequence of the
/// matched old indices. Patience sort over the tails with predecessor
/// links.
fn lis_indices(matched: &[Option<usize>]) -> Vec<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; matched.len()];

    for (index, slot) in matched.iter().enumerate() {
        let Some(value) = *slot else { continue };
        let pos = tails.partition_point(|&tail| matched[tail] < Some(value));
        if pos > 0 {
            prev[index] = Some(tails[pos - 1]);
        }
        if pos == tails.len() {
            tails.push(index);
        } else {
            tails[pos] = index;
        }
    }

    let mut lis = Vec::with_capacity(tails.len());
    let mut current = tails.last().copied();
    while let Some(index) = current {
        lis.push(index);
        current = prev[index];
    }
    lis.reverse();
    lis
}
