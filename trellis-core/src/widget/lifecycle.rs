//! Widget Lifecycle Controller
//!
//! A `Widget` is the live instance behind a widget vnode. It owns exactly
//! one [`Scope`], created at instantiation and destroyed exactly once at
//! unmount; every effect created while rendering lands in that scope.
//!
//! # Phases
//!
//! NotRendered → NotMounted → Activated ⇄ Deactivating/Deactivated; any
//! live phase → Uninstalling → Unloaded (terminal).
//!
//! # Updates
//!
//! The render function runs under dependency collection. Each collected
//! edge gets a batched listener that marks the widget for re-render; the
//! re-render itself is parked on the render-frame queue and deduplicated by
//! a pending flag, so many synchronous mutations cost one rebuild. Each
//! rebuild drops the previous build's subscriptions before re-subscribing.
//!
//! The update listener is deliberately kept out of the scope: while the
//! widget is deactivated the scope is paused, but dependency changes must
//! still be noticed so they can be replayed as exactly one re-render at
//! activation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use crate::error::{ErrorInfo, RenderError, TreeError};
use crate::host::{HostAdapter, HostNode};
use crate::reactive::listener::Listener;
use crate::reactive::observer::{self, Delivery};
use crate::reactive::scheduler::{self, Deferred};
use crate::reactive::scope::{AmbientSnapshot, Scope};
use crate::reactive::tracker::{self, DependencyMap};
use crate::reactive::value::{PropKey, Value};
use crate::reactive::ReactiveObject;
use crate::tree::patch::Reconciler;
use crate::tree::vnode::{self, NodePhase, VNode, WeakVNode};
use crate::widget::error::{route_error, ErrorHook};

/// Gate held by the before-unmount hook. Final cleanup waits until it is
/// released.
#[derive(Clone)]
pub struct UnmountGate {
    deferred: Deferred,
}

impl UnmountGate {
    fn new() -> Self {
        Self {
            deferred: Deferred::new(),
        }
    }

    /// Allow the unmount to complete. Idempotent.
    pub fn release(&self) {
        self.deferred.settle();
    }

    pub fn is_released(&self) -> bool {
        self.deferred.is_settled()
    }
}

type RenderFn = Arc<dyn Fn(&ReactiveObject) -> Result<VNode, RenderError> + Send + Sync>;
type SetupFn = Arc<dyn Fn(&ReactiveObject) -> Option<Deferred> + Send + Sync>;
type TargetFn = Arc<dyn Fn() -> Option<HostNode> + Send + Sync>;
type HookFn = Arc<dyn Fn() + Send + Sync>;
type UnmountHookFn = Arc<dyn Fn(&UnmountGate) + Send + Sync>;

struct DefInner {
    id: u64,
    name: Arc<str>,
    stateful: bool,
    render: RenderFn,
    setup: Option<SetupFn>,
    before_mount: Option<TargetFn>,
    mounted: Option<HookFn>,
    activated: Option<HookFn>,
    deactivated: Option<HookFn>,
    before_unmount: Option<UnmountHookFn>,
    error_hook: Option<ErrorHook>,
}

/// A widget definition: the render function plus optional lifecycle hooks.
///
/// Cloning shares the definition; two widget nodes reconcile only when they
/// share one.
#[derive(Clone)]
pub struct WidgetDef {
    inner: Arc<DefInner>,
}

impl WidgetDef {
    pub fn builder<F>(name: &str, render: F) -> WidgetDefBuilder
    where
        F: Fn(&ReactiveObject) -> Result<VNode, RenderError> + Send + Sync + 'static,
    {
        WidgetDefBuilder {
            name: Arc::from(name),
            stateful: true,
            render: Arc::new(render),
            setup: None,
            before_mount: None,
            mounted: None,
            activated: None,
            deactivated: None,
            before_unmount: None,
            error_hook: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_stateful(&self) -> bool {
        self.inner.stateful
    }

    pub fn same_def(&self, other: &WidgetDef) -> bool {
        self.inner.id == other.inner.id
    }

    pub(crate) fn error_hook(&self) -> Option<ErrorHook> {
        self.inner.error_hook.clone()
    }
}

impl std::fmt::Debug for WidgetDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WidgetDef")
            .field("name", &self.inner.name)
            .field("stateful", &self.inner.stateful)
            .finish()
    }
}

pub struct WidgetDefBuilder {
    name: Arc<str>,
    stateful: bool,
    render: RenderFn,
    setup: Option<SetupFn>,
    before_mount: Option<TargetFn>,
    mounted: Option<HookFn>,
    activated: Option<HookFn>,
    deactivated: Option<HookFn>,
    before_unmount: Option<UnmountHookFn>,
    error_hook: Option<ErrorHook>,
}

impl WidgetDefBuilder {
    /// Stateless widgets re-render only when a prop changes, never from
    /// their own reactive store.
    pub fn stateless(mut self) -> Self {
        self.stateful = false;
        self
    }

    /// Initialization hook. Returning a `Deferred` suspends the initial
    /// mount until it settles; a comment reserves the position meanwhile.
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&ReactiveObject) -> Option<Deferred> + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(f));
        self
    }

    /// Relocation hook: a returned handle replaces the mount container.
    pub fn before_mount<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Option<HostNode> + Send + Sync + 'static,
    {
        self.before_mount = Some(Arc::new(f));
        self
    }

    pub fn on_mounted<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.mounted = Some(Arc::new(f));
        self
    }

    pub fn on_activated<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.activated = Some(Arc::new(f));
        self
    }

    pub fn on_deactivated<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.deactivated = Some(Arc::new(f));
        self
    }

    /// Cleanup hook. Final unmount waits for the gate to be released.
    pub fn before_unmount<F>(mut self, f: F) -> Self
    where
        F: Fn(&UnmountGate) + Send + Sync + 'static,
    {
        self.before_unmount = Some(Arc::new(f));
        self
    }

    pub fn error_hook(mut self, hook: ErrorHook) -> Self {
        self.error_hook = Some(hook);
        self
    }

    pub fn build(self) -> WidgetDef {
        use std::sync::atomic::AtomicU64;
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        WidgetDef {
            inner: Arc::new(DefInner {
                id: COUNTER.fetch_add(1, Ordering::Relaxed),
                name: self.name,
                stateful: self.stateful,
                render: self.render,
                setup: self.setup,
                before_mount: self.before_mount,
                mounted: self.mounted,
                activated: self.activated,
                deactivated: self.deactivated,
                before_unmount: self.before_unmount,
                error_hook: self.error_hook,
            }),
        }
    }
}

/// Where a widget instance stands in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetPhase {
    NotRendered,
    NotMounted,
    Activated,
    Deactivating,
    Deactivated,
    Uninstalling,
    Unloaded,
}

struct WidgetInner {
    def: WidgetDef,
    node: WeakVNode,
    host: Arc<dyn HostAdapter>,

    /// The widget's reactive prop store; the render function reads from it.
    props: ReactiveObject,
    scope: Scope,

    phase: parking_lot::Mutex<WidgetPhase>,
    subtree: parking_lot::Mutex<Option<VNode>>,

    /// Comment node holding the widget's position while deactivated or
    /// while deferred setup is pending.
    placeholder: parking_lot::Mutex<Option<VNode>>,

    container: parking_lot::Mutex<Option<HostNode>>,
    update_listener: parking_lot::Mutex<Option<Listener>>,

    pending_update: AtomicBool,
    dirty_while_inactive: AtomicBool,
    destroyed: AtomicBool,
}

/// A live widget instance. Cloning shares the instance.
#[derive(Clone)]
pub struct Widget {
    inner: Arc<WidgetInner>,
}

impl Widget {
    /// Instantiate and mount a widget at `container` (before `anchor` when
    /// given). Called by the reconciler for widget vnodes.
    pub(crate) fn mount(
        def: WidgetDef,
        node: &VNode,
        host: Arc<dyn HostAdapter>,
        container: HostNode,
        anchor: Option<HostNode>,
    ) -> Result<Widget, TreeError> {
        let props = ReactiveObject::record(node.props());
        let scope = Scope::new(true, Some(def.name()));

        let widget = Widget {
            inner: Arc::new(WidgetInner {
                def,
                node: node.downgrade(),
                host,
                props,
                scope,
                phase: parking_lot::Mutex::new(WidgetPhase::NotRendered),
                subtree: parking_lot::Mutex::new(None),
                placeholder: parking_lot::Mutex::new(None),
                container: parking_lot::Mutex::new(Some(container)),
                update_listener: parking_lot::Mutex::new(None),
                pending_update: AtomicBool::new(false),
                dirty_while_inactive: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
            }),
        };
        node.set_widget_instance(Some(widget.clone()));

        let deferred = match &widget.inner.def.inner.setup {
            Some(setup) => widget.inner.scope.run(|| setup(&widget.inner.props)),
            None => None,
        };

        match deferred {
            Some(deferred) if !deferred.is_settled() => {
                // Reserve the position; the real subtree lands when setup
                // settles.
                let placeholder =
                    VNode::comment(&format!("pending:{}", widget.inner.def.name()));
                let reconciler = Reconciler::new(widget.inner.host.clone());
                reconciler.mount(&placeholder, container, anchor)?;
                *widget.inner.placeholder.lock() = Some(placeholder);

                let snapshot = AmbientSnapshot::capture();
                let resumed = widget.clone();
                deferred.on_settled(Box::new(move || {
                    if resumed.is_destroyed() {
                        return;
                    }
                    snapshot.resume(|| {
                        if let Err(error) = resumed.finish_initial_mount(None, None) {
                            tracing::error!(
                                widget = resumed.inner.def.name(),
                                error = %error,
                                "deferred widget mount failed"
                            );
                        }
                    });
                }));
            }
            _ => {
                widget.finish_initial_mount(Some(container), anchor)?;
            }
        }

        node.set_phase(NodePhase::Mounted);
        Ok(widget)
    }

    /// Complete the initial mount: resolve the target position, render the
    /// subtree, mount it, drop any pending placeholder, fire hooks.
    fn finish_initial_mount(
        &self,
        container: Option<HostNode>,
        anchor: Option<HostNode>,
    ) -> Result<(), TreeError> {
        let reconciler = Reconciler::new(self.inner.host.clone());

        let relocation = self
            .inner
            .def
            .inner
            .before_mount
            .as_ref()
            .and_then(|hook| hook());

        let pending = self.inner.placeholder.lock().clone();
        let (container, anchor) = if let Some(target) = relocation {
            (target, None)
        } else if let Some(placeholder) = &pending {
            let ph_host = placeholder.host();
            let parent = ph_host.and_then(|h| self.inner.host.get_parent_element(h));
            match (parent, ph_host) {
                (Some(parent), Some(ph_host)) => (parent, Some(ph_host)),
                _ => (
                    self.inner
                        .container
                        .lock()
                        .ok_or(TreeError::InvalidPatchTarget("widget container lost"))?,
                    None,
                ),
            }
        } else {
            (
                container.ok_or(TreeError::InvalidPatchTarget("widget container lost"))?,
                anchor,
            )
        };
        *self.inner.container.lock() = Some(container);

        *self.inner.phase.lock() = WidgetPhase::NotMounted;
        let subtree = self.render_subtree();
        // Parent link first: error routing during the mount below climbs
        // through it.
        if let Some(node) = self.inner.node.upgrade() {
            vnode::set_parent(&subtree, &node);
        }
        // Mount inside the scope so descendant widget scopes attach here.
        self.inner
            .scope
            .run(|| reconciler.mount(&subtree, container, anchor))?;
        *self.inner.subtree.lock() = Some(subtree);

        if let Some(placeholder) = pending {
            self.inner.placeholder.lock().take();
            reconciler.unmount(&placeholder)?;
        }

        *self.inner.phase.lock() = WidgetPhase::Activated;
        if let Some(hook) = &self.inner.def.inner.mounted {
            hook();
        }
        if let Some(hook) = &self.inner.def.inner.activated {
            hook();
        }
        Ok(())
    }

    /// Build the child subtree under dependency collection, resubscribing
    /// the update listener to what was read. A failure is routed through
    /// the error chain and replaced with a placeholder node.
    fn render_subtree(&self) -> VNode {
        let def = &self.inner.def;
        let (result, deps) =
            tracker::collect(|| self.inner.scope.run(|| (def.inner.render)(&self.inner.props)));
        self.resubscribe(deps);

        match result {
            Ok(node) => node,
            Err(error) => {
                let info = ErrorInfo {
                    widget: Some(self.inner.def.inner.name.clone()),
                    phase: "render",
                };
                let origin = self.inner.node.upgrade();
                route_error(origin.as_ref(), &error, &info)
            }
        }
    }

    /// Replace the previous build's subscriptions with ones for the freshly
    /// collected dependencies.
    fn resubscribe(&self, deps: DependencyMap) {
        let weak: Weak<WidgetInner> = Arc::downgrade(&self.inner);
        let listener = Listener::new(move |_| {
            if let Some(inner) = weak.upgrade() {
                Widget { inner }.note_dependency_change();
            }
        });
        for (object, key) in deps.edges() {
            let _ = observer::register(object, key, listener.clone(), Delivery::Batched);
        }
        if let Some(previous) = self.inner.update_listener.lock().replace(listener) {
            previous.destroy();
        }
    }

    fn note_dependency_change(&self) {
        if self.is_destroyed() {
            return;
        }
        let phase = *self.inner.phase.lock();
        if matches!(phase, WidgetPhase::Deactivating | WidgetPhase::Deactivated) {
            self.inner.dirty_while_inactive.store(true, Ordering::SeqCst);
            return;
        }
        self.request_update();
    }

    /// Queue a re-render on the render-frame queue, deduplicated per
    /// widget.
    pub fn request_update(&self) {
        if self.is_destroyed() {
            return;
        }
        if self.inner.pending_update.swap(true, Ordering::SeqCst) {
            return;
        }
        let weak: Weak<WidgetInner> = Arc::downgrade(&self.inner);
        scheduler::request_frame(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let widget = Widget { inner };
            widget.inner.pending_update.store(false, Ordering::SeqCst);
            if widget.is_destroyed() {
                return;
            }
            let phase = *widget.inner.phase.lock();
            if matches!(phase, WidgetPhase::Deactivating | WidgetPhase::Deactivated) {
                widget
                    .inner
                    .dirty_while_inactive
                    .store(true, Ordering::SeqCst);
                return;
            }
            if let Err(error) = widget.run_update() {
                tracing::error!(
                    widget = widget.inner.def.name(),
                    error = %error,
                    "widget update failed"
                );
            }
        }));
    }

    /// Rebuild the subtree and patch it against the previous build.
    fn run_update(&self) -> Result<(), TreeError> {
        let Some(old) = self.inner.subtree.lock().clone() else {
            return Ok(());
        };
        let new = self.render_subtree();
        if let Some(node) = self.inner.node.upgrade() {
            vnode::set_parent(&new, &node);
        }
        let reconciler = Reconciler::new(self.inner.host.clone());
        let result = self.inner.scope.run(|| reconciler.patch(&old, &new))?;
        if let Some(node) = self.inner.node.upgrade() {
            vnode::set_parent(&result, &node);
        }
        *self.inner.subtree.lock() = Some(result);
        Ok(())
    }

    /// Merge a new prop bag, as produced by the reconciler.
    ///
    /// Stateful widgets route changes through their reactive prop store, so
    /// the widget's own update listener reacts. Stateless widgets
    /// short-circuit unless a prop's presence or value differs, then
    /// re-render immediately.
    pub(crate) fn patch_props(&self, new_props: IndexMap<String, Value>) -> Result<(), TreeError> {
        let current_keys = self.inner.props.keys();

        if self.inner.def.is_stateful() {
            for (name, value) in &new_props {
                self.inner.props.set(PropKey::named(name), value.clone());
            }
            for name in current_keys {
                if !new_props.contains_key(&name) {
                    self.inner.props.delete(&PropKey::named(&name));
                }
            }
            return Ok(());
        }

        let mut changed = false;
        for (name, value) in &new_props {
            if self.inner.props.peek(&PropKey::named(name)) != *value {
                self.inner.props.set(PropKey::named(name), value.clone());
                changed = true;
            }
        }
        for name in current_keys {
            if !new_props.contains_key(&name) {
                self.inner.props.delete(&PropKey::named(&name));
                changed = true;
            }
        }
        if changed {
            self.run_update()?;
        }
        Ok(())
    }

    /// Swap the live subtree for a lightweight placeholder and pause the
    /// scope. State is kept; descendants follow.
    pub fn deactivate(&self) -> Result<(), TreeError> {
        {
            let mut phase = self.inner.phase.lock();
            if *phase != WidgetPhase::Activated {
                return Ok(());
            }
            *phase = WidgetPhase::Deactivating;
        }

        for descendant in self.child_widgets() {
            descendant.deactivate_inner();
        }

        let reconciler = Reconciler::new(self.inner.host.clone());
        if let Some(subtree) = self.inner.subtree.lock().clone() {
            let placeholder = VNode::comment(&format!("off:{}", self.inner.def.name()));
            if let Some(first) = reconciler.first_host(&subtree) {
                if let Some(container) = self.inner.host.get_parent_element(first) {
                    reconciler.mount(&placeholder, container, Some(first))?;
                }
            }
            let mut hosts = Vec::new();
            reconciler.collect_hosts(&subtree, &mut hosts);
            for host in hosts {
                self.inner.host.remove(host);
            }
            *self.inner.placeholder.lock() = Some(placeholder);
        }

        self.inner.scope.pause();
        *self.inner.phase.lock() = WidgetPhase::Deactivated;
        if let Some(hook) = &self.inner.def.inner.deactivated {
            hook();
        }
        Ok(())
    }

    // Phase-only deactivation for descendants; the ancestor's host swap
    // already detached their output, and the shared scope tree handles
    // pausing.
    fn deactivate_inner(&self) {
        {
            let mut phase = self.inner.phase.lock();
            if *phase != WidgetPhase::Activated {
                return;
            }
            *phase = WidgetPhase::Deactivated;
        }
        for descendant in self.child_widgets() {
            descendant.deactivate_inner();
        }
        if let Some(hook) = &self.inner.def.inner.deactivated {
            hook();
        }
    }

    /// Restore the live subtree, resume the scope, and replay any change
    /// seen while deactivated as exactly one re-render.
    pub fn activate(&self) -> Result<(), TreeError> {
        {
            let phase = self.inner.phase.lock();
            if *phase != WidgetPhase::Deactivated {
                return Ok(());
            }
        }
        self.inner.scope.unpause();

        let reconciler = Reconciler::new(self.inner.host.clone());
        let placeholder = self.inner.placeholder.lock().take();
        if let (Some(subtree), Some(placeholder)) =
            (self.inner.subtree.lock().clone(), placeholder)
        {
            let ph_host = placeholder.host();
            if let (Some(ph_host), Some(container)) = (
                ph_host,
                ph_host.and_then(|h| self.inner.host.get_parent_element(h)),
            ) {
                let mut hosts = Vec::new();
                reconciler.collect_hosts(&subtree, &mut hosts);
                for host in hosts {
                    self.inner.host.insert_before(container, host, ph_host);
                }
            }
            reconciler.unmount(&placeholder)?;
        }

        *self.inner.phase.lock() = WidgetPhase::Activated;
        if let Some(hook) = &self.inner.def.inner.activated {
            hook();
        }
        for descendant in self.child_widgets() {
            descendant.activate_inner();
        }
        if self.inner.dirty_while_inactive.swap(false, Ordering::SeqCst) {
            self.run_update()?;
        }
        Ok(())
    }

    fn activate_inner(&self) {
        {
            let mut phase = self.inner.phase.lock();
            if *phase != WidgetPhase::Deactivated {
                return;
            }
            *phase = WidgetPhase::Activated;
        }
        if let Some(hook) = &self.inner.def.inner.activated {
            hook();
        }
        for descendant in self.child_widgets() {
            descendant.activate_inner();
        }
        if self.inner.dirty_while_inactive.swap(false, Ordering::SeqCst) {
            if let Err(error) = self.run_update() {
                tracing::error!(
                    widget = self.inner.def.name(),
                    error = %error,
                    "replayed update failed"
                );
            }
        }
    }

    /// Begin unmounting. The before-unmount hook may hold the gate; final
    /// cleanup runs when it is released (immediately without a hook).
    pub fn unmount(&self) {
        {
            let mut phase = self.inner.phase.lock();
            if matches!(*phase, WidgetPhase::Uninstalling | WidgetPhase::Unloaded) {
                return;
            }
            *phase = WidgetPhase::Uninstalling;
        }

        match &self.inner.def.inner.before_unmount {
            Some(hook) => {
                let gate = UnmountGate::new();
                hook(&gate);
                let widget = self.clone();
                gate.deferred.on_settled(Box::new(move || {
                    widget.finalize_unmount();
                }));
            }
            None => self.finalize_unmount(),
        }
    }

    fn finalize_unmount(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let reconciler = Reconciler::new(self.inner.host.clone());
        if let Some(subtree) = self.inner.subtree.lock().take() {
            if let Err(error) = reconciler.unmount(&subtree) {
                tracing::error!(
                    widget = self.inner.def.name(),
                    error = %error,
                    "subtree unmount failed"
                );
            }
        }
        if let Some(placeholder) = self.inner.placeholder.lock().take() {
            let _ = reconciler.unmount(&placeholder);
        }
        if let Some(listener) = self.inner.update_listener.lock().take() {
            listener.destroy();
        }
        self.inner.scope.destroy();
        *self.inner.phase.lock() = WidgetPhase::Unloaded;
        if let Some(node) = self.inner.node.upgrade() {
            node.set_widget_instance(None);
            node.set_phase(NodePhase::Unmounted);
        }
    }

    /// Direct descendant widget instances, found through the rendered
    /// subtree.
    fn child_widgets(&self) -> Vec<Widget> {
        let mut out = Vec::new();
        if let Some(subtree) = self.inner.subtree.lock().clone() {
            // The render root itself may be a widget node.
            if let Some(widget) = subtree.widget_instance() {
                out.push(widget);
            } else {
                collect_child_widgets(&subtree, &mut out);
            }
        }
        out
    }

    pub fn phase(&self) -> WidgetPhase {
        *self.inner.phase.lock()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    pub fn def(&self) -> &WidgetDef {
        &self.inner.def
    }

    pub fn props(&self) -> &ReactiveObject {
        &self.inner.props
    }

    pub(crate) fn subtree(&self) -> Option<VNode> {
        self.inner.subtree.lock().clone()
    }

    pub(crate) fn placeholder_node(&self) -> Option<VNode> {
        self.inner.placeholder.lock().clone()
    }
}

fn collect_child_widgets(node: &VNode, out: &mut Vec<Widget>) {
    for child in node.children() {
        if let Some(widget) = child.widget_instance() {
            out.push(widget);
        } else {
            collect_child_widgets(&child, out);
        }
    }
}

impl std::fmt::Debug for Widget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Widget")
            .field("def", &self.inner.def.name())
            .field("phase", &self.phase())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
